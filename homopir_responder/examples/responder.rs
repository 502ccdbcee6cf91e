use std::error::Error;
use std::sync::Arc;

use homopir_responder::Responder;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const HOST_IP: &str = "127.0.0.1";
const HOST_PORT: u16 = 8080;
const NUM_PRODUCERS: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let responder_address = format!("{}:{}", HOST_IP, HOST_PORT);

    let listener = TcpListener::bind(&responder_address).await.expect("Failed to setup TCP listener for PIR responder");
    println!("PIR Responder listening @ {}", &responder_address);

    let records: Vec<(&str, &str)> = vec![
        ("apple", "red"),
        ("banana", "yellow"),
        ("grape", "purple"),
        ("orange", "orange"),
        ("lemon", "yellow"),
        ("banana", "also yellow"),
        ("blueberry", "blue"),
        ("kiwi", "brown"),
        ("watermelon", "green"),
        ("strawberry", "red"),
        ("peach", "pink"),
        ("cherry", "red"),
        ("avocado", "green"),
        ("plum", "purple"),
    ];
    let records = Arc::new(records);

    loop {
        let (mut stream, peer_address) = listener.accept().await?;
        println!("New connection from PIR querier @ {}", peer_address);

        let records = records.clone();

        tokio::spawn(async move {
            // Receive query from PIR querier
            let mut query_len_buf = [0u8; 4];
            if stream.read_exact(&mut query_len_buf).await.is_err() {
                return;
            }

            let query_len = u32::from_le_bytes(query_len_buf) as usize;

            let mut query_bytes = vec![0u8; query_len];
            if stream.read_exact(&mut query_bytes).await.is_err() {
                return;
            }

            println!("Received query of length {}B from PIR querier @ {}", query_len, peer_address);

            // Evaluation runs on tokio's blocking thread pool.
            let response = tokio::task::spawn_blocking(move || {
                let responder = Responder::from_query_bytes(&query_bytes)?;
                responder.respond(records.as_slice(), NUM_PRODUCERS)
            })
            .await;

            let response_bytes = match response {
                Ok(Ok(response)) => response.to_bytes(),
                Ok(Err(e)) => {
                    println!("Failed to respond to PIR querier @ {}: {}", peer_address, e);
                    return;
                }
                Err(_) => return,
            };

            // Send response to PIR querier
            let response_len = response_bytes.len() as u32;
            if stream.write_all(&response_len.to_le_bytes()).await.is_err() || stream.write_all(&response_bytes).await.is_err() {
                return;
            }

            println!("Sent response of length {}B to PIR querier @ {}", response_len, peer_address);
        });
    }
}
