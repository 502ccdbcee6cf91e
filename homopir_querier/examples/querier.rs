use std::error::Error;

use homopir_querier::{KeyPair, Querier, QueryInfo, ResponseVector};

use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const RESPONDER_IP: &str = "127.0.0.1";
const RESPONDER_PORT: u16 = 8080;

const MODULUS_BIT_LEN: u64 = 1024;
const PRIMALITY_CERTAINTY: u32 = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut rng = ChaCha20Rng::from_os_rng();
    let key_pair = KeyPair::generate(MODULUS_BIT_LEN, PRIMALITY_CERTAINTY, &mut rng)?;

    let selectors = ["banana", "kiwi"];
    let query_info = QueryInfo::new(selectors.len(), 6, b"fruit basket", 8, 16)
        .with_num_workers(4)
        .with_selector_collisions_tolerated(true);

    let (query, querier) = Querier::encrypt_query(query_info, &selectors, key_pair)?;
    println!("Generated query for selectors: {:?}", selectors);

    let responder_address = format!("{}:{}", RESPONDER_IP, RESPONDER_PORT);
    let mut stream = TcpStream::connect(&responder_address).await.expect("Failed to connect to PIR responder");
    println!("Connected to PIR responder @ {}", &responder_address);

    // Send query to PIR responder
    let query_bytes = query.to_bytes();
    let query_len = query_bytes.len() as u32;
    stream.write_all(&query_len.to_le_bytes()).await?;
    stream.write_all(&query_bytes).await?;

    println!("Sent query of length {}B", query_len);

    // Receive response from PIR responder
    let mut response_len_buf = [0u8; 4];
    stream.read_exact(&mut response_len_buf).await?;

    let response_len = u32::from_le_bytes(response_len_buf) as usize;

    let mut response_bytes = vec![0u8; response_len];
    stream.read_exact(&mut response_bytes).await?;

    println!("Received response of length {}B", response_len);

    let response = ResponseVector::from_bytes(&response_bytes)?;
    let results = querier.decrypt_response(&response)?;

    for selector in selectors {
        for payload in results.payloads(selector) {
            println!("Retrieved record of '{}': '{}'", selector, String::from_utf8_lossy(payload));
        }
    }
    println!("Dropped {} false positives", results.false_positives());

    Ok(())
}
