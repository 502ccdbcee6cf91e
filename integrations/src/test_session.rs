#![cfg(test)]

use std::sync::Arc;

use homopir_common::utils::generate_random_records;
use homopir_querier::{KeyPair, Querier, QueryInfo};
use homopir_responder::{AggregationSession, HomoPIRError, ProducerHandle, QueryVector, RowEvaluator, producer_for_row};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Evaluates the records assigned to `producer`, then contributes them and waits for the end of the epoch.
async fn produce(query: Arc<QueryVector>, mut producer: ProducerHandle, total_producers: usize, records: Arc<Vec<(String, Vec<u8>)>>) -> Result<u64, HomoPIRError> {
    let mut evaluator = RowEvaluator::new(query, producer.producer(), total_producers)?;

    for (selector, payload) in records.iter() {
        let row = evaluator.row_of(selector);
        if producer_for_row(row, total_producers) != producer.producer() {
            continue;
        }

        let contributions = evaluator.evaluate(selector, payload)?;
        producer.contribute_all(contributions).await?;
    }

    producer.flush_and_wait_ack().await
}

async fn run_pir_over_aggregation_session(total_producers: usize) {
    const NUM_EPOCHS: usize = 3;
    const NUM_RECORDS: usize = 64;
    const MAX_RECORD_BYTE_LEN: usize = 24;

    let mut rng = ChaCha8Rng::from_os_rng();
    let key_pair = KeyPair::generate(512, 64, &mut rng).expect("Key generation failed");

    let batches = (0..NUM_EPOCHS).map(|_| Arc::new(generate_random_records(NUM_RECORDS, MAX_RECORD_BYTE_LEN))).collect::<Vec<_>>();

    // One selector out of every batch.
    let selectors = batches.iter().map(|batch| batch[rng.random_range(0..NUM_RECORDS)].0.clone()).collect::<Vec<_>>();

    let query_info = QueryInfo::new(NUM_EPOCHS, 10, b"aggregation session", 8, MAX_RECORD_BYTE_LEN)
        .with_query_id(11)
        .with_num_workers(2)
        .with_selector_collisions_tolerated(true);
    let (query, querier) = Querier::encrypt_query(query_info, &selectors, key_pair).expect("Query encryption failed");
    let query = Arc::new(query);

    let (session, mut collector) = AggregationSession::spawn(&query, total_producers).expect("Session must spawn");
    let mut producers = session.producers();

    for (epoch, batch) in batches.iter().enumerate() {
        let tasks = producers
            .drain(..)
            .map(|producer| {
                let (query, batch) = (query.clone(), batch.clone());
                tokio::spawn(produce(query, producer, total_producers, batch))
            })
            .collect::<Vec<_>>();

        let response = collector.next_response().await.expect("Epoch response must be collected");
        for task in tasks {
            assert_eq!(task.await.expect("Producer task must not panic"), Ok(epoch as u64));
        }

        let results = querier.decrypt_response(&response).expect("Querier can't decrypt response");
        let (selector, payload) = batch.iter().find(|(selector, _)| selector == &selectors[epoch]).expect("Selector is from this batch");

        if !querier.shadowed_selectors().contains(selector) {
            assert_eq!(results.payloads(selector), &[payload.clone()]);
        }
        for (other, other_selector) in selectors.iter().enumerate() {
            if other != epoch {
                assert!(results.payloads(other_selector).is_empty());
            }
        }

        producers = session.producers();
    }

    session.shutdown().await.expect("Session must shut down");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pir_over_aggregation_session_with_two_producers() {
    run_pir_over_aggregation_session(2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pir_over_aggregation_session_with_five_producers() {
    run_pir_over_aggregation_session(5).await;
}
