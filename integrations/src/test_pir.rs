#![cfg(test)]

use std::collections::{BTreeMap, HashSet};

use homopir_common::{
    selector::{EmbeddedSelector, row_index_of},
    utils::{find_colliding_selector, generate_random_records},
};
use homopir_querier::{HomoPIRError, KeyPair, Querier, QueryInfo, QueryResults, ResponseVector};
use homopir_responder::Responder;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use test_case::test_case;

const MODULUS_BIT_LEN: u64 = 512;
const PRIMALITY_CERTAINTY: u32 = 64;

fn generate_key_pair() -> KeyPair {
    let mut rng = ChaCha8Rng::from_os_rng();
    KeyPair::generate(MODULUS_BIT_LEN, PRIMALITY_CERTAINTY, &mut rng).expect("Key generation failed")
}

/// Picks `count` selectors out of `candidates`, no two of them landing on the same row.
fn pick_non_colliding<'a>(candidates: impl Iterator<Item = &'a str>, count: usize, hash_key: &[u8], hash_bit_size: u32) -> Vec<String> {
    let mut rows = HashSet::new();

    candidates
        .filter(|selector| rows.insert(row_index_of(selector, hash_key, hash_bit_size)))
        .take(count)
        .map(str::to_string)
        .collect()
}

/// Runs one full round: querier encrypts, responder answers, querier decrypts. Everything crossing the wire, along with the
/// querier's private state, goes through its byte representation.
fn run_pir(query_info: QueryInfo, selectors: &[String], records: &[(String, Vec<u8>)], num_producers: usize) -> (Querier, QueryResults) {
    let (query, querier) = Querier::encrypt_query(query_info, selectors, generate_key_pair()).expect("Query encryption failed");
    let querier = Querier::from_bytes(&querier.to_bytes()).expect("Querier state must deserialize");

    let responder = Responder::from_query_bytes(&query.to_bytes()).expect("Responder setup failed");
    let response_bytes = responder.respond(records, num_producers).expect("Responder can't respond").to_bytes();

    let response = ResponseVector::from_bytes(&response_bytes).expect("Response must deserialize");
    let results = querier.decrypt_response(&response).expect("Querier can't decrypt response");

    (querier, results)
}

#[test_case(1; "Single producer")]
#[test_case(4; "Four producers")]
fn test_pir_with_three_selectors_over_sixteen_rows(num_producers: usize) {
    const HASH_KEY: &[u8] = b"sixteen rows";
    const HASH_BIT_SIZE: u32 = 4;

    let candidates = (0..).map(|i| format!("user-{}@example.com", i)).take(64).collect::<Vec<_>>();
    let picked = pick_non_colliding(candidates.iter().map(String::as_str), 4, HASH_KEY, HASH_BIT_SIZE);

    let (selectors, unqueried) = (picked[..3].to_vec(), picked[3].clone());

    let records = vec![
        (selectors[0].clone(), b"record of first".to_vec()),
        (selectors[1].clone(), b"record of second".to_vec()),
        (unqueried.clone(), b"never retrieved".to_vec()),
        (selectors[2].clone(), b"record of third".to_vec()),
        (selectors[0].clone(), b"again, first".to_vec()),
    ];

    let query_info = QueryInfo::new(3, HASH_BIT_SIZE, HASH_KEY, 8, 16).with_query_id(1).with_num_workers(4);
    let (_, results) = run_pir(query_info, &selectors, &records, num_producers);

    assert_eq!(results.payloads(&selectors[0]), &[b"record of first".to_vec(), b"again, first".to_vec()]);
    assert_eq!(results.payloads(&selectors[1]), &[b"record of second".to_vec()]);
    assert_eq!(results.payloads(&selectors[2]), &[b"record of third".to_vec()]);
    assert!(results.payloads(&unqueried).is_empty());

    assert_eq!(results.num_hits(), 4);
    assert_eq!(results.false_positives(), 0);
}

#[test_case(false; "Without exponentiation lookup table")]
#[test_case(true; "With exponentiation lookup table")]
fn test_pir_over_random_records(use_exp_lookup_table: bool) {
    const NUM_RECORDS: usize = 256;
    const MAX_RECORD_BYTE_LEN: usize = 32;
    const NUM_SELECTORS: usize = 5;

    const HASH_KEY: &[u8] = b"random records";
    const HASH_BIT_SIZE: u32 = 8;

    let records = generate_random_records(NUM_RECORDS, MAX_RECORD_BYTE_LEN);

    let mut rng = ChaCha8Rng::from_os_rng();
    let mut shuffled = records.iter().map(|(selector, _)| selector.as_str()).collect::<Vec<_>>();
    shuffled.shuffle(&mut rng);

    let selectors = pick_non_colliding(shuffled.into_iter(), NUM_SELECTORS, HASH_KEY, HASH_BIT_SIZE);

    let query_info = QueryInfo::new(NUM_SELECTORS, HASH_BIT_SIZE, HASH_KEY, 16, MAX_RECORD_BYTE_LEN)
        .with_query_id(2)
        .with_max_hits_per_selector(8)
        .with_num_workers(3)
        .with_exp_lookup_table(use_exp_lookup_table);
    let (_, results) = run_pir(query_info, &selectors, &records, 3);

    let mut expected: BTreeMap<&str, Vec<Vec<u8>>> = BTreeMap::new();
    for (selector, payload) in records.iter().filter(|(selector, _)| selectors.contains(selector)) {
        expected.entry(selector.as_str()).or_default().push(payload.clone());
    }

    for selector in selectors.iter() {
        assert_eq!(results.payloads(selector), expected[selector.as_str()].as_slice());
    }
}

#[test]
fn test_pir_drops_colliding_records_as_false_positives() {
    const HASH_KEY: &[u8] = b"false positives";
    const HASH_BIT_SIZE: u32 = 4;

    let selectors = vec!["alice".to_string(), "bob".to_string()];
    let colliders = selectors
        .iter()
        .map(|selector| find_colliding_selector(selector, HASH_KEY, HASH_BIT_SIZE))
        .collect::<Vec<_>>();

    let records = vec![
        (colliders[0].clone(), b"collides with alice".to_vec()),
        (selectors[0].clone(), b"alice".to_vec()),
        (colliders[1].clone(), b"collides with bob".to_vec()),
    ];

    let query_info = QueryInfo::new(2, HASH_BIT_SIZE, HASH_KEY, 8, 24).with_selector_collisions_tolerated(true);
    let (_, results) = run_pir(query_info, &selectors, &records, 2);

    assert_eq!(results.payloads("alice"), &[b"alice".to_vec()]);
    assert!(results.payloads("bob").is_empty());
    assert_eq!(results.false_positives(), 2);
}

#[test]
fn test_pir_without_embedded_selector_reports_colliding_records() {
    const HASH_KEY: &[u8] = b"no embedding";
    const HASH_BIT_SIZE: u32 = 4;

    let selectors = vec!["alice".to_string()];
    let collider = find_colliding_selector("alice", HASH_KEY, HASH_BIT_SIZE);

    let records = vec![(selectors[0].clone(), b"alice".to_vec()), (collider, b"someone else".to_vec())];

    let query_info = QueryInfo::new(1, HASH_BIT_SIZE, HASH_KEY, 8, 16).with_embed_selector(false);
    let (_, results) = run_pir(query_info, &selectors, &records, 1);

    assert_eq!(results.payloads("alice"), &[b"alice".to_vec(), b"someone else".to_vec()]);
    assert_eq!(results.false_positives(), 0);
}

#[test]
fn test_pir_with_shadowed_selector() {
    const HASH_KEY: &[u8] = b"shadowed selectors";
    const HASH_BIT_SIZE: u32 = 4;

    let shadowed = find_colliding_selector("alice", HASH_KEY, HASH_BIT_SIZE);
    let selectors = vec!["alice".to_string(), shadowed.clone()];

    let records = vec![(shadowed.clone(), b"unreachable".to_vec()), (selectors[0].clone(), b"alice".to_vec())];

    let strict = QueryInfo::new(2, HASH_BIT_SIZE, HASH_KEY, 8, 16);
    assert!(matches!(
        Querier::encrypt_query(strict.clone(), &selectors, generate_key_pair()),
        Err(HomoPIRError::SelectorCollision { .. })
    ));

    let (querier, results) = run_pir(strict.with_selector_collisions_tolerated(true), &selectors, &records, 2);

    assert_eq!(querier.shadowed_selectors(), &[shadowed.clone()]);
    assert_eq!(results.payloads("alice"), &[b"alice".to_vec()]);
    assert!(results.payloads(&shadowed).is_empty());
    assert_eq!(results.false_positives(), 1);
}

#[test]
fn test_pir_with_tampered_embedding_map_drops_every_hit() {
    const HASH_KEY: &[u8] = b"tampered embedding";
    const HASH_BIT_SIZE: u32 = 6;

    let selectors = vec!["alice".to_string()];
    let records = vec![(selectors[0].clone(), b"alice".to_vec())];

    let query_info = QueryInfo::new(1, HASH_BIT_SIZE, HASH_KEY, 8, 8);
    let (query, mut querier) = Querier::encrypt_query(query_info, &selectors, generate_key_pair()).expect("Query encryption failed");

    let response = Responder::new(query).expect("Responder setup failed").respond(&records, 1).expect("Responder can't respond");

    querier.embedding_map_mut().insert(0, EmbeddedSelector::embed("mallory"));
    let results = querier.decrypt_response(&response).expect("Querier can't decrypt response");

    assert!(results.payloads("alice").is_empty());
    assert_eq!(results.false_positives(), 1);
}
