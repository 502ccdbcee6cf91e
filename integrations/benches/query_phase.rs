use divan;
use homopir_common::utils::generate_random_records;
use homopir_querier::{KeyPair, Querier, QueryInfo};
use homopir_responder::Responder;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn main() {
    divan::main();
}

#[derive(Debug)]
struct QueryConfig {
    modulus_bit_len: u64,
    hash_bit_size: u32,
    num_selectors: usize,
    data_partition_bit_size: u32,
    record_byte_len: usize,
}

const ARGS: &[QueryConfig] = &[
    QueryConfig {
        modulus_bit_len: 1024,
        hash_bit_size: 8,
        num_selectors: 8,
        data_partition_bit_size: 8,
        record_byte_len: 32,
    },
    QueryConfig {
        modulus_bit_len: 2048,
        hash_bit_size: 8,
        num_selectors: 32,
        data_partition_bit_size: 16,
        record_byte_len: 64,
    },
];
const WORKER_COUNTS: [usize; 2] = [1, 4];

fn setup(config: &QueryConfig, num_workers: usize, records: &[(String, Vec<u8>)]) -> (QueryInfo, Vec<String>, KeyPair) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let key_pair = KeyPair::generate(config.modulus_bit_len, 64, &mut rng).unwrap();

    let selectors = records.iter().take(config.num_selectors).map(|(selector, _)| selector.clone()).collect::<Vec<_>>();
    let query_info = QueryInfo::new(config.num_selectors, config.hash_bit_size, b"benchmark", config.data_partition_bit_size, config.record_byte_len)
        .with_num_workers(num_workers)
        .with_selector_collisions_tolerated(true);

    (query_info, selectors, key_pair)
}

#[divan::bench(args = ARGS, consts = WORKER_COUNTS, max_time = Duration::from_secs(100), skip_ext_time = true)]
fn querier_encrypt_query<const NUM_WORKERS: usize>(bencher: divan::Bencher, config: &QueryConfig) {
    let records = generate_random_records(config.num_selectors, config.record_byte_len);
    let (query_info, selectors, key_pair) = setup(config, NUM_WORKERS, &records);

    bencher
        .with_inputs(|| (query_info.clone(), key_pair.clone()))
        .bench_values(|(query_info, key_pair)| Querier::encrypt_query(divan::black_box(query_info), divan::black_box(&selectors), key_pair));
}

#[divan::bench(args = ARGS, consts = WORKER_COUNTS, max_time = Duration::from_secs(100), skip_ext_time = true)]
fn querier_decrypt_response<const NUM_WORKERS: usize>(bencher: divan::Bencher, config: &QueryConfig) {
    let records = generate_random_records(1usize << config.hash_bit_size, config.record_byte_len);
    let (query_info, selectors, key_pair) = setup(config, NUM_WORKERS, &records);

    let (query, querier) = Querier::encrypt_query(query_info, &selectors, key_pair).unwrap();
    let response = Responder::new(query).unwrap().respond(&records, 4).unwrap();

    bencher.bench(|| divan::black_box(&querier).decrypt_response(divan::black_box(&response)));
}
