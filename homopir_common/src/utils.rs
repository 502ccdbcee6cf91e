use crate::selector::row_index_of;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Generates `num_records` records, each a random selector with a random payload of 1 to `max_record_byte_len` bytes.
pub fn generate_random_records(num_records: usize, max_record_byte_len: usize) -> Vec<(String, Vec<u8>)> {
    const SELECTOR_BYTE_LEN: usize = 16;

    let mut rng = ChaCha8Rng::from_os_rng();

    (0..num_records)
        .map(|_| {
            let mut selector = [0u8; SELECTOR_BYTE_LEN];
            rng.fill_bytes(&mut selector);

            let mut payload = vec![0u8; rng.random_range(1..=max_record_byte_len)];
            rng.fill_bytes(&mut payload);

            (selector.iter().map(|byte| format!("{:02x}", byte)).collect::<String>(), payload)
        })
        .collect()
}

/// Finds some other selector, which lands on the same row of the query vector as `selector`.
pub fn find_colliding_selector(selector: &str, hash_key: &[u8], hash_bit_size: u32) -> String {
    let target_row = row_index_of(selector, hash_key, hash_bit_size);

    (0u64..)
        .map(|i| format!("{}-collider-{}", selector, i))
        .find(|candidate| row_index_of(candidate, hash_key, hash_bit_size) == target_row)
        .unwrap_or_default()
}
