use crate::querier::Querier;
use homopir_common::{
    branch_opt_util,
    error::HomoPIRError,
    params::EMBEDDED_SELECTOR_BYTE_LEN,
    response::ResponseVector,
    selector::EmbeddedSelector,
    serialization::decode_record_from_partitions,
};
use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Records recovered from a response, after dropping false positives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResults {
    hits: BTreeMap<String, Vec<Vec<u8>>>,
    false_positives: usize,
}

impl QueryResults {
    /// Payloads of records matching `selector`, in the order the responder encountered them.
    pub fn payloads(&self, selector: &str) -> &[Vec<u8>] {
        self.hits.get(selector).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn hits(&self) -> &BTreeMap<String, Vec<Vec<u8>>> {
        &self.hits
    }

    pub fn into_hits(self) -> BTreeMap<String, Vec<Vec<u8>>> {
        self.hits
    }

    pub fn num_hits(&self) -> usize {
        self.hits.values().map(Vec::len).sum()
    }

    /// Records which landed on a queried row, but whose embedded selector tag didn't match the row's selector, or which
    /// couldn't be decoded at all.
    pub const fn false_positives(&self) -> usize {
        self.false_positives
    }
}

impl Querier {
    /// Decrypts a response and recovers every record matching one of the queried selectors.
    ///
    /// Columns are decrypted in parallel. Selector `i` owns bits [i * d, (i + 1) * d) of each column's plaintext, where d is the
    /// data partition bit size, and each hit on its row spans `num_partitions_per_record` consecutive columns. Hits are decoded
    /// back into bytes and, when selector embedding is enabled, kept only if their embedded tag matches the selector's own tag.
    pub fn decrypt_response(&self, response: &ResponseVector) -> Result<QueryResults, HomoPIRError> {
        if branch_opt_util::unlikely(response.query_id() != self.query_info.query_id()) {
            return Err(HomoPIRError::QueryKeyMismatch);
        }

        let num_columns = self.query_info.num_columns();
        if let Some((column, _)) = response.columns().find(|&(column, _)| column >= num_columns) {
            branch_opt_util::cold();
            return Err(HomoPIRError::ColumnIndexOutOfRange { column, num_columns });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.query_info.num_workers())
            .build()
            .map_err(|e| HomoPIRError::ThreadPoolBuildFailed(e.to_string()))?;

        let private_key = self.key_pair.private_key();
        let encrypted_columns = response.columns().collect::<Vec<_>>();

        let plaintext_columns = pool.install(|| {
            encrypted_columns
                .par_iter()
                .map(|&(column, c)| private_key.decrypt(c).map(|plaintext| (column, plaintext)))
                .collect::<Result<BTreeMap<u64, BigUint>, HomoPIRError>>()
        })?;

        let mut results = QueryResults::default();
        for (ordinal, selector) in self.selectors.iter().enumerate() {
            for record in self.extract_records_of_selector(ordinal, &plaintext_columns) {
                let verified = match record {
                    Ok(record) => self.verify_embedded_selector(ordinal, record),
                    Err(e) => {
                        warn!("Undecodable hit for selector #{}: {}", ordinal, e);
                        None
                    }
                };

                match verified {
                    Some(payload) => results.hits.entry(selector.clone()).or_default().push(payload),
                    None => {
                        debug!("Dropping false positive hit for selector #{}", ordinal);
                        results.false_positives += 1;
                    }
                }
            }
        }

        info!(
            "Decrypted response to query {}: {} hits, {} false positives dropped",
            self.query_info.query_id(),
            results.num_hits(),
            results.false_positives
        );

        Ok(results)
    }

    /// Slices selector `ordinal`'s bits out of every column, grouping them per hit. A hit whose partitions are all zero was never
    /// written, because every encoded record carries a non-zero boundary marker. Hits which don't decode are kept as errors.
    fn extract_records_of_selector(&self, ordinal: usize, plaintext_columns: &BTreeMap<u64, BigUint>) -> Vec<Result<Vec<u8>, HomoPIRError>> {
        let partition_bit_len = self.query_info.data_partition_bit_size();
        let num_partitions = self.query_info.num_partitions_per_record();

        let shift = ordinal * partition_bit_len as usize;
        let mask = (BigUint::from(1u64) << partition_bit_len as usize) - 1u32;

        let mut records = Vec::new();
        let mut partitions = vec![0u32; num_partitions];

        for hit in 0..self.query_info.max_hits_per_selector() {
            let first_column = (hit * num_partitions) as u64;

            for (j, partition) in partitions.iter_mut().enumerate() {
                *partition = match plaintext_columns.get(&(first_column + j as u64)) {
                    Some(plaintext) => ((plaintext >> shift) & &mask).to_u32().unwrap_or_default(),
                    None => 0,
                };
            }

            if partitions.iter().all(|&partition| partition == 0) {
                continue;
            }

            records.push(decode_record_from_partitions(&partitions, partition_bit_len));
        }

        records
    }

    /// Strips the embedded selector tag off a decoded record, returning its payload only if the tag is the expected one.
    fn verify_embedded_selector(&self, ordinal: usize, mut record: Vec<u8>) -> Option<Vec<u8>> {
        if !self.query_info.embed_selector() {
            return Some(record);
        }
        if record.len() < EMBEDDED_SELECTOR_BYTE_LEN {
            return None;
        }

        let payload = record.split_off(EMBEDDED_SELECTOR_BYTE_LEN);
        let embedded = EmbeddedSelector::from_le_bytes(&record).ok()?;

        match self.embedding_map.get(ordinal) {
            Some(expected) if expected == embedded => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::Querier;
    use homopir_common::{
        error::{ErrorKind, HomoPIRError},
        paillier::{Ciphertext, KeyPair},
        query_info::QueryInfo,
        response::ResponseVector,
        selector::EmbeddedSelector,
        serialization::encode_record_as_partitions,
    };
    use num_bigint::BigUint;
    use rand::prelude::*;
    use rand_chacha::ChaCha20Rng;
    use std::collections::BTreeMap;

    const HASH_KEY: &[u8] = b"response decryption test key";
    const DATA_PARTITION_BIT_SIZE: u32 = 8;
    const RECORD_BYTE_LEN: usize = 6;

    fn setup(selectors: &[&str]) -> Querier {
        let mut rng = ChaCha20Rng::from_os_rng();
        let kp = KeyPair::generate(384, 40, &mut rng).expect("Key generation failed");

        let query_info = QueryInfo::new(selectors.len(), 8, HASH_KEY, DATA_PARTITION_BIT_SIZE, RECORD_BYTE_LEN)
            .with_max_hits_per_selector(2)
            .with_num_workers(2)
            .with_selector_collisions_tolerated(true);
        let (_, querier) = Querier::encrypt_query(query_info, selectors, kp).expect("Query encryption failed");

        querier
    }

    /// Lays out `(ordinal, hit, tag, payload)` records the way a responder would, summing them up column-wise, then encrypts each column.
    fn craft_response(querier: &Querier, records: &[(usize, usize, EmbeddedSelector, &[u8])]) -> ResponseVector {
        let mut rng = ChaCha20Rng::from_os_rng();
        let query_info = querier.query_info();
        let num_partitions = query_info.num_partitions_per_record();

        let mut plaintext_columns: BTreeMap<u64, BigUint> = BTreeMap::new();
        for &(ordinal, hit, tag, payload) in records {
            let partitions = encode_record_as_partitions(&tag.to_le_bytes(), payload, DATA_PARTITION_BIT_SIZE, num_partitions);

            for (j, &partition) in partitions.iter().enumerate() {
                let column = (hit * num_partitions + j) as u64;
                let slot = BigUint::from(partition) << (ordinal * DATA_PARTITION_BIT_SIZE as usize);

                *plaintext_columns.entry(column).or_default() += slot;
            }
        }

        let mut response = ResponseVector::new(query_info.query_id());
        for (column, plaintext) in plaintext_columns {
            response.insert(column, querier.key_pair().encrypt(&plaintext, &mut rng).expect("Encryption failed"));
        }

        response
    }

    #[test]
    fn hits_of_every_selector_are_recovered() {
        let selectors = ["alice", "bob", "carol"];
        let querier = setup(&selectors);

        let alice = EmbeddedSelector::embed("alice");
        let carol = EmbeddedSelector::embed("carol");

        let response = craft_response(&querier, &[(0, 0, alice, b"a-one"), (0, 1, alice, b"a-two"), (2, 0, carol, b"c\x00\x00")]);
        let results = querier.decrypt_response(&response).expect("Decryption failed");

        assert_eq!(results.payloads("alice"), &[b"a-one".to_vec(), b"a-two".to_vec()]);
        assert!(results.payloads("bob").is_empty());
        assert_eq!(results.payloads("carol"), &[b"c\x00\x00".to_vec()]);
        assert_eq!(results.num_hits(), 3);
        assert_eq!(results.false_positives(), 0);
    }

    #[test]
    fn hits_with_foreign_embedded_selector_are_dropped() {
        let querier = setup(&["alice", "bob"]);

        let alice = EmbeddedSelector::embed("alice");
        let mallory = EmbeddedSelector::embed("mallory");

        let response = craft_response(&querier, &[(0, 0, mallory, b"not-al"), (0, 1, alice, b"alice"), (1, 0, alice, b"wrong")]);
        let results = querier.decrypt_response(&response).expect("Decryption failed");

        assert_eq!(results.payloads("alice"), &[b"alice".to_vec()]);
        assert!(results.payloads("bob").is_empty());
        assert_eq!(results.false_positives(), 2);
    }

    #[test]
    fn undecodable_hit_is_dropped_as_false_positive() {
        let mut rng = ChaCha20Rng::from_os_rng();
        let querier = setup(&["alice"]);

        let alice = EmbeddedSelector::embed("alice");
        let mut response = craft_response(&querier, &[(0, 1, alice, b"alice")]);

        // First hit without a boundary marker.
        let garbage = querier.key_pair().encrypt(&BigUint::from(5u32), &mut rng).expect("Encryption failed");
        response.insert(0, garbage);

        let results = querier.decrypt_response(&response).expect("Decryption failed");

        assert_eq!(results.payloads("alice"), &[b"alice".to_vec()]);
        assert_eq!(results.false_positives(), 1);
    }

    #[test]
    fn empty_response_yields_no_hits() {
        let querier = setup(&["alice"]);

        let results = querier.decrypt_response(&ResponseVector::new(querier.query_info().query_id())).expect("Decryption failed");
        assert_eq!(results.num_hits(), 0);
        assert_eq!(results.false_positives(), 0);
    }

    #[test]
    fn malformed_responses_are_rejected() {
        let querier = setup(&["alice"]);
        let num_columns = querier.query_info().num_columns();

        let wrong_query = ResponseVector::new(querier.query_info().query_id() + 1);
        assert_eq!(querier.decrypt_response(&wrong_query), Err(HomoPIRError::QueryKeyMismatch));

        let mut out_of_range = ResponseVector::new(querier.query_info().query_id());
        out_of_range.insert(num_columns, Ciphertext::from_biguint(BigUint::from(1u32)));
        assert_eq!(
            querier.decrypt_response(&out_of_range),
            Err(HomoPIRError::ColumnIndexOutOfRange { column: num_columns, num_columns })
        );

        let mut invalid = ResponseVector::new(querier.query_info().query_id());
        invalid.insert(0, Ciphertext::from_biguint(querier.key_pair().public_key().n_squared().clone()));
        let err = querier.decrypt_response(&invalid).unwrap_err();
        assert_eq!(err, HomoPIRError::CiphertextOutOfRange);
        assert_eq!(err.kind(), ErrorKind::Decryption);

        let mut multiple_of_n = ResponseVector::new(querier.query_info().query_id());
        multiple_of_n.insert(0, Ciphertext::from_biguint(querier.key_pair().public_key().n().clone()));
        assert_eq!(querier.decrypt_response(&multiple_of_n), Err(HomoPIRError::CiphertextOutOfRange));
    }
}
