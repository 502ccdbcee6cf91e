use crate::querier::{EmbeddingMap, Querier};
use homopir_common::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::{Ciphertext, KeyPair, PublicKey},
    query::QueryVector,
    query_info::QueryInfo,
    selector::row_index_of,
};
use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ops::Range,
};

impl Querier {
    /// Builds the encrypted query vector for `selectors`, along with the querier's private state needed to decrypt the response.
    ///
    /// Selector `i` of the list is assigned to row `row_index_of(selector)` and that row's element encrypts
    /// 2^(i * data_partition_bit_size). All other rows encrypt 0. The row range is split into contiguous, disjoint sub-ranges,
    /// one per worker, each encrypted in parallel into its own ordered partial vector, before all of them are merged.
    ///
    /// # Arguments
    ///
    /// * `query_info` - Public query parameters, including the number of workers to use.
    /// * `selectors` - Distinct selectors, exactly `query_info.num_selectors()` of them.
    /// * `key_pair` - Paillier key pair, whose public half travels with the query vector.
    ///
    /// # Returns
    ///
    /// The query vector to be sent to the responder and the `Querier`, which must be kept private. Fails if parameters are
    /// invalid, if two selectors collide on a row while collisions are not tolerated, or if any worker fails to encrypt.
    pub fn encrypt_query<S: AsRef<str>>(query_info: QueryInfo, selectors: &[S], key_pair: KeyPair) -> Result<(QueryVector, Querier), HomoPIRError> {
        let public_key = key_pair.public_key();
        query_info.validate(public_key.bit_len())?;

        if branch_opt_util::unlikely(selectors.len() != query_info.num_selectors()) {
            return Err(HomoPIRError::SelectorCountMismatch {
                expected: query_info.num_selectors(),
                found: selectors.len(),
            });
        }

        let (row_to_ordinal, shadowed_selectors) = map_selectors_to_rows(&query_info, selectors)?;

        let num_rows = query_info.num_rows();
        let row_ranges = split_rows_among_workers(num_rows, query_info.num_workers());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(query_info.num_workers())
            .build()
            .map_err(|e| HomoPIRError::ThreadPoolBuildFailed(e.to_string()))?;

        let partial_vectors = pool.install(|| {
            row_ranges
                .into_par_iter()
                .map(|rows| encrypt_row_range(public_key, &row_to_ordinal, query_info.data_partition_bit_size(), rows))
                .collect::<Result<Vec<_>, HomoPIRError>>()
        })?;

        let elements = merge_partial_vectors(num_rows, partial_vectors)?;
        let query = QueryVector::new(query_info.clone(), public_key.clone(), elements)?;

        info!(
            "Built encrypted query vector {} with {} rows for {} selectors, using {} workers",
            query_info.query_id(),
            num_rows,
            selectors.len(),
            query_info.num_workers()
        );

        let selectors = selectors.iter().map(|selector| selector.as_ref().to_string()).collect::<Vec<_>>();
        let embedding_map = EmbeddingMap::from_selectors(&selectors);

        let querier = Querier {
            key_pair,
            query_info,
            selectors,
            embedding_map,
            shadowed_selectors,
        };

        Ok((query, querier))
    }
}

/// Assigns each selector's ordinal to the row it hashes to. When two selectors land on the same row, the first one keeps the row;
/// the later one is either reported as shadowed, if collisions are tolerated, or fails the whole query.
fn map_selectors_to_rows<S: AsRef<str>>(query_info: &QueryInfo, selectors: &[S]) -> Result<(HashMap<u64, usize>, Vec<String>), HomoPIRError> {
    let mut row_to_ordinal = HashMap::with_capacity(selectors.len());
    let mut seen = HashSet::with_capacity(selectors.len());
    let mut shadowed_selectors = Vec::new();

    for (ordinal, selector) in selectors.iter().enumerate() {
        let selector: &str = selector.as_ref();

        if branch_opt_util::unlikely(!seen.insert(selector)) {
            return Err(HomoPIRError::DuplicateSelector(selector.to_string()));
        }

        let row = row_index_of(selector, query_info.hash_key(), query_info.hash_bit_size());
        match row_to_ordinal.get(&row).copied() {
            None => {
                row_to_ordinal.insert(row, ordinal);
            }
            Some(owner) if query_info.tolerate_selector_collisions() => {
                warn!("Selector #{} collides with selector #{} on row {}, it won't be recoverable", ordinal, owner, row);
                shadowed_selectors.push(selector.to_string());
            }
            Some(owner) => {
                branch_opt_util::cold();
                return Err(HomoPIRError::SelectorCollision {
                    row,
                    first: selectors[owner].as_ref().to_string(),
                    second: selector.to_string(),
                });
            }
        }
    }

    Ok((row_to_ordinal, shadowed_selectors))
}

/// Splits [0, num_rows) into at most `num_workers` contiguous, non-overlapping and non-empty ranges, covering every row.
/// The last range absorbs the remainder.
pub(crate) fn split_rows_among_workers(num_rows: u64, num_workers: usize) -> Vec<Range<u64>> {
    let num_workers = (num_workers as u64).clamp(1, num_rows.max(1));
    let rows_per_worker = num_rows / num_workers;

    (0..num_workers)
        .map(|worker| {
            let start = worker * rows_per_worker;
            let end = if worker + 1 == num_workers { num_rows } else { start + rows_per_worker };

            start..end
        })
        .filter(|rows| !rows.is_empty())
        .collect()
}

/// Encrypts every row of the range, each worker using its own randomness.
fn encrypt_row_range(
    public_key: &PublicKey,
    row_to_ordinal: &HashMap<u64, usize>,
    data_partition_bit_size: u32,
    rows: Range<u64>,
) -> Result<BTreeMap<u64, Ciphertext>, HomoPIRError> {
    let mut rng = ChaCha20Rng::from_os_rng();
    let mut partial_vector = BTreeMap::new();

    debug!("Encrypting query vector rows [{}, {})", rows.start, rows.end);

    for row in rows {
        let plaintext = match row_to_ordinal.get(&row).copied() {
            Some(ordinal) => BigUint::one() << (ordinal * data_partition_bit_size as usize),
            None => BigUint::zero(),
        };

        partial_vector.insert(row, public_key.encrypt(&plaintext, &mut rng)?);
    }

    Ok(partial_vector)
}

/// Concatenates ordered partial vectors, checking that together they hold exactly one element for every row in [0, num_rows).
pub(crate) fn merge_partial_vectors(num_rows: u64, partial_vectors: Vec<BTreeMap<u64, Ciphertext>>) -> Result<Vec<Ciphertext>, HomoPIRError> {
    let mut elements = Vec::with_capacity(num_rows as usize);

    for (row, c) in partial_vectors.into_iter().flatten() {
        let expected_row = elements.len() as u64;

        if branch_opt_util::unlikely(row < expected_row || row >= num_rows) {
            return Err(HomoPIRError::DuplicateQueryVectorRow(row));
        }
        if branch_opt_util::unlikely(row > expected_row) {
            return Err(HomoPIRError::MissingQueryVectorRow(expected_row));
        }

        elements.push(c);
    }

    let num_elements = elements.len() as u64;
    if branch_opt_util::unlikely(num_elements < num_rows) {
        return Err(HomoPIRError::MissingQueryVectorRow(num_elements));
    }

    Ok(elements)
}
