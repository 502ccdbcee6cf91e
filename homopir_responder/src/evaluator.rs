use homopir_common::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::Ciphertext,
    query::QueryVector,
    selector::{EmbeddedSelector, row_index_of},
    serialization::encode_record_as_partitions,
};
use log::{debug, warn};
use num_bigint::BigUint;
use std::{collections::HashMap, sync::Arc};

/// One producer's encrypted share of a response column, to be multiplied into the column's aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnContribution {
    pub column: u64,
    pub ciphertext: Ciphertext,
}

/// Producer responsible for evaluating every record hashing to `row`.
pub const fn producer_for_row(row: u64, total_producers: usize) -> usize {
    (row % total_producers as u64) as usize
}

/// Turns records into column contributions, for the rows assigned to a single producer.
///
/// A record of selector s with payload p, landing on row r as the h-th hit of that row, is encoded into partitions
/// v_0, .., v_{P-1} and contributes q\[r\]^{v_j} to column h * P + j. When r is queried by the selector with ordinal i,
/// q\[r\] encrypts 2^(i * d) and the contribution encrypts v_j shifted into selector i's slot, otherwise it encrypts zero.
pub struct RowEvaluator {
    query: Arc<QueryVector>,
    producer: usize,
    total_producers: usize,
    hits_per_row: HashMap<u64, usize>,
    exp_lookup_table: HashMap<(u64, u32), Ciphertext>,
    num_dropped_records: usize,
}

impl RowEvaluator {
    pub fn new(query: Arc<QueryVector>, producer: usize, total_producers: usize) -> Result<RowEvaluator, HomoPIRError> {
        if branch_opt_util::unlikely(total_producers == 0) {
            return Err(HomoPIRError::InvalidNumberOfWorkers);
        }
        if branch_opt_util::unlikely(producer >= total_producers) {
            return Err(HomoPIRError::UnknownProducer { producer, total_producers });
        }

        Ok(RowEvaluator {
            query,
            producer,
            total_producers,
            hits_per_row: HashMap::new(),
            exp_lookup_table: HashMap::new(),
            num_dropped_records: 0,
        })
    }

    pub const fn producer(&self) -> usize {
        self.producer
    }

    pub fn row_of(&self, selector: &str) -> u64 {
        let query_info = self.query.query_info();
        row_index_of(selector, query_info.hash_key(), query_info.hash_bit_size())
    }

    pub const fn owns_row(&self, row: u64) -> bool {
        producer_for_row(row, self.total_producers) == self.producer
    }

    /// Records which didn't make it into the response, because their row already had the maximum number of hits.
    pub const fn num_dropped_records(&self) -> usize {
        self.num_dropped_records
    }

    /// Evaluates one record against the query vector.
    ///
    /// Returns no contributions if the record's row is already full. Zero valued partitions are skipped, they'd only
    /// contribute encryptions of zero. Fails if the payload is too long or if the record's row belongs to another producer.
    pub fn evaluate(&mut self, selector: &str, payload: &[u8]) -> Result<Vec<ColumnContribution>, HomoPIRError> {
        let query_info = self.query.query_info();

        if branch_opt_util::unlikely(payload.len() > query_info.record_byte_len()) {
            return Err(HomoPIRError::RecordTooLarge {
                max: query_info.record_byte_len(),
                found: payload.len(),
            });
        }

        let row = self.row_of(selector);
        if branch_opt_util::unlikely(!self.owns_row(row)) {
            return Err(HomoPIRError::RowNotAssignedToProducer { row, producer: self.producer });
        }

        let num_hits = self.hits_per_row.entry(row).or_default();
        if *num_hits >= query_info.max_hits_per_selector() {
            warn!(
                "Row {} already holds {} hits, dropping record, producer #{}",
                row,
                query_info.max_hits_per_selector(),
                self.producer
            );

            self.num_dropped_records += 1;
            return Ok(Vec::new());
        }

        let hit = *num_hits;
        *num_hits += 1;

        let prefix = if query_info.embed_selector() {
            EmbeddedSelector::embed(selector).to_le_bytes().to_vec()
        } else {
            Vec::new()
        };

        let num_partitions = query_info.num_partitions_per_record();
        let partitions = encode_record_as_partitions(&prefix, payload, query_info.data_partition_bit_size(), num_partitions);

        let first_column = (hit * num_partitions) as u64;
        let contributions = partitions
            .into_iter()
            .enumerate()
            .filter(|&(_, partition)| partition != 0)
            .map(|(j, partition)| self.exponentiate(row, partition).map(|ciphertext| ColumnContribution {
                column: first_column + j as u64,
                ciphertext,
            }))
            .collect::<Result<Vec<_>, HomoPIRError>>()?;

        debug!("Producer #{} evaluated hit #{} of row {} into {} contributions", self.producer, hit, row, contributions.len());
        Ok(contributions)
    }

    fn exponentiate(&mut self, row: u64, exponent: u32) -> Result<Ciphertext, HomoPIRError> {
        let q_row = self.query.element(row).ok_or(HomoPIRError::MissingQueryVectorRow(row))?;
        let public_key = self.query.public_key();

        if !self.query.query_info().use_exp_lookup_table() {
            return Ok(public_key.homomorphic_exponentiate(q_row, &BigUint::from(exponent)));
        }

        let c = self
            .exp_lookup_table
            .entry((row, exponent))
            .or_insert_with(|| public_key.homomorphic_exponentiate(q_row, &BigUint::from(exponent)));

        Ok(c.clone())
    }
}
