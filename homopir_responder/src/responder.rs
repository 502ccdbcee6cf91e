use crate::{
    aggregator::ColumnAggregator,
    evaluator::{ColumnContribution, RowEvaluator, producer_for_row},
};
use homopir_common::{branch_opt_util, error::HomoPIRError, query::QueryVector, response::ResponseVector, selector::row_index_of};
use log::info;
use rayon::prelude::*;
use std::sync::Arc;

/// Answers an encrypted query over a set of `(selector, payload)` records, within a single process.
///
/// The responder never learns which selectors were queried. Every record is evaluated the same way, whether its row was
/// queried or not, and all it ever holds are ciphertexts under the querier's public key.
#[derive(Clone)]
pub struct Responder {
    query: Arc<QueryVector>,
}

impl Responder {
    /// Accepts a query vector, after making sure its parameters are usable with the public key it came with.
    pub fn new(query: QueryVector) -> Result<Responder, HomoPIRError> {
        query.query_info().validate(query.public_key().bit_len())?;
        Ok(Responder { query: Arc::new(query) })
    }

    /// Deserializes a query vector, as sent by a querier, and sets up a responder for it.
    pub fn from_query_bytes(query_bytes: &[u8]) -> Result<Responder, HomoPIRError> {
        Self::new(QueryVector::from_bytes(query_bytes)?)
    }

    pub fn query(&self) -> &QueryVector {
        &self.query
    }

    /// Shared handle to the query vector, for setting up row evaluators of an aggregation session.
    pub fn shared_query(&self) -> Arc<QueryVector> {
        self.query.clone()
    }

    /// Evaluates all `records` and aggregates them into one response vector.
    ///
    /// Records are split among `num_producers` producers by the row their selector hashes to, keeping their relative order,
    /// so that the k-th record landing on a row becomes that row's k-th hit. Producers evaluate in parallel, each on its own
    /// worker thread, then every producer's contributions are fed into a column aggregator, followed by its flush signal.
    ///
    /// # Arguments
    ///
    /// * `records` - Selector and payload pairs. Payloads must not be longer than the query's record byte length.
    /// * `num_producers` - Number of parallel producers, must be non-zero.
    ///
    /// # Returns
    ///
    /// The aggregated response vector, to be sent back to the querier.
    pub fn respond<S, P>(&self, records: &[(S, P)], num_producers: usize) -> Result<ResponseVector, HomoPIRError>
    where
        S: AsRef<str> + Sync,
        P: AsRef<[u8]> + Sync,
    {
        if branch_opt_util::unlikely(num_producers == 0) {
            return Err(HomoPIRError::InvalidNumberOfWorkers);
        }

        let query_info = self.query.query_info();

        let mut assigned_records = vec![Vec::new(); num_producers];
        for (idx, (selector, _)) in records.iter().enumerate() {
            let row = row_index_of(selector.as_ref(), query_info.hash_key(), query_info.hash_bit_size());
            assigned_records[producer_for_row(row, num_producers)].push(idx);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_producers)
            .build()
            .map_err(|e| HomoPIRError::ThreadPoolBuildFailed(e.to_string()))?;

        let contributions_per_producer = pool.install(|| {
            assigned_records
                .par_iter()
                .enumerate()
                .map(|(producer, indices)| self.evaluate_records(producer, num_producers, records, indices))
                .collect::<Result<Vec<_>, HomoPIRError>>()
        })?;

        let mut aggregator = ColumnAggregator::new(&self.query, num_producers)?;
        let mut response = None;

        for (producer, contributions) in contributions_per_producer.into_iter().enumerate() {
            for contribution in contributions {
                aggregator.contribute(producer, contribution)?;
            }
            response = aggregator.flush(producer)?;
        }

        let response = response.ok_or(HomoPIRError::AggregationSessionClosed)?;
        info!(
            "Responded to query {}, evaluating {} records with {} producers into {} columns",
            query_info.query_id(),
            records.len(),
            num_producers,
            response.len()
        );

        Ok(response)
    }

    fn evaluate_records<S, P>(&self, producer: usize, num_producers: usize, records: &[(S, P)], indices: &[usize]) -> Result<Vec<ColumnContribution>, HomoPIRError>
    where
        S: AsRef<str>,
        P: AsRef<[u8]>,
    {
        let mut evaluator = RowEvaluator::new(self.query.clone(), producer, num_producers)?;
        let mut contributions = Vec::new();

        for &idx in indices {
            let (selector, payload) = &records[idx];
            contributions.extend(evaluator.evaluate(selector.as_ref(), payload.as_ref())?);
        }

        Ok(contributions)
    }
}
