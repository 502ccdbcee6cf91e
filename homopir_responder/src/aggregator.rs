use crate::evaluator::ColumnContribution;
use homopir_common::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::{Ciphertext, PublicKey},
    query::QueryVector,
    response::ResponseVector,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Snapshot of how far the current epoch is from crossing its flush barrier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BarrierStatus {
    pub epoch: u64,
    pub flushes_received: usize,
    pub total_producers: usize,
}

/// Column aggregation state machine, serializing contributions of a known number of producers into one response per epoch.
///
/// Each epoch starts out accumulating. A contribution to a column multiplies into that column's running aggregate, modulo n^2,
/// so the aggregate encrypts the sum of all contributed plaintexts. Every producer flushes exactly once per epoch, and the last
/// flush emits the response vector, empties all state and starts the next epoch.
///
/// Any invalid input aborts the current epoch, discarding its partial aggregates, so that nothing half-aggregated is ever emitted.
/// A producer contributing after its own flush, but before the epoch ended, is treated as invalid input. This is what a producer
/// running ahead into the next epoch looks like from here.
pub struct ColumnAggregator {
    public_key: PublicKey,
    query_id: u64,
    num_columns: u64,
    total_producers: usize,
    epoch: u64,
    columns: BTreeMap<u64, Ciphertext>,
    flushed: Vec<bool>,
    flushes_received: usize,
}

impl ColumnAggregator {
    pub fn new(query: &QueryVector, total_producers: usize) -> Result<ColumnAggregator, HomoPIRError> {
        if branch_opt_util::unlikely(total_producers == 0) {
            return Err(HomoPIRError::InvalidNumberOfWorkers);
        }

        Ok(ColumnAggregator {
            public_key: query.public_key().clone(),
            query_id: query.query_info().query_id(),
            num_columns: query.query_info().num_columns(),
            total_producers,
            epoch: 0,
            columns: BTreeMap::new(),
            flushed: vec![false; total_producers],
            flushes_received: 0,
        })
    }

    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub const fn total_producers(&self) -> usize {
        self.total_producers
    }

    /// Number of distinct columns touched so far in the current epoch.
    pub fn num_pending_columns(&self) -> usize {
        self.columns.len()
    }

    pub const fn status(&self) -> BarrierStatus {
        BarrierStatus {
            epoch: self.epoch,
            flushes_received: self.flushes_received,
            total_producers: self.total_producers,
        }
    }

    /// Multiplies `contribution` into its column's aggregate, or makes it the initial aggregate of an untouched column.
    pub fn contribute(&mut self, producer: usize, contribution: ColumnContribution) -> Result<(), HomoPIRError> {
        if let Err(e) = self.validate_contribution(producer, &contribution) {
            self.abort();
            return Err(e);
        }

        let ColumnContribution { column, ciphertext } = contribution;
        match self.columns.get_mut(&column) {
            Some(aggregate) => *aggregate = self.public_key.homomorphic_multiply(aggregate, &ciphertext),
            None => {
                self.columns.insert(column, ciphertext);
            }
        }

        Ok(())
    }

    /// Registers `producer`'s flush signal. Returns the aggregated response vector if this was the last flush of the epoch.
    pub fn flush(&mut self, producer: usize) -> Result<Option<ResponseVector>, HomoPIRError> {
        if let Err(e) = self.validate_producer(producer) {
            self.abort();
            return Err(e);
        }
        if branch_opt_util::unlikely(self.flushed[producer]) {
            self.abort();
            return Err(HomoPIRError::DuplicateFlushSignal { producer });
        }

        self.flushed[producer] = true;
        self.flushes_received += 1;
        debug!("Producer #{} flushed epoch {}, {}/{} flushes received", producer, self.epoch, self.flushes_received, self.total_producers);

        if self.flushes_received < self.total_producers {
            return Ok(None);
        }

        let columns = std::mem::take(&mut self.columns);
        info!("Epoch {} crossed its flush barrier, emitting {} columns", self.epoch, columns.len());

        self.start_next_epoch();
        Ok(Some(ResponseVector::from_columns(self.query_id, columns)))
    }

    /// Discards every partial aggregate and flush signal of the current epoch, returning the aborted epoch.
    pub fn abort(&mut self) -> u64 {
        let aborted = self.epoch;
        warn!("Aborting epoch {}, discarding {} partial columns", aborted, self.columns.len());

        self.columns.clear();
        self.start_next_epoch();

        aborted
    }

    fn start_next_epoch(&mut self) {
        self.flushed.iter_mut().for_each(|flushed| *flushed = false);
        self.flushes_received = 0;
        self.epoch += 1;
    }

    fn validate_producer(&self, producer: usize) -> Result<(), HomoPIRError> {
        if branch_opt_util::unlikely(producer >= self.total_producers) {
            return Err(HomoPIRError::UnknownProducer {
                producer,
                total_producers: self.total_producers,
            });
        }

        Ok(())
    }

    fn validate_contribution(&self, producer: usize, contribution: &ColumnContribution) -> Result<(), HomoPIRError> {
        self.validate_producer(producer)?;

        if branch_opt_util::unlikely(self.flushed[producer]) {
            return Err(HomoPIRError::ContributionAfterFlush { producer });
        }
        if branch_opt_util::unlikely(contribution.column >= self.num_columns) {
            return Err(HomoPIRError::ColumnIndexOutOfRange {
                column: contribution.column,
                num_columns: self.num_columns,
            });
        }
        if branch_opt_util::unlikely(!self.public_key.is_valid_ciphertext(&contribution.ciphertext)) {
            return Err(HomoPIRError::ContributionOutOfRange { column: contribution.column });
        }

        Ok(())
    }
}
