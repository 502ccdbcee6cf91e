//! HomoPIR: A Rust library implementation of a **P**rivate **I**nformation **R**etrieval (PIR) protocol, built on Paillier's
//! additively homomorphic cryptosystem.
//!
//! This crate provides the responder side of HomoPIR. A responder holds `(selector, payload)` records and answers a querier's
//! encrypted query vector with an encrypted response vector, which carries every record matching one of the querier's private
//! selectors. The responder learns neither the selectors nor which of its records matched.
//!
//! ## Features
//!
//! * **Producer side evaluation:** [`RowEvaluator`] turns records into encrypted column contributions, by raising the query vector
//!   element of the record's row to the record's data partitions.
//! * **Barrier synchronized aggregation:** [`ColumnAggregator`] multiplies contributions of many producers into one aggregate per
//!   column and emits them only once every producer flushed. [`AggregationSession`] runs it as a tokio task, for producers living
//!   on other tasks or threads.
//! * **Standalone responder:** [`Responder`] evaluates all records in parallel and aggregates them, within a single process.
//!
//! ## Usage
//!
//! ```rust
//! use homopir_responder::Responder;
//!
//! fn respond(query_bytes: &[u8], records: &[(String, Vec<u8>)]) -> Vec<u8> {
//!     // Query bytes are received from the querier.
//!     let responder = Responder::from_query_bytes(query_bytes).expect("Malformed query");
//!
//!     // Records are split among 4 parallel producers.
//!     let response = responder.respond(records, 4).expect("Failed to respond");
//!
//!     // Send the response back to the querier.
//!     response.to_bytes()
//! }
//! ```
//!
//! When producers run on separate tasks, spawn an [`AggregationSession`] instead. Each producer evaluates the rows assigned to
//! it by [`producer_for_row`], contributes through its [`ProducerHandle`] and calls [`ProducerHandle::flush_and_wait_ack`]
//! before starting on the next epoch. The consumer collects every epoch's response through [`ResponseCollector::next_response`].

mod aggregator;
mod evaluator;
mod responder;
mod session;

pub use aggregator::{BarrierStatus, ColumnAggregator};
pub use evaluator::{ColumnContribution, RowEvaluator, producer_for_row};
pub use homopir_common::{
    error::{ErrorKind, HomoPIRError},
    query::QueryVector,
    response::ResponseVector,
};
pub use responder::Responder;
pub use session::{AggregationSession, ColumnMessage, DEFAULT_CHANNEL_CAPACITY, ProducerHandle, ResponseCollector, SessionEvent, SessionHandle};
