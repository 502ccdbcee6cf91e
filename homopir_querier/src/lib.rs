//! HomoPIR: A Rust library implementation of a **P**rivate **I**nformation **R**etrieval (PIR) protocol, built on Paillier's
//! additively homomorphic cryptosystem.
//!
//! This crate provides the querier side of HomoPIR. A querier picks a set of private selectors, builds an encrypted query vector
//! from them and later decrypts the responder's aggregated response, recovering every record matching one of its selectors.
//! The responder learns neither the selectors nor which of its records matched.
//!
//! ## Features
//!
//! * **Private selector queries:** One Paillier ciphertext per hash bucket (row), encrypting 2^(ordinal * partition bit size) for
//!   rows holding a queried selector and zero everywhere else.
//! * **Parallel encryption and decryption:** Query vector rows and response columns are processed by a pool of worker threads.
//! * **False positive elimination:** Records carry an embedded selector tag, which exposes records of other selectors hashing onto a
//!   queried row.
//!
//! ## Usage
//!
//! ```rust
//! use homopir_querier::{KeyPair, Querier, QueryInfo};
//!
//! use rand::prelude::*;
//! use rand_chacha::ChaCha20Rng;
//!
//! fn main() {
//!     let mut rng = ChaCha20Rng::from_os_rng();
//!     let key_pair = KeyPair::generate(512, 64, &mut rng).expect("Key generation failed");
//!
//!     let selectors = ["alice@example.com", "bob@example.com"];
//!     let query_info = QueryInfo::new(selectors.len(), 8, b"hash key", 8, 32)
//!         .with_num_workers(4)
//!         .with_selector_collisions_tolerated(true);
//!
//!     let (query, querier) = Querier::encrypt_query(query_info, &selectors, key_pair).expect("Query encryption failed");
//!
//!     // Send `query.to_bytes()` to the responder and keep `querier` private.
//!     // Once the response arrives:
//!     //
//!     // let results = querier.decrypt_response(&response).expect("Decryption failed");
//!     // for payload in results.payloads("alice@example.com") { ... }
//!     println!("Query vector has {} rows", query.len());
//! }
//! ```

mod decrypt;
mod encrypt;
mod querier;

pub use decrypt::QueryResults;
pub use homopir_common::{
    error::{ErrorKind, HomoPIRError},
    paillier::KeyPair,
    query::QueryVector,
    query_info::QueryInfo,
    response::ResponseVector,
};
pub use querier::{EmbeddingMap, Querier};
