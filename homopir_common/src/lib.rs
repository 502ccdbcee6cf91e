pub mod branch_opt_util;
pub mod error;
pub mod number_theory;
pub mod paillier;
pub mod params;
pub mod query;
pub mod query_info;
pub mod response;
pub mod selector;
pub mod serialization;
pub mod utils;

pub use error::{ErrorKind, HomoPIRError};
