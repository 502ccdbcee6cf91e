use std::{error::Error, fmt::Display};

/// Coarse classification of a [`HomoPIRError`], matching the stage of the protocol which failed.
///
/// None of these are retried internally. The caller may choose to retry key generation (prime search is randomized),
/// every other kind aborts the query in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyGeneration,
    Encryption,
    Decryption,
    Configuration,
    IncompleteVector,
    Aggregation,
    Serialization,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HomoPIRError {
    // Key generation
    ExhaustedAllAttemptsToGeneratePrime(usize),
    InvalidModulusBitLength(u64),
    InvalidPrimalityCertainty(u32),
    UnsuitablePrimes,

    // Encryption
    PlaintextOutOfRange,

    // Decryption
    CiphertextOutOfRange,
    DecodedRecordNotTerminated,

    // Configuration
    InvalidHashBitSize(u32),
    InvalidDataPartitionBitSize(u32),
    ZeroSelectors,
    SelectorCountMismatch { expected: usize, found: usize },
    DuplicateSelector(String),
    SelectorCollision { row: u64, first: String, second: String },
    TooManySelectorsForModulus { required_bits: u64, modulus_bits: u64 },
    InvalidRecordByteLength(usize),
    InvalidMaxHitsPerSelector(usize),
    InvalidNumberOfWorkers,
    ThreadPoolBuildFailed(String),
    RecordTooLarge { max: usize, found: usize },
    RowNotAssignedToProducer { row: u64, producer: usize },
    QueryKeyMismatch,

    // Incomplete query vector
    MissingQueryVectorRow(u64),
    DuplicateQueryVectorRow(u64),

    // Aggregation
    ColumnIndexOutOfRange { column: u64, num_columns: u64 },
    ContributionOutOfRange { column: u64 },
    UnknownProducer { producer: usize, total_producers: usize },
    DuplicateFlushSignal { producer: usize },
    ContributionAfterFlush { producer: usize },
    EpochAborted(u64),
    AggregationSessionClosed,

    // Serialization
    FailedToDeserialize(String),
}

impl HomoPIRError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExhaustedAllAttemptsToGeneratePrime(_) | Self::InvalidModulusBitLength(_) | Self::InvalidPrimalityCertainty(_) | Self::UnsuitablePrimes => {
                ErrorKind::KeyGeneration
            }

            Self::PlaintextOutOfRange => ErrorKind::Encryption,

            Self::CiphertextOutOfRange | Self::DecodedRecordNotTerminated => ErrorKind::Decryption,

            Self::InvalidHashBitSize(_)
            | Self::InvalidDataPartitionBitSize(_)
            | Self::ZeroSelectors
            | Self::SelectorCountMismatch { .. }
            | Self::DuplicateSelector(_)
            | Self::SelectorCollision { .. }
            | Self::TooManySelectorsForModulus { .. }
            | Self::InvalidRecordByteLength(_)
            | Self::InvalidMaxHitsPerSelector(_)
            | Self::InvalidNumberOfWorkers
            | Self::ThreadPoolBuildFailed(_)
            | Self::RecordTooLarge { .. }
            | Self::RowNotAssignedToProducer { .. }
            | Self::QueryKeyMismatch => ErrorKind::Configuration,

            Self::MissingQueryVectorRow(_) | Self::DuplicateQueryVectorRow(_) => ErrorKind::IncompleteVector,

            Self::ColumnIndexOutOfRange { .. }
            | Self::ContributionOutOfRange { .. }
            | Self::UnknownProducer { .. }
            | Self::DuplicateFlushSignal { .. }
            | Self::ContributionAfterFlush { .. }
            | Self::EpochAborted(_)
            | Self::AggregationSessionClosed => ErrorKind::Aggregation,

            Self::FailedToDeserialize(_) => ErrorKind::Serialization,
        }
    }
}

impl Display for HomoPIRError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExhaustedAllAttemptsToGeneratePrime(max_num_attempts) => write!(f, "Exhausted '{}' attempts to find a probable prime", max_num_attempts),
            Self::InvalidModulusBitLength(bit_len) => write!(f, "Modulus bit length '{}' must be even and not smaller than the minimum supported", bit_len),
            Self::InvalidPrimalityCertainty(certainty) => write!(f, "Primality certainty '{}' must be non-zero", certainty),
            Self::UnsuitablePrimes => write!(f, "Primes must be distinct and satisfy gcd(pq, (p-1)(q-1)) = 1."),

            Self::PlaintextOutOfRange => write!(f, "Plaintext must be in [0, n)."),

            Self::CiphertextOutOfRange => write!(f, "Ciphertext must be a residue modulo n^2, coprime to n."),
            Self::DecodedRecordNotTerminated => write!(f, "Decoded record doesn't carry a boundary marker"),

            Self::InvalidHashBitSize(bits) => write!(f, "Hash bit size '{}' is not supported", bits),
            Self::InvalidDataPartitionBitSize(bits) => write!(f, "Data partition bit size '{}' is not supported", bits),
            Self::ZeroSelectors => write!(f, "A query needs at least one selector."),
            Self::SelectorCountMismatch { expected, found } => write!(f, "Query expects '{}' selectors, but '{}' were given", expected, found),
            Self::DuplicateSelector(selector) => write!(f, "Selector '{}' is listed more than once", selector),
            Self::SelectorCollision { row, first, second } => write!(f, "Selectors '{}' and '{}' both hash to row '{}'", first, second, row),
            Self::TooManySelectorsForModulus { required_bits, modulus_bits } => {
                write!(f, "Selector slots need '{}' bits, but the modulus only has '{}' bits", required_bits, modulus_bits)
            }
            Self::InvalidRecordByteLength(len) => write!(
                f,
                "Record byte length must be in [1, {}], found {}.",
                crate::params::MAX_RECORD_BYTE_LEN,
                len
            ),
            Self::InvalidMaxHitsPerSelector(hits) => write!(
                f,
                "Maximum hits per selector must be in [1, {}], found {}.",
                crate::params::MAX_HITS_PER_SELECTOR,
                hits
            ),
            Self::InvalidNumberOfWorkers => write!(f, "Number of workers must be non-zero."),
            Self::ThreadPoolBuildFailed(e) => write!(f, "Failed to build worker thread pool: {}", e),
            Self::RecordTooLarge { max, found } => write!(f, "Record payload of '{}' bytes exceeds the maximum of '{}' bytes", found, max),
            Self::RowNotAssignedToProducer { row, producer } => write!(f, "Row '{}' is not evaluated by producer '{}'", row, producer),
            Self::QueryKeyMismatch => write!(f, "Response was produced for a different public key or query."),

            Self::MissingQueryVectorRow(row) => write!(f, "Query vector has no entry for row '{}'", row),
            Self::DuplicateQueryVectorRow(row) => write!(f, "Query vector has more than one entry for row '{}'", row),

            Self::ColumnIndexOutOfRange { column, num_columns } => write!(f, "Column index '{}' is out of range, there are '{}' columns", column, num_columns),
            Self::ContributionOutOfRange { column } => write!(f, "Contribution for column '{}' is not a residue modulo n^2 coprime to n", column),
            Self::UnknownProducer { producer, total_producers } => write!(f, "Producer '{}' is unknown, there are '{}' producers", producer, total_producers),
            Self::DuplicateFlushSignal { producer } => write!(f, "Producer '{}' flushed twice in the same epoch", producer),
            Self::ContributionAfterFlush { producer } => write!(f, "Producer '{}' contributed after flushing, before the epoch ended", producer),
            Self::EpochAborted(epoch) => write!(f, "Aggregation epoch '{}' was aborted", epoch),
            Self::AggregationSessionClosed => write!(f, "Aggregation session is no longer running."),

            Self::FailedToDeserialize(e) => write!(f, "Deserialization failed with: {}", e),
        }
    }
}

impl Error for HomoPIRError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
