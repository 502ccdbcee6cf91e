pub const DEFAULT_MODULUS_BIT_LEN: u64 = 3072;
pub const DEFAULT_PRIMALITY_CERTAINTY: u32 = 128;
pub const MIN_MODULUS_BIT_LEN: u64 = 128;

/// Candidates tried per prime before giving up on key generation.
pub const PRIME_SEARCH_MAX_ATTEMPT_COUNT: usize = 100_000;

pub const MIN_HASH_BIT_SIZE: u32 = 1;
pub const MAX_HASH_BIT_SIZE: u32 = 24;

pub const MIN_DATA_PARTITION_BIT_SIZE: u32 = 1;
pub const MAX_DATA_PARTITION_BIT_SIZE: u32 = 32;

pub const DEFAULT_DATA_PARTITION_BIT_SIZE: u32 = 8;
pub const DEFAULT_MAX_HITS_PER_SELECTOR: usize = 16;

pub const MAX_RECORD_BYTE_LEN: usize = 1 << 16;
pub const MAX_HITS_PER_SELECTOR: usize = 1 << 16;

pub const EMBEDDED_SELECTOR_BYTE_LEN: usize = 4;
pub const RECORD_BOUNDARY_MARK: u8 = 0x81;

pub const ROW_INDEX_DOMAIN_SEPARATOR: u8 = 0x1f;
pub const EMBEDDED_SELECTOR_DOMAIN_SEPARATOR: u8 = 0x2b;
