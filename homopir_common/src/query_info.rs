use crate::{
    branch_opt_util,
    error::HomoPIRError,
    params::{
        DEFAULT_MAX_HITS_PER_SELECTOR, EMBEDDED_SELECTOR_BYTE_LEN, MAX_DATA_PARTITION_BIT_SIZE, MAX_HASH_BIT_SIZE, MAX_HITS_PER_SELECTOR, MAX_RECORD_BYTE_LEN,
        MIN_DATA_PARTITION_BIT_SIZE, MIN_HASH_BIT_SIZE,
    },
    serialization::{self, ByteReader, put_bytes, put_u32, put_u64},
};

const FLAG_EMBED_SELECTOR: u8 = 1 << 0;
const FLAG_USE_EXP_LOOKUP_TABLE: u8 = 1 << 1;
const FLAG_TOLERATE_SELECTOR_COLLISIONS: u8 = 1 << 2;

/// Public parameters of a query, shared by querier and responder.
///
/// Selector `i` (its position in the query's selector list) owns bits `[i * data_partition_bit_size, (i + 1) * data_partition_bit_size)`
/// of every response column's plaintext. Each hit on a queried row spans `num_partitions_per_record()` consecutive columns,
/// and at most `max_hits_per_selector` hits are kept per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryInfo {
    query_id: u64,
    num_selectors: usize,
    hash_bit_size: u32,
    hash_key: Vec<u8>,
    data_partition_bit_size: u32,
    record_byte_len: usize,
    max_hits_per_selector: usize,
    num_workers: usize,
    embed_selector: bool,
    use_exp_lookup_table: bool,
    tolerate_selector_collisions: bool,
}

impl QueryInfo {
    /// Query parameters with selector embedding enabled, selector collisions rejected and no exponent lookup table.
    pub fn new(num_selectors: usize, hash_bit_size: u32, hash_key: &[u8], data_partition_bit_size: u32, record_byte_len: usize) -> QueryInfo {
        QueryInfo {
            query_id: 0,
            num_selectors,
            hash_bit_size,
            hash_key: hash_key.to_vec(),
            data_partition_bit_size,
            record_byte_len,
            max_hits_per_selector: DEFAULT_MAX_HITS_PER_SELECTOR,
            num_workers: 1,
            embed_selector: true,
            use_exp_lookup_table: false,
            tolerate_selector_collisions: false,
        }
    }

    pub fn with_query_id(mut self, query_id: u64) -> Self {
        self.query_id = query_id;
        self
    }

    pub fn with_max_hits_per_selector(mut self, max_hits_per_selector: usize) -> Self {
        self.max_hits_per_selector = max_hits_per_selector;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_embed_selector(mut self, embed_selector: bool) -> Self {
        self.embed_selector = embed_selector;
        self
    }

    pub fn with_exp_lookup_table(mut self, use_exp_lookup_table: bool) -> Self {
        self.use_exp_lookup_table = use_exp_lookup_table;
        self
    }

    pub fn with_selector_collisions_tolerated(mut self, tolerate_selector_collisions: bool) -> Self {
        self.tolerate_selector_collisions = tolerate_selector_collisions;
        self
    }

    pub const fn query_id(&self) -> u64 {
        self.query_id
    }

    pub const fn num_selectors(&self) -> usize {
        self.num_selectors
    }

    pub const fn hash_bit_size(&self) -> u32 {
        self.hash_bit_size
    }

    pub fn hash_key(&self) -> &[u8] {
        &self.hash_key
    }

    pub const fn data_partition_bit_size(&self) -> u32 {
        self.data_partition_bit_size
    }

    pub const fn record_byte_len(&self) -> usize {
        self.record_byte_len
    }

    pub const fn max_hits_per_selector(&self) -> usize {
        self.max_hits_per_selector
    }

    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub const fn embed_selector(&self) -> bool {
        self.embed_selector
    }

    pub const fn use_exp_lookup_table(&self) -> bool {
        self.use_exp_lookup_table
    }

    pub const fn tolerate_selector_collisions(&self) -> bool {
        self.tolerate_selector_collisions
    }

    pub const fn num_rows(&self) -> u64 {
        1u64 << self.hash_bit_size
    }

    /// Bytes placed in front of each record's payload, before partitioning.
    pub const fn prefix_byte_len(&self) -> usize {
        if self.embed_selector { EMBEDDED_SELECTOR_BYTE_LEN } else { 0 }
    }

    pub const fn num_partitions_per_record(&self) -> usize {
        serialization::num_partitions_for_record(self.prefix_byte_len(), self.record_byte_len, self.data_partition_bit_size)
    }

    /// Number of columns a response to this query may touch.
    pub const fn num_columns(&self) -> u64 {
        (self.num_partitions_per_record() as u64).saturating_mul(self.max_hits_per_selector as u64)
    }

    /// Checks the parameters make sense on their own, and that every selector slot fits below a modulus of `modulus_bit_len` bits.
    pub fn validate(&self, modulus_bit_len: u64) -> Result<(), HomoPIRError> {
        self.validate_parameters()?;

        let required_bits = self.num_selectors as u64 * self.data_partition_bit_size as u64;
        if branch_opt_util::unlikely(required_bits >= modulus_bit_len) {
            return Err(HomoPIRError::TooManySelectorsForModulus {
                required_bits,
                modulus_bits: modulus_bit_len,
            });
        }

        Ok(())
    }

    fn validate_parameters(&self) -> Result<(), HomoPIRError> {
        if branch_opt_util::unlikely(self.num_selectors == 0) {
            return Err(HomoPIRError::ZeroSelectors);
        }
        if branch_opt_util::unlikely(!(MIN_HASH_BIT_SIZE..=MAX_HASH_BIT_SIZE).contains(&self.hash_bit_size)) {
            return Err(HomoPIRError::InvalidHashBitSize(self.hash_bit_size));
        }
        if branch_opt_util::unlikely(!(MIN_DATA_PARTITION_BIT_SIZE..=MAX_DATA_PARTITION_BIT_SIZE).contains(&self.data_partition_bit_size)) {
            return Err(HomoPIRError::InvalidDataPartitionBitSize(self.data_partition_bit_size));
        }
        if branch_opt_util::unlikely(!(1..=MAX_RECORD_BYTE_LEN).contains(&self.record_byte_len)) {
            return Err(HomoPIRError::InvalidRecordByteLength(self.record_byte_len));
        }
        if branch_opt_util::unlikely(!(1..=MAX_HITS_PER_SELECTOR).contains(&self.max_hits_per_selector)) {
            return Err(HomoPIRError::InvalidMaxHitsPerSelector(self.max_hits_per_selector));
        }
        if branch_opt_util::unlikely(self.num_workers == 0) {
            return Err(HomoPIRError::InvalidNumberOfWorkers);
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<QueryInfo, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);
        let query_info = Self::read_from(&mut reader)?;
        reader.finish()?;

        Ok(query_info)
    }

    pub(crate) fn write_to(&self, bytes: &mut Vec<u8>) {
        let flags = (if self.embed_selector { FLAG_EMBED_SELECTOR } else { 0 })
            | (if self.use_exp_lookup_table { FLAG_USE_EXP_LOOKUP_TABLE } else { 0 })
            | (if self.tolerate_selector_collisions { FLAG_TOLERATE_SELECTOR_COLLISIONS } else { 0 });

        put_u64(bytes, self.query_id);
        put_u64(bytes, self.num_selectors as u64);
        put_u32(bytes, self.hash_bit_size);
        put_bytes(bytes, &self.hash_key);
        put_u32(bytes, self.data_partition_bit_size);
        put_u64(bytes, self.record_byte_len as u64);
        put_u64(bytes, self.max_hits_per_selector as u64);
        put_u64(bytes, self.num_workers as u64);
        bytes.push(flags);
    }

    pub(crate) fn read_from(reader: &mut ByteReader) -> Result<QueryInfo, HomoPIRError> {
        let query_id = reader.read_u64("query id")?;
        let num_selectors = reader.read_u64("number of selectors")? as usize;
        let hash_bit_size = reader.read_u32("hash bit size")?;
        let hash_key = reader.read_bytes("hash key")?.to_vec();
        let data_partition_bit_size = reader.read_u32("data partition bit size")?;
        let record_byte_len = reader.read_u64("record byte length")? as usize;
        let max_hits_per_selector = reader.read_u64("maximum hits per selector")? as usize;
        let num_workers = reader.read_u64("number of workers")? as usize;
        let flags = reader.read_u8("flags")?;

        let query_info = QueryInfo {
            query_id,
            num_selectors,
            hash_bit_size,
            hash_key,
            data_partition_bit_size,
            record_byte_len,
            max_hits_per_selector,
            num_workers,
            embed_selector: flags & FLAG_EMBED_SELECTOR != 0,
            use_exp_lookup_table: flags & FLAG_USE_EXP_LOOKUP_TABLE != 0,
            tolerate_selector_collisions: flags & FLAG_TOLERATE_SELECTOR_COLLISIONS != 0,
        };

        query_info.validate_parameters().map_err(|e| HomoPIRError::FailedToDeserialize(e.to_string()))?;
        Ok(query_info)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::HomoPIRError,
        params::{MAX_HITS_PER_SELECTOR, MAX_RECORD_BYTE_LEN},
        query_info::QueryInfo,
    };
    use test_case::test_case;

    const HASH_KEY: &[u8] = b"query info test key";

    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, 16), 512 => Ok(()); "Small query is valid")]
    #[test_case(QueryInfo::new(0, 4, HASH_KEY, 8, 16), 512 => Err(HomoPIRError::ZeroSelectors); "Query needs selectors")]
    #[test_case(QueryInfo::new(3, 0, HASH_KEY, 8, 16), 512 => Err(HomoPIRError::InvalidHashBitSize(0)); "Hash bit size must be non-zero")]
    #[test_case(QueryInfo::new(3, 25, HASH_KEY, 8, 16), 512 => Err(HomoPIRError::InvalidHashBitSize(25)); "Hash bit size is bounded")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 0, 16), 512 => Err(HomoPIRError::InvalidDataPartitionBitSize(0)); "Data partition bit size must be non-zero")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 33, 16), 512 => Err(HomoPIRError::InvalidDataPartitionBitSize(33)); "Data partition must fit in 32 bits")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, 0), 512 => Err(HomoPIRError::InvalidRecordByteLength(0)); "Records must have room for payload")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, MAX_RECORD_BYTE_LEN), 512 => Ok(()); "Largest record byte length")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, MAX_RECORD_BYTE_LEN + 1), 512 => Err(HomoPIRError::InvalidRecordByteLength(MAX_RECORD_BYTE_LEN + 1)); "Record byte length is bounded")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, usize::MAX / 4), 512 => Err(HomoPIRError::InvalidRecordByteLength(usize::MAX / 4)); "Huge record byte length is rejected")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, 16).with_max_hits_per_selector(0), 512 => Err(HomoPIRError::InvalidMaxHitsPerSelector(0)); "At least one hit must be kept")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, 16).with_max_hits_per_selector(MAX_HITS_PER_SELECTOR + 1), 512 => Err(HomoPIRError::InvalidMaxHitsPerSelector(MAX_HITS_PER_SELECTOR + 1)); "Maximum hits per selector is bounded")]
    #[test_case(QueryInfo::new(3, 4, HASH_KEY, 8, 16).with_num_workers(0), 512 => Err(HomoPIRError::InvalidNumberOfWorkers); "At least one worker is needed")]
    #[test_case(QueryInfo::new(64, 4, HASH_KEY, 8, 16), 512 => Err(HomoPIRError::TooManySelectorsForModulus { required_bits: 512, modulus_bits: 512 }); "Selector slots must fit below modulus")]
    #[test_case(QueryInfo::new(63, 4, HASH_KEY, 8, 16), 512 => Ok(()); "Selector slots just fitting below modulus")]
    fn query_info_validation(query_info: QueryInfo, modulus_bit_len: u64) -> Result<(), HomoPIRError> {
        query_info.validate(modulus_bit_len)
    }

    #[test]
    fn derived_dimensions() {
        let query_info = QueryInfo::new(3, 4, HASH_KEY, 8, 16).with_max_hits_per_selector(2);

        assert_eq!(query_info.num_rows(), 16);
        assert_eq!(query_info.prefix_byte_len(), 4);
        assert_eq!(query_info.num_partitions_per_record(), 4 + 16 + 1);
        assert_eq!(query_info.num_columns(), 2 * 21);

        let query_info = query_info.with_embed_selector(false);
        assert_eq!(query_info.num_partitions_per_record(), 16 + 1);
    }

    #[test]
    fn serialized_query_info_can_be_deserialized() {
        let query_info = QueryInfo::new(5, 12, HASH_KEY, 16, 64)
            .with_query_id(0xcafe)
            .with_max_hits_per_selector(3)
            .with_num_workers(4)
            .with_exp_lookup_table(true)
            .with_selector_collisions_tolerated(true);

        assert_eq!(QueryInfo::from_bytes(&query_info.to_bytes()), Ok(query_info));
    }

    #[test]
    fn deserializing_invalid_query_info_fails() {
        let bytes = QueryInfo::new(0, 4, HASH_KEY, 8, 16).to_bytes();
        assert!(matches!(QueryInfo::from_bytes(&bytes), Err(HomoPIRError::FailedToDeserialize(_))));

        let bytes = QueryInfo::new(1, 4, HASH_KEY, 8, usize::MAX / 4).to_bytes();
        assert!(matches!(QueryInfo::from_bytes(&bytes), Err(HomoPIRError::FailedToDeserialize(_))));

        let bytes = QueryInfo::new(1, 4, HASH_KEY, 8, 16).with_max_hits_per_selector(usize::MAX).to_bytes();
        assert!(matches!(QueryInfo::from_bytes(&bytes), Err(HomoPIRError::FailedToDeserialize(_))));
    }

    #[test]
    fn derived_dimensions_of_unchecked_parameters_do_not_overflow() {
        let query_info = QueryInfo::new(1, 4, HASH_KEY, 8, usize::MAX / 4).with_max_hits_per_selector(usize::MAX);

        assert!(query_info.num_partitions_per_record() > 0);
        assert!(query_info.num_columns() >= query_info.num_partitions_per_record() as u64);
    }
}
