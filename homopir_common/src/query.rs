use crate::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::{Ciphertext, PublicKey},
    query_info::QueryInfo,
    serialization::{ByteReader, put_biguint, put_u64},
};

/// Encrypted query vector, holding exactly one ciphertext per row in [0, 2^hash_bit_size).
///
/// Rows where a queried selector lands encrypt 2^(selector_ordinal * data_partition_bit_size), every other row encrypts 0.
/// It is built once by the querier and then only read, by every responder-side evaluation worker.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryVector {
    query_info: QueryInfo,
    public_key: PublicKey,
    elements: Vec<Ciphertext>,
}

impl QueryVector {
    /// Fails with an incomplete vector error unless there is one element for every row of the query.
    pub fn new(query_info: QueryInfo, public_key: PublicKey, elements: Vec<Ciphertext>) -> Result<QueryVector, HomoPIRError> {
        let num_rows = query_info.num_rows();
        let num_elements = elements.len() as u64;

        if branch_opt_util::unlikely(num_elements < num_rows) {
            return Err(HomoPIRError::MissingQueryVectorRow(num_elements));
        }
        if branch_opt_util::unlikely(num_elements > num_rows) {
            return Err(HomoPIRError::DuplicateQueryVectorRow(num_rows));
        }

        Ok(QueryVector {
            query_info,
            public_key,
            elements,
        })
    }

    pub fn query_info(&self) -> &QueryInfo {
        &self.query_info
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn element(&self, row: u64) -> Option<&Ciphertext> {
        self.elements.get(row as usize)
    }

    pub fn elements(&self) -> &[Ciphertext] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        self.query_info.write_to(&mut bytes);
        bytes.extend_from_slice(&self.public_key.to_bytes());
        put_u64(&mut bytes, self.elements.len() as u64);
        self.elements.iter().for_each(|c| put_biguint(&mut bytes, c.as_biguint()));

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<QueryVector, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);

        let query_info = QueryInfo::read_from(&mut reader)?;
        let public_key = PublicKey::read_from(&mut reader)?;
        query_info
            .validate(public_key.bit_len())
            .map_err(|e| HomoPIRError::FailedToDeserialize(e.to_string()))?;

        let num_elements = reader.read_u64("number of query vector elements")?;
        if branch_opt_util::unlikely(num_elements != query_info.num_rows()) {
            return Err(HomoPIRError::FailedToDeserialize(format!(
                "query vector must have {} elements, found {}",
                query_info.num_rows(),
                num_elements
            )));
        }

        let mut elements = Vec::with_capacity(num_elements as usize);
        for _ in 0..num_elements {
            let c = Ciphertext::from_biguint(reader.read_biguint("query vector element")?);
            if branch_opt_util::unlikely(!public_key.is_valid_ciphertext(&c)) {
                return Err(HomoPIRError::FailedToDeserialize("query vector element is not a residue modulo n^2".to_string()));
            }

            elements.push(c);
        }
        reader.finish()?;

        QueryVector::new(query_info, public_key, elements)
    }
}
