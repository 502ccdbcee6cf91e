use crate::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::Ciphertext,
    serialization::{ByteReader, put_biguint, put_u64},
};
use std::collections::BTreeMap;

/// Aggregated response of one epoch: column index → product of every contribution made to that column, modulo n^2.
///
/// Columns nobody contributed to are absent, they decrypt to zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseVector {
    query_id: u64,
    columns: BTreeMap<u64, Ciphertext>,
}

impl ResponseVector {
    pub fn new(query_id: u64) -> ResponseVector {
        ResponseVector {
            query_id,
            columns: BTreeMap::new(),
        }
    }

    pub fn from_columns(query_id: u64, columns: BTreeMap<u64, Ciphertext>) -> ResponseVector {
        ResponseVector { query_id, columns }
    }

    pub const fn query_id(&self) -> u64 {
        self.query_id
    }

    /// Returns the previous value of the column, if it was already set.
    pub fn insert(&mut self, column: u64, c: Ciphertext) -> Option<Ciphertext> {
        self.columns.insert(column, c)
    }

    pub fn column(&self, column: u64) -> Option<&Ciphertext> {
        self.columns.get(&column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (u64, &Ciphertext)> {
        self.columns.iter().map(|(&column, c)| (column, c))
    }

    pub fn into_columns(self) -> BTreeMap<u64, Ciphertext> {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_u64(&mut bytes, self.query_id);
        put_u64(&mut bytes, self.columns.len() as u64);
        for (&column, c) in self.columns.iter() {
            put_u64(&mut bytes, column);
            put_biguint(&mut bytes, c.as_biguint());
        }

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ResponseVector, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);

        let query_id = reader.read_u64("query id")?;
        let num_columns = reader.read_u64("number of columns")?;

        let mut columns = BTreeMap::new();
        for _ in 0..num_columns {
            let column = reader.read_u64("column index")?;
            let c = Ciphertext::from_biguint(reader.read_biguint("column value")?);

            if branch_opt_util::unlikely(columns.insert(column, c).is_some()) {
                return Err(HomoPIRError::FailedToDeserialize(format!("column {} is listed more than once", column)));
            }
        }
        reader.finish()?;

        Ok(ResponseVector { query_id, columns })
    }
}
