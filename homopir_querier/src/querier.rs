use homopir_common::{
    branch_opt_util,
    error::HomoPIRError,
    paillier::KeyPair,
    query_info::QueryInfo,
    selector::EmbeddedSelector,
    serialization::{ByteReader, put_bytes, put_u64},
};
use std::collections::BTreeMap;

/// Selector ordinal → tag the responder embeds in front of each record of that selector.
///
/// It stays with the querier, the responder never sees which tags are expected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddingMap(BTreeMap<usize, EmbeddedSelector>);

impl EmbeddingMap {
    pub fn from_selectors<S: AsRef<str>>(selectors: &[S]) -> EmbeddingMap {
        EmbeddingMap(
            selectors
                .iter()
                .enumerate()
                .map(|(ordinal, selector)| (ordinal, EmbeddedSelector::embed(selector.as_ref())))
                .collect(),
        )
    }

    pub fn get(&self, ordinal: usize) -> Option<EmbeddedSelector> {
        self.0.get(&ordinal).copied()
    }

    pub fn insert(&mut self, ordinal: usize, tag: EmbeddedSelector) -> Option<EmbeddedSelector> {
        self.0.insert(ordinal, tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Private state of the querier: everything needed to turn a response back into matching records.
///
/// Created alongside the query vector by [`Querier::encrypt_query`], it is never sent to the responder.
#[derive(Clone, Debug, PartialEq)]
pub struct Querier {
    pub(crate) key_pair: KeyPair,
    pub(crate) query_info: QueryInfo,
    pub(crate) selectors: Vec<String>,
    pub(crate) embedding_map: EmbeddingMap,
    pub(crate) shadowed_selectors: Vec<String>,
}

impl Querier {
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn query_info(&self) -> &QueryInfo {
        &self.query_info
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn embedding_map(&self) -> &EmbeddingMap {
        &self.embedding_map
    }

    /// Lets tests tamper with expected tags, to force false positives.
    #[cfg(feature = "mutate_internal_querier_state")]
    pub fn embedding_map_mut(&mut self) -> &mut EmbeddingMap {
        &mut self.embedding_map
    }

    /// Selectors which landed on a row already owned by an earlier selector of the same query.
    /// Their records can't be recovered, they only ever show up as false positives of the row's owner.
    pub fn shadowed_selectors(&self) -> &[String] {
        &self.shadowed_selectors
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_bytes(&mut bytes, &self.key_pair.to_bytes());
        put_bytes(&mut bytes, &self.query_info.to_bytes());

        put_u64(&mut bytes, self.selectors.len() as u64);
        self.selectors.iter().for_each(|selector| put_bytes(&mut bytes, selector.as_bytes()));

        put_u64(&mut bytes, self.embedding_map.len() as u64);
        for (&ordinal, tag) in self.embedding_map.0.iter() {
            put_u64(&mut bytes, ordinal as u64);
            put_bytes(&mut bytes, &tag.to_le_bytes());
        }

        put_u64(&mut bytes, self.shadowed_selectors.len() as u64);
        self.shadowed_selectors.iter().for_each(|selector| put_bytes(&mut bytes, selector.as_bytes()));

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Querier, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);

        let key_pair = KeyPair::from_bytes(reader.read_bytes("key pair")?)?;
        let query_info = QueryInfo::from_bytes(reader.read_bytes("query info")?)?;

        let selectors = Self::read_selectors(&mut reader)?;
        if branch_opt_util::unlikely(selectors.len() != query_info.num_selectors()) {
            return Err(HomoPIRError::FailedToDeserialize("selector count doesn't match query info".to_string()));
        }

        let mut embedding_map = EmbeddingMap::default();
        let num_tags = reader.read_u64("number of embedded selectors")?;
        for _ in 0..num_tags {
            let ordinal = reader.read_u64("selector ordinal")? as usize;
            let tag = EmbeddedSelector::from_le_bytes(reader.read_bytes("embedded selector")?)?;

            embedding_map.insert(ordinal, tag);
        }

        let shadowed_selectors = Self::read_selectors(&mut reader)?;
        reader.finish()?;

        Ok(Querier {
            key_pair,
            query_info,
            selectors,
            embedding_map,
            shadowed_selectors,
        })
    }

    fn read_selectors(reader: &mut ByteReader) -> Result<Vec<String>, HomoPIRError> {
        let num_selectors = reader.read_u64("number of selectors")?;

        (0..num_selectors)
            .map(|_| {
                let selector = reader.read_bytes("selector")?;
                String::from_utf8(selector.to_vec()).map_err(|e| HomoPIRError::FailedToDeserialize(e.to_string()))
            })
            .collect()
    }
}
