use crate::{
    error::HomoPIRError,
    params::{EMBEDDED_SELECTOR_BYTE_LEN, EMBEDDED_SELECTOR_DOMAIN_SEPARATOR, ROW_INDEX_DOMAIN_SEPARATOR},
};
use turboshake::TurboShake128;

/// Maps a selector to its row of the query vector, by hashing it with a keyed TurboSHAKE128 and keeping the lowest
/// `hash_bit_size` bits of the digest. The same selector and key always land on the same row, while distinct selectors
/// may collide on one.
pub fn row_index_of(selector: &str, hash_key: &[u8], hash_bit_size: u32) -> u64 {
    let mut hasher = TurboShake128::default();
    hasher.absorb(&(hash_key.len() as u32).to_le_bytes());
    hasher.absorb(hash_key);
    hasher.absorb(selector.as_bytes());
    hasher.finalize::<{ ROW_INDEX_DOMAIN_SEPARATOR }>();

    let mut digest = [0u8; 8];
    hasher.squeeze(&mut digest);

    u64::from_le_bytes(digest) & ((1u64 << hash_bit_size) - 1)
}

/// Short tag derived from a selector, which the responder places in front of every record it encodes for that selector.
///
/// The tag rides inside the encrypted columns, so only the key holder sees it. After decryption it tells apart genuine
/// hits from records of other selectors hashing onto the same row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EmbeddedSelector(u32);

impl EmbeddedSelector {
    pub fn embed(selector: &str) -> EmbeddedSelector {
        let mut hasher = TurboShake128::default();
        hasher.absorb(selector.as_bytes());
        hasher.finalize::<{ EMBEDDED_SELECTOR_DOMAIN_SEPARATOR }>();

        let mut digest = [0u8; EMBEDDED_SELECTOR_BYTE_LEN];
        hasher.squeeze(&mut digest);

        EmbeddedSelector(u32::from_le_bytes(digest))
    }

    pub const fn to_le_bytes(self) -> [u8; EMBEDDED_SELECTOR_BYTE_LEN] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<EmbeddedSelector, HomoPIRError> {
        let tag: [u8; EMBEDDED_SELECTOR_BYTE_LEN] = bytes
            .try_into()
            .map_err(|_| HomoPIRError::FailedToDeserialize(format!("embedded selector must be {} bytes", EMBEDDED_SELECTOR_BYTE_LEN)))?;

        Ok(EmbeddedSelector(u32::from_le_bytes(tag)))
    }
}
