use crate::{branch_opt_util, error::HomoPIRError, params::RECORD_BOUNDARY_MARK};
use num_bigint::BigUint;
use std::cmp::min;

/// Appends a little-endian `u32` to the byte buffer.
#[inline(always)]
pub fn put_u32(bytes: &mut Vec<u8>, v: u32) {
    bytes.extend_from_slice(&v.to_le_bytes());
}

/// Appends a little-endian `u64` to the byte buffer.
#[inline(always)]
pub fn put_u64(bytes: &mut Vec<u8>, v: u64) {
    bytes.extend_from_slice(&v.to_le_bytes());
}

/// Appends a length-prefixed byte string to the byte buffer.
#[inline(always)]
pub fn put_bytes(bytes: &mut Vec<u8>, v: &[u8]) {
    put_u32(bytes, v.len() as u32);
    bytes.extend_from_slice(v);
}

/// Appends a length-prefixed, little-endian encoded arbitrary precision unsigned integer to the byte buffer.
#[inline(always)]
pub fn put_biguint(bytes: &mut Vec<u8>, v: &BigUint) {
    put_bytes(bytes, &v.to_bytes_le());
}

/// Cursor over a byte slice, consuming values in the order they were written by the `put_*` functions.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, offset: 0 }
    }

    fn take(&mut self, num_bytes: usize, what: &str) -> Result<&'a [u8], HomoPIRError> {
        let till = self.offset.checked_add(num_bytes);
        match till {
            Some(till) if till <= self.bytes.len() => {
                let taken = &self.bytes[self.offset..till];
                self.offset = till;
                Ok(taken)
            }
            _ => {
                branch_opt_util::cold();
                Err(HomoPIRError::FailedToDeserialize(format!("not enough bytes to read {}", what)))
            }
        }
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8, HomoPIRError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32, HomoPIRError> {
        let taken = self.take(4, what)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(taken);
        Ok(u32::from_le_bytes(word))
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64, HomoPIRError> {
        let taken = self.take(8, what)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(taken);
        Ok(u64::from_le_bytes(word))
    }

    pub fn read_bytes(&mut self, what: &str) -> Result<&'a [u8], HomoPIRError> {
        let len = self.read_u32(what)? as usize;
        self.take(len, what)
    }

    pub fn read_biguint(&mut self, what: &str) -> Result<BigUint, HomoPIRError> {
        Ok(BigUint::from_bytes_le(self.read_bytes(what)?))
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> Result<(), HomoPIRError> {
        if branch_opt_util::likely(self.offset == self.bytes.len()) {
            Ok(())
        } else {
            Err(HomoPIRError::FailedToDeserialize(format!("{} trailing bytes", self.bytes.len() - self.offset)))
        }
    }
}

/// Number of `partition_bit_len` -bit partitions needed to hold a record of at most `record_byte_len` payload bytes,
/// preceded by `prefix_byte_len` bytes and followed by the one byte boundary marker.
#[inline]
pub const fn num_partitions_for_record(prefix_byte_len: usize, record_byte_len: usize, partition_bit_len: u32) -> usize {
    prefix_byte_len
        .saturating_add(record_byte_len)
        .saturating_add(1)
        .saturating_mul(8)
        .div_ceil(partition_bit_len as usize)
}

/// Encodes a record into `num_partitions` partitions of `partition_bit_len` bits each.
///
/// Both `prefix` (the embedded selector tag, possibly empty) and `payload` bytes are packed as a little-endian bit stream,
/// followed by a boundary marker which denotes the end of valid bytes. Remaining partitions, if any, are zero.
/// The caller must make sure `num_partitions` is large enough, see [`num_partitions_for_record`].
pub fn encode_record_as_partitions(prefix: &[u8], payload: &[u8], partition_bit_len: u32, num_partitions: usize) -> Vec<u32> {
    let partition_bit_len = partition_bit_len as usize;
    let partition_mask = (1u64 << partition_bit_len) - 1;

    let mut partitions = vec![0u32; num_partitions];
    let mut partition_offset = 0;

    let mut buffer = 0u64;
    let mut buf_num_bits = 0usize;

    let boundary_mark = [RECORD_BOUNDARY_MARK];

    for bytes in [prefix, payload, &boundary_mark[..]] {
        let mut byte_offset = 0;

        while byte_offset < bytes.len() {
            let remaining_num_bytes = bytes.len() - byte_offset;

            let unset_num_bits = 64 - buf_num_bits;
            let fillable_num_bits = unset_num_bits & 8usize.wrapping_neg();
            let fillable_num_bytes = min(fillable_num_bits / 8, remaining_num_bytes);
            let read_num_bits = fillable_num_bytes * 8;

            let till_byte_idx = byte_offset + fillable_num_bytes;
            let read_word = u64_from_le_bytes(&bytes[byte_offset..till_byte_idx]);
            byte_offset = till_byte_idx;

            buffer |= read_word << buf_num_bits;
            buf_num_bits += read_num_bits;

            while buf_num_bits >= partition_bit_len {
                partitions[partition_offset] = (buffer & partition_mask) as u32;
                partition_offset += 1;

                buffer >>= partition_bit_len;
                buf_num_bits -= partition_bit_len;
            }
        }
    }

    if buf_num_bits > 0 {
        partitions[partition_offset] = (buffer & partition_mask) as u32;
    }

    partitions
}

/// Decodes a record from its partitions, returning all bytes preceding the boundary marker.
///
/// Fails if the last non-zero byte of the bit stream is not the boundary marker.
pub fn decode_record_from_partitions(partitions: &[u32], partition_bit_len: u32) -> Result<Vec<u8>, HomoPIRError> {
    let partition_bit_len = partition_bit_len as usize;
    let partition_mask = ((1u64 << partition_bit_len) - 1) as u32;

    let num_extractable_bits = (partitions.len() * partition_bit_len) & 8usize.wrapping_neg();
    let num_extractable_bytes = num_extractable_bits / 8;

    let mut record = vec![0u8; num_extractable_bytes];

    let mut buffer = 0u64;
    let mut buf_num_bits = 0;
    let mut byte_offset = 0;

    for &partition in partitions {
        let remaining_num_bits = num_extractable_bits - (byte_offset * 8 + buf_num_bits);

        buffer |= ((partition & partition_mask) as u64) << buf_num_bits;
        buf_num_bits += min(partition_bit_len, remaining_num_bits);

        let decodable_num_bits = buf_num_bits & 8usize.wrapping_neg();
        let decodable_num_bytes = decodable_num_bits / 8;

        u64_to_le_bytes(buffer, &mut record[byte_offset..(byte_offset + decodable_num_bytes)]);

        buffer >>= decodable_num_bits;
        buf_num_bits -= decodable_num_bits;
        byte_offset += decodable_num_bytes;
    }

    match record.iter().rposition(|&byte| byte != 0) {
        Some(boundary_idx) if record[boundary_idx] == RECORD_BOUNDARY_MARK => {
            record.truncate(boundary_idx);
            Ok(record)
        }
        _ => {
            branch_opt_util::cold();
            Err(HomoPIRError::DecodedRecordNotTerminated)
        }
    }
}

/// Converts a slice of bytes into a u64 in little-endian byte order, reading at most 8 bytes.
#[inline(always)]
pub fn u64_from_le_bytes(bytes: &[u8]) -> u64 {
    let mut word = 0;
    let readable_num_bytes = min(bytes.len(), std::mem::size_of::<u64>());

    for (idx, &byte) in bytes.iter().enumerate().take(readable_num_bytes) {
        word |= (byte as u64) << (idx * 8);
    }

    word
}

/// Writes a u64 into a slice of bytes in little-endian byte order, writing at most 8 bytes.
#[inline(always)]
pub fn u64_to_le_bytes(word: u64, bytes: &mut [u8]) {
    let writable_num_bytes = min(bytes.len(), std::mem::size_of::<u64>());

    for (idx, byte) in bytes.iter_mut().enumerate().take(writable_num_bytes) {
        *byte = (word >> (idx * 8)) as u8;
    }
}
