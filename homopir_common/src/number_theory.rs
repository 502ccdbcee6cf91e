use crate::{branch_opt_util, error::HomoPIRError};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

const SMALL_PRIMES: [u32; 54] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257,
];

/// Samples a uniform random integer in [0, bound), using rejection sampling over `bound.bits()` -bit candidates.
pub fn random_below<R: RngCore + CryptoRng>(bound: &BigUint, rng: &mut R) -> BigUint {
    let num_bits = bound.bits();
    if num_bits == 0 {
        return BigUint::zero();
    }

    let num_bytes = num_bits.div_ceil(8) as usize;
    let excess_bits = (num_bytes as u64 * 8 - num_bits) as u32;
    let top_byte_mask = 0xffu8 >> excess_bits;

    let mut bytes = vec![0u8; num_bytes];
    loop {
        rng.fill_bytes(&mut bytes);
        bytes[num_bytes - 1] &= top_byte_mask;

        let candidate = BigUint::from_bytes_le(&bytes);
        if candidate < *bound {
            return candidate;
        }
    }
}

/// Miller-Rabin probabilistic primality test, preceded by trial division with a few small primes.
///
/// A composite passes with probability at most 2^-`certainty`, because each round has error probability at most 1/4
/// and `ceil(certainty / 2)` rounds are executed, with uniformly random bases.
pub fn is_probable_prime<R: RngCore + CryptoRng>(n: &BigUint, certainty: u32, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if !n.bit(0) {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        let small_prime = BigUint::from(p);
        if *n == small_prime {
            return true;
        }
        if (n % &small_prime).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    // Bases are drawn from [2, n - 2].
    let base_range = n - 3u32;
    let num_rounds = certainty.div_ceil(2).max(1);

    'witness: for _ in 0..num_rounds {
        let a = random_below(&base_range, rng) + &two;
        let mut x = a.modpow(&d, n);

        if x.is_one() || x == n_minus_one {
            continue;
        }

        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x.is_one() {
                return false;
            }
        }

        return false;
    }

    true
}

/// Searches for a probable prime of exactly `bit_len` bits, s.t. its two most significant bits are set.
///
/// Setting the top two bits guarantees that the product of two such primes has exactly `2 * bit_len` bits.
pub fn generate_probable_prime<R: RngCore + CryptoRng>(bit_len: u64, certainty: u32, max_attempt_count: usize, rng: &mut R) -> Result<BigUint, HomoPIRError> {
    if branch_opt_util::unlikely(bit_len < 3) {
        return Err(HomoPIRError::InvalidModulusBitLength(bit_len * 2));
    }

    let num_bytes = bit_len.div_ceil(8) as usize;
    let excess_bits = (num_bytes as u64 * 8 - bit_len) as u32;
    let top_byte_mask = 0xffu8 >> excess_bits;

    let mut bytes = vec![0u8; num_bytes];
    for _ in 0..max_attempt_count {
        rng.fill_bytes(&mut bytes);
        bytes[num_bytes - 1] &= top_byte_mask;

        let mut candidate = BigUint::from_bytes_le(&bytes);
        candidate.set_bit(bit_len - 1, true);
        candidate.set_bit(bit_len - 2, true);
        candidate.set_bit(0, true);

        if is_probable_prime(&candidate, certainty, rng) {
            return Ok(candidate);
        }
    }

    branch_opt_util::cold();
    Err(HomoPIRError::ExhaustedAllAttemptsToGeneratePrime(max_attempt_count))
}
