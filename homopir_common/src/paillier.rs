//! Paillier's additively homomorphic public-key cryptosystem.
//!
//! Multiplying two ciphertexts modulo n^2 adds the underlying plaintexts modulo n, while raising a ciphertext to a
//! public power multiplies the underlying plaintext by that power. These two operations are all a PIR responder needs
//! to evaluate its data against an encrypted query vector, without ever learning what was queried.

use crate::{
    branch_opt_util,
    error::HomoPIRError,
    number_theory,
    params::{MIN_MODULUS_BIT_LEN, PRIME_SEARCH_MAX_ATTEMPT_COUNT},
    serialization::{ByteReader, put_biguint},
};
use log::info;
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

/// An element of Z*_{n^2}, encrypting some plaintext in Z_n.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ciphertext(BigUint);

impl Ciphertext {
    pub fn from_biguint(v: BigUint) -> Ciphertext {
        Ciphertext(v)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn into_biguint(self) -> BigUint {
        self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        put_biguint(&mut bytes, &self.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Ciphertext, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);
        let v = reader.read_biguint("ciphertext")?;
        reader.finish()?;

        Ok(Ciphertext(v))
    }
}

/// Public half of a Paillier key pair, with generator fixed to g = n + 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    n: BigUint,
    n_squared: BigUint,
    g: BigUint,
}

impl PublicKey {
    pub fn new(n: BigUint) -> PublicKey {
        let n_squared = &n * &n;
        let g = &n + 1u32;

        PublicKey { n, n_squared, g }
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn n_squared(&self) -> &BigUint {
        &self.n_squared
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn bit_len(&self) -> u64 {
        self.n.bits()
    }

    /// Ciphertexts must be residues modulo n^2, coprime to n.
    #[inline]
    pub fn is_valid_ciphertext(&self, c: &Ciphertext) -> bool {
        !c.0.is_zero() && c.0 < self.n_squared && c.0.gcd(&self.n).is_one()
    }

    /// Randomized encryption of `plaintext` ∈ [0, n). Encrypting the same plaintext twice yields distinct ciphertexts,
    /// with overwhelming probability.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, plaintext: &BigUint, rng: &mut R) -> Result<Ciphertext, HomoPIRError> {
        let r = loop {
            let r = number_theory::random_below(&self.n, rng);
            if !r.is_zero() && r.gcd(&self.n).is_one() {
                break r;
            }
        };

        self.encrypt_with_nonce(plaintext, &r)
    }

    /// Computes c = g^m * r^n mod n^2, where g^m collapses to (1 + m * n) mod n^2, because g = n + 1.
    pub fn encrypt_with_nonce(&self, plaintext: &BigUint, r: &BigUint) -> Result<Ciphertext, HomoPIRError> {
        if branch_opt_util::unlikely(*plaintext >= self.n) {
            return Err(HomoPIRError::PlaintextOutOfRange);
        }

        let g_pow_m = (plaintext * &self.n + 1u32) % &self.n_squared;
        let r_pow_n = r.modpow(&self.n, &self.n_squared);

        Ok(Ciphertext((g_pow_m * r_pow_n) % &self.n_squared))
    }

    /// Ciphertext whose decryption is (decrypt(c1) + decrypt(c2)) mod n.
    #[inline]
    pub fn homomorphic_multiply(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        Ciphertext((&c1.0 * &c2.0) % &self.n_squared)
    }

    /// Ciphertext whose decryption is (decrypt(c) * k) mod n.
    #[inline]
    pub fn homomorphic_exponentiate(&self, c: &Ciphertext, k: &BigUint) -> Ciphertext {
        Ciphertext(c.0.modpow(k, &self.n_squared))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        put_biguint(&mut bytes, &self.n);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);
        let n = Self::read_from(&mut reader)?;
        reader.finish()?;

        Ok(n)
    }

    pub(crate) fn read_from(reader: &mut ByteReader) -> Result<PublicKey, HomoPIRError> {
        let n = reader.read_biguint("public modulus")?;
        if branch_opt_util::unlikely(n.bits() < MIN_MODULUS_BIT_LEN) {
            return Err(HomoPIRError::FailedToDeserialize("public modulus is too small".to_string()));
        }

        Ok(PublicKey::new(n))
    }
}

/// Private half of a Paillier key pair. Never leaves the querier.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    p: BigUint,
    q: BigUint,
    lambda: BigUint,
    mu: BigUint,
    n: BigUint,
    n_squared: BigUint,
}

impl PrivateKey {
    /// Recovers m = L(c^λ mod n^2) * μ mod n, where L(x) = (x - 1) / n.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, HomoPIRError> {
        if branch_opt_util::unlikely(c.0.is_zero() || c.0 >= self.n_squared || !c.0.gcd(&self.n).is_one()) {
            return Err(HomoPIRError::CiphertextOutOfRange);
        }

        let x = c.0.modpow(&self.lambda, &self.n_squared);
        let l_of_x = (x - 1u32) / &self.n;

        Ok((l_of_x * &self.mu) % &self.n)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").field("n", &self.n).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generates a key pair whose modulus n = p * q has exactly `bit_len` bits, where p and q are probable primes of
    /// `bit_len / 2` bits each, each passing Miller-Rabin testing with error probability at most 2^-`certainty`.
    pub fn generate<R: RngCore + CryptoRng>(bit_len: u64, certainty: u32, rng: &mut R) -> Result<KeyPair, HomoPIRError> {
        if branch_opt_util::unlikely(bit_len < MIN_MODULUS_BIT_LEN || bit_len % 2 != 0) {
            return Err(HomoPIRError::InvalidModulusBitLength(bit_len));
        }
        if branch_opt_util::unlikely(certainty == 0) {
            return Err(HomoPIRError::InvalidPrimalityCertainty(certainty));
        }

        let prime_bit_len = bit_len / 2;

        let p = number_theory::generate_probable_prime(prime_bit_len, certainty, PRIME_SEARCH_MAX_ATTEMPT_COUNT, rng)?;
        let q = loop {
            let q = number_theory::generate_probable_prime(prime_bit_len, certainty, PRIME_SEARCH_MAX_ATTEMPT_COUNT, rng)?;
            if q != p {
                break q;
            }
        };

        let key_pair = KeyPair::from_primes(p, q)?;
        info!("Generated Paillier key pair with {}-bit modulus, certainty {}", key_pair.public.bit_len(), certainty);

        Ok(key_pair)
    }

    /// Derives a key pair from two primes, checking they are distinct and gcd(p * q, (p - 1) * (q - 1)) = 1.
    pub fn from_primes(p: BigUint, q: BigUint) -> Result<KeyPair, HomoPIRError> {
        if branch_opt_util::unlikely(p == q || p <= BigUint::one() || q <= BigUint::one()) {
            return Err(HomoPIRError::UnsuitablePrimes);
        }

        let n = &p * &q;
        let p_minus_one = &p - 1u32;
        let q_minus_one = &q - 1u32;

        if branch_opt_util::unlikely(!n.gcd(&(&p_minus_one * &q_minus_one)).is_one()) {
            return Err(HomoPIRError::UnsuitablePrimes);
        }

        let lambda = p_minus_one.lcm(&q_minus_one);
        let mu = lambda.modinv(&n).ok_or(HomoPIRError::UnsuitablePrimes)?;

        let public = PublicKey::new(n);
        let private = PrivateKey {
            p,
            q,
            lambda,
            mu,
            n: public.n.clone(),
            n_squared: public.n_squared.clone(),
        };

        Ok(KeyPair { public, private })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    #[inline]
    pub fn encrypt<R: RngCore + CryptoRng>(&self, plaintext: &BigUint, rng: &mut R) -> Result<Ciphertext, HomoPIRError> {
        self.public.encrypt(plaintext, rng)
    }

    #[inline]
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, HomoPIRError> {
        self.private.decrypt(c)
    }

    /// Serializes the key pair as its two primes, everything else is derived again on deserialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        put_biguint(&mut bytes, &self.private.p);
        put_biguint(&mut bytes, &self.private.q);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<KeyPair, HomoPIRError> {
        let mut reader = ByteReader::new(bytes);
        let p = reader.read_biguint("prime p")?;
        let q = reader.read_biguint("prime q")?;
        reader.finish()?;

        KeyPair::from_primes(p, q).map_err(|e| HomoPIRError::FailedToDeserialize(e.to_string()))
    }
}
