use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

use crate::functions::*;
use crate::priv_key::PrivateKey;
use crate::pub_key::PublicKey;

#[derive(Error, Debug)]
pub enum KeyGenError {
    #[error("invalid key range [{min}, {max}]: {reason}")]
    Range {
        min: BigUint,
        max: BigUint,
        reason: &'static str,
    },
    #[error("random number generation failed: {0}")]
    RandomNumberGeneration(#[from] FunctionError),
    #[error("public exponent has no inverse modulo phi")]
    NoInverse,
}

/// Inclusive range the two primes are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    pub min: BigUint,
    pub max: BigUint,
}

impl KeyBounds {
    pub fn new(min: BigUint, max: BigUint) -> Self {
        KeyBounds { min, max }
    }

    /// All integers of exactly `bits` bits: `[2^(bits-1), 2^bits - 1]`.
    pub fn for_prime_bits(bits: u64) -> Self {
        let min = BigUint::one() << (bits.saturating_sub(1));
        let max = (BigUint::one() << bits) - BigUint::one();
        KeyBounds { min, max }
    }
}

/// A campaign key pair. `modulus = p*q` and
/// `private_exponent = public_exponent^-1 mod (p-1)(q-1)`.
#[derive(Clone)]
pub struct KeyPair {
    pub modulus: BigUint,
    pub public_exponent: BigUint,
    pub private_exponent: BigUint,
}

impl Zeroize for KeyPair {
    fn zeroize(&mut self) {
        self.private_exponent = BigUint::zero();
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("modulus", &self.modulus)
            .field("public_exponent", &self.public_exponent)
            .field("private_exponent", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    /// Builds the key pair for two distinct primes, drawing `e` uniformly
    /// from `[2, phi-1]` among values coprime to `phi`.
    pub fn from_primes(
        p: &BigUint,
        q: &BigUint,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, KeyGenError> {
        let one = BigUint::one();
        let two = BigUint::from(2u8);
        let modulus = p * q;
        let phi = (p - &one) * (q - &one);
        if phi <= two {
            return Err(KeyGenError::Range {
                min: p.clone().min(q.clone()),
                max: p.clone().max(q.clone()),
                reason: "phi leaves no room for a public exponent",
            });
        }

        let phi_minus_one = &phi - &one;
        let public_exponent = loop {
            let e = random_in_range(&two, &phi_minus_one, rng)?;
            if e.gcd(&phi).is_one() {
                break e;
            }
        };
        let private_exponent = mod_inverse(&public_exponent, &phi).ok_or(KeyGenError::NoInverse)?;

        Ok(KeyPair {
            modulus,
            public_exponent,
            private_exponent,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.modulus.clone(), self.public_exponent.clone())
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey::new(self.modulus.clone(), self.private_exponent.clone())
    }
}

/// Checks that `[min, max]` can yield two distinct primes that make a usable key.
fn check_bounds(min: &BigUint, max: &BigUint) -> Result<(), KeyGenError> {
    let range_error = |reason| KeyGenError::Range {
        min: min.clone(),
        max: max.clone(),
        reason,
    };
    if min >= max {
        return Err(range_error("lower bound must be below upper bound"));
    }
    let first = prime_at_or_above(min);
    if &first > max {
        return Err(range_error("range contains no primes"));
    }
    let second = prime_above(&first);
    if &second > max {
        return Err(range_error("range contains a single prime"));
    }
    // 2 and 3 give phi = 2, which admits no exponent in [2, phi-1].
    if first == BigUint::from(2u8) && &prime_above(&second) > max {
        return Err(range_error("range only contains the primes 2 and 3"));
    }
    Ok(())
}

fn random_prime(
    min: &BigUint,
    max: &BigUint,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<BigUint, KeyGenError> {
    loop {
        let candidate = random_in_range(min, max, rng)?;
        if is_probable_prime(&candidate) {
            return Ok(candidate);
        }
    }
}

/// Draws two distinct primes from `[min, max]`, resampling `q` on collision.
pub fn generate_prime_pair(
    min: &BigUint,
    max: &BigUint,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<(BigUint, BigUint), KeyGenError> {
    check_bounds(min, max)?;
    let two = BigUint::from(2u8);
    let three = BigUint::from(3u8);
    let p = random_prime(min, max, rng)?;
    let q = loop {
        let q = random_prime(min, max, rng)?;
        let degenerate = (p == two && q == three) || (p == three && q == two);
        if q != p && !degenerate {
            break q;
        }
    };
    Ok((p, q))
}

pub fn generate_key_pair_with_rng(
    min_bound: &BigUint,
    max_bound: &BigUint,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<KeyPair, KeyGenError> {
    let (mut p, mut q) = generate_prime_pair(min_bound, max_bound, rng)?;
    let key_pair = KeyPair::from_primes(&p, &q, rng);
    p.set_zero();
    q.set_zero();
    let key_pair = key_pair?;
    debug!(modulus_bits = key_pair.modulus.bits(), "generated campaign key pair");
    Ok(key_pair)
}

/// Generates a key pair from primes in `[min_bound, max_bound]` using the OS RNG.
pub fn generate_key_pair(min_bound: &BigUint, max_bound: &BigUint) -> Result<KeyPair, KeyGenError> {
    generate_key_pair_with_rng(min_bound, max_bound, &mut OsRng)
}
