use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use rug::{integer::IsPrime, integer::Order, Integer};
use thiserror::Error;

/// Miller-Rabin rounds used for every primality decision.
pub const PRIME_CHECK_ROUNDS: u32 = 40;

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("random number generation failed: upper bound must be positive")]
    RandomNumberGeneration,
    #[error("empty range: {0} > {1}")]
    EmptyRange(BigUint, BigUint),
}

/// Uniform value in `[0, n)` by rejection sampling over whole bytes.
pub fn random_below(
    n: &BigUint,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<BigUint, FunctionError> {
    if n.is_zero() {
        return Err(FunctionError::RandomNumberGeneration);
    }
    let bits = n.bits();
    let mut bytes = vec![0u8; ((bits + 7) / 8) as usize];
    // Mask the top byte so the acceptance rate stays above one half.
    let excess = (bytes.len() as u64 * 8 - bits) as u32;
    let mask = 0xffu8 >> excess;
    loop {
        rng.fill_bytes(&mut bytes);
        bytes[0] &= mask;
        let result = BigUint::from_bytes_be(&bytes);
        if &result < n {
            return Ok(result);
        }
    }
}

/// Uniform value in the inclusive range `[low, high]`.
pub fn random_in_range(
    low: &BigUint,
    high: &BigUint,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<BigUint, FunctionError> {
    if low > high {
        return Err(FunctionError::EmptyRange(low.clone(), high.clone()));
    }
    let span = high - low + BigUint::one();
    Ok(low + random_below(&span, rng)?)
}

pub fn to_rug(n: &BigUint) -> Integer {
    Integer::from_digits(&n.to_bytes_be(), Order::Msf)
}

pub fn from_rug(n: &Integer) -> BigUint {
    BigUint::from_bytes_be(&n.to_digits::<u8>(Order::Msf))
}

pub fn is_probable_prime(n: &BigUint) -> bool {
    to_rug(n).is_probably_prime(PRIME_CHECK_ROUNDS) != IsPrime::No
}

/// Smallest prime that is `>= n`.
pub fn prime_at_or_above(n: &BigUint) -> BigUint {
    if n.is_zero() {
        return BigUint::from(2u8);
    }
    let below = to_rug(n) - 1u32;
    from_rug(&below.next_prime())
}

/// Smallest prime strictly greater than `n`.
pub fn prime_above(n: &BigUint) -> BigUint {
    from_rug(&to_rug(n).next_prime())
}

/// Iterative extended Euclid. Returns `(g, x, y)` with `a*x + b*y = g`.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());
    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
        let next_t = &old_t - &quotient * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }
    (old_r, old_s, old_t)
}

/// Inverse of `a` modulo `m`, normalized to `[0, m)`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let m = BigInt::from_biguint(Sign::Plus, m.clone());
    let (g, x, _) = extended_gcd(&a, &m);
    if !g.is_one() {
        return None;
    }
    ((x % &m + &m) % &m).to_biguint()
}

/// Big-endian bytes without leading zeros; zero maps to an empty slice.
pub fn to_minimal_be_bytes(n: &BigUint) -> Vec<u8> {
    if n.is_zero() {
        Vec::new()
    } else {
        n.to_bytes_be()
    }
}
