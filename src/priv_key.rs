use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::codec::CodecError;
use crate::serde_decimal;

/// Private half of a campaign key: `(n, d)`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    #[serde(with = "serde_decimal")]
    pub modulus: BigUint,
    #[serde(with = "serde_decimal")]
    pub exponent: BigUint,
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.exponent = BigUint::zero();
        // The modulus is public.
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("modulus", &self.modulus)
            .field("exponent", &"<redacted>")
            .finish()
    }
}

impl PrivateKey {
    pub fn new(modulus: BigUint, exponent: BigUint) -> Self {
        PrivateKey { modulus, exponent }
    }

    /// `c^d mod n`. Values at or above the modulus were never produced by
    /// the matching public key and are rejected.
    pub fn decrypt(&self, ciphertext: &BigUint) -> Result<BigUint, CodecError> {
        if ciphertext >= &self.modulus {
            return Err(CodecError::MalformedCiphertext(format!(
                "ciphertext integer has {} bits, modulus has {}",
                ciphertext.bits(),
                self.modulus.bits()
            )));
        }
        Ok(ciphertext.modpow(&self.exponent, &self.modulus))
    }
}
