use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::serde_decimal;

/// Public half of a campaign key: `(n, e)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(with = "serde_decimal")]
    pub modulus: BigUint,
    #[serde(with = "serde_decimal")]
    pub exponent: BigUint,
}

impl PublicKey {
    pub fn new(modulus: BigUint, exponent: BigUint) -> Self {
        PublicKey { modulus, exponent }
    }

    /// Textbook RSA: `m^e mod n`. No padding, so equal inputs give equal outputs.
    pub fn encrypt(&self, message: &BigUint) -> Result<BigUint, CodecError> {
        if message >= &self.modulus {
            return Err(CodecError::PayloadTooLarge {
                bits: message.bits(),
                modulus_bits: self.modulus.bits(),
            });
        }
        Ok(message.modpow(&self.exponent, &self.modulus))
    }

    /// Size of the modulus in bits.
    pub fn bits(&self) -> u64 {
        self.modulus.bits()
    }
}
