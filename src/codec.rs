//! Ballot encryption.
//!
//! A ballot payload `{"option_id":…,"fingerprint":"…"}` is serialized to JSON,
//! read as a big-endian integer and raised to the campaign's public exponent.
//! The ciphertext's textual form is standard base64 of the minimal big-endian
//! bytes of the result. Encryption is unpadded and therefore deterministic:
//! equal payloads under one key produce equal ciphertexts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::functions::to_minimal_be_bytes;
use crate::ids::OptionId;
use crate::priv_key::PrivateKey;
use crate::pub_key::PublicKey;
use crate::token::TokenFingerprint;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("payload too large: {bits}-bit plaintext does not fit a {modulus_bits}-bit modulus")]
    PayloadTooLarge { bits: u64, modulus_bits: u64 },
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    #[error("decoded payload does not match the ballot layout: {0}")]
    DecodeMismatch(String),
    #[error("failed to serialize ballot payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a ballot says once decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotPayload {
    pub option_id: OptionId,
    pub fingerprint: TokenFingerprint,
}

/// Payload as it comes off the wire, before the fingerprint is validated.
#[derive(Deserialize)]
struct RawPayload {
    option_id: OptionId,
    fingerprint: String,
}

/// Base64 text of an encrypted ballot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn from_integer(c: &BigUint) -> Self {
        Ciphertext(STANDARD.encode(to_minimal_be_bytes(c)))
    }

    pub fn to_integer(&self) -> Result<BigUint, CodecError> {
        let bytes = STANDARD
            .decode(self.0.as_bytes())
            .map_err(|e| CodecError::MalformedCiphertext(format!("invalid base64: {}", e)))?;
        Ok(BigUint::from_bytes_be(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Ciphertext {
    fn from(s: String) -> Self {
        Ciphertext(s)
    }
}

impl Display for Ciphertext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode(
    option_id: OptionId,
    fingerprint: TokenFingerprint,
    public_key: &PublicKey,
) -> Result<Ciphertext, CodecError> {
    let payload = BallotPayload {
        option_id,
        fingerprint,
    };
    let json = serde_json::to_vec(&payload)?;
    let m = BigUint::from_bytes_be(&json);
    let c = public_key.encrypt(&m)?;
    Ok(Ciphertext::from_integer(&c))
}

pub fn decode(ciphertext: &Ciphertext, private_key: &PrivateKey) -> Result<BallotPayload, CodecError> {
    let c = ciphertext.to_integer()?;
    let m = private_key.decrypt(&c)?;
    let bytes = to_minimal_be_bytes(&m);
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| CodecError::MalformedCiphertext(format!("plaintext is not utf-8: {}", e)))?;
    let raw: RawPayload = serde_json::from_str(text)
        .map_err(|e| CodecError::MalformedCiphertext(format!("plaintext is not a ballot: {}", e)))?;
    let fingerprint = TokenFingerprint::from_hex(&raw.fingerprint)
        .map_err(|e| CodecError::DecodeMismatch(e.to_string()))?;
    Ok(BallotPayload {
        option_id: raw.option_id,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CampaignId, VoterId};
    use crate::keygen::{generate_key_pair, KeyBounds, KeyPair};
    use crate::token::{fingerprint, issue, Salt};
    use num_traits::One;
    use std::sync::OnceLock;

    // Large enough for any payload: JSON of a u64 option and 64 hex chars.
    fn test_key() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| {
            let bounds = KeyBounds::for_prime_bits(512);
            generate_key_pair(&bounds.min, &bounds.max).expect("key generation failed")
        })
    }

    fn some_fingerprint(voter: u64) -> TokenFingerprint {
        fingerprint(&issue(VoterId(voter), CampaignId(1), &Salt::from("abc")))
    }

    #[test]
    fn test_roundtrip() {
        let kp = test_key();
        for (option, voter) in [(0u64, 1u64), (7, 42), (u64::MAX, 3)] {
            let fp = some_fingerprint(voter);
            let ct = encode(OptionId(option), fp, &kp.public_key()).expect("encode failed");
            let payload = decode(&ct, &kp.private_key()).expect("decode failed");
            assert_eq!(payload.option_id, OptionId(option));
            assert_eq!(payload.fingerprint, fp);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let kp = test_key();
        let fp = some_fingerprint(42);
        let a = encode(OptionId(7), fp, &kp.public_key()).expect("encode failed");
        let b = encode(OptionId(7), fp, &kp.public_key()).expect("encode failed");
        assert_eq!(a, b);
    }

    #[test]
    fn test_payload_layout() {
        let fp = some_fingerprint(1);
        let json = serde_json::to_string(&BallotPayload {
            option_id: OptionId(7),
            fingerprint: fp,
        })
        .expect("serialize");
        assert_eq!(json, format!(r#"{{"option_id":7,"fingerprint":"{}"}}"#, fp.to_hex()));
    }

    #[test]
    fn test_boundary_integers() {
        let kp = test_key();
        let pk = kp.public_key();
        let sk = kp.private_key();
        let top = &kp.modulus - BigUint::one();
        let ct = Ciphertext::from_integer(&pk.encrypt(&top).expect("modulus - 1 must encrypt"));
        let back = sk.decrypt(&ct.to_integer().expect("base64")).expect("decrypt");
        assert_eq!(back, top);

        let res = pk.encrypt(&kp.modulus);
        assert!(matches!(res, Err(CodecError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_zero_encodes_to_empty_text() {
        let ct = Ciphertext::from_integer(&BigUint::from(0u8));
        assert_eq!(ct.as_str(), "");
        assert_eq!(ct.to_integer().expect("empty base64"), BigUint::from(0u8));
    }

    #[test]
    fn test_minimal_big_endian_base64() {
        let ct = Ciphertext::from_integer(&BigUint::from(0x010203u32));
        assert_eq!(ct.as_str(), "AQID");
    }

    #[test]
    fn test_payload_too_large_for_small_key() {
        let small = KeyPair::from_primes(
            &BigUint::from(61u8),
            &BigUint::from(53u8),
            &mut rand::rngs::OsRng,
        )
        .expect("key derivation failed");
        let res = encode(OptionId(1), some_fingerprint(1), &small.public_key());
        assert!(matches!(res, Err(CodecError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let res = decode(&Ciphertext::from("not base64!".to_string()), &test_key().private_key());
        assert!(matches!(res, Err(CodecError::MalformedCiphertext(_))));
    }

    #[test]
    fn test_decode_rejects_non_ballot_plaintext() {
        let kp = test_key();
        let m = BigUint::from_bytes_be(b"hello, world");
        let ct = Ciphertext::from_integer(&kp.public_key().encrypt(&m).expect("encrypt"));
        let res = decode(&ct, &kp.private_key());
        assert!(matches!(res, Err(CodecError::MalformedCiphertext(_))));
    }

    #[test]
    fn test_decode_rejects_bad_fingerprint() {
        let kp = test_key();
        let m = BigUint::from_bytes_be(br#"{"option_id":3,"fingerprint":"nothex"}"#);
        let ct = Ciphertext::from_integer(&kp.public_key().encrypt(&m).expect("encrypt"));
        let res = decode(&ct, &kp.private_key());
        assert!(matches!(res, Err(CodecError::DecodeMismatch(_))));
    }

    #[test]
    fn test_decode_rejects_integer_above_modulus() {
        let kp = test_key();
        let ct = Ciphertext::from_integer(&(&kp.modulus + BigUint::one()));
        let res = decode(&ct, &kp.private_key());
        assert!(matches!(res, Err(CodecError::MalformedCiphertext(_))));
    }
}
