//! Voter credentials.
//!
//! A [`Token`] is `SHA-256(salt ":" voter ":" campaign)` rendered as hex. It is
//! handed to the voter and never stored. Its [`TokenFingerprint`] (a second
//! SHA-256 over the token text) is the only voter-derived value that reaches
//! the ballot store, so stored rows cannot be walked back to a voter without
//! the token itself.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use zeroize::Zeroize;

use crate::ids::{CampaignId, VoterId};

/// Per-campaign secret mixed into every token. Fixed at campaign creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salt(String);

impl Salt {
    /// 256 random bits from the OS, as 64 hex characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Salt(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Salt {
    fn from(s: &str) -> Self {
        Salt(s.to_string())
    }
}

impl From<String> for Salt {
    fn from(s: String) -> Self {
        Salt(s)
    }
}

/// Secret voting credential for one voter in one campaign.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl Zeroize for Token {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid token fingerprint: {0}")]
pub struct FingerprintParseError(String);

/// One-way image of a [`Token`]; the key of every token record and ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenFingerprint(pub [u8; 32]);

impl TokenFingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, FingerprintParseError> {
        let bytes = hex::decode(s).map_err(|e| FingerprintParseError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| FingerprintParseError(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(TokenFingerprint(bytes))
    }
}

impl Display for TokenFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for TokenFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenFingerprint::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Derives the voter's token. Pure: the same inputs always give the same token.
pub fn issue(voter_id: VoterId, campaign_id: CampaignId, salt: &Salt) -> Token {
    let mut hash = Sha256::new();
    hash.update(salt.as_str().as_bytes());
    hash.update(b":");
    hash.update(voter_id.to_string().as_bytes());
    hash.update(b":");
    hash.update(campaign_id.to_string().as_bytes());
    Token(hex::encode(hash.finalize()))
}

pub fn fingerprint(token: &Token) -> TokenFingerprint {
    TokenFingerprint(Sha256::digest(token.as_str().as_bytes()).into())
}
