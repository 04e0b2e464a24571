//! Configuration
//!
//! Loaded from TOML. Every section is optional and falls back to its defaults.
//!
//! ```toml
//! [keys]
//! prime_bits = 512
//!
//! [tally]
//! discard_private_key = false
//!
//! [storage]
//! path = "./sealed_ballot.redb"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keygen::KeyBounds;

/// Smallest prime size whose modulus still holds the largest ballot payload
/// (a `u64` option and a 64 character fingerprint, about 930 bits of JSON).
pub const MIN_PRIME_BITS: u64 = 480;

pub const DEFAULT_PRIME_BITS: u64 = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keys: KeySettings,

    #[serde(default)]
    pub tally: TallySettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Size of the primes behind every campaign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySettings {
    #[serde(default = "default_prime_bits")]
    pub prime_bits: u64,
}

impl KeySettings {
    pub fn bounds(&self) -> KeyBounds {
        KeyBounds::for_prime_bits(self.prime_bits)
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            prime_bits: default_prime_bits(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallySettings {
    /// Drop the campaign's private key once its tally is committed.
    #[serde(default)]
    pub discard_private_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_prime_bits() -> u64 {
    DEFAULT_PRIME_BITS
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./sealed_ballot.redb")
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.prime_bits < MIN_PRIME_BITS {
            return Err(ConfigError::Invalid(format!(
                "keys.prime_bits must be at least {}, got {}",
                MIN_PRIME_BITS, self.keys.prime_bits
            )));
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage.path must not be empty".to_string()));
        }
        Ok(())
    }
}
