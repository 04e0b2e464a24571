//! This crate implements the cryptographic core of an anonymous balloting service.
//!
//! Every campaign gets its own textbook RSA key pair. A registered voter
//! receives a salted token that is spent on exactly one ballot; the ballot is
//! the voter's option encrypted under the campaign's public key and is stored
//! under the token's fingerprint only, never under the voter's id. Closing a
//! campaign and tallying it decrypts every ballot and commits per-option
//! counts once; tallying earlier yields a provisional count that is not kept.
//!
//! Encryption is unpadded and therefore deterministic: two ballots for the
//! same option carry different fingerprints and so differ, but anyone holding
//! a ballot can confirm a guessed `(option, fingerprint)` pair.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use sealed_ballot::{
//!     BallotRegister, CampaignAdmin, Config, MemStore, TallyEngine, VoterId,
//! };
//!
//! let config = Config::default();
//! let store = Arc::new(MemStore::new());
//! store.register_voter(VoterId(42)).unwrap();
//!
//! let admin = CampaignAdmin::new(store.clone(), store.clone(), store.clone(), config.keys.clone());
//! let campaign = admin.create_campaign("Board election", "Pick a chair").unwrap();
//! let alice = admin.add_option(campaign.id, "Alice", "").unwrap();
//! admin.activate(campaign.id).unwrap();
//!
//! let register = BallotRegister::new(store.clone(), store.clone(), store.clone());
//! let token = register.request_token(VoterId(42), campaign.id).unwrap();
//! register.register_ballot(&token, alice.id).unwrap();
//!
//! admin.close(campaign.id).unwrap();
//! let engine = TallyEngine::new(store.clone(), store.clone(), config.tally.clone());
//! let tally = engine.tally(campaign.id).unwrap();
//! assert_eq!(tally.count_for(alice.id), 1);
//! assert_eq!(tally.rows[0].label.as_deref(), Some("Alice"));
//! ```

pub mod campaign;
pub mod codec;
pub mod config;
pub mod functions;
pub mod ids;
pub mod keygen;
pub mod mem_store;
pub mod priv_key;
pub mod pub_key;
pub mod redb_store;
pub mod register;
mod serde_decimal;
pub mod service;
pub mod store;
pub mod tally;
pub mod token;

pub use campaign::{
    Campaign, CampaignAdmin, CampaignError, CampaignOption, CampaignStats, CampaignStatus,
};
pub use codec::{decode, encode, BallotPayload, Ciphertext, CodecError};
pub use config::{Config, ConfigError, KeySettings, StorageSettings, TallySettings};
pub use ids::{CampaignId, OptionId, VoterId};
pub use keygen::{generate_key_pair, KeyBounds, KeyGenError, KeyPair};
pub use mem_store::MemStore;
pub use priv_key::PrivateKey;
pub use pub_key::PublicKey;
pub use redb_store::RedbStore;
pub use register::{BallotError, BallotRegister};
pub use service::{ServiceError, VotingService};
pub use store::{
    Ballot, BallotStore, CampaignRegistry, RecordOutcome, StoreError, TokenRecord, VoterDirectory,
};
pub use tally::{Tally, TallyEngine, TallyError, TallyRow};
pub use token::{fingerprint, issue, Salt, Token, TokenFingerprint};
