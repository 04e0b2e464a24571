//! Persistence seams.
//!
//! The core never talks to a database directly. It is handed implementations
//! of [`CampaignRegistry`], [`VoterDirectory`] and [`BallotStore`] at
//! construction time. Two implementations ship with the crate:
//! [`MemStore`](crate::mem_store::MemStore) and
//! [`RedbStore`](crate::redb_store::RedbStore).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::campaign::{Campaign, CampaignOption, CampaignStats, CampaignStatus};
use crate::codec::Ciphertext;
use crate::ids::{CampaignId, OptionId, VoterId};
use crate::priv_key::PrivateKey;
use crate::pub_key::PublicKey;
use crate::tally::Tally;
use crate::token::TokenFingerprint;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),
    #[error("campaign {0} already exists")]
    DuplicateCampaign(CampaignId),
    #[error("campaign {0} is not accepting ballots")]
    CampaignNotActive(CampaignId),
    #[error("options of campaign {id} cannot change while it is {status}")]
    OptionsLocked {
        id: CampaignId,
        status: CampaignStatus,
    },
    #[error("a ballot for token {1} already exists in campaign {0}")]
    DuplicateBallot(CampaignId, TokenFingerprint),
    /// A ballot exists without its token being marked used, or the reverse.
    #[error("store consistency violated: {0}")]
    Inconsistent(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Issuance state of one token. `used` only ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub campaign_id: CampaignId,
    pub fingerprint: TokenFingerprint,
    pub used: bool,
}

impl TokenRecord {
    pub fn unused(campaign_id: CampaignId, fingerprint: TokenFingerprint) -> Self {
        TokenRecord {
            campaign_id,
            fingerprint,
            used: false,
        }
    }
}

/// An encrypted vote. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub campaign_id: CampaignId,
    pub ciphertext: Ciphertext,
    pub fingerprint: TokenFingerprint,
}

/// Result of the atomic ballot-insert-and-token-flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    UnknownToken,
    AlreadyUsed,
    /// The campaign was missing or no longer active when the write was attempted.
    CampaignNotActive,
}

/// Whether a campaign record read under a write lock or transaction accepts ballots.
pub(crate) fn accepts_ballots(campaign: Option<&Campaign>) -> bool {
    campaign.is_some_and(|c| c.status == CampaignStatus::Active)
}

/// Decides [`BallotStore::record_ballot`] from the state found under the
/// store's write lock or transaction. `None` means "write ballot and flip".
pub(crate) fn check_record_state(
    record: Option<&TokenRecord>,
    ballot: &Ballot,
    ballot_exists: bool,
) -> StoreResult<Option<RecordOutcome>> {
    let record = match record {
        Some(r) if r.campaign_id == ballot.campaign_id => r,
        _ => return Ok(Some(RecordOutcome::UnknownToken)),
    };
    match (record.used, ballot_exists) {
        (false, false) => Ok(None),
        (true, true) => Ok(Some(RecordOutcome::AlreadyUsed)),
        (true, false) => Err(StoreError::Inconsistent(format!(
            "token {} is marked used but campaign {} holds no ballot for it",
            ballot.fingerprint, ballot.campaign_id
        ))),
        (false, true) => Err(StoreError::Inconsistent(format!(
            "campaign {} holds a ballot for token {} that is not marked used",
            ballot.campaign_id, ballot.fingerprint
        ))),
    }
}

/// Campaign records and their key material.
pub trait CampaignRegistry: Send + Sync {
    fn next_campaign_id(&self) -> StoreResult<CampaignId>;

    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()>;

    fn get_campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>>;

    /// Public key, plus the private key unless it has been discarded.
    fn get_campaign_key_material(
        &self,
        id: CampaignId,
    ) -> StoreResult<Option<(PublicKey, Option<PrivateKey>)>> {
        Ok(self
            .get_campaign(id)?
            .map(|c| (c.public_key, c.private_key)))
    }

    fn is_campaign_active(&self, id: CampaignId) -> StoreResult<bool> {
        Ok(self
            .get_campaign(id)?
            .map(|c| c.status == CampaignStatus::Active)
            .unwrap_or(false))
    }

    /// Sets `next` only if the current status is `expected`. Returns whether it did.
    fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
    ) -> StoreResult<bool>;

    fn discard_private_key(&self, id: CampaignId) -> StoreResult<()>;

    /// Adds an option unless the campaign is closed. Fails with
    /// [`StoreError::OptionsLocked`] otherwise.
    fn add_option(
        &self,
        campaign_id: CampaignId,
        label: &str,
        description: &str,
    ) -> StoreResult<CampaignOption>;

    /// Options of one campaign, ordered by label.
    fn list_options(&self, campaign_id: CampaignId) -> StoreResult<Vec<CampaignOption>>;

    /// Removes an option while the campaign is still pending, checking the
    /// status in the same atomic step. Returns `false` if the campaign has no
    /// such option.
    fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> StoreResult<bool>;
}

/// Who is allowed to request a token.
pub trait VoterDirectory: Send + Sync {
    fn voter_exists(&self, voter_id: VoterId) -> StoreResult<bool>;

    /// Number of registered voters, the denominator of participation.
    fn voter_count(&self) -> StoreResult<u64>;
}

/// Token records, ballots and committed tallies.
pub trait BallotStore: Send + Sync {
    /// Raw ballot insert that does not touch token records.
    fn put_ballot(&self, ballot: &Ballot) -> StoreResult<()>;

    fn list_ballots(&self, campaign_id: CampaignId) -> StoreResult<Vec<Ballot>>;

    fn get_token_record(&self, fingerprint: &TokenFingerprint) -> StoreResult<Option<TokenRecord>>;

    /// Inserts `record` unless one exists for its fingerprint; returns the stored record.
    ///
    /// Fails with [`StoreError::CampaignNotActive`] unless the record's
    /// campaign is active at the moment of the write.
    fn upsert_token_record(&self, record: &TokenRecord) -> StoreResult<TokenRecord>;

    /// Atomically stores `ballot` and flips its token record to used.
    ///
    /// The campaign status is read in the same lock or transaction as the
    /// write, so a campaign closed after the caller's own check yields
    /// [`RecordOutcome::CampaignNotActive`] and nothing is written.
    fn record_ballot(&self, ballot: &Ballot) -> StoreResult<RecordOutcome>;

    /// Commits `tally` unless one exists for its campaign; returns the committed tally.
    fn put_tally_result(&self, tally: &Tally) -> StoreResult<Tally>;

    fn get_tally_result(&self, campaign_id: CampaignId) -> StoreResult<Option<Tally>>;

    fn campaign_stats(&self, campaign_id: CampaignId) -> StoreResult<CampaignStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{fingerprint, Token};

    fn ballot() -> Ballot {
        Ballot {
            campaign_id: CampaignId(1),
            ciphertext: Ciphertext::from("AQID".to_string()),
            fingerprint: fingerprint(&Token::from("t")),
        }
    }

    #[test]
    fn test_check_record_state() {
        let b = ballot();
        let unused = TokenRecord::unused(CampaignId(1), b.fingerprint);
        let used = TokenRecord { used: true, ..unused.clone() };
        let other = TokenRecord::unused(CampaignId(2), b.fingerprint);

        assert_eq!(check_record_state(None, &b, false).unwrap(), Some(RecordOutcome::UnknownToken));
        assert_eq!(
            check_record_state(Some(&other), &b, false).unwrap(),
            Some(RecordOutcome::UnknownToken)
        );
        assert_eq!(check_record_state(Some(&unused), &b, false).unwrap(), None);
        assert_eq!(
            check_record_state(Some(&used), &b, true).unwrap(),
            Some(RecordOutcome::AlreadyUsed)
        );
        assert!(matches!(
            check_record_state(Some(&used), &b, false),
            Err(StoreError::Inconsistent(_))
        ));
        assert!(matches!(
            check_record_state(Some(&unused), &b, true),
            Err(StoreError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_accepts_ballots_only_when_active() {
        let kp = crate::keygen::KeyPair::from_primes(
            &num_bigint::BigUint::from(61u8),
            &num_bigint::BigUint::from(53u8),
            &mut rand::rngs::OsRng,
        )
        .expect("key derivation failed");
        let mut campaign = Campaign {
            id: CampaignId(1),
            title: "t".to_string(),
            description: String::new(),
            status: CampaignStatus::Pending,
            salt: crate::token::Salt::from("abc"),
            public_key: kp.public_key(),
            private_key: Some(kp.private_key()),
        };
        assert!(!accepts_ballots(None));
        assert!(!accepts_ballots(Some(&campaign)));
        campaign.status = CampaignStatus::Active;
        assert!(accepts_ballots(Some(&campaign)));
        campaign.status = CampaignStatus::Closed;
        assert!(!accepts_ballots(Some(&campaign)));
    }

    #[test]
    fn test_records_serialize_fingerprint_as_hex() {
        let b = ballot();
        let json = serde_json::to_string(&b).expect("serialize");
        assert!(json.contains(&b.fingerprint.to_hex()));
        let back: Ballot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, b);
    }
}
