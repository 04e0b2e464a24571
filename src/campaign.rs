//! Campaign records and their lifecycle.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::KeySettings;
use crate::ids::{CampaignId, OptionId};
use crate::keygen::{generate_key_pair, KeyGenError};
use crate::priv_key::PrivateKey;
use crate::pub_key::PublicKey;
use crate::store::{BallotStore, CampaignRegistry, StoreError, VoterDirectory};
use crate::token::Salt;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("campaign {0} not found")]
    NotFound(CampaignId),
    #[error("campaign {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    },
    #[error("campaign {id} is no longer {expected}")]
    StatusChanged {
        id: CampaignId,
        expected: CampaignStatus,
    },
    #[error("options of campaign {id} cannot change while it is {status}")]
    OptionsLocked {
        id: CampaignId,
        status: CampaignStatus,
    },
    #[error("campaign {campaign_id} has no option {option_id}")]
    OptionNotFound {
        campaign_id: CampaignId,
        option_id: OptionId,
    },
    #[error("key generation failed: {0}")]
    KeyGen(#[from] KeyGenError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CampaignError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CampaignNotFound(id) => CampaignError::NotFound(id),
            StoreError::OptionsLocked { id, status } => CampaignError::OptionsLocked { id, status },
            e => CampaignError::Store(e),
        }
    }
}

/// `Pending -> Active -> Closed`, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Active,
    Closed,
}

impl CampaignStatus {
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        matches!(
            (self, next),
            (CampaignStatus::Pending, CampaignStatus::Active)
                | (CampaignStatus::Active, CampaignStatus::Closed)
        )
    }

    /// Options may be added until the campaign closes.
    pub fn accepts_new_options(self) -> bool {
        self != CampaignStatus::Closed
    }

    /// Options may only be withdrawn before voting opens.
    pub fn allows_option_removal(self) -> bool {
        self == CampaignStatus::Pending
    }
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Active => "active",
            CampaignStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub title: String,
    pub description: String,
    pub status: CampaignStatus,
    pub salt: Salt,
    pub public_key: PublicKey,
    /// `None` once the key has been discarded after tallying.
    pub private_key: Option<PrivateKey>,
}

/// One choice on a campaign's ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignOption {
    pub id: OptionId,
    pub campaign_id: CampaignId,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub tokens_issued: u64,
    pub tokens_used: u64,
    pub ballots_cast: u64,
    /// Registered voters when the stats were taken.
    #[serde(default)]
    pub eligible_voters: u64,
}

impl CampaignStats {
    /// Percentage of eligible voters who cast a ballot, to two decimals.
    pub fn participation(&self) -> f64 {
        if self.eligible_voters == 0 {
            return 0.0;
        }
        let pct = self.tokens_used as f64 / self.eligible_voters as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Creates campaigns, manages their options and moves them through their
/// lifecycle.
pub struct CampaignAdmin<R, V, B> {
    registry: Arc<R>,
    voters: Arc<V>,
    ballots: Arc<B>,
    keys: KeySettings,
}

impl<R, V, B> CampaignAdmin<R, V, B>
where
    R: CampaignRegistry,
    V: VoterDirectory,
    B: BallotStore,
{
    pub fn new(registry: Arc<R>, voters: Arc<V>, ballots: Arc<B>, keys: KeySettings) -> Self {
        CampaignAdmin {
            registry,
            voters,
            ballots,
            keys,
        }
    }

    /// New `Pending` campaign with a fresh key pair and a random salt.
    pub fn create_campaign(&self, title: &str, description: &str) -> Result<Campaign, CampaignError> {
        self.create_campaign_with_salt(title, description, Salt::generate())
    }

    pub fn create_campaign_with_salt(
        &self,
        title: &str,
        description: &str,
        salt: Salt,
    ) -> Result<Campaign, CampaignError> {
        let bounds = self.keys.bounds();
        let key_pair = generate_key_pair(&bounds.min, &bounds.max)?;
        let id = self.registry.next_campaign_id()?;
        let campaign = Campaign {
            id,
            title: title.to_string(),
            description: description.to_string(),
            status: CampaignStatus::Pending,
            salt,
            public_key: key_pair.public_key(),
            private_key: Some(key_pair.private_key()),
        };
        self.registry.insert_campaign(&campaign)?;
        info!(campaign = %id, modulus_bits = key_pair.modulus.bits(), "created campaign");
        Ok(campaign)
    }

    pub fn get(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        self.registry.get_campaign(id)?.ok_or(CampaignError::NotFound(id))
    }

    pub fn activate(&self, id: CampaignId) -> Result<(), CampaignError> {
        self.transition(id, CampaignStatus::Active)
    }

    pub fn close(&self, id: CampaignId) -> Result<(), CampaignError> {
        self.transition(id, CampaignStatus::Closed)
    }

    fn transition(&self, id: CampaignId, next: CampaignStatus) -> Result<(), CampaignError> {
        let current = self.get(id)?.status;
        if !current.can_transition_to(next) {
            return Err(CampaignError::InvalidTransition {
                id,
                from: current,
                to: next,
            });
        }
        if !self.registry.compare_and_set_status(id, current, next)? {
            return Err(CampaignError::StatusChanged { id, expected: current });
        }
        info!(campaign = %id, from = %current, to = %next, "campaign status changed");
        Ok(())
    }

    pub fn add_option(
        &self,
        campaign_id: CampaignId,
        label: &str,
        description: &str,
    ) -> Result<CampaignOption, CampaignError> {
        let option = self.registry.add_option(campaign_id, label, description)?;
        info!(campaign = %campaign_id, option = %option.id, "option added");
        Ok(option)
    }

    pub fn options(&self, campaign_id: CampaignId) -> Result<Vec<CampaignOption>, CampaignError> {
        self.get(campaign_id)?;
        Ok(self.registry.list_options(campaign_id)?)
    }

    /// Withdraws an option. Only a pending campaign's options can be removed.
    pub fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> Result<(), CampaignError> {
        if !self.registry.remove_option(campaign_id, option_id)? {
            return Err(CampaignError::OptionNotFound {
                campaign_id,
                option_id,
            });
        }
        info!(campaign = %campaign_id, option = %option_id, "option removed");
        Ok(())
    }

    pub fn stats(&self, id: CampaignId) -> Result<CampaignStats, CampaignError> {
        self.get(id)?;
        let mut stats = self.ballots.campaign_stats(id)?;
        stats.eligible_voters = self.voters.voter_count()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PRIME_BITS;
    use crate::mem_store::MemStore;

    fn admin() -> CampaignAdmin<MemStore, MemStore, MemStore> {
        let store = Arc::new(MemStore::new());
        CampaignAdmin::new(
            store.clone(),
            store.clone(),
            store,
            KeySettings {
                prime_bits: MIN_PRIME_BITS,
            },
        )
    }

    #[test]
    fn test_create_campaign() {
        let admin = admin();
        let first = admin.create_campaign("Board", "Pick a chair").expect("create failed");
        let second = admin.create_campaign("Budget", "").expect("create failed");
        assert_ne!(first.id, second.id);
        assert_eq!(first.status, CampaignStatus::Pending);
        assert_eq!(first.salt.as_str().len(), 64);
        assert_ne!(first.salt, second.salt);
        assert!(first.public_key.modulus.bits() >= 2 * MIN_PRIME_BITS - 1);
        assert!(first.private_key.is_some());
        assert_eq!(admin.get(first.id).expect("stored"), first);
    }

    #[test]
    fn test_imported_salt_kept() {
        let admin = admin();
        let c = admin
            .create_campaign_with_salt("t", "d", Salt::from("abc"))
            .expect("create failed");
        assert_eq!(admin.get(c.id).expect("stored").salt.as_str(), "abc");
    }

    #[test]
    fn test_lifecycle_is_monotonic() {
        let admin = admin();
        let id = admin.create_campaign("t", "d").expect("create failed").id;

        assert!(matches!(
            admin.close(id),
            Err(CampaignError::InvalidTransition { from: CampaignStatus::Pending, .. })
        ));
        admin.activate(id).expect("pending -> active");
        assert!(matches!(admin.activate(id), Err(CampaignError::InvalidTransition { .. })));
        admin.close(id).expect("active -> closed");
        assert!(matches!(admin.activate(id), Err(CampaignError::InvalidTransition { .. })));
        assert!(matches!(admin.close(id), Err(CampaignError::InvalidTransition { .. })));
        assert_eq!(admin.get(id).expect("stored").status, CampaignStatus::Closed);
    }

    #[test]
    fn test_unknown_campaign() {
        let admin = admin();
        assert!(matches!(admin.activate(CampaignId(99)), Err(CampaignError::NotFound(_))));
        assert!(matches!(admin.stats(CampaignId(99)), Err(CampaignError::NotFound(_))));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&CampaignStatus::Active).expect("serialize"), "\"active\"");
        assert_eq!(CampaignStatus::Closed.to_string(), "closed");
    }

    #[test]
    fn test_participation() {
        let stats = CampaignStats {
            tokens_issued: 3,
            tokens_used: 1,
            ballots_cast: 1,
            eligible_voters: 3,
        };
        assert_eq!(stats.participation(), 33.33);
        assert_eq!(CampaignStats { eligible_voters: 0, ..stats }.participation(), 0.0);
        assert_eq!(CampaignStats::default().participation(), 0.0);
    }

    #[test]
    fn test_stats_count_registered_voters() {
        let store = Arc::new(MemStore::new());
        let admin = CampaignAdmin::new(
            store.clone(),
            store.clone(),
            store.clone(),
            KeySettings {
                prime_bits: MIN_PRIME_BITS,
            },
        );
        let id = admin.create_campaign("t", "d").expect("create failed").id;
        assert_eq!(admin.stats(id).expect("stats").eligible_voters, 0);
        for voter in 1..=4 {
            store.register_voter(crate::ids::VoterId(voter)).expect("register voter");
        }
        let stats = admin.stats(id).expect("stats");
        assert_eq!(stats.eligible_voters, 4);
        assert_eq!(stats.participation(), 0.0);
    }

    #[test]
    fn test_options_listed_by_label() {
        let admin = admin();
        let id = admin.create_campaign("t", "d").expect("create failed").id;
        let yes = admin.add_option(id, "Yes", "").expect("add option");
        let abstain = admin.add_option(id, "Abstain", "no opinion").expect("add option");
        assert_ne!(yes.id, abstain.id);
        assert_eq!(yes.campaign_id, id);
        assert_eq!(admin.options(id).expect("list"), vec![abstain, yes]);
        assert!(matches!(
            admin.add_option(CampaignId(99), "x", ""),
            Err(CampaignError::NotFound(CampaignId(99)))
        ));
        assert!(matches!(admin.options(CampaignId(99)), Err(CampaignError::NotFound(_))));
    }

    #[test]
    fn test_option_removal_locked_once_active() {
        let admin = admin();
        let id = admin.create_campaign("t", "d").expect("create failed").id;
        let dropped = admin.add_option(id, "Dropped", "").expect("add option");
        let kept = admin.add_option(id, "Kept", "").expect("add option");
        admin.remove_option(id, dropped.id).expect("pending campaign allows removal");
        assert!(matches!(
            admin.remove_option(id, dropped.id),
            Err(CampaignError::OptionNotFound { .. })
        ));

        admin.activate(id).expect("pending -> active");
        assert!(matches!(
            admin.remove_option(id, kept.id),
            Err(CampaignError::OptionsLocked { status: CampaignStatus::Active, .. })
        ));
        let late = admin.add_option(id, "Late", "").expect("active campaign still takes options");

        admin.close(id).expect("active -> closed");
        assert!(matches!(
            admin.remove_option(id, kept.id),
            Err(CampaignError::OptionsLocked { status: CampaignStatus::Closed, .. })
        ));
        assert!(matches!(
            admin.add_option(id, "Too late", ""),
            Err(CampaignError::OptionsLocked { status: CampaignStatus::Closed, .. })
        ));
        assert_eq!(admin.options(id).expect("list"), vec![kept, late]);
    }

    #[test]
    fn test_option_ids_are_scoped_to_campaign() {
        let admin = admin();
        let first = admin.create_campaign("a", "").expect("create failed").id;
        let second = admin.create_campaign("b", "").expect("create failed").id;
        let option = admin.add_option(first, "Yes", "").expect("add option");
        assert!(matches!(
            admin.remove_option(second, option.id),
            Err(CampaignError::OptionNotFound { .. })
        ));
        assert_eq!(admin.options(first).expect("list"), vec![option]);
    }

    #[test]
    fn test_status_option_rules() {
        assert!(CampaignStatus::Pending.accepts_new_options());
        assert!(CampaignStatus::Active.accepts_new_options());
        assert!(!CampaignStatus::Closed.accepts_new_options());
        assert!(CampaignStatus::Pending.allows_option_removal());
        assert!(!CampaignStatus::Active.allows_option_removal());
        assert!(!CampaignStatus::Closed.allows_option_removal());
    }
}
