//! Decrypting and counting a campaign's ballots.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::campaign::{CampaignOption, CampaignStatus};
use crate::codec::{decode, CodecError};
use crate::config::TallySettings;
use crate::ids::{CampaignId, OptionId};
use crate::priv_key::PrivateKey;
use crate::store::{BallotStore, CampaignRegistry, StoreError};

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),
    #[error("private key of campaign {0} has been discarded")]
    PrivateKeyUnavailable(CampaignId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyRow {
    pub campaign_id: CampaignId,
    pub option_id: OptionId,
    pub count: u64,
    /// Label of the option, if the campaign lists it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Result of a campaign. Rows are ordered by descending count, ties broken
/// by ascending option id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub campaign_id: CampaignId,
    pub rows: Vec<TallyRow>,
    /// Ballots that decoded to a vote.
    pub counted: u64,
    /// Ballots skipped because they failed to decode.
    pub malformed: u64,
    /// Counted before the campaign closed. Never committed.
    #[serde(default)]
    pub provisional: bool,
}

impl Tally {
    pub fn from_counts(campaign_id: CampaignId, counts: BTreeMap<OptionId, u64>, malformed: u64) -> Self {
        let counted = counts.values().sum();
        let mut rows: Vec<TallyRow> = counts
            .into_iter()
            .map(|(option_id, count)| TallyRow {
                campaign_id,
                option_id,
                count,
                label: None,
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.option_id.cmp(&b.option_id)));
        Tally {
            campaign_id,
            rows,
            counted,
            malformed,
            provisional: false,
        }
    }

    /// Fills in row labels from the campaign's option list. Votes for ids
    /// the list does not contain keep no label.
    pub fn with_labels(mut self, options: &[CampaignOption]) -> Self {
        for row in &mut self.rows {
            row.label = options
                .iter()
                .find(|o| o.id == row.option_id && o.campaign_id == row.campaign_id)
                .map(|o| o.label.clone());
        }
        self
    }

    pub fn count_for(&self, option_id: OptionId) -> u64 {
        self.rows
            .iter()
            .find(|r| r.option_id == option_id)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    pub fn as_map(&self) -> BTreeMap<OptionId, u64> {
        self.rows.iter().map(|r| (r.option_id, r.count)).collect()
    }
}

pub struct TallyEngine<R, B> {
    registry: Arc<R>,
    ballots: Arc<B>,
    settings: TallySettings,
}

impl<R, B> TallyEngine<R, B>
where
    R: CampaignRegistry,
    B: BallotStore,
{
    pub fn new(registry: Arc<R>, ballots: Arc<B>, settings: TallySettings) -> Self {
        TallyEngine {
            registry,
            ballots,
            settings,
        }
    }

    /// Decrypts every ballot of the campaign and commits the per-option counts.
    ///
    /// A closed campaign is tallied once: later calls, including concurrent
    /// ones that lose the commit, return the committed result unchanged. A
    /// campaign that is not closed yet gets a provisional tally that is
    /// neither committed nor followed by a key discard. Ballots that do not
    /// decode are left out of the counts and reported in [`Tally::malformed`].
    pub fn tally(&self, campaign_id: CampaignId) -> Result<Tally, TallyError> {
        let campaign = self
            .registry
            .get_campaign(campaign_id)?
            .ok_or(TallyError::CampaignNotFound(campaign_id))?;

        if let Some(committed) = self.ballots.get_tally_result(campaign_id)? {
            if self.settings.discard_private_key && campaign.private_key.is_some() {
                self.discard_private_key(campaign_id);
            }
            return Ok(committed);
        }

        let private_key = campaign
            .private_key
            .ok_or(TallyError::PrivateKeyUnavailable(campaign_id))?;
        let options = self.registry.list_options(campaign_id)?;
        let mut tally = self.count(campaign_id, &private_key)?.with_labels(&options);
        drop(private_key);

        if campaign.status != CampaignStatus::Closed {
            warn!(
                campaign = %campaign_id,
                status = %campaign.status,
                counted = tally.counted,
                "campaign is not closed, returning a provisional tally"
            );
            tally.provisional = true;
            return Ok(tally);
        }

        let committed = self.ballots.put_tally_result(&tally)?;
        info!(
            campaign = %campaign_id,
            counted = committed.counted,
            malformed = committed.malformed,
            "tally committed"
        );

        if self.settings.discard_private_key {
            self.discard_private_key(campaign_id);
        }
        Ok(committed)
    }

    /// Failure leaves the committed tally in place; the next call retries.
    fn discard_private_key(&self, campaign_id: CampaignId) {
        match self.registry.discard_private_key(campaign_id) {
            Ok(()) => info!(campaign = %campaign_id, "private key discarded"),
            Err(e) => error!(campaign = %campaign_id, "failed to discard private key: {}", e),
        }
    }

    fn count(&self, campaign_id: CampaignId, private_key: &PrivateKey) -> Result<Tally, TallyError> {
        let mut counts: BTreeMap<OptionId, u64> = BTreeMap::new();
        let mut malformed = 0u64;
        for ballot in self.ballots.list_ballots(campaign_id)? {
            let decoded = decode(&ballot.ciphertext, private_key).and_then(|payload| {
                if payload.fingerprint == ballot.fingerprint {
                    Ok(payload)
                } else {
                    Err(CodecError::DecodeMismatch(format!(
                        "ballot carries fingerprint {} but is stored under {}",
                        payload.fingerprint, ballot.fingerprint
                    )))
                }
            });
            match decoded {
                Ok(payload) => *counts.entry(payload.option_id).or_insert(0) += 1,
                Err(e) => {
                    warn!(campaign = %campaign_id, fingerprint = %ballot.fingerprint, "skipping ballot: {}", e);
                    malformed += 1;
                }
            }
        }
        Ok(Tally::from_counts(campaign_id, counts, malformed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Campaign;
    use crate::codec::encode;
    use crate::config::MIN_PRIME_BITS;
    use crate::keygen::{generate_key_pair, KeyBounds, KeyPair};
    use crate::mem_store::MemStore;
    use crate::store::{Ballot, StoreResult};
    use crate::token::{Salt, TokenFingerprint};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;

    fn test_key() -> &'static KeyPair {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        KEY.get_or_init(|| {
            let bounds = KeyBounds::for_prime_bits(MIN_PRIME_BITS);
            generate_key_pair(&bounds.min, &bounds.max).expect("key generation failed")
        })
    }

    /// Store holding campaign 1 in `status` with one ballot per option given.
    fn store_with_ballots(status: CampaignStatus, options: &[u64]) -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        let kp = test_key();
        store
            .insert_campaign(&Campaign {
                id: CampaignId(1),
                title: "t".to_string(),
                description: String::new(),
                status,
                salt: Salt::from("abc"),
                public_key: kp.public_key(),
                private_key: Some(kp.private_key()),
            })
            .expect("insert campaign");
        for (n, option) in options.iter().enumerate() {
            cast(&store, n as u8, *option);
        }
        store
    }

    fn cast(store: &MemStore, n: u8, option: u64) {
        let fp = TokenFingerprint([n; 32]);
        store
            .put_ballot(&Ballot {
                campaign_id: CampaignId(1),
                ciphertext: encode(OptionId(option), fp, &test_key().public_key()).expect("encode"),
                fingerprint: fp,
            })
            .expect("insert ballot");
    }

    /// Registry whose key discard fails while `failing` is set.
    struct FailingDiscard {
        inner: Arc<MemStore>,
        failing: AtomicBool,
    }

    impl CampaignRegistry for FailingDiscard {
        fn next_campaign_id(&self) -> StoreResult<CampaignId> {
            self.inner.next_campaign_id()
        }

        fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
            self.inner.insert_campaign(campaign)
        }

        fn get_campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>> {
            self.inner.get_campaign(id)
        }

        fn compare_and_set_status(
            &self,
            id: CampaignId,
            expected: CampaignStatus,
            next: CampaignStatus,
        ) -> StoreResult<bool> {
            self.inner.compare_and_set_status(id, expected, next)
        }

        fn discard_private_key(&self, id: CampaignId) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Database("disk full".to_string()));
            }
            self.inner.discard_private_key(id)
        }

        fn add_option(
            &self,
            campaign_id: CampaignId,
            label: &str,
            description: &str,
        ) -> StoreResult<CampaignOption> {
            self.inner.add_option(campaign_id, label, description)
        }

        fn list_options(&self, campaign_id: CampaignId) -> StoreResult<Vec<CampaignOption>> {
            self.inner.list_options(campaign_id)
        }

        fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> StoreResult<bool> {
            self.inner.remove_option(campaign_id, option_id)
        }
    }

    #[test]
    fn test_rows_ordered_by_count_then_option() {
        let counts = BTreeMap::from([
            (OptionId(3), 1),
            (OptionId(1), 4),
            (OptionId(2), 1),
            (OptionId(9), 4),
        ]);
        let tally = Tally::from_counts(CampaignId(1), counts, 2);
        let order: Vec<(u64, u64)> = tally.rows.iter().map(|r| (r.option_id.0, r.count)).collect();
        assert_eq!(order, vec![(1, 4), (9, 4), (2, 1), (3, 1)]);
        assert_eq!(tally.counted, 10);
        assert_eq!(tally.malformed, 2);
        assert!(tally.rows.iter().all(|r| r.campaign_id == CampaignId(1)));
    }

    #[test]
    fn test_lookup_helpers() {
        let tally = Tally::from_counts(CampaignId(1), BTreeMap::from([(OptionId(7), 1)]), 0);
        assert_eq!(tally.count_for(OptionId(7)), 1);
        assert_eq!(tally.count_for(OptionId(8)), 0);
        assert_eq!(tally.as_map(), BTreeMap::from([(OptionId(7), 1)]));
    }

    #[test]
    fn test_empty_tally() {
        let tally = Tally::from_counts(CampaignId(4), BTreeMap::new(), 0);
        assert!(tally.rows.is_empty());
        assert_eq!(tally.counted, 0);
    }

    #[test]
    fn test_labels_resolved_from_options() {
        let option = |id: u64, label: &str| CampaignOption {
            id: OptionId(id),
            campaign_id: CampaignId(1),
            label: label.to_string(),
            description: String::new(),
        };
        let tally = Tally::from_counts(CampaignId(1), BTreeMap::from([(OptionId(1), 2), (OptionId(5), 1)]), 0)
            .with_labels(&[option(1, "Yes"), option(2, "No")]);
        assert_eq!(tally.rows[0].label.as_deref(), Some("Yes"));
        assert_eq!(tally.rows[1].label, None);

        let json = serde_json::to_string(&tally).expect("serialize");
        let back: Tally = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, tally);
    }

    #[test]
    fn test_open_campaign_tally_is_provisional() {
        let store = store_with_ballots(CampaignStatus::Active, &[1]);
        let engine = TallyEngine::new(
            store.clone(),
            store.clone(),
            TallySettings {
                discard_private_key: true,
            },
        );

        let early = engine.tally(CampaignId(1)).expect("provisional tally");
        assert!(early.provisional);
        assert_eq!(early.as_map(), BTreeMap::from([(OptionId(1), 1)]));
        assert_eq!(store.get_tally_result(CampaignId(1)).expect("lookup"), None);
        assert!(store.get_campaign(CampaignId(1)).expect("lookup").expect("exists").private_key.is_some());

        cast(&store, 9, 2);
        store
            .compare_and_set_status(CampaignId(1), CampaignStatus::Active, CampaignStatus::Closed)
            .expect("cas");
        let last = engine.tally(CampaignId(1)).expect("final tally");
        assert!(!last.provisional);
        assert_eq!(last.counted, 2);
        assert_eq!(last.as_map(), BTreeMap::from([(OptionId(1), 1), (OptionId(2), 1)]));
        assert_eq!(store.get_tally_result(CampaignId(1)).expect("lookup"), Some(last));
    }

    #[test]
    fn test_discard_failure_keeps_committed_tally() {
        let store = store_with_ballots(CampaignStatus::Closed, &[3, 3]);
        let registry = Arc::new(FailingDiscard {
            inner: store.clone(),
            failing: AtomicBool::new(true),
        });
        let engine = TallyEngine::new(
            registry.clone(),
            store.clone(),
            TallySettings {
                discard_private_key: true,
            },
        );

        let tally = engine.tally(CampaignId(1)).expect("committed despite discard failure");
        assert_eq!(tally.count_for(OptionId(3)), 2);
        assert_eq!(store.get_tally_result(CampaignId(1)).expect("lookup"), Some(tally.clone()));
        assert!(store.get_campaign(CampaignId(1)).expect("lookup").expect("exists").private_key.is_some());

        registry.failing.store(false, Ordering::SeqCst);
        assert_eq!(engine.tally(CampaignId(1)).expect("committed tally"), tally);
        assert!(store.get_campaign(CampaignId(1)).expect("lookup").expect("exists").private_key.is_none());
    }
}
