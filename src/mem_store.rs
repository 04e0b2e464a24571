//! In-memory store.
//!
//! All tables sit behind one `RwLock`, so every write, including the
//! ballot-insert-and-token-flip and the campaign status check guarding it, is
//! applied under a single exclusive guard.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::campaign::{Campaign, CampaignOption, CampaignStats, CampaignStatus};
use crate::ids::{CampaignId, OptionId, VoterId};
use crate::store::{
    accepts_ballots, check_record_state, Ballot, BallotStore, CampaignRegistry, RecordOutcome, StoreError,
    StoreResult, TokenRecord, VoterDirectory,
};
use crate::tally::Tally;
use crate::token::TokenFingerprint;

#[derive(Default)]
struct Tables {
    last_campaign_id: u64,
    last_option_id: u64,
    campaigns: BTreeMap<CampaignId, Campaign>,
    options: BTreeMap<(CampaignId, OptionId), CampaignOption>,
    voters: BTreeSet<VoterId>,
    tokens: HashMap<TokenFingerprint, TokenRecord>,
    ballots: BTreeMap<(CampaignId, TokenFingerprint), Ballot>,
    tallies: BTreeMap<CampaignId, Tally>,
}

/// Every ballot key of one campaign.
fn campaign_range(
    campaign_id: CampaignId,
) -> std::ops::RangeInclusive<(CampaignId, TokenFingerprint)> {
    (campaign_id, TokenFingerprint([0u8; 32]))..=(campaign_id, TokenFingerprint([0xffu8; 32]))
}

#[derive(Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_voter(&self, voter_id: VoterId) -> StoreResult<()> {
        self.write()?.voters.insert(voter_id);
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl CampaignRegistry for MemStore {
    fn next_campaign_id(&self) -> StoreResult<CampaignId> {
        let mut tables = self.write()?;
        tables.last_campaign_id += 1;
        Ok(CampaignId(tables.last_campaign_id))
    }

    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::DuplicateCampaign(campaign.id));
        }
        tables.last_campaign_id = tables.last_campaign_id.max(campaign.id.0);
        tables.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn get_campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>> {
        Ok(self.read()?.campaigns.get(&id).cloned())
    }

    fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;
        if campaign.status != expected {
            return Ok(false);
        }
        campaign.status = next;
        Ok(true)
    }

    fn discard_private_key(&self, id: CampaignId) -> StoreResult<()> {
        let mut tables = self.write()?;
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;
        campaign.private_key = None;
        Ok(())
    }

    fn add_option(&self, campaign_id: CampaignId, label: &str, description: &str) -> StoreResult<CampaignOption> {
        let mut tables = self.write()?;
        let status = tables
            .campaigns
            .get(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?
            .status;
        if !status.accepts_new_options() {
            return Err(StoreError::OptionsLocked { id: campaign_id, status });
        }
        tables.last_option_id += 1;
        let option = CampaignOption {
            id: OptionId(tables.last_option_id),
            campaign_id,
            label: label.to_string(),
            description: description.to_string(),
        };
        tables.options.insert((campaign_id, option.id), option.clone());
        Ok(option)
    }

    fn list_options(&self, campaign_id: CampaignId) -> StoreResult<Vec<CampaignOption>> {
        let tables = self.read()?;
        let mut options: Vec<CampaignOption> = tables
            .options
            .range((campaign_id, OptionId(0))..=(campaign_id, OptionId(u64::MAX)))
            .map(|(_, o)| o.clone())
            .collect();
        options.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
        Ok(options)
    }

    fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let status = tables
            .campaigns
            .get(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?
            .status;
        if !status.allows_option_removal() {
            return Err(StoreError::OptionsLocked { id: campaign_id, status });
        }
        Ok(tables.options.remove(&(campaign_id, option_id)).is_some())
    }
}

impl VoterDirectory for MemStore {
    fn voter_exists(&self, voter_id: VoterId) -> StoreResult<bool> {
        Ok(self.read()?.voters.contains(&voter_id))
    }

    fn voter_count(&self) -> StoreResult<u64> {
        Ok(self.read()?.voters.len() as u64)
    }
}

impl BallotStore for MemStore {
    fn put_ballot(&self, ballot: &Ballot) -> StoreResult<()> {
        let mut tables = self.write()?;
        let key = (ballot.campaign_id, ballot.fingerprint);
        if tables.ballots.contains_key(&key) {
            return Err(StoreError::DuplicateBallot(ballot.campaign_id, ballot.fingerprint));
        }
        tables.ballots.insert(key, ballot.clone());
        Ok(())
    }

    fn list_ballots(&self, campaign_id: CampaignId) -> StoreResult<Vec<Ballot>> {
        let tables = self.read()?;
        Ok(tables
            .ballots
            .range(campaign_range(campaign_id))
            .map(|(_, b)| b.clone())
            .collect())
    }

    fn get_token_record(&self, fingerprint: &TokenFingerprint) -> StoreResult<Option<TokenRecord>> {
        Ok(self.read()?.tokens.get(fingerprint).cloned())
    }

    fn upsert_token_record(&self, record: &TokenRecord) -> StoreResult<TokenRecord> {
        let mut tables = self.write()?;
        if !accepts_ballots(tables.campaigns.get(&record.campaign_id)) {
            return Err(StoreError::CampaignNotActive(record.campaign_id));
        }
        Ok(tables
            .tokens
            .entry(record.fingerprint)
            .or_insert_with(|| record.clone())
            .clone())
    }

    fn record_ballot(&self, ballot: &Ballot) -> StoreResult<RecordOutcome> {
        let mut tables = self.write()?;
        let key = (ballot.campaign_id, ballot.fingerprint);
        let exists = tables.ballots.contains_key(&key);
        if let Some(outcome) = check_record_state(tables.tokens.get(&ballot.fingerprint), ballot, exists)? {
            return Ok(outcome);
        }
        if !accepts_ballots(tables.campaigns.get(&ballot.campaign_id)) {
            return Ok(RecordOutcome::CampaignNotActive);
        }
        tables.ballots.insert(key, ballot.clone());
        if let Some(record) = tables.tokens.get_mut(&ballot.fingerprint) {
            record.used = true;
        }
        Ok(RecordOutcome::Recorded)
    }

    fn put_tally_result(&self, tally: &Tally) -> StoreResult<Tally> {
        let mut tables = self.write()?;
        Ok(tables
            .tallies
            .entry(tally.campaign_id)
            .or_insert_with(|| tally.clone())
            .clone())
    }

    fn get_tally_result(&self, campaign_id: CampaignId) -> StoreResult<Option<Tally>> {
        Ok(self.read()?.tallies.get(&campaign_id).cloned())
    }

    fn campaign_stats(&self, campaign_id: CampaignId) -> StoreResult<CampaignStats> {
        let tables = self.read()?;
        let mut stats = CampaignStats::default();
        for record in tables.tokens.values().filter(|r| r.campaign_id == campaign_id) {
            stats.tokens_issued += 1;
            if record.used {
                stats.tokens_used += 1;
            }
        }
        stats.ballots_cast = tables
            .ballots
            .range(campaign_range(campaign_id))
            .count() as u64;
        Ok(stats)
    }
}
