//! Persistent store on redb.
//!
//! Rows are JSON-encoded. redb admits one write transaction at a time, so
//! every read-modify-write below (id allocation, status compare-and-set,
//! option edits, token upsert, ballot recording, tally commit) is atomic with
//! respect to every other writer. Writes gated on a campaign's status read
//! that status inside their own transaction.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::campaign::{Campaign, CampaignOption, CampaignStats, CampaignStatus};
use crate::ids::{CampaignId, OptionId, VoterId};
use crate::store::{
    accepts_ballots, check_record_state, Ballot, BallotStore, CampaignRegistry, RecordOutcome, StoreError,
    StoreResult, TokenRecord, VoterDirectory,
};
use crate::tally::Tally;
use crate::token::TokenFingerprint;

/// Campaign records by id
const CAMPAIGNS: TableDefinition<u64, &[u8]> = TableDefinition::new("campaigns");

/// Ballot options by (campaign id, option id)
const OPTIONS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("options");

/// Registered voter ids
const VOTERS: TableDefinition<u64, ()> = TableDefinition::new("voters");

/// Token records by fingerprint
const TOKENS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tokens");

/// Ballots by (campaign id, fingerprint)
const BALLOTS: TableDefinition<(u64, &[u8]), &[u8]> = TableDefinition::new("ballots");

/// Committed tallies by campaign id
const TALLIES: TableDefinition<u64, &[u8]> = TableDefinition::new("tallies");

/// Counters
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const LAST_CAMPAIGN_ID: &str = "last_campaign_id";
const LAST_OPTION_ID: &str = "last_option_id";

const FINGERPRINT_MIN: [u8; 32] = [0u8; 32];
const FINGERPRINT_MAX: [u8; 32] = [0xffu8; 32];

macro_rules! database_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for StoreError {
                fn from(e: $err) -> Self {
                    StoreError::Database(e.to_string())
                }
            }
        )*
    };
}

database_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

fn campaign_row<T>(campaigns: &T, id: CampaignId) -> StoreResult<Option<Campaign>>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    let result = match campaigns.get(id.0)? {
        Some(data) => Some(serde_json::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = Database::create(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CAMPAIGNS)?;
            let _ = write_txn.open_table(OPTIONS)?;
            let _ = write_txn.open_table(VOTERS)?;
            let _ = write_txn.open_table(TOKENS)?;
            let _ = write_txn.open_table(BALLOTS)?;
            let _ = write_txn.open_table(TALLIES)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;
        debug!(path = %path.as_ref().display(), "opened ballot database");
        Ok(Self { db })
    }

    pub fn register_voter(&self, voter_id: VoterId) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut voters = write_txn.open_table(VOTERS)?;
            voters.insert(voter_id.0, ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Reads a campaign, applies `update` and writes it back in one transaction.
    fn update_campaign<F>(&self, id: CampaignId, update: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut Campaign) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        let changed = {
            let mut campaigns = write_txn.open_table(CAMPAIGNS)?;
            let mut campaign = campaign_row(&campaigns, id)?.ok_or(StoreError::CampaignNotFound(id))?;
            let changed = update(&mut campaign);
            if changed {
                let encoded = serde_json::to_vec(&campaign)?;
                campaigns.insert(id.0, encoded.as_slice())?;
            }
            changed
        };
        if changed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(changed)
    }
}

impl CampaignRegistry for RedbStore {
    fn next_campaign_id(&self) -> StoreResult<CampaignId> {
        let write_txn = self.db.begin_write()?;
        let next = {
            let mut meta = write_txn.open_table(META)?;
            let last = meta.get(LAST_CAMPAIGN_ID)?.map(|v| v.value()).unwrap_or(0);
            let next = last + 1;
            meta.insert(LAST_CAMPAIGN_ID, next)?;
            next
        };
        write_txn.commit()?;
        Ok(CampaignId(next))
    }

    fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        let encoded = serde_json::to_vec(campaign)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut campaigns = write_txn.open_table(CAMPAIGNS)?;
            if campaigns.get(campaign.id.0)?.is_some() {
                return Err(StoreError::DuplicateCampaign(campaign.id));
            }
            campaigns.insert(campaign.id.0, encoded.as_slice())?;

            let mut meta = write_txn.open_table(META)?;
            let last = meta.get(LAST_CAMPAIGN_ID)?.map(|v| v.value()).unwrap_or(0);
            if campaign.id.0 > last {
                meta.insert(LAST_CAMPAIGN_ID, campaign.id.0)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_campaign(&self, id: CampaignId) -> StoreResult<Option<Campaign>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CAMPAIGNS)?;
        campaign_row(&table, id)
    }

    fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
    ) -> StoreResult<bool> {
        self.update_campaign(id, |campaign| {
            if campaign.status != expected {
                return false;
            }
            campaign.status = next;
            true
        })
    }

    fn discard_private_key(&self, id: CampaignId) -> StoreResult<()> {
        self.update_campaign(id, |campaign| campaign.private_key.take().is_some())?;
        Ok(())
    }

    fn add_option(&self, campaign_id: CampaignId, label: &str, description: &str) -> StoreResult<CampaignOption> {
        let write_txn = self.db.begin_write()?;
        let option = {
            let campaigns = write_txn.open_table(CAMPAIGNS)?;
            let status = campaign_row(&campaigns, campaign_id)?
                .ok_or(StoreError::CampaignNotFound(campaign_id))?
                .status;
            if !status.accepts_new_options() {
                return Err(StoreError::OptionsLocked { id: campaign_id, status });
            }

            let mut meta = write_txn.open_table(META)?;
            let next = meta.get(LAST_OPTION_ID)?.map(|v| v.value()).unwrap_or(0) + 1;
            meta.insert(LAST_OPTION_ID, next)?;

            let option = CampaignOption {
                id: OptionId(next),
                campaign_id,
                label: label.to_string(),
                description: description.to_string(),
            };
            let encoded = serde_json::to_vec(&option)?;
            let mut options = write_txn.open_table(OPTIONS)?;
            options.insert((campaign_id.0, next), encoded.as_slice())?;
            option
        };
        write_txn.commit()?;
        Ok(option)
    }

    fn list_options(&self, campaign_id: CampaignId) -> StoreResult<Vec<CampaignOption>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OPTIONS)?;
        let mut options: Vec<CampaignOption> = Vec::new();
        for item in table.range((campaign_id.0, 0)..=(campaign_id.0, u64::MAX))? {
            let (_, data) = item?;
            options.push(serde_json::from_slice(data.value())?);
        }
        options.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
        Ok(options)
    }

    fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let campaigns = write_txn.open_table(CAMPAIGNS)?;
            let status = campaign_row(&campaigns, campaign_id)?
                .ok_or(StoreError::CampaignNotFound(campaign_id))?
                .status;
            if !status.allows_option_removal() {
                return Err(StoreError::OptionsLocked { id: campaign_id, status });
            }
            let mut options = write_txn.open_table(OPTIONS)?;
            let removed = options.remove((campaign_id.0, option_id.0))?.is_some();
            removed
        };
        if removed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(removed)
    }
}

impl VoterDirectory for RedbStore {
    fn voter_exists(&self, voter_id: VoterId) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VOTERS)?;
        let exists = table.get(voter_id.0)?.is_some();
        Ok(exists)
    }

    fn voter_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VOTERS)?;
        let mut count = 0u64;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl BallotStore for RedbStore {
    fn put_ballot(&self, ballot: &Ballot) -> StoreResult<()> {
        let encoded = serde_json::to_vec(ballot)?;
        let key = (ballot.campaign_id.0, &ballot.fingerprint.0[..]);
        let write_txn = self.db.begin_write()?;
        {
            let mut ballots = write_txn.open_table(BALLOTS)?;
            if ballots.get(key)?.is_some() {
                return Err(StoreError::DuplicateBallot(ballot.campaign_id, ballot.fingerprint));
            }
            ballots.insert(key, encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_ballots(&self, campaign_id: CampaignId) -> StoreResult<Vec<Ballot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BALLOTS)?;
        let range = table.range(
            (campaign_id.0, &FINGERPRINT_MIN[..])..=(campaign_id.0, &FINGERPRINT_MAX[..]),
        )?;
        let mut ballots = Vec::new();
        for item in range {
            let (_, data) = item?;
            ballots.push(serde_json::from_slice(data.value())?);
        }
        Ok(ballots)
    }

    fn get_token_record(&self, fingerprint: &TokenFingerprint) -> StoreResult<Option<TokenRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;
        let result = match table.get(&fingerprint.0[..])? {
            Some(data) => Some(serde_json::from_slice(data.value())?),
            None => None,
        };
        Ok(result)
    }

    fn upsert_token_record(&self, record: &TokenRecord) -> StoreResult<TokenRecord> {
        let write_txn = self.db.begin_write()?;
        let existing: Option<TokenRecord> = {
            let campaigns = write_txn.open_table(CAMPAIGNS)?;
            if !accepts_ballots(campaign_row(&campaigns, record.campaign_id)?.as_ref()) {
                return Err(StoreError::CampaignNotActive(record.campaign_id));
            }
            let mut tokens = write_txn.open_table(TOKENS)?;
            let existing = match tokens.get(&record.fingerprint.0[..])? {
                Some(data) => Some(serde_json::from_slice(data.value())?),
                None => None,
            };
            if existing.is_none() {
                let encoded = serde_json::to_vec(record)?;
                tokens.insert(&record.fingerprint.0[..], encoded.as_slice())?;
            }
            existing
        };
        match existing {
            Some(stored) => {
                write_txn.abort()?;
                Ok(stored)
            }
            None => {
                write_txn.commit()?;
                Ok(record.clone())
            }
        }
    }

    fn record_ballot(&self, ballot: &Ballot) -> StoreResult<RecordOutcome> {
        let fp = &ballot.fingerprint.0[..];
        let key = (ballot.campaign_id.0, fp);
        let encoded = serde_json::to_vec(ballot)?;
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let campaigns = write_txn.open_table(CAMPAIGNS)?;
            let mut tokens = write_txn.open_table(TOKENS)?;
            let mut ballots = write_txn.open_table(BALLOTS)?;
            let record: Option<TokenRecord> = match tokens.get(fp)? {
                Some(data) => Some(serde_json::from_slice(data.value())?),
                None => None,
            };
            let exists = ballots.get(key)?.is_some();
            let mut outcome = check_record_state(record.as_ref(), ballot, exists)?;
            if outcome.is_none() && !accepts_ballots(campaign_row(&campaigns, ballot.campaign_id)?.as_ref()) {
                outcome = Some(RecordOutcome::CampaignNotActive);
            }
            if let (None, Some(mut record)) = (outcome, record) {
                record.used = true;
                let flipped = serde_json::to_vec(&record)?;
                ballots.insert(key, encoded.as_slice())?;
                tokens.insert(fp, flipped.as_slice())?;
            }
            outcome
        };
        match outcome {
            Some(outcome) => {
                write_txn.abort()?;
                Ok(outcome)
            }
            None => {
                write_txn.commit()?;
                Ok(RecordOutcome::Recorded)
            }
        }
    }

    fn put_tally_result(&self, tally: &Tally) -> StoreResult<Tally> {
        let write_txn = self.db.begin_write()?;
        let existing: Option<Tally> = {
            let mut tallies = write_txn.open_table(TALLIES)?;
            let existing = match tallies.get(tally.campaign_id.0)? {
                Some(data) => Some(serde_json::from_slice(data.value())?),
                None => None,
            };
            if existing.is_none() {
                let encoded = serde_json::to_vec(tally)?;
                tallies.insert(tally.campaign_id.0, encoded.as_slice())?;
            }
            existing
        };
        match existing {
            Some(committed) => {
                write_txn.abort()?;
                Ok(committed)
            }
            None => {
                write_txn.commit()?;
                Ok(tally.clone())
            }
        }
    }

    fn get_tally_result(&self, campaign_id: CampaignId) -> StoreResult<Option<Tally>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TALLIES)?;
        let result = match table.get(campaign_id.0)? {
            Some(data) => Some(serde_json::from_slice(data.value())?),
            None => None,
        };
        Ok(result)
    }

    fn campaign_stats(&self, campaign_id: CampaignId) -> StoreResult<CampaignStats> {
        let read_txn = self.db.begin_read()?;
        let mut stats = CampaignStats::default();

        let tokens = read_txn.open_table(TOKENS)?;
        for item in tokens.iter()? {
            let (_, data) = item?;
            let record: TokenRecord = serde_json::from_slice(data.value())?;
            if record.campaign_id == campaign_id {
                stats.tokens_issued += 1;
                if record.used {
                    stats.tokens_used += 1;
                }
            }
        }

        let ballots = read_txn.open_table(BALLOTS)?;
        for item in ballots.range(
            (campaign_id.0, &FINGERPRINT_MIN[..])..=(campaign_id.0, &FINGERPRINT_MAX[..]),
        )? {
            item?;
            stats.ballots_cast += 1;
        }
        Ok(stats)
    }
}
