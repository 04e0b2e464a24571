//! Async façade over the blocking core.
//!
//! Key generation, encryption and tallying are CPU-bound and the stores block
//! on locks or disk, so every call is moved onto tokio's blocking pool.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::{spawn_blocking, JoinError};

use crate::campaign::{Campaign, CampaignAdmin, CampaignError, CampaignOption, CampaignStats};
use crate::config::Config;
use crate::ids::{CampaignId, OptionId, VoterId};
use crate::redb_store::RedbStore;
use crate::register::{BallotError, BallotRegister};
use crate::store::{Ballot, BallotStore, CampaignRegistry, StoreError, VoterDirectory};
use crate::tally::{Tally, TallyEngine, TallyError};
use crate::token::{Salt, Token};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Campaign(#[from] CampaignError),
    #[error(transparent)]
    Ballot(#[from] BallotError),
    #[error(transparent)]
    Tally(#[from] TallyError),
    #[error("blocking task failed: {0}")]
    Task(#[from] JoinError),
}

async fn run_blocking<T, E, F>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ServiceError> + Send + 'static,
{
    spawn_blocking(f).await?.map_err(Into::into)
}

/// Campaign administration, ballot registration and tallying over one store.
pub struct VotingService<S> {
    store: Arc<S>,
    admin: Arc<CampaignAdmin<S, S, S>>,
    register: Arc<BallotRegister<S, S, S>>,
    tally: Arc<TallyEngine<S, S>>,
}

impl<S> Clone for VotingService<S> {
    fn clone(&self) -> Self {
        VotingService {
            store: self.store.clone(),
            admin: self.admin.clone(),
            register: self.register.clone(),
            tally: self.tally.clone(),
        }
    }
}

impl VotingService<RedbStore> {
    /// Opens the database named by `config.storage.path`.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let store = Arc::new(RedbStore::open(&config.storage.path)?);
        Ok(Self::new(store, config))
    }
}

impl<S> VotingService<S>
where
    S: CampaignRegistry + VoterDirectory + BallotStore + 'static,
{
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        VotingService {
            admin: Arc::new(CampaignAdmin::new(
                store.clone(),
                store.clone(),
                store.clone(),
                config.keys.clone(),
            )),
            register: Arc::new(BallotRegister::new(store.clone(), store.clone(), store.clone())),
            tally: Arc::new(TallyEngine::new(store.clone(), store.clone(), config.tally.clone())),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_campaign(&self, title: String, description: String) -> Result<Campaign, ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.create_campaign(&title, &description)).await
    }

    pub async fn create_campaign_with_salt(
        &self,
        title: String,
        description: String,
        salt: Salt,
    ) -> Result<Campaign, ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.create_campaign_with_salt(&title, &description, salt)).await
    }

    pub async fn activate(&self, id: CampaignId) -> Result<(), ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.activate(id)).await
    }

    pub async fn close(&self, id: CampaignId) -> Result<(), ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.close(id)).await
    }

    pub async fn add_option(
        &self,
        campaign_id: CampaignId,
        label: String,
        description: String,
    ) -> Result<CampaignOption, ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.add_option(campaign_id, &label, &description)).await
    }

    pub async fn options(&self, campaign_id: CampaignId) -> Result<Vec<CampaignOption>, ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.options(campaign_id)).await
    }

    pub async fn remove_option(&self, campaign_id: CampaignId, option_id: OptionId) -> Result<(), ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.remove_option(campaign_id, option_id)).await
    }

    pub async fn stats(&self, id: CampaignId) -> Result<CampaignStats, ServiceError> {
        let admin = self.admin.clone();
        run_blocking(move || admin.stats(id)).await
    }

    pub async fn request_token(&self, voter_id: VoterId, campaign_id: CampaignId) -> Result<Token, ServiceError> {
        let register = self.register.clone();
        run_blocking(move || register.request_token(voter_id, campaign_id)).await
    }

    pub async fn register_ballot(&self, token: Token, option_id: OptionId) -> Result<Ballot, ServiceError> {
        let register = self.register.clone();
        run_blocking(move || register.register_ballot(&token, option_id)).await
    }

    pub async fn tally(&self, id: CampaignId) -> Result<Tally, ServiceError> {
        let tally = self.tally.clone();
        run_blocking(move || tally.tally(id)).await
    }
}
