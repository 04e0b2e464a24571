//! Token issuance and ballot registration.
//!
//! A voter asks for a token once per campaign and spends it on exactly one
//! ballot. The register never stores the token or the voter id next to a
//! ballot: only the token's fingerprint reaches the store.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::campaign::CampaignStatus;
use crate::codec::{encode, CodecError};
use crate::ids::{CampaignId, OptionId, VoterId};
use crate::store::{
    Ballot, BallotStore, CampaignRegistry, RecordOutcome, StoreError, TokenRecord, VoterDirectory,
};
use crate::token::{fingerprint, issue, Token};

#[derive(Error, Debug)]
pub enum BallotError {
    #[error("voter {0} not found")]
    VoterNotFound(VoterId),
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),
    #[error("campaign {0} is not accepting ballots")]
    CampaignNotActive(CampaignId),
    #[error("invalid token")]
    InvalidToken,
    #[error("token already used")]
    AlreadyVoted,
    #[error("ballot encoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(StoreError),
    /// Ballot and token-usage state disagree. Never retried.
    #[error("ballot store is inconsistent: {0}")]
    Inconsistent(String),
}

impl BallotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BallotError::Inconsistent(_))
    }
}

impl From<StoreError> for BallotError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Inconsistent(msg) => BallotError::Inconsistent(msg),
            StoreError::CampaignNotActive(id) => BallotError::CampaignNotActive(id),
            e => BallotError::Store(e),
        }
    }
}

pub struct BallotRegister<R, V, B> {
    registry: Arc<R>,
    voters: Arc<V>,
    ballots: Arc<B>,
}

impl<R, V, B> BallotRegister<R, V, B>
where
    R: CampaignRegistry,
    V: VoterDirectory,
    B: BallotStore,
{
    pub fn new(registry: Arc<R>, voters: Arc<V>, ballots: Arc<B>) -> Self {
        BallotRegister {
            registry,
            voters,
            ballots,
        }
    }

    /// Hands out the voter's token for an active campaign.
    ///
    /// Asking again returns the same token until it has been spent; after
    /// that the request fails with [`BallotError::AlreadyVoted`]. The store
    /// rechecks the campaign status when it writes the token record.
    pub fn request_token(&self, voter_id: VoterId, campaign_id: CampaignId) -> Result<Token, BallotError> {
        if !self.voters.voter_exists(voter_id)? {
            return Err(BallotError::VoterNotFound(voter_id));
        }
        let campaign = self
            .registry
            .get_campaign(campaign_id)?
            .ok_or(BallotError::CampaignNotFound(campaign_id))?;
        if campaign.status != CampaignStatus::Active {
            return Err(BallotError::CampaignNotActive(campaign_id));
        }

        let token = issue(voter_id, campaign_id, &campaign.salt);
        let fp = fingerprint(&token);
        let record = self
            .ballots
            .upsert_token_record(&TokenRecord::unused(campaign_id, fp))?;
        if record.used {
            return Err(BallotError::AlreadyVoted);
        }
        debug!(campaign = %campaign_id, fingerprint = %fp, "token issued");
        Ok(token)
    }

    /// Encrypts `option_id` under the token's campaign key and stores it,
    /// spending the token in the same atomic step.
    pub fn register_ballot(&self, token: &Token, option_id: OptionId) -> Result<Ballot, BallotError> {
        let fp = fingerprint(token);
        let record = self
            .ballots
            .get_token_record(&fp)?
            .ok_or(BallotError::InvalidToken)?;
        if record.used {
            return Err(BallotError::AlreadyVoted);
        }
        let campaign_id = record.campaign_id;
        if !self.registry.is_campaign_active(campaign_id)? {
            return Err(BallotError::CampaignNotActive(campaign_id));
        }
        let (public_key, _) = self
            .registry
            .get_campaign_key_material(campaign_id)?
            .ok_or(BallotError::CampaignNotFound(campaign_id))?;

        let ballot = Ballot {
            campaign_id,
            ciphertext: encode(option_id, fp, &public_key)?,
            fingerprint: fp,
        };

        match self.ballots.record_ballot(&ballot) {
            Ok(RecordOutcome::Recorded) => {
                info!(campaign = %campaign_id, "ballot recorded");
                Ok(ballot)
            }
            Ok(RecordOutcome::AlreadyUsed) => Err(BallotError::AlreadyVoted),
            Ok(RecordOutcome::UnknownToken) => Err(BallotError::InvalidToken),
            Ok(RecordOutcome::CampaignNotActive) => Err(BallotError::CampaignNotActive(campaign_id)),
            Err(e) => {
                let e = BallotError::from(e);
                if e.is_fatal() {
                    error!(campaign = %campaign_id, fingerprint = %fp, "{}", e);
                }
                Err(e)
            }
        }
    }
}
