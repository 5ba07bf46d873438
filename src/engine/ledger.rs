use std::collections::HashSet;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, PoisonError};

use mongodb::{bson::doc, error::Error as DbError};
use rocket::futures::TryStreamExt;
use thiserror::Error;

use crate::model::{
    common::{
        election::{ElectionId, PostId},
        voter::VoterId,
    },
    db::vote::{NewVote, Vote},
    mongodb::{is_duplicate_key_error, Coll},
};

/// Why a vote could not be written to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The voter already has a vote on this post. This is an expected outcome
    /// rather than a fault.
    #[error("Voter has already voted on this post")]
    DuplicateVote,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// The durable record of cast votes.
///
/// Implementations must make [`VoteLedger::insert_vote`] atomic with respect to
/// the one-vote-per-(voter, post) rule: of any number of racing inserts for the
/// same voter and post, exactly one may succeed.
#[rocket::async_trait]
pub trait VoteLedger: Send + Sync {
    /// Commit a vote, or fail with [`LedgerError::DuplicateVote`] if the voter
    /// has already voted on this post.
    async fn insert_vote(&self, ballot: NewVote) -> Result<Vote, LedgerError>;

    /// All committed votes for a post.
    async fn list_votes(&self, post_id: PostId) -> Result<Vec<Vote>, DbError>;

    /// All committed votes for every post of an election, read in one go.
    async fn list_election_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, DbError>;

    /// Has this voter voted on this post?
    ///
    /// Only an early-out: the answer may be stale by the time a subsequent
    /// insert happens.
    async fn has_voted(&self, voter_id: VoterId, post_id: PostId) -> Result<bool, DbError>;

    /// Which of these elections the voter has cast at least one vote in.
    async fn voted_elections(
        &self,
        voter_id: VoterId,
        election_ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>, DbError>;
}

/// The production ledger: the `votes` collection, whose unique index on
/// `(voter_id, post_id)` arbitrates between racing inserts.
#[rocket::async_trait]
impl VoteLedger for Coll<Vote> {
    async fn insert_vote(&self, ballot: NewVote) -> Result<Vote, LedgerError> {
        let vote = Vote::commit(ballot);
        match self.insert_one(&vote, None).await {
            Ok(_) => Ok(vote),
            Err(err) if is_duplicate_key_error(&err) => Err(LedgerError::DuplicateVote),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_votes(&self, post_id: PostId) -> Result<Vec<Vote>, DbError> {
        self.find(doc! { "post_id": post_id }, None)
            .await?
            .try_collect()
            .await
    }

    async fn list_election_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, DbError> {
        self.find(doc! { "election_id": election_id }, None)
            .await?
            .try_collect()
            .await
    }

    async fn has_voted(&self, voter_id: VoterId, post_id: PostId) -> Result<bool, DbError> {
        let filter = doc! {
            "voter_id": voter_id,
            "post_id": post_id,
        };
        Ok(self.find_one(filter, None).await?.is_some())
    }

    async fn voted_elections(
        &self,
        voter_id: VoterId,
        election_ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>, DbError> {
        let filter = doc! {
            "voter_id": voter_id,
            "election_id": { "$in": election_ids },
        };
        self.find(filter, None)
            .await?
            .map_ok(|vote| vote.election_id)
            .try_collect()
            .await
    }
}

/// An in-process ledger. The uniqueness check and the insert happen under one
/// lock, so it upholds the same guarantee as the database.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryLedger {
    votes: Mutex<Vec<Vote>>,
}

#[cfg(test)]
impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn votes(&self) -> MutexGuard<'_, Vec<Vote>> {
        // A panic mid-push cannot leave a half-written vote behind.
        self.votes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matching(&self, predicate: impl Fn(&Vote) -> bool) -> Vec<Vote> {
        self.votes()
            .iter()
            .filter(|vote| predicate(vote))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[rocket::async_trait]
impl VoteLedger for MemoryLedger {
    async fn insert_vote(&self, ballot: NewVote) -> Result<Vote, LedgerError> {
        let mut votes = self.votes();
        if votes
            .iter()
            .any(|v| v.voter_id == ballot.voter_id && v.post_id == ballot.post_id)
        {
            return Err(LedgerError::DuplicateVote);
        }
        let vote = Vote::commit(ballot);
        votes.push(vote.clone());
        Ok(vote)
    }

    async fn list_votes(&self, post_id: PostId) -> Result<Vec<Vote>, DbError> {
        Ok(self.matching(|vote| vote.post_id == post_id))
    }

    async fn list_election_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, DbError> {
        Ok(self.matching(|vote| vote.election_id == election_id))
    }

    async fn has_voted(&self, voter_id: VoterId, post_id: PostId) -> Result<bool, DbError> {
        Ok(self
            .votes()
            .iter()
            .any(|vote| vote.voter_id == voter_id && vote.post_id == post_id))
    }

    async fn voted_elections(
        &self,
        voter_id: VoterId,
        election_ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>, DbError> {
        Ok(self
            .matching(|vote| vote.voter_id == voter_id && election_ids.contains(&vote.election_id))
            .into_iter()
            .map(|vote| vote.election_id)
            .collect())
    }
}
