use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{
        election::{CandidateId, ElectionId, PostId},
        voter::VoterId,
    },
    mongodb::Id,
};

/// A voter's choice, before it has been committed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVote {
    /// Foreign Key election ID.
    pub election_id: ElectionId,
    /// Foreign Key post ID.
    pub post_id: PostId,
    /// Foreign Key candidate ID.
    pub candidate_id: CandidateId,
    /// The voter who cast it.
    pub voter_id: VoterId,
}

/// A committed vote, with its unique ID and commit time. Never modified once
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Vote contents.
    #[serde(flatten)]
    pub ballot: NewVote,
    /// When the vote was committed.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Stamp a new vote with an ID and the current time, at the database's
    /// millisecond precision.
    pub fn commit(ballot: NewVote) -> Self {
        Self {
            id: Id::new(),
            ballot,
            cast_at: BsonDateTime::now().to_chrono(),
        }
    }
}

impl Deref for Vote {
    type Target = NewVote;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}
