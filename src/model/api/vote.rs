use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, db::vote::Vote};

/// A vote submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub election_id: ApiId,
    pub post_id: ApiId,
    pub candidate_id: ApiId,
}

/// Proof of a committed vote, returned to the voter who cast it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote_id: ApiId,
    pub election_id: ApiId,
    pub post_id: ApiId,
    pub candidate_id: ApiId,
    /// When the vote was committed.
    pub cast_at: DateTime<Utc>,
}

impl From<Vote> for VoteReceipt {
    fn from(vote: Vote) -> Self {
        Self {
            vote_id: vote.id.into(),
            election_id: vote.election_id.into(),
            post_id: vote.post_id.into(),
            candidate_id: vote.candidate_id.into(),
            cast_at: vote.cast_at,
        }
    }
}

/// Whether the caller has voted on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedStatus {
    pub voted: bool,
}
