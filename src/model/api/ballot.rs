use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::window::WindowState;
use crate::model::{api::id::ApiId, db::election::Election};

/// Whether a voter has taken part in an election yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    /// Voted on at least one post.
    Voted,
    NotVoted,
}

/// An election on a voter's ballot list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSummary {
    pub election_id: ApiId,
    pub name: String,
    pub owner_id: ApiId,
    pub election_status: WindowState,
    pub vote_status: VoteStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BallotSummary {
    pub fn new(election: &Election, vote_status: VoteStatus, now: DateTime<Utc>) -> Self {
        Self {
            election_id: election.id.into(),
            name: election.name.clone(),
            owner_id: election.owner_id.into(),
            election_status: election.window_state(now),
            vote_status,
            start_time: election.start_time,
            end_time: election.end_time,
        }
    }
}
