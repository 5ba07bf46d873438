use serde::{Deserialize, Serialize};

use crate::engine::window::WindowState;
use crate::model::api::id::ApiId;

/// Results for a whole election. Contains no voter identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: ApiId,
    /// Election name.
    pub name: String,
    /// Whether voting is upcoming, open, or over; open results may still change.
    pub status: WindowState,
    /// One tally per post, in post creation order.
    pub posts: Vec<PostTally>,
}

/// Results for a single post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTally {
    pub post_id: ApiId,
    /// Post title.
    pub title: String,
    /// Total votes counted for this post.
    pub total_votes: u64,
    /// Every candidate, most votes first.
    pub candidates: Vec<CandidateTally>,
}

/// One candidate's standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: ApiId,
    /// Candidate display name.
    pub name: String,
    pub votes: u64,
    /// Share of the post's votes, from 0 to 100.
    pub percentage: f64,
}
