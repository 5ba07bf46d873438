use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::error::Error as DbError;

use crate::model::{
    api::results::{CandidateTally, ElectionResults, PostTally},
    common::election::CandidateId,
    db::{
        election::{Election, Post},
        vote::Vote,
    },
};

use super::ledger::VoteLedger;

/// Tally a single post straight from the ledger.
pub async fn tally_post<L>(ledger: &L, post: &Post) -> Result<PostTally, DbError>
where
    L: VoteLedger + ?Sized,
{
    let votes = ledger.list_votes(post.id).await?;
    Ok(count_post(post, &votes))
}

/// Tally every post of an election from a single read of the ledger.
pub async fn tally_election<L>(
    ledger: &L,
    election: &Election,
    now: DateTime<Utc>,
) -> Result<ElectionResults, DbError>
where
    L: VoteLedger + ?Sized,
{
    let votes = ledger.list_election_votes(election.id).await?;
    Ok(ElectionResults {
        election_id: election.id.into(),
        name: election.name.clone(),
        status: election.window_state(now),
        posts: election
            .posts
            .iter()
            .map(|post| count_post(post, &votes))
            .collect(),
    })
}

/// Count `votes` for `post`, ignoring votes for other posts and for candidates
/// no longer standing.
///
/// Every candidate appears, most votes first; equal counts keep the order in
/// which candidates were declared.
pub fn count_post(post: &Post, votes: &[Vote]) -> PostTally {
    let mut counts: HashMap<CandidateId, u64> = post
        .candidates
        .iter()
        .map(|candidate| (candidate.id, 0))
        .collect();
    for vote in votes.iter().filter(|vote| vote.post_id == post.id) {
        if let Some(count) = counts.get_mut(&vote.candidate_id) {
            *count += 1;
        }
    }
    let total_votes: u64 = counts.values().sum();

    let mut candidates = post
        .candidates
        .iter()
        .map(|candidate| {
            let votes = counts[&candidate.id];
            CandidateTally {
                candidate_id: candidate.id.into(),
                name: candidate.name.clone(),
                votes,
                percentage: percentage(votes, total_votes),
            }
        })
        .collect::<Vec<_>>();
    // Stable, so ties stay in declaration order.
    candidates.sort_by(|a, b| b.votes.cmp(&a.votes));

    PostTally {
        post_id: post.id.into(),
        title: post.title.clone(),
        total_votes,
        candidates,
    }
}

fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        votes as f64 / total as f64 * 100.0
    }
}
