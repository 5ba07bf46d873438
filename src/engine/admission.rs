use chrono::{DateTime, Utc};
use rocket::http::Status;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::model::{
    common::{
        election::{CandidateId, PostId},
        voter::VoterIdentity,
    },
    db::{
        election::Election,
        vote::{NewVote, Vote},
    },
};

use super::{
    eligibility::{check_eligibility, Eligibility},
    ledger::{LedgerError, VoteLedger},
    window::WindowState,
};

/// Why a vote submission was turned away. These are expected outcomes and are
/// reported to the caller verbatim.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// The post is not part of the election, or the candidate does not stand
    /// for the post.
    #[error("The post or candidate does not belong to this election")]
    InvalidBallot,
    #[error("The election is not accepting votes")]
    ElectionNotActive,
    #[error("You are not eligible to vote in this election")]
    NotEligible,
    #[error("You have already voted for this post")]
    AlreadyVoted,
}

impl Rejection {
    /// The HTTP status this rejection maps to.
    pub fn status(self) -> Status {
        match self {
            Self::InvalidBallot | Self::ElectionNotActive => Status::BadRequest,
            Self::NotEligible => Status::Forbidden,
            Self::AlreadyVoted => Status::Conflict,
        }
    }
}

/// Decide whether to admit a vote, and commit it if so.
///
/// Checks run cheapest-first and in a fixed order: ballot structure, voting
/// window, eligibility, then the ledger insert. Nothing is written unless every
/// check passes, and the ledger's own uniqueness rule has the final say.
///
/// `allowed_voters` is the election's allow-list, or the part of it that could
/// match `voter`. Storage faults come back as [`Error::Db`] and leave the
/// ledger untouched.
pub async fn submit_vote<L>(
    ledger: &L,
    voter: &VoterIdentity,
    election: &Election,
    allowed_voters: &[String],
    post_id: PostId,
    candidate_id: CandidateId,
    now: DateTime<Utc>,
) -> Result<Vote>
where
    L: VoteLedger + ?Sized,
{
    let admitted = admit(voter, election, allowed_voters, post_id, candidate_id, now);
    if let Err(rejection) = admitted {
        info!(
            "Rejected vote by {} on post {post_id} of election {}: {rejection:?}",
            voter.id, election.id
        );
        return Err(rejection.into());
    }

    let ballot = NewVote {
        election_id: election.id,
        post_id,
        candidate_id,
        voter_id: voter.id,
    };
    match ledger.insert_vote(ballot).await {
        Ok(vote) => {
            debug!("Committed vote {} on post {post_id}", vote.id);
            Ok(vote)
        }
        Err(LedgerError::DuplicateVote) => {
            info!("Rejected duplicate vote by {} on post {post_id}", voter.id);
            Err(Rejection::AlreadyVoted.into())
        }
        Err(LedgerError::Db(err)) => Err(Error::Db(err)),
    }
}

/// The side-effect-free part of admission.
fn admit(
    voter: &VoterIdentity,
    election: &Election,
    allowed_voters: &[String],
    post_id: PostId,
    candidate_id: CandidateId,
    now: DateTime<Utc>,
) -> std::result::Result<(), Rejection> {
    election
        .post(post_id)
        .and_then(|post| post.candidate(candidate_id))
        .ok_or(Rejection::InvalidBallot)?;

    if election.window_state(now) != WindowState::Active {
        return Err(Rejection::ElectionNotActive);
    }

    let allowed = allowed_voters.iter().map(String::as_str);
    if check_eligibility(election.visibility, allowed, voter) != Eligibility::Eligible {
        return Err(Rejection::NotEligible);
    }

    Ok(())
}
