use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::engine::window::{window_state, WindowState};
use crate::model::{
    common::{
        election::{CandidateId, PostId, Visibility},
        voter::VoterId,
    },
    mongodb::Id,
};

/// Core election data, as stored in the database.
///
/// Posts and their candidates are embedded, so deleting the election document
/// deletes them too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    /// The user who created the election.
    pub owner_id: VoterId,
    /// Election name.
    pub name: String,
    /// Voting opens at this instant.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Voting closes at this instant.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Who may vote.
    pub visibility: Visibility,
    /// The posts being voted on, in creation order.
    pub posts: Vec<Post>,
}

impl ElectionCore {
    /// Get the post with the given ID, if it belongs to this election.
    pub fn post(&self, post_id: PostId) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == post_id)
    }

    /// Every candidate of every post, with the post they stand for.
    pub fn candidates(&self) -> impl Iterator<Item = (PostId, &Candidate)> {
        self.posts
            .iter()
            .flat_map(|post| post.candidates.iter().map(move |candidate| (post.id, candidate)))
    }

    /// Where `now` falls relative to the voting window.
    pub fn window_state(&self, now: DateTime<Utc>) -> WindowState {
        window_state(self.start_time, self.end_time, now)
    }
}

/// An election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// A position being voted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post unique ID.
    pub id: PostId,
    /// Post title, e.g. "Treasurer".
    pub title: String,
    /// Candidates standing for this post, in creation order.
    pub candidates: Vec<Candidate>,
}

impl Post {
    /// Get the candidate with the given ID, if they stand for this post.
    pub fn candidate(&self, candidate_id: CandidateId) -> Option<&Candidate> {
        self.candidates
            .iter()
            .find(|candidate| candidate.id == candidate_id)
    }
}

/// An option voters may choose for a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate unique ID.
    pub id: CandidateId,
    /// Display name.
    pub name: String,
    /// Short biography.
    pub bio: String,
    /// Opaque URL of the candidate's picture, if any.
    pub image_url: Option<String>,
    /// Normalised e-mail of the candidate's account. While they stand, they
    /// are on the election's allow-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
