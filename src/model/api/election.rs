use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{
    eligibility::normalise_email,
    window::{is_valid_window, WindowState},
};
use crate::model::{
    api::id::ApiId,
    common::{election::Visibility, voter::VoterId},
    db::election::{Candidate, Election, ElectionCore, Post},
    mongodb::Id,
};

/// Why an election specification was refused.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// An election name, post title or candidate name is blank.
    EmptyName,
    InvalidWindow,
    /// Two posts of one election share a title.
    DuplicateTitle,
    InvalidEmail,
}

/// An election specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    /// Election name.
    pub name: String,
    /// Voting opens at this instant.
    pub start_time: DateTime<Utc>,
    /// Voting closes at this instant; must be after `start_time`.
    pub end_time: DateTime<Utc>,
    pub visibility: Visibility,
    /// Posts and their candidates, in display order.
    pub posts: Vec<PostSpec>,
}

impl ElectionSpec {
    /// Convert this spec into a proper election with unique IDs, owned by `owner_id`.
    pub fn into_election(self, owner_id: VoterId) -> Result<Election, SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if !is_valid_window(self.start_time, self.end_time) {
            return Err(SpecError::InvalidWindow);
        }
        let posts = self
            .posts
            .into_iter()
            .map(PostSpec::into_post)
            .collect::<Result<Vec<_>, _>>()?;
        for (i, post) in posts.iter().enumerate() {
            if posts[..i].iter().any(|earlier| earlier.title == post.title) {
                return Err(SpecError::DuplicateTitle);
            }
        }
        Ok(Election {
            id: Id::new(),
            election: ElectionCore {
                owner_id,
                name: self.name,
                start_time: self.start_time,
                end_time: self.end_time,
                visibility: self.visibility,
                posts,
            },
        })
    }
}

/// A post specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSpec {
    pub title: String,
    pub candidates: Vec<CandidateSpec>,
}

impl PostSpec {
    pub fn into_post(self) -> Result<Post, SpecError> {
        if self.title.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        Ok(Post {
            id: Id::new(),
            title: self.title,
            candidates: self
                .candidates
                .into_iter()
                .map(CandidateSpec::into_candidate)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// A candidate specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub bio: String,
    /// URL produced by the image host.
    #[serde(default)]
    pub image_url: Option<String>,
    /// The candidate's account, if they have one. Candidates with an account
    /// may vote in the election.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl CandidateSpec {
    pub fn into_candidate(self) -> Result<Candidate, SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        let email = self.email.as_deref().map(normalise_email);
        if matches!(&email, Some(email) if !email.contains('@')) {
            return Err(SpecError::InvalidEmail);
        }
        Ok(Candidate {
            id: Id::new(),
            name: self.name,
            bio: self.bio,
            image_url: self.image_url,
            email,
        })
    }
}

/// A replacement voting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSpec {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// An API-friendly election description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ApiId,
    pub owner_id: ApiId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub visibility: Visibility,
    /// Whether voting is upcoming, open, or over.
    pub status: WindowState,
    pub posts: Vec<PostDescription>,
    /// The allow-list; only shown to the election's owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_voters: Option<Vec<String>>,
}

impl ElectionDescription {
    pub fn new(election: Election, now: DateTime<Utc>) -> Self {
        let status = election.window_state(now);
        Self {
            id: election.id.into(),
            owner_id: election.election.owner_id.into(),
            name: election.election.name,
            start_time: election.election.start_time,
            end_time: election.election.end_time,
            visibility: election.election.visibility,
            status,
            posts: election
                .election
                .posts
                .into_iter()
                .map(PostDescription::from)
                .collect(),
            allowed_voters: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDescription {
    pub id: ApiId,
    pub title: String,
    pub candidates: Vec<CandidateDescription>,
}

impl From<Post> for PostDescription {
    fn from(post: Post) -> Self {
        Self {
            id: post.id.into(),
            title: post.title,
            candidates: post
                .candidates
                .into_iter()
                .map(CandidateDescription::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: ApiId,
    pub name: String,
    pub bio: String,
    pub image_url: Option<String>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.name,
            bio: candidate.bio,
            image_url: candidate.image_url,
        }
    }
}
