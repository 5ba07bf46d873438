use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::engine::eligibility::normalise_email;
use crate::model::{common::election::ElectionId, mongodb::Id};

/// Core allow-list entry, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedVoterCore {
    /// Foreign Key election ID.
    pub election_id: ElectionId,
    /// Normalised e-mail of the voter permitted to vote.
    pub email: String,
}

impl AllowedVoterCore {
    /// Create an allow-list entry, normalising the e-mail address.
    pub fn new(election_id: ElectionId, email: &str) -> Self {
        Self {
            election_id,
            email: normalise_email(email),
        }
    }
}

/// An allow-list entry without an ID.
pub type NewAllowedVoter = AllowedVoterCore;

/// An allow-list entry from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedVoter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub allowed: AllowedVoterCore,
}

impl Deref for AllowedVoter {
    type Target = AllowedVoterCore;

    fn deref(&self) -> &Self::Target {
        &self.allowed
    }
}
