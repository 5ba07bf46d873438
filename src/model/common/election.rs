use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Our election IDs are database IDs.
pub type ElectionId = Id;
/// Our post IDs are database IDs, unique across all elections.
pub type PostId = Id;
/// Our candidate IDs are database IDs, unique across all posts.
pub type CandidateId = Id;

/// Who may vote in an election.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone with a validated identity may vote.
    Public,
    /// Only voters on the election's allow-list may vote.
    Private,
}

impl From<Visibility> for Bson {
    fn from(visibility: Visibility) -> Self {
        to_bson(&visibility).expect("Serialisation is infallible")
    }
}
