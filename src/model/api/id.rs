use std::fmt::{Display, Formatter};
use std::ops::Deref;

use mongodb::bson::oid::Error as OidError;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// An API-friendly ID that de/serializes as a plain hex string rather than
/// MongoDB's extended-JSON `{"$oid": ...}` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ApiId(Id);

impl Display for ApiId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl TryFrom<String> for ApiId {
    type Error = OidError;

    fn try_from(hex: String) -> Result<Self, Self::Error> {
        hex.parse::<Id>().map(Self)
    }
}

impl From<ApiId> for String {
    fn from(id: ApiId) -> Self {
        id.0.to_string()
    }
}

impl From<Id> for ApiId {
    fn from(id: Id) -> Self {
        Self(id)
    }
}

impl Deref for ApiId {
    type Target = Id;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
