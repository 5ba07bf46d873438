use crate::model::mongodb::Id;

/// Our voter IDs are the user IDs issued by the identity provider.
pub type VoterId = Id;

/// A validated caller identity, as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity {
    /// User unique ID.
    pub id: VoterId,
    /// User e-mail address, used to match allow-list entries.
    pub email: String,
}
