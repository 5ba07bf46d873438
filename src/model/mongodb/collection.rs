use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::model::db::{
    allowed_voter::{AllowedVoter, NewAllowedVoter},
    election::{Election, NewElection},
    vote::Vote,
};

/// A document type stored in a named collection.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A typed handle on the collection that stores `T`.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// Deriving would add a needless `T: Clone` bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Wrap the managed [`Database`] in a collection handle. Fails with a 500
    /// if no database is managed.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Database>() {
            Some(db) => request::Outcome::Success(Coll::from_db(db)),
            None => {
                error!("No database under management");
                request::Outcome::Failure((Status::InternalServerError, ()))
            }
        }
    }
}

/// Map document types onto the collection that stores them. Several types
/// may share a collection, e.g. a document with and without its `_id`.
macro_rules! stored_in {
    ($name:expr => $($ty:ty),+) => {
        $(
            impl MongoCollection for $ty {
                const NAME: &'static str = $name;
            }
        )+
    };
}

stored_in!("elections" => Election, NewElection);
stored_in!("votes" => Vote);
stored_in!("allowed_voters" => AllowedVoter, NewAllowedVoter);

/// Ensure that all the required indexes exist on the given database.
///
/// The unique index on votes is what makes vote insertion atomic with respect
/// to the one-vote-per-post rule.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Vote collection.
    let one_vote_per_post = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "post_id": 1})
        .options(unique.clone())
        .build();
    let votes_by_election = IndexModel::builder()
        .keys(doc! {"election_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_indexes([one_vote_per_post, votes_by_election], None)
        .await?;

    // Election collection.
    let one_name_per_owner = IndexModel::builder()
        .keys(doc! {"owner_id": 1, "name": 1})
        .options(unique.clone())
        .build();
    Coll::<Election>::from_db(db)
        .create_index(one_name_per_owner, None)
        .await?;

    // Allowed voter collection.
    let allowed_voter_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "email": 1})
        .options(unique)
        .build();
    Coll::<AllowedVoter>::from_db(db)
        .create_index(allowed_voter_index, None)
        .await?;

    Ok(())
}
