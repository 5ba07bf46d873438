use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::engine::tally::{tally_election, tally_post};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        results::{ElectionResults, PostTally},
    },
    db::{allowed_voter::AllowedVoter, election::Election, vote::Vote},
    mongodb::{Coll, Id},
};

use super::common::{election_by_id, ensure_can_view};

pub fn routes() -> Vec<Route> {
    routes![election_results, post_results]
}

#[get("/elections/<election_id>/results")]
async fn election_results(
    token: AuthToken,
    election_id: Id,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<Json<ElectionResults>> {
    let election = election_by_id(election_id, &elections).await?;
    ensure_can_view(&election, &token, &allowed_voters).await?;

    let results = tally_election(&votes, &election, Utc::now()).await?;
    Ok(Json(results))
}

#[get("/elections/<election_id>/posts/<post_id>/results")]
async fn post_results(
    token: AuthToken,
    election_id: Id,
    post_id: Id,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<Json<PostTally>> {
    let election = election_by_id(election_id, &elections).await?;
    ensure_can_view(&election, &token, &allowed_voters).await?;
    let post = election
        .post(post_id)
        .ok_or_else(|| Error::not_found(format!("Post {post_id}")))?;

    let tally = tally_post(&votes, post).await?;
    Ok(Json(tally))
}
