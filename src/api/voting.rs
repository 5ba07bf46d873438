use chrono::Utc;
use mongodb::{bson::doc, options::FindOptions};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    response::status,
    serde::json::Json,
    Route,
};

use crate::engine::{admission::submit_vote, eligibility::normalise_email, ledger::VoteLedger};
use crate::error::{Error, Result};
use crate::logging::RequestId;
use crate::model::{
    api::{
        auth::AuthToken,
        ballot::{BallotSummary, VoteStatus},
        vote::{VoteReceipt, VoteRequest, VotedStatus},
    },
    common::election::{ElectionId, Visibility},
    db::{allowed_voter::AllowedVoter, election::Election, vote::Vote},
    mongodb::{Coll, Id},
};

use super::common::{allowed_emails_for, election_by_id, ensure_can_view};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, get_voted, get_ballots]
}

#[post("/votes", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken,
    request_id: RequestId,
    request: Json<VoteRequest>,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<status::Custom<Json<VoteReceipt>>> {
    let election = election_by_id(*request.election_id, &elections).await?;
    let allowed = allowed_emails_for(&election, &token, &allowed_voters).await?;

    debug!("req{request_id} admitting vote by {} in election {}", token.id, election.id);
    let vote = submit_vote(
        &votes,
        &token,
        &election,
        &allowed,
        *request.post_id,
        *request.candidate_id,
        Utc::now(),
    )
    .await?;
    info!("req{request_id} accepted vote {}", vote.id);

    Ok(status::Custom(Status::Created, Json(vote.into())))
}

#[get("/elections/<election_id>/posts/<post_id>/voted")]
async fn get_voted(
    token: AuthToken,
    election_id: Id,
    post_id: Id,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<Json<VotedStatus>> {
    let election = election_by_id(election_id, &elections).await?;
    ensure_can_view(&election, &token, &allowed_voters).await?;
    if election.post(post_id).is_none() {
        return Err(Error::not_found(format!("Post {post_id}")));
    }

    let voted = votes.has_voted(token.id, post_id).await?;
    Ok(Json(VotedStatus { voted }))
}

/// Every election the caller may vote in, newest first.
#[get("/voter/ballots")]
async fn get_ballots(
    token: AuthToken,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<Json<Vec<BallotSummary>>> {
    // Private elections that list the caller.
    let filter = doc! {
        "email": normalise_email(&token.email),
    };
    let listed: Vec<ElectionId> = allowed_voters
        .find(filter, None)
        .await?
        .map_ok(|entry| entry.election_id)
        .try_collect()
        .await?;

    let filter = doc! {
        "$or": [
            { "visibility": Visibility::Public },
            { "_id": { "$in": listed } },
        ]
    };
    let options = FindOptions::builder()
        .sort(doc! { "start_time": -1 })
        .build();
    let candidates: Vec<Election> = elections.find(filter, options).await?.try_collect().await?;

    let ids: Vec<ElectionId> = candidates.iter().map(|election| election.id).collect();
    let voted = votes.voted_elections(token.id, &ids).await?;

    let now = Utc::now();
    let ballots = candidates
        .iter()
        .map(|election| {
            let vote_status = if voted.contains(&election.id) {
                VoteStatus::Voted
            } else {
                VoteStatus::NotVoted
            };
            BallotSummary::new(election, vote_status, now)
        })
        .collect();

    Ok(Json(ballots))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Cookie, Header},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json, Value},
    };

    use crate::engine::window::WindowState;
    use crate::model::{
        api::auth::AUTH_TOKEN_COOKIE,
        common::voter::VoterIdentity,
        db::allowed_voter::{AllowedVoterCore, NewAllowedVoter},
    };

    use super::*;

    #[backend_test]
    async fn vote_then_vote_again(client: Client, elections: Coll<Election>) {
        let owner = VoterIdentity::example1();
        let voter = VoterIdentity::example2();
        let election = Election::current_example(owner.id);
        elections.insert_one(&election, None).await.unwrap();
        let post = &election.posts[0];
        let (a, b) = (post.candidates[0].id, post.candidates[1].id);

        // Nothing cast yet.
        assert!(!voted(&client, &voter, &election, post.id).await);

        // First vote is accepted.
        let response = cast(&client, &voter, &election, post.id, a).await;
        assert_eq!(Status::Created, response.status());
        let receipt: VoteReceipt =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(*receipt.candidate_id, a);
        assert_eq!(*receipt.post_id, post.id);
        assert!(voted(&client, &voter, &election, post.id).await);

        // Second vote on the same post is refused, with a reason code.
        let response = cast(&client, &voter, &election, post.id, b).await;
        assert_eq!(Status::Conflict, response.status());
        assert_eq!(rejection_code(response).await, "ALREADY_VOTED");

        // The other post is still open to this voter.
        let treasurer = &election.posts[1];
        let response = cast(
            &client,
            &voter,
            &election,
            treasurer.id,
            treasurer.candidates[0].id,
        )
        .await;
        assert_eq!(Status::Created, response.status());
    }

    #[backend_test]
    async fn bad_submissions(client: Client, db: Database, elections: Coll<Election>) {
        let voter = VoterIdentity::example1();
        let election = Election::current_example(voter.id);
        elections.insert_one(&election, None).await.unwrap();
        let post = &election.posts[0];

        // Unknown election.
        let missing = Election::current_example(voter.id);
        let response = cast(&client, &voter, &missing, post.id, post.candidates[0].id).await;
        assert_eq!(Status::NotFound, response.status());

        // Candidate from another post.
        let other = election.posts[1].candidates[0].id;
        let response = cast(&client, &voter, &election, post.id, other).await;
        assert_eq!(Status::BadRequest, response.status());
        assert_eq!(rejection_code(response).await, "INVALID_BALLOT");

        // Closed election.
        let start = Utc::now() - Duration::days(2);
        let closed = Election::example_with_window(voter.id, start, start + Duration::days(1));
        elections.insert_one(&closed, None).await.unwrap();
        let closed_post = &closed.posts[0];
        let response = cast(
            &client,
            &voter,
            &closed,
            closed_post.id,
            closed_post.candidates[0].id,
        )
        .await;
        assert_eq!(Status::BadRequest, response.status());
        assert_eq!(rejection_code(response).await, "ELECTION_NOT_ACTIVE");

        // No token at all.
        let response = client
            .post(uri!(cast_vote))
            .header(ContentType::JSON)
            .body(vote_body(&election, post.id, post.candidates[0].id))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());

        // None of that left a vote behind.
        let count = Coll::<Vote>::from_db(&db)
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[backend_test]
    async fn private_election_needs_allow_list(
        client: Client,
        elections: Coll<Election>,
        new_allowed_voters: Coll<NewAllowedVoter>,
    ) {
        let owner = VoterIdentity::example1();
        let voter = VoterIdentity::example2();
        let election = Election::private_example(owner.id);
        elections.insert_one(&election, None).await.unwrap();
        let post = &election.posts[0];
        let candidate = post.candidates[0].id;

        let response = cast(&client, &voter, &election, post.id, candidate).await;
        assert_eq!(Status::Forbidden, response.status());
        assert_eq!(rejection_code(response).await, "NOT_ELIGIBLE");

        // Listed under a differently-cased address.
        let entry = AllowedVoterCore::new(election.id, &voter.email.to_uppercase());
        new_allowed_voters.insert_one(&entry, None).await.unwrap();

        let response = cast(&client, &voter, &election, post.id, candidate).await;
        assert_eq!(Status::Created, response.status());
    }

    #[backend_test]
    async fn ballots_list_status(
        client: Client,
        elections: Coll<Election>,
        new_allowed_voters: Coll<NewAllowedVoter>,
    ) {
        let owner = VoterIdentity::example1();
        let voter = VoterIdentity::example2();

        let open = Election::current_example(owner.id);
        let start = Utc::now() + Duration::days(1);
        let upcoming = Election::example_with_window(owner.id, start, start + Duration::days(1));
        let listed = Election::private_example(owner.id);
        let unlisted = Election::private_example(owner.id);
        for election in [&open, &upcoming, &listed, &unlisted] {
            elections.insert_one(election, None).await.unwrap();
        }
        new_allowed_voters
            .insert_one(AllowedVoterCore::new(listed.id, &voter.email), None)
            .await
            .unwrap();

        // Vote in the open public election.
        let post = &open.posts[0];
        let response = cast(&client, &voter, &open, post.id, post.candidates[0].id).await;
        assert_eq!(Status::Created, response.status());

        let response = client
            .get(uri!(get_ballots))
            .header(crate::auth_header(&client, &voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let ballots: Vec<BallotSummary> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();

        let status_of = |election: &Election| {
            ballots
                .iter()
                .find(|ballot| *ballot.election_id == election.id)
                .map(|ballot| (ballot.election_status, ballot.vote_status))
        };
        assert_eq!(ballots.len(), 3);
        assert_eq!(
            status_of(&open),
            Some((WindowState::Active, VoteStatus::Voted))
        );
        assert_eq!(
            status_of(&upcoming),
            Some((WindowState::NotStarted, VoteStatus::NotVoted))
        );
        assert_eq!(
            status_of(&listed),
            Some((WindowState::Active, VoteStatus::NotVoted))
        );
        assert_eq!(status_of(&unlisted), None);
        // Newest first.
        assert_eq!(*ballots[0].election_id, upcoming.id);
    }

    #[backend_test]
    async fn racing_submissions_admit_one(client: Client, elections: Coll<Election>) {
        const RACERS: usize = 8;

        let owner = VoterIdentity::example1();
        let voter = VoterIdentity::example2();
        let election = Election::current_example(owner.id);
        elections.insert_one(&election, None).await.unwrap();
        let post = &election.posts[0];

        let submissions = (0..RACERS).map(|i| {
            let candidate = post.candidates[i % post.candidates.len()].id;
            cast(&client, &voter, &election, post.id, candidate)
        });
        let responses = rocket::futures::future::join_all(submissions).await;

        let mut created = 0;
        let mut codes = Vec::new();
        for response in responses {
            match response.status() {
                status if status == Status::Created => created += 1,
                status if status == Status::Conflict => codes.push(rejection_code(response).await),
                other => panic!("Unexpected status {other}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(codes.len(), RACERS - 1);
        assert!(codes.iter().all(|code| code == "ALREADY_VOTED"));
        assert!(voted(&client, &voter, &election, post.id).await);
    }

    #[backend_test]
    async fn token_from_cookie_or_header(client: Client) {
        let voter = VoterIdentity::example1();
        let config = client.rocket().state::<crate::Config>().unwrap();
        let jwt = AuthToken::new(voter.clone()).encode(config);

        let response = client
            .get(uri!(get_ballots))
            .cookie(Cookie::new(AUTH_TOKEN_COOKIE, jwt))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(get_ballots))
            .header(crate::auth_header(&client, &voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(get_ballots))
            .header(Header::new("Authorization", "Bearer not.a.jwt"))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    fn vote_body(election: &Election, post_id: Id, candidate_id: Id) -> String {
        serde_json::to_string(&VoteRequest {
            election_id: election.id.into(),
            post_id: post_id.into(),
            candidate_id: candidate_id.into(),
        })
        .unwrap()
    }

    async fn cast<'c>(
        client: &'c Client,
        voter: &VoterIdentity,
        election: &Election,
        post_id: Id,
        candidate_id: Id,
    ) -> LocalResponse<'c> {
        client
            .post(uri!(cast_vote))
            .header(ContentType::JSON)
            .header(crate::auth_header(client, voter))
            .body(vote_body(election, post_id, candidate_id))
            .dispatch()
            .await
    }

    async fn voted(client: &Client, voter: &VoterIdentity, election: &Election, post_id: Id) -> bool {
        let response = client
            .get(uri!(get_voted(election.id, post_id)))
            .header(crate::auth_header(client, voter))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let status: VotedStatus =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        status.voted
    }

    async fn rejection_code(response: LocalResponse<'_>) -> String {
        let body: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        body["code"].as_str().unwrap().to_string()
    }
}
