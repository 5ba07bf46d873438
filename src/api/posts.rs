use std::collections::HashSet;

use chrono::Utc;
use mongodb::{
    bson::{doc, to_bson},
    Client,
};
use rocket::{http::Status, response::status, serde::json::Json, Route, State};

use crate::engine::eligibility::normalise_email;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        election::{CandidateDescription, CandidateSpec, PostDescription, PostSpec},
    },
    db::{
        allowed_voter::AllowedVoter,
        election::{Candidate, Election},
    },
    mongodb::{Coll, Id},
};

use super::common::{allow_emails, ensure_not_started, owned_election};

pub fn routes() -> Vec<Route> {
    routes![add_post, delete_post, add_candidate, delete_candidate]
}

fn candidate_email(candidate: &Candidate) -> Option<&str> {
    candidate.email.as_deref()
}

/// Add a post, and any candidates it comes with, to an election that has not
/// opened yet.
#[post("/elections/<election_id>/posts", data = "<spec>", format = "json")]
async fn add_post(
    token: AuthToken,
    election_id: Id,
    spec: Json<PostSpec>,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<status::Custom<Json<PostDescription>>> {
    let election = owned_election(election_id, &token, &elections).await?;
    let now = Utc::now();
    ensure_not_started(&election, now)?;

    let post = spec.0.into_post()?;
    if election.posts.iter().any(|existing| existing.title == post.title) {
        return Err(Error::conflict(format!(
            "Election {election_id} already has a post titled '{}'",
            post.title
        )));
    }

    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let filter = doc! {
            "_id": election_id,
            "start_time": { "$gt": now },
            "posts.title": { "$ne": post.title.as_str() },
        };
        let update = doc! { "$push": { "posts": to_bson(&post)? } };
        let result = elections
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::conflict(format!(
                "Election {election_id} changed meanwhile"
            )));
        }
        let emails = post
            .candidates
            .iter()
            .filter_map(candidate_email);
        allow_emails(election_id, emails, &allowed_voters, &mut session).await?;

        session.commit_transaction().await?;
    }
    info!("Added post {} to election {election_id}", post.id);

    Ok(status::Custom(Status::Created, Json(post.into())))
}

#[delete("/elections/<election_id>/posts/<post_id>")]
async fn delete_post(
    token: AuthToken,
    election_id: Id,
    post_id: Id,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<()> {
    let election = owned_election(election_id, &token, &elections).await?;
    let now = Utc::now();
    ensure_not_started(&election, now)?;
    if election.post(post_id).is_none() {
        return Err(Error::not_found(format!("Post {post_id}")));
    }

    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let filter = doc! {
            "_id": election_id,
            "start_time": { "$gt": now },
        };
        let update = doc! { "$pull": { "posts": { "id": post_id } } };
        let result = elections
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::conflict(format!(
                "Voting in election {election_id} opened meanwhile"
            )));
        }
        let orphans = orphaned_emails(&election, &token.email, |leaving_post, _| {
            leaving_post == post_id
        });
        forget_emails(election_id, orphans, &allowed_voters, &mut session).await?;

        session.commit_transaction().await?;
    }
    info!("Deleted post {post_id} from election {election_id}");

    Ok(())
}

#[post(
    "/elections/<election_id>/posts/<post_id>/candidates",
    data = "<spec>",
    format = "json"
)]
async fn add_candidate(
    token: AuthToken,
    election_id: Id,
    post_id: Id,
    spec: Json<CandidateSpec>,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<status::Custom<Json<CandidateDescription>>> {
    let election = owned_election(election_id, &token, &elections).await?;
    let now = Utc::now();
    ensure_not_started(&election, now)?;
    let post = election
        .post(post_id)
        .ok_or_else(|| Error::not_found(format!("Post {post_id}")))?;

    let candidate = spec.0.into_candidate()?;
    if let Some(email) = &candidate.email {
        if post
            .candidates
            .iter()
            .any(|standing| standing.email.as_ref() == Some(email))
        {
            return Err(Error::conflict(format!(
                "{email} already stands for post {post_id}"
            )));
        }
    }

    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let mut this_post = doc! { "id": post_id };
        if let Some(email) = &candidate.email {
            this_post.insert("candidates.email", doc! { "$ne": email.as_str() });
        }
        let filter = doc! {
            "_id": election_id,
            "start_time": { "$gt": now },
            "posts": { "$elemMatch": this_post },
        };
        let update = doc! { "$push": { "posts.$.candidates": to_bson(&candidate)? } };
        let result = elections
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::conflict(format!(
                "Election {election_id} changed meanwhile"
            )));
        }
        allow_emails(
            election_id,
            candidate.email.as_deref(),
            &allowed_voters,
            &mut session,
        )
        .await?;

        session.commit_transaction().await?;
    }
    info!(
        "Added candidate {} to post {post_id} of election {election_id}",
        candidate.id
    );

    Ok(status::Custom(Status::Created, Json(candidate.into())))
}

#[delete("/elections/<election_id>/posts/<post_id>/candidates/<candidate_id>")]
async fn delete_candidate(
    token: AuthToken,
    election_id: Id,
    post_id: Id,
    candidate_id: Id,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<()> {
    let election = owned_election(election_id, &token, &elections).await?;
    let now = Utc::now();
    ensure_not_started(&election, now)?;
    election
        .post(post_id)
        .and_then(|post| post.candidate(candidate_id))
        .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;

    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let filter = doc! {
            "_id": election_id,
            "start_time": { "$gt": now },
            "posts.id": post_id,
        };
        let update = doc! { "$pull": { "posts.$.candidates": { "id": candidate_id } } };
        let result = elections
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::conflict(format!(
                "Election {election_id} changed meanwhile"
            )));
        }
        let orphans = orphaned_emails(&election, &token.email, |_, candidate| {
            candidate.id == candidate_id
        });
        forget_emails(election_id, orphans, &allowed_voters, &mut session).await?;

        session.commit_transaction().await?;
    }
    info!("Deleted candidate {candidate_id} from post {post_id} of election {election_id}");

    Ok(())
}

/// E-mails of the candidates leaving `election` that no longer stand for any
/// post once they are gone. The owner stays allowed regardless.
fn orphaned_emails(
    election: &Election,
    owner_email: &str,
    leaving: impl Fn(Id, &Candidate) -> bool,
) -> Vec<String> {
    let (gone, staying): (Vec<_>, Vec<_>) = election
        .candidates()
        .partition(|(post_id, candidate)| leaving(*post_id, *candidate));
    let owner_email = normalise_email(owner_email);
    let mut kept = staying
        .into_iter()
        .filter_map(|(_, candidate)| candidate.email.as_deref())
        .collect::<HashSet<_>>();
    kept.insert(owner_email.as_str());

    let orphans = gone
        .into_iter()
        .filter_map(|(_, candidate)| candidate.email.as_deref())
        .filter(|email| !kept.contains(email))
        .map(str::to_string)
        .collect::<HashSet<_>>();
    orphans.into_iter().collect()
}

async fn forget_emails(
    election_id: Id,
    emails: Vec<String>,
    allowed_voters: &Coll<AllowedVoter>,
    session: &mut mongodb::ClientSession,
) -> Result<()> {
    if emails.is_empty() {
        return Ok(());
    }
    let filter = doc! {
        "election_id": election_id,
        "email": { "$in": emails },
    };
    let removed = allowed_voters
        .delete_many_with_session(filter, None, session)
        .await?;
    debug!(
        "Removed {} former candidates from the allow-list of {election_id}",
        removed.deleted_count
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::{
        futures::TryStreamExt,
        http::ContentType,
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::model::common::voter::VoterIdentity;

    use super::*;

    /// An election owned by `owner` that opens tomorrow.
    async fn upcoming(elections: &Coll<Election>, owner: &VoterIdentity) -> Election {
        let start = Utc::now() + Duration::days(1);
        let election = Election::example_with_window(owner.id, start, start + Duration::days(1));
        elections.insert_one(&election, None).await.unwrap();
        election
    }

    #[backend_test]
    async fn add_and_delete_posts(client: Client, elections: Coll<Election>) {
        let owner = VoterIdentity::example1();
        let election = upcoming(&elections, &owner).await;

        let response = add_post_response(&client, &owner, election.id, &PostSpec::example1()).await;
        assert_eq!(Status::Created, response.status());
        let added: PostDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(added.title, "Captain");
        assert_eq!(added.candidates.len(), 2);

        let stored_election = stored(&elections, election.id).await;
        assert_eq!(stored_election.posts.len(), 3);
        assert_eq!(stored_election.posts[2].id, *added.id);
        assert_eq!(stored_election.posts[2].candidates[1].name, "Judit");

        // Titles are unique within an election.
        let response = add_post_response(&client, &owner, election.id, &PostSpec::example1()).await;
        assert_eq!(Status::Conflict, response.status());
        let mut untitled = PostSpec::example2();
        untitled.title = String::new();
        let response = add_post_response(&client, &owner, election.id, &untitled).await;
        assert_eq!(Status::BadRequest, response.status());

        // Removal.
        let response = delete_post_response(&client, &owner, election.id, *added.id).await;
        assert_eq!(Status::Ok, response.status());
        let response = delete_post_response(&client, &owner, election.id, *added.id).await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(stored(&elections, election.id).await.posts, election.posts);
    }

    #[backend_test]
    async fn ballot_is_frozen_once_voting_opens(client: Client, elections: Coll<Election>) {
        let owner = VoterIdentity::example1();
        let election = Election::current_example(owner.id);
        elections.insert_one(&election, None).await.unwrap();
        let post = &election.posts[0];

        let response = add_post_response(&client, &owner, election.id, &PostSpec::example1()).await;
        assert_eq!(Status::Conflict, response.status());
        let response = delete_post_response(&client, &owner, election.id, post.id).await;
        assert_eq!(Status::Conflict, response.status());
        let spec = CandidateSpec::example_with_email("late@example.com");
        let response = add_candidate_response(&client, &owner, election.id, post.id, &spec).await;
        assert_eq!(Status::Conflict, response.status());
        let response = delete_candidate_response(
            &client,
            &owner,
            election.id,
            post.id,
            post.candidates[0].id,
        )
        .await;
        assert_eq!(Status::Conflict, response.status());

        assert_eq!(stored(&elections, election.id).await.posts, election.posts);
    }

    #[backend_test]
    async fn only_the_owner_edits_the_ballot(client: Client, elections: Coll<Election>) {
        let owner = VoterIdentity::example1();
        let stranger = VoterIdentity::example2();
        let election = upcoming(&elections, &owner).await;
        let post = &election.posts[0];

        let response =
            add_post_response(&client, &stranger, election.id, &PostSpec::example1()).await;
        assert_eq!(Status::Forbidden, response.status());
        let response = delete_candidate_response(
            &client,
            &stranger,
            election.id,
            post.id,
            post.candidates[0].id,
        )
        .await;
        assert_eq!(Status::Forbidden, response.status());

        // Unknown election.
        let response = add_post_response(&client, &owner, Id::new(), &PostSpec::example1()).await;
        assert_eq!(Status::NotFound, response.status());

        assert_eq!(stored(&elections, election.id).await.posts, election.posts);
    }

    #[backend_test]
    async fn candidates_join_and_leave_the_allow_list(
        client: Client,
        elections: Coll<Election>,
        allowed_voters: Coll<AllowedVoter>,
    ) {
        let owner = VoterIdentity::example1();
        let voter = VoterIdentity::example2();
        let election = upcoming(&elections, &owner).await;
        let (president, treasurer) = (&election.posts[0], &election.posts[1]);

        // Standing for a post puts the candidate on the allow-list.
        let spec = CandidateSpec::example_with_email(&voter.email.to_uppercase());
        let response =
            add_candidate_response(&client, &owner, election.id, president.id, &spec).await;
        assert_eq!(Status::Created, response.status());
        let first: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(listed(&allowed_voters, &election).await, vec![voter.email.clone()]);

        // Once per post, but they may stand for another.
        let response =
            add_candidate_response(&client, &owner, election.id, president.id, &spec).await;
        assert_eq!(Status::Conflict, response.status());
        let response =
            add_candidate_response(&client, &owner, election.id, treasurer.id, &spec).await;
        assert_eq!(Status::Created, response.status());
        let second: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();

        // Unknown post or candidate.
        let response = add_candidate_response(&client, &owner, election.id, Id::new(), &spec).await;
        assert_eq!(Status::NotFound, response.status());
        let response =
            delete_candidate_response(&client, &owner, election.id, president.id, *second.id)
                .await;
        assert_eq!(Status::NotFound, response.status());

        // Withdrawing from one post keeps them listed for the other.
        let response =
            delete_candidate_response(&client, &owner, election.id, president.id, *first.id)
                .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(listed(&allowed_voters, &election).await, vec![voter.email.clone()]);

        // Deleting the other post drops them entirely.
        let response = delete_post_response(&client, &owner, election.id, treasurer.id).await;
        assert_eq!(Status::Ok, response.status());
        assert!(listed(&allowed_voters, &election).await.is_empty());

        let stored = stored(&elections, election.id).await;
        assert_eq!(stored.posts, vec![president.clone()]);
    }

    #[backend_test]
    async fn owner_stays_listed_as_candidate(
        client: Client,
        elections: Coll<Election>,
        allowed_voters: Coll<AllowedVoter>,
    ) {
        let owner = VoterIdentity::example1();
        let election = upcoming(&elections, &owner).await;
        let post = &election.posts[0];

        let spec = CandidateSpec::example_with_email(&owner.email);
        let response = add_candidate_response(&client, &owner, election.id, post.id, &spec).await;
        assert_eq!(Status::Created, response.status());
        let candidate: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(listed(&allowed_voters, &election).await, vec![owner.email.clone()]);

        let response =
            delete_candidate_response(&client, &owner, election.id, post.id, *candidate.id).await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(listed(&allowed_voters, &election).await, vec![owner.email.clone()]);
    }

    #[test]
    fn orphans_exclude_the_owner_and_other_posts() {
        let owner = VoterIdentity::example1();
        let mut election = Election::current_example(owner.id);
        election.posts[0].candidates[0].email = Some("ada@example.com".to_string());
        election.posts[0].candidates[1].email = Some(owner.email.clone());
        election.posts[1].candidates[0].email = Some("ada@example.com".to_string());
        let first_post = election.posts[0].id;

        let orphans = orphaned_emails(&election, &owner.email, |post_id, _| post_id == first_post);
        assert!(orphans.is_empty());

        let orphans = orphaned_emails(&election, &owner.email, |_, _| true);
        assert_eq!(orphans, vec!["ada@example.com".to_string()]);
    }

    async fn stored(elections: &Coll<Election>, election_id: Id) -> Election {
        elections
            .find_one(election_id.as_doc(), None)
            .await
            .unwrap()
            .unwrap()
    }

    async fn listed(allowed_voters: &Coll<AllowedVoter>, election: &Election) -> Vec<String> {
        let mut emails: Vec<String> = allowed_voters
            .find(doc! { "election_id": election.id }, None)
            .await
            .unwrap()
            .map_ok(|entry| entry.allowed.email)
            .try_collect()
            .await
            .unwrap();
        emails.sort();
        emails
    }

    async fn add_post_response<'c>(
        client: &'c Client,
        owner: &VoterIdentity,
        election_id: Id,
        spec: &PostSpec,
    ) -> LocalResponse<'c> {
        client
            .post(uri!(add_post(election_id)))
            .header(ContentType::JSON)
            .header(crate::auth_header(client, owner))
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await
    }

    async fn delete_post_response<'c>(
        client: &'c Client,
        owner: &VoterIdentity,
        election_id: Id,
        post_id: Id,
    ) -> LocalResponse<'c> {
        client
            .delete(uri!(delete_post(election_id, post_id)))
            .header(crate::auth_header(client, owner))
            .dispatch()
            .await
    }

    async fn add_candidate_response<'c>(
        client: &'c Client,
        owner: &VoterIdentity,
        election_id: Id,
        post_id: Id,
        spec: &CandidateSpec,
    ) -> LocalResponse<'c> {
        client
            .post(uri!(add_candidate(election_id, post_id)))
            .header(ContentType::JSON)
            .header(crate::auth_header(client, owner))
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await
    }

    async fn delete_candidate_response<'c>(
        client: &'c Client,
        owner: &VoterIdentity,
        election_id: Id,
        post_id: Id,
        candidate_id: Id,
    ) -> LocalResponse<'c> {
        client
            .delete(uri!(delete_candidate(election_id, post_id, candidate_id)))
            .header(crate::auth_header(client, owner))
            .dispatch()
            .await
    }
}
