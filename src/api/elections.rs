use chrono::Utc;
use mongodb::{bson::doc, options::FindOptions, Client};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    response::status,
    serde::json::Json,
    Route, State,
};

use crate::engine::{eligibility::normalise_email, window::is_valid_window};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        election::{ElectionDescription, ElectionSpec, SpecError, WindowSpec},
    },
    common::election::ElectionId,
    db::{
        allowed_voter::{AllowedVoter, NewAllowedVoter},
        election::Election,
        vote::Vote,
    },
    mongodb::{is_duplicate_key_error, Coll, Id},
};

use super::common::{
    allow_emails, election_by_id, ensure_can_view, ensure_not_started, owned_election,
};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        get_election,
        modify_window,
        delete_election,
        add_allowed_voters,
        remove_allowed_voter,
    ]
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    token: AuthToken,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<status::Custom<Json<ElectionDescription>>> {
    let election = spec.0.into_election(token.id)?;

    // The owner can always vote in their own election, and so can candidates
    // with an account.
    let mut allowed = election
        .candidates()
        .filter_map(|(_, candidate)| candidate.email.clone())
        .collect::<Vec<_>>();
    allowed.push(normalise_email(&token.email));
    allowed.sort();
    allowed.dedup();

    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        elections
            .insert_one_with_session(&election, None, &mut session)
            .await
            .map_err(|err| {
                if is_duplicate_key_error(&err) {
                    Error::conflict("You have already created an election with this name")
                } else {
                    err.into()
                }
            })?;
        allow_emails(
            election.id,
            allowed.iter().map(String::as_str),
            &allowed_voters,
            &mut session,
        )
        .await?;

        session.commit_transaction().await?;
    }
    info!("Created election {} owned by {}", election.id, token.id);

    let mut description = ElectionDescription::new(election, Utc::now());
    description.allowed_voters = Some(allowed);
    Ok(status::Custom(Status::Created, Json(description)))
}

#[get("/elections/<election_id>")]
async fn get_election(
    token: AuthToken,
    election_id: Id,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<Json<ElectionDescription>> {
    let election = election_by_id(election_id, &elections).await?;
    ensure_can_view(&election, &token, &allowed_voters).await?;

    let is_owner = election.owner_id == token.id;
    let mut description = ElectionDescription::new(election, Utc::now());
    if is_owner {
        description.allowed_voters = Some(allow_list(election_id, &allowed_voters).await?);
    }
    Ok(Json(description))
}

/// Move the voting window. Only possible until voting opens, and never once
/// a vote exists.
#[put("/elections/<election_id>/window", data = "<window>", format = "json")]
async fn modify_window(
    token: AuthToken,
    election_id: Id,
    window: Json<WindowSpec>,
    elections: Coll<Election>,
    votes: Coll<Vote>,
) -> Result<Json<ElectionDescription>> {
    let election = owned_election(election_id, &token, &elections).await?;
    if !is_valid_window(window.start_time, window.end_time) {
        return Err(SpecError::InvalidWindow.into());
    }

    let now = Utc::now();
    ensure_not_started(&election, now)?;
    let cast = votes
        .count_documents(doc! { "election_id": election_id }, None)
        .await?;
    if cast > 0 {
        return Err(Error::conflict(format!(
            "Election {election_id} already has votes"
        )));
    }

    // Re-check the start time in the update itself, in case voting opened
    // since we read the election.
    let filter = doc! {
        "_id": election_id,
        "start_time": { "$gt": now },
    };
    let update = doc! {
        "$set": {
            "start_time": window.start_time,
            "end_time": window.end_time,
        }
    };
    let result = elections.update_one(filter, update, None).await?;
    if result.matched_count != 1 {
        return Err(Error::conflict(format!(
            "Voting in election {election_id} opened meanwhile"
        )));
    }
    info!(
        "Moved window of election {election_id} to {} - {}",
        window.start_time, window.end_time
    );

    let updated = election_by_id(election_id, &elections).await?;
    Ok(Json(ElectionDescription::new(updated, now)))
}

#[delete("/elections/<election_id>")]
async fn delete_election(
    token: AuthToken,
    election_id: Id,
    elections: Coll<Election>,
    votes: Coll<Vote>,
    allowed_voters: Coll<AllowedVoter>,
    db_client: &State<Client>,
) -> Result<()> {
    owned_election(election_id, &token, &elections).await?;

    // Atomically delete the election and everything hanging off it.
    {
        let mut session = db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        elections
            .delete_one_with_session(election_id.as_doc(), None, &mut session)
            .await?;

        let filter = doc! {
            "election_id": election_id,
        };
        let deleted = votes
            .delete_many_with_session(filter.clone(), None, &mut session)
            .await?;
        allowed_voters
            .delete_many_with_session(filter, None, &mut session)
            .await?;

        session.commit_transaction().await?;
        info!(
            "Deleted election {election_id} and {} votes",
            deleted.deleted_count
        );
    }

    Ok(())
}

/// Add e-mails to the allow-list, returning those that were not already on it.
#[post("/elections/<election_id>/allowed-voters", data = "<emails>", format = "json")]
async fn add_allowed_voters(
    token: AuthToken,
    election_id: Id,
    emails: Json<Vec<String>>,
    elections: Coll<Election>,
    allowed_voters: Coll<NewAllowedVoter>,
) -> Result<Json<Vec<String>>> {
    owned_election(election_id, &token, &elections).await?;

    let entries = emails
        .0
        .iter()
        .map(|email| NewAllowedVoter::new(election_id, email))
        .collect::<Vec<_>>();
    if let Some(bad) = entries.iter().find(|entry| !entry.email.contains('@')) {
        return Err(Error::bad_request(format!(
            "Not an e-mail address: '{}'",
            bad.email
        )));
    }

    let mut added = Vec::new();
    for entry in entries {
        match allowed_voters.insert_one(&entry, None).await {
            Ok(_) => added.push(entry.email),
            Err(err) if is_duplicate_key_error(&err) => {
                debug!("{} already allowed in {election_id}", entry.email);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(Json(added))
}

#[delete("/elections/<election_id>/allowed-voters/<email>")]
async fn remove_allowed_voter(
    token: AuthToken,
    election_id: Id,
    email: &str,
    elections: Coll<Election>,
    allowed_voters: Coll<AllowedVoter>,
) -> Result<()> {
    owned_election(election_id, &token, &elections).await?;

    let filter = doc! {
        "election_id": election_id,
        "email": normalise_email(email),
    };
    let result = allowed_voters.delete_one(filter, None).await?;
    if result.deleted_count == 0 {
        Err(Error::not_found(format!("Allowed voter {email}")))
    } else {
        Ok(())
    }
}

/// The full allow-list of an election, alphabetically.
async fn allow_list(election_id: ElectionId, allowed_voters: &Coll<AllowedVoter>) -> Result<Vec<String>> {
    let options = FindOptions::builder().sort(doc! { "email": 1 }).build();
    let emails = allowed_voters
        .find(doc! { "election_id": election_id }, options)
        .await?
        .map_ok(|entry| entry.allowed.email)
        .try_collect()
        .await?;
    Ok(emails)
}
