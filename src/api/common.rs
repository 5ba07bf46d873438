use chrono::{DateTime, Utc};
use mongodb::{bson::doc, options::UpdateOptions, ClientSession};

use crate::engine::{
    eligibility::{check_eligibility, normalise_email, Eligibility},
    window::WindowState,
};
use crate::error::{Error, Result};
use crate::model::{
    common::{
        election::{ElectionId, Visibility},
        voter::VoterIdentity,
    },
    db::{allowed_voter::AllowedVoter, election::Election},
    mongodb::Coll,
};

/// Get an election by ID, or a 404.
pub async fn election_by_id(election_id: ElectionId, elections: &Coll<Election>) -> Result<Election> {
    elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))
}

/// Get an election that the caller owns.
///
/// Returns 404 if it does not exist and 403 if someone else owns it.
pub async fn owned_election(
    election_id: ElectionId,
    voter: &VoterIdentity,
    elections: &Coll<Election>,
) -> Result<Election> {
    let election = election_by_id(election_id, elections).await?;
    if election.owner_id != voter.id {
        return Err(Error::forbidden(format!(
            "Only the owner may manage election {election_id}"
        )));
    }
    Ok(election)
}

/// The allow-list entries of `election` that could match `voter`.
///
/// Public elections need no allow-list, so this skips the lookup for them.
/// Private ones yield at most one entry: the caller's own normalised e-mail.
pub async fn allowed_emails_for(
    election: &Election,
    voter: &VoterIdentity,
    allowed_voters: &Coll<AllowedVoter>,
) -> Result<Vec<String>> {
    if election.visibility == Visibility::Public {
        return Ok(Vec::new());
    }
    let filter = doc! {
        "election_id": election.id,
        "email": normalise_email(&voter.email),
    };
    let entry = allowed_voters.find_one(filter, None).await?;
    Ok(entry.into_iter().map(|entry| entry.allowed.email).collect())
}

/// Ensure the caller may see this election at all: its owner, or anyone
/// eligible to vote in it.
///
/// Private elections are reported as missing to everyone else, so their
/// existence does not leak.
pub async fn ensure_can_view(
    election: &Election,
    voter: &VoterIdentity,
    allowed_voters: &Coll<AllowedVoter>,
) -> Result<()> {
    if election.owner_id == voter.id {
        return Ok(());
    }
    let allowed = allowed_emails_for(election, voter, allowed_voters).await?;
    let allowed = allowed.iter().map(String::as_str);
    match check_eligibility(election.visibility, allowed, voter) {
        Eligibility::Eligible => Ok(()),
        Eligibility::Ineligible => Err(Error::not_found(format!("Election {}", election.id))),
    }
}

/// Refuse to change what is on the ballot, or when, once voting has opened.
pub fn ensure_not_started(election: &Election, now: DateTime<Utc>) -> Result<()> {
    if election.window_state(now) == WindowState::NotStarted {
        Ok(())
    } else {
        Err(Error::conflict(format!(
            "Voting in election {} has already opened",
            election.id
        )))
    }
}

/// Put these normalised e-mails on the allow-list, skipping any already there.
///
/// Upserts rather than inserts, since a duplicate key would abort the
/// surrounding transaction.
pub async fn allow_emails<'a>(
    election_id: ElectionId,
    emails: impl IntoIterator<Item = &'a str>,
    allowed_voters: &Coll<AllowedVoter>,
    session: &mut ClientSession,
) -> Result<()> {
    let options = UpdateOptions::builder().upsert(true).build();
    for email in emails {
        let entry = doc! {
            "election_id": election_id,
            "email": email,
        };
        let update = doc! { "$set": entry.clone() };
        allowed_voters
            .update_one_with_session(entry, update, options.clone(), session)
            .await?;
    }
    Ok(())
}
