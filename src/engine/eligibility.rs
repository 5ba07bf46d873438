use crate::model::common::{election::Visibility, voter::VoterIdentity};

/// Whether a voter may vote in an election.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible,
}

/// Canonical form of an e-mail address for allow-list matching.
pub fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Decide eligibility from an election's visibility and allow-list.
///
/// `allowed_voters` only needs to contain the entries that could match this
/// voter; for public elections it is ignored entirely.
pub fn check_eligibility<'a>(
    visibility: Visibility,
    allowed_voters: impl IntoIterator<Item = &'a str>,
    voter: &VoterIdentity,
) -> Eligibility {
    match visibility {
        Visibility::Public => Eligibility::Eligible,
        Visibility::Private => {
            let email = normalise_email(&voter.email);
            if allowed_voters
                .into_iter()
                .any(|allowed| normalise_email(allowed) == email)
            {
                Eligibility::Eligible
            } else {
                Eligibility::Ineligible
            }
        }
    }
}
