//! Vote admission and tallying.
//!
//! Everything here is independent of HTTP: the routes in [`crate::api`] fetch
//! the election data and hand it over, and the [`ledger::VoteLedger`] is the
//! only thing that writes votes.

pub mod admission;
pub mod eligibility;
pub mod ledger;
pub mod tally;
pub mod window;
