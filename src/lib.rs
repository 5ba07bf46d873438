#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Assemble the server: routes, request logging, config, and the database.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
}

/// Connect to the database named by `db_uri`.
#[cfg(test)]
async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("Could not connect to database")
}

/// A fresh database name, so tests running in parallel never share data.
#[cfg(test)]
fn database() -> String {
    use rand::Rng;

    let id = rand::thread_rng().gen::<u64>();
    format!("test{id}")
}

/// A server on an already-connected database, in place of the database fairing.
#[cfg(test)]
async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("Could not create indexes");

    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .manage(client)
        .manage(db)
}

/// An `Authorization` header carrying a freshly signed token for `voter`.
#[cfg(test)]
fn auth_header(
    client: &rocket::local::asynchronous::Client,
    voter: &model::common::voter::VoterIdentity,
) -> rocket::http::Header<'static> {
    let config = client
        .rocket()
        .state::<Config>()
        .expect("Config not managed");
    let jwt = model::api::auth::AuthToken::new(voter.clone()).encode(config);
    rocket::http::Header::new("Authorization", format!("Bearer {jwt}"))
}
