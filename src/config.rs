use chrono::Duration;
use mongodb::{error::Error as DbError, Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{de::DeserializeOwned, Deserialize};

use crate::model::mongodb::ensure_indexes_exist;

/// Database used unless `db_name` says otherwise.
pub const DATABASE_NAME: &str = "election";

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Lifetime of tokens minted by [`crate::model::api::auth::AuthToken::encode`].
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Key shared with the identity provider that signs voter tokens.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Reject settings that would make every token invalid or forgeable.
    fn check(&self) -> Result<(), &'static str> {
        if self.jwt_secret.is_empty() {
            return Err("`jwt_secret` must not be empty");
        }
        if self.auth_ttl == 0 {
            return Err("`auth_ttl` must be at least one second");
        }
        Ok(())
    }
}

/// Pull a config section out of the figment, pretty-printing any failure.
fn extract<T: DeserializeOwned>(rocket: &Rocket<Build>, section: &str) -> Option<T> {
    match rocket.figment().extract::<T>() {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load {section} config");
            rocket::config::pretty_print_error(e);
            None
        }
    }
}

/// Loads and checks the application config, then manages it.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = extract::<Config>(&rocket, "application") else {
            return Err(rocket);
        };
        if let Err(problem) = config.check() {
            error!("Invalid application config: {problem}");
            return Err(rocket);
        }

        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
    // non-secrets
    #[serde(default = "default_db_name")]
    db_name: String,
}

fn default_db_name() -> String {
    DATABASE_NAME.to_string()
}

impl DbConfig {
    /// Connect and make sure the vote ledger's unique index is in place.
    async fn connect(&self) -> Result<(MongoClient, Database), DbError> {
        let client = MongoClient::with_uri_str(&self.db_uri).await?;
        let db = client.database(&self.db_name);
        ensure_indexes_exist(&db).await?;
        Ok((client, db))
    }
}

/// Connects to MongoDB and manages both a `Client` (for transactions) and a
/// `Database` (for collections).
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = extract::<DbConfig>(&rocket, "database") else {
            return Err(rocket);
        };
        info!("Connecting to database `{}`...", config.db_name);

        match config.connect().await {
            Ok((client, db)) => {
                info!("...database connection online!");
                Ok(rocket.manage(client).manage(db))
            }
            Err(e) => {
                error!("Failed to set up database: {e}");
                Err(rocket)
            }
        }
    }
}
