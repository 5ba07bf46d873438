use std::ops::Deref;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{api::id::ApiId, common::voter::VoterIdentity};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";
const BEARER_PREFIX: &str = "Bearer ";

/// An authentication token carrying a validated caller identity.
///
/// Tokens are issued by the identity provider, which shares our JWT secret;
/// this service only ever trusts what a correctly signed, unexpired token says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    voter: VoterIdentity,
}

impl AuthToken {
    pub fn new(voter: VoterIdentity) -> Self {
        Self { voter }
    }

    /// Sign this token into a JWT that expires after the configured lifetime.
    #[allow(clippy::missing_panics_doc)]
    pub fn encode(&self, config: &Config) -> String {
        let claims = Claims::new(self, Utc::now() + config.auth_ttl());

        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings")
    }

    /// Verify and decode a JWT.
    pub fn decode(jwt: &str, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            jwt,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.into_token())?;
        Ok(token)
    }
}

impl Deref for AuthToken {
    type Target = VoterIdentity;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

/// Token claims: the identity plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "sub")]
    id: ApiId,
    email: String,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

impl Claims {
    fn new(token: &AuthToken, expire_at: DateTime<Utc>) -> Self {
        Self {
            id: token.id.into(),
            email: token.email.clone(),
            expire_at,
        }
    }

    fn into_token(self) -> AuthToken {
        AuthToken::new(VoterIdentity {
            id: *self.id,
            email: self.email,
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    /// Get an [`AuthToken`] from the `Authorization: Bearer` header, falling
    /// back to the auth cookie.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let bearer = req
            .headers()
            .get_one("Authorization")
            .and_then(|header| header.strip_prefix(BEARER_PREFIX));
        let jwt = match bearer {
            Some(jwt) => jwt.to_string(),
            None => match req.cookies().get(AUTH_TOKEN_COOKIE) {
                Some(cookie) => cookie.value().to_string(),
                None => {
                    return Outcome::Failure((
                        Status::Unauthorized,
                        Error::Status(Status::Unauthorized, "Missing auth token".to_string()),
                    ))
                }
            },
        };

        match Self::decode(&jwt, config) {
            Ok(token) => Outcome::Success(token),
            Err(err) => {
                debug!("Rejected auth token: {err}");
                Outcome::Failure((Status::Unauthorized, err))
            }
        }
    }
}
