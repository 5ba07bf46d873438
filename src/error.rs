use jsonwebtoken::errors::Error as JwtError;
use mongodb::{
    bson::{oid::Error as OidError, ser::Error as BsonSerError},
    error::Error as DbError,
};
use rocket::{
    http::Status,
    response::{self, status, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::engine::admission::Rejection;
use crate::model::api::election::SpecError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    BsonSer(#[from] BsonSerError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    OidParse(#[from] OidError),
    #[error("{1}")]
    Status(Status, String),
    #[error("Vote rejected: {0}")]
    Rejected(#[from] Rejection),
}

impl Error {
    /// A 404 for the named resource.
    pub fn not_found(what: impl AsRef<str>) -> Self {
        Self::Status(Status::NotFound, format!("{} not found", what.as_ref()))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Status(Status::Forbidden, msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Status(Status::Conflict, msg.into())
    }
}

impl From<SpecError> for Error {
    fn from(err: SpecError) -> Self {
        match err {
            SpecError::EmptyName => Self::bad_request("Names and titles must not be empty"),
            SpecError::InvalidWindow => Self::bad_request("Election must end after it starts"),
            SpecError::DuplicateTitle => Self::bad_request("Post titles must be unique"),
            SpecError::InvalidEmail => Self::bad_request("Candidate e-mail is not an address"),
        }
    }
}

/// Body sent back with a rejected vote.
#[derive(Debug, Serialize)]
struct RejectionBody {
    code: Rejection,
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        match self {
            Self::Rejected(rejection) => {
                let body = RejectionBody {
                    code: rejection,
                    message: rejection.to_string(),
                };
                status::Custom(rejection.status(), Json(body)).respond_to(req)
            }
            Self::Status(code, msg) => {
                if code.code >= 500 {
                    error!("{msg}");
                }
                status::Custom(code, msg).respond_to(req)
            }
            Self::Db(err) => {
                error!("Database error: {err}");
                Err(Status::InternalServerError)
            }
            Self::BsonSer(err) => {
                error!("Could not encode document: {err}");
                Err(Status::InternalServerError)
            }
            Self::OidParse(_) => Err(Status::BadRequest),
            Self::Jwt(_) => Err(Status::Unauthorized),
        }
    }
}
