use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::crypto::{CryptoError, SignatureError};
use crate::model::ids::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    BsonSer(#[from] mongodb::bson::ser::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Ballot box {0} is not mixed")]
    NotMixed(String),
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),
    #[error("Similar request previously treated but for different request payload: {0}")]
    IdempotencyConflict(String),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Vote decoding failed: {0}")]
    Decoding(String),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = match self {
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::NotMixed(_) => Status::Forbidden,
            Self::SignatureVerification(_) => Status::UnprocessableEntity,
            Self::Status(status, _) => status,
            Self::Db(_)
            | Self::BsonSer(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::Crypto(_)
            | Self::Signature(_)
            | Self::IdempotencyConflict(_)
            | Self::Broker(_)
            | Self::Decoding(_) => Status::InternalServerError,
        };
        if status.class() == rocket::http::StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        Err(status)
    }
}

/// A protocol-level failure of one hop.
///
/// These never escape a worker: the message text travels back to the
/// orchestrator in [`crate::model::state::MixnetState::mixnet_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixnetError {
    #[error("Node to visit is expected to be {expected}, but was {actual}")]
    Misaddressed { expected: NodeId, actual: NodeId },
    #[error("payload contains null/missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("payload was produced by node {actual}, but node {expected} was expected")]
    OutOfOrder { expected: NodeId, actual: NodeId },
    #[error("node {0} cannot start from the initial payload")]
    UnexpectedInitialPayload(NodeId),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("Incompatible input arguments: {0}")]
    IncompatibleArguments(String),
    #[error("mixing computation failed: {0}")]
    Computation(String),
    #[error("signing the shuffle payload failed: {0}")]
    Signing(String),
}

impl From<CryptoError> for MixnetError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::IncompatibleArguments(msg) => Self::IncompatibleArguments(msg),
            other => Self::Computation(other.to_string()),
        }
    }
}
