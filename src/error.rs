use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("invalid or missing {0}")]
    InvalidArgument(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0} must be unique")]
    MustUniqueError(String),

    #[error("payment intent is not settled: {0}")]
    InvalidState(String),

    #[error("upstream service error: {0}")]
    UpstreamFailure(String),

    #[error("{0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid identity token")]
    InvalidToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::InvalidArgument(..)
            | Error::NotFound(..)
            | Error::NoResource
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::MustUniqueError(..)
            | Error::InvalidState(..)
            | Error::UpstreamFailure(..)
            | Error::HttpClientError(..)
            | Error::DatabaseError(..)
            | Error::BSONSerError(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match &self {
            Self::ValidationError(..) | Self::InvalidArgument(..) | Self::InvalidState(..) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(UnauthorizedType::MissingCredential) => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(UnauthorizedType::InvalidToken) | Self::Forbidden => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(..) | Self::NoResource => StatusCode::NOT_FOUND,
            Self::MustUniqueError(..) => StatusCode::CONFLICT,
            Self::UpstreamFailure(..)
            | Self::HttpClientError(..)
            | Self::DatabaseError(..)
            | Self::BSONSerError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl Error {
    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            InvalidArgument(..),
            NotFound(..),
            NoResource!,
            Unauthorized(..),
            Forbidden!,
            MustUniqueError(..),
            InvalidState(..),
            UpstreamFailure(..),
            HttpClientError(..),
            DatabaseError(..),
            BSONSerError(..)
        }
        .to_string()
    }

    /// Translate a duplicate-key write failure into a uniqueness conflict,
    /// leaving every other database error untouched.
    pub fn or_unique(self, field: &str) -> Self {
        match &self {
            Self::DatabaseError(err) if is_duplicate_key(err) => {
                Self::MustUniqueError(field.to_string())
            }
            _ => self,
        }
    }
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        ErrorKind::Command(command) => command.code == 11000,
        _ => false,
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}
