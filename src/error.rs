use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use sqlx::Error as SqlxError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum KeeperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("credential store not found: {}", .0.display())]
    StoreNotFound(PathBuf),

    #[error("credential store must be a JSON object keyed by identity")]
    StoreShape,

    #[error("unsupported database url scheme: {0}")]
    UnsupportedDatabase(String),

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server {
        error: String,
        description: Option<String>,
        /// HTTP status of the token response, when it was observed.
        status: Option<u16>,
    },

    #[error("OAuth2 unexpected response: {body}")]
    Oauth2Response { body: String, status: Option<u16> },
}

impl From<figment::Error> for KeeperError {
    fn from(e: figment::Error) -> Self {
        KeeperError::Config(Box::new(e))
    }
}

impl KeeperError {
    /// Attach the token response's HTTP status to a provider failure.
    pub fn with_http_status(self, code: u16) -> Self {
        match self {
            KeeperError::Oauth2Server {
                error, description, ..
            } => KeeperError::Oauth2Server {
                error,
                description,
                status: Some(code),
            },
            KeeperError::Oauth2Response { body, .. } => KeeperError::Oauth2Response {
                body,
                status: Some(code),
            },
            other => other,
        }
    }

    /// Transport-level failures worth another attempt; provider verdicts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeeperError::Reqwest(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            KeeperError::DatabaseError(e) => matches!(
                e,
                SqlxError::Io(_) | SqlxError::PoolTimedOut | SqlxError::Tls(_)
            ),
            KeeperError::Oauth2Token(_) => true,
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for KeeperError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => KeeperError::Oauth2Server {
                error: err.error().to_string(),
                description: err.error_description().cloned(),
                status: None,
            },
            RequestTokenError::Request(req_e) => KeeperError::Oauth2Token(req_e.to_string()),
            RequestTokenError::Parse(_parse_err, body) => KeeperError::Oauth2Response {
                body: String::from_utf8_lossy(&body).into_owned(),
                status: None,
            },
            RequestTokenError::Other(s) => KeeperError::Oauth2Response {
                body: s,
                status: None,
            },
        }
    }
}
