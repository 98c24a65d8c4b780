use crate::error::KeeperError;
use thiserror::Error as ThisError;

/// Provider code: the client registration is confidential and a secret is
/// required, but the refresh was sent as a public client.
pub const CONFIDENTIAL_CLIENT_REQUIRED: &str = "AADSTS70002";
/// Provider code: the refresh token is malformed, revoked or expired.
pub const TOKEN_INVALID_OR_EXPIRED: &str = "AADSTS70000";

const MAX_BODY_IN_REASON: usize = 300;

/// Why a single credential could not be refreshed. The `Display` text is the
/// reason recorded in the refresh report.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RefreshFailure {
    #[error("no token returned")]
    NoTokenReturned,

    #[error(
        "client registration requires a client secret (AADSTS70002); register it as a public client"
    )]
    ConfidentialClientRequired,

    #[error("refresh token invalid or expired (AADSTS70000)")]
    TokenInvalidOrExpired,

    #[error("provider rejected refresh: {0}")]
    Rejected(String),

    #[error("request failed: {0}")]
    Transport(String),
}

impl RefreshFailure {
    pub fn classify(err: &KeeperError) -> Self {
        match err {
            KeeperError::Oauth2Server {
                error,
                description,
                status,
            } => {
                let text = match description {
                    Some(desc) => format!("{error}: {desc}"),
                    None => error.clone(),
                };
                Self::from_provider_text(&text)
                    .unwrap_or_else(|| Self::Rejected(with_status(*status, &truncate(&text))))
            }
            KeeperError::Oauth2Response { body, status } => Self::from_provider_text(body)
                .unwrap_or_else(|| {
                    Self::Rejected(with_status(
                        *status,
                        &format!("unexpected response: {}", truncate(body)),
                    ))
                }),
            KeeperError::Oauth2Token(msg) => Self::Transport(msg.clone()),
            other => Self::Transport(other.to_string()),
        }
    }

    fn from_provider_text(text: &str) -> Option<Self> {
        if text.contains(CONFIDENTIAL_CLIENT_REQUIRED) {
            Some(Self::ConfidentialClientRequired)
        } else if text.contains(TOKEN_INVALID_OR_EXPIRED) {
            Some(Self::TokenInvalidOrExpired)
        } else {
            None
        }
    }
}

fn with_status(status: Option<u16>, text: &str) -> String {
    match status {
        Some(code) => format!("HTTP {code}: {text}"),
        None => text.to_string(),
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_BODY_IN_REASON) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
