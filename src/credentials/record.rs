use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REFRESH_TOKEN: &str = "refresh_token";
pub const CLIENT_ID: &str = "client_id";
pub const STATUS: &str = "status";
pub const TAGS: &str = "tags";
pub const LAST_MODIFIED_AT: &str = "last_modified_at";
pub const LAST_REFRESHED_AT: &str = "last_refreshed_at";

/// Diagnostic fields left behind by earlier failures; dropped when a
/// credential is saved again through the authorization path.
pub const LEGACY_DIAGNOSTIC_FIELDS: &[&str] = &[
    "error",
    "error_description",
    "last_error",
    "failed_at",
    "disabled_reason",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    #[serde(other)]
    Unknown,
}

/// The refresh material of one complete store entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub identity: String,
    pub refresh_token: String,
    pub client_id: String,
}

impl Credential {
    /// Returns `None` for incomplete entries (missing, blank or non-string
    /// `refresh_token` / `client_id`, or an entry that is not an object).
    pub fn from_entry(identity: &str, entry: &Value) -> Option<Self> {
        let refresh_token = non_empty_str(entry, REFRESH_TOKEN)?;
        let client_id = non_empty_str(entry, CLIENT_ID)?;
        Some(Self {
            identity: identity.to_string(),
            refresh_token: refresh_token.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// Name of the first required field the entry lacks.
    pub fn missing_field(entry: &Value) -> Option<&'static str> {
        if non_empty_str(entry, REFRESH_TOKEN).is_none() {
            Some(REFRESH_TOKEN)
        } else if non_empty_str(entry, CLIENT_ID).is_none() {
            Some(CLIENT_ID)
        } else {
            None
        }
    }
}

/// Case-folded comparison used for every identity lookup.
pub fn identity_eq(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

fn non_empty_str<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
