use crate::credentials::Credential;
use crate::credentials::record::{CLIENT_ID, REFRESH_TOKEN};
use crate::error::KeeperError;
use serde_json::{Map, Value};
use sqlx::FromRow;

/// A row of the destination table as read back for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RemoteRecord {
    /// Casing as stored; every later write targets exactly this value.
    pub email: String,
    pub data: String,
}

/// The JSON document held in a remote row's `data` column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupDocument(Map<String, Value>);

impl BackupDocument {
    /// Anything that is not a JSON object decodes as an empty document.
    pub fn decode(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self::default(),
        }
    }

    /// Initial document for a new row: only the fields known locally.
    pub fn for_credential(cred: &Credential) -> Self {
        let mut map = Map::new();
        map.insert(REFRESH_TOKEN.to_string(), Value::String(cred.refresh_token.clone()));
        map.insert(CLIENT_ID.to_string(), Value::String(cred.client_id.clone()));
        Self(map)
    }

    /// Overwrite whichever of `refresh_token` / `client_id` differ from the
    /// local credential. Other fields are kept. Returns whether anything
    /// changed.
    pub fn merge_credential(&mut self, cred: &Credential) -> bool {
        let mut changed = false;
        for (key, local) in [
            (REFRESH_TOKEN, cred.refresh_token.as_str()),
            (CLIENT_ID, cred.client_id.as_str()),
        ] {
            if self.0.get(key).and_then(Value::as_str) != Some(local) {
                self.0.insert(key.to_string(), Value::String(local.to_string()));
                changed = true;
            }
        }
        changed
    }

    pub fn encode(&self) -> Result<String, KeeperError> {
        Ok(serde_json::to_string(&self.0)?)
    }
}
