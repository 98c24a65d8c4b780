use super::record::{
    CLIENT_ID, Credential, CredentialStatus, LAST_MODIFIED_AT, LAST_REFRESHED_AT,
    LEGACY_DIAGNOSTIC_FIELDS, REFRESH_TOKEN, STATUS, TAGS, identity_eq,
};
use crate::error::KeeperError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The local credential store: one JSON object mapping identity to record,
/// read and written as a whole.
///
/// Entries are kept as raw JSON so that fields this crate does not know
/// about, and their order, survive a rewrite untouched.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<Self, KeeperError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeeperError::StoreNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let Value::Object(entries) = serde_json::from_str::<Value>(&contents)? else {
            return Err(KeeperError::StoreShape);
        };
        debug!(path = %path.display(), count = entries.len(), "credential store loaded");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Like [`CredentialStore::load`], but a missing file is an empty store.
    pub fn load_or_default(path: &Path) -> Result<Self, KeeperError> {
        match Self::load(path) {
            Err(KeeperError::StoreNotFound(_)) => Ok(Self {
                path: path.to_path_buf(),
                entries: Map::new(),
            }),
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry in file order, paired with its credential when complete.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value, Option<Credential>)> + '_ {
        self.entries
            .iter()
            .map(|(identity, entry)| (identity.as_str(), entry, Credential::from_entry(identity, entry)))
    }

    /// Stored key matching `identity` case-insensitively; an exact match wins.
    pub fn find_key(&self, identity: &str) -> Option<&str> {
        if let Some((key, _)) = self.entries.get_key_value(identity) {
            return Some(key.as_str());
        }
        self.entries
            .keys()
            .find(|key| identity_eq(key, identity))
            .map(String::as_str)
    }

    /// Record a rotated refresh token. Only the token and the two timestamps
    /// are written; every other field stays as it was.
    pub fn apply_refresh(&mut self, identity: &str, refresh_token: &str, at: DateTime<Utc>) -> bool {
        let Some(key) = self.find_key(identity).map(str::to_string) else {
            return false;
        };
        let Some(Value::Object(record)) = self.entries.get_mut(&key) else {
            return false;
        };
        let stamp = Value::String(timestamp(at));
        record.insert(REFRESH_TOKEN.to_string(), Value::String(refresh_token.to_string()));
        record.insert(LAST_REFRESHED_AT.to_string(), stamp.clone());
        record.insert(LAST_MODIFIED_AT.to_string(), stamp);
        true
    }

    /// Authorization write-back: upsert a freshly obtained credential.
    ///
    /// An existing entry keeps its key casing and its `tags`; stale
    /// diagnostic fields are removed and the status becomes active. Returns
    /// the key the credential is stored under.
    pub fn save_authorized(
        &mut self,
        identity: &str,
        refresh_token: &str,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> String {
        let key = self
            .find_key(identity)
            .map(str::to_string)
            .unwrap_or_else(|| identity.to_string());

        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Some(record) = entry.as_object_mut() else {
            return key;
        };

        for field in LEGACY_DIAGNOSTIC_FIELDS {
            record.remove(*field);
        }
        record.insert(REFRESH_TOKEN.to_string(), Value::String(refresh_token.to_string()));
        record.insert(CLIENT_ID.to_string(), Value::String(client_id.to_string()));
        record.insert(
            STATUS.to_string(),
            serde_json::to_value(CredentialStatus::Active).unwrap_or(Value::Null),
        );
        record.insert(LAST_MODIFIED_AT.to_string(), Value::String(timestamp(at)));
        if !record.get(TAGS).is_some_and(Value::is_array) {
            record.insert(TAGS.to_string(), Value::Array(Vec::new()));
        }
        key
    }

    /// Replace the file in one step: write a sibling temp file, flush it to
    /// disk, then rename it over the store.
    pub fn save(&self) -> Result<(), KeeperError> {
        let body = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, body.as_bytes())
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), KeeperError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry<'a>(store: &'a CredentialStore, identity: &str) -> &'a Value {
        let key = store.find_key(identity).expect("identity present");
        &store.entries[key]
    }

    fn write_store(dir: &TempDir, value: &Value) -> PathBuf {
        let path = dir.path().join("accounts.json");
        fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn missing_and_malformed_files_are_distinct_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            CredentialStore::load(&missing),
            Err(KeeperError::StoreNotFound(_))
        ));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(CredentialStore::load(&broken), Err(KeeperError::Json(_))));

        let list = dir.path().join("list.json");
        fs::write(&list, "[]").unwrap();
        assert!(matches!(CredentialStore::load(&list), Err(KeeperError::StoreShape)));

        assert!(CredentialStore::load_or_default(&missing).unwrap().is_empty());
    }

    #[test]
    fn apply_refresh_touches_only_token_and_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            &json!({
                "Foo@Bar.com": {
                    "refresh_token": "old",
                    "client_id": "cid",
                    "tags": ["vip", "eu"],
                    "note": "hand edited"
                }
            }),
        );
        let mut store = CredentialStore::load(&path).unwrap();
        assert!(store.apply_refresh("foo@bar.com", "new", Utc::now()));
        store.save().unwrap();

        let reloaded = CredentialStore::load(&path).unwrap();
        let entry = entry(&reloaded, "FOO@bar.com");
        assert_eq!(entry["refresh_token"], "new");
        assert_eq!(entry["client_id"], "cid");
        assert_eq!(entry["tags"], json!(["vip", "eu"]));
        assert_eq!(entry["note"], "hand edited");
        assert!(entry["last_refreshed_at"].is_string());
        assert_eq!(reloaded.find_key("foo@bar.com"), Some("Foo@Bar.com"));
        assert!(!dir.path().join(".accounts.json.tmp").exists());
    }

    #[test]
    fn save_authorized_reuses_existing_casing_and_clears_diagnostics() {
        let dir = TempDir::new().unwrap();
        let path = write_store(
            &dir,
            &json!({
                "Alice@Example.com": {
                    "refresh_token": "stale",
                    "client_id": "cid",
                    "status": "expired",
                    "last_error": "AADSTS70000",
                    "tags": ["team-a"]
                }
            }),
        );
        let mut store = CredentialStore::load(&path).unwrap();
        let key = store.save_authorized("alice@example.com", "fresh", "cid-2", Utc::now());
        assert_eq!(key, "Alice@Example.com");
        assert_eq!(store.len(), 1);

        let entry = entry(&store, "alice@example.com");
        assert_eq!(entry["refresh_token"], "fresh");
        assert_eq!(entry["client_id"], "cid-2");
        assert_eq!(entry["status"], "active");
        assert_eq!(entry["tags"], json!(["team-a"]));
        assert!(entry.get("last_error").is_none());
        assert!(entry["last_modified_at"].is_string());
    }

    #[test]
    fn save_authorized_creates_entry_with_empty_tags() {
        let dir = TempDir::new().unwrap();
        let mut store = CredentialStore::load_or_default(&dir.path().join("a.json")).unwrap();
        store.save_authorized("New@Example.com", "rt", "cid", Utc::now());
        store.save().unwrap();

        let reloaded = CredentialStore::load(store.path()).unwrap();
        let entry = entry(&reloaded, "New@Example.com");
        assert_eq!(entry["tags"], json!([]));
        assert_eq!(reloaded.entries().filter(|(_, _, cred)| cred.is_some()).count(), 1);
    }
}
