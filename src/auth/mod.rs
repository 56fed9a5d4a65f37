//! Persistent store of API refresh and access tokens.
//!
//! The store is a JSON file holding two lists. Every time it is opened,
//! expired tokens and the previous run's master pair are dropped and a new
//! master pair is recorded from the seeds handed in by the caller.
//!
//! ```no_run
//! use manga_mirrors::auth::{MasterTokens, TokenStore};
//!
//! let mut store = TokenStore::open("tokens.json", MasterTokens::generate())?;
//! let refresh = store.generate_refresh(false)?;
//! let access = store.generate_access(&refresh, false)?;
//! assert!(store.find_access(&access.token).is_some());
//! # Ok::<(), manga_mirrors::auth::TokenStoreError>(())
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SEVEN_DAYS_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const FIVE_MINUTES_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Token store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Long-lived token exchanged for access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    /// Expiry, unix milliseconds
    pub expire: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub master: bool,
}

impl RefreshToken {
    pub fn is_expired(&self) -> bool {
        self.expire < now_ms()
    }
}

/// Short-lived token authorizing requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    /// Expiry, unix milliseconds
    pub expire: i64,
    /// Refresh token this one was issued from
    pub parent: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub master: bool,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        self.expire < now_ms()
    }

    pub fn is_child_of(&self, refresh: &RefreshToken) -> bool {
        self.parent == refresh.token
    }
}

/// Seeds of the master pair recorded on open
#[derive(Debug, Clone)]
pub struct MasterTokens {
    pub access: String,
    pub refresh: String,
}

impl MasterTokens {
    pub fn generate() -> Self {
        Self {
            access: random_token(),
            refresh: random_token(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    #[serde(default)]
    refresh_tokens: Vec<RefreshToken>,
    #[serde(default)]
    authorized_tokens: Vec<AccessToken>,
}

/// JSON-backed token store. Every mutation is written through to disk.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    data: TokenData,
}

impl TokenStore {
    /// Open (or create) the store at `path` and record a fresh master pair
    pub fn open(path: impl AsRef<Path>, master: MasterTokens) -> Result<Self, TokenStoreError> {
        let path = path.as_ref().to_path_buf();
        let mut data: TokenData = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            TokenData::default()
        };

        let before = data.refresh_tokens.len() + data.authorized_tokens.len();
        data.refresh_tokens.retain(|t| !t.is_expired() && !t.master);
        data.authorized_tokens.retain(|t| !t.is_expired() && !t.master);
        let pruned = before - data.refresh_tokens.len() - data.authorized_tokens.len();

        let expire = now_ms() + SEVEN_DAYS_MS;
        data.authorized_tokens.push(AccessToken {
            token: master.access,
            expire,
            parent: master.refresh.clone(),
            master: true,
        });
        data.refresh_tokens.push(RefreshToken {
            token: master.refresh,
            expire,
            master: true,
        });

        let store = Self { path, data };
        store.persist()?;
        tracing::debug!(
            "Opened token store {} ({} pruned)",
            store.path.display(),
            pruned
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refresh_tokens(&self) -> &[RefreshToken] {
        &self.data.refresh_tokens
    }

    pub fn access_tokens(&self) -> &[AccessToken] {
        &self.data.authorized_tokens
    }

    /// Issue a refresh token valid for seven days
    pub fn generate_refresh(&mut self, master: bool) -> Result<RefreshToken, TokenStoreError> {
        let refresh = RefreshToken {
            token: random_token(),
            expire: now_ms() + SEVEN_DAYS_MS,
            master,
        };
        self.data.refresh_tokens.push(refresh.clone());
        self.persist()?;
        Ok(refresh)
    }

    /// Issue an access token valid for five minutes under `refresh`
    pub fn generate_access(
        &mut self,
        refresh: &RefreshToken,
        master: bool,
    ) -> Result<AccessToken, TokenStoreError> {
        let access = AccessToken {
            token: random_token(),
            expire: now_ms() + FIVE_MINUTES_MS,
            parent: refresh.token.clone(),
            master,
        };
        self.data.authorized_tokens.push(access.clone());
        self.persist()?;
        Ok(access)
    }

    pub fn find_access(&self, token: &str) -> Option<&AccessToken> {
        self.data.authorized_tokens.iter().find(|t| t.token == token)
    }

    pub fn find_refresh(&self, token: &str) -> Option<&RefreshToken> {
        self.data.refresh_tokens.iter().find(|t| t.token == token)
    }

    /// Remove an access token; returns whether it existed
    pub fn revoke_access(&mut self, token: &str) -> Result<bool, TokenStoreError> {
        let before = self.data.authorized_tokens.len();
        self.data.authorized_tokens.retain(|t| t.token != token);
        let removed = self.data.authorized_tokens.len() != before;
        self.persist()?;
        Ok(removed)
    }

    /// Remove a refresh token and every access token issued from it
    pub fn revoke_refresh(&mut self, token: &str) -> Result<bool, TokenStoreError> {
        let before = self.data.refresh_tokens.len();
        self.data.authorized_tokens.retain(|t| t.parent != token);
        self.data.refresh_tokens.retain(|t| t.token != token);
        let removed = self.data.refresh_tokens.len() != before;
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }
}

/// 32 random bytes, hex encoded
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeds(access: &str, refresh: &str) -> MasterTokens {
        MasterTokens {
            access: access.to_string(),
            refresh: refresh.to_string(),
        }
    }

    #[test]
    fn test_open_records_master_pair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        let store = TokenStore::open(&path, seeds("acc", "ref")).unwrap();

        assert!(path.exists());
        let access = store.find_access("acc").unwrap();
        let refresh = store.find_refresh("ref").unwrap();
        assert!(access.master && refresh.master);
        assert!(access.is_child_of(refresh));
        assert!(!access.is_expired());
    }

    #[test]
    fn test_reopen_prunes_master_and_expired_tokens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        let kept = {
            let mut store = TokenStore::open(&path, seeds("acc1", "ref1")).unwrap();
            store.generate_refresh(false).unwrap()
        };

        let raw = fs::read_to_string(&path).unwrap();
        let mut json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        json["refreshTokens"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({ "token": "old", "expire": 1 }));
        fs::write(&path, json.to_string()).unwrap();

        let store = TokenStore::open(&path, seeds("acc2", "ref2")).unwrap();
        assert!(store.find_refresh("ref1").is_none());
        assert!(store.find_access("acc1").is_none());
        assert!(store.find_refresh("old").is_none());
        assert!(store.find_refresh(&kept.token).is_some());
        assert!(store.find_refresh("ref2").is_some());
    }

    #[test]
    fn test_generated_tokens() {
        let dir = TempDir::new().unwrap();
        let mut store = TokenStore::open(dir.path().join("t.json"), MasterTokens::generate()).unwrap();

        let refresh = store.generate_refresh(false).unwrap();
        let access = store.generate_access(&refresh, false).unwrap();

        assert_eq!(refresh.token.len(), 64);
        assert!(refresh.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(refresh.token, access.token);
        assert_eq!(access.parent, refresh.token);

        let ttl = access.expire - now_ms();
        assert!(ttl > 0 && ttl <= FIVE_MINUTES_MS);
        assert!(refresh.expire - access.expire > SEVEN_DAYS_MS - FIVE_MINUTES_MS - 1000);
    }

    #[test]
    fn test_revoke_refresh_cascades() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.json");
        let mut store = TokenStore::open(&path, MasterTokens::generate()).unwrap();

        let refresh = store.generate_refresh(false).unwrap();
        let a = store.generate_access(&refresh, false).unwrap();
        let b = store.generate_access(&refresh, false).unwrap();

        assert!(store.revoke_access(&a.token).unwrap());
        assert!(!store.revoke_access(&a.token).unwrap());

        assert!(store.revoke_refresh(&refresh.token).unwrap());
        assert!(store.find_access(&b.token).is_none());
        assert!(store.find_refresh(&refresh.token).is_none());

        let on_disk: TokenData = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.refresh_tokens.len(), 1);
        assert_eq!(on_disk.authorized_tokens.len(), 1);
    }

    #[test]
    fn test_random_token_is_32_bytes_of_lowercase_hex() {
        let token = random_token();
        assert_eq!(token, token.to_ascii_lowercase());
        assert_eq!(hex::decode(&token).unwrap().len(), 32);
        assert_ne!(token, random_token());
    }

    #[test]
    fn test_expiry() {
        let expired = RefreshToken {
            token: "x".into(),
            expire: now_ms() - 1,
            master: false,
        };
        assert!(expired.is_expired());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TokenStore::open(&path, MasterTokens::generate()),
            Err(TokenStoreError::Json(_))
        ));
    }
}
