//! Secure token storage
//! - macOS/iOS: Keychain
//! - Windows: Credential Manager
//! - Linux and elsewhere: AES-256-GCM encrypted vault file (see [`super::encrypted`])
//!
//! On Linux the keyring backend is kernel keyutils. Its keys live in the
//! session keyring and are gone after logout or reboot, so it is only used
//! when configured explicitly and the default there is the vault file.

use async_trait::async_trait;
use keyring::credential::CredentialBuilderApi;
use keyring::Entry;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::encrypted::{Vault, VaultCredential, VaultError};
#[cfg(target_os = "linux")]
use crate::config::{data_dir, DEFAULT_APP_ID};
use crate::remote::TokenProvider;

pub const DEFAULT_SERVICE_NAME: &str = "com.appdatasource";
#[cfg(target_os = "linux")]
pub const DEFAULT_VAULT_FILE: &str = "secure.vault";

pub mod keys {
    /// Access and refresh token, stored together as one JSON credential.
    pub const AUTH_TOKENS: &str = "auth_tokens";
    pub const FCM_TOKEN: &str = "fcm_token";
}

#[derive(Debug, thiserror::Error)]
pub enum SecureStoreError {
    #[error("Secure store used before initialize()")]
    NotInitialized,
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("Keystore task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SecureStoreError>;

/// Where secrets are kept.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecureBackend {
    /// The OS keychain, under the given service name.
    Keyring { service: String },
    /// An encrypted vault file. Without a password the key is derived from
    /// the machine identity.
    EncryptedFile {
        path: PathBuf,
        #[serde(default)]
        password: Option<String>,
    },
    /// Process-local mock credentials. Nothing is persisted.
    Memory,
}

impl Default for SecureBackend {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        SecureBackend::EncryptedFile {
            path: data_dir(DEFAULT_APP_ID).join(DEFAULT_VAULT_FILE),
            password: None,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        SecureBackend::Keyring {
            service: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl fmt::Debug for SecureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecureBackend::Keyring { service } => {
                f.debug_struct("Keyring").field("service", service).finish()
            }
            SecureBackend::EncryptedFile { path, password } => f
                .debug_struct("EncryptedFile")
                .field("path", path)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            SecureBackend::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

struct Handles {
    tokens: Arc<Entry>,
    fcm: Arc<Entry>,
}

/// Access/refresh token pair plus the push-notification token.
pub struct SecureStore {
    backend: SecureBackend,
    handles: OnceCell<Handles>,
}

impl SecureStore {
    pub fn new(backend: SecureBackend) -> Self {
        Self {
            backend,
            handles: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &SecureBackend {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.handles.initialized()
    }

    /// Open the underlying keystore. Safe to call more than once.
    pub async fn initialize(&self) -> Result<()> {
        self.handles
            .get_or_try_init(|| open_handles(self.backend.clone()))
            .await?;
        Ok(())
    }

    /// Overwrite both tokens in a single keystore write.
    pub async fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let pair = TokenPair {
            access_token: Some(access_token.to_string()),
            refresh_token: refresh_token.map(str::to_string),
        };
        write_json(self.handles()?.tokens.clone(), &pair).await?;
        log::debug!("Stored auth tokens");
        Ok(())
    }

    pub async fn tokens(&self) -> Result<TokenPair> {
        let pair = read_json(self.handles()?.tokens.clone()).await?;
        Ok(pair.unwrap_or_default())
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.tokens().await?.access_token)
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.tokens().await?.refresh_token)
    }

    pub async fn has_tokens(&self) -> Result<bool> {
        Ok(self.access_token().await?.is_some())
    }

    pub async fn clear_tokens(&self) -> Result<()> {
        delete(self.handles()?.tokens.clone()).await?;
        log::debug!("Cleared auth tokens");
        Ok(())
    }

    pub async fn set_fcm_token(&self, token: &str) -> Result<()> {
        write(self.handles()?.fcm.clone(), token.to_string()).await
    }

    pub async fn fcm_token(&self) -> Result<Option<String>> {
        read(self.handles()?.fcm.clone()).await
    }

    pub async fn clear_fcm_token(&self) -> Result<()> {
        delete(self.handles()?.fcm.clone()).await
    }

    fn handles(&self) -> Result<&Handles> {
        self.handles.get().ok_or(SecureStoreError::NotInitialized)
    }
}

#[async_trait]
impl TokenProvider for SecureStore {
    async fn bearer_token(&self) -> Option<String> {
        match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Could not read access token, sending request without it: {}", e);
                None
            }
        }
    }
}

async fn open_handles(backend: SecureBackend) -> Result<Handles> {
    let handles = match backend {
        SecureBackend::Keyring { service } => Handles {
            tokens: Arc::new(Entry::new(&service, keys::AUTH_TOKENS)?),
            fcm: Arc::new(Entry::new(&service, keys::FCM_TOKEN)?),
        },
        SecureBackend::EncryptedFile { path, password } => {
            let vault = Arc::new(Vault::new(path, password.as_deref()));
            let opened = vault.clone();
            blocking(move || opened.open().map_err(SecureStoreError::from)).await?;
            log::debug!("Opened secure vault at {}", vault.path().display());
            Handles {
                tokens: Arc::new(Entry::new_with_credential(Box::new(VaultCredential::new(
                    vault.clone(),
                    keys::AUTH_TOKENS,
                )))),
                fcm: Arc::new(Entry::new_with_credential(Box::new(VaultCredential::new(
                    vault,
                    keys::FCM_TOKEN,
                )))),
            }
        }
        SecureBackend::Memory => {
            let builder = keyring::mock::MockCredentialBuilder {};
            Handles {
                tokens: Arc::new(Entry::new_with_credential(builder.build(
                    None,
                    DEFAULT_SERVICE_NAME,
                    keys::AUTH_TOKENS,
                )?)),
                fcm: Arc::new(Entry::new_with_credential(builder.build(
                    None,
                    DEFAULT_SERVICE_NAME,
                    keys::FCM_TOKEN,
                )?)),
            }
        }
    };
    Ok(handles)
}

/// Keychain backends may block (and some `block_on` internally), so every
/// call runs on the blocking pool.
async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

async fn read(entry: Arc<Entry>) -> Result<Option<String>> {
    blocking(move || match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    })
    .await
}

async fn write(entry: Arc<Entry>, value: String) -> Result<()> {
    blocking(move || entry.set_password(&value).map_err(SecureStoreError::from)).await
}

async fn delete(entry: Arc<Entry>) -> Result<()> {
    blocking(move || match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
        Err(e) => Err(e.into()),
    })
    .await
}

async fn write_json<T: Serialize>(entry: Arc<Entry>, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    write(entry, json).await
}

async fn read_json<T: DeserializeOwned>(entry: Arc<Entry>) -> Result<Option<T>> {
    match read(entry).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}
