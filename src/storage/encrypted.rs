//! AES-256-GCM encrypted vault file for secrets on platforms without a
//! usable OS keychain.
//!
//! The vault is a single JSON blob holding a `key -> secret` map. Every write
//! re-encrypts the whole map with a fresh nonce. The salt is chosen when the
//! file is first created.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::credential::CredentialApi;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Encryption error")]
    Encryption,
    #[error("Decryption error")]
    Decryption,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Key derivation error")]
    KeyDerivation,
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Serialize, Deserialize)]
struct EncryptedBlob {
    salt: String,       // Base64 encoded
    nonce: String,      // Base64 encoded
    ciphertext: String, // Base64 encoded
}

/// Derive a 256-bit key from a password using Argon2id
fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|_| VaultError::KeyDerivation)?;
    Ok(key)
}

/// Get machine-specific identifier for key derivation
fn machine_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let username = whoami::username();

    format!("{}@{}", username, hostname)
}

fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// The vault after its key has been derived, with the decrypted map.
struct Unlocked {
    salt: [u8; SALT_SIZE],
    key: [u8; 32],
    map: HashMap<String, String>,
}

impl Unlocked {
    fn fresh(key_source: &str) -> Result<Self> {
        let salt = random_salt();
        let key = derive_key(key_source, &salt)?;
        Ok(Self {
            salt,
            key,
            map: HashMap::new(),
        })
    }

    fn decrypt(blob: &EncryptedBlob, key_source: &str) -> Result<Self> {
        let salt: [u8; SALT_SIZE] = BASE64
            .decode(&blob.salt)?
            .try_into()
            .map_err(|_| VaultError::Decryption)?;
        let nonce_bytes = BASE64.decode(&blob.nonce)?;
        let ciphertext = BASE64.decode(&blob.ciphertext)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(VaultError::Decryption);
        }

        let key = derive_key(key_source, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::Decryption)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| VaultError::Decryption)?;
        let map = serde_json::from_slice(&plaintext)?;
        Ok(Self { salt, key, map })
    }

    /// Encrypts `map` under this vault's key with a fresh nonce.
    fn encrypt(&self, map: &HashMap<String, String>) -> Result<EncryptedBlob> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let plaintext = serde_json::to_vec(map)?;
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| VaultError::Encryption)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| VaultError::Encryption)?;

        Ok(EncryptedBlob {
            salt: BASE64.encode(self.salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        })
    }
}

/// An encrypted `key -> secret` map persisted in one file.
///
/// The key is derived once, the first time the vault is opened. Later reads
/// are served from the decrypted map and writes reuse the derived key.
pub struct Vault {
    path: PathBuf,
    key_source: String,
    // Also serializes read-modify-write cycles from credentials sharing this vault.
    state: Mutex<Option<Unlocked>>,
}

impl Vault {
    /// Uses `password` for key derivation, or the machine identity if absent.
    pub fn new(path: PathBuf, password: Option<&str>) -> Self {
        let key_source = password
            .map(|p| p.to_string())
            .unwrap_or_else(machine_id);
        Self {
            path,
            key_source,
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the vault is readable with our key. A missing file is fine.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.unlock(&mut state).map(|_| ())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.unlock(&mut state)?.map.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let unlocked = self.unlock(&mut state)?;
        let mut next = unlocked.map.clone();
        next.insert(key.to_string(), value.to_string());
        self.write_map(unlocked, &next)?;
        unlocked.map = next;
        Ok(())
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let unlocked = self.unlock(&mut state)?;
        if !unlocked.map.contains_key(key) {
            return Ok(false);
        }
        let mut next = unlocked.map.clone();
        next.remove(key);
        self.write_map(unlocked, &next)?;
        unlocked.map = next;
        Ok(true)
    }

    /// Loads the vault on first use. A failed load leaves it locked.
    fn unlock<'a>(&self, state: &'a mut Option<Unlocked>) -> Result<&'a mut Unlocked> {
        let unlocked = match state.take() {
            Some(unlocked) => unlocked,
            None => self.load()?,
        };
        Ok(state.insert(unlocked))
    }

    fn load(&self) -> Result<Unlocked> {
        let blob_json = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Unlocked::fresh(&self.key_source)
            }
            Err(e) => return Err(e.into()),
        };
        let blob: EncryptedBlob = serde_json::from_str(&blob_json)?;
        Unlocked::decrypt(&blob, &self.key_source)
    }

    /// Writes to a sibling temp file, then renames it over the vault, so the
    /// file on disk is always a complete blob.
    fn write_map(&self, unlocked: &Unlocked, map: &HashMap<String, String>) -> Result<()> {
        let blob = unlocked.encrypt(map)?;
        let blob_json = serde_json::to_string_pretty(&blob)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        // rw------- (owner r/w only)
        #[cfg(unix)]
        opts.mode(0o600);

        let mut file = opts.open(&tmp)?;
        file.write_all(blob_json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn vault_err_to_keyring_err(err: VaultError) -> keyring::Error {
    match err {
        VaultError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            keyring::Error::NoStorageAccess(e.into())
        }
        other => keyring::Error::PlatformFailure(other.into()),
    }
}

/// One slot of a [`Vault`], exposed as a keyring credential so the secure
/// store can treat every backend uniformly.
pub struct VaultCredential {
    vault: Arc<Vault>,
    key: String,
}

impl VaultCredential {
    pub fn new(vault: Arc<Vault>, key: &str) -> Self {
        Self {
            vault,
            key: key.to_string(),
        }
    }
}

impl CredentialApi for VaultCredential {
    fn set_password(&self, password: &str) -> keyring::Result<()> {
        self.vault
            .set(&self.key, password)
            .map_err(vault_err_to_keyring_err)
    }

    fn set_secret(&self, secret: &[u8]) -> keyring::Result<()> {
        let password = std::str::from_utf8(secret)
            .map_err(|_| keyring::Error::BadEncoding(secret.to_vec()))?;
        self.set_password(password)
    }

    fn get_password(&self) -> keyring::Result<String> {
        self.vault
            .get(&self.key)
            .map_err(vault_err_to_keyring_err)?
            .ok_or(keyring::Error::NoEntry)
    }

    fn get_secret(&self) -> keyring::Result<Vec<u8>> {
        self.get_password().map(String::into_bytes)
    }

    fn delete_credential(&self) -> keyring::Result<()> {
        match self.vault.remove(&self.key) {
            Ok(true) => Ok(()),
            Ok(false) => Err(keyring::Error::NoEntry),
            Err(e) => Err(vault_err_to_keyring_err(e)),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
