pub mod cache;
pub mod encrypted;
pub mod keyring;
pub mod local;

pub use self::cache::CacheEntry;
pub use self::keyring::{SecureBackend, SecureStore, SecureStoreError, TokenPair};
pub use self::local::{LocalBackend, LocalStore, LocalStoreError};
