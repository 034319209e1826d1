//! The data-source facade: remote, local and secure storage behind one
//! context, initialized in dependency order.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{Config, RemoteConfig};
use crate::remote::{RemoteClient, RemoteError};
use crate::storage::{LocalStore, LocalStoreError, SecureStore, SecureStoreError};

const NOT_INITIALIZED: &str = "DataSource not initialized: await Ds::initialize() before use";

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("Secure store: {0}")]
    Secure(#[from] SecureStoreError),
    #[error("Local store: {0}")]
    Local(#[from] LocalStoreError),
    #[error("Remote client: {0}")]
    Remote(#[from] RemoteError),
}

pub type Result<T> = std::result::Result<T, DataSourceError>;

/// A ready-to-use set of data sources. Only obtainable through
/// initialization, so holding one means every store is open.
pub struct DataSource {
    secure: Arc<SecureStore>,
    local: LocalStore,
    remote: RemoteClient,
}

impl DataSource {
    pub async fn initialize(config: &Config) -> Result<Self> {
        Self::from_stores(
            &config.remote,
            SecureStore::new(config.secure.clone()),
            LocalStore::new(config.local.clone()),
        )
        .await
    }

    /// Initialize caller-built stores: secure, then local, then the remote
    /// client bound to the ready secure store.
    pub async fn from_stores(
        remote: &RemoteConfig,
        secure: SecureStore,
        local: LocalStore,
    ) -> Result<Self> {
        secure.initialize().await?;
        local.initialize().await?;
        let secure = Arc::new(secure);
        let remote = RemoteClient::new(remote, secure.clone())?;
        log::info!("Data sources initialized ({})", remote.base_url());
        Ok(Self {
            secure,
            local,
            remote,
        })
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn secure(&self) -> &SecureStore {
        &self.secure
    }

    /// Logout: forget the auth tokens, then wipe local storage.
    /// The push token is device-bound and survives.
    pub async fn clear_all(&self) -> Result<()> {
        self.secure.clear_tokens().await?;
        self.local.clear_all().await?;
        log::info!("Cleared all stored data");
        Ok(())
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.local.clear_cache().await?;
        Ok(())
    }

    pub async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.secure.has_tokens().await?)
    }
}

/// Lazily initialized [`DataSource`] for call sites that hold the facade
/// before startup has finished.
///
/// Accessors panic when called before [`Ds::initialize`] completes: that is
/// a startup-ordering bug, not a runtime condition.
pub struct Ds {
    config: Config,
    context: OnceCell<DataSource>,
}

impl Ds {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            context: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs initialization once. Concurrent callers wait for the in-flight
    /// attempt; after a failure the next call tries again.
    pub async fn initialize(&self) -> Result<&DataSource> {
        self.context
            .get_or_try_init(|| DataSource::initialize(&self.config))
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.context.initialized()
    }

    pub fn try_context(&self) -> Option<&DataSource> {
        self.context.get()
    }

    pub fn context(&self) -> &DataSource {
        match self.context.get() {
            Some(context) => context,
            None => panic!("{}", NOT_INITIALIZED),
        }
    }

    pub fn remote(&self) -> &RemoteClient {
        self.context().remote()
    }

    pub fn local(&self) -> &LocalStore {
        self.context().local()
    }

    pub fn secure(&self) -> &SecureStore {
        self.context().secure()
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.context().clear_all().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.context().clear_cache().await
    }

    pub async fn is_logged_in(&self) -> Result<bool> {
        self.context().is_logged_in().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ApiResponse, RequestOptions};
    use crate::storage::{LocalBackend, SecureBackend};
    use axum::{http::HeaderMap, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn memory_ds() -> Ds {
        Ds::new(Config::in_memory(RemoteConfig::default()))
    }

    #[test]
    #[should_panic(expected = "not initialized")]
    fn test_remote_before_initialize_panics() {
        memory_ds().remote();
    }

    #[test]
    #[should_panic(expected = "not initialized")]
    fn test_local_before_initialize_panics() {
        memory_ds().local();
    }

    #[test]
    #[should_panic(expected = "not initialized")]
    fn test_secure_before_initialize_panics() {
        memory_ds().secure();
    }

    #[tokio::test]
    #[should_panic(expected = "not initialized")]
    async fn test_clear_all_before_initialize_panics() {
        let _ = memory_ds().clear_all().await;
    }

    #[tokio::test]
    async fn test_accessors_after_initialize() {
        let ds = memory_ds();
        assert!(!ds.is_initialized());
        assert!(ds.try_context().is_none());

        ds.initialize().await.unwrap();
        assert!(ds.is_initialized());
        assert!(ds.secure().is_initialized());
        assert!(ds.local().is_initialized());
        assert_eq!(ds.remote().base_url(), "http://localhost:8080/api");
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_shared() {
        let ds = memory_ds();
        let (a, b) = tokio::join!(ds.initialize(), ds.initialize());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(std::ptr::eq(a, b));

        ds.local().set_string("k", "v").await.unwrap();
        let again = ds.initialize().await.unwrap();
        assert!(std::ptr::eq(a, again));
        // Re-initializing did not reset the stores.
        assert_eq!(ds.local().get_string("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_failed_initialize_can_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, b"garbage").unwrap();

        let ds = Ds::new(Config {
            remote: RemoteConfig::default(),
            local: LocalBackend::File { path: path.clone() },
            secure: SecureBackend::Memory,
        });
        assert!(matches!(
            ds.initialize().await,
            Err(DataSourceError::Local(LocalStoreError::Serde(_)))
        ));
        assert!(!ds.is_initialized());

        std::fs::remove_file(&path).unwrap();
        ds.initialize().await.unwrap();
        assert!(ds.is_initialized());
    }

    #[tokio::test]
    async fn test_login_state_and_clear_all() {
        let ds = memory_ds();
        ds.initialize().await.unwrap();
        assert!(!ds.is_logged_in().await.unwrap());

        ds.secure().set_tokens("access", Some("refresh")).await.unwrap();
        ds.secure().set_fcm_token("push").await.unwrap();
        ds.local().set_string("theme", "dark").await.unwrap();
        ds.local()
            .set_cache_item("feed", &vec![1], Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(ds.is_logged_in().await.unwrap());

        ds.clear_all().await.unwrap();
        assert!(!ds.is_logged_in().await.unwrap());
        assert_eq!(ds.local().get_string("theme").await.unwrap(), None);
        assert_eq!(ds.local().get_cache_item::<Vec<i32>>("feed").await.unwrap(), None);
        assert_eq!(ds.secure().fcm_token().await.unwrap().as_deref(), Some("push"));

        // Still usable after the wipe.
        ds.local().set_string("theme", "light").await.unwrap();
        assert_eq!(ds.local().get_string("theme").await.unwrap().as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn test_clear_cache_keeps_session() {
        let ds = memory_ds();
        ds.initialize().await.unwrap();
        ds.secure().set_tokens("access", None).await.unwrap();
        ds.local().set_bool("onboarded", true).await.unwrap();
        ds.local().set_cache_item("feed", &1, None).await.unwrap();

        ds.clear_cache().await.unwrap();
        assert!(ds.is_logged_in().await.unwrap());
        assert_eq!(ds.local().get_bool("onboarded").await.unwrap(), Some(true));
        assert_eq!(ds.local().get_cache_item::<i32>("feed").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_uses_secure_store_token() {
        let app = Router::new().route(
            "/whoami",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Json(json!({ "auth": auth }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let ds = Ds::new(Config::in_memory(RemoteConfig {
            base_url: format!("http://{}", addr),
            ..RemoteConfig::default()
        }));
        ds.initialize().await.unwrap();

        let resp: ApiResponse<Value> = ds.remote().get("/whoami", RequestOptions::new()).await;
        assert_eq!(resp.data(), Some(&json!({"auth": null})));

        ds.secure().set_tokens("tok", None).await.unwrap();
        let resp: ApiResponse<Value> = ds.remote().get("/whoami", RequestOptions::new()).await;
        assert_eq!(resp.data(), Some(&json!({"auth": "Bearer tok"})));

        ds.clear_all().await.unwrap();
        let resp: ApiResponse<Value> = ds.remote().get("/whoami", RequestOptions::new()).await;
        assert_eq!(resp.data(), Some(&json!({"auth": null})));
    }
}
