//! Data-source layer for app clients.
//!
//! - [`remote`]: HTTP client whose every outcome is an [`ApiResponse`]
//! - [`storage::LocalStore`]: on-device settings, JSON blobs and expiring cache
//! - [`storage::SecureStore`]: access/refresh and push tokens in the OS keychain
//!   or an encrypted vault
//! - [`Ds`] / [`DataSource`]: the facade that initializes the three in order
//!
//! ```no_run
//! # async fn run() -> Result<(), app_datasource_lib::DataSourceError> {
//! use app_datasource_lib::{remote::RequestOptions, ApiResponse, Config, Ds};
//!
//! let ds = Ds::new(Config::default());
//! ds.initialize().await?;
//!
//! let me: ApiResponse<serde_json::Value> = ds.remote().get("/me", RequestOptions::new()).await;
//! if me.error_code() == Some("UNAUTHORIZED") {
//!     ds.clear_all().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod facade;
pub mod remote;
pub mod storage;

pub use config::Config;
pub use facade::{DataSource, DataSourceError, Ds};
pub use remote::{ApiResponse, RemoteClient};
