//! HTTP client for the application backend.
//!
//! Every call resolves to an [`ApiResponse`]: transport failures, timeouts
//! and error statuses are folded into the response instead of surfacing as
//! errors, so callers never branch on exceptions.

pub mod auth;
pub mod request;
pub mod response;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RemoteConfig;

pub use auth::*;
pub use request::{RequestOptions, UploadForm, UploadFile};
pub use response::{error_codes, ApiFailure, ApiResponse, WireBody};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(config.cookies)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> ApiResponse<T> {
        self.request(Method::GET, path, opts).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> ApiResponse<T> {
        self.request(Method::POST, path, opts).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> ApiResponse<T> {
        self.request(Method::PUT, path, opts).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> ApiResponse<T> {
        self.request(Method::PATCH, path, opts).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, opts: RequestOptions) -> ApiResponse<T> {
        self.request(Method::DELETE, path, opts).await
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> ApiResponse<T> {
        let req = opts.apply(self.client.request(method, self.url(path)));
        self.send(req, opts.requires_auth).await
    }

    /// Multipart POST. Scalar fields of `opts.data` are sent as text parts.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        form: UploadForm,
        opts: RequestOptions,
    ) -> ApiResponse<T> {
        let multipart = match form.with_data(opts.data.as_ref()).into_multipart() {
            Ok(multipart) => multipart,
            Err(e) => {
                log::warn!("Could not build multipart form for {}: {}", path, e);
                return response::from_transport_error(&e);
            }
        };
        let req = opts
            .apply_meta(self.client.post(self.url(path)))
            // Sets the multipart Content-Type with its boundary
            .multipart(multipart);
        self.send(req, opts.requires_auth).await
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        requires_auth: bool,
    ) -> ApiResponse<T> {
        let req = if requires_auth {
            match self.tokens.bearer_token().await {
                Some(token) => req.bearer_auth(token),
                None => req,
            }
        } else {
            req
        };

        let req = match req.build() {
            Ok(req) => req,
            Err(e) => {
                log::warn!("Invalid request: {}", e);
                return response::from_transport_error(&e);
            }
        };
        let method = req.method().clone();
        let path = req.url().path().to_string();
        log::debug!("{} {}", method, path);

        let resp = match self.client.execute(req).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("{} {} failed: {}", method, path, e);
                return response::from_transport_error(&e);
            }
        };

        let status = resp.status();
        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("{} {} body read failed: {}", method, path, e);
                return response::from_transport_error(&e);
            }
        };
        let body = WireBody::decode(&bytes);

        if status.is_success() {
            response::from_success(status.as_u16(), body)
        } else {
            log::warn!("{} {} returned {}", method, path, status);
            response::from_error_status(status.as_u16(), &body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::Query,
        http::{HeaderMap as AxumHeaders, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/users/1",
                get(|| async {
                    Json(json!({"status": 200, "message": "ok", "data": {"id": 1, "name": "Ada"}}))
                }),
            )
            .route("/numbers", get(|| async { Json(json!([1, 2, 3])) }))
            .route(
                "/whoami",
                get(|headers: AxumHeaders| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Json(json!({ "auth": auth }))
                }),
            )
            .route(
                "/search",
                get(|Query(q): Query<HashMap<String, String>>| async move { Json(json!(q)) }),
            )
            .route(
                "/echo",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"statusCode": 201, "message": "created", "data": body}))
                })
                .put(|Json(body): Json<Value>| async move { Json(body) })
                .patch(|Json(body): Json<Value>| async move { Json(body) })
                .delete(|| async { StatusCode::NO_CONTENT }),
            )
            .route(
                "/private",
                get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad token"}))) }),
            )
            .route(
                "/broken",
                get(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"status": 500, "message": "Database down", "errorCode": "DB_DOWN"})),
                    )
                }),
            )
            .route(
                "/gateway",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream exploded") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "late"
                }),
            )
            .route(
                "/upload",
                post(|headers: AxumHeaders, body: Bytes| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let text = String::from_utf8_lossy(&body).to_string();
                    Json(json!({
                        "status": 200,
                        "message": "uploaded",
                        "data": {
                            "multipart": content_type.starts_with("multipart/form-data"),
                            "has_file": text.contains("avatar.png") && text.contains("PNGDATA"),
                            "has_caption": text.contains("name=\"caption\"") && text.contains("sunset"),
                            "has_album": text.contains("name=\"album\"") && text.contains("summer"),
                        }
                    }))
                }),
            )
    }

    async fn serve() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base_url: String) -> RemoteConfig {
        RemoteConfig {
            base_url,
            timeout_ms: 500,
            connect_timeout_ms: 500,
            ..RemoteConfig::default()
        }
    }

    async fn client_with_token(token: Option<&str>) -> RemoteClient {
        init_logger();
        let base_url = serve().await;
        RemoteClient::new(
            &config(base_url),
            Arc::new(StaticToken(token.map(str::to_string))),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_envelope_get() {
        let client = client_with_token(None).await;
        let resp: ApiResponse<User> = client.get("/users/1", RequestOptions::new()).await;
        assert!(resp.succeeded());
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.message(), Some("ok"));
        assert_eq!(
            resp.into_data(),
            Some(User {
                id: 1,
                name: "Ada".into()
            })
        );
    }

    #[tokio::test]
    async fn test_raw_get() {
        let client = client_with_token(None).await;
        let resp: ApiResponse<Vec<u32>> = client.get("numbers", RequestOptions::new()).await;
        assert!(resp.succeeded());
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.into_data(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_bearer_token_attached_when_required() {
        let client = client_with_token(Some("tok-123")).await;

        let resp: ApiResponse<Value> = client.get("/whoami", RequestOptions::new()).await;
        assert_eq!(resp.data(), Some(&json!({"auth": "Bearer tok-123"})));

        let resp: ApiResponse<Value> = client.get("/whoami", RequestOptions::new().public()).await;
        assert_eq!(resp.data(), Some(&json!({"auth": null})));
    }

    #[tokio::test]
    async fn test_missing_token_sends_unauthenticated() {
        let client = client_with_token(None).await;
        let resp: ApiResponse<Value> = client.get("/whoami", RequestOptions::new()).await;
        assert!(resp.succeeded());
        assert_eq!(resp.data(), Some(&json!({"auth": null})));
    }

    #[tokio::test]
    async fn test_query_params() {
        let client = client_with_token(None).await;
        let resp: ApiResponse<HashMap<String, String>> = client
            .get("/search", RequestOptions::new().param("q", "rust").param("page", 2))
            .await;
        let data = resp.into_data().unwrap();
        assert_eq!(data.get("q").map(String::as_str), Some("rust"));
        assert_eq!(data.get("page").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_body_verbs() {
        let client = client_with_token(None).await;
        let body = json!({"title": "hello"});

        let resp: ApiResponse<Value> = client
            .post("/echo", RequestOptions::new().json(body.clone()))
            .await;
        assert!(resp.succeeded());
        assert_eq!(resp.status_code(), 201);
        assert_eq!(resp.message(), Some("created"));
        assert_eq!(resp.data(), Some(&body));

        let resp: ApiResponse<Value> = client
            .put("/echo", RequestOptions::new().json(body.clone()))
            .await;
        assert_eq!(resp.data(), Some(&body));

        let resp: ApiResponse<Value> = client
            .patch("/echo", RequestOptions::new().json(body.clone()))
            .await;
        assert_eq!(resp.data(), Some(&body));

        let resp: ApiResponse<Value> = client.delete("/echo", RequestOptions::new()).await;
        assert!(resp.succeeded());
        assert_eq!(resp.status_code(), 204);
        assert_eq!(resp.data(), None);
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let client = client_with_token(Some("expired")).await;
        let resp: ApiResponse<Value> = client.get("/private", RequestOptions::new()).await;
        assert!(!resp.succeeded());
        assert_eq!(resp.status_code(), 401);
        assert_eq!(resp.error_code(), Some(error_codes::UNAUTHORIZED));
        assert_eq!(resp.data(), None);
    }

    #[tokio::test]
    async fn test_server_errors() {
        let client = client_with_token(None).await;

        let resp: ApiResponse<Value> = client.get("/broken", RequestOptions::new()).await;
        assert_eq!(resp.status_code(), 500);
        assert_eq!(resp.error_code(), Some("DB_DOWN"));
        assert_eq!(resp.message(), Some("Database down"));

        let resp: ApiResponse<Value> = client.get("/gateway", RequestOptions::new()).await;
        assert_eq!(resp.status_code(), 502);
        assert_eq!(resp.error_code(), Some(error_codes::SERVER_ERROR));

        let resp: ApiResponse<Value> = client.get("/nope", RequestOptions::new()).await;
        assert_eq!(resp.status_code(), 404);
        assert!(!resp.succeeded());
    }

    #[tokio::test]
    async fn test_timeout() {
        let client = client_with_token(None).await;
        let resp: ApiResponse<Value> = client.get("/slow", RequestOptions::new()).await;
        assert!(!resp.succeeded());
        assert_eq!(resp.status_code(), 408);
        assert_eq!(resp.error_code(), Some(error_codes::TIMEOUT));
    }

    #[tokio::test]
    async fn test_network_unreachable() {
        init_logger();
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RemoteClient::new(
            &config(format!("http://127.0.0.1:{}", port)),
            Arc::new(NoAuth),
        )
        .unwrap();

        let resp: ApiResponse<Value> = client.get("/anything", RequestOptions::new()).await;
        assert!(!resp.succeeded());
        assert_eq!(resp.status_code(), 0);
        assert_eq!(resp.error_code(), Some(error_codes::NETWORK_ERROR));
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let client = client_with_token(None).await;
        let form = UploadForm::new()
            .text("caption", "sunset")
            .file_with_mime("avatar", "avatar.png", "image/png", b"PNGDATA".to_vec());
        let opts = RequestOptions::new().json(json!({"album": "summer"}));

        let resp: ApiResponse<Value> = client.upload("/upload", form, opts).await;
        assert!(resp.succeeded());
        assert_eq!(resp.message(), Some("uploaded"));
        assert_eq!(
            resp.into_data(),
            Some(json!({
                "multipart": true,
                "has_file": true,
                "has_caption": true,
                "has_album": true,
            }))
        );
    }

    #[test]
    fn test_url_joining() {
        let client = RemoteClient::new(
            &config("https://api.example.com/v1/".into()),
            Arc::new(NoAuth),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.url("/users"), "https://api.example.com/v1/users");
        assert_eq!(client.url("users"), "https://api.example.com/v1/users");
        assert_eq!(client.url(""), "https://api.example.com/v1");
        assert_eq!(
            client.url("https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
    }
}
