use async_trait::async_trait;

/// Source of the bearer credential attached to authenticated requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The access token to send, or `None` to send the request without one.
    async fn bearer_token(&self) -> Option<String>;
}

/// Never authenticates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A fixed token, mostly for tests and scripts.
#[derive(Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
