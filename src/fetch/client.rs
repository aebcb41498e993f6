use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes a prepared request. Auth layers wrap another client and
/// decorate the request before handing it on.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
