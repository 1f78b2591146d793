//! HTTP implementation of [`RemoteService`].
//!
//! JSON over HTTP with `reqwest`. Path parameters are percent-encoded as
//! single segments. Mutating requests carry the action id in the
//! `Idempotency-Key` header.
//!
//! | operation        | request                          |
//! |------------------|----------------------------------|
//! | `probe`          | `GET /health`                    |
//! | `get_profile`    | `GET /profiles/{user}`           |
//! | `patch_profile`  | `PATCH /profiles/{user}`         |
//! | `get_progress`   | `GET /progress/{user}/{course}`  |
//! | `post_progress`  | `POST /progress`                 |
//! | `get_wallet`     | `GET /wallets/{user}`            |
//! | `earn_credits`   | `POST /wallets/{user}/earn`      |
//! | `spend_credits`  | `POST /wallets/{user}/spend`     |
//! | `list_courses`   | `GET /courses`                   |
//! | `get_course`     | `GET /courses/{id}`              |
//! | `list_questions` | `GET /courses/{id}/questions`    |

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteService;
use async_trait::async_trait;
use driftsync_protocol::{
    ActionId, Course, CreditRequest, HealthStatus, Profile, ProfilePatch, Progress,
    ProgressUpdate, Question, Wallet, IDEMPOTENCY_HEADER,
};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

/// A [`RemoteService`] talking to the backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let base_url = Url::parse(base_url).map_err(|err| {
            RemoteError::transport_fatal(format!("invalid base url {base_url}: {err}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::transport_fatal(format!(
                "base url {base_url} cannot hold a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::transport_fatal(err.to_string()))?;
        Ok(Self {
            client,
            base_url,
            auth_token: None,
        })
    }

    /// Creates a client from the engine configuration.
    pub fn from_config(config: &SyncConfig) -> RemoteResult<Self> {
        let remote = Self::new(&config.base_url, config.request_timeout)?;
        Ok(match &config.auth_token {
            Some(token) => remote.with_auth_token(token.clone()),
            None => remote,
        })
    }

    /// Sends `Authorization: Bearer <token>` on every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                RemoteError::transport_fatal(format!("base url {} cannot hold a path", self.base_url))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> RemoteResult<RequestBuilder> {
        let url = self.endpoint(segments)?;
        debug!(%method, %url, "remote request");
        let builder = self.client.request(method, url);
        Ok(match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> RemoteResult<T> {
        let response = self.request(Method::GET, segments)?.send().await?;
        parse_response(response).await
    }

    async fn mutate<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        action_id: ActionId,
        body: &B,
    ) -> RemoteResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .request(method, segments)?
            .header(IDEMPOTENCY_HEADER, action_id.to_string())
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => error.message,
            Err(_) => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        };
        debug!(status = status.as_u16(), %message, "remote request failed");
        return Err(RemoteError::api(status.as_u16(), message));
    }
    serde_json::from_str(&body)
        .map_err(|err| RemoteError::Decode(format!("unexpected response body: {err}")))
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn probe(&self) -> RemoteResult<()> {
        let health: HealthStatus = self.fetch(&["health"]).await?;
        if health.status == "ok" {
            Ok(())
        } else {
            Err(RemoteError::api(503, format!("server reports {}", health.status)))
        }
    }

    async fn get_profile(&self, user_id: &str) -> RemoteResult<Profile> {
        self.fetch(&["profiles", user_id]).await
    }

    async fn patch_profile(
        &self,
        action_id: ActionId,
        patch: &ProfilePatch,
    ) -> RemoteResult<Profile> {
        self.mutate(Method::PATCH, &["profiles", &patch.user_id], action_id, patch)
            .await
    }

    async fn get_progress(&self, user_id: &str, course_id: &str) -> RemoteResult<Progress> {
        self.fetch(&["progress", user_id, course_id]).await
    }

    async fn post_progress(
        &self,
        action_id: ActionId,
        update: &ProgressUpdate,
    ) -> RemoteResult<Progress> {
        self.mutate(Method::POST, &["progress"], action_id, update).await
    }

    async fn get_wallet(&self, user_id: &str) -> RemoteResult<Wallet> {
        self.fetch(&["wallets", user_id]).await
    }

    async fn earn_credits(
        &self,
        action_id: ActionId,
        request: &CreditRequest,
    ) -> RemoteResult<Wallet> {
        self.mutate(
            Method::POST,
            &["wallets", &request.user_id, "earn"],
            action_id,
            request,
        )
        .await
    }

    async fn spend_credits(
        &self,
        action_id: ActionId,
        request: &CreditRequest,
    ) -> RemoteResult<Wallet> {
        self.mutate(
            Method::POST,
            &["wallets", &request.user_id, "spend"],
            action_id,
            request,
        )
        .await
    }

    async fn list_courses(&self) -> RemoteResult<Vec<Course>> {
        self.fetch(&["courses"]).await
    }

    async fn get_course(&self, course_id: &str) -> RemoteResult<Course> {
        self.fetch(&["courses", course_id]).await
    }

    async fn list_questions(&self, course_id: &str) -> RemoteResult<Vec<Question>> {
        self.fetch(&["courses", course_id, "questions"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn endpoints_join_and_encode_segments() {
        let remote = remote("http://localhost:8080/api/");
        assert_eq!(
            remote.endpoint(&["profiles", "u1"]).unwrap().as_str(),
            "http://localhost:8080/api/profiles/u1"
        );
        assert_eq!(
            remote.endpoint(&["courses", "a/b c", "questions"]).unwrap().as_str(),
            "http://localhost:8080/api/courses/a%2Fb%20c/questions"
        );
    }

    #[test]
    fn root_base_url() {
        let remote = remote("http://localhost:8080");
        assert_eq!(
            remote.endpoint(&["health"]).unwrap().as_str(),
            "http://localhost:8080/health"
        );
    }

    #[test]
    fn invalid_base_url_is_fatal() {
        let err = HttpRemote::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(!err.is_retryable());
        let err = HttpRemote::new("mailto:ops@example.com", Duration::from_secs(1)).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn config_token_is_used() {
        let config = SyncConfig::new("u1", "http://localhost").with_auth_token("secret");
        let remote = HttpRemote::from_config(&config).unwrap();
        assert_eq!(remote.auth_token.as_deref(), Some("secret"));
    }
}
