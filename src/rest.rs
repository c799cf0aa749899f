//! REST client for the node's `/v4` API.
//!
//! One [`reqwest::Client`] is shared by all calls of a node; every request
//! carries the node password in an `Authorization` default header and is
//! aborted by a per-call timeout.

use std::time::Duration;

use http::Uri;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::NodeConfig;
use crate::model::{LoadResult, NodeInfo, PlayerInfo, RestErrorBody, Track, UpdatePlayer};
use crate::{Error, Result};

/// Timeout applied to player updates, deletes, single-track decodes and info.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout applied to track loading, bulk decodes and plugin requests.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
/// REST client for one node.
pub struct Rest {
    client: Client,
    base_url: String,
    websocket_uri: Uri,
    password: String,
}

impl Rest {
    /// Create a REST client for the node described by `config`.
    pub fn new(config: &NodeConfig, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&config.password)?);

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;

        let base_url = format!(
            "{}://{}",
            if config.secure { "https" } else { "http" },
            config.authority()
        );

        let websocket_uri = Uri::builder()
            .scheme(if config.secure { "wss" } else { "ws" })
            .authority(config.authority())
            .path_and_query("/v4/websocket")
            .build()?;

        Ok(Self {
            client,
            base_url,
            websocket_uri,
            password: config.password.clone(),
        })
    }

    /// The URI of the node's event stream.
    pub fn websocket_uri(&self) -> &Uri {
        &self.websocket_uri
    }

    /// The node password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Build a URL from a `/v4/...` path.
    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Update the player of `guild_id` in the session. With `no_replace` the
    /// node keeps a currently playing track instead of replacing it.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: &str,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<PlayerInfo> {
        let mut path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);
        if no_replace {
            path.push_str("?noReplace=true");
        }

        let request = self
            .client
            .patch(self.build_url(&path))
            .timeout(DEFAULT_TIMEOUT)
            .json(update);

        self.send(request).await
    }

    /// Destroy the player of `guild_id` in the session. A missing player
    /// counts as success.
    pub async fn destroy_player(&self, session_id: &str, guild_id: &str) -> Result<()> {
        let path = format!("/v4/sessions/{}/players/{}", session_id, guild_id);

        let response = self
            .client
            .delete(self.build_url(&path))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(Error::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Self::check_status(response).await.map(|_| ())
    }

    /// Resolve an identifier into tracks.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let request = self
            .client
            .get(self.build_url("/v4/loadtracks"))
            .query(&[("identifier", identifier)])
            .timeout(LOAD_TIMEOUT);

        self.send(request).await
    }

    /// Decode one encoded track blob.
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let request = self
            .client
            .get(self.build_url("/v4/decodetrack"))
            .query(&[("encodedTrack", encoded)])
            .timeout(DEFAULT_TIMEOUT);

        self.send(request).await
    }

    /// Decode a batch of encoded track blobs.
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let request = self
            .client
            .post(self.build_url("/v4/decodetracks"))
            .timeout(LOAD_TIMEOUT)
            .json(&encoded);

        self.send(request).await
    }

    /// Fetch the node's static information.
    pub async fn info(&self) -> Result<NodeInfo> {
        let request = self
            .client
            .get(self.build_url("/v4/info"))
            .timeout(DEFAULT_TIMEOUT);

        self.send(request).await
    }

    /// Perform an arbitrary request against the node, used for plugin
    /// endpoints. Returns the parsed body when the node answers with JSON,
    /// `None` otherwise.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let mut request = self
            .client
            .request(method, self.build_url(path))
            .timeout(LOAD_TIMEOUT);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(Error::from)?;
        let response = Self::check_status(response).await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        if !is_json {
            return Ok(None);
        }

        response.json().await.map(Some).map_err(Error::from)
    }

    /// Send a request and decode its JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(Error::from)?;
        let response = Self::check_status(response).await?;

        response.json().await.map_err(Error::from)
    }

    /// Turn a non-2xx response into [`Error::Rest`], decoding the error body
    /// best-effort.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<RestErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };

        Err(Error::Rest {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secure: bool) -> NodeConfig {
        let mut config = NodeConfig::new("main", "localhost", 2333, "youshallnotpass");
        config.secure = secure;
        config
    }

    #[test]
    fn urls_follow_the_secure_flag() {
        let rest = Rest::new(&config(false), "Rias").expect("client");
        assert_eq!(rest.build_url("/v4/info"), "http://localhost:2333/v4/info");
        assert_eq!(rest.websocket_uri().to_string(), "ws://localhost:2333/v4/websocket");

        let rest = Rest::new(&config(true), "Rias").expect("client");
        assert_eq!(rest.build_url("/v4/info"), "https://localhost:2333/v4/info");
        assert_eq!(
            rest.websocket_uri().to_string(),
            "wss://localhost:2333/v4/websocket"
        );
    }

    #[test]
    fn error_body_decodes_partially() {
        let body: RestErrorBody = serde_json::from_str(
            r#"{"timestamp": 1667857581613, "status": 404, "error": "Not Found", "message": "Session not found", "path": "/v4/sessions/x/players/1"}"#,
        )
        .expect("full body");
        assert_eq!(body.message.as_deref(), Some("Session not found"));

        let partial: RestErrorBody =
            serde_json::from_str(r#"{"message": "oops"}"#).expect("partial body");
        assert_eq!(partial.message.as_deref(), Some("oops"));

        let foreign: RestErrorBody = serde_json::from_str(r#"{}"#).expect("empty body");
        assert!(foreign.message.is_none());
    }
}
