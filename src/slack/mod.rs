//! Slack Web API adapter: channel enumeration, history paging, replies.

use crate::config::Config;
use crate::error::{parse_retry_after, RagError, Result};
use crate::rag::{Channel, RawMessage};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub mod text;

const SERVICE: &str = "slack";
const CHANNEL_PAGE_SIZE: usize = 200;

/// Read access to channels and their history.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Public, non-archived channels.
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    async fn join(&self, channel_id: &str) -> Result<()>;

    /// Forward-only, finite stream of the channel's messages, newest first.
    fn history<'a>(
        &'a self,
        channel_id: &'a str,
        page_size: usize,
    ) -> BoxStream<'a, Result<RawMessage>>;
}

pub struct SlackClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
    page_delay: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

impl HistoryPage {
    fn next_cursor(&self) -> Option<String> {
        let cursor = self.response_metadata.next_cursor.trim();
        (self.has_more && !cursor.is_empty()).then(|| cursor.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AuthTest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

impl SlackClient {
    pub fn new(config: &Config, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RagError::Config(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_url: config.slack_api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry: config.retry_policy(),
            page_delay: config.rate_limit_delay(),
        })
    }

    /// Call a Web API method with the bot token.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        self.call_with_token(method, &self.token, params).await
    }

    async fn call_with_token<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.retry
            .run(method, || self.call_once(method, token, params))
            .await
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_url, method))
            .bearer_auth(token)
            .form(params)
            .send()
            .await
            .map_err(|e| RagError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::from_status(SERVICE, status, &body, retry_after));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::from_reqwest(SERVICE, e))?;
        parse_response(method, body)
    }

    /// Bot user id of the token's owner.
    pub async fn auth_test(&self) -> Result<String> {
        let auth: AuthTest = self.call("auth.test", &[]).await?;
        Ok(auth.user_id)
    }

    /// Socket Mode WebSocket URL; needs the app-level token.
    pub async fn open_socket_url(&self, app_token: &str) -> Result<String> {
        let open: ConnectionsOpen = self
            .call_with_token("apps.connections.open", app_token, &[])
            .await?;
        Ok(open.url)
    }

    pub async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<()> {
        let mut params = vec![
            ("channel", channel.to_string()),
            ("text", text.to_string()),
            ("unfurl_links", "false".to_string()),
        ];
        if let Some(ts) = thread_ts {
            params.push(("thread_ts", ts.to_string()));
        }
        let _: serde_json::Value = self.call("chat.postMessage", &params).await?;
        Ok(())
    }

    async fn history_page(
        &self,
        channel_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("limit", page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        self.call("conversations.history", &params).await
    }
}

#[async_trait]
impl ChatHistory for SlackClient {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("types", "public_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", CHANNEL_PAGE_SIZE.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let page: ChannelsPage = self.call("conversations.list", &params).await?;
            channels.extend(page.channels);

            cursor = page.response_metadata.next_cursor;
            if cursor.trim().is_empty() {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }
        Ok(channels)
    }

    async fn join(&self, channel_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call("conversations.join", &[("channel", channel_id.to_string())])
            .await?;
        Ok(())
    }

    fn history<'a>(
        &'a self,
        channel_id: &'a str,
        page_size: usize,
    ) -> BoxStream<'a, Result<RawMessage>> {
        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let page = match cursor {
                Cursor::Done => return Ok::<_, RagError>(None),
                Cursor::Start => self.history_page(channel_id, page_size, None).await?,
                Cursor::Next(next) => {
                    tokio::time::sleep(self.page_delay).await;
                    self.history_page(channel_id, page_size, Some(&next)).await?
                }
            };
            debug!(
                "Slack: fetched {} messages from {} (more: {})",
                page.messages.len(),
                channel_id,
                page.has_more
            );
            let next = match page.next_cursor() {
                Some(c) => Cursor::Next(c),
                None => Cursor::Done,
            };
            Ok::<_, RagError>(Some((page.messages, next)))
        })
        .map_ok(|messages| stream::iter(messages.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}

/// Unwrap Slack's `{"ok": .., "error": ..}` envelope.
fn parse_response<T: DeserializeOwned>(method: &str, body: serde_json::Value) -> Result<T> {
    if !body["ok"].as_bool().unwrap_or(false) {
        let code = body["error"].as_str().unwrap_or("unknown_error");
        return Err(classify_error(method, code));
    }
    serde_json::from_value(body)
        .map_err(|e| RagError::permanent(SERVICE, format!("{}: unexpected response: {}", method, e)))
}

fn classify_error(method: &str, code: &str) -> RagError {
    let message = format!("{} failed: {}", method, code);
    match code {
        "ratelimited" | "internal_error" | "fatal_error" | "service_unavailable"
        | "request_timeout" => RagError::transient(SERVICE, message),
        _ => RagError::permanent(SERVICE, message),
    }
}
