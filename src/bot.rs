//! Socket Mode event loop: receive mentions, answer them in thread.

use crate::error::{RagError, Result};
use crate::mention::{handle_mention, MentionEvent};
use crate::rag::composer::AnswerComposer;
use crate::retry::reconnect_delay;
use crate::slack::SlackClient;
use futures::{SinkExt, StreamExt};
use lru::LruCache;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

const SERVICE: &str = "slack";
const SEEN_EVENTS: usize = 256;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    retry_attempt: u32,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

/// Recently answered events. Slack redelivers an event when the ack is late,
/// including across reconnects, so this outlives any one socket.
struct SeenEvents {
    ids: Mutex<LruCache<String, ()>>,
}

impl SeenEvents {
    fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ids: Mutex::new(LruCache::new(cap)),
        }
    }

    /// True the first time `id` is seen.
    fn first_sighting(&self, id: &str) -> bool {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.put(id.to_string(), ()).is_none()
    }
}

#[derive(Debug)]
enum Action {
    Ignore,
    Mention(MentionEvent),
    Disconnect(String),
}

pub struct Bot {
    slack: SlackClient,
    app_token: String,
    composer: AnswerComposer,
    seen: SeenEvents,
}

impl Bot {
    pub fn new(slack: SlackClient, app_token: &str, composer: AnswerComposer) -> Self {
        Self {
            slack,
            app_token: app_token.to_string(),
            composer,
            seen: SeenEvents::new(SEEN_EVENTS),
        }
    }

    /// Serve mentions until a configuration error or a rejected bot token.
    /// Dropped connections are reopened with capped exponential backoff.
    pub async fn run(&self) -> Result<()> {
        let bot_user_id = self.authenticate().await?;
        info!("Authenticated as user_id={}", bot_user_id);

        let mut attempt: u32 = 0;
        loop {
            match self.run_socket(&bot_user_id).await {
                Ok(()) => attempt = 0,
                Err(e) if e.is_config() => return Err(e),
                Err(e) => error!("Socket Mode error: {}", e),
            }
            let delay = reconnect_delay(attempt);
            warn!(
                "Reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                attempt + 1
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Resolve the bot's own user id, waiting out Slack outages.
    async fn authenticate(&self) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            match self.slack.auth_test().await {
                Ok(user_id) => return Ok(user_id),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    let delay = reconnect_delay(attempt);
                    warn!(
                        "auth.test failed, retrying in {}ms (attempt {}): {}",
                        delay.as_millis(),
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn run_socket(&self, bot_user_id: &str) -> Result<()> {
        let url = self.slack.open_socket_url(&self.app_token).await?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RagError::transient(SERVICE, format!("socket connect: {}", e)))?;
        let (mut write, mut read) = stream.split();
        info!("Socket Mode connected");

        while let Some(frame) = read.next().await {
            let frame =
                frame.map_err(|e| RagError::transient(SERVICE, format!("socket read: {}", e)))?;
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Ping(data) => {
                    write
                        .send(WsMessage::Pong(data))
                        .await
                        .map_err(|e| RagError::transient(SERVICE, format!("socket write: {}", e)))?;
                    continue;
                }
                WsMessage::Close(_) => {
                    info!("Socket Mode connection closed by Slack");
                    return Ok(());
                }
                _ => continue,
            };

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!("Ignoring unparseable frame: {}", e);
                    continue;
                }
            };

            // Slack redelivers anything not acknowledged within 3 seconds.
            if let Some(id) = &envelope.envelope_id {
                let ack = json!({ "envelope_id": id });
                write
                    .send(WsMessage::Text(ack.to_string()))
                    .await
                    .map_err(|e| RagError::transient(SERVICE, format!("socket write: {}", e)))?;
            }

            match route(&envelope, bot_user_id, &self.seen) {
                Action::Mention(event) => self.respond(&event).await,
                Action::Disconnect(reason) => {
                    info!("Disconnect requested by Slack: {}", reason);
                    return Ok(());
                }
                Action::Ignore => {}
            }
        }
        Ok(())
    }

    async fn respond(&self, event: &MentionEvent) {
        let reply = handle_mention(&self.composer, event).await;
        if let Err(e) = self
            .slack
            .post_message(&event.channel, &reply, Some(event.thread()))
            .await
        {
            error!("Failed to post reply in {}: {}", event.channel, e);
        }
    }
}

fn route(envelope: &Envelope, bot_user_id: &str, seen: &SeenEvents) -> Action {
    match envelope.kind.as_str() {
        "events_api" => {}
        "disconnect" => {
            return Action::Disconnect(envelope.reason.clone().unwrap_or_else(|| "unknown".to_string()))
        }
        other => {
            debug!("Ignoring {} envelope", other);
            return Action::Ignore;
        }
    }

    let Some(event) = envelope.payload.as_ref().and_then(|p| p.event.as_ref()) else {
        return Action::Ignore;
    };
    if event["type"].as_str() != Some("app_mention") {
        return Action::Ignore;
    }
    let event: MentionEvent = match serde_json::from_value(event.clone()) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed app_mention event: {}", e);
            return Action::Ignore;
        }
    };
    if event.bot_id.is_some() || event.user.as_deref() == Some(bot_user_id) {
        return Action::Ignore;
    }

    let event_id = envelope
        .payload
        .as_ref()
        .and_then(|p| p.event_id.clone())
        .unwrap_or_else(|| format!("{}:{}", event.channel, event.ts));
    if !seen.first_sighting(&event_id) {
        debug!(
            "Ignoring redelivered event {} (retry {})",
            event_id, envelope.retry_attempt
        );
        return Action::Ignore;
    }
    Action::Mention(event)
}
