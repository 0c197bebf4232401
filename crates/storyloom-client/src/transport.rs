//! Turn submission and the remote save service.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use storyloom_core::config::{Config, TransportKind};
use storyloom_core::state::GameStateDocument;

use crate::event::{ingest_value, StreamEvent};
use crate::sse::{decode_sse_events, parse_sse_response};

/// A boxed stream of typed events, SSE- and WebSocket-backed alike.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Outbound turn request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub player_input: String,
    pub current_state: GameStateDocument,
}

/// A turn reply: the backend either streams frames or answers with one
/// JSON document carrying the whole turn.
pub enum TurnReply {
    Stream(EventStream),
    Complete(Vec<StreamEvent>),
}

/// Boundary the session controller drives a turn through. Implemented by
/// [`BackendClient`] for real transports and by scripted fakes in tests.
#[async_trait]
pub trait TurnTransport: Send + Sync {
    async fn open_turn(
        &self,
        input: &str,
        state: &GameStateDocument,
    ) -> anyhow::Result<TurnReply>;
}

/// HTTP/WebSocket client for the story backend.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    transport: TransportKind,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.request_timeout_secs()))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            ws_url: config.ws_url(),
            transport: config.transport(),
            api_key: config.api_key(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn open_turn_sse(&self, request: &TurnRequest) -> anyhow::Result<TurnReply> {
        debug!(base_url = %self.base_url, "Submitting turn over HTTP");
        let response = self
            .authed(self.http.post(format!("{}/api/turn", self.base_url)))
            .header("accept", "text/event-stream, application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Turn request failed {status}: {body}");
        }

        let is_stream = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_stream {
            let events = decode_sse_events(parse_sse_response(response));
            Ok(TurnReply::Stream(Box::pin(events)))
        } else {
            let body: Value = response.json().await?;
            Ok(TurnReply::Complete(events_from_body(body)))
        }
    }

    /// Save to the remote save service.
    pub async fn save_remote(
        &self,
        slot_id: &str,
        save_name: &str,
        state: &GameStateDocument,
    ) -> anyhow::Result<()> {
        let response = self
            .authed(self.http.post(format!("{}/api/saves", self.base_url)))
            .json(&serde_json::json!({
                "slot_id": slot_id,
                "save_name": save_name,
                "game_state": state,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Remote save failed {status}: {body}");
        }
        Ok(())
    }

    /// Load from the remote save service. The returned document is
    /// authoritative — callers install it like a `state_update`.
    pub async fn load_remote(&self, slot_id: &str) -> anyhow::Result<GameStateDocument> {
        let response = self
            .authed(
                self.http
                    .get(format!("{}/api/saves/{slot_id}", self.base_url)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Remote load failed {status}: {body}");
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TurnTransport for BackendClient {
    async fn open_turn(
        &self,
        input: &str,
        state: &GameStateDocument,
    ) -> anyhow::Result<TurnReply> {
        let request = TurnRequest {
            player_input: input.to_string(),
            current_state: state.clone(),
        };
        match self.transport {
            TransportKind::Sse => self.open_turn_sse(&request).await,
            TransportKind::Websocket => {
                let stream = crate::ws::open_turn_stream(&self.ws_url, &request).await?;
                Ok(TurnReply::Stream(stream))
            }
        }
    }
}

/// Decode a non-streaming reply body. Accepts a bare array of events, an
/// `{ "events": [...] }` wrapper, or a single event object.
fn events_from_body(body: Value) -> Vec<StreamEvent> {
    let raw_events = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("events") {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(obj)],
        },
        other => vec![other],
    };
    raw_events.into_iter().filter_map(ingest_value).collect()
}
