//! The server-sent-events emitter.
//!
//! One worker per distinct `(event_name, stream URL)` pair holds the HTTP
//! connection open and forwards every `message` event. The last seen
//! event id is persisted in the KV store so a restarted worker resumes
//! where the previous one stopped.

use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use conveyor_core::types::{EmitterConfig, Environment, EventArgs, EventPayload, WorkerArgs};
use conveyor_core::{assign, evaluate, truthy, Expression};
use conveyor_storage::KeyValueStore;

use crate::{Emitter, EmitterError, EmitterKind, EventStream};

/// Per-workflow SSE trigger config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// The stream URL to listen on.
    pub stream: String,

    /// `string` (default) passes event data through; `json` parses it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Optional filter expression, evaluated against the shaped payload
    /// bound under the event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expression>,
}

pub struct SseEmitter {
    store: Arc<dyn KeyValueStore>,
}

impl SseEmitter {
    /// The store persists the per-stream resume cursor.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl Emitter for SseEmitter {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Sse
    }

    fn worker_config(
        &self,
        event_name: &str,
        config: &EmitterConfig,
    ) -> Result<WorkerArgs, EmitterError> {
        let config = parse_config(config)?;
        if let Some(format) = &config.format {
            if format != "string" && format != "json" {
                return Err(EmitterError::Config(format!(
                    "format must be \"string\" or \"json\", got {format:?}"
                )));
            }
        }

        // Identity is the pair that names a connection; format and filter
        // are workflow-specific and resolved later in payload().
        Ok(json!([event_name, config.stream]))
    }

    fn events(&self, args: WorkerArgs) -> EventStream {
        let (event_name, stream_url) = match serde_json::from_value::<(String, String)>(args) {
            Ok(args) => args,
            Err(err) => {
                let err = EmitterError::Config(format!("invalid sse worker args: {err}"));
                return futures::stream::iter(vec![Err(err)]).boxed();
            }
        };

        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Err(err) = listen(store, &event_name, &stream_url, &tx).await {
                // The consumer may already be gone; nothing left to do then.
                let _ = tx.send(Err(err)).await;
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn payload(
        &self,
        config: &EmitterConfig,
        args: &EventArgs,
    ) -> Result<EventPayload, EmitterError> {
        let config = parse_config(config)?;
        let (event_name, data): (String, String) = serde_json::from_value(args.clone())
            .map_err(|err| EmitterError::Payload(err.to_string()))?;

        let payload = if config.format.as_deref() == Some("json") {
            serde_json::from_str(&data)
                .map_err(|err| EmitterError::Payload(format!("event data is not json: {err}")))?
        } else {
            Value::String(data)
        };

        if let Some(filter) = &config.filter {
            let env = assign(&event_name, payload.clone(), &Environment::new());
            if !truthy(&evaluate(filter, &env)?) {
                return Err(EmitterError::FilterRejected);
            }
        }

        Ok(payload)
    }
}

fn parse_config(config: &EmitterConfig) -> Result<SseConfig, EmitterError> {
    serde_json::from_value(config.clone())
        .map_err(|err| EmitterError::Config(format!("invalid sse config: {err}")))
}

/// Substrate key holding the resume cursor for one worker.
fn cursor_key(event_name: &str, stream_url: &str) -> String {
    format!("{event_name}-{stream_url}-last-event-id")
}

/// Holds the connection open and forwards `message` events until the
/// consumer goes away or the stream fails.
async fn listen(
    store: Arc<dyn KeyValueStore>,
    event_name: &str,
    stream_url: &str,
    tx: &mpsc::Sender<Result<EventArgs, EmitterError>>,
) -> Result<(), EmitterError> {
    let cursor_key = cursor_key(event_name, stream_url);
    let last_event_id = store.get(&cursor_key).await?;

    let client = reqwest::Client::new();
    let mut request = client
        .get(stream_url)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }

    let response = request
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| EmitterError::Stream(err.to_string()))?;

    debug!(stream = stream_url, "sse stream connected");

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        let event = event.map_err(|err| EmitterError::Stream(err.to_string()))?;
        if event.event != "message" {
            continue;
        }
        if !event.id.is_empty() {
            store.set(&cursor_key, &event.id).await?;
        }
        if tx.send(Ok(json!([event_name, event.data]))).await.is_err() {
            // Consumer dropped the stream; stop listening.
            return Ok(());
        }
    }

    Ok(())
}
