//! The limit emitter: a bounded counter, used for tests and bounded
//! fan-out. Config is a single non-negative integer; the worker emits one
//! event per index.

use futures::stream;
use futures::StreamExt;
use serde_json::json;

use conveyor_core::types::{EmitterConfig, EventArgs, EventPayload, WorkerArgs};

use crate::{Emitter, EmitterError, EmitterKind, EventStream};

pub struct LimitEmitter;

impl Emitter for LimitEmitter {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Limit
    }

    fn worker_config(
        &self,
        _event_name: &str,
        config: &EmitterConfig,
    ) -> Result<WorkerArgs, EmitterError> {
        let limit = config.as_u64().ok_or_else(|| {
            EmitterError::Config(format!("limit must be a non-negative integer, got {config}"))
        })?;
        Ok(json!(limit))
    }

    fn events(&self, args: WorkerArgs) -> EventStream {
        let limit = match args.as_u64() {
            Some(limit) => limit,
            None => {
                let err = EmitterError::Config(format!("invalid limit worker args: {args}"));
                return stream::iter(vec![Err(err)]).boxed();
            }
        };
        stream::iter((0..limit).map(move |index| Ok(json!([limit, index])))).boxed()
    }

    fn payload(
        &self,
        _config: &EmitterConfig,
        args: &EventArgs,
    ) -> Result<EventPayload, EmitterError> {
        let (limit, index): (u64, u64) = serde_json::from_value(args.clone())
            .map_err(|err| EmitterError::Payload(err.to_string()))?;
        Ok(json!({"limit": limit, "index": index}))
    }
}
