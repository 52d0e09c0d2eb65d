//! Wire format of the bridge: one JSON object per line in each direction.
//!
//! Requests carry a caller-chosen numeric `id` next to the engine command
//! (`{"id":1,"command":"compress","file_id":"…"}`); `"progress":true` asks
//! for progress events on long jobs. `{"id":2,"command":"cancel","target":1}`
//! cancels an in-flight request. Every request gets exactly one reply:
//! `{"id":1,"ok":true,"result":{…}}` or `{"id":1,"ok":false,"error":{code,message}}`.

use pressa_core::{EngineError, Request};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, PartialEq)]
pub enum Incoming {
    Call {
        id: u64,
        request: Request,
        progress: bool,
    },
    Cancel {
        id: u64,
        target: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct Reply {
    /// `None` only when the line was too broken to recover an id.
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

impl Reply {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, error: EngineError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressEvent {
    pub id: u64,
    pub event: &'static str,
    pub done: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(id: u64, done: u64, total: u64) -> Self {
        Self {
            id,
            event: "progress",
            done,
            total,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Reply(Reply),
    Progress(ProgressEvent),
}

fn invalid(id: Option<u64>, message: impl Into<String>) -> Reply {
    Reply::err(id, EngineError::invalid_request(message))
}

/// Validate one input line. Failures come back as the reply to send.
pub fn parse_line(line: &str) -> Result<Incoming, Reply> {
    let mut value: Value = serde_json::from_str(line)
        .map_err(|e| invalid(None, format!("malformed JSON: {e}")))?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| invalid(None, "request must be a JSON object"))?;

    let id = obj
        .remove("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| invalid(None, "request needs a non-negative integer id"))?;
    let progress = match obj.remove("progress") {
        None => false,
        Some(Value::Bool(b)) => b,
        Some(_) => return Err(invalid(Some(id), "progress must be a boolean")),
    };

    if obj.get("command").and_then(Value::as_str) == Some("cancel") {
        let target = obj
            .get("target")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid(Some(id), "cancel needs an integer target"))?;
        return Ok(Incoming::Cancel { id, target });
    }

    let request: Request =
        serde_json::from_value(value).map_err(|e| invalid(Some(id), e.to_string()))?;
    Ok(Incoming::Call {
        id,
        request,
        progress,
    })
}
