//! Wire DTOs for every Master↔Worker and Worker↔Worker call in §4.8. Byte
//! payloads (scripts, env, logs, chunk data) travel as base64 strings
//! inside the JSON body, the same convention the HTTP API uses for script
//! uploads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// --- Worker -> Master ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: u64,
    /// Base URL the Master should call back for `Execute`/`Cancel`/`Clean`
    /// (e.g. `http://10.0.0.5:9100`), since the wire transport has no
    /// implicit return path the way an RPC connection would.
    pub callback_base: String,
    /// action name -> base64(yaml config)
    pub supports: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnFinishRequest {
    pub worker_id: u64,
    pub action: String,
    pub runner_id: u64,
    pub success: bool,
    pub env_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnProgressRequest {
    pub worker_id: u64,
    pub action: String,
    pub runner_id: u64,
    pub payload_b64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastKind {
    Workload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnBroadcastRequest {
    pub worker_id: u64,
    pub kind: BroadcastKind,
    pub workload: u32,
}

// --- Master -> Worker ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub action: String,
    pub master_id: u64,
    /// Worker that owns the Runner's working directory after the previous
    /// command, or 0 if this is the first command that touches disk.
    pub last_worker_id: u64,
    /// `last_worker_id`'s callback base, so the destination worker can open
    /// the handoff directly instead of asking the Master to broker it.
    /// Empty iff `last_worker_id` is 0.
    pub last_worker_base: String,
    pub runner_id: u64,
    pub disk: String,
    pub script_b64: String,
    pub variables_b64: String,
    pub target: String,
    pub env_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub action: String,
    pub runner_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanRequest {
    pub runner_id: u64,
}

// --- Worker -> Worker (disk handoff) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeforeSendRequest {
    pub dest_worker_id: u64,
    /// The destination's own callback base, so the source can call
    /// `BeforeReceive`/`Receive`/`AfterReceive` back on it.
    pub dest_base: String,
    pub runner_id: u64,
    pub disk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeforeReceiveRequest {
    pub source_worker_id: u64,
    pub runner_id: u64,
    pub length: u64,
    pub chunks: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub dest_worker_id: u64,
    pub runner_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub runner_id: u64,
    pub index: u32,
    pub data_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterReceiveRequest {
    pub runner_id: u64,
}

/// Every RPC returns this envelope — `Ok` carries no data (matching the
/// source system's fire-and-forget `AsyncCall`s, which only ever surface a
/// transport-level error to the caller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Ack { ok: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Ack { ok: false, error: Some(msg.into()) }
    }
}
