//! Wire DTOs for the local endpoint. Bodies are JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadsRequest {
    pub refs: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    #[serde(rename = "ref")]
    pub reference: String,
    pub value: String,
    pub from_cache: bool,
    pub expires_in_seconds: u64,
    pub resolved_at_unix: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadsResponse {
    pub results: BTreeMap<String, ReadResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// Environment variable name → reference.
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Environment variable name → resolved value.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub backend: String,
    pub cache_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub in_flight: usize,
    pub ttl_seconds: u64,
    pub socket_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: String,
    pub idle_timeout_seconds: u64,
    pub time_until_lock_seconds: u64,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionUnlockResponse {
    pub success: bool,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
