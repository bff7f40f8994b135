//! On-disk JSON shapes. Everything the core does not need to interpret
//! (predicates, response bodies, protocol configuration) stays a `serde_json::Value`
//! so it passes through untouched regardless of what the matching/response layers
//! put into it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{datadir}/{port}/imposter.json`.
///
/// `extra` carries every protocol-level field this core does not interpret
/// (`port`, `protocol`, and whatever else the matching layer stores alongside).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImposterHeader {
    #[serde(default)]
    pub stubs: Vec<StubEntry>,

    /// High-water mark for stub directory numbering (`stubs/{n}`). Persisted
    /// here rather than derived from a live directory scan, because a
    /// deleted stub's directory is removed entirely — a scan alone would see
    /// an empty `stubs/` after the last stub is deleted and reallocate `0`,
    /// reusing a number that was already assigned once.
    #[serde(default, rename = "nextStubDirIndex")]
    pub next_stub_dir_index: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry in `imposter.json`'s `stubs` array: predicates plus a pointer to
/// where the rest of the stub (responses, cycle state) lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubEntry {
    #[serde(default)]
    pub predicates: Value,
    pub meta: StubRef,
}

/// `meta.dir` is the only field: a path relative to the imposter directory,
/// e.g. `stubs/0`. Stable for the stub's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubRef {
    pub dir: String,
}

/// `{imposterDir}/{stubDir}/meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StubMeta {
    pub response_files: Vec<String>,
    pub order_with_repeats: Vec<usize>,
    pub next_index: usize,
}

/// What a caller hands to `insertAtIndex`/`add`: predicates plus the initial
/// set of responses. Once stored, this is split across `imposter.json` (the
/// predicates) and `meta.json` + `responses/*.json` (the responses).
#[derive(Debug, Clone)]
pub struct StubInput {
    pub predicates: Value,
    pub responses: Vec<Value>,
}

impl StubInput {
    pub fn new(predicates: Value, responses: Vec<Value>) -> Self {
        Self {
            predicates,
            responses,
        }
    }
}

/// The fully materialized view of a stub produced by `toJSON`: predicates plus
/// the actual response bodies, with `meta` stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedStub {
    pub predicates: Value,
    pub responses: Vec<Value>,
}

/// Read `_behaviors.repeat` off an opaque response, defaulting to 1 and
/// floor-clamping anything below 1 (a malformed repeat still occupies at
/// least one cycle position).
pub fn response_repeat(response: &Value) -> usize {
    response
        .get("_behaviors")
        .and_then(|b| b.get("repeat"))
        .and_then(|r| r.as_u64())
        .map(|r| r.max(1) as usize)
        .unwrap_or(1)
}

/// Does this response carry `is._proxyResponseTime`? Used by
/// `deleteSavedProxyResponses` to identify proxy-recorded responses.
pub fn is_proxy_response(response: &Value) -> bool {
    response
        .get("is")
        .and_then(|is| is.get("_proxyResponseTime"))
        .is_some()
}
