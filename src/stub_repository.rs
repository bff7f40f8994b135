//! Per-imposter stub CRUD, response cycling, and request logging.
//!
//! A [`StubRepository`] is bound to one imposter directory. All stub-list
//! mutations go through `imposter.json`; each stub's own response cycle
//! state lives in that stub's `meta.json`, locked independently so
//! `nextResponse` on one stub never waits on another.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::config::BackoffConfig;
use crate::error::{RepoError, Result};
use crate::fs::{load_all_in_dir, locked_read_modify_write, read_file, remove, write_file};
use crate::model::{
    ImposterHeader, MaterializedStub, StubEntry, StubInput, StubMeta, StubRef, is_proxy_response,
    response_repeat,
};

/// Bound to `{datadir}/{port}`. Cheap to construct; holds no open handles.
pub struct StubRepository {
    imposter_dir: PathBuf,
    backoff: BackoffConfig,
    pid: u32,
    counter: AtomicU64,
}

impl StubRepository {
    pub fn new(imposter_dir: impl Into<PathBuf>, backoff: BackoffConfig) -> Self {
        Self::with_pid(imposter_dir, backoff, std::process::id())
    }

    /// Same as [`Self::new`] but with an injected process id, so tests can
    /// simulate several independent writer processes sharing one data
    /// directory without actually forking.
    pub fn with_pid(imposter_dir: impl Into<PathBuf>, backoff: BackoffConfig, pid: u32) -> Self {
        Self {
            imposter_dir: imposter_dir.into(),
            backoff,
            pid,
            counter: AtomicU64::new(0),
        }
    }

    pub fn imposter_dir(&self) -> &Path {
        &self.imposter_dir
    }

    fn header_path(&self) -> PathBuf {
        self.imposter_dir.join("imposter.json")
    }

    fn stubs_root(&self) -> PathBuf {
        self.imposter_dir.join("stubs")
    }

    fn requests_root(&self) -> PathBuf {
        self.imposter_dir.join("requests")
    }

    async fn read_header(&self) -> Result<ImposterHeader> {
        Ok(read_file(&self.header_path()).await?.unwrap_or_default())
    }

    /// `len(stubs)`; `0` if the header is absent.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.read_header().await?.stubs.len())
    }

    /// Walk stubs from `start_index` forward and return the first whose
    /// predicates satisfy `predicate_filter`, wrapped as a handle. If none
    /// matches, the returned handle is "empty": `matched()` is false,
    /// `next_response` yields a canonical empty response, and
    /// `add_response` is a no-op.
    pub async fn first<F>(&self, start_index: usize, predicate_filter: F) -> Result<StubHandle>
    where
        F: Fn(&Value) -> bool,
    {
        let header = self.read_header().await?;
        for entry in header.stubs.iter().skip(start_index) {
            if predicate_filter(&entry.predicates) {
                return Ok(StubHandle {
                    predicates: entry.predicates.clone(),
                    imposter_dir: self.imposter_dir.clone(),
                    stub_dir: Some(self.imposter_dir.join(&entry.meta.dir)),
                    meta_dir: Some(entry.meta.dir.clone()),
                    backoff: self.backoff,
                });
            }
        }
        Ok(StubHandle::empty(self.imposter_dir.clone(), self.backoff))
    }

    /// Equivalent to `insert_at_index(stub, len)`.
    pub async fn add(&self, stub: StubInput) -> Result<()> {
        self.insert_at_index(stub, usize::MAX).await
    }

    pub async fn insert_at_index(&self, stub: StubInput, index: usize) -> Result<()> {
        let header_path = self.header_path();
        let StubInput { predicates, responses } = stub;

        // Phase 1: reserve a stub directory number under the header lock.
        // This is a persisted high-water mark rather than a scan of `stubs/`
        // — a deleted stub's directory is removed entirely, so a live scan
        // alone would see an empty directory after the last stub is gone and
        // reallocate the number it just freed.
        let dir_rel = locked_read_modify_write::<ImposterHeader, String, _>(
            &header_path,
            &self.backoff,
            |current| {
                let mut header = current.unwrap_or_default();
                let allocated = header.next_stub_dir_index;
                header.next_stub_dir_index += 1;
                Ok((header, format!("stubs/{allocated}")))
            },
        )
        .await?;
        let stub_dir = self.imposter_dir.join(&dir_rel);

        let mut meta = StubMeta::default();
        for (i, response) in responses.iter().enumerate() {
            meta.response_files.push(format!("responses/{i}.json"));
            for _ in 0..response_repeat(response) {
                meta.order_with_repeats.push(i);
            }
        }
        for (i, response) in responses.iter().enumerate() {
            write_file(&stub_dir.join(format!("responses/{i}.json")), response).await?;
        }
        write_file(&stub_dir.join("meta.json"), &meta).await?;

        // Phase 2: splice the stub entry into the list under the header
        // lock. A crash between phase 1 and here leaves an orphaned,
        // unreferenced stub directory — tolerated, readers ignore it.
        locked_read_modify_write::<ImposterHeader, (), _>(&header_path, &self.backoff, move |current| {
            let mut header = current.unwrap_or_default();
            let index = index.min(header.stubs.len());
            header.stubs.insert(
                index,
                StubEntry {
                    predicates,
                    meta: StubRef { dir: dir_rel },
                },
            );
            Ok((header, ()))
        })
        .await
    }

    pub async fn delete_at_index(&self, index: usize) -> Result<()> {
        let removed_dir = locked_read_modify_write::<ImposterHeader, String, _>(
            &self.header_path(),
            &self.backoff,
            move |current| {
                let mut header = current.unwrap_or_default();
                if index >= header.stubs.len() {
                    return Err(RepoError::missing_resource(format!("stub index {index}")));
                }
                let entry = header.stubs.remove(index);
                Ok((header, entry.meta.dir))
            },
        )
        .await?;
        remove(&self.imposter_dir.join(&removed_dir)).await
    }

    pub async fn overwrite_at_index(&self, stub: StubInput, index: usize) -> Result<()> {
        self.delete_at_index(index).await?;
        self.insert_at_index(stub, index).await
    }

    pub async fn overwrite_all(&self, stubs: Vec<StubInput>) -> Result<()> {
        let cleared = locked_read_modify_write::<ImposterHeader, (), _>(
            &self.header_path(),
            &self.backoff,
            |current| {
                let mut header = current.unwrap_or_default();
                header.stubs.clear();
                Ok((header, ()))
            },
        );
        let (removed, cleared) = tokio::join!(remove(&self.stubs_root()), cleared);
        removed?;
        cleared?;

        for stub in stubs {
            self.add(stub).await?;
        }
        Ok(())
    }

    /// Materialize every stub's predicates plus its actual response bodies,
    /// with `meta` stripped. Missing `meta.json` for a stub still listed in
    /// the header propagates — that's torn state, not an absent file.
    pub async fn to_json(&self) -> Result<Vec<MaterializedStub>> {
        let header = self.read_header().await?;
        let mut out = Vec::with_capacity(header.stubs.len());
        for entry in &header.stubs {
            let stub_dir = self.imposter_dir.join(&entry.meta.dir);
            let meta: StubMeta = read_file(&stub_dir.join("meta.json"))
                .await?
                .ok_or_else(|| RepoError::missing_resource(format!("meta.json for {}", entry.meta.dir)))?;

            let mut responses = Vec::with_capacity(meta.response_files.len());
            for rel in &meta.response_files {
                let response: Value = read_file(&stub_dir.join(rel)).await?.ok_or_else(|| {
                    RepoError::missing_resource(format!("{rel} for {}", entry.meta.dir))
                })?;
                responses.push(response);
            }
            out.push(MaterializedStub {
                predicates: entry.predicates.clone(),
                responses,
            });
        }
        Ok(out)
    }

    /// Stamp `request` with the current timestamp and persist it under
    /// `requests/` with a filename unique within this data directory.
    /// Unlocked — request filenames never collide by construction.
    pub async fn add_request(&self, mut request: Value) -> Result<()> {
        let now = chrono::Utc::now();
        let timestamp = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        if let Value::Object(map) = &mut request {
            map.insert("timestamp".to_string(), Value::String(timestamp));
        }

        let epoch = now.timestamp_millis();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let filename = format!("{epoch}-{}-{counter}.json", self.pid);
        write_file(&self.requests_root().join(filename), &request).await
    }

    pub async fn load_requests(&self) -> Result<Vec<Value>> {
        load_all_in_dir(&self.requests_root()).await
    }

    /// Drop every response whose `is._proxyResponseTime` is set; drop any
    /// stub left with zero responses; rewrite the survivors via
    /// `overwrite_all`.
    pub async fn delete_saved_proxy_responses(&self) -> Result<()> {
        let filtered: Vec<StubInput> = self
            .to_json()
            .await?
            .into_iter()
            .filter_map(|stub| {
                let responses: Vec<Value> =
                    stub.responses.into_iter().filter(|r| !is_proxy_response(r)).collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(StubInput::new(stub.predicates, responses))
                }
            })
            .collect();
        self.overwrite_all(filtered).await
    }
}

/// A snapshot of one stub's predicates plus operations bound to its
/// directory. Remains valid across unrelated stub-list mutations, but not
/// across its own stub's deletion (a concurrent `nextResponse` racing
/// `delete_at_index` on the *same* stub is out of contract, per the core's
/// concurrency model).
pub struct StubHandle {
    predicates: Value,
    imposter_dir: PathBuf,
    stub_dir: Option<PathBuf>,
    meta_dir: Option<String>,
    backoff: BackoffConfig,
}

impl StubHandle {
    fn empty(imposter_dir: PathBuf, backoff: BackoffConfig) -> Self {
        Self {
            predicates: Value::Null,
            imposter_dir,
            stub_dir: None,
            meta_dir: None,
            backoff,
        }
    }

    pub fn predicates(&self) -> &Value {
        &self.predicates
    }

    /// Whether `first` actually found a matching stub.
    pub fn matched(&self) -> bool {
        self.stub_dir.is_some()
    }

    /// Append a response to this stub's cycle. A no-op on the empty handle.
    /// Not guarded by `meta.json`'s lock — concurrent proxy recording on the
    /// same stub is expected to be serialized upstream.
    pub async fn add_response(&self, response: Value) -> Result<()> {
        let Some(stub_dir) = &self.stub_dir else {
            return Ok(());
        };

        let meta_path = stub_dir.join("meta.json");
        let mut meta: StubMeta = read_file(&meta_path).await?.unwrap_or_default();
        let n = meta.response_files.len();
        meta.response_files.push(format!("responses/{n}.json"));
        for _ in 0..response_repeat(&response) {
            meta.order_with_repeats.push(n);
        }

        write_file(&stub_dir.join(format!("responses/{n}.json")), &response).await?;
        write_file(&meta_path, &meta).await
    }

    /// Advance the cycle cursor under `meta.json`'s lock and return the
    /// response it now points past. On the empty handle, returns a
    /// canonical empty response without touching disk.
    pub async fn next_response(&self) -> Result<NextResponse> {
        let Some(stub_dir) = &self.stub_dir else {
            return Ok(NextResponse {
                response: Value::Object(Default::default()),
                imposter_dir: self.imposter_dir.clone(),
                meta_dir: None,
            });
        };

        let meta_path = stub_dir.join("meta.json");
        let response_file = locked_read_modify_write::<StubMeta, String, _>(
            &meta_path,
            &self.backoff,
            |current| {
                let mut meta = current.ok_or_else(|| RepoError::missing_resource("meta.json"))?;
                let period = meta.order_with_repeats.len();
                if period == 0 {
                    return Err(RepoError::missing_resource("stub has no responses configured"));
                }
                let idx = meta.order_with_repeats[meta.next_index % period];
                let response_file = meta
                    .response_files
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| RepoError::missing_resource(format!("response file index {idx}")))?;
                meta.next_index = (meta.next_index + 1) % period;
                Ok((meta, response_file))
            },
        )
        .await?;

        let response_path = stub_dir.join(&response_file);
        let response: Value = read_file(&response_path)
            .await?
            .ok_or_else(|| RepoError::missing_resource(response_path.display().to_string()))?;

        Ok(NextResponse {
            response,
            imposter_dir: self.imposter_dir.clone(),
            meta_dir: self.meta_dir.clone(),
        })
    }

    /// No-op in this repository; predicate-match tracing is out of scope.
    pub fn record_match(&self) {}
}

/// A response returned by [`StubHandle::next_response`], plus a lazy
/// resolver for the stub's current position in the stubs list (useful for
/// correlating a response to its originating stub after inserts have
/// shifted positions).
pub struct NextResponse {
    response: Value,
    imposter_dir: PathBuf,
    meta_dir: Option<String>,
}

impl NextResponse {
    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn into_response(self) -> Value {
        self.response
    }

    /// Current index of the originating stub in `imposter.json`, or `0` if
    /// it is no longer present (or this came from the empty handle).
    pub async fn resolve_stub_index(&self) -> Result<usize> {
        let Some(meta_dir) = &self.meta_dir else {
            return Ok(0);
        };
        let header: Option<ImposterHeader> =
            read_file(&self.imposter_dir.join("imposter.json")).await?;
        Ok(header
            .map(|h| h.stubs.iter().position(|s| &s.meta.dir == meta_dir).unwrap_or(0))
            .unwrap_or(0))
    }
}
