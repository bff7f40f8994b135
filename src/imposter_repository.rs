//! Root-level imposter lifecycle: locating an imposter's directory from its
//! port, tracking the in-memory shutdown hook each running imposter owns,
//! and composing the stub repository's materialized view into a full
//! imposter JSON.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::error::{RepoError, Result};
use crate::fs::{read_file, remove, write_file};
use crate::model::ImposterHeader;
use crate::stub_repository::StubRepository;

/// Shutdown hook supplied by the protocol server that owns a running
/// imposter. Invoked at most once, by `del` or `delete_all`/`delete_all_sync`.
pub type StopHook = Box<dyn FnOnce() + Send + 'static>;

/// Root of the repository: one `ImposterRepository` per process, holding a
/// process-local `port -> stop hook` table plus the on-disk `datadir`.
pub struct ImposterRepository {
    config: RepositoryConfig,
    handles: tokio::sync::Mutex<HashMap<u16, StopHook>>,
}

impl ImposterRepository {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            handles: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// A stub repository bound to `{datadir}/{port}`.
    pub fn stubs_for(&self, port: u16) -> StubRepository {
        StubRepository::new(self.config.imposter_dir(port), *self.config.backoff())
    }

    fn header_path(&self, port: u16) -> std::path::PathBuf {
        self.config.imposter_dir(port).join("imposter.json")
    }

    /// Write `imposter`'s protocol-level fields as the header, preserving
    /// whatever stubs are already on disk (stub mutators commonly run
    /// before the header itself is ever written, see module docs), and
    /// record `stop` in the handle table.
    pub async fn add(&self, port: u16, imposter: Value, stop: StopHook) -> Result<()> {
        let path = self.header_path(port);
        let existing: ImposterHeader = read_file(&path).await?.unwrap_or_default();

        let mut incoming: ImposterHeader =
            serde_json::from_value(imposter).map_err(|e| RepoError::parse(&path, e))?;
        incoming.extra.remove("requests");
        incoming.stubs = existing.stubs;
        incoming.next_stub_dir_index = existing.next_stub_dir_index;

        write_file(&path, &incoming).await?;
        self.handles.lock().await.insert(port, stop);
        Ok(())
    }

    /// The fully materialized imposter: header fields plus every stub's
    /// predicates and actual response bodies. `None` if no header exists.
    pub async fn get(&self, port: u16) -> Result<Option<Value>> {
        Self::get_with_config(self.config.clone(), port).await
    }

    /// Same as [`Self::get`], but against an owned `RepositoryConfig`
    /// instead of `&self` — lets [`Self::all`] fan this out across
    /// `tokio::spawn`, which requires `'static` futures, without needing an
    /// `Arc<Self>` at the API boundary.
    async fn get_with_config(config: RepositoryConfig, port: u16) -> Result<Option<Value>> {
        let path = config.imposter_dir(port).join("imposter.json");
        let Some(header): Option<ImposterHeader> = read_file(&path).await? else {
            return Ok(None);
        };

        let stubs = StubRepository::new(config.imposter_dir(port), *config.backoff());
        let materialized = stubs.to_json().await?;
        let mut fields = header.extra;
        fields.insert(
            "stubs".to_string(),
            serde_json::to_value(materialized).map_err(|e| RepoError::parse(&path, e))?,
        );
        Ok(Some(Value::Object(fields)))
    }

    /// Every imposter currently tracked in the handle table, materialized in
    /// parallel — each `get` runs on its own spawned task rather than being
    /// awaited one port at a time.
    pub async fn all(&self) -> Result<Vec<Value>> {
        let ports: Vec<u16> = self.handles.lock().await.keys().copied().collect();

        let tasks: Vec<_> = ports
            .into_iter()
            .map(|port| tokio::spawn(Self::get_with_config(self.config.clone(), port)))
            .collect();

        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let joined = task
                .await
                .map_err(|e| RepoError::io(self.config.datadir(), std::io::Error::other(e)))?;
            if let Some(imposter) = joined? {
                out.push(imposter);
            }
        }
        Ok(out)
    }

    /// In-memory only: is this port currently tracked?
    pub async fn exists(&self, port: u16) -> bool {
        self.handles.lock().await.contains_key(&port)
    }

    /// Materialize the imposter for the return value, invoke and clear its
    /// stop hook, then remove its directory entirely.
    pub async fn del(&self, port: u16) -> Result<Option<Value>> {
        let imposter = self.get(port).await?;
        if let Some(stop) = self.handles.lock().await.remove(&port) {
            stop();
        }
        remove(&self.config.imposter_dir(port)).await?;
        Ok(imposter)
    }

    /// Invoke every stop hook, then remove the entire data directory.
    pub async fn delete_all(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        for (_, stop) in handles.drain() {
            stop();
        }
        drop(handles);
        remove(self.config.datadir()).await
    }

    /// Synchronous variant of [`Self::delete_all`], for use on a process
    /// shutdown path that cannot await (e.g. a signal handler). Must not be
    /// called from within an active async task on a current-thread runtime,
    /// or the blocking lock acquisition can deadlock.
    pub fn delete_all_sync(&self) -> Result<()> {
        let mut handles = self.handles.blocking_lock();
        for (_, stop) in handles.drain() {
            stop();
        }
        drop(handles);
        match std::fs::remove_dir_all(self.config.datadir()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepoError::io(self.config.datadir(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StubInput;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn repo(dir: &TempDir) -> ImposterRepository {
        ImposterRepository::new(RepositoryConfig::new(dir.path()))
    }

    #[tokio::test]
    async fn add_then_get_round_trips_header_fields() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);

        repo.add(4545, json!({"port": 4545, "protocol": "http"}), Box::new(|| {}))
            .await
            .unwrap();

        let got = repo.get(4545).await.unwrap().unwrap();
        assert_eq!(got["port"], json!(4545));
        assert_eq!(got["protocol"], json!("http"));
        assert_eq!(got["stubs"], json!([]));
    }

    #[tokio::test]
    async fn get_is_none_for_unknown_port() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);
        assert!(repo.get(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stubs_added_before_header_survive_add() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);

        repo.stubs_for(4545)
            .add(StubInput::new(
                json!([{"equals": {"path": "/"}}]),
                vec![json!({"is": {"body": "hi"}})],
            ))
            .await
            .unwrap();

        repo.add(4545, json!({"port": 4545, "protocol": "http"}), Box::new(|| {}))
            .await
            .unwrap();

        let got = repo.get(4545).await.unwrap().unwrap();
        assert_eq!(got["stubs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exists_tracks_handle_table_only() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);
        assert!(!repo.exists(4545).await);
        repo.add(4545, json!({"port": 4545}), Box::new(|| {})).await.unwrap();
        assert!(repo.exists(4545).await);
    }

    #[tokio::test]
    async fn del_invokes_stop_hook_and_removes_directory() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = Arc::clone(&stopped);

        repo.add(
            4545,
            json!({"port": 4545}),
            Box::new(move || stopped_clone.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();

        let imposter = repo.del(4545).await.unwrap();
        assert!(imposter.is_some());
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!repo.exists(4545).await);
        assert!(!dir.path().join("4545").exists());
    }

    #[tokio::test]
    async fn delete_all_removes_entire_datadir() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);
        repo.add(4545, json!({"port": 4545}), Box::new(|| {})).await.unwrap();
        repo.add(5555, json!({"port": 5555}), Box::new(|| {})).await.unwrap();

        repo.delete_all().await.unwrap();

        assert!(!dir.path().join("4545").exists());
        assert!(!dir.path().join("5555").exists());
        assert!(!repo.exists(4545).await);
    }

    #[tokio::test]
    async fn all_materializes_every_tracked_imposter() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir);
        repo.add(4545, json!({"port": 4545}), Box::new(|| {})).await.unwrap();
        repo.add(5555, json!({"port": 5555}), Box::new(|| {})).await.unwrap();

        let mut all = repo.all().await.unwrap();
        all.sort_by_key(|v| v["port"].as_i64().unwrap());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["port"], json!(4545));
        assert_eq!(all[1]["port"], json!(5555));
    }
}
