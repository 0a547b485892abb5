use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Creates [`ResourceSession`]s rooted under a common scratch directory.
#[derive(Debug)]
pub struct ResourceManager {
    base_dir: PathBuf,
}

impl ResourceManager {
    pub fn new() -> std::io::Result<Self> {
        let base_dir = std::env::temp_dir().join("cts-core");
        std::fs::create_dir_all(&base_dir)?;
        Ok(ResourceManager { base_dir })
    }

    /// Scoped acquisition: one session per run, released as a whole.
    pub fn create_session(&self) -> std::io::Result<Arc<ResourceSession>> {
        let id = Uuid::new_v4();
        let temp_dir = self.base_dir.join(format!("session_{id}"));
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Arc::new(ResourceSession {
            id,
            temp_dir,
            processes: DashMap::new(),
            temp_files: DashSet::new(),
            token: CancellationToken::new(),
            cleaned: AtomicBool::new(false),
        }))
    }
}

/// All OS-level resources belonging to one run: live process ids and
/// tracked temporary files. Every process spawn and temp file goes through
/// here so a stop request can reach everything that is still alive.
#[derive(Debug)]
pub struct ResourceSession {
    id: Uuid,
    temp_dir: PathBuf,
    processes: DashMap<u32, ()>,
    temp_files: DashSet<PathBuf>,
    token: CancellationToken,
    cleaned: AtomicBool,
}

impl ResourceSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled when the run is stopped or cleaned up. Process runners
    /// select on this while waiting on a child.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request that every in-flight process winds down. Does not delete
    /// files; `cleanup` does that once the run task exits.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Registers a spawned process. The returned guard deregisters it on
    /// every exit path, including panics and kills.
    pub fn register_process(self: &Arc<Self>, pid: u32) -> ProcessGuard {
        self.processes.insert(pid, ());
        ProcessGuard {
            session: Arc::clone(self),
            pid,
        }
    }

    /// Directory for this session's scratch files, deleted wholesale on
    /// cleanup.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Allocates and tracks a scratch file path (not yet created on disk).
    pub fn temp_file(&self, stem: &str) -> PathBuf {
        let path = self.temp_dir.join(format!("{stem}_{}", Uuid::new_v4()));
        self.temp_files.insert(path.clone());
        path
    }

    pub fn track_file(&self, path: impl Into<PathBuf>) {
        self.temp_files.insert(path.into());
    }

    pub fn live_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn tracked_files(&self) -> usize {
        self.temp_files.len()
    }

    /// Force-terminates every tracked process and deletes every tracked
    /// file. Idempotent; individual failures are logged and skipped so one
    /// stuck resource cannot block the rest.
    pub fn cleanup(&self) {
        self.token.cancel();
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }

        for entry in self.processes.iter() {
            let pid = *entry.key();
            tracing::debug!(pid, "killing leftover process");
            kill_process(pid);
        }
        self.processes.clear();

        for path in self.temp_files.iter() {
            if let Err(e) = std::fs::remove_file(path.key()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.key().display(), error = %e, "failed to delete temp file");
                }
            }
        }
        self.temp_files.clear();

        if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove session temp dir");
            }
        }
    }
}

impl Drop for ResourceSession {
    fn drop(&mut self) {
        // Last line of defense; normal paths call cleanup() explicitly.
        self.cleanup();
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pid, error = %e, "failed to kill process");
        }
    }
}

#[cfg(not(unix))]
fn kill_process(_pid: u32) {}

/// RAII registration of one live process.
#[derive(Debug)]
pub struct ProcessGuard {
    session: Arc<ResourceSession>,
    pid: u32,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.session.processes.remove(&self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tracks_and_deletes_temp_files() {
        let manager = ResourceManager::new().unwrap();
        let session = manager.create_session().unwrap();

        let path = session.temp_file("input");
        std::fs::write(&path, b"1 2 3").unwrap();
        assert_eq!(session.tracked_files(), 1);

        session.cleanup();
        assert!(!path.exists());
        assert_eq!(session.tracked_files(), 0);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let manager = ResourceManager::new().unwrap();
        let session = manager.create_session().unwrap();
        let path = session.temp_file("out");
        std::fs::write(&path, b"x").unwrap();

        session.cleanup();
        assert_eq!(session.live_processes(), 0);
        assert_eq!(session.tracked_files(), 0);

        // Second call must not error or resurrect anything.
        session.cleanup();
        assert_eq!(session.live_processes(), 0);
        assert_eq!(session.tracked_files(), 0);
    }

    #[test]
    fn cleanup_cancels_the_token() {
        let manager = ResourceManager::new().unwrap();
        let session = manager.create_session().unwrap();
        assert!(!session.is_cancelled());
        session.cleanup();
        assert!(session.is_cancelled());
    }

    #[test]
    fn process_guard_deregisters_on_drop() {
        let manager = ResourceManager::new().unwrap();
        let session = manager.create_session().unwrap();

        let guard = session.register_process(424242);
        assert_eq!(session.live_processes(), 1);
        drop(guard);
        assert_eq!(session.live_processes(), 0);
    }

    #[test]
    fn missing_temp_file_does_not_block_cleanup() {
        let manager = ResourceManager::new().unwrap();
        let session = manager.create_session().unwrap();

        // Tracked but never created on disk.
        let ghost = session.temp_file("ghost");
        let real = session.temp_file("real");
        std::fs::write(&real, b"payload").unwrap();
        assert!(!ghost.exists());

        session.cleanup();
        assert!(!real.exists());
    }
}
