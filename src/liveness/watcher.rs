//! Output directory watcher
//!
//! Filesystem events feed a pending table; a playlist moves from pending to
//! live once no event has touched it for the stability threshold. A periodic
//! rescan repairs anything the event stream missed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::set::LivenessSet;
use crate::error::{Error, Result};

/// Whether a file name is a stream playlist (`stream<digits>.m3u8`)
///
/// The digit run may be empty.
pub fn is_stream_playlist(name: &str) -> bool {
    name.strip_prefix("stream")
        .and_then(|rest| rest.strip_suffix(".m3u8"))
        .is_some_and(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Liveness watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory to watch (non-recursive)
    pub dir: PathBuf,

    /// Quiet period before a written playlist counts as live
    pub stability_threshold: Duration,

    /// How often pending playlists are checked
    pub poll_interval: Duration,

    /// How often the directory listing is reconciled
    pub rescan_interval: Duration,
}

impl WatcherConfig {
    /// Watch a directory with default timings
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stability_threshold: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            rescan_interval: Duration::from_secs(3),
        }
    }

    /// Set the stability threshold
    pub fn stability_threshold(mut self, threshold: Duration) -> Self {
        self.stability_threshold = threshold;
        self
    }

    /// Set the pending poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the rescan interval
    pub fn rescan_interval(mut self, interval: Duration) -> Self {
        self.rescan_interval = interval;
        self
    }
}

/// Background watcher maintaining a [`LivenessSet`]
///
/// Stops when dropped.
pub struct LivenessWatcher {
    set: LivenessSet,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LivenessWatcher {
    /// Start watching
    ///
    /// Fails with [`Error::OutputDirMissing`] if the directory does not
    /// exist. Playlists already present are live immediately.
    pub fn start(config: WatcherConfig) -> Result<Self> {
        if !config.dir.is_dir() {
            return Err(Error::OutputDirMissing(config.dir));
        }

        let set = LivenessSet::new();
        for name in list_playlists(&config.dir)? {
            tracing::info!(stream = %name, "Stream live");
            set.insert(name);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&config.dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %config.dir.display(), live = set.len(), "Watching output directory");

        let cancel = CancellationToken::new();
        let state = WatchState {
            dir: config.dir.clone(),
            set: set.clone(),
            pending: HashMap::new(),
            threshold: config.stability_threshold,
        };
        let task = tokio::spawn(run(state, watcher, rx, config, cancel.clone()));

        Ok(Self {
            set,
            cancel,
            task: Some(task),
        })
    }

    /// The maintained set
    pub fn set(&self) -> &LivenessSet {
        &self.set
    }

    /// Sorted live playlist names
    pub fn snapshot(&self) -> Vec<String> {
        self.set.snapshot()
    }

    /// Whether any stream is live
    pub fn is_live(&self) -> bool {
        self.set.is_live()
    }

    /// Stop watching and wait for the task to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LivenessWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct WatchState {
    dir: PathBuf,
    set: LivenessSet,
    pending: HashMap<String, Instant>,
    threshold: Duration,
}

impl WatchState {
    fn on_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for name in playlist_names(&event.paths) {
                    self.gone(&name);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(from) = event.paths.first().and_then(|p| playlist_name(p)) {
                    self.gone(&from);
                }
                if let Some(to) = event.paths.get(1).and_then(|p| playlist_name(p)) {
                    self.touched(to);
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for name in playlist_names(&event.paths) {
                    self.touched(name);
                }
            }
            _ => {}
        }
    }

    fn touched(&mut self, name: String) {
        if !self.set.contains(&name) {
            let _ = self.pending.insert(name, Instant::now());
        }
    }

    fn gone(&mut self, name: &str) {
        let _ = self.pending.remove(name);
        if self.set.remove(name) {
            tracing::info!(stream = %name, "Stream offline");
        }
    }

    /// Promote pending playlists that have been quiet long enough
    fn settle(&mut self, now: Instant) {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, touched)| now.duration_since(**touched) >= self.threshold)
            .map(|(name, _)| name.clone())
            .collect();

        for name in ready {
            let _ = self.pending.remove(&name);
            if self.dir.join(&name).is_file() {
                if self.set.insert(name.clone()) {
                    tracing::info!(stream = %name, "Stream live");
                }
            } else if self.set.remove(&name) {
                tracing::info!(stream = %name, "Stream offline");
            }
        }
    }

    /// Reconcile with the directory listing
    fn rescan(&mut self) {
        let present = match list_playlists(&self.dir) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Rescan failed");
                return;
            }
        };

        for name in self.set.snapshot() {
            if !present.contains(&name) {
                self.gone(&name);
            }
        }
        for name in present {
            if !self.set.contains(&name) && !self.pending.contains_key(&name) {
                let _ = self.pending.insert(name, Instant::now());
            }
        }
    }
}

/// Event loop; owns the watcher so event delivery stops with the task
async fn run(
    mut state: WatchState,
    _watcher: notify::RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    config: WatcherConfig,
    cancel: CancellationToken,
) {
    let mut poll = tokio::time::interval(config.poll_interval);
    let mut rescan = tokio::time::interval(config.rescan_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(res) = events.recv() => match res {
                Ok(event) => state.on_event(event),
                Err(e) => tracing::warn!(error = %e, "Watcher error"),
            },
            _ = poll.tick() => state.settle(Instant::now()),
            _ = rescan.tick() => state.rescan(),
        }
    }

    tracing::debug!(dir = %state.dir.display(), "Output directory watcher stopped");
}

fn playlist_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    is_stream_playlist(name).then(|| name.to_string())
}

fn playlist_names(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().filter_map(|p| playlist_name(p)).collect()
}

fn list_playlists(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_stream_playlist(name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(dir: &Path) -> WatcherConfig {
        WatcherConfig::new(dir)
            .stability_threshold(Duration::from_millis(200))
            .poll_interval(Duration::from_millis(20))
            .rescan_interval(Duration::from_millis(500))
    }

    async fn wait_for(watcher: &LivenessWatcher, expected: &[&str]) {
        for _ in 0..250 {
            if watcher.snapshot() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {:?}, live set is {:?}", expected, watcher.snapshot());
    }

    #[test]
    fn test_playlist_name_pattern() {
        assert!(is_stream_playlist("stream.m3u8"));
        assert!(is_stream_playlist("stream1.m3u8"));
        assert!(is_stream_playlist("stream042.m3u8"));

        assert!(!is_stream_playlist("stream1.ts"));
        assert!(!is_stream_playlist("stream1.m3u8.tmp"));
        assert!(!is_stream_playlist("streamA.m3u8"));
        assert!(!is_stream_playlist("mystream1.m3u8"));
        assert!(!is_stream_playlist("stream1.M3U8"));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let result = LivenessWatcher::start(WatcherConfig::new(&missing));
        assert!(matches!(result, Err(Error::OutputDirMissing(p)) if p == missing));
    }

    #[tokio::test]
    async fn test_existing_playlists_are_live() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stream2.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.path().join("stream2_0.ts"), "").unwrap();

        let watcher = LivenessWatcher::start(fast_config(dir.path())).unwrap();
        assert_eq!(watcher.snapshot(), ["stream2.m3u8"]);
        assert!(watcher.is_live());
    }

    #[tokio::test]
    async fn test_playlist_appears_and_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = LivenessWatcher::start(fast_config(dir.path())).unwrap();
        assert!(!watcher.is_live());

        let playlist = dir.path().join("stream3.m3u8");
        std::fs::write(&playlist, "#EXTM3U\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        wait_for(&watcher, &["stream3.m3u8"]).await;

        std::fs::remove_file(&playlist).unwrap();
        wait_for(&watcher, &[]).await;

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_non_matching_files_never_live() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = LivenessWatcher::start(fast_config(dir.path())).unwrap();

        std::fs::write(dir.path().join("stream1.ts"), "").unwrap();
        std::fs::write(dir.path().join("other.m3u8"), "").unwrap();
        std::fs::write(dir.path().join("stream9.m3u8"), "").unwrap();
        wait_for(&watcher, &["stream9.m3u8"]).await;

        // Let a rescan pass as well
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(watcher.snapshot(), ["stream9.m3u8"]);
    }

    #[test]
    fn test_pending_until_quiet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stream1.m3u8"), "").unwrap();

        let mut state = WatchState {
            dir: dir.path().to_path_buf(),
            set: LivenessSet::new(),
            pending: HashMap::new(),
            threshold: Duration::from_secs(1),
        };

        let start = Instant::now();
        state.touched("stream1.m3u8".into());
        state.settle(start);
        assert!(state.set.is_empty());

        state.settle(start + Duration::from_secs(2));
        assert!(state.set.contains("stream1.m3u8"));
        assert!(state.pending.is_empty());

        // Writes to a live playlist do not re-enter pending
        state.touched("stream1.m3u8".into());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_pending_file_removed_before_settling() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = WatchState {
            dir: dir.path().to_path_buf(),
            set: LivenessSet::new(),
            pending: HashMap::new(),
            threshold: Duration::from_millis(1),
        };

        // Never written to disk
        state.touched("stream5.m3u8".into());
        state.settle(Instant::now() + Duration::from_secs(1));
        assert!(state.set.is_empty());
        assert!(state.pending.is_empty());
    }
}
