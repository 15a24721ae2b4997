//! Stream liveness
//!
//! Watches the HLS output directory and keeps the set of playlists that are
//! ready to be served. The set is eventually consistent with the transcode
//! jobs: a playlist becomes live once the transcoder has written it and
//! stopped touching it for a moment, and stops being live when it is removed.

pub mod set;
pub mod watcher;

pub use set::LivenessSet;
pub use watcher::{is_stream_playlist, LivenessWatcher, WatcherConfig};
