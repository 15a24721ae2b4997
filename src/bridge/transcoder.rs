//! Transcoder command line
//!
//! Builds the external encoder invocation that turns one forwarded RTP
//! stream into a rolling HLS playlist.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::engine::MediaKind;

/// External transcoder configuration
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Program to run
    pub program: PathBuf,

    /// Target HLS segment duration in seconds
    pub segment_duration: u32,

    /// Number of segments kept in the playlist
    pub playlist_size: u32,

    /// Transcoder log level
    pub log_level: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            segment_duration: 4,
            playlist_size: 5,
            log_level: "debug".into(),
        }
    }
}

impl TranscoderConfig {
    /// Set the program path
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the segment duration
    pub fn segment_duration(mut self, secs: u32) -> Self {
        self.segment_duration = secs;
        self
    }

    /// Set the playlist window
    pub fn playlist_size(mut self, segments: u32) -> Self {
        self.playlist_size = segments;
        self
    }

    /// Set the transcoder log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Argument list for one stream
    ///
    /// Video is re-encoded to H.264, audio to AAC; the other track type is
    /// copied.
    pub fn args(&self, kind: MediaKind, sdp_path: &Path, playlist_path: &Path) -> Vec<OsString> {
        let (video_codec, audio_codec) = match kind {
            MediaKind::Video => ("libx264", "copy"),
            MediaKind::Audio => ("copy", "aac"),
        };

        let mut args: Vec<OsString> = [
            "-protocol_whitelist",
            "file,udp,rtp",
            "-fflags",
            "nobuffer",
            "-use_wallclock_as_timestamps",
            "1",
            "-flush_packets",
            "1",
            "-loglevel",
            self.log_level.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push("-i".into());
        args.push(sdp_path.as_os_str().to_owned());

        args.extend(
            [
                "-c:v".to_string(),
                video_codec.to_string(),
                "-c:a".to_string(),
                audio_codec.to_string(),
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                self.segment_duration.to_string(),
                "-hls_list_size".to_string(),
                self.playlist_size.to_string(),
                "-hls_flags".to_string(),
                "append_list".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );

        args.push(playlist_path.as_os_str().to_owned());
        args
    }

    /// Ready-to-spawn command for one stream
    ///
    /// Output is piped for logging. The process is killed if its handle is
    /// dropped.
    pub fn command(&self, kind: MediaKind, sdp_path: &Path, playlist_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        let _ = cmd
            .args(self.args(kind, sdp_path, playlist_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
