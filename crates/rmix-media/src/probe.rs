//! FFprobe stream inspection.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Media facts the pipeline needs about an input clip.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MediaInfo {
    /// Container duration in seconds, when known
    pub duration: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Inspects input media.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

/// Probes media by running `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::probe_failed(format!(
                "{}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)?;

    let has_stream = |kind: &str| {
        parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some(kind))
    };

    Ok(MediaInfo {
        duration: parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok()),
        has_video: has_stream("video"),
        has_audio: has_stream("audio"),
    })
}
