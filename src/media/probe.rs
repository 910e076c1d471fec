use std::{
    future::Future,
    path::{Path, PathBuf},
};

use tokio::process::Command;
use tracing::debug;

use crate::errors::{PipelineError, Result};

/// Measures the playable length of a media file in seconds.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<f64>> + Send;
}

#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: PathBuf,
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DurationProbe for Ffprobe {
    async fn probe(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|err| PipelineError::Probe {
                path: path.to_path_buf(),
                reason: format!("failed to run {:?}: {err}", self.program),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Probe {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let seconds = parse_duration(&stdout).ok_or_else(|| PipelineError::Probe {
            path: path.to_path_buf(),
            reason: format!("unparseable duration {:?}", stdout.trim()),
        })?;
        debug!(target: "speech", path = ?path, seconds, "probed duration");
        Ok(seconds)
    }
}

/// First line that parses as a float; ffprobe prints `N/A` for unknown.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite())
}
