use std::{
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{fs, process::Command};
use tracing::{info, warn};

use super::graph::{FilterGraph, OUTPUT_AUDIO_LABEL, OUTPUT_VIDEO_LABEL};
use crate::{
    errors::{PipelineError, Result},
    slide::SyncedPair,
    store::remove_file_if_exists,
};

const FILTER_SCRIPT_NAME: &str = "filter_graph.txt";

/// Codec policy applied to every assembled video.
const OUTPUT_POLICY: [&str; 10] = [
    "-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac", "-b:a", "192k", "-pix_fmt",
    "yuv420p",
];

/// One encoder invocation: the graph, where its text was written, and the
/// output file.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub graph: FilterGraph,
    pub filter_script: PathBuf,
    pub output: PathBuf,
}

impl EncodeJob {
    pub fn args(&self) -> Vec<OsString> {
        let mut args = self.graph.input_args();
        args.push("-filter_complex_script".into());
        args.push(self.filter_script.clone().into_os_string());
        for label in [OUTPUT_VIDEO_LABEL, OUTPUT_AUDIO_LABEL] {
            args.push("-map".into());
            args.push(format!("[{label}]").into());
        }
        args.extend(OUTPUT_POLICY.iter().map(OsString::from));
        args.push("-y".into());
        args.push(self.output.clone().into_os_string());
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOutcome {
    pub success: bool,
    pub status: String,
    pub diagnostics: String,
}

/// External media encoder.
pub trait Encoder: Send + Sync {
    fn encode(&self, job: &EncodeJob) -> impl Future<Output = Result<EncoderOutcome>> + Send;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Encoder for Ffmpeg {
    async fn encode(&self, job: &EncodeJob) -> Result<EncoderOutcome> {
        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .args(job.args())
            .output()
            .await
            .map_err(|err| PipelineError::Encoder {
                status: "spawn failed".to_string(),
                diagnostics: format!("{:?}: {err}", self.program),
            })?;

        Ok(EncoderOutcome {
            success: output.status.success(),
            status: output.status.to_string(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub segments: usize,
    pub total_seconds: f64,
}

pub struct VideoAssembler<E> {
    encoder: Arc<E>,
}

impl<E: Encoder> VideoAssembler<E> {
    pub fn new(encoder: Arc<E>) -> Self {
        Self { encoder }
    }

    /// Holds each image exactly as long as its narration and concatenates
    /// the slides in order into `output`. The scratch directory is always
    /// removed; `output` is removed when encoding fails.
    pub async fn assemble(&self, pairs: &[SyncedPair], output: &Path) -> Result<AssembledVideo> {
        let graph = FilterGraph::from_pairs(pairs)?;
        if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let scratch = tempfile::Builder::new().prefix("slidecast-").tempdir()?;
        let filter_script = scratch.path().join(FILTER_SCRIPT_NAME);
        fs::write(&filter_script, graph.render()).await?;

        let job = EncodeJob {
            graph,
            filter_script,
            output: output.to_path_buf(),
        };
        info!(
            target: "video_assembler",
            segments = job.graph.segments.len(),
            total_seconds = job.graph.total_seconds(),
            output = ?output,
            "encoding video"
        );

        let result = self.encoder.encode(&job).await;
        let outcome = match result {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                discard_partial(output).await;
                return Err(PipelineError::Encoder {
                    status: outcome.status,
                    diagnostics: tail(&outcome.diagnostics),
                });
            }
            Err(err) => {
                discard_partial(output).await;
                return Err(err);
            }
        };

        if !fs::try_exists(output).await.unwrap_or(false) {
            warn!(
                target: "video_assembler",
                status = %outcome.status,
                "encoder reported success without writing output"
            );
            return Err(PipelineError::MissingOutput(output.to_path_buf()));
        }

        Ok(AssembledVideo {
            path: output.to_path_buf(),
            segments: job.graph.segments.len(),
            total_seconds: job.graph.total_seconds(),
        })
    }
}

async fn discard_partial(output: &Path) {
    if let Err(err) = remove_file_if_exists(output).await {
        warn!(target: "video_assembler", error = %err, output = ?output, "could not remove partial output");
    }
}

/// Last lines of encoder stderr; the banner and stream dump are noise.
fn tail(diagnostics: &str) -> String {
    const KEEP: usize = 20;
    let lines: Vec<&str> = diagnostics.trim_end().lines().collect();
    lines[lines.len().saturating_sub(KEEP)..].join("\n")
}
