use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{PipelineError, Result};

/// Run-level abort switch. Checked between slides and before assembly, never
/// in the middle of an external call.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            cancel: Arc::default(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Aborted("cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PipelineError::Aborted("run timed out".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Scripts,
    Audio,
    Synchronize,
    Assemble,
    QaIndex,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Scripts => "scripts",
            Stage::Audio => "audio",
            Stage::Synchronize => "synchronize",
            Stage::Assemble => "assemble",
            Stage::QaIndex => "qa_index",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    pub percent: u8,
    pub details: String,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            percent: 0,
            details: String::new(),
        }
    }
}

/// Stage weights of a full run, as (start, end) percent.
fn stage_span(stage: Stage) -> (u8, u8) {
    match stage {
        Stage::Idle => (0, 0),
        Stage::Scripts => (0, 45),
        Stage::Audio => (45, 80),
        Stage::Synchronize => (80, 82),
        Stage::Assemble => (82, 95),
        Stage::QaIndex => (95, 99),
        Stage::Done => (100, 100),
    }
}

/// Publishes the latest progress; subscribers only ever see the newest value.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Progress>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Progress {
        self.tx.borrow().clone()
    }

    /// Reports `done` of `total` units inside `stage`.
    pub fn step(&self, stage: Stage, done: usize, total: usize, details: impl Into<String>) {
        let (start, end) = stage_span(stage);
        let fraction = if total == 0 {
            1.0
        } else {
            (done.min(total) as f64) / (total as f64)
        };
        let percent = start as f64 + fraction * f64::from(end - start);
        self.publish(Progress {
            stage,
            percent: percent.round() as u8,
            details: details.into(),
        });
    }

    pub fn enter(&self, stage: Stage, details: impl Into<String>) {
        self.step(stage, 0, 1, details);
    }

    pub fn finish(&self, details: impl Into<String>) {
        self.step(Stage::Done, 1, 1, details);
    }

    pub fn reset(&self) {
        self.publish(Progress::default());
    }

    fn publish(&self, progress: Progress) {
        // No receivers is fine; the value is kept for late subscribers.
        self.tx.send_replace(progress);
    }
}
