use crate::artifacts::{PipelineArtifact, RunId};
use crate::stage::{Diagnostic, StageId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted { run_id: RunId, stages: usize },
    StageSkipped { stage: StageId },
    StageStarted { stage: StageId, index: usize, total: usize },
    StageSucceeded { stage: StageId, artifacts: Vec<PipelineArtifact> },
    StageFailed { stage: StageId, diagnostic: Diagnostic, tolerated: bool },
    RunFinished { run_id: RunId, succeeded: bool },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: PipelineEvent);
}

/// Keeps every event; used by tests and embedders that render their own output.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
