use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hard cap on question length, matching the service UI contract.
pub const MAX_QUESTION_CHARS: usize = 240;
/// Largest image accepted for upload (10 MiB).
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub base_url: String,
    pub request_id: String,
    pub image_path: PathBuf,
    pub question: String,
    #[serde(with = "humantime_serde")]
    pub stage_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

/// One step of the simulated progress timeline, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Prep,
    Upload,
    Ocr,
    Vqa,
    Merge,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Prep,
        Stage::Upload,
        Stage::Ocr,
        Stage::Vqa,
        Stage::Merge,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Prep => "Preparing request",
            Stage::Upload => "Uploading image",
            Stage::Ocr => "Running OCR",
            Stage::Vqa => "Running VQA",
            Stage::Merge => "Finalizing answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    Pending,
    Active,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub state: StageState,
    pub hint: Option<String>,
}

/// Fresh timeline for a new submission: first stage active, rest pending.
pub fn initial_stages() -> Vec<StageEntry> {
    Stage::ALL
        .iter()
        .enumerate()
        .map(|(i, &stage)| StageEntry {
            stage,
            state: if i == 0 {
                StageState::Active
            } else {
                StageState::Pending
            },
            hint: None,
        })
        .collect()
}

/// Broad failure classes surfaced to the user. Each submission ends in at
/// most one of these; the mapping drives both the stage hints and the
/// single-line error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Validation,
    Canceled,
    Network,
    Server,
    Application,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryEvent {
    /// A new submission started; presentation layers should reset their timeline.
    StagesInitialized,
    StageUpdate {
        stage: Stage,
        state: StageState,
        hint: Option<String>,
    },
    Info(InfoEvent),
    QueryCompleted {
        // Box to keep QueryEvent small; QueryOutcome carries several strings.
        result: Box<QueryOutcome>,
    },
    QueryFailed {
        kind: FailureKind,
        message: String,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    RequestStarted { request_id: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::RequestStarted { request_id } => {
                format!("Submitted request {request_id}")
            }
        }
    }
}

/// Final result of a successful query, mirroring the service response with
/// empty-string fallbacks for missing detail fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    #[serde(default)]
    pub timestamp_utc: String,
    pub request_id: String,
    pub base_url: String,
    pub question: String,
    pub answer: String,
    /// Module that supplied the primary answer ("OCR" or "VQA"), uppercased.
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub ocr_text: String,
    #[serde(default)]
    pub vqa_answer: String,
    /// Prompt actually sent to the VQA model; falls back to the submitted question.
    #[serde(default)]
    pub vqa_question_used: String,
    pub latency_ms: u64,
}

// Wire format of the service.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub details: Option<ApiDetails>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDetails {
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub vqa_answer: Option<String>,
    #[serde(default)]
    pub vqa_question_used: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModulesResponse {
    #[serde(default)]
    pub vqa_available: bool,
    #[serde(default)]
    pub ocr_available: bool,
    #[serde(default)]
    pub status: Option<String>,
}
