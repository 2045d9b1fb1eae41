//! Request lifecycle engine.
//!
//! Owns a single query from validation through the multipart POST to the
//! simulated progress pacing, emitting stage events for presentation layers.
//! The service reports no granular progress, so the OCR/VQA/merge substeps
//! are paced with short artificial delays once the response has arrived.

pub(crate) mod api;
pub(crate) mod validate;

use crate::model::{
    ApiResponse, FailureKind, InfoEvent, QueryConfig, QueryEvent, QueryOutcome, Stage, StageState,
};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const SERVER_UNAVAILABLE_MSG: &str =
    "Server error: the assistant API is unavailable. Please try again shortly.";
const GENERIC_FAILURE_MSG: &str =
    "Unable to process the request. Double-check the image and question and try again.";

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Abort the in-flight query.
    Cancel,
}

/// Terminal failure of a query run. `Display` is the single-line message
/// shown to the user.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error("Request canceled before completion.")]
    Canceled,
    #[error("Failed to connect to the API at {base_url}. Make sure the backend is running.")]
    Network { base_url: String },
    #[error("{message}")]
    Server { message: String },
    #[error("{message}")]
    Application { message: String },
}

impl QueryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            QueryError::Validation(_) => FailureKind::Validation,
            QueryError::Canceled => FailureKind::Canceled,
            QueryError::Network { .. } => FailureKind::Network,
            QueryError::Server { .. } => FailureKind::Server,
            QueryError::Application { .. } => FailureKind::Application,
        }
    }
}

pub struct QueryEngine {
    cfg: QueryConfig,
}

impl QueryEngine {
    pub fn new(cfg: QueryConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(
        self,
        event_tx: UnboundedSender<QueryEvent>,
        mut control_rx: UnboundedReceiver<EngineControl>,
    ) -> Result<QueryOutcome, QueryError> {
        // Validation failures must leave no side effects: no stage events,
        // no network traffic.
        let plan = validate::check_request(&self.cfg)?;

        let _ = event_tx.send(QueryEvent::StagesInitialized);

        let image_bytes = tokio::fs::read(&self.cfg.image_path)
            .await
            .map_err(|e| QueryError::Validation(format!("Could not read image: {e}")))?;

        let client = api::ApiClient::new(
            &self.cfg.base_url,
            &self.cfg.user_agent,
            self.cfg.request_timeout,
        )
        .map_err(|_| QueryError::Network {
            base_url: self.cfg.base_url.clone(),
        })?;

        stage(&event_tx, Stage::Prep, StageState::Done, "Inputs validated");
        stage(&event_tx, Stage::Upload, StageState::Active, "Uploading image");
        let _ = event_tx.send(QueryEvent::Info(InfoEvent::RequestStarted {
            request_id: self.cfg.request_id.clone(),
        }));

        let started = Instant::now();
        let send = client.post_query(&plan, image_bytes);
        tokio::pin!(send);
        let response = tokio::select! {
            r = &mut send => r,
            _ = recv_cancel(&mut control_rx) => {
                mark_canceled(&event_tx);
                return Err(QueryError::Canceled);
            }
        };
        let response = match response {
            Ok(r) => r,
            Err(_) => {
                mark_network_failure(&event_tx);
                return Err(QueryError::Network {
                    base_url: self.cfg.base_url.clone(),
                });
            }
        };

        stage(&event_tx, Stage::Upload, StageState::Done, "Image uploaded");
        stage(&event_tx, Stage::Ocr, StageState::Active, "Extracting text");
        self.pace(&event_tx, &mut control_rx).await?;

        let status = response.status();
        let payload: ApiResponse = match response.json().await {
            Ok(p) => p,
            Err(_) => {
                mark_network_failure(&event_tx);
                return Err(QueryError::Network {
                    base_url: self.cfg.base_url.clone(),
                });
            }
        };

        if !status.is_success() || !payload.success {
            let message = payload.error.clone().unwrap_or_else(|| {
                if status.as_u16() >= 500 {
                    SERVER_UNAVAILABLE_MSG.to_string()
                } else {
                    GENERIC_FAILURE_MSG.to_string()
                }
            });
            stage(&event_tx, Stage::Ocr, StageState::Error, "Processing aborted");
            stage(&event_tx, Stage::Vqa, StageState::Error, "Not started");
            stage(
                &event_tx,
                Stage::Merge,
                StageState::Error,
                "Response unavailable",
            );
            return Err(if status.as_u16() >= 500 {
                QueryError::Server { message }
            } else {
                QueryError::Application { message }
            });
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let outcome = outcome_from_response(&self.cfg, payload, latency_ms);

        stage(
            &event_tx,
            Stage::Vqa,
            StageState::Active,
            "Generating visual answer",
        );
        stage(
            &event_tx,
            Stage::Merge,
            StageState::Pending,
            "Waiting for results",
        );
        self.pace(&event_tx, &mut control_rx).await?;

        if outcome.ocr_text.is_empty() {
            stage(
                &event_tx,
                Stage::Ocr,
                StageState::Error,
                "No readable text detected in this frame",
            );
        } else {
            stage(
                &event_tx,
                Stage::Ocr,
                StageState::Done,
                "Text detected successfully",
            );
        }
        self.pace(&event_tx, &mut control_rx).await?;

        if outcome.vqa_answer.is_empty() {
            stage(
                &event_tx,
                Stage::Vqa,
                StageState::Error,
                "VQA could not find enough context",
            );
        } else {
            stage(&event_tx, Stage::Vqa, StageState::Done, "Visual answer ready");
        }
        stage(
            &event_tx,
            Stage::Merge,
            StageState::Active,
            "Summarizing results",
        );
        self.pace(&event_tx, &mut control_rx).await?;
        stage(&event_tx, Stage::Merge, StageState::Done, "Answer ready");

        Ok(outcome)
    }

    /// One simulated substep delay, interruptible by cancellation.
    async fn pace(
        &self,
        event_tx: &UnboundedSender<QueryEvent>,
        control_rx: &mut UnboundedReceiver<EngineControl>,
    ) -> Result<(), QueryError> {
        tokio::select! {
            _ = tokio::time::sleep(self.cfg.stage_delay) => Ok(()),
            _ = recv_cancel(control_rx) => {
                mark_canceled(event_tx);
                Err(QueryError::Canceled)
            }
        }
    }
}

/// Resolve only when a Cancel arrives. A closed channel means the
/// controller is gone; the run is left to finish on its own.
async fn recv_cancel(rx: &mut UnboundedReceiver<EngineControl>) {
    match rx.recv().await {
        Some(EngineControl::Cancel) => {}
        None => futures::future::pending::<()>().await,
    }
}

fn stage(tx: &UnboundedSender<QueryEvent>, stage: Stage, state: StageState, hint: &str) {
    let _ = tx.send(QueryEvent::StageUpdate {
        stage,
        state,
        hint: Some(hint.to_string()),
    });
}

fn mark_canceled(tx: &UnboundedSender<QueryEvent>) {
    stage(tx, Stage::Upload, StageState::Error, "Canceled by user");
    stage(tx, Stage::Ocr, StageState::Error, "Canceled by user");
    stage(tx, Stage::Vqa, StageState::Error, "Canceled by user");
    stage(tx, Stage::Merge, StageState::Error, "Request canceled");
}

fn mark_network_failure(tx: &UnboundedSender<QueryEvent>) {
    stage(
        tx,
        Stage::Upload,
        StageState::Error,
        "Image never reached the server",
    );
    stage(tx, Stage::Ocr, StageState::Error, "OCR did not start");
    stage(tx, Stage::Vqa, StageState::Error, "VQA did not start");
    stage(tx, Stage::Merge, StageState::Error, "Network failure");
}

/// Build the outcome from a successful payload, defaulting every missing
/// detail field and falling back to the submitted question for the prompt.
fn outcome_from_response(cfg: &QueryConfig, payload: ApiResponse, latency_ms: u64) -> QueryOutcome {
    let details = payload.details.unwrap_or_default();
    QueryOutcome {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        request_id: cfg.request_id.clone(),
        base_url: cfg.base_url.clone(),
        question: cfg.question.clone(),
        answer: payload.answer.unwrap_or_default(),
        module: payload.module.unwrap_or_default().to_uppercase(),
        ocr_text: details.ocr_text.unwrap_or_default(),
        vqa_answer: details.vqa_answer.unwrap_or_default(),
        vqa_question_used: details
            .vqa_question_used
            .unwrap_or_else(|| cfg.question.clone()),
        latency_ms,
    }
}
