use crate::model::{
    initial_stages, QueryEvent, QueryOutcome, StageEntry, MAX_QUESTION_CHARS,
};

/// Canned questions selectable with the digit keys; chosen one overwrites
/// the question field.
pub const EXAMPLE_QUESTIONS: [&str; 5] = [
    "What's written on this sign?",
    "What color is the car?",
    "How many people are in this image?",
    "What is this person doing?",
    "Read the text from this document",
];

/// Which input field currently receives keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    None,
    Question,
    ImagePath,
}

/// The four mutually exclusive answer-panel views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerView {
    Idle,
    Progress,
    Error,
    Success,
}

pub struct UiState {
    pub tab: usize,
    pub focus: Focus,
    pub question: String,
    pub image_path: String,
    /// File name, size and MIME once a valid image is set, or an inline
    /// validation message.
    pub image_note: Option<String>,
    pub image_valid: bool,
    pub loading: bool,
    pub stages: Vec<StageEntry>,
    pub error: Option<String>,
    pub result: Option<QueryOutcome>,
    pub info: String,
    pub base_url: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            focus: Focus::None,
            question: String::new(),
            image_path: String::new(),
            image_note: None,
            image_valid: false,
            loading: false,
            stages: Vec::new(),
            error: None,
            result: None,
            info: String::new(),
            base_url: String::new(),
        }
    }
}

impl UiState {
    /// Pick the single view to render. Error wins over a stale timeline,
    /// loading wins over a previous result.
    pub fn answer_view(&self) -> AnswerView {
        if self.error.is_some() {
            AnswerView::Error
        } else if self.loading {
            AnswerView::Progress
        } else if self.result.is_some() {
            AnswerView::Success
        } else {
            AnswerView::Idle
        }
    }

    pub fn apply_event(&mut self, ev: QueryEvent) {
        match ev {
            QueryEvent::StagesInitialized => {
                self.stages = initial_stages();
                self.loading = true;
                self.error = None;
                self.result = None;
            }
            QueryEvent::StageUpdate { stage, state, hint } => {
                if let Some(entry) = self.stages.iter_mut().find(|s| s.stage == stage) {
                    entry.state = state;
                    entry.hint = hint;
                }
            }
            QueryEvent::Info(info) => self.info = info.to_message(),
            QueryEvent::QueryCompleted { result } => {
                self.loading = false;
                self.error = None;
                self.info = if result.module.is_empty() {
                    format!("Answered in {} ms", result.latency_ms.max(1))
                } else {
                    format!(
                        "Answered via {} in {} ms",
                        result.module,
                        result.latency_ms.max(1)
                    )
                };
                self.result = Some(*result);
            }
            QueryEvent::QueryFailed { message, .. } => {
                self.loading = false;
                self.result = None;
                self.error = Some(message);
            }
        }
    }

    /// Append a character to the question, never exceeding the cap.
    pub fn push_question_char(&mut self, c: char) {
        if self.question.chars().count() < MAX_QUESTION_CHARS {
            self.question.push(c);
        }
    }

    pub fn pop_question_char(&mut self) {
        self.question.pop();
    }

    /// Overwrite the question with a canned example.
    pub fn use_example(&mut self, index: usize) {
        if let Some(example) = EXAMPLE_QUESTIONS.get(index) {
            self.question = example.chars().take(MAX_QUESTION_CHARS).collect();
        }
    }

    /// Record the image path and validate it inline (existence, MIME, size).
    pub fn set_image_path(&mut self, path: String) {
        self.image_path = path;
        let trimmed = self.image_path.trim();
        if trimmed.is_empty() {
            self.image_note = None;
            self.image_valid = false;
            return;
        }
        match crate::engine::validate::check_image(std::path::Path::new(trimmed)) {
            Ok((name, mime, size)) => {
                self.image_note = Some(format!("{name} ({mime}, {} KiB)", size / 1024));
                self.image_valid = true;
            }
            Err(e) => {
                self.image_note = Some(e.to_string());
                self.image_valid = false;
            }
        }
    }

    /// Back to idle: everything cleared, ready for a fresh submission.
    pub fn reset(&mut self) {
        self.question.clear();
        self.image_path.clear();
        self.image_note = None;
        self.image_valid = false;
        self.loading = false;
        self.stages.clear();
        self.error = None;
        self.result = None;
        self.info = "Reset".to_string();
        self.focus = Focus::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureKind, Stage, StageState};

    fn outcome() -> QueryOutcome {
        QueryOutcome {
            timestamp_utc: "2026-01-01T00:00:00Z".into(),
            request_id: "7".into(),
            base_url: "http://localhost:5001".into(),
            question: "q?".into(),
            answer: "a".into(),
            module: "VQA".into(),
            ocr_text: String::new(),
            vqa_answer: "a".into(),
            vqa_question_used: "q?".into(),
            latency_ms: 10,
        }
    }

    #[test]
    fn question_never_exceeds_cap() {
        let mut state = UiState::default();
        for _ in 0..(MAX_QUESTION_CHARS + 50) {
            state.push_question_char('x');
        }
        assert_eq!(state.question.chars().count(), MAX_QUESTION_CHARS);
    }

    #[test]
    fn views_are_mutually_exclusive() {
        let mut state = UiState::default();
        assert_eq!(state.answer_view(), AnswerView::Idle);

        state.apply_event(QueryEvent::StagesInitialized);
        assert_eq!(state.answer_view(), AnswerView::Progress);

        state.apply_event(QueryEvent::QueryCompleted {
            result: Box::new(outcome()),
        });
        assert_eq!(state.answer_view(), AnswerView::Success);
        assert!(!state.loading);
        assert!(state.error.is_none());

        state.apply_event(QueryEvent::QueryFailed {
            kind: FailureKind::Network,
            message: "no route".into(),
        });
        assert_eq!(state.answer_view(), AnswerView::Error);
        assert!(state.result.is_none());
    }

    #[test]
    fn stage_updates_land_on_the_right_entry() {
        let mut state = UiState::default();
        state.apply_event(QueryEvent::StagesInitialized);
        state.apply_event(QueryEvent::StageUpdate {
            stage: Stage::Upload,
            state: StageState::Done,
            hint: Some("Image uploaded".into()),
        });
        let upload = state
            .stages
            .iter()
            .find(|s| s.stage == Stage::Upload)
            .unwrap();
        assert_eq!(upload.state, StageState::Done);
        assert_eq!(upload.hint.as_deref(), Some("Image uploaded"));
    }

    #[test]
    fn resubmission_clears_previous_result_and_error() {
        let mut state = UiState::default();
        state.apply_event(QueryEvent::QueryCompleted {
            result: Box::new(outcome()),
        });
        state.apply_event(QueryEvent::StagesInitialized);
        assert!(state.result.is_none());
        assert!(state.error.is_none());
        assert!(state.loading);
        assert_eq!(state.stages.len(), 5);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut state = UiState::default();
        state.question = "left over".into();
        state.image_path = "/tmp/x.png".into();
        state.apply_event(QueryEvent::QueryFailed {
            kind: FailureKind::Server,
            message: "boom".into(),
        });
        state.reset();
        assert!(state.question.is_empty());
        assert!(state.image_path.is_empty());
        assert!(state.error.is_none());
        assert!(state.result.is_none());
        assert!(state.stages.is_empty());
        assert_eq!(state.answer_view(), AnswerView::Idle);
    }

    #[test]
    fn example_overwrites_question() {
        let mut state = UiState::default();
        state.question = "typed so far".into();
        state.use_example(1);
        assert_eq!(state.question, EXAMPLE_QUESTIONS[1]);
        // Out-of-range index leaves the field alone.
        state.use_example(99);
        assert_eq!(state.question, EXAMPLE_QUESTIONS[1]);
    }
}
