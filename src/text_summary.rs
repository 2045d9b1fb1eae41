//! Text summary builder for CLI output.
//!
//! Formats a completed query outcome into human-readable lines for text mode.

use crate::model::QueryOutcome;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a successful query outcome.
pub(crate) fn build_text_summary(outcome: &QueryOutcome) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Answer: {}", outcome.answer));
    if !outcome.module.is_empty() {
        lines.push(format!("Module: {}", outcome.module));
    }
    lines.push(format!("Latency: {} ms", outcome.latency_ms.max(1)));

    if !outcome.ocr_text.is_empty() {
        lines.push(format!("OCR text: {}", outcome.ocr_text));
    }
    if !outcome.vqa_answer.is_empty() {
        lines.push(format!("VQA answer: {}", outcome.vqa_answer));
    }
    // Only worth showing when the service rewrote the prompt.
    if outcome.vqa_question_used != outcome.question {
        lines.push(format!("Prompt used: {}", outcome.vqa_question_used));
    }

    lines.push(format!(
        "Request: {} at {}",
        outcome.request_id, outcome.timestamp_utc
    ));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> QueryOutcome {
        QueryOutcome {
            timestamp_utc: "2026-01-01T00:00:00Z".into(),
            request_id: "42".into(),
            base_url: "http://localhost:5001".into(),
            question: "What does the sign say?".into(),
            answer: "STOP".into(),
            module: "OCR".into(),
            ocr_text: "STOP".into(),
            vqa_answer: "A stop sign".into(),
            vqa_question_used: "What does the sign say?".into(),
            latency_ms: 312,
        }
    }

    #[test]
    fn summary_lists_answer_module_and_latency() {
        let summary = build_text_summary(&outcome());
        assert_eq!(summary.lines[0], "Answer: STOP");
        assert!(summary.lines.iter().any(|l| l == "Module: OCR"));
        assert!(summary.lines.iter().any(|l| l == "Latency: 312 ms"));
    }

    #[test]
    fn empty_details_are_omitted() {
        let mut o = outcome();
        o.ocr_text.clear();
        o.vqa_answer.clear();
        o.module.clear();
        let summary = build_text_summary(&o);
        assert!(!summary.lines.iter().any(|l| l.starts_with("OCR text:")));
        assert!(!summary.lines.iter().any(|l| l.starts_with("VQA answer:")));
        assert!(!summary.lines.iter().any(|l| l.starts_with("Module:")));
    }

    #[test]
    fn rewritten_prompt_is_surfaced() {
        let mut o = outcome();
        assert!(!build_text_summary(&o)
            .lines
            .iter()
            .any(|l| l.starts_with("Prompt used:")));
        o.vqa_question_used = format!("{}\n\nDetected text in image: STOP", o.question);
        assert!(build_text_summary(&o)
            .lines
            .iter()
            .any(|l| l.starts_with("Prompt used:")));
    }

    #[test]
    fn latency_is_clamped_to_at_least_one_ms() {
        let mut o = outcome();
        o.latency_ms = 0;
        assert!(build_text_summary(&o)
            .lines
            .iter()
            .any(|l| l == "Latency: 1 ms"));
    }
}
