//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`LessonReport`] as a document with a
//! summary table, a per-block table, a note about unrecorded attempts and the
//! tutor feedback.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use exercise_engine::AttemptState;

use crate::{BlockResult, LessonReport};

/// Generates Markdown reports from lesson outcomes.
pub struct MarkdownGenerator<'a> {
    report: &'a LessonReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a LessonReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_blocks(&mut output);
        self.write_unrecorded(&mut output);
        self.write_feedback(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Lesson Report: {}\n",
            escape_markdown(self.report.display_title())
        );
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;
        let result = if summary.passed { "Passed" } else { "Not passed" };

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Score | {}% |", summary.percent);
        let _ = writeln!(
            output,
            "| Result | {result} (pass mark {}%) |",
            summary.pass_mark
        );
        let _ = writeln!(output, "| Stars | {} |", format_stars(summary.stars));
        let _ = writeln!(
            output,
            "| Complete | {} |",
            if summary.complete { "Yes" } else { "No" }
        );
        let _ = writeln!(
            output,
            "| Graded Blocks | {} of {} |",
            summary.graded_blocks, summary.scored_blocks
        );
        let _ = writeln!(output, "| Attempts Used | {} |", summary.attempts_used);
        let _ = writeln!(output);
    }

    fn write_blocks(&self, output: &mut String) {
        let _ = writeln!(output, "## Blocks\n");

        if self.report.blocks.is_empty() {
            let _ = writeln!(output, "*This lesson has no blocks.*\n");
            return;
        }

        let _ = writeln!(
            output,
            "| Block | Kind | Phase | Score | Correct | Attempts | Recording |"
        );
        let _ = writeln!(
            output,
            "|-------|------|-------|-------|---------|----------|-----------|"
        );
        for block in &self.report.blocks {
            write_block_row(output, block);
        }
        let _ = writeln!(output);
    }

    fn write_unrecorded(&self, output: &mut String) {
        let count = self.report.summary.unrecorded;
        if count == 0 {
            return;
        }
        let noun = if count == 1 { "attempt was" } else { "attempts were" };
        let _ = writeln!(
            output,
            "> **Warning**: {count} {noun} not recorded by the grading service. \
             Grades are shown but attempt counts may be behind.\n"
        );
    }

    fn write_feedback(&self, output: &mut String) {
        let _ = writeln!(output, "## Feedback\n");
        match &self.report.feedback {
            Some(feedback) => {
                let _ = writeln!(output, "{}\n", escape_markdown(&feedback.text));
                if feedback.degraded {
                    let _ = writeln!(
                        output,
                        "*Tutor feedback was unavailable; showing the standard message.*\n"
                    );
                }
            }
            None => {
                let _ = writeln!(output, "*No feedback requested.*\n");
            }
        }
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by Exercise Engine at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_block_row(output: &mut String, block: &BlockResult) {
    let label = match &block.title {
        Some(title) => format!(
            "{} ({})",
            escape_markdown(title),
            escape_markdown(&block.block_id)
        ),
        None => escape_markdown(&block.block_id),
    };

    if !block.kind.is_scored() {
        let seen = if block.viewed { "viewed" } else { "not viewed" };
        let _ = writeln!(
            output,
            "| {label} | {} | {seen} | - | - | - | - |",
            block.kind
        );
        return;
    }

    let score = block
        .percent
        .map_or_else(|| "-".to_string(), |p| format!("{p}%"));
    let correct = if block.percent.is_some() {
        format!("{}/{}", block.correct, block.units)
    } else {
        "-".to_string()
    };
    let attempts = AttemptState::new(block.attempts_used, block.max_attempts);
    let _ = writeln!(
        output,
        "| {label} | {} | {} | {score} | {correct} | {attempts} | {} |",
        block.kind, block.phase, block.recording
    );
}

/// Five-star rating with filled and empty stars.
fn format_stars(stars: u8) -> String {
    let filled = usize::from(stars.min(5));
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes characters that carry meaning in Markdown tables and text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
