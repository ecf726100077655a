//! Exercise Engine CLI
//!
//! Checks lesson files for authoring problems and grades a learner's
//! responses against a lesson, writing Markdown and JSON reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use exercise_engine::audio::keyword_coverage;
use exercise_engine::services::LogReporter;
use exercise_engine::{
    parse, BlockPayload, EngineConfig, Interaction, InteractionKind, LessonDefinition,
    LessonSession, LocalGradingService, ResponseValue, Services, Severity, StaticTutor,
    SubmitOutcome,
};
use exercise_report::json::JsonGenerator;
use exercise_report::{LessonReport, MarkdownGenerator};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// File name of the Markdown report.
const MARKDOWN_REPORT: &str = "exercise-report.md";

/// File name of the JSON report.
const JSON_REPORT: &str = "exercise-report.json";

/// Exercise Engine - Interactive Lesson Tool
///
/// Validates authored lessons and grades learner responses the same way the
/// interactive engine does.
#[derive(Parser, Debug)]
#[command(name = "exercise")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: exercise.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report authoring problems and checkable units for a lesson
    Check {
        /// Path to the lesson JSON file
        #[arg(value_name = "LESSON")]
        lesson: PathBuf,
    },

    /// Grade a responses file against a lesson and write reports
    Grade {
        /// Path to the lesson JSON file
        #[arg(value_name = "LESSON")]
        lesson: PathBuf,

        /// Path to the learner's responses JSON file
        #[arg(short, long, value_name = "FILE")]
        responses: PathBuf,

        /// Output directory for reports
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,

        /// Tutor feedback text to show instead of the fallback message
        #[arg(long, value_name = "TEXT")]
        feedback: Option<String>,
    },
}

/// A learner's answers, keyed by block id.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseFile {
    /// Unit index to value, per block.
    #[serde(default)]
    responses: BTreeMap<String, BTreeMap<usize, ResponseValue>>,
    /// Audio transcripts per block.
    #[serde(default)]
    transcripts: BTreeMap<String, String>,
    /// Ungraded blocks the learner viewed.
    #[serde(default)]
    viewed: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match args.command {
        Command::Check { ref lesson } => run_check(lesson),
        Command::Grade {
            ref lesson,
            ref responses,
            ref output_dir,
            ref feedback,
        } => {
            run_grade(
                args.config.as_deref(),
                lesson,
                responses,
                output_dir,
                feedback.clone(),
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// check
// ============================================================================

/// Prints the lesson's blocks and diagnostics. Fails on error-level problems.
fn run_check(path: &Path) -> anyhow::Result<()> {
    let lesson = LessonDefinition::load(path)?;
    print_lesson_info(&lesson);

    let diagnostics = lesson.diagnostics();
    println!();
    if diagnostics.is_empty() {
        println!("No authoring problems found.");
        return Ok(());
    }

    println!("Diagnostics:");
    for diagnostic in &diagnostics {
        let label = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        println!("  [{label}] {}: {}", diagnostic.block_id, diagnostic.message);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!(
            "{errors} authoring error(s) in '{}'\n\nSuggestion: Fix the blocks listed above so every answer can be scored",
            path.display()
        );
    }
    Ok(())
}

/// Prints lesson metadata and the unit count of each block.
fn print_lesson_info(lesson: &LessonDefinition) {
    println!("Lesson loaded:");
    println!("  Id: {}", lesson.id);
    if !lesson.title.is_empty() {
        println!("  Title: {}", lesson.title);
    }
    match lesson.max_attempts {
        Some(max) if max > 0 => println!("  Max attempts: {max}"),
        _ => println!("  Max attempts: unlimited"),
    }
    println!(
        "  Retry allowed: {}",
        if lesson.allow_retry { "yes" } else { "no" }
    );
    println!("  Blocks: {}", lesson.blocks.len());

    for block in &lesson.blocks {
        let units = parse(&block.payload).len();
        if block.kind().is_scored() {
            println!("    {} ({}): {units} unit(s)", block.id, block.kind());
        } else {
            println!("    {} ({}): ungraded", block.id, block.kind());
        }
    }
}

// ============================================================================
// grade
// ============================================================================

/// Runs a lesson session over recorded responses and writes both reports.
async fn run_grade(
    config_path: Option<&str>,
    lesson_path: &Path,
    responses_path: &Path,
    output_dir: &Path,
    feedback: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let lesson = LessonDefinition::load(lesson_path)?;
    let answers = load_responses(responses_path)?;

    let tutor = feedback.map_or_else(StaticTutor::unavailable, StaticTutor::new);
    let services = Services::new(
        Arc::new(LocalGradingService::new(lesson.max_attempts)),
        Arc::new(tutor),
        Arc::new(LogReporter),
    );

    tracing::info!(lesson_id = %lesson.id, "Grading responses");
    let mut session = LessonSession::open(lesson, config, services).await?;

    println!("Grading {}:", session.lesson_id());
    grade_blocks(&mut session, &answers).await?;

    let feedback = session.feedback().await;
    let report = LessonReport::from_snapshot(&session.snapshot())?;

    println!();
    println!("Score: {}%", report.summary.percent);
    println!(
        "Result: {}",
        if report.summary.passed {
            "passed"
        } else {
            "not passed"
        }
    );
    println!(
        "Complete: {}",
        if report.summary.complete { "yes" } else { "no" }
    );
    println!("Feedback: {}", feedback.text);

    write_reports(&report, output_dir)
}

/// Replays the recorded answers block by block.
///
/// A block whose answers cannot be entered or submitted is reported and
/// skipped; the remaining blocks are still graded.
async fn grade_blocks(session: &mut LessonSession, answers: &ResponseFile) -> anyhow::Result<()> {
    let block_ids: Vec<String> = session
        .blocks()
        .iter()
        .map(|b| b.id().to_string())
        .collect();

    for block_id in &block_ids {
        if answers.viewed.contains(block_id) {
            session.report_interaction(block_id, Interaction::now(InteractionKind::View))?;
        }

        if let Some(transcript) = answers.transcripts.get(block_id) {
            grade_transcript(session, block_id, transcript)?;
        }

        let Some(values) = answers.responses.get(block_id) else {
            continue;
        };
        match replay_block(session, block_id, values).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => {
                tracing::warn!(block_id = %block_id, error = %e, "Block not graded");
                let reason = e.to_string();
                println!(
                    "  {block_id}: not graded ({})",
                    reason.lines().next().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

/// Enters one block's recorded values and submits them.
async fn replay_block(
    session: &mut LessonSession,
    block_id: &str,
    values: &BTreeMap<usize, ResponseValue>,
) -> exercise_engine::Result<SubmitOutcome> {
    for (index, value) in values {
        session.input(block_id, *index, value.clone())?;
    }
    session.submit(block_id).await
}

/// Shows keyword coverage for an audio transcript and marks the block viewed.
fn grade_transcript(
    session: &mut LessonSession,
    block_id: &str,
    transcript: &str,
) -> anyhow::Result<()> {
    let coverage = match &session.block(block_id)?.block().payload {
        BlockPayload::AudioResponse(payload) => keyword_coverage(payload, transcript),
        _ => {
            tracing::warn!(block_id, "Transcript given for a non-audio block");
            return Ok(());
        }
    };

    match coverage {
        Some(coverage) => {
            println!(
                "  {block_id}: keyword coverage {}% (missing: {})",
                coverage.percent(),
                if coverage.missing.is_empty() {
                    "none".to_string()
                } else {
                    coverage.missing.join(", ")
                }
            );
            session.interact(block_id, |b| {
                b.mark_viewed();
                Ok(())
            })?;
        }
        None => println!("  {block_id}: empty transcript"),
    }
    Ok(())
}

/// Prints one submit outcome.
fn print_outcome(outcome: &SubmitOutcome) {
    let recorded = if outcome.is_recorded() {
        "recorded".to_string()
    } else {
        format!("not recorded ({})", outcome.recording.as_str())
    };
    println!(
        "  {}: {}% ({}/{} correct), {}, attempts {}, {recorded}",
        outcome.block_id,
        outcome.grade.percent(),
        outcome.grade.correct_count(),
        outcome.grade.per_unit.len(),
        outcome.phase,
        outcome.attempts
    );
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the given path or the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<EngineConfig> {
    match config_path {
        Some(path) => {
            let path = Path::new(path);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            EngineConfig::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => EngineConfig::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Reads a responses file.
fn load_responses(path: &Path) -> anyhow::Result<ResponseFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read responses: {e}\n\nPath: {}",
            path.display()
        )
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        anyhow::anyhow!(
            "Invalid responses file '{}': {e}\n\nSuggestion: Map block ids to {{\"<unit index>\": {{\"type\": \"text\", \"value\": \"...\"}}}}",
            path.display()
        )
    })
}

/// Writes the Markdown and JSON reports to the output directory.
fn write_reports(report: &LessonReport, output_dir: &Path) -> anyhow::Result<()> {
    println!();
    println!("Generating reports...");

    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join(MARKDOWN_REPORT);
    std::fs::write(&md_path, MarkdownGenerator::new(report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join(JSON_REPORT);
    JsonGenerator::new(report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use exercise_engine::{BlockPhase, EngineError};

    use super::*;

    const LESSON: &str = r#"{
        "id": "mixed",
        "blocks": [
            {
                "id": "broken",
                "kind": "quiz",
                "payload": { "questions": [{ "question": "Pick one", "options": [] }] }
            },
            {
                "id": "blank",
                "kind": "short-answer",
                "payload": { "prompt": "Capital of Spain?", "correctAnswers": ["Madrid"] }
            },
            {
                "id": "sa",
                "kind": "short-answer",
                "payload": { "prompt": "Capital of France?", "correctAnswers": ["Paris"] }
            }
        ]
    }"#;

    async fn open_session() -> LessonSession {
        let lesson = LessonDefinition::from_json("mixed", LESSON).unwrap();
        LessonSession::open(lesson, EngineConfig::default(), Services::local(None))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unsubmittable_blocks_are_skipped() {
        let mut session = open_session().await;
        let mut answers = ResponseFile::default();
        answers.responses.insert("broken".to_string(), BTreeMap::new());
        answers.responses.insert("blank".to_string(), BTreeMap::new());
        answers.responses.insert(
            "sa".to_string(),
            BTreeMap::from([(0, ResponseValue::Text("Paris".to_string()))]),
        );

        grade_blocks(&mut session, &answers).await.unwrap();

        let sa = session.block("sa").unwrap();
        assert_eq!(sa.phase(), BlockPhase::Retryable);
        assert!((sa.last_grade().unwrap().score - 1.0).abs() < f64::EPSILON);

        assert!(session.block("broken").unwrap().last_grade().is_none());
        assert_eq!(session.block("blank").unwrap().phase(), BlockPhase::Unlocked);
    }

    #[tokio::test]
    async fn test_replay_block_reports_submit_errors() {
        let mut session = open_session().await;

        let err = replay_block(&mut session, "broken", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, EngineError::NothingToSubmit { .. }),
            "Expected NothingToSubmit, got: {err:?}"
        );

        let err = replay_block(&mut session, "blank", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, EngineError::InvalidStateTransition { .. }),
            "Expected InvalidStateTransition, got: {err:?}"
        );
    }
}
