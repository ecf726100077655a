//! Integration tests for report generation from a finished lesson session.

use std::path::PathBuf;

use exercise_engine::{
    BlockKind, BlockPhase, DirectoryLoader, EngineConfig, Interaction, InteractionKind,
    LessonLoader, LessonSession, ResponseValue, Services,
};
use exercise_report::json::JsonGenerator;
use exercise_report::{LessonReport, MarkdownGenerator};

/// Opens the fixture lesson and answers part of it.
async fn graded_session() -> LessonSession {
    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    let lesson = DirectoryLoader::new(fixtures)
        .load("geo-1")
        .expect("Failed to load fixture lesson");
    let config = EngineConfig {
        shuffle_seed: Some(3),
        ..EngineConfig::default()
    };

    let mut session = LessonSession::open(lesson, config, Services::local(Some(2)))
        .await
        .expect("Failed to open session");

    session
        .report_interaction("intro", Interaction::now(InteractionKind::View))
        .unwrap();
    session
        .input("fb", 0, ResponseValue::Text("capitol".to_string()))
        .unwrap();
    session
        .input("fb", 1, ResponseValue::Text("Paris".to_string()))
        .unwrap();
    session.submit("fb").await.unwrap();
    session
        .input("sa", 0, ResponseValue::Text("Madrid".to_string()))
        .unwrap();
    session.submit("sa").await.unwrap();

    session
}

/// Tests the report summary for a partially finished lesson.
#[tokio::test]
async fn test_report_from_session() {
    let mut session = graded_session().await;
    let feedback = session.feedback().await;
    assert!(feedback.degraded);

    let report = LessonReport::from_snapshot(&session.snapshot()).unwrap();
    let summary = report.summary;

    // fb scored 0.5 and sa scored 1.0.
    assert_eq!(summary.percent, 75);
    assert!(summary.passed);
    assert_eq!(summary.stars, 4);
    assert!(!summary.complete);
    assert_eq!(summary.scored_blocks, 4);
    assert_eq!(summary.graded_blocks, 2);
    assert_eq!(summary.attempts_used, 2);
    assert_eq!(summary.unrecorded, 0);

    // The fallback is not cached, so the snapshot carries no feedback.
    assert!(report.feedback.is_none());

    let fb = report
        .blocks
        .iter()
        .find(|b| b.block_id == "fb")
        .expect("fb block in report");
    assert_eq!(fb.kind, BlockKind::FillInTheBlanks);
    assert_eq!(fb.phase, BlockPhase::Retryable);
    assert_eq!(fb.percent, Some(50));
    assert_eq!((fb.correct, fb.units), (1, 2));
}

/// Tests that the Markdown report lists every block.
#[tokio::test]
async fn test_markdown_report() {
    let session = graded_session().await;
    let report = LessonReport::from_snapshot(&session.snapshot()).unwrap();
    let markdown = MarkdownGenerator::new(&report).generate();

    assert!(markdown.starts_with("# Lesson Report: European capitals"));
    assert!(markdown.contains("| Score | 75% |"));
    assert!(markdown.contains("| Graded Blocks | 2 of 4 |"));
    assert!(markdown.contains(
        "| Capitals (fb) | fill-in-the-blanks | retryable | 50% | 1/2 | 1 of 2 | recorded |"
    ));
    assert!(markdown.contains("| sa | short-answer | submitted | 100% | 1/1 | 1 of 2 | recorded |"));
    assert!(markdown.contains("| intro | description | viewed | - | - | - | - |"));
    assert!(markdown.contains("| clip | media | not viewed | - | - | - | - |"));
    assert!(markdown.contains("| Warm-up (quiz) | quiz | unlocked | - | - | 0 of 2 | idle |"));
    assert!(markdown.contains("*No feedback requested.*"));
}

/// Tests that the JSON report round-trips through a file.
#[tokio::test]
async fn test_json_report_file() {
    let session = graded_session().await;
    let report = LessonReport::from_snapshot(&session.snapshot()).unwrap();

    let dir = std::env::temp_dir().join(format!("exercise-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("report.json");
    JsonGenerator::new(&report)
        .write_to_file(&path, true)
        .expect("Failed to write report");

    let contents = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_dir_all(&dir);

    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(parsed["lesson_id"], "geo-1");
    assert_eq!(parsed["summary"]["percent"], 75);
    assert_eq!(parsed["blocks"].as_array().map(Vec::len), Some(6));
    assert_eq!(parsed["blocks"][3]["kind"], "fill-in-the-blanks");
}
