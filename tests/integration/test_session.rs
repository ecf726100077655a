//! End-to-end tests for lesson sessions.
//!
//! These tests load the fixture lesson from disk and drive it through the
//! public session API with in-memory and scripted collaborators.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exercise_engine::attempts::AttemptReceipt;
use exercise_engine::services::{LogReporter, ServiceResult};
use exercise_engine::{
    BlockPhase, DirectoryLoader, EngineConfig, EngineError, EventBroadcaster, GradingService,
    Interaction, InteractionKind, LessonDefinition, LessonLoader, LessonSession,
    LocalGradingService, MediaReporter, RecordingStatus, ResponseValue, ServiceError, Services,
    SessionEvent, StaticTutor, TutorService,
};

/// Path to the fixtures directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn load_lesson() -> LessonDefinition {
    DirectoryLoader::new(fixtures_dir())
        .load("geo-1")
        .expect("Failed to load fixture lesson")
}

fn config() -> EngineConfig {
    EngineConfig {
        shuffle_seed: Some(42),
        ..EngineConfig::default()
    }
}

fn services(grading: Arc<dyn GradingService>, tutor: Arc<dyn TutorService>) -> Services {
    Services::new(grading, tutor, Arc::new(LogReporter))
}

fn text(value: &str) -> ResponseValue {
    ResponseValue::Text(value.to_string())
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Grading service that reports every attempt as the last one allowed.
struct ExhaustingGrading {
    max: u32,
}

#[async_trait]
impl GradingService for ExhaustingGrading {
    async fn record_attempt(&self, _: &str, _: &str, _: f64) -> ServiceResult<AttemptReceipt> {
        Ok(AttemptReceipt {
            attempts_used: self.max,
        })
    }

    async fn attempts_used(&self, _: &str, _: &str) -> ServiceResult<u32> {
        Ok(0)
    }
}

/// Grading service whose first recording outlives the timeout.
#[derive(Default)]
struct SlowOnceGrading {
    calls: AtomicU32,
}

#[async_trait]
impl GradingService for SlowOnceGrading {
    async fn record_attempt(&self, _: &str, _: &str, _: f64) -> ServiceResult<AttemptReceipt> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        Ok(AttemptReceipt { attempts_used: 1 })
    }

    async fn attempts_used(&self, _: &str, _: &str) -> ServiceResult<u32> {
        Ok(0)
    }
}

/// Tutor that fails its first request and answers the rest.
#[derive(Default)]
struct FlakyTutor {
    calls: AtomicU32,
}

#[async_trait]
impl TutorService for FlakyTutor {
    async fn get_feedback(&self, lesson_id: &str) -> ServiceResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ServiceError::unavailable("502 Bad Gateway"));
        }
        Ok(format!("Nice work on {lesson_id}."))
    }
}

/// Media reporter that always fails.
struct BrokenReporter;

#[async_trait]
impl MediaReporter for BrokenReporter {
    async fn record_interaction(&self, _: &str, _: &str, _: Interaction) -> ServiceResult<()> {
        Err(ServiceError::unavailable("analytics offline"))
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Tests that the fixture lesson loads and has no authoring problems.
#[test]
fn test_fixture_lesson_loads() {
    let lesson = load_lesson();

    assert_eq!(lesson.id, "geo-1");
    assert_eq!(lesson.max_attempts, Some(2));
    assert_eq!(lesson.blocks.len(), 6);
    assert_eq!(lesson.block("sa").and_then(|b| b.allow_retry), Some(false));
    assert!(
        lesson.diagnostics().is_empty(),
        "Unexpected diagnostics: {:?}",
        lesson.diagnostics()
    );
}

/// Tests that a missing lesson reports the path it looked for.
#[test]
fn test_missing_lesson() {
    let err = DirectoryLoader::new(fixtures_dir())
        .load("geo-404")
        .unwrap_err();
    assert!(
        matches!(&err, EngineError::LessonNotFound { path } if path.ends_with("geo-404.json")),
        "Expected LessonNotFound, got: {err:?}"
    );
}

// ============================================================================
// Lesson flows
// ============================================================================

/// Tests a learner working through every block of the lesson.
#[tokio::test]
async fn test_full_lesson_walkthrough() {
    let events = EventBroadcaster::new(128);
    let mut receiver = events.subscribe();
    let mut session = LessonSession::open_with_events(
        load_lesson(),
        config(),
        Services::local(Some(2)),
        events,
    )
    .await
    .expect("Failed to open session");

    session
        .report_interaction("intro", Interaction::now(InteractionKind::View))
        .unwrap();
    session
        .report_interaction(
            "clip",
            Interaction::now(InteractionKind::Play).at_position(0.0),
        )
        .unwrap();

    session.interact("quiz", |b| b.choose_option(0, 1)).unwrap();
    session.interact("quiz", |b| b.choose_option(1, 0)).unwrap();
    session.interact("quiz", |b| b.choose_option(1, 2)).unwrap();
    let quiz = session.submit("quiz").await.unwrap();
    assert_eq!(quiz.grade.percent(), 100);

    session.input("fb", 0, text("capitol")).unwrap();
    session.input("fb", 1, text("Paris")).unwrap();
    let fb = session.submit("fb").await.unwrap();
    assert_eq!(fb.grade.percent(), 50);
    assert_eq!(fb.phase, BlockPhase::Retryable);

    session.interact("order", |b| b.arrange(&[0, 1, 2, 3])).unwrap();
    let order = session.submit("order").await.unwrap();
    assert_eq!(order.grade.percent(), 100);

    assert!(!session.is_complete());
    session.input("sa", 0, text(" madrid ")).unwrap();
    let sa = session.submit("sa").await.unwrap();
    assert_eq!(sa.phase, BlockPhase::Submitted);
    assert!(sa.is_recorded());

    assert!(session.is_complete());
    assert!((session.aggregate_score() - 0.875).abs() < f64::EPSILON);

    let mut completions = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let SessionEvent::LessonComplete(payload) = event {
            completions.push(payload.score);
        }
    }
    assert_eq!(completions.len(), 1);
    assert!((completions[0] - 0.875).abs() < f64::EPSILON);
}

/// Tests that blocks with no attempts left mount locked.
#[tokio::test]
async fn test_exhausted_block_mounts_locked() {
    let grading = Arc::new(LocalGradingService::new(Some(2)));
    grading.set_attempts("geo-1", "fb", 2).await;

    let mut session = LessonSession::open(
        load_lesson(),
        config(),
        services(grading, Arc::new(StaticTutor::unavailable())),
    )
    .await
    .unwrap();

    let fb = session.block("fb").unwrap();
    assert_eq!(fb.phase(), BlockPhase::Locked);
    assert_eq!(fb.attempts().remaining(), Some(0));
    assert_eq!(session.block("quiz").unwrap().phase(), BlockPhase::Unlocked);

    let err = session.input("fb", 0, text("capital")).unwrap_err();
    assert!(
        matches!(&err, EngineError::InvalidStateTransition { .. }),
        "Expected InvalidStateTransition, got: {err:?}"
    );
}

/// Tests that the grading service's count overrides the local one.
#[tokio::test]
async fn test_service_count_wins() {
    let mut session = LessonSession::open(
        load_lesson(),
        config(),
        services(
            Arc::new(ExhaustingGrading { max: 2 }),
            Arc::new(StaticTutor::unavailable()),
        ),
    )
    .await
    .unwrap();

    session.input("fb", 1, text("Paris")).unwrap();
    let outcome = session.submit("fb").await.unwrap();

    assert_eq!(outcome.attempts.attempts_used, 2);
    assert_eq!(outcome.phase, BlockPhase::Locked);
    assert!(session.retry("fb").is_err());

    // An external reset brings the block back.
    session.external_reset("fb", 0).unwrap();
    assert_eq!(session.block("fb").unwrap().phase(), BlockPhase::Unlocked);
}

/// Tests that a recording that outlives the timeout stays pending and can be
/// re-sent.
#[tokio::test]
async fn test_slow_grading_leaves_recording_pending() {
    let config = EngineConfig {
        recording_timeout_secs: 1,
        ..config()
    };
    let grading = Arc::new(SlowOnceGrading::default());
    let mut session = LessonSession::open(
        load_lesson(),
        config,
        services(grading.clone(), Arc::new(StaticTutor::unavailable())),
    )
    .await
    .unwrap();

    session.input("fb", 0, text("capital")).unwrap();
    session.input("fb", 1, text("Paris")).unwrap();
    let outcome = session.submit("fb").await.unwrap();

    assert_eq!(outcome.recording, RecordingStatus::Pending);
    assert_eq!(outcome.phase, BlockPhase::Submitted);
    assert_eq!(outcome.grade.percent(), 100);
    assert_eq!(outcome.attempts.attempts_used, 0);

    let again = session.retry_recording("fb").await.unwrap();
    assert!(again.is_recorded());
    assert_eq!(again.phase, BlockPhase::Retryable);
    assert_eq!(grading.calls.load(Ordering::SeqCst), 2);
}

/// Tests that feedback falls back while the tutor is down and recovers later.
#[tokio::test]
async fn test_tutor_fallback_then_recovery() {
    let mut session = LessonSession::open(
        load_lesson(),
        config(),
        services(
            Arc::new(LocalGradingService::new(Some(2))),
            Arc::new(FlakyTutor::default()),
        ),
    )
    .await
    .unwrap();

    let first = session.feedback().await;
    assert!(first.degraded);
    assert_eq!(first.text, config().feedback_fallback);

    let second = session.feedback().await;
    assert!(!second.degraded);
    assert_eq!(second.text, "Nice work on geo-1.");

    // Cached; the tutor is not asked again.
    assert_eq!(session.feedback().await, second);
}

/// Tests that a failing media reporter never blocks the learner.
#[tokio::test]
async fn test_media_reporter_failure_is_ignored() {
    let mut session = LessonSession::open(
        load_lesson(),
        config(),
        Services::new(
            Arc::new(LocalGradingService::new(None)),
            Arc::new(StaticTutor::unavailable()),
            Arc::new(BrokenReporter),
        ),
    )
    .await
    .unwrap();

    session
        .report_interaction("clip", Interaction::now(InteractionKind::Complete))
        .unwrap();
    tokio::task::yield_now().await;

    assert!(session.block("clip").unwrap().is_settled());

    // Pausing is not a view.
    session
        .report_interaction("intro", Interaction::now(InteractionKind::Pause))
        .unwrap();
    assert!(!session.block("intro").unwrap().is_settled());
}
