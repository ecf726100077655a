//! Interactive Exercise Engine
//!
//! Parses authored lesson blocks into checkable units, scores learner
//! responses, gates attempts against the grading service's count, and drives
//! each block through its answering phases.

pub mod attempts;
pub mod audio;
pub mod block;
pub mod config;
pub mod error;
pub mod events;
pub mod lesson;
pub mod memory;
pub mod parser;
pub mod response;
pub mod scoring;
pub mod services;
pub mod session;

pub use attempts::{AttemptPolicy, AttemptReceipt, AttemptState, BlockPhase, RecordingStatus};
pub use block::{
    BlockDefinition, BlockKind, BlockPayload, FillBlanksPayload, HotspotRegion, ScoringRule,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::{EventBroadcaster, SessionEvent};
pub use lesson::{
    DirectoryLoader, Feedback, LessonDefinition, LessonLoader, LessonSession, LessonSnapshot,
    SubmitOutcome,
};
pub use parser::{diagnose, parse, present, CheckableUnit, Diagnostic, Expected, Layout, Severity};
pub use response::{ResponseState, ResponseValue};
pub use scoring::{score, GradeResult, UnitOutcome};
pub use services::{
    GradingService, Interaction, InteractionKind, LocalGradingService, MediaReporter,
    ServiceError, Services, StaticTutor, TutorService,
};
pub use session::{BlockSession, BlockSnapshot, HotspotHit};
