// skill-export/crates/skill-export/src/lib.rs

pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod projection;
pub mod resolver;
pub mod sink;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use context::SessionContext;
pub use error::{EntryError, ExportError, Result};
pub use model::{
    AggregatedRecord, DiveInPhase, ExperienceEntity, PhaseMarker, PhaseSet, ResolvedExperience,
    SessionId, SkillEntity, UserContext,
};
pub use pipeline::ExportPipeline;
pub use projection::{project, ExportSummary, FlatRow, Projection, ProjectionMode, UserRecord};
pub use resolver::{ExperienceResolver, ResolvedSessions, ResolverConfig};
pub use sink::write_projection;
pub use store::{ExportDatabase, InMemoryStore};
