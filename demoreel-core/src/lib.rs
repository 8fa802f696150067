pub mod artifact;
pub mod config;
pub mod error;
pub mod fetch;
pub mod game;
pub mod job;
pub mod orchestrator;
pub mod publish;
pub mod queue;
pub mod recorder;
pub mod results;
pub mod status;
pub mod subject;
pub mod tool;

pub use config::{load_demoreel_config, DemoreelConfig};
pub use error::{ConfigError, Result};
pub use fetch::{
    classify_target, extract_share_code, is_demo_url, DemoFetcher, DemoSource, FetchError,
    ShareCodeResolver, Target,
};
pub use job::{Job, JobPhase, JobResult, JobStatus, PublishMode, TaskStatus};
pub use orchestrator::{
    Adapters, Disposition, JobOutcome, Orchestrator, OrchestratorSettings, SetupError,
    StageFailure,
};
pub use queue::JobQueue;
pub use results::{ResultsError, ResultsStore, ResultsStoreBuilder};
pub use status::StatusBoard;
