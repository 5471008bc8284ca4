pub mod browser;
pub mod cancel;
pub mod config;
pub mod download;
pub mod feed;
pub mod fs;
pub mod heartbeat;
pub mod metrics;
pub mod orchestrator;
pub mod polling;
pub mod scheduler;
pub mod session;
pub mod testing;
pub mod watchdog;

pub use cancel::CancelFlag;
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use download::{DownloadError, DownloadLoop, DownloadState, LoopOutcome};
pub use orchestrator::{OrchestratorError, RunEvent, RunManager, RunRecord, RunState};
pub use scheduler::{
    RunReport, RunStatus, SchedulerError, Step, StepResult, StepStatus, WorkflowRunner,
};
pub use session::{BrowserSessionFactory, SessionPipeline};
pub use watchdog::WatchdogRegistry;
