pub mod config;
pub mod config_watch;
pub mod error;
pub mod handlers;
pub mod job;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod stream;

pub use config::{AppConfig, GeneratorConfig, OutputConfig, RelayConfig, ServerConfig};
pub use error::ApiError;
pub use job::{JobHandle, JobInProgress, JobRunner, JobSlot, ProcessExitError, RunnerSettings, SpawnError};
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, SynthgenServer, build_app};
