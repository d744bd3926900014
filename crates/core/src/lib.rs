pub mod cache;
pub mod config;
pub mod events;
pub mod fetch;
pub mod metrics;
pub mod scheduler;
pub mod testing;
pub mod transcoder;
pub mod tunnel;

pub use cache::{CacheConfig, CacheError, CacheStats, ResultCache};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{create_event_system, AlertKind, EventHandle, EventWriter, PipelineEvent};
pub use fetch::{FetchConfig, FetchError, Fetcher, HttpFetcher};
pub use scheduler::{
    JobErrorKind, JobId, JobRequest, JobScheduler, JobSnapshot, JobStatus, SubmitError,
};
pub use transcoder::{FfmpegTranscoder, OutputFormat, TranscodeError, Transcoder};
pub use tunnel::{CommandHost, TunnelConfigStore, TunnelError, TunnelManager};
