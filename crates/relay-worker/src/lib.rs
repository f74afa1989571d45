pub mod config;
pub mod dispatcher_client;
pub mod executors;
pub mod outbound_cache;
pub mod runner;
pub mod subprocess;

#[cfg(all(feature = "process-checkpoint", target_os = "linux"))]
pub mod checkpoint_process;

pub use config::WorkerConfig;
