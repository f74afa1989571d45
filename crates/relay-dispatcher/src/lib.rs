pub mod config;
pub mod monitor;
pub mod server;
pub mod worker_pool;

pub use config::DispatcherConfig;
pub use server::DispatcherServer;
