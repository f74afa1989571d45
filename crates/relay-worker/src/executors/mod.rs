pub mod prime;

use prime::PrimeExecutor;
use relay_core::executor::TaskExecutorRegistry;
use std::sync::Arc;

/// The executors this worker knows how to run in-process, keyed by
/// `task_type`. `relay-executor-proc` builds the same registry so isolated
/// execution runs the identical code path, just in a child process.
pub fn default_registry(primes_max_limit: i64, checkpoint_interval: i64) -> TaskExecutorRegistry {
    let mut registry = TaskExecutorRegistry::new();
    registry.register(
        "compute",
        Arc::new(PrimeExecutor::new(primes_max_limit, checkpoint_interval)),
    );
    registry
}
