//! Task graph and dependency-ordered executor.

pub mod dag;
pub mod executor;
pub mod task;

pub use dag::TaskGraph;
pub use executor::{ExecutorConfig, FailurePolicy, TaskEvent, TaskGraphExecutor};
pub use task::{NOT_EXECUTED, Task, TaskOutcome, TaskStatus};
