//! Background task machinery: records, store, executor, router and sweeper.

pub mod error;
pub mod events;
pub mod executor;
pub mod record;
pub mod router;
pub mod store;
pub mod sweeper;

pub use error::TaskError;
pub use events::TaskEvent;
pub use executor::TaskExecutor;
pub use record::{NewTask, TaskFailure, TaskFilter, TaskRecord, TaskStatus};
pub use router::{
    AutoRoutePredicate, Invocation, RouteOutcome, RouterConfig, TaskDirective, TaskRouter,
    WrapperPredicate,
};
pub use store::{TaskPage, TaskStore};
pub use sweeper::spawn_sweeper;
