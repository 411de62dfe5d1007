//! Request coordinator
//!
//! The Coordinator owns every piece of shared state for a request flow:
//! - **Locks:** one tri-state flag per identity, set while a locked request is out
//! - **Handles:** the most recent in-flight request per identity
//! - **Timers:** at most one periodic series per identity
//!
//! Callers interact through a cloneable [`CoordinatorHandle`].

mod config;
mod core;
mod error;
mod failure;
mod handle;
mod handlers;
mod locks;
mod messages;

pub use config::CoordinatorConfig;
pub use core::{Coordinator, CoordinatorBuilder};
pub use error::CoordinatorError;
pub use failure::{DefaultFailureHandler, ErrorHook, FailureHandler};
pub use handle::{CoordinatorHandle, DispatchReceipt};
pub use handlers::{HandlerRegistry, Handlers, SendHook, SuccessHook};
pub use locks::{LockState, LockTable};
pub use messages::{CoordinatorMetrics, CoordinatorSnapshot, DispatchMode, Settlement};
