//! reqflow - identity-keyed request coordinator
//!
//! reqflow sends requests to a single endpoint on behalf of named flows
//! (identities). Every identity gets its own lock, its own latest transport
//! handle and its own optional periodic timer, so independent flows never
//! interfere with each other.
//!
//! # Core Concepts
//!
//! - **Locked dispatch**: skipped silently while the identity's previous
//!   locked request is still outstanding
//! - **Fire-and-forget**: the request is sent, its response discarded
//! - **Periodic dispatch**: locked dispatches on a fixed-rate timer
//! - **CSRF rotation**: the token is attached to state-changing requests and
//!   replaced by whatever the server sends back
//!
//! # Modules
//!
//! - [`coordinator`] - The coordinator actor and its handle
//! - [`transport`] - Transport trait, HTTP and scripted implementations
//! - [`csrf`] - CSRF token storage
//! - [`notify`] - User-facing failure notification
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod csrf;
pub mod notify;
pub mod transport;

pub use config::{Config, CsrfConfig};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorConfig, CoordinatorError, CoordinatorHandle, CoordinatorMetrics,
    CoordinatorSnapshot, DefaultFailureHandler, DispatchMode, DispatchReceipt, FailureHandler, HandlerRegistry,
    Handlers, LockState, Settlement,
};
pub use csrf::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use notify::{ConsoleNotifier, LogNotifier, Notifier};
pub use transport::{
    HttpMethod, HttpTransport, RequestOverrides, ResponseBody, ResponseFormat, ScriptedTransport, Transport,
    TransportConfig, TransportError, TransportHandle, TransportRequest, TransportResponse,
};
