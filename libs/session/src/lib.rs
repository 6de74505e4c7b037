//! Runtime bridge and lifecycle controller for the embedded chat widget.
//!
//! [`ChatSession`] is the host-facing handle. It drives a single controller
//! task that owns the widget runtime, sequences its load and session restore,
//! correlates requests with their acks and tracks the session and visibility
//! state machines. [`PushCorrelator`] routes push notifications to it.
#![forbid(unsafe_code)]

mod bridge;
mod controller;
mod gate;
mod pending;
mod push;
mod session;
mod settings;

pub use controller::SessionSnapshot;
pub use gate::{Readiness, WaitFor};
pub use pending::{PendingReply, PendingRequestTable, Reply};
pub use push::{PushCorrelator, PushDisposition};
pub use session::{ChatSession, SessionDeps};
pub use settings::{BehaviorFlags, HideMode, SessionSettings, SettingsError};
