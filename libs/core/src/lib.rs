//! Chatlink core contracts and value types.
//!
//! This crate holds everything the session layer and host integrations share:
//! configuration, the JSON envelope exchanged with the embedded widget, the
//! error taxonomy, and the capability traits a host implements.
#![forbid(unsafe_code)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod interfaces;
pub mod push;
pub mod types;

pub use config::*;
pub use envelope::*;
pub use error::*;
pub use interfaces::*;
pub use push::*;
pub use types::*;
