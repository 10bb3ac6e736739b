//! # Runtime Module
//!
//! Runtime components for the Konfiguration Controller, including
//! initialization, the watch loop, deletion interruption and error handling.

pub mod deletion_watch;
pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use error_policy::*;
pub use initialization::*;
pub use watch_loop::*;
