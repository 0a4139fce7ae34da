//! OAuth automation core for authflow.
//!
//! Drives the console's OAuth trigger and the identity provider's login and
//! consent pages per account, reconciles both sides, verifies the resulting
//! credential artifact and maintains the rotation index.

pub mod accounts;
pub mod artifact;
pub mod config;
pub mod console;
pub mod error;
pub mod flow;
pub mod models;
pub mod orchestrator;
pub mod paths;
pub mod reconcile;
pub mod rotation;
pub mod surface;

pub use config::AutomationConfig;
pub use error::{AutomationError, FailureCode, Result};
pub use models::*;
