//! # Controller
//!
//! - [`binding`] binds claims to classes and creates managed resources
//! - [`reconciler`] provisions managed resources asynchronously
//! - [`backoff`] retry delays for failed reconciles
//! - [`server`] metrics and health probes

pub mod backoff;
pub mod binding;
pub mod reconciler;
pub mod server;
