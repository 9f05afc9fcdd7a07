//! # Resource Claim Controller
//!
//! Library crate behind the `resource-claim-controller`, `crdgen` and `rcctl`
//! binaries.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
pub mod store;

pub use crd::*;
