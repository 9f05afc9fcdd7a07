//! Provisioning integration tests
//!
//! - `fakes` in-memory stores and the scripted provider
//! - `lifecycle` create, poll, observe and publish
//! - `deletion` finalization paths
//! - `failures` rejections, conflicts and bounded retries
//! - `binding` claims bound to managed resources created from their class

pub mod binding;
pub mod deletion;
pub mod fakes;
pub mod failures;
