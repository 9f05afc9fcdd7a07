//! # Custom Resource Definitions
//!
//! CRD types for the Resource Claim Controller.
//!
//! - Claims (`PostgreSQLInstance`, `MySQLInstance`, `KubernetesCluster`) are created by tenants
//! - `ResourceClass` and `Provider` are created by operators
//! - Managed resources (`PostgresqlServer`, `MysqlServer`, `AksCluster`) are created by the
//!   claim binding controller and driven by the provisioning state machine

mod claim;
mod class;
mod condition;
mod managed;
mod provider;
mod status;

pub use claim::*;
pub use class::*;
pub use condition::*;
pub use managed::*;
pub use provider::*;
pub use status::*;
