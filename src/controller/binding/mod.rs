//! # Claim Binding
//!
//! Assembles a (claim, class, managed) triple into a closed set of resource
//! families, validating the kinds once at this boundary. Everything past this
//! point works on typed variants and never re-checks kinds.
//!
//! - [`version`] resolves the claim's requested version against the class default
//! - [`resolver`] derives the managed resource's desired spec
//! - [`claim_reconciler`] binds claims and propagates status and secrets back

pub mod claim_reconciler;
pub mod resolver;
pub mod version;

use crate::crd::{
    provisioner_of, AksCluster, AksClusterSpec, ClaimFields, HasSpec, HasStatus, KubernetesCluster,
    ManagedReference, ManagedStatus, MySQLInstance, MysqlServer, MysqlServerSpec, PostgreSQLInstance,
    PostgresqlServer, PostgresqlServerSpec, ResourceClass, SecretReference,
};
use kube::{Resource, ResourceExt};
use serde::Serialize;

pub use resolver::resolve;
pub use version::resolve_version;

/// Errors raised while binding a claim to a class
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("claim requests version {claim} which is incompatible with class version {class}")]
    IncompatibleVersion { claim: String, class: String },
    #[error("wrong kind: expected {expected}, found {found}")]
    WrongKind { expected: String, found: String },
    #[error("invalid class parameters: {0}")]
    InvalidParameters(String),
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

impl ResolveError {
    /// Reason string used on conditions and claim status
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::IncompatibleVersion { .. } => "IncompatibleVersion",
            ResolveError::WrongKind { .. } => "WrongKind",
            ResolveError::InvalidParameters(_) => "InvalidParameters",
            ResolveError::InvalidClaim(_) => "InvalidClaim",
        }
    }
}

/// Resource family a claim, class and managed resource belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
    Postgresql,
    Mysql,
    Kubernetes,
}

impl ResourceFamily {
    /// Provisioner string a class must carry to serve this family
    pub fn provisioner(&self) -> String {
        match self {
            ResourceFamily::Postgresql => provisioner_of::<PostgresqlServer>(),
            ResourceFamily::Mysql => provisioner_of::<MysqlServer>(),
            ResourceFamily::Kubernetes => provisioner_of::<AksCluster>(),
        }
    }

    pub fn managed_kind(&self) -> String {
        match self {
            ResourceFamily::Postgresql => PostgresqlServer::kind(&()).to_string(),
            ResourceFamily::Mysql => MysqlServer::kind(&()).to_string(),
            ResourceFamily::Kubernetes => AksCluster::kind(&()).to_string(),
        }
    }

    pub fn managed_api_version(&self) -> String {
        match self {
            ResourceFamily::Postgresql => PostgresqlServer::api_version(&()).to_string(),
            ResourceFamily::Mysql => MysqlServer::api_version(&()).to_string(),
            ResourceFamily::Kubernetes => AksCluster::api_version(&()).to_string(),
        }
    }
}

/// A claim of any supported kind
#[derive(Debug, Clone)]
pub enum ClaimVariant {
    Postgresql(PostgreSQLInstance),
    Mysql(MySQLInstance),
    Kubernetes(KubernetesCluster),
}

impl ClaimVariant {
    pub fn family(&self) -> ResourceFamily {
        match self {
            ClaimVariant::Postgresql(_) => ResourceFamily::Postgresql,
            ClaimVariant::Mysql(_) => ResourceFamily::Mysql,
            ClaimVariant::Kubernetes(_) => ResourceFamily::Kubernetes,
        }
    }

    pub fn fields(&self) -> &dyn ClaimFields {
        match self {
            ClaimVariant::Postgresql(c) => c,
            ClaimVariant::Mysql(c) => c,
            ClaimVariant::Kubernetes(c) => c,
        }
    }

    fn meta(&self) -> &kube::api::ObjectMeta {
        match self {
            ClaimVariant::Postgresql(c) => c.meta(),
            ClaimVariant::Mysql(c) => c.meta(),
            ClaimVariant::Kubernetes(c) => c.meta(),
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<String> {
        self.meta().namespace.clone()
    }

    /// Stable identity of the claim
    pub fn uid(&self) -> Result<String, ResolveError> {
        self.meta()
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| ResolveError::InvalidClaim(format!("claim {} has no uid", self.name())))
    }

    /// Controller owner reference pointing at the claim
    pub fn owner_reference(&self) -> Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference> {
        match self {
            ClaimVariant::Postgresql(c) => c.controller_owner_ref(&()),
            ClaimVariant::Mysql(c) => c.controller_owner_ref(&()),
            ClaimVariant::Kubernetes(c) => c.controller_owner_ref(&()),
        }
    }
}

/// A managed resource of any supported kind
#[derive(Debug, Clone)]
pub enum ManagedVariant {
    Postgresql(PostgresqlServer),
    Mysql(MysqlServer),
    Aks(AksCluster),
}

impl ManagedVariant {
    pub fn family(&self) -> ResourceFamily {
        match self {
            ManagedVariant::Postgresql(_) => ResourceFamily::Postgresql,
            ManagedVariant::Mysql(_) => ResourceFamily::Mysql,
            ManagedVariant::Aks(_) => ResourceFamily::Kubernetes,
        }
    }

    fn meta(&self) -> &kube::api::ObjectMeta {
        match self {
            ManagedVariant::Postgresql(m) => m.meta(),
            ManagedVariant::Mysql(m) => m.meta(),
            ManagedVariant::Aks(m) => m.meta(),
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<String> {
        self.meta().namespace.clone()
    }

    pub fn managed_status(&self) -> Option<&ManagedStatus> {
        match self {
            ManagedVariant::Postgresql(m) => m.managed_status(),
            ManagedVariant::Mysql(m) => m.managed_status(),
            ManagedVariant::Aks(m) => m.managed_status(),
        }
    }

    pub fn connection_secret_ref(&self) -> Option<&SecretReference> {
        match self {
            ManagedVariant::Postgresql(m) => m.connection_secret_ref(),
            ManagedVariant::Mysql(m) => m.connection_secret_ref(),
            ManagedVariant::Aks(m) => m.connection_secret_ref(),
        }
    }

    /// Reference recorded on the claim once bound
    pub fn reference(&self) -> ManagedReference {
        let family = self.family();
        ManagedReference {
            api_version: family.managed_api_version(),
            kind: family.managed_kind(),
            name: self.name(),
            namespace: self.namespace().unwrap_or_default(),
        }
    }
}

/// Desired spec of a managed resource derived from a claim and its class
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DesiredSpec {
    Postgresql(PostgresqlServerSpec),
    Mysql(MysqlServerSpec),
    Aks(AksClusterSpec),
}

/// A validated claim and class pair
#[derive(Debug, Clone)]
pub struct Binding {
    pub claim: ClaimVariant,
    pub class: ResourceClass,
}

impl Binding {
    /// Validate that the claim, class and (if already created) managed resource
    /// all belong to the same family.
    pub fn assemble(
        claim: ClaimVariant,
        class: ResourceClass,
        managed: Option<&ManagedVariant>,
    ) -> Result<Self, ResolveError> {
        let family = claim.family();
        let expected = family.provisioner();
        if class.spec.provisioner != expected {
            return Err(ResolveError::WrongKind {
                expected,
                found: class.spec.provisioner.clone(),
            });
        }
        if let Some(managed) = managed {
            if managed.family() != family {
                return Err(ResolveError::WrongKind {
                    expected: family.managed_kind(),
                    found: managed.family().managed_kind(),
                });
            }
        }
        Ok(Self { claim, class })
    }

    /// Name of the managed resource bound to the claim
    pub fn managed_name(&self) -> Result<String, ResolveError> {
        Ok(format!(
            "{}-{}",
            self.claim.family().managed_kind().to_lowercase(),
            self.claim.uid()?
        ))
    }

    pub fn resolve(&self) -> Result<DesiredSpec, ResolveError> {
        resolve(&self.claim, &self.class.spec)
    }

    /// Build the managed resource object for this binding, owned by the claim
    pub fn desired_managed(&self) -> Result<ManagedVariant, ResolveError> {
        let name = self.managed_name()?;
        let managed = match self.resolve()? {
            DesiredSpec::Postgresql(spec) => {
                let mut obj = PostgresqlServer::new(&name, spec);
                self.stamp_metadata(&mut obj.metadata);
                ManagedVariant::Postgresql(obj)
            }
            DesiredSpec::Mysql(spec) => {
                let mut obj = MysqlServer::new(&name, spec);
                self.stamp_metadata(&mut obj.metadata);
                ManagedVariant::Mysql(obj)
            }
            DesiredSpec::Aks(spec) => {
                let mut obj = AksCluster::new(&name, spec);
                self.stamp_metadata(&mut obj.metadata);
                ManagedVariant::Aks(obj)
            }
        };
        Ok(managed)
    }

    fn stamp_metadata(&self, metadata: &mut kube::api::ObjectMeta) {
        metadata.namespace = self.claim.namespace();
        metadata.owner_references = self.claim.owner_reference().map(|owner| vec![owner]);
        metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(crate::constants::CLAIM_NAME_LABEL.to_string(), self.claim.name());
    }
}
