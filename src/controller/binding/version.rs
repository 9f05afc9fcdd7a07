//! # Version Resolution
//!
//! Reconciles the version a claim asks for with the default its class defines.

use super::ResolveError;
use regex::Regex;
use std::sync::LazyLock;

/// `<major>[.<minor>[.<patch>...]]` with an optional `v` prefix
static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.\d+)*$").expect("version pattern is valid")
});

/// Major/minor family of a dotted version string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VersionFamily {
    major: u64,
    minor: Option<u64>,
}

fn parse_family(version: &str) -> Option<VersionFamily> {
    let captures = VERSION_REGEX.captures(version.trim())?;
    let major = captures.name("major")?.as_str().parse().ok()?;
    let minor = match captures.name("minor") {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    Some(VersionFamily { major, minor })
}

/// Resolve the effective version from a class default and a claim request
///
/// - empty claim value accepts the class default unchanged
/// - empty class value accepts whatever the claim asks for
/// - otherwise the claim wins when it is equal to the class value or in the
///   same major.minor family (major only, when the class pins no minor)
pub fn resolve_version(class_version: &str, claim_version: &str) -> Result<String, ResolveError> {
    let class_version = class_version.trim();
    let claim_version = claim_version.trim();

    if claim_version.is_empty() {
        return Ok(class_version.to_string());
    }
    if class_version.is_empty() || class_version == claim_version {
        return Ok(claim_version.to_string());
    }

    let compatible = match (parse_family(class_version), parse_family(claim_version)) {
        (Some(class), Some(claim)) => match class.minor {
            Some(minor) => claim.major == class.major && claim.minor == Some(minor),
            None => claim.major == class.major,
        },
        _ => false,
    };

    if compatible {
        Ok(claim_version.to_string())
    } else {
        Err(ResolveError::IncompatibleVersion {
            claim: claim_version.to_string(),
            class: class_version.to_string(),
        })
    }
}
