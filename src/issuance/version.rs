//! Client version gate for the issuance endpoint.
//!
//! When enforced, callers must declare the versions of the login plugin
//! and of kubectl they run, and both must meet configured minimums.

use semver::Version;
use thiserror::Error;

/// Header carrying the login plugin version.
pub const PLUGIN_VERSION_HEADER: &str = "x-ldapctl-version";

/// Header carrying the kubectl version.
pub const KUBECTL_VERSION_HEADER: &str = "x-kubectl-version";

pub const DEFAULT_MIN_PLUGIN_VERSION: &str = "1.5";
pub const DEFAULT_MIN_KUBECTL_VERSION: &str = "1.16.0";

const PLUGIN: &str = "ldapctl";
const KUBECTL: &str = "kubectl";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("you are using an old version of the ldapctl plugin. Please upgrade to minimum of \"{minimum}\"")]
    Missing { minimum: Version },

    #[error("parsing {client} version \"{value}\": {reason}")]
    Unparsable {
        client: &'static str,
        value: String,
        reason: String,
    },

    #[error("unsupported version \"{found}\" of {client}. minimum version required is \"{minimum}\"")]
    TooOld {
        client: &'static str,
        found: Version,
        minimum: Version,
    },
}

/// Minimum client versions accepted by the issuance endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGate {
    pub min_plugin: Version,
    pub min_kubectl: Version,
}

impl VersionGate {
    pub fn new(min_plugin: &str, min_kubectl: &str) -> Result<Self, VersionError> {
        Ok(Self {
            min_plugin: parse_version(PLUGIN, min_plugin)?,
            min_kubectl: parse_version(KUBECTL, min_kubectl)?,
        })
    }

    /// Check the declared client versions. Both headers are required.
    pub fn check(&self, plugin: Option<&str>, kubectl: Option<&str>) -> Result<(), VersionError> {
        let (plugin, kubectl) = match (plugin, kubectl) {
            (Some(p), Some(k)) if !p.trim().is_empty() && !k.trim().is_empty() => (p, k),
            _ => {
                return Err(VersionError::Missing {
                    minimum: self.min_plugin.clone(),
                })
            }
        };

        at_least(PLUGIN, plugin, &self.min_plugin)?;
        at_least(KUBECTL, kubectl, &self.min_kubectl)
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self {
            min_plugin: Version::new(1, 5, 0),
            min_kubectl: Version::new(1, 16, 0),
        }
    }
}

fn at_least(client: &'static str, value: &str, minimum: &Version) -> Result<(), VersionError> {
    let found = parse_version(client, value)?;
    if found < *minimum {
        return Err(VersionError::TooOld {
            client,
            found,
            minimum: minimum.clone(),
        });
    }
    Ok(())
}

/// Parse a client version leniently: a leading `v` is accepted and a
/// missing minor or patch component counts as zero (`v1.5` is `1.5.0`).
pub fn parse_version(client: &'static str, value: &str) -> Result<Version, VersionError> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, suffix),
        2 => format!("{}.0{}", core, suffix),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded).map_err(|e| VersionError::Unparsable {
        client,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> VersionGate {
        VersionGate::new("1.4", "1.14.0").unwrap()
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(parse_version(PLUGIN, "1.5").unwrap(), Version::new(1, 5, 0));
        assert_eq!(parse_version(PLUGIN, "2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse_version(KUBECTL, "v1.16.3").unwrap(), Version::new(1, 16, 3));
        assert_eq!(
            parse_version(KUBECTL, "v1.18-gke.1").unwrap(),
            Version::parse("1.18.0-gke.1").unwrap()
        );
        assert!(parse_version(KUBECTL, "").is_err());
        assert!(parse_version(KUBECTL, "latest").is_err());
    }

    #[test]
    fn test_newer_and_equal_versions_pass() {
        assert!(gate().check(Some("1.5"), Some("1.16.9")).is_ok());
        assert!(gate().check(Some("1.4"), Some("1.14.0")).is_ok());
    }

    #[test]
    fn test_old_plugin_version() {
        let err = gate().check(Some("1.2"), Some("1.14.0")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported version \"1.2.0\" of ldapctl. minimum version required is \"1.4.0\""
        );
    }

    #[test]
    fn test_old_kubectl_version() {
        let err = gate().check(Some("1.4"), Some("1.13.0")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported version \"1.13.0\" of kubectl. minimum version required is \"1.14.0\""
        );
    }

    #[test]
    fn test_missing_headers() {
        for (plugin, kubectl) in [(None, Some("1.14.0")), (Some("1.4"), None), (Some(""), Some("1.14.0"))] {
            let err = gate().check(plugin, kubectl).unwrap_err();
            assert!(matches!(err, VersionError::Missing { .. }));
            assert!(err.to_string().contains("\"1.4.0\""));
        }
    }

    #[test]
    fn test_garbage_version_is_rejected() {
        let err = gate().check(Some("1.4"), Some("not-a-version")).unwrap_err();
        assert!(matches!(err, VersionError::Unparsable { client: "kubectl", .. }));
    }

    #[test]
    fn test_default_minimums() {
        assert_eq!(
            VersionGate::default(),
            VersionGate::new(DEFAULT_MIN_PLUGIN_VERSION, DEFAULT_MIN_KUBECTL_VERSION).unwrap()
        );
    }
}
