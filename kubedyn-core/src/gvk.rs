//! Group version identifiers used in discovery and url paths.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Core information about a family of API Resources
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group, empty for the legacy core group
    pub group: String,
    /// Version
    pub version: String,
}

impl GroupVersion {
    /// Construct from explicit group and version
    pub fn gv(group_: &str, version_: &str) -> Self {
        let group = group_.to_string();
        let version = version_.to_string();
        Self { group, version }
    }

    /// Generate the apiVersion string used in a kind's yaml
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The url prefix all resources of this group version live under
    ///
    /// The legacy core group is served under `/api`, everything else under `/apis`.
    pub fn url_prefix(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }
}

impl FromStr for GroupVersion {
    type Err = Error;

    fn from_str(gv: &str) -> Result<Self, Self::Err> {
        let gvsplit = gv.splitn(2, '/').collect::<Vec<_>>();
        let (group, version) = match *gvsplit.as_slice() {
            [g, v] if !g.is_empty() && !v.is_empty() => (g.to_string(), v.to_string()),
            [v] if !v.is_empty() => ("".to_string(), v.to_string()),
            _ => return Err(Error::InvalidGroupVersion(gv.into())),
        };
        Ok(Self { group, version })
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_grouped_versions() {
        let core: GroupVersion = "v1".parse().unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(core.url_prefix(), "/api/v1");

        let apps: GroupVersion = "apps/v1".parse().unwrap();
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.api_version(), "apps/v1");
        assert_eq!(apps.url_prefix(), "/apis/apps/v1");

        let rbac: GroupVersion = "rbac.authorization.k8s.io/v1".parse().unwrap();
        assert_eq!(rbac.url_prefix(), "/apis/rbac.authorization.k8s.io/v1");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!("".parse::<GroupVersion>().is_err());
        assert!("apps/".parse::<GroupVersion>().is_err());
        assert!("/v1".parse::<GroupVersion>().is_err());
    }
}
