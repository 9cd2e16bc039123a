//! Kubernetes api version priority ordering.
use std::{cmp::Reverse, convert::Infallible, str::FromStr};

/// Version parser for Kubernetes version patterns
///
/// Implements [Kubernetes version priority](https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definition-versioning/#version-priority)
/// so served versions can be sorted the way the api server prefers them:
/// stable releases first (descending), then betas, then alphas, then any
/// non-conformant strings lexicographically.
///
/// ```
/// use kubedyn_core::Version;
/// use std::cmp::Reverse;
/// let mut versions = vec!["v2", "v11alpha2", "foo1", "v10beta3", "v1"];
/// versions.sort_by_cached_key(|v| Reverse(Version::parse(v)));
/// assert_eq!(versions, vec!["v2", "v1", "v10beta3", "v11alpha2", "foo1"]);
/// ```
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Version {
    /// A major/GA release
    Stable(u32),
    /// A beta release for a specific major version
    Beta(u32, Option<u32>),
    /// An alpha release for a specific major version
    Alpha(u32, Option<u32>),
    /// A non-conformant api string (sorted lexicographically)
    ///
    /// CRDs and APIServices can use arbitrary strings as versions.
    Nonconformant(String),
}

impl Version {
    fn try_parse(v: &str) -> Option<Version> {
        let v = v.strip_prefix('v')?;
        let major_chars = v.chars().take_while(|ch| ch.is_ascii_digit()).count();
        let major: u32 = v[..major_chars].parse().ok()?;
        let rest = &v[major_chars..];
        if rest.is_empty() {
            return Some(Version::Stable(major));
        }
        if let Some(suffix) = rest.strip_prefix("alpha") {
            return if suffix.is_empty() {
                Some(Version::Alpha(major, None))
            } else {
                Some(Version::Alpha(major, Some(suffix.parse().ok()?)))
            };
        }
        if let Some(suffix) = rest.strip_prefix("beta") {
            return if suffix.is_empty() {
                Some(Version::Beta(major, None))
            } else {
                Some(Version::Beta(major, Some(suffix.parse().ok()?)))
            };
        }
        None
    }

    /// An infallible parse of a Kubernetes version string
    ///
    /// ```
    /// use kubedyn_core::Version;
    /// assert_eq!(Version::parse("v10beta12"), Version::Beta(10, Some(12)));
    /// ```
    pub fn parse(v: &str) -> Version {
        match Self::try_parse(v) {
            Some(ver) => ver,
            None => Version::Nonconformant(v.to_string()),
        }
    }
}

/// An infallible FromStr implementation for more generic users
impl FromStr for Version {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Version::parse(s))
    }
}

// Comparison key: the variant order provides the stability tiers, the
// reversed numbers make higher releases sort first within a tier.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum VersionSortKey<'a> {
    Stable(Reverse<u32>),
    Beta(Reverse<u32>, Reverse<Option<u32>>),
    Alpha(Reverse<u32>, Reverse<Option<u32>>),
    Nonconformant(&'a str),
}

impl Version {
    fn to_sort_key(&self) -> VersionSortKey {
        match self {
            Version::Stable(v) => VersionSortKey::Stable(Reverse(*v)),
            Version::Beta(v, beta) => VersionSortKey::Beta(Reverse(*v), Reverse(*beta)),
            Version::Alpha(v, alpha) => VersionSortKey::Alpha(Reverse(*v), Reverse(*alpha)),
            Version::Nonconformant(nc) => VersionSortKey::Nonconformant(nc),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.to_sort_key().cmp(&self.to_sort_key())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
