//! Release naming and the on-host directory layout.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format of release directory names (UTC, second resolution).
pub const RELEASE_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Name of the per-release marker file holding the commit id.
pub const REVISION_MARKER: &str = "REVISION";

/// Name of the link pointing at the live release.
pub const CURRENT_LINK: &str = "current";

/// A release directory name such as `2024-03-01-12-00-05`.
///
/// Names sort lexicographically in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseName(String);

impl ReleaseName {
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        ReleaseName(at.format(RELEASE_NAME_FORMAT).to_string())
    }

    /// Accept only names in the release timestamp format.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() != 19 {
            return None;
        }
        NaiveDateTime::parse_from_str(raw, RELEASE_NAME_FORMAT)
            .ok()
            .map(|_| ReleaseName(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Paths of one application's releases on every host.
///
/// ```text
/// <root>/<app>/<release>/
/// <root>/<app>/<release>/REVISION
/// <root>/<app>/current -> <release>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployLayout {
    app_root: String,
}

impl DeployLayout {
    pub fn new(root: &str, app: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            app_root: format!("{root}/{app}"),
        }
    }

    /// Directory holding all releases of the application.
    pub fn app_root(&self) -> &str {
        &self.app_root
    }

    pub fn current_link(&self) -> String {
        format!("{}/{CURRENT_LINK}", self.app_root)
    }

    /// Marker of the live release, read through the current link.
    pub fn current_marker(&self) -> String {
        format!("{}/{CURRENT_LINK}/{REVISION_MARKER}", self.app_root)
    }

    pub fn release_dir(&self, release: &ReleaseName) -> String {
        format!("{}/{}", self.app_root, release)
    }

    pub fn release_marker(&self, release: &ReleaseName) -> String {
        format!("{}/{}/{REVISION_MARKER}", self.app_root, release)
    }
}
