//! Stored release records and their state machine

use chrono::{DateTime, Duration, Utc};
use keelson_core::{Chart, Values};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default timeout for pending operations (5 minutes)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::minutes(5);

/// Chart a revision was deployed from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
}

impl From<&Chart> for ChartInfo {
    fn from(chart: &Chart) -> Self {
        Self {
            name: chart.name().to_string(),
            version: chart.version().to_string(),
            app_version: chart.app_version().to_string(),
        }
    }
}

/// One revision of a release as recorded in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    /// Release name
    pub name: String,

    /// Kubernetes namespace
    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub revision: u32,

    /// Current state with timing information
    pub state: ReleaseState,

    /// Chart metadata at deploy time
    pub chart: ChartInfo,

    /// Effective values
    pub values: Values,

    /// Deployed manifest (all Kubernetes resources)
    pub manifest: String,

    #[serde(default)]
    pub description: String,

    /// Custom labels for filtering/querying
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// Create the first revision of a release
    pub fn for_install(
        name: String,
        namespace: String,
        chart: ChartInfo,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            namespace,
            revision: 1,
            state: ReleaseState::PendingInstall {
                started_at: now,
                timeout: DEFAULT_OPERATION_TIMEOUT,
            },
            chart,
            values,
            manifest,
            description: String::new(),
            labels: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the revision following `previous`
    pub fn for_upgrade(
        previous: &StoredRelease,
        chart: ChartInfo,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            revision: previous.revision + 1,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                timeout: DEFAULT_OPERATION_TIMEOUT,
                previous_revision: previous.revision,
            },
            chart,
            values,
            manifest,
            description: String::new(),
            labels: previous.labels.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key for this release
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.revision)
    }

    /// Mark the release as deployed
    pub fn mark_deployed(&mut self) {
        self.state = ReleaseState::Deployed;
        self.updated_at = Utc::now();
    }

    /// Mark the release as failed
    pub fn mark_failed(&mut self, reason: String) {
        self.state = ReleaseState::Failed {
            reason,
            failed_at: Utc::now(),
        };
        self.updated_at = Utc::now();
    }

    /// Mark the release as superseded (replaced by a newer revision)
    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }

    /// Mark the release as uninstalled
    pub fn mark_uninstalled(&mut self) {
        self.state = ReleaseState::Uninstalled;
        self.updated_at = Utc::now();
    }
}

/// Storage key for a release revision
pub fn storage_key(name: &str, revision: u32) -> String {
    format!("sh.keelson.release.v1.{name}.v{revision}")
}

/// Release state with timing information for pending operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseState {
    /// Successfully deployed
    Deployed,

    /// Deployment failed
    #[serde(rename_all = "camelCase")]
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    /// Replaced by a newer revision
    Superseded,

    /// Release has been uninstalled
    Uninstalled,

    /// Installation in progress
    #[serde(rename_all = "camelCase")]
    PendingInstall {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
    },

    /// Upgrade in progress
    #[serde(rename_all = "camelCase")]
    PendingUpgrade {
        started_at: DateTime<Utc>,
        #[serde(with = "duration_serde")]
        timeout: Duration,
        previous_revision: u32,
    },
}

impl ReleaseState {
    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInstall { .. } | Self::PendingUpgrade { .. })
    }

    /// Whether the release name is still taken in this state
    pub fn holds_name(&self) -> bool {
        !matches!(self, Self::Uninstalled | Self::Failed { .. })
    }

    /// Status label
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed { .. } => "failed",
            Self::Superseded => "superseded",
            Self::Uninstalled => "uninstalled",
            Self::PendingInstall { .. } => "pending-install",
            Self::PendingUpgrade { .. } => "pending-upgrade",
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status_name()),
        }
    }
}

/// Serialization helper for chrono::Duration
mod duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_info() -> ChartInfo {
        ChartInfo {
            name: "web".to_string(),
            version: "1.0.0".to_string(),
            app_version: "2.4".to_string(),
        }
    }

    #[test]
    fn test_storage_key() {
        let release = StoredRelease::for_install(
            "myapp".to_string(),
            "default".to_string(),
            chart_info(),
            Values::new(),
            "apiVersion: v1".to_string(),
        );

        assert_eq!(release.storage_key(), "sh.keelson.release.v1.myapp.v1");
    }

    #[test]
    fn test_upgrade_revision() {
        let mut first = StoredRelease::for_install(
            "myapp".to_string(),
            "default".to_string(),
            chart_info(),
            Values::new(),
            String::new(),
        );
        first.mark_deployed();

        let second = StoredRelease::for_upgrade(&first, chart_info(), Values::new(), String::new());
        assert_eq!(second.revision, 2);
        assert!(second.state.is_pending());
        assert_eq!(second.state.status_name(), "pending-upgrade");
    }

    #[test]
    fn test_state_wire_format() {
        let state = ReleaseState::Failed {
            reason: "boom".to_string(),
            failed_at: Utc::now(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
        assert!(json.get("failedAt").is_some());

        let json = serde_json::to_value(ReleaseState::Deployed).unwrap();
        assert_eq!(json, serde_json::json!({"status": "deployed"}));
    }

    #[test]
    fn test_name_holding_states() {
        assert!(ReleaseState::Deployed.holds_name());
        assert!(ReleaseState::Superseded.holds_name());
        assert!(!ReleaseState::Uninstalled.holds_name());
        assert!(
            !ReleaseState::Failed {
                reason: String::new(),
                failed_at: Utc::now(),
            }
            .holds_name()
        );
    }
}
