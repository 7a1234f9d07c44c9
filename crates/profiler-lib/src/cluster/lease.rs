//! Cluster lease records and their snapshot encoding

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a leased cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseState {
    Deploying,
    Available,
    Reserved,
    Unreserving,
    Failed,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Deploying => "DEPLOYING",
            LeaseState::Available => "AVAILABLE",
            LeaseState::Reserved => "RESERVED",
            LeaseState::Unreserving => "UNRESERVING",
            LeaseState::Failed => "FAILED",
        }
    }

    /// States a recovered lease is torn down from
    pub fn is_stale_after_restart(&self) -> bool {
        matches!(
            self,
            LeaseState::Reserved | LeaseState::Failed | LeaseState::Unreserving
        )
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leased cluster deployment
///
/// Serialized as the lease snapshot, keyed by `run_id` in the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterLease {
    pub deployment_template: String,
    /// Empty until the deployer has created the cluster
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub run_id: String,
    pub state: LeaseState,
    #[serde(with = "rfc822")]
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ClusterLease {
    pub fn deploying(template: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            deployment_template: template.into(),
            deployment_id: String::new(),
            run_id: run_id.into(),
            state: LeaseState::Deploying,
            created: Utc::now(),
            failure: None,
        }
    }

    pub fn to_snapshot(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_snapshot(snapshot: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(snapshot)
    }
}

/// `02 Jan 06 15:04 UTC`; minute precision
mod rfc822 {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%d %b %y %H:%M UTC";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_snapshot_wire_format() {
        let lease = ClusterLease {
            deployment_template: "analysis-base".to_string(),
            deployment_id: "dep-42".to_string(),
            run_id: "run-1".to_string(),
            state: LeaseState::Reserved,
            created: Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 0).unwrap(),
            failure: None,
        };

        let snapshot = lease.to_snapshot().unwrap();
        assert_eq!(
            snapshot,
            json!({
                "DeploymentTemplate": "analysis-base",
                "DeploymentId": "dep-42",
                "RunId": "run-1",
                "State": "RESERVED",
                "Created": "02 Jan 06 15:04 UTC"
            })
        );
        assert_eq!(ClusterLease::from_snapshot(snapshot).unwrap(), lease);
    }

    #[test]
    fn test_snapshot_with_failure() {
        let snapshot = json!({
            "DeploymentTemplate": "t",
            "DeploymentId": "d",
            "RunId": "r",
            "State": "FAILED",
            "Created": "15 Mar 24 09:30 UTC",
            "Failure": "extension failed"
        });

        let lease = ClusterLease::from_snapshot(snapshot).unwrap();
        assert_eq!(lease.state, LeaseState::Failed);
        assert_eq!(lease.failure.as_deref(), Some("extension failed"));
        assert_eq!(lease.created, Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_bad_created_is_rejected() {
        let snapshot = json!({
            "DeploymentTemplate": "t",
            "State": "RESERVED",
            "Created": "2024-03-15T09:30:00Z"
        });
        assert!(ClusterLease::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn test_stale_states() {
        assert!(LeaseState::Reserved.is_stale_after_restart());
        assert!(LeaseState::Unreserving.is_stale_after_restart());
        assert!(LeaseState::Failed.is_stale_after_restart());
        assert!(!LeaseState::Available.is_stale_after_restart());
        assert!(!LeaseState::Deploying.is_stale_after_restart());
    }
}
