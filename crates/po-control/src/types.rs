//! Core types for po-control.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the raw string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a logical analysis. One analysis may own several deployments.
    AnalysisId
);

string_id!(
    /// Name of a workload in the cluster. Unique across all records.
    DeploymentName
);

string_id!(
    /// Owning project reference.
    ProjectId
);

string_id!(
    /// Pod identifier.
    ///
    /// This is always the pod's `metadata.name`, never its UID. Workload
    /// creation, pod listing and log filtering all speak pod names.
    PodId
);

/// Lifecycle status of a tracked deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Workload submitted to the cluster, pods may still be scheduling.
    Created,
    /// Cluster reported at least one pod backing the workload.
    Running,
    /// Marked inactive by an operator.
    Stopped,
    /// Workload failed.
    Failed,
    /// Workload removed from the cluster.
    Deleted,
}

impl DeploymentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Created,
        Self::Running,
        Self::Stopped,
        Self::Failed,
        Self::Deleted,
    ];

    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle edge.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running | Self::Stopped | Self::Failed | Self::Deleted)
                | (Self::Running, Self::Stopped | Self::Failed | Self::Deleted)
                | (Self::Stopped, Self::Deleted)
                | (Self::Failed, Self::Deleted)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// A deployment record as stored in the lifecycle store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisDeployment {
    /// Analysis this deployment belongs to.
    pub analysis_id: AnalysisId,
    /// Workload name in the cluster.
    pub deployment_name: DeploymentName,
    /// Owning project.
    pub project_id: ProjectId,
    /// Last known pods backing the workload.
    pub pod_ids: Vec<PodId>,
    /// Ports exposed by the workload.
    pub ports: Vec<u16>,
    /// Container image the workload runs.
    pub image_registry_address: String,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Cached log snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisDeployment {
    /// Create a new record stamped with the current time.
    #[must_use]
    pub fn new(
        analysis_id: AnalysisId,
        deployment_name: DeploymentName,
        project_id: ProjectId,
        pod_ids: Vec<PodId>,
        status: DeploymentStatus,
        ports: Vec<u16>,
        image_registry_address: impl Into<String>,
    ) -> Self {
        let now = now_micros();
        Self {
            analysis_id,
            deployment_name,
            project_id,
            pod_ids,
            ports,
            image_registry_address: image_registry_address.into(),
            status,
            log: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Field changes applied to one or more records.
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentUpdate {
    /// New status.
    pub status: Option<DeploymentStatus>,
    /// New pod set.
    pub pod_ids: Option<Vec<PodId>>,
    /// New port set.
    pub ports: Option<Vec<u16>>,
    /// New image reference.
    pub image_registry_address: Option<String>,
    /// New log snapshot. `Some(None)` clears it.
    pub log: Option<Option<String>>,
}

impl DeploymentUpdate {
    /// Create an empty update.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: None,
            pod_ids: None,
            ports: None,
            image_registry_address: None,
            log: None,
        }
    }

    /// Set the status.
    #[must_use]
    pub const fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Replace the pod set.
    #[must_use]
    pub fn with_pod_ids(mut self, pod_ids: Vec<PodId>) -> Self {
        self.pod_ids = Some(pod_ids);
        self
    }

    /// Replace the port set.
    #[must_use]
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Replace the image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image_registry_address = Some(image.into());
        self
    }

    /// Store a log snapshot.
    #[must_use]
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(Some(log.into()));
        self
    }

    /// Clear the log snapshot.
    #[must_use]
    pub fn clear_log(mut self) -> Self {
        self.log = Some(None);
        self
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.pod_ids.is_none()
            && self.ports.is_none()
            && self.image_registry_address.is_none()
            && self.log.is_none()
    }

    /// Apply the changes to a record in place and bump `updated_at`.
    pub fn apply_to(&self, record: &mut AnalysisDeployment) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref pod_ids) = self.pod_ids {
            record.pod_ids.clone_from(pod_ids);
        }
        if let Some(ref ports) = self.ports {
            record.ports.clone_from(ports);
        }
        if let Some(ref image) = self.image_registry_address {
            record.image_registry_address.clone_from(image);
        }
        if let Some(ref log) = self.log {
            record.log.clone_from(log);
        }
        record.updated_at = now_micros();
    }
}

/// Current time at the microsecond precision PostgreSQL keeps, so a record
/// compares equal to its stored copy.
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Log output of a single pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodLog {
    /// Pod the log came from.
    pub pod_id: PodId,
    /// Raw log text.
    pub text: String,
}
