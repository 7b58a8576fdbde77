//! Error types for po-control.

use std::fmt;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Transport or authentication failure talking to the cluster API.
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// The cluster already has a workload with this name.
    #[error("workload {name} already exists in namespace {namespace}")]
    WorkloadAlreadyExists {
        /// Workload name.
        name: String,
        /// Namespace.
        namespace: String,
    },

    /// The cluster has no workload with this name.
    #[error("workload {name} not found in namespace {namespace}")]
    WorkloadNotFound {
        /// Workload name.
        name: String,
        /// Namespace.
        namespace: String,
    },

    /// The store already tracks a deployment with this name.
    #[error("deployment already tracked: {0}")]
    DuplicateDeployment(String),

    /// The store has no records for this analysis.
    #[error("analysis not found: {0}")]
    AnalysisNotFound(String),

    /// Connection or transaction failure in the store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Request rejected by validation or by the cluster's API server.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// An error annotated with the operation and identifier it concerns.
    #[error("{operation} {target}: {source}")]
    Operation {
        /// Manager operation that failed.
        operation: &'static str,
        /// Analysis id or deployment name involved.
        target: String,
        /// Underlying error.
        #[source]
        source: Box<ControlError>,
    },
}

/// Flat classification of [`ControlError`], ignoring annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`ControlError::ClusterUnreachable`].
    ClusterUnreachable,
    /// See [`ControlError::WorkloadAlreadyExists`].
    WorkloadAlreadyExists,
    /// See [`ControlError::WorkloadNotFound`].
    WorkloadNotFound,
    /// See [`ControlError::DuplicateDeployment`].
    DuplicateDeployment,
    /// See [`ControlError::AnalysisNotFound`].
    AnalysisNotFound,
    /// See [`ControlError::StoreUnavailable`].
    StoreUnavailable,
    /// See [`ControlError::InvalidRequest`].
    InvalidRequest,
    /// See [`ControlError::Config`].
    Config,
    /// See [`ControlError::Serialisation`].
    Serialisation,
    /// See [`ControlError::Internal`].
    Internal,
}

impl ControlError {
    /// Create a cluster transport error.
    #[must_use]
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::ClusterUnreachable(msg.into())
    }

    /// Create a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Annotate this error with an operation name and target identifier.
    #[must_use]
    pub fn during(self, operation: &'static str, target: impl fmt::Display) -> Self {
        Self::Operation {
            operation,
            target: target.to_string(),
            source: Box::new(self),
        }
    }

    /// Classify the innermost error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClusterUnreachable(_) => ErrorKind::ClusterUnreachable,
            Self::WorkloadAlreadyExists { .. } => ErrorKind::WorkloadAlreadyExists,
            Self::WorkloadNotFound { .. } => ErrorKind::WorkloadNotFound,
            Self::DuplicateDeployment(_) => ErrorKind::DuplicateDeployment,
            Self::AnalysisNotFound(_) => ErrorKind::AnalysisNotFound,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialisation(_) => ErrorKind::Serialisation,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Operation { source, .. } => source.kind(),
        }
    }

    /// Whether the cluster reported the workload as absent.
    #[must_use]
    pub fn is_workload_not_found(&self) -> bool {
        self.kind() == ErrorKind::WorkloadNotFound
    }

    /// Whether this is a name collision at either the cluster or the store.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::WorkloadAlreadyExists | ErrorKind::DuplicateDeployment
        )
    }

    /// Map a Kubernetes client error for an operation on `name`.
    ///
    /// 404 and 409 responses become [`ControlError::WorkloadNotFound`] and
    /// [`ControlError::WorkloadAlreadyExists`]. 400 and 422 mean the API server
    /// rejected the object and become [`ControlError::InvalidRequest`].
    /// Authentication failures, other statuses and transport errors are
    /// treated as the cluster being unreachable.
    #[must_use]
    pub fn from_kube(err: kube::Error, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(ref status) if status.code == 404 => Self::WorkloadNotFound {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            },
            kube::Error::Api(ref status) if status.code == 409 => Self::WorkloadAlreadyExists {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            },
            kube::Error::Api(ref status) if status.code == 400 || status.code == 422 => {
                Self::InvalidRequest(format!(
                    "cluster rejected {name} in namespace {namespace}: {}",
                    status.message
                ))
            }
            other => Self::ClusterUnreachable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ControlError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<figment::Error> for ControlError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_sees_through_annotations() {
        let err = ControlError::DuplicateDeployment("svc-1".to_owned())
            .during("deploy", "svc-1")
            .during("api", "a1");

        assert_eq!(err.kind(), ErrorKind::DuplicateDeployment);
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "api a1: deploy svc-1: deployment already tracked: svc-1"
        );
    }

    #[test]
    fn workload_not_found_detection() {
        let err = ControlError::WorkloadNotFound {
            name: "svc-1".to_owned(),
            namespace: "default".to_owned(),
        }
        .during("teardown", "a1");

        assert!(err.is_workload_not_found());
        assert!(!err.is_conflict());
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("{reason} from server"),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn kube_status_codes_map_to_kinds() {
        let cases = [
            (404, "NotFound", ErrorKind::WorkloadNotFound),
            (409, "AlreadyExists", ErrorKind::WorkloadAlreadyExists),
            (400, "BadRequest", ErrorKind::InvalidRequest),
            (422, "Invalid", ErrorKind::InvalidRequest),
            (401, "Unauthorized", ErrorKind::ClusterUnreachable),
            (403, "Forbidden", ErrorKind::ClusterUnreachable),
            (500, "InternalError", ErrorKind::ClusterUnreachable),
        ];
        for (code, reason, kind) in cases {
            let err = ControlError::from_kube(api_error(code, reason), "svc-1", "default");
            assert_eq!(err.kind(), kind, "status {code}");
        }
    }

    #[test]
    fn rejected_object_keeps_server_message() {
        let err = ControlError::from_kube(api_error(422, "Invalid"), "svc-1", "analyses");
        let msg = err.to_string();
        assert!(msg.contains("svc-1"), "{msg}");
        assert!(msg.contains("Invalid from server"), "{msg}");
    }

    #[test]
    fn missing_workload_names_it() {
        let err = ControlError::from_kube(api_error(404, "NotFound"), "svc-1", "analyses");
        assert!(err.is_workload_not_found());
        assert!(matches!(
            err,
            ControlError::WorkloadNotFound { ref name, ref namespace }
                if name == "svc-1" && namespace == "analyses"
        ));
    }

    #[test]
    fn sqlx_errors_are_store_unavailable() {
        let err: ControlError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
