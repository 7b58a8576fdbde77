//! Test fixtures for po-control integration tests.

use po_control::DeployRequest;

/// Builder for deploy requests with sensible defaults.
pub struct DeployBuilder {
    analysis_id: String,
    deployment_name: String,
    image: String,
    project_id: String,
    ports: Vec<u16>,
}

impl DeployBuilder {
    /// Deployment `name` under analysis `analysis`.
    pub fn new(analysis: &str, name: &str) -> Self {
        Self {
            analysis_id: analysis.to_owned(),
            deployment_name: name.to_owned(),
            image: "img:latest".to_owned(),
            project_id: "p1".to_owned(),
            ports: vec![80, 443],
        }
    }

    /// Sets the image reference.
    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_owned();
        self
    }

    /// Sets the exposed ports.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Builds the request.
    pub fn build(self) -> DeployRequest {
        DeployRequest::new(
            self.analysis_id,
            self.deployment_name,
            self.image,
            self.project_id,
            self.ports,
        )
    }

    /// Builds the request as a JSON body.
    pub fn json(self) -> serde_json::Value {
        serde_json::to_value(self.build()).unwrap()
    }
}
