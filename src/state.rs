use crate::config::Config;
use crate::registry::DeploymentRegistry;

#[derive(Clone)]
pub struct ControllerContext {
    pub kube_client: kube::Client,
    pub config: Config,
    pub registry: DeploymentRegistry,
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: DeploymentRegistry,
}
