use fleetsync_core::ClusterMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Authoritative source a snapshot is built from. Cluster-scoped stores
/// call it with `None`, host-scoped stores with the host being served.
pub trait CurrentDataProvider<C>: Send + Sync {
    fn fetch_current(&self, host_name: Option<&str>) -> Result<ClusterMap<C>, ProviderError>;
}

impl<C, F> CurrentDataProvider<C> for F
where
    F: Fn(Option<&str>) -> Result<ClusterMap<C>, ProviderError> + Send + Sync,
{
    fn fetch_current(&self, host_name: Option<&str>) -> Result<ClusterMap<C>, ProviderError> {
        self(host_name)
    }
}
