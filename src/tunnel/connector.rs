use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::{Connection, Connector, Driver};
use crate::error::TunnelError;

use super::TunnelHandle;

/// A backend connector owned by a tunnel's connector cache.
///
/// Its driver is the tunnel, so connections re-derived by name go through the
/// tunnel rather than the backend's native driver.
pub struct CachedConnector {
    inner: Box<dyn Connector>,
    tunnel: Arc<TunnelHandle>,
}

impl CachedConnector {
    pub(super) fn new(inner: Box<dyn Connector>, tunnel: Arc<TunnelHandle>) -> Self {
        Self { inner, tunnel }
    }
}

#[async_trait]
impl Connector for CachedConnector {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>, TunnelError> {
        self.inner.connect(cancel).await
    }

    fn driver(&self) -> Option<Arc<dyn Driver>> {
        let driver: Arc<dyn Driver> = self.tunnel.clone();
        Some(driver)
    }
}
