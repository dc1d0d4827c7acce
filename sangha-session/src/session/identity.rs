use async_trait::async_trait;
use sangha_core::{PeerId, SessionError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Source of the local peer id, which may only become known after startup.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Waits until the id is known. `None` means it never will be.
    async fn local_peer_id(&self) -> Option<PeerId>;
}

#[async_trait]
impl IdentityProvider for PeerId {
    async fn local_peer_id(&self) -> Option<PeerId> {
        Some(self.clone())
    }
}

/// Identity published later through a watch channel.
pub struct WatchIdentity(pub watch::Receiver<Option<PeerId>>);

#[async_trait]
impl IdentityProvider for WatchIdentity {
    async fn local_peer_id(&self) -> Option<PeerId> {
        let mut rx = self.0.clone();
        let id = rx.wait_for(Option::is_some).await.ok()?;
        id.clone()
    }
}

/// Resolves the local id within `timeout`.
pub async fn resolve_identity(
    provider: &dyn IdentityProvider,
    timeout: Duration,
) -> Result<PeerId, SessionError> {
    match tokio::time::timeout(timeout, provider.local_peer_id()).await {
        Ok(Some(id)) => {
            info!("Local peer id resolved: {}", id);
            Ok(id)
        }
        Ok(None) => {
            error!("Identity provider closed without a peer id");
            Err(SessionError::IdentityUnavailable)
        }
        Err(_) => {
            error!("Local peer id not available after {:?}", timeout);
            Err(SessionError::IdentityUnavailable)
        }
    }
}
