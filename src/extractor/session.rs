//! Browser session ownership for extractor runs.
//!
//! A lease either owns the session it provisioned or borrows one handed down
//! by a parent extractor. Only owned sessions are disposed, on release or,
//! when the task is cancelled or panics first, on drop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::runtime::Handle;

use crate::browser::{Session, SessionProvider};
use crate::extraction::ExtractionResult;

pub struct SessionLease {
    session: Arc<dyn Session>,
    owned: bool,
}

impl SessionLease {
    /// Reuse `existing` when given, otherwise provision a fresh session
    pub async fn acquire(
        provider: &dyn SessionProvider,
        existing: Option<Arc<dyn Session>>,
        implicit_wait: Duration,
    ) -> ExtractionResult<Self> {
        match existing {
            Some(session) => Ok(Self::borrowed(session)),
            None => {
                let session = provider.provision(implicit_wait).await?;
                debug!("Provisioned {} session (wait {:?})", session.name(), implicit_wait);
                Ok(Self {
                    session,
                    owned: true,
                })
            }
        }
    }

    /// Take over disposal of a session opened elsewhere
    #[must_use]
    pub fn adopt(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            owned: true,
        }
    }

    #[must_use]
    pub fn borrowed(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            owned: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Dispose the session if this lease owns it. Disposal failures are
    /// logged; the extraction result stands.
    pub async fn release(mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        dispose(&self.session).await;
    }
}

async fn dispose(session: &Arc<dyn Session>) {
    if let Err(e) = session.dispose().await {
        warn!("Failed to dispose {} session: {e}", session.name());
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let session = Arc::clone(&self.session);
        match Handle::try_current() {
            Ok(handle) => {
                debug!("Disposing {} session of an unreleased lease", session.name());
                handle.spawn(async move { dispose(&session).await });
            }
            Err(_) => warn!("{} session dropped outside a runtime; not disposed", session.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::StaticProvider;
    use std::collections::HashMap;

    #[tokio::test]
    async fn only_provisioned_sessions_are_owned() {
        let provider = StaticProvider::with_fixtures(HashMap::from([(
            "https://example.org/".to_string(),
            "<html><body></body></html>".to_string(),
        )]));

        let lease = SessionLease::acquire(&provider, None, Duration::ZERO).await.unwrap();
        assert!(lease.is_owned());
        let shared = Arc::clone(lease.session());

        let borrowed = SessionLease::acquire(&provider, Some(Arc::clone(&shared)), Duration::ZERO)
            .await
            .unwrap();
        assert!(!borrowed.is_owned());
        assert!(Arc::ptr_eq(borrowed.session(), &shared));

        borrowed.release().await;
        shared.navigate("https://example.org/").await.unwrap();
        lease.release().await;
        assert_eq!(shared.current_url().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropped_leases_dispose_owned_sessions() {
        let provider = StaticProvider::with_fixtures(HashMap::from([(
            "https://example.org/".to_string(),
            "<html><body></body></html>".to_string(),
        )]));

        let lease = SessionLease::acquire(&provider, None, Duration::ZERO).await.unwrap();
        let session = Arc::clone(lease.session());
        session.navigate("https://example.org/").await.unwrap();
        let borrowed = SessionLease::borrowed(Arc::clone(&session));
        drop(borrowed);
        assert!(session.current_url().await.unwrap().is_some());

        drop(lease);
        tokio::task::yield_now().await;
        assert_eq!(session.current_url().await.unwrap(), None);
    }
}
