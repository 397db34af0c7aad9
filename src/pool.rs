//! Shared transport clients and the per-configuration connection registry
//!
//! Several logical configurations can share one physical connection pool.
//! The shared client counts its users: the delegate is physically started
//! on the 0 to 1 transition and physically stopped on the 1 to 0
//! transition.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CourierError;
use crate::request::LogicalRequest;
use crate::transport::{
    OptionsSupport, SendOptions, Transport, TransportError, WireResponse,
};

/// A usage-counted wrapper around a transport client.
///
/// `start`/`stop` are safe to call concurrently from multiple logical
/// configurations; the counter never goes negative and a failed physical
/// start rolls the increment back.
pub struct SharedClient {
    delegate: Arc<dyn Transport>,
    usage: AtomicUsize,
    options_support: OptionsSupport,
}

impl SharedClient {
    /// Wraps a delegate, feature-detecting its option support exactly once.
    pub fn new(delegate: Arc<dyn Transport>) -> Self {
        let options_support = delegate.options_support();
        Self {
            delegate,
            usage: AtomicUsize::new(0),
            options_support,
        }
    }

    /// Registers a user, physically starting the delegate on the 0 to 1
    /// transition. A failed physical start rolls the counter back and
    /// propagates.
    pub async fn start(&self) -> Result<(), CourierError> {
        let previous = self.usage.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            if let Err(e) = self.delegate.start().await {
                self.usage.fetch_sub(1, Ordering::SeqCst);
                return Err(CourierError::connectivity(
                    "<transport start>",
                    e.to_string(),
                ));
            }
            debug!("physical transport started");
        }
        Ok(())
    }

    /// Unregisters a user, physically stopping the delegate on the 1 to 0
    /// transition.
    ///
    /// # Panics
    /// Calling `stop` more times than matching `start` calls is a
    /// programming error, not a recoverable condition.
    pub async fn stop(&self) -> Result<(), CourierError> {
        let previous = self
            .usage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .unwrap_or_else(|_| {
                panic!("SharedClient::stop called more times than start")
            });
        if previous == 1 {
            self.delegate
                .stop()
                .await
                .map_err(|e| CourierError::connectivity("<transport stop>", e.to_string()))?;
            debug!("physical transport stopped");
        }
        Ok(())
    }

    /// Current number of registered users
    pub fn usage_count(&self) -> usize {
        self.usage.load(Ordering::SeqCst)
    }

    /// Forwards a send to the delegate, downgrading options the delegate
    /// cannot honor. The downgrade is a compatibility shim, never an
    /// error.
    pub async fn send(
        &self,
        request: LogicalRequest,
        mut options: SendOptions,
    ) -> Result<WireResponse, TransportError> {
        if self.options_support == OptionsSupport::Base && options.follow_redirects.is_some() {
            debug!(
                "delegate only supports base send options; dropping per-request redirect override"
            );
            options.follow_redirects = None;
        }
        self.delegate.send(request, &options).await
    }
}

impl std::fmt::Debug for SharedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedClient")
            .field("usage", &self.usage_count())
            .field("options_support", &self.options_support)
            .finish_non_exhaustive()
    }
}

/// Maps a configuration identity to its shared client.
///
/// Lookup-or-create is atomic per identity: the supplier runs at most
/// once, and concurrent first use never creates two physical clients for
/// one identity.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<SharedClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client registered for `identity`, invoking `supplier`
    /// to create one only when the identity is unknown.
    pub fn lookup_or_create<F>(&self, identity: &str, supplier: F) -> Arc<SharedClient>
    where
        F: FnOnce() -> SharedClient,
    {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        clients
            .entry(identity.to_string())
            .or_insert_with(|| {
                info!("creating shared client for configuration '{identity}'");
                Arc::new(supplier())
            })
            .clone()
    }

    /// Removes the mapping for `identity`. Idempotent, and never stops the
    /// client: stop() ownership stays with the configurations using it.
    pub fn dispose(&self, identity: &str) -> bool {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = clients.remove(identity).is_some();
        if removed {
            info!("disposed shared client registration for '{identity}'");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
