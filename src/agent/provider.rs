//! External capability provider.
//!
//! A [`CapabilityProvider`] hands out [`ExternalToolBundle`]s through a narrow
//! acquire/release interface. Sessions hold a bundle through a [`BundleLease`],
//! which releases it exactly once: explicitly, or on drop when the session is
//! cancelled or unwinds.
//!
//! [`SharedToolProvider`] is the process-scoped implementation: it connects to
//! its [`ToolSource`] on first acquire and tears it down once on `shutdown()`.

use crate::tools::{Tool, ToolError, ToolResult};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tools handed to one session by a provider.
pub struct ExternalToolBundle {
    id: Uuid,
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ExternalToolBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("ExternalToolBundle")
            .field("id", &self.id)
            .field("tools", &names)
            .finish()
    }
}

impl ExternalToolBundle {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tools,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub trait CapabilityProvider: Send + Sync {
    fn acquire(&self) -> BoxFuture<'_, ToolResult<ExternalToolBundle>>;

    /// Return a bundle. Must not block; called from `Drop`.
    fn release(&self, bundle_id: Uuid);
}

/// An acquired bundle that is released exactly once.
pub struct BundleLease {
    provider: Arc<dyn CapabilityProvider>,
    bundle: Option<ExternalToolBundle>,
}

impl std::fmt::Debug for BundleLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLease")
            .field("bundle", &self.bundle)
            .finish()
    }
}

impl BundleLease {
    pub async fn acquire(provider: Arc<dyn CapabilityProvider>) -> ToolResult<Self> {
        let bundle = provider.acquire().await?;
        debug!(bundle_id = %bundle.id(), tools = bundle.len(), "External tool bundle acquired");
        Ok(Self {
            provider,
            bundle: Some(bundle),
        })
    }

    pub fn bundle(&self) -> Option<&ExternalToolBundle> {
        self.bundle.as_ref()
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(bundle) = self.bundle.take() {
            debug!(bundle_id = %bundle.id(), "External tool bundle released");
            self.provider.release(bundle.id());
        }
    }
}

impl Drop for BundleLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// A live connection to wherever external tools come from.
pub trait ToolSource: Send + Sync {
    fn list_tools(&self) -> BoxFuture<'_, ToolResult<Vec<Arc<dyn Tool>>>>;

    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

type Connector = Box<dyn Fn() -> BoxFuture<'static, ToolResult<Arc<dyn ToolSource>>> + Send + Sync>;

/// Lazily connected, shared tool provider.
pub struct SharedToolProvider {
    connector: Connector,
    source: Mutex<Option<Arc<dyn ToolSource>>>,
    active: AtomicUsize,
    connects: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for SharedToolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedToolProvider")
            .field("active_leases", &self.active_leases())
            .field("connects", &self.connect_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SharedToolProvider {
    pub fn new<F, Fut>(connector: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Arc<dyn ToolSource>>> + Send + 'static,
    {
        Arc::new(Self {
            connector: Box::new(move || Box::pin(connector()) as BoxFuture<'static, _>),
            source: Mutex::new(None),
            active: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Bundles handed out and not yet released.
    pub fn active_leases(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Times the source has been connected.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn source(&self) -> ToolResult<Arc<dyn ToolSource>> {
        if self.is_closed() {
            return Err(ToolError::unavailable("tool provider has been shut down"));
        }

        let mut guard = self.source.lock().await;
        if let Some(source) = guard.as_ref() {
            return Ok(Arc::clone(source));
        }

        let source = (self.connector)().await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!("External tool source connected");
        *guard = Some(Arc::clone(&source));
        Ok(source)
    }

    /// Tear down the source. Later calls are no-ops; later acquires fail.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let source = self.source.lock().await.take();
        let active = self.active_leases();
        if active > 0 {
            warn!(active_leases = active, "Shutting down tool provider with leases outstanding");
        }
        if let Some(source) = source {
            source.shutdown().await;
            info!("External tool source shut down");
        }
    }
}

impl CapabilityProvider for SharedToolProvider {
    fn acquire(&self) -> BoxFuture<'_, ToolResult<ExternalToolBundle>> {
        Box::pin(async move {
            let source = self.source().await?;
            let tools = source.list_tools().await?;
            self.active.fetch_add(1, Ordering::SeqCst);
            Ok(ExternalToolBundle::new(tools))
        })
    }

    fn release(&self, bundle_id: Uuid) {
        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            warn!(bundle_id = %bundle_id, "Release without a matching acquire");
        }
    }
}
