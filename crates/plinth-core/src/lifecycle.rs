//! Shutdown signalling and lifespan hooks.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;

/// Process-wide shutdown flag observed by the server and the fanout thread.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

type SyncHook = dyn Fn() -> anyhow::Result<()> + Send + Sync;
type AsyncHook = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Startup or shutdown callback. Blocking and async hooks are both supported.
pub enum LifespanHook {
    Sync(Box<SyncHook>),
    Async(Box<AsyncHook>),
}

impl LifespanHook {
    pub fn blocking<F>(hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        LifespanHook::Sync(Box::new(hook))
    }

    pub fn future<F, Fut>(hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        LifespanHook::Async(Box::new(move || hook().boxed()))
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        match self {
            LifespanHook::Sync(hook) => hook(),
            LifespanHook::Async(hook) => hook().await,
        }
    }
}

impl std::fmt::Debug for LifespanHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifespanHook::Sync(_) => f.write_str("LifespanHook::Sync"),
            LifespanHook::Async(_) => f.write_str("LifespanHook::Async"),
        }
    }
}
