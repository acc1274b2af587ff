//! Arena of video factories and children loaders.
//!
//! Nodes keep a copyable handle instead of a closure, so a factory never
//! captures the node it fills and the tree stays free of reference
//! cycles. The registry is shared (`Clone` is an `Arc` bump) between the
//! provider that builds the tree and the [`Resolver`](super::Resolver)
//! that runs it.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{EngineError, Result};

use super::node::{File, Folder, TreeNode};
use super::video::{FileId, MediaSet};

/// Produces the media of one [`File`]. Runs at most once per File.
#[async_trait]
pub trait VideoFactory: Send + Sync {
    async fn produce(&self, file: &File, cancel: &CancellationToken) -> Result<MediaSet>;
}

/// Produces the children of one lazily loaded [`Folder`].
#[async_trait]
pub trait ChildrenLoader: Send + Sync {
    async fn load(&self, folder: &Folder, cancel: &CancellationToken) -> Result<Vec<TreeNode>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderHandle(usize);

/// What a closure factory gets to see of its File.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub id: FileId,
    pub link: Option<Url>,
    pub cancel: CancellationToken,
}

struct FnFactory<F>(F);

#[async_trait]
impl<F, Fut> VideoFactory for FnFactory<F>
where
    F: Fn(FileContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<MediaSet>> + Send + 'static,
{
    async fn produce(&self, file: &File, cancel: &CancellationToken) -> Result<MediaSet> {
        let context = FileContext {
            id: file.id().clone(),
            link: file.link().cloned(),
            cancel: cancel.clone(),
        };
        (self.0)(context).await
    }
}

#[derive(Default)]
struct Slots {
    factories: Vec<Arc<dyn VideoFactory>>,
    loaders: Vec<Arc<dyn ChildrenLoader>>,
}

#[derive(Clone, Default)]
pub struct FactoryRegistry {
    slots: Arc<RwLock<Slots>>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("FactoryRegistry")
            .field("factories", &slots.factories.len())
            .field("loaders", &slots.loaders.len())
            .finish()
    }
}

impl FactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, factory: Arc<dyn VideoFactory>) -> FactoryHandle {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.factories.push(factory);
        FactoryHandle(slots.factories.len() - 1)
    }

    /// Register an async closure as a factory.
    pub fn register_fn<F, Fut>(&self, factory: F) -> FactoryHandle
    where
        F: Fn(FileContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MediaSet>> + Send + 'static,
    {
        self.register(Arc::new(FnFactory(factory)))
    }

    pub fn register_loader(&self, loader: Arc<dyn ChildrenLoader>) -> LoaderHandle {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.loaders.push(loader);
        LoaderHandle(slots.loaders.len() - 1)
    }

    pub fn factory(&self, handle: FactoryHandle) -> Result<Arc<dyn VideoFactory>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.factories.get(handle.0).cloned().ok_or_else(|| {
            EngineError::InvalidTree(format!("unknown factory handle {}", handle.0))
        })
    }

    pub fn loader(&self, handle: LoaderHandle) -> Result<Arc<dyn ChildrenLoader>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.loaders.get(handle.0).cloned().ok_or_else(|| {
            EngineError::InvalidTree(format!("unknown loader handle {}", handle.0))
        })
    }
}
