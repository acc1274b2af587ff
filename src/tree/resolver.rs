//! Single-flight resolution of lazy tree nodes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, Result};

use super::node::{tag_videos, ChildrenSource, File, Folder, TreeNode, VideoSource};
use super::registry::FactoryRegistry;
use super::video::{MediaSet, Video};

/// Runs the factories and loaders behind a tree's handles.
///
/// Concurrent callers on the same node share one in-flight call. A factory
/// failure is contained to its File: it is logged and cached as an empty
/// [`MediaSet`]. Cancellation caches nothing, so a later call retries.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    registry: FactoryRegistry,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: FactoryRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    /// Media of a File, produced at most once.
    ///
    /// Only [`EngineError::Canceled`] is returned as an error.
    #[instrument(skip_all, fields(file = %file.id()))]
    pub async fn resolve(&self, file: &File, cancel: &CancellationToken) -> Result<Arc<MediaSet>> {
        // Waiters on another caller's in-flight factory still honor their own token.
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Canceled),
            r = file.media_cell().get_or_try_init(|| self.run_factory(file, cancel)) => r.cloned(),
        }
    }

    /// Videos of a File, produced at most once.
    pub async fn resolve_videos(
        &self,
        file: &File,
        cancel: &CancellationToken,
    ) -> Result<Arc<[Video]>> {
        Ok(self.resolve(file, cancel).await?.videos.clone())
    }

    async fn run_factory(&self, file: &File, cancel: &CancellationToken) -> Result<Arc<MediaSet>> {
        let handle = match file.source() {
            VideoSource::Resolved(media) => return Ok(media.clone()),
            VideoSource::Pending(handle) => *handle,
        };

        let _resolving = file.begin_resolving();
        let factory = match self.registry.factory(handle) {
            Ok(factory) => factory,
            Err(e) => {
                warn!(error = %e, "file has no usable factory");
                return Ok(Arc::new(MediaSet::default()));
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Canceled),
            r = factory.produce(file, cancel) => r,
        };
        match outcome {
            Ok(media) => {
                debug!(videos = media.videos.len(), "file resolved");
                Ok(Arc::new(tag_videos(&media, file.id())))
            }
            Err(EngineError::Canceled) => Err(EngineError::Canceled),
            Err(e) => {
                warn!(error = %e, "video factory failed, file left unplayable");
                Ok(Arc::new(MediaSet::default()))
            }
        }
    }

    /// Children of a Folder, loaded at most once.
    ///
    /// A provider outage yields an empty list (not cached); other loader
    /// errors propagate.
    #[instrument(skip_all, fields(folder = %folder.id()))]
    pub async fn enumerate_children(
        &self,
        folder: &Folder,
        cancel: &CancellationToken,
    ) -> Result<Vec<TreeNode>> {
        let loaded = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Canceled),
            r = folder.children_cell().get_or_try_init(|| self.run_loader(folder, cancel)) => r,
        };
        match loaded {
            Ok(children) => Ok(children.to_vec()),
            Err(e) if e.is_provider_unavailable() => {
                warn!(error = %e, "provider unavailable, no children");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_loader(
        &self,
        folder: &Folder,
        cancel: &CancellationToken,
    ) -> Result<Arc<[TreeNode]>> {
        let handle = match folder.source() {
            ChildrenSource::Loaded => return Ok(Arc::from(Vec::new())),
            ChildrenSource::Pending(handle) => *handle,
        };
        let loader = self.registry.loader(handle)?;
        let children = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Canceled),
            r = loader.load(folder, cancel) => r?,
        };
        debug!(children = children.len(), "folder loaded");
        Ok(children.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ChildrenLoader, FileContext, FileState, FolderType, Quality};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    fn video(u: &str) -> Video {
        Video::new(vec![Url::parse(u).unwrap()], Quality::parse("1080p")).unwrap()
    }

    fn counting_factory(
        registry: &FactoryRegistry,
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    ) -> crate::tree::FactoryHandle {
        registry.register_fn(move |_ctx: FileContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                if fail {
                    return Err(EngineError::Decode("garbled playlist".into()));
                }
                Ok(MediaSet::new(vec![video("https://cdn/e1.mp4")]))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_factory_call() {
        let registry = FactoryRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counting_factory(&registry, calls.clone(), Duration::from_millis(50), false);
        let file = File::builder("e1", "Episode 1").factory(handle).build().unwrap();
        let resolver = Resolver::new(registry);
        let cancel = CancellationToken::new();

        let results =
            futures::future::join_all((0..16).map(|_| resolver.resolve(&file, &cancel))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
        }
        assert_eq!(first.videos[0].file_id().unwrap().as_str(), "e1");
        assert_eq!(file.state(), FileState::Resolved);

        resolver.resolve_videos(&file, &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_resolving_while_factory_runs() {
        let registry = FactoryRegistry::new();
        let handle = counting_factory(
            &registry,
            Arc::new(AtomicUsize::new(0)),
            Duration::from_millis(100),
            false,
        );
        let file = File::builder("e1", "Episode 1").factory(handle).build().unwrap();
        let resolver = Resolver::new(registry);
        assert_eq!(file.state(), FileState::Unresolved);

        let cancel = CancellationToken::new();
        let (resolved, ()) = tokio::join!(resolver.resolve(&file, &cancel), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(file.state(), FileState::Resolving);
        });
        resolved.unwrap();
        assert_eq!(file.state(), FileState::Resolved);
    }

    #[tokio::test]
    async fn factory_failure_is_cached_as_empty() {
        let registry = FactoryRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counting_factory(&registry, calls.clone(), Duration::ZERO, true);
        let file = File::builder("e1", "Episode 1").factory(handle).build().unwrap();
        let resolver = Resolver::new(registry);
        let cancel = CancellationToken::new();

        assert!(resolver.resolve_videos(&file, &cancel).await.unwrap().is_empty());
        assert!(resolver.resolve_videos(&file, &cancel).await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.state(), FileState::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_leaves_file_unresolved() {
        let registry = FactoryRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counting_factory(&registry, calls.clone(), Duration::from_secs(10), false);
        let file = File::builder("e1", "Episode 1").factory(handle).build().unwrap();
        let resolver = Resolver::new(registry);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let err = resolver.resolve(&file, &cancel).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(file.state(), FileState::Unresolved);

        let videos = resolver
            .resolve_videos(&file, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_can_cancel_while_another_caller_resolves() {
        let registry = FactoryRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counting_factory(&registry, calls.clone(), Duration::from_secs(10), false);
        let file = File::builder("e1", "Episode 1").factory(handle).build().unwrap();
        let resolver = Resolver::new(registry);

        let owner = CancellationToken::new();
        let waiter = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let (first, second, ()) = tokio::join!(
            resolver.resolve(&file, &owner),
            async {
                let r = resolver.resolve(&file, &waiter).await;
                (r, start.elapsed())
            },
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                waiter.cancel();
            }
        );

        let (waited, after) = second;
        assert!(waited.unwrap_err().is_canceled());
        assert!(after < Duration::from_secs(2), "waiter returned after {after:?}");
        assert_eq!(first.unwrap().videos.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.state(), FileState::Resolved);
    }

    #[tokio::test]
    async fn eager_file_never_touches_registry() {
        let file = File::builder("m", "Movie")
            .videos(vec![video("https://cdn/m.mp4")])
            .build()
            .unwrap();
        let videos = Resolver::default()
            .resolve_videos(&file, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(videos[0].uri().as_str(), "https://cdn/m.mp4");
    }

    struct Seasons {
        calls: AtomicUsize,
        outage: bool,
    }

    #[async_trait]
    impl ChildrenLoader for Seasons {
        async fn load(&self, folder: &Folder, _cancel: &CancellationToken) -> Result<Vec<TreeNode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.outage {
                return Err(EngineError::Transport("connection refused".into()));
            }
            let file = File::builder(format!("{}-e1", folder.id()), "Episode 1")
                .videos(vec![video("https://cdn/e1.mp4")])
                .build()?;
            Ok(vec![file.into()])
        }
    }

    #[tokio::test]
    async fn lazy_children_load_once() {
        let registry = FactoryRegistry::new();
        let loader = Arc::new(Seasons {
            calls: AtomicUsize::new(0),
            outage: false,
        });
        let handle = registry.register_loader(loader.clone());
        let folder = Folder::lazy("s1", "Season 1", FolderType::Season, handle);
        let resolver = Resolver::new(registry);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            resolver.enumerate_children(&folder, &cancel),
            resolver.enumerate_children(&folder, &cancel)
        );
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap()[0].title(), "Episode 1");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(folder.children().is_some());
    }

    #[tokio::test]
    async fn provider_outage_yields_empty_and_retries_later() {
        let registry = FactoryRegistry::new();
        let loader = Arc::new(Seasons {
            calls: AtomicUsize::new(0),
            outage: true,
        });
        let handle = registry.register_loader(loader.clone());
        let folder = Folder::lazy("s1", "Season 1", FolderType::Season, handle);
        let resolver = Resolver::new(registry);
        let cancel = CancellationToken::new();

        assert!(resolver.enumerate_children(&folder, &cancel).await.unwrap().is_empty());
        assert!(resolver.enumerate_children(&folder, &cancel).await.unwrap().is_empty());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert!(folder.children().is_none());
    }

    struct SlowSeasons;

    #[async_trait]
    impl ChildrenLoader for SlowSeasons {
        async fn load(&self, _folder: &Folder, _cancel: &CancellationToken) -> Result<Vec<TreeNode>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![File::builder("e1", "Episode 1")
                .videos(vec![video("https://cdn/e1.mp4")])
                .build()?
                .into()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn children_waiter_can_cancel() {
        let registry = FactoryRegistry::new();
        let handle = registry.register_loader(Arc::new(SlowSeasons));
        let folder = Folder::lazy("s1", "Season 1", FolderType::Season, handle);
        let resolver = Resolver::new(registry);

        let owner = CancellationToken::new();
        let waiter = CancellationToken::new();
        let (first, second, ()) = tokio::join!(
            resolver.enumerate_children(&folder, &owner),
            resolver.enumerate_children(&folder, &waiter),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                waiter.cancel();
            }
        );
        assert!(second.unwrap_err().is_canceled());
        assert_eq!(first.unwrap().len(), 1);
    }
}
