//! Lazily materialized content tree.
//!
//! ```text
//! Folder (Item)
//! ├── Folder (Season 1)
//! │   ├── File  Episode 1   ── Pending(factory) → [Video 1080p, Video 720p]
//! │   └── File  Episode 2
//! └── Folder (Season 2)     ── Pending(loader)
//! ```
//!
//! Providers build the tree while parsing a page; consumers walk it with a
//! [`Resolver`], which runs each File's factory and each lazy Folder's
//! loader at most once.

mod node;
mod registry;
mod resolver;
mod video;

pub use node::{
    ChildrenSource, EpisodeRange, File, FileBuilder, FileState, Folder, FolderType,
    PositionBehavior, PositionSource, TreeNode, VideoSource,
};
pub use registry::{
    ChildrenLoader, FactoryHandle, FactoryRegistry, FileContext, LoaderHandle, VideoFactory,
};
pub use resolver::Resolver;
pub use video::{AudioTrack, FileId, MediaSet, Quality, SubtitleTrack, Video};
