#![deny(unsafe_code)]

//! mimesniff core: content-type detection for files.
//!
//! Two rule databases drive detection. Glob rules map filenames to types by
//! pattern and weight; magic rules recognise types from byte signatures at
//! fixed offsets. [`MimeDatabase`] combines them, and [`RequestDispatcher`]
//! runs classifications on a bounded worker pool with cancellation and a
//! per-file tag cache.

/// Per-file cached type tags (extended attributes).
pub mod cache;
/// Glob and magic arbitration over loaded databases.
pub mod database;
/// Asynchronous, cancellable classification requests.
pub mod dispatch;
/// Load and dispatch errors.
pub mod error;
/// Filename pattern rules.
pub mod glob;
/// Binary signature rules.
pub mod magic;
/// XDG data directory discovery.
pub mod paths;

pub use cache::{NoCache, TagCache, XattrCache};
pub use database::MimeDatabase;
pub use dispatch::{Request, RequestDispatcher, RequestState};
pub use error::{DispatchError, LoadError};
pub use glob::{GlobIndex, GlobMatch, GlobRule};
pub use magic::{MagicRule, MagicRuleSet, MagicSection};
