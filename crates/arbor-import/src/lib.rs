//! Plan-driven import of record trees.
//!
//! Groups are loaded from JSON record files, their placeholder tokens are
//! resolved against identifiers saved by earlier groups, and each group is
//! submitted through a [`GroupSaver`]: a composite tree call or a bulk job.

pub mod bulk;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod model;
pub mod saver;

pub use bulk::{BulkOptions, BulkSaver, CachedJob, JobCache};
pub use engine::Importer;
pub use errors::ImportError;
pub use loader::{ContentType, load_file, load_group, resolve_path};
pub use model::{ImportOptions, ImportReport};
pub use saver::{GroupSaver, TreeSaver, correlate, summarize_response};
