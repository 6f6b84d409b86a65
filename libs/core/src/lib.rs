//! # imgpull-core
//!
//! Container image pulls through a content-addressable cache.
//!
//! ## Pull flow
//!
//! 1. Refuse to overwrite an existing destination unless forced
//! 2. Resolve the reference to a content identifier ([`Backend::identify`])
//! 3. With the cache enabled, look the identifier up in [`ContentCache`];
//!    corrupt entries are purged and refetched
//! 4. On a miss, fetch into a partial file next to the entry, verify it and
//!    rename it into place
//! 5. Copy the entry to the destination with mode `0755`
//!
//! With the cache disabled, step 3 onwards is replaced by a fetch straight
//! into the destination.
//!
//! ## Cache layout
//!
//! ```text
//! <root>/
//!   library/sha256.<hex>/<name>.sif
//!   shub/<commit>/<name>.sif
//!   oci-tmp/sha256:<hex>/<name>.sif
//!   oras/sha256:<hex>/<name>.sif
//! ```

pub mod backend;
pub mod build;
pub mod cache;
pub mod config;
pub mod digest;
pub mod finalize;
pub mod guard;
pub mod progress;
pub mod puller;
pub mod reference;

pub use backend::{Backend, BackendError, BackendKind, Backends, FetchContext, Resolved};
pub use build::{BuildError, BuildOptions, BuildPipeline, BuildRequest, CommandPipeline};
pub use cache::{CacheError, CacheKey, ContentCache, Namespace};
pub use config::{CacheConfig, Credentials, PullerConfig};
pub use digest::ContentId;
pub use guard::{interrupt_signal, InterruptGuard, INTERRUPT_EXIT_CODE};
pub use progress::{LogProgress, NoProgress, Progress};
pub use puller::{ImagePuller, PullError, PullRequest, PullResult};
pub use reference::logical_name;
