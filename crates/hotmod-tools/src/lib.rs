//! # hotmod-tools
//!
//! Helpers around the hot-reload core: producing unit artifacts and removing
//! temporary files when the process is done with them.

pub mod artifact;
pub mod cleanup;

pub use artifact::{ArtifactBuilder, ArtifactError, DEFAULT_UNIT_SUFFIX};
pub use cleanup::{CleanupGuard, CleanupRegistry, PurgeReport, register_for_cleanup};
