//! Target content hashing and change detection between syncs.
//!
//! [`TargetHasher`] fingerprints targets of a [`bsync_graph::DependencyGraph`]; [`HashDiff`]
//! compares the result against the [`HashSnapshot`] stored by the previous sync.

mod diff;
mod hasher;
mod policy;
mod snapshot;

pub use diff::HashDiff;
pub use hasher::{environment_hash, TargetHash, TargetHasher};
pub use policy::{HashMode, HashPolicy};
pub use snapshot::HashSnapshot;
