//! Core value types shared by every `bsync` crate.
//!
//! - [`Label`]: canonical Bazel target identifier
//! - [`TargetInfo`]: raw target descriptor produced by Bazel queries/aspects
//! - [`Hash128`] / [`Hasher128`]: 128-bit fingerprints used for change detection and hashed keys

mod hash;
mod label;
mod target;

pub use hash::{Hash128, HashInto, Hasher128};
pub use label::Label;
pub use target::{
    AttributeValue, CppTargetData, Dependency, DependencyKind, GoTargetData, JvmTargetData,
    KotlinTargetData, ProtobufTargetData, PythonTargetData, TargetData, TargetInfo,
    ThriftTargetData,
};
