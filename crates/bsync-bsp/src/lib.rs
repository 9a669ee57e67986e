//! Build-tool boundary for the sync engine.
//!
//! Two [`BuildServer`] implementations are provided:
//! - [`BspBuildServer`]: JSON-RPC 2.0 over BSP framing, usually a launcher found via
//!   `.bsp/*.json`
//! - [`BazelAspectServer`]: runs Bazel directly and reads one JSON target per output line
//!
//! Both guard their I/O with a sliding [`IdleTimeout`] and honour a
//! [`tokio_util::sync::CancellationToken`].

mod aspect;
mod bsp_server;
mod client;
mod discovery;
mod error;
pub mod protocol;
mod server;
mod timeout;

pub use aspect::{read_targets, AspectCommand, BazelAspectServer};
pub use bsp_server::{target_info_from_bsp, BspBuildServer, ProcessBspServer};
pub use client::{BspClient, DEFAULT_MAX_MESSAGE_BYTES};
pub use discovery::{apply_env_overrides, parse_args, BspConnection, ENV_BSP_ARGS, ENV_BSP_PROGRAM};
pub use error::{BspError, Result};
pub use protocol::BuildEvent;
pub use server::{dependency_closure, BuildServer};
pub use timeout::{IdleTimeout, WindowOutcome};
