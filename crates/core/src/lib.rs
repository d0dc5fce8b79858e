//! redkit core services
//!
//! Services shared by the REST server and the CLI. They hold no request state; each is built once
//! from [`CoreConfig`] and cloned into whatever needs it.
//!
//! - [`UploadService`] materializes multipart uploads under the chroot or flat upload root
//! - [`KitService`] lists kits and plans their `bin/` exports
//!
//! Filesystem work itself lives in `redkit_files`; this crate decides which root a request
//! targets and what counts as a kit.

pub mod config;
mod constants;
mod error;
pub mod kits;
pub mod uploads;

pub use config::CoreConfig;
pub use constants::*;
pub use error::{CoreError, CoreResult};
pub use kits::{KitExport, KitService};
pub use uploads::{UploadMode, UploadService};

pub use redkit_files;
