//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Request handlers never read environment variables; everything they
//! need is carried by [`CoreConfig`].

use crate::constants::{
    DEFAULT_BIN_DIR, DEFAULT_CHROOT_DIR, DEFAULT_KITS_DIR, DEFAULT_REST_ADDR,
    DEFAULT_UPLOADS_DIR, DEFAULT_UPLOAD_LIMIT_BYTES,
};
use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Environment variable naming the REST listen address.
pub const ENV_REST_ADDR: &str = "REDKIT_REST_ADDR";
/// Environment variable naming the chroot upload root.
pub const ENV_CHROOT_DIR: &str = "REDKIT_CHROOT_DIR";
/// Environment variable naming the flat upload root.
pub const ENV_UPLOADS_DIR: &str = "REDKIT_UPLOADS_DIR";
/// Environment variable naming the kits directory.
pub const ENV_KITS_DIR: &str = "REDKIT_KITS_DIR";
/// Environment variable naming the static `/bin/` directory.
pub const ENV_BIN_DIR: &str = "REDKIT_BIN_DIR";
/// Environment variable holding the upload body limit in bytes.
pub const ENV_UPLOAD_LIMIT_BYTES: &str = "REDKIT_UPLOAD_LIMIT_BYTES";

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    rest_addr: String,
    chroot_dir: PathBuf,
    uploads_dir: PathBuf,
    kits_dir: PathBuf,
    bin_dir: PathBuf,
    upload_limit_bytes: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the address is blank, a directory is empty, or the
    /// upload limit is zero.
    pub fn new(
        rest_addr: String,
        chroot_dir: PathBuf,
        uploads_dir: PathBuf,
        kits_dir: PathBuf,
        bin_dir: PathBuf,
        upload_limit_bytes: usize,
    ) -> CoreResult<Self> {
        if rest_addr.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "rest_addr cannot be empty".into(),
            ));
        }

        for (name, dir) in [
            ("chroot_dir", &chroot_dir),
            ("uploads_dir", &uploads_dir),
            ("kits_dir", &kits_dir),
            ("bin_dir", &bin_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(CoreError::InvalidConfig(format!("{name} cannot be empty")));
            }
        }

        if upload_limit_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "upload_limit_bytes must be greater than zero".into(),
            ));
        }

        Ok(Self {
            rest_addr,
            chroot_dir,
            uploads_dir,
            kits_dir,
            bin_dir,
            upload_limit_bytes,
        })
    }

    /// Builds the configuration from the process environment, applying defaults.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, applying defaults.
    ///
    /// Blank values are treated as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let dir = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or_else(|| default.into()));

        Self::new(
            get(ENV_REST_ADDR).unwrap_or_else(|| DEFAULT_REST_ADDR.into()),
            dir(ENV_CHROOT_DIR, DEFAULT_CHROOT_DIR),
            dir(ENV_UPLOADS_DIR, DEFAULT_UPLOADS_DIR),
            dir(ENV_KITS_DIR, DEFAULT_KITS_DIR),
            dir(ENV_BIN_DIR, DEFAULT_BIN_DIR),
            upload_limit_from_env_value(get(ENV_UPLOAD_LIMIT_BYTES))?,
        )
    }

    pub fn rest_addr(&self) -> &str {
        &self.rest_addr
    }

    pub fn chroot_dir(&self) -> &Path {
        &self.chroot_dir
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn kits_dir(&self) -> &Path {
        &self.kits_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_bytes
    }
}

/// Parse the upload body limit from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_UPLOAD_LIMIT_BYTES`].
pub fn upload_limit_from_env_value(value: Option<String>) -> CoreResult<usize> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match value {
        None => Ok(DEFAULT_UPLOAD_LIMIT_BYTES),
        Some(v) => v.parse::<usize>().map_err(|e| {
            CoreError::InvalidConfig(format!("{ENV_UPLOAD_LIMIT_BYTES}={v:?} is not a byte count: {e}"))
        }),
    }
}
