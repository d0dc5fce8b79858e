//! Upload destinations.
//!
//! Two upload roots are served:
//!
//! - **Chroot** uploads keep the field name's directory structure: `tools/linux/run.sh` lands at
//!   `<chroot>/tools/linux/run.sh`.
//! - **Flat** uploads collapse the field name into one file directly under the uploads root:
//!   `tools/linux/run.sh` lands at `<uploads>/tools_linux_run.sh`.
//!
//! A request carries several fields. Every field name is resolved before anything is written, so
//! a request with one escaping name is rejected without touching the filesystem.

use crate::CoreResult;
use redkit_files::{ChrootService, ContainedPath, Materialized};
use std::io::Read;
use std::path::Path;

/// How field names map onto the filesystem
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadMode {
    Chroot,
    Flat,
}

/// Upload materialization for the chroot and flat roots
#[derive(Clone, Debug)]
pub struct UploadService {
    chroot: ChrootService,
    uploads: ChrootService,
}

impl UploadService {
    /// Creates both upload roots if they do not exist.
    pub fn new(chroot_dir: &Path, uploads_dir: &Path) -> CoreResult<Self> {
        Ok(Self {
            chroot: ChrootService::new(chroot_dir)?,
            uploads: ChrootService::new(uploads_dir)?,
        })
    }

    pub fn chroot(&self) -> &ChrootService {
        &self.chroot
    }

    pub fn uploads(&self) -> &ChrootService {
        &self.uploads
    }

    /// Resolves a field name to its destination under the root for `mode`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Files(FilesError::InvalidPath)` if the name escapes the root, or in
    /// flat mode if it names a directory.
    pub fn destination(&self, mode: UploadMode, name: &str) -> CoreResult<ContainedPath> {
        let path = match mode {
            UploadMode::Chroot => self.chroot.resolve(name)?,
            UploadMode::Flat => self.uploads.flatten(name)?,
        };
        Ok(path)
    }

    /// Writes each field's parts, in order, to its destination.
    ///
    /// `fields` holds one entry per distinct field name, in the order the names were first seen.
    /// Directory-only names create their directories and produce no summary.
    ///
    /// # Returns
    ///
    /// One [`Materialized`] summary per file written.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error before any write happens, or the first filesystem
    /// error; files written before that error remain.
    pub fn materialize<R: Read>(
        &self,
        mode: UploadMode,
        fields: Vec<(String, Vec<R>)>,
    ) -> CoreResult<Vec<Materialized>> {
        let resolved = fields
            .into_iter()
            .map(|(name, parts)| Ok((self.destination(mode, &name)?, parts)))
            .collect::<CoreResult<Vec<_>>>()?;

        let service = match mode {
            UploadMode::Chroot => &self.chroot,
            UploadMode::Flat => &self.uploads,
        };

        let mut written = Vec::with_capacity(resolved.len());
        for (path, parts) in resolved {
            match service.write_file(&path, parts)? {
                Some(summary) => written.push(summary),
                None => tracing::debug!("created directory {}", path),
            }
        }

        Ok(written)
    }
}
