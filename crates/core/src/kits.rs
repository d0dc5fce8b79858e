//! Kit lookup and export planning.
//!
//! A kit is a directory under the kits root whose `bin/` subdirectory gets exported as a ZIP:
//!
//! ```text
//! kits/
//! ├── bin/            # served for a request without a kit name
//! ├── linux/
//! │   └── bin/        # GET /kit/linux
//! │       ├── tool -> /opt/build/tool
//! │       └── README
//! └── windows/
//!     └── bin/
//! ```
//!
//! Kit names come from request URLs and are resolved as a single path segment, so a kit name can
//! never reach outside the kits root. Kit directories and their `bin/` may themselves be symlinks.

use crate::constants::KIT_BIN_DIR_NAME;
use crate::{CoreError, CoreResult};
use redkit_files::archive::{self, ArchivePlan};
use redkit_files::paths;
use redkit_files::symlink::resolve_real;
use redkit_files::FilesError;
use std::fs;
use std::path::{Path, PathBuf};

/// A kit ready to be streamed.
#[derive(Debug, Clone)]
pub struct KitExport {
    /// Kit name, or `None` for the top-level `bin/`
    pub name: Option<String>,

    /// Archive contents, planned before any bytes are sent
    pub plan: ArchivePlan,
}

impl KitExport {
    /// File name suggested to clients downloading this export.
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.name.as_deref().unwrap_or("kit"))
    }
}

/// Read-only access to the kits directory
#[derive(Clone, Debug)]
pub struct KitService {
    kits_dir: PathBuf,
}

impl KitService {
    /// Creates a service over `kits_dir`, creating the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Files` if `kits_dir` cannot be created or canonicalized.
    pub fn new(kits_dir: &Path) -> CoreResult<Self> {
        fs::create_dir_all(kits_dir).map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot create directory {}: {}",
                kits_dir.display(),
                e
            ))
        })?;
        let kits_dir = kits_dir.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                kits_dir.display(),
                e
            ))
        })?;

        Ok(Self { kits_dir })
    }

    /// Opens an existing kits directory without creating anything.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Files(FilesError::InvalidRootDirectory)` if `kits_dir` is missing or
    /// is not a directory.
    pub fn open(kits_dir: &Path) -> CoreResult<Self> {
        if !kits_dir.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Kits directory does not exist: {}",
                kits_dir.display()
            ))
            .into());
        }
        let kits_dir = kits_dir.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                kits_dir.display(),
                e
            ))
        })?;

        Ok(Self { kits_dir })
    }

    pub fn kits_dir(&self) -> &Path {
        &self.kits_dir
    }

    /// Lists kits that have an exportable `bin/` directory, sorted by name.
    ///
    /// Entries that cannot be resolved (dangling or cyclic links) are skipped with a warning, and
    /// so are names that are not valid UTF-8.
    pub fn list_kits(&self) -> CoreResult<Vec<String>> {
        let entries = fs::read_dir(&self.kits_dir)
            .map_err(|e| FilesError::Filesystem {
                path: self.kits_dir.clone(),
                source: e,
            })?;

        let mut kits = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FilesError::Filesystem {
                path: self.kits_dir.clone(),
                source: e,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!("skipping kit with non UTF-8 name: {:?}", entry.file_name());
                continue;
            };
            if name == KIT_BIN_DIR_NAME {
                continue;
            }

            match has_bin_dir(&entry.path()) {
                Ok(true) => kits.push(name),
                Ok(false) => {}
                Err(e) => tracing::warn!("skipping kit {}: {}", name, e),
            }
        }

        kits.sort();
        Ok(kits)
    }

    /// Locates the `bin/` directory of kit `name`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `CoreError::Files(FilesError::InvalidPath)` if `name` is not a single path segment
    /// - `CoreError::KitNotFound` if the kit or its `bin/` does not exist or is not a directory
    /// - `CoreError::Export` if the `bin/` link chain cannot be resolved
    pub fn kit_bin_dir(&self, name: &str) -> CoreResult<PathBuf> {
        let kit = paths::resolve_segment(&self.kits_dir, name)?;
        if name == KIT_BIN_DIR_NAME {
            return Err(CoreError::KitNotFound(name.to_string()));
        }
        export_root(name, kit.absolute().join(KIT_BIN_DIR_NAME))
    }

    /// Locates the top-level `bin/` directory of the kits root.
    pub fn default_bin_dir(&self) -> CoreResult<PathBuf> {
        export_root(KIT_BIN_DIR_NAME, self.kits_dir.join(KIT_BIN_DIR_NAME))
    }

    /// Walks the export directory for `name` (or the top-level `bin/`) and plans its archive.
    ///
    /// Planning resolves every symlink up front, so link failures are reported here rather than
    /// part way through streaming.
    pub fn plan_export(&self, name: Option<&str>) -> CoreResult<KitExport> {
        let bin = match name {
            Some(name) => self.kit_bin_dir(name)?,
            None => self.default_bin_dir()?,
        };

        tracing::info!("planning export of {}", bin.display());
        let plan = archive::plan(&bin).map_err(|source| CoreError::Export {
            kit: name.unwrap_or(KIT_BIN_DIR_NAME).to_string(),
            source,
        })?;

        Ok(KitExport {
            name: name.map(str::to_owned),
            plan,
        })
    }
}

/// Checks that `bin` resolves to a directory.
fn export_root(name: &str, bin: PathBuf) -> CoreResult<PathBuf> {
    match resolve_real(&bin) {
        Ok(resolved) if resolved.is_dir() => Ok(bin),
        Ok(_) => Err(CoreError::KitNotFound(name.to_string())),
        Err(e) if e.is_not_found() => Err(CoreError::KitNotFound(name.to_string())),
        Err(source) => Err(CoreError::Export {
            kit: name.to_string(),
            source,
        }),
    }
}

fn has_bin_dir(kit: &Path) -> Result<bool, FilesError> {
    let resolved = resolve_real(kit)?;
    if !resolved.is_dir() {
        return Ok(false);
    }

    match resolve_real(&resolved.path().join(KIT_BIN_DIR_NAME)) {
        Ok(bin) => Ok(bin.is_dir()),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kit(root: &Path, name: &str, files: &[(&str, &[u8])]) {
        let bin = root.join(name).join(KIT_BIN_DIR_NAME);
        fs::create_dir_all(&bin).unwrap();
        for (file, content) in files {
            fs::write(bin.join(file), content).unwrap();
        }
    }

    #[test]
    fn test_new_creates_missing_kits_dir() {
        let temp = TempDir::new().unwrap();
        let service = KitService::new(&temp.path().join("kits")).unwrap();

        assert!(service.kits_dir().is_dir());
        assert!(service.list_kits().unwrap().is_empty());
    }

    #[test]
    fn test_list_kits_only_includes_kits_with_bin() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        kit(&root, "windows", &[("a.exe", b"MZ")]);
        kit(&root, "linux", &[("a", b"ELF")]);
        fs::create_dir_all(root.join("nobin/lib")).unwrap();
        fs::write(root.join("stray.txt"), b"x").unwrap();
        fs::create_dir_all(root.join(KIT_BIN_DIR_NAME)).unwrap();

        let service = KitService::new(&root).unwrap();

        assert_eq!(service.list_kits().unwrap(), vec!["linux", "windows"]);
    }

    #[test]
    fn test_plan_export_for_named_kit() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        kit(&root, "linux", &[("tool", b"binary"), ("empty", b"")]);
        let service = KitService::new(&root).unwrap();

        let export = service.plan_export(Some("linux")).unwrap();

        assert_eq!(export.file_name(), "linux.zip");
        assert_eq!(export.plan.len(), 1);
        assert_eq!(export.plan.entries()[0].name, "tool");
    }

    #[test]
    fn test_plan_export_for_default_bin() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/common"), b"shared").unwrap();
        let service = KitService::new(&root).unwrap();

        let export = service.plan_export(None).unwrap();

        assert_eq!(export.file_name(), "kit.zip");
        assert_eq!(export.plan.entries()[0].name, "common");
    }

    #[test]
    fn test_unknown_kit_is_not_found() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        fs::create_dir_all(root.join("nobin")).unwrap();
        let service = KitService::new(&root).unwrap();

        assert!(matches!(
            service.plan_export(Some("missing")),
            Err(CoreError::KitNotFound(_))
        ));
        assert!(matches!(
            service.plan_export(Some("nobin")),
            Err(CoreError::KitNotFound(_))
        ));
        assert!(service.plan_export(None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_kit_name_cannot_escape_kits_dir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        kit(temp.path(), "outside", &[("secret", b"s")]);
        let service = KitService::new(&root).unwrap();

        for name in ["..", "../outside", "a/b", ""] {
            let err = service.plan_export(Some(name)).unwrap_err();
            assert!(err.is_rejection(), "{name:?}: {err}");
        }
    }

    #[test]
    fn test_open_does_not_create_kits_dir() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("kits");

        assert!(KitService::open(&missing).is_err());
        assert!(!missing.exists());

        fs::create_dir_all(missing.join("linux/bin")).unwrap();
        let service = KitService::open(&missing).unwrap();
        assert_eq!(service.list_kits().unwrap(), vec!["linux"]);
    }

    #[test]
    fn test_bin_that_is_a_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        fs::create_dir_all(root.join("filebin")).unwrap();
        fs::write(root.join("filebin").join(KIT_BIN_DIR_NAME), b"not a dir").unwrap();
        fs::write(root.join(KIT_BIN_DIR_NAME), b"not a dir").unwrap();
        let service = KitService::new(&root).unwrap();

        for name in [Some("filebin"), None] {
            let err = service.plan_export(name).unwrap_err();
            assert!(matches!(err, CoreError::KitNotFound(_)), "{name:?}: {err}");
            assert!(!err.is_rejection());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_entry_inside_listed_kit_is_export_failure() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        kit(&root, "linux", &[("tool", b"tool")]);
        std::os::unix::fs::symlink("nowhere", root.join("linux/bin/broken")).unwrap();
        let service = KitService::new(&root).unwrap();

        assert_eq!(service.list_kits().unwrap(), vec!["linux"]);
        let err = service.plan_export(Some("linux")).unwrap_err();
        assert!(matches!(err, CoreError::Export { .. }), "{err}");
        assert!(!err.is_not_found());
        assert!(!err.is_rejection());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_kit_is_listed_and_exported() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("kits");
        fs::create_dir_all(&root).unwrap();
        kit(temp.path(), "build-output", &[("tool", b"tool")]);
        std::os::unix::fs::symlink(temp.path().join("build-output"), root.join("linux")).unwrap();
        std::os::unix::fs::symlink("nowhere", root.join("broken")).unwrap();
        let service = KitService::new(&root).unwrap();

        assert_eq!(service.list_kits().unwrap(), vec!["linux"]);
        let export = service.plan_export(Some("linux")).unwrap();
        assert_eq!(export.plan.entries()[0].name, "tool");
    }
}
