use redkit_files::FilesError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("kit not found: {0}")]
    KitNotFound(String),
    /// The export root exists but walking or resolving inside it failed.
    #[error("export of {kit} failed: {source}")]
    Export {
        kit: String,
        #[source]
        source: FilesError,
    },
    #[error(transparent)]
    Files(#[from] FilesError),
}

impl CoreError {
    /// True when the caller asked for something malformed (maps to a client error).
    ///
    /// Failures inside an export tree are never rejections, whatever their underlying kind.
    pub fn is_rejection(&self) -> bool {
        matches!(self, CoreError::Files(e) if e.is_rejection())
    }

    /// True when the requested kit, or its export root, does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::KitNotFound(_) => true,
            CoreError::Files(e) => e.is_not_found(),
            CoreError::InvalidConfig(_) | CoreError::Export { .. } => false,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
