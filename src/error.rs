use thiserror::Error;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Directory does not exist: {0}")]
    NoSuchDirectory(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Corrupt index: {message} (resource={resource})")]
    Corrupt { message: String, resource: String },

    #[error("Read past EOF: {resource}")]
    EndOfFile { resource: String },

    #[error("Format version is too old (resource={resource}): {version} (needs to be between {min} and {max})")]
    IndexFormatTooOld {
        resource: String,
        version: i32,
        min: i32,
        max: i32,
    },

    #[error("Format version is too new (resource={resource}): {version} (needs to be between {min} and {max})")]
    IndexFormatTooNew {
        resource: String,
        version: i32,
        min: i32,
        max: i32,
    },

    #[error("Lock obtain timed out: {lock}{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    LockObtainFailed {
        lock: String,
        reason: Option<String>,
    },

    #[error("Failed to release lock {lock}: {reason}")]
    LockReleaseFailed { lock: String, reason: String },

    #[error("{0} is already closed")]
    AlreadyClosed(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Build a corruption error tied to the resource it was detected in
    pub fn corrupt(message: impl Into<String>, resource: impl Into<String>) -> Self {
        StoreError::Corrupt {
            message: message.into(),
            resource: resource.into(),
        }
    }

    pub fn eof(resource: impl Into<String>) -> Self {
        StoreError::EndOfFile {
            resource: resource.into(),
        }
    }

    /// Map an OS error for `name`, turning a missing file into `NotFound`
    pub fn from_io(err: std::io::Error, name: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            std::io::ErrorKind::UnexpectedEof => StoreError::eof(name),
            _ => StoreError::Io(err),
        }
    }

    /// Check if this error reports a missing file or directory
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::NoSuchDirectory(_)
        )
    }

    /// Check if this error means persisted bytes cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt { .. }
                | StoreError::EndOfFile { .. }
                | StoreError::IndexFormatTooOld { .. }
                | StoreError::IndexFormatTooNew { .. }
        )
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::LockObtainFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("_0.cfs".to_string());
        assert_eq!(err.to_string(), "File not found: _0.cfs");

        let err = StoreError::LockObtainFailed {
            lock: "write.lock".to_string(),
            reason: Some("held elsewhere".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Lock obtain timed out: write.lock: held elsewhere"
        );

        let err = StoreError::LockObtainFailed {
            lock: "write.lock".to_string(),
            reason: None,
        };
        assert_eq!(err.to_string(), "Lock obtain timed out: write.lock");
    }

    #[test]
    fn test_classification() {
        assert!(StoreError::NotFound("a".into()).is_not_found());
        assert!(StoreError::NoSuchDirectory("/x".into()).is_not_found());
        assert!(StoreError::corrupt("bad magic", "a.cfs").is_corruption());
        assert!(StoreError::eof("a").is_corruption());
        assert!(!StoreError::NotFound("a".into()).is_corruption());
        assert!(StoreError::LockObtainFailed {
            lock: "l".into(),
            reason: None
        }
        .is_retriable());
        assert!(!StoreError::IllegalState("x".into()).is_retriable());
    }

    #[test]
    fn test_from_io_maps_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            StoreError::from_io(err, "seg.fdt"),
            StoreError::NotFound(name) if name == "seg.fdt"
        ));
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(StoreError::from_io(err, "x"), StoreError::Io(_)));
    }
}
