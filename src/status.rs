//! Status codes for index operations and completion callbacks.

use std::fmt;

/// Result code delivered to ready-callbacks and async completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Status {
    /// Operation completed successfully.
    #[default]
    Ok = 0,
    /// The entry was not found in the backing store.
    NotFound = 1,
    /// I/O error reported by a collaborator.
    IoError = 2,
    /// The index was destroyed before the operation could complete.
    Aborted = 3,
}

impl Status {
    /// Check if the status indicates success.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if the status indicates an error.
    #[inline]
    pub const fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Get the status as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::NotFound => "NotFound",
            Status::IoError => "IoError",
            Status::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
