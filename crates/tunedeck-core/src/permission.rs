//! Seam to the platform permission layer.

/// Kind of filesystem access requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read the user's library roots.
    ReadLibrary,
    /// Write into the managed download directory.
    WriteDownloads,
}

impl Access {
    /// Short description used in error messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::ReadLibrary => "read music library",
            Self::WriteDownloads => "write download directory",
        }
    }
}

/// Grants or denies filesystem access.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionGate: Send + Sync {
    /// Whether `access` is currently granted.
    fn is_granted(&self, access: Access) -> bool;
}

/// Gate that grants everything, for platforms without runtime permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn is_granted(&self, _access: Access) -> bool {
        true
    }
}
