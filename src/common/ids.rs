//! Identifiers handed to the engine for diagnostics.

use std::ffi::CString;
use std::fmt;

use uuid::Uuid;

/// Opaque token tying one callback registration to foreign-side logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Hyphenated form, as passed across the boundary.
    pub fn to_c_string(&self) -> CString {
        // A hyphenated UUID never contains an interior nul.
        CString::new(self.0.hyphenated().to_string()).unwrap_or_default()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
