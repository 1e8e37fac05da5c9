//! Crate-wide error classification.
//!
//! Module errors stay specific; boundaries only need to know which bucket a
//! failure falls into to pick a response code.

use std::fmt;

/// Broad category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller sent something malformed; nothing was persisted.
    Validation,
    /// A requested mask or action does not exist.
    NotFound,
    /// The export target format is not recognised. Exports still succeed with
    /// the unaligned mask, so this is reported as a warning, never returned.
    UnsupportedFormat,
    /// The project configuration cannot serve the request.
    Config,
    /// Reading or writing the mask store failed.
    Io,
    /// Anything else, including training failures.
    Internal,
}

impl ErrorKind {
    /// HTTP-style status for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::UnsupportedFormat => 415,
            Self::Config | Self::Io | Self::Internal => 500,
        }
    }

    /// Process exit code for command line front ends.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Validation => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation error",
            Self::NotFound => "not found",
            Self::UnsupportedFormat => "unsupported format",
            Self::Config => "configuration error",
            Self::Io => "i/o error",
            Self::Internal => "internal error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_and_exit_codes() {
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::UnsupportedFormat.status_code(), 415);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
        assert_eq!(ErrorKind::Validation.exit_code(), 2);
        assert_eq!(ErrorKind::NotFound.exit_code(), 1);
    }
}
