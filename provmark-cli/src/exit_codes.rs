//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts and CI systems to handle errors appropriately.

use provmark_core::ProvmarkError;

use crate::commands::SessionFailure;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (unparseable or inconsistent video).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Service unavailable (watermark service, decoder).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// Internal software error (signing, reassembly).
/// Maps to EX_SOFTWARE from sysexits.h.
pub const SOFTWARE_ERROR: i32 = 70;

/// I/O error (cannot write output file, catalog).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Configuration error (missing signing credentials).
/// Maps to EX_CONFIG from sysexits.h.
pub const CONFIG_ERROR: i32 = 78;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Typed errors first, then classify by context messages
        let typed = err.chain().find_map(|cause| {
            if let Some(failure) = cause.downcast_ref::<SessionFailure>() {
                Some(for_error_code(failure.code))
            } else {
                cause
                    .downcast_ref::<ProvmarkError>()
                    .map(|e| for_error_code(e.code()))
            }
        });

        let code = typed.unwrap_or_else(|| {
            if message.contains("No watermark backend") {
                USAGE_ERROR
            } else if message.contains("Failed to read file") {
                INPUT_ERROR
            } else if message.contains("Failed to write") || message.contains("catalog") {
                IO_ERROR
            } else if message.contains("signer") || message.contains("credentials") {
                CONFIG_ERROR
            } else {
                GENERAL_ERROR
            }
        });

        Self {
            code,
            message: Some(message),
        }
    }
}

/// Exit code for a machine error code recorded on a failed session.
pub fn for_error_code(code: &str) -> i32 {
    match code {
        "INVALID_ASSET" => DATA_ERROR,
        "EMBEDDING_FAILED" | "DECODE_UNAVAILABLE" => UNAVAILABLE,
        "REASSEMBLY_FAILED" | "SIGNING_FAILED" | "INTERNAL_ERROR" => SOFTWARE_ERROR,
        "STORAGE_ERROR" | "CATALOG_ERROR" => IO_ERROR,
        _ => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_session_failure_codes() {
        let err = anyhow::Error::new(SessionFailure {
            code: "EMBEDDING_FAILED",
            message: "chunk 3 timed out".into(),
        });
        assert_eq!(ExitCode::from_anyhow(&err).code, UNAVAILABLE);
    }

    #[test]
    fn test_provmark_error_in_chain() {
        let err: anyhow::Result<()> =
            Err(ProvmarkError::InvalidAsset("no frames".into())).context("Failed to plan chunks");
        let exit = ExitCode::from_anyhow(&err.unwrap_err());
        assert_eq!(exit.code, DATA_ERROR);
        assert!(exit.message.unwrap().contains("no frames"));
    }

    #[test]
    fn test_context_classification() {
        let err = anyhow::anyhow!("missing").context("Failed to read file: clip.ivf");
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);

        let err = anyhow::anyhow!("disk full").context("Failed to write output: out.ivf");
        assert_eq!(ExitCode::from_anyhow(&err).code, IO_ERROR);

        let err = anyhow::anyhow!("something odd");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
