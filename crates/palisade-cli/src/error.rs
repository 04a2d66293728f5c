// ── CLI error type ──
//
// Wraps core errors with sysexits-style exit codes so scripts can
// distinguish "needs root" from "device cannot do this".

use miette::Diagnostic;
use thiserror::Error;

use palisade_core::{CoreError, ErrorKind};

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("cannot read {path}: {reason}")]
    Input { path: String, reason: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(e) => match e.kind() {
                ErrorKind::PrivilegeRequired => 77,
                ErrorKind::UnsupportedDevice => 69,
                _ => 1,
            },
            Self::Input { .. } => 66,
        }
    }
}
