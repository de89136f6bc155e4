//! Error kinds for the scanning/R/W/freeze core.
//!
//! Mirrors the failure taxonomy the engine is required to surface: most
//! variants are recoverable at the call site (skip a region, drop a slot,
//! warn the operator) rather than fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot access target process {pid}: {reason}")]
    TargetInaccessible { pid: i32, reason: String },

    #[error("partial transfer at {addr:#x}: requested {requested}, got {got}")]
    PartialTransfer {
        addr: usize,
        requested: usize,
        got: usize,
    },

    #[error("permission denied for region at {addr:#x}")]
    PermissionDenied { addr: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("no initial scan has been performed yet")]
    NoInitialScan,

    #[error("freeze worker for {addr:#x} failed repeatedly: {reason}")]
    FreezeFailure { addr: usize, reason: String },
}
