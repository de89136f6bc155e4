//! Core engine for live-memory scanning of a POSIX/Linux target process.
//!
//! `engine::CheatEngine` is the facade most callers want; the modules below
//! are exposed individually for callers (and tests) that need to drive a
//! single concern directly.

pub mod engine;
pub mod error;
pub mod freezer;
pub mod frontend;
pub mod maps;
pub mod procrw;
pub mod scanner;
pub mod storage;
pub mod value;

pub use engine::{CheatEngine, CheatModeConfig};
pub use error::EngineError;
pub use freezer::Freezer;
pub use frontend::{Frontend, StdoutFrontend};
pub use maps::{MemoryRegion, Perms};
pub use procrw::{Backend, ProcessHandle};
pub use scanner::{ScanLevel, Scanner};
pub use value::{Endian, NumericType, Operator, Value};
