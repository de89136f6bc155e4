//! `CheatEngine` -- the facade the CLI (and any other frontend) drives.
//!
//! Ties `procrw`, `scanner`, and `freezer` together behind the command
//! surface a cheat-mode session needs, with `CheatModeConfig` as the one
//! piece of session configuration (SPEC_FULL.md §10's configuration
//! section: in-memory, session-lifetime, no config file).

use crate::error::EngineError;
use crate::freezer::{Freezer, DEFAULT_FREEZE_TICK};
use crate::frontend::Frontend;
use crate::procrw::{Backend, ProcessHandle};
use crate::scanner::{Scanner, ScanLevel, DEFAULT_SCAN_CHUNK_BYTES};
use crate::value::{Endian, NumericType, Operator, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct CheatModeConfig {
    pub numeric_type: NumericType,
    pub endian: Endian,
    pub scan_level: ScanLevel,
    pub backend: Backend,
    pub freeze_tick: Duration,
    pub scan_chunk_bytes: usize,
}

impl Default for CheatModeConfig {
    fn default() -> Self {
        Self {
            numeric_type: NumericType::I32,
            endian: Endian::Native,
            scan_level: ScanLevel::Aligned,
            backend: Backend::ProcFile,
            freeze_tick: DEFAULT_FREEZE_TICK,
            scan_chunk_bytes: DEFAULT_SCAN_CHUNK_BYTES,
        }
    }
}

pub struct CheatEngine {
    handle: Arc<ProcessHandle>,
    scanner: Scanner,
    freezer: Freezer,
    frontend: Box<dyn Frontend>,
}

impl CheatEngine {
    pub fn attach(pid: i32, config: CheatModeConfig, frontend: Box<dyn Frontend>) -> Result<Self, EngineError> {
        let handle = Arc::new(ProcessHandle::open(pid)?);
        let scanner = Scanner::new(config.numeric_type, config.endian, config.scan_level, config.backend)
            .with_chunk_bytes(config.scan_chunk_bytes);
        let freezer = Freezer::new(Arc::clone(&handle), config.endian, config.backend).with_tick(config.freeze_tick);
        Ok(Self {
            handle,
            scanner,
            freezer,
            frontend,
        })
    }

    pub fn pid(&self) -> i32 {
        self.handle.pid()
    }

    /// Performs a first scan if no scan is in progress, otherwise narrows
    /// the current result set -- mirroring the single `scan` verb a cheat
    /// session actually drives at the prompt (see DESIGN.md).
    pub fn scan(&mut self, op: Operator, rhs: Option<&str>) -> Result<(), EngineError> {
        let rhs_val = rhs.map(|s| Value::parse(s, self.scanner.numeric_type())).transpose()?;

        let elapsed = if self.scanner.has_scanned() {
            self.scanner.next_scan(&self.handle, op, rhs_val.as_ref())?
        } else {
            let frontend = &self.frontend;
            self.scanner.first_scan(
                &self.handle,
                op,
                rhs_val.as_ref(),
                |regions| frontend.regions_found(regions),
                |msg| frontend.warn(msg),
            )?
        };

        self.frontend.scan_done(self.scanner.matches_count(), elapsed);
        Ok(())
    }

    pub fn reset_scan(&mut self) {
        self.scanner.reset();
    }

    pub fn list(&self, max: Option<usize>) {
        let frontend = &self.frontend;
        self.scanner.iterate_val(|addr, val| frontend.match_entry(addr, &val), max);
    }

    /// Current matches as `(addr, value)` pairs, for callers embedding the
    /// engine directly rather than driving it through a [`Frontend`].
    pub fn matches(&self, max: Option<usize>) -> Vec<(usize, Value)> {
        let mut out = Vec::new();
        self.scanner.iterate_val(|addr, val| out.push((addr, val)), max);
        out
    }

    pub fn matchcount(&self) -> usize {
        self.scanner.matches_count()
    }

    pub fn update(&mut self) -> Result<(), EngineError> {
        let elapsed = self.scanner.update(&self.handle)?;
        self.frontend.scan_done(self.scanner.matches_count(), elapsed);
        Ok(())
    }

    pub fn write(&mut self, value_str: &str) -> Result<usize, EngineError> {
        let value = Value::parse(value_str, self.scanner.numeric_type())?;
        self.scanner.write_val_to_current_scan_results(&self.handle, &value)
    }

    pub fn readat(&self, addr: usize) -> Option<Value> {
        self.handle
            .read_value(addr, self.scanner.numeric_type(), self.scanner.endian(), self.scanner.backend())
    }

    /// Raw `len`-byte read, distinct from [`readat`](Self::readat)'s single
    /// typed value (SPEC_FULL.md §11).
    pub fn read_arr(&self, addr: usize, len: usize) -> (Vec<u8>, Result<(), EngineError>) {
        let mut buf = vec![0u8; len];
        let (n, res) = self.handle.read_bytes(addr, &mut buf, self.scanner.backend());
        buf.truncate(n);
        (buf, res)
    }

    pub fn writeat(&self, addr: usize, value_str: &str) -> Result<usize, EngineError> {
        let value = Value::parse(value_str, self.scanner.numeric_type())?;
        let (n, res) = self.handle.write_value(addr, &value, self.scanner.endian(), self.scanner.backend());
        res?;
        Ok(n)
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.scanner.set_endian(endian);
    }

    pub fn set_scan_level(&mut self, level: ScanLevel) {
        self.scanner.set_scan_level(level);
    }

    pub fn set_numeric_type(&mut self, ty: NumericType) {
        self.scanner.set_numeric_type(ty);
    }

    pub fn numeric_type(&self) -> NumericType {
        self.scanner.numeric_type()
    }

    pub fn freeze_at(&self, addr: usize) -> Result<(), EngineError> {
        self.freezer.freeze_addr(addr, self.scanner.numeric_type())
    }

    pub fn freeze_at_val(&self, addr: usize, value_str: &str) -> Result<(), EngineError> {
        let value = Value::parse(value_str, self.scanner.numeric_type())?;
        self.freezer.freeze_addr_with_val(addr, &value)
    }

    pub fn unfreeze_at(&self, addr: usize) {
        self.freezer.unfreeze_addr(addr);
    }

    /// Freeze every current match to its live value. Errors with
    /// `NoInitialScan` if no scan has been performed yet.
    pub fn freeze_all(&self) -> Result<(), EngineError> {
        if !self.scanner.has_scanned() {
            return Err(EngineError::NoInitialScan);
        }
        let mut addrs = Vec::new();
        self.scanner.iterate_val(|addr, _| addrs.push(addr), None);
        for addr in addrs {
            let _ = self.freezer.freeze_addr(addr, self.scanner.numeric_type());
        }
        Ok(())
    }

    pub fn unfreeze_all(&self) {
        self.freezer.stop_all();
    }

    pub fn freeze_list(&self) {
        for (addr, ty, value) in self.freezer.freeze_list() {
            self.frontend.freeze_entry(addr, ty, &value);
        }
    }

    /// Surfaces any background freeze-worker failures accumulated since the
    /// last call (see `freezer::MAX_CONSECUTIVE_FAILURES`).
    pub fn poll_freeze_failures(&self) {
        for err in self.freezer.take_failures() {
            self.frontend.error(&err);
        }
    }
}
