//! Scanner -- the first-scan/next-scan state machine.
//!
//! Grounded on the teacher's `InteractiveScanner` (pattern-search-then-narrow
//! workflow, region chunking) generalized from byte patterns to typed
//! numeric values and widened with the delta operators (`Changed`,
//! `Increased`, ...) spec.md §4.D requires. Per-scan timing mirrors
//! `cheat_cmd_handler.cpp`'s `Done in: %lf s` feedback (see SPEC_FULL.md
//! §11).

use crate::error::EngineError;
use crate::maps::{list_regions, MemoryRegion};
use crate::procrw::{Backend, ProcessHandle};
use crate::storage::MatchStorage;
use crate::value::{evaluate, Endian, NumericType, Operator, Value};
use std::time::{Duration, Instant};

/// Region reads are split into windows of this size so a single huge mapping
/// doesn't force one multi-gigabyte allocation.
pub const DEFAULT_SCAN_CHUNK_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLevel {
    /// Only addresses aligned to the numeric type's size are considered.
    Aligned,
    /// Every byte offset is considered a candidate slot start.
    All,
}

impl ScanLevel {
    fn stride(self, ty_size: usize) -> usize {
        match self {
            ScanLevel::Aligned => ty_size,
            ScanLevel::All => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoScan,
    Scanned,
}

pub struct Scanner {
    numeric_type: NumericType,
    endian: Endian,
    scan_level: ScanLevel,
    backend: Backend,
    chunk_bytes: usize,
    storage: MatchStorage,
    state: State,
}

impl Scanner {
    pub fn new(numeric_type: NumericType, endian: Endian, scan_level: ScanLevel, backend: Backend) -> Self {
        Self {
            numeric_type,
            endian,
            scan_level,
            backend,
            chunk_bytes: DEFAULT_SCAN_CHUNK_BYTES,
            storage: MatchStorage::new(),
            state: State::NoScan,
        }
    }

    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }

    pub fn numeric_type(&self) -> NumericType {
        self.numeric_type
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn scan_level(&self) -> ScanLevel {
        self.scan_level
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Changing the type, endian mode, or scan level mid-session discards
    /// the current result set -- there is no way to reinterpret slots of one
    /// width as another in place.
    pub fn set_numeric_type(&mut self, ty: NumericType) {
        self.numeric_type = ty;
        self.reset();
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
        self.reset();
    }

    pub fn set_scan_level(&mut self, level: ScanLevel) {
        self.scan_level = level;
        self.reset();
    }

    pub fn set_backend(&mut self, backend: Backend) {
        self.backend = backend;
    }

    pub fn matches_count(&self) -> usize {
        self.storage.get_matches_count()
    }

    pub fn reset(&mut self) {
        self.storage.clear();
        self.state = State::NoScan;
    }

    pub fn has_scanned(&self) -> bool {
        self.state == State::Scanned
    }

    pub fn iterate_val<F: FnMut(usize, Value)>(&self, f: F, max: Option<usize>) {
        self.storage.iterate_val(f, max);
    }

    /// Enumerate the target's scannable regions, report them via
    /// `on_regions` (spec.md §11's progress telemetry), then value-scan each
    /// one against `op`/`rhs`. `warn` receives one message per region
    /// skipped outright (inaccessible/permission-denied, spec.md §7) or
    /// read short (partial transfer, spec.md §7).
    pub fn first_scan(
        &mut self,
        handle: &ProcessHandle,
        op: Operator,
        rhs: Option<&Value>,
        on_regions: impl FnOnce(&[MemoryRegion]),
        warn: impl FnMut(&str),
    ) -> Result<Duration, EngineError> {
        let regions = list_regions(handle.pid())?;
        on_regions(&regions);
        Ok(self.first_scan_in_regions(handle, &regions, op, rhs, warn))
    }

    /// Core of [`first_scan`](Self::first_scan), taking the region list
    /// directly so tests can supply synthetic regions instead of a real
    /// `/proc/<pid>/maps`.
    pub fn first_scan_in_regions(
        &mut self,
        handle: &ProcessHandle,
        regions: &[MemoryRegion],
        op: Operator,
        rhs: Option<&Value>,
        mut warn: impl FnMut(&str),
    ) -> Duration {
        let start = Instant::now();
        self.storage.clear();
        let stride = self.scan_level.stride(self.numeric_type.size());
        for region in regions {
            self.scan_region_into_storage(handle, region, stride, |val| evaluate(op, val, rhs, None), &mut warn);
        }
        self.state = State::Scanned;
        start.elapsed()
    }

    /// Re-read every surviving slot and retain it iff `op` holds (value
    /// predicates compare against `rhs`, delta predicates against the
    /// slot's previously stored value). A slot whose region has been
    /// unmapped is dropped silently. Groups still dense are re-read in one
    /// contiguous call per spec.md §4.D; groups already compacted to sparse
    /// are re-read address by address.
    pub fn next_scan(&mut self, handle: &ProcessHandle, op: Operator, rhs: Option<&Value>) -> Result<Duration, EngineError> {
        if self.state == State::NoScan {
            return Err(EngineError::NoInitialScan);
        }
        let start = Instant::now();
        let ty = self.numeric_type;
        let endian = self.endian;
        let backend = self.backend;
        self.storage.filter_in_place(
            |addr| handle.read_value(addr, ty, endian, backend),
            |base, len| read_bulk(handle, base, len, backend),
            |bytes| Value::from_bytes(bytes, ty, endian),
            ty.size(),
            |_, old, new| evaluate(op, new, rhs, Some(old)),
        );
        Ok(start.elapsed())
    }

    /// Equivalent to `next_scan(Any)`: refresh stored values without
    /// changing which slots survive, so `matches_count()` is unaffected.
    pub fn update(&mut self, handle: &ProcessHandle) -> Result<Duration, EngineError> {
        if self.state == State::NoScan {
            return Err(EngineError::NoInitialScan);
        }
        let start = Instant::now();
        let ty = self.numeric_type;
        let endian = self.endian;
        let backend = self.backend;
        self.storage.refresh_values(
            |addr| handle.read_value(addr, ty, endian, backend),
            |base, len| read_bulk(handle, base, len, backend),
            |bytes| Value::from_bytes(bytes, ty, endian),
            ty.size(),
        );
        Ok(start.elapsed())
    }

    /// Write `value` to every surviving match and return how many writes
    /// succeeded in full.
    pub fn write_val_to_current_scan_results(&mut self, handle: &ProcessHandle, value: &Value) -> Result<usize, EngineError> {
        if self.state == State::NoScan {
            return Err(EngineError::NoInitialScan);
        }
        let mut addrs = Vec::new();
        self.storage.iterate_val(|addr, _| addrs.push(addr), None);
        let endian = self.endian;
        let backend = self.backend;
        let expected_len = value.numeric_type().size();

        let mut written = 0usize;
        for addr in &addrs {
            let (n, res) = handle.write_value(*addr, value, endian, backend);
            if res.is_ok() && n == expected_len {
                written += 1;
            }
        }

        let ty = self.numeric_type;
        self.storage.refresh_values(
            |addr| handle.read_value(addr, ty, endian, backend),
            |base, len| read_bulk(handle, base, len, backend),
            |bytes| Value::from_bytes(bytes, ty, endian),
            ty.size(),
        );
        Ok(written)
    }

    fn scan_region_into_storage(
        &mut self,
        handle: &ProcessHandle,
        region: &MemoryRegion,
        stride: usize,
        keep: impl Fn(&Value) -> bool,
        warn: &mut dyn FnMut(&str),
    ) {
        let ty_size = self.numeric_type.size();
        if region.len() < ty_size {
            return;
        }
        let slot_count = (region.len() - ty_size) / stride + 1;
        let mut slots: Vec<Option<Value>> = vec![None; slot_count];

        let mut offset = 0usize;
        let mut truncated = false;
        while offset < region.len() {
            let window_len = self.chunk_bytes.min(region.len() - offset);
            let read_len = (window_len + ty_size - 1).min(region.len() - offset);
            let mut buf = vec![0u8; read_len];
            let (n, res) = handle.read_bytes(region.start + offset, &mut buf, self.backend);

            if let Err(e) = res {
                warn(&format!(
                    "skipping region {:#x}-{:#x}: {e}",
                    region.start, region.end
                ));
                return;
            }

            if n < read_len {
                truncated = true;
            }

            if n >= ty_size {
                buf.truncate(n);
                let mut slot = offset.div_ceil(stride);
                while slot < slot_count {
                    let off = slot * stride;
                    if off >= offset + window_len {
                        break;
                    }
                    let local = off - offset;
                    if local + ty_size > n {
                        break;
                    }
                    if let Some(val) = Value::from_bytes(&buf[local..], self.numeric_type, self.endian) {
                        if keep(&val) {
                            slots[slot] = Some(val);
                        }
                    }
                    slot += 1;
                }
            }
            offset += self.chunk_bytes;
        }

        if truncated {
            warn(&format!(
                "partial read of region {:#x}-{:#x}: fewer bytes returned than requested",
                region.start, region.end
            ));
        }

        self.storage.add_region_snapshot(region.start, stride, slots);
    }
}

/// Re-read `len` bytes starting at `base` in one call, for a dense group's
/// `bulk_reread`. Returns the bytes actually transferred (possibly shorter
/// than `len` on a partial read) or `None` on a systemic failure.
fn read_bulk(handle: &ProcessHandle, base: usize, len: usize, backend: Backend) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    let mut buf = vec![0u8; len];
    let (n, res) = handle.read_bytes(base, &mut buf, backend);
    if res.is_err() {
        return None;
    }
    buf.truncate(n);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::Perms;

    fn rw_region(start: usize, len: usize) -> MemoryRegion {
        MemoryRegion {
            start,
            end: start + len,
            perms: Perms {
                read: true,
                write: true,
                execute: false,
                shared: false,
            },
            inode: 0,
            path: None,
        }
    }

    fn self_handle() -> ProcessHandle {
        ProcessHandle::open(std::process::id() as i32).unwrap()
    }

    #[test]
    fn first_scan_finds_exact_value_aligned() {
        let buf: [i32; 4] = [10, 20, 30, 20];
        let addr = buf.as_ptr() as usize;
        let region = rw_region(addr, std::mem::size_of_val(&buf));
        let handle = self_handle();

        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(20)), |_msg: &str| {});

        assert_eq!(scanner.matches_count(), 2);
        let mut seen = Vec::new();
        scanner.iterate_val(|a, v| seen.push((a, v)), None);
        assert_eq!(seen, vec![(addr + 4, Value::I32(20)), (addr + 12, Value::I32(20))]);
    }

    #[test]
    fn next_scan_narrows_by_delta_operator() {
        let mut buf: [i32; 3] = [1, 1, 1];
        let addr = buf.as_ptr() as usize;
        let region = rw_region(addr, std::mem::size_of_val(&buf));
        let handle = self_handle();

        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(1)), |_msg: &str| {});
        assert_eq!(scanner.matches_count(), 3);

        buf[1] = 2;
        scanner.next_scan(&handle, Operator::Increased, None).unwrap();

        assert_eq!(scanner.matches_count(), 1);
        let mut seen = Vec::new();
        scanner.iterate_val(|a, v| seen.push((a, v)), None);
        assert_eq!(seen, vec![(addr + 4, Value::I32(2))]);
    }

    #[test]
    fn update_refreshes_values_without_changing_count() {
        let mut buf: [i32; 2] = [5, 5];
        let addr = buf.as_ptr() as usize;
        let region = rw_region(addr, std::mem::size_of_val(&buf));
        let handle = self_handle();

        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(5)), |_msg: &str| {});

        buf[0] = 9;
        buf[1] = 10;
        scanner.update(&handle).unwrap();

        assert_eq!(scanner.matches_count(), 2);
        let mut seen = Vec::new();
        scanner.iterate_val(|a, v| seen.push((a, v)), None);
        assert_eq!(seen, vec![(addr, Value::I32(9)), (addr + 4, Value::I32(10))]);
    }

    #[test]
    fn write_val_applies_to_every_match_and_refreshes() {
        let mut buf: [i32; 2] = [7, 7];
        let addr = buf.as_ptr() as usize;
        let region = rw_region(addr, std::mem::size_of_val(&buf));
        let handle = self_handle();

        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(7)), |_msg: &str| {});

        let written = scanner.write_val_to_current_scan_results(&handle, &Value::I32(99)).unwrap();
        assert_eq!(written, 2);
        assert_eq!(buf, [99, 99]);
    }

    #[test]
    fn next_scan_before_first_scan_is_an_error() {
        let handle = self_handle();
        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        let err = scanner.next_scan(&handle, Operator::Any, None).unwrap_err();
        assert!(matches!(err, EngineError::NoInitialScan));
    }

    #[test]
    fn all_scan_level_finds_unaligned_matches() {
        // bytes: [0x01, 0x2A, 0x00, 0x00] -- an i32 value of 0x2A starts at
        // offset 1, which an Aligned (stride=4) scan can never see.
        let buf: [u8; 4] = [0x01, 0x2A, 0x00, 0x00];
        let addr = buf.as_ptr() as usize;
        let region = rw_region(addr, buf.len());
        let handle = self_handle();

        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::All, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(0x2A)), |_msg: &str| {});

        assert_eq!(scanner.matches_count(), 1);
        let mut seen = Vec::new();
        scanner.iterate_val(|a, v| seen.push((a, v)), None);
        assert_eq!(seen, vec![(addr + 1, Value::I32(0x2A))]);
    }

    #[test]
    fn changing_numeric_type_resets_results() {
        let handle = self_handle();
        let buf: [i32; 1] = [1];
        let region = rw_region(buf.as_ptr() as usize, std::mem::size_of_val(&buf));
        let mut scanner = Scanner::new(NumericType::I32, Endian::Native, ScanLevel::Aligned, Backend::ProcFile);
        scanner.first_scan_in_regions(&handle, &[region], Operator::Equal, Some(&Value::I32(1)), |_msg: &str| {});
        assert_eq!(scanner.matches_count(), 1);

        scanner.set_numeric_type(NumericType::I64);
        assert_eq!(scanner.matches_count(), 0);
        assert!(!scanner.has_scanned());
    }
}
