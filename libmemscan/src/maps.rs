//! Region Mapper -- parses `/proc/<pid>/maps` into scannable regions.
//!
//! Grounded on the teacher's `linux::process::parse_proc_maps`, adapted from
//! the teacher's cross-platform `MemoryRegion`/`MemoryProtection` structs to
//! the POSIX fields spec.md §3 actually names (`perms`, `inode`, `path`).

use crate::error::EngineError;
use std::fs::File;
use std::io::{BufRead, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub shared: bool,
}

impl Perms {
    fn parse(s: &str) -> Perms {
        let bytes = s.as_bytes();
        Perms {
            read: bytes.first() == Some(&b'r'),
            write: bytes.get(1) == Some(&b'w'),
            execute: bytes.get(2) == Some(&b'x'),
            shared: bytes.get(3) == Some(&b's'),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: usize,
    pub end: usize,
    pub perms: Perms,
    pub inode: u64,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_special(&self) -> bool {
        matches!(self.path.as_deref(), Some("[vvar]") | Some("[vsyscall]"))
    }

    fn is_anonymous_or_stack_like(&self) -> bool {
        match self.path.as_deref() {
            None => true,
            Some(p) => p.is_empty() || p == "[heap]" || p == "[stack]" || p.starts_with("[stack:"),
        }
    }

    /// Scannable iff readable, not special, and either anonymous/heap/stack
    /// or a writable file-backed mapping, per spec.md §3.
    pub fn is_scannable(&self) -> bool {
        if !self.perms.read || self.is_special() {
            return false;
        }
        self.is_anonymous_or_stack_like() || self.perms.write
    }
}

/// Parse `/proc/<pid>/maps` and return only the scannable regions.
pub fn list_regions(pid: i32) -> Result<Vec<MemoryRegion>, EngineError> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(&path).map_err(|e| EngineError::TargetInaccessible {
        pid,
        reason: format!("failed to open {path}: {e}"),
    })?;
    let reader = BufReader::new(file);

    let mut regions = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| EngineError::TargetInaccessible {
            pid,
            reason: format!("failed to read {path}: {e}"),
        })?;
        if let Some(region) = parse_line(&line) {
            if region.is_scannable() {
                regions.push(region);
            }
        }
    }
    Ok(regions)
}

fn parse_line(line: &str) -> Option<MemoryRegion> {
    // start-end perms offset dev:inode pathname
    let mut parts = line.splitn(6, ' ').filter(|s| !s.is_empty());
    let addr = parts.next()?;
    let perms = parts.next()?;
    let _offset = parts.next()?;
    let _dev = parts.next()?;
    let inode = parts.next()?;
    let pathname = parts.next().map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

    let (start_s, end_s) = addr.split_once('-')?;
    let start = usize::from_str_radix(start_s, 16).ok()?;
    let end = usize::from_str_radix(end_s, 16).ok()?;
    let inode: u64 = inode.parse().unwrap_or(0);

    Some(MemoryRegion {
        start,
        end,
        perms: Perms::parse(perms),
        inode,
        path: pathname,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_maps_line() {
        let line = "00400000-0040b000 r-xp 00000000 08:01 131104 /usr/bin/cat";
        let region = parse_line(line).unwrap();
        assert_eq!(region.start, 0x00400000);
        assert_eq!(region.end, 0x0040b000);
        assert!(region.perms.read && !region.perms.write && region.perms.execute);
        assert_eq!(region.inode, 131104);
        assert_eq!(region.path.as_deref(), Some("/usr/bin/cat"));
    }

    #[test]
    fn anonymous_heap_is_scannable() {
        let line = "55d000-55e000 rw-p 00000000 00:00 0 [heap]";
        let region = parse_line(line).unwrap();
        assert!(region.is_scannable());
    }

    #[test]
    fn vvar_is_never_scannable() {
        let line = "7ffd0000-7ffd1000 r--p 00000000 00:00 0 [vvar]";
        let region = parse_line(line).unwrap();
        assert!(!region.is_scannable());
    }

    #[test]
    fn readonly_file_backed_mapping_is_not_scannable() {
        let line = "00400000-0040b000 r-xp 00000000 08:01 131104 /usr/bin/cat";
        let region = parse_line(line).unwrap();
        assert!(!region.is_scannable());
    }

    #[test]
    fn writable_file_backed_mapping_is_scannable() {
        let line = "7f0000-7f1000 rw-s 00000000 08:01 9999 /dev/shm/foo";
        let region = parse_line(line).unwrap();
        assert!(region.is_scannable());
    }

    #[test]
    fn unreadable_region_is_never_scannable() {
        let line = "7f0000-7f1000 -w-p 00000000 00:00 0";
        let region = parse_line(line).unwrap();
        assert!(!region.is_scannable());
    }

    #[test]
    fn list_regions_of_self_succeeds() {
        let regions = list_regions(std::process::id() as i32).unwrap();
        assert!(!regions.is_empty());
        assert!(regions.iter().all(|r| r.is_scannable()));
    }

    #[test]
    fn list_regions_of_nonexistent_pid_is_target_inaccessible() {
        let err = list_regions(i32::MAX).unwrap_err();
        assert!(matches!(err, EngineError::TargetInaccessible { .. }));
    }
}
