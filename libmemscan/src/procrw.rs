//! Process R/W -- dual-backend access to a foreign process's address space.
//!
//! Grounded on the teacher's `ProcessHandleUnix` (`pread`/`pwrite` against
//! `/proc/<pid>/mem` via `std::os::unix::fs::FileExt`) for the proc-file
//! backend, and on the `nix::sys::uio::process_vm_readv`/`process_vm_writev`
//! usage seen across the pack's debugger-style examples (e.g. the
//! `nix`-based `process_vm_readv` callers under `examples/other_examples/`)
//! for the vectored-syscall backend. Partial transfers are first-class: the
//! spec requires replacing a global `errno`-style indicator with explicit
//! `(bytes_transferred, error_kind)` results.

use crate::error::EngineError;
use crate::value::{Endian, NumericType, Value};
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::fs::FileExt;

/// Selects which syscall path a given read/write uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `process_vm_readv`/`process_vm_writev`: faster, but may be denied in
    /// hardened contexts (e.g. restrictive `ptrace_scope`).
    VectoredSyscall,
    /// `/proc/<pid>/mem` file I/O: portable fallback.
    ProcFile,
}

/// An open handle to a target process's memory.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: i32,
    mem: File,
}

impl ProcessHandle {
    pub fn open(pid: i32) -> Result<Self, EngineError> {
        let path = format!("/proc/{pid}/mem");
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::TargetInaccessible {
                pid,
                reason: format!("failed to open {path}: {e}"),
            })?;
        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Read up to `buf.len()` bytes from `addr` into `buf`. Returns the
    /// number of bytes actually transferred and whether a systemic failure
    /// occurred (a short transfer alone is not an error).
    pub fn read_bytes(&self, addr: usize, buf: &mut [u8], backend: Backend) -> (usize, Result<(), EngineError>) {
        match backend {
            Backend::VectoredSyscall => {
                let len = buf.len();
                let mut local = [IoSliceMut::new(buf)];
                let remote = [RemoteIoVec { base: addr, len }];
                match process_vm_readv(Pid::from_raw(self.pid), &mut local, &remote) {
                    Ok(n) => (n, Ok(())),
                    Err(errno) => (0, Err(self.syscall_error(addr, errno))),
                }
            }
            Backend::ProcFile => match self.mem.read_at(buf, addr as u64) {
                Ok(n) => (n, Ok(())),
                Err(e) => (0, Err(self.io_error(addr, e))),
            },
        }
    }

    /// Symmetric to [`read_bytes`](Self::read_bytes).
    pub fn write_bytes(&self, addr: usize, bytes: &[u8], backend: Backend) -> (usize, Result<(), EngineError>) {
        match backend {
            Backend::VectoredSyscall => {
                let local = [IoSlice::new(bytes)];
                let remote = [RemoteIoVec {
                    base: addr,
                    len: bytes.len(),
                }];
                match process_vm_writev(Pid::from_raw(self.pid), &local, &remote) {
                    Ok(n) => (n, Ok(())),
                    Err(errno) => (0, Err(self.syscall_error(addr, errno))),
                }
            }
            Backend::ProcFile => match self.mem.write_at(bytes, addr as u64) {
                Ok(n) => (n, Ok(())),
                Err(e) => (0, Err(self.io_error(addr, e))),
            },
        }
    }

    /// Convenience over [`read_bytes`](Self::read_bytes) with
    /// `len = ty.size()`. Returns `None` if fewer bytes than `ty.size()`
    /// were transferred.
    pub fn read_value(&self, addr: usize, ty: NumericType, endian: Endian, backend: Backend) -> Option<Value> {
        let mut buf = vec![0u8; ty.size()];
        let (n, _) = self.read_bytes(addr, &mut buf, backend);
        if n < ty.size() {
            return None;
        }
        Value::from_bytes(&buf, ty, endian)
    }

    /// Symmetric to [`read_value`](Self::read_value); returns the number of
    /// bytes actually written.
    pub fn write_value(&self, addr: usize, value: &Value, endian: Endian, backend: Backend) -> (usize, Result<(), EngineError>) {
        let bytes = value.to_bytes(endian);
        self.write_bytes(addr, &bytes, backend)
    }

    fn syscall_error(&self, addr: usize, errno: nix::errno::Errno) -> EngineError {
        match errno {
            nix::errno::Errno::EPERM => EngineError::PermissionDenied { addr },
            nix::errno::Errno::ESRCH => EngineError::TargetInaccessible {
                pid: self.pid,
                reason: "process no longer exists".to_string(),
            },
            other => EngineError::TargetInaccessible {
                pid: self.pid,
                reason: other.to_string(),
            },
        }
    }

    fn io_error(&self, addr: usize, e: std::io::Error) -> EngineError {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => EngineError::PermissionDenied { addr },
            _ => EngineError::TargetInaccessible {
                pid: self.pid,
                reason: e.to_string(),
            },
        }
    }
}
