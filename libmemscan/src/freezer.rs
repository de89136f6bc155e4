//! Freezer -- background workers that keep rewriting a value at an address.
//!
//! Grounded on the teacher's worker-thread-plus-stop-flag pattern for
//! long-running background jobs, generalized from a single job kind to one
//! thread per frozen address. No async runtime is pulled in: nothing else
//! in the dependency stack needs one, so `std::thread` plus
//! `Arc<AtomicBool>` stop flags (the teacher's own idiom) does the job.

use crate::error::EngineError;
use crate::procrw::{Backend, ProcessHandle};
use crate::value::{Endian, NumericType, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often a frozen address is rewritten.
pub const DEFAULT_FREEZE_TICK: Duration = Duration::from_millis(50);

/// A worker gives up and reports [`EngineError::FreezeFailure`] after this
/// many consecutive write failures (e.g. the region was unmapped).
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

struct FreezeWorker {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    numeric_type: NumericType,
    value: Arc<Mutex<Value>>,
    failure: Arc<Mutex<Option<EngineError>>>,
}

/// Holds every currently-frozen address for one target process. Each
/// address has at most one active worker; re-freezing an address replaces
/// its worker rather than stacking a second one.
pub struct Freezer {
    handle: Arc<ProcessHandle>,
    endian: Endian,
    backend: Backend,
    tick: Duration,
    workers: Mutex<HashMap<usize, FreezeWorker>>,
}

impl Freezer {
    pub fn new(handle: Arc<ProcessHandle>, endian: Endian, backend: Backend) -> Self {
        Self {
            handle,
            endian,
            backend,
            tick: DEFAULT_FREEZE_TICK,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Freeze `addr` to its current live value.
    pub fn freeze_addr(&self, addr: usize, ty: NumericType) -> Result<(), EngineError> {
        let current = self
            .handle
            .read_value(addr, ty, self.endian, self.backend)
            .ok_or(EngineError::PartialTransfer {
                addr,
                requested: ty.size(),
                got: 0,
            })?;
        self.freeze_addr_with_val(addr, &current)
    }

    /// Freeze `addr` to an explicit value, regardless of what's there now.
    pub fn freeze_addr_with_val(&self, addr: usize, value: &Value) -> Result<(), EngineError> {
        self.unfreeze_addr(addr);

        let stop = Arc::new(AtomicBool::new(false));
        let value_cell = Arc::new(Mutex::new(*value));
        let failure = Arc::new(Mutex::new(None));

        let thread_stop = Arc::clone(&stop);
        let thread_value = Arc::clone(&value_cell);
        let thread_failure = Arc::clone(&failure);
        let thread_handle = Arc::clone(&self.handle);
        let endian = self.endian;
        let backend = self.backend;
        let tick = self.tick;

        let join = std::thread::spawn(move || {
            let mut consecutive_failures = 0u32;
            while !thread_stop.load(Ordering::Relaxed) {
                let value = *thread_value.lock().unwrap();
                let (n, res) = thread_handle.write_value(addr, &value, endian, backend);
                match res {
                    Ok(()) if n == value.numeric_type().size() => {
                        consecutive_failures = 0;
                    }
                    Ok(()) => {
                        consecutive_failures += 1;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        *thread_failure.lock().unwrap() = Some(e);
                    }
                }
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    if thread_failure.lock().unwrap().is_none() {
                        *thread_failure.lock().unwrap() = Some(EngineError::FreezeFailure {
                            addr,
                            reason: "repeated partial writes".to_string(),
                        });
                    }
                    break;
                }
                std::thread::sleep(tick);
            }
        });

        let mut workers = self.workers.lock().unwrap();
        workers.insert(
            addr,
            FreezeWorker {
                stop,
                join: Some(join),
                numeric_type: value.numeric_type(),
                value: value_cell,
                failure,
            },
        );
        Ok(())
    }

    /// Stop the worker at `addr`, if any. No-op if `addr` isn't frozen.
    pub fn unfreeze_addr(&self, addr: usize) {
        let worker = self.workers.lock().unwrap().remove(&addr);
        if let Some(mut worker) = worker {
            worker.stop.store(true, Ordering::Relaxed);
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }

    /// Stop every active worker.
    pub fn stop_all(&self) {
        let addrs: Vec<usize> = self.workers.lock().unwrap().keys().copied().collect();
        for addr in addrs {
            self.unfreeze_addr(addr);
        }
    }

    pub fn is_frozen(&self, addr: usize) -> bool {
        self.workers.lock().unwrap().contains_key(&addr)
    }

    pub fn freeze_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// `(addr, numeric_type, value)` per frozen address, for the
    /// `freeze_list` command (see SPEC_FULL.md §11).
    pub fn freeze_list(&self) -> Vec<(usize, NumericType, Value)> {
        let workers = self.workers.lock().unwrap();
        let mut out: Vec<(usize, NumericType, Value)> = workers
            .iter()
            .map(|(&addr, w)| (addr, w.numeric_type, *w.value.lock().unwrap()))
            .collect();
        out.sort_by_key(|(addr, ..)| *addr);
        out
    }

    /// Drain and return any worker failures accumulated since the last
    /// call, removing those workers.
    pub fn take_failures(&self) -> Vec<EngineError> {
        let mut workers = self.workers.lock().unwrap();
        let failed: Vec<usize> = workers
            .iter()
            .filter(|(_, w)| w.failure.lock().unwrap().is_some())
            .map(|(&addr, _)| addr)
            .collect();

        let mut out = Vec::with_capacity(failed.len());
        for addr in failed {
            if let Some(mut worker) = workers.remove(&addr) {
                if let Some(join) = worker.join.take() {
                    let _ = join.join();
                }
                if let Some(err) = worker.failure.lock().unwrap().take() {
                    out.push(err);
                }
            }
        }
        out
    }
}

impl Drop for Freezer {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_handle() -> Arc<ProcessHandle> {
        Arc::new(ProcessHandle::open(std::process::id() as i32).unwrap())
    }

    #[test]
    fn freeze_keeps_overwriting_external_writes() {
        let buf = Box::new(0i32);
        let addr = &*buf as *const i32 as usize;
        let handle = self_handle();
        let freezer = Freezer::new(Arc::clone(&handle), Endian::Native, Backend::ProcFile)
            .with_tick(Duration::from_millis(5));

        freezer.freeze_addr_with_val(addr, &Value::I32(7)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // simulate something else mutating the frozen cell
        handle
            .write_value(addr, &Value::I32(123), Endian::Native, Backend::ProcFile)
            .1
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let back = handle.read_value(addr, NumericType::I32, Endian::Native, Backend::ProcFile);
        assert_eq!(back, Some(Value::I32(7)));

        freezer.unfreeze_addr(addr);
    }

    #[test]
    fn unfreeze_stops_future_writes() {
        let buf = Box::new(0i32);
        let addr = &*buf as *const i32 as usize;
        let handle = self_handle();
        let freezer = Freezer::new(Arc::clone(&handle), Endian::Native, Backend::ProcFile)
            .with_tick(Duration::from_millis(5));

        freezer.freeze_addr_with_val(addr, &Value::I32(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        freezer.unfreeze_addr(addr);

        handle
            .write_value(addr, &Value::I32(999), Endian::Native, Backend::ProcFile)
            .1
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let back = handle.read_value(addr, NumericType::I32, Endian::Native, Backend::ProcFile);
        assert_eq!(back, Some(Value::I32(999)));
    }

    #[test]
    fn refreezing_same_address_replaces_worker() {
        let buf = Box::new(0i32);
        let addr = &*buf as *const i32 as usize;
        let handle = self_handle();
        let freezer = Freezer::new(Arc::clone(&handle), Endian::Native, Backend::ProcFile)
            .with_tick(Duration::from_millis(5));

        freezer.freeze_addr_with_val(addr, &Value::I32(1)).unwrap();
        freezer.freeze_addr_with_val(addr, &Value::I32(2)).unwrap();

        assert_eq!(freezer.freeze_count(), 1);
        let list = freezer.freeze_list();
        assert_eq!(list, vec![(addr, NumericType::I32, Value::I32(2))]);

        freezer.unfreeze_addr(addr);
    }
}
