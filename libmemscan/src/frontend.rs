//! Frontend -- the single output sink every engine operation reports
//! through, instead of each module choosing its own logging backend.
//!
//! The core carries no `log`/`tracing` dependency; style and coloring live
//! entirely at the CLI layer, which supplies its own [`Frontend`]
//! implementation (see `src/repl.rs`). [`StdoutFrontend`] is the plain
//! fallback used by tests and anything embedding `libmemscan` directly.

use crate::error::EngineError;
use crate::maps::MemoryRegion;
use crate::value::{NumericType, Value};
use std::time::Duration;

pub trait Frontend {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, err: &EngineError);

    fn regions_found(&self, regions: &[MemoryRegion]) {
        self.info(&format!("found {} region(s) to scan", regions.len()));
    }

    fn scan_done(&self, matches_count: usize, elapsed: Duration) {
        self.info(&format!(
            "{matches_count} match(es), done in {:.6}s",
            elapsed.as_secs_f64()
        ));
    }

    fn match_entry(&self, addr: usize, value: &Value) {
        self.info(&format!("{addr:#x} = {value}"));
    }

    fn freeze_entry(&self, addr: usize, ty: NumericType, value: &Value) {
        self.info(&format!("{addr:#x} [{}] = {value} (frozen)", ty.name()));
    }
}

pub struct StdoutFrontend;

impl Frontend for StdoutFrontend {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        println!("warning: {message}");
    }

    fn error(&self, err: &EngineError) {
        println!("error: {err}");
    }
}
