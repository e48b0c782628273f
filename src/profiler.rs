// Optional per-opcode and per-phase instrumentation. Guarded by a
// `parking_lot::Mutex` so a report snapshot can be taken from another
// thread while the owning VM keeps running.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::opcode::Opcode;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpcodeStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl OpcodeStats {
    fn record(&mut self, elapsed: Duration) {
        if self.count == 0 {
            self.min = elapsed;
            self.max = elapsed;
        } else {
            self.min = self.min.min(elapsed);
            self.max = self.max.max(elapsed);
        }
        self.total += elapsed;
        self.count += 1;
    }

    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Parse,
    Compile,
    Execute,
    Fetch,
}

#[derive(Debug, Default)]
struct MemoryCounters {
    total_allocated: u64,
    total_freed: u64,
    current: i64,
    peak: i64,
    count: u64,
}

#[derive(Default)]
struct Accumulators {
    opcodes: HashMap<Opcode, OpcodeStats>,
    phases: HashMap<Phase, Duration>,
    phase_starts: HashMap<Phase, Instant>,
    memory: MemoryCounters,
}

/// Accumulates interpreter statistics across one or more `run` calls. Shared
/// via `Rc`/`Arc` between a running VM and whoever wants to read a report.
#[derive(Default)]
pub struct Profiler {
    inner: Mutex<Accumulators>,
}

/// A live per-dispatch guard returned by `Profiler::begin_opcode`; dropping
/// it (or calling `finish`) records the elapsed time against `opcode`. Owns
/// an `Rc` clone rather than borrowing so it never ties up the VM's `&mut
/// self` for the rest of dispatch.
pub struct OpcodeTiming {
    profiler: Rc<Profiler>,
    opcode: Opcode,
    start: Instant,
}

impl OpcodeTiming {
    pub fn finish(self) {
        let elapsed = self.start.elapsed();
        self.profiler
            .inner
            .lock()
            .opcodes
            .entry(self.opcode)
            .or_default()
            .record(elapsed);
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_opcode(self: &Rc<Self>, opcode: Opcode) -> OpcodeTiming {
        OpcodeTiming {
            profiler: self.clone(),
            opcode,
            start: Instant::now(),
        }
    }

    pub fn push_phase(&self, phase: Phase) {
        self.inner.lock().phase_starts.insert(phase, Instant::now());
    }

    pub fn pop_phase(&self, phase: Phase) {
        let mut inner = self.inner.lock();
        if let Some(start) = inner.phase_starts.remove(&phase) {
            let elapsed = start.elapsed();
            *inner.phases.entry(phase).or_default() += elapsed;
        }
    }

    pub fn record_alloc(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.memory.total_allocated += bytes;
        inner.memory.current += bytes as i64;
        inner.memory.peak = inner.memory.peak.max(inner.memory.current);
        inner.memory.count += 1;
    }

    pub fn record_free(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.memory.total_freed += bytes;
        inner.memory.current -= bytes as i64;
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.opcodes.clear();
        inner.phases.clear();
        inner.phase_starts.clear();
        inner.memory = MemoryCounters::default();
    }

    /// Per-opcode stats sorted by descending total time.
    pub fn report(&self) -> Vec<(Opcode, OpcodeStats)> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner.opcodes.iter().map(|(op, s)| (*op, *s)).collect();
        rows.sort_by_key(|row| std::cmp::Reverse(row.1.total));
        rows
    }

    pub fn phase_totals(&self) -> HashMap<Phase, Duration> {
        self.inner.lock().phases.clone()
    }

    pub fn memory_snapshot(&self) -> (u64, u64, i64, i64, u64) {
        let m = &self.inner.lock().memory;
        (m.total_allocated, m.total_freed, m.current, m.peak, m.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_min_avg_max_are_consistent() {
        let p = Rc::new(Profiler::new());
        for _ in 0..5 {
            let t = p.begin_opcode(Opcode::Add);
            t.finish();
        }
        let report = p.report();
        let (_, stats) = report.into_iter().find(|(op, _)| *op == Opcode::Add).unwrap();
        assert_eq!(stats.count, 5);
        assert!(stats.min <= stats.avg());
        assert!(stats.avg() <= stats.max);
    }

    #[test]
    fn reset_clears_accumulators() {
        let p = Rc::new(Profiler::new());
        p.begin_opcode(Opcode::Halt).finish();
        p.record_alloc(128);
        p.reset();
        assert!(p.report().is_empty());
        assert_eq!(p.memory_snapshot(), (0, 0, 0, 0, 0));
    }

    #[test]
    fn phase_timer_accumulates() {
        let p = Profiler::new();
        p.push_phase(Phase::Execute);
        p.pop_phase(Phase::Execute);
        assert!(p.phase_totals().contains_key(&Phase::Execute));
    }
}
