// The interpreter: fetch/decode/execute loop, register file, cursor table,
// aggregate slots, and result buffer. One `step` call executes a single
// instruction against the flat `{op, p1, p2, p3, p4, p5}` operand tuple.

use std::rc::Rc;

use tracing::{trace, warn};

use crate::config::VdbeLimits;
use crate::cursor::{Cursor, Storage, VectorIndex, VectorSearchCursor};
use crate::error::{CancelCause, Result, VdbeError};
use crate::functions::{AggregateFunc, AggregateRegistry, ScalarRegistry};
use crate::opcode::{Opcode, Program, P4};
use crate::profiler::Profiler;
use crate::record;
use crate::value::Value;

/// Polled by the interpreter at `limits.cancel_poll_interval` granularity.
/// Not thread-bound: a single-threaded deadline timer and a cross-thread
/// `AtomicBool` flag are equally valid implementations.
pub trait CancelSource {
    fn poll(&self) -> Option<CancelCause>;
}

enum CursorSlot {
    Absent,
    Open { cursor: Box<dyn Cursor>, valid: bool },
    VectorSearch(VectorSearchCursor),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Halted,
    Cancelled(CancelCause),
}

pub struct Vm {
    program: Rc<Program>,
    storage: Rc<dyn Storage>,
    scalars: Rc<ScalarRegistry>,
    aggregates: AggregateRegistry,
    vector_index: Option<Rc<dyn VectorIndex>>,
    limits: VdbeLimits,
    pc: i32,
    registers: Vec<Value>,
    cursors: Vec<CursorSlot>,
    agg_slots: Vec<Option<Box<dyn AggregateFunc>>>,
    results: Vec<Vec<Value>>,
    halted: bool,
    profiler: Option<Rc<Profiler>>,
    cancel: Option<Rc<dyn CancelSource>>,
}

impl Vm {
    pub fn new(program: Rc<Program>, storage: Rc<dyn Storage>, limits: VdbeLimits) -> Self {
        Self {
            program,
            storage,
            scalars: Rc::new(ScalarRegistry::builtins()),
            aggregates: AggregateRegistry::new(),
            vector_index: None,
            registers: vec![Value::Null; limits.initial_registers],
            cursors: Vec::with_capacity(limits.initial_cursors),
            agg_slots: Vec::new(),
            results: Vec::new(),
            halted: false,
            profiler: None,
            cancel: None,
            limits,
            pc: 0,
        }
    }

    pub fn with_scalars(mut self, scalars: Rc<ScalarRegistry>) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn with_vector_index(mut self, index: Rc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn with_profiler(mut self, profiler: Rc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn with_cancel_source(mut self, cancel: Rc<dyn CancelSource>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Pre-sizes the register file; never shrinks an already-larger file.
    pub fn set_num_registers(&mut self, n: usize) {
        if self.registers.len() < n {
            self.registers.resize(n, Value::Null);
        }
    }

    pub fn results(&self) -> &[Vec<Value>] {
        &self.results
    }

    fn get_reg(&self, idx: i32) -> Value {
        if idx < 0 {
            return Value::Null;
        }
        self.registers.get(idx as usize).cloned().unwrap_or(Value::Null)
    }

    fn set_reg(&mut self, idx: i32, v: Value) -> Result<()> {
        let i = usize::try_from(idx).map_err(|_| VdbeError::RegisterOutOfBounds {
            reg: idx,
            len: self.registers.len(),
        })?;
        if i >= self.registers.len() {
            return Err(VdbeError::RegisterOutOfBounds {
                reg: idx,
                len: self.registers.len(),
            });
        }
        self.registers[i] = v;
        Ok(())
    }

    fn ensure_cursor_slot(&mut self, idx: i32) -> Result<usize> {
        let i = usize::try_from(idx).map_err(|_| VdbeError::CursorNotOpen { cursor: idx })?;
        if self.cursors.len() <= i {
            self.cursors.resize_with(i + 1, || CursorSlot::Absent);
        }
        Ok(i)
    }

    fn open_cursor(&mut self, idx: i32, root_page: i32) -> Result<()> {
        let cursor = self.storage.open(root_page)?;
        let i = self.ensure_cursor_slot(idx)?;
        self.cursors[i] = CursorSlot::Open { cursor, valid: false };
        Ok(())
    }

    fn cursor_slot(&mut self, idx: i32) -> Result<&mut CursorSlot> {
        let i = self.ensure_cursor_slot(idx)?;
        match &self.cursors[i] {
            CursorSlot::Absent => Err(VdbeError::CursorNotOpen { cursor: idx }),
            CursorSlot::Closed => Err(VdbeError::CursorClosed { cursor: idx }),
            _ => Ok(&mut self.cursors[i]),
        }
    }

    /// Idempotent: closes all open cursors, clears aggregate slots, drops
    /// buffered results. After `cleanup`, the VM is fit only for inspection
    /// (`results()`), never for another `run`.
    pub fn cleanup(&mut self) {
        for slot in &mut self.cursors {
            match slot {
                CursorSlot::Open { cursor, .. } => {
                    cursor.close();
                    *slot = CursorSlot::Closed;
                }
                CursorSlot::VectorSearch(_) => *slot = CursorSlot::Closed,
                _ => {}
            }
        }
        self.agg_slots.clear();
        self.results.clear();
    }

    pub fn run(&mut self) -> Result<RunOutcome> {
        let _span = tracing::debug_span!("vm.run").entered();
        let mut steps: u64 = 0;
        loop {
            if self.halted {
                return Ok(RunOutcome::Halted);
            }
            if steps >= self.limits.step_limit {
                return Err(VdbeError::StepLimitExceeded {
                    limit: self.limits.step_limit,
                });
            }
            if steps.is_multiple_of(self.limits.cancel_poll_interval) {
                if let Some(cause) = self.cancel.as_ref().and_then(|c| c.poll()) {
                    self.cleanup();
                    return Ok(RunOutcome::Cancelled(cause));
                }
            }
            self.step()?;
            steps += 1;
        }
    }

    fn step(&mut self) -> Result<()> {
        let pc = self.pc;
        let len = self.program.len();
        if pc < 0 || pc as usize >= len {
            return Err(VdbeError::ProgramCounterOutOfBounds { pc, len });
        }
        let insn = self.program[pc as usize].clone();
        let timing = self.profiler.as_ref().map(|p| p.begin_opcode(insn.op));
        trace!(pc, op = ?insn.op, "dispatch");

        let mut next_pc = pc + 1;
        match insn.op {
            Opcode::Init | Opcode::Goto => next_pc = insn.p2,
            Opcode::Halt => self.halted = true,
            Opcode::If => {
                if self.get_reg(insn.p1).is_truthy() {
                    next_pc = insn.p2;
                }
            }
            Opcode::IfNot => {
                if !self.get_reg(insn.p1).is_truthy() {
                    next_pc = insn.p2;
                }
            }
            Opcode::Integer => self.set_reg(insn.p2, Value::Int64(insn.p1 as i64))?,
            Opcode::String => {
                let v = match &insn.p4 {
                    P4::Literal(v) => v.clone(),
                    P4::Str(s) => Value::Text(s.clone()),
                    _ => return Err(VdbeError::BadOperand { pc, expected: "P4::Str or P4::Literal" }),
                };
                self.set_reg(insn.p2, v)?;
            }
            Opcode::Null => self.set_reg(insn.p2, Value::Null)?,
            Opcode::Copy => {
                let v = self.get_reg(insn.p1);
                self.set_reg(insn.p2, v)?;
            }
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let ord = self.get_reg(insn.p1).compare(&self.get_reg(insn.p3));
                let taken = match insn.op {
                    Opcode::Eq => ord.is_eq(),
                    Opcode::Ne => ord.is_ne(),
                    Opcode::Lt => ord.is_lt(),
                    Opcode::Le => ord.is_le(),
                    Opcode::Gt => ord.is_gt(),
                    Opcode::Ge => ord.is_ge(),
                    _ => unreachable!(),
                };
                if taken {
                    next_pc = insn.p2;
                }
            }
            Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Divide => {
                let lhs = self.get_reg(insn.p1);
                let rhs = self.get_reg(insn.p2);
                let result = match insn.op {
                    Opcode::Add => lhs.add(&rhs),
                    Opcode::Subtract => lhs.subtract(&rhs),
                    Opcode::Multiply => lhs.multiply(&rhs),
                    Opcode::Divide => lhs.divide(&rhs),
                    _ => unreachable!(),
                };
                self.set_reg(insn.p3, result)?;
            }
            Opcode::Negate => {
                let v = self.get_reg(insn.p1).negate();
                self.set_reg(insn.p2, v)?;
            }
            Opcode::OpenRead | Opcode::OpenWrite => self.open_cursor(insn.p1, insn.p2)?,
            Opcode::Close => {
                let i = self.ensure_cursor_slot(insn.p1)?;
                if let CursorSlot::Open { cursor, .. } = &mut self.cursors[i] {
                    cursor.close();
                }
                self.cursors[i] = CursorSlot::Closed;
            }
            Opcode::Rewind => {
                let found = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid } => {
                        let found = cursor.first()?;
                        *valid = found;
                        found
                    }
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                if !found {
                    next_pc = insn.p2;
                }
            }
            Opcode::Next => {
                let found = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid } => {
                        let found = cursor.next()?;
                        *valid = found;
                        found
                    }
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                if found {
                    next_pc = insn.p2;
                }
            }
            Opcode::Prev => {
                let found = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid } => {
                        let found = cursor.prev()?;
                        *valid = found;
                        found
                    }
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                if found {
                    next_pc = insn.p2;
                }
            }
            Opcode::Column => {
                let bytes = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid: true } => cursor.value(),
                    CursorSlot::Open { valid: false, .. } => None,
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                let value = match bytes {
                    Some(bytes) => {
                        let values = record::decode(&bytes)?;
                        values.get(insn.p2 as usize).cloned().unwrap_or(Value::Null)
                    }
                    None => Value::Null,
                };
                self.set_reg(insn.p3, value)?;
            }
            Opcode::Rowid => {
                let rowid = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid: true } => cursor.rowid(),
                    _ => None,
                };
                let v = rowid.map(|r| Value::Int64(r as i64)).unwrap_or(Value::Null);
                self.set_reg(insn.p2, v)?;
            }
            Opcode::Seek => {
                let rowid = self.get_reg(insn.p3).as_int().unwrap_or(0) as u64;
                let found = match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, valid } => {
                        let found = cursor.seek(rowid)?;
                        *valid = found;
                        found
                    }
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                if !found {
                    next_pc = insn.p2;
                }
            }
            Opcode::MakeRecord => {
                let start = insn.p1.max(0) as usize;
                let count = insn.p2.max(0) as usize;
                let values: Vec<Value> = (start..start + count)
                    .map(|i| self.registers.get(i).cloned().unwrap_or(Value::Null))
                    .collect();
                for v in &values {
                    record::check_representable(v)?;
                }
                self.set_reg(insn.p3, Value::Blob(record::encode(&values)))?;
            }
            Opcode::Insert => {
                let rowid = self.get_reg(insn.p3).as_int().unwrap_or(0) as u64;
                let value = match self.get_reg(insn.p2) {
                    Value::Blob(b) => b,
                    other => record::encode(&[other]),
                };
                match self.cursor_slot(insn.p1)? {
                    CursorSlot::Open { cursor, .. } => cursor.insert(rowid, value)?,
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                }
            }
            Opcode::Delete => match self.cursor_slot(insn.p1)? {
                CursorSlot::Open { cursor, .. } => cursor.delete()?,
                _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
            },
            Opcode::ResultRow => {
                let start = insn.p1.max(0) as usize;
                let count = insn.p2.max(0) as usize;
                let row: Vec<Value> = (start..start + count)
                    .map(|i| self.registers.get(i).cloned().unwrap_or(Value::Null))
                    .collect();
                self.results.push(row);
            }
            Opcode::AggInit => {
                let name = insn
                    .p4
                    .as_str()
                    .ok_or(VdbeError::BadOperand { pc, expected: "P4::Str" })?;
                let agg = self.aggregates.construct(name)?;
                let i = insn.p1.max(0) as usize;
                if self.agg_slots.len() <= i {
                    self.agg_slots.resize_with(i + 1, || None);
                }
                self.agg_slots[i] = Some(agg);
            }
            Opcode::AggStep => {
                let value = self.get_reg(insn.p2);
                let i = insn.p1.max(0) as usize;
                self.agg_slots
                    .get_mut(i)
                    .and_then(|s| s.as_mut())
                    .ok_or(VdbeError::AggregateNotInitialized { slot: insn.p1 })?
                    .step(&value);
            }
            Opcode::AggFinal => {
                let i = insn.p1.max(0) as usize;
                let v = self
                    .agg_slots
                    .get_mut(i)
                    .and_then(|s| s.as_mut())
                    .ok_or(VdbeError::AggregateNotInitialized { slot: insn.p1 })?
                    .finalize();
                self.set_reg(insn.p2, v)?;
            }
            Opcode::VectorDistance => {
                let v = self
                    .scalars
                    .call("VECTOR_DISTANCE", &[self.get_reg(insn.p1), self.get_reg(insn.p2)]);
                self.set_reg(insn.p3, v)?;
            }
            Opcode::VectorDot => {
                let v = vector_dot(&self.get_reg(insn.p1), &self.get_reg(insn.p2));
                self.set_reg(insn.p3, v)?;
            }
            Opcode::VectorNormalize => {
                let v = vector_normalize(&self.get_reg(insn.p1));
                self.set_reg(insn.p2, v)?;
            }
            Opcode::VectorToBlob => {
                let v = self.get_reg(insn.p1);
                self.set_reg(insn.p2, Value::Blob(record::encode(&[v])))?;
            }
            Opcode::VectorFromBlob => {
                let v = match self.get_reg(insn.p1) {
                    Value::Blob(b) => record::decode(&b)?.into_iter().next().unwrap_or(Value::Null),
                    other => other,
                };
                self.set_reg(insn.p2, v)?;
            }
            Opcode::VectorSearchOpen => {
                let index = self
                    .vector_index
                    .clone()
                    .ok_or(VdbeError::CursorNotOpen { cursor: insn.p1 })?;
                let query = match self.get_reg(insn.p3) {
                    Value::Vector(v) => (*v).clone(),
                    _ => Vec::new(),
                };
                let k = insn.p2.max(0) as usize;
                let cur = VectorSearchCursor::open(index.as_ref(), &query, k);
                let i = self.ensure_cursor_slot(insn.p1)?;
                self.cursors[i] = CursorSlot::VectorSearch(cur);
            }
            Opcode::VectorSearchNext => {
                if let Some(cause) = self.cancel.as_ref().and_then(|c| c.poll()) {
                    self.cleanup();
                    return Err(VdbeError::Cancelled(cause));
                }
                let i = self.ensure_cursor_slot(insn.p1)?;
                let valid = match &mut self.cursors[i] {
                    CursorSlot::VectorSearch(cur) => cur.next(),
                    _ => return Err(VdbeError::CursorNotOpen { cursor: insn.p1 }),
                };
                if valid {
                    next_pc = insn.p2;
                }
            }
            Opcode::Transaction | Opcode::Commit | Opcode::Rollback => {
                warn!(op = ?insn.op, "transaction opcode is a reserved no-op at this layer");
            }
            #[allow(unreachable_patterns)]
            other => return Err(VdbeError::UnimplementedOpcode { opcode: other }),
        }

        if let Some(t) = timing {
            t.finish();
        }
        self.pc = next_pc;
        Ok(())
    }
}

fn as_vector(v: &Value) -> Vec<f64> {
    match v {
        Value::Vector(v) => (**v).clone(),
        _ => Vec::new(),
    }
}

fn vector_dot(a: &Value, b: &Value) -> Value {
    let (a, b) = (as_vector(a), as_vector(b));
    if a.len() != b.len() || a.is_empty() {
        return Value::Null;
    }
    Value::Float(a.iter().zip(&b).map(|(x, y)| x * y).sum())
}

fn vector_normalize(v: &Value) -> Value {
    let a = as_vector(v);
    let norm = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.clone();
    }
    Value::vector(&a.iter().map(|x| x / norm).collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::InMemoryStorage;
    use crate::opcode::Instruction;

    fn run_program(program: Program) -> Vm {
        let storage = Rc::new(InMemoryStorage::new());
        let mut vm = Vm::new(Rc::new(program), storage, VdbeLimits::default());
        vm.set_num_registers(8);
        vm.run().unwrap();
        vm
    }

    #[test]
    fn arithmetic_in_registers() {
        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::Integer).p1(10).p2(1));
        p.emit(Instruction::new(Opcode::Integer).p1(32).p2(2));
        p.emit(Instruction::new(Opcode::Add).p1(1).p2(2).p3(3));
        p.emit(Instruction::new(Opcode::Halt));
        let vm = run_program(p);
        assert_eq!(vm.get_reg(3), Value::Int64(42));
    }

    #[test]
    fn table_scan_yields_rows_in_rowid_order() {
        let table = crate::cursor::InMemoryTable::new();
        for rowid in 1..=3u64 {
            table.seed(rowid, record::encode(&[Value::Int64(rowid as i64)]));
        }
        let mut storage_mut = InMemoryStorage::new();
        let root = storage_mut.add_table(table);
        let storage: Rc<dyn Storage> = Rc::new(storage_mut);

        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::OpenRead).p1(0).p2(root));
        let rewind_addr = p.emit(Instruction::new(Opcode::Rewind).p1(0).p2(-1));
        let loop_start = p.addr_of_next() as i32;
        p.emit(Instruction::new(Opcode::Column).p1(0).p2(0).p3(1));
        p.emit(Instruction::new(Opcode::ResultRow).p1(1).p2(1));
        p.emit(Instruction::new(Opcode::Next).p1(0).p2(loop_start));
        let end_addr = p.addr_of_next() as i32;
        p.change_p2(rewind_addr, end_addr);
        p.emit(Instruction::new(Opcode::Close).p1(0));
        p.emit(Instruction::new(Opcode::Halt));

        let mut vm = Vm::new(Rc::new(p), storage, VdbeLimits::default());
        vm.set_num_registers(8);
        vm.run().unwrap();
        assert_eq!(
            vm.results(),
            &[vec![Value::Int64(1)], vec![Value::Int64(2)], vec![Value::Int64(3)]]
        );
    }

    #[test]
    fn empty_aggregate_count_and_sum() {
        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::AggInit).p1(0).p4(P4::Str("COUNT*".into())));
        p.emit(Instruction::new(Opcode::AggFinal).p1(0).p2(1));
        p.emit(Instruction::new(Opcode::Halt));
        let vm = run_program(p);
        assert_eq!(vm.get_reg(1), Value::Int64(0));

        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::AggInit).p1(0).p4(P4::Str("SUM".into())));
        p.emit(Instruction::new(Opcode::AggFinal).p1(0).p2(1));
        p.emit(Instruction::new(Opcode::Halt));
        let vm = run_program(p);
        assert_eq!(vm.get_reg(1), Value::Null);
    }

    struct AlwaysCancel;
    impl CancelSource for AlwaysCancel {
        fn poll(&self) -> Option<CancelCause> {
            Some(CancelCause::Cancelled)
        }
    }

    #[test]
    fn cancelled_tight_loop_cleans_up() {
        let mut p = Program::new();
        let loop_start = p.emit(Instruction::new(Opcode::Goto).p2(-1));
        p.change_p2(loop_start, loop_start as i32);

        let storage = Rc::new(InMemoryStorage::new());
        let mut vm = Vm::new(Rc::new(p), storage, VdbeLimits::default())
            .with_cancel_source(Rc::new(AlwaysCancel));
        vm.set_num_registers(4);
        let outcome = vm.run().unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled(CancelCause::Cancelled));
        assert!(vm.results().is_empty());
    }
}
