// AST-to-bytecode lowering: single-table scans with an optional row
// predicate, `INSERT` (values and `INSERT ... SELECT`), `UPDATE`, `DELETE`,
// `CREATE TABLE`. Registers and cursors are allocated monotonically; jump
// fixups go through `opcode::Program`'s `addr_of_next`/`change_p2`.

use std::collections::HashMap;

use crate::error::{Result, VdbeError};
use crate::opcode::{Instruction, Opcode, Program, P4};
use crate::value::Value;

use super::ast::{
    Assignment, BinaryOp, Catalog, CreateTableStmt, DeleteStmt, Expr, InsertStmt, SelectStmt,
    Statement, TableDef, UnaryOp, UpdateStmt,
};

/// A compiled program paired with the register-file size the VM must
/// pre-size via `Vm::set_num_registers` before `run`.
pub struct CompiledProgram {
    pub program: Program,
    pub num_registers: usize,
}

struct Compiler {
    program: Program,
    next_register: i32,
    next_cursor: i32,
}

impl Compiler {
    fn new() -> Self {
        Self {
            program: Program::new(),
            next_register: 1,
            next_cursor: 0,
        }
    }

    fn alloc_register(&mut self) -> i32 {
        let r = self.next_register;
        self.next_register += 1;
        r
    }

    fn alloc_registers(&mut self, n: usize) -> i32 {
        let start = self.next_register;
        self.next_register += n as i32;
        start
    }

    fn alloc_cursor(&mut self) -> i32 {
        let c = self.next_cursor;
        self.next_cursor += 1;
        c
    }

    fn emit(&mut self, insn: Instruction) -> usize {
        self.program.emit(insn)
    }

    fn finish(self) -> CompiledProgram {
        CompiledProgram {
            program: self.program,
            num_registers: self.next_register as usize,
        }
    }

    fn compile_literal(&mut self, v: &Value, dest: i32) {
        match v {
            Value::Null => {
                self.emit(Instruction::new(Opcode::Null).p2(dest));
            }
            other => {
                if let Some(i) = other.as_int() {
                    if let Ok(p1) = i32::try_from(i) {
                        self.emit(Instruction::new(Opcode::Integer).p1(p1).p2(dest));
                        return;
                    }
                }
                self.emit(
                    Instruction::new(Opcode::String)
                        .p2(dest)
                        .p4(P4::Literal(other.clone())),
                );
            }
        }
    }

    /// Materializes `lhs cmp rhs` as `0`/`1` in `dest`: write 0 to dest,
    /// branch-if-true to "set 1", else fall through to the end.
    fn lower_comparison(&mut self, op: Opcode, lhs: i32, rhs: i32, dest: i32) {
        self.emit(Instruction::new(Opcode::Integer).p1(0).p2(dest));
        let branch = self.emit(Instruction::new(op).p1(lhs).p2(-1).p3(rhs));
        let goto = self.emit(Instruction::new(Opcode::Goto).p2(-1));
        let set1 = self.program.addr_of_next() as i32;
        self.program.change_p2(branch, set1);
        self.emit(Instruction::new(Opcode::Integer).p1(1).p2(dest));
        let end = self.program.addr_of_next() as i32;
        self.program.change_p2(goto, end);
    }

    /// Inverts the `0`/`1` truthiness already materialized in `dest`.
    fn lower_not(&mut self, dest: i32) {
        let branch = self.emit(Instruction::new(Opcode::IfNot).p1(dest).p2(-1));
        self.emit(Instruction::new(Opcode::Integer).p1(0).p2(dest));
        let goto = self.emit(Instruction::new(Opcode::Goto).p2(-1));
        let set1 = self.program.addr_of_next() as i32;
        self.program.change_p2(branch, set1);
        self.emit(Instruction::new(Opcode::Integer).p1(1).p2(dest));
        let end = self.program.addr_of_next() as i32;
        self.program.change_p2(goto, end);
    }

    fn compile_expr(&mut self, expr: &Expr, colmap: &HashMap<String, i32>, dest: i32) -> Result<()> {
        match expr {
            Expr::Literal(v) => {
                self.compile_literal(v, dest);
                Ok(())
            }
            Expr::ColumnRef(name) => {
                let src = *colmap
                    .get(name)
                    .ok_or_else(|| VdbeError::UnknownColumn(name.clone()))?;
                self.emit(Instruction::new(Opcode::Copy).p1(src).p2(dest));
                Ok(())
            }
            Expr::Unary { op: UnaryOp::Neg, expr } => {
                self.compile_expr(expr, colmap, dest)?;
                self.emit(Instruction::new(Opcode::Negate).p1(dest).p2(dest));
                Ok(())
            }
            Expr::Unary { op: UnaryOp::Not, expr } => {
                self.compile_expr(expr, colmap, dest)?;
                self.lower_not(dest);
                Ok(())
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                self.compile_expr(left, colmap, dest)?;
                let skip = self.emit(Instruction::new(Opcode::IfNot).p1(dest).p2(-1));
                self.compile_expr(right, colmap, dest)?;
                let end = self.program.addr_of_next() as i32;
                self.program.change_p2(skip, end);
                Ok(())
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                self.compile_expr(left, colmap, dest)?;
                let skip = self.emit(Instruction::new(Opcode::If).p1(dest).p2(-1));
                self.compile_expr(right, colmap, dest)?;
                let end = self.program.addr_of_next() as i32;
                self.program.change_p2(skip, end);
                Ok(())
            }
            Expr::Binary { op, left, right } => {
                let lreg = self.alloc_register();
                let rreg = self.alloc_register();
                self.compile_expr(left, colmap, lreg)?;
                self.compile_expr(right, colmap, rreg)?;
                match op {
                    BinaryOp::Add => {
                        self.emit(Instruction::new(Opcode::Add).p1(lreg).p2(rreg).p3(dest));
                    }
                    BinaryOp::Sub => {
                        self.emit(Instruction::new(Opcode::Subtract).p1(lreg).p2(rreg).p3(dest));
                    }
                    BinaryOp::Mul => {
                        self.emit(Instruction::new(Opcode::Multiply).p1(lreg).p2(rreg).p3(dest));
                    }
                    BinaryOp::Div => {
                        self.emit(Instruction::new(Opcode::Divide).p1(lreg).p2(rreg).p3(dest));
                    }
                    BinaryOp::Eq => self.lower_comparison(Opcode::Eq, lreg, rreg, dest),
                    BinaryOp::Ne => self.lower_comparison(Opcode::Ne, lreg, rreg, dest),
                    BinaryOp::Lt => self.lower_comparison(Opcode::Lt, lreg, rreg, dest),
                    BinaryOp::Le => self.lower_comparison(Opcode::Le, lreg, rreg, dest),
                    BinaryOp::Gt => self.lower_comparison(Opcode::Gt, lreg, rreg, dest),
                    BinaryOp::Ge => self.lower_comparison(Opcode::Ge, lreg, rreg, dest),
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                }
                Ok(())
            }
        }
    }

    fn load_columns(&mut self, cur: i32, table: &TableDef, names: &[String]) -> Result<(i32, HashMap<String, i32>)> {
        let start = self.alloc_registers(names.len());
        let mut colmap = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            let idx = table
                .column_index(name)
                .ok_or_else(|| VdbeError::UnknownColumn(name.clone()))?;
            self.emit(
                Instruction::new(Opcode::Column)
                    .p1(cur)
                    .p2(idx as i32)
                    .p3(start + i as i32),
            );
            colmap.insert(name.clone(), start + i as i32);
        }
        Ok((start, colmap))
    }

    fn all_column_names(table: &TableDef) -> Vec<String> {
        table.columns.iter().map(|c| c.name.clone()).collect()
    }
}

pub fn compile(stmt: &Statement, catalog: &dyn Catalog) -> Result<CompiledProgram> {
    match stmt {
        Statement::Select(s) => compile_select(s, catalog),
        Statement::Insert(s) => compile_insert(s, catalog),
        Statement::Update(s) => compile_update(s, catalog),
        Statement::Delete(s) => compile_delete(s, catalog),
        Statement::CreateTable(s) => compile_create_table(s),
    }
}

fn get_table(catalog: &dyn Catalog, name: &str) -> Result<TableDef> {
    catalog
        .get_table(name)
        .ok_or_else(|| VdbeError::UnknownTable(name.to_string()))
}

fn compile_select(stmt: &SelectStmt, catalog: &dyn Catalog) -> Result<CompiledProgram> {
    let table = get_table(catalog, &stmt.table)?;
    let columns = if stmt.columns.is_empty() {
        Compiler::all_column_names(&table)
    } else {
        stmt.columns.clone()
    };
    let all_columns = Compiler::all_column_names(&table);

    let mut c = Compiler::new();
    let cur = c.alloc_cursor();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let open_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, open_addr);
    c.emit(Instruction::new(Opcode::OpenRead).p1(cur).p2(table.root_page));
    let rewind = c.emit(Instruction::new(Opcode::Rewind).p1(cur).p2(-1));

    let loop_start = c.program.addr_of_next() as i32;
    let (_, colmap) = c.load_columns(cur, &table, &all_columns)?;
    let result_start = c.alloc_registers(columns.len());
    for (i, name) in columns.iter().enumerate() {
        let src = *colmap
            .get(name)
            .ok_or_else(|| VdbeError::UnknownColumn(name.clone()))?;
        c.emit(Instruction::new(Opcode::Copy).p1(src).p2(result_start + i as i32));
    }

    if let Some(pred) = &stmt.predicate {
        let cond = c.alloc_register();
        c.compile_expr(pred, &colmap, cond)?;
        let skip = c.emit(Instruction::new(Opcode::IfNot).p1(cond).p2(-1));
        c.emit(Instruction::new(Opcode::ResultRow).p1(result_start).p2(columns.len() as i32));
        let next_addr = c.program.addr_of_next() as i32;
        c.program.change_p2(skip, next_addr);
    } else {
        c.emit(Instruction::new(Opcode::ResultRow).p1(result_start).p2(columns.len() as i32));
    }

    c.emit(Instruction::new(Opcode::Next).p1(cur).p2(loop_start));
    let end = c.program.addr_of_next() as i32;
    c.program.change_p2(rewind, end);
    c.emit(Instruction::new(Opcode::Close).p1(cur));
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}

fn compile_insert(stmt: &InsertStmt, catalog: &dyn Catalog) -> Result<CompiledProgram> {
    if let Some(source) = &stmt.select {
        return compile_insert_select(stmt, source, catalog);
    }
    let table = get_table(catalog, &stmt.table)?;
    for row in &stmt.values {
        if row.len() != stmt.columns.len() {
            return Err(VdbeError::ColumnCountMismatch {
                expected: stmt.columns.len(),
                actual: row.len(),
            });
        }
    }

    let mut c = Compiler::new();
    let cur = c.alloc_cursor();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let open_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, open_addr);
    c.emit(Instruction::new(Opcode::OpenWrite).p1(cur).p2(table.root_page));

    let col_start = c.alloc_registers(table.columns.len());
    let empty_colmap = HashMap::new();
    for (row_index, row) in stmt.values.iter().enumerate() {
        for i in 0..table.columns.len() {
            c.emit(Instruction::new(Opcode::Null).p2(col_start + i as i32));
        }
        for (name, expr) in stmt.columns.iter().zip(row.iter()) {
            let idx = table
                .column_index(name)
                .ok_or_else(|| VdbeError::UnknownColumn(name.clone()))?;
            c.compile_expr(expr, &empty_colmap, col_start + idx as i32)?;
        }
        let rowid_reg = c.alloc_register();
        if let Some(pk_idx) = table.primary_key_index() {
            c.emit(
                Instruction::new(Opcode::Copy)
                    .p1(col_start + pk_idx as i32)
                    .p2(rowid_reg),
            );
        } else {
            c.emit(
                Instruction::new(Opcode::Integer)
                    .p1(row_index as i32 + 1)
                    .p2(rowid_reg),
            );
        }
        let record_reg = c.alloc_register();
        c.emit(
            Instruction::new(Opcode::MakeRecord)
                .p1(col_start)
                .p2(table.columns.len() as i32)
                .p3(record_reg),
        );
        c.emit(
            Instruction::new(Opcode::Insert)
                .p1(cur)
                .p2(record_reg)
                .p3(rowid_reg),
        );
    }
    c.emit(Instruction::new(Opcode::Close).p1(cur));
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}

fn compile_insert_select(
    stmt: &InsertStmt,
    source: &SelectStmt,
    catalog: &dyn Catalog,
) -> Result<CompiledProgram> {
    let dest = get_table(catalog, &stmt.table)?;
    let src_table = get_table(catalog, &source.table)?;
    let src_columns = if source.columns.is_empty() {
        Compiler::all_column_names(&src_table)
    } else {
        source.columns.clone()
    };
    if stmt.columns.len() != src_columns.len() {
        return Err(VdbeError::ColumnCountMismatch {
            expected: stmt.columns.len(),
            actual: src_columns.len(),
        });
    }

    let mut c = Compiler::new();
    let src_cur = c.alloc_cursor();
    let dst_cur = c.alloc_cursor();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let open_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, open_addr);
    c.emit(Instruction::new(Opcode::OpenRead).p1(src_cur).p2(src_table.root_page));
    c.emit(Instruction::new(Opcode::OpenWrite).p1(dst_cur).p2(dest.root_page));
    let rewind = c.emit(Instruction::new(Opcode::Rewind).p1(src_cur).p2(-1));

    let loop_start = c.program.addr_of_next() as i32;
    let (src_start, colmap) = c.load_columns(src_cur, &src_table, &src_columns)?;

    let ifnot_fixup = if let Some(pred) = &source.predicate {
        let cond = c.alloc_register();
        c.compile_expr(pred, &colmap, cond)?;
        Some(c.emit(Instruction::new(Opcode::IfNot).p1(cond).p2(-1)))
    } else {
        None
    };

    let dest_start = c.alloc_registers(dest.columns.len());
    for i in 0..dest.columns.len() {
        c.emit(Instruction::new(Opcode::Null).p2(dest_start + i as i32));
    }
    for (i, dest_col_name) in stmt.columns.iter().enumerate() {
        let idx = dest
            .column_index(dest_col_name)
            .ok_or_else(|| VdbeError::UnknownColumn(dest_col_name.clone()))?;
        c.emit(
            Instruction::new(Opcode::Copy)
                .p1(src_start + i as i32)
                .p2(dest_start + idx as i32),
        );
    }
    let rowid_reg = c.alloc_register();
    if let Some(pk_idx) = dest.primary_key_index() {
        c.emit(
            Instruction::new(Opcode::Copy)
                .p1(dest_start + pk_idx as i32)
                .p2(rowid_reg),
        );
    } else {
        c.emit(Instruction::new(Opcode::Rowid).p1(src_cur).p2(rowid_reg));
    }
    let record_reg = c.alloc_register();
    c.emit(
        Instruction::new(Opcode::MakeRecord)
            .p1(dest_start)
            .p2(dest.columns.len() as i32)
            .p3(record_reg),
    );
    c.emit(
        Instruction::new(Opcode::Insert)
            .p1(dst_cur)
            .p2(record_reg)
            .p3(rowid_reg),
    );

    let next_addr = c.program.addr_of_next() as i32;
    if let Some(addr) = ifnot_fixup {
        c.program.change_p2(addr, next_addr);
    }
    c.emit(Instruction::new(Opcode::Next).p1(src_cur).p2(loop_start));
    let end = c.program.addr_of_next() as i32;
    c.program.change_p2(rewind, end);
    c.emit(Instruction::new(Opcode::Close).p1(src_cur));
    c.emit(Instruction::new(Opcode::Close).p1(dst_cur));
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}

fn compile_update(stmt: &UpdateStmt, catalog: &dyn Catalog) -> Result<CompiledProgram> {
    let table = get_table(catalog, &stmt.table)?;
    let columns = Compiler::all_column_names(&table);

    let mut c = Compiler::new();
    let cur = c.alloc_cursor();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let open_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, open_addr);
    c.emit(Instruction::new(Opcode::OpenWrite).p1(cur).p2(table.root_page));
    let rewind = c.emit(Instruction::new(Opcode::Rewind).p1(cur).p2(-1));

    let loop_start = c.program.addr_of_next() as i32;
    let (col_start, colmap) = c.load_columns(cur, &table, &columns)?;

    let ifnot_fixup = if let Some(pred) = &stmt.predicate {
        let cond = c.alloc_register();
        c.compile_expr(pred, &colmap, cond)?;
        Some(c.emit(Instruction::new(Opcode::IfNot).p1(cond).p2(-1)))
    } else {
        None
    };

    let assigned: Vec<(usize, i32)> = stmt
        .assignments
        .iter()
        .map(|a: &Assignment| -> Result<(usize, i32)> {
            let idx = table
                .column_index(&a.column)
                .ok_or_else(|| VdbeError::UnknownColumn(a.column.clone()))?;
            let tmp = c.alloc_register();
            c.compile_expr(&a.value, &colmap, tmp)?;
            Ok((idx, tmp))
        })
        .collect::<Result<_>>()?;
    for (idx, tmp) in assigned {
        c.emit(Instruction::new(Opcode::Copy).p1(tmp).p2(col_start + idx as i32));
    }

    let rowid_reg = c.alloc_register();
    c.emit(Instruction::new(Opcode::Rowid).p1(cur).p2(rowid_reg));
    let record_reg = c.alloc_register();
    c.emit(
        Instruction::new(Opcode::MakeRecord)
            .p1(col_start)
            .p2(table.columns.len() as i32)
            .p3(record_reg),
    );
    c.emit(
        Instruction::new(Opcode::Insert)
            .p1(cur)
            .p2(record_reg)
            .p3(rowid_reg),
    );

    let next_addr = c.program.addr_of_next() as i32;
    if let Some(addr) = ifnot_fixup {
        c.program.change_p2(addr, next_addr);
    }
    c.emit(Instruction::new(Opcode::Next).p1(cur).p2(loop_start));
    let end = c.program.addr_of_next() as i32;
    c.program.change_p2(rewind, end);
    c.emit(Instruction::new(Opcode::Close).p1(cur));
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}

fn compile_delete(stmt: &DeleteStmt, catalog: &dyn Catalog) -> Result<CompiledProgram> {
    let table = get_table(catalog, &stmt.table)?;
    let mut c = Compiler::new();
    let cur = c.alloc_cursor();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let open_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, open_addr);
    c.emit(Instruction::new(Opcode::OpenWrite).p1(cur).p2(table.root_page));

    match &stmt.predicate {
        None => {
            let rewind_target = c.program.addr_of_next() as i32;
            let rewind = c.emit(Instruction::new(Opcode::Rewind).p1(cur).p2(-1));
            c.emit(Instruction::new(Opcode::Delete).p1(cur));
            c.emit(Instruction::new(Opcode::Goto).p2(rewind_target));
            let end = c.program.addr_of_next() as i32;
            c.program.change_p2(rewind, end);
        }
        Some(pred) => {
            let rewind = c.emit(Instruction::new(Opcode::Rewind).p1(cur).p2(-1));
            let loop_start = c.program.addr_of_next() as i32;
            let columns = Compiler::all_column_names(&table);
            let (_start, colmap) = c.load_columns(cur, &table, &columns)?;
            let cond = c.alloc_register();
            c.compile_expr(pred, &colmap, cond)?;
            let skip = c.emit(Instruction::new(Opcode::IfNot).p1(cond).p2(-1));
            c.emit(Instruction::new(Opcode::Delete).p1(cur));
            let next_addr = c.program.addr_of_next() as i32;
            c.program.change_p2(skip, next_addr);
            c.emit(Instruction::new(Opcode::Next).p1(cur).p2(loop_start));
            let end = c.program.addr_of_next() as i32;
            c.program.change_p2(rewind, end);
        }
    }

    c.emit(Instruction::new(Opcode::Close).p1(cur));
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}

fn compile_create_table(_stmt: &CreateTableStmt) -> Result<CompiledProgram> {
    let mut c = Compiler::new();
    let init = c.emit(Instruction::new(Opcode::Init).p2(-1));
    let halt_addr = c.program.addr_of_next() as i32;
    c.program.change_p2(init, halt_addr);
    c.emit(Instruction::new(Opcode::Halt));
    Ok(c.finish())
}
