pub mod ast;
pub mod compiler;

pub use ast::{
    Assignment, BinaryOp, Catalog, ColumnDef, CreateTableStmt, DeleteStmt, Expr, InsertStmt,
    SelectStmt, Statement, TableDef, UnaryOp, UpdateStmt,
};
pub use compiler::{compile, CompiledProgram};
