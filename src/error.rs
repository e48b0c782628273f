use thiserror::Error;

use crate::opcode::Opcode;

pub type Result<T> = std::result::Result<T, VdbeError>;

/// The reason a `Vm::run` call was cut short by cancellation rather than by
/// `Halt` or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    DeadlineExceeded,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum VdbeError {
    #[error("program counter {pc} out of bounds (program has {len} instructions)")]
    ProgramCounterOutOfBounds { pc: i32, len: usize },

    #[error("nil instruction at pc {pc}")]
    NilInstruction { pc: i32 },

    #[error("step limit exceeded after {limit} instructions")]
    StepLimitExceeded { limit: u64 },

    #[error("opcode {opcode:?} is not implemented")]
    UnimplementedOpcode { opcode: Opcode },

    #[error("operand p4 at pc {pc} missing or ill-typed, expected {expected}")]
    BadOperand { pc: i32, expected: &'static str },

    #[error("register {reg} is out of bounds for write (register file has {len} slots)")]
    RegisterOutOfBounds { reg: i32, len: usize },

    #[error("cursor {cursor} is not open")]
    CursorNotOpen { cursor: i32 },

    #[error("cursor {cursor} is closed")]
    CursorClosed { cursor: i32 },

    #[error("storage layer error: {0}")]
    Storage(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("unsupported unary operator: {0}")]
    UnsupportedUnaryOp(String),

    #[error("unsupported binary operator: {0}")]
    UnsupportedBinaryOp(String),

    #[error("value kind {0} cannot be stored in a record")]
    UnsupportedLiteralType(String),

    #[error("unknown aggregate function: {0}")]
    UnknownAggregate(String),

    #[error("aggregate slot {slot} was not initialized")]
    AggregateNotInitialized { slot: i32 },

    #[error("execution cancelled: {0:?}")]
    Cancelled(CancelCause),
}
