// A register-based bytecode interpreter for an embedded SQL engine: value
// model, instruction set, interpreter, storage cursor interface, record
// codec, scalar/aggregate function registries, a single-table-scan SQL
// compiler, and an execution profiler.

pub mod config;
pub mod cursor;
pub mod error;
pub mod functions;
pub mod opcode;
pub mod profiler;
pub mod record;
pub mod translate;
pub mod value;
pub mod vm;

pub use config::VdbeLimits;
pub use error::{Result, VdbeError};
pub use opcode::{Instruction, Opcode, Program, P4};
pub use value::Value;
pub use vm::Vm;
