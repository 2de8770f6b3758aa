// This module holds the textual side of generic machine IR: a parser for the format
// MachineFunction prints (parser) and a reference interpreter (interp) that executes a
// function over concrete bit patterns. Together they let tests and the command line
// driver feed functions in as text and check that legalization preserves behavior.

//! MIR text format and reference interpreter.

pub mod interp;
pub mod parser;

pub use interp::{run, Frame, InterpEnv, InterpError, InterpResult, MemoryEnv};
pub use parser::{parse_function, parse_functions, ParseError, ParseResult};
