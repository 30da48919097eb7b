// Library code reports through Result values; only the warning paths
// write to stderr directly (via writeln!, never eprintln!).
#![deny(clippy::print_stderr)]

//! Interpreter for the NIC scripting language.
//!
//! The compiler (`nicc`) turns source text into a textual intermediate
//! representation; this crate loads that IR and executes it. See
//! [`loader`] for the file format, [`vm`] for the execution core, and
//! [`intrinsics`] for the built-in function table.

pub mod cancel;
pub mod clock;
pub mod intrinsics;
pub mod ir;
pub mod loader;
pub mod vm;

pub use loader::{load_program, write_program, LoadError};
pub use vm::{Vm, VmError};
