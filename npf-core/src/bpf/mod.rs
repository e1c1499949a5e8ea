//! The byte-code classifier (§4.3): runs a compiled filter program against
//! a packet. Programs are pre-validated and interpreted; no JIT is
//! implemented (see `DESIGN.md` for the Open Question resolution).

pub mod coproc;
pub mod interp;
pub mod program;

pub use coproc::CoprocCtx;
pub use interp::run;
pub use program::{Insn, Program, ProgramError};
