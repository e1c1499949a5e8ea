//! Compiled filter programs (§4.3): a flat instruction vector over a small
//! fixed memory-word register file, plus the validator that runs once at
//! load time.

use thiserror::Error;

/// Number of 32-bit memory words a program can address. `L3_EXTRACT` fills
/// the first three (version, L4 offset, L4 protocol); the remainder are
/// scratch space for the program itself.
pub const MEM_WORDS: usize = 16;

pub const MEM_VERSION: usize = 0;
pub const MEM_L4OFF: usize = 1;
pub const MEM_PROTO: usize = 2;

/// The two mandatory coprocessor indices (§4.3).
pub const COPROC_L3_EXTRACT: u8 = 0;
pub const COPROC_TABLE_LOOKUP: u8 = 1;

#[derive(Clone, Copy, Debug)]
pub enum Insn {
    /// Runs the L3-extract coprocessor, filling `MEM_VERSION`/`MEM_L4OFF`/
    /// `MEM_PROTO`.
    CallL3Extract,
    /// Runs the table-lookup coprocessor: `table_id`'s low bits select the
    /// table, `src` selects source vs destination address (§4.3's "high
    /// bit"), result (0/1) is stored into `dst`.
    CallTableLookup { table_id: u16, src: bool, dst: usize },
    /// Loads an immediate into a memory word.
    LoadImm { dst: usize, val: u32 },
    /// Skips `offset` instructions forward (never backward — see
    /// `Program::validate`) if `mem` is zero.
    JmpIfZero { mem: usize, offset: usize },
    /// Skips `offset` instructions forward if `mem` is non-zero.
    JmpIfNonZero { mem: usize, offset: usize },
    /// Terminates the program with a match/no-match verdict.
    Ret(bool),
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub insns: Vec<Insn>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProgramError {
    #[error("program does not end in a Ret and could run off the end")]
    NoTerminatingReturn,
    #[error("jump at {0} targets out of bounds or backward")]
    BadJump(usize),
    #[error("memory word {0} out of range")]
    BadMemWord(usize),
    #[error("unregistered coprocessor index {0}")]
    UnknownCoproc(u8),
}

impl Program {
    pub fn new(insns: Vec<Insn>) -> Program {
        Program { insns }
    }

    /// Rejects programs that do not terminate, reference invalid memory
    /// words, or call an unregistered coprocessor (§4.3). Termination is
    /// guaranteed structurally: only forward jumps are permitted, so the
    /// program counter is strictly increasing and the instruction vector
    /// is finite. This is stricter than the original's runtime-validated
    /// byte-code but satisfies the same "rejected if it does not
    /// terminate" contract without needing a halting-problem oracle.
    pub fn validate(&self, registered_coprocs: &[u8]) -> Result<(), ProgramError> {
        if self.insns.is_empty() {
            return Err(ProgramError::NoTerminatingReturn);
        }
        for (pc, insn) in self.insns.iter().enumerate() {
            match *insn {
                Insn::CallL3Extract => {
                    if !registered_coprocs.contains(&COPROC_L3_EXTRACT) {
                        return Err(ProgramError::UnknownCoproc(COPROC_L3_EXTRACT));
                    }
                }
                Insn::CallTableLookup { dst, .. } => {
                    if !registered_coprocs.contains(&COPROC_TABLE_LOOKUP) {
                        return Err(ProgramError::UnknownCoproc(COPROC_TABLE_LOOKUP));
                    }
                    if dst >= MEM_WORDS {
                        return Err(ProgramError::BadMemWord(dst));
                    }
                }
                Insn::LoadImm { dst, .. } => {
                    if dst >= MEM_WORDS {
                        return Err(ProgramError::BadMemWord(dst));
                    }
                }
                Insn::JmpIfZero { mem, offset } | Insn::JmpIfNonZero { mem, offset } => {
                    if mem >= MEM_WORDS {
                        return Err(ProgramError::BadMemWord(mem));
                    }
                    let target = pc + 1 + offset;
                    if offset == 0 || target > self.insns.len() {
                        return Err(ProgramError::BadJump(pc));
                    }
                }
                Insn::Ret(_) => {}
            }
        }
        if !matches!(self.insns.last(), Some(Insn::Ret(_))) {
            // Every path must eventually reach a Ret; the interpreter
            // treats running off the end as a hard error, so the last
            // instruction must itself be unconditional.
            return Err(ProgramError::NoTerminatingReturn);
        }
        Ok(())
    }
}
