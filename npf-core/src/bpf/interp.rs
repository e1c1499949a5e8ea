//! The byte-code interpreter (§4.3). The "fast path JIT" the spec mentions
//! is a performance optimization over this conformant interpreter, not a
//! semantic requirement (see `DESIGN.md`); `run` always interprets.

use crate::bpf::coproc::{self, CoprocCtx};
use crate::bpf::program::{Insn, Program, MEM_WORDS};

/// Executes `prog` against `ctx`, returning the program's match verdict.
/// The caller is expected to have already run [`Program::validate`] at
/// load time; `run` itself trusts a validated program and never panics on
/// one (an un-validated program could still panic on an out-of-range
/// memory word, by design — see `Program::validate`).
pub fn run(prog: &Program, ctx: &CoprocCtx) -> bool {
    let mut mem = [0u32; MEM_WORDS];
    let mut pc = 0usize;
    loop {
        match prog.insns[pc] {
            Insn::CallL3Extract => {
                let [version, l4off, proto] = coproc::l3_extract(ctx);
                mem[crate::bpf::program::MEM_VERSION] = version;
                mem[crate::bpf::program::MEM_L4OFF] = l4off;
                mem[crate::bpf::program::MEM_PROTO] = proto;
                pc += 1;
            }
            Insn::CallTableLookup { table_id, src, dst } => {
                mem[dst] = coproc::table_lookup(ctx, table_id, src) as u32;
                pc += 1;
            }
            Insn::LoadImm { dst, val } => {
                mem[dst] = val;
                pc += 1;
            }
            Insn::JmpIfZero { mem: m, offset } => {
                pc += 1;
                if mem[m] == 0 {
                    pc += offset;
                }
            }
            Insn::JmpIfNonZero { mem: m, offset } => {
                pc += 1;
                if mem[m] != 0 {
                    pc += offset;
                }
            }
            Insn::Ret(matched) => return matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;
    use crate::bpf::program::*;
    use crate::npc::Npc;
    use crate::table::{Table, TableRegistry};

    const COPROCS: &[u8] = &[COPROC_L3_EXTRACT, COPROC_TABLE_LOOKUP];

    #[test]
    fn matches_when_source_address_is_in_table() {
        let host = Addr::from_ipv4("10.1.1.1".parse().unwrap());
        let mut tables = TableRegistry::new();
        tables.insert_table(0, Table::new_ipset(4)).unwrap();
        tables.get(0).unwrap().insert(host, crate::addr::NO_MASK).unwrap();

        let prog = Program::new(vec![
            Insn::CallL3Extract,
            Insn::CallTableLookup { table_id: 0, src: true, dst: 5 },
            Insn::JmpIfZero { mem: 5, offset: 1 },
            Insn::Ret(true),
            Insn::Ret(false),
        ]);
        prog.validate(COPROCS).unwrap();

        let npc = Npc { src_addr: host, ..Default::default() };
        let ctx = CoprocCtx { npc: &npc, tables: &tables };
        assert!(run(&prog, &ctx));

        let other = Npc {
            src_addr: Addr::from_ipv4("10.1.1.2".parse().unwrap()),
            ..Default::default()
        };
        let ctx2 = CoprocCtx { npc: &other, tables: &tables };
        assert!(!run(&prog, &ctx2));
    }
}
