//! The two mandatory coprocessors (§4.3): L3 extract and table lookup.

use crate::npc::Npc;
use crate::table::TableRegistry;

/// Per-run context the interpreter hands to a coprocessor call: the
/// packet being classified and the table registry `CALL_TABLE_LOOKUP`
/// consults.
pub struct CoprocCtx<'a> {
    pub npc: &'a Npc,
    pub tables: &'a TableRegistry,
}

/// L3 extract: IP version encoded from address length (4 -> 4, 16 -> 6),
/// L4 offset, L4 protocol (§4.3).
pub fn l3_extract(ctx: &CoprocCtx) -> [u32; 3] {
    let version = if ctx.npc.alen == 16 { 6 } else { 4 };
    [version, ctx.npc.l4_off as u32, ctx.npc.proto as u32]
}

/// Table lookup: `arg`'s low bits are the table id, the high bit selects
/// source (0) vs destination (1) address (§4.3). Returns non-zero on hit.
pub fn table_lookup(ctx: &CoprocCtx, table_id: u16, src: bool) -> bool {
    let addr = if src { &ctx.npc.src_addr } else { &ctx.npc.dst_addr };
    ctx.tables.lookup(table_id, addr)
}
