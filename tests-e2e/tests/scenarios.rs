//! The six concrete scenarios of `SPEC_FULL.md` §8, driven end to end
//! through a constructed `System`/`Pipeline` rather than against any one
//! module in isolation.

use arc_swap::ArcSwap;
use npf_core::addr::Addr;
use npf_core::alg::pptp::{self, PptpTcpContext};
use npf_core::alg::AlgRegistry;
use npf_core::conndb::key::ConnectionKey;
use npf_core::conndb::{ConnDb, Connection};
use npf_core::decision::Decision;
use npf_core::iface::testutil::{QueueNic, StaticResolver, StaticRoutingTable};
use npf_core::iface::{Buf, LinkAddr, RouteHop};
use npf_core::nat::{AlgState, NatBinding, NatKind, NatPolicy};
use npf_core::pipeline::{Pipeline, Verdict};
use npf_core::proto;
use npf_core::rproc::ratelimit::{CarConfig, RateLimitProc};
use npf_core::ruleset::{Rule, Ruleset, DIR_BOTH};
use npf_core::stats::Stats;
use npf_core::table::{Table, TableRegistry};
use std::sync::Arc;

fn build_udp_v4(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 28];
    buf[0] = 0x45;
    buf[9] = proto::IPPROTO_UDP;
    buf[12..16].copy_from_slice(&src);
    buf[16..20].copy_from_slice(&dst);
    buf[20..22].copy_from_slice(&sport.to_be_bytes());
    buf[22..24].copy_from_slice(&dport.to_be_bytes());
    buf
}

struct Harness {
    conndb: ConnDb,
    tables: TableRegistry,
    algs: AlgRegistry,
    ruleset: ArcSwap<Ruleset>,
    stats: Stats,
    nic: QueueNic,
    resolver: StaticResolver,
    routes: StaticRoutingTable,
}

impl Harness {
    fn new(ruleset: Ruleset) -> Self {
        let routes = StaticRoutingTable::new();
        routes.add_route(
            Addr::from_ipv4([10, 1, 1, 252].into()),
            32,
            4,
            RouteHop { egress_if: 2, next_hop: Addr::from_ipv4([10, 1, 1, 252].into()), alen: 4 },
        );
        Harness {
            conndb: ConnDb::default(),
            tables: TableRegistry::new(),
            algs: AlgRegistry::default(),
            ruleset: ArcSwap::from_pointee(ruleset),
            stats: Stats::new(),
            nic: QueueNic::new(),
            resolver: StaticResolver { answer: Some(LinkAddr([1, 2, 3, 4, 5, 6])) },
            routes,
        }
    }

    fn pipeline(&self) -> Pipeline<'_, QueueNic, StaticResolver, StaticRoutingTable> {
        Pipeline {
            conndb: &self.conndb,
            tables: &self.tables,
            algs: &self.algs,
            ruleset: &self.ruleset,
            stats: &self.stats,
            nic: &self.nic,
            resolver: &self.resolver,
            routes: &self.routes,
        }
    }
}

fn host_filter_program(table_id: u16) -> npf_core::bpf::Program {
    use npf_core::bpf::{Insn, Program};
    const MEM_SCRATCH: usize = 3;
    Program::new(vec![
        Insn::CallL3Extract,
        Insn::CallTableLookup { table_id, src: true, dst: MEM_SCRATCH },
        Insn::JmpIfZero { mem: MEM_SCRATCH, offset: 1 },
        Insn::Ret(true),
        Insn::Ret(false),
    ])
}

/// S1: ruleset with one "pass host 10.1.1.1" rule passes a UDP packet from
/// that host and drops one from a different host (S2, same harness).
#[test]
fn s1_s2_ruleset_pass_and_block_on_host_match() {
    let mut tables = TableRegistry::new();
    let host_table = Table::new_ipset(4);
    host_table.insert(Addr::from_ipv4([10, 1, 1, 1].into()), npf_core::addr::NO_MASK).unwrap();
    tables.insert_table(0, host_table).unwrap();

    let rule = Rule::new(1, DIR_BOTH, Decision::Pass).with_filter(host_filter_program(0));
    let ruleset = Ruleset::new(vec![rule]);

    let mut harness = Harness::new(ruleset);
    harness.tables = tables;

    let pipeline = harness.pipeline();
    let pass_buf = Buf::new(build_udp_v4([10, 1, 1, 1], [10, 1, 1, 252], 25000, 80));
    let verdict = pipeline.process_packet(pass_buf, 1);
    assert!(matches!(verdict, Verdict::Forwarded { egress_if: 2, .. }), "S1: expected PASS");

    let block_buf = Buf::new(build_udp_v4([10, 1, 1, 2], [10, 1, 1, 252], 25001, 80));
    let verdict = pipeline.process_packet(block_buf, 1);
    assert!(matches!(verdict, Verdict::Dropped), "S2: expected BLOCK");
}

/// S3: inserting `fe80::203:c0ff:0/32` into an LPM table makes
/// `fe80::203:c0ff:fe10:1234` hit; removing the prefix makes it miss again.
#[test]
fn s3_lpm_insert_lookup_remove() {
    let table = Table::new_lpm(16);
    let prefix = Addr::from_ipv6("fe80::203:c0ff:0".parse().unwrap());
    table.insert(prefix, 32).unwrap();

    let host = Addr::from_ipv6("fe80::203:c0ff:fe10:1234".parse().unwrap());
    assert!(table.lookup(&host), "S3: expected LPM hit before removal");

    table.remove(prefix, 32).unwrap();
    assert!(!table.lookup(&host), "S3: expected LPM miss after removal");
}

/// S4: a freshly established TCP flow is reachable by both its forward and
/// backward key, and both resolve to the same connection.
#[test]
fn s4_connection_lookup_is_symmetric() {
    let client = Addr::from_ipv4([192, 0, 2, 1].into());
    let server = Addr::from_ipv4([198, 51, 100, 1].into());
    let (forw_key, back_key) = ConnectionKey::pair(proto::IPPROTO_TCP, 4, client, server, 1024, 80);

    let conndb = ConnDb::default();
    let conn = Arc::new(Connection::new(forw_key, back_key, proto::IPPROTO_TCP, Decision::Pass, 1));
    assert!(conndb.insert(conn.clone()));

    let (fwd_hit, fwd_dir) = conndb.lookup(&forw_key).expect("forward key present");
    let (back_hit, back_dir) = conndb.lookup(&back_key).expect("backward key present");

    assert!(Arc::ptr_eq(&fwd_hit, &conn));
    assert!(Arc::ptr_eq(&back_hit, &conn));
    assert!(fwd_dir);
    assert!(!back_dir);
}

const TCP_HDR_LEN: usize = 20;

fn build_ctrl_tcp_v4(ctrl_type: u16, call_id: u16, peer_call_id: u16) -> Vec<u8> {
    let min_len = 16;
    let mut buf = vec![0u8; TCP_HDR_LEN + 20 + min_len];
    buf[0] = 0x45;
    buf[9] = proto::IPPROTO_TCP;
    buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
    buf[16..20].copy_from_slice(&[203, 0, 113, 5]);
    let tcp_off = 20;
    buf[tcp_off..tcp_off + 2].copy_from_slice(&proto::PPTP_CTRL_PORT.to_be_bytes());
    buf[tcp_off + 2..tcp_off + 4].copy_from_slice(&12345u16.to_be_bytes());
    buf[tcp_off + 12] = (TCP_HDR_LEN as u8 / 4) << 4;

    let payload_off = tcp_off + TCP_HDR_LEN;
    let p = &mut buf[payload_off..];
    p[2..4].copy_from_slice(&1u16.to_be_bytes());
    p[4..8].copy_from_slice(&pptp::PPTP_MAGIC_COOKIE.to_be_bytes());
    p[8..10].copy_from_slice(&ctrl_type.to_be_bytes());
    pptp::write_call_id(p, call_id);
    pptp::write_peer_call_id(p, peer_call_id);
    buf
}

/// S5: OUTGOING-CALL-REQUEST gets its call-id translated and a slot marked
/// used; the matching OUTGOING-CALL-REPLY restores the original call-id on
/// the wire and stands up a child GRE connection keyed by both directions'
/// literal call-ids.
#[test]
fn s5_pptp_call_setup_translates_ids_and_links_gre() {
    let server_addr = Addr::from_ipv4([203, 0, 113, 5].into());
    let client_addr = Addr::from_ipv4([10, 0, 0, 1].into());
    let ctx = Arc::new(PptpTcpContext::new(server_addr, 4));
    let policy = Arc::new(NatPolicy::new(NatKind::Src, vec![(server_addr, 4)], 40000, 40010, 0));

    let trans_id = ctx.translate_call_request(&policy.portmap, 0x1111).expect("slot available");
    assert_ne!(trans_id, 0x1111, "S5: call-id must be translated");
    assert_eq!(ctx.slot(0).state, pptp::SlotState::UsedServerId);

    let harness = Harness::new(Ruleset::new(vec![]));
    let pipeline = harness.pipeline();

    let (forw_key, back_key) =
        ConnectionKey::pair(proto::IPPROTO_TCP, 4, client_addr, server_addr, 12345, proto::PPTP_CTRL_PORT);
    let conn = Connection::new(forw_key, back_key, proto::IPPROTO_TCP, Decision::Pass, 1);
    *conn.nat.lock() = Some(NatBinding {
        orig_addr: client_addr,
        orig_id: 0,
        trans_addr: server_addr,
        trans_id: 0,
        policy,
        alg: AlgState::PptpTcp(ctx.clone()),
    });

    let mut reply_buf = build_ctrl_tcp_v4(pptp::CTRL_OUTGOING_CALL_REPLY, 0x2222, trans_id);
    let mut npc = npf_core::npc::Npc::cache(&reply_buf, 0).expect("parse reply");
    pipeline.translate_outbound(&conn, &mut npc, &mut reply_buf, false);

    assert_eq!(ctx.slot(0).state, pptp::SlotState::Established);

    let gre_forw = ConnectionKey::gre_call_id(4, client_addr, server_addr, 0x2222);
    let gre_back = ConnectionKey::gre_call_id(4, server_addr, client_addr, trans_id);
    let (gre_conn, forward) = harness.conndb.lookup(&gre_forw).expect("forward gre key present");
    assert!(forward);
    let (gre_conn_back, forward_back) = harness.conndb.lookup(&gre_back).expect("backward gre key present");
    assert!(!forward_back);
    assert!(Arc::ptr_eq(&gre_conn, &gre_conn_back));
    assert!(matches!(gre_conn.nat.lock().as_ref().unwrap().alg, AlgState::PptpGre { slot: 0, .. }));
}

/// S6: a CAR limiter admits the initial burst, then blocks once the
/// extended burst is exhausted, then admits again after an idle gap long
/// enough to refill one packet's worth of tokens.
#[test]
fn s6_rate_limit_blocks_after_burst_then_recovers_after_idle() {
    let car = RateLimitProc::new(CarConfig::with_bursts(8000, 1500, 3000));

    let mut admitted_in_burst = 0;
    for _ in 0..10 {
        if car.admit(200, 0) {
            admitted_in_burst += 1;
        }
    }
    assert!(admitted_in_burst < 10, "S6: some packets of the initial burst must be blocked");
    assert!(car.blocked_count() > 0);

    assert!(!car.admit(200, 0), "S6: burst exhausted, next packet at t=0 must block");

    assert!(car.admit(200, 1000), "S6: after 1s idle, one packet should be admitted again");
}
