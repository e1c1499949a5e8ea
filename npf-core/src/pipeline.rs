//! The packet processing pipeline (§4.10): synchronous, run-to-completion
//! per packet, driven against the out-of-scope collaborators of
//! `iface.rs`. L2/ARP classification (§4.10 step 1) is the NIC driver's
//! job, out of scope per §1; this pipeline starts from a linearized L3
//! buffer, matching the `iface::Buf` contract.

use crate::alg::AlgRegistry;
use crate::conndb::connection::now_millis;
use crate::conndb::key::ConnectionKey;
use crate::conndb::{Connection, ConnDb};
use crate::decision::Decision;
use crate::iface::{Buf, NicOps, Resolver, RoutingTable};
use crate::nat::{self, AlgState, NatBinding, NatPolicy};
use crate::npc::{Direction, Npc};
use crate::rproc::ProcessCtx;
use crate::ruleset::Ruleset;
use crate::stats::Stats;
use crate::table::TableRegistry;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub enum Verdict {
    Forwarded { egress_if: u16, buf: Buf },
    Dropped,
}

/// Everything `process_packet` needs: the shared datapath state plus the
/// three out-of-scope collaborators (§6).
pub struct Pipeline<'a, N: NicOps, R: Resolver, RT: RoutingTable> {
    pub conndb: &'a ConnDb,
    pub tables: &'a TableRegistry,
    pub algs: &'a AlgRegistry,
    pub ruleset: &'a ArcSwap<Ruleset>,
    pub stats: &'a Stats,
    pub nic: &'a N,
    pub resolver: &'a R,
    pub routes: &'a RT,
}

impl<'a, N: NicOps, R: Resolver, RT: RoutingTable> Pipeline<'a, N, R, RT> {
    /// Steps 2-8 of §4.10 for a single packet already stripped of its L2
    /// header.
    pub fn process_packet(&self, mut buf: Buf, in_if: u16) -> Verdict {
        let Some(mut npc) = Npc::cache(&buf.data, 0) else {
            debug!(in_if, "unparseable packet, dropped");
            return Verdict::Dropped;
        };

        // Step 3: inbound firewall, connection-DB lookup or ruleset match.
        // The per-protocol state machine gates every packet that belongs to
        // a connection, including the one that just created it, so this
        // runs once inside `inbound_firewall` rather than being repeated
        // here for the two different origins of `conn`.
        let (decision, conn, forward) = self.inbound_firewall(&mut npc, &buf.data, in_if);
        if !decision.is_pass() {
            self.stats.record_block();
            return Verdict::Dropped;
        }

        // Step 5: route lookup.
        let Some(route) = self.routes.lookup(&npc.dst_addr, npc.alen) else {
            debug!(dst = ?npc.dst_addr, "no route, dropped");
            self.stats.record_block();
            return Verdict::Dropped;
        };

        // Step 6: outbound firewall pass for the egress interface.
        let out_decision = self.ruleset.load().inspect(&npc, Direction::Out, route.egress_if, self.tables);
        if !out_decision.decision.is_pass() {
            self.stats.record_block();
            return Verdict::Dropped;
        }
        if let Some(proc) = &out_decision.rule_proc {
            let ctx = ProcessCtx { npc: &npc, pktlen: buf.data.len(), now_ms: now_millis() };
            if !proc.process(&ctx, Decision::Pass).is_pass() {
                self.stats.record_block();
                return Verdict::Dropped;
            }
        }

        // Step 7: NAT/ALG translation (forward direction, outbound).
        if let Some(conn) = &conn {
            self.translate_outbound(conn, &mut npc, &mut buf.data, forward);
        }

        // Step 8: resolve next-hop link address. A driver-level ARP retry
        // loop lives in the out-of-scope resolver collaborator; a miss here
        // simply drops the packet rather than queuing it, since this crate
        // implements no outbound retry queue of its own.
        if self.resolver.resolve(&route).is_none() {
            warn!(egress_if = route.egress_if, "link address unresolved, dropped");
            self.stats.record_block();
            return Verdict::Dropped;
        }

        self.stats.record_pass();
        Verdict::Forwarded { egress_if: route.egress_if, buf }
    }

    /// Step 9: after a burst, flush every non-empty egress queue with one
    /// `tx_burst` call each.
    pub fn process_burst(&self, bufs: Vec<Buf>, in_if: u16, in_queue: u16, out_queue: u16) {
        let rx_bufs = self.nic.rx_burst(in_if, in_queue, bufs.len().max(1));
        let bufs = if rx_bufs.is_empty() { bufs } else { rx_bufs };

        let mut egress: HashMap<u16, Vec<Buf>> = HashMap::new();
        for buf in bufs {
            match self.process_packet(buf, in_if) {
                Verdict::Forwarded { egress_if, buf } => {
                    egress.entry(egress_if).or_default().push(buf);
                }
                Verdict::Dropped => {}
            }
        }
        for (egress_if, queued) in egress {
            self.nic.tx_burst(egress_if, out_queue, queued);
        }
    }

    /// Step 3: on a connection-DB hit, bypass rule match entirely (state
    /// inspection happens separately, see `conn_state_gate`); on a miss,
    /// run the ruleset and, on PASS, create and insert a new connection.
    fn inbound_firewall(
        &self,
        npc: &mut Npc,
        buf: &[u8],
        in_if: u16,
    ) -> (Decision, Option<Arc<Connection>>, bool) {
        let key = self
            .algs
            .inspect_key(npc, buf)
            .or(npc.key_override)
            .unwrap_or_else(|| ConnectionKey::new(npc.proto, npc.alen, npc.src_addr, npc.dst_addr, npc.src_id, npc.dst_id));

        if let Some((conn, forward)) = self.conndb.lookup(&key) {
            if !conn.inspect(npc, forward) {
                self.stats.record_state_reject();
                return (Decision::Block, Some(conn), forward);
            }
            return (conn.decision, Some(conn), forward);
        }

        let ruleset = self.ruleset.load();
        let result = ruleset.inspect(npc, Direction::In, in_if, self.tables);
        let mut decision = result.decision;

        if let Some(proc) = &result.rule_proc {
            let ctx = ProcessCtx { npc, pktlen: buf.len(), now_ms: now_millis() };
            decision = proc.process(&ctx, decision);
        }

        if !decision.is_pass() {
            return (decision, None, true);
        }

        let (forw_key, back_key) = ConnectionKey::pair(npc.proto, npc.alen, npc.src_addr, npc.dst_addr, npc.src_id, npc.dst_id);
        let conn = Arc::new(Connection::new(forw_key, back_key, npc.proto, decision, in_if));

        if let Some(nat_rule) = self.find_nat_policy(&ruleset, result.matched_rule_id) {
            if let Some(mut binding) = nat::create_binding(&nat_rule, npc) {
                // §4.8 step 1: match on the control channel's first packet
                // and attach whatever fresh per-flow ALG state the
                // registry's match hook constructs for this packet.
                if let Some(alg_state) = self.algs.match_alg(npc) {
                    binding.alg = alg_state;
                }
                *conn.nat.lock() = Some(binding);
            } else {
                self.stats.record_nat_alloc_failure();
            }
        }

        if self.conndb.insert(conn.clone()) {
            self.stats.record_connection_created();
            self.conndb.enqueue(conn.clone());
        }

        // Runs the new connection's FSM forward on its own first packet so
        // later packets on either key see a tracker already past its
        // initial state.
        conn.inspect(npc, true);

        (decision, Some(conn), true)
    }

    fn find_nat_policy(
        &self,
        ruleset: &Arc<Ruleset>,
        rule_id: Option<u64>,
    ) -> Option<Arc<crate::nat::NatPolicy>> {
        let id = rule_id?;
        ruleset.rules.iter().find(|r| r.id == id).and_then(|r| r.nat_policy.clone())
    }

    /// Step 7 proper: rewrites the packet through the connection's NAT
    /// binding, if any, dispatching to the PPTP ALG fixup first when the
    /// binding carries `AlgState::PptpTcp`. When that fixup reports a slot
    /// just reached `Established`, registers the child GRE connection
    /// (§4.8 step 3) once the binding lock has been released. Public
    /// alongside `process_packet`: callers that already hold a connection
    /// and a cached packet (e.g. an ALG integration test) can drive this
    /// step directly instead of re-deriving one from a full packet.
    pub fn translate_outbound(&self, conn: &Connection, npc: &mut Npc, buf: &mut [u8], forward: bool) {
        let mut pending_gre = None;
        {
            let nat_guard = conn.nat.lock();
            let Some(binding) = nat_guard.as_ref() else { return };

            if let Some(name) = binding.alg.alg_name() {
                if let crate::alg::AlgEvent::PptpTunnelEstablished(est) =
                    self.algs.translate(name, binding, npc, buf)
                {
                    pending_gre = Some((est, binding.policy.clone()));
                }
            }

            nat::translate_packet(npc, buf, binding, forward);
        }

        if let Some((est, policy)) = pending_gre {
            self.establish_pptp_gre(conn.forw_key, est, policy);
        }
    }

    /// §4.8 step 3: once a slot has both call-ids and the OUTGOING-CALL-REPLY
    /// fixup has run, index a child GRE connection under the two keys the
    /// tunnel's two directions carry on the wire, sharing the parent TCP
    /// flow's NAT policy (§9 "avoid a cycle": the binding holds the slot
    /// identity and the parent key, not a pointer back to the parent).
    fn establish_pptp_gre(
        &self,
        parent_key: ConnectionKey,
        est: crate::alg::pptp::PptpEstablished,
        policy: Arc<NatPolicy>,
    ) {
        let forw_key =
            ConnectionKey::gre_call_id(est.alen, est.client_addr, est.server_addr, est.server_call_id);
        let back_key =
            ConnectionKey::gre_call_id(est.alen, est.server_addr, est.client_addr, est.trans_call_id);

        let gre_conn = Arc::new(Connection::new(
            forw_key,
            back_key,
            crate::proto::IPPROTO_GRE,
            Decision::Pass,
            0,
        ));
        *gre_conn.nat.lock() = Some(NatBinding {
            orig_addr: est.client_addr,
            orig_id: 0,
            trans_addr: est.server_addr,
            trans_id: 0,
            policy,
            alg: AlgState::PptpGre { ctx: est.ctx, slot: est.slot, parent: parent_key },
        });

        if self.conndb.insert(gre_conn.clone()) {
            self.stats.record_connection_created();
            self.conndb.enqueue(gre_conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;
    use crate::iface::testutil::{QueueNic, StaticResolver, StaticRoutingTable};
    use crate::iface::{LinkAddr, RouteHop};
    use crate::ruleset::{Rule, DIR_BOTH};

    fn build_udp_v4(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 28];
        buf[0] = 0x45;
        buf[9] = crate::proto::IPPROTO_UDP;
        buf[12..16].copy_from_slice(&src);
        buf[16..20].copy_from_slice(&dst);
        buf[20..22].copy_from_slice(&sport.to_be_bytes());
        buf[22..24].copy_from_slice(&dport.to_be_bytes());
        buf
    }

    #[test]
    fn pass_rule_creates_a_connection_and_forwards_the_packet() {
        let conndb = ConnDb::default();
        let tables = TableRegistry::new();
        let algs = AlgRegistry::default();
        let ruleset = ArcSwap::from_pointee(Ruleset::new(vec![Rule::new(1, DIR_BOTH, Decision::Pass)]));
        let stats = Stats::new();
        let nic = QueueNic::new();
        let resolver = StaticResolver { answer: Some(LinkAddr([1, 2, 3, 4, 5, 6])) };
        let routes = StaticRoutingTable::new();
        routes.add_route(
            Addr::from_ipv4("10.1.1.252".parse().unwrap()),
            32,
            4,
            RouteHop { egress_if: 2, next_hop: Addr::from_ipv4("10.1.1.252".parse().unwrap()), alen: 4 },
        );

        let pipeline = Pipeline {
            conndb: &conndb,
            tables: &tables,
            algs: &algs,
            ruleset: &ruleset,
            stats: &stats,
            nic: &nic,
            resolver: &resolver,
            routes: &routes,
        };

        let buf = Buf::new(build_udp_v4([10, 1, 1, 1], [10, 1, 1, 252], 25000, 80));
        let verdict = pipeline.process_packet(buf, 1);
        assert!(matches!(verdict, Verdict::Forwarded { egress_if: 2, .. }));
        assert_eq!(stats.snapshot().packets_passed, 1);
        assert_eq!(stats.snapshot().connections_created, 1);
    }

    #[test]
    fn pptp_call_reply_establishes_a_child_gre_connection() {
        use crate::alg::pptp::{self, PptpTcpContext};
        use crate::nat::{NatBinding, NatKind, NatPolicy};

        const TCP_HDR_LEN: usize = 20;

        fn build_ctrl_tcp_v4(ctrl_type: u16, call_id: u16, peer_call_id: u16) -> Vec<u8> {
            let min_len = 16;
            let mut buf = vec![0u8; TCP_HDR_LEN + 20 + min_len];
            buf[0] = 0x45;
            buf[9] = crate::proto::IPPROTO_TCP;
            buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
            buf[16..20].copy_from_slice(&[203, 0, 113, 5]);
            let tcp_off = 20;
            buf[tcp_off..tcp_off + 2].copy_from_slice(&crate::proto::PPTP_CTRL_PORT.to_be_bytes());
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

        let server_addr = Addr::from_ipv4("203.0.113.5".parse().unwrap());
        let client_addr = Addr::from_ipv4("10.0.0.1".parse().unwrap());
        let ctx = std::sync::Arc::new(PptpTcpContext::new(server_addr, 4));
        let policy = std::sync::Arc::new(NatPolicy::new(
            NatKind::Src,
            vec![(server_addr, 4)],
            40000,
            40010,
            0,
        ));
        let trans_id = ctx.translate_call_request(&policy.portmap, 0x1111).unwrap();

        let conndb = ConnDb::default();
        let tables = TableRegistry::new();
        let algs = AlgRegistry::default();
        let ruleset = ArcSwap::from_pointee(Ruleset::new(vec![]));
        let stats = Stats::new();
        let nic = QueueNic::new();
        let resolver = StaticResolver::default();
        let routes = StaticRoutingTable::new();

        let pipeline = Pipeline {
            conndb: &conndb,
            tables: &tables,
            algs: &algs,
            ruleset: &ruleset,
            stats: &stats,
            nic: &nic,
            resolver: &resolver,
            routes: &routes,
        };

        let (forw_key, back_key) = ConnectionKey::pair(
            crate::proto::IPPROTO_TCP,
            4,
            client_addr,
            server_addr,
            12345,
            crate::proto::PPTP_CTRL_PORT,
        );
        let conn = Connection::new(forw_key, back_key, crate::proto::IPPROTO_TCP, Decision::Pass, 1);
        *conn.nat.lock() = Some(NatBinding {
            orig_addr: client_addr,
            orig_id: 0,
            trans_addr: server_addr,
            trans_id: 0,
            policy,
            alg: AlgState::PptpTcp(ctx.clone()),
        });

        let mut reply_buf = build_ctrl_tcp_v4(pptp::CTRL_OUTGOING_CALL_REPLY, 0x2222, trans_id);
        let mut npc = crate::npc::Npc::cache(&reply_buf, 0).expect("parse");
        pipeline.translate_outbound(&conn, &mut npc, &mut reply_buf, false);

        assert_eq!(ctx.slot(0).state, pptp::SlotState::Established);

        let gre_forw = ConnectionKey::gre_call_id(4, client_addr, server_addr, 0x2222);
        let gre_back = ConnectionKey::gre_call_id(4, server_addr, client_addr, trans_id);
        let (gre_conn, forward) = conndb.lookup(&gre_forw).expect("forward gre key present");
        assert!(forward);
        let (gre_conn2, _) = conndb.lookup(&gre_back).expect("backward gre key present");
        assert!(Arc::ptr_eq(&gre_conn, &gre_conn2));
        assert!(matches!(
            gre_conn.nat.lock().as_ref().unwrap().alg,
            AlgState::PptpGre { slot: 0, .. }
        ));
    }

    #[test]
    fn default_deny_drops_unmatched_traffic() {
        let conndb = ConnDb::default();
        let tables = TableRegistry::new();
        let algs = AlgRegistry::default();
        let ruleset = ArcSwap::from_pointee(Ruleset::new(vec![]));
        let stats = Stats::new();
        let nic = QueueNic::new();
        let resolver = StaticResolver::default();
        let routes = StaticRoutingTable::new();

        let pipeline = Pipeline {
            conndb: &conndb,
            tables: &tables,
            algs: &algs,
            ruleset: &ruleset,
            stats: &stats,
            nic: &nic,
            resolver: &resolver,
            routes: &routes,
        };

        let buf = Buf::new(build_udp_v4([10, 1, 1, 2], [10, 1, 1, 252], 1, 80));
        let verdict = pipeline.process_packet(buf, 1);
        assert!(matches!(verdict, Verdict::Dropped));
        assert_eq!(stats.snapshot().packets_blocked, 1);
    }
}
