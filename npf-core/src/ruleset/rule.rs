//! A single rule (§3 "Rule", §4.4): priority, direction mask, action, an
//! optional compiled filter, an optional attached rule procedure, an
//! optional NAT policy, and a subrule tree for group rules.

use crate::bpf::{self, CoprocCtx, Program};
use crate::decision::Decision;
use crate::nat::NatPolicy;
use crate::npc::{Direction, Npc};
use crate::rproc::RuleProc;
use crate::table::TableRegistry;
use std::sync::Arc;

pub const DIR_IN: u8 = 1 << 0;
pub const DIR_OUT: u8 = 1 << 1;
pub const DIR_BOTH: u8 = DIR_IN | DIR_OUT;

pub struct Rule {
    pub id: u64,
    pub priority: i32,
    pub dir_mask: u8,
    pub action: Decision,
    pub iface: Option<u16>,
    pub filter: Option<Program>,
    pub rproc: Option<Arc<dyn RuleProc>>,
    pub nat_policy: Option<Arc<NatPolicy>>,
    pub subrules: Vec<Rule>,
    /// A match on this rule terminates traversal (§4.4 "last matching rule
    /// wins unless a final flag ... terminates").
    pub is_final: bool,
}

impl Rule {
    pub fn new(id: u64, dir_mask: u8, action: Decision) -> Self {
        Rule {
            id,
            priority: 0,
            dir_mask,
            action,
            iface: None,
            filter: None,
            rproc: None,
            nat_policy: None,
            subrules: Vec::new(),
            is_final: false,
        }
    }

    pub fn with_filter(mut self, filter: Program) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn with_rproc(mut self, rproc: Arc<dyn RuleProc>) -> Self {
        self.rproc = Some(rproc);
        self
    }

    pub fn with_nat_policy(mut self, policy: Arc<NatPolicy>) -> Self {
        self.nat_policy = Some(policy);
        self
    }

    pub fn with_iface(mut self, iface: u16) -> Self {
        self.iface = Some(iface);
        self
    }

    pub fn with_subrule(mut self, sub: Rule) -> Self {
        self.subrules.push(sub);
        self
    }

    fn dir_matches(&self, direction: Direction) -> bool {
        let bit = match direction {
            Direction::In => DIR_IN,
            Direction::Out => DIR_OUT,
        };
        self.dir_mask & bit != 0
    }

    /// Whether this rule (on its own, ignoring subrules) matches the
    /// packet. A rule with no compiled filter matches unconditionally
    /// once direction/interface restrictions pass.
    pub fn matches(&self, npc: &Npc, direction: Direction, iface: u16, tables: &TableRegistry) -> bool {
        if !self.dir_matches(direction) {
            return false;
        }
        if let Some(rule_if) = self.iface {
            if rule_if != iface {
                return false;
            }
        }
        match &self.filter {
            None => true,
            Some(prog) => {
                let ctx = CoprocCtx { npc, tables };
                bpf::run(prog, &ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;

    #[test]
    fn direction_restricted_rule_only_matches_its_direction() {
        let rule = Rule::new(1, DIR_IN, Decision::Pass);
        let npc = Npc::default();
        let tables = TableRegistry::new();
        assert!(rule.matches(&npc, Direction::In, 0, &tables));
        assert!(!rule.matches(&npc, Direction::Out, 0, &tables));
    }

    #[test]
    fn interface_restricted_rule_only_matches_its_interface() {
        let rule = Rule::new(1, DIR_BOTH, Decision::Pass).with_iface(2);
        let npc = Npc::default();
        let tables = TableRegistry::new();
        assert!(rule.matches(&npc, Direction::In, 2, &tables));
        assert!(!rule.matches(&npc, Direction::In, 3, &tables));
    }

    #[test]
    fn no_filter_matches_unconditionally_within_direction_and_interface() {
        let rule = Rule::new(1, DIR_BOTH, Decision::Pass);
        let npc = Npc {
            src_addr: Addr::from_ipv4("10.1.1.2".parse().unwrap()),
            ..Default::default()
        };
        let tables = TableRegistry::new();
        assert!(rule.matches(&npc, Direction::In, 0, &tables));
    }
}
