//! The ruleset (§3 "Ruleset", §4.4): an ordered rule list with
//! last-match-wins traversal, recursive group/subrule evaluation, and
//! atomically-reloadable dynamic (named) rulesets keyed by a SHA-1 over
//! each rule's serialized form.

pub mod rule;

pub use rule::{Rule, DIR_BOTH, DIR_IN, DIR_OUT};

use crate::decision::Decision;
use crate::npc::{Direction, Npc};
use crate::rproc::RuleProc;
use crate::table::TableRegistry;
use arc_swap::ArcSwap;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Ruleset {
    pub rules: Vec<Rule>,
}

/// Result of traversing a ruleset against one packet (§4.4 `inspect`).
pub struct InspectResult {
    pub decision: Decision,
    pub matched_rule_id: Option<u64>,
    pub subrule_id: Option<u64>,
    pub rule_proc: Option<Arc<dyn RuleProc>>,
}

impl InspectResult {
    fn default_block() -> Self {
        InspectResult {
            decision: Decision::Block,
            matched_rule_id: None,
            subrule_id: None,
            rule_proc: None,
        }
    }
}

impl Ruleset {
    pub fn new(rules: Vec<Rule>) -> Self {
        Ruleset { rules }
    }

    /// Last-match-wins traversal with `final`-flag short-circuit (§4.4).
    /// A packet matching no rule at all defaults to BLOCK (a ruleset with
    /// no matching rules denies by default, as a stateful firewall must).
    pub fn inspect(
        &self,
        npc: &Npc,
        direction: Direction,
        iface: u16,
        tables: &TableRegistry,
    ) -> InspectResult {
        let mut result = InspectResult::default_block();
        for rule in &self.rules {
            if !rule.matches(npc, direction, iface, tables) {
                continue;
            }
            result = InspectResult {
                decision: rule.action,
                matched_rule_id: Some(rule.id),
                subrule_id: None,
                rule_proc: rule.rproc.clone(),
            };
            // A group rule's own filter gates evaluation of its subrules;
            // a subrule match then augments/overrides the tentative
            // decision as the new last-match rule (§4.4).
            if let Some(sub_result) = Self::inspect_subrules(&rule.subrules, npc, direction, iface, tables) {
                result = sub_result;
            }
            if rule.is_final {
                break;
            }
        }
        result
    }

    fn inspect_subrules(
        subrules: &[Rule],
        npc: &Npc,
        direction: Direction,
        iface: u16,
        tables: &TableRegistry,
    ) -> Option<InspectResult> {
        let mut result: Option<InspectResult> = None;
        for sub in subrules {
            if !sub.matches(npc, direction, iface, tables) {
                continue;
            }
            result = Some(InspectResult {
                decision: sub.action,
                matched_rule_id: Some(sub.id),
                subrule_id: Some(sub.id),
                rule_proc: sub.rproc.clone(),
            });
            if let Some(nested) = Self::inspect_subrules(&sub.subrules, npc, direction, iface, tables) {
                result = Some(nested);
            }
            if sub.is_final {
                break;
            }
        }
        result
    }
}

/// A SHA-1 digest over a rule's serialized form, used as its stable key in
/// a dynamic (named) ruleset (§4.4). The serialization only needs to be
/// stable and collision-resistant for this purpose, not a wire format.
pub fn stable_rule_key(rule: &Rule) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(rule.id.to_le_bytes());
    hasher.update(rule.priority.to_le_bytes());
    hasher.update([rule.dir_mask, rule.action.is_pass() as u8, rule.is_final as u8]);
    if let Some(iface) = rule.iface {
        hasher.update(iface.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Named, independently-addressable rulesets (§4.4 "Dynamic rulesets"),
/// each swapped atomically on reload so a lookup in progress always sees a
/// consistent snapshot (§5 "Ruleset: swapped atomically on reload").
#[derive(Default)]
pub struct DynamicRulesets {
    named: HashMap<String, ArcSwap<Ruleset>>,
}

impl DynamicRulesets {
    pub fn new() -> Self {
        DynamicRulesets::default()
    }

    pub fn replace(&mut self, name: &str, ruleset: Ruleset) {
        match self.named.get(name) {
            Some(slot) => slot.store(Arc::new(ruleset)),
            None => {
                self.named.insert(name.to_string(), ArcSwap::from_pointee(ruleset));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Ruleset>> {
        self.named.get(name).map(|slot| slot.load_full())
    }

    /// Removes a single rule by id from a named ruleset's current
    /// snapshot, installing a new snapshot without it.
    pub fn remove_rule(&self, name: &str, rule_id: u64) -> bool {
        let Some(slot) = self.named.get(name) else {
            return false;
        };
        let cur = slot.load();
        if !cur.rules.iter().any(|r| r.id == rule_id) {
            return false;
        }
        let next: Vec<Rule> = cur
            .rules
            .iter()
            .filter(|r| r.id != rule_id)
            .map(clone_rule_shallow)
            .collect();
        slot.store(Arc::new(Ruleset::new(next)));
        true
    }
}

/// A structural (non-deep) clone sufficient for reassembling a ruleset
/// snapshot minus one rule: rule procedures and NAT policies are
/// reference-counted so sharing them across snapshots is correct and
/// cheap; filters and subrules are duplicated since `Program`/`Rule`
/// don't implement `Clone`-via-`Arc` themselves.
fn clone_rule_shallow(r: &Rule) -> Rule {
    Rule {
        id: r.id,
        priority: r.priority,
        dir_mask: r.dir_mask,
        action: r.action,
        iface: r.iface,
        filter: r.filter.clone(),
        rproc: r.rproc.clone(),
        nat_policy: r.nat_policy.clone(),
        subrules: r.subrules.iter().map(clone_rule_shallow).collect(),
        is_final: r.is_final,
    }
}
