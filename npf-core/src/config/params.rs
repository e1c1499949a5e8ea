//! Named integer parameters (§6 "Parameters are named strings bound to
//! integer variables with declared {min, max, default}"), e.g.
//! `state.generic.timeout.established` or `ip4.reassembly`.

use crate::error::{ConfigError, Result};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub min: i64,
    pub max: i64,
    pub default: i64,
}

impl ParamSpec {
    pub const fn new(min: i64, max: i64, default: i64) -> Self {
        ParamSpec { min, max, default }
    }
}

/// A registry of declared parameters and their current values, looked up
/// and mutated by name from the management plane.
pub struct Params {
    specs: HashMap<&'static str, ParamSpec>,
    values: HashMap<&'static str, i64>,
}

impl Params {
    pub fn new() -> Self {
        Params { specs: HashMap::new(), values: HashMap::new() }
    }

    /// Declares a parameter with its bounds, seeding its current value to
    /// the declared default.
    pub fn declare(&mut self, name: &'static str, spec: ParamSpec) {
        self.values.insert(name, spec.default);
        self.specs.insert(name, spec);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    /// Sets a previously-declared parameter, rejecting unknown names
    /// (`ENOENT`) and out-of-range values (`EINVAL`) per §7.
    pub fn set(&mut self, name: &str, value: i64) -> Result<()> {
        let spec = *self
            .specs
            .get(name)
            .ok_or_else(|| ConfigError::NotFound(format!("no such parameter: {name}")))?;
        if value < spec.min || value > spec.max {
            return Err(ConfigError::Invalid(format!(
                "{name} out of range [{}, {}]: {value}",
                spec.min, spec.max
            )));
        }
        let key = *self.specs.keys().find(|k| **k == name).expect("checked above");
        self.values.insert(key, value);
        Ok(())
    }

    pub fn spec(&self, name: &str) -> Option<ParamSpec> {
        self.specs.get(name).copied()
    }

    /// The default registry of well-known parameters referenced across
    /// SPEC_FULL.md's per-module sections.
    pub fn defaults() -> Self {
        let mut params = Params::new();
        params.declare("state.generic.timeout.new", ParamSpec::new(1, 3600, 30));
        params.declare("state.generic.timeout.established", ParamSpec::new(1, 86400, 60));
        params.declare("state.tcp.timeout.established", ParamSpec::new(1, 604_800, 86_400));
        params.declare("state.gre.timeout.established", ParamSpec::new(1, 604_800, 86_400));
        params.declare("ip4.reassembly", ParamSpec::new(0, 1, 0));
        params.declare("ip4.drop_options", ParamSpec::new(0, 1, 0));
        params.declare("gc.step_bound", ParamSpec::new(1, 1_000_000, 512));
        params
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::defaults()
    }
}
