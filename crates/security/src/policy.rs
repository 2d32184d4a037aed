//! Rule-based tool policy engine.
//!
//! Rules are evaluated per scope level. The most specific level that has a
//! matching rule decides (task > agent > team > global); within one level
//! the rule added last wins. With no matching rule the call is allowed.

use std::sync::{PoisonError, RwLock};

use ratchet_core::tool::{PolicyDecision, PolicyEngine, PolicyScope};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Team,
    Agent,
    Task,
}

impl std::str::FromStr for RuleScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "team" => Ok(Self::Team),
            "agent" => Ok(Self::Agent),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown policy scope '{other}'")),
        }
    }
}

/// One row of `tool_policies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub scope: RuleScope,
    /// Team / agent / task id; ignored for global rules
    #[serde(default)]
    pub scope_id: String,
    /// Tool name pattern; `*` matches any run of characters
    pub tool_pattern: String,
    pub action: PolicyDecision,
}

struct CompiledRule {
    rule: PolicyRule,
    pattern: Regex,
}

impl CompiledRule {
    fn applies(&self, scope: &PolicyScope, tool_name: &str) -> bool {
        let id_matches = match self.rule.scope {
            RuleScope::Global => true,
            RuleScope::Team => !scope.team_id.is_empty() && scope.team_id == self.rule.scope_id,
            RuleScope::Agent => !scope.agent_id.is_empty() && scope.agent_id == self.rule.scope_id,
            RuleScope::Task => !scope.task_id.is_empty() && scope.task_id == self.rule.scope_id,
        };
        id_matches && self.pattern.is_match(tool_name)
    }
}

/// Translate a `*` glob into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, String> {
    let body = glob
        .split('*')
        .map(regex_lite::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).map_err(|e| format!("invalid tool pattern '{glob}': {e}"))
}

/// Policy engine over an ordered rule list.
#[derive(Default)]
pub struct RulePolicyEngine {
    rules: RwLock<Vec<CompiledRule>>,
}

impl RulePolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rules in insertion order.
    pub fn from_rules(rules: Vec<PolicyRule>) -> Result<Self, String> {
        let engine = Self::new();
        for rule in rules {
            engine.add_rule(rule)?;
        }
        Ok(engine)
    }

    /// Append a rule; it overrides earlier rules of the same scope level.
    pub fn add_rule(&self, rule: PolicyRule) -> Result<(), String> {
        let pattern = glob_to_regex(&rule.tool_pattern)?;
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CompiledRule { rule, pattern });
        Ok(())
    }

    /// Drop all rules and install `rules`.
    pub fn replace_rules(&self, rules: Vec<PolicyRule>) -> Result<(), String> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                glob_to_regex(&rule.tool_pattern).map(|pattern| CompiledRule { rule, pattern })
            })
            .collect::<Result<Vec<_>, _>>()?;
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyEngine for RulePolicyEngine {
    fn decide(&self, scope: &PolicyScope, tool_name: &str) -> PolicyDecision {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let winner = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.applies(scope, tool_name))
            .max_by_key(|(idx, r)| (r.rule.scope, *idx));

        match winner {
            Some((_, r)) => {
                debug!(
                    tool = tool_name,
                    scope = ?r.rule.scope,
                    action = ?r.rule.action,
                    "Tool policy matched"
                );
                r.rule.action
            }
            None => PolicyDecision::Allow,
        }
    }
}
