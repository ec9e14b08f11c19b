//! Include/exclude rule set over (receiver, action, actor) triples.

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{bail, Result};
use eosearch_core::types::Action;
use eosearch_core::Name;

use crate::config::FilterRules;

/// One filter rule; [`Name::ZERO`] components match anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterEntry {
    pub receiver: Name,
    pub action: Name,
    pub actor: Name,
}

impl FromStr for FilterEntry {
    type Err = anyhow::Error;

    /// Parse `receiver:action:actor`; trailing components may be omitted and
    /// empty components are wildcards.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() > 3 {
            bail!("filter entry '{s}' has more than three components");
        }
        let part = |i: usize| -> Result<Name> {
            let raw = parts.get(i).copied().unwrap_or("");
            Name::new(raw).map_err(|e| anyhow::anyhow!("filter entry '{s}': {e}"))
        };
        Ok(FilterEntry {
            receiver: part(0)?,
            action: part(1)?,
            actor: part(2)?,
        })
    }
}

/// The compiled rule set consulted once per action trace.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    on_star: bool,
    on: HashSet<FilterEntry>,
    out: HashSet<FilterEntry>,
}

impl ActionFilter {
    /// Compile the raw config rules.
    pub fn from_rules(rules: &FilterRules) -> Result<Self> {
        let mut filter = ActionFilter::default();
        for raw in &rules.on {
            if raw == "*" {
                filter.on_star = true;
                continue;
            }
            filter.on.insert(raw.parse()?);
        }
        for raw in &rules.out {
            if raw == "*" {
                bail!("'*' is not a valid exclusion rule");
            }
            filter.out.insert(raw.parse()?);
        }
        Ok(filter)
    }

    /// Admit-all filter, the default configuration.
    pub fn allow_all() -> Self {
        ActionFilter {
            on_star: true,
            ..Default::default()
        }
    }

    /// Whether `act` should be projected into the action-trace collection.
    ///
    /// Admission requires the star flag, an exact `(receiver, action)` rule,
    /// or an actor-specific rule matching one of the authorizations; any
    /// matching exclusion rule then wins over admission.
    pub fn include(&self, act: &Action) -> bool {
        let mut include = false;
        if self.on_star
            || self.on.contains(&FilterEntry {
                receiver: act.account,
                action: act.name,
                actor: Name::ZERO,
            })
        {
            include = true;
        } else {
            for auth in &act.authorization {
                if self.on.contains(&FilterEntry {
                    receiver: act.account,
                    action: act.name,
                    actor: auth.actor,
                }) {
                    include = true;
                    break;
                }
            }
        }

        if !include {
            return false;
        }

        if self.out.contains(&FilterEntry {
            receiver: act.account,
            action: Name::ZERO,
            actor: Name::ZERO,
        }) {
            return false;
        }
        if self.out.contains(&FilterEntry {
            receiver: act.account,
            action: act.name,
            actor: Name::ZERO,
        }) {
            return false;
        }
        for auth in &act.authorization {
            if self.out.contains(&FilterEntry {
                receiver: act.account,
                action: act.name,
                actor: auth.actor,
            }) {
                return false;
            }
        }
        true
    }
}
