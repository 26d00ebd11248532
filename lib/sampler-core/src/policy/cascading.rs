use std::sync::Mutex;

use sampler_config::policy::{CascadingConfig, CascadingRuleConfig, PolicyConfigError};

use crate::arbiter::{Admission, RateArbiter};
use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

use super::{Policy, PolicyError};

/// One entry in a cascading policy's ordered rule list: a nested matcher
/// plus its own per-second budget. A budget of `-1` (`unbounded_budget`)
/// means the rule never wins on its own local cap and any match always
/// defers to the global second-chance pass.
struct CascadingRule {
    matcher: Box<dyn Policy>,
    budget: Option<Mutex<RateArbiter>>,
}

impl CascadingRule {
    fn new(matcher: Box<dyn Policy>, spans_per_second: i64) -> Self {
        let budget = if spans_per_second < 0 {
            None
        } else {
            Some(Mutex::new(RateArbiter::new(spans_per_second as u64)))
        };
        Self { matcher, budget }
    }
}

/// Composite evaluator holding an ordered list of sub-rules. The first
/// sub-rule whose matcher votes non-`NotSampled` decides the trace: if its
/// own budget still has room the trace is Sampled outright, otherwise it
/// becomes SecondChance and competes for the engine's global budget in the
/// decision loop's second pass.
pub struct Cascading {
    name: String,
    rules: Vec<CascadingRule>,
}

impl Cascading {
    pub fn new(name: String, config: &CascadingConfig) -> Result<Self, PolicyConfigError> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| build_rule(rule).map_err(|source| PolicyConfigError::Rule {
                index,
                source: Box::new(source),
            }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, rules })
    }
}

fn build_rule(config: &CascadingRuleConfig) -> Result<CascadingRule, PolicyConfigError> {
    let matcher = super::build_policy(&sampler_config::policy::PolicyConfig {
        name: String::new(),
        variant: config.matcher.clone(),
    })?;
    Ok(CascadingRule::new(matcher, config.spans_per_second))
}

impl Policy for Cascading {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        trace_id: TraceId,
        batches: &[SpanGroup],
        now_second: i64,
    ) -> Result<Decision, PolicyError> {
        let span_count: u64 = batches.iter().map(|group| group.len() as u64).sum();

        for rule in &self.rules {
            let matched = rule.matcher.evaluate(trace_id, batches, now_second)?;
            if matched == Decision::NotSampled {
                continue;
            }

            return Ok(match &rule.budget {
                None => Decision::SecondChance,
                Some(budget) => {
                    match budget.lock().unwrap().admit(now_second, span_count) {
                        Admission::Sampled => Decision::Sampled,
                        Admission::NotSampled => Decision::SecondChance,
                    }
                }
            });
        }

        Ok(Decision::NotSampled)
    }
}
