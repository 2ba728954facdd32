//! Billing formulas, selected per kind of work.

use conclave_config::BillingConfig;
use serde::{Deserialize, Serialize};

/// Work to be priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Workload {
    /// One deliberation task with a roster of `agents`.
    Deliberation { agents: usize },
    /// A step-metered task: each step is charged, the timeout is charged in
    /// minutes up to a cap, and one screenshot is taken every three steps.
    Steps { max_steps: u32, timeout_minutes: u32 },
}

/// Credit constants for every workload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingFormula {
    pub per_agent_cost: i64,
    pub step_base: i64,
    pub timeout_cap_minutes: i64,
}

impl Default for BillingFormula {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

impl BillingFormula {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            per_agent_cost: config.per_agent_cost,
            step_base: config.base,
            timeout_cap_minutes: config.timeout_cap_minutes,
        }
    }

    /// Credits owed for `workload`.
    pub fn cost(&self, workload: &Workload) -> i64 {
        match *workload {
            Workload::Deliberation { agents } => agents as i64 * self.per_agent_cost,
            Workload::Steps {
                max_steps,
                timeout_minutes,
            } => {
                let steps = i64::from(max_steps);
                let screenshots = i64::from(max_steps.div_ceil(3));
                self.step_base
                    + steps
                    + i64::from(timeout_minutes).min(self.timeout_cap_minutes)
                    + screenshots
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliberation_is_per_agent() {
        let formula = BillingFormula::default();
        assert_eq!(formula.cost(&Workload::Deliberation { agents: 3 }), 3);

        let pricey = BillingFormula {
            per_agent_cost: 4,
            ..formula
        };
        assert_eq!(pricey.cost(&Workload::Deliberation { agents: 3 }), 12);
    }

    #[test]
    fn step_metered_caps_timeout() {
        let formula = BillingFormula::default();
        // base 1 + 10 steps + min(30, 5) + ceil(10 / 3)
        assert_eq!(
            formula.cost(&Workload::Steps {
                max_steps: 10,
                timeout_minutes: 30
            }),
            1 + 10 + 5 + 4
        );
        assert_eq!(
            formula.cost(&Workload::Steps {
                max_steps: 3,
                timeout_minutes: 2
            }),
            1 + 3 + 2 + 1
        );
    }
}
