//! Pure conversions between vendor wire formats and the unified model

pub mod anthropic;
pub mod openai;
pub mod openrouter;

use std::time::{SystemTime, UNIX_EPOCH};

use switchyard_config::ReasoningConfig;

use crate::types::ReasoningEffort;

/// Thinking token budget per reasoning effort level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningBudgets {
    /// Budget for `low`
    pub low: u32,
    /// Budget for `medium`
    pub medium: u32,
    /// Budget for `high`
    pub high: u32,
}

impl Default for ReasoningBudgets {
    fn default() -> Self {
        Self::from(&ReasoningConfig::default())
    }
}

impl From<&ReasoningConfig> for ReasoningBudgets {
    fn from(config: &ReasoningConfig) -> Self {
        Self {
            low: config.low,
            medium: config.medium,
            high: config.high,
        }
    }
}

impl ReasoningBudgets {
    /// Budget for an effort level
    pub const fn budget_for(&self, effort: ReasoningEffort) -> u32 {
        match effort {
            ReasoningEffort::Low => self.low,
            ReasoningEffort::Medium => self.medium,
            ReasoningEffort::High => self.high,
        }
    }

    /// Lowest effort level whose budget covers `budget`
    pub const fn effort_for(&self, budget: u32) -> ReasoningEffort {
        if budget <= self.low {
            ReasoningEffort::Low
        } else if budget <= self.medium {
            ReasoningEffort::Medium
        } else {
            ReasoningEffort::High
        }
    }
}

/// Parse a vendor effort string
pub(crate) fn parse_effort(value: &str) -> Option<ReasoningEffort> {
    match value {
        "minimal" | "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        _ => None,
    }
}

pub(crate) const fn effort_str(effort: ReasoningEffort) -> &'static str {
    match effort {
        ReasoningEffort::Low => "low",
        ReasoningEffort::Medium => "medium",
        ReasoningEffort::High => "high",
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Identifier for responses that did not carry one
pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}
