//! Governance configuration
//!
//! Loaded from YAML and environment variables, following the same
//! conventions as the node configuration: a file named by
//! `CONSENT_CONFIG_FILE`, then individual `CONSENT_*` overrides.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use consent_core::utils::trimmed_len;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GovernanceError, GovernanceResult};
use crate::tally::{MinimumSupport, SimpleMajority, Supermajority, ThresholdPolicy, Unanimous};

/// Environment variable naming a YAML configuration file
pub const CONFIG_FILE_ENV: &str = "CONSENT_CONFIG_FILE";

/// Serializable description of a threshold policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ThresholdRule {
    #[default]
    SimpleMajority,
    Supermajority { numerator: u32, denominator: u32 },
    Unanimous,
    MinimumSupport { count: usize },
}

impl ThresholdRule {
    /// Build the policy this rule describes
    pub fn to_policy(&self) -> GovernanceResult<Arc<dyn ThresholdPolicy>> {
        Ok(match self {
            ThresholdRule::SimpleMajority => Arc::new(SimpleMajority),
            ThresholdRule::Supermajority { numerator, denominator } => {
                let rule = Supermajority::new(*numerator, *denominator).ok_or_else(|| {
                    GovernanceError::validation(format!(
                        "Supermajority must be a fraction in (0, 1], got {}/{}",
                        numerator, denominator
                    ))
                })?;
                Arc::new(rule)
            }
            ThresholdRule::Unanimous => Arc::new(Unanimous),
            ThresholdRule::MinimumSupport { count } => {
                if *count == 0 {
                    return Err(GovernanceError::validation("Minimum support count must be positive"));
                }
                Arc::new(MinimumSupport { count: *count })
            }
        })
    }

    /// Parse the compact form used in environment variables:
    /// `majority`, `unanimous`, `2/3`, or `min:5`.
    pub fn parse(s: &str) -> GovernanceResult<Self> {
        let s = s.trim();
        let rule = match s {
            "majority" | "simple_majority" => ThresholdRule::SimpleMajority,
            "unanimous" => ThresholdRule::Unanimous,
            _ => {
                if let Some(count) = s.strip_prefix("min:") {
                    let count = count.parse().map_err(|_| {
                        GovernanceError::validation(format!("Invalid minimum support '{}'", s))
                    })?;
                    ThresholdRule::MinimumSupport { count }
                } else if let Some((n, d)) = s.split_once('/') {
                    let numerator = n.trim().parse().map_err(|_| {
                        GovernanceError::validation(format!("Invalid supermajority '{}'", s))
                    })?;
                    let denominator = d.trim().parse().map_err(|_| {
                        GovernanceError::validation(format!("Invalid supermajority '{}'", s))
                    })?;
                    ThresholdRule::Supermajority { numerator, denominator }
                } else {
                    return Err(GovernanceError::validation(format!("Unknown threshold rule '{}'", s)));
                }
            }
        };
        rule.to_policy()?;
        Ok(rule)
    }
}

/// Inclusive character-count bounds for a text field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Check the trimmed character count of `value`
    pub fn check(&self, field: &str, value: &str) -> GovernanceResult<()> {
        let len = trimmed_len(value);
        if len < self.min {
            return Err(GovernanceError::validation(format!(
                "{} must be at least {} characters", field, self.min
            )));
        }
        if len > self.max {
            return Err(GovernanceError::validation(format!(
                "{} cannot exceed {} characters", field, self.max
            )));
        }
        Ok(())
    }
}

/// Configuration for the governance engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Threshold applied when a proposal's scope has no override
    pub default_threshold: ThresholdRule,
    /// Per-scope threshold overrides, keyed by scope id
    pub scope_thresholds: HashMap<String, ThresholdRule>,
    /// Minimum reasoning length for stances that require justification
    pub min_reasoning_length: usize,
    /// Maximum reasoning length for any stance
    pub max_reasoning_length: usize,
    pub proposal_title: LengthBounds,
    pub proposal_summary: LengthBounds,
    pub evidence_title: LengthBounds,
    pub evidence_summary: LengthBounds,
    /// Maximum length of a minority report, before the edit footer
    pub max_report_length: usize,
    /// Verifications needed to mark evidence verified
    pub evidence_verify_threshold: usize,
    /// Disputes needed to mark evidence disputed
    pub evidence_dispute_threshold: usize,
    /// Attempts at a revision-checked proposal update before a conflict is surfaced
    pub max_decide_attempts: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            default_threshold: ThresholdRule::SimpleMajority,
            scope_thresholds: HashMap::new(),
            min_reasoning_length: 10,
            max_reasoning_length: 2000,
            proposal_title: LengthBounds::new(3, 200),
            proposal_summary: LengthBounds::new(10, 2000),
            evidence_title: LengthBounds::new(3, 200),
            evidence_summary: LengthBounds::new(10, 1000),
            max_report_length: 5000,
            evidence_verify_threshold: 3,
            evidence_dispute_threshold: 2,
            max_decide_attempts: 3,
        }
    }
}

impl GovernanceConfig {
    /// Parse configuration from YAML
    pub fn from_yaml_str(content: &str) -> GovernanceResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| GovernanceError::validation(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> GovernanceResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GovernanceError::validation(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from the environment.
    ///
    /// Starts from `CONSENT_CONFIG_FILE` when set (defaults otherwise), then
    /// applies `CONSENT_THRESHOLD`, `CONSENT_SUPERMAJORITY`,
    /// `CONSENT_MIN_REASONING` and `CONSENT_MAX_DECIDE_ATTEMPTS`.
    pub fn from_env() -> GovernanceResult<Self> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => {
                debug!("Loading governance config from {}", path);
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };

        if let Ok(rule) = env::var("CONSENT_THRESHOLD") {
            config.default_threshold = ThresholdRule::parse(&rule)?;
        }
        if let Ok(fraction) = env::var("CONSENT_SUPERMAJORITY") {
            config.default_threshold = match ThresholdRule::parse(&fraction)? {
                rule @ ThresholdRule::Supermajority { .. } => rule,
                _ => {
                    return Err(GovernanceError::validation(format!(
                        "CONSENT_SUPERMAJORITY must be a fraction such as 2/3, got '{}'",
                        fraction
                    )))
                }
            };
        }
        if let Ok(value) = env::var("CONSENT_MIN_REASONING") {
            config.min_reasoning_length = parse_env("CONSENT_MIN_REASONING", &value)?;
        }
        if let Ok(value) = env::var("CONSENT_MAX_DECIDE_ATTEMPTS") {
            config.max_decide_attempts = parse_env("CONSENT_MAX_DECIDE_ATTEMPTS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> GovernanceResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| GovernanceError::SerializationError(e.to_string()))
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> GovernanceResult<()> {
        self.default_threshold.to_policy()?;
        for (scope, rule) in &self.scope_thresholds {
            rule.to_policy().map_err(|e| {
                GovernanceError::validation(format!("Threshold for scope '{}': {}", scope, e))
            })?;
        }

        if self.min_reasoning_length == 0 {
            return Err(GovernanceError::validation("min_reasoning_length must be positive"));
        }
        if self.min_reasoning_length > self.max_reasoning_length {
            return Err(GovernanceError::validation(
                "min_reasoning_length cannot exceed max_reasoning_length",
            ));
        }
        for (name, bounds) in [
            ("proposal_title", self.proposal_title),
            ("proposal_summary", self.proposal_summary),
            ("evidence_title", self.evidence_title),
            ("evidence_summary", self.evidence_summary),
        ] {
            if bounds.min == 0 || bounds.min > bounds.max {
                return Err(GovernanceError::validation(format!(
                    "{} bounds must satisfy 0 < min <= max", name
                )));
            }
        }
        if self.max_report_length == 0 {
            return Err(GovernanceError::validation("max_report_length must be positive"));
        }
        if self.evidence_verify_threshold == 0 || self.evidence_dispute_threshold == 0 {
            return Err(GovernanceError::validation("evidence thresholds must be positive"));
        }
        if self.max_decide_attempts == 0 {
            return Err(GovernanceError::validation("max_decide_attempts must be positive"));
        }
        Ok(())
    }

    /// Rule in force for proposals in `scope_id`
    pub fn rule_for_scope(&self, scope_id: &str) -> &ThresholdRule {
        self.scope_thresholds.get(scope_id).unwrap_or(&self.default_threshold)
    }

    /// Policy in force for proposals in `scope_id`
    pub fn policy_for_scope(&self, scope_id: &str) -> GovernanceResult<Arc<dyn ThresholdPolicy>> {
        self.rule_for_scope(scope_id).to_policy()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> GovernanceResult<T> {
    value.trim().parse().map_err(|_| {
        GovernanceError::validation(format!("Invalid value for environment variable {}: {}", name, value))
    })
}
