//! Host blocklist safety evaluator.
//!
//! Denies actions on any tab whose committed origin has a host matching one
//! of the configured patterns. Opaque origins (about:blank, data: URLs, ...)
//! carry no host and are always allowed.

use async_trait::async_trait;
use regex::Regex;
use steward_core::config::SafetyConfig;
use steward_core::{Origin, StewardError, TabId, TaskId};

use crate::collaborator::SafetyEvaluator;

pub struct BlocklistSafetyEvaluator {
    patterns: Vec<Regex>,
}

impl BlocklistSafetyEvaluator {
    /// Compile the `[safety].blocked_hosts` patterns.
    pub fn from_config(config: &SafetyConfig) -> steward_core::Result<Self> {
        let patterns = config
            .blocked_hosts
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| StewardError::Config(format!("Invalid blocked host '{p}': {e}")))
            })
            .collect::<steward_core::Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// An evaluator that allows everything.
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn is_blocked(&self, origin: &Origin) -> bool {
        match origin.host() {
            Some(host) => self.patterns.iter().any(|p| p.is_match(host)),
            None => false,
        }
    }
}

#[async_trait]
impl SafetyEvaluator for BlocklistSafetyEvaluator {
    async fn may_act(&self, tab: TabId, task_id: TaskId, origin: &Origin) -> bool {
        if self.is_blocked(origin) {
            tracing::info!(%tab, %task_id, %origin, "Action blocked by host blocklist");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(patterns: &[&str]) -> BlocklistSafetyEvaluator {
        let config = SafetyConfig {
            blocked_hosts: patterns.iter().map(|p| p.to_string()).collect(),
        };
        BlocklistSafetyEvaluator::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_blocks_matching_host() {
        let safety = evaluator(&[r"(^|\.)bank\.test$"]);
        let blocked = Origin::from_url("https://login.bank.test/auth").unwrap();
        let allowed = Origin::from_url("https://shop.test/").unwrap();
        assert!(!safety.may_act(TabId(1), TaskId(1), &blocked).await);
        assert!(safety.may_act(TabId(1), TaskId(1), &allowed).await);
    }

    #[test]
    fn test_host_match_is_case_insensitive_via_origin() {
        let safety = evaluator(&["^bank\\.test$"]);
        let origin = Origin::from_url("https://BANK.test").unwrap();
        assert!(safety.is_blocked(&origin));
    }

    #[test]
    fn test_opaque_origin_is_allowed() {
        let safety = evaluator(&[".*"]);
        assert!(!safety.is_blocked(&Origin::opaque()));
    }

    #[test]
    fn test_allow_all() {
        let origin = Origin::from_url("https://anything.test").unwrap();
        assert!(!BlocklistSafetyEvaluator::allow_all().is_blocked(&origin));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = SafetyConfig {
            blocked_hosts: vec!["(unclosed".to_string()],
        };
        let err = BlocklistSafetyEvaluator::from_config(&config)
            .err()
            .unwrap();
        assert!(matches!(err, StewardError::Config(_)));
        assert!(err.to_string().contains("(unclosed"));
    }
}
