//! Diffusion Rule Engine
//!
//! Decides whether an observation's coordinates must be generalized
//! ("diffused") and to which grid precision. Rules are scoped to a taxon
//! and optionally narrowed by area, activity, life stage and a recurring
//! calendar window.
//!
//! The engine is constructed once per run with a fixed reference date, so
//! `evaluate` is a pure function of its arguments.

pub mod grid;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sos_common::config::ProcessingConfig;
use sos_common::models::{DiffusionRule, MonthDay};

use crate::area_resolver::ResolvedAreas;

/// Rule lookup failed; evaluation falls back to fail-safe diffusion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleLookupError {
    #[error("diffusion rules for taxon {taxon_id} are unreadable: {reason}")]
    Unreadable { taxon_id: i32, reason: String },

    #[error("diffusion rule source unavailable: {0}")]
    Unavailable(String),
}

/// Read access to diffusion rules by taxon
pub trait DiffusionRuleSource: Send + Sync {
    /// Rules scoped to `taxon_id`; an empty slice when the taxon has none
    fn rules_for(&self, taxon_id: i32) -> Result<&[DiffusionRule], RuleLookupError>;
}

/// In-memory rule set grouped by taxon
///
/// Taxa whose stored rules could not be decoded are remembered so that
/// lookups for them fail (and evaluation fails safe) instead of silently
/// reporting "no rules".
#[derive(Debug, Default)]
pub struct RuleSet {
    by_taxon: HashMap<i32, Vec<DiffusionRule>>,
    unreadable: HashMap<i32, String>,
}

impl RuleSet {
    pub fn new(rules: Vec<DiffusionRule>) -> Self {
        let mut set = Self::default();
        for rule in rules {
            set.insert(rule);
        }
        set
    }

    pub fn insert(&mut self, rule: DiffusionRule) {
        let rules = self.by_taxon.entry(rule.taxon_id).or_default();
        rules.push(rule);
        rules.sort_by_key(|rule| rule.id);
    }

    pub fn mark_unreadable(&mut self, taxon_id: i32, reason: impl Into<String>) {
        self.unreadable.insert(taxon_id, reason.into());
    }

    pub fn rule_count(&self) -> usize {
        self.by_taxon.values().map(Vec::len).sum()
    }

    pub fn unreadable_count(&self) -> usize {
        self.unreadable.len()
    }
}

impl DiffusionRuleSource for RuleSet {
    fn rules_for(&self, taxon_id: i32) -> Result<&[DiffusionRule], RuleLookupError> {
        if let Some(reason) = self.unreadable.get(&taxon_id) {
            return Err(RuleLookupError::Unreadable {
                taxon_id,
                reason: reason.clone(),
            });
        }
        Ok(self
            .by_taxon
            .get(&taxon_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

/// Grid sizes applied when a rule does not name one, or on lookup failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    pub default_precision_meters: u32,
    pub fail_safe_precision_meters: u32,
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self {
            default_precision_meters: 1000,
            fail_safe_precision_meters: 25_000,
        }
    }
}

impl From<&ProcessingConfig> for PrecisionPolicy {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            default_precision_meters: config.default_precision_meters,
            fail_safe_precision_meters: config.fail_safe_precision_meters,
        }
    }
}

/// Outcome of rule evaluation for one observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffusionDecision {
    pub must_diffuse: bool,
    pub precision_meters: Option<u32>,
    /// Ids of the rules that matched, ascending
    pub matched_rule_ids: Vec<i32>,
    /// Diffusion was forced because the rules could not be read
    pub fail_safe: bool,
}

impl DiffusionDecision {
    pub fn not_diffused() -> Self {
        Self {
            must_diffuse: false,
            precision_meters: None,
            matched_rule_ids: Vec::new(),
            fail_safe: false,
        }
    }
}

pub struct DiffusionRuleEngine {
    source: Arc<dyn DiffusionRuleSource>,
    reference_date: NaiveDate,
    policy: PrecisionPolicy,
}

impl std::fmt::Debug for DiffusionRuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffusionRuleEngine")
            .field("reference_date", &self.reference_date)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DiffusionRuleEngine {
    /// `reference_date` stands in for "today" when checking rule expiry
    ///
    /// Zero precisions in `policy` are replaced by the defaults.
    pub fn new(
        source: Arc<dyn DiffusionRuleSource>,
        reference_date: NaiveDate,
        policy: PrecisionPolicy,
    ) -> Self {
        let defaults = PrecisionPolicy::default();
        let policy = PrecisionPolicy {
            default_precision_meters: non_zero_or(
                policy.default_precision_meters,
                defaults.default_precision_meters,
            ),
            fail_safe_precision_meters: non_zero_or(
                policy.fail_safe_precision_meters,
                defaults.fail_safe_precision_meters,
            ),
        };
        Self {
            source,
            reference_date,
            policy,
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn policy(&self) -> PrecisionPolicy {
        self.policy
    }

    /// Evaluate every rule of the taxon against one observation
    pub fn evaluate(
        &self,
        taxon_id: i32,
        observation_date: NaiveDate,
        activity_id: Option<i32>,
        stage_id: Option<i32>,
        areas: &ResolvedAreas,
    ) -> DiffusionDecision {
        let rules = match self.source.rules_for(taxon_id) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(taxon_id, error = %e, "Rule lookup failed, diffusing fail-safe");
                return DiffusionDecision {
                    must_diffuse: true,
                    precision_meters: Some(self.policy.fail_safe_precision_meters),
                    matched_rule_ids: Vec::new(),
                    fail_safe: true,
                };
            }
        };

        let day = MonthDay::of(observation_date);
        let mut decision = DiffusionDecision::not_diffused();

        for rule in rules {
            if !self.rule_matches(rule, taxon_id, day, activity_id, stage_id, areas) {
                continue;
            }
            let precision = self.rule_precision(rule);
            decision.must_diffuse = true;
            decision.precision_meters = Some(
                decision
                    .precision_meters
                    .map_or(precision, |current| current.max(precision)),
            );
            decision.matched_rule_ids.push(rule.id);
        }

        decision.matched_rule_ids.sort_unstable();
        decision
    }

    /// A rule without a usable precision gets the default grid size
    fn rule_precision(&self, rule: &DiffusionRule) -> u32 {
        non_zero_or(
            rule.precision_meters.unwrap_or(0),
            self.policy.default_precision_meters,
        )
    }

    fn rule_matches(
        &self,
        rule: &DiffusionRule,
        taxon_id: i32,
        day: MonthDay,
        activity_id: Option<i32>,
        stage_id: Option<i32>,
        areas: &ResolvedAreas,
    ) -> bool {
        if rule.taxon_id != taxon_id {
            return false;
        }

        if let Some(expire_date) = rule.expire_date {
            if expire_date < self.reference_date {
                return false;
            }
        }

        if let Some(window) = &rule.window {
            if !window.contains(day) {
                return false;
            }
        }

        if !rule.areas.is_empty()
            && !rule
                .areas
                .iter()
                .any(|area| areas.feature_id(area.area_type) == Some(area.feature_id.as_str()))
        {
            return false;
        }

        if !in_scope(&rule.activity_ids, activity_id) {
            return false;
        }

        in_scope(&rule.stage_ids, stage_id)
    }
}

fn non_zero_or(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// Empty scope matches anything; otherwise the value must be listed
fn in_scope(scope: &[i32], value: Option<i32>) -> bool {
    if scope.is_empty() {
        return true;
    }
    value.is_some_and(|value| scope.contains(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::models::{AreaRef, AreaType, RecurringWindow, RuleArea};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule(id: i32, taxon_id: i32) -> DiffusionRule {
        DiffusionRule {
            id,
            taxon_id,
            areas: vec![],
            activity_ids: vec![],
            stage_ids: vec![],
            window: None,
            expire_date: None,
            precision_meters: None,
        }
    }

    fn engine(rules: RuleSet) -> DiffusionRuleEngine {
        DiffusionRuleEngine::new(Arc::new(rules), date(2024, 6, 1), PrecisionPolicy::default())
    }

    fn stockholm() -> ResolvedAreas {
        ResolvedAreas::default().with(
            AreaType::County,
            AreaRef {
                feature_id: "01".to_string(),
                name: "Stockholm".to_string(),
            },
        )
    }

    #[test]
    fn test_no_rules_not_diffused() {
        let decision = engine(RuleSet::default()).evaluate(
            100024,
            date(2024, 5, 1),
            None,
            None,
            &ResolvedAreas::default(),
        );
        assert_eq!(decision, DiffusionDecision::not_diffused());
    }

    #[test]
    fn test_unscoped_rule_diffuses_with_default_precision() {
        let decision = engine(RuleSet::new(vec![rule(1, 100024)])).evaluate(
            100024,
            date(2024, 5, 1),
            None,
            None,
            &ResolvedAreas::default(),
        );
        assert!(decision.must_diffuse);
        assert_eq!(decision.precision_meters, Some(1000));
        assert_eq!(decision.matched_rule_ids, vec![1]);
        assert!(!decision.fail_safe);
    }

    #[test]
    fn test_expired_rule_skipped() {
        let mut expired = rule(1, 7);
        expired.expire_date = Some(date(2024, 5, 31));
        let mut expires_today = rule(2, 7);
        expires_today.expire_date = Some(date(2024, 6, 1));

        let none = ResolvedAreas::default();
        let stale = engine(RuleSet::new(vec![expired]));
        assert!(!stale.evaluate(7, date(2020, 1, 1), None, None, &none).must_diffuse);

        let current = engine(RuleSet::new(vec![expires_today]));
        assert!(current.evaluate(7, date(2020, 1, 1), None, None, &none).must_diffuse);
    }

    #[test]
    fn test_wrapping_window() {
        let mut winter = rule(1, 7);
        winter.window = Some(RecurringWindow {
            start: MonthDay::new(12, 1).unwrap(),
            end: MonthDay::new(2, 28).unwrap(),
        });
        let engine = engine(RuleSet::new(vec![winter]));
        let none = ResolvedAreas::default();

        assert!(engine.evaluate(7, date(2023, 12, 24), None, None, &none).must_diffuse);
        assert!(engine.evaluate(7, date(2024, 1, 15), None, None, &none).must_diffuse);
        assert!(engine.evaluate(7, date(2024, 2, 28), None, None, &none).must_diffuse);
        assert!(!engine.evaluate(7, date(2024, 7, 1), None, None, &none).must_diffuse);
    }

    #[test]
    fn test_area_scope() {
        let mut scoped = rule(1, 7);
        scoped.areas = vec![RuleArea {
            area_type: AreaType::County,
            feature_id: "01".to_string(),
        }];
        let engine = engine(RuleSet::new(vec![scoped]));

        assert!(engine.evaluate(7, date(2024, 1, 1), None, None, &stockholm()).must_diffuse);
        assert!(!engine
            .evaluate(7, date(2024, 1, 1), None, None, &ResolvedAreas::default())
            .must_diffuse);
    }

    #[test]
    fn test_activity_and_stage_scope() {
        let mut nesting = rule(1, 7);
        nesting.activity_ids = vec![10, 11];
        nesting.stage_ids = vec![3];
        let engine = engine(RuleSet::new(vec![nesting]));
        let none = ResolvedAreas::default();

        assert!(engine.evaluate(7, date(2024, 1, 1), Some(11), Some(3), &none).must_diffuse);
        assert!(!engine.evaluate(7, date(2024, 1, 1), Some(12), Some(3), &none).must_diffuse);
        assert!(!engine.evaluate(7, date(2024, 1, 1), Some(10), None, &none).must_diffuse);
        assert!(!engine.evaluate(7, date(2024, 1, 1), None, Some(3), &none).must_diffuse);
    }

    #[test]
    fn test_largest_precision_wins() {
        let mut coarse = rule(2, 7);
        coarse.precision_meters = Some(10_000);
        let mut fine = rule(1, 7);
        fine.precision_meters = Some(5_000);
        let unset = rule(3, 7);

        let decision = engine(RuleSet::new(vec![coarse, unset, fine])).evaluate(
            7,
            date(2024, 1, 1),
            None,
            None,
            &ResolvedAreas::default(),
        );
        assert_eq!(decision.precision_meters, Some(10_000));
        assert_eq!(decision.matched_rule_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_precision_never_disables_generalization() {
        let mut zero = rule(1, 7);
        zero.precision_meters = Some(0);
        let none = ResolvedAreas::default();

        let decision =
            engine(RuleSet::new(vec![zero.clone()])).evaluate(7, date(2024, 1, 1), None, None, &none);
        assert!(decision.must_diffuse);
        assert_eq!(decision.precision_meters, Some(1000));

        let zero_policy = PrecisionPolicy {
            default_precision_meters: 0,
            fail_safe_precision_meters: 0,
        };
        let engine = DiffusionRuleEngine::new(
            Arc::new(RuleSet::new(vec![zero])),
            date(2024, 6, 1),
            zero_policy,
        );
        assert_eq!(engine.policy(), PrecisionPolicy::default());
        assert_eq!(
            engine.evaluate(7, date(2024, 1, 1), None, None, &none).precision_meters,
            Some(1000)
        );
    }

    #[test]
    fn test_unreadable_rules_fail_safe() {
        let mut rules = RuleSet::default();
        rules.mark_unreadable(7, "bad document");
        let decision = engine(rules).evaluate(7, date(2024, 1, 1), None, None, &stockholm());

        assert!(decision.must_diffuse);
        assert!(decision.fail_safe);
        assert_eq!(decision.precision_meters, Some(25_000));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let mut scoped = rule(1, 7);
        scoped.window = Some(RecurringWindow {
            start: MonthDay::new(4, 1).unwrap(),
            end: MonthDay::new(7, 31).unwrap(),
        });
        let engine = engine(RuleSet::new(vec![scoped, rule(2, 8)]));

        for day in 1..=28 {
            let observed = date(2024, 4, day);
            let first = engine.evaluate(7, observed, Some(1), None, &stockholm());
            let second = engine.evaluate(7, observed, Some(1), None, &stockholm());
            assert_eq!(first, second);
        }
    }
}
