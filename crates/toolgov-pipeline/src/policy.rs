//! Boundary-policy evaluation.
//!
//! [`PolicyEngine`] loads a tenant's active policies, extracts their
//! boundary rules by family, evaluates the four families independently,
//! and aggregates the verdicts into one [`PolicyEvaluationResult`] using
//! the `block > warn > allow` total order.
//!
//! Evaluation fails *open*: a policy-load timeout or store error yields an
//! allow with an explicit low-confidence reason and an operator-visible
//! `fail_open` log event. Availability over strictness is a deliberate
//! property of this engine, not an accident.

use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolgov_core::{
    AgentActionRequest, BoundaryRule, BoundaryRuleType, Decision, PolicyConfig,
    PolicyEvaluationResult, PolicyStore, RequestHistoryStore, RuleSeverity,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cost::CostEstimator;

/// Verdict of a single rule family.
#[derive(Debug, Default)]
struct FamilyVerdict {
    decision: Option<Decision>,
    reasons: Vec<String>,
    violated_rules: Vec<String>,
}

impl FamilyVerdict {
    fn decision(&self) -> Decision {
        self.decision.unwrap_or(Decision::Allow)
    }

    /// Apply one matched rule according to its severity. Monitor matches
    /// record a reason without touching the decision.
    fn apply(&mut self, severity: RuleSeverity, reason: String, violated_rule: String) {
        match severity {
            RuleSeverity::Block => {
                self.decision = Some(self.decision().max(Decision::Block));
                self.reasons.push(reason);
                self.violated_rules.push(violated_rule);
            }
            RuleSeverity::Warn => {
                self.decision = Some(self.decision().max(Decision::Warn));
                self.reasons.push(reason);
                self.violated_rules.push(violated_rule);
            }
            RuleSeverity::Monitor => {
                info!(rule = %violated_rule, reason = %reason, "Monitor rule matched");
                self.reasons.push(reason);
            }
        }
    }
}

/// Evaluates requests against a tenant's active boundary policies.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    history: Arc<dyn RequestHistoryStore>,
    estimator: CostEstimator,
    config: PolicyConfig,
}

impl PolicyEngine {
    /// Create an engine over the given policy store and request history.
    pub fn new(
        store: Arc<dyn PolicyStore>,
        history: Arc<dyn RequestHistoryStore>,
        estimator: CostEstimator,
        config: PolicyConfig,
    ) -> Self {
        Self {
            store,
            history,
            estimator,
            config,
        }
    }

    /// Evaluate a request against all active policies for its tenant.
    ///
    /// Infallible by contract: every internal error resolves to the
    /// fail-open result.
    pub async fn evaluate(&self, request: &AgentActionRequest) -> PolicyEvaluationResult {
        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.load_timeout_ms);

        let policies = match tokio::time::timeout(
            timeout,
            self.store.load_active_policies(request.tenant_id),
        )
        .await
        {
            Ok(Ok(policies)) => policies,
            Ok(Err(e)) => {
                warn!(
                    fail_open = true,
                    tenant_id = %request.tenant_id,
                    error = %e,
                    "Policy load failed; allowing request"
                );
                return PolicyEvaluationResult::fail_open(
                    format!("Policy evaluation error (fail-open): {e}"),
                    start.elapsed().as_millis() as u64,
                );
            }
            Err(_) => {
                warn!(
                    fail_open = true,
                    tenant_id = %request.tenant_id,
                    timeout_ms = self.config.load_timeout_ms,
                    "Policy load timed out; allowing request"
                );
                return PolicyEvaluationResult::fail_open(
                    "Policy evaluation timed out (fail-open)",
                    start.elapsed().as_millis() as u64,
                );
            }
        };

        let policy_ids: Vec<Uuid> = policies.iter().map(|p| p.id).collect();

        let mut model_rules: Vec<(Uuid, BoundaryRule)> = Vec::new();
        let mut content_rules: Vec<(Uuid, BoundaryRule)> = Vec::new();
        let mut rate_rules: Vec<(Uuid, BoundaryRule)> = Vec::new();
        let mut cost_rules: Vec<(Uuid, BoundaryRule)> = Vec::new();
        for policy in &policies {
            for rule in &policy.rules {
                let bucket = match rule.rule_type {
                    BoundaryRuleType::ModelRestriction => &mut model_rules,
                    BoundaryRuleType::ContentFilter => &mut content_rules,
                    BoundaryRuleType::RateLimit => &mut rate_rules,
                    BoundaryRuleType::CostControl => &mut cost_rules,
                };
                bucket.push((policy.id, rule.clone()));
            }
        }

        // The four families have no cross-family data dependency.
        let (model_v, content_v, rate_v, cost_v) = tokio::join!(
            self.evaluate_model_rules(&model_rules, request),
            self.evaluate_content_rules(&content_rules, request),
            self.evaluate_rate_rules(&rate_rules, request),
            self.evaluate_cost_rules(&cost_rules, request),
        );

        let families = [model_v, content_v, rate_v, cost_v];
        let decision = families
            .iter()
            .map(FamilyVerdict::decision)
            .max()
            .unwrap_or(Decision::Allow);
        let confidence = if families.iter().all(|f| f.decision() == decision) {
            1.0
        } else {
            0.7
        };

        let mut reasons: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut violated_rules: Vec<String> = Vec::new();
        for family in families {
            for reason in family.reasons {
                if seen.insert(reason.clone()) {
                    reasons.push(reason);
                }
            }
            violated_rules.extend(family.violated_rules);
        }

        PolicyEvaluationResult {
            allowed: decision != Decision::Block,
            decision,
            reasons,
            violated_rules,
            policy_ids,
            confidence,
            evaluation_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Model allow-list rules: the request's model must be listed.
    async fn evaluate_model_rules(
        &self,
        rules: &[(Uuid, BoundaryRule)],
        request: &AgentActionRequest,
    ) -> FamilyVerdict {
        let mut verdict = FamilyVerdict::default();
        if request.model.is_empty() {
            return verdict;
        }

        for (policy_id, rule) in rules {
            let allowed = rule
                .config
                .get("allowed_models")
                .and_then(|v| v.as_array());
            let Some(allowed) = allowed else { continue };
            if allowed.is_empty() {
                continue;
            }

            let permitted = allowed
                .iter()
                .filter_map(|v| v.as_str())
                .any(|m| m.eq_ignore_ascii_case(&request.model));
            if !permitted {
                verdict.apply(
                    rule.severity,
                    format!("Model '{}' is not in the allowed list", request.model),
                    format!("model_restriction:{policy_id}"),
                );
            }
        }
        verdict
    }

    /// Content-filter rules: the prompt is matched against each rule's
    /// block patterns. Invalid patterns degrade to literal substring
    /// matching rather than failing the family.
    async fn evaluate_content_rules(
        &self,
        rules: &[(Uuid, BoundaryRule)],
        request: &AgentActionRequest,
    ) -> FamilyVerdict {
        let mut verdict = FamilyVerdict::default();
        if request.prompt.is_empty() {
            return verdict;
        }
        let prompt_lower = request.prompt.to_lowercase();

        for (policy_id, rule) in rules {
            let patterns = rule
                .config
                .get("block_patterns")
                .and_then(|v| v.as_array());
            let Some(patterns) = patterns else { continue };

            for pattern in patterns.iter().filter_map(|v| v.as_str()) {
                let matched = match Regex::new(&format!("(?i){pattern}")) {
                    Ok(regex) => regex.is_match(&request.prompt),
                    Err(_) => prompt_lower.contains(&pattern.to_lowercase()),
                };
                if matched {
                    verdict.apply(
                        rule.severity,
                        format!("Content matched blocked pattern '{pattern}'"),
                        format!("content_filter:{policy_id}"),
                    );
                }
            }
        }
        verdict
    }

    /// Daily request-cap rules against the cross-session history store.
    async fn evaluate_rate_rules(
        &self,
        rules: &[(Uuid, BoundaryRule)],
        request: &AgentActionRequest,
    ) -> FamilyVerdict {
        let mut verdict = FamilyVerdict::default();
        if rules.is_empty() {
            return verdict;
        }

        let since = Utc::now() - ChronoDuration::hours(24);
        let count = match self
            .history
            .count_requests(request.tenant_id, &request.partner_id, since)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    fail_open = true,
                    tenant_id = %request.tenant_id,
                    error = %e,
                    "Request-history lookup failed; skipping rate rules"
                );
                verdict
                    .reasons
                    .push(format!("Rate limit check error (fail-open): {e}"));
                return verdict;
            }
        };

        for (policy_id, rule) in rules {
            let cap = rule
                .config
                .get("max_requests_per_day")
                .and_then(|v| v.as_u64());
            let Some(cap) = cap else { continue };

            if count >= cap {
                verdict.apply(
                    rule.severity,
                    format!("Daily request cap reached: {count} of {cap} in the last 24h"),
                    format!("rate_limit:{policy_id}"),
                );
            }
        }
        verdict
    }

    /// Monthly spend-cap rules. The comparison covers this request's
    /// estimate alone; cumulative monthly spend is not accumulated here.
    async fn evaluate_cost_rules(
        &self,
        rules: &[(Uuid, BoundaryRule)],
        request: &AgentActionRequest,
    ) -> FamilyVerdict {
        let mut verdict = FamilyVerdict::default();
        if rules.is_empty() {
            return verdict;
        }

        let Some(estimate) = self.estimator.estimate(
            &request.model,
            request.estimated_input_tokens,
            request.estimated_output_tokens,
        ) else {
            return verdict;
        };

        for (policy_id, rule) in rules {
            let cap = rule
                .config
                .get("max_monthly_spend")
                .and_then(|v| v.as_f64());
            let Some(cap) = cap else { continue };

            if estimate > cap {
                verdict.apply(
                    rule.severity,
                    format!(
                        "Estimated request cost ${estimate:.4} exceeds monthly cap ${cap:.2}"
                    ),
                    format!("cost_control:{policy_id}"),
                );
            }
        }
        verdict
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
