//! The request governor.
//!
//! [`RequestGovernor`] chains the pipeline stages for one inbound agent
//! action: injection screening, authority validation, misuse detection,
//! policy evaluation, and sealing. Every path — including every block —
//! seals a proof bundle recording the decision and appends it to the audit
//! sink; a request whose decision cannot be sealed is not treated as
//! governed, so sealing and sink failures propagate.

use std::sync::Arc;
use toolgov_core::{
    AgentActionRequest, AuditEventType, AuditSink, AuthorityViolation, Decision,
    GovernanceOutcome, InjectionVerdict, MisuseVerdict, PolicyEvaluationResult, Recommendation,
    RequestMetadata, Result, RiskLevel, ToolCallRecord, ViolationSeverity, ViolationType,
};
use toolgov_security::{ActionSpec, AuthorityValidator, InjectionGuard, MisuseDetector};
use tracing::{info, warn};

use crate::policy::PolicyEngine;
use crate::proof::ProofSealer;

/// Everything the finalization step needs besides the request itself.
struct StageResults {
    decision: Decision,
    reasons: Vec<String>,
    injection: Option<InjectionVerdict>,
    misuse: Option<MisuseVerdict>,
    violation: Option<AuthorityViolation>,
    /// Engine result, when policy evaluation actually ran.
    policy: Option<PolicyEvaluationResult>,
    /// The verdict characteristics that get sealed (synthesized for
    /// short-circuit blocks).
    sealed: PolicyEvaluationResult,
}

/// Governs inbound agent actions through the full pipeline.
pub struct RequestGovernor {
    guard: InjectionGuard,
    validator: AuthorityValidator,
    detector: MisuseDetector,
    engine: PolicyEngine,
    sealer: ProofSealer,
    audit: Arc<dyn AuditSink>,
}

impl RequestGovernor {
    /// Assemble a governor from its stages.
    pub fn new(
        guard: InjectionGuard,
        validator: AuthorityValidator,
        detector: MisuseDetector,
        engine: PolicyEngine,
        sealer: ProofSealer,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            guard,
            validator,
            detector,
            engine,
            sealer,
            audit,
        }
    }

    /// Govern one inbound agent action.
    ///
    /// Returns the decision, its reasons, and the sealed proof bundle.
    /// Errors surface only from the sealing/audit stage.
    pub async fn govern(&self, request: &AgentActionRequest) -> Result<GovernanceOutcome> {
        // Stage 1: injection screening. Only a critical verdict blocks
        // before authorization; lower-risk detections ride along on the
        // outcome.
        let verdict = self.guard.classify(&request.prompt);
        if verdict.detected && verdict.risk_level == RiskLevel::Critical {
            let reason = format!(
                "Prompt injection detected ({}): {}",
                verdict.category, verdict.pattern
            );
            warn!(
                request_id = %request.request_id,
                category = %verdict.category,
                pattern = %verdict.pattern,
                "Blocking request on critical injection verdict"
            );
            let confidence = verdict.confidence;
            return self
                .finalize(
                    request,
                    StageResults {
                        decision: Decision::Block,
                        reasons: vec![reason.clone()],
                        injection: Some(verdict),
                        misuse: None,
                        violation: None,
                        policy: None,
                        sealed: PolicyEvaluationResult::short_circuit_block(reason, confidence),
                    },
                )
                .await;
        }

        let mut warn_floor = Decision::Allow;
        let mut reasons: Vec<String> = Vec::new();
        let injection = if verdict.detected {
            if verdict.risk_level >= RiskLevel::High {
                warn_floor = Decision::Warn;
                reasons.push(format!(
                    "Prompt injection suspected ({}): {}",
                    verdict.category, verdict.pattern
                ));
            }
            Some(verdict)
        } else {
            None
        };

        // Stage 2: authority context. No context means no authorization.
        let context = self
            .validator
            .build_context(request.principal_id, Some(request.session_id.as_str()))
            .await?;
        let Some(context) = context else {
            let reason = "Failed to resolve authority context for principal".to_string();
            let violation = AuthorityViolation::new(
                ViolationType::PrincipalNotFound,
                format!("principal:{}", request.principal_id),
                "known_principals".to_string(),
                ViolationSeverity::Critical,
            );
            return self
                .finalize(
                    request,
                    StageResults {
                        decision: Decision::Block,
                        reasons: vec![reason.clone()],
                        injection,
                        misuse: None,
                        violation: Some(violation),
                        policy: None,
                        sealed: PolicyEvaluationResult::short_circuit_block(reason, 1.0),
                    },
                )
                .await;
        };

        // Stage 3: scope, role, and rate validation.
        let outcome = self
            .validator
            .validate_action(&context, &ActionSpec::from(request));
        if !outcome.authorized {
            return self
                .finalize(
                    request,
                    StageResults {
                        decision: Decision::Block,
                        reasons: vec![outcome.reason.clone()],
                        injection,
                        misuse: None,
                        violation: outcome.violation,
                        policy: None,
                        sealed: PolicyEvaluationResult::short_circuit_block(outcome.reason, 1.0),
                    },
                )
                .await;
        }

        // Stage 4: behavioral misuse detection over the session window.
        // Only tool invocations feed the window.
        let mut misuse: Option<MisuseVerdict> = None;
        if let Some(ref tool_name) = request.tool_name {
            let observed_tenant = request.target_tenant_id.unwrap_or(request.tenant_id);
            let mut record = ToolCallRecord::new(
                tool_name.clone(),
                request.tool_args.clone(),
                observed_tenant,
            );
            if let Some(workspace) = request.target_workspace_id {
                record = record.with_workspace(workspace);
            }
            self.detector.record(&request.session_id, record);

            let detection = self
                .detector
                .detect(&request.session_id, tool_name, &request.tool_args);
            if detection.detected {
                match detection.recommendation {
                    Recommendation::Block | Recommendation::Terminate => {
                        let reason = format!(
                            "Tool misuse detected ({}): {}",
                            detection.misuse_type, detection.details
                        );
                        warn!(
                            request_id = %request.request_id,
                            session_id = %request.session_id,
                            misuse_type = %detection.misuse_type,
                            recommendation = %detection.recommendation,
                            "Blocking request on misuse verdict"
                        );
                        let confidence = detection.confidence;
                        return self
                            .finalize(
                                request,
                                StageResults {
                                    decision: Decision::Block,
                                    reasons: vec![reason.clone()],
                                    injection,
                                    misuse: Some(detection),
                                    violation: None,
                                    policy: None,
                                    sealed: PolicyEvaluationResult::short_circuit_block(
                                        reason, confidence,
                                    ),
                                },
                            )
                            .await;
                    }
                    Recommendation::Warn => {
                        warn_floor = Decision::Warn;
                        reasons.push(format!(
                            "Tool misuse warning ({}): {}",
                            detection.misuse_type, detection.details
                        ));
                        misuse = Some(detection);
                    }
                    Recommendation::Allow => {
                        misuse = Some(detection);
                    }
                }
            }
        }

        // Stage 5: boundary-policy evaluation (fail-open internally).
        let policy = self.engine.evaluate(request).await;
        let decision = policy.decision.max(warn_floor);
        reasons.extend(policy.reasons.iter().cloned());

        self.finalize(
            request,
            StageResults {
                decision,
                reasons,
                injection,
                misuse,
                violation: None,
                sealed: policy.clone(),
                policy: Some(policy),
            },
        )
        .await
    }

    /// Stage 6: seal the decision and hand it to the audit sink. Failures
    /// here are fatal to the request.
    async fn finalize(
        &self,
        request: &AgentActionRequest,
        results: StageResults,
    ) -> Result<GovernanceOutcome> {
        let bundle = self.sealer.seal(request, &results.sealed, None)?;

        let metadata = RequestMetadata {
            request_id: request.request_id,
            principal_id: request.principal_id,
            tenant_id: request.tenant_id,
            partner_id: request.partner_id.clone(),
            event_type: if results.decision == Decision::Block {
                AuditEventType::AccessDenied
            } else {
                AuditEventType::AccessGranted
            },
        };
        self.audit.append(bundle.clone(), metadata).await?;

        info!(
            request_id = %request.request_id,
            decision = %results.decision,
            bundle_id = %bundle.bundle_id,
            "Request governed"
        );

        Ok(GovernanceOutcome {
            decision: results.decision,
            reasons: results.reasons,
            proof_bundle: bundle,
            violation: results.violation,
            injection: results.injection,
            misuse: results.misuse,
            policy: results.policy,
        })
    }
}
