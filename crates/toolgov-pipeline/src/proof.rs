//! Tamper-evident proof sealing.
//!
//! [`ProofSealer`] binds a request, its policy verdict, and (optionally)
//! the response into a [`ProofBundle`]: three SHA-256 characteristic
//! hashes joined by a fixed delimiter and signed with HMAC-SHA256 under a
//! process-held secret. `verify` recomputes the MAC from the stored hashes
//! only — the bundle does not retain raw content, so a match proves the
//! bundle was not edited after sealing, not that the hashes still
//! correspond to a retrievable original record.
//!
//! A second bundle shape (version "2.0") seals asset/tool-usage
//! declarations with the same hash-then-MAC layout.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Instant;
use toolgov_core::{
    AgentActionRequest, DeploymentStatus, GovernError, PolicyEvaluationResult, ProofBundle,
    ProofConfig, ProofMetadata, ResponseRecord, Result, RiskTier, ToolInventory,
    ToolUsageDeclaration, ToolValidationOutcome, ToolViolation,
};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Placeholder hash recorded when a bundle seals a request that produced
/// no response.
const NO_RESPONSE_SENTINEL: &str = "no-response";

/// Placeholder recorded in the response slot of asset-declaration bundles.
const ASSET_DECLARATION_SENTINEL: &str = "asset-declaration";

/// MAC algorithm identifier recorded in bundle metadata.
const MAC_ALGORITHM: &str = "HMAC-SHA256";

/// Seals and verifies proof bundles under a process-held secret.
pub struct ProofSealer {
    secret: Vec<u8>,
}

impl ProofSealer {
    /// Create a sealer with the given MAC secret.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty secret — sealing with a
    /// guessable default would make every bundle forgeable.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(GovernError::Config(
                "proof secret must not be empty".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    /// Create a sealer from the proof configuration section.
    pub fn from_config(config: &ProofConfig) -> Result<Self> {
        Self::new(config.secret_key.as_bytes().to_vec())
    }

    /// Generate a random secret suitable for development deployments.
    #[must_use]
    pub fn generate_secret() -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn hmac_hex(&self, message: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC key length is always valid");
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify_hmac(&self, message: &[u8], expected_hex: &str) -> bool {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC key length is always valid");
        mac.update(message);
        let expected = match hex::decode(expected_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        mac.verify_slice(&expected).is_ok()
    }

    /// Seal a governed request into a version "1.0" bundle.
    pub fn seal(
        &self,
        request: &AgentActionRequest,
        policy_result: &PolicyEvaluationResult,
        response: Option<&ResponseRecord>,
    ) -> Result<ProofBundle> {
        let start = Instant::now();

        let request_characteristics = serde_json::to_vec(&serde_json::json!({
            "partner_id": request.partner_id,
            "tenant_id": request.tenant_id,
            "principal_id": request.principal_id,
            "model": request.model,
            "prompt": request.prompt,
            "timestamp": request.timestamp,
        }))?;
        let request_hash = Self::sha256_hex(&request_characteristics);

        let response_hash = match response {
            Some(record) => {
                let bytes = serde_json::to_vec(&serde_json::json!({
                    "content": record.content,
                    "tokens": record.tokens,
                }))?;
                Self::sha256_hex(&bytes)
            }
            None => NO_RESPONSE_SENTINEL.to_string(),
        };

        let policy_characteristics = serde_json::to_vec(&serde_json::json!({
            "decision": policy_result.decision,
            "reasons": policy_result.reasons,
            "policy_ids": policy_result.policy_ids,
            "confidence": policy_result.confidence,
        }))?;
        let policy_evaluation_hash = Self::sha256_hex(&policy_characteristics);

        let mac_signature = self.hmac_hex(
            format!("{request_hash}|{response_hash}|{policy_evaluation_hash}").as_bytes(),
        );

        Ok(ProofBundle {
            bundle_id: Uuid::new_v4(),
            request_hash,
            response_hash,
            policy_evaluation_hash,
            mac_signature,
            timestamp: chrono::Utc::now(),
            metadata: ProofMetadata {
                algorithm: MAC_ALGORITHM.to_string(),
                version: "1.0".to_string(),
                generation_time_ms: start.elapsed().as_millis() as u64,
                tool_declaration_hash: None,
                tools_declared: None,
                asset_file_hash: None,
                declaration_id: None,
            },
        })
    }

    /// Recompute the MAC from a bundle's stored hashes and compare.
    ///
    /// Version "2.0" bundles sign the tool-declaration hash in the middle
    /// slot; the metadata version tells the two shapes apart.
    #[must_use]
    pub fn verify(&self, bundle: &ProofBundle) -> bool {
        let message = match bundle.metadata.version.as_str() {
            "2.0" => {
                let Some(ref tool_hash) = bundle.metadata.tool_declaration_hash else {
                    return false;
                };
                format!(
                    "{}|{}|{}",
                    bundle.request_hash, tool_hash, bundle.policy_evaluation_hash
                )
            }
            _ => format!(
                "{}|{}|{}",
                bundle.request_hash, bundle.response_hash, bundle.policy_evaluation_hash
            ),
        };
        self.verify_hmac(message.as_bytes(), &bundle.mac_signature)
    }

    /// Validate declared tool usage against the external inventory.
    ///
    /// Unknown and banned tools are violations; the aggregated risk is the
    /// highest tier among the declared tools.
    pub async fn validate_tool_declaration(
        &self,
        tool_ids: &[Uuid],
        inventory: &dyn ToolInventory,
    ) -> Result<ToolValidationOutcome> {
        if tool_ids.is_empty() {
            return Ok(ToolValidationOutcome {
                approved: true,
                violations: Vec::new(),
                aggregated_risk: RiskTier::Low,
            });
        }

        let tools = inventory.lookup_tools(tool_ids).await?;
        let mut violations: Vec<ToolViolation> = Vec::new();

        for tool_id in tool_ids {
            match tools.iter().find(|t| t.id == *tool_id) {
                None => violations.push(ToolViolation {
                    tool_id: *tool_id,
                    tool_name: "unknown tool".to_string(),
                    reason: "Tool not found in registry".to_string(),
                }),
                Some(tool) if tool.deployment_status == DeploymentStatus::Banned => {
                    violations.push(ToolViolation {
                        tool_id: tool.id,
                        tool_name: tool.name.clone(),
                        reason: "Tool is banned for use in this tenant".to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        let aggregated_risk = tools
            .iter()
            .map(|t| t.risk_tier)
            .max()
            .unwrap_or(RiskTier::Low);

        Ok(ToolValidationOutcome {
            approved: violations.is_empty(),
            violations,
            aggregated_risk,
        })
    }

    /// Seal an asset/tool-usage declaration into a version "2.0" bundle.
    ///
    /// The file hash takes the request slot and the validation outcome
    /// takes the policy slot; the MAC binds the file hash, the
    /// tool-declaration hash, and the validation hash.
    pub fn seal_asset_declaration(
        &self,
        file_hash: &str,
        tools_used: &[ToolUsageDeclaration],
        validation: &ToolValidationOutcome,
        declaration_id: Uuid,
    ) -> Result<ProofBundle> {
        let start = Instant::now();

        let declared: Vec<serde_json::Value> = tools_used
            .iter()
            .map(|t| {
                serde_json::json!({
                    "tool_id": t.tool_id,
                    "how_used": t.how_used,
                })
            })
            .collect();
        let tool_declaration_hash = Self::sha256_hex(&serde_json::to_vec(&declared)?);

        let validation_characteristics = serde_json::to_vec(&serde_json::json!({
            "approved": validation.approved,
            "violations": validation.violations,
            "aggregated_risk": validation.aggregated_risk,
        }))?;
        let validation_hash = Self::sha256_hex(&validation_characteristics);

        let mac_signature = self
            .hmac_hex(format!("{file_hash}|{tool_declaration_hash}|{validation_hash}").as_bytes());

        Ok(ProofBundle {
            bundle_id: Uuid::new_v4(),
            request_hash: file_hash.to_string(),
            response_hash: ASSET_DECLARATION_SENTINEL.to_string(),
            policy_evaluation_hash: validation_hash,
            mac_signature,
            timestamp: chrono::Utc::now(),
            metadata: ProofMetadata {
                algorithm: MAC_ALGORITHM.to_string(),
                version: "2.0".to_string(),
                generation_time_ms: start.elapsed().as_millis() as u64,
                tool_declaration_hash: Some(tool_declaration_hash),
                tools_declared: Some(tools_used.iter().map(|t| t.tool_id).collect()),
                asset_file_hash: Some(file_hash.to_string()),
                declaration_id: Some(declaration_id),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use toolgov_core::{
        Decision, PrincipalId, RegisteredTool, TenantId,
    };

    fn sealer() -> ProofSealer {
        ProofSealer::new("test-secret-key-0123456789".as_bytes().to_vec()).unwrap()
    }

    fn sample_request() -> AgentActionRequest {
        AgentActionRequest::new(PrincipalId::new(), TenantId::new(), "sess", "partner-a")
            .with_model("gpt-4o")
            .with_prompt("draft the launch email")
    }

    fn allow_result() -> PolicyEvaluationResult {
        PolicyEvaluationResult {
            allowed: true,
            decision: Decision::Allow,
            reasons: Vec::new(),
            violated_rules: Vec::new(),
            policy_ids: Vec::new(),
            confidence: 1.0,
            evaluation_time_ms: 2,
        }
    }

    // -- Construction ---------------------------------------------------------

    #[test]
    fn test_empty_secret_rejected() {
        assert!(ProofSealer::new(Vec::new()).is_err());
        assert!(ProofSealer::from_config(&ProofConfig::default()).is_err());
    }

    #[test]
    fn test_generated_secret_is_usable() {
        let secret = ProofSealer::generate_secret();
        assert_eq!(secret.len(), 48);
        assert!(ProofSealer::new(secret.into_bytes()).is_ok());
    }

    // -- Seal + verify --------------------------------------------------------

    #[test]
    fn test_sealed_bundle_verifies() {
        let sealer = sealer();
        let bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        assert!(sealer.verify(&bundle));
        assert_eq!(bundle.metadata.version, "1.0");
        assert_eq!(bundle.metadata.algorithm, "HMAC-SHA256");
        assert_eq!(bundle.response_hash, "no-response");
    }

    #[test]
    fn test_sealed_bundle_with_response_verifies() {
        let sealer = sealer();
        let response = ResponseRecord {
            content: "Here is the draft.".to_string(),
            tokens: 12,
        };
        let bundle = sealer
            .seal(&sample_request(), &allow_result(), Some(&response))
            .unwrap();
        assert!(sealer.verify(&bundle));
        assert_ne!(bundle.response_hash, "no-response");
    }

    #[test]
    fn test_tampered_request_hash_fails_verification() {
        let sealer = sealer();
        let mut bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        bundle.request_hash = ProofSealer::sha256_hex(b"forged");
        assert!(!sealer.verify(&bundle));
    }

    #[test]
    fn test_tampered_response_hash_fails_verification() {
        let sealer = sealer();
        let mut bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        bundle.response_hash = ProofSealer::sha256_hex(b"forged");
        assert!(!sealer.verify(&bundle));
    }

    #[test]
    fn test_tampered_policy_hash_fails_verification() {
        let sealer = sealer();
        let mut bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        bundle.policy_evaluation_hash = ProofSealer::sha256_hex(b"forged");
        assert!(!sealer.verify(&bundle));
    }

    #[test]
    fn test_garbage_signature_fails_verification() {
        let sealer = sealer();
        let mut bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        bundle.mac_signature = "not-hex".to_string();
        assert!(!sealer.verify(&bundle));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let bundle = sealer()
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        let other = ProofSealer::new("a-different-secret".as_bytes().to_vec()).unwrap();
        assert!(!other.verify(&bundle));
    }

    #[test]
    fn test_distinct_requests_produce_distinct_hashes() {
        let sealer = sealer();
        let a = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        let b = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        // Different request ids / timestamps / tenants.
        assert_ne!(a.request_hash, b.request_hash);
        assert_ne!(a.bundle_id, b.bundle_id);
    }

    // -- Asset declaration variant ---------------------------------------------

    fn clean_validation() -> ToolValidationOutcome {
        ToolValidationOutcome {
            approved: true,
            violations: Vec::new(),
            aggregated_risk: RiskTier::Low,
        }
    }

    #[test]
    fn test_asset_bundle_seals_and_verifies() {
        let sealer = sealer();
        let tools = vec![ToolUsageDeclaration {
            tool_id: Uuid::new_v4(),
            tool_name: "image-gen".to_string(),
            how_used: "generated hero image".to_string(),
        }];
        let bundle = sealer
            .seal_asset_declaration("abc123filehash", &tools, &clean_validation(), Uuid::new_v4())
            .unwrap();

        assert_eq!(bundle.metadata.version, "2.0");
        assert_eq!(bundle.request_hash, "abc123filehash");
        assert_eq!(bundle.response_hash, "asset-declaration");
        assert_eq!(
            bundle.metadata.tools_declared.as_ref().unwrap(),
            &vec![tools[0].tool_id]
        );
        assert!(sealer.verify(&bundle));
    }

    #[test]
    fn test_asset_bundle_tamper_detected() {
        let sealer = sealer();
        let mut bundle = sealer
            .seal_asset_declaration("abc123filehash", &[], &clean_validation(), Uuid::new_v4())
            .unwrap();
        bundle.metadata.tool_declaration_hash = Some(ProofSealer::sha256_hex(b"forged"));
        assert!(!sealer.verify(&bundle));
    }

    #[test]
    fn test_bundle_shapes_are_distinguishable() {
        let sealer = sealer();
        let request_bundle = sealer
            .seal(&sample_request(), &allow_result(), None)
            .unwrap();
        let asset_bundle = sealer
            .seal_asset_declaration("hash", &[], &clean_validation(), Uuid::new_v4())
            .unwrap();
        assert_ne!(
            request_bundle.metadata.version,
            asset_bundle.metadata.version
        );
        assert!(request_bundle.metadata.asset_file_hash.is_none());
        assert!(asset_bundle.metadata.asset_file_hash.is_some());
    }

    // -- Tool declaration validation ---------------------------------------------

    #[tokio::test]
    async fn test_validate_empty_declaration_approved() {
        use toolgov_storage::InMemoryToolInventory;
        let sealer = sealer();
        let inventory = InMemoryToolInventory::new();
        let outcome = sealer
            .validate_tool_declaration(&[], &inventory)
            .await
            .unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.aggregated_risk, RiskTier::Low);
    }

    #[tokio::test]
    async fn test_validate_unknown_tool_rejected() {
        use toolgov_storage::InMemoryToolInventory;
        let sealer = sealer();
        let inventory = InMemoryToolInventory::new();
        let outcome = sealer
            .validate_tool_declaration(&[Uuid::new_v4()], &inventory)
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert_eq!(outcome.violations.len(), 1);
        assert!(outcome.violations[0].reason.contains("not found"));
    }

    #[tokio::test]
    async fn test_validate_banned_tool_rejected() {
        use toolgov_storage::InMemoryToolInventory;
        let sealer = sealer();
        let inventory = InMemoryToolInventory::new();
        let banned = Uuid::new_v4();
        inventory
            .insert(RegisteredTool {
                id: banned,
                name: "shadow-scraper".to_string(),
                deployment_status: DeploymentStatus::Banned,
                risk_tier: RiskTier::High,
            })
            .await;

        let outcome = sealer
            .validate_tool_declaration(&[banned], &inventory)
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert!(outcome.violations[0].reason.contains("banned"));
        assert_eq!(outcome.aggregated_risk, RiskTier::High);
    }

    #[tokio::test]
    async fn test_aggregated_risk_is_highest_tier() {
        use toolgov_storage::InMemoryToolInventory;
        let sealer = sealer();
        let inventory = InMemoryToolInventory::new();
        let low = Uuid::new_v4();
        let critical = Uuid::new_v4();
        inventory
            .insert(RegisteredTool {
                id: low,
                name: "spellcheck".to_string(),
                deployment_status: DeploymentStatus::Approved,
                risk_tier: RiskTier::Low,
            })
            .await;
        inventory
            .insert(RegisteredTool {
                id: critical,
                name: "db-admin".to_string(),
                deployment_status: DeploymentStatus::Approved,
                risk_tier: RiskTier::Critical,
            })
            .await;

        let outcome = sealer
            .validate_tool_declaration(&[low, critical], &inventory)
            .await
            .unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.aggregated_risk, RiskTier::Critical);
    }
}
