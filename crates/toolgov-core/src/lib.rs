//! Core types, traits, and errors for toolgov
//!
//! This crate contains the foundational types shared across all toolgov
//! components: identity newtypes, the role and severity total orders,
//! verdict and violation types produced by the detection stages, boundary
//! policy types, proof-bundle types, and the collaborator traits the
//! pipeline consumes (identity directory, policy store, request history,
//! audit sink, tool inventory, cache layer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Unique identifier for a tenant (enterprise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TenantId {
    /// Create a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a workspace within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub Uuid);

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WorkspaceId {
    /// Create a new random workspace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a principal (a user or an agent acting for one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub Uuid);

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PrincipalId {
    /// Create a new random principal ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Principal role within a tenant, ordered by privilege.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    /// Read-only access.
    Viewer,
    /// Standard access: may submit requests for evaluation.
    User,
    /// May create and update governance policies.
    Manager,
    /// Full access, including destructive policy operations.
    Admin,
}

impl PrincipalRole {
    /// Check whether this role is at least as privileged as `required`.
    #[must_use]
    pub fn has_permission(self, required: PrincipalRole) -> bool {
        self.privilege_level() >= required.privilege_level()
    }

    /// Numeric privilege level (higher = more privileged).
    #[must_use]
    pub fn privilege_level(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::User => 2,
            Self::Manager => 3,
            Self::Admin => 4,
        }
    }
}

impl std::fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::User => write!(f, "user"),
            Self::Manager => write!(f, "manager"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for PrincipalRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "user" => Ok(Self::User),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity orders
// ---------------------------------------------------------------------------

/// Risk level attached to detections, ordered low to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Final governance decision, ordered so that the aggregate of several
/// verdicts is simply the maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Recommended handling for a misuse verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Allow,
    Warn,
    Block,
    /// End the session entirely. Reserved for cross-tenant enumeration.
    Terminate,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Injection detection types
// ---------------------------------------------------------------------------

/// Category of a detected prompt-injection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    InstructionOverride,
    RoleManipulation,
    SystemPromptLeak,
    JailbreakAttempt,
    DelimiterInjection,
    EncodingAttack,
    ContextManipulation,
    ToolAbuse,
    DataExfiltration,
}

impl std::fmt::Display for InjectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleManipulation => "role_manipulation",
            Self::SystemPromptLeak => "system_prompt_leak",
            Self::JailbreakAttempt => "jailbreak_attempt",
            Self::DelimiterInjection => "delimiter_injection",
            Self::EncodingAttack => "encoding_attack",
            Self::ContextManipulation => "context_manipulation",
            Self::ToolAbuse => "tool_abuse",
            Self::DataExfiltration => "data_exfiltration",
        };
        write!(f, "{s}")
    }
}

/// Verdict for a single piece of text screened for prompt injection.
///
/// Ephemeral — produced per request and never persisted beyond the audit
/// record that references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionVerdict {
    /// Whether an injection attempt was detected.
    pub detected: bool,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f64,
    /// Name of the matching rule or heuristic (empty when clean).
    pub pattern: String,
    /// Category of the detected attempt.
    pub category: InjectionCategory,
    /// Risk level of the detected attempt.
    pub risk_level: RiskLevel,
    /// The substring that triggered the detection, if any.
    pub matched_text: Option<String>,
}

impl InjectionVerdict {
    /// Verdict for input with no detections.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            pattern: String::new(),
            category: InjectionCategory::InstructionOverride,
            risk_level: RiskLevel::Low,
            matched_text: None,
        }
    }
}

/// Aggregated result of screening a multi-message conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    /// Highest risk across all messages.
    pub overall_risk: RiskLevel,
    /// Per-message verdicts, in input order.
    pub detections: Vec<InjectionVerdict>,
    /// Human-readable summary of what was found.
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Authority types
// ---------------------------------------------------------------------------

/// Membership and role information resolved from the identity directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalRecord {
    /// Tenant the principal belongs to.
    pub tenant_id: TenantId,
    /// Workspaces the principal is a member of.
    pub workspace_ids: HashSet<WorkspaceId>,
    /// Role granted within the tenant.
    pub role: PrincipalRole,
}

/// The resolved scope a principal is allowed to act within.
///
/// Owned exclusively by the authority validator; rebuilt on cache expiry,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityContext {
    /// Principal this context was built for.
    pub principal_id: PrincipalId,
    /// Tenant the principal is authenticated against.
    pub tenant_id: TenantId,
    /// Workspaces the principal may act in.
    pub workspace_ids: HashSet<WorkspaceId>,
    /// Role within the tenant.
    pub role: PrincipalRole,
    /// Session the context belongs to, if any.
    pub session_id: Option<String>,
}

/// Type of an authority violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    CrossTenantAccess,
    UnauthorizedWorkspace,
    PrivilegeEscalation,
    UnauthorizedTool,
    RateLimitExceeded,
    PrincipalNotFound,
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CrossTenantAccess => "cross_tenant_access",
            Self::UnauthorizedWorkspace => "unauthorized_workspace",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::UnauthorizedTool => "unauthorized_tool",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PrincipalNotFound => "principal_not_found",
        };
        write!(f, "{s}")
    }
}

/// Severity of an authority violation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Warning,
    Critical,
}

/// A typed authority violation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityViolation {
    /// What kind of boundary was crossed.
    pub violation_type: ViolationType,
    /// The resource the caller asked for (e.g. `tenant:<id>`, `tool:<name>`).
    pub requested_resource: String,
    /// The scope the caller was actually authorized for.
    pub authorized_scope: String,
    /// Severity of the violation.
    pub severity: ViolationSeverity,
    /// When the violation was detected.
    pub timestamp: DateTime<Utc>,
}

impl AuthorityViolation {
    /// Create a violation stamped with the current time.
    pub fn new(
        violation_type: ViolationType,
        requested_resource: String,
        authorized_scope: String,
        severity: ViolationSeverity,
    ) -> Self {
        Self {
            violation_type,
            requested_resource,
            authorized_scope,
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// Result of validating a single action against an authority context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the action is within the caller's authority.
    pub authorized: bool,
    /// Human-readable reason.
    pub reason: String,
    /// The violation, when not authorized.
    pub violation: Option<AuthorityViolation>,
}

impl ValidationOutcome {
    /// An authorized outcome with the given reason.
    #[must_use]
    pub fn authorized(reason: impl Into<String>) -> Self {
        Self {
            authorized: true,
            reason: reason.into(),
            violation: None,
        }
    }

    /// A denied outcome carrying its violation.
    #[must_use]
    pub fn denied(reason: impl Into<String>, violation: AuthorityViolation) -> Self {
        Self {
            authorized: false,
            reason: reason.into(),
            violation: Some(violation),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool registry types
// ---------------------------------------------------------------------------

/// Scope a tool may be invoked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolScope {
    Enterprise,
    Workspace,
    User,
}

impl std::fmt::Display for ToolScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enterprise => write!(f, "enterprise"),
            Self::Workspace => write!(f, "workspace"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Fixed-window rate limit attached to a tool definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRateLimit {
    /// Maximum calls permitted within one window.
    pub max_calls: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// Static definition of a governed tool. Read-only at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within the catalog.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Minimum role required to invoke the tool.
    pub required_role: PrincipalRole,
    /// Scopes the tool may be invoked in.
    pub allowed_scopes: HashSet<ToolScope>,
    /// Optional per-principal rate limit.
    pub rate_limit: Option<ToolRateLimit>,
}

/// Immutable tool catalog, loaded at startup and injected into the
/// authority validator. Not a module-level singleton so tests can run
/// against custom catalogs.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool definition, replacing any previous entry with that name.
    pub fn insert(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The built-in governance tool set.
    #[must_use]
    pub fn builtin() -> Self {
        fn def(
            name: &str,
            description: &str,
            required_role: PrincipalRole,
            scopes: &[ToolScope],
            rate_limit: Option<ToolRateLimit>,
        ) -> ToolDefinition {
            ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                required_role,
                allowed_scopes: scopes.iter().copied().collect(),
                rate_limit,
            }
        }

        let minute = |max_calls: u32| {
            Some(ToolRateLimit {
                max_calls,
                window_ms: 60_000,
            })
        };

        let mut catalog = Self::new();
        catalog.insert(def(
            "query_policies",
            "Query boundary policies for the tenant",
            PrincipalRole::Viewer,
            &[ToolScope::Enterprise, ToolScope::Workspace],
            None,
        ));
        catalog.insert(def(
            "create_policy",
            "Create a new boundary policy",
            PrincipalRole::Manager,
            &[ToolScope::Enterprise],
            minute(10),
        ));
        catalog.insert(def(
            "update_policy",
            "Update an existing boundary policy",
            PrincipalRole::Manager,
            &[ToolScope::Enterprise],
            minute(20),
        ));
        catalog.insert(def(
            "delete_policy",
            "Delete a boundary policy",
            PrincipalRole::Admin,
            &[ToolScope::Enterprise],
            minute(5),
        ));
        catalog.insert(def(
            "query_audit_logs",
            "Query audit logs for compliance review",
            PrincipalRole::Manager,
            &[ToolScope::Enterprise, ToolScope::Workspace],
            None,
        ));
        catalog.insert(def(
            "evaluate_request",
            "Evaluate an AI request against active policies",
            PrincipalRole::User,
            &[ToolScope::Enterprise, ToolScope::Workspace, ToolScope::User],
            None,
        ));
        catalog.insert(def(
            "query_enterprise_data",
            "Query tenant configuration data",
            PrincipalRole::Viewer,
            &[ToolScope::Enterprise],
            None,
        ));
        catalog.insert(def(
            "modify_enterprise_settings",
            "Modify tenant-level settings",
            PrincipalRole::Admin,
            &[ToolScope::Enterprise],
            minute(5),
        ));
        catalog
    }
}

// ---------------------------------------------------------------------------
// Misuse detection types
// ---------------------------------------------------------------------------

/// A single tool invocation recorded for behavioral analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Call arguments as structured JSON.
    pub args: serde_json::Value,
    /// When the call occurred.
    pub timestamp: DateTime<Utc>,
    /// Whether the call succeeded.
    pub success: bool,
    /// Tenant the call targeted.
    pub tenant_id: TenantId,
    /// Workspace the call targeted, if any.
    pub workspace_id: Option<WorkspaceId>,
}

impl ToolCallRecord {
    /// Create a successful call record stamped with the current time.
    pub fn new(tool_name: impl Into<String>, args: serde_json::Value, tenant_id: TenantId) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            timestamp: Utc::now(),
            success: true,
            tenant_id,
            workspace_id: None,
        }
    }

    /// Mark the call as failed.
    #[must_use]
    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }

    /// Set the workspace the call targeted.
    #[must_use]
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Override the record timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Category of detected tool misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisuseType {
    EnumerationAttack,
    ExcessiveQueries,
    ParameterManipulation,
    ToolSequenceAnomaly,
    DataExfiltrationPattern,
    PrivilegeProbe,
    TimingAnomaly,
    ResourceExhaustion,
}

impl std::fmt::Display for MisuseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EnumerationAttack => "enumeration_attack",
            Self::ExcessiveQueries => "excessive_queries",
            Self::ParameterManipulation => "parameter_manipulation",
            Self::ToolSequenceAnomaly => "tool_sequence_anomaly",
            Self::DataExfiltrationPattern => "data_exfiltration_pattern",
            Self::PrivilegeProbe => "privilege_probe",
            Self::TimingAnomaly => "timing_anomaly",
            Self::ResourceExhaustion => "resource_exhaustion",
        };
        write!(f, "{s}")
    }
}

/// Result of behavioral misuse analysis for one pending call.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisuseVerdict {
    /// Whether a misuse pattern was detected.
    pub detected: bool,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f64,
    /// Category of the detected pattern.
    pub misuse_type: MisuseType,
    /// Severity of the detection.
    pub severity: RiskLevel,
    /// Human-readable detail.
    pub details: String,
    /// Recommended handling.
    pub recommendation: Recommendation,
}

impl MisuseVerdict {
    /// Verdict for a session with no detected misuse.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            misuse_type: MisuseType::ToolSequenceAnomaly,
            severity: RiskLevel::Low,
            details: "No misuse patterns detected".to_string(),
            recommendation: Recommendation::Allow,
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary policy types
// ---------------------------------------------------------------------------

/// Type of a boundary rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRuleType {
    ModelRestriction,
    ContentFilter,
    RateLimit,
    CostControl,
}

impl std::fmt::Display for BoundaryRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelRestriction => "model_restriction",
            Self::ContentFilter => "content_filter",
            Self::RateLimit => "rate_limit",
            Self::CostControl => "cost_control",
        };
        write!(f, "{s}")
    }
}

/// What a matching boundary rule does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    /// Deny the request.
    Block,
    /// Let the request through with a warning.
    Warn,
    /// Record only; never changes the decision.
    Monitor,
}

/// A single tenant-scoped governance rule. Read-only snapshot per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryRule {
    /// Which rule family this belongs to.
    pub rule_type: BoundaryRuleType,
    /// Free-form rule configuration (shape depends on `rule_type`).
    pub config: serde_json::Value,
    /// What a match does.
    pub severity: RuleSeverity,
}

/// A tenant policy holding boundary rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier.
    pub id: Uuid,
    /// Tenant the policy belongs to.
    pub tenant_id: TenantId,
    /// Human-readable policy name.
    pub name: String,
    /// Whether the policy is currently enforced.
    pub active: bool,
    /// The policy's boundary rules.
    pub rules: Vec<BoundaryRule>,
}

/// Aggregated outcome of evaluating a request against all active
/// boundary policies. Built once per request, immutable after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Aggregated decision (max severity over all rule families).
    pub decision: Decision,
    /// Deduplicated reasons, first-seen order preserved.
    pub reasons: Vec<String>,
    /// Violated rules as `"{rule_type}:{policy_id}"`.
    pub violated_rules: Vec<String>,
    /// Ids of all policies that were evaluated.
    pub policy_ids: Vec<Uuid>,
    /// 1.0 when all rule families agree on the decision, else lower.
    pub confidence: f64,
    /// Wall-clock evaluation time in milliseconds.
    pub evaluation_time_ms: u64,
}

impl PolicyEvaluationResult {
    /// The fail-open result: evaluation errored, so the request is allowed
    /// with an explicit low-confidence reason that operators can alert on.
    #[must_use]
    pub fn fail_open(reason: impl Into<String>, evaluation_time_ms: u64) -> Self {
        Self {
            allowed: true,
            decision: Decision::Allow,
            reasons: vec![reason.into()],
            violated_rules: Vec::new(),
            policy_ids: Vec::new(),
            confidence: 0.3,
            evaluation_time_ms,
        }
    }

    /// A synthesized blocked result for decisions reached before policy
    /// evaluation ran (injection, authority, or misuse short-circuits).
    #[must_use]
    pub fn short_circuit_block(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            allowed: false,
            decision: Decision::Block,
            reasons: vec![reason.into()],
            violated_rules: Vec::new(),
            policy_ids: Vec::new(),
            confidence,
            evaluation_time_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Proof bundle types
// ---------------------------------------------------------------------------

/// Metadata attached to a proof bundle.
///
/// The optional fields carry the asset-declaration variant (version "2.0");
/// request bundles (version "1.0") leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofMetadata {
    /// MAC algorithm identifier.
    pub algorithm: String,
    /// Bundle shape version: "1.0" for requests, "2.0" for declarations.
    pub version: String,
    /// Time spent generating the bundle, in milliseconds.
    pub generation_time_ms: u64,
    /// Hash over the declared tool usages (asset variant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_declaration_hash: Option<String>,
    /// Ids of the declared tools (asset variant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_declared: Option<Vec<Uuid>>,
    /// Hash of the declared asset file (asset variant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_file_hash: Option<String>,
    /// Declaration the bundle seals (asset variant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration_id: Option<Uuid>,
}

/// A sealed, MAC-signed audit record binding a request, its policy
/// decision, and (optionally) the response.
///
/// Write-once: the signature binds the three hashes, so any post-hoc edit
/// invalidates verification. Owned by the audit sink once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofBundle {
    /// Unique bundle identifier.
    pub bundle_id: Uuid,
    /// SHA-256 over the request characteristics.
    pub request_hash: String,
    /// SHA-256 over the response characteristics, or a sentinel when absent.
    pub response_hash: String,
    /// SHA-256 over the policy verdict characteristics.
    pub policy_evaluation_hash: String,
    /// Hex-encoded keyed MAC binding the three hashes.
    pub mac_signature: String,
    /// When the bundle was sealed.
    pub timestamp: DateTime<Utc>,
    /// Bundle metadata.
    pub metadata: ProofMetadata,
}

/// Deployment status of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Approved,
    Pilot,
    Banned,
}

/// Risk tier assigned to a registered tool, ordered low to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

/// A tool as known to the external tool inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredTool {
    /// Inventory identifier.
    pub id: Uuid,
    /// Tool name.
    pub name: String,
    /// Current deployment status.
    pub deployment_status: DeploymentStatus,
    /// Assigned risk tier.
    pub risk_tier: RiskTier,
}

/// A declared tool usage attached to an asset declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageDeclaration {
    /// Inventory id of the tool.
    pub tool_id: Uuid,
    /// Tool name as declared.
    pub tool_name: String,
    /// How the tool was used on the asset.
    pub how_used: String,
}

/// One violation found while validating a tool declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolViolation {
    /// Id of the offending tool.
    pub tool_id: Uuid,
    /// Name of the offending tool (or "unknown tool").
    pub tool_name: String,
    /// Why the declaration is invalid.
    pub reason: String,
}

/// Outcome of validating a set of declared tools against the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolValidationOutcome {
    /// Whether the declaration passed.
    pub approved: bool,
    /// All violations found.
    pub violations: Vec<ToolViolation>,
    /// Highest risk tier among the declared tools.
    pub aggregated_risk: RiskTier,
}

// ---------------------------------------------------------------------------
// Pipeline request / outcome types
// ---------------------------------------------------------------------------

/// An inbound agent action to be governed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActionRequest {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Principal submitting the action.
    pub principal_id: PrincipalId,
    /// Session the action belongs to.
    pub session_id: String,
    /// Tenant the caller operates in.
    pub tenant_id: TenantId,
    /// Integration partner submitting on the caller's behalf.
    pub partner_id: String,
    /// Tenant the action targets, when different from the ambient tenant.
    pub target_tenant_id: Option<TenantId>,
    /// Workspace the action targets, if any.
    pub target_workspace_id: Option<WorkspaceId>,
    /// Scope the action is invoked in.
    pub scope: Option<ToolScope>,
    /// Tool being invoked, if the action is a tool call.
    pub tool_name: Option<String>,
    /// Tool call arguments.
    pub tool_args: serde_json::Value,
    /// Model the action will run against.
    pub model: String,
    /// The natural-language payload to screen.
    pub prompt: String,
    /// Estimated prompt tokens, for cost estimation.
    pub estimated_input_tokens: u32,
    /// Estimated completion tokens, for cost estimation.
    pub estimated_output_tokens: u32,
    /// When the request was received.
    pub timestamp: DateTime<Utc>,
}

impl AgentActionRequest {
    /// Create a request with the required identity fields.
    pub fn new(
        principal_id: PrincipalId,
        tenant_id: TenantId,
        session_id: impl Into<String>,
        partner_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal_id,
            session_id: session_id.into(),
            tenant_id,
            partner_id: partner_id.into(),
            target_tenant_id: None,
            target_workspace_id: None,
            scope: None,
            tool_name: None,
            tool_args: serde_json::Value::Null,
            model: String::new(),
            prompt: String::new(),
            estimated_input_tokens: 0,
            estimated_output_tokens: 0,
            timestamp: Utc::now(),
        }
    }

    /// Set the tool invocation.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, args: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_args = args;
        self
    }

    /// Set the target tenant.
    #[must_use]
    pub fn with_target_tenant(mut self, tenant_id: TenantId) -> Self {
        self.target_tenant_id = Some(tenant_id);
        self
    }

    /// Set the target workspace.
    #[must_use]
    pub fn with_target_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.target_workspace_id = Some(workspace_id);
        self
    }

    /// Set the invocation scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ToolScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the prompt payload.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the token estimates used for cost estimation.
    #[must_use]
    pub fn with_estimated_tokens(mut self, input: u32, output: u32) -> Self {
        self.estimated_input_tokens = input;
        self.estimated_output_tokens = output;
        self
    }
}

/// Characteristics of a completed response, for sealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Response content.
    pub content: String,
    /// Completion token count.
    pub tokens: u32,
}

/// Audit event classification for sealed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AccessGranted,
    AccessDenied,
}

/// Request metadata handed to the audit sink next to the sealed bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Request the bundle seals.
    pub request_id: Uuid,
    /// Principal that submitted the request.
    pub principal_id: PrincipalId,
    /// Tenant the request was governed under.
    pub tenant_id: TenantId,
    /// Submitting partner.
    pub partner_id: String,
    /// Whether access was granted or denied.
    pub event_type: AuditEventType,
}

/// The pipeline's externally observable result for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceOutcome {
    /// Final decision.
    pub decision: Decision,
    /// Machine-and-human-readable reasons, in stage order.
    pub reasons: Vec<String>,
    /// The sealed audit record for this request.
    pub proof_bundle: ProofBundle,
    /// Authority violation, when the request was denied for one.
    pub violation: Option<AuthorityViolation>,
    /// Injection verdict, when a detection occurred.
    pub injection: Option<InjectionVerdict>,
    /// Misuse verdict, when a detection occurred.
    pub misuse: Option<MisuseVerdict>,
    /// Policy evaluation result, when evaluation ran.
    pub policy: Option<PolicyEvaluationResult>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Authority validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// TTL for cached authority contexts, in seconds.
    pub context_ttl_secs: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: 300,
        }
    }
}

/// Misuse detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisuseConfig {
    /// Sliding-window length in seconds.
    pub window_secs: u64,
    /// Maximum history entries per session.
    pub max_history: usize,
    /// Calls per minute above which the session is resource exhaustion.
    pub max_calls_per_minute: f64,
    /// Failure ratio above which the session looks like enumeration.
    pub max_failed_ratio: f64,
    /// Distinct tenants above which the session is cross-tenant enumeration.
    pub max_distinct_tenants: usize,
    /// Consecutive identical-tool calls above which queries are excessive.
    pub max_sequential_same_tool: usize,
    /// Gap below which two consecutive calls count as rapid-fire, in ms.
    pub min_call_interval_ms: i64,
}

impl Default for MisuseConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            max_history: 100,
            max_calls_per_minute: 30.0,
            max_failed_ratio: 0.5,
            max_distinct_tenants: 3,
            max_sequential_same_tool: 5,
            min_call_interval_ms: 100,
        }
    }
}

/// Policy engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Timeout for loading active policies, in milliseconds.
    pub load_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 5000,
        }
    }
}

/// Proof sealing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProofConfig {
    /// Secret for the keyed MAC. Must be non-empty; there is no fallback.
    pub secret_key: String,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Authority validator section.
    #[serde(default)]
    pub authority: AuthorityConfig,
    /// Misuse detector section.
    #[serde(default)]
    pub misuse: MisuseConfig,
    /// Policy engine section.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Proof sealing section.
    #[serde(default)]
    pub proof: ProofConfig,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum GovernError {
    /// Identity directory error.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Policy store error.
    #[error("Policy error: {0}")]
    Policy(String),

    /// Request history store error.
    #[error("History error: {0}")]
    History(String),

    /// Audit sink error. Fatal to the request being governed.
    #[error("Audit error: {0}")]
    Audit(String),

    /// Proof sealing error. Fatal to the request being governed.
    #[error("Sealing error: {0}")]
    Sealing(String),

    /// Cache layer error.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, GovernError>`.
pub type Result<T> = std::result::Result<T, GovernError>;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Read-only directory resolving principals to tenant/workspace/role.
#[async_trait::async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Look up membership and role for a principal.
    ///
    /// Returns `Ok(None)` when the principal is unknown; errors are
    /// reserved for directory failures.
    async fn lookup_principal(&self, principal_id: PrincipalId)
        -> Result<Option<PrincipalRecord>>;
}

/// Store of tenant boundary policies.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load all active policies for a tenant.
    async fn load_active_policies(&self, tenant_id: TenantId) -> Result<Vec<Policy>>;
}

/// Cross-session request history, for checks that outlive the in-memory
/// sliding window.
#[async_trait::async_trait]
pub trait RequestHistoryStore: Send + Sync {
    /// Count requests by a tenant + partner pair since `since`.
    async fn count_requests(
        &self,
        tenant_id: TenantId,
        partner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Write-once, append-only audit sink for sealed bundles.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a sealed bundle with its request metadata.
    async fn append(&self, bundle: ProofBundle, metadata: RequestMetadata) -> Result<()>;
}

/// External inventory of registered tools, for declaration validation.
#[async_trait::async_trait]
pub trait ToolInventory: Send + Sync {
    /// Look up tools by inventory id. Unknown ids are simply absent from
    /// the result.
    async fn lookup_tools(&self, tool_ids: &[Uuid]) -> Result<Vec<RegisteredTool>>;
}

/// Cache layer for short-lived derived state (authority contexts).
///
/// TTL expiry is part of the contract: a value set with TTL `t` must not
/// be returned by `get` after `t` has elapsed. Entries are otherwise only
/// removed via `invalidate`.
#[async_trait::async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a cached value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a cached value with a TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Invalidate (remove) a cached entry.
    async fn invalidate(&self, key: &str) -> Result<()>;

    /// Health check for the cache layer.
    async fn health_check(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
