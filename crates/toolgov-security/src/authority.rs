//! Agent authority validation.
//!
//! [`AuthorityValidator`] enforces tenant, workspace, role, and per-tool
//! rate boundaries for agent actions. Authority contexts are resolved
//! through the identity directory and cached in the injected [`CacheLayer`]
//! with a TTL; duplicate rebuilds are allowed to race (last write wins).
//! Rate-limit state is a process-local per-(principal, tool) fixed window —
//! it bounds short-lived abuse and is deliberately lost on restart.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolgov_core::{
    AgentActionRequest, AuthorityConfig, AuthorityContext, AuthorityViolation, CacheLayer,
    IdentityDirectory, PrincipalId, Result, TenantId, ToolCatalog, ToolRateLimit, ToolScope,
    ValidationOutcome, ViolationSeverity, ViolationType, WorkspaceId,
};
use tracing::{debug, warn};

/// One fixed rate window for a (principal, tool) key.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// The slice of an action that authority validation looks at.
#[derive(Debug, Clone, Default)]
pub struct ActionSpec {
    /// Tool being invoked, if any.
    pub tool_name: Option<String>,
    /// Tenant the action targets, if specified.
    pub target_tenant_id: Option<TenantId>,
    /// Workspace the action targets, if specified.
    pub target_workspace_id: Option<WorkspaceId>,
    /// Scope the action is invoked in. Defaults to enterprise.
    pub scope: Option<ToolScope>,
}

impl From<&AgentActionRequest> for ActionSpec {
    fn from(request: &AgentActionRequest) -> Self {
        Self {
            tool_name: request.tool_name.clone(),
            target_tenant_id: request.target_tenant_id,
            target_workspace_id: request.target_workspace_id,
            scope: request.scope,
        }
    }
}

/// Validates that agent actions stay within the caller's authorized scope.
pub struct AuthorityValidator {
    directory: Arc<dyn IdentityDirectory>,
    cache: Arc<dyn CacheLayer>,
    catalog: ToolCatalog,
    config: AuthorityConfig,
    rate_tracker: DashMap<String, RateWindow>,
    /// Keys written to the authority cache, so `clear_cache` can drop them.
    cached_keys: DashMap<String, ()>,
}

impl AuthorityValidator {
    /// Create a validator over the given directory, cache, and tool catalog.
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        cache: Arc<dyn CacheLayer>,
        catalog: ToolCatalog,
        config: AuthorityConfig,
    ) -> Self {
        Self {
            directory,
            cache,
            catalog,
            config,
            rate_tracker: DashMap::new(),
            cached_keys: DashMap::new(),
        }
    }

    fn cache_key(principal_id: PrincipalId, session_id: Option<&str>) -> String {
        format!(
            "authority:{}:{}",
            principal_id,
            session_id.unwrap_or("default")
        )
    }

    /// Resolve the authority context for a principal.
    ///
    /// Returns `Ok(None)` when the principal is unknown or the directory
    /// lookup fails — "no context" is the caller's decision to make, not an
    /// authorization result.
    pub async fn build_context(
        &self,
        principal_id: PrincipalId,
        session_id: Option<&str>,
    ) -> Result<Option<AuthorityContext>> {
        let key = Self::cache_key(principal_id, session_id);

        if let Ok(Some(bytes)) = self.cache.get(&key).await {
            match serde_json::from_slice::<AuthorityContext>(&bytes) {
                Ok(context) => {
                    debug!(principal_id = %principal_id, "Authority context cache hit");
                    return Ok(Some(context));
                }
                Err(e) => {
                    warn!(principal_id = %principal_id, error = %e, "Discarding undecodable cached context");
                }
            }
        }

        let record = match self.directory.lookup_principal(principal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(principal_id = %principal_id, "Principal not found in identity directory");
                return Ok(None);
            }
            Err(e) => {
                warn!(principal_id = %principal_id, error = %e, "Identity lookup failed");
                return Ok(None);
            }
        };

        let context = AuthorityContext {
            principal_id,
            tenant_id: record.tenant_id,
            workspace_ids: record.workspace_ids,
            role: record.role,
            session_id: session_id.map(String::from),
        };

        let ttl = Duration::from_secs(self.config.context_ttl_secs);
        if let Ok(bytes) = serde_json::to_vec(&context) {
            let _ = self.cache.set(&key, &bytes, ttl).await;
            self.cached_keys.insert(key, ());
        }

        Ok(Some(context))
    }

    /// Validate tenant access.
    pub fn validate_tenant_access(
        &self,
        context: &AuthorityContext,
        requested: TenantId,
    ) -> ValidationOutcome {
        if context.tenant_id != requested {
            return ValidationOutcome::denied(
                "Cross-tenant access attempt detected",
                AuthorityViolation::new(
                    ViolationType::CrossTenantAccess,
                    format!("tenant:{requested}"),
                    format!("tenant:{}", context.tenant_id),
                    ViolationSeverity::Critical,
                ),
            );
        }
        ValidationOutcome::authorized("Tenant access validated")
    }

    /// Validate workspace access.
    pub fn validate_workspace_access(
        &self,
        context: &AuthorityContext,
        requested: WorkspaceId,
    ) -> ValidationOutcome {
        if !context.workspace_ids.contains(&requested) {
            let mut authorized: Vec<String> =
                context.workspace_ids.iter().map(|w| w.to_string()).collect();
            authorized.sort();
            return ValidationOutcome::denied(
                "Unauthorized workspace access attempt",
                AuthorityViolation::new(
                    ViolationType::UnauthorizedWorkspace,
                    format!("workspace:{requested}"),
                    format!("workspaces:[{}]", authorized.join(",")),
                    ViolationSeverity::Critical,
                ),
            );
        }
        ValidationOutcome::authorized("Workspace access validated")
    }

    /// Validate a tool invocation: registration, role, scope, rate limit.
    pub fn validate_tool_usage(
        &self,
        context: &AuthorityContext,
        tool_name: &str,
        scope: ToolScope,
    ) -> ValidationOutcome {
        let tool = match self.catalog.get(tool_name) {
            Some(tool) => tool,
            None => {
                return ValidationOutcome::denied(
                    format!("Unknown tool: {tool_name}"),
                    AuthorityViolation::new(
                        ViolationType::UnauthorizedTool,
                        format!("tool:{tool_name}"),
                        "registered_tools".to_string(),
                        ViolationSeverity::Critical,
                    ),
                );
            }
        };

        if !context.role.has_permission(tool.required_role) {
            return ValidationOutcome::denied(
                format!("Insufficient privileges for tool: {tool_name}"),
                AuthorityViolation::new(
                    ViolationType::PrivilegeEscalation,
                    format!("tool:{tool_name}"),
                    format!("role:{}", context.role),
                    ViolationSeverity::Critical,
                ),
            );
        }

        if !tool.allowed_scopes.contains(&scope) {
            let mut scopes: Vec<String> =
                tool.allowed_scopes.iter().map(|s| s.to_string()).collect();
            scopes.sort();
            return ValidationOutcome::denied(
                format!("Tool {tool_name} not allowed in scope: {scope}"),
                AuthorityViolation::new(
                    ViolationType::UnauthorizedTool,
                    format!("tool:{tool_name}:scope:{scope}"),
                    format!("scopes:[{}]", scopes.join(",")),
                    ViolationSeverity::Warning,
                ),
            );
        }

        if let Some(limit) = tool.rate_limit {
            let key = format!("{}:{tool_name}", context.principal_id);
            return self.check_rate_limit(&key, limit);
        }

        ValidationOutcome::authorized("Tool usage authorized")
    }

    /// Fixed-window rate limit check for one (principal, tool) key.
    ///
    /// The `DashMap` entry guard is the critical section: the
    /// read-modify-write below cannot race with another request for the
    /// same key, which burst detection depends on.
    fn check_rate_limit(&self, key: &str, limit: ToolRateLimit) -> ValidationOutcome {
        let now = Instant::now();
        let window = Duration::from_millis(limit.window_ms);

        let mut entry = self
            .rate_tracker
            .entry(key.to_string())
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) > window {
            entry.count = 1;
            entry.window_start = now;
            return ValidationOutcome::authorized("Rate limit check passed");
        }

        if entry.count >= limit.max_calls {
            debug!(key = %key, max_calls = limit.max_calls, "Tool rate limit exceeded");
            return ValidationOutcome::denied(
                format!(
                    "Rate limit exceeded: {} calls per {}ms",
                    limit.max_calls, limit.window_ms
                ),
                AuthorityViolation::new(
                    ViolationType::RateLimitExceeded,
                    key.to_string(),
                    format!("limit:{}/{}ms", limit.max_calls, limit.window_ms),
                    ViolationSeverity::Warning,
                ),
            );
        }

        entry.count += 1;
        ValidationOutcome::authorized("Rate limit check passed")
    }

    /// Validate an agent action against the context.
    ///
    /// Checks run fail-fast in a normative order — cross-tenant violations
    /// must be reported even when a later check would also fail:
    /// target tenant, then target workspace, then tool
    /// (registration → role → scope → rate limit).
    pub fn validate_action(
        &self,
        context: &AuthorityContext,
        action: &ActionSpec,
    ) -> ValidationOutcome {
        if let Some(target) = action.target_tenant_id {
            let outcome = self.validate_tenant_access(context, target);
            if !outcome.authorized {
                return outcome;
            }
        }

        if let Some(target) = action.target_workspace_id {
            let outcome = self.validate_workspace_access(context, target);
            if !outcome.authorized {
                return outcome;
            }
        }

        if let Some(ref tool_name) = action.tool_name {
            let scope = action.scope.unwrap_or(ToolScope::Enterprise);
            let outcome = self.validate_tool_usage(context, tool_name, scope);
            if !outcome.authorized {
                return outcome;
            }
        }

        ValidationOutcome::authorized("All agent action validations passed")
    }

    /// Drop all cached authority contexts and rate windows.
    pub async fn clear_cache(&self) {
        // Collect first: invalidation awaits must not run under shard locks.
        let keys: Vec<String> = self.cached_keys.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let _ = self.cache.invalidate(&key).await;
        }
        self.cached_keys.clear();
        self.rate_tracker.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
