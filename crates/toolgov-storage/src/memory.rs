//! In-memory directory, policy, history, audit, and inventory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use toolgov_core::{
    AuditSink, IdentityDirectory, Policy, PolicyStore, PrincipalId, PrincipalRecord, ProofBundle,
    RegisteredTool, RequestHistoryStore, RequestMetadata, Result, TenantId, ToolInventory,
};
use uuid::Uuid;

// ===========================================================================
// InMemoryIdentityDirectory
// ===========================================================================

/// Seedable in-memory identity directory.
pub struct InMemoryIdentityDirectory {
    principals: RwLock<HashMap<PrincipalId, PrincipalRecord>>,
}

impl InMemoryIdentityDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            principals: RwLock::new(HashMap::new()),
        }
    }

    /// Register a principal.
    pub async fn insert(&self, principal_id: PrincipalId, record: PrincipalRecord) {
        self.principals.write().await.insert(principal_id, record);
    }

    /// Remove a principal.
    pub async fn remove(&self, principal_id: PrincipalId) {
        self.principals.write().await.remove(&principal_id);
    }
}

impl Default for InMemoryIdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn lookup_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<PrincipalRecord>> {
        Ok(self.principals.read().await.get(&principal_id).cloned())
    }
}

// ===========================================================================
// InMemoryPolicyStore
// ===========================================================================

/// In-memory boundary policy store.
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
        }
    }

    /// Add a policy.
    pub async fn insert(&self, policy: Policy) {
        self.policies.write().await.push(policy);
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn load_active_policies(&self, tenant_id: TenantId) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.active)
            .cloned()
            .collect())
    }
}

// ===========================================================================
// InMemoryRequestHistory
// ===========================================================================

/// In-memory cross-session request history. Linear scans throughout.
pub struct InMemoryRequestHistory {
    requests: RwLock<Vec<(TenantId, String, DateTime<Utc>)>>,
}

impl InMemoryRequestHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Record one request for a tenant + partner pair.
    pub async fn record(&self, tenant_id: TenantId, partner_id: &str, at: DateTime<Utc>) {
        self.requests
            .write()
            .await
            .push((tenant_id, partner_id.to_string(), at));
    }
}

impl Default for InMemoryRequestHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestHistoryStore for InMemoryRequestHistory {
    async fn count_requests(
        &self,
        tenant_id: TenantId,
        partner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .filter(|(t, p, at)| *t == tenant_id && p == partner_id && *at >= since)
            .count() as u64)
    }
}

// ===========================================================================
// InMemoryAuditSink
// ===========================================================================

/// Append-only in-memory audit sink.
pub struct InMemoryAuditSink {
    records: RwLock<Vec<(ProofBundle, RequestMetadata)>>,
}

impl InMemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// All appended records, in append order.
    pub async fn records(&self) -> Vec<(ProofBundle, RequestMetadata)> {
        self.records.read().await.clone()
    }

    /// Number of appended records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been appended yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, bundle: ProofBundle, metadata: RequestMetadata) -> Result<()> {
        self.records.write().await.push((bundle, metadata));
        Ok(())
    }
}

// ===========================================================================
// InMemoryToolInventory
// ===========================================================================

/// Seedable in-memory tool inventory.
pub struct InMemoryToolInventory {
    tools: RwLock<HashMap<Uuid, RegisteredTool>>,
}

impl InMemoryToolInventory {
    /// Create an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool.
    pub async fn insert(&self, tool: RegisteredTool) {
        self.tools.write().await.insert(tool.id, tool);
    }
}

impl Default for InMemoryToolInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInventory for InMemoryToolInventory {
    async fn lookup_tools(&self, tool_ids: &[Uuid]) -> Result<Vec<RegisteredTool>> {
        let tools = self.tools.read().await;
        Ok(tool_ids
            .iter()
            .filter_map(|id| tools.get(id).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
