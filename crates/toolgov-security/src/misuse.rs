//! Behavioral tool-misuse detection.
//!
//! [`MisuseDetector`] keeps a bounded per-session sliding window of tool
//! invocations and runs five independent checks over it when a new call is
//! about to execute: parameter patterns, dangerous tool sequences, timing
//! anomalies, failure rates, and cross-tenant enumeration. The single most
//! severe result wins. Detection never fails — with insufficient history a
//! check is skipped, not failed.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use regex::Regex;
use toolgov_core::{
    GovernError, MisuseConfig, MisuseType, MisuseVerdict, Recommendation, Result, RiskLevel,
    ToolCallRecord,
};

// ---------------------------------------------------------------------------
// Pattern catalogs
// ---------------------------------------------------------------------------

/// A suspicious parameter pattern.
struct ParameterPattern {
    regex: Regex,
    misuse_type: MisuseType,
    confidence: f64,
    severity: RiskLevel,
    description: &'static str,
}

/// A known dangerous tool-call subsequence.
struct SequencePattern {
    tools: &'static [&'static str],
    misuse_type: MisuseType,
    confidence: f64,
    severity: RiskLevel,
    description: &'static str,
}

fn compile_parameter_patterns() -> Result<Vec<ParameterPattern>> {
    let defs: [(&str, MisuseType, f64, RiskLevel, &'static str); 4] = [
        (
            r"(?i)\*|%|SELECT\s+\*|DROP\s+|DELETE\s+FROM",
            MisuseType::ParameterManipulation,
            0.9,
            RiskLevel::Critical,
            "SQL injection attempt in parameters",
        ),
        (
            r"(?i)\.\./|\.\.\\|/etc/|/proc/",
            MisuseType::ParameterManipulation,
            0.85,
            RiskLevel::Critical,
            "Path traversal attempt in parameters",
        ),
        (
            r"00000000-0000-0000-0000-000000000000",
            MisuseType::EnumerationAttack,
            0.7,
            RiskLevel::High,
            "Null UUID used for enumeration",
        ),
        (
            r"(?i)admin|root|superuser|system",
            MisuseType::PrivilegeProbe,
            0.5,
            RiskLevel::Medium,
            "Privileged term in parameters",
        ),
    ];

    defs.into_iter()
        .map(|(pattern, misuse_type, confidence, severity, description)| {
            let regex = Regex::new(pattern).map_err(|e| {
                GovernError::Config(format!("Failed to compile parameter pattern: {e}"))
            })?;
            Ok(ParameterPattern {
                regex,
                misuse_type,
                confidence,
                severity,
                description,
            })
        })
        .collect()
}

const SEQUENCE_PATTERNS: &[SequencePattern] = &[
    SequencePattern {
        tools: &[
            "query_enterprise_data",
            "query_enterprise_data",
            "query_enterprise_data",
        ],
        misuse_type: MisuseType::EnumerationAttack,
        confidence: 0.7,
        severity: RiskLevel::High,
        description: "Repeated tenant data queries may indicate enumeration",
    },
    SequencePattern {
        tools: &["query_policies", "delete_policy", "delete_policy"],
        misuse_type: MisuseType::DataExfiltrationPattern,
        confidence: 0.8,
        severity: RiskLevel::Critical,
        description: "Bulk deletion pattern detected",
    },
    SequencePattern {
        tools: &[
            "modify_enterprise_settings",
            "create_policy",
            "modify_enterprise_settings",
        ],
        misuse_type: MisuseType::PrivilegeProbe,
        confidence: 0.75,
        severity: RiskLevel::High,
        description: "Rapid settings modification pattern",
    },
    SequencePattern {
        tools: &[
            "query_audit_logs",
            "query_audit_logs",
            "query_audit_logs",
            "query_audit_logs",
        ],
        misuse_type: MisuseType::ExcessiveQueries,
        confidence: 0.6,
        severity: RiskLevel::Medium,
        description: "Excessive audit log queries may indicate reconnaissance",
    },
];

/// How many calls above the pagination ceiling count as bulk extraction.
const BULK_LIMIT_CEILING: u64 = 100;

// ---------------------------------------------------------------------------
// Session statistics
// ---------------------------------------------------------------------------

/// Aggregate statistics for one session's call window.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Calls currently in the window.
    pub call_count: usize,
    /// Distinct tools invoked in the window.
    pub unique_tools: usize,
    /// Fraction of calls that failed.
    pub failure_rate: f64,
    /// Timestamp of the oldest call in the window.
    pub oldest_call: Option<chrono::DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// MisuseDetector
// ---------------------------------------------------------------------------

/// Sliding-window behavioral misuse detector.
pub struct MisuseDetector {
    config: MisuseConfig,
    history: DashMap<String, Vec<ToolCallRecord>>,
    parameter_patterns: Vec<ParameterPattern>,
    limit_regex: Regex,
}

impl MisuseDetector {
    /// Create a detector with the given thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter pattern fails to compile.
    pub fn new(config: MisuseConfig) -> Result<Self> {
        let parameter_patterns = compile_parameter_patterns()?;
        let limit_regex = Regex::new(r#"(?i)limit['":\s]*([0-9]+)"#)
            .map_err(|e| GovernError::Config(format!("Failed to compile limit regex: {e}")))?;
        Ok(Self {
            config,
            history: DashMap::new(),
            parameter_patterns,
            limit_regex,
        })
    }

    /// Create a detector with default thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter pattern fails to compile.
    pub fn with_defaults() -> Result<Self> {
        Self::new(MisuseConfig::default())
    }

    /// Record a tool call into the session's window.
    ///
    /// Prunes entries older than the window, then drops the oldest entries
    /// above the size cap. The per-session entry guard is the critical
    /// section for concurrent recorders.
    pub fn record(&self, session_id: &str, record: ToolCallRecord) {
        let mut entry = self.history.entry(session_id.to_string()).or_default();
        entry.push(record);

        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.window_secs as i64);
        entry.retain(|r| r.timestamp > cutoff);

        let len = entry.len();
        if len > self.config.max_history {
            entry.drain(0..len - self.config.max_history);
        }
    }

    /// Run all checks over the session window plus the pending call and
    /// return the most severe result.
    #[must_use]
    pub fn detect(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> MisuseVerdict {
        let history: Vec<ToolCallRecord> = self
            .history
            .get(session_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        let mut candidates: Vec<MisuseVerdict> = Vec::new();
        if let Some(v) = self.check_parameter_patterns(args) {
            candidates.push(v);
        }
        if let Some(v) = self.check_tool_sequence(&history, tool_name) {
            candidates.push(v);
        }
        if let Some(v) = self.check_timing(&history) {
            candidates.push(v);
        }
        if let Some(v) = self.check_failures(&history) {
            candidates.push(v);
        }
        if let Some(v) = self.check_enumeration(&history) {
            candidates.push(v);
        }

        // Most severe wins; on ties the earlier check (parameters first,
        // enumeration last) keeps the verdict.
        let mut best: Option<MisuseVerdict> = None;
        for candidate in candidates {
            let better = match &best {
                Some(current) => candidate.severity > current.severity,
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }
        best.unwrap_or_else(MisuseVerdict::clean)
    }

    /// Drop a session's history.
    pub fn clear_session(&self, session_id: &str) {
        self.history.remove(session_id);
    }

    /// Aggregate statistics for a session's current window.
    #[must_use]
    pub fn session_stats(&self, session_id: &str) -> SessionStats {
        let history = self.history.get(session_id);
        let records: &[ToolCallRecord] = history.as_deref().map_or(&[], |h| h.as_slice());

        let failed = records.iter().filter(|r| !r.success).count();
        let unique: std::collections::HashSet<&str> =
            records.iter().map(|r| r.tool_name.as_str()).collect();

        SessionStats {
            call_count: records.len(),
            unique_tools: unique.len(),
            failure_rate: if records.is_empty() {
                0.0
            } else {
                failed as f64 / records.len() as f64
            },
            oldest_call: records.first().map(|r| r.timestamp),
        }
    }

    // -- Checks ---------------------------------------------------------------

    /// Serialized args against the fixed parameter catalog, plus the bulk
    /// limit rule (values at or below the pagination ceiling are exempt).
    fn check_parameter_patterns(&self, args: &serde_json::Value) -> Option<MisuseVerdict> {
        let serialized = args.to_string();

        for pattern in &self.parameter_patterns {
            if pattern.regex.is_match(&serialized) {
                return Some(MisuseVerdict {
                    detected: true,
                    confidence: pattern.confidence,
                    misuse_type: pattern.misuse_type,
                    severity: pattern.severity,
                    details: pattern.description.to_string(),
                    recommendation: if pattern.severity == RiskLevel::Critical {
                        Recommendation::Block
                    } else {
                        Recommendation::Warn
                    },
                });
            }
        }

        if let Some(caps) = self.limit_regex.captures(&serialized) {
            if let Ok(limit) = caps[1].parse::<u64>() {
                if limit > BULK_LIMIT_CEILING {
                    return Some(MisuseVerdict {
                        detected: true,
                        confidence: 0.6,
                        misuse_type: MisuseType::DataExfiltrationPattern,
                        severity: RiskLevel::Medium,
                        details: format!(
                            "Large limit value ({limit}) may indicate bulk extraction"
                        ),
                        recommendation: Recommendation::Warn,
                    });
                }
            }
        }

        None
    }

    /// Last five calls plus the pending one against known dangerous
    /// subsequences, then the sequential same-tool ceiling.
    fn check_tool_sequence(
        &self,
        history: &[ToolCallRecord],
        pending_tool: &str,
    ) -> Option<MisuseVerdict> {
        let mut recent: Vec<&str> = history
            .iter()
            .rev()
            .take(5)
            .map(|r| r.tool_name.as_str())
            .collect();
        recent.reverse();
        recent.push(pending_tool);

        for pattern in SEQUENCE_PATTERNS {
            if contains_subsequence(&recent, pattern.tools) {
                return Some(MisuseVerdict {
                    detected: true,
                    confidence: pattern.confidence,
                    misuse_type: pattern.misuse_type,
                    severity: pattern.severity,
                    details: pattern.description.to_string(),
                    recommendation: if pattern.severity == RiskLevel::Critical {
                        Recommendation::Block
                    } else {
                        Recommendation::Warn
                    },
                });
            }
        }

        let sequential = longest_same_tool_run(&recent);
        if sequential >= self.config.max_sequential_same_tool {
            return Some(MisuseVerdict {
                detected: true,
                confidence: 0.6,
                misuse_type: MisuseType::ExcessiveQueries,
                severity: RiskLevel::Medium,
                details: format!("{sequential} sequential calls to the same tool"),
                recommendation: Recommendation::Warn,
            });
        }

        None
    }

    /// Call frequency and rapid-fire gaps over the window.
    fn check_timing(&self, history: &[ToolCallRecord]) -> Option<MisuseVerdict> {
        if history.len() < 2 {
            return None;
        }

        let first = history.first()?.timestamp;
        let last = history.last()?.timestamp;
        let window_ms = (last - first).num_milliseconds() as f64;
        let calls_per_minute = history.len() as f64 / window_ms * 60_000.0;

        if calls_per_minute > self.config.max_calls_per_minute {
            return Some(MisuseVerdict {
                detected: true,
                confidence: 0.7,
                misuse_type: MisuseType::ResourceExhaustion,
                severity: RiskLevel::High,
                details: format!("High call frequency: {calls_per_minute:.1} calls/minute"),
                recommendation: Recommendation::Warn,
            });
        }

        let rapid = history
            .windows(2)
            .filter(|pair| {
                (pair[1].timestamp - pair[0].timestamp).num_milliseconds()
                    < self.config.min_call_interval_ms
            })
            .count();
        if rapid as f64 > history.len() as f64 * 0.5 {
            return Some(MisuseVerdict {
                detected: true,
                confidence: 0.6,
                misuse_type: MisuseType::TimingAnomaly,
                severity: RiskLevel::Medium,
                details: format!("{rapid} rapid-fire tool calls detected"),
                recommendation: Recommendation::Warn,
            });
        }

        None
    }

    /// Failure rate over the window (enumeration probing leaves a trail of
    /// failed lookups).
    fn check_failures(&self, history: &[ToolCallRecord]) -> Option<MisuseVerdict> {
        if history.len() < 5 {
            return None;
        }

        let failed = history.iter().filter(|r| !r.success).count();
        let ratio = failed as f64 / history.len() as f64;
        if ratio > self.config.max_failed_ratio {
            return Some(MisuseVerdict {
                detected: true,
                confidence: 0.75,
                misuse_type: MisuseType::EnumerationAttack,
                severity: RiskLevel::High,
                details: format!("{:.0}% of recent calls failed", ratio * 100.0),
                recommendation: Recommendation::Block,
            });
        }

        None
    }

    /// Distinct tenants touched within one session window.
    fn check_enumeration(&self, history: &[ToolCallRecord]) -> Option<MisuseVerdict> {
        let tenants: std::collections::HashSet<_> =
            history.iter().map(|r| r.tenant_id).collect();
        if tenants.len() > self.config.max_distinct_tenants {
            return Some(MisuseVerdict {
                detected: true,
                confidence: 0.9,
                misuse_type: MisuseType::EnumerationAttack,
                severity: RiskLevel::Critical,
                details: format!("Access attempts to {} different tenants", tenants.len()),
                recommendation: Recommendation::Terminate,
            });
        }

        None
    }
}

/// Whether `pattern` appears as a contiguous run inside `sequence`.
fn contains_subsequence(sequence: &[&str], pattern: &[&str]) -> bool {
    if pattern.is_empty() || sequence.len() < pattern.len() {
        return false;
    }
    sequence.windows(pattern.len()).any(|w| w == pattern)
}

/// Length of the longest run of identical consecutive entries.
fn longest_same_tool_run(tools: &[&str]) -> usize {
    let mut max_run = 0usize;
    let mut run = 0usize;
    let mut prev: Option<&str> = None;
    for tool in tools {
        if prev == Some(*tool) {
            run += 1;
        } else {
            run = 1;
        }
        max_run = max_run.max(run);
        prev = Some(*tool);
    }
    max_run
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
