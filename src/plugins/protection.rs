//! Write-access policy engine.
//!
//! Every proposed write is resolved lexically against the project base and
//! checked, in order, for:
//!
//! 1. escaping the base (`out_of_scope`)
//! 2. touching a protected governance asset (`governance_asset`, no scope
//!    overrides this)
//! 3. touching agent definitions while self-modification is disabled
//!    (`self_modification`)
//! 4. falling outside the caller's declared scope (`out_of_scope`)
//!
//! Each check, allowed or not, appends one entry to the audit log persisted
//! at `<root>/_audit_log.json`.

use crate::core::config::GovernanceConfig;
use crate::core::error::{StewardError, ViolationType};
use crate::core::glob::{self, Glob};
use crate::core::store::{Store, normalize_path};
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

pub const AUDIT_LOG_KEY: &str = "_audit_log.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_role: String,
    pub target_path: String,
    pub allowed: bool,
    #[serde(default)]
    pub violation_type: Option<ViolationType>,
    pub reason: String,
    #[serde(default)]
    pub matched_pattern: Option<String>,
    /// The scope the caller declared, if any.
    #[serde(default)]
    pub scope: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub violation_type: Option<ViolationType>,
    pub reason: String,
    pub matched_pattern: Option<String>,
    /// Path relative to the project base; empty when it could not be resolved.
    pub relative_path: String,
    /// For scope misses, the declared pattern sharing the longest literal
    /// prefix with the target.
    pub nearest_allowed: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ViolationReport {
    pub agent_role: String,
    pub target_path: String,
    pub violation_type: ViolationType,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub nearest_allowed: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub agent_role: Option<String>,
    pub allowed: Option<bool>,
    pub violation_type: Option<ViolationType>,
    /// Matches entries whose target path starts with this text.
    pub path_prefix: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, e: &AuditLogEntry) -> bool {
        self.agent_role.as_ref().is_none_or(|r| &e.agent_role == r)
            && self.allowed.is_none_or(|a| e.allowed == a)
            && self.violation_type.is_none_or(|v| e.violation_type == Some(v))
            && self
                .path_prefix
                .as_ref()
                .is_none_or(|p| e.target_path.starts_with(p.as_str()))
            && time::within(&e.timestamp, self.since.as_ref(), self.until.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AgentCounts {
    pub allowed: usize,
    pub denied: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PathCount {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AuditSummary {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    pub by_violation: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, AgentCounts>,
    pub top_paths: Vec<PathCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditExport {
    pub exported_at: DateTime<Utc>,
    pub count: usize,
    /// Hex sha256 over the serialized `entries` array.
    pub sha256: String,
    pub entries: Vec<AuditLogEntry>,
}

impl AuditExport {
    /// Recompute the digest and compare.
    pub fn verify(&self) -> Result<bool, StewardError> {
        Ok(digest_entries(&self.entries)? == self.sha256)
    }
}

fn digest_entries(entries: &[AuditLogEntry]) -> Result<String, StewardError> {
    let bytes = serde_json::to_vec(entries)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuditDocument {
    #[serde(default)]
    entries: Vec<AuditLogEntry>,
}

/// Resolve `path` against `base` without touching the filesystem. Returns the
/// `/`-joined relative path, or `None` when it escapes the base.
fn resolve_relative(base: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = if path.is_absolute() {
        if !base.is_absolute() {
            return None;
        }
        let normalized = normalize_path(path);
        normalized.strip_prefix(base).ok()?.to_path_buf()
    } else {
        normalize_path(path)
    };
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(seg) => parts.push(seg.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Anchor a relative project base at the working directory so absolute
/// input paths can be compared against it.
fn resolve_base(base: &Path) -> Result<PathBuf, StewardError> {
    if base.is_absolute() {
        return Ok(normalize_path(base));
    }
    Ok(normalize_path(&std::env::current_dir()?.join(base)))
}

fn shared_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[derive(Debug)]
pub struct GovernanceProtection {
    store: Store,
    base: PathBuf,
    protected: Vec<Glob>,
    self_modification: Vec<Glob>,
    self_modification_allowed: bool,
    log: Vec<AuditLogEntry>,
}

impl GovernanceProtection {
    pub fn open(store: Store, config: &GovernanceConfig) -> Result<Self, StewardError> {
        let doc: AuditDocument = store.load(AUDIT_LOG_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            base: resolve_base(&config.project_base)?,
            protected: glob::compile_all(&config.protected_assets)?,
            self_modification: glob::compile_all(&config.self_modification.paths)?,
            self_modification_allowed: config.self_modification.allowed,
            log: doc.entries,
        })
    }

    pub fn project_base(&self) -> &Path {
        &self.base
    }

    fn evaluate(&self, file_path: &str, scope: Option<&[String]>) -> Result<AccessDecision, StewardError> {
        let Some(relative) = resolve_relative(&self.base, Path::new(file_path)) else {
            return Ok(AccessDecision {
                allowed: false,
                violation_type: Some(ViolationType::OutOfScope),
                reason: format!(
                    "'{file_path}' resolves outside the project base '{}'",
                    self.base.display()
                ),
                matched_pattern: None,
                relative_path: String::new(),
                nearest_allowed: None,
            });
        };

        if let Some(g) = glob::first_match(&self.protected, &relative) {
            return Ok(AccessDecision {
                allowed: false,
                violation_type: Some(ViolationType::GovernanceAsset),
                reason: format!("'{relative}' is a protected governance asset"),
                matched_pattern: Some(g.pattern().to_string()),
                relative_path: relative,
                nearest_allowed: None,
            });
        }

        if !self.self_modification_allowed
            && let Some(g) = glob::first_match(&self.self_modification, &relative)
        {
            return Ok(AccessDecision {
                allowed: false,
                violation_type: Some(ViolationType::SelfModification),
                reason: format!("'{relative}' defines agent behavior and self-modification is disabled"),
                matched_pattern: Some(g.pattern().to_string()),
                relative_path: relative,
                nearest_allowed: None,
            });
        }

        if let Some(patterns) = scope {
            let globs = glob::compile_all(patterns)?;
            if let Some(g) = glob::first_match(&globs, &relative) {
                return Ok(AccessDecision {
                    allowed: true,
                    violation_type: None,
                    reason: "within declared scope".to_string(),
                    matched_pattern: Some(g.pattern().to_string()),
                    relative_path: relative,
                    nearest_allowed: None,
                });
            }
            let nearest = globs
                .iter()
                .map(|g| (shared_prefix_len(g.literal_prefix(), &relative), g))
                .filter(|(len, _)| *len > 0)
                .max_by_key(|(len, _)| *len)
                .map(|(_, g)| g.pattern().to_string());
            return Ok(AccessDecision {
                allowed: false,
                violation_type: Some(ViolationType::OutOfScope),
                reason: format!("'{relative}' is outside the declared scope"),
                matched_pattern: None,
                relative_path: relative,
                nearest_allowed: nearest,
            });
        }

        Ok(AccessDecision {
            allowed: true,
            violation_type: None,
            reason: "no policy restricts this path".to_string(),
            matched_pattern: None,
            relative_path: relative,
            nearest_allowed: None,
        })
    }

    /// Decide whether `agent_role` may write `file_path`, recording the
    /// outcome in the audit log.
    pub fn check_write_access(
        &mut self,
        agent_role: &str,
        file_path: &str,
        allowed_paths: Option<&[String]>,
    ) -> Result<AccessDecision, StewardError> {
        let decision = self.evaluate(file_path, allowed_paths)?;
        tracing::debug!(
            agent_role,
            file_path,
            allowed = decision.allowed,
            pattern = decision.matched_pattern.as_deref().unwrap_or("-"),
            "write access evaluated"
        );
        if !decision.allowed {
            tracing::warn!(
                agent_role,
                file_path,
                violation = decision.violation_type.map(|v| v.as_str()).unwrap_or("-"),
                "write access denied"
            );
        }
        let mut next = self.log.clone();
        next.push(AuditLogEntry {
            timestamp: time::now(),
            agent_role: agent_role.to_string(),
            target_path: file_path.to_string(),
            allowed: decision.allowed,
            violation_type: decision.violation_type,
            reason: decision.reason.clone(),
            matched_pattern: decision.matched_pattern.clone(),
            scope: allowed_paths.map(|s| s.to_vec()),
        });
        self.persist(next)?;
        Ok(decision)
    }

    /// `None` when the write is allowed.
    pub fn enforce_file_access(
        &mut self,
        agent_role: &str,
        file_path: &str,
        allowed_paths: Option<&[String]>,
    ) -> Result<Option<ViolationReport>, StewardError> {
        let decision = self.check_write_access(agent_role, file_path, allowed_paths)?;
        let Some(violation_type) = decision.violation_type.filter(|_| !decision.allowed) else {
            return Ok(None);
        };
        Ok(Some(ViolationReport {
            agent_role: agent_role.to_string(),
            target_path: file_path.to_string(),
            violation_type,
            reason: decision.reason,
            matched_pattern: decision.matched_pattern,
            nearest_allowed: decision.nearest_allowed,
            timestamp: time::now(),
        }))
    }

    pub fn require_write_access(
        &mut self,
        agent_role: &str,
        file_path: &str,
        allowed_paths: Option<&[String]>,
    ) -> Result<(), StewardError> {
        match self.enforce_file_access(agent_role, file_path, allowed_paths)? {
            None => Ok(()),
            Some(report) => Err(StewardError::AccessDenied {
                violation_type: report.violation_type,
                reason: report.reason,
            }),
        }
    }

    /// Matching entries in append order, truncated to the newest `limit`.
    pub fn query_audit_log(&self, query: &AuditQuery) -> Vec<&AuditLogEntry> {
        let mut out: Vec<&AuditLogEntry> = self.log.iter().filter(|e| query.matches(e)).collect();
        if let Some(limit) = query.limit
            && out.len() > limit
        {
            out.drain(..out.len() - limit);
        }
        out
    }

    pub fn audit_summary(&self, top_n: usize) -> AuditSummary {
        let mut summary = AuditSummary {
            total: self.log.len(),
            ..AuditSummary::default()
        };
        let mut paths: BTreeMap<&str, usize> = BTreeMap::new();
        for e in &self.log {
            let agent = summary.by_agent.entry(e.agent_role.clone()).or_default();
            if e.allowed {
                summary.allowed += 1;
                agent.allowed += 1;
            } else {
                summary.denied += 1;
                agent.denied += 1;
                if let Some(v) = e.violation_type {
                    *summary.by_violation.entry(v.as_str().to_string()).or_default() += 1;
                }
            }
            *paths.entry(e.target_path.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<PathCount> = paths
            .into_iter()
            .map(|(path, count)| PathCount {
                path: path.to_string(),
                count,
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        ranked.truncate(top_n);
        summary.top_paths = ranked;
        summary
    }

    pub fn export_audit_log(&self) -> Result<AuditExport, StewardError> {
        Ok(AuditExport {
            exported_at: time::now(),
            count: self.log.len(),
            sha256: digest_entries(&self.log)?,
            entries: self.log.clone(),
        })
    }

    /// Snapshot the log, then empty it.
    pub fn clear_audit_log(&mut self) -> Result<AuditExport, StewardError> {
        let snapshot = self.export_audit_log()?;
        self.persist(Vec::new())?;
        tracing::info!(entries = snapshot.count, "audit log cleared");
        Ok(snapshot)
    }

    /// Write `entries` and adopt them only once the write succeeded.
    fn persist(&mut self, entries: Vec<AuditLogEntry>) -> Result<(), StewardError> {
        let doc = AuditDocument { entries };
        self.store.save(AUDIT_LOG_KEY, &doc)?;
        self.log = doc.entries;
        Ok(())
    }
}
