//! Bounded filesystem gateway for preflight artifacts.
//!
//! Every read resolves candidate paths from the registry record, confines
//! each one to the registered artifact directory *and* the gateway's
//! allowed root, and only then opens the first existing regular file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pfd_schemas::{DiagnosticsError, PreflightRecord};
use serde_json::Value;

pub mod paths;
pub mod semantic;

pub use semantic::{
    normalize_manifest_payload, normalize_semantic_payload, normalize_validation_payload,
    ManifestReport, RuleCounter, SemanticReport, ValidationReport,
};

pub const ENV_ARTIFACT_ROOT: &str = "PREFLIGHT_ARTIFACT_ROOT";
const DEFAULT_ARTIFACT_ROOT: &str = "etl/reports/preflight";

// ---------------------------------------------------------------------------
// Artifact kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Validation,
    Semantic,
    Manifest,
    Preflight,
    UnifiedCsv,
}

pub const ARTIFACT_KINDS: [ArtifactKind; 5] = [
    ArtifactKind::Validation,
    ArtifactKind::Semantic,
    ArtifactKind::Manifest,
    ArtifactKind::Preflight,
    ArtifactKind::UnifiedCsv,
];

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Validation => "validation",
            ArtifactKind::Semantic => "semantic",
            ArtifactKind::Manifest => "manifest",
            ArtifactKind::Preflight => "preflight",
            ArtifactKind::UnifiedCsv => "unified_csv",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validation" => Ok(ArtifactKind::Validation),
            "semantic" => Ok(ArtifactKind::Semantic),
            "manifest" => Ok(ArtifactKind::Manifest),
            "preflight" => Ok(ArtifactKind::Preflight),
            "unified_csv" => Ok(ArtifactKind::UnifiedCsv),
            other => Err(DiagnosticsError::payload(format!(
                "Unsupported artifact type '{other}'"
            ))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::UnifiedCsv => "text/csv; charset=utf-8",
            _ => "application/json",
        }
    }
}

/// Allowed filesystem root from `PREFLIGHT_ARTIFACT_ROOT`.
pub fn allowed_artifact_root() -> PathBuf {
    let configured = std::env::var(ENV_ARTIFACT_ROOT).unwrap_or_default();
    let configured = configured.trim();
    if configured.is_empty() {
        paths::absolutize(Path::new(DEFAULT_ARTIFACT_ROOT))
    } else {
        paths::absolutize(Path::new(configured))
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub path: Option<PathBuf>,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ArtifactInfo {
    pub artifact_type: &'static str,
    pub available: bool,
    pub file_name: Option<String>,
    pub path: Option<String>,
    pub size_bytes: Option<u64>,
    pub content_type: &'static str,
    pub download_url: Option<String>,
}

/// The gateway carries its allowed root explicitly; processes build one
/// from the environment at startup.
#[derive(Debug, Clone)]
pub struct ArtifactGateway {
    allowed_root: PathBuf,
}

impl ArtifactGateway {
    pub fn new(allowed_root: impl AsRef<Path>) -> Self {
        Self {
            allowed_root: paths::absolutize(allowed_root.as_ref()),
        }
    }

    pub fn from_env() -> Self {
        Self {
            allowed_root: allowed_artifact_root(),
        }
    }

    pub fn allowed_root(&self) -> &Path {
        &self.allowed_root
    }

    fn resolve_artifact_dir(&self, record: &PreflightRecord) -> Result<PathBuf> {
        let raw = record.artifact_dir.as_deref().map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return Err(DiagnosticsError::not_found(
                "Artifact directory is not registered for this run/source",
            ));
        }

        let artifact_dir = paths::absolutize(Path::new(raw));
        if !paths::is_within(&artifact_dir, &self.allowed_root) {
            return Err(DiagnosticsError::access(format!(
                "Artifact directory '{}' is outside allowed root '{}'",
                artifact_dir.display(),
                self.allowed_root.display()
            )));
        }
        Ok(artifact_dir)
    }

    /// Resolve one artifact kind for a record without opening anything.
    ///
    /// Every candidate must be confined before existence is consulted, so a
    /// traversal attempt fails closed even when the target file is absent.
    pub fn resolve_descriptor(
        &self,
        record: &PreflightRecord,
        kind: ArtifactKind,
    ) -> Result<ArtifactDescriptor> {
        let artifact_dir = self.resolve_artifact_dir(record)?;
        let candidates = candidate_paths(record, kind, &artifact_dir);

        if candidates.is_empty() {
            return Ok(ArtifactDescriptor {
                kind,
                path: None,
                available: false,
            });
        }

        for candidate in &candidates {
            if !paths::is_within(candidate, &artifact_dir) {
                return Err(DiagnosticsError::access(format!(
                    "Artifact path '{}' is outside registered artifact directory '{}'",
                    candidate.display(),
                    artifact_dir.display()
                )));
            }
            if !paths::is_within(candidate, &self.allowed_root) {
                return Err(DiagnosticsError::access(format!(
                    "Artifact path '{}' is outside allowed root '{}'",
                    candidate.display(),
                    self.allowed_root.display()
                )));
            }
        }

        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(ArtifactDescriptor {
                    kind,
                    path: Some(candidate.clone()),
                    available: true,
                });
            }
        }

        Ok(ArtifactDescriptor {
            kind,
            path: Some(candidates[0].clone()),
            available: false,
        })
    }

    /// Load one JSON artifact. NotFound when no confined candidate exists
    /// on disk; PayloadError on parse failure or non-object root.
    pub fn load_artifact_json(
        &self,
        record: &PreflightRecord,
        kind: ArtifactKind,
    ) -> Result<(Value, PathBuf)> {
        let descriptor = self.resolve_descriptor(record, kind)?;
        match descriptor.path {
            Some(path) if descriptor.available => {
                let payload = load_json_file(&path)?;
                Ok((payload, path))
            }
            _ => Err(DiagnosticsError::not_found(format!(
                "{} artifact is not available for source '{}'",
                kind.as_str(),
                record.source_name
            ))),
        }
    }

    /// Semantic payload with fallback: standalone report, then the
    /// `semantic_quality` block of the manifest, then the `semantic` block
    /// of the preflight report.
    pub fn load_semantic_with_fallback(
        &self,
        record: &PreflightRecord,
    ) -> Result<(Value, PathBuf)> {
        match self.load_artifact_json(record, ArtifactKind::Semantic) {
            Ok(found) => return Ok(found),
            Err(err) if !is_not_found(&err) => return Err(err),
            Err(_) => {}
        }

        for (container, key) in [
            (ArtifactKind::Manifest, "semantic_quality"),
            (ArtifactKind::Preflight, "semantic"),
        ] {
            match self.load_artifact_json(record, container) {
                Ok((payload, path)) => {
                    if let Some(nested) = payload.get(key).filter(|v| v.is_object()) {
                        return Ok((nested.clone(), path));
                    }
                }
                Err(err) if !is_not_found(&err) => return Err(err),
                Err(_) => {}
            }
        }

        Err(DiagnosticsError::not_found(format!(
            "semantic artifact is not available for source '{}'",
            record.source_name
        )))
    }

    /// Resolve the file behind a download request. The response layer
    /// streams the bytes and sets `content_type`.
    pub fn resolve_download(
        &self,
        record: &PreflightRecord,
        kind: ArtifactKind,
    ) -> Result<DownloadSpec> {
        let descriptor = self.resolve_descriptor(record, kind)?;
        match descriptor.path {
            Some(path) if descriptor.available => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| kind.as_str().to_string());
                Ok(DownloadSpec {
                    path,
                    file_name,
                    content_type: kind.content_type(),
                })
            }
            _ => Err(DiagnosticsError::not_found(format!(
                "{} artifact is not available for source '{}' in run '{}'",
                kind.as_str(),
                record.source_name,
                record.run_id
            ))),
        }
    }

    /// All five kinds for one record, with sizes and download URLs for the
    /// kinds that exist on disk.
    pub fn list_artifacts(&self, record: &PreflightRecord) -> Result<Vec<ArtifactInfo>> {
        let mut items = Vec::with_capacity(ARTIFACT_KINDS.len());
        for kind in ARTIFACT_KINDS {
            let descriptor = self.resolve_descriptor(record, kind)?;
            let size_bytes = match (&descriptor.path, descriptor.available) {
                (Some(path), true) => std::fs::metadata(path).ok().map(|m| m.len()),
                _ => None,
            };
            let download_url = descriptor.available.then(|| {
                format!(
                    "/api/v1/diagnostics/preflight/runs/{}/sources/{}/download/{}",
                    record.run_id,
                    record.source_name,
                    kind.as_str()
                )
            });
            items.push(ArtifactInfo {
                artifact_type: kind.as_str(),
                available: descriptor.available,
                file_name: descriptor
                    .path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned()),
                path: descriptor.path.as_ref().map(|p| p.display().to_string()),
                size_bytes,
                content_type: kind.content_type(),
                download_url,
            });
        }
        Ok(items)
    }

    /// Aggregate WARN/FAIL rule observations over the given records.
    ///
    /// Records without a reachable semantic payload are skipped; a
    /// confinement failure still propagates.
    pub fn collect_rule_counts(
        &self,
        records: &[PreflightRecord],
    ) -> Result<BTreeMap<String, RuleCounter>> {
        semantic::collect_rule_counts(self, records)
    }
}

fn summary_path(record: &PreflightRecord, key: &str) -> Option<String> {
    let paths = record.summary_json.get("paths")?.as_object()?;
    let value = paths.get(key)?.as_str()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn candidate_paths(
    record: &PreflightRecord,
    kind: ArtifactKind,
    artifact_dir: &Path,
) -> Vec<PathBuf> {
    let raw_candidates: Vec<Option<String>> = match kind {
        ArtifactKind::Validation => vec![
            record.validation_report_path.clone(),
            summary_path(record, "validation_report_path"),
            Some("validation_report.json".to_string()),
        ],
        ArtifactKind::Semantic => vec![
            summary_path(record, "semantic_report_path"),
            Some("semantic_report.json".to_string()),
        ],
        ArtifactKind::Manifest => vec![
            record.manifest_path.clone(),
            summary_path(record, "manifest_path"),
            Some("manifest.json".to_string()),
        ],
        ArtifactKind::Preflight => vec![
            summary_path(record, "preflight_report_path"),
            Some("preflight_report.json".to_string()),
        ],
        ArtifactKind::UnifiedCsv => vec![
            summary_path(record, "unified_output_path"),
            record.used_unified.then(|| record.used_input_path.clone()),
            Some("unified.csv".to_string()),
        ],
    };

    let mut out: Vec<PathBuf> = Vec::new();
    for raw in raw_candidates.into_iter().flatten() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let resolved = paths::resolve_under(artifact_dir, Path::new(trimmed));
        if !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    out
}

fn load_json_file(path: &Path) -> Result<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiagnosticsError::not_found(format!(
                "Artifact file not found: {}",
                path.display()
            )));
        }
        Err(err) => {
            return Err(DiagnosticsError::payload(format!(
                "Unable to read artifact file: {} ({err})",
                path.display()
            )));
        }
    };

    let payload: Value = serde_json::from_str(&content).map_err(|_| {
        DiagnosticsError::payload(format!(
            "Artifact file is not valid JSON: {}",
            path.display()
        ))
    })?;

    if !payload.is_object() {
        return Err(DiagnosticsError::payload(format!(
            "Artifact JSON must be an object: {}",
            path.display()
        )));
    }
    Ok(payload)
}

pub(crate) fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DiagnosticsError>(),
        Some(DiagnosticsError::NotFound(_))
    )
}
