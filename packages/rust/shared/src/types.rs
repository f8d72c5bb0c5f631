//! Core domain types shared by the crawler, extraction, and storage crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
///
/// `Pending → Running → {Completed | Failed | Cancelled}`. Terminal states
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// Outcome of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// The URL that was fetched (normalized form).
    pub url: String,
    /// Discovery depth of the URL (seeds are depth 0).
    pub depth: u32,
    /// HTTP status code, absent when no response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Cleaned main text of the page.
    #[serde(default)]
    pub content: String,
    /// Outbound links, already resolved to absolute URLs.
    #[serde(default)]
    pub links: Vec<String>,
    /// SHA-256 of the raw body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageRecord {
    /// A record for a fetch that did not yield a parsed page.
    pub fn failed(url: impl Into<String>, depth: u32, status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth,
            status_code,
            title: None,
            content: String::new(),
            links: Vec::new(),
            content_hash: None,
            fetched_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The batch handed downstream once per completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessBatch {
    pub job_id: JobId,
    pub results: Vec<PageRecord>,
}

// ---------------------------------------------------------------------------
// Entities & relationships
// ---------------------------------------------------------------------------

/// Coarse entity class assigned by the extraction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityLabel {
    Person,
    Organization,
    Location,
    Generic,
}

impl EntityLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityLabel {
    type Err = String;

    /// Accepts the canonical names plus the usual NER tag aliases.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "per" => Ok(Self::Person),
            "organization" | "organisation" | "org" => Ok(Self::Organization),
            "location" | "loc" | "gpe" => Ok(Self::Location),
            "generic" | "misc" | "entity" => Ok(Self::Generic),
            other => Err(format!("unknown entity label '{other}'")),
        }
    }
}

/// An extracted entity on its way into the knowledge stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface text as found in the source.
    pub text: String,
    pub label: EntityLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Fixed-dimension embedding; required for the vector write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: EntityLabel) -> Self {
        Self {
            text: text.into(),
            label,
            confidence: None,
            source_url: None,
            job_id: None,
            embedding: None,
        }
    }

    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A typed, graph-only edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_text: String,
    pub source_label: EntityLabel,
    pub target_text: String,
    pub target_label: EntityLabel,
    /// Edge type, upper snake case (e.g. `WORKS_FOR`).
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().expect("parse job id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn entity_label_aliases() {
        assert_eq!("ORG".parse::<EntityLabel>(), Ok(EntityLabel::Organization));
        assert_eq!("gpe".parse::<EntityLabel>(), Ok(EntityLabel::Location));
        assert_eq!("Person".parse::<EntityLabel>(), Ok(EntityLabel::Person));
        assert!("weather".parse::<EntityLabel>().is_err());
    }

    #[test]
    fn page_record_serializes_without_empty_optionals() {
        let record = PageRecord::failed("https://example.com/", 0, None, "timeout");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("status_code").is_none());
        assert_eq!(json["error"], "timeout");
        assert!(!record.is_success());
    }
}
