//! Persistent attendance records and the per-upload context they are built from.

use chrono::{DateTime, Datelike, Utc};
use rollcall_core::MatchReport;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Contextual metadata for one identity (student).
///
/// Created bare by the attendance path if missing; roster tooling fills in
/// the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: String,
    #[serde(default)]
    pub cohort: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub program_code: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub faculty: Option<String>,
    #[serde(default)]
    pub faculty_id: Option<String>,
    #[serde(default)]
    pub registration_no: Option<String>,
}

impl IdentityRecord {
    pub fn bare(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            ..Self::default()
        }
    }
}

/// Who uploaded, when, and for which session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadContext {
    pub requester: String,
    pub period: String,
    pub cohort: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UploadContext {
    pub fn new(requester: &str, period: &str) -> Self {
        Self {
            requester: requester.to_string(),
            period: period.to_string(),
            cohort: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_cohort(mut self, cohort: Option<String>) -> Self {
        self.cohort = cohort;
        self
    }
}

/// One presence mark. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub identity: String,
    pub cohort: Option<String>,
    pub program: Option<String>,
    pub program_code: Option<String>,
    pub course: Option<String>,
    pub course_code: Option<String>,
    pub faculty: Option<String>,
    pub faculty_id: Option<String>,
    pub registration_no: Option<String>,
    pub period: String,
    pub year: i32,
    pub requester: String,
    pub presence: u8,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceEvent {
    /// Build an event from the authoritative identity record.
    ///
    /// The upload's cohort fills in only when the record has none.
    pub fn new(record: &IdentityRecord, ctx: &UploadContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: record.identity.clone(),
            cohort: record.cohort.clone().or_else(|| ctx.cohort.clone()),
            program: record.program.clone(),
            program_code: record.program_code.clone(),
            course: record.course.clone(),
            course_code: record.course_code.clone(),
            faculty: record.faculty.clone(),
            faculty_id: record.faculty_id.clone(),
            registration_no: record.registration_no.clone(),
            period: ctx.period.clone(),
            year: ctx.timestamp.year(),
            requester: ctx.requester.clone(),
            presence: 1,
            timestamp: ctx.timestamp,
        }
    }
}

/// Traceability record for one processed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAudit {
    pub id: Uuid,
    /// Hex SHA-256 of the uploaded image bytes.
    pub image_sha256: String,
    pub image_bytes: usize,
    pub requester: String,
    pub cohort: Option<String>,
    pub recognized: Vec<String>,
    pub unknown_count: usize,
    pub total_faces: usize,
    pub timestamp: DateTime<Utc>,
}

/// Reference to an uploaded image, taken before the bytes go to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDigest {
    pub sha256: String,
    pub len: usize,
}

impl ImageDigest {
    pub fn of(image: &[u8]) -> Self {
        Self {
            sha256: sha256_hex(image),
            len: image.len(),
        }
    }
}

impl UploadAudit {
    pub fn new(image: &ImageDigest, ctx: &UploadContext, report: &MatchReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_sha256: image.sha256.clone(),
            image_bytes: image.len,
            requester: ctx.requester.clone(),
            cohort: ctx.cohort.clone(),
            recognized: report.recognized.iter().cloned().collect(),
            unknown_count: report.unknown_count,
            total_faces: report.total_faces,
            timestamp: ctx.timestamp,
        }
    }
}

/// Registry listing entry; never exposes the raw vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFaceInfo {
    pub identity: String,
    pub dimension: usize,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> UploadContext {
        UploadContext {
            requester: "prof.lee".into(),
            period: "Afternoon".into(),
            cohort: Some("CSE-A".into()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_event_copies_record_attributes() {
        let record = IdentityRecord {
            identity: "alice".into(),
            cohort: Some("ECE-B".into()),
            course: Some("Signals".into()),
            course_code: Some("EC201".into()),
            ..IdentityRecord::default()
        };
        let event = AttendanceEvent::new(&record, &ctx());

        assert_eq!(event.identity, "alice");
        assert_eq!(event.cohort.as_deref(), Some("ECE-B"));
        assert_eq!(event.course_code.as_deref(), Some("EC201"));
        assert_eq!(event.period, "Afternoon");
        assert_eq!(event.year, 2025);
        assert_eq!(event.presence, 1);
        assert_eq!(event.requester, "prof.lee");
    }

    #[test]
    fn test_event_falls_back_to_upload_cohort() {
        let event = AttendanceEvent::new(&IdentityRecord::bare("bob"), &ctx());
        assert_eq!(event.cohort.as_deref(), Some("CSE-A"));
        assert_eq!(event.program, None);
    }

    #[test]
    fn test_audit_digest_and_counts() {
        let mut report = MatchReport {
            unknown_count: 1,
            total_faces: 3,
            ..MatchReport::default()
        };
        report.recognized.insert("carol".into());
        report.recognized.insert("alice".into());

        let audit = UploadAudit::new(&ImageDigest::of(b"abc"), &ctx(), &report);
        assert_eq!(
            audit.image_sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(audit.image_bytes, 3);
        assert_eq!(audit.recognized, vec!["alice", "carol"]);
        assert_eq!(audit.total_faces, 3);
    }

    #[test]
    fn test_identity_record_deserializes_partial_json() {
        let record: IdentityRecord =
            serde_json::from_str(r#"{"identity":"dave","program":"BTech"}"#).unwrap();
        assert_eq!(record.program.as_deref(), Some("BTech"));
        assert_eq!(record.cohort, None);
    }
}
