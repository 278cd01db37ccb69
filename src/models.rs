use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::{RiskThresholds, RiskTier, RiskWeights};

pub const MAX_NOTE_CHARS: usize = 5000;
pub const MAX_SUBJECTS: usize = 50;
/// Assignment counts are stored as Postgres `INTEGER`.
pub const MAX_ASSIGNMENT_COUNT: u32 = i32::MAX as u32;

/// Academic inputs to the risk model. Any of them may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicIndicators {
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub mentor_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAcademicRecord {
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub subjects: Vec<String>,
    pub mentor_note: Option<String>,
    pub risk_score: Option<f64>,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub student_code: String,
    pub name: String,
    pub email: String,
    pub program: Option<String>,
    pub year: Option<i32>,
    pub mentor_id: Option<Uuid>,
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub subjects: Vec<String>,
    pub mentor_note: Option<String>,
    pub risk_score: Option<f64>,
    pub last_risk_updated: Option<DateTime<Utc>>,
    pub last_academic_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn academic_record(&self, thresholds: &RiskThresholds) -> StudentAcademicRecord {
        StudentAcademicRecord {
            attendance_percent: self.attendance_percent,
            cgpa: self.cgpa,
            assignments_completed: self.assignments_completed,
            assignments_total: self.assignments_total,
            subjects: self.subjects.clone(),
            mentor_note: self.mentor_note.clone(),
            risk_score: self.risk_score,
            risk_tier: thresholds.classify(self.risk_score),
        }
    }

    /// Case-insensitive substring match over name, email and student code.
    pub fn matches_search(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.email.to_lowercase().contains(&needle)
            || self.student_code.to_lowercase().contains(&needle)
    }

    pub fn summary(&self, thresholds: &RiskThresholds) -> StudentSummary {
        StudentSummary {
            id: self.id,
            student_code: self.student_code.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            program: self.program.clone(),
            year: self.year,
            risk_score: self.risk_score,
            risk_tier: thresholds.classify(self.risk_score),
            last_risk_updated: self.last_risk_updated,
            mentor_id: self.mentor_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: Uuid,
    pub student_code: String,
    pub name: String,
    pub email: String,
    pub program: Option<String>,
    pub year: Option<i32>,
    pub risk_score: Option<f64>,
    pub risk_tier: RiskTier,
    pub last_risk_updated: Option<DateTime<Utc>>,
    pub mentor_id: Option<Uuid>,
}

/// A validated CSV row waiting to become a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub student_code: String,
    pub name: String,
    pub email: String,
    pub program: Option<String>,
    pub year: Option<i32>,
    pub risk_score: Option<f64>,
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub subjects: Option<Vec<String>>,
    pub mentor_academic_note: Option<String>,
}

impl ImportRow {
    pub fn indicators(&self) -> AcademicIndicators {
        AcademicIndicators {
            attendance_percent: self.attendance_percent,
            cgpa: self.cgpa,
            assignments_completed: self.assignments_completed,
            assignments_total: self.assignments_total,
            mentor_note: self.mentor_academic_note.clone(),
        }
    }

    pub fn has_academics(&self) -> bool {
        self.attendance_percent.is_some()
            || self.cgpa.is_some()
            || self.assignments_completed.is_some()
            || self.assignments_total.is_some()
            || self.subjects.as_ref().is_some_and(|subjects| !subjects.is_empty())
            || self
                .mentor_academic_note
                .as_ref()
                .is_some_and(|note| !note.is_empty())
    }
}

/// Partial update of a student's academic fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicUpdate {
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub subjects: Option<Vec<String>>,
    pub mentor_note: Option<String>,
}

impl AcademicUpdate {
    pub fn is_empty(&self) -> bool {
        self.attendance_percent.is_none()
            && self.cgpa.is_none()
            && self.assignments_completed.is_none()
            && self.assignments_total.is_none()
            && self.subjects.is_none()
            && self.mentor_note.is_none()
    }
}

/// Values written back after an academic update.
#[derive(Debug, Clone, PartialEq)]
pub struct AcademicChange {
    pub attendance_percent: Option<f64>,
    pub cgpa: Option<f64>,
    pub assignments_completed: Option<u32>,
    pub assignments_total: Option<u32>,
    pub subjects: Vec<String>,
    pub mentor_note: Option<String>,
    pub risk_score: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Import,
    AcademicUpdate,
    ManualCapture,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Import => "import",
            SnapshotSource::AcademicUpdate => "academic_update",
            SnapshotSource::ManualCapture => "manual_capture",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "import" => Some(SnapshotSource::Import),
            "academic_update" => Some(SnapshotSource::AcademicUpdate),
            "manual_capture" => Some(SnapshotSource::ManualCapture),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSnapshot {
    pub id: Uuid,
    pub student_id: Uuid,
    pub risk_score: f64,
    pub source: SnapshotSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub tier: Option<RiskTier>,
    pub mentor_id: Option<Uuid>,
}

impl StudentQuery {
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Clamps paging to a 1-based page and a page size within bounds.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.page_size = self.page_size.clamp(1, Self::MAX_PAGE_SIZE);
        self.search = self
            .search
            .map(|search| search.trim().to_string())
            .filter(|search| !search.is_empty());
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl StudentPage {
    pub fn new(data: Vec<StudentSummary>, total: u64, query: &StudentQuery) -> Self {
        let page_size = u64::from(query.page_size.max(1));
        Self {
            data,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages: total.div_ceil(page_size).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPage {
    pub data: Vec<StudentSummary>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

/// A stored version of the risk weights and tier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskModelConfig {
    pub id: Uuid,
    pub version: i32,
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub fn normalize_subjects<I, S>(subjects: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    subjects
        .into_iter()
        .map(|subject| subject.as_ref().trim().to_string())
        .filter(|subject| !subject.is_empty())
        .take(MAX_SUBJECTS)
        .collect()
}
