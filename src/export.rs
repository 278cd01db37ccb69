use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::Student;
use crate::risk::{RiskThresholds, RiskTier};

pub const EXPORT_COLUMNS: [&str; 11] = [
    "id",
    "studentCode",
    "name",
    "email",
    "program",
    "year",
    "riskScore",
    "riskTier",
    "lastRiskUpdated",
    "mentorId",
    "createdAt",
];

#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    id: Uuid,
    student_code: &'a str,
    name: &'a str,
    email: &'a str,
    program: Option<&'a str>,
    year: Option<i32>,
    risk_score: Option<f64>,
    risk_tier: RiskTier,
    last_risk_updated: Option<String>,
    mentor_id: Option<Uuid>,
    created_at: String,
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Serialises students as CSV with a header row, even when there are no
/// students. Tiers are derived with `thresholds`.
pub fn students_csv(students: &[Student], thresholds: &RiskThresholds) -> csv::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;

    for student in students {
        writer.serialize(ExportRecord {
            id: student.id,
            student_code: &student.student_code,
            name: &student.name,
            email: &student.email,
            program: student.program.as_deref(),
            year: student.year,
            risk_score: student.risk_score,
            risk_tier: thresholds.classify(student.risk_score),
            last_risk_updated: student.last_risk_updated.map(timestamp),
            mentor_id: student.mentor_id,
            created_at: timestamp(student.created_at),
        })?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|err| csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
}

/// File name for an export generated at `at`.
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("students_export_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn student(code: &str, name: &str, risk_score: Option<f64>) -> Student {
        Student {
            id: Uuid::nil(),
            student_code: code.to_string(),
            name: name.to_string(),
            email: format!("{}@example.edu", code.to_lowercase()),
            program: None,
            year: Some(2),
            mentor_id: None,
            attendance_percent: None,
            cgpa: None,
            assignments_completed: None,
            assignments_total: None,
            subjects: Vec::new(),
            mentor_note: None,
            risk_score,
            last_risk_updated: None,
            last_academic_update: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn empty_export_still_has_header() {
        let csv = students_csv(&[], &RiskThresholds::default()).unwrap();
        assert_eq!(csv.trim_end(), EXPORT_COLUMNS.join(","));
    }

    #[test]
    fn rows_carry_derived_tier_and_blank_missing_values() {
        let students = vec![
            student("S1", "Jane", Some(0.7)),
            student("S2", "Doe, John", None),
        ];
        let csv = students_csv(&students, &RiskThresholds::default()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "00000000-0000-0000-0000-000000000000,S1,Jane,s1@example.edu,,2,0.7,high,,,2024-03-01T09:30:00.000Z"
        );
        assert!(lines[2].contains("\"Doe, John\""));
        assert!(lines[2].contains(",,unknown,"));
    }

    #[test]
    fn file_name_uses_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(export_file_name(at), "students_export_20240301_090507.csv");
    }
}
