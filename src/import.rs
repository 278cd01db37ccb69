use std::collections::HashSet;

use serde::{Deserialize, Serialize, Serializer};

use crate::models::{
    normalize_subjects, truncate_chars, ImportRow, MAX_ASSIGNMENT_COUNT, MAX_NOTE_CHARS,
};
use crate::risk::RiskModel;

pub const TEMPLATE_CSV: &str = "studentCode,name,email,program,year,riskScore\n\
S1001,Jane Doe,jane.doe@example.edu,B.Tech CSE,1,0.42\n\
S1002,John Smith,john.smith@example.edu,BBA,2,0.15\n";

pub const TEMPLATE_COLUMNS: [(&str, bool, &str); 6] = [
    ("studentCode", true, "Unique identifier (string)"),
    ("name", true, ""),
    ("email", true, ""),
    ("program", false, ""),
    ("year", false, "Integer 0-12"),
    ("riskScore", false, "0-1 decimal, optional initial risk"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowError {
    MissingRequired,
    DuplicateStudentCode,
    DuplicateEmail,
    InvalidYear,
    InvalidRiskScore,
    InvalidAttendance,
    InvalidCgpa,
    InvalidAssignmentsCompleted,
    InvalidAssignmentsTotal,
    Malformed,
}

impl RowError {
    pub fn message(&self) -> &'static str {
        match self {
            RowError::MissingRequired => "Missing required studentCode|name|email",
            RowError::DuplicateStudentCode => "Duplicate studentCode",
            RowError::DuplicateEmail => "Duplicate email",
            RowError::InvalidYear => "Invalid year",
            RowError::InvalidRiskScore => "Invalid riskScore",
            RowError::InvalidAttendance => "Invalid attendancePercent",
            RowError::InvalidCgpa => "Invalid cgpa",
            RowError::InvalidAssignmentsCompleted => "Invalid assignmentsCompleted",
            RowError::InvalidAssignmentsTotal => "Invalid assignmentsTotal",
            RowError::Malformed => "Malformed row",
        }
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl Serialize for RowError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportIssue {
    pub line: usize,
    pub error: RowError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub total: usize,
    pub valid: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub ok: bool,
    pub dry_run: bool,
    pub counts: ImportCounts,
    pub errors: Vec<ImportIssue>,
    pub rows: Vec<ImportRow>,
}

impl ImportReport {
    /// Fills in a risk score for rows that arrived without one.
    pub fn attach_inferred_risk(&mut self, model: &RiskModel) {
        for row in self.rows.iter_mut().filter(|row| row.risk_score.is_none()) {
            row.risk_score = Some(model.infer(&row.indicators()));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStudentRow {
    student_code: Option<String>,
    name: Option<String>,
    email: Option<String>,
    program: Option<String>,
    year: Option<String>,
    risk_score: Option<String>,
    attendance_percent: Option<String>,
    cgpa: Option<String>,
    assignments_completed: Option<String>,
    assignments_total: Option<String>,
    subjects: Option<String>,
    mentor_academic_note: Option<String>,
}

/// Validates CSV text against the known student codes and emails.
///
/// Never persists anything and never fails: malformed input is reported in
/// `errors` with the 1-based file line (the header is line 1). Accepted rows
/// join the in-batch duplicate sets, so later repeats of them are rejected.
pub fn validate_import(
    csv_text: &str,
    existing_codes: &HashSet<String>,
    existing_emails: &HashSet<String>,
) -> ImportReport {
    let existing_emails: HashSet<String> = existing_emails
        .iter()
        .map(|email| email.to_lowercase())
        .collect();
    let csv_text = csv_text.strip_prefix('\u{feff}').unwrap_or(csv_text);

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let mut errors = Vec::new();
    let mut rows = Vec::new();
    let mut seen_codes: HashSet<String> = HashSet::new();
    let mut seen_emails: HashSet<String> = HashSet::new();
    let mut total = 0usize;

    for (idx, result) in reader.deserialize::<RawStudentRow>().enumerate() {
        total += 1;
        let line = idx + 2;

        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(line, error = %err, "unreadable import row");
                errors.push(ImportIssue {
                    line,
                    error: RowError::Malformed,
                });
                continue;
            }
        };

        match check_row(raw, existing_codes, &existing_emails, &seen_codes, &seen_emails) {
            Ok(row) => {
                seen_codes.insert(row.student_code.clone());
                seen_emails.insert(row.email.clone());
                rows.push(row);
            }
            Err(row_errors) => {
                errors.extend(
                    row_errors
                        .into_iter()
                        .map(|error| ImportIssue { line, error }),
                );
            }
        }
    }

    let valid = rows.len();
    tracing::debug!(total, valid, errors = errors.len(), "validated import");

    ImportReport {
        ok: errors.is_empty(),
        dry_run: true,
        counts: ImportCounts {
            total,
            valid,
            created: 0,
            skipped: total - valid,
            errors: errors.len(),
        },
        errors,
        rows,
    }
}

fn check_row(
    raw: RawStudentRow,
    existing_codes: &HashSet<String>,
    existing_emails: &HashSet<String>,
    seen_codes: &HashSet<String>,
    seen_emails: &HashSet<String>,
) -> Result<ImportRow, Vec<RowError>> {
    let mut row_errors = Vec::new();

    let code = non_empty(raw.student_code);
    let name = non_empty(raw.name);
    let email = non_empty(raw.email).map(|email| email.to_lowercase());

    if code.is_none() || name.is_none() || email.is_none() {
        row_errors.push(RowError::MissingRequired);
    }
    if let Some(code) = &code {
        if existing_codes.contains(code) || seen_codes.contains(code) {
            row_errors.push(RowError::DuplicateStudentCode);
        }
    }
    if let Some(email) = &email {
        if existing_emails.contains(email) || seen_emails.contains(email) {
            row_errors.push(RowError::DuplicateEmail);
        }
    }

    let year = parse_field(raw.year, &mut row_errors, RowError::InvalidYear, |value| {
        value.parse::<i32>().ok().filter(|year| (0..=12).contains(year))
    });
    let risk_score = parse_field(
        raw.risk_score,
        &mut row_errors,
        RowError::InvalidRiskScore,
        |value| parse_ranged_f64(value, 0.0, 1.0),
    );
    let attendance_percent = parse_field(
        raw.attendance_percent,
        &mut row_errors,
        RowError::InvalidAttendance,
        |value| parse_ranged_f64(value, 0.0, 100.0),
    );
    let cgpa = parse_field(raw.cgpa, &mut row_errors, RowError::InvalidCgpa, |value| {
        parse_ranged_f64(value, 0.0, 10.0)
    });
    let assignments_completed = parse_field(
        raw.assignments_completed,
        &mut row_errors,
        RowError::InvalidAssignmentsCompleted,
        parse_count,
    );
    let assignments_total = parse_field(
        raw.assignments_total,
        &mut row_errors,
        RowError::InvalidAssignmentsTotal,
        parse_count,
    );

    let (Some(student_code), Some(name), Some(email)) = (code, name, email) else {
        return Err(row_errors);
    };
    if !row_errors.is_empty() {
        return Err(row_errors);
    }

    let subjects = non_empty(raw.subjects)
        .map(|list| normalize_subjects(list.split(&[';', ','][..])))
        .filter(|subjects| !subjects.is_empty());
    let mentor_academic_note =
        non_empty(raw.mentor_academic_note).map(|note| truncate_chars(&note, MAX_NOTE_CHARS));

    Ok(ImportRow {
        student_code,
        name,
        email,
        program: non_empty(raw.program),
        year,
        risk_score,
        attendance_percent,
        cgpa,
        assignments_completed,
        assignments_total,
        subjects,
        mentor_academic_note,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_field<T>(
    value: Option<String>,
    row_errors: &mut Vec<RowError>,
    error: RowError,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Option<T> {
    let value = non_empty(value)?;
    let parsed = parse(&value);
    if parsed.is_none() {
        row_errors.push(error);
    }
    parsed
}

fn parse_count(value: &str) -> Option<u32> {
    value
        .parse::<u32>()
        .ok()
        .filter(|count| *count <= MAX_ASSIGNMENT_COUNT)
}

fn parse_ranged_f64(value: &str, min: f64, max: f64) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|number| *number >= min && *number <= max)
}
