use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ServiceError, StoreError};
use crate::export;
use crate::import::{validate_import, ImportReport};
use crate::models::{
    normalize_subjects, truncate_chars, AcademicChange, AcademicUpdate, RiskModelConfig,
    RiskSnapshot, Student, StudentAcademicRecord, StudentPage, StudentQuery,
    MAX_ASSIGNMENT_COUNT, MAX_NOTE_CHARS,
};
use crate::risk::{RiskModel, RiskThresholds, RiskWeights};
use crate::roles::{self, Actor, ListScope};
use crate::store::StudentStore;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub student: Student,
    pub record: StudentAcademicRecord,
}

/// The active risk model, or the built-in defaults when none is stored.
pub async fn load_risk_model(
    store: &dyn StudentStore,
    cgpa_scale: f64,
) -> Result<RiskModel, ServiceError> {
    let model = match store.active_risk_config().await? {
        Some(config) => {
            tracing::debug!(version = config.version, "using stored risk model");
            RiskModel {
                weights: config.weights,
                thresholds: config.thresholds,
                cgpa_scale,
            }
        }
        None => RiskModel::default().with_cgpa_scale(cgpa_scale),
    };
    Ok(model)
}

pub fn check_risk_model(
    weights: &RiskWeights,
    thresholds: &RiskThresholds,
) -> Result<(), ServiceError> {
    let parts = [
        weights.attendance,
        weights.gpa,
        weights.assignments,
        weights.notes,
    ];
    if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ServiceError::InvalidRiskModel(
            "weights must be non-negative".to_string(),
        ));
    }
    if weights.total() <= 0.0 {
        return Err(ServiceError::InvalidRiskModel(
            "weights must sum to a positive value".to_string(),
        ));
    }
    let ordered = 0.0 <= thresholds.medium
        && thresholds.medium <= thresholds.high
        && thresholds.high <= 1.0;
    if !ordered {
        return Err(ServiceError::InvalidRiskModel(
            "thresholds must satisfy 0 <= medium <= high <= 1".to_string(),
        ));
    }
    Ok(())
}

pub async fn save_risk_model(
    store: &dyn StudentStore,
    actor: &Actor,
    weights: RiskWeights,
    thresholds: RiskThresholds,
) -> Result<RiskModelConfig, ServiceError> {
    if !roles::can_configure_risk(actor) {
        return Err(ServiceError::Forbidden("only admins may configure the risk model"));
    }
    check_risk_model(&weights, &thresholds)?;

    let config = store.save_risk_config(weights, thresholds).await?;
    tracing::info!(version = config.version, actor = %actor.id, "risk model saved");
    Ok(config)
}

/// Validates an import and, unless this is a dry run, inserts the valid rows
/// in a single transaction. A report with errors is never committed.
pub async fn run_import(
    store: &dyn StudentStore,
    model: &RiskModel,
    actor: &Actor,
    csv_text: &str,
    dry_run: bool,
) -> Result<ImportReport, ServiceError> {
    if !roles::can_import(actor) {
        return Err(ServiceError::Forbidden("only admins may import students"));
    }

    let existing = store.existing_keys().await?;
    let mut report = validate_import(csv_text, &existing.codes, &existing.emails);
    report.dry_run = dry_run;

    if !report.errors.is_empty() {
        tracing::info!(
            total = report.counts.total,
            errors = report.counts.errors,
            "import rejected by validation"
        );
        return Ok(report);
    }

    report.attach_inferred_risk(model);
    if dry_run {
        tracing::info!(valid = report.counts.valid, "import dry run");
        return Ok(report);
    }

    let created = store.insert_students(&report.rows).await?;
    report.counts.created = created;
    report.counts.skipped = report.counts.total - created;
    tracing::info!(created, actor = %actor.id, "import committed");
    Ok(report)
}

pub async fn update_academics(
    store: &dyn StudentStore,
    model: &RiskModel,
    actor: &Actor,
    student_id: Uuid,
    update: AcademicUpdate,
) -> Result<UpdateOutcome, ServiceError> {
    if update.is_empty() {
        return Err(ServiceError::NoEditableFields);
    }
    check_update(&update)?;

    let student = store
        .find_student(student_id)
        .await?
        .ok_or(ServiceError::NotFound(student_id))?;
    if !roles::can_edit_academics(actor, &student) {
        tracing::warn!(role = %actor.role, %student_id, "academic update denied");
        return Err(ServiceError::Forbidden("student is assigned to another mentor"));
    }

    let updated_at = Utc::now();
    let student = store
        .apply_academic_change(student_id, &|current: &Student| {
            merge_update(current, &update, model, updated_at)
        })
        .await
        .map_err(|err| match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        })?;
    let record = student.academic_record(&model.thresholds);
    tracing::info!(
        %student_id,
        risk_score = record.risk_score,
        tier = %record.risk_tier,
        "academic record updated"
    );
    Ok(UpdateOutcome { student, record })
}

fn check_update(update: &AcademicUpdate) -> Result<(), ServiceError> {
    let finite = [update.attendance_percent, update.cgpa]
        .into_iter()
        .flatten()
        .all(f64::is_finite);
    if !finite {
        return Err(ServiceError::InvalidAcademics(
            "attendance and cgpa must be finite numbers",
        ));
    }
    let counts_fit = [update.assignments_completed, update.assignments_total]
        .into_iter()
        .flatten()
        .all(|count| count <= MAX_ASSIGNMENT_COUNT);
    if !counts_fit {
        return Err(ServiceError::InvalidAcademics("assignment counts are too large"));
    }
    Ok(())
}

fn merge_update(
    student: &Student,
    update: &AcademicUpdate,
    model: &RiskModel,
    updated_at: DateTime<Utc>,
) -> AcademicChange {
    let attendance_percent = update
        .attendance_percent
        .map(|value| value.clamp(0.0, 100.0))
        .or(student.attendance_percent);
    let cgpa = update
        .cgpa
        .map(|value| value.clamp(0.0, model.cgpa_scale))
        .or(student.cgpa);
    let assignments_completed = update.assignments_completed.or(student.assignments_completed);
    let assignments_total = update.assignments_total.or(student.assignments_total);
    let subjects = match &update.subjects {
        Some(subjects) => normalize_subjects(subjects),
        None => student.subjects.clone(),
    };
    let mentor_note = update
        .mentor_note
        .as_deref()
        .map(|note| truncate_chars(note, MAX_NOTE_CHARS))
        .or_else(|| student.mentor_note.clone());

    let risk = model.assess(
        attendance_percent.unwrap_or(0.0),
        cgpa.unwrap_or(0.0),
        assignments_completed.unwrap_or(0),
        assignments_total.unwrap_or(0),
        mentor_note.as_deref().unwrap_or(""),
    );

    AcademicChange {
        attendance_percent,
        cgpa,
        assignments_completed,
        assignments_total,
        subjects,
        mentor_note,
        risk_score: risk.score,
        updated_at,
    }
}

pub async fn list_students(
    store: &dyn StudentStore,
    thresholds: &RiskThresholds,
    actor: &Actor,
    query: StudentQuery,
) -> Result<StudentPage, ServiceError> {
    let mut query = query.normalized();
    match roles::list_scope(actor) {
        Some(ListScope::All) => {}
        Some(ListScope::AssignedTo(mentor_id)) => query.mentor_id = Some(mentor_id),
        None => return Err(ServiceError::Forbidden("role may not list students")),
    }
    Ok(store.list_students(&query, thresholds).await?)
}

/// Students visible to the actor, for analytics.
pub async fn visible_students(
    store: &dyn StudentStore,
    actor: &Actor,
) -> Result<Vec<Student>, ServiceError> {
    match roles::list_scope(actor) {
        Some(ListScope::All) => Ok(store.all_students(None).await?),
        Some(ListScope::AssignedTo(mentor_id)) => Ok(store.all_students(Some(mentor_id)).await?),
        None => Err(ServiceError::Forbidden("role may not view analytics")),
    }
}

pub async fn view_student(
    store: &dyn StudentStore,
    actor: &Actor,
    student_id: Uuid,
) -> Result<Student, ServiceError> {
    let student = store
        .find_student(student_id)
        .await?
        .ok_or(ServiceError::NotFound(student_id))?;
    if !roles::can_view(actor, &student) {
        return Err(ServiceError::Forbidden("student is not assigned to you"));
    }
    Ok(student)
}

/// Visible students matching `search`, as CSV.
pub async fn export_students(
    store: &dyn StudentStore,
    thresholds: &RiskThresholds,
    actor: &Actor,
    search: Option<&str>,
) -> Result<String, ServiceError> {
    let mut students = visible_students(store, actor).await?;
    if let Some(search) = search.map(str::trim).filter(|search| !search.is_empty()) {
        students.retain(|student| student.matches_search(search));
    }
    let csv = export::students_csv(&students, thresholds)?;
    tracing::info!(rows = students.len(), role = %actor.role, "students exported");
    Ok(csv)
}

/// Sets or, with `None`, clears a student's mentor.
pub async fn assign_mentor(
    store: &dyn StudentStore,
    actor: &Actor,
    student_id: Uuid,
    mentor_id: Option<Uuid>,
) -> Result<Student, ServiceError> {
    let student = store
        .find_student(student_id)
        .await?
        .ok_or(ServiceError::NotFound(student_id))?;
    if !roles::can_assign(actor, &student, mentor_id) {
        return Err(ServiceError::Forbidden("cannot assign this student"));
    }
    if student.mentor_id == mentor_id {
        return Ok(student);
    }

    let student = store.set_mentor(student_id, mentor_id).await?;
    match mentor_id {
        Some(mentor_id) => tracing::info!(%student_id, %mentor_id, "mentor assigned"),
        None => tracing::info!(%student_id, "mentor unassigned"),
    }
    Ok(student)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOutcome {
    pub inserted: usize,
    pub captured_at: DateTime<Utc>,
}

/// Records the current score of every scored student as a snapshot.
pub async fn capture_snapshots(
    store: &dyn StudentStore,
    actor: &Actor,
) -> Result<CaptureOutcome, ServiceError> {
    if !roles::can_capture_snapshots(actor) {
        return Err(ServiceError::Forbidden("only admins may capture risk snapshots"));
    }
    let captured_at = Utc::now();
    let inserted = store.capture_snapshots(captured_at).await?;
    tracing::info!(inserted, "risk snapshots captured");
    Ok(CaptureOutcome {
        inserted,
        captured_at,
    })
}

pub async fn risk_history(
    store: &dyn StudentStore,
    actor: &Actor,
    student_id: Uuid,
) -> Result<Vec<RiskSnapshot>, ServiceError> {
    view_student(store, actor, student_id).await?;
    Ok(store.risk_history(student_id).await?)
}
