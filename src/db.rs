use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AcademicChange, ImportRow, RiskModelConfig, RiskSnapshot, SnapshotSource, Student,
    StudentPage, StudentQuery,
};
use crate::risk::{RiskModel, RiskThresholds, RiskTier, RiskWeights};
use crate::store::{ExistingKeys, StudentStore};

const STUDENT_COLUMNS: &str = "id, student_code, name, email, program, year, mentor_id, \
     attendance_percent, cgpa, assignments_completed, assignments_total, subjects, \
     mentor_note, risk_score, last_risk_updated, last_academic_update, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, model: &RiskModel) -> anyhow::Result<usize> {
    let students = vec![
        (
            Uuid::parse_str("6f1c2a8e-3b7d-4c55-9a41-0e2d7b3c9f10")?,
            "S1001",
            "Aarav Sharma",
            "aarav.sharma@example.edu",
            "B.Tech CSE",
            2,
            (58.0, 5.2, 4u32, 10u32, "Struggling with data structures, frequently absent"),
        ),
        (
            Uuid::parse_str("0b9e4d1f-7c2a-4e8b-b6d3-5a1f9c2e7d44")?,
            "S1002",
            "Diya Patel",
            "diya.patel@example.edu",
            "BBA",
            1,
            (91.0, 8.7, 9, 10, "Consistent and engaged"),
        ),
        (
            Uuid::parse_str("c3a7e5b2-1d4f-4a9c-8e6b-2f0d3c7a1b55")?,
            "S1003",
            "Kabir Singh",
            "kabir.singh@example.edu",
            "B.Tech ECE",
            3,
            (72.0, 6.1, 6, 10, "Missed two lab submissions"),
        ),
    ];

    let mut inserted = 0usize;
    let now = Utc::now();
    for (id, code, name, email, program, year, academics) in students {
        let (attendance, cgpa, completed, total, note) = academics;
        let risk = model.assess(attendance, cgpa, completed, total, note);

        let result = sqlx::query(
            r#"
            INSERT INTO pathkeepers.students
            (id, student_code, name, email, program, year, attendance_percent, cgpa,
             assignments_completed, assignments_total, mentor_note, risk_score,
             last_risk_updated, last_academic_update)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (student_code) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .bind(email)
        .bind(program)
        .bind(year)
        .bind(attendance)
        .bind(cgpa)
        .bind(i32::try_from(completed)?)
        .bind(i32::try_from(total)?)
        .bind(note)
        .bind(risk.score)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("failed to seed student {code}"))?;

        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

/// Postgres-backed student store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.try_get("id")?,
        student_code: row.try_get("student_code")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        program: row.try_get("program")?,
        year: row.try_get("year")?,
        mentor_id: row.try_get("mentor_id")?,
        attendance_percent: row.try_get("attendance_percent")?,
        cgpa: row.try_get("cgpa")?,
        assignments_completed: row
            .try_get::<Option<i32>, _>("assignments_completed")?
            .map(non_negative),
        assignments_total: row
            .try_get::<Option<i32>, _>("assignments_total")?
            .map(non_negative),
        subjects: row.try_get("subjects")?,
        mentor_note: row.try_get("mentor_note")?,
        risk_score: row.try_get("risk_score")?,
        last_risk_updated: row.try_get("last_risk_updated")?,
        last_academic_update: row.try_get("last_academic_update")?,
        created_at: row.try_get("created_at")?,
    })
}

fn config_from_row(row: &PgRow) -> Result<RiskModelConfig, sqlx::Error> {
    let weights: Json<RiskWeights> = row.try_get("weights")?;
    let thresholds: Json<RiskThresholds> = row.try_get("thresholds")?;
    Ok(RiskModelConfig {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        weights: weights.0,
        thresholds: thresholds.0,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn non_negative(value: i32) -> u32 {
    value.max(0) as u32
}

fn count_column(value: Option<u32>, column: &'static str) -> Result<Option<i32>, StoreError> {
    value
        .map(|count| i32::try_from(count).map_err(|_| StoreError::OutOfRange(column)))
        .transpose()
}

fn conflict_or(err: sqlx::Error, what: &str) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505");
    if unique_violation {
        StoreError::Conflict(what.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    query: &StudentQuery,
    thresholds: &RiskThresholds,
) {
    builder.push(" WHERE TRUE");

    if let Some(mentor_id) = query.mentor_id {
        builder.push(" AND mentor_id = ").push_bind(mentor_id);
    }

    if let Some(search) = &query.search {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR student_code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    match query.tier {
        Some(RiskTier::High) => {
            builder.push(" AND risk_score >= ").push_bind(thresholds.high);
        }
        Some(RiskTier::Medium) => {
            builder
                .push(" AND risk_score >= ")
                .push_bind(thresholds.medium)
                .push(" AND risk_score < ")
                .push_bind(thresholds.high);
        }
        Some(RiskTier::Low) => {
            builder.push(" AND risk_score < ").push_bind(thresholds.medium);
        }
        Some(RiskTier::Unknown) => {
            builder.push(" AND risk_score IS NULL");
        }
        None => {}
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn existing_keys(&self) -> Result<ExistingKeys, StoreError> {
        let rows = sqlx::query("SELECT student_code, email FROM pathkeepers.students")
            .fetch_all(&self.pool)
            .await?;

        let mut keys = ExistingKeys::default();
        for row in rows {
            keys.codes.insert(row.try_get("student_code")?);
            let email: String = row.try_get("email")?;
            keys.emails.insert(email.to_lowercase());
        }
        Ok(keys)
    }

    async fn insert_students(&self, rows: &[ImportRow]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut inserted = 0usize;

        for row in rows {
            let id = Uuid::new_v4();
            let completed = count_column(row.assignments_completed, "assignments_completed")?;
            let total = count_column(row.assignments_total, "assignments_total")?;
            sqlx::query(
                r#"
                INSERT INTO pathkeepers.students
                (id, student_code, name, email, program, year, attendance_percent, cgpa,
                 assignments_completed, assignments_total, subjects, mentor_note, risk_score,
                 last_risk_updated, last_academic_update, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(id)
            .bind(&row.student_code)
            .bind(&row.name)
            .bind(&row.email)
            .bind(&row.program)
            .bind(row.year)
            .bind(row.attendance_percent)
            .bind(row.cgpa)
            .bind(completed)
            .bind(total)
            .bind(row.subjects.clone().unwrap_or_default())
            .bind(&row.mentor_academic_note)
            .bind(row.risk_score)
            .bind(row.risk_score.map(|_| now))
            .bind(row.has_academics().then_some(now))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|err| conflict_or(err, &row.student_code))?;

            if let Some(score) = row.risk_score {
                sqlx::query(
                    r#"
                    INSERT INTO pathkeepers.risk_snapshots (id, student_id, risk_score, source, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(id)
                .bind(score)
                .bind(SnapshotSource::Import.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM pathkeepers.students WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(student_from_row).transpose()?)
    }

    async fn apply_academic_change(
        &self,
        id: Uuid,
        merge: &(dyn for<'s> Fn(&'s Student) -> AcademicChange + Send + Sync),
    ) -> Result<Student, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM pathkeepers.students WHERE id = $1 FOR UPDATE"
        );
        let current = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let change = merge(&student_from_row(&current)?);

        let sql = format!(
            "UPDATE pathkeepers.students \
             SET attendance_percent = $2, cgpa = $3, assignments_completed = $4, \
                 assignments_total = $5, subjects = $6, mentor_note = $7, risk_score = $8, \
                 last_risk_updated = $9, last_academic_update = $9 \
             WHERE id = $1 \
             RETURNING {STUDENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(change.attendance_percent)
            .bind(change.cgpa)
            .bind(count_column(change.assignments_completed, "assignments_completed")?)
            .bind(count_column(change.assignments_total, "assignments_total")?)
            .bind(&change.subjects)
            .bind(&change.mentor_note)
            .bind(change.risk_score)
            .bind(change.updated_at)
            .fetch_one(&mut *tx)
            .await?;
        let student = student_from_row(&row)?;

        sqlx::query(
            r#"
            INSERT INTO pathkeepers.risk_snapshots (id, student_id, risk_score, source, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(change.risk_score)
        .bind(SnapshotSource::AcademicUpdate.as_str())
        .bind(change.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(student)
    }

    async fn set_mentor(&self, id: Uuid, mentor_id: Option<Uuid>) -> Result<Student, StoreError> {
        let sql = format!(
            "UPDATE pathkeepers.students SET mentor_id = $2 WHERE id = $1 RETURNING {STUDENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(mentor_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Ok(student_from_row(&row)?)
    }

    async fn list_students(
        &self,
        query: &StudentQuery,
        thresholds: &RiskThresholds,
    ) -> Result<StudentPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM pathkeepers.students");
        push_filters(&mut count, query, thresholds);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {STUDENT_COLUMNS} FROM pathkeepers.students"
        ));
        push_filters(&mut select, query, thresholds);
        select
            .push(" ORDER BY created_at ASC LIMIT ")
            .push_bind(i64::from(query.page_size))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let data = rows
            .iter()
            .map(|row| student_from_row(row).map(|student| student.summary(thresholds)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StudentPage::new(data, total.max(0) as u64, query))
    }

    async fn all_students(&self, mentor_id: Option<Uuid>) -> Result<Vec<Student>, StoreError> {
        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {STUDENT_COLUMNS} FROM pathkeepers.students"
        ));
        if let Some(mentor_id) = mentor_id {
            select.push(" WHERE mentor_id = ").push_bind(mentor_id);
        }
        select.push(" ORDER BY created_at ASC");

        let rows = select.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(student_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn risk_history(&self, student_id: Uuid) -> Result<Vec<RiskSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, risk_score, source, created_at
            FROM pathkeepers.risk_snapshots
            WHERE student_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.try_get("source")?;
            let Some(source) = SnapshotSource::parse(&source) else {
                tracing::warn!(%student_id, source = %source, "skipping snapshot with unknown source");
                continue;
            };
            snapshots.push(RiskSnapshot {
                id: row.try_get("id")?,
                student_id: row.try_get("student_id")?,
                risk_score: row.try_get("risk_score")?,
                source,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(snapshots)
    }

    async fn capture_snapshots(&self, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO pathkeepers.risk_snapshots (id, student_id, risk_score, source, created_at)
            SELECT gen_random_uuid(), id, risk_score, $1, $2
            FROM pathkeepers.students
            WHERE risk_score IS NOT NULL
            "#,
        )
        .bind(SnapshotSource::ManualCapture.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn active_risk_config(&self) -> Result<Option<RiskModelConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, version, weights, thresholds, active, created_at
            FROM pathkeepers.risk_model_configs
            WHERE active
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(config_from_row).transpose()?)
    }

    async fn save_risk_config(
        &self,
        weights: RiskWeights,
        thresholds: RiskThresholds,
    ) -> Result<RiskModelConfig, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE pathkeepers.risk_model_configs SET active = FALSE WHERE active")
            .execute(&mut *tx)
            .await?;
        let version: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM pathkeepers.risk_model_configs",
        )
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO pathkeepers.risk_model_configs (id, version, weights, thresholds, active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING id, version, weights, thresholds, active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(version)
        .bind(Json(weights))
        .bind(Json(thresholds))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| conflict_or(err, "risk model config version"))?;
        let config = config_from_row(&row)?;

        tx.commit().await?;
        Ok(config)
    }
}
