use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AcademicChange, ImportRow, RiskModelConfig, RiskSnapshot, Student, StudentPage, StudentQuery,
};
use crate::risk::{RiskThresholds, RiskWeights};

/// Codes and lower-cased emails already on record, used for import
/// duplicate detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingKeys {
    pub codes: HashSet<String>,
    pub emails: HashSet<String>,
}

/// Persistence for students and risk configuration. Every operation takes
/// the store explicitly; nothing holds a process-wide client.
#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn existing_keys(&self) -> Result<ExistingKeys, StoreError>;

    /// Inserts all rows or none of them. Rows carrying a risk score also get
    /// an `import` snapshot.
    async fn insert_students(&self, rows: &[ImportRow]) -> Result<usize, StoreError>;

    async fn find_student(&self, id: Uuid) -> Result<Option<Student>, StoreError>;

    /// Locks the student, derives the change from its current values with
    /// `merge`, writes the academic fields and risk, and appends an
    /// `academic_update` snapshot.
    async fn apply_academic_change(
        &self,
        id: Uuid,
        merge: &(dyn for<'s> Fn(&'s Student) -> AcademicChange + Send + Sync),
    ) -> Result<Student, StoreError>;

    async fn set_mentor(&self, id: Uuid, mentor_id: Option<Uuid>) -> Result<Student, StoreError>;

    async fn list_students(
        &self,
        query: &StudentQuery,
        thresholds: &RiskThresholds,
    ) -> Result<StudentPage, StoreError>;

    async fn all_students(&self, mentor_id: Option<Uuid>) -> Result<Vec<Student>, StoreError>;

    async fn risk_history(&self, student_id: Uuid) -> Result<Vec<RiskSnapshot>, StoreError>;

    /// Appends a `manual_capture` snapshot for every scored student.
    async fn capture_snapshots(&self, at: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn active_risk_config(&self) -> Result<Option<RiskModelConfig>, StoreError>;

    /// Stores a new active config version, retiring the previous one.
    async fn save_risk_config(
        &self,
        weights: RiskWeights,
        thresholds: RiskThresholds,
    ) -> Result<RiskModelConfig, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use parking_lot::Mutex;

    use super::*;
    use crate::models::SnapshotSource;

    #[derive(Default)]
    struct State {
        students: Vec<Student>,
        snapshots: Vec<RiskSnapshot>,
        configs: Vec<RiskModelConfig>,
    }

    /// In-memory store for exercising the service layer.
    #[derive(Default)]
    pub struct MemoryStore {
        state: Mutex<State>,
        fail_on_code: Mutex<Option<String>>,
    }

    impl MemoryStore {
        pub fn with_students(students: Vec<Student>) -> Self {
            let store = Self::default();
            store.state.lock().students = students;
            store
        }

        /// Makes the next insert of this student code fail mid-batch.
        pub fn fail_inserting(&self, code: &str) {
            *self.fail_on_code.lock() = Some(code.to_string());
        }

        pub fn students(&self) -> Vec<Student> {
            self.state.lock().students.clone()
        }

        pub fn snapshots(&self) -> Vec<RiskSnapshot> {
            self.state.lock().snapshots.clone()
        }
    }

    fn matches(student: &Student, query: &StudentQuery, thresholds: &RiskThresholds) -> bool {
        if query.mentor_id.is_some() && student.mentor_id != query.mentor_id {
            return false;
        }
        if let Some(tier) = query.tier {
            if thresholds.classify(student.risk_score) != tier {
                return false;
            }
        }
        match &query.search {
            Some(search) => student.matches_search(search),
            None => true,
        }
    }

    #[async_trait]
    impl StudentStore for MemoryStore {
        async fn existing_keys(&self) -> Result<ExistingKeys, StoreError> {
            let state = self.state.lock();
            Ok(ExistingKeys {
                codes: state.students.iter().map(|s| s.student_code.clone()).collect(),
                emails: state.students.iter().map(|s| s.email.to_lowercase()).collect(),
            })
        }

        async fn insert_students(&self, rows: &[ImportRow]) -> Result<usize, StoreError> {
            let fail_on = self.fail_on_code.lock().clone();
            let mut state = self.state.lock();
            let mut students = Vec::with_capacity(rows.len());
            let mut snapshots = Vec::new();
            let now = Utc::now();

            for row in rows {
                if fail_on.as_deref() == Some(row.student_code.as_str()) {
                    return Err(StoreError::Conflict(row.student_code.clone()));
                }
                let id = Uuid::new_v4();
                students.push(Student {
                    id,
                    student_code: row.student_code.clone(),
                    name: row.name.clone(),
                    email: row.email.clone(),
                    program: row.program.clone(),
                    year: row.year,
                    mentor_id: None,
                    attendance_percent: row.attendance_percent,
                    cgpa: row.cgpa,
                    assignments_completed: row.assignments_completed,
                    assignments_total: row.assignments_total,
                    subjects: row.subjects.clone().unwrap_or_default(),
                    mentor_note: row.mentor_academic_note.clone(),
                    risk_score: row.risk_score,
                    last_risk_updated: row.risk_score.map(|_| now),
                    last_academic_update: row.has_academics().then_some(now),
                    created_at: now,
                });
                if let Some(score) = row.risk_score {
                    snapshots.push(RiskSnapshot {
                        id: Uuid::new_v4(),
                        student_id: id,
                        risk_score: score,
                        source: SnapshotSource::Import,
                        created_at: now,
                    });
                }
            }

            let inserted = students.len();
            state.students.extend(students);
            state.snapshots.extend(snapshots);
            Ok(inserted)
        }

        async fn find_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
            Ok(self.state.lock().students.iter().find(|s| s.id == id).cloned())
        }

        async fn apply_academic_change(
            &self,
            id: Uuid,
            merge: &(dyn for<'s> Fn(&'s Student) -> AcademicChange + Send + Sync),
        ) -> Result<Student, StoreError> {
            let mut state = self.state.lock();
            let student = state
                .students
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(StoreError::NotFound(id))?;
            let change = merge(&*student);

            student.attendance_percent = change.attendance_percent;
            student.cgpa = change.cgpa;
            student.assignments_completed = change.assignments_completed;
            student.assignments_total = change.assignments_total;
            student.subjects = change.subjects.clone();
            student.mentor_note = change.mentor_note.clone();
            student.risk_score = Some(change.risk_score);
            student.last_risk_updated = Some(change.updated_at);
            student.last_academic_update = Some(change.updated_at);
            let updated = student.clone();

            state.snapshots.push(RiskSnapshot {
                id: Uuid::new_v4(),
                student_id: id,
                risk_score: change.risk_score,
                source: SnapshotSource::AcademicUpdate,
                created_at: change.updated_at,
            });
            Ok(updated)
        }

        async fn set_mentor(
            &self,
            id: Uuid,
            mentor_id: Option<Uuid>,
        ) -> Result<Student, StoreError> {
            let mut state = self.state.lock();
            let student = state
                .students
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(StoreError::NotFound(id))?;
            student.mentor_id = mentor_id;
            Ok(student.clone())
        }

        async fn list_students(
            &self,
            query: &StudentQuery,
            thresholds: &RiskThresholds,
        ) -> Result<StudentPage, StoreError> {
            let state = self.state.lock();
            let mut matching: Vec<&Student> = state
                .students
                .iter()
                .filter(|s| matches(s, query, thresholds))
                .collect();
            matching.sort_by_key(|s| s.created_at);

            let total = matching.len() as u64;
            let data = matching
                .into_iter()
                .skip(query.offset() as usize)
                .take(query.page_size as usize)
                .map(|s| s.summary(thresholds))
                .collect();
            Ok(StudentPage::new(data, total, query))
        }

        async fn all_students(&self, mentor_id: Option<Uuid>) -> Result<Vec<Student>, StoreError> {
            Ok(self
                .state
                .lock()
                .students
                .iter()
                .filter(|s| mentor_id.is_none() || s.mentor_id == mentor_id)
                .cloned()
                .collect())
        }

        async fn risk_history(&self, student_id: Uuid) -> Result<Vec<RiskSnapshot>, StoreError> {
            Ok(self
                .state
                .lock()
                .snapshots
                .iter()
                .filter(|s| s.student_id == student_id)
                .cloned()
                .collect())
        }

        async fn capture_snapshots(&self, at: DateTime<Utc>) -> Result<usize, StoreError> {
            let mut state = self.state.lock();
            let captured: Vec<RiskSnapshot> = state
                .students
                .iter()
                .filter_map(|student| {
                    student.risk_score.map(|risk_score| RiskSnapshot {
                        id: Uuid::new_v4(),
                        student_id: student.id,
                        risk_score,
                        source: SnapshotSource::ManualCapture,
                        created_at: at,
                    })
                })
                .collect();
            let inserted = captured.len();
            state.snapshots.extend(captured);
            Ok(inserted)
        }

        async fn active_risk_config(&self) -> Result<Option<RiskModelConfig>, StoreError> {
            Ok(self.state.lock().configs.iter().find(|c| c.active).cloned())
        }

        async fn save_risk_config(
            &self,
            weights: RiskWeights,
            thresholds: RiskThresholds,
        ) -> Result<RiskModelConfig, StoreError> {
            let mut state = self.state.lock();
            let version = state.configs.iter().map(|c| c.version).max().unwrap_or(0) + 1;
            for config in state.configs.iter_mut() {
                config.active = false;
            }
            let config = RiskModelConfig {
                id: Uuid::new_v4(),
                version,
                weights,
                thresholds,
                active: true,
                created_at: Utc::now(),
            };
            state.configs.push(config.clone());
            Ok(config)
        }
    }
}
