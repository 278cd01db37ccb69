use serde::Serialize;
use uuid::Uuid;

use crate::models::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Counselor,
    Mentor,
    Viewer,
}

/// Accepted role spellings. `teacher` predates the mentor role and is still
/// carried by older accounts.
const ROLE_ALIASES: [(&str, Role); 5] = [
    ("admin", Role::Admin),
    ("counselor", Role::Counselor),
    ("mentor", Role::Mentor),
    ("teacher", Role::Mentor),
    ("viewer", Role::Viewer),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct RoleParseError(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Counselor => "counselor",
            Role::Mentor => "mentor",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ROLE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, role)| *role)
            .ok_or_else(|| RoleParseError(value.to_string()))
    }
}

/// The user an operation is performed on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    fn is_assigned(&self, student: &Student) -> bool {
        student.mentor_id == Some(self.id)
    }
}

pub fn can_view(actor: &Actor, student: &Student) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Mentor | Role::Counselor => actor.is_assigned(student),
        Role::Viewer => false,
    }
}

/// Mentors may edit unassigned students as well as their own.
pub fn can_edit_academics(actor: &Actor, student: &Student) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Mentor => student.mentor_id.is_none() || actor.is_assigned(student),
        Role::Counselor | Role::Viewer => false,
    }
}

pub fn can_import(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

pub fn can_configure_risk(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

/// `mentor_id` of `None` unassigns. A mentor may only claim a student for
/// themselves, and re-claiming their own student is allowed.
pub fn can_assign(actor: &Actor, student: &Student, mentor_id: Option<Uuid>) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Mentor => {
            mentor_id == Some(actor.id)
                && (student.mentor_id.is_none() || actor.is_assigned(student))
        }
        Role::Counselor | Role::Viewer => false,
    }
}

pub fn can_capture_snapshots(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    AssignedTo(Uuid),
}

pub fn list_scope(actor: &Actor) -> Option<ListScope> {
    match actor.role {
        Role::Admin => Some(ListScope::All),
        Role::Mentor | Role::Counselor => Some(ListScope::AssignedTo(actor.id)),
        Role::Viewer => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn student(mentor_id: Option<Uuid>) -> Student {
        Student {
            id: Uuid::new_v4(),
            student_code: "S1001".to_string(),
            name: "Jane Doe".to_string(),
            email: "jane.doe@example.edu".to_string(),
            program: Some("B.Tech CSE".to_string()),
            year: Some(1),
            mentor_id,
            attendance_percent: None,
            cgpa: None,
            assignments_completed: None,
            assignments_total: None,
            subjects: Vec::new(),
            mentor_note: None,
            risk_score: Some(0.42),
            last_risk_updated: None,
            last_academic_update: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn legacy_teacher_role_maps_to_mentor() {
        assert_eq!("teacher".parse::<Role>(), Ok(Role::Mentor));
        assert_eq!(" Mentor ".parse::<Role>(), Ok(Role::Mentor));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(
            "superuser".parse::<Role>(),
            Err(RoleParseError("superuser".to_string()))
        );
    }

    #[test]
    fn mentors_only_edit_own_or_unassigned_students() {
        let mentor = Actor::new(Uuid::new_v4(), Role::Mentor);
        assert!(can_edit_academics(&mentor, &student(None)));
        assert!(can_edit_academics(&mentor, &student(Some(mentor.id))));
        assert!(!can_edit_academics(&mentor, &student(Some(Uuid::new_v4()))));
    }

    #[test]
    fn counselors_view_but_never_edit() {
        let counselor = Actor::new(Uuid::new_v4(), Role::Counselor);
        let assigned = student(Some(counselor.id));
        assert!(can_view(&counselor, &assigned));
        assert!(!can_view(&counselor, &student(None)));
        assert!(!can_edit_academics(&counselor, &assigned));
    }

    #[test]
    fn admin_has_unrestricted_access() {
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let owned = student(Some(Uuid::new_v4()));
        assert!(can_view(&admin, &owned));
        assert!(can_edit_academics(&admin, &owned));
        assert!(can_import(&admin));
        assert!(can_configure_risk(&admin));
        assert!(can_assign(&admin, &owned, Some(Uuid::new_v4())));
        assert!(can_assign(&admin, &owned, None));
        assert!(can_capture_snapshots(&admin));
        assert_eq!(list_scope(&admin), Some(ListScope::All));
    }

    #[test]
    fn mentors_may_only_claim_unassigned_students_for_themselves() {
        let mentor = Actor::new(Uuid::new_v4(), Role::Mentor);
        assert!(can_assign(&mentor, &student(None), Some(mentor.id)));
        assert!(!can_assign(&mentor, &student(None), Some(Uuid::new_v4())));
        assert!(!can_assign(&mentor, &student(Some(Uuid::new_v4())), Some(mentor.id)));
        assert!(!can_import(&mentor));
        assert!(!can_capture_snapshots(&mentor));
    }

    #[test]
    fn mentor_reclaiming_own_student_is_allowed_but_cannot_unassign() {
        let mentor = Actor::new(Uuid::new_v4(), Role::Mentor);
        let owned = student(Some(mentor.id));
        assert!(can_assign(&mentor, &owned, Some(mentor.id)));
        assert!(!can_assign(&mentor, &owned, None));
    }

    #[test]
    fn viewers_have_no_list_scope() {
        let viewer = Actor::new(Uuid::new_v4(), Role::Viewer);
        assert_eq!(list_scope(&viewer), None);
        let mentor = Actor::new(Uuid::new_v4(), Role::Mentor);
        assert_eq!(list_scope(&mentor), Some(ListScope::AssignedTo(mentor.id)));
    }
}
