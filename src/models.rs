use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::validation::Specs;

/// Cohort tag carried by students and snapshotted onto their sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pr,
    Ww,
    Un,
    Pe,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Pr, Category::Ww, Category::Un, Category::Pe];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pr => "pr",
            Category::Ww => "ww",
            Category::Un => "un",
            Category::Pe => "pe",
        }
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| AppError::Validation(format!("Invalid category: {}", s)))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    #[serde(rename = "Term 1")]
    Term1,
    #[serde(rename = "Term 2")]
    Term2,
    #[serde(rename = "Term 3")]
    Term3,
}

impl Term {
    pub const ALL: [Term; 3] = [Term::Term1, Term::Term2, Term::Term3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Term1 => "Term 1",
            Term::Term2 => "Term 2",
            Term::Term3 => "Term 3",
        }
    }
}

impl FromStr for Term {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Term::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Validation(format!("Invalid term: {}", s)))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 3] = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        AttendanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| AppError::Validation(format!("Invalid attendance status: {}", s)))
    }
}

/// Which table a session row lives in; decided by the student's PE flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Academic,
    Pe,
}

impl SessionKind {
    pub fn for_student(student: &Student) -> Self {
        if student.physical_education {
            SessionKind::Pe
        } else {
            SessionKind::Academic
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            SessionKind::Academic => "academic_sessions",
            SessionKind::Pe => "pe_sessions",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Academic => "academic",
            SessionKind::Pe => "pe",
        }
    }
}

impl FromStr for SessionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "academic" => Ok(SessionKind::Academic),
            "pe" => Ok(SessionKind::Pe),
            _ => Err(AppError::Validation(format!("Invalid session kind: {}", s))),
        }
    }
}

pub(crate) fn parse_stored_specs(raw: Option<String>) -> Option<Specs> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: i64,
    pub full_name: String,
    pub grade: String,
    pub category: Category,
    pub physical_education: bool,
    pub year: i64,
    pub school_id: i64,
    pub id_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub photo: Option<String>,
    pub parent_permission_pdf: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub full_name: Option<String>,
    pub grade: Option<String>,
    pub category: Option<String>,
    pub physical_education: Option<bool>,
    pub year: Option<i64>,
    pub school_id: Option<i64>,
    pub id_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub photo: Option<String>,
    pub parent_permission_pdf: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub deleted: Option<bool>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            full_name: db.full_name.unwrap_or_default(),
            grade: db.grade.unwrap_or_default(),
            category: db
                .category
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(Category::Un),
            physical_education: db.physical_education.unwrap_or_default(),
            year: db.year.unwrap_or_default(),
            school_id: db.school_id.unwrap_or_default(),
            id_number: db.id_number,
            date_of_birth: db.date_of_birth,
            photo: db.photo,
            parent_permission_pdf: db.parent_permission_pdf,
            created_at: db.created_at,
            deleted: db.deleted.unwrap_or_default(),
            deleted_at: db.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub story: Option<String>,
    pub role_id: i64,
    pub role: String,
    pub school_id: i64,
    pub photo: Option<String>,
    pub id_copy_pdf: Option<String>,
    pub cv_pdf: Option<String>,
    pub clearance_pdf: Option<String>,
    pub child_protection_pdf: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbWorker {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub story: Option<String>,
    pub role_id: Option<i64>,
    pub role: Option<String>,
    pub school_id: Option<i64>,
    pub photo: Option<String>,
    pub id_copy_pdf: Option<String>,
    pub cv_pdf: Option<String>,
    pub clearance_pdf: Option<String>,
    pub child_protection_pdf: Option<String>,
    pub deleted: Option<bool>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl From<DbWorker> for Worker {
    fn from(db: DbWorker) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            last_name: db.last_name.unwrap_or_default(),
            id_number: db.id_number,
            contact_number: db.contact_number,
            email: db.email,
            start_date: db.start_date,
            story: db.story,
            role_id: db.role_id.unwrap_or_default(),
            role: db.role.unwrap_or_default(),
            school_id: db.school_id.unwrap_or_default(),
            photo: db.photo,
            id_copy_pdf: db.id_copy_pdf,
            cv_pdf: db.cv_pdf,
            clearance_pdf: db.clearance_pdf,
            child_protection_pdf: db.child_protection_pdf,
            deleted: db.deleted.unwrap_or_default(),
            deleted_at: db.deleted_at,
        }
    }
}

impl Worker {
    /// Stored documents with the name each one gets inside a download bundle.
    pub fn documents(&self) -> Vec<(&'static str, &str)> {
        [
            ("photo", self.photo.as_deref()),
            ("id_copy", self.id_copy_pdf.as_deref()),
            ("cv", self.cv_pdf.as_deref()),
            ("clearance", self.clearance_pdf.as_deref()),
            ("child_protection", self.child_protection_pdf.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, path)| path.map(|p| (label, p)))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub id: i64,
    pub student_id: i64,
    pub term: Term,
    pub score: f64,
    pub specs: Option<Specs>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbAssessment {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub term: Option<String>,
    pub score: Option<f64>,
    pub specs: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbAssessment> for Assessment {
    fn from(db: DbAssessment) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            term: db
                .term
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(Term::Term1),
            score: db.score.unwrap_or_default(),
            specs: parse_stored_specs(db.specs),
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub kind: SessionKind,
    pub student_id: i64,
    pub student_name: String,
    pub grade: String,
    pub school_id: i64,
    pub user_id: i64,
    pub session_name: String,
    pub date: NaiveDate,
    pub duration_hours: f64,
    pub photo: Option<String>,
    pub outcomes: Option<String>,
    pub specs: Option<Specs>,
    pub category: Category,
    pub physical_education: bool,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSessionRecord {
    pub id: Option<i64>,
    pub kind: Option<String>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub grade: Option<String>,
    pub school_id: Option<i64>,
    pub user_id: Option<i64>,
    pub session_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub duration_hours: Option<f64>,
    pub photo: Option<String>,
    pub outcomes: Option<String>,
    pub specs: Option<String>,
    pub category: Option<String>,
    pub physical_education: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbSessionRecord> for SessionRecord {
    fn from(db: DbSessionRecord) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            kind: db
                .kind
                .as_deref()
                .and_then(|k| k.parse().ok())
                .unwrap_or(SessionKind::Academic),
            student_id: db.student_id.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            grade: db.grade.unwrap_or_default(),
            school_id: db.school_id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            session_name: db.session_name.unwrap_or_default(),
            date: db.date.unwrap_or_default(),
            duration_hours: db.duration_hours.unwrap_or_default(),
            photo: db.photo,
            outcomes: db.outcomes,
            specs: parse_stored_specs(db.specs),
            category: db
                .category
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(Category::Un),
            physical_education: db.physical_education.unwrap_or_default(),
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Meal {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub meal_type: Option<String>,
    pub ingredients: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MealDistribution {
    pub id: i64,
    pub date: NaiveDate,
    pub student_id: i64,
    pub student_name: String,
    pub school_id: i64,
    pub meal_id: i64,
    pub meal_name: String,
    pub quantity: i64,
    pub is_fruit: bool,
    pub fruit_type: Option<String>,
    pub fruit_other_description: Option<String>,
    pub photo: Option<String>,
    pub recorded_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub school_id: i64,
    pub date: NaiveDate,
    pub status: String,
    pub recorded_by: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MaintenanceLock {
    pub site_id: i64,
    pub locked: bool,
    pub reason: Option<String>,
    pub locked_by_id: Option<i64>,
    pub updated_at: Option<NaiveDateTime>,
}

impl MaintenanceLock {
    pub fn unlocked(site_id: i64) -> Self {
        Self {
            site_id,
            locked: false,
            reason: None,
            locked_by_id: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRemovalReview {
    pub id: i64,
    pub removed_user_id: i64,
    pub removed_username: String,
    pub removed_by_id: i64,
    pub removed_by_username: String,
    pub reason: String,
    pub warning: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrainingRecord {
    pub id: i64,
    pub worker_id: i64,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub venue: String,
    pub date: NaiveDate,
    pub accredited: bool,
    pub price: Option<f64>,
    pub photo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!("PR".parse::<Category>().unwrap(), Category::Pr);
        assert_eq!("pe".parse::<Category>().unwrap(), Category::Pe);
        assert!(matches!(
            "physical".parse::<Category>(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_term_parsing_and_serialisation() {
        assert_eq!("term 2".parse::<Term>().unwrap(), Term::Term2);
        assert!("Term 4".parse::<Term>().is_err());
        assert_eq!(serde_json::to_string(&Term::Term3).unwrap(), "\"Term 3\"");
    }

    #[test]
    fn test_session_kind_follows_pe_flag() {
        let mut student = Student::from(DbStudent {
            id: Some(1),
            full_name: Some("Ada".to_string()),
            category: Some("ww".to_string()),
            ..Default::default()
        });

        assert_eq!(SessionKind::for_student(&student), SessionKind::Academic);
        student.physical_education = true;
        assert_eq!(SessionKind::for_student(&student), SessionKind::Pe);
        assert_eq!(SessionKind::Pe.table(), "pe_sessions");
    }

    #[test]
    fn test_stored_specs_tolerate_garbage() {
        assert!(parse_stored_specs(Some("not json".to_string())).is_none());

        let specs = parse_stored_specs(Some(r#"{"reading": 70}"#.to_string())).unwrap();
        assert_eq!(specs.get("reading"), Some(&70.0));
    }
}
