use sqlx::{Pool, Sqlite};
use tracing::{instrument, warn};

use crate::db::{all_school_ids, get_maintenance_lock, get_student};
use crate::error::AppError;
use crate::models::{SessionKind, Student};

use super::{Permission, User};

pub const SITE_DENIED: &str = "Access denied to one or more requested sites";
pub const SCHOOL_MISMATCH: &str = "Access forbidden: school mismatch";

/// Sites a caller may operate on for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteScope {
    All,
    Only(Vec<i64>),
}

impl SiteScope {
    pub fn contains(&self, site_id: i64) -> bool {
        match self {
            SiteScope::All => true,
            SiteScope::Only(ids) => ids.contains(&site_id),
        }
    }

    /// `None` means no site restriction applies.
    pub fn restriction(&self) -> Option<&[i64]> {
        match self {
            SiteScope::All => None,
            SiteScope::Only(ids) => Some(ids),
        }
    }
}

/// Parses `1,2, 3` into site ids. Blank input means "no explicit filter".
pub fn parse_site_ids(raw: Option<&str>) -> Result<Vec<i64>, AppError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part
            .parse::<i64>()
            .map_err(|_| AppError::Validation(format!("Invalid site id: {}", part)))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    Ok(ids)
}

/// Elevated roles may touch any site; everyone else is pinned to their home
/// school and is refused as soon as a foreign site is requested.
pub fn resolve_allowed_sites(user: &User, requested: &[i64]) -> Result<SiteScope, AppError> {
    if user.is_elevated() {
        return Ok(if requested.is_empty() {
            SiteScope::All
        } else {
            SiteScope::Only(requested.to_vec())
        });
    }

    let Some(home) = user.school_id else {
        warn!(username = %user.username, "Non-elevated user has no home school");
        return Err(AppError::Authorization(
            "User is not assigned to a school".to_string(),
        ));
    };

    if requested.iter().any(|id| *id != home) {
        warn!(
            username = %user.username,
            home_school = home,
            requested = ?requested,
            "Requested sites outside home school"
        );
        return Err(AppError::Authorization(SITE_DENIED.to_string()));
    }

    Ok(SiteScope::Only(vec![home]))
}

/// Expands the caller's scope into concrete school ids.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn allowed_site_ids(
    pool: &Pool<Sqlite>,
    user: &User,
    requested: &[i64],
) -> Result<Vec<i64>, AppError> {
    match resolve_allowed_sites(user, requested)? {
        SiteScope::All => all_school_ids(pool).await,
        SiteScope::Only(ids) => Ok(ids),
    }
}

pub fn ensure_record_access(user: &User, record_school_id: i64) -> Result<(), AppError> {
    resolve_allowed_sites(user, &[record_school_id])
        .map(|_| ())
        .map_err(|err| match err {
            AppError::Authorization(_) => AppError::Authorization(SCHOOL_MISMATCH.to_string()),
            other => other,
        })
}

/// Picks the school a write targets: an explicit query parameter wins over the
/// body, which wins over the school of a student named in the path.
#[instrument(skip(pool))]
pub async fn resolve_target_school(
    pool: &Pool<Sqlite>,
    query_school: Option<i64>,
    body_school: Option<i64>,
    path_student: Option<i64>,
) -> Result<Option<i64>, AppError> {
    if let Some(school_id) = query_school.or(body_school) {
        return Ok(Some(school_id));
    }

    match path_student {
        Some(student_id) => Ok(Some(get_student(pool, student_id).await?.school_id)),
        None => Ok(None),
    }
}

/// PE students are written by the coaching line, everyone else by the tutoring
/// line; admin and superuser hold both permissions.
pub fn authorize_session_write(user: &User, student: &Student) -> Result<(), AppError> {
    ensure_record_access(user, student.school_id)?;

    let required = match SessionKind::for_student(student) {
        SessionKind::Pe => Permission::RecordPeSessions,
        SessionKind::Academic => Permission::RecordAcademicSessions,
    };

    if user.has_permission(required) {
        Ok(())
    } else {
        warn!(
            username = %user.username,
            role = %user.role,
            student_id = student.id,
            physical_education = student.physical_education,
            "Session write refused"
        );
        Err(AppError::Authorization(format!(
            "Role '{}' may not record {} sessions",
            user.role,
            if student.physical_education {
                "physical education"
            } else {
                "academic"
            }
        )))
    }
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn ensure_not_locked(
    pool: &Pool<Sqlite>,
    user: &User,
    site_id: i64,
) -> Result<(), AppError> {
    if user.has_permission(Permission::BypassMaintenance) {
        return Ok(());
    }

    match get_maintenance_lock(pool, site_id).await? {
        Some(lock) if lock.locked => Err(AppError::Authorization(format!(
            "Site {} is under maintenance: {}",
            site_id,
            lock.reason.unwrap_or_else(|| "no reason given".to_string())
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DbUser;
    use crate::models::DbStudent;

    fn user(role: &str, school_id: Option<i64>) -> User {
        User::from(DbUser {
            id: Some(1),
            username: Some(format!("{}_user", role)),
            role: Some(role.to_string()),
            school_id,
            ..Default::default()
        })
    }

    fn student(school_id: i64, physical_education: bool) -> Student {
        Student::from(DbStudent {
            id: Some(9),
            full_name: Some("Kim".to_string()),
            category: Some("pr".to_string()),
            physical_education: Some(physical_education),
            school_id: Some(school_id),
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_site_ids() {
        assert_eq!(parse_site_ids(None).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_site_ids(Some(" ")).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_site_ids(Some("1, 2,2,3")).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            parse_site_ids(Some("1,two")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_elevated_roles_default_to_every_site() {
        for role in ["superuser", "admin", "viewer", "hr", "maintenance_user"] {
            let caller = user(role, None);
            assert_eq!(resolve_allowed_sites(&caller, &[]).unwrap(), SiteScope::All);
            assert_eq!(
                resolve_allowed_sites(&caller, &[4, 8]).unwrap(),
                SiteScope::Only(vec![4, 8])
            );
        }
    }

    #[test]
    fn test_site_roles_are_pinned_to_home_school() {
        for role in ["head_tutor", "head_coach", "tutor", "coach", "cleaner", "general"] {
            let caller = user(role, Some(2));

            assert_eq!(
                resolve_allowed_sites(&caller, &[]).unwrap(),
                SiteScope::Only(vec![2])
            );
            assert_eq!(
                resolve_allowed_sites(&caller, &[2]).unwrap(),
                SiteScope::Only(vec![2])
            );

            match resolve_allowed_sites(&caller, &[2, 3]) {
                Err(AppError::Authorization(msg)) => assert_eq!(msg, SITE_DENIED),
                other => panic!("expected forbidden for {}, got {:?}", role, other),
            }
        }
    }

    #[test]
    fn test_site_role_without_school_is_refused() {
        let caller = user("tutor", None);
        assert!(matches!(
            resolve_allowed_sites(&caller, &[]),
            Err(AppError::Authorization(_))
        ));
    }

    #[test]
    fn test_record_access_reports_school_mismatch() {
        let caller = user("coach", Some(1));

        assert!(ensure_record_access(&caller, 1).is_ok());
        match ensure_record_access(&caller, 2) {
            Err(AppError::Authorization(msg)) => assert_eq!(msg, SCHOOL_MISMATCH),
            other => panic!("expected school mismatch, got {:?}", other),
        }
        assert!(ensure_record_access(&user("viewer", None), 2).is_ok());
    }

    #[test]
    fn test_session_write_policy() {
        let pe_student = student(1, true);
        let academic_student = student(1, false);

        let head_coach = user("head_coach", Some(1));
        assert!(authorize_session_write(&head_coach, &pe_student).is_ok());
        assert!(authorize_session_write(&head_coach, &academic_student).is_err());

        let head_tutor = user("head_tutor", Some(1));
        assert!(authorize_session_write(&head_tutor, &academic_student).is_ok());
        assert!(authorize_session_write(&head_tutor, &pe_student).is_err());

        for role in ["admin", "superuser"] {
            let caller = user(role, None);
            assert!(authorize_session_write(&caller, &pe_student).is_ok());
            assert!(authorize_session_write(&caller, &academic_student).is_ok());
        }

        for role in ["coach", "tutor", "hr", "viewer"] {
            let caller = user(role, Some(1));
            assert!(authorize_session_write(&caller, &pe_student).is_err());
            assert!(authorize_session_write(&caller, &academic_student).is_err());
        }
    }

    #[test]
    fn test_session_write_checks_school_first() {
        let head_coach = user("head_coach", Some(2));
        match authorize_session_write(&head_coach, &student(1, true)) {
            Err(AppError::Authorization(msg)) => assert_eq!(msg, SCHOOL_MISMATCH),
            other => panic!("expected school mismatch, got {:?}", other),
        }
    }
}
