use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::AppError;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub school_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(sqlx::FromRow, Clone, Debug, Default)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub school_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub deleted: Option<bool>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        // An unrecognised role name falls back to the least privileged role.
        let role = user
            .role
            .as_deref()
            .and_then(|name| name.parse().ok())
            .unwrap_or(Role::General);

        Self {
            id: user.id.unwrap_or_default(),
            username: user.username.unwrap_or_default(),
            email: user.email,
            role,
            school_id: user.school_id,
            worker_id: user.worker_id,
            expires_at: user.expires_at,
            created_at: user.created_at,
            deleted: user.deleted.unwrap_or_default(),
            deleted_at: user.deleted_at,
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now().naive_utc())
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(
                "Insufficient permissions for this action".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_with(role: &str, expires_at: Option<NaiveDateTime>) -> User {
        User::from(DbUser {
            id: Some(7),
            username: Some("sam".to_string()),
            role: Some(role.to_string()),
            school_id: Some(1),
            expires_at,
            ..Default::default()
        })
    }

    #[test]
    fn test_unknown_role_degrades_to_general() {
        let user = user_with("wizard", None);
        assert_eq!(user.role, Role::General);
        assert!(!user.is_elevated());
    }

    #[test]
    fn test_expiry() {
        let past = Utc::now().naive_utc() - Duration::hours(1);
        let future = Utc::now().naive_utc() + Duration::hours(1);

        assert!(user_with("tutor", Some(past)).is_expired());
        assert!(!user_with("tutor", Some(future)).is_expired());
        assert!(!user_with("tutor", None).is_expired());
    }
}
