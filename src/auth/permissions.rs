use anyhow::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewSchools,
    ManageSchools,

    ViewUsers,
    ManageUsers,
    RemoveUsers,
    ViewRemovedUsers,

    ViewStudents,
    ManageStudents,
    RemoveStudents,

    ViewWorkers,
    ManageWorkers,
    RemoveWorkers,

    ViewTrainings,
    ManageTrainings,

    ViewSessions,
    RecordAcademicSessions,
    RecordPeSessions,
    BulkUploadSessions,

    ViewAssessments,
    ManageAssessments,
    DeleteAssessments,

    ViewMeals,
    ManageMeals,
    RecordMeals,

    ViewAttendance,
    RecordAttendance,
    DeleteAttendance,

    ViewDashboard,
    ToggleMaintenance,
    BypassMaintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superuser,
    Admin,
    Hr,
    Viewer,
    HeadTutor,
    HeadCoach,
    Tutor,
    Coach,
    Cleaner,
    MaintenanceUser,
    General,
}

use Permission::*;

const READ_ONLY: &[Permission] = &[
    ViewSchools,
    ViewUsers,
    ViewStudents,
    ViewWorkers,
    ViewTrainings,
    ViewSessions,
    ViewAssessments,
    ViewMeals,
    ViewAttendance,
    ViewDashboard,
];

const FIELD_STAFF: &[Permission] = &[
    ViewSchools,
    ViewStudents,
    ViewSessions,
    ViewAssessments,
    ViewMeals,
    ViewAttendance,
    RecordAttendance,
    ViewDashboard,
];

const SITE_LEAD: &[Permission] = &[
    ManageStudents,
    ViewWorkers,
    ViewTrainings,
    BulkUploadSessions,
    ManageAssessments,
    ManageMeals,
    RecordMeals,
];

fn permission_set(groups: &[&[Permission]]) -> HashSet<Permission> {
    groups.iter().flat_map(|group| group.iter().copied()).collect()
}

static BASIC_PERMISSIONS: Lazy<HashSet<Permission>> =
    Lazy::new(|| permission_set(&[&[ViewSchools, ViewDashboard]]));

static FIELD_STAFF_PERMISSIONS: Lazy<HashSet<Permission>> =
    Lazy::new(|| permission_set(&[FIELD_STAFF]));

static HEAD_TUTOR_PERMISSIONS: Lazy<HashSet<Permission>> =
    Lazy::new(|| permission_set(&[FIELD_STAFF, SITE_LEAD, &[RecordAcademicSessions]]));

static HEAD_COACH_PERMISSIONS: Lazy<HashSet<Permission>> =
    Lazy::new(|| permission_set(&[FIELD_STAFF, SITE_LEAD, &[RecordPeSessions]]));

static VIEWER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| permission_set(&[READ_ONLY]));

static HR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    permission_set(&[
        READ_ONLY,
        &[
            RemoveUsers,
            ViewRemovedUsers,
            ManageWorkers,
            RemoveWorkers,
            ManageTrainings,
        ],
    ])
});

static MAINTENANCE_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    permission_set(&[&[
        ViewSchools,
        ViewDashboard,
        ToggleMaintenance,
        BypassMaintenance,
    ]])
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    permission_set(&[
        READ_ONLY,
        FIELD_STAFF,
        SITE_LEAD,
        &[
            ManageSchools,
            ManageUsers,
            RemoveUsers,
            ViewRemovedUsers,
            RemoveStudents,
            ManageWorkers,
            RemoveWorkers,
            ManageTrainings,
            RecordAcademicSessions,
            RecordPeSessions,
            DeleteAssessments,
            DeleteAttendance,
        ],
    ])
});

static SUPERUSER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = ADMIN_PERMISSIONS.clone();

    permissions.insert(ToggleMaintenance);
    permissions.insert(BypassMaintenance);

    permissions
});

impl Role {
    pub const ALL: [Role; 11] = [
        Role::Superuser,
        Role::Admin,
        Role::Hr,
        Role::Viewer,
        Role::HeadTutor,
        Role::HeadCoach,
        Role::Tutor,
        Role::Coach,
        Role::Cleaner,
        Role::MaintenanceUser,
        Role::General,
    ];

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Superuser => &SUPERUSER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
            Role::Hr => &HR_PERMISSIONS,
            Role::Viewer => &VIEWER_PERMISSIONS,
            Role::HeadTutor => &HEAD_TUTOR_PERMISSIONS,
            Role::HeadCoach => &HEAD_COACH_PERMISSIONS,
            Role::Tutor | Role::Coach => &FIELD_STAFF_PERMISSIONS,
            Role::MaintenanceUser => &MAINTENANCE_PERMISSIONS,
            Role::Cleaner | Role::General => &BASIC_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Roles that see every site rather than only their home school.
    pub fn is_elevated(&self) -> bool {
        matches!(
            self,
            Role::Superuser | Role::Admin | Role::Viewer | Role::Hr | Role::MaintenanceUser
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superuser => "superuser",
            Role::Admin => "admin",
            Role::Hr => "hr",
            Role::Viewer => "viewer",
            Role::HeadTutor => "head_tutor",
            Role::HeadCoach => "head_coach",
            Role::Tutor => "tutor",
            Role::Coach => "coach",
            Role::Cleaner => "cleaner",
            Role::MaintenanceUser => "maintenance_user",
            Role::General => "general",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Role::ALL
            .iter()
            .find(|role| role.as_str() == normalized)
            .copied()
            .ok_or_else(|| Error::msg(format!("Unknown role: {}", s)))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_parse_case_insensitively() {
        assert_eq!("Head_Tutor".parse::<Role>().unwrap(), Role::HeadTutor);
        assert_eq!(" SUPERUSER ".parse::<Role>().unwrap(), Role::Superuser);
        assert!("janitor".parse::<Role>().is_err());

        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_elevated_roles() {
        let elevated: Vec<Role> = Role::ALL.into_iter().filter(Role::is_elevated).collect();

        assert_eq!(
            elevated,
            vec![
                Role::Superuser,
                Role::Admin,
                Role::Hr,
                Role::Viewer,
                Role::MaintenanceUser
            ]
        );
    }

    #[test]
    fn test_session_recording_is_split_by_discipline() {
        let academic: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| r.has_permission(RecordAcademicSessions))
            .collect();
        let pe: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| r.has_permission(RecordPeSessions))
            .collect();

        assert_eq!(academic, vec![Role::Superuser, Role::Admin, Role::HeadTutor]);
        assert_eq!(pe, vec![Role::Superuser, Role::Admin, Role::HeadCoach]);
    }

    #[test]
    fn test_maintenance_toggle_is_restricted() {
        for role in Role::ALL {
            let expected = matches!(role, Role::Superuser | Role::MaintenanceUser);
            assert_eq!(role.has_permission(ToggleMaintenance), expected, "{}", role);
            assert_eq!(role.has_permission(BypassMaintenance), expected, "{}", role);
        }
    }

    #[test]
    fn test_viewer_cannot_write() {
        let viewer = Role::Viewer;

        assert!(viewer.has_permission(ViewStudents));
        assert!(!viewer.has_permission(ManageStudents));
        assert!(!viewer.has_permission(RecordMeals));
        assert!(!viewer.has_permission(ManageUsers));
    }

    #[test]
    fn test_hr_manages_people_but_not_students() {
        let hr = Role::Hr;

        assert!(hr.has_permission(RemoveUsers));
        assert!(hr.has_permission(ManageWorkers));
        assert!(hr.has_permission(ManageTrainings));
        assert!(!hr.has_permission(ManageUsers));
        assert!(!hr.has_permission(ManageStudents));
    }
}
