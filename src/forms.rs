use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{Role, SiteScope};
use crate::db::{list_meals, list_roles, list_schools, student_options};
use crate::error::AppError;
use crate::models::{AttendanceStatus, Category, Term};

use FieldType::*;

pub const PE_SPEC_KEYS: [&str; 5] = ["endurance", "strength", "agility", "coordination", "teamwork"];
pub const ACADEMIC_SPEC_KEYS: [&str; 5] =
    ["reading", "writing", "numeracy", "comprehension", "participation"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Boolean,
    Select,
    File,
    JsonObject,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub group: Option<&'static str>,
}

const fn field(
    name: &'static str,
    label: &'static str,
    field_type: FieldType,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        label,
        field_type,
        required,
        group: None,
    }
}

const fn grouped(
    name: &'static str,
    label: &'static str,
    field_type: FieldType,
    group: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        label,
        field_type,
        required: false,
        group: Some(group),
    }
}

struct EntityForm {
    fields: &'static [FieldSpec],
    has_specs: bool,
}


const SCHOOL_FIELDS: &[FieldSpec] = &[
    field("name", "Name", Text, true),
    field("address", "Address", Textarea, true),
    field("contact_number", "Contact number", Text, false),
    field("email", "Email", Text, false),
];

const STUDENT_FIELDS: &[FieldSpec] = &[
    field("full_name", "Full name", Text, true),
    field("grade", "Grade", Text, true),
    field("category", "Category", Select, true),
    field("physical_education", "Physical education", Boolean, false),
    field("year", "Year", Number, true),
    field("school_id", "School", Select, true),
    field("id_number", "ID number", Text, false),
    field("date_of_birth", "Date of birth", Date, false),
    grouped("photo", "Photo", File, "documents"),
    grouped("parent_permission_pdf", "Parent permission", File, "documents"),
];

const WORKER_FIELDS: &[FieldSpec] = &[
    field("name", "First name", Text, true),
    field("last_name", "Last name", Text, true),
    field("id_number", "ID number", Text, false),
    field("contact_number", "Contact number", Text, false),
    field("email", "Email", Text, false),
    field("start_date", "Start date", Date, false),
    field("story", "Story", Textarea, false),
    field("role_id", "Role", Select, true),
    field("school_id", "School", Select, true),
    grouped("photo", "Photo", File, "documents"),
    grouped("id_copy_pdf", "ID copy", File, "documents"),
    grouped("cv_pdf", "CV", File, "documents"),
    grouped("clearance_pdf", "Police clearance", File, "documents"),
    grouped("child_protection_pdf", "Child protection", File, "documents"),
];

const USER_FIELDS: &[FieldSpec] = &[
    field("username", "Username", Text, true),
    field("password", "Password", Text, true),
    field("email", "Email", Text, false),
    field("role", "Role", Select, true),
    field("school_id", "School", Select, false),
    field("expires_at", "Expires", Date, false),
];

const SESSION_FIELDS: &[FieldSpec] = &[
    field("student_id", "Student", Select, true),
    field("session_name", "Session", Text, true),
    field("date", "Date", Date, true),
    field("duration_hours", "Duration (hours)", Number, true),
    field("outcomes", "Outcomes", Textarea, false),
    field("photo", "Photo", File, false),
];

const ASSESSMENT_FIELDS: &[FieldSpec] = &[
    field("student_id", "Student", Select, true),
    field("term", "Term", Select, true),
    field("score", "Score", Number, true),
];

const MEAL_FIELDS: &[FieldSpec] = &[
    field("name", "Name", Text, true),
    field("type", "Type", Text, false),
    field("ingredients", "Ingredients", Textarea, false),
];

const MEAL_DISTRIBUTION_FIELDS: &[FieldSpec] = &[
    field("date", "Date", Date, true),
    field("student_id", "Student", Select, true),
    field("meal_id", "Meal", Select, true),
    field("quantity", "Quantity", Number, true),
    grouped("is_fruit", "Fruit served", Boolean, "fruit"),
    grouped("fruit_type", "Fruit type", Text, "fruit"),
    grouped("fruit_other_description", "Other fruit", Text, "fruit"),
    field("photo", "Photo", File, false),
];

const ATTENDANCE_FIELDS: &[FieldSpec] = &[
    field("student_id", "Student", Select, true),
    field("date", "Date", Date, true),
    field("status", "Status", Select, true),
    field("note", "Note", Textarea, false),
];

const TRAINING_FIELDS: &[FieldSpec] = &[
    field("title", "Title", Text, true),
    field("description", "Description", Textarea, false),
    field("outcomes", "Outcomes", Textarea, false),
    field("venue", "Venue", Text, false),
    field("date", "Date", Date, true),
    field("accredited", "Accredited", Boolean, false),
    field("price", "Price", Number, false),
    field("photo", "Photo", File, false),
];

static FORMS: Lazy<HashMap<&'static str, EntityForm>> = Lazy::new(|| {
    HashMap::from([
        ("school", EntityForm { fields: SCHOOL_FIELDS, has_specs: false }),
        ("student", EntityForm { fields: STUDENT_FIELDS, has_specs: false }),
        ("worker", EntityForm { fields: WORKER_FIELDS, has_specs: false }),
        ("user", EntityForm { fields: USER_FIELDS, has_specs: false }),
        ("session", EntityForm { fields: SESSION_FIELDS, has_specs: true }),
        ("assessment", EntityForm { fields: ASSESSMENT_FIELDS, has_specs: true }),
        ("meal", EntityForm { fields: MEAL_FIELDS, has_specs: false }),
        ("meal_distribution", EntityForm { fields: MEAL_DISTRIBUTION_FIELDS, has_specs: false }),
        ("attendance", EntityForm { fields: ATTENDANCE_FIELDS, has_specs: false }),
        ("training", EntityForm { fields: TRAINING_FIELDS, has_specs: false }),
    ])
});

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FieldOption {
    pub value: serde_json::Value,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct FormSchema {
    pub model: String,
    pub fields: Vec<FormField>,
}

/// Sub-score keys a role enters on session and assessment forms.
pub fn spec_keys_for(role: Role) -> Vec<&'static str> {
    match role {
        Role::Coach | Role::HeadCoach => PE_SPEC_KEYS.to_vec(),
        Role::Tutor | Role::HeadTutor => ACADEMIC_SPEC_KEYS.to_vec(),
        Role::Admin | Role::Superuser => {
            let mut keys = PE_SPEC_KEYS.to_vec();
            keys.extend(ACADEMIC_SPEC_KEYS);
            keys
        }
        _ => Vec::new(),
    }
}

fn static_options(name: &str) -> Option<Vec<FieldOption>> {
    let values: Vec<&str> = match name {
        "category" => Category::ALL.iter().map(|c| c.as_str()).collect(),
        "term" => Term::ALL.iter().map(|t| t.as_str()).collect(),
        "status" => AttendanceStatus::ALL.iter().map(|s| s.as_str()).collect(),
        "role" => Role::ALL.iter().map(|r| r.as_str()).collect(),
        _ => return None,
    };

    Some(
        values
            .iter()
            .map(|v| FieldOption {
                value: serde_json::Value::from(*v),
                label: v.to_string(),
            })
            .collect(),
    )
}

fn id_options(rows: Vec<(i64, String)>) -> Vec<FieldOption> {
    rows.into_iter()
        .map(|(id, label)| FieldOption {
            value: serde_json::Value::from(id),
            label,
        })
        .collect()
}

async fn field_options(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    name: &str,
) -> Result<Option<Vec<FieldOption>>, AppError> {
    let options = match name {
        "school_id" => id_options(
            list_schools(pool, scope)
                .await?
                .into_iter()
                .map(|s| (s.id, s.name))
                .collect(),
        ),
        "role_id" => id_options(list_roles(pool).await?),
        "meal_id" => id_options(
            list_meals(pool)
                .await?
                .into_iter()
                .map(|m| (m.id, m.name))
                .collect(),
        ),
        "student_id" => id_options(student_options(pool, scope).await?),
        other => return Ok(static_options(other)),
    };

    Ok(Some(options))
}

#[instrument(skip(pool, scope))]
pub async fn form_schema(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    entity: &str,
    role: Role,
) -> Result<FormSchema, AppError> {
    let form = FORMS
        .get(entity)
        .ok_or_else(|| AppError::NotFound(format!("No form for '{}'", entity)))?;

    info!("Building form schema");

    let mut fields = Vec::with_capacity(form.fields.len() + 1);
    for spec in form.fields {
        fields.push(FormField {
            name: spec.name,
            label: spec.label,
            field_type: spec.field_type,
            required: spec.required,
            options: field_options(pool, scope, spec.name).await?,
            keys: None,
            group: spec.group,
        });
    }

    let keys = spec_keys_for(role);
    if form.has_specs && !keys.is_empty() {
        fields.push(FormField {
            name: "specs",
            label: "Specs",
            field_type: FieldType::JsonObject,
            required: false,
            options: None,
            keys: Some(keys),
            group: Some("specs"),
        });
    }

    Ok(FormSchema {
        model: entity.to_string(),
        fields,
    })
}
