use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::{ListFilter, ListQuery, Page, PageRequest, fetch_page};
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{Category, DbSessionRecord, SessionKind, SessionRecord, Student, parse_stored_specs};
use crate::validation::Specs;

#[derive(Debug, Clone)]
pub struct NewSession {
    pub student_id: i64,
    pub user_id: i64,
    pub session_name: String,
    pub date: NaiveDate,
    pub duration_hours: f64,
    pub photo: Option<String>,
    pub outcomes: Option<String>,
    pub specs: Option<Specs>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionListFilter {
    pub kind: Option<SessionKind>,
    pub student_id: Option<i64>,
    pub grade: Option<String>,
    pub category: Option<Category>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Default, Clone, sqlx::FromRow)]
pub struct KindStats {
    pub sessions: i64,
    pub hours: f64,
    pub students: i64,
}

#[derive(Debug, Serialize, Default)]
pub struct SessionStats {
    pub academic: KindStats,
    pub pe: KindStats,
    pub by_category: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct SpecAverage {
    pub average: f64,
    pub count: i64,
}

// Both session tables joined to their students, flattened into one relation
// tagged with `kind`.
const SESSION_UNION: &str = "FROM (\
     SELECT 'academic' AS kind, x.id, x.student_id, s.full_name AS student_name, s.grade, \
     s.school_id, x.user_id, x.session_name, x.date, x.duration_hours, x.photo, x.outcomes, \
     x.specs, x.category, x.physical_education, x.created_at \
     FROM academic_sessions x JOIN students s ON s.id = x.student_id \
     UNION ALL \
     SELECT 'pe' AS kind, x.id, x.student_id, s.full_name AS student_name, s.grade, \
     s.school_id, x.user_id, x.session_name, x.date, x.duration_hours, x.photo, x.outcomes, \
     x.specs, x.category, x.physical_education, x.created_at \
     FROM pe_sessions x JOIN students s ON s.id = x.student_id) t";

const SESSION_LIST: ListQuery = ListQuery {
    select: "t.kind, t.id, t.student_id, t.student_name, t.grade, t.school_id, t.user_id, \
             t.session_name, t.date, t.duration_hours, t.photo, t.outcomes, t.specs, \
             t.category, t.physical_education, t.created_at",
    from: SESSION_UNION,
    order_by: "t.date DESC, t.created_at DESC, t.id DESC",
};

fn session_filter(scope: &SiteScope, filter: &SessionListFilter) -> ListFilter {
    ListFilter::new()
        .sites("t.school_id", scope)
        .eq_text("t.kind", filter.kind.map(|k| k.as_str()))
        .eq_int("t.student_id", filter.student_id)
        .eq_text("t.grade", filter.grade.as_deref())
        .eq_text("t.category", filter.category.map(|c| c.as_str()))
        .date_from("t.date", filter.date_from)
        .date_to("t.date", filter.date_to)
        .search(&["t.student_name", "t.session_name"], filter.search.as_deref())
}

async fn insert_session<'e, E>(
    executor: E,
    session: &NewSession,
    student: &Student,
) -> Result<(SessionKind, i64), AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let kind = SessionKind::for_student(student);
    let specs = session
        .specs
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let sql = format!(
        "INSERT INTO {} (student_id, user_id, session_name, date, duration_hours, photo, \
         outcomes, specs, category, physical_education) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        kind.table()
    );
    let id = sqlx::query(&sql)
        .bind(student.id)
        .bind(session.user_id)
        .bind(&session.session_name)
        .bind(session.date)
        .bind(session.duration_hours)
        .bind(&session.photo)
        .bind(&session.outcomes)
        .bind(specs)
        .bind(student.category.as_str())
        .bind(student.physical_education)
        .execute(executor)
        .await?
        .last_insert_rowid();

    Ok((kind, id))
}

/// Records a session in the table matching the student's PE flag, copying the
/// student's current category and PE flag onto the row.
#[instrument(skip_all, fields(student_id = student.id, pe = student.physical_education))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    session: &NewSession,
    student: &Student,
) -> Result<SessionRecord, AppError> {
    info!("Recording session");
    let (kind, id) = insert_session(pool, session, student).await?;
    get_session(pool, kind, id).await
}

/// Inserts every pair in one transaction and returns the number written.
#[instrument(skip_all, fields(count = sessions.len()))]
pub async fn create_sessions(
    pool: &Pool<Sqlite>,
    sessions: &[(NewSession, Student)],
) -> Result<usize, AppError> {
    info!("Recording sessions in bulk");
    let mut tx = pool.begin().await?;
    for (session, student) in sessions {
        insert_session(&mut *tx, session, student).await?;
    }
    tx.commit().await?;
    Ok(sessions.len())
}

#[instrument(skip(pool))]
pub async fn get_session(
    pool: &Pool<Sqlite>,
    kind: SessionKind,
    id: i64,
) -> Result<SessionRecord, AppError> {
    let sql = format!(
        "SELECT {} {} WHERE t.kind = ? AND t.id = ?",
        SESSION_LIST.select, SESSION_UNION
    );
    sqlx::query_as::<_, DbSessionRecord>(&sql)
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(SessionRecord::from)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_sessions(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &SessionListFilter,
    page: PageRequest,
) -> Result<Page<SessionRecord>, AppError> {
    info!("Listing sessions");
    let list_filter = session_filter(scope, filter);
    fetch_page::<DbSessionRecord, SessionRecord>(pool, &SESSION_LIST, &list_filter, page).await
}

#[instrument(skip(pool))]
pub async fn session_stats(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &SessionListFilter,
) -> Result<SessionStats, AppError> {
    info!("Building session stats");
    let list_filter = session_filter(scope, filter);

    let per_kind = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT t.kind, COUNT(*), COALESCE(SUM(t.duration_hours), 0.0), \
             COUNT(DISTINCT t.student_id) ",
        );
        qb.push(SESSION_UNION);
        list_filter.push_where(&mut qb);
        qb.push(" GROUP BY t.kind");
        qb.build_query_as::<(String, i64, f64, i64)>()
            .fetch_all(pool)
            .await?
    };

    let by_category = {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT t.category, COUNT(*) ");
        qb.push(SESSION_UNION);
        list_filter.push_where(&mut qb);
        qb.push(" GROUP BY t.category");
        qb.build_query_as::<(String, i64)>().fetch_all(pool).await?
    };

    let mut stats = SessionStats {
        by_category: by_category.into_iter().collect(),
        ..Default::default()
    };
    for (kind, sessions, hours, students) in per_kind {
        let entry = KindStats {
            sessions,
            hours,
            students,
        };
        match kind.parse::<SessionKind>()? {
            SessionKind::Academic => stats.academic = entry,
            SessionKind::Pe => stats.pe = entry,
        }
    }

    Ok(stats)
}

/// Mean of every recorded sub-score, keyed by spec name.
#[instrument(skip(pool))]
pub async fn specs_summary(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &SessionListFilter,
) -> Result<BTreeMap<String, SpecAverage>, AppError> {
    info!("Summarising session specs");

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT t.specs ");
    qb.push(SESSION_UNION);
    session_filter(scope, filter)
        .raw("t.specs IS NOT NULL")
        .push_where(&mut qb);
    let rows: Vec<Option<String>> = qb.build_query_scalar().fetch_all(pool).await?;

    let mut totals: BTreeMap<String, (f64, i64)> = BTreeMap::new();
    for specs in rows.into_iter().filter_map(parse_stored_specs) {
        for (key, score) in specs {
            let entry = totals.entry(key).or_default();
            entry.0 += score;
            entry.1 += 1;
        }
    }

    Ok(totals
        .into_iter()
        .map(|(key, (sum, count))| {
            (
                key,
                SpecAverage {
                    average: sum / count as f64,
                    count,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StudentUpdate, get_student, update_student};
    use crate::test::test_utils::TestDbBuilder;

    fn session(student: &Student, user_id: i64, specs: Option<Specs>) -> NewSession {
        NewSession {
            student_id: student.id,
            user_id,
            session_name: "Morning block".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            duration_hours: 1.5,
            photo: None,
            outcomes: None,
            specs,
        }
    }

    #[rocket::async_test]
    async fn test_sessions_route_by_pe_flag_and_keep_snapshot() {
        let test_db = TestDbBuilder::new()
            .school("Oak")
            .admin("boss")
            .student("Runner", "Oak", true)
            .student("Reader", "Oak", false)
            .build()
            .await
            .unwrap();
        let pool = &test_db.pool;
        let boss = test_db.user_id("boss").unwrap();
        let runner = get_student(pool, test_db.student_id("Runner").unwrap()).await.unwrap();
        let reader = get_student(pool, test_db.student_id("Reader").unwrap()).await.unwrap();

        let pe = create_session(pool, &session(&runner, boss, None), &runner).await.unwrap();
        assert_eq!(pe.kind, SessionKind::Pe);
        assert!(pe.physical_education);

        let academic = create_session(pool, &session(&reader, boss, None), &reader)
            .await
            .unwrap();
        assert_eq!(academic.kind, SessionKind::Academic);
        assert_eq!(academic.category, reader.category);

        update_student(
            pool,
            reader.id,
            &StudentUpdate {
                category: Some(Category::Ww),
                physical_education: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let unchanged = get_session(pool, SessionKind::Academic, academic.id).await.unwrap();
        assert_eq!(unchanged.category, reader.category);
        assert!(!unchanged.physical_education);

        let listed = list_sessions(
            pool,
            &SiteScope::All,
            &SessionListFilter::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(listed.total, 2);

        let pe_only = list_sessions(
            pool,
            &SiteScope::All,
            &SessionListFilter {
                kind: Some(SessionKind::Pe),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(pe_only.total, 1);
        assert_eq!(pe_only.items[0].student_name, "Runner");
    }

    #[rocket::async_test]
    async fn test_stats_and_specs_summary() {
        let test_db = TestDbBuilder::new()
            .school("Oak")
            .admin("boss")
            .student("Runner", "Oak", true)
            .build()
            .await
            .unwrap();
        let pool = &test_db.pool;
        let boss = test_db.user_id("boss").unwrap();
        let runner = get_student(pool, test_db.student_id("Runner").unwrap()).await.unwrap();

        let first = Specs::from([("endurance".to_string(), 60.0), ("agility".to_string(), 80.0)]);
        let second = Specs::from([("endurance".to_string(), 80.0)]);

        let written = create_sessions(
            pool,
            &[
                (session(&runner, boss, Some(first)), runner.clone()),
                (session(&runner, boss, Some(second)), runner.clone()),
            ],
        )
        .await
        .unwrap();
        assert_eq!(written, 2);

        let stats = session_stats(pool, &SiteScope::All, &SessionListFilter::default())
            .await
            .unwrap();
        assert_eq!(stats.pe.sessions, 2);
        assert_eq!(stats.pe.hours, 3.0);
        assert_eq!(stats.pe.students, 1);
        assert_eq!(stats.academic.sessions, 0);

        let summary = specs_summary(pool, &SiteScope::All, &SessionListFilter::default())
            .await
            .unwrap();
        assert_eq!(
            summary.get("endurance"),
            Some(&SpecAverage {
                average: 70.0,
                count: 2
            })
        );
        assert_eq!(summary.get("agility").map(|s| s.count), Some(1));
    }
}
