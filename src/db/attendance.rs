use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::ListFilter;
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{AttendanceRecord, AttendanceStatus, Student};

#[derive(Debug, Clone)]
pub struct AttendanceMark {
    pub student: Student,
    pub status: AttendanceStatus,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default, sqlx::FromRow)]
pub struct AttendanceSummary {
    pub school_id: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct AttendanceStats {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub total: i64,
    /// Share of marks that were present or late, 0 to 100.
    pub attendance_rate: f64,
}

const RECORD_SELECT: &str = "SELECT a.id, a.student_id, s.full_name AS student_name, \
     a.school_id, a.date, a.status, a.recorded_by, a.note \
     FROM attendance_records a JOIN students s ON s.id = a.student_id";

const STATUS_COUNTS: &str = "COALESCE(SUM(a.status = 'present'), 0) AS present, \
     COALESCE(SUM(a.status = 'absent'), 0) AS absent, \
     COALESCE(SUM(a.status = 'late'), 0) AS late, COUNT(*) AS total";

/// Writes one mark per student for `date`. Re-marking a student on the same
/// day replaces the earlier mark.
#[instrument(skip_all, fields(date = %date, count = marks.len()))]
pub async fn mark_attendance(
    pool: &Pool<Sqlite>,
    date: NaiveDate,
    marks: &[AttendanceMark],
    recorded_by: i64,
) -> Result<Vec<AttendanceRecord>, AppError> {
    info!("Marking attendance");
    let mut tx = pool.begin().await?;

    for mark in marks {
        sqlx::query(
            "INSERT INTO attendance_records (student_id, school_id, date, status, recorded_by, note) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(student_id, date) DO UPDATE SET status = excluded.status, \
             school_id = excluded.school_id, recorded_by = excluded.recorded_by, \
             note = excluded.note",
        )
        .bind(mark.student.id)
        .bind(mark.student.school_id)
        .bind(date)
        .bind(mark.status.as_str())
        .bind(recorded_by)
        .bind(&mark.note)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let mut qb = QueryBuilder::<Sqlite>::new(RECORD_SELECT);
    let ids: Vec<i64> = marks.iter().map(|m| m.student.id).collect();
    ListFilter::new()
        .in_ids("a.student_id", &ids)
        .date_from("a.date", Some(date))
        .date_to("a.date", Some(date))
        .push_where(&mut qb);
    qb.push(" ORDER BY s.full_name");

    Ok(qb.build_query_as::<AttendanceRecord>().fetch_all(pool).await?)
}

/// Per-school status counts for a single day.
#[instrument(skip(pool))]
pub async fn attendance_summary(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    date: NaiveDate,
) -> Result<Vec<AttendanceSummary>, AppError> {
    info!("Summarising attendance");
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT a.school_id AS school_id, {} FROM attendance_records a",
        STATUS_COUNTS
    ));
    ListFilter::new()
        .sites("a.school_id", scope)
        .date_from("a.date", Some(date))
        .date_to("a.date", Some(date))
        .push_where(&mut qb);
    qb.push(" GROUP BY a.school_id ORDER BY a.school_id");

    Ok(qb.build_query_as::<AttendanceSummary>().fetch_all(pool).await?)
}

#[instrument(skip(pool))]
pub async fn attendance_stats(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<AttendanceStats, AppError> {
    info!("Building attendance stats");
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT 0 AS school_id, {} FROM attendance_records a",
        STATUS_COUNTS
    ));
    ListFilter::new()
        .sites("a.school_id", scope)
        .date_from("a.date", date_from)
        .date_to("a.date", date_to)
        .push_where(&mut qb);

    let counts = qb.build_query_as::<AttendanceSummary>().fetch_one(pool).await?;

    let attendance_rate = if counts.total == 0 {
        0.0
    } else {
        (counts.present + counts.late) as f64 * 100.0 / counts.total as f64
    };

    Ok(AttendanceStats {
        present: counts.present,
        absent: counts.absent,
        late: counts.late,
        total: counts.total,
        attendance_rate,
    })
}

#[instrument(skip(pool))]
pub async fn student_attendance(
    pool: &Pool<Sqlite>,
    student_id: i64,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<Vec<AttendanceRecord>, AppError> {
    let mut qb = QueryBuilder::<Sqlite>::new(RECORD_SELECT);
    ListFilter::new()
        .eq_int("a.student_id", Some(student_id))
        .date_from("a.date", date_from)
        .date_to("a.date", date_to)
        .push_where(&mut qb);
    qb.push(" ORDER BY a.date DESC");

    Ok(qb.build_query_as::<AttendanceRecord>().fetch_all(pool).await?)
}

#[instrument(skip(pool))]
pub async fn attendance_record_school(pool: &Pool<Sqlite>, id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT school_id FROM attendance_records WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attendance record {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn delete_attendance(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting attendance record");
    let result = sqlx::query("DELETE FROM attendance_records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Attendance record {} not found", id)));
    }
    Ok(())
}
