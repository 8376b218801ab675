use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::auth::SiteScope;
use crate::error::AppError;

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone)]
enum Bound {
    Int(i64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

#[derive(Debug, Clone)]
enum Clause {
    Compare(&'static str, &'static str, Bound),
    InList(&'static str, Vec<i64>),
    Search(&'static [&'static str], String),
    Raw(&'static str),
}

/// WHERE-clause builder for list queries. Column names are compile-time
/// constants; every user-supplied value is bound.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    clauses: Vec<Clause>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, sql: &'static str) -> Self {
        self.clauses.push(Clause::Raw(sql));
        self
    }

    pub fn eq_int(mut self, column: &'static str, value: Option<i64>) -> Self {
        if let Some(value) = value {
            self.clauses
                .push(Clause::Compare(column, "=", Bound::Int(value)));
        }
        self
    }

    pub fn eq_text(mut self, column: &'static str, value: Option<&str>) -> Self {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.clauses
                .push(Clause::Compare(column, "=", Bound::Text(value.to_string())));
        }
        self
    }

    pub fn eq_bool(mut self, column: &'static str, value: Option<bool>) -> Self {
        if let Some(value) = value {
            self.clauses
                .push(Clause::Compare(column, "=", Bound::Bool(value)));
        }
        self
    }

    pub fn date_from(mut self, column: &'static str, value: Option<NaiveDate>) -> Self {
        if let Some(value) = value {
            self.clauses
                .push(Clause::Compare(column, ">=", Bound::Date(value)));
        }
        self
    }

    pub fn date_to(mut self, column: &'static str, value: Option<NaiveDate>) -> Self {
        if let Some(value) = value {
            self.clauses
                .push(Clause::Compare(column, "<=", Bound::Date(value)));
        }
        self
    }

    pub fn in_ids(mut self, column: &'static str, ids: &[i64]) -> Self {
        self.clauses.push(Clause::InList(column, ids.to_vec()));
        self
    }

    /// Restricts `column` to the scope's sites; `SiteScope::All` adds nothing.
    pub fn sites(self, column: &'static str, scope: &SiteScope) -> Self {
        match scope.restriction() {
            Some(ids) => self.in_ids(column, ids),
            None => self,
        }
    }

    /// Case-insensitive substring match OR-combined across `columns`.
    pub fn search(mut self, columns: &'static [&'static str], term: Option<&str>) -> Self {
        if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
            self.clauses.push(Clause::Search(columns, term.to_string()));
        }
        self
    }

    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");

        for clause in &self.clauses {
            match clause {
                Clause::Compare(column, op, value) => {
                    qb.push(" AND ").push(*column).push(" ").push(*op).push(" ");
                    match value {
                        Bound::Int(v) => qb.push_bind(*v),
                        Bound::Text(v) => qb.push_bind(v.clone()),
                        Bound::Bool(v) => qb.push_bind(*v),
                        Bound::Date(v) => qb.push_bind(*v),
                    };
                }
                Clause::InList(_, ids) if ids.is_empty() => {
                    qb.push(" AND 0");
                }
                Clause::InList(column, ids) => {
                    qb.push(" AND ").push(*column).push(" IN (");
                    let mut separated = qb.separated(", ");
                    for id in ids {
                        separated.push_bind(*id);
                    }
                    separated.push_unseparated(")");
                }
                Clause::Search(columns, term) => {
                    let pattern = format!("%{}%", escape_like(term));
                    qb.push(" AND (");
                    for (i, column) in columns.iter().enumerate() {
                        if i > 0 {
                            qb.push(" OR ");
                        }
                        qb.push(*column)
                            .push(" LIKE ")
                            .push_bind(pattern.clone())
                            .push(" ESCAPE '\\'");
                    }
                    qb.push(")");
                }
                Clause::Raw(sql) => {
                    qb.push(" AND ").push(*sql);
                }
            }
        }
    }
}

/// Escapes LIKE metacharacters so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A paginated list query: `SELECT {select} {from} WHERE ... ORDER BY {order_by}`.
pub struct ListQuery {
    pub select: &'static str,
    pub from: &'static str,
    pub order_by: &'static str,
}

#[instrument(skip(pool, query, filter), fields(from = query.from))]
pub async fn fetch_page<R, T>(
    pool: &Pool<Sqlite>,
    query: &ListQuery,
    filter: &ListFilter,
    page: PageRequest,
) -> Result<Page<T>, AppError>
where
    R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    T: From<R>,
{
    info!("Fetching page {} ({} per page)", page.page, page.per_page);

    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    count_qb.push(query.from);
    filter.push_where(&mut count_qb);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
    qb.push(query.select).push(" ").push(query.from);
    filter.push_where(&mut qb);
    qb.push(" ORDER BY ")
        .push(query.order_by)
        .push(" LIMIT ")
        .push_bind(page.per_page)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows: Vec<R> = qb.build_query_as::<R>().fetch_all(pool).await?;

    Ok(Page {
        items: rows.into_iter().map(T::from).collect(),
        total,
        page: page.page,
        pages: (total + page.per_page - 1) / page.per_page,
    })
}
