//! Attempt repository: CRUD operations for the `extraction_attempts` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw attempt row from the database.
#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub job_id: String,
    pub attempt: u32,
    pub source_ref: String,
    pub status: String,
    pub phase: String,
    pub progress: u8,
    pub message: String,
    pub extracted_text: Option<String>,
    pub partial_text: Option<String>,
    pub has_extracted_text: bool,
    pub failed_batches: u32,
    pub page_count: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl AttemptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            attempt: row.get("attempt")?,
            source_ref: row.get("source_ref")?,
            status: row.get("status")?,
            phase: row.get("phase")?,
            progress: row.get("progress")?,
            message: row.get("message")?,
            extracted_text: row.get("extracted_text")?,
            partial_text: row.get("partial_text")?,
            has_extracted_text: row.get("has_extracted_text")?,
            failed_batches: row.get("failed_batches")?,
            page_count: row.get("page_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Query filter parameters for attempt listing.
#[derive(Debug, Default, Clone)]
pub struct AttemptFilter {
    pub status: Option<String>,
    /// Only the newest attempt of each job.
    pub current_only: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new attempt row.
pub fn insert(db: &Database, row: &AttemptRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO extraction_attempts (job_id, attempt, source_ref, status, phase,
             progress, message, extracted_text, partial_text, has_extracted_text,
             failed_batches, page_count, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                row.job_id,
                row.attempt,
                row.source_ref,
                row.status,
                row.phase,
                row.progress,
                row.message,
                row.extracted_text,
                row.partial_text,
                row.has_extracted_text,
                row.failed_batches,
                row.page_count,
                row.created_at,
                row.updated_at,
                row.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing attempt. Identity and `created_at` are left alone.
/// Returns the number of rows touched.
pub fn update(db: &Database, row: &AttemptRow) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE extraction_attempts SET source_ref=?3, status=?4, phase=?5, progress=?6,
             message=?7, extracted_text=?8, partial_text=?9, has_extracted_text=?10,
             failed_batches=?11, page_count=?12, updated_at=?13, completed_at=?14
             WHERE job_id=?1 AND attempt=?2",
            params![
                row.job_id,
                row.attempt,
                row.source_ref,
                row.status,
                row.phase,
                row.progress,
                row.message,
                row.extracted_text,
                row.partial_text,
                row.has_extracted_text,
                row.failed_batches,
                row.page_count,
                row.updated_at,
                row.completed_at,
            ],
        )?;
        Ok(changed)
    })
}

/// Finds one attempt of a job.
pub fn find(db: &Database, job_id: &str, attempt: u32) -> Result<Option<AttemptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM extraction_attempts WHERE job_id = ?1 AND attempt = ?2")?;
        let mut rows = stmt.query_map(params![job_id, attempt], AttemptRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the newest attempt of a job.
pub fn find_current(db: &Database, job_id: &str) -> Result<Option<AttemptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM extraction_attempts WHERE job_id = ?1
             ORDER BY attempt DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![job_id], AttemptRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns every attempt of a job, oldest first.
pub fn find_attempts(db: &Database, job_id: &str) -> Result<Vec<AttemptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM extraction_attempts WHERE job_id = ?1 ORDER BY attempt ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Queries attempts with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &AttemptFilter,
) -> Result<(Vec<AttemptRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("a.status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if filter.current_only {
            conditions.push(
                "a.attempt = (SELECT MAX(b.attempt) FROM extraction_attempts b
                 WHERE b.job_id = a.job_id)"
                    .to_string(),
            );
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM extraction_attempts a {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT a.* FROM extraction_attempts a {} ORDER BY a.created_at DESC, a.attempt DESC
             LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<AttemptRow> = stmt
            .query_map(params_ref.as_slice(), AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}
