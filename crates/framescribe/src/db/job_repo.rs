//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::job::{Job, JobKind, JobStatus, JobStep};

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(JobStatus);
sql_text_enum!(JobStep);
sql_text_enum!(JobKind);

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    Ok(Job {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        kind: row.get("kind")?,
        status: row.get("status")?,
        step: row.get("step")?,
        source_key: row.get("source_key")?,
        total_images: row.get("total_images")?,
        processed_images: row.get("processed_images")?,
        total_batches: row.get("total_batches")?,
        batches_completed: row.get("batches_completed")?,
        submitted_images: row.get("submitted_images")?,
        batch_id: row.get("batch_id")?,
        batch_input_id: row.get("batch_input_id")?,
        batch_output_id: row.get("batch_output_id")?,
        poll_attempts: row.get("poll_attempts")?,
        wake_at: row.get("wake_at")?,
        images_zip_key: row.get("images_zip_key")?,
        images_zip_size: row.get("images_zip_size")?,
        thumbnail_key: row.get("thumbnail_key")?,
        text_key: row.get("text_key")?,
        text_size: row.get("text_size")?,
        docx_key: row.get("docx_key")?,
        docx_size: row.get("docx_size")?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, kind, status, step, source_key, total_images,
             processed_images, total_batches, batches_completed, submitted_images, batch_id,
             batch_input_id, batch_output_id, poll_attempts, wake_at, images_zip_key,
             images_zip_size, thumbnail_key, text_key, text_size, docx_key, docx_size, error,
             created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            params![
                job.id,
                job.owner_id,
                job.kind,
                job.status,
                job.step,
                job.source_key,
                job.total_images,
                job.processed_images,
                job.total_batches,
                job.batches_completed,
                job.submitted_images,
                job.batch_id,
                job.batch_input_id,
                job.batch_output_id,
                job.poll_attempts,
                job.wake_at,
                job.images_zip_key,
                job.images_zip_size,
                job.thumbnail_key,
                job.text_key,
                job.text_size,
                job.docx_key,
                job.docx_size,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites every mutable column of an existing job in one statement.
///
/// `id`, `owner_id`, `kind`, `source_key` and `created_at` never change.
pub fn update(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, step=?3, total_images=?4, processed_images=?5,
             total_batches=?6, batches_completed=?7, submitted_images=?8, batch_id=?9,
             batch_input_id=?10, batch_output_id=?11, poll_attempts=?12, wake_at=?13,
             images_zip_key=?14, images_zip_size=?15, thumbnail_key=?16, text_key=?17,
             text_size=?18, docx_key=?19, docx_size=?20, error=?21, updated_at=?22,
             completed_at=?23
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.step,
                job.total_images,
                job.processed_images,
                job.total_batches,
                job.batches_completed,
                job.submitted_images,
                job.batch_id,
                job.batch_input_id,
                job.batch_output_id,
                job.poll_attempts,
                job.wake_at,
                job.images_zip_key,
                job.images_zip_size,
                job.thumbnail_key,
                job.text_key,
                job.text_size,
                job.docx_key,
                job.docx_size,
                job.error,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], job_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status));
        }
        if let Some(kind) = filter.kind {
            conditions.push(format!("kind = ?{}", param_values.len() + 1));
            param_values.push(Box::new(kind));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Jobs a worker should pick up after a restart, oldest first.
pub fn find_unfinished(db: &Database) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status IN (?1, ?2) ORDER BY created_at ASC, id",
        )?;
        let rows = stmt
            .query_map(
                params![JobStatus::Pending, JobStatus::Processing],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Updates only the status and updated_at of a job.
pub fn update_status(
    db: &Database,
    id: &str,
    status: JobStatus,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(())
    })
}
