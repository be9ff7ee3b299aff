//! Frame repository: recognized text per image.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// One recognized image of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRow {
    pub job_id: String,
    pub filename: String,
    pub base_key: String,
    /// Position in submission order.
    pub index: u32,
    /// Never empty and never the no-subtitle sentinel.
    pub text: String,
}

impl FrameRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            filename: row.get("filename")?,
            base_key: row.get("base_key")?,
            index: row.get("frame_index")?,
            text: row.get("text")?,
        })
    }
}

/// Replaces every frame of a job inside a single transaction.
///
/// Running this twice with the same input leaves the same rows behind.
pub fn replace_for_job(
    db: &Database,
    job_id: &str,
    frames: &[FrameRow],
) -> Result<usize, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM frames WHERE job_id = ?1", params![job_id])?;

        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO frames (job_id, filename, base_key, frame_index, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for frame in frames {
                stmt.execute(params![
                    job_id,
                    frame.filename,
                    frame.base_key,
                    frame.index,
                    frame.text,
                    now
                ])?;
            }
        }
        tx.commit()?;

        log::debug!(
            "Replaced frames for job {} ({} removed, {} inserted)",
            job_id,
            removed,
            frames.len()
        );
        Ok(frames.len())
    })
}

/// Frames of a job in index order.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<FrameRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM frames WHERE job_id = ?1 ORDER BY frame_index ASC")?;
        let rows = stmt
            .query_map(params![job_id], FrameRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM frames WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
