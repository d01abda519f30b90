// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persisted job storage operations.

use rusqlite::params;

use super::{now_secs, Storage, StorageError};

/// A persisted job awaiting execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredJob {
    pub job_id: String,
    pub group: String,
    /// Serialized job kind.
    pub payload: String,
}

impl Storage {
    /// Persists a job, replacing any row with the same id.
    ///
    /// A replaced job keeps its original position in the restore order.
    pub fn save_job(&self, job: &StoredJob) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO jobs (job_id, group_name, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id) DO UPDATE SET
                group_name = excluded.group_name,
                payload = excluded.payload",
            params![job.job_id, job.group, job.payload, now_secs()],
        )?;
        Ok(())
    }

    /// Removes a persisted job. Returns whether it existed.
    pub fn delete_job(&self, job_id: &str) -> Result<bool, StorageError> {
        let rows = self
            .conn()
            .execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
        Ok(rows > 0)
    }

    /// Loads every persisted job in submission order.
    pub fn load_jobs(&self) -> Result<Vec<StoredJob>, StorageError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT job_id, group_name, payload FROM jobs ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredJob {
                job_id: row.get(0)?,
                group: row.get(1)?,
                payload: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Removes every persisted job.
    pub fn clear_jobs(&self) -> Result<usize, StorageError> {
        Ok(self.conn().execute("DELETE FROM jobs", [])?)
    }
}
