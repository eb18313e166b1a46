use crate::schema::UPSERT_SCAN;
use crate::Db;
use anyhow::Result;
use miniscan_core::ScanRecord;
use rusqlite::params;

impl Db {
    /// Conditional upsert. Returns `true` when a row was inserted or replaced,
    /// `false` when the stored record was already as new or newer.
    pub fn upsert_scan(&self, rec: &ScanRecord, updated_at: i64) -> Result<bool> {
        let changed = self.conn.execute(
            UPSERT_SCAN,
            params![
                rec.key.ip,
                rec.key.port,
                rec.key.service,
                rec.last_scanned_at,
                rec.response_text,
                updated_at
            ],
        )?;
        Ok(changed > 0)
    }
}
