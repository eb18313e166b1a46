use crate::{Db, StoredScan};
use anyhow::Result;
use miniscan_core::{ScanKey, ScanRecord};
use rusqlite::{params, OptionalExtension};

impl Db {
    pub fn get_scan(&self, key: &ScanKey) -> Result<Option<ScanRecord>> {
        let rec = self
            .conn
            .query_row(
                "SELECT last_scanned_at, response_text FROM scans WHERE ip=? AND port=? AND service=?",
                params![key.ip, key.port, key.service],
                |r| {
                    Ok(ScanRecord {
                        key: key.clone(),
                        last_scanned_at: r.get(0)?,
                        response_text: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    pub fn list_scans(&self) -> Result<Vec<StoredScan>> {
        let mut stmt = self.conn.prepare(
            "SELECT ip, port, service, last_scanned_at, response_text, updated_at FROM scans ORDER BY ip, port, service",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(StoredScan {
                ip: r.get(0)?,
                port: r.get(1)?,
                service: r.get(2)?,
                last_scanned_at: r.get(3)?,
                response_text: r.get(4)?,
                updated_at: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn scan_count(&self) -> Result<i64> {
        let cnt: i64 = self.conn.query_row("SELECT COUNT(1) FROM scans", [], |r| r.get(0))?;
        Ok(cnt)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }
}
