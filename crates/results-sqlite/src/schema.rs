pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE scans (
  ip               TEXT    NOT NULL,
  port             INTEGER NOT NULL CHECK (port BETWEEN 0 AND 4294967295),
  service          TEXT    NOT NULL,
  last_scanned_at  INTEGER NOT NULL,
  response_text    TEXT    NOT NULL,
  updated_at       INTEGER NOT NULL,
  PRIMARY KEY (ip, port, service)
);

CREATE INDEX idx_scans_last_scanned ON scans(last_scanned_at);

COMMIT;
"#
;

/// Insert, or replace only when strictly newer. One statement, so the guard
/// holds even when several writers race on the same key.
pub const UPSERT_SCAN: &str = "INSERT INTO scans(ip,port,service,last_scanned_at,response_text,updated_at) VALUES (?,?,?,?,?,?)
 ON CONFLICT(ip,port,service) DO UPDATE SET last_scanned_at=excluded.last_scanned_at, response_text=excluded.response_text, updated_at=excluded.updated_at
 WHERE scans.last_scanned_at < excluded.last_scanned_at";
