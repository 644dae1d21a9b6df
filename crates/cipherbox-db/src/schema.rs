//! SQL schema definitions.

/// Complete schema for the v1 ledger database.
///
/// Amounts are stored as decimal TEXT (they exceed 64 bits), identifiers as
/// `0x`-prefixed hex TEXT and timestamps as Unix seconds.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS series (
    series_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    price TEXT NOT NULL,
    total_boxes INTEGER NOT NULL,
    remaining_boxes INTEGER NOT NULL CHECK (remaining_boxes <= total_boxes),
    creator TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS boxes (
    box_id INTEGER PRIMARY KEY,
    series_id INTEGER NOT NULL REFERENCES series(series_id),
    owner TEXT NOT NULL,
    status TEXT NOT NULL,
    revealed_prize_amount TEXT,
    purchase_time INTEGER NOT NULL,
    expires_at INTEGER,
    current_request TEXT,
    sealed_prize TEXT NOT NULL,
    price_paid TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_boxes_owner ON boxes(owner);
CREATE INDEX IF NOT EXISTS idx_boxes_status ON boxes(status);

CREATE TABLE IF NOT EXISTS decryption_requests (
    request_id TEXT PRIMARY KEY,
    box_id INTEGER NOT NULL REFERENCES boxes(box_id),
    requester TEXT NOT NULL,
    submitted_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    superseded INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_requests_box ON decryption_requests(box_id);

CREATE TABLE IF NOT EXISTS tx_receipts (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash TEXT NOT NULL UNIQUE,
    block_time INTEGER NOT NULL,
    logs TEXT NOT NULL
);
"#;
