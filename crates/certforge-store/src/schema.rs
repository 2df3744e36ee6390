//! Schema for the generated dataset.
//!
//! Certificate identity is `(certificate_id, issued_at)`: the numeric id is
//! a reusable slot, so the id alone is not unique across the run. Indices
//! back the two supported filters, by owner and by expiry.

pub(crate) const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS certificates",
    "DROP TABLE IF EXISTS clients",
];

pub(crate) const CREATE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clients (
        id INTEGER PRIMARY KEY
    ) WITHOUT ROWID",
    "CREATE TABLE IF NOT EXISTS certificates (
        certificate_id INTEGER NOT NULL,
        client_id INTEGER NOT NULL REFERENCES clients (id),
        issued_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        PRIMARY KEY (certificate_id, issued_at)
    )",
    "CREATE INDEX IF NOT EXISTS idx_certificates_client
        ON certificates (client_id)",
    "CREATE INDEX IF NOT EXISTS idx_certificates_expiry
        ON certificates (expires_at)",
];
