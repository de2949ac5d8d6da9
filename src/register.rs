use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

/// Local ledger of every PO this installation has issued.
pub struct Register {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedRecord {
    pub uid: String,
    pub po_id: String,
    pub vendor: String,
    pub issued_on: String,
    pub item_count: usize,
    pub subtotal: f64,
    pub tax: f64,
    pub grand_total: f64,
    /// SHA-256 of the PDF bytes, hex encoded.
    pub pdf_sha256: String,
    pub local_path: String,
    pub drive_file_id: Option<String>,
}

const SELECT_COLUMNS: &str = "uid, po_id, vendor, issued_on, item_count, subtotal, tax, grand_total, pdf_sha256, local_path, drive_file_id";

impl Register {
    /// Open (or create) the register database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS purchase_orders (
                uid TEXT PRIMARY KEY,
                po_id TEXT NOT NULL UNIQUE,
                vendor TEXT NOT NULL,
                issued_on TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                subtotal REAL NOT NULL,
                tax REAL NOT NULL,
                grand_total REAL NOT NULL,
                pdf_sha256 TEXT NOT NULL,
                local_path TEXT NOT NULL,
                drive_file_id TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_purchase_orders_vendor ON purchase_orders(vendor)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_purchase_orders_issued_on ON purchase_orders(issued_on)",
            [],
        )?;

        Ok(Self { conn })
    }

    /// Generate a unique ID from PO ID, vendor and issue date
    pub fn generate_uid(po_id: &str, vendor: &str, issued_on: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(po_id.as_bytes());
        hasher.update(vendor.as_bytes());
        hasher.update(issued_on.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn digest(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    /// Insert a newly issued PO. A PO ID that is already present is refused.
    pub fn record(&self, rec: &IssuedRecord) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO purchase_orders
                (uid, po_id, vendor, issued_on, item_count, subtotal, tax, grand_total, pdf_sha256, local_path, drive_file_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rec.uid,
                rec.po_id,
                rec.vendor,
                rec.issued_on,
                rec.item_count as i64,
                rec.subtotal,
                rec.tax,
                rec.grand_total,
                rec.pdf_sha256,
                rec.local_path,
                rec.drive_file_id,
            ],
        );
        match inserted {
            Ok(_) => {
                info!(po_id = %rec.po_id, vendor = %rec.vendor, "PO recorded");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::DuplicatePoId(rec.po_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_drive_file_id(&self, po_id: &str, file_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE purchase_orders SET drive_file_id = ?1 WHERE po_id = ?2",
            params![file_id, po_id],
        )?;
        info!(po_id = %po_id, file_id = %file_id, "Drive file recorded");
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssuedRecord> {
        Ok(IssuedRecord {
            uid: row.get(0)?,
            po_id: row.get(1)?,
            vendor: row.get(2)?,
            issued_on: row.get(3)?,
            item_count: row.get::<_, i64>(4)? as usize,
            subtotal: row.get(5)?,
            tax: row.get(6)?,
            grand_total: row.get(7)?,
            pdf_sha256: row.get(8)?,
            local_path: row.get(9)?,
            drive_file_id: row.get(10)?,
        })
    }

    pub fn get(&self, po_id: &str) -> Result<Option<IssuedRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM purchase_orders WHERE po_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![po_id], Self::row_to_record)
            .optional()?)
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Result<Vec<IssuedRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM purchase_orders ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM purchase_orders", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
