use rusqlite::{params, params_from_iter, types::Value, Connection, Result, Row};
use std::path::Path;
use std::sync::Mutex;

use super::models::{
    DbSummary, LineItem, MonthlyStats, QuoteFilter, QuoteRecord, QuoteStatus, QuoteUpdate,
    SortKey, SupplierStats,
};

/// Fields of a quote prior to insertion (the id is assigned by the database).
#[derive(Debug, Clone, Default)]
pub struct NewQuote {
    pub filename: String,
    pub supplier: Option<String>,
    pub quote_date: Option<String>,
    pub currency: Option<String>,
    pub total_amount: Option<f64>,
    pub items: Vec<LineItem>,
    pub status: QuoteStatus,
    pub original_text: String,
    pub raw_response: String,
}

pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

const QUOTE_COLUMNS: &str =
    "id, filename, supplier, quote_date, currency, total_amount, status, original_text, raw_response, created_at";

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // The storage directory is externally configured; make sure it exists
        // before the first open.
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("cannot create {}: {}", parent.display(), e)),
                    )
                })?;
            }
        }
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "
            -- AUTOINCREMENT keeps ids monotonic: an id is issued once and never
            -- reused, even after the row is deleted.
            CREATE TABLE IF NOT EXISTS quotes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                supplier TEXT,
                quote_date TEXT,
                currency TEXT,
                total_amount REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                original_text TEXT NOT NULL DEFAULT '',
                raw_response TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS line_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                quote_id INTEGER NOT NULL REFERENCES quotes(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                description TEXT NOT NULL,
                quantity REAL,
                unit_price REAL,
                total REAL
            );

            CREATE INDEX IF NOT EXISTS idx_quotes_supplier ON quotes(supplier);
            CREATE INDEX IF NOT EXISTS idx_quotes_date ON quotes(quote_date);
            CREATE INDEX IF NOT EXISTS idx_quotes_created ON quotes(created_at);
            CREATE INDEX IF NOT EXISTS idx_items_quote ON line_items(quote_id);

            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    // ==================== CRUD ====================

    /// Insert a quote and all of its line items in one transaction.
    ///
    /// Either the whole record becomes visible or none of it does; a failure
    /// while writing line items rolls the quote row back too.
    pub fn insert_quote(&self, quote: &NewQuote) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO quotes (filename, supplier, quote_date, currency, total_amount, status, original_text, raw_response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                quote.filename,
                quote.supplier,
                quote.quote_date,
                quote.currency,
                quote.total_amount,
                quote.status.as_str(),
                quote.original_text,
                quote.raw_response,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        for (pos, item) in quote.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO line_items (quote_id, position, description, quantity, unit_price, total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, pos as i64, item.description, item.quantity, item.unit_price, item.total],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn get_quote(&self, id: i64) -> Result<Option<QuoteRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes WHERE id = ?1",
            QUOTE_COLUMNS
        ))?;

        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            let mut record = Self::row_to_quote(row)?;
            record.items = Self::items_for(&conn, id)?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Apply a partial update. Returns false when the id doesn't exist.
    pub fn update_quote(&self, id: i64, update: &QuoteUpdate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(supplier) = &update.supplier {
            sets.push("supplier");
            values.push(Value::Text(supplier.clone()));
        }
        if let Some(date) = &update.quote_date {
            sets.push("quote_date");
            values.push(Value::Text(date.clone()));
        }
        if let Some(currency) = &update.currency {
            sets.push("currency");
            values.push(Value::Text(currency.clone()));
        }
        if let Some(total) = update.total_amount {
            sets.push("total_amount");
            values.push(Value::Real(total));
        }
        if let Some(status) = update.status {
            sets.push("status");
            values.push(Value::Text(status.as_str().to_string()));
        }

        if sets.is_empty() {
            // Nothing to change; still report whether the row exists.
            let exists: bool =
                conn.query_row("SELECT COUNT(*) > 0 FROM quotes WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })?;
            return Ok(exists);
        }

        let clause = sets
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ?{}", col, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let mut all_values = vec![Value::Integer(id)];
        all_values.extend(values);

        let affected = conn.execute(
            &format!("UPDATE quotes SET {} WHERE id = ?1", clause),
            params_from_iter(all_values),
        )?;
        Ok(affected > 0)
    }

    /// Overwrite the analysis-derived fields and line items of an existing
    /// quote (used when stored text is re-analyzed). Returns false when the id
    /// doesn't exist.
    pub fn replace_analysis(&self, id: i64, quote: &NewQuote) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            "UPDATE quotes SET supplier = ?2, quote_date = ?3, currency = ?4,
             total_amount = ?5, status = ?6, raw_response = ?7 WHERE id = ?1",
            params![
                id,
                quote.supplier,
                quote.quote_date,
                quote.currency,
                quote.total_amount,
                quote.status.as_str(),
                quote.raw_response,
            ],
        )?;
        if affected == 0 {
            return Ok(false);
        }

        tx.execute("DELETE FROM line_items WHERE quote_id = ?1", params![id])?;
        for (pos, item) in quote.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO line_items (quote_id, position, description, quantity, unit_price, total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, pos as i64, item.description, item.quantity, item.unit_price, item.total],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Delete a quote and its line items. Returns false when the id doesn't exist.
    pub fn delete_quote(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM line_items WHERE quote_id = ?1", params![id])?;
        let affected = tx.execute("DELETE FROM quotes WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    pub fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM line_items", [])?;
        tx.execute("DELETE FROM quotes", [])?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Search ====================

    pub fn search_quotes(&self, filter: &QuoteFilter) -> Result<Vec<QuoteRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(supplier) = &filter.supplier {
            values.push(Value::Text(supplier.to_lowercase()));
            clauses.push(format!(
                "LOWER(supplier) LIKE '%' || ?{} || '%'",
                values.len()
            ));
        }
        if let Some(from) = &filter.date_from {
            values.push(Value::Text(from.clone()));
            clauses.push(format!("quote_date >= ?{}", values.len()));
        }
        if let Some(to) = &filter.date_to {
            values.push(Value::Text(to.clone()));
            clauses.push(format!("quote_date <= ?{}", values.len()));
        }
        if let Some(min) = filter.min_total {
            values.push(Value::Real(min));
            clauses.push(format!("total_amount >= ?{}", values.len()));
        }
        if let Some(max) = filter.max_total {
            values.push(Value::Real(max));
            clauses.push(format!("total_amount <= ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(query) = &filter.query {
            values.push(Value::Text(query.to_lowercase()));
            let n = values.len();
            clauses.push(format!(
                "(LOWER(COALESCE(supplier, '')) LIKE '%' || ?{n} || '%' \
                 OR LOWER(filename) LIKE '%' || ?{n} || '%' \
                 OR LOWER(original_text) LIKE '%' || ?{n} || '%')",
                n = n
            ));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        // Secondary id sort keeps ordering deterministic (insertion-order
        // tie-break) so identical filters return identical sequences.
        let order = match filter.sort {
            SortKey::Id => "id ASC",
            SortKey::Date => "quote_date ASC, id ASC",
            SortKey::Amount => "total_amount DESC, id ASC",
            SortKey::Supplier => "supplier ASC, id ASC",
        };

        let limit_clause = match filter.limit {
            Some(n) => format!("LIMIT {}", n),
            None => String::new(),
        };

        let sql = format!(
            "SELECT {} FROM quotes {} ORDER BY {} {}",
            QUOTE_COLUMNS, where_clause, order, limit_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut records = stmt
            .query_map(params_from_iter(values), Self::row_to_quote)?
            .collect::<Result<Vec<_>>>()?;

        for record in &mut records {
            record.items = Self::items_for(&conn, record.id)?;
        }
        Ok(records)
    }

    pub fn recent_quotes(&self, limit: u32) -> Result<Vec<QuoteRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes ORDER BY created_at DESC, id DESC LIMIT ?1",
            QUOTE_COLUMNS
        ))?;
        let mut records = stmt
            .query_map(params![limit], Self::row_to_quote)?
            .collect::<Result<Vec<_>>>()?;
        for record in &mut records {
            record.items = Self::items_for(&conn, record.id)?;
        }
        Ok(records)
    }

    // ==================== Statistics ====================

    pub fn supplier_statistics(&self) -> Result<Vec<SupplierStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT supplier, COUNT(*), COALESCE(SUM(total_amount), 0)
             FROM quotes WHERE supplier IS NOT NULL AND supplier != ''
             GROUP BY supplier ORDER BY COUNT(*) DESC, supplier ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SupplierStats {
                    supplier: row.get(0)?,
                    quote_count: row.get(1)?,
                    total_amount: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn monthly_statistics(&self) -> Result<Vec<MonthlyStats>> {
        let conn = self.conn.lock().unwrap();
        // quote_date is stored as YYYY-MM-DD, so the month key is a prefix.
        let mut stmt = conn.prepare(
            "SELECT substr(quote_date, 1, 7), COUNT(*), COALESCE(SUM(total_amount), 0)
             FROM quotes WHERE quote_date IS NOT NULL AND length(quote_date) >= 7
             GROUP BY substr(quote_date, 1, 7) ORDER BY substr(quote_date, 1, 7) ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MonthlyStats {
                    month: row.get(0)?,
                    quote_count: row.get(1)?,
                    total_amount: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn summary(&self) -> Result<DbSummary> {
        let conn = self.conn.lock().unwrap();
        let total_quotes: i64 = conn.query_row("SELECT COUNT(*) FROM quotes", [], |r| r.get(0))?;
        let total_amount: f64 = conn.query_row(
            "SELECT COALESCE(SUM(total_amount), 0) FROM quotes",
            [],
            |r| r.get(0),
        )?;
        let supplier_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT supplier) FROM quotes WHERE supplier IS NOT NULL AND supplier != ''",
            [],
            |r| r.get(0),
        )?;
        let average_amount = if total_quotes > 0 {
            total_amount / total_quotes as f64
        } else {
            0.0
        };
        Ok(DbSummary { total_quotes, total_amount, supplier_count, average_amount })
    }

    // ==================== Row mapping ====================

    fn row_to_quote(row: &Row) -> Result<QuoteRecord> {
        let status_str: String = row.get(6)?;
        Ok(QuoteRecord {
            id: row.get(0)?,
            filename: row.get(1)?,
            supplier: row.get(2)?,
            quote_date: row.get(3)?,
            currency: row.get(4)?,
            total_amount: row.get(5)?,
            status: QuoteStatus::from_str(&status_str).unwrap_or(QuoteStatus::Pending),
            original_text: row.get(7)?,
            raw_response: row.get(8)?,
            created_at: row.get(9)?,
            items: Vec::new(),
        })
    }

    fn items_for(conn: &Connection, quote_id: i64) -> Result<Vec<LineItem>> {
        let mut stmt = conn.prepare(
            "SELECT description, quantity, unit_price, total
             FROM line_items WHERE quote_id = ?1 ORDER BY position ASC",
        )?;
        let items = stmt
            .query_map(params![quote_id], |row| {
                Ok(LineItem {
                    description: row.get(0)?,
                    quantity: row.get(1)?,
                    unit_price: row.get(2)?,
                    total: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump_quote() -> NewQuote {
        NewQuote {
            filename: "acme_quote.pdf".to_string(),
            supplier: Some("Acme Co".to_string()),
            quote_date: Some("2025-03-14".to_string()),
            currency: Some("USD".to_string()),
            total_amount: Some(300.0),
            items: vec![LineItem {
                description: "Pump".to_string(),
                quantity: Some(2.0),
                unit_price: Some(150.0),
                total: Some(300.0),
            }],
            status: QuoteStatus::Completed,
            original_text: "Quotation from Acme Co for industrial pumps".to_string(),
            raw_response: "{}".to_string(),
        }
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_quote(&pump_quote()).unwrap();
        assert!(id >= 1);

        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.supplier.as_deref(), Some("Acme Co"));
        assert_eq!(record.quote_date.as_deref(), Some("2025-03-14"));
        assert_eq!(record.total_amount, Some(300.0));
        assert_eq!(record.items.len(), 1);
        assert_eq!(record.items[0].description, "Pump");
        assert_eq!(record.items[0].quantity, Some(2.0));
        assert_eq!(record.items[0].unit_price, Some(150.0));
        assert_eq!(record.status, QuoteStatus::Completed);
    }

    #[test]
    fn test_item_order_preserved() {
        let db = Database::in_memory().unwrap();
        let mut quote = pump_quote();
        quote.items = (0..10)
            .map(|i| LineItem {
                description: format!("item {}", i),
                quantity: Some(i as f64),
                unit_price: None,
                total: None,
            })
            .collect();
        let id = db.insert_quote(&quote).unwrap();
        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.items.len(), 10);
        for (i, item) in record.items.iter().enumerate() {
            assert_eq!(item.description, format!("item {}", i));
        }
    }

    #[test]
    fn test_ids_never_reused_after_delete() {
        let db = Database::in_memory().unwrap();
        let first = db.insert_quote(&pump_quote()).unwrap();
        let second = db.insert_quote(&pump_quote()).unwrap();
        assert!(second > first);

        assert!(db.delete_quote(second).unwrap());
        assert!(db.get_quote(second).unwrap().is_none());

        let third = db.insert_quote(&pump_quote()).unwrap();
        assert!(third > second, "id {} was reused (last was {})", third, second);
    }

    #[test]
    fn test_clear_all_empties_both_tables() {
        let db = Database::in_memory().unwrap();
        db.insert_quote(&pump_quote()).unwrap();
        let last = db.insert_quote(&pump_quote()).unwrap();

        db.clear_all().unwrap();

        let summary = db.summary().unwrap();
        assert_eq!(summary.total_quotes, 0);
        assert_eq!(summary.total_amount, 0.0);
        assert!(db.supplier_statistics().unwrap().is_empty());
        let orphans: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM line_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0, "line items must not survive a clear");

        // The id sequence survives a clear, so ids stay monotonic
        let next = db.insert_quote(&pump_quote()).unwrap();
        assert!(next > last, "id {} was reused after clear (last was {})", next, last);
    }

    #[test]
    fn test_recent_quotes_newest_first() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_quote(&pump_quote()).unwrap();
        let b = db.insert_quote(&pump_quote()).unwrap();
        let c = db.insert_quote(&pump_quote()).unwrap();

        let recent = db.recent_quotes(2).unwrap();
        let ids: Vec<i64> = recent.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![c, b]);
        assert!(!ids.contains(&a));
        // Line items come back with the records
        assert_eq!(recent[0].items.len(), 1);

        assert!(db.recent_quotes(100).unwrap().len() == 3);
    }

    #[test]
    fn test_database_path_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("quotes.db");
        let db = Database::new(&file).unwrap();
        assert_eq!(db.get_path(), file.to_string_lossy());
        assert_eq!(Database::in_memory().unwrap().get_path(), ":memory:");
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let db = Database::in_memory().unwrap();
        assert!(!db.delete_quote(999).unwrap());
        assert!(!db.update_quote(999, &QuoteUpdate::default()).unwrap());
        assert!(db.get_quote(999).unwrap().is_none());
    }

    #[test]
    fn test_partial_update() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_quote(&pump_quote()).unwrap();

        let update = QuoteUpdate {
            supplier: Some("Acme Corporation".to_string()),
            status: Some(QuoteStatus::Archived),
            ..Default::default()
        };
        assert!(db.update_quote(id, &update).unwrap());

        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.supplier.as_deref(), Some("Acme Corporation"));
        assert_eq!(record.status, QuoteStatus::Archived);
        // Untouched fields survive
        assert_eq!(record.quote_date.as_deref(), Some("2025-03-14"));
        assert_eq!(record.items.len(), 1);
    }

    #[test]
    fn test_search_filters() {
        let db = Database::in_memory().unwrap();
        db.insert_quote(&pump_quote()).unwrap();

        let mut other = pump_quote();
        other.supplier = Some("Globex".to_string());
        other.quote_date = Some("2025-06-01".to_string());
        other.total_amount = Some(9000.0);
        db.insert_quote(&other).unwrap();

        let by_supplier = db
            .search_quotes(&QuoteFilter { supplier: Some("acme".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(by_supplier.len(), 1);
        assert_eq!(by_supplier[0].supplier.as_deref(), Some("Acme Co"));

        let by_date = db
            .search_quotes(&QuoteFilter {
                date_from: Some("2025-05-01".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_date.len(), 1);
        assert_eq!(by_date[0].supplier.as_deref(), Some("Globex"));

        let by_amount = db
            .search_quotes(&QuoteFilter { max_total: Some(1000.0), ..Default::default() })
            .unwrap();
        assert_eq!(by_amount.len(), 1);
        assert_eq!(by_amount[0].total_amount, Some(300.0));

        let by_text = db
            .search_quotes(&QuoteFilter {
                query: Some("industrial".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_text.len(), 2);
    }

    #[test]
    fn test_search_is_idempotent() {
        let db = Database::in_memory().unwrap();
        for _ in 0..5 {
            db.insert_quote(&pump_quote()).unwrap();
        }
        let filter = QuoteFilter { supplier: Some("Acme".to_string()), ..Default::default() };
        let first = db.search_quotes(&filter).unwrap();
        let second = db.search_quotes(&filter).unwrap();
        let first_ids: Vec<i64> = first.iter().map(|q| q.id).collect();
        let second_ids: Vec<i64> = second.iter().map(|q| q.id).collect();
        assert_eq!(first_ids, second_ids);
        // Default sort is insertion order
        let mut sorted = first_ids.clone();
        sorted.sort();
        assert_eq!(first_ids, sorted);
    }

    #[test]
    fn test_statistics() {
        let db = Database::in_memory().unwrap();
        db.insert_quote(&pump_quote()).unwrap();
        db.insert_quote(&pump_quote()).unwrap();

        let mut other = pump_quote();
        other.supplier = Some("Globex".to_string());
        other.quote_date = Some("2025-06-01".to_string());
        other.total_amount = Some(700.0);
        db.insert_quote(&other).unwrap();

        let suppliers = db.supplier_statistics().unwrap();
        assert_eq!(suppliers.len(), 2);
        assert_eq!(suppliers[0].supplier, "Acme Co");
        assert_eq!(suppliers[0].quote_count, 2);
        assert_eq!(suppliers[0].total_amount, 600.0);

        let months = db.monthly_statistics().unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2025-03");
        assert_eq!(months[0].quote_count, 2);
        assert_eq!(months[1].month, "2025-06");

        let summary = db.summary().unwrap();
        assert_eq!(summary.total_quotes, 3);
        assert_eq!(summary.total_amount, 1300.0);
        assert_eq!(summary.supplier_count, 2);
        assert!((summary.average_amount - 1300.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_replace_analysis_rewrites_items() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_quote(&pump_quote()).unwrap();

        let mut reanalyzed = pump_quote();
        reanalyzed.supplier = Some("Acme Co Ltd".to_string());
        reanalyzed.items = vec![
            LineItem {
                description: "Pump (revised)".to_string(),
                quantity: Some(3.0),
                unit_price: Some(140.0),
                total: Some(420.0),
            },
            LineItem { description: "Spare seals".to_string(), quantity: Some(1.0), unit_price: None, total: None },
        ];
        reanalyzed.total_amount = Some(420.0);
        assert!(db.replace_analysis(id, &reanalyzed).unwrap());
        assert!(!db.replace_analysis(9999, &reanalyzed).unwrap());

        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.supplier.as_deref(), Some("Acme Co Ltd"));
        assert_eq!(record.items.len(), 2);
        assert_eq!(record.items[0].description, "Pump (revised)");
        // Extraction provenance is untouched
        assert_eq!(record.original_text, "Quotation from Acme Co for industrial pumps");
    }

    #[test]
    fn test_quote_without_analysis_fields() {
        let db = Database::in_memory().unwrap();
        let quote = NewQuote {
            filename: "scan.pdf".to_string(),
            original_text: "unreadable".to_string(),
            ..Default::default()
        };
        let id = db.insert_quote(&quote).unwrap();
        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.supplier, None);
        assert_eq!(record.total_amount, None);
        assert!(record.items.is_empty());
        assert_eq!(record.status, QuoteStatus::Pending);
    }
}
