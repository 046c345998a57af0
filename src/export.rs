//! Export formats for analyzed quotes
//!
//! Two shapes: tabular CSV with one row per line item, and nested JSON with
//! one object per quote.

use serde::Serialize;

use crate::db::{LineItem, QuoteRecord};

/// Nested per-quote export shape (the stable external schema).
#[derive(Debug, Serialize)]
pub struct QuoteExport<'a> {
    pub id: i64,
    pub vendor: Option<&'a str>,
    pub date: Option<&'a str>,
    pub currency: Option<&'a str>,
    pub items: &'a [LineItem],
    pub total_amount: Option<f64>,
    pub source_filename: &'a str,
}

impl<'a> From<&'a QuoteRecord> for QuoteExport<'a> {
    fn from(record: &'a QuoteRecord) -> Self {
        Self {
            id: record.id,
            vendor: record.supplier.as_deref(),
            date: record.quote_date.as_deref(),
            currency: record.currency.as_deref(),
            items: &record.items,
            total_amount: record.total_amount,
            source_filename: &record.filename,
        }
    }
}

pub fn to_json(records: &[QuoteRecord]) -> Result<String, serde_json::Error> {
    let exports: Vec<QuoteExport> = records.iter().map(QuoteExport::from).collect();
    serde_json::to_string_pretty(&exports)
}

const CSV_HEADER: &str = "quote_id,supplier,quote_date,currency,description,quantity,unit_price,total,source_filename";

/// One row per line item; quotes without items still get a single row with
/// empty item columns so every quote appears in the export.
pub fn to_csv(records: &[QuoteRecord]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for record in records {
        let prefix = [
            record.id.to_string(),
            csv_escape(record.supplier.as_deref().unwrap_or("")),
            csv_escape(record.quote_date.as_deref().unwrap_or("")),
            csv_escape(record.currency.as_deref().unwrap_or("")),
        ]
        .join(",");
        let suffix = csv_escape(&record.filename);

        if record.items.is_empty() {
            out.push_str(&format!("{},,,,{}\n", prefix, suffix));
            continue;
        }

        for item in &record.items {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                prefix,
                csv_escape(&item.description),
                number_cell(item.quantity),
                number_cell(item.unit_price),
                number_cell(item.total),
                suffix,
            ));
        }
    }
    out
}

fn number_cell(value: Option<f64>) -> String {
    match value {
        Some(n) => format!("{}", n),
        None => String::new(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::QuoteStatus;

    fn record() -> QuoteRecord {
        QuoteRecord {
            id: 7,
            filename: "acme.pdf".to_string(),
            supplier: Some("Acme, Inc. \"West\"".to_string()),
            quote_date: Some("2025-03-14".to_string()),
            currency: Some("USD".to_string()),
            total_amount: Some(300.0),
            items: vec![
                LineItem {
                    description: "Pump, centrifugal".to_string(),
                    quantity: Some(2.0),
                    unit_price: Some(150.0),
                    total: Some(300.0),
                },
                LineItem { description: "Gasket".to_string(), quantity: None, unit_price: None, total: None },
            ],
            status: QuoteStatus::Completed,
            original_text: String::new(),
            raw_response: String::new(),
            created_at: 0,
        }
    }

    #[test]
    fn test_csv_one_row_per_item() {
        let csv = to_csv(&[record()]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3); // header + two items
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("\"Acme, Inc. \"\"West\"\"\""));
        assert!(lines[1].contains("\"Pump, centrifugal\""));
        assert!(lines[1].contains("150"));
        // Missing numerics become empty cells, not zeros
        assert!(lines[2].contains("Gasket,,,"));
    }

    #[test]
    fn test_csv_itemless_quote_still_exported() {
        let mut r = record();
        r.items.clear();
        let csv = to_csv(&[r]);
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn test_json_schema_fields() {
        let json = to_json(&[record()]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let quote = &parsed[0];
        assert_eq!(quote["id"], 7);
        assert_eq!(quote["vendor"], "Acme, Inc. \"West\"");
        assert_eq!(quote["date"], "2025-03-14");
        assert_eq!(quote["source_filename"], "acme.pdf");
        assert_eq!(quote["items"].as_array().unwrap().len(), 2);
        assert_eq!(quote["items"][0]["unit_price"], 150.0);
    }
}
