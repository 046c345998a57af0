use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    #[default]
    Pending,
    Completed,
    Archived,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Completed => "completed",
            QuoteStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QuoteStatus::Pending),
            "completed" => Some(QuoteStatus::Completed),
            "archived" => Some(QuoteStatus::Archived),
            _ => None,
        }
    }
}

/// One line of an analyzed quotation (a single piece of equipment).
///
/// All numeric fields are optional: the analyzer leaves a field empty when the
/// source text or the model reply doesn't contain a parseable value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub description: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

/// A persisted quotation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteRecord {
    pub id: i64,
    pub filename: String,
    pub supplier: Option<String>,
    /// Quote date as written in the document, normalized to YYYY-MM-DD when possible
    pub quote_date: Option<String>,
    pub currency: Option<String>,
    pub total_amount: Option<f64>,
    pub items: Vec<LineItem>,
    pub status: QuoteStatus,
    /// Full extracted text the analysis was run on
    pub original_text: String,
    /// Verbatim model reply, kept for manual inspection of degraded parses
    pub raw_response: String,
    /// Unix timestamp (seconds) of insertion
    pub created_at: i64,
}

/// Partial update applied to an existing quote. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct QuoteUpdate {
    pub supplier: Option<String>,
    pub quote_date: Option<String>,
    pub currency: Option<String>,
    pub total_amount: Option<f64>,
    pub status: Option<QuoteStatus>,
}

/// Search filters. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct QuoteFilter {
    /// Case-insensitive substring match on supplier
    pub supplier: Option<String>,
    /// Inclusive quote_date lower bound (YYYY-MM-DD)
    pub date_from: Option<String>,
    /// Inclusive quote_date upper bound (YYYY-MM-DD)
    pub date_to: Option<String>,
    pub min_total: Option<f64>,
    pub max_total: Option<f64>,
    /// Free text matched against supplier, filename and extracted text
    pub query: Option<String>,
    pub status: Option<QuoteStatus>,
    pub sort: SortKey,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SortKey {
    /// Insertion order (ascending id) - the default
    #[default]
    Id,
    Date,
    Amount,
    Supplier,
}

impl SortKey {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "id" => Some(SortKey::Id),
            "date" => Some(SortKey::Date),
            "amount" => Some(SortKey::Amount),
            "supplier" => Some(SortKey::Supplier),
            _ => None,
        }
    }
}

/// Per-supplier aggregate row (quote count and summed amounts).
#[derive(Debug, Clone, Serialize)]
pub struct SupplierStats {
    pub supplier: String,
    pub quote_count: i64,
    pub total_amount: f64,
}

/// Per-month aggregate row, keyed by "YYYY-MM" of the quote date.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyStats {
    pub month: String,
    pub quote_count: i64,
    pub total_amount: f64,
}

/// Database-wide headline numbers (dashboard card values).
#[derive(Debug, Clone, Serialize)]
pub struct DbSummary {
    pub total_quotes: i64,
    pub total_amount: f64,
    pub supplier_count: i64,
    pub average_amount: f64,
}
