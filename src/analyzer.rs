//! Anthropic Claude API client for quotation analysis
//!
//! Sends extracted quotation text with a fixed JSON schema prompt and parses
//! the reply into a structured analysis. A malformed reply is never an error:
//! the parse degrades to empty fields with the raw reply preserved verbatim.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::db::LineItem;

/// Errors surfaced to the caller. Parse problems in the model reply are not
/// part of this taxonomy - they degrade into the result instead.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Transient transport failure (includes timeouts); the caller may retry
    #[error("network error: {0}")]
    Network(String),
    /// Invalid or missing credential; fatal for the session
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Rate or usage limit hit; the caller should back off
    #[error("quota exceeded: {0}")]
    Quota(String),
    /// The API rejected the request itself (other 4xx); retrying the same
    /// request cannot succeed
    #[error("request rejected: {0}")]
    InvalidRequest(String),
}

/// Which sections the prompt asks the model to fill in.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisSections {
    pub supplier: bool,
    pub items: bool,
    pub pricing: bool,
    pub dates: bool,
}

impl Default for AnalysisSections {
    fn default() -> Self {
        Self { supplier: true, items: true, pricing: true, dates: true }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// Input text beyond this many bytes is truncated (at a char boundary)
    pub max_input_chars: usize,
    pub sections: AnalysisSections,
}

impl AnalyzerConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "claude-haiku-4-5-20251001".to_string(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            request_timeout_secs: 120,
            max_input_chars: 12000,
            sections: AnalysisSections::default(),
        }
    }
}

/// Structured result of analyzing one quotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteAnalysis {
    pub supplier: Option<String>,
    pub quote_date: Option<String>,
    pub currency: Option<String>,
    pub items: Vec<LineItem>,
    pub total_amount: Option<f64>,
    /// Verbatim model reply (or empty when no API call was made)
    pub raw_response: String,
}

impl QuoteAnalysis {
    pub fn empty(raw_response: String) -> Self {
        Self {
            supplier: None,
            quote_date: None,
            currency: None,
            items: Vec::new(),
            total_amount: None,
            raw_response,
        }
    }

    /// True when analysis produced nothing usable (degraded or empty input).
    pub fn is_empty(&self) -> bool {
        self.supplier.is_none()
            && self.quote_date.is_none()
            && self.items.is_empty()
            && self.total_amount.is_none()
    }
}

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Anthropic API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

pub struct Analyzer {
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AnalyzerError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Analyze extracted quotation text with a single API call.
    ///
    /// Empty input short-circuits to an empty analysis without calling the API.
    pub async fn analyze(&self, text: &str, filename: &str) -> Result<QuoteAnalysis, AnalyzerError> {
        if text.trim().is_empty() {
            return Ok(QuoteAnalysis::empty(String::new()));
        }

        // Truncate long documents at a safe UTF-8 boundary
        let text_preview = if text.len() > self.config.max_input_chars {
            let mut end = self.config.max_input_chars;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let prompt = build_prompt(text_preview, filename, &self.config.sections);

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: 2000,
            messages: vec![Message { role: "user".to_string(), content: prompt }],
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalyzerError::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Network(format!("failed to parse response: {}", e)))?;

        let reply = api_response
            .content
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default();

        Ok(parse_quote_reply(&reply))
    }
}

/// Map a non-success HTTP status to the error taxonomy. Only server-side
/// failures become Network (the retryable class); other client errors are
/// permanent for the request that produced them.
fn classify_http_error(status: reqwest::StatusCode, body: &str) -> AnalyzerError {
    let detail = format!("API error {}: {}", status, body);
    match status.as_u16() {
        401 | 403 => AnalyzerError::Auth(detail),
        429 => AnalyzerError::Quota(detail),
        400..=499 => AnalyzerError::InvalidRequest(detail),
        _ => AnalyzerError::Network(detail),
    }
}

/// Deterministic prompt: the same text and options always build the same string.
fn build_prompt(text: &str, filename: &str, sections: &AnalysisSections) -> String {
    let mut fields = String::new();
    if sections.supplier {
        fields.push_str("- \"supplier\": company name issuing the quote, or null\n");
    }
    if sections.dates {
        fields.push_str("- \"quote_date\": quote date as YYYY-MM-DD, or null\n");
    }
    if sections.pricing {
        fields.push_str("- \"currency\": ISO currency code (USD, EUR, CNY...), or null\n");
        fields.push_str("- \"total_amount\": grand total as a number, or null\n");
    }
    if sections.items {
        fields.push_str(
            "- \"items\": array of equipment line items, each \
             {\"description\": string, \"quantity\": number or null, \
             \"unit_price\": number or null, \"total\": number or null}\n",
        );
    }

    format!(
        r#"Extract structured data from this equipment quotation.

SOURCE FILE: {}

TEXT:
{}

Return a single JSON object with exactly these fields:
{}
Use null for anything not present in the text. Numbers must be plain JSON numbers without currency symbols or thousands separators.

JSON only, no commentary."#,
        filename, text, fields
    )
}

/// Parse the model reply into a QuoteAnalysis.
///
/// Never fails: anything that doesn't parse degrades to empty fields with the
/// raw reply kept for manual inspection.
pub fn parse_quote_reply(reply: &str) -> QuoteAnalysis {
    let json_text = strip_markdown_fence(reply);

    let parsed: Option<Value> = serde_json::from_str(&json_text).ok().or_else(|| {
        // Model wrapped the object in prose; try the outermost braces.
        let start = json_text.find('{')?;
        let end = json_text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&json_text[start..=end]).ok()
    });

    let json = match parsed {
        Some(v) => v,
        None => return QuoteAnalysis::empty(reply.to_string()),
    };

    let supplier = string_field(&json, &["supplier", "vendor"]);
    let quote_date = string_field(&json, &["quote_date", "date"]);
    let currency = string_field(&json, &["currency"]);

    let items: Vec<LineItem> = json
        .get("items")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let description = item
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    if description.is_empty() {
                        return None;
                    }
                    Some(LineItem {
                        description,
                        quantity: lenient_number(item.get("quantity")),
                        unit_price: lenient_number(item.get("unit_price")),
                        total: lenient_number(item.get("total")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let total_amount = lenient_number(json.get("total_amount")).or_else(|| {
        // Fall back to summing line totals when the model skipped the grand total
        let totals: Vec<f64> = items.iter().filter_map(|i| i.total).collect();
        if totals.is_empty() {
            None
        } else {
            Some(totals.iter().sum())
        }
    });

    QuoteAnalysis {
        supplier,
        quote_date,
        currency,
        items,
        total_amount,
        raw_response: reply.to_string(),
    }
}

fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed
            .lines()
            .skip(1)
            .take_while(|l| !l.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        trimmed.to_string()
    }
}

fn string_field(json: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = json.get(key).and_then(|v| v.as_str()) {
            let s = s.trim();
            if !s.is_empty() && s.to_lowercase() != "null" && s != "N/A" {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Lenient numeric parse: accepts JSON numbers directly; for strings, strips
/// currency symbols and thousands separators. An unparseable token yields None
/// rather than failing the record.
fn lenient_number(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?;
    parse_money(s)
}

// First number-shaped token, e.g. "1,234.56" out of "USD $1,234.56 net"
static MONEY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,\s']*(?:\.\d+)?").unwrap());

pub fn parse_money(s: &str) -> Option<f64> {
    let token = MONEY_TOKEN.find(s)?.as_str();
    let cleaned: String = token.chars().filter(|c| !matches!(c, ',' | ' ' | '\'')).collect();
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_reply() {
        let reply = r#"{"supplier": "Acme Co", "quote_date": "2025-03-14", "currency": "USD",
            "items": [{"description": "Pump", "quantity": 2, "unit_price": 150.0, "total": 300.0}],
            "total_amount": 300.0}"#;
        let analysis = parse_quote_reply(reply);
        assert_eq!(analysis.supplier.as_deref(), Some("Acme Co"));
        assert_eq!(analysis.quote_date.as_deref(), Some("2025-03-14"));
        assert_eq!(analysis.currency.as_deref(), Some("USD"));
        assert_eq!(analysis.items.len(), 1);
        assert_eq!(analysis.items[0].quantity, Some(2.0));
        assert_eq!(analysis.total_amount, Some(300.0));
        assert_eq!(analysis.raw_response, reply);
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"supplier\": \"Globex\", \"items\": []}\n```";
        let analysis = parse_quote_reply(reply);
        assert_eq!(analysis.supplier.as_deref(), Some("Globex"));
        assert!(analysis.items.is_empty());
    }

    #[test]
    fn test_parse_reply_with_prose() {
        let reply = "Here is the extracted data:\n{\"supplier\": \"Initech\"}\nLet me know if you need more.";
        let analysis = parse_quote_reply(reply);
        assert_eq!(analysis.supplier.as_deref(), Some("Initech"));
    }

    #[test]
    fn test_malformed_reply_degrades() {
        let reply = "Sorry, I could not find any quotation data in that text.";
        let analysis = parse_quote_reply(reply);
        assert!(analysis.is_empty());
        assert_eq!(analysis.raw_response, reply);

        let truncated = r#"{"supplier": "Acme", "items": [{"descrip"#;
        let analysis = parse_quote_reply(truncated);
        assert!(analysis.supplier.is_none());
        assert_eq!(analysis.raw_response, truncated);
    }

    #[test]
    fn test_vendor_alias_accepted() {
        let analysis = parse_quote_reply(r#"{"vendor": "Acme Co"}"#);
        assert_eq!(analysis.supplier.as_deref(), Some("Acme Co"));
    }

    #[test]
    fn test_lenient_numbers_in_items() {
        let reply = r#"{"supplier": "Acme", "items": [
            {"description": "Pump", "quantity": "2", "unit_price": "$1,234.56", "total": "¥3 000"},
            {"description": "Valve", "quantity": "N/A", "unit_price": null, "total": "unknown"}
        ]}"#;
        let analysis = parse_quote_reply(reply);
        assert_eq!(analysis.items[0].quantity, Some(2.0));
        assert_eq!(analysis.items[0].unit_price, Some(1234.56));
        assert_eq!(analysis.items[0].total, Some(3000.0));
        assert_eq!(analysis.items[1].quantity, None);
        assert_eq!(analysis.items[1].total, None);
    }

    #[test]
    fn test_total_falls_back_to_item_sum() {
        let reply = r#"{"items": [
            {"description": "Pump", "total": 100.0},
            {"description": "Valve", "total": 50.0}
        ]}"#;
        let analysis = parse_quote_reply(reply);
        assert_eq!(analysis.total_amount, Some(150.0));
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("$1,234.56"), Some(1234.56));
        assert_eq!(parse_money("1'500"), Some(1500.0));
        assert_eq!(parse_money("EUR 2 000.50"), Some(2000.50));
        assert_eq!(parse_money("-42"), Some(-42.0));
        assert_eq!(parse_money("N/A"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let sections = AnalysisSections::default();
        let a = build_prompt("some text", "quote.pdf", &sections);
        let b = build_prompt("some text", "quote.pdf", &sections);
        assert_eq!(a, b);
        assert!(a.contains("quote.pdf"));
        assert!(a.contains("\"supplier\""));
        assert!(a.contains("\"items\""));
    }

    #[test]
    fn test_prompt_sections_toggle() {
        let sections = AnalysisSections { supplier: true, items: false, pricing: false, dates: false };
        let prompt = build_prompt("text", "f.pdf", &sections);
        assert!(prompt.contains("\"supplier\""));
        assert!(!prompt.contains("\"items\""));
        assert!(!prompt.contains("\"total_amount\""));
    }

    #[test]
    fn test_http_status_classification() {
        use reqwest::StatusCode;
        let classify = |code: u16| classify_http_error(StatusCode::from_u16(code).unwrap(), "");
        assert!(matches!(classify(401), AnalyzerError::Auth(_)));
        assert!(matches!(classify(403), AnalyzerError::Auth(_)));
        assert!(matches!(classify(429), AnalyzerError::Quota(_)));
        // A rejected request stays rejected; it must not enter the retry path
        assert!(matches!(classify(400), AnalyzerError::InvalidRequest(_)));
        assert!(matches!(classify(413), AnalyzerError::InvalidRequest(_)));
        assert!(matches!(classify(404), AnalyzerError::InvalidRequest(_)));
        // Server-side trouble is the transient class
        assert!(matches!(classify(500), AnalyzerError::Network(_)));
        assert!(matches!(classify(529), AnalyzerError::Network(_)));
    }

    #[tokio::test]
    async fn test_empty_text_skips_api_call() {
        let analyzer = Analyzer::new(AnalyzerConfig::new("test-key".to_string())).unwrap();
        let analysis = analyzer.analyze("   ", "empty.pdf").await.unwrap();
        assert!(analysis.is_empty());
        assert!(analysis.raw_response.is_empty());
    }
}
