//! End-to-end document processing
//!
//! One document flows extract -> analyze -> insert within a single call.
//! Extraction failures and degraded analyses still persist a record (so the
//! text can be re-analyzed later); only credential, quota, rejected-request
//! and storage failures propagate to the caller.

use thiserror::Error;

use crate::analyzer::{Analyzer, AnalyzerError, QuoteAnalysis};
use crate::db::{Database, NewQuote, QuoteStatus};
use crate::extractor::{self, ExtractOptions, ExtractionResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Analysis(#[from] AnalyzerError),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Retry policy for transient analysis failures. Only network errors are
/// retried; auth, quota and rejected-request errors fail immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, backoff_ms: 1500 }
    }
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub id: i64,
    pub extraction: ExtractionResult,
    pub analysis: QuoteAnalysis,
    pub status: QuoteStatus,
}

/// Process one document end to end and persist the result.
pub async fn process_document(
    bytes: &[u8],
    filename: &str,
    opts: &ExtractOptions,
    analyzer: &Analyzer,
    retry: RetryPolicy,
    db: &Database,
) -> Result<ProcessOutcome, PipelineError> {
    let extraction = extractor::extract(bytes, filename, opts);

    let analysis = analyze_with_retry(analyzer, &extraction.text, filename, retry).await?;

    let status = if analysis.is_empty() {
        QuoteStatus::Pending
    } else {
        QuoteStatus::Completed
    };

    let id = db.insert_quote(&NewQuote {
        filename: filename.to_string(),
        supplier: analysis.supplier.clone(),
        quote_date: analysis.quote_date.clone(),
        currency: analysis.currency.clone(),
        total_amount: analysis.total_amount,
        items: analysis.items.clone(),
        status,
        original_text: extraction.text.clone(),
        raw_response: analysis.raw_response.clone(),
    })?;

    Ok(ProcessOutcome { id, extraction, analysis, status })
}

/// Run the analyzer, retrying network failures per the policy.
pub async fn analyze_with_retry(
    analyzer: &Analyzer,
    text: &str,
    filename: &str,
    retry: RetryPolicy,
) -> Result<QuoteAnalysis, AnalyzerError> {
    let mut attempt = 0;
    loop {
        match analyzer.analyze(text, filename).await {
            Ok(analysis) => return Ok(analysis),
            Err(AnalyzerError::Network(_)) if attempt < retry.max_retries => {
                attempt += 1;
                let wait = retry.backoff_ms * u64::from(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parse_quote_reply;

    // The analyzer half of the pipeline is exercised against the live API
    // elsewhere; these tests cover the persistence decisions.

    #[test]
    fn test_empty_analysis_stored_as_pending() {
        let db = Database::in_memory().unwrap();
        let analysis = parse_quote_reply("no json here");
        assert!(analysis.is_empty());

        let status = if analysis.is_empty() { QuoteStatus::Pending } else { QuoteStatus::Completed };
        let id = db
            .insert_quote(&NewQuote {
                filename: "scan.pdf".to_string(),
                status,
                original_text: String::new(),
                raw_response: analysis.raw_response.clone(),
                ..Default::default()
            })
            .unwrap();

        let record = db.get_quote(id).unwrap().unwrap();
        assert_eq!(record.status, QuoteStatus::Pending);
        assert_eq!(record.raw_response, "no json here");
    }
}
