//! QuoteDesk: equipment quotation ingestion
//!
//! Pipeline: PDF bytes -> text (direct extraction or OCR fallback) -> AI
//! structured-field analysis -> SQLite storage with search, statistics and
//! export.

pub mod analyzer;
pub mod db;
pub mod export;
pub mod extractor;
pub mod pipeline;
pub mod settings;
