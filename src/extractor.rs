//! PDF text extraction
//!
//! Direct text-layer extraction via pdf-extract, with an OCR fallback for
//! scanned documents (pdftoppm renders pages to images, tesseract reads them).
//! Extraction never fails the pipeline: corrupt input produces an empty,
//! unsuccessful result that downstream stages handle gracefully.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Direct,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Direct => "direct",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Some(true) forces OCR, Some(false) forbids it, None = automatic fallback
    pub use_ocr: Option<bool>,
    /// Tesseract language pack, e.g. "eng" or "chi_sim"
    pub ocr_language: String,
    /// Page rendering resolution for the OCR path
    pub dpi: u32,
    /// Direct extraction shorter than this (in chars) triggers the fallback
    pub min_text_chars: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            use_ocr: None,
            ocr_language: "eng".to_string(),
            dpi: 300,
            min_text_chars: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub filename: String,
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: Option<usize>,
    pub success: bool,
    /// Human-readable reason when success is false
    pub error: Option<String>,
}

impl ExtractionResult {
    fn failed(filename: &str, method: ExtractionMethod, reason: String) -> Self {
        Self {
            filename: filename.to_string(),
            text: String::new(),
            method,
            page_count: None,
            success: false,
            error: Some(reason),
        }
    }
}

/// Extract text from PDF bytes.
///
/// Tries the text layer first and falls back to OCR when the direct result is
/// shorter than `min_text_chars` (unless OCR is forbidden). A corrupt or
/// unreadable document yields `success: false` with empty text, never an error.
pub fn extract(bytes: &[u8], filename: &str, opts: &ExtractOptions) -> ExtractionResult {
    if opts.use_ocr == Some(true) {
        return extract_with_ocr(bytes, filename, opts);
    }

    match extract_direct(bytes) {
        Ok(text) if !needs_ocr(&text, opts) => {
            // Covers the OCR-forbidden case too; empty text is a failure then.
            let success = !text.trim().is_empty();
            ExtractionResult {
                filename: filename.to_string(),
                text,
                method: ExtractionMethod::Direct,
                page_count: None,
                success,
                error: if success { None } else { Some("no text layer found".to_string()) },
            }
        }
        Ok(text) => {
            let ocr = extract_with_ocr(bytes, filename, opts);
            if ocr.success {
                ocr
            } else if !text.trim().is_empty() {
                // OCR unavailable or failed; the thin direct text is still
                // better than nothing.
                ExtractionResult {
                    filename: filename.to_string(),
                    text,
                    method: ExtractionMethod::Direct,
                    page_count: None,
                    success: true,
                    error: None,
                }
            } else {
                ocr
            }
        }
        Err(reason) => {
            if opts.use_ocr == Some(false) {
                return ExtractionResult::failed(filename, ExtractionMethod::Direct, reason);
            }
            // A broken text layer doesn't rule out readable page images.
            let ocr = extract_with_ocr(bytes, filename, opts);
            if ocr.success {
                ocr
            } else {
                ExtractionResult::failed(filename, ExtractionMethod::Direct, reason)
            }
        }
    }
}

/// Whether the direct extraction result is too thin to trust.
pub fn needs_ocr(text: &str, opts: &ExtractOptions) -> bool {
    match opts.use_ocr {
        Some(true) => true,
        Some(false) => false,
        None => text.trim().chars().count() < opts.min_text_chars,
    }
}

fn extract_direct(bytes: &[u8]) -> Result<String, String> {
    // pdf-extract panics on some malformed files; contain that here so a bad
    // upload can't take the process down.
    let bytes = bytes.to_vec();
    match std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem(&bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("text extraction failed: {}", e)),
        Err(_) => Err("text extraction failed: malformed document".to_string()),
    }
}

/// Check that the OCR toolchain (pdftoppm and tesseract) is installed.
pub fn ocr_available() -> bool {
    let pdftoppm = Command::new("pdftoppm").arg("-v").output().is_ok();
    let tesseract = Command::new("tesseract").arg("--version").output().is_ok();
    pdftoppm && tesseract
}

/// Render each page to a PNG in a scoped temp directory and OCR them in page
/// order. The directory is removed when the guard drops, on every exit path.
fn extract_with_ocr(bytes: &[u8], filename: &str, opts: &ExtractOptions) -> ExtractionResult {
    if !ocr_available() {
        return ExtractionResult::failed(
            filename,
            ExtractionMethod::Ocr,
            "OCR requires pdftoppm (poppler-utils) and tesseract to be installed".to_string(),
        );
    }

    let temp_dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            return ExtractionResult::failed(
                filename,
                ExtractionMethod::Ocr,
                format!("cannot create temp dir: {}", e),
            )
        }
    };

    let pdf_path = temp_dir.path().join("input.pdf");
    if let Err(e) = std::fs::File::create(&pdf_path).and_then(|mut f| f.write_all(bytes)) {
        return ExtractionResult::failed(
            filename,
            ExtractionMethod::Ocr,
            format!("cannot write temp file: {}", e),
        );
    }

    let output_prefix = temp_dir.path().join("page");
    let render = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(opts.dpi.to_string())
        .arg(&pdf_path)
        .arg(&output_prefix)
        .output();

    match render {
        Ok(out) if out.status.success() => {}
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return ExtractionResult::failed(
                filename,
                ExtractionMethod::Ocr,
                format!("pdftoppm failed: {}", stderr.trim()),
            );
        }
        Err(e) => {
            return ExtractionResult::failed(
                filename,
                ExtractionMethod::Ocr,
                format!("failed to run pdftoppm: {}", e),
            )
        }
    }

    let mut pages = match page_images(temp_dir.path()) {
        Ok(p) => p,
        Err(e) => return ExtractionResult::failed(filename, ExtractionMethod::Ocr, e),
    };
    if pages.is_empty() {
        return ExtractionResult::failed(
            filename,
            ExtractionMethod::Ocr,
            "pdftoppm produced no pages".to_string(),
        );
    }
    pages.sort();

    let mut page_texts = Vec::with_capacity(pages.len());
    for page in &pages {
        let out = Command::new("tesseract")
            .arg(page)
            .arg("stdout")
            .arg("-l")
            .arg(&opts.ocr_language)
            .output();
        match out {
            Ok(out) if out.status.success() => {
                page_texts.push(String::from_utf8_lossy(&out.stdout).into_owned());
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                return ExtractionResult::failed(
                    filename,
                    ExtractionMethod::Ocr,
                    format!("tesseract failed: {}", stderr.trim()),
                );
            }
            Err(e) => {
                return ExtractionResult::failed(
                    filename,
                    ExtractionMethod::Ocr,
                    format!("failed to run tesseract: {}", e),
                )
            }
        }
    }

    let text = page_texts.join("\n");
    let success = !text.trim().is_empty();
    ExtractionResult {
        filename: filename.to_string(),
        text,
        method: ExtractionMethod::Ocr,
        page_count: Some(pages.len()),
        success,
        error: if success { None } else { Some("OCR produced no text".to_string()) },
    }
}

fn page_images(dir: &Path) -> Result<Vec<std::path::PathBuf>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("cannot list temp dir: {}", e))?;
    Ok(entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "png").unwrap_or(false))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_ocr_threshold() {
        let opts = ExtractOptions { min_text_chars: 50, ..Default::default() };
        assert!(needs_ocr("", &opts));
        assert!(needs_ocr("   \n\t  ", &opts));
        assert!(needs_ocr("short scan artifact", &opts));
        let long = "Quotation for industrial pumps, valves and fittings, net 30 days.";
        assert!(!needs_ocr(long, &opts));
    }

    #[test]
    fn test_needs_ocr_force_and_forbid() {
        let force = ExtractOptions { use_ocr: Some(true), ..Default::default() };
        assert!(needs_ocr("plenty of text that would normally be enough to skip the fallback", &force));

        let forbid = ExtractOptions { use_ocr: Some(false), ..Default::default() };
        assert!(!needs_ocr("", &forbid));
    }

    #[test]
    fn test_corrupt_bytes_degrade_not_panic() {
        let opts = ExtractOptions { use_ocr: Some(false), ..Default::default() };
        let result = extract(b"not a pdf at all", "garbage.bin", &opts);
        assert!(!result.success);
        assert!(result.text.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_empty_input_degrades() {
        let opts = ExtractOptions { use_ocr: Some(false), ..Default::default() };
        let result = extract(b"", "empty.pdf", &opts);
        assert!(!result.success);
        assert!(result.text.is_empty());
    }
}
