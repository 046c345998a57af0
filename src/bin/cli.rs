//! QuoteDesk CLI - command-line interface for the quotation pipeline
//!
//! Usage: quotedesk [OPTIONS] <COMMAND>
//!
//! Ingests quotation PDFs, runs AI analysis, and manages the quote database.
//! Supports JSON output for scripting.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use futures::{stream, StreamExt};
use quotedesk::analyzer::{Analyzer, AnalyzerConfig};
use quotedesk::db::{Database, QuoteFilter, QuoteStatus, QuoteUpdate, SortKey};
use quotedesk::export;
use quotedesk::extractor::{self, ExtractOptions};
use quotedesk::pipeline::{self, RetryPolicy};
use quotedesk::settings::{self, Settings};
use std::path::PathBuf;

// ============================================================================
// Logging Infrastructure
// ============================================================================

use chrono::{Datelike, Local, Timelike};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

/// Initialize logging - creates the daily log file and cleans old logs
fn init_logging() -> Option<PathBuf> {
    let log_dir = settings::app_data_dir().join("logs");

    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    // Clean logs older than 7 days
    if let Ok(entries) = fs::read_dir(&log_dir) {
        let cutoff = Local::now() - chrono::Duration::days(7);
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(date_str) = name
                    .strip_prefix("quotedesk-")
                    .and_then(|s| s.strip_suffix(".log"))
                {
                    if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                        if date < cutoff.date_naive() {
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
            }
        }
    }

    let today = Local::now();
    let log_filename = format!(
        "quotedesk-{:04}-{:02}-{:02}.log",
        today.year(),
        today.month(),
        today.day()
    );
    let log_path = log_dir.join(&log_filename);

    if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        *LOG_FILE.lock().unwrap() = Some(file);
        Some(log_path)
    } else {
        None
    }
}

fn log_to_file(msg: &str) {
    let now = Local::now();
    let timestamp = format!("[{:02}:{:02}:{:02}]", now.hour(), now.minute(), now.second());
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "{} {}", timestamp, msg);
        }
    }
}

/// Log to both terminal and file
fn log_both(msg: &str) {
    println!("{}", msg);
    log_to_file(msg);
}

/// Log error to both terminal and file
fn elog_both(msg: &str) {
    eprintln!("{}", msg);
    log_to_file(msg);
}

// ============================================================================
// CLI definition
// ============================================================================

#[derive(Parser)]
#[command(name = "quotedesk", version, about = "Equipment quotation manager")]
struct Cli {
    /// Override the database file path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest PDF quotations: extract, analyze and store
    Ingest {
        /// PDF files to process
        files: Vec<PathBuf>,
        /// Force OCR even when a text layer exists
        #[arg(long)]
        force_ocr: bool,
        /// Never fall back to OCR
        #[arg(long, conflicts_with = "force_ocr")]
        no_ocr: bool,
        /// Tesseract language pack (default from settings)
        #[arg(long)]
        lang: Option<String>,
        /// OCR rendering resolution (default from settings)
        #[arg(long)]
        dpi: Option<u32>,
        /// Parallel documents in flight
        #[arg(long, short, default_value = "2")]
        jobs: usize,
    },
    /// Extract text from a PDF without analyzing it
    Extract {
        file: PathBuf,
        #[arg(long)]
        force_ocr: bool,
        #[arg(long, conflicts_with = "force_ocr")]
        no_ocr: bool,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        dpi: Option<u32>,
    },
    /// Analyze text without extraction (from a file, stdin text, or a stored quote)
    Analyze {
        /// Read text from this file
        #[arg(long, conflicts_with_all = ["text", "quote"])]
        file: Option<PathBuf>,
        /// Analyze this literal text
        #[arg(long, conflicts_with = "quote")]
        text: Option<String>,
        /// Re-analyze the stored text of this quote id and save the result
        #[arg(long)]
        quote: Option<i64>,
    },
    /// Search stored quotes
    Search {
        /// Free-text query over supplier, filename and extracted text
        query: Option<String>,
        #[arg(long)]
        vendor: Option<String>,
        /// Inclusive date lower bound (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Inclusive date upper bound (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        min_total: Option<f64>,
        #[arg(long)]
        max_total: Option<f64>,
        /// Filter by status (pending, completed, archived)
        #[arg(long)]
        status: Option<String>,
        /// Sort key: id, date, amount, supplier
        #[arg(long, default_value = "id")]
        sort: String,
        #[arg(long, short, default_value = "50")]
        limit: u32,
        /// Output full records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one quote in full
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Update fields of a stored quote
    Update {
        id: i64,
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        total: Option<f64>,
        /// New status (pending, completed, archived)
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete a quote and its line items
    Delete { id: i64 },
    /// Delete every stored quote and line item
    Clear {
        /// Confirm the deletion (refused otherwise)
        #[arg(long)]
        yes: bool,
    },
    /// Recently ingested quotes
    Recent {
        #[arg(long, short, default_value = "10")]
        limit: u32,
    },
    /// Database statistics
    Stats {
        /// Grouping: summary, vendor, month
        #[arg(long, default_value = "summary")]
        by: String,
        #[arg(long)]
        json: bool,
    },
    /// Export quotes
    Export {
        /// Output format: csv (row per line item) or json (nested per quote)
        #[arg(long, default_value = "csv")]
        format: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Only export quotes from suppliers matching this substring
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Configuration settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Store the Anthropic API key in the settings file
    SetKey { key: String },
    /// Remove the stored API key
    ClearKey,
    /// Set a custom database path
    SetDb { path: PathBuf },
    /// Show current settings (the API key is masked)
    Show,
}

// ============================================================================
// Helpers
// ============================================================================

fn open_db(settings: &Settings, override_path: &Option<PathBuf>) -> Result<Database, String> {
    let path = override_path.clone().unwrap_or_else(|| settings.db_path());
    Database::new(&path).map_err(|e| format!("Failed to open database {}: {}", path.display(), e))
}

fn make_analyzer(settings: &Settings) -> Result<Analyzer, String> {
    let api_key = settings.api_key().ok_or_else(|| {
        format!(
            "No API key configured. Set {} or run: quotedesk config set-key <KEY>",
            settings::API_KEY_ENV
        )
    })?;
    let config = AnalyzerConfig {
        model: settings.model.clone(),
        api_url: settings.api_url.clone(),
        request_timeout_secs: settings.request_timeout_secs,
        ..AnalyzerConfig::new(api_key)
    };
    Analyzer::new(config).map_err(|e| e.to_string())
}

fn extract_opts(
    settings: &Settings,
    force_ocr: bool,
    no_ocr: bool,
    lang: &Option<String>,
    dpi: &Option<u32>,
) -> ExtractOptions {
    ExtractOptions {
        use_ocr: if force_ocr {
            Some(true)
        } else if no_ocr {
            Some(false)
        } else {
            None
        },
        ocr_language: lang.clone().unwrap_or_else(|| settings.ocr_language.clone()),
        dpi: dpi.unwrap_or(settings.ocr_dpi),
        min_text_chars: settings.min_text_chars,
    }
}

fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy {
        max_retries: settings.analysis_max_retries,
        backoff_ms: settings.analysis_backoff_ms,
    }
}

fn parse_status(s: &str) -> Result<QuoteStatus, String> {
    QuoteStatus::from_str(s)
        .ok_or_else(|| format!("Unknown status '{}' (expected pending, completed or archived)", s))
}

fn print_quote_line(record: &quotedesk::db::QuoteRecord) {
    println!(
        "{:>5}  {:<24} {:<12} {:>12}  {:<9} {}",
        record.id,
        record.supplier.as_deref().unwrap_or("-"),
        record.quote_date.as_deref().unwrap_or("-"),
        record
            .total_amount
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string()),
        record.status.as_str(),
        record.filename,
    );
}

fn print_quote_detail(record: &quotedesk::db::QuoteRecord) {
    println!("Quote #{}", record.id);
    println!("  File:     {}", record.filename);
    println!("  Supplier: {}", record.supplier.as_deref().unwrap_or("-"));
    println!("  Date:     {}", record.quote_date.as_deref().unwrap_or("-"));
    println!("  Currency: {}", record.currency.as_deref().unwrap_or("-"));
    println!(
        "  Total:    {}",
        record
            .total_amount
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Status:   {}", record.status.as_str());
    if record.items.is_empty() {
        println!("  Items:    (none)");
    } else {
        println!("  Items:");
        for item in &record.items {
            println!(
                "    - {} (qty {}, unit {}, total {})",
                item.description,
                item.quantity.map(|q| q.to_string()).unwrap_or_else(|| "-".to_string()),
                item.unit_price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".to_string()),
                item.total.map(|t| format!("{:.2}", t)).unwrap_or_else(|| "-".to_string()),
            );
        }
    }
}

// ============================================================================
// Command handlers
// ============================================================================

async fn cmd_ingest(
    settings: &Settings,
    db: &Database,
    files: &[PathBuf],
    opts: ExtractOptions,
    jobs: usize,
) -> Result<(), String> {
    if files.is_empty() {
        return Err("No files given".to_string());
    }
    let analyzer = make_analyzer(settings)?;
    let retry = retry_policy(settings);
    let jobs = jobs.max(1);

    let outcomes: Vec<(String, Result<pipeline::ProcessOutcome, String>)> =
        stream::iter(files.iter().cloned())
            .map(|path| {
                let analyzer = &analyzer;
                let opts = &opts;
                async move {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.display().to_string());
                    let bytes = match std::fs::read(&path) {
                        Ok(b) => b,
                        Err(e) => return (name, Err(format!("cannot read file: {}", e))),
                    };
                    let outcome =
                        pipeline::process_document(&bytes, &name, opts, analyzer, retry, db)
                            .await
                            .map_err(|e| e.to_string());
                    (name, outcome)
                }
            })
            .buffer_unordered(jobs)
            .collect()
            .await;

    let mut ok = 0usize;
    let mut failed = 0usize;
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(o) => {
                ok += 1;
                log_both(&format!(
                    "✓ {} -> id {} ({} extraction, {} item(s), status {})",
                    name,
                    o.id,
                    o.extraction.method.as_str(),
                    o.analysis.items.len(),
                    o.status.as_str(),
                ));
                if !o.extraction.success {
                    log_both(&format!(
                        "  note: extraction degraded ({})",
                        o.extraction.error.as_deref().unwrap_or("unknown")
                    ));
                }
            }
            Err(e) => {
                failed += 1;
                elog_both(&format!("✗ {}: {}", name, e));
            }
        }
    }
    log_both(&format!("Done: {} stored, {} failed", ok, failed));
    if failed > 0 {
        Err(format!("{} document(s) failed", failed))
    } else {
        Ok(())
    }
}

async fn cmd_analyze(
    settings: &Settings,
    db_override: &Option<PathBuf>,
    file: Option<PathBuf>,
    text: Option<String>,
    quote: Option<i64>,
) -> Result<(), String> {
    let analyzer = make_analyzer(settings)?;
    let retry = retry_policy(settings);

    if let Some(id) = quote {
        let db = open_db(settings, db_override)?;
        let record = db
            .get_quote(id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Quote {} not found", id))?;
        let analysis =
            pipeline::analyze_with_retry(&analyzer, &record.original_text, &record.filename, retry)
                .await
                .map_err(|e| e.to_string())?;
        let status = if analysis.is_empty() { QuoteStatus::Pending } else { QuoteStatus::Completed };
        db.replace_analysis(
            id,
            &quotedesk::db::NewQuote {
                filename: record.filename.clone(),
                supplier: analysis.supplier.clone(),
                quote_date: analysis.quote_date.clone(),
                currency: analysis.currency.clone(),
                total_amount: analysis.total_amount,
                items: analysis.items.clone(),
                status,
                original_text: record.original_text.clone(),
                raw_response: analysis.raw_response.clone(),
            },
        )
        .map_err(|e| e.to_string())?;
        log_both(&format!("Re-analyzed quote {}", id));
        if let Some(updated) = db.get_quote(id).map_err(|e| e.to_string())? {
            print_quote_detail(&updated);
        }
        return Ok(());
    }

    let input = if let Some(path) = file {
        std::fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?
    } else if let Some(t) = text {
        t
    } else {
        return Err("Give --file, --text or --quote".to_string());
    };

    let analysis = pipeline::analyze_with_retry(&analyzer, &input, "inline", retry)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&analysis).map_err(|e| e.to_string())?
    );
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::load(&settings::settings_path());

    let result = run(&cli, &settings).await;
    if let Err(e) = result {
        elog_both(&format!("Error: {}", e));
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, settings: &Settings) -> Result<(), String> {
    match &cli.command {
        Commands::Ingest { files, force_ocr, no_ocr, lang, dpi, jobs } => {
            let db = open_db(settings, &cli.db)?;
            let opts = extract_opts(settings, *force_ocr, *no_ocr, lang, dpi);
            if opts.use_ocr != Some(false) && !extractor::ocr_available() {
                log_both("note: pdftoppm/tesseract not found, OCR fallback disabled");
            }
            cmd_ingest(settings, &db, files, opts, *jobs).await
        }
        Commands::Extract { file, force_ocr, no_ocr, lang, dpi } => {
            let bytes =
                std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());
            let opts = extract_opts(settings, *force_ocr, *no_ocr, lang, dpi);
            let result = extractor::extract(&bytes, &name, &opts);
            if result.success {
                elog_both(&format!(
                    "Extracted {} chars via {}",
                    result.text.chars().count(),
                    result.method.as_str()
                ));
                println!("{}", result.text);
                Ok(())
            } else {
                Err(format!(
                    "Extraction failed: {}",
                    result.error.as_deref().unwrap_or("unknown")
                ))
            }
        }
        Commands::Analyze { file, text, quote } => {
            cmd_analyze(settings, &cli.db, file.clone(), text.clone(), *quote).await
        }
        Commands::Search {
            query,
            vendor,
            from,
            to,
            min_total,
            max_total,
            status,
            sort,
            limit,
            json,
        } => {
            let db = open_db(settings, &cli.db)?;
            let filter = QuoteFilter {
                supplier: vendor.clone(),
                date_from: from.clone(),
                date_to: to.clone(),
                min_total: *min_total,
                max_total: *max_total,
                query: query.clone(),
                status: status.as_deref().map(parse_status).transpose()?,
                sort: SortKey::from_str(sort)
                    .ok_or_else(|| format!("Unknown sort key '{}'", sort))?,
                limit: Some(*limit),
            };
            let records = db.search_quotes(&filter).map_err(|e| e.to_string())?;
            if *json {
                println!("{}", export::to_json(&records).map_err(|e| e.to_string())?);
            } else {
                for record in &records {
                    print_quote_line(record);
                }
                eprintln!("{} quote(s)", records.len());
            }
            Ok(())
        }
        Commands::Show { id, json } => {
            let db = open_db(settings, &cli.db)?;
            let record = db
                .get_quote(*id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Quote {} not found", id))?;
            if *json {
                let records = [record];
                println!("{}", export::to_json(&records).map_err(|e| e.to_string())?);
            } else {
                print_quote_detail(&record);
            }
            Ok(())
        }
        Commands::Update { id, vendor, date, currency, total, status } => {
            let db = open_db(settings, &cli.db)?;
            let update = QuoteUpdate {
                supplier: vendor.clone(),
                quote_date: date.clone(),
                currency: currency.clone(),
                total_amount: *total,
                status: status.as_deref().map(parse_status).transpose()?,
            };
            let found = db.update_quote(*id, &update).map_err(|e| e.to_string())?;
            if !found {
                return Err(format!("Quote {} not found", id));
            }
            log_both(&format!("Updated quote {}", id));
            Ok(())
        }
        Commands::Delete { id } => {
            let db = open_db(settings, &cli.db)?;
            let found = db.delete_quote(*id).map_err(|e| e.to_string())?;
            if !found {
                return Err(format!("Quote {} not found", id));
            }
            log_both(&format!("Deleted quote {}", id));
            Ok(())
        }
        Commands::Clear { yes } => {
            let db = open_db(settings, &cli.db)?;
            let count = db.summary().map_err(|e| e.to_string())?.total_quotes;
            if !*yes {
                return Err(format!(
                    "This would delete {} quote(s) from {}. Re-run with --yes to confirm.",
                    count,
                    db.get_path()
                ));
            }
            db.clear_all().map_err(|e| e.to_string())?;
            log_both(&format!("Cleared {} quote(s) from {}", count, db.get_path()));
            Ok(())
        }
        Commands::Recent { limit } => {
            let db = open_db(settings, &cli.db)?;
            for record in db.recent_quotes(*limit).map_err(|e| e.to_string())? {
                print_quote_line(&record);
            }
            Ok(())
        }
        Commands::Stats { by, json } => {
            let db = open_db(settings, &cli.db)?;
            match by.as_str() {
                "summary" => {
                    let s = db.summary().map_err(|e| e.to_string())?;
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&s).map_err(|e| e.to_string())?);
                    } else {
                        println!("Quotes:        {}", s.total_quotes);
                        println!("Total amount:  {:.2}", s.total_amount);
                        println!("Suppliers:     {}", s.supplier_count);
                        println!("Average quote: {:.2}", s.average_amount);
                    }
                }
                "vendor" => {
                    let rows = db.supplier_statistics().map_err(|e| e.to_string())?;
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?);
                    } else {
                        for row in rows {
                            println!("{:<30} {:>5}  {:>14.2}", row.supplier, row.quote_count, row.total_amount);
                        }
                    }
                }
                "month" => {
                    let rows = db.monthly_statistics().map_err(|e| e.to_string())?;
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?);
                    } else {
                        for row in rows {
                            println!("{}  {:>5}  {:>14.2}", row.month, row.quote_count, row.total_amount);
                        }
                    }
                }
                other => return Err(format!("Unknown grouping '{}' (summary, vendor, month)", other)),
            }
            Ok(())
        }
        Commands::Export { format, output, vendor } => {
            let db = open_db(settings, &cli.db)?;
            let filter = QuoteFilter { supplier: vendor.clone(), ..Default::default() };
            let records = db.search_quotes(&filter).map_err(|e| e.to_string())?;
            let content = match format.as_str() {
                "csv" => export::to_csv(&records),
                "json" => export::to_json(&records).map_err(|e| e.to_string())?,
                other => return Err(format!("Unknown format '{}' (csv, json)", other)),
            };
            match output {
                Some(path) => {
                    std::fs::write(path, &content)
                        .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
                    log_both(&format!("Exported {} quote(s) to {}", records.len(), path.display()));
                }
                None => print!("{}", content),
            }
            Ok(())
        }
        Commands::Config { cmd } => {
            let path = settings::settings_path();
            let mut current = Settings::load(&path);
            match cmd {
                ConfigCommands::SetKey { key } => {
                    current.anthropic_api_key = Some(key.clone());
                    current.save(&path)?;
                    log_both("API key saved");
                }
                ConfigCommands::ClearKey => {
                    current.anthropic_api_key = None;
                    current.save(&path)?;
                    log_both("API key cleared");
                }
                ConfigCommands::SetDb { path: db_path } => {
                    current.custom_db_path = Some(db_path.display().to_string());
                    current.save(&path)?;
                    log_both(&format!("Database path set to {}", db_path.display()));
                }
                ConfigCommands::Show => {
                    let mut masked = current.clone();
                    if let Some(key) = &masked.anthropic_api_key {
                        let chars: Vec<char> = key.chars().collect();
                        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
                        masked.anthropic_api_key = Some(format!("...{}", tail));
                    }
                    println!("{}", serde_json::to_string_pretty(&masked).map_err(|e| e.to_string())?);
                    println!("settings file: {}", path.display());
                    println!("database file: {}", current.db_path().display());
                    println!(
                        "API key source: {}",
                        if std::env::var(settings::API_KEY_ENV).is_ok() {
                            "environment"
                        } else if current.anthropic_api_key.is_some() {
                            "settings file"
                        } else {
                            "not configured"
                        }
                    );
                }
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "quotedesk", &mut std::io::stdout());
            Ok(())
        }
    }
}
