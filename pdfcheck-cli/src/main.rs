use anyhow::{Context, Result};
use clap::Parser;
use pdfcheck::{CheckOptions, Document, ParseOptions, ValidationReport, WriterConfig, XRefStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when the file cannot be parsed or written
const EXIT_PARSE: u8 = 1;
/// Exit status when the check fails or anomalies remain
const EXIT_CHECK: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "pdfcheck",
    about = "Check, repair and rewrite PDF files",
    version
)]
struct Cli {
    /// Input PDF file
    file: PathBuf,

    /// Report every correction made while parsing
    #[arg(long)]
    verbose_parse: bool,

    /// Repair the file structure while parsing and checking
    #[arg(long)]
    fix_parse: bool,

    /// Report every correction made to streams
    #[arg(long)]
    verbose_streams: bool,

    /// Repair damaged streams
    #[arg(long)]
    fix_streams: bool,

    /// Treat streams with unsupported filters as fatal
    #[arg(long)]
    validate_content: bool,

    /// Fail when fixable anomalies remain unresolved
    #[arg(long)]
    strict: bool,

    /// Check streams on a single thread
    #[arg(long)]
    no_parallel: bool,

    /// Print version, object counts, file IDs, Info and catalog summary
    #[arg(short, long)]
    summary: bool,

    /// Print every object
    #[arg(short, long)]
    dump: bool,

    /// Write the (repaired) document to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a cross-reference stream instead of a table
    #[arg(long, requires = "output")]
    xref_stream: bool,

    /// Print the validation report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn fixing(&self) -> bool {
        self.fix_parse || self.fix_streams
    }

    fn verbose(&self) -> bool {
        self.verbose_parse || self.verbose_streams
    }

    /// Summary or dump only: non-fatal findings do not fail the run
    fn inspect_only(&self) -> bool {
        (self.summary || self.dump) && self.output.is_none() && !self.fixing() && !self.strict
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions::new(self.verbose_parse, self.fix_parse)
    }

    fn check_options(&self) -> CheckOptions {
        CheckOptions::new(self.verbose(), self.fixing())
            .with_strict(self.strict)
            .with_validate_content(self.validate_content)
            .with_parallel(!self.no_parallel)
    }

    fn writer_config(&self) -> WriterConfig {
        let style = if self.xref_stream {
            XRefStyle::Stream
        } else {
            XRefStyle::Table
        };
        WriterConfig::default().with_xref_style(style)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose());

    if cli.fixing() && cli.output.is_none() {
        tracing::warn!("fixes are applied in memory only; use --output to save them");
    }
    if cli.output.is_some() && !cli.fixing() {
        tracing::warn!("no fix flag given; the output is a plain rewrite of the input");
    }

    let mut document = match pdfcheck::parse(&cli.file, &cli.parse_options()) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Error: cannot parse {}: {e}", cli.file.display());
            return ExitCode::from(EXIT_PARSE);
        }
    };

    let report = match document.check(&cli.check_options()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: check failed: {e}");
            return ExitCode::from(EXIT_CHECK);
        }
    };

    if cli.summary {
        print_summary(&document);
    }
    if cli.dump {
        print!("{}", document.dump());
    }
    if let Err(e) = print_report(&cli, &report) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_CHECK);
    }

    if let Some(output) = &cli.output {
        if let Err(e) = document.serialize_with(output, &cli.writer_config()) {
            eprintln!("Error: cannot write {}: {e}", output.display());
            return ExitCode::from(EXIT_PARSE);
        }
        println!("Wrote {}", output.display());
    }

    if report.has_outstanding() && !cli.inspect_only() {
        return ExitCode::from(EXIT_CHECK);
    }
    ExitCode::SUCCESS
}

fn print_report(cli: &Cli, report: &ValidationReport) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(report).context("serializing the report")?;
        println!("{json}");
    } else if !report.anomalies.is_empty() || !cli.inspect_only() {
        print!("{report}");
    }
    Ok(())
}

fn print_summary(document: &Document) {
    println!("PDF Version: {}", document.version());
    println!("Objects: {}", document.object_count());
    match document.declared_size() {
        Some(size) => println!("Size: {size}"),
        None => println!("Size: (not declared)"),
    }
    if let Some((first, second)) = document.file_ids() {
        println!("ID: <{first}> <{second}>");
    }
    if document.is_encrypted() {
        println!("Encrypted: Yes");
    }

    let info = document.info();
    let fields = [
        ("Title", &info.title),
        ("Author", &info.author),
        ("Subject", &info.subject),
        ("Keywords", &info.keywords),
        ("Creator", &info.creator),
        ("Producer", &info.producer),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{label}: {value}");
        }
    }
    if let Some(date) = info.creation_date {
        println!("Created: {}", date.to_rfc3339());
    }
    if let Some(date) = info.modification_date {
        println!("Modified: {}", date.to_rfc3339());
    }

    let catalog = document.catalog_summary();
    println!("Root: {} R", catalog.root);
    if let Some(pages) = catalog.page_count {
        println!("Pages: {pages}");
    }
    if let Some(version) = &catalog.version {
        println!("Catalog Version: {version}");
    }
    if let Some(layout) = &catalog.page_layout {
        println!("Page Layout: {layout}");
    }
    if let Some(mode) = &catalog.page_mode {
        println!("Page Mode: {mode}");
    }
    let flags = [
        ("Outlines", catalog.has_outlines),
        ("Names", catalog.has_names),
        ("AcroForm", catalog.has_acroform),
        ("Metadata", catalog.has_metadata),
    ];
    for (label, present) in flags {
        if present {
            println!("Has {label}: Yes");
        }
    }
}
