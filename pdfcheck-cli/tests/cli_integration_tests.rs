//! Integration tests for the pdfcheck CLI
//!
//! Runs the built binary against generated fixtures and checks exit codes,
//! printed output and written files.

use pdfcheck_test_suite::generators::{invalid_pdfs, minimal_pdfs};
use pdfcheck_test_suite::utils::write_fixture;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{tempdir, TempDir};

/// Test helper to get the CLI binary path
fn get_cli_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pdfcheck"))
}

fn run(args: &[&str]) -> Output {
    Command::new(get_cli_path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run pdfcheck")
}

fn fixture(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    write_fixture(dir.path(), name, bytes).expect("failed to write fixture")
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn test_version_flag() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("pdfcheck "));
}

#[test]
fn test_clean_file_exits_zero() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "minimal.pdf", &minimal_pdfs::minimal());

    let output = run(&[arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_summary_prints_document_facts() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "info.pdf", &minimal_pdfs::with_info().bytes);

    let output = run(&["--summary", arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PDF Version: 1.4"));
    assert!(stdout.contains("Title: Quarterly Report"));
    assert!(stdout.contains("Pages: 1"));
    assert!(stdout.contains("ID: <30313233343536373839616263646566>"));
}

#[test]
fn test_dump_prints_objects() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "minimal.pdf", &minimal_pdfs::minimal());

    let output = run(&["-d", arg(&input)]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj"));
}

#[test]
fn test_unparseable_file_exits_one() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "garbage.pdf", b"this is not a pdf");

    let output = run(&[arg(&input)]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot parse"));
}

#[test]
fn test_missing_startxref_needs_fix_parse() {
    let dir = tempdir().unwrap();
    let broken = invalid_pdfs::without_startxref(&minimal_pdfs::minimal());
    let input = fixture(&dir, "no_startxref.pdf", &broken);
    let repaired = dir.path().join("repaired.pdf");

    assert_eq!(run(&[arg(&input)]).status.code(), Some(1));

    let output = run(&["--fix-parse", "-o", arg(&repaired), arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    let bytes = std::fs::read(&repaired).unwrap();
    assert!(bytes.starts_with(b"%PDF-1.4"));
    assert!(bytes.ends_with(b"%%EOF\n"));

    assert_eq!(run(&[arg(&repaired)]).status.code(), Some(0));
}

#[test]
fn test_dangling_reference_exit_codes() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "dangling.pdf", &invalid_pdfs::dangling_reference().bytes);

    let output = run(&[arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stdout).contains("dangling reference"));

    // Summary-only runs do not fail on fixable findings
    assert_eq!(run(&["-s", arg(&input)]).status.code(), Some(0));

    let fixed = dir.path().join("fixed.pdf");
    let output = run(&["--fix-parse", "-o", arg(&fixed), arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&std::fs::read(&fixed).unwrap()).contains("99 0 R"));
}

#[test]
fn test_fix_without_output_warns() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "minimal.pdf", &minimal_pdfs::minimal());

    let output = run(&["--fix-streams", arg(&input)]);
    assert!(String::from_utf8_lossy(&output.stderr).contains("use --output"));
}

#[test]
fn test_plain_rewrite_warns() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "minimal.pdf", &minimal_pdfs::minimal());
    let rewritten = dir.path().join("out.pdf");

    let output = run(&["-o", arg(&rewritten), arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stderr).contains("plain rewrite"));
    assert!(rewritten.exists());
}

#[test]
fn test_xref_stream_output() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "multi.pdf", &minimal_pdfs::multi_page(2).bytes);
    let rewritten = dir.path().join("xref_stream.pdf");

    let output = run(&["-o", arg(&rewritten), "--xref-stream", arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    let bytes = std::fs::read(&rewritten).unwrap();
    assert!(bytes.starts_with(b"%PDF-1.5"));
    assert!(String::from_utf8_lossy(&bytes).contains("/Type /XRef"));

    assert_eq!(run(&[arg(&rewritten)]).status.code(), Some(0));
}

#[test]
fn test_xref_stream_requires_output() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "minimal.pdf", &minimal_pdfs::minimal());
    let output = run(&["--xref-stream", arg(&input)]);
    assert!(!output.status.success());
}

#[test]
fn test_json_report() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "dangling.pdf", &invalid_pdfs::dangling_reference().bytes);

    let output = run(&["--json", arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\": \"DanglingReference\""));
    assert!(stdout.contains("\"resolution\": \"Unresolved\""));
}

#[test]
fn test_strict_mode() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "dangling.pdf", &invalid_pdfs::dangling_reference().bytes);

    let output = run(&["--strict", arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("strict mode"));

    let output = run(&["--strict", "--fix-parse", "--no-parallel", arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_wrong_stream_length() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "length.pdf", &invalid_pdfs::wrong_stream_length().bytes);

    assert_eq!(run(&[arg(&input)]).status.code(), Some(1));
    let output = run(&["--fix-parse", "--verbose-parse", arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stderr).contains("stream length corrected"));
}

fn unknown_filter_pdf() -> Vec<u8> {
    pdfcheck_test_suite::TestPdfBuilder::minimal()
        .with_stream_object(5, "/Filter /FooDecode", b"abc")
        .build()
}

#[test]
fn test_unknown_filter_fails_only_when_validating_content() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "foo_filter.pdf", &unknown_filter_pdf());

    assert_eq!(run(&[arg(&input)]).status.code(), Some(0));

    let output = run(&["--validate-content", arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("check failed"));
    assert!(stderr.contains("FooDecode"));
}

#[test]
fn test_summary_and_dump_wait_for_a_successful_check() {
    let dir = tempdir().unwrap();
    let input = fixture(&dir, "foo_filter.pdf", &unknown_filter_pdf());

    let output = run(&["-s", "-d", "--validate-content", arg(&input)]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("PDF Version:"));
    assert!(!stdout.contains("1 0 obj"));

    let output = run(&["-s", "-d", arg(&input)]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PDF Version:"));
    assert!(stdout.contains("1 0 obj"));
}
