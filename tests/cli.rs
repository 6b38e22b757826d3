//! CLI test cases.
//!
//! These never need `tesseract`: the PDFs they extract have no images, so
//! the OCR engine is never called.

use std::{path::Path, process::Command};

use assert_cmd::prelude::*;
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use predicates::prelude::*;
use tempfile::TempDir;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("pdf-image-ocr").unwrap()
}

/// Write a PDF with `page_count` blank pages to `path`.
fn write_blank_pdf(path: &Path, page_count: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids = (0..page_count)
        .map(|_| {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), vec![]));
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
            }))
        })
        .collect::<Vec<_>>();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
    cmd()
        .args(["extract", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--on-image-error"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_extract_missing_file() {
    let dir = TempDir::new().unwrap();
    cmd()
        .current_dir(dir.path())
        .args(["extract", "missing.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
    assert!(!dir.path().join("missing_extracted.txt").exists());
}

#[test]
fn test_extract_rejects_non_pdf_input() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.pdf"), "not a PDF at all").unwrap();
    cmd()
        .current_dir(dir.path())
        .args(["extract", "notes.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not parse PDF document"));
    assert!(!dir.path().join("notes_extracted.txt").exists());
}

#[test]
fn test_extract_blank_pages_to_default_output() {
    let dir = TempDir::new().unwrap();
    write_blank_pdf(&dir.path().join("scan.pdf"), 3);
    cmd()
        .current_dir(dir.path())
        .args(["extract", "scan.pdf", "--jobs", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scan_extracted.txt"));
    let text = std::fs::read_to_string(dir.path().join("scan_extracted.txt")).unwrap();
    assert_eq!(text, "\n\n");
}

#[test]
fn test_extract_to_explicit_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.txt");
    write_blank_pdf(&input, 1);
    cmd()
        .arg("extract")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .args(["--order", "page"])
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
}

#[test]
fn test_extract_rejects_bad_options() {
    cmd()
        .args(["extract", "in.pdf", "--order", "random"])
        .assert()
        .failure();
}
