//! End-to-end tests for `content-seal verify` against a freshly built tree.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn seal(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_content-seal"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run content-seal")
}

/// Build a small site and return the temp dir holding `content/` and `dist/`.
fn built_site() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let content = tmp.path().join("content");
    std::fs::create_dir_all(content.join("img")).unwrap();
    std::fs::write(
        content.join("index.html"),
        "<p><img src=\"img/logo.png\" alt=\"logo\"></p>",
    )
    .unwrap();
    std::fs::write(content.join("img/logo.png"), "logo bytes").unwrap();
    std::fs::write(content.join("site.css"), "p{margin:0}").unwrap();
    let out = seal(tmp.path(), &["build"]);
    assert_eq!(out.status.code(), Some(0), "{out:?}");
    tmp
}

fn dist(tmp: &TempDir) -> PathBuf {
    tmp.path().join("dist")
}

/// The one published file under `dist/assets/img/`.
fn published_logo(tmp: &TempDir) -> PathBuf {
    let dir = dist(tmp).join("assets/img");
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    files.remove(0)
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn untouched_tree_verifies() {
    let tmp = built_site();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("Verified 3 of 3 entries: OK"));
}

#[test]
fn single_byte_tamper_is_one_mismatch() {
    let tmp = built_site();
    let logo = published_logo(&tmp);
    let mut bytes = std::fs::read(&logo).unwrap();
    bytes[0] ^= 0x01;
    std::fs::write(&logo, bytes).unwrap();

    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(2));
    let text = stdout(&out);
    assert_eq!(text.matches("MISMATCH").count(), 1);
    assert!(text.contains("MISMATCH assets/img/logo-"));
}

#[test]
fn deleted_file_is_missing() {
    let tmp = built_site();
    std::fs::remove_file(dist(&tmp).join("index.html")).unwrap();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stdout(&out).contains("MISSING  index.html"));
}

#[test]
fn injected_html_is_a_fatal_orphan() {
    let tmp = built_site();
    std::fs::write(dist(&tmp).join("extra.html"), "<p>hi</p>").unwrap();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stdout(&out).contains("ORPHAN   extra.html (CRITICAL)"));
}

#[test]
fn unknown_file_type_orphan_only_warns() {
    let tmp = built_site();
    std::fs::write(dist(&tmp).join("notes.txt"), "x").unwrap();
    std::fs::write(dist(&tmp).join("integrity-manifest.json.sig"), "sig").unwrap();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(&out);
    assert!(text.contains("ORPHAN   notes.txt (WARN)"));
    assert!(!text.contains(".sig"));
}

#[test]
fn manifest_outside_the_tree() {
    let tmp = built_site();
    let external = tmp.path().join("published-manifest.json");
    std::fs::rename(dist(&tmp).join("integrity-manifest.json"), &external).unwrap();
    let out = seal(
        tmp.path(),
        &["verify", "--manifest", external.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "{}", stdout(&out));
}

#[test]
fn tampered_manifest_path_is_rejected() {
    let tmp = built_site();
    let path = dist(&tmp).join("integrity-manifest.json");
    let text = std::fs::read_to_string(&path)
        .unwrap()
        .replacen("\"path\": \"index.html\"", "\"path\": \"../index.html\"", 1);
    std::fs::write(&path, text).unwrap();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid manifest"));
}

#[test]
fn missing_manifest_exits_2() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("dist")).unwrap();
    let out = seal(tmp.path(), &["verify"]);
    assert_eq!(out.status.code(), Some(2));
}
