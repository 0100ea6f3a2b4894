//! Inline suppression scanning.
//!
//! Finds `#[allow(clippy::...)]` / `#[expect(clippy::...)]` attributes in Rust
//! sources and `biome-ignore` comments in JS/TS sources. Walks the target with
//! `ignore`, so `.gitignore`d paths (e.g. `target/`, `node_modules/`) are skipped.

use std::path::Path;
use std::sync::OnceLock;

use ignore::WalkBuilder;
use regex::Regex;
use tracing::debug;

use crate::report::types::Suppression;

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs", "json", "jsonc"];

fn rust_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#!?\[\s*(?:allow|expect)\s*\((?P<body>[^\]]*)\)\s*\]").expect("static regex")
    })
}

fn rust_reason_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"reason\s*=\s*"(?P<reason>[^"]*)""#).expect("static regex"))
}

fn biome_ignore_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"biome-ignore(?:-all|-start)?\s+(?P<rule>[\w/.\-]+)(?:\s*\([^)]*\))?\s*:?\s*(?P<reason>.*?)\s*(?:\*/)?$")
            .expect("static regex")
    })
}

/// Extract clippy suppressions from one Rust source.
pub fn parse_rust_suppressions(file: &str, source: &str) -> Vec<Suppression> {
    let mut found = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        for caps in rust_attr_regex().captures_iter(line) {
            let body = &caps["body"];
            let reason = rust_reason_regex()
                .captures(body)
                .map(|c| c["reason"].to_string())
                .or_else(|| trailing_comment(line));
            for lint in body.split(',').map(str::trim) {
                if !lint.starts_with("clippy::") {
                    continue;
                }
                found.push(Suppression {
                    file: file.to_string(),
                    line: Some(idx as u32 + 1),
                    rule: lint.to_string(),
                    tool: "rust:clippy".to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }
    found
}

fn trailing_comment(line: &str) -> Option<String> {
    line.split_once("//")
        .map(|(_, comment)| comment.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Extract `biome-ignore` suppressions from one JS/TS source.
pub fn parse_biome_suppressions(file: &str, source: &str) -> Vec<Suppression> {
    source
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = biome_ignore_regex().captures(line)?;
            let reason = caps["reason"].trim();
            Some(Suppression {
                file: file.to_string(),
                line: Some(idx as u32 + 1),
                rule: caps["rule"].to_string(),
                tool: "js:biome-lint".to_string(),
                reason: (!reason.is_empty()).then(|| reason.to_string()),
            })
        })
        .collect()
}

/// Which parser applies to a walked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Rust,
    JavaScript,
}

impl SourceKind {
    fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match self {
            SourceKind::Rust => ext == "rs",
            SourceKind::JavaScript => JS_EXTENSIONS.contains(&ext),
        }
    }
}

/// Walk `root` and collect suppressions from every matching source file.
/// Blocking; call from `spawn_blocking`.
pub fn scan(root: &Path, kind: SourceKind) -> Vec<Suppression> {
    let mut found = Vec::new();
    let walker = WalkBuilder::new(root).hidden(true).git_ignore(true).build();

    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) || !kind.matches(path) {
            continue;
        }
        let Ok(source) = std::fs::read_to_string(path) else {
            continue;
        };
        let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned();
        match kind {
            SourceKind::Rust => found.extend(parse_rust_suppressions(&relative, &source)),
            SourceKind::JavaScript => found.extend(parse_biome_suppressions(&relative, &source)),
        }
    }

    debug!(root = %root.display(), kind = ?kind, suppressions = found.len(), "scanned for suppressions");
    found
}
