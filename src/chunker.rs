//! Structure-aware, token-budgeted document chunking.
//!
//! Splits a [`Document`] into [`Chunk`]s that respect the text's own
//! structural boundaries: brace depth for C#/TypeScript-style code,
//! procedure and BEGIN/END blocks for SQL, blank lines for prose. Each
//! strategy degrades to the next when its markers are absent, and all of
//! them bottom out in a forced line split that always terminates — even for
//! a single pathologically long line.
//!
//! Chunk boundaries seed the next chunk with the trailing lines of the
//! previous one (up to `overlap_tokens`) so context survives the cut.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Chunk, Document};
use crate::tokens::{estimate_tokens, CHARS_PER_TOKEN};

/// Structural family detected for a document, selecting one chunking
/// strategy per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Brace-delimited code (C#, TypeScript, JavaScript, Java, ...).
    BraceCode,
    /// SQL with procedure/function units and BEGIN/END blocks.
    SqlBlocks,
    /// Prose or anything else: paragraphs separated by blank lines.
    Paragraphs,
}

impl ContentKind {
    /// Cheap keyword sniff over the text, used when the document's own type
    /// tag does not pin the strategy down.
    pub fn sniff(text: &str) -> Self {
        let lower = text.to_lowercase();

        if lower.contains("public class")
            || lower.contains("namespace")
            || lower.contains("using system")
            || lower.contains("export class")
            || lower.contains("import {")
            || lower.contains("function(")
            || lower.contains("function (")
            || lower.contains("=> {")
        {
            return ContentKind::BraceCode;
        }

        if lower.contains("create procedure")
            || lower.contains("create function")
            || lower.contains("create trigger")
            || lower.contains("create view")
            || (lower.contains("begin") && lower.contains("end"))
        {
            return ContentKind::SqlBlocks;
        }

        ContentKind::Paragraphs
    }

    /// Resolve the strategy for a document: the type tag decides where it
    /// can, the sniff fills in the rest.
    pub fn classify(doc: &Document) -> Self {
        use crate::models::DocumentKind::*;
        match doc.kind {
            Sql => ContentKind::SqlBlocks,
            Code => match Self::sniff(&doc.text) {
                ContentKind::Paragraphs if doc.text.contains('{') => ContentKind::BraceCode,
                other => other,
            },
            SpreadsheetSheet | GenericText | ManualNote => ContentKind::Paragraphs,
        }
    }
}

/// Split `doc` into token-budgeted chunks.
///
/// - Empty document: empty sequence.
/// - Document within `target_tokens`: one chunk.
/// - Otherwise the strategy chosen by [`ContentKind::classify`] runs, and
///   every produced chunk estimates at most `2 × target_tokens`.
pub fn chunk_document(doc: &Document, target_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    if doc.text.is_empty() {
        return Vec::new();
    }

    let target = target_tokens.max(1);
    // An overlap seed at or above the budget would fill the next chunk
    // before any new content lands.
    let overlap = overlap_tokens.min(target.saturating_sub(1));

    let texts = if estimate_tokens(&doc.text) <= target {
        vec![doc.text.clone()]
    } else {
        match ContentKind::classify(doc) {
            ContentKind::BraceCode => chunk_by_braces(&doc.text, target, overlap),
            ContentKind::SqlBlocks => chunk_sql(&doc.text, target, overlap),
            ContentKind::Paragraphs => chunk_by_paragraphs(&doc.text, target, overlap),
        }
    };

    texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .enumerate()
        .map(|(i, text)| {
            let token_estimate = estimate_tokens(&text);
            Chunk {
                source_id: doc.source_id.clone(),
                kind: doc.kind,
                chunk_id: i,
                text,
                token_estimate,
                sheet: doc.sheet.clone(),
            }
        })
        .collect()
}

fn method_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(public|private|protected|internal|export|async)\s+(class|interface|function|async|[\w<>,\[\]]+)\s+\w+\s*[({]")
            .unwrap()
    })
}

/// Brace-structured code: scan line by line tracking brace depth, and close
/// a chunk only when depth returns to a boundary consistent with a recorded
/// method/class start. Accumulates up to `2 × target` waiting for a safe
/// boundary, then force-splits.
fn chunk_by_braces(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut seed_len = 0usize;
    let mut brace_depth = 0i64;
    let mut method_start_depth: Option<i64> = None;

    for line in text.lines() {
        brace_depth += line.matches('{').count() as i64 - line.matches('}').count() as i64;

        if method_start_re().is_match(line) {
            method_start_depth = Some(brace_depth);
        }

        current.push(line.to_string());
        current_tokens += estimate_tokens(line);

        // The closing line belongs with its block, so the boundary check
        // runs after the push.
        if current_tokens > target {
            let at_boundary =
                brace_depth <= 0 || method_start_depth.is_some_and(|d| brace_depth < d);
            if at_boundary {
                close_chunk(&mut chunks, &mut current, &mut current_tokens, target, overlap);
                seed_len = current.len();
                continue;
            }
        }

        // No safe boundary appeared in time: split regardless of structure.
        if current_tokens > target * 2 {
            let body = current.join("\n");
            chunks.extend(force_split(&body, target, overlap));
            current.clear();
            current_tokens = 0;
            seed_len = 0;
        }
    }

    if has_fresh_content(&current, seed_len) {
        flush_final(&mut chunks, current, target, overlap);
    }
    chunks
}

/// True when `lines` holds anything beyond the overlap seed left by the
/// last close. Keeps a trailing seed-only accumulator from becoming a
/// chunk of its own.
fn has_fresh_content(lines: &[String], seed_len: usize) -> bool {
    lines.iter().skip(seed_len).any(|l| !l.trim().is_empty())
}

/// Close the accumulated chunk and reseed the accumulator with its trailing
/// overlap lines.
fn close_chunk(
    chunks: &mut Vec<String>,
    current: &mut Vec<String>,
    current_tokens: &mut usize,
    target: usize,
    overlap: usize,
) {
    let body = current.join("\n");
    if estimate_tokens(&body) > target * 2 {
        chunks.extend(force_split(&body, target, overlap));
    } else {
        chunks.push(body);
    }

    let seed = overlap_lines(current, overlap);
    *current_tokens = seed.iter().map(|l| estimate_tokens(l)).sum();
    *current = seed;
}

fn flush_final(chunks: &mut Vec<String>, current: Vec<String>, target: usize, overlap: usize) {
    if current.is_empty() {
        return;
    }
    let body = current.join("\n");
    if estimate_tokens(&body) > target * 2 {
        chunks.extend(force_split(&body, target, overlap));
    } else {
        chunks.push(body);
    }
}

/// Trailing lines of `lines` whose cumulative estimate fits `overlap`
/// tokens. Degrades to the whole slice when everything fits.
fn overlap_lines(lines: &[String], overlap: usize) -> Vec<String> {
    let mut seed: Vec<String> = Vec::new();
    let mut total = 0usize;

    for line in lines.iter().rev() {
        let line_tokens = estimate_tokens(line);
        if total + line_tokens > overlap {
            break;
        }
        seed.insert(0, line.clone());
        total += line_tokens;
    }

    seed
}

fn sql_unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)CREATE\s+(PROCEDURE|FUNCTION|TRIGGER|VIEW)\b").unwrap())
}

fn sql_begin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bBEGIN\b").unwrap())
}

fn sql_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bEND\b").unwrap())
}

/// Block-structured SQL: split on top-level CREATE PROCEDURE/FUNCTION/
/// TRIGGER/VIEW units first; oversized units split on BEGIN/END depth;
/// no units at all falls back to bare statement terminators.
fn chunk_sql(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let starts: Vec<usize> = sql_unit_re().find_iter(text).map(|m| m.start()).collect();

    if starts.is_empty() {
        return chunk_sql_statements(text, target, overlap);
    }

    let mut units: Vec<&str> = Vec::new();
    if starts[0] > 0 {
        units.push(&text[..starts[0]]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        units.push(&text[start..end]);
    }

    let mut chunks = Vec::new();
    for unit in units {
        if unit.trim().is_empty() {
            continue;
        }
        if estimate_tokens(unit) <= target {
            chunks.push(unit.to_string());
        } else {
            chunks.extend(split_sql_unit(unit, target, overlap));
        }
    }
    chunks
}

/// Split one oversized SQL unit at BEGIN/END depth zero, force-splitting
/// when no depth-zero line shows up within the 2× budget.
fn split_sql_unit(unit: &str, target: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut seed_len = 0usize;
    let mut depth = 0i64;

    for line in unit.lines() {
        depth += sql_begin_re().find_iter(line).count() as i64;
        depth -= sql_end_re().find_iter(line).count() as i64;

        current.push(line.to_string());
        current_tokens += estimate_tokens(line);

        if current_tokens > target && depth <= 0 {
            close_chunk(&mut chunks, &mut current, &mut current_tokens, target, overlap);
            seed_len = current.len();
            continue;
        }

        if current_tokens > target * 2 {
            let body = current.join("\n");
            chunks.extend(force_split(&body, target, overlap));
            current.clear();
            current_tokens = 0;
            seed_len = 0;
        }
    }

    if has_fresh_content(&current, seed_len) {
        flush_final(&mut chunks, current, target, overlap);
    }
    chunks
}

/// Statement-terminator fallback for SQL without procedure units.
fn chunk_sql_statements(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for stmt in text.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        let stmt_tokens = estimate_tokens(stmt);

        if stmt_tokens > target {
            if !current.is_empty() {
                chunks.push(format!("{};", current.join(";\n")));
                current.clear();
                current_tokens = 0;
            }
            chunks.extend(force_split(stmt, target, overlap));
            continue;
        }

        if current_tokens + stmt_tokens > target && !current.is_empty() {
            chunks.push(format!("{};", current.join(";\n")));
            current.clear();
            current_tokens = 0;
        }

        current.push(stmt.to_string());
        current_tokens += stmt_tokens;
    }

    if !current.is_empty() {
        chunks.push(format!("{};", current.join(";\n")));
    }
    chunks
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

/// Paragraph-structured text: accumulate blank-line-separated paragraphs
/// until the budget is reached. A single paragraph over budget goes through
/// the forced split.
fn chunk_by_paragraphs(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for para in paragraph_re().split(text) {
        if para.trim().is_empty() {
            continue;
        }
        let para_tokens = estimate_tokens(para);

        if para_tokens > target {
            if !current.is_empty() {
                chunks.push(current.join("\n\n"));
                current.clear();
                current_tokens = 0;
            }
            chunks.extend(force_split(para, target, overlap));
            continue;
        }

        if current_tokens + para_tokens > target && !current.is_empty() {
            let body = current.join("\n\n");
            let seed = overlap_lines(&current, overlap);
            chunks.push(body);
            current = seed;
            current_tokens = current.iter().map(|p| estimate_tokens(p)).sum();
        }

        current.push(para.to_string());
        current_tokens += para_tokens;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }
    chunks
}

/// Last-resort split by raw lines, ignoring structure. Lines that alone
/// exceed the budget are cut near whitespace at the character budget, so
/// this path terminates for any input.
fn force_split(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        if estimate_tokens(line) > target {
            lines.extend(split_long_line(line, target));
        } else {
            lines.push(line.to_string());
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for line in lines {
        let line_tokens = estimate_tokens(&line);

        if current_tokens + line_tokens > target && !current.is_empty() {
            let seed = overlap_lines(&current, overlap);
            chunks.push(current.join("\n"));
            current = seed;
            current_tokens = current.iter().map(|l| estimate_tokens(l)).sum();
        }

        current.push(line);
        current_tokens += line_tokens;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

/// Cut one oversized line into pieces of roughly `target` tokens, preferring
/// a whitespace boundary near each cut.
fn split_long_line(line: &str, target: usize) -> Vec<String> {
    let max_chars = (target * CHARS_PER_TOKEN).max(1);
    let mut pieces = Vec::new();
    let mut remaining = line;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }

        let mut split_at = max_chars;
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let cut = remaining[..split_at]
            .rfind(' ')
            .map(|pos| pos + 1)
            .filter(|&pos| pos * 5 > split_at * 4)
            .unwrap_or(split_at);

        pieces.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    fn code_doc(text: &str) -> Document {
        Document::new("src/sample.cs", DocumentKind::Code, text)
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let doc = code_doc("");
        assert!(chunk_document(&doc, 100, 10).is_empty());
    }

    #[test]
    fn test_document_within_budget_is_single_chunk() {
        let doc = code_doc("public class Small {}");
        let chunks = chunk_document(&doc, 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "public class Small {}");
        assert_eq!(chunks[0].chunk_id, 0);
    }

    #[test]
    fn test_sniff_detects_families() {
        assert_eq!(
            ContentKind::sniff("using System;\npublic class A {}"),
            ContentKind::BraceCode
        );
        assert_eq!(
            ContentKind::sniff("CREATE PROCEDURE GetUsers AS BEGIN SELECT 1 END"),
            ContentKind::SqlBlocks
        );
        assert_eq!(
            ContentKind::sniff("Just a plain paragraph of text."),
            ContentKind::Paragraphs
        );
    }

    fn make_method(name: &str, body_lines: usize) -> String {
        let mut out = format!("public void {}() {{\n", name);
        for i in 0..body_lines {
            out.push_str(&format!("    total += {};\n", i));
        }
        out.push('}');
        out
    }

    #[test]
    fn test_two_methods_split_at_method_boundary() {
        // Two method bodies, budget forces exactly one cut, and the cut
        // lands on the method boundary rather than mid-body.
        let text = format!("{}\n\n{}", make_method("MethodOne", 16), make_method("MethodTwo", 16));
        let doc = code_doc(&text);
        let chunks = chunk_document(&doc, 50, 10);

        assert_eq!(chunks.len(), 2, "expected one cut at the method boundary");
        assert!(chunks[0].text.contains("MethodOne"));
        assert!(!chunks[0].text.contains("MethodTwo"));
        assert!(chunks[1].text.contains("MethodTwo"));

        // The second chunk starts with the overlap seed: trailing lines of
        // the first chunk (modulo the blank separator line).
        let first_lines: Vec<&str> = chunks[0].text.lines().collect();
        let seed: Vec<&str> = chunks[1]
            .text
            .lines()
            .take_while(|l| !l.contains("MethodTwo"))
            .filter(|l| !l.trim().is_empty())
            .collect();
        assert!(!seed.is_empty(), "second chunk should carry overlap context");
        assert_eq!(&first_lines[first_lines.len() - seed.len()..], &seed[..]);
    }

    #[test]
    fn test_block_under_twice_target_stays_whole() {
        // A block estimating between 1.5x and 2x the budget is kept intact;
        // force-splitting only kicks in past the 2x bound.
        let text = make_method("Solo", 16);
        let doc = code_doc(&text);
        let chunks = chunk_document(&doc, 40, 10);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].token_estimate > 60, "fixture must exceed 1.5x target");
        assert!(chunks[0].token_estimate <= 80);
    }

    #[test]
    fn test_pathological_single_line_terminates() {
        // 10,000 characters, no structural boundary anywhere.
        let text = "x".repeat(10_000);
        let doc = Document::new("blob.txt", DocumentKind::GenericText, text);
        let chunks = chunk_document(&doc, 100, 10);

        assert!(chunks.len() > 1, "forced split must produce multiple chunks");
        for chunk in &chunks {
            assert!(
                chunk.token_estimate <= 200,
                "chunk exceeds 2x budget: {} tokens",
                chunk.token_estimate
            );
        }
    }

    #[test]
    fn test_budget_bound_holds_across_strategies() {
        let target = 60;
        let code = (0..40).map(make_long_code_line).collect::<Vec<_>>().join("\n");
        let sql = (0..60)
            .map(|i| format!("INSERT INTO audit_log (id, detail) VALUES ({}, 'row detail text');", i))
            .collect::<String>();
        let prose = (0..30)
            .map(|i| format!("Paragraph {} has a handful of words in it.", i))
            .collect::<Vec<_>>()
            .join("\n\n");

        for (kind, text) in [
            (DocumentKind::Code, code),
            (DocumentKind::Sql, sql),
            (DocumentKind::GenericText, prose),
        ] {
            let doc = Document::new("doc", kind, text);
            for chunk in chunk_document(&doc, target, 8) {
                assert!(
                    chunk.token_estimate <= target * 2,
                    "{:?} chunk at {} tokens breaks the 2x bound",
                    kind,
                    chunk.token_estimate
                );
            }
        }
    }

    fn make_long_code_line(i: usize) -> String {
        format!("        var result{} = ComputeSomething(input{}, options{});", i, i, i)
    }

    #[test]
    fn test_sql_procedures_become_units() {
        let text = "\
CREATE PROCEDURE GetUsers AS\nBEGIN\n    SELECT * FROM users;\nEND\n\
CREATE PROCEDURE GetOrders AS\nBEGIN\n    SELECT * FROM orders;\nEND\n";
        let doc = Document::new("schema.sql", DocumentKind::Sql, text);
        // Budget small enough to defeat the single-chunk shortcut.
        let chunks = chunk_document(&doc, 15, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("GetUsers"));
        assert!(chunks[1].text.contains("GetOrders"));
    }

    #[test]
    fn test_sql_statement_fallback() {
        let stmts: String = (0..20)
            .map(|i| format!("INSERT INTO t VALUES ({});\n", i))
            .collect();
        let doc = Document::new("data.sql", DocumentKind::Sql, stmts);
        let chunks = chunk_document(&doc, 20, 0);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.trim_end().ends_with(';'));
        }
    }

    #[test]
    fn test_paragraph_accumulation() {
        let text = (0..12)
            .map(|i| format!("Paragraph number {} talks about something.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = Document::new("notes.md", DocumentKind::GenericText, &text);
        let chunks = chunk_document(&doc, 30, 0);
        assert!(chunks.len() > 1);
        // Every paragraph survives somewhere.
        let all: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");
        for i in 0..12 {
            assert!(all.contains(&format!("Paragraph number {}", i)));
        }
    }

    #[test]
    fn test_overlap_degrades_to_whole_chunk() {
        // Overlap far larger than any chunk: must clamp, never error.
        let text = (0..20)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let doc = Document::new("tiny.txt", DocumentKind::GenericText, text);
        let chunks = chunk_document(&doc, 10, 10_000);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_reconstruction_without_overlap() {
        // With zero overlap, concatenated chunk lines reproduce the
        // document's lines exactly.
        let text = (0..50)
            .map(|i| format!("    var value{} = Compute({});", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let doc = code_doc(&text);
        let chunks = chunk_document(&doc, 40, 0);
        assert!(chunks.len() > 1);

        let reassembled: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.text.lines().map(|l| l.to_string()).collect::<Vec<_>>())
            .collect();
        let original: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        assert_eq!(reassembled, original);
    }

    #[test]
    fn test_chunk_ids_are_contiguous() {
        let text = (0..100)
            .map(|i| format!("statement_{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let doc = code_doc(&text);
        let chunks = chunk_document(&doc, 30, 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = format!("{}\n\n{}", make_method("Alpha", 20), make_method("Beta", 20));
        let doc = code_doc(&text);
        let a = chunk_document(&doc, 50, 10);
        let b = chunk_document(&doc, 50, 10);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
        }
    }
}
