// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structured Python pass.
//!
//! Emits, in source order: the module docstring, a single imports chunk
//! covering the top-level import prologue, one chunk per top-level function,
//! a header chunk per class (methods are emitted separately with
//! `parent = class name`), and script chunks covering any leftover top-level
//! statements, merged into contiguous runs with gaps of up to 5 lines.

use std::collections::HashSet;

use tree_sitter::Node;

use crate::types::ChunkType;

use super::deps::collect_call_names;
use super::{join_lines, Language, ParsedChunk};

/// Gap tolerance when merging adjacent leftover statements into one script chunk.
const SCRIPT_GAP_LINES: u32 = 5;

pub(super) fn extract(root: &Node, content: &str, module_name: &str) -> Vec<ParsedChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let src = content.as_bytes();
    let mut chunks = Vec::new();
    let mut covered: HashSet<u32> = HashSet::new();

    let docstring_node = module_docstring(root);
    if let Some(doc) = &docstring_node {
        let (start, end) = span(doc);
        let text = string_text(doc, src);
        covered.extend(start..=end);
        chunks.push(ParsedChunk {
            chunk_type: ChunkType::ModuleDoc,
            name: module_name.to_string(),
            qualified_name: "module_doc".to_string(),
            content: text.clone(),
            start_line: start,
            end_line: end,
            dependencies: Vec::new(),
            parent: None,
            signature: None,
            docstring: Some(text),
        });
    }

    if let Some(chunk) = imports_chunk(root, &lines, src) {
        covered.extend(chunk.start_line..=chunk.end_line);
        chunks.push(chunk);
    }

    for i in 0..root.named_child_count() {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        let def = resolve_def(&child);
        match def.kind() {
            "function_definition" => {
                if let Some(chunk) = function_chunk(&def, &lines, src, None) {
                    covered.extend(chunk.start_line..=chunk.end_line);
                    chunks.push(chunk);
                }
            }
            "class_definition" => {
                let Some(class_chunk) = class_chunk(&def, &lines, src) else {
                    continue;
                };
                let class_name = class_chunk.name.clone();
                covered.extend(class_chunk.start_line..=class_chunk.end_line);
                chunks.push(class_chunk);

                if let Some(body) = def.child_by_field_name("body") {
                    for j in 0..body.named_child_count() {
                        let Some(member) = body.named_child(j) else {
                            continue;
                        };
                        let member = resolve_def(&member);
                        if member.kind() == "function_definition" {
                            if let Some(chunk) =
                                function_chunk(&member, &lines, src, Some(&class_name))
                            {
                                covered.extend(chunk.start_line..=chunk.end_line);
                                chunks.push(chunk);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    chunks.extend(script_chunks(root, &lines, &covered, docstring_node.as_ref()));
    chunks
}

/// Unwrap `decorated_definition` to the definition it decorates.
fn resolve_def<'a>(node: &Node<'a>) -> Node<'a> {
    if node.kind() == "decorated_definition" {
        if let Some(def) = node.child_by_field_name("definition") {
            return def;
        }
    }
    *node
}

/// 1-indexed inclusive line span of a node.
fn span(node: &Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// The module docstring: a leading expression statement holding a string.
fn module_docstring<'a>(root: &Node<'a>) -> Option<Node<'a>> {
    for i in 0..root.named_child_count() {
        let child = root.named_child(i)?;
        if child.kind() == "comment" {
            continue;
        }
        if child.kind() == "expression_statement" {
            let inner = child.named_child(0)?;
            if inner.kind() == "string" {
                return Some(child);
            }
        }
        return None;
    }
    None
}

/// Strip quote delimiters (and any prefix letters) from a string literal.
fn string_text(node: &Node, src: &[u8]) -> String {
    let inner = if node.kind() == "expression_statement" {
        node.named_child(0).unwrap_or(*node)
    } else {
        *node
    };
    let raw = inner.utf8_text(src).unwrap_or("");
    let stripped = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    stripped
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

/// Single chunk covering every top-level import statement.
fn imports_chunk(root: &Node, lines: &[&str], src: &[u8]) -> Option<ParsedChunk> {
    let mut start = u32::MAX;
    let mut end = 0u32;
    let mut modules: Vec<String> = Vec::new();

    for i in 0..root.named_child_count() {
        let child = root.named_child(i)?;
        match child.kind() {
            "import_statement" | "import_from_statement" => {
                let (s, e) = span(&child);
                start = start.min(s);
                end = end.max(e);
                collect_import_roots(&child, src, &mut modules);
            }
            _ => {}
        }
    }

    if end == 0 {
        return None;
    }

    modules.sort();
    modules.dedup();

    Some(ParsedChunk {
        chunk_type: ChunkType::Imports,
        name: "imports".to_string(),
        qualified_name: "imports".to_string(),
        content: join_lines(lines, start, end),
        start_line: start,
        end_line: end,
        dependencies: modules,
        parent: None,
        signature: None,
        docstring: None,
    })
}

/// Top-level package names referenced by an import statement.
fn collect_import_roots(node: &Node, src: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "import_statement" => {
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i) {
                    let target = if child.kind() == "aliased_import" {
                        child.child_by_field_name("name")
                    } else {
                        Some(child)
                    };
                    if let Some(target) = target {
                        push_root(&target, src, out);
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                push_root(&module, src, out);
            }
        }
        _ => {}
    }
}

fn push_root(node: &Node, src: &[u8], out: &mut Vec<String>) {
    let text = node.utf8_text(src).unwrap_or("");
    let root = text.trim_start_matches('.').split('.').next().unwrap_or("");
    if !root.is_empty() {
        out.push(root.to_string());
    }
}

fn function_chunk(
    def: &Node,
    lines: &[&str],
    src: &[u8],
    parent: Option<&str>,
) -> Option<ParsedChunk> {
    let name = def
        .child_by_field_name("name")?
        .utf8_text(src)
        .ok()?
        .to_string();
    let (start, end) = span(def);

    let signature = def
        .child_by_field_name("body")
        .map(|body| {
            let body_start = body.start_position().row as u32 + 1;
            if body_start > start {
                join_lines(lines, start, body_start - 1)
            } else {
                lines
                    .get((start - 1) as usize)
                    .map(|l| l.to_string())
                    .unwrap_or_default()
            }
        })
        .map(|s| s.trim().to_string());

    let qualified_name = match parent {
        Some(p) => format!("{}.{}", p, name),
        None => name.clone(),
    };

    Some(ParsedChunk {
        chunk_type: if parent.is_some() {
            ChunkType::Method
        } else {
            ChunkType::Function
        },
        name,
        qualified_name,
        content: join_lines(lines, start, end),
        start_line: start,
        end_line: end,
        dependencies: collect_call_names(def, src, Language::Python),
        parent: parent.map(|p| p.to_string()),
        signature,
        docstring: body_docstring(def, src),
    })
}

/// Class header chunk: the definition line, docstring, and class-level
/// assignments up to the first method. Methods come out separately.
fn class_chunk(def: &Node, lines: &[&str], src: &[u8]) -> Option<ParsedChunk> {
    let name = def
        .child_by_field_name("name")?
        .utf8_text(src)
        .ok()?
        .to_string();
    let (start, _) = span(def);
    let mut header_end = start;

    if let Some(body) = def.child_by_field_name("body") {
        for i in 0..body.named_child_count() {
            let Some(member) = body.named_child(i) else {
                continue;
            };
            let resolved = resolve_def(&member);
            match resolved.kind() {
                "function_definition" => break,
                "expression_statement" => header_end = resolved.end_position().row as u32 + 1,
                _ => {}
            }
        }
    }

    // Base classes become dependencies, the way call targets do for functions.
    let mut bases = Vec::new();
    if let Some(superclasses) = def.child_by_field_name("superclasses") {
        for i in 0..superclasses.named_child_count() {
            if let Some(base) = superclasses.named_child(i) {
                match base.kind() {
                    "identifier" => {
                        bases.push(base.utf8_text(src).unwrap_or("").to_string());
                    }
                    "attribute" => {
                        if let Some(attr) = base.child_by_field_name("attribute") {
                            bases.push(attr.utf8_text(src).unwrap_or("").to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    bases.retain(|b| !b.is_empty());

    Some(ParsedChunk {
        chunk_type: ChunkType::Class,
        name: name.clone(),
        qualified_name: name,
        content: join_lines(lines, start, header_end),
        start_line: start,
        end_line: header_end,
        dependencies: bases,
        parent: None,
        signature: None,
        docstring: body_docstring(def, src),
    })
}

/// Docstring of a function or class body, when present.
fn body_docstring(def: &Node, src: &[u8]) -> Option<String> {
    let body = def.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = first.named_child(0)?;
    if inner.kind() == "string" {
        Some(string_text(&first, src))
    } else {
        None
    }
}

/// Leftover top-level statements, merged into contiguous script chunks.
fn script_chunks(
    root: &Node,
    lines: &[&str],
    covered: &HashSet<u32>,
    docstring: Option<&Node>,
) -> Vec<ParsedChunk> {
    let docstring_id = docstring.map(|n| n.id());
    let mut spans: Vec<(u32, u32)> = Vec::new();

    for i in 0..root.named_child_count() {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        match child.kind() {
            "function_definition"
            | "class_definition"
            | "decorated_definition"
            | "import_statement"
            | "import_from_statement"
            | "comment" => continue,
            _ => {}
        }
        if Some(child.id()) == docstring_id {
            continue;
        }

        let (start, end) = span(&child);
        if (start..=end).any(|l| covered.contains(&l)) {
            continue;
        }
        spans.push((start, end));
    }

    if spans.is_empty() {
        return Vec::new();
    }
    spans.sort_unstable();

    let mut out = Vec::new();
    let (mut run_start, mut run_end) = spans[0];

    for &(start, end) in &spans[1..] {
        let gap_covered = (run_end + 1..start).any(|l| covered.contains(&l));
        if !gap_covered && start <= run_end + SCRIPT_GAP_LINES {
            run_end = run_end.max(end);
        } else {
            out.push(script_chunk(run_start, run_end, lines));
            run_start = start;
            run_end = end;
        }
    }
    out.push(script_chunk(run_start, run_end, lines));
    out
}

fn script_chunk(start: u32, end: u32, lines: &[&str]) -> ParsedChunk {
    ParsedChunk {
        chunk_type: ChunkType::Script,
        name: format!("script_L{}", start),
        qualified_name: format!("script_{}", start),
        content: join_lines(lines, start, end),
        start_line: start,
        end_line: end,
        dependencies: Vec::new(),
        parent: None,
        signature: None,
        docstring: None,
    }
}
