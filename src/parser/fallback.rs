// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Line-regex fallback for languages without a loaded grammar.
//!
//! Accumulates lines into `code_block` chunks, starting a new block when a
//! definition-like line appears after a substantial run, or when the current
//! block reaches the size cap.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ChunkType;

use super::ParsedChunk;

/// Definition-like line starts across C-style and scripting languages.
static BLOCK_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:public\s+|private\s+|protected\s+)?(?:async\s+)?(?:func|function|class|interface|struct|impl|module|def)\s+([A-Za-z0-9_]+)",
    )
    .expect("fallback block-start regex is valid")
});

/// Minimum lines before a new definition starts a fresh block.
const MIN_BLOCK_LINES: usize = 5;

/// Hard cap on block length.
const MAX_BLOCK_LINES: usize = 50;

pub(super) fn extract(content: &str, module_name: &str) -> Vec<ParsedChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();

    let mut current: Vec<&str> = Vec::new();
    let mut current_start = 1u32;
    let mut current_name = module_name.to_string();

    for (i, line) in lines.iter().enumerate() {
        let line_num = (i + 1) as u32;
        let started = BLOCK_START
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let should_flush = (started.is_some() && current.len() > MIN_BLOCK_LINES)
            || current.len() >= MAX_BLOCK_LINES;

        if should_flush && !current.is_empty() {
            chunks.push(block_chunk(&current, current_start, line_num - 1, &current_name));
            current.clear();
            current_start = line_num;
            if let Some(name) = &started {
                current_name = name.clone();
            }
        }

        current.push(line);

        if let Some(name) = started {
            if current.len() == 1 {
                current_name = name;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(block_chunk(
            &current,
            current_start,
            lines.len() as u32,
            &current_name,
        ));
    }

    chunks
}

fn block_chunk(lines: &[&str], start: u32, end: u32, name: &str) -> ParsedChunk {
    ParsedChunk {
        chunk_type: ChunkType::CodeBlock,
        name: name.to_string(),
        qualified_name: format!("chunk_{}", start),
        content: lines.join("\n"),
        start_line: start,
        end_line: end,
        dependencies: Vec::new(),
        parent: None,
        signature: None,
        docstring: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_is_one_block() {
        let content = "class Greeter\n  def greet\n    puts 'hi'\n  end\nend\n";
        let chunks = extract(content, "greeter");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::CodeBlock);
        assert_eq!(chunks[0].name, "Greeter");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 5);
    }

    #[test]
    fn test_new_definition_starts_fresh_block() {
        let mut content = String::from("def first\n");
        for _ in 0..8 {
            content.push_str("  body\n");
        }
        content.push_str("end\n");
        content.push_str("def second\n  body\nend\n");

        let chunks = extract(&content, "mod");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].name, "first");
        assert_eq!(chunks[1].name, "second");
        assert!(chunks[1].qualified_name.starts_with("chunk_"));
    }

    #[test]
    fn test_oversized_block_split_at_cap() {
        let content = "line\n".repeat(120);
        let chunks = extract(&content, "blob");
        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.end_line - c.start_line + 1 <= 50));
    }

    #[test]
    fn test_empty_input() {
        assert!(extract("", "empty").is_empty());
    }
}
