// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call-target extraction for chunk dependencies.
//!
//! Walks a chunk's subtree collecting callee names (`foo()` yields `foo`,
//! `x.bar()` yields `bar`), then subtracts a per-language set of builtins.
//! The result is sorted and deduplicated. Names are not resolved: a collected
//! name may match several definitions, and graph consumers treat edges as
//! candidate sets.

use std::collections::BTreeSet;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use tree_sitter::Node;

use super::Language;

static PYTHON_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "print",
        "len",
        "str",
        "int",
        "float",
        "list",
        "dict",
        "set",
        "tuple",
        "range",
        "enumerate",
        "zip",
        "map",
        "filter",
        "open",
        "isinstance",
        "issubclass",
        "hasattr",
        "getattr",
        "setattr",
        "super",
        "repr",
        "type",
    ]
    .into_iter()
    .collect()
});

static JS_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "require",
        "log",
        "warn",
        "error",
        "parseInt",
        "parseFloat",
        "setTimeout",
        "setInterval",
        "clearTimeout",
        "clearInterval",
        "String",
        "Number",
        "Boolean",
        "Array",
        "Object",
        "Promise",
        "stringify",
        "parse",
    ]
    .into_iter()
    .collect()
});

static GO_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "make", "len", "cap", "append", "copy", "delete", "new", "panic", "recover", "close",
        "print", "println",
    ]
    .into_iter()
    .collect()
});

static JAVA_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "println", "print", "valueOf", "toString", "equals", "hashCode", "format",
    ]
    .into_iter()
    .collect()
});

static C_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "printf", "fprintf", "sprintf", "snprintf", "malloc", "calloc", "realloc", "free",
        "memcpy", "memset", "strlen", "strcmp", "strcpy", "sizeof", "exit", "assert",
    ]
    .into_iter()
    .collect()
});

static RUST_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "new", "clone", "to_string", "into", "from", "unwrap", "expect", "iter", "collect",
        "len", "push", "insert", "get", "map", "format",
    ]
    .into_iter()
    .collect()
});

/// Builtin skip-set for a language.
pub fn builtins_for(lang: Language) -> &'static HashSet<&'static str> {
    match lang {
        Language::Python => &PYTHON_BUILTINS,
        Language::JavaScript | Language::TypeScript => &JS_BUILTINS,
        Language::Go => &GO_BUILTINS,
        Language::Java => &JAVA_BUILTINS,
        Language::C | Language::Cpp => &C_BUILTINS,
        Language::Rust => &RUST_BUILTINS,
        // Fallback-parsed languages never reach call extraction.
        Language::Ruby | Language::Php => &JS_BUILTINS,
    }
}

/// Collect callee names under `node`, minus builtins, sorted and deduplicated.
pub fn collect_call_names(node: &Node, source: &[u8], lang: Language) -> Vec<String> {
    let mut names = BTreeSet::new();
    collect_into(node, source, lang, &mut names);

    let builtins = builtins_for(lang);
    names
        .into_iter()
        .filter(|name| !builtins.contains(name.as_str()))
        .collect()
}

fn collect_into(node: &Node, source: &[u8], lang: Language, names: &mut BTreeSet<String>) {
    let kind = node.kind();
    let is_call = match lang {
        Language::Python => kind == "call",
        Language::Java => kind == "method_invocation" || kind == "object_creation_expression",
        _ => kind == "call_expression",
    };

    if is_call {
        let target = match lang {
            Language::Java => node
                .child_by_field_name("name")
                .or_else(|| node.child_by_field_name("type")),
            _ => node.child_by_field_name("function"),
        };
        if let Some(target) = target {
            if let Some(name) = callee_name(&target, source) {
                if !name.is_empty() {
                    names.insert(name);
                }
            }
        }
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_into(&child, source, lang, names);
        }
    }
}

/// Reduce a call target to a bare name: the rightmost identifier-like leaf.
fn callee_name(node: &Node, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" | "property_identifier" | "field_identifier" | "type_identifier"
        | "name" => Some(node.utf8_text(source).unwrap_or("").to_string()),
        "attribute" => node
            .child_by_field_name("attribute")
            .and_then(|n| callee_name(&n, source)),
        "member_expression" => node
            .child_by_field_name("property")
            .and_then(|n| callee_name(&n, source)),
        "selector_expression" | "field_expression" => node
            .child_by_field_name("field")
            .and_then(|n| callee_name(&n, source)),
        "scoped_identifier" => node
            .child_by_field_name("name")
            .and_then(|n| callee_name(&n, source)),
        "generic_type" => node
            .child_by_field_name("type")
            .and_then(|n| callee_name(&n, source)),
        _ => {
            // Unwrap parenthesized or qualified forms by taking the last
            // identifier-like named child.
            for i in (0..node.named_child_count()).rev() {
                if let Some(child) = node.named_child(i) {
                    if let Some(name) = callee_name(&child, source) {
                        return Some(name);
                    }
                }
            }
            None
        }
    }
}
