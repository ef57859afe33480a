// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tree-sitter definition pass for the non-Python grammar languages.
//!
//! Extracts function, class, method, interface, struct and impl definitions
//! in source order, mapped into the closed chunk-type set (struct-like and
//! interface-like containers become `class` chunks). Container chunks cover
//! only their header lines; member functions come out as separate `method`
//! chunks, keeping structural spans disjoint within a file.

use tree_sitter::Node;

use crate::types::ChunkType;

use super::deps::collect_call_names;
use super::{join_lines, Language, ParsedChunk};

pub(super) fn extract(root: &Node, content: &str, lang: Language) -> Vec<ParsedChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let src = content.as_bytes();
    let mut out = Vec::new();

    visit_container(root, &lines, src, lang, &mut out);
    out
}

/// Walk the named children of a container node (module root, namespace body,
/// mod body), emitting definition chunks.
fn visit_container(
    container: &Node,
    lines: &[&str],
    src: &[u8],
    lang: Language,
    out: &mut Vec<ParsedChunk>,
) {
    for i in 0..container.named_child_count() {
        let Some(child) = container.named_child(i) else {
            continue;
        };
        let node = unwrap_export(&child);

        match node.kind() {
            // Nested containers that host top-level-like definitions.
            "namespace_definition" | "mod_item" => {
                if let Some(body) = node.child_by_field_name("body") {
                    visit_container(&body, lines, src, lang, out);
                }
            }
            "type_declaration" if lang == Language::Go => {
                for j in 0..node.named_child_count() {
                    if let Some(spec) = node.named_child(j) {
                        if spec.kind() == "type_spec" && is_go_container_spec(&spec) {
                            emit_simple(&spec, ChunkType::Class, lines, src, lang, out);
                        }
                    }
                }
            }
            "function_declaration" | "generator_function_declaration" | "function_item" => {
                emit_simple(&node, ChunkType::Function, lines, src, lang, out);
            }
            "function_definition" => {
                emit_c_function(&node, lines, src, lang, out);
            }
            "method_declaration" if lang == Language::Go => {
                emit_go_method(&node, lines, src, out);
            }
            "lexical_declaration" | "variable_declaration"
                if matches!(lang, Language::JavaScript | Language::TypeScript) =>
            {
                emit_js_function_bindings(&node, lines, src, lang, out);
            }
            "class_declaration" | "class_specifier" | "struct_specifier" => {
                emit_class_with_methods(&node, lines, src, lang, out);
            }
            "interface_declaration" | "struct_item" | "enum_item" => {
                emit_simple(&node, ChunkType::Class, lines, src, lang, out);
            }
            "trait_item" => {
                emit_class_with_methods(&node, lines, src, lang, out);
            }
            "impl_item" => {
                emit_impl(&node, lines, src, out);
            }
            _ => {}
        }
    }
}

/// Unwrap `export ...` statements to the declaration they export.
fn unwrap_export<'a>(node: &Node<'a>) -> Node<'a> {
    if node.kind() == "export_statement" {
        if let Some(decl) = node.child_by_field_name("declaration") {
            return decl;
        }
    }
    *node
}

fn span(node: &Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// Definition line(s) up to the opening brace, falling back to the first line.
fn signature_of(node: &Node, src: &[u8]) -> Option<String> {
    let text = node.utf8_text(src).unwrap_or("");
    let sig = match text.find('{') {
        Some(pos) => text[..pos].trim(),
        None => text.lines().next().unwrap_or("").trim(),
    };
    if sig.is_empty() {
        None
    } else {
        Some(sig.to_string())
    }
}

fn named_field(node: &Node, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(src).ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn push_chunk(
    out: &mut Vec<ParsedChunk>,
    chunk_type: ChunkType,
    name: String,
    parent: Option<String>,
    start: u32,
    end: u32,
    lines: &[&str],
    dependencies: Vec<String>,
    signature: Option<String>,
) {
    let qualified_name = match &parent {
        Some(p) => format!("{}.{}", p, name),
        None => name.clone(),
    };
    out.push(ParsedChunk {
        chunk_type,
        name,
        qualified_name,
        content: join_lines(lines, start, end),
        start_line: start,
        end_line: end,
        dependencies,
        parent,
        signature,
        docstring: None,
    });
}

/// Emit a definition whose whole span becomes one chunk.
fn emit_simple(
    node: &Node,
    chunk_type: ChunkType,
    lines: &[&str],
    src: &[u8],
    lang: Language,
    out: &mut Vec<ParsedChunk>,
) {
    let Some(name) = named_field(node, "name", src) else {
        return;
    };
    let (start, end) = span(node);
    let deps = if chunk_type == ChunkType::Function {
        collect_call_names(node, src, lang)
    } else {
        Vec::new()
    };
    push_chunk(
        out,
        chunk_type,
        name,
        None,
        start,
        end,
        lines,
        deps,
        signature_of(node, src),
    );
}

fn is_go_container_spec(spec: &Node) -> bool {
    spec.child_by_field_name("type")
        .map(|t| matches!(t.kind(), "struct_type" | "interface_type"))
        .unwrap_or(false)
}

/// Go methods: `func (r *Recv) Name(...)`; the receiver type becomes `parent`.
fn emit_go_method(node: &Node, lines: &[&str], src: &[u8], out: &mut Vec<ParsedChunk>) {
    let Some(name) = named_field(node, "name", src) else {
        return;
    };
    let parent = node
        .child_by_field_name("receiver")
        .and_then(|r| first_descendant_of_kind(&r, "type_identifier"))
        .and_then(|n| n.utf8_text(src).ok())
        .map(|s| s.to_string());
    let (start, end) = span(node);
    let deps = collect_call_names(node, src, Language::Go);
    push_chunk(
        out,
        ChunkType::Method,
        name,
        parent,
        start,
        end,
        lines,
        deps,
        signature_of(node, src),
    );
}

/// `const f = () => ...` style function bindings.
fn emit_js_function_bindings(
    node: &Node,
    lines: &[&str],
    src: &[u8],
    lang: Language,
    out: &mut Vec<ParsedChunk>,
) {
    for i in 0..node.named_child_count() {
        let Some(declarator) = node.named_child(i) else {
            continue;
        };
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let is_function = declarator
            .child_by_field_name("value")
            .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
            .unwrap_or(false);
        if !is_function {
            continue;
        }
        let Some(name) = named_field(&declarator, "name", src) else {
            continue;
        };
        let (start, end) = span(node);
        let deps = collect_call_names(&declarator, src, lang);
        push_chunk(
            out,
            ChunkType::Function,
            name,
            None,
            start,
            end,
            lines,
            deps,
            signature_of(node, src),
        );
    }
}

/// Member kinds treated as methods inside a class-like body, per grammar.
fn is_method_member(kind: &str) -> bool {
    matches!(
        kind,
        "method_definition"
            | "method_declaration"
            | "constructor_declaration"
            | "function_definition"
            | "function_item"
    )
}

/// Emit a class-like container as a header chunk plus one method chunk per
/// member function.
fn emit_class_with_methods(
    node: &Node,
    lines: &[&str],
    src: &[u8],
    lang: Language,
    out: &mut Vec<ParsedChunk>,
) {
    let Some(class_name) = named_field(node, "name", src) else {
        return;
    };
    let (class_start, class_end) = span(node);
    let body = node.child_by_field_name("body");

    let mut header_end = class_end;
    let mut methods: Vec<Node> = Vec::new();
    if let Some(body) = &body {
        for i in 0..body.named_child_count() {
            if let Some(member) = body.named_child(i) {
                if is_method_member(member.kind()) {
                    methods.push(member);
                }
            }
        }
        if let Some(first) = methods.first() {
            header_end = (first.start_position().row as u32).max(class_start);
        }
    }

    push_chunk(
        out,
        ChunkType::Class,
        class_name.clone(),
        None,
        class_start,
        header_end,
        lines,
        Vec::new(),
        signature_of(node, src),
    );

    for method in methods {
        let Some(name) = named_field(&method, "name", src)
            .or_else(|| c_function_name(&method, src).map(|(name, _)| name))
        else {
            continue;
        };
        let (start, end) = span(&method);
        let deps = collect_call_names(&method, src, lang);
        push_chunk(
            out,
            ChunkType::Method,
            name,
            Some(class_name.clone()),
            start,
            end,
            lines,
            deps,
            signature_of(&method, src),
        );
    }
}

/// Rust `impl` block: header chunk named after the implemented type, plus
/// method chunks for the contained functions.
fn emit_impl(node: &Node, lines: &[&str], src: &[u8], out: &mut Vec<ParsedChunk>) {
    let Some(type_node) = node.child_by_field_name("type") else {
        return;
    };
    let impl_name = base_type_name(&type_node, src);
    if impl_name.is_empty() {
        return;
    }

    let (impl_start, impl_end) = span(node);
    let mut header_end = impl_end;
    let mut methods: Vec<Node> = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        for i in 0..body.named_child_count() {
            if let Some(member) = body.named_child(i) {
                if member.kind() == "function_item" {
                    methods.push(member);
                }
            }
        }
        if let Some(first) = methods.first() {
            header_end = (first.start_position().row as u32).max(impl_start);
        }
    }

    // The qualified name distinguishes the impl header from the type
    // definition (and trait impls from inherent ones), keeping ids unique.
    let qualified_name = match node.child_by_field_name("trait") {
        Some(trait_node) => format!(
            "impl {} for {}",
            base_type_name(&trait_node, src),
            impl_name
        ),
        None => format!("impl {}", impl_name),
    };
    out.push(ParsedChunk {
        chunk_type: ChunkType::Class,
        name: impl_name.clone(),
        qualified_name,
        content: join_lines(lines, impl_start, header_end),
        start_line: impl_start,
        end_line: header_end,
        dependencies: Vec::new(),
        parent: None,
        signature: signature_of(node, src),
        docstring: None,
    });

    for method in methods {
        let Some(name) = named_field(&method, "name", src) else {
            continue;
        };
        let (start, end) = span(&method);
        let deps = collect_call_names(&method, src, Language::Rust);
        push_chunk(
            out,
            ChunkType::Method,
            name,
            Some(impl_name.clone()),
            start,
            end,
            lines,
            deps,
            signature_of(&method, src),
        );
    }
}

/// Strip generics from an implemented type: `Foo<T>` yields `Foo`.
fn base_type_name(node: &Node, src: &[u8]) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| base_type_name(&t, src))
            .unwrap_or_default(),
        _ => node.utf8_text(src).unwrap_or("").to_string(),
    }
}

/// C/C++ function definitions: dig the name (and any `Class::` scope) out of
/// the declarator.
fn emit_c_function(
    node: &Node,
    lines: &[&str],
    src: &[u8],
    lang: Language,
    out: &mut Vec<ParsedChunk>,
) {
    let Some((name, scope)) = c_function_name(node, src) else {
        return;
    };
    let (start, end) = span(node);
    let deps = collect_call_names(node, src, lang);
    let chunk_type = if scope.is_some() {
        ChunkType::Method
    } else {
        ChunkType::Function
    };
    push_chunk(
        out,
        chunk_type,
        name,
        scope,
        start,
        end,
        lines,
        deps,
        signature_of(node, src),
    );
}

/// Resolve a C/C++ function name and optional `Class::` scope.
fn c_function_name(node: &Node, src: &[u8]) -> Option<(String, Option<String>)> {
    let declarator = first_descendant_of_kind(node, "function_declarator")?;
    let inner = declarator.child_by_field_name("declarator")?;
    match inner.kind() {
        "identifier" | "field_identifier" => {
            Some((inner.utf8_text(src).ok()?.to_string(), None))
        }
        "qualified_identifier" => {
            let name = inner
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(src).ok())?
                .to_string();
            let scope = inner
                .child_by_field_name("scope")
                .and_then(|s| s.utf8_text(src).ok())
                .map(|s| s.rsplit("::").next().unwrap_or(s).to_string());
            Some((name, scope))
        }
        _ => {
            let ident = first_descendant_of_kind(&inner, "identifier")?;
            Some((ident.utf8_text(src).ok()?.to_string(), None))
        }
    }
}

fn first_descendant_of_kind<'a>(node: &Node<'a>, kind: &str) -> Option<Node<'a>> {
    if node.kind() == kind {
        return Some(*node);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if let Some(found) = first_descendant_of_kind(&child, kind) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn extract_lang(source: &str, lang: Language) -> Vec<ParsedChunk> {
        let mut parser = Parser::new();
        let grammar: tree_sitter::Language = match lang {
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            _ => panic!("unexpected language"),
        };
        parser.set_language(&grammar).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let mut chunks = extract(&tree.root_node(), source, lang);
        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }

    #[test]
    fn test_typescript_functions_classes_interfaces() {
        let source = r#"export function greet(name: string): string {
    return format(name);
}

export class Greeter {
    private name: string;

    greet(): string {
        return greet(this.name);
    }
}

export interface Greeting {
    message: string;
}
"#;
        let chunks = extract_lang(source, Language::TypeScript);
        let names: Vec<&str> = chunks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"greet"));
        assert!(names.contains(&"Greeter"));
        assert!(names.contains(&"Greeting"));

        let method = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Method)
            .unwrap();
        assert_eq!(method.parent.as_deref(), Some("Greeter"));
        assert_eq!(method.qualified_name, "Greeter.greet");

        let class = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Class && c.name == "Greeter")
            .unwrap();
        assert!(class.end_line < method.start_line, "header stops before methods");
    }

    #[test]
    fn test_javascript_arrow_binding() {
        let source = "const handler = (req) => {\n    return respond(req);\n};\n";
        let chunks = extract_lang(source, Language::JavaScript);
        let func = chunks.iter().find(|c| c.name == "handler").unwrap();
        assert_eq!(func.chunk_type, ChunkType::Function);
        assert!(func.dependencies.contains(&"respond".to_string()));
    }

    #[test]
    fn test_go_methods_and_types() {
        let source = r#"package auth

func Verify(token string) bool {
    return check(token)
}

type Session struct {
    ID string
}

func (s *Session) Refresh() error {
    return s.reload()
}
"#;
        let chunks = extract_lang(source, Language::Go);
        let verify = chunks.iter().find(|c| c.name == "Verify").unwrap();
        assert_eq!(verify.chunk_type, ChunkType::Function);

        let session = chunks.iter().find(|c| c.name == "Session").unwrap();
        assert_eq!(session.chunk_type, ChunkType::Class);

        let refresh = chunks.iter().find(|c| c.name == "Refresh").unwrap();
        assert_eq!(refresh.chunk_type, ChunkType::Method);
        assert_eq!(refresh.parent.as_deref(), Some("Session"));
    }

    #[test]
    fn test_rust_impl_methods() {
        let source = r#"pub struct Engine {
    ready: bool,
}

impl Engine {
    pub fn start(&mut self) {
        self.warm_up();
    }

    pub fn stop(&mut self) {
        shutdown(self);
    }
}
"#;
        let chunks = extract_lang(source, Language::Rust);
        let strukt = chunks
            .iter()
            .find(|c| c.name == "Engine" && c.start_line == 1)
            .unwrap();
        assert_eq!(strukt.chunk_type, ChunkType::Class);

        let start = chunks.iter().find(|c| c.name == "start").unwrap();
        assert_eq!(start.chunk_type, ChunkType::Method);
        assert_eq!(start.parent.as_deref(), Some("Engine"));
        assert!(start.dependencies.contains(&"warm_up".to_string()));

        let stop = chunks.iter().find(|c| c.name == "stop").unwrap();
        assert!(stop.dependencies.contains(&"shutdown".to_string()));
    }

    #[test]
    fn test_struct_and_impl_qualified_names_stay_distinct() {
        let source = "pub struct Engine;\n\nimpl Engine {\n    fn run(&self) {}\n}\n\nimpl Drop for Engine {\n    fn drop(&mut self) {}\n}\n";
        let chunks = extract_lang(source, Language::Rust);
        let qualified: Vec<&str> = chunks.iter().map(|c| c.qualified_name.as_str()).collect();
        assert!(qualified.contains(&"Engine"));
        assert!(qualified.contains(&"impl Engine"));
        assert!(qualified.contains(&"impl Drop for Engine"));

        let mut unique = qualified.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), qualified.len(), "qualified names must be unique");
    }

    #[test]
    fn test_java_class_header_and_methods() {
        let source = r#"public class AuthService {
    private final TokenStore store;

    public boolean verify(String token) {
        return store.lookup(token);
    }
}
"#;
        let chunks = extract_lang(source, Language::Java);
        let class = chunks.iter().find(|c| c.name == "AuthService").unwrap();
        assert_eq!(class.chunk_type, ChunkType::Class);
        let verify = chunks.iter().find(|c| c.name == "verify").unwrap();
        assert_eq!(verify.chunk_type, ChunkType::Method);
        assert_eq!(verify.parent.as_deref(), Some("AuthService"));
        assert!(verify.dependencies.contains(&"lookup".to_string()));
    }

    #[test]
    fn test_c_function_name_through_pointers() {
        let source = "static char *render(int n) {\n    return format_buf(n);\n}\n";
        let chunks = extract_lang(source, Language::C);
        let func = chunks.iter().find(|c| c.name == "render").unwrap();
        assert_eq!(func.chunk_type, ChunkType::Function);
        assert!(func.dependencies.contains(&"format_buf".to_string()));
    }

    #[test]
    fn test_cpp_out_of_line_method() {
        let source = "bool Session::refresh() {\n    return reload();\n}\n";
        let chunks = extract_lang(source, Language::Cpp);
        let method = chunks.iter().find(|c| c.name == "refresh").unwrap();
        assert_eq!(method.chunk_type, ChunkType::Method);
        assert_eq!(method.parent.as_deref(), Some("Session"));
        assert_eq!(method.qualified_name, "Session.refresh");
    }

    #[test]
    fn test_structural_spans_disjoint_across_languages() {
        let source = r#"export class Box {
    private v: number;

    get(): number {
        return this.v;
    }

    set(v: number): void {
        this.v = v;
    }
}
"#;
        let chunks = extract_lang(source, Language::TypeScript);
        let structural: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type.is_structural())
            .collect();
        for (i, a) in structural.iter().enumerate() {
            for b in structural.iter().skip(i + 1) {
                let overlap = a.start_line <= b.end_line && b.start_line <= a.end_line;
                assert!(!overlap, "{} overlaps {}", a.qualified_name, b.qualified_name);
            }
        }
    }
}
