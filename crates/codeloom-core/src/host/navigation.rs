//! Per-file navigation (outline) tree.
//!
//! Items are flattened with dotted names for nested scopes, so a method
//! `run` of class `Job` inside namespace `Queue` appears as `Queue.Job.run`.
//! Declarations under an `export` statement are positioned at the export
//! keyword, the way editor outlines report them.

use tree_sitter::Node;

use super::syntax::{is_function_like, named_children, SourceFile};
use crate::models::SymbolKind;

/// One outline entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NavItem {
    pub name: String,
    pub kind: SymbolKind,
    /// Byte offset of the entry's span start.
    pub start: usize,
}

/// Outline of one file in document order.
pub fn navigation_items(file: &SourceFile) -> Vec<NavItem> {
    let mut walker = Walker {
        file,
        out: Vec::new(),
        pending: Vec::new(),
    };
    let top: Vec<Pending<'_>> = named_children(file.root())
        .into_iter()
        .map(|node| Pending::Visit {
            node,
            prefix: None,
            anchor: None,
            nested: false,
        })
        .collect();
    walker.schedule(top);
    while let Some(next) = walker.pending.pop() {
        match next {
            Pending::Visit {
                node,
                prefix,
                anchor,
                nested,
            } => walker.visit(node, prefix, anchor, nested),
            Pending::Declarator {
                node,
                prefix,
                start,
                nested,
            } => {
                let mut next = Vec::new();
                walker.visit_declarator(&mut next, node, prefix.as_deref(), start, nested);
                walker.schedule(next);
            }
            Pending::Member { node, owner } => walker.visit_member(node, owner),
        }
    }
    walker.out
}

/// Outline work still to do; kept on the heap so nesting depth is not
/// bounded by the call stack.
enum Pending<'t> {
    /// `nested` is set inside function bodies, where only functions and
    /// classes are outlined.
    Visit {
        node: Node<'t>,
        prefix: Option<String>,
        anchor: Option<usize>,
        nested: bool,
    },
    Declarator {
        node: Node<'t>,
        prefix: Option<String>,
        start: usize,
        nested: bool,
    },
    Member { node: Node<'t>, owner: String },
}

struct Walker<'a> {
    file: &'a SourceFile,
    out: Vec<NavItem>,
    pending: Vec<Pending<'a>>,
}

impl<'a> Walker<'a> {
    /// Queue `next` to run before anything queued earlier, in order.
    fn schedule(&mut self, next: Vec<Pending<'a>>) {
        self.pending.extend(next.into_iter().rev());
    }

    fn push(&mut self, prefix: Option<&str>, name: &str, kind: SymbolKind, start: usize) -> String {
        let full = match prefix {
            Some(p) => format!("{}.{}", p, name),
            None => name.to_string(),
        };
        self.out.push(NavItem {
            name: full.clone(),
            kind,
            start,
        });
        full
    }

    fn name_of(&self, node: Node<'_>) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| self.file.node_text(n).to_string())
    }

    fn visit(&mut self, node: Node<'a>, prefix: Option<String>, anchor: Option<usize>, nested: bool) {
        let start = anchor.unwrap_or_else(|| node.start_byte());
        let prefix_ref = prefix.as_deref();
        let mut next = Vec::new();
        match node.kind() {
            "export_statement" => {
                if let Some(decl) = node.child_by_field_name("declaration") {
                    next.push(Pending::Visit {
                        node: decl,
                        prefix: prefix.clone(),
                        anchor: Some(node.start_byte()),
                        nested,
                    });
                } else if let Some(value) = node.child_by_field_name("value") {
                    if is_function_like(value) {
                        self.push(prefix_ref, "default", SymbolKind::Function, start);
                    } else if value.kind() == "class" {
                        let name = self.name_of(value).unwrap_or_else(|| "default".into());
                        self.push(prefix_ref, &name, SymbolKind::Class, start);
                    }
                }
            }
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                if let Some(name) = self.name_of(node) {
                    let full = self.push(prefix_ref, &name, SymbolKind::Function, start);
                    if let Some(body) = node.child_by_field_name("body") {
                        block(&mut next, body, &full);
                    }
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                let name = self.name_of(node).unwrap_or_else(|| "<class>".into());
                let full = self.push(prefix_ref, &name, SymbolKind::Class, start);
                if let Some(body) = node.child_by_field_name("body") {
                    members(&mut next, body, &full);
                }
            }
            "interface_declaration" => {
                if let Some(name) = self.name_of(node) {
                    let full = self.push(prefix_ref, &name, SymbolKind::Interface, start);
                    if let Some(body) = node.child_by_field_name("body") {
                        members(&mut next, body, &full);
                    }
                }
            }
            "type_alias_declaration" | "enum_declaration" if !nested => {
                if let Some(name) = self.name_of(node) {
                    self.push(prefix_ref, &name, SymbolKind::Type, start);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                for declarator in named_children(node) {
                    if declarator.kind() == "variable_declarator" {
                        next.push(Pending::Declarator {
                            node: declarator,
                            prefix: prefix.clone(),
                            start,
                            nested,
                        });
                    }
                }
            }
            "internal_module" | "module" => {
                let name = self
                    .name_of(node)
                    .map(|n| n.trim_matches(|c| c == '"' || c == '\'').to_string())
                    .unwrap_or_default();
                let full = self.push(prefix_ref, &name, SymbolKind::Other, start);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in named_children(body) {
                        next.push(Pending::Visit {
                            node: child,
                            prefix: Some(full.clone()),
                            anchor: None,
                            nested: false,
                        });
                    }
                }
            }
            "import_statement" if !nested => self.visit_import(node, prefix_ref),
            "expression_statement" | "ambient_declaration" => {
                for child in named_children(node) {
                    next.push(Pending::Visit {
                        node: child,
                        prefix: prefix.clone(),
                        anchor,
                        nested,
                    });
                }
            }
            _ => {}
        }
        self.schedule(next);
    }

    fn visit_declarator(
        &mut self,
        next: &mut Vec<Pending<'a>>,
        node: Node<'a>,
        prefix: Option<&str>,
        start: usize,
        nested: bool,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let value = node.child_by_field_name("value");
        let function_valued = value.map(is_function_like).unwrap_or(false);
        if name_node.kind() != "identifier" {
            if !nested {
                for ident in pattern_identifiers(name_node) {
                    let name = self.file.node_text(ident).to_string();
                    self.push(prefix, &name, SymbolKind::Variable, start);
                }
            }
            return;
        }
        let name = self.file.node_text(name_node).to_string();
        if function_valued {
            let full = self.push(prefix, &name, SymbolKind::Function, start);
            if let Some(body) = value.and_then(|v| v.child_by_field_name("body")) {
                if body.kind() == "statement_block" {
                    block(next, body, &full);
                }
            }
        } else if value.map(|v| v.kind() == "class").unwrap_or(false) {
            self.push(prefix, &name, SymbolKind::Class, start);
        } else if !nested {
            self.push(prefix, &name, SymbolKind::Variable, start);
        }
    }

    fn visit_member(&mut self, member: Node<'a>, owner: String) {
        let start = member.start_byte();
        let mut next = Vec::new();
        match member.kind() {
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                if let Some(name) = self.name_of(member) {
                    let full = self.push(Some(&owner), &name, SymbolKind::Function, start);
                    if let Some(body) = member.child_by_field_name("body") {
                        block(&mut next, body, &full);
                    }
                }
            }
            "public_field_definition" | "property_signature" => {
                if let Some(name) = self.name_of(member) {
                    let function_valued = member
                        .child_by_field_name("value")
                        .map(is_function_like)
                        .unwrap_or(false);
                    let kind = if function_valued {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Variable
                    };
                    self.push(Some(&owner), &name, kind, start);
                }
            }
            _ => {}
        }
        self.schedule(next);
    }

    fn visit_import(&mut self, node: Node<'_>, prefix: Option<&str>) {
        for clause in named_children(node) {
            if clause.kind() != "import_clause" {
                continue;
            }
            for part in named_children(clause) {
                match part.kind() {
                    "identifier" => {
                        let name = self.file.node_text(part).to_string();
                        self.push(prefix, &name, SymbolKind::Other, part.start_byte());
                    }
                    "namespace_import" => {
                        for ident in named_children(part) {
                            if ident.kind() == "identifier" {
                                let name = self.file.node_text(ident).to_string();
                                self.push(prefix, &name, SymbolKind::Other, ident.start_byte());
                            }
                        }
                    }
                    "named_imports" => {
                        for spec in named_children(part) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let local = spec
                                .child_by_field_name("alias")
                                .or_else(|| spec.child_by_field_name("name"));
                            if let Some(local) = local {
                                let name = self.file.node_text(local).to_string();
                                self.push(prefix, &name, SymbolKind::Other, spec.start_byte());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}


/// Statements of a function or method body, outlined under `owner`.
fn block<'t>(next: &mut Vec<Pending<'t>>, body: Node<'t>, owner: &str) {
    for child in named_children(body) {
        next.push(Pending::Visit {
            node: child,
            prefix: Some(owner.to_string()),
            anchor: None,
            nested: true,
        });
    }
}

fn members<'t>(next: &mut Vec<Pending<'t>>, body: Node<'t>, owner: &str) {
    for member in named_children(body) {
        next.push(Pending::Member {
            node: member,
            owner: owner.to_string(),
        });
    }
}

/// Identifiers bound by a destructuring pattern, in source order.
pub fn pattern_identifiers(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "identifier" | "shorthand_property_identifier_pattern" => out.push(node),
            "pair_pattern" => stack.extend(node.child_by_field_name("value")),
            "object_assignment_pattern" | "assignment_pattern" => {
                stack.extend(node.child_by_field_name("left"))
            }
            "object_pattern" | "array_pattern" | "rest_pattern" => {
                stack.extend(named_children(node).into_iter().rev())
            }
            _ => {}
        }
    }
    out
}
