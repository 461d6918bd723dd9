//! Syntactic, semantic and suggestion diagnostics for one file.

use tree_sitter::Node;

use super::binder::{Binder, DeclKind};
use super::syntax::{children, SourceFile};
use super::Program;
use crate::models::{Diagnostic, Severity};

pub const CODE_DECLARATION_EXPECTED: u32 = 1128;
pub const CODE_TOKEN_EXPECTED: u32 = 1005;
pub const CODE_CANNOT_FIND_MODULE: u32 = 2307;
pub const CODE_NO_EXPORTED_MEMBER: u32 = 2305;
pub const CODE_REDECLARE_BLOCK_SCOPED: u32 = 2451;
pub const CODE_IMPLICIT_ANY: u32 = 7006;
pub const CODE_UNUSED: u32 = 6133;
pub const CODE_REQUIRE_CALL: u32 = 80005;

/// Union of all diagnostic passes for `file`, ordered by position.
pub fn file_diagnostics(program: &Program, binder: &Binder, file: usize) -> Vec<Diagnostic> {
    let source = &program.files()[file];
    let mut out = Vec::new();
    syntactic(source, source.root(), &mut out);
    semantic(program, binder, file, &mut out);
    suggestions(program, binder, file, &mut out);
    out.sort_by(|a, b| (a.line, a.column, a.code).cmp(&(b.line, b.column, b.code)));
    out
}

fn push(out: &mut Vec<Diagnostic>, file: &SourceFile, offset: usize, severity: Severity, code: u32, message: String) {
    let (line, column) = file.position(offset);
    out.push(Diagnostic {
        severity,
        line,
        column,
        message,
        code,
    });
}

fn syntactic(file: &SourceFile, root: Node<'_>, out: &mut Vec<Diagnostic>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            push(
                out,
                file,
                node.start_byte(),
                Severity::Error,
                CODE_DECLARATION_EXPECTED,
                "Declaration or statement expected.".into(),
            );
        } else if node.is_missing() {
            push(
                out,
                file,
                node.start_byte(),
                Severity::Error,
                CODE_TOKEN_EXPECTED,
                format!("'{}' expected.", node.kind()),
            );
        } else if node.has_error() {
            stack.extend(children(node));
        }
    }
}

fn semantic(program: &Program, binder: &Binder, file: usize, out: &mut Vec<Diagnostic>) {
    let source = &program.files()[file];

    for request in binder.module_requests.iter().filter(|r| r.file == file) {
        if !program.resolver().is_local(&request.specifier) {
            continue;
        }
        let Some(target) = program.resolve_path(file, &request.specifier) else {
            push(
                out,
                source,
                request.start,
                Severity::Error,
                CODE_CANNOT_FIND_MODULE,
                format!(
                    "Cannot find module '{}' or its corresponding type declarations.",
                    request.specifier
                ),
            );
            continue;
        };
        let Some(module) = program.file_index(&target) else {
            continue;
        };
        for name in &request.names {
            if binder.exports_name(program, module, &name.name) == Some(false) {
                let message = if name.name == "default" {
                    format!("Module '\"{}\"' has no default export.", request.specifier)
                } else {
                    format!(
                        "Module '\"{}\"' has no exported member '{}'.",
                        request.specifier, name.name
                    )
                };
                push(out, source, name.start, Severity::Error, CODE_NO_EXPORTED_MEMBER, message);
            }
        }
    }

    for id in binder.redeclarations(file) {
        let decl = &binder.decls[id];
        push(
            out,
            source,
            decl.name_start,
            Severity::Error,
            CODE_REDECLARE_BLOCK_SCOPED,
            format!("Cannot redeclare block-scoped variable '{}'.", decl.name),
        );
    }

    let implicit_any = if program.settings().strict {
        Severity::Error
    } else {
        Severity::Warning
    };
    for id in binder.untyped_params.iter().copied() {
        let decl = &binder.decls[id];
        if decl.file != file {
            continue;
        }
        push(
            out,
            source,
            decl.name_start,
            implicit_any,
            CODE_IMPLICIT_ANY,
            format!("Parameter '{}' implicitly has an 'any' type.", decl.name),
        );
    }
}

fn suggestions(program: &Program, binder: &Binder, file: usize, out: &mut Vec<Diagnostic>) {
    let source = &program.files()[file];
    if source.declaration {
        return;
    }
    for id in binder.unused_declarations(file) {
        let decl = &binder.decls[id];
        let message = if decl.kind == DeclKind::Import {
            format!("'{}' is declared but its value is never read.", decl.name)
        } else {
            format!("'{}' is declared but never used.", decl.name)
        };
        push(out, source, decl.name_start, Severity::Hint, CODE_UNUSED, message);
    }
    if source.typed {
        for (f, offset) in binder.require_calls.iter().copied() {
            if f == file {
                push(
                    out,
                    source,
                    offset,
                    Severity::Hint,
                    CODE_REQUIRE_CALL,
                    "'require' call may be converted to an import.".into(),
                );
            }
        }
    }
}
