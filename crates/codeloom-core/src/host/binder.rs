//! Scope and symbol binding across the whole compilation unit.
//!
//! The binder walks every file once, recording lexical scopes, the
//! declarations they introduce, and every identifier occurrence. Lexical
//! occurrences are resolved afterwards against the finished scope tree, so
//! hoisted functions and later `var`s resolve the same way they do at
//! runtime. Imports are followed through the exporting module's export
//! table (`export { a as b }`, `export default`, `export ... from`) until a
//! local declaration is reached; that declaration is the symbol's identity.
//!
//! Property names (`obj.m`) are not typed. They resolve by name to every
//! class, interface, enum, or object-literal member with that name, which
//! is why a definition lookup can return several sites.

use std::collections::{HashMap, HashSet};

use tree_sitter::Node;

use super::navigation::pattern_identifiers;
use super::syntax::{has_token, is_function_like, named_children, string_value, SourceFile};
use super::Program;
use crate::models::SymbolKind;

pub type DeclId = usize;
pub type ScopeId = usize;

const MAX_IMPORT_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Class,
    Interface,
    TypeAlias,
    TypeParameter,
    Enum,
    Namespace,
    Const,
    Let,
    Var,
    Parameter,
    CatchParameter,
    Import,
    Method,
    Property,
}

impl DeclKind {
    pub fn symbol_kind(self) -> SymbolKind {
        match self {
            DeclKind::Function | DeclKind::Method => SymbolKind::Function,
            DeclKind::Class => SymbolKind::Class,
            DeclKind::Interface => SymbolKind::Interface,
            DeclKind::TypeAlias | DeclKind::TypeParameter | DeclKind::Enum => SymbolKind::Type,
            DeclKind::Const
            | DeclKind::Let
            | DeclKind::Var
            | DeclKind::Parameter
            | DeclKind::CatchParameter
            | DeclKind::Property => SymbolKind::Variable,
            DeclKind::Namespace | DeclKind::Import => SymbolKind::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeclKind::Function => "function",
            DeclKind::Class => "class",
            DeclKind::Interface => "interface",
            DeclKind::TypeAlias => "type",
            DeclKind::TypeParameter => "type parameter",
            DeclKind::Enum => "enum",
            DeclKind::Namespace => "namespace",
            DeclKind::Const => "const",
            DeclKind::Let => "let",
            DeclKind::Var => "var",
            DeclKind::Parameter | DeclKind::CatchParameter => "parameter",
            DeclKind::Import => "alias",
            DeclKind::Method => "method",
            DeclKind::Property => "property",
        }
    }

    fn is_block_scoped(self) -> bool {
        matches!(self, DeclKind::Const | DeclKind::Let)
    }

    fn is_value(self) -> bool {
        matches!(
            self,
            DeclKind::Function
                | DeclKind::Class
                | DeclKind::Enum
                | DeclKind::Const
                | DeclKind::Let
                | DeclKind::Var
                | DeclKind::Import
        )
    }
}

/// What an import binding refers to in its source module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    Named(String),
    Default,
    Namespace,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub file: usize,
    pub name: String,
    pub kind: DeclKind,
    pub name_start: usize,
    pub name_end: usize,
    pub scope: ScopeId,
    pub exported: bool,
    pub import: Option<(String, ImportTarget)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// Identity a reference resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    Decl(DeclId),
    Member(String),
}

#[derive(Debug, Clone)]
enum Reference {
    Decl(DeclId),
    Lexical { scope: ScopeId, name: String },
    Member(String),
}

/// One identifier site in some file.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub file: usize,
    pub start: usize,
    pub end: usize,
    pub access: Access,
    pub declaration: bool,
    reference: Reference,
    /// Declaration found by lexical lookup, before import following.
    pub local: Option<DeclId>,
    pub key: Option<SymbolKey>,
}

#[derive(Debug, Clone)]
struct Scope {
    parent: Option<ScopeId>,
    function_like: bool,
    names: HashMap<String, Vec<DeclId>>,
}

#[derive(Debug, Clone)]
enum ExportEntry {
    Decl(DeclId),
    Local(String),
    ReExport { specifier: String, name: String },
    Opaque,
}

/// A named binding requested from another module.
#[derive(Debug, Clone)]
pub struct RequestedName {
    pub name: String,
    pub start: usize,
}

/// An `import ... from` or `export ... from` clause.
#[derive(Debug, Clone)]
pub struct ModuleRequest {
    pub file: usize,
    pub specifier: String,
    pub start: usize,
    pub names: Vec<RequestedName>,
}

pub struct Binder {
    pub decls: Vec<Decl>,
    pub occurrences: Vec<Occurrence>,
    pub module_requests: Vec<ModuleRequest>,
    /// Parameters of declared functions and methods with no annotation
    /// and no default value.
    pub untyped_params: Vec<DeclId>,
    /// `(file, offset)` of `require("...")` calls with an unbound `require`.
    pub require_calls: Vec<(usize, usize)>,
    scopes: Vec<Scope>,
    file_scopes: Vec<ScopeId>,
    module_files: Vec<bool>,
    exports: Vec<HashMap<String, ExportEntry>>,
    star_exports: Vec<Vec<String>>,
    members: HashMap<String, Vec<DeclId>>,
    pending_requires: Vec<(usize, usize, ScopeId)>,
}

impl Binder {
    pub fn bind(program: &Program) -> Self {
        let mut binder = Binder {
            decls: Vec::new(),
            occurrences: Vec::new(),
            module_requests: Vec::new(),
            untyped_params: Vec::new(),
            require_calls: Vec::new(),
            scopes: Vec::new(),
            file_scopes: Vec::new(),
            module_files: Vec::new(),
            exports: Vec::new(),
            star_exports: Vec::new(),
            members: HashMap::new(),
            pending_requires: Vec::new(),
        };
        for (idx, file) in program.files().iter().enumerate() {
            binder.exports.push(HashMap::new());
            binder.star_exports.push(Vec::new());
            let scope = binder.new_scope(None, true);
            binder.file_scopes.push(scope);
            let mut walker = FileWalker {
                binder: &mut binder,
                file,
                file_idx: idx,
                stack: vec![scope],
                tasks: Vec::new(),
                is_module: false,
            };
            walker.walk(file.root());
            let is_module = walker.is_module;
            binder.module_files.push(is_module);
        }
        binder.resolve(program);
        binder
    }

    fn new_scope(&mut self, parent: Option<ScopeId>, function_like: bool) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            function_like,
            names: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    fn resolve(&mut self, program: &Program) {
        for i in 0..self.occurrences.len() {
            let (local, key) = match self.occurrences[i].reference.clone() {
                Reference::Decl(d) => (Some(d), Some(self.canonical(program, d, 0))),
                Reference::Lexical { scope, name } => match self.lookup(scope, &name) {
                    Some(d) => (Some(d), Some(self.canonical(program, d, 0))),
                    None => (None, None),
                },
                Reference::Member(name) => {
                    let key = self
                        .members
                        .contains_key(&name)
                        .then(|| SymbolKey::Member(name));
                    (None, key)
                }
            };
            self.occurrences[i].local = local;
            self.occurrences[i].key = key;
        }
        let pending = std::mem::take(&mut self.pending_requires);
        for (file, offset, scope) in pending {
            if self.lookup(scope, "require").is_none() {
                self.require_calls.push((file, offset));
            }
        }
    }

    /// Innermost declaration of `name` visible from `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<DeclId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(ids) = self.scopes[s].names.get(name) {
                if let Some(first) = ids.first() {
                    return Some(*first);
                }
            }
            current = self.scopes[s].parent;
        }
        None
    }

    /// Identity of a declaration: imports are followed to the exporting
    /// declaration, and merged declarations (overloads, interface merging)
    /// collapse to the first one in their scope.
    pub fn canonical(&self, program: &Program, decl: DeclId, depth: usize) -> SymbolKey {
        let d = &self.decls[decl];
        if d.kind == DeclKind::Import && depth < MAX_IMPORT_DEPTH {
            if let Some((specifier, target)) = &d.import {
                let name = match target {
                    ImportTarget::Named(n) => Some(n.as_str()),
                    ImportTarget::Default => Some("default"),
                    ImportTarget::Namespace => None,
                };
                if let (Some(name), Some(module)) = (name, program.resolve_module(d.file, specifier)) {
                    if let Some(target) = self.export_lookup(program, module, name, depth + 1) {
                        return self.canonical(program, target, depth + 1);
                    }
                }
            }
            return SymbolKey::Decl(decl);
        }
        SymbolKey::Decl(self.merge_group(decl)[0])
    }

    /// Declarations sharing a name in one scope (overloads, merged
    /// interfaces), in declaration order.
    fn merge_group(&self, decl: DeclId) -> Vec<DeclId> {
        let d = &self.decls[decl];
        if matches!(d.kind, DeclKind::Method | DeclKind::Property | DeclKind::Import) {
            return vec![decl];
        }
        let group: Vec<DeclId> = self.scopes[d.scope]
            .names
            .get(&d.name)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.decls[*id].kind != DeclKind::Import)
                    .collect()
            })
            .unwrap_or_default();
        if group.is_empty() {
            vec![decl]
        } else {
            group
        }
    }

    fn export_lookup(&self, program: &Program, file: usize, name: &str, depth: usize) -> Option<DeclId> {
        if depth > MAX_IMPORT_DEPTH {
            return None;
        }
        match self.exports[file].get(name) {
            Some(ExportEntry::Decl(d)) => Some(*d),
            Some(ExportEntry::Local(local)) => self.lookup(self.file_scopes[file], local),
            Some(ExportEntry::ReExport { specifier, name }) => {
                let module = program.resolve_module(file, specifier)?;
                self.export_lookup(program, module, name, depth + 1)
            }
            Some(ExportEntry::Opaque) => None,
            None if name != "default" => self.star_exports[file].iter().find_map(|specifier| {
                let module = program.resolve_module(file, specifier)?;
                self.export_lookup(program, module, name, depth + 1)
            }),
            None => None,
        }
    }

    /// Whether `file` exports `name`. `None` when a star re-export points
    /// outside the compilation unit and the answer is unknowable.
    pub fn exports_name(&self, program: &Program, file: usize, name: &str) -> Option<bool> {
        self.exports_name_inner(program, file, name, 0)
    }

    fn exports_name_inner(&self, program: &Program, file: usize, name: &str, depth: usize) -> Option<bool> {
        if depth > MAX_IMPORT_DEPTH {
            return None;
        }
        if self.exports[file].contains_key(name) {
            return Some(true);
        }
        if name == "default" {
            return Some(false);
        }
        let mut unknown = false;
        for specifier in &self.star_exports[file] {
            match program.resolve_module(file, specifier) {
                Some(module) => match self.exports_name_inner(program, module, name, depth + 1) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => unknown = true,
                },
                None => unknown = true,
            }
        }
        if unknown {
            None
        } else {
            Some(false)
        }
    }

    /// All definition sites for a symbol.
    pub fn definitions(&self, key: &SymbolKey) -> Vec<DeclId> {
        match key {
            SymbolKey::Decl(d) => self.merge_group(*d),
            SymbolKey::Member(name) => self.members.get(name).cloned().unwrap_or_default(),
        }
    }

    /// Occurrence covering `offset` in `file`, preferring an exact hit over
    /// one that merely ends at the offset.
    pub fn occurrence_at(&self, file: usize, offset: usize) -> Option<&Occurrence> {
        let hit = |inclusive: bool| {
            self.occurrences.iter().find(|o| {
                o.file == file && o.start <= offset && (offset < o.end || (inclusive && offset == o.end))
            })
        };
        hit(false).or_else(|| hit(true))
    }

    /// Every occurrence of a symbol, ordered by file then position.
    pub fn references(&self, key: &SymbolKey) -> Vec<&Occurrence> {
        let mut refs: Vec<&Occurrence> = self
            .occurrences
            .iter()
            .filter(|o| o.key.as_ref() == Some(key))
            .collect();
        refs.sort_by_key(|o| (o.file, o.start));
        refs.dedup_by_key(|o| (o.file, o.start));
        refs
    }

    /// Groups of block-scoped redeclarations in `file`.
    pub fn redeclarations(&self, file: usize) -> Vec<DeclId> {
        let mut out = Vec::new();
        for scope in &self.scopes {
            for ids in scope.names.values() {
                let in_file: Vec<DeclId> = ids
                    .iter()
                    .copied()
                    .filter(|id| self.decls[*id].file == file)
                    .collect();
                let values = in_file.iter().filter(|id| self.decls[**id].kind.is_value()).count();
                let block_scoped = in_file
                    .iter()
                    .any(|id| self.decls[*id].kind.is_block_scoped());
                if values >= 2 && block_scoped {
                    out.extend(
                        in_file
                            .iter()
                            .copied()
                            .filter(|id| self.decls[*id].kind.is_value()),
                    );
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Imports and locals in `file` whose value is never read.
    pub fn unused_declarations(&self, file: usize) -> Vec<DeclId> {
        let mut read_locals: HashSet<DeclId> = HashSet::new();
        let mut read_keys: HashSet<&SymbolKey> = HashSet::new();
        for o in &self.occurrences {
            if o.declaration || o.access != Access::Read {
                continue;
            }
            if let Some(local) = o.local {
                read_locals.insert(local);
            }
            if let Some(key) = &o.key {
                read_keys.insert(key);
            }
        }
        let is_module = self.module_files.get(file).copied().unwrap_or(false);
        self.decls
            .iter()
            .enumerate()
            .filter(|(_, d)| d.file == file && !d.exported && !d.name.starts_with('_'))
            .filter(|(_, d)| {
                matches!(
                    d.kind,
                    DeclKind::Import
                        | DeclKind::Const
                        | DeclKind::Let
                        | DeclKind::Var
                        | DeclKind::Function
                        | DeclKind::Class
                )
            })
            .filter(|(_, d)| is_module || d.scope != self.file_scopes[file])
            .filter(|(id, d)| {
                if read_locals.contains(id) {
                    return false;
                }
                if d.kind == DeclKind::Import {
                    return true;
                }
                let group = self.merge_group(*id);
                let rep = SymbolKey::Decl(group[0]);
                !group.iter().any(|g| read_locals.contains(g)) && !read_keys.contains(&rep)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Pending work for one file walk.
///
/// The walk runs off an explicit stack rather than native recursion, so a
/// deeply nested expression costs heap, not call stack. Each handler does
/// its immediate work and then schedules the rest, in source order, with
/// one [`FileWalker::schedule`] call.
enum Task<'t> {
    Visit { node: Node<'t>, exported: bool },
    Parameter { node: Node<'t>, declared: bool },
    Member(Node<'t>),
    DeclarePattern { node: Node<'t>, kind: DeclKind, exported: bool },
    PatternDefaults(Node<'t>),
    Assign { node: Node<'t>, access: Access },
    PushScope { function_like: bool },
    PopScope,
    /// Record top-level `export <declaration>` names declared since `first`.
    ExportDecls { first: DeclId },
}

/// Ordered follow-up tasks built by one handler.
struct Steps<'t>(Vec<Task<'t>>);

impl<'t> Steps<'t> {
    fn new() -> Self {
        Steps(Vec::new())
    }

    fn push(&mut self, task: Task<'t>) {
        self.0.push(task);
    }

    fn visit(&mut self, node: Node<'t>) {
        self.0.push(Task::Visit { node, exported: false });
    }

    fn field(&mut self, node: Node<'t>, field: &str) {
        if let Some(child) = node.child_by_field_name(field) {
            self.visit(child);
        }
    }

    fn children(&mut self, node: Node<'t>) {
        for child in named_children(node) {
            self.visit(child);
        }
    }

    fn enter(&mut self, function_like: bool) {
        self.0.push(Task::PushScope { function_like });
    }

    fn leave(&mut self) {
        self.0.push(Task::PopScope);
    }

    /// Type parameters, parameters and return type of a function-like node.
    fn signature(&mut self, node: Node<'t>, declared: bool) {
        self.field(node, "type_parameters");
        if let Some(params) = node.child_by_field_name("parameters") {
            for param in named_children(params) {
                self.0.push(Task::Parameter { node: param, declared });
            }
        }
        self.field(node, "return_type");
    }

    fn function(&mut self, node: Node<'t>, declared: bool) {
        self.enter(true);
        self.signature(node, declared);
        self.field(node, "body");
        self.leave();
    }

    fn class(&mut self, node: Node<'t>) {
        self.enter(false);
        self.field(node, "type_parameters");
        for child in named_children(node) {
            if child.kind() == "class_heritage" {
                self.visit(child);
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.members(body);
        }
        self.leave();
    }

    fn members(&mut self, body: Node<'t>) {
        for member in named_children(body) {
            self.0.push(Task::Member(member));
        }
    }
}

struct FileWalker<'a> {
    binder: &'a mut Binder,
    file: &'a SourceFile,
    file_idx: usize,
    stack: Vec<ScopeId>,
    tasks: Vec<Task<'a>>,
    is_module: bool,
}

impl<'a> FileWalker<'a> {
    fn walk(&mut self, root: Node<'a>) {
        let mut steps = Steps::new();
        steps.children(root);
        self.schedule(steps);
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Visit { node, exported } => self.visit_decl(node, exported),
                Task::Parameter { node, declared } => self.bind_parameter(node, declared),
                Task::Member(node) => self.bind_member(node),
                Task::DeclarePattern { node, kind, exported } => self.declare_pattern(node, kind, exported),
                Task::PatternDefaults(node) => self.visit_pattern_defaults(node),
                Task::Assign { node, access } => self.assign_target(node, access),
                Task::PushScope { function_like } => self.push_scope(function_like),
                Task::PopScope => self.pop_scope(),
                Task::ExportDecls { first } => self.export_decls(first),
            }
        }
    }

    /// Queue `steps` so they run next, first step first.
    fn schedule(&mut self, steps: Steps<'a>) {
        self.tasks.extend(steps.0.into_iter().rev());
    }

    fn scope(&self) -> ScopeId {
        self.stack.last().copied().unwrap_or(self.binder.file_scopes[self.file_idx])
    }

    fn function_scope(&self) -> ScopeId {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|s| self.binder.scopes[*s].function_like)
            .unwrap_or(self.binder.file_scopes[self.file_idx])
    }

    fn push_scope(&mut self, function_like: bool) {
        let parent = self.scope();
        let id = self.binder.new_scope(Some(parent), function_like);
        self.stack.push(id);
    }

    fn pop_scope(&mut self) {
        self.stack.pop();
    }

    fn text(&self, node: Node<'_>) -> String {
        self.file.node_text(node).to_string()
    }

    fn declare_in(&mut self, scope: ScopeId, name_node: Node<'_>, kind: DeclKind, exported: bool) -> DeclId {
        let name = self.text(name_node);
        let id = self.binder.decls.len();
        self.binder.decls.push(Decl {
            file: self.file_idx,
            name: name.clone(),
            kind,
            name_start: name_node.start_byte(),
            name_end: name_node.end_byte(),
            scope,
            exported,
            import: None,
        });
        self.binder.scopes[scope].names.entry(name).or_default().push(id);
        self.binder.occurrences.push(Occurrence {
            file: self.file_idx,
            start: name_node.start_byte(),
            end: name_node.end_byte(),
            access: Access::Write,
            declaration: true,
            reference: Reference::Decl(id),
            local: None,
            key: None,
        });
        id
    }

    fn declare(&mut self, name_node: Node<'_>, kind: DeclKind, exported: bool) -> DeclId {
        let scope = match kind {
            DeclKind::Var => self.function_scope(),
            _ => self.scope(),
        };
        self.declare_in(scope, name_node, kind, exported)
    }

    fn declare_member(&mut self, name_node: Node<'_>, kind: DeclKind) {
        let name = self.text(name_node);
        let id = self.binder.decls.len();
        let scope = self.scope();
        self.binder.decls.push(Decl {
            file: self.file_idx,
            name: name.clone(),
            kind,
            name_start: name_node.start_byte(),
            name_end: name_node.end_byte(),
            scope,
            exported: false,
            import: None,
        });
        self.binder.members.entry(name.clone()).or_default().push(id);
        self.binder.occurrences.push(Occurrence {
            file: self.file_idx,
            start: name_node.start_byte(),
            end: name_node.end_byte(),
            access: Access::Write,
            declaration: true,
            reference: Reference::Member(name),
            local: None,
            key: None,
        });
    }

    fn reference(&mut self, node: Node<'_>, access: Access) {
        let name = self.text(node);
        let scope = self.scope();
        self.binder.occurrences.push(Occurrence {
            file: self.file_idx,
            start: node.start_byte(),
            end: node.end_byte(),
            access,
            declaration: false,
            reference: Reference::Lexical { scope, name },
            local: None,
            key: None,
        });
    }

    fn member_reference(&mut self, node: Node<'_>, access: Access) {
        let name = self.text(node);
        self.binder.occurrences.push(Occurrence {
            file: self.file_idx,
            start: node.start_byte(),
            end: node.end_byte(),
            access,
            declaration: false,
            reference: Reference::Member(name),
            local: None,
            key: None,
        });
    }

    fn is_top_level(&self) -> bool {
        self.stack.len() == 1
    }

    fn visit_decl(&mut self, node: Node<'a>, exported: bool) {
        let mut steps = Steps::new();
        match node.kind() {
            "import_statement" => {
                self.is_module = self.is_module || self.is_top_level();
                self.bind_import(node);
            }
            "export_statement" => {
                self.is_module = self.is_module || self.is_top_level();
                self.bind_export(node, &mut steps);
            }
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let id = self.declare(name, DeclKind::Function, exported);
                    self.note_default(node, id);
                }
                steps.function(node, true);
            }
            "class_declaration" | "abstract_class_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let id = self.declare(name, DeclKind::Class, exported);
                    self.note_default(node, id);
                }
                steps.class(node);
            }
            "class" => {
                self.push_scope(false);
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::Class, false);
                }
                steps.class(node);
                steps.leave();
            }
            "interface_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::Interface, exported);
                }
                steps.enter(false);
                steps.field(node, "type_parameters");
                for child in named_children(node) {
                    if child.kind() == "extends_type_clause" {
                        steps.visit(child);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    steps.members(body);
                }
                steps.leave();
            }
            "type_alias_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::TypeAlias, exported);
                }
                steps.enter(false);
                steps.field(node, "type_parameters");
                steps.field(node, "value");
                steps.leave();
            }
            "enum_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::Enum, exported);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    for member in named_children(body) {
                        match member.kind() {
                            "property_identifier" => self.declare_member(member, DeclKind::Property),
                            "enum_assignment" => {
                                if let Some(name) = member.child_by_field_name("name") {
                                    self.declare_member(name, DeclKind::Property);
                                }
                                steps.field(member, "value");
                            }
                            _ => {}
                        }
                    }
                }
            }
            "internal_module" | "module" => {
                if let Some(name) = node.child_by_field_name("name") {
                    if name.kind() == "identifier" {
                        self.declare(name, DeclKind::Namespace, exported);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    steps.enter(true);
                    steps.children(body);
                    steps.leave();
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                let kind = if node.kind() == "variable_declaration" {
                    DeclKind::Var
                } else if has_token(node, "const") {
                    DeclKind::Const
                } else {
                    DeclKind::Let
                };
                for declarator in named_children(node) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    if let Some(name) = declarator.child_by_field_name("name") {
                        steps.push(Task::DeclarePattern {
                            node: name,
                            kind,
                            exported,
                        });
                    }
                    steps.field(declarator, "type");
                    steps.field(declarator, "value");
                }
            }
            "arrow_function" | "function_expression" | "function" | "generator_function" => {
                self.push_scope(true);
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::Function, false);
                }
                if let Some(param) = node.child_by_field_name("parameter") {
                    self.declare(param, DeclKind::Parameter, false);
                }
                steps.signature(node, false);
                steps.field(node, "body");
                steps.leave();
            }
            "statement_block" | "for_statement" => {
                self.push_scope(false);
                steps.children(node);
                steps.leave();
            }
            "for_in_statement" => {
                self.push_scope(false);
                if let Some(left) = node.child_by_field_name("left") {
                    let kind = if has_token(node, "const") {
                        Some(DeclKind::Const)
                    } else if has_token(node, "let") {
                        Some(DeclKind::Let)
                    } else if has_token(node, "var") {
                        Some(DeclKind::Var)
                    } else {
                        None
                    };
                    steps.push(match kind {
                        Some(kind) => Task::DeclarePattern {
                            node: left,
                            kind,
                            exported: false,
                        },
                        None => Task::Assign {
                            node: left,
                            access: Access::Write,
                        },
                    });
                }
                steps.field(node, "right");
                steps.field(node, "body");
                steps.leave();
            }
            "catch_clause" => {
                self.push_scope(false);
                if let Some(param) = node.child_by_field_name("parameter") {
                    steps.push(Task::DeclarePattern {
                        node: param,
                        kind: DeclKind::CatchParameter,
                        exported: false,
                    });
                }
                steps.field(node, "body");
                steps.leave();
            }
            "assignment_expression" | "augmented_assignment_expression" => {
                if let Some(left) = node.child_by_field_name("left") {
                    steps.push(Task::Assign {
                        node: left,
                        access: Access::Write,
                    });
                }
                steps.field(node, "right");
            }
            "update_expression" => {
                if let Some(arg) = node.child_by_field_name("argument") {
                    steps.push(Task::Assign {
                        node: arg,
                        access: Access::Write,
                    });
                }
            }
            "member_expression" => {
                steps.field(node, "object");
                if let Some(prop) = node.child_by_field_name("property") {
                    if matches!(prop.kind(), "property_identifier" | "private_property_identifier") {
                        self.member_reference(prop, Access::Read);
                    }
                }
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    if function.kind() == "identifier" && self.file.node_text(function) == "require" {
                        let string_arg = node
                            .child_by_field_name("arguments")
                            .and_then(|args| named_children(args).into_iter().next())
                            .map(|a| a.kind() == "string")
                            .unwrap_or(false);
                        if string_arg {
                            let scope = self.scope();
                            self.binder
                                .pending_requires
                                .push((self.file_idx, node.start_byte(), scope));
                        }
                    }
                }
                steps.children(node);
            }
            "object" => {
                for child in named_children(node) {
                    match child.kind() {
                        "pair" => {
                            if let Some(key) = child.child_by_field_name("key") {
                                if key.kind() == "property_identifier" {
                                    self.declare_member(key, DeclKind::Property);
                                } else {
                                    steps.visit(key);
                                }
                            }
                            steps.field(child, "value");
                        }
                        "method_definition" => steps.push(Task::Member(child)),
                        _ => steps.visit(child),
                    }
                }
            }
            "nested_type_identifier" | "nested_identifier" => {
                if let Some(first) = named_children(node).into_iter().next() {
                    steps.visit(first);
                }
            }
            "identifier" | "type_identifier" | "shorthand_property_identifier" => {
                self.reference(node, Access::Read);
            }
            "type_parameter" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, DeclKind::TypeParameter, false);
                }
                steps.field(node, "constraint");
                steps.field(node, "value");
            }
            "function_type" | "constructor_type" | "call_signature" | "construct_signature" => {
                self.push_scope(true);
                steps.signature(node, false);
                steps.leave();
            }
            "property_identifier" | "private_property_identifier" | "statement_identifier"
            | "string" | "comment" | "regex" | "number" => {}
            _ => steps.children(node),
        }
        self.schedule(steps);
    }

    /// Registers `export default function f() {}` under `default`.
    fn note_default(&mut self, node: Node<'_>, id: DeclId) {
        if let Some(parent) = node.parent() {
            if parent.kind() == "export_statement" && has_token(parent, "default") {
                self.binder.exports[self.file_idx].insert("default".into(), ExportEntry::Decl(id));
            }
        }
    }

    fn bind_parameter(&mut self, param: Node<'a>, declared: bool) {
        let mut steps = Steps::new();
        match param.kind() {
            "required_parameter" | "optional_parameter" => {
                let annotated = param.child_by_field_name("type").is_some();
                let defaulted = param.child_by_field_name("value").is_some();
                if let Some(pattern) = param.child_by_field_name("pattern") {
                    if pattern.kind() == "identifier" {
                        let id = self.declare(pattern, DeclKind::Parameter, false);
                        if declared && !annotated && !defaulted && self.file.typed && !self.file.declaration {
                            self.binder.untyped_params.push(id);
                        }
                    } else {
                        steps.push(Task::DeclarePattern {
                            node: pattern,
                            kind: DeclKind::Parameter,
                            exported: false,
                        });
                    }
                }
                steps.field(param, "type");
                steps.field(param, "value");
            }
            "identifier" => {
                self.declare(param, DeclKind::Parameter, false);
            }
            _ => steps.visit(param),
        }
        self.schedule(steps);
    }

    /// One member of a class, interface or object literal body.
    fn bind_member(&mut self, member: Node<'a>) {
        let mut steps = Steps::new();
        match member.kind() {
            "method_definition" => {
                if let Some(name) = member.child_by_field_name("name") {
                    if matches!(name.kind(), "property_identifier" | "private_property_identifier") {
                        self.declare_member(name, DeclKind::Method);
                    }
                }
                let setter = has_token(member, "set");
                steps.function(member, !setter);
            }
            "method_signature" | "abstract_method_signature" => {
                if let Some(name) = member.child_by_field_name("name") {
                    if matches!(name.kind(), "property_identifier" | "private_property_identifier") {
                        self.declare_member(name, DeclKind::Method);
                    }
                }
                steps.enter(true);
                steps.signature(member, false);
                steps.leave();
            }
            "public_field_definition" | "property_signature" => {
                if let Some(name) = member.child_by_field_name("name") {
                    if matches!(name.kind(), "property_identifier" | "private_property_identifier") {
                        let kind = match member.child_by_field_name("value") {
                            Some(v) if is_function_like(v) => DeclKind::Method,
                            _ => DeclKind::Property,
                        };
                        self.declare_member(name, kind);
                    }
                }
                steps.field(member, "type");
                steps.field(member, "value");
            }
            _ => steps.visit(member),
        }
        self.schedule(steps);
    }

    fn declare_pattern(&mut self, pattern: Node<'a>, kind: DeclKind, exported: bool) {
        for ident in pattern_identifiers(pattern) {
            self.declare(ident, kind, exported);
        }
        let mut steps = Steps::new();
        steps.push(Task::PatternDefaults(pattern));
        self.schedule(steps);
    }

    /// Default-value expressions and computed keys inside a pattern.
    fn visit_pattern_defaults(&mut self, pattern: Node<'a>) {
        let mut steps = Steps::new();
        match pattern.kind() {
            "object_assignment_pattern" | "assignment_pattern" => {
                if let Some(left) = pattern.child_by_field_name("left") {
                    steps.push(Task::PatternDefaults(left));
                }
                steps.field(pattern, "right");
            }
            "pair_pattern" => {
                if let Some(value) = pattern.child_by_field_name("value") {
                    steps.push(Task::PatternDefaults(value));
                }
            }
            "object_pattern" | "array_pattern" | "rest_pattern" => {
                for child in named_children(pattern) {
                    steps.push(Task::PatternDefaults(child));
                }
            }
            _ => {}
        }
        self.schedule(steps);
    }

    fn assign_target(&mut self, target: Node<'a>, access: Access) {
        let mut steps = Steps::new();
        match target.kind() {
            "identifier" => self.reference(target, access),
            "member_expression" => {
                steps.field(target, "object");
                if let Some(prop) = target.child_by_field_name("property") {
                    if matches!(prop.kind(), "property_identifier" | "private_property_identifier") {
                        self.member_reference(prop, access);
                    }
                }
            }
            "parenthesized_expression" => {
                for child in named_children(target) {
                    steps.push(Task::Assign { node: child, access });
                }
            }
            "object_pattern" | "array_pattern" => {
                for ident in pattern_identifiers(target) {
                    self.reference(ident, access);
                }
                steps.push(Task::PatternDefaults(target));
            }
            _ => steps.visit(target),
        }
        self.schedule(steps);
    }

    fn export_decls(&mut self, first: DeclId) {
        let exported: Vec<(String, DeclId)> = self.binder.decls[first..]
            .iter()
            .enumerate()
            .filter(|(_, d)| d.exported)
            .map(|(i, d)| (d.name.clone(), first + i))
            .collect();
        for (name, id) in exported {
            self.binder.exports[self.file_idx].entry(name).or_insert(ExportEntry::Decl(id));
        }
    }

    fn bind_import(&mut self, node: Node<'_>) {
        let Some(source) = node.child_by_field_name("source") else {
            // `import x = require("y")`
            for child in named_children(node) {
                if child.kind() == "import_require_clause" {
                    let ident = named_children(child).into_iter().find(|c| c.kind() == "identifier");
                    let spec = child.child_by_field_name("source");
                    if let (Some(ident), Some(spec)) = (ident, spec) {
                        let specifier = string_value(self.file, spec);
                        let id = self.declare(ident, DeclKind::Import, false);
                        self.binder.decls[id].import = Some((specifier, ImportTarget::Namespace));
                    }
                }
            }
            return;
        };
        let specifier = string_value(self.file, source);
        let mut request = ModuleRequest {
            file: self.file_idx,
            specifier: specifier.clone(),
            start: source.start_byte(),
            names: Vec::new(),
        };
        for clause in named_children(node) {
            if clause.kind() != "import_clause" {
                continue;
            }
            for part in named_children(clause) {
                match part.kind() {
                    "identifier" => {
                        let id = self.declare(part, DeclKind::Import, false);
                        self.binder.decls[id].import = Some((specifier.clone(), ImportTarget::Default));
                        request.names.push(RequestedName {
                            name: "default".into(),
                            start: part.start_byte(),
                        });
                    }
                    "namespace_import" => {
                        if let Some(ident) = named_children(part).into_iter().find(|c| c.kind() == "identifier") {
                            let id = self.declare(ident, DeclKind::Import, false);
                            self.binder.decls[id].import = Some((specifier.clone(), ImportTarget::Namespace));
                        }
                    }
                    "named_imports" => {
                        for spec in named_children(part) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let Some(name) = spec.child_by_field_name("name") else {
                                continue;
                            };
                            let imported = string_value(self.file, name);
                            let local = spec.child_by_field_name("alias").unwrap_or(name);
                            let id = self.declare(local, DeclKind::Import, false);
                            self.binder.decls[id].import =
                                Some((specifier.clone(), ImportTarget::Named(imported.clone())));
                            request.names.push(RequestedName {
                                name: imported,
                                start: name.start_byte(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        self.binder.module_requests.push(request);
    }

    fn bind_export(&mut self, node: Node<'a>, steps: &mut Steps<'a>) {
        let file_idx = self.file_idx;
        let default = has_token(node, "default");
        if let Some(decl) = node.child_by_field_name("declaration") {
            steps.push(Task::Visit {
                node: decl,
                exported: true,
            });
            if self.is_top_level() && !default {
                steps.push(Task::ExportDecls {
                    first: self.binder.decls.len(),
                });
            }
            return;
        }
        if default {
            if let Some(value) = node.child_by_field_name("value") {
                if value.kind() == "identifier" {
                    let name = self.text(value);
                    self.reference(value, Access::Read);
                    self.binder.exports[file_idx].insert("default".into(), ExportEntry::Local(name));
                } else {
                    steps.visit(value);
                    self.binder.exports[file_idx].insert("default".into(), ExportEntry::Opaque);
                }
            }
            return;
        }
        let source = node
            .child_by_field_name("source")
            .map(|s| (string_value(self.file, s), s.start_byte()));
        let mut request = source.as_ref().map(|(specifier, start)| ModuleRequest {
            file: file_idx,
            specifier: specifier.clone(),
            start: *start,
            names: Vec::new(),
        });
        let mut saw_clause = false;
        for child in named_children(node) {
            match child.kind() {
                "export_clause" => {
                    saw_clause = true;
                    for spec in named_children(child) {
                        if spec.kind() != "export_specifier" {
                            continue;
                        }
                        let Some(name) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        let local = string_value(self.file, name);
                        let exported = spec
                            .child_by_field_name("alias")
                            .map(|a| string_value(self.file, a))
                            .unwrap_or_else(|| local.clone());
                        let entry = match &source {
                            Some((specifier, _)) => {
                                if let Some(req) = request.as_mut() {
                                    req.names.push(RequestedName {
                                        name: local.clone(),
                                        start: name.start_byte(),
                                    });
                                }
                                ExportEntry::ReExport {
                                    specifier: specifier.clone(),
                                    name: local,
                                }
                            }
                            None => {
                                self.reference(name, Access::Read);
                                ExportEntry::Local(local)
                            }
                        };
                        self.binder.exports[file_idx].insert(exported, entry);
                    }
                }
                "namespace_export" => {
                    saw_clause = true;
                    if let Some(ident) = named_children(child).into_iter().next() {
                        let name = string_value(self.file, ident);
                        self.binder.exports[file_idx].insert(name, ExportEntry::Opaque);
                    }
                }
                _ => {}
            }
        }
        if !saw_clause {
            if let Some((specifier, _)) = &source {
                self.binder.star_exports[file_idx].push(specifier.clone());
            }
        }
        if let Some(req) = request {
            self.binder.module_requests.push(req);
        }
    }
}
