use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};
use std::sync::Arc;

use itertools::Itertools;

use crate::classpath::{ClassFile, ClassPathEntry, ClassPathResult};
use crate::symbols::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Private,
    Protected,
    Package
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Package => "package-private"
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessElement {
    Class,
    Member
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IncompatibleChange {
    ExpectedInterface,
    ExpectedClass,
    ExpectedStatic,
    ExpectedInstance,
    FinalSuperclass
}

impl fmt::Display for IncompatibleChange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            IncompatibleChange::ExpectedInterface => "expected an interface",
            IncompatibleChange::ExpectedClass => "expected a class, found an interface",
            IncompatibleChange::ExpectedStatic => "expected a static member",
            IncompatibleChange::ExpectedInstance => "expected an instance member",
            IncompatibleChange::FinalSuperclass => "cannot inherit from final class"
        })
    }
}

/// Why a symbol failed to resolve. Every kind except `ClassNotFound` names the class file in which the symbol was
/// expected to be found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProblemKind {
    ClassNotFound,
    MethodNotFound { target: ClassFile, return_type_mismatch: bool },
    FieldNotFound { target: ClassFile },
    AccessDenied { target: ClassFile, element: AccessElement, visibility: Visibility },
    IncompatibleClassChange { target: ClassFile, change: IncompatibleChange }
}

impl ProblemKind {
    pub fn target(&self) -> Option<&ClassFile> {
        match *self {
            ProblemKind::ClassNotFound => None,
            ProblemKind::MethodNotFound { ref target, .. } => Some(target),
            ProblemKind::FieldNotFound { ref target } => Some(target),
            ProblemKind::AccessDenied { ref target, .. } => Some(target),
            ProblemKind::IncompatibleClassChange { ref target, .. } => Some(target)
        }
    }

    pub fn is_not_found(&self) -> bool {
        match *self {
            ProblemKind::ClassNotFound | ProblemKind::MethodNotFound { .. } | ProblemKind::FieldNotFound { .. } => true,
            _ => false
        }
    }

    pub fn message(&self) -> String {
        match *self {
            ProblemKind::ClassNotFound | ProblemKind::FieldNotFound { .. } => "is not found".to_owned(),
            ProblemKind::MethodNotFound { return_type_mismatch: false, .. } => "is not found".to_owned(),
            ProblemKind::MethodNotFound { return_type_mismatch: true, .. } => "is not found (return type does not match)".to_owned(),
            ProblemKind::AccessDenied { element: AccessElement::Class, visibility, .. } => {
                format!("is not accessible ({} class)", visibility)
            },
            ProblemKind::AccessDenied { element: AccessElement::Member, visibility, .. } => {
                format!("is not accessible ({} member)", visibility)
            },
            ProblemKind::IncompatibleClassChange { change, .. } => format!("has changed incompatibly ({})", change)
        }
    }
}

/// One failing symbol together with every class file whose bytecode references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolProblem {
    pub symbol: Symbol,
    pub kind: ProblemKind,
    pub sources: BTreeSet<ClassFile>
}

impl SymbolProblem {
    pub fn target(&self) -> Option<&ClassFile> {
        self.kind.target()
    }

    pub fn first_source(&self) -> Option<&ClassFile> {
        self.sources.iter().next()
    }

    pub fn sort_key(&self) -> (Option<Arc<str>>, String, ProblemKind) {
        (self.first_source().map(|s| s.class_name.clone()), self.symbol.to_string(), self.kind.clone())
    }
}

impl fmt::Display for SymbolProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(target) = self.target() {
            write!(f, "({}) ", target.entry)?;
        };

        write!(f, "{} {}", self.symbol, self.kind.message())
    }
}

/// A class file that could not be parsed. It contributes no symbols, neither as a source nor as a target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InvalidClassFileProblem {
    pub file: ClassFile,
    pub reason: String
}

impl fmt::Display for InvalidClassFileProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a valid class file: {}", self.file, self.reason)
    }
}

/// A classpath entry that could not be opened or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvableArtifactProblem {
    pub entry: Arc<ClassPathEntry>,
    pub reason: String
}

impl fmt::Display for UnresolvableArtifactProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} could not be read: {}", self.entry, self.reason)
    }
}

/// Renders problems grouped by symbol. When dependency paths are given, the report ends with the paths that
/// brought each involved entry onto the classpath.
pub fn format_problems(problems: &[SymbolProblem], paths: Option<&ClassPathResult>) -> String {
    let mut out = String::new();
    let mut by_symbol: BTreeMap<&Symbol, Vec<&SymbolProblem>> = BTreeMap::new();

    for p in problems.iter() {
        by_symbol.entry(&p.symbol).or_insert_with(Vec::new).push(p);
    };

    for (_, group) in by_symbol.iter() {
        for p in group.iter() {
            let sources: Vec<_> = p.sources.iter().collect();

            let _ = writeln!(out, "{};", p);
            let _ = writeln!(
                out,
                "  referenced by {} class file{}",
                sources.len(),
                if sources.len() == 1 { "" } else { "s" }
            );

            for s in sources {
                let _ = writeln!(out, "    {} ({})", s.java_name(), s.entry);
            };
        };
    };

    if let Some(paths) = paths {
        let entries: BTreeSet<_> = problems.iter()
            .flat_map(|p| p.target().map(|t| &t.entry).into_iter().chain(p.sources.iter().map(|s| &s.entry)))
            .filter(|e| e.artifact.is_some())
            .collect();

        let entries: Vec<_> = entries.into_iter().filter(|e| !paths.paths_to(e).is_empty()).collect();

        if !entries.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Problematic artifacts in the dependency tree:");

            for e in entries {
                let _ = writeln!(out, "{} is at:", e);
                let _ = writeln!(out, "{}", paths.paths_to(e).iter().map(|p| format!("  {}", p)).join("\n"));
            };
        };
    };

    out
}
