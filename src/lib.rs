pub mod bytecode;
pub mod checker;
pub mod classfile;
pub mod classpath;
pub mod exclusion;
pub mod graph;
pub mod problem;
pub mod resolve;
pub mod symbols;

#[cfg(test)]
mod test_util;

pub use crate::checker::{CheckerError, CheckerOptions, CheckerWarning, LinkageChecker, LinkageReport};
pub use crate::classpath::{Artifact, ClassFile, ClassPathEntry, ClassPathResult, DependencyPath};
pub use crate::exclusion::{ExclusionFilter, ExclusionRule};
pub use crate::problem::{format_problems, ProblemKind, SymbolProblem};
pub use crate::symbols::Symbol;
