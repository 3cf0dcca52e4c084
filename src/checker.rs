use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classpath::{ClassFile, ClassPathEntry, ClassPathIndex, ClassPathResult, IndexedClass};
use crate::exclusion::{ExclusionFileError, ExclusionFilter};
use crate::graph::{ClassReferenceGraph, EdgeList};
use crate::problem::{InvalidClassFileProblem, ProblemKind, SymbolProblem, UnresolvableArtifactProblem};
use crate::resolve::{ClassTable, LoadedClass, SymbolResolver, SystemClasses, Unresolved};
use crate::symbols::{self, element_class_name, java_name, Symbol};

#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// Only report problems whose source class is reachable from the entry points.
    pub reachable_only: bool,
    pub exclusion_file: Option<PathBuf>,
    /// Size of the worker pool. `None` leaves the choice to rayon.
    pub threads: Option<usize>,
    pub system_classes: SystemClasses,
    pub builtin_suppressions: bool
}

impl Default for CheckerOptions {
    fn default() -> CheckerOptions {
        CheckerOptions {
            reachable_only: false,
            exclusion_file: None,
            threads: None,
            system_classes: SystemClasses::default(),
            builtin_suppressions: true
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("invalid exclusion file: {0}")]
    Exclusion(#[from] ExclusionFileError),
    #[error("entry point {0} is not on the classpath")]
    UnknownEntryPoint(String),
    #[error("failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerWarning {
    EmptyClassPath,
    NoEntryPoints
}

impl fmt::Display for CheckerWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            CheckerWarning::EmptyClassPath => "the classpath contains no classes",
            CheckerWarning::NoEntryPoints => "no entry points were given"
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub index: Duration,
    pub parse: Duration,
    pub resolve: Duration,
    pub graph: Duration
}

#[derive(Debug, Clone)]
pub struct LinkageReport {
    pub problems: Vec<SymbolProblem>,
    pub invalid_class_files: Vec<InvalidClassFileProblem>,
    pub unresolvable_entries: Vec<UnresolvableArtifactProblem>,
    pub duplicate_classes: Vec<(Arc<str>, Vec<Arc<ClassPathEntry>>)>,
    pub warnings: Vec<CheckerWarning>
}

impl LinkageReport {
    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// A failed reference before filtering, tied to the class whose bytecode makes it.
#[derive(Debug, Clone)]
struct ProblemSeed {
    unresolved: Unresolved,
    source: ClassFile
}

fn parse_class(class: &IndexedClass) -> Result<Arc<LoadedClass>, InvalidClassFileProblem> {
    let symbols = symbols::parse(&class.bytes).map_err(|err| InvalidClassFileProblem {
        file: class.file.clone(),
        reason: err.to_string()
    })?;

    if symbols.name != class.file.class_name {
        return Result::Err(InvalidClassFileProblem {
            file: class.file.clone(),
            reason: format!("file declares class {}", java_name(&symbols.name))
        });
    };

    Result::Ok(Arc::new(LoadedClass::new(class.file.clone(), symbols)))
}

fn check_class(
    resolver: &SymbolResolver,
    index: &ClassPathIndex,
    class: &LoadedClass,
    seeds: &mut Vec<ProblemSeed>,
    edges: &mut EdgeList
) {
    for reference in class.symbols.references.iter() {
        // Arrays of primitives always link
        let target = match element_class_name(reference.symbol.class_name()) {
            Some(target) => target,
            None => continue
        };

        edges.push(class.file.class_name.clone(), target.clone());

        let unresolved = match resolver.resolve(class, reference) {
            Result::Ok(_) => continue,
            Result::Err(unresolved) => unresolved
        };

        // Classes shipped together were compiled together
        if index.defines(&class.file.entry, &target) {
            continue;
        };

        if class.symbols.catches_linkage_error && unresolved.kind.is_not_found() {
            continue;
        };

        seeds.push(ProblemSeed { unresolved, source: class.file.clone() });
    };
}

/// Finds the references in a classpath that would fail to link at runtime.
#[derive(Debug)]
pub struct LinkageChecker {
    classpath: ClassPathResult,
    index: ClassPathIndex,
    entry_point_classes: BTreeSet<Arc<str>>,
    graph: ClassReferenceGraph,
    seeds: Vec<ProblemSeed>,
    invalid_class_files: Vec<InvalidClassFileProblem>,
    filter: ExclusionFilter,
    reachable_only: bool,
    warnings: Vec<CheckerWarning>,
    timings: PhaseTimings
}

impl LinkageChecker {
    pub fn create<C: Into<ClassPathResult>>(
        classpath: C,
        entry_points: &[Arc<ClassPathEntry>],
        options: CheckerOptions
    ) -> Result<LinkageChecker, CheckerError> {
        let classpath = classpath.into();

        let mut filter = match options.exclusion_file {
            Some(ref path) => ExclusionFilter::load(path)?,
            None => ExclusionFilter::default()
        };

        if options.builtin_suppressions {
            filter.extend(ExclusionFilter::builtin());
        };

        for ep in entry_points.iter() {
            if !classpath.classpath().contains(ep) {
                return Result::Err(CheckerError::UnknownEntryPoint(ep.to_string()));
            };
        };

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = options.threads {
            pool = pool.num_threads(threads);
        };
        let pool = pool.build()?;

        let mut timings = PhaseTimings::default();
        let mut warnings = vec![];

        let start = Instant::now();
        let index = pool.install(|| ClassPathIndex::index(classpath.classpath()));
        timings.index = start.elapsed();

        if index.is_empty() {
            warn!("none of the {} classpath entries contain classes", classpath.classpath().len());
            warnings.push(CheckerWarning::EmptyClassPath);
        };

        if entry_points.is_empty() {
            warn!("no entry points were given");
            warnings.push(CheckerWarning::NoEntryPoints);
        };

        let start = Instant::now();
        let parsed: Vec<_> = pool.install(|| index.class_files().par_iter().map(parse_class).collect());

        let mut classes = Vec::with_capacity(parsed.len());
        let mut invalid_class_files = vec![];

        for result in parsed {
            match result {
                Result::Ok(class) => classes.push(class),
                Result::Err(problem) => {
                    warn!("{}", problem);
                    invalid_class_files.push(problem);
                }
            };
        };
        timings.parse = start.elapsed();

        debug!(
            "parsed {} classes ({} invalid) in {:.3}s",
            classes.len(),
            invalid_class_files.len(),
            timings.parse.as_secs_f32()
        );

        // Shadowed copies are still checked as sources, but never link as targets
        let table: ClassTable = classes.iter()
            .filter(|c| index.canonical(&c.file.class_name) == Some(&c.file.entry))
            .cloned()
            .collect();

        let start = Instant::now();
        let resolver = SymbolResolver::new(&table, &options.system_classes);
        let results: Vec<(Vec<ProblemSeed>, EdgeList)> = pool.install(|| {
            classes.par_iter()
                .fold(|| (Vec::new(), EdgeList::new()), |(mut seeds, mut edges), class| {
                    check_class(&resolver, &index, class, &mut seeds, &mut edges);
                    (seeds, edges)
                })
                .collect()
        });
        timings.resolve = start.elapsed();

        let start = Instant::now();
        let mut seeds = vec![];
        let mut edge_lists = Vec::with_capacity(results.len());

        for (s, e) in results {
            seeds.extend(s);
            edge_lists.push(e);
        };

        debug!(
            "resolved references of {} classes in {:.3}s, {} failed",
            classes.len(),
            timings.resolve.as_secs_f32(),
            seeds.len()
        );

        let graph = ClassReferenceGraph::from_edges(edge_lists);
        timings.graph = start.elapsed();

        let entry_point_classes = entry_points.iter()
            .flat_map(|ep| index.classes_in(ep).iter().cloned())
            .collect();

        Result::Ok(LinkageChecker {
            classpath,
            index,
            entry_point_classes,
            graph,
            seeds,
            invalid_class_files,
            filter,
            reachable_only: options.reachable_only,
            warnings,
            timings
        })
    }

    /// Every problem left after the exclusion filter and, if requested, the reachability filter.
    pub fn find_linkage_problems(&self) -> Vec<SymbolProblem> {
        let start = Instant::now();
        let reachable = if self.reachable_only {
            Some(self.graph.reachable_from(self.entry_point_classes.iter()))
        } else {
            None
        };

        let mut merged: BTreeMap<(Symbol, ProblemKind), BTreeSet<ClassFile>> = BTreeMap::new();
        let mut excluded = 0;

        for seed in self.seeds.iter() {
            let source = seed.source.top_level();

            if self.filter.matches_symbol(&seed.unresolved.symbol, &source) {
                excluded += 1;
                continue;
            };

            // Reachability is decided on the class file the problem is reported against
            if let Some(ref reachable) = reachable {
                if !reachable.contains(&source.class_name) {
                    continue;
                };
            };

            merged.entry((seed.unresolved.symbol.clone(), seed.unresolved.kind.clone()))
                .or_insert_with(BTreeSet::new)
                .insert(source);
        };

        let mut problems: Vec<_> = merged.into_iter()
            .map(|((symbol, kind), sources)| SymbolProblem { symbol, kind, sources })
            .collect();
        problems.sort_by_cached_key(|p| p.sort_key());

        debug!(
            "{} problems after filtering ({} references excluded) in {:.3}s",
            problems.len(),
            excluded,
            start.elapsed().as_secs_f32()
        );

        problems
    }

    pub fn find_symbol_problems(&self) -> BTreeMap<Symbol, Vec<SymbolProblem>> {
        let mut by_symbol = BTreeMap::new();

        for p in self.find_linkage_problems() {
            by_symbol.entry(p.symbol.clone()).or_insert_with(Vec::new).push(p);
        };

        by_symbol
    }

    pub fn report(&self) -> LinkageReport {
        LinkageReport {
            problems: self.find_linkage_problems(),
            invalid_class_files: self.invalid_class_files.clone(),
            unresolvable_entries: self.index.unresolvable().to_vec(),
            duplicate_classes: self.index.duplicate_classes(),
            warnings: self.warnings.clone()
        }
    }

    pub fn class_reference_graph(&self) -> &ClassReferenceGraph {
        &self.graph
    }

    pub fn index(&self) -> &ClassPathIndex {
        &self.index
    }

    pub fn classpath_result(&self) -> &ClassPathResult {
        &self.classpath
    }

    pub fn entry_point_classes(&self) -> &BTreeSet<Arc<str>> {
        &self.entry_point_classes
    }

    pub fn is_reachable(&self, class_name: &str) -> bool {
        self.graph.is_reachable(class_name, self.entry_point_classes.iter())
    }

    /// A shortest chain of references from an entry point class to `class_name`.
    pub fn reference_path(&self, class_name: &str) -> Option<Vec<Arc<str>>> {
        self.graph.path_from(self.entry_point_classes.iter(), class_name)
    }

    pub fn invalid_class_files(&self) -> &[InvalidClassFileProblem] {
        &self.invalid_class_files
    }

    pub fn warnings(&self) -> &[CheckerWarning] {
        &self.warnings
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::classfile::{InnerClassFlags, MethodFlags};
    use crate::classpath::ClassPathEntry;
    use crate::problem::{IncompatibleChange, ProblemKind};
    use crate::symbols::Symbol;
    use crate::test_util::*;

    fn calling_static(name: &str, class: &str, method: &str, descriptor: &str) -> Vec<u8> {
        class_calling(name, |b| {
            let m = b.method_ref(class, method, descriptor);
            Code::new().op_u16(INVOKESTATIC, m)
        })
    }

    fn class_with_static(name: &str, method: &str, descriptor: &str) -> Vec<u8> {
        let mut b = ClassBuilder::new(name, Some("java/lang/Object"));
        b.method(MethodFlags::PUBLIC | MethodFlags::STATIC, method, descriptor, Some(Code::new().op(0xb1)));
        b.build()
    }

    fn check(classpath: &[Arc<ClassPathEntry>], entry_points: usize) -> LinkageChecker {
        LinkageChecker::create(classpath.to_vec(), &classpath[..entry_points], CheckerOptions::default()).unwrap()
    }

    fn source_names(p: &SymbolProblem) -> Vec<String> {
        p.sources.iter().map(|s| s.java_name()).collect()
    }

    #[test]
    fn test_missing_class() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", calling_static("a/X", "b/Y", "foo", "()V"))]);

        let problems = check(&[app], 1).find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].symbol, Symbol::class("b/Y"));
        assert_eq!(problems[0].kind, ProblemKind::ClassNotFound);
        assert_eq!(source_names(&problems[0]), vec!["a.X"]);
    }

    #[test]
    fn test_descriptor_mismatch() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", calling_static("a/X", "b/Y", "foo", "(Ljava/lang/String;)V"))]);
        let lib = jar_entry(dir.path(), "g:lib:1", &[("b/Y", class_with_static("b/Y", "foo", "(I)V"))]);

        let problems = check(&[app, lib.clone()], 1).find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].symbol, Symbol::method("b/Y", "foo", "(Ljava/lang/String;)V", false).unwrap());
        assert_eq!(problems[0].target().map(|t| &t.entry), Some(&lib));
        assert_eq!(problems[0].to_string(), "(g:lib:1) b.Y's method void foo(java.lang.String) is not found");
    }

    #[test]
    fn test_interface_default_method() {
        let dir = TempDir::new().unwrap();

        let mut iface = ClassBuilder::interface_class("b/I", &[]);
        iface.method(MethodFlags::PUBLIC, "bar", "()V", Some(Code::new().op(0xb1)));

        let mut impl_class = ClassBuilder::new("b/Impl", Some("java/lang/Object"));
        impl_class.interface("b/I");
        impl_class.method(MethodFlags::PUBLIC, "<init>", "()V", None);

        let caller = class_calling("a/X", |b| {
            let m = b.method_ref("b/Impl", "bar", "()V");
            Code::new().op_u16(INVOKEVIRTUAL, m)
        });

        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", caller)]);
        let lib = jar_entry(dir.path(), "g:lib:1", &[("b/I", iface.build()), ("b/Impl", impl_class.build())]);

        assert_eq!(check(&[app, lib], 1).find_linkage_problems(), vec![]);
    }

    #[test]
    fn test_problems_are_merged_per_symbol() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[
            ("a/X1", calling_static("a/X1", "b/Y", "foo", "()V")),
            ("a/X2", calling_static("a/X2", "b/Y", "foo", "()V"))
        ]);
        let lib = jar_entry(dir.path(), "g:lib:1", &[("b/Y", simple_class("b/Y"))]);

        let checker = check(&[app, lib], 1);
        let problems = checker.find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(source_names(&problems[0]), vec!["a.X1", "a.X2"]);

        let grouped = checker.find_symbol_problems();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&problems[0].symbol].len(), 1);
    }

    #[test]
    fn test_first_entry_wins() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", calling_static("a/X", "c/C", "foo", "(I)V"))]);
        let good = jar_entry(dir.path(), "g:c:1", &[("c/C", class_with_static("c/C", "foo", "(I)V"))]);
        let bad = jar_entry(dir.path(), "g:c:2", &[("c/C", class_with_static("c/C", "foo", "(J)V"))]);

        assert_eq!(check(&[app.clone(), good.clone(), bad.clone()], 1).find_linkage_problems(), vec![]);

        let checker = check(&[app, bad.clone(), good], 1);
        let problems = checker.find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].target().map(|t| &t.entry), Some(&bad));

        let report = checker.report();
        assert_eq!(report.duplicate_classes.len(), 1);
        assert_eq!(&*report.duplicate_classes[0].0, "c/C");
    }

    #[test]
    fn test_corrupt_entries_are_reported() {
        let dir = TempDir::new().unwrap();
        let bogus_path = dir.path().join("bogus.jar");
        fs::write(&bogus_path, b"not a zip file").unwrap();

        let bogus = Arc::new(ClassPathEntry::new(bogus_path, None));
        let app = jar_entry(dir.path(), "g:app:1", &[
            ("a/X", calling_static("a/X", "b/Bad", "foo", "()V")),
            ("b/Bad", vec![0xca, 0xfe, 0xba, 0xbe, 0x00])
        ]);
        let missing = Arc::new(ClassPathEntry::new(PathBuf::from("/nonexistent/lib.jar"), None));

        let report = check(&[app, bogus, missing], 1).report();

        assert_eq!(report.unresolvable_entries.len(), 2);
        assert_eq!(report.invalid_class_files.len(), 1);
        assert_eq!(&*report.invalid_class_files[0].file.class_name, "b/Bad");

        // Same-entry references are not reported even when the target is broken
        assert_eq!(report.problems, vec![]);
    }

    #[test]
    fn test_invalid_class_is_not_found() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", calling_static("a/X", "b/Bad", "foo", "()V"))]);
        let lib = jar_entry(dir.path(), "g:lib:1", &[("b/Bad", simple_class("b/Renamed"))]);

        let report = check(&[app, lib], 1).report();

        assert_eq!(report.invalid_class_files.len(), 1);
        assert!(report.invalid_class_files[0].reason.contains("b.Renamed"));
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].kind, ProblemKind::ClassNotFound);
    }

    #[test]
    fn test_same_entry_references_are_skipped() {
        let dir = TempDir::new().unwrap();
        let lib = jar_entry(dir.path(), "g:lib:1", &[
            ("b/X", calling_static("b/X", "b/Y", "gone", "()V")),
            ("b/Y", simple_class("b/Y"))
        ]);

        assert_eq!(check(&[lib], 1).find_linkage_problems(), vec![]);
    }

    #[test]
    fn test_guarded_references_are_skipped() {
        let dir = TempDir::new().unwrap();
        let guarded = class_calling("a/Guarded", |b| {
            let ncdfe = b.class_ref("java/lang/NoClassDefFoundError");
            let foo = b.method_ref("b/Optional", "foo", "()V");
            Code::new().op_u16(INVOKESTATIC, foo).catch(ncdfe)
        });
        let app = jar_entry(dir.path(), "g:app:1", &[("a/Guarded", guarded)]);

        assert_eq!(check(&[app], 1).find_linkage_problems(), vec![]);
    }

    #[test]
    fn test_incompatible_change_is_reported_against_target() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", calling_static("a/X", "b/Y", "foo", "()V"))]);

        let mut y = ClassBuilder::new("b/Y", Some("java/lang/Object"));
        y.method(MethodFlags::PUBLIC, "foo", "()V", Some(Code::new().op(0xb1)));
        let lib = jar_entry(dir.path(), "g:lib:1", &[("b/Y", y.build())]);

        let problems = check(&[app, lib.clone()], 1).find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::IncompatibleClassChange {
            target: ClassFile::new(lib, Arc::from("b/Y")),
            change: IncompatibleChange::ExpectedStatic
        });
    }

    #[test]
    fn test_nested_sources_are_reported_as_top_level() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[
            ("a/Outer", simple_class("a/Outer")),
            ("a/Outer$Inner", calling_static("a/Outer$Inner", "b/Missing", "foo", "()V"))
        ]);

        let problems = check(&[app], 1).find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(source_names(&problems[0]), vec!["a.Outer"]);
    }

    /// Two entries: the application, which reaches `lib/Used`, and a library in which `lib/Unused` is broken.
    fn reachability_classpath(dir: &TempDir) -> Vec<Arc<ClassPathEntry>> {
        let app = jar_entry(dir.path(), "g:app:1", &[("app/Main", calling_static("app/Main", "lib/Used", "go", "()V"))]);
        let lib = jar_entry(dir.path(), "g:lib:1", &[
            ("lib/Used", class_calling("lib/Used", |b| {
                let m = b.method_ref("dep/Helper", "help", "()V");
                Code::new().op_u16(INVOKESTATIC, m)
            })),
            ("lib/Unused", calling_static("lib/Unused", "dep/Gone", "run", "()V"))
        ]);
        let dep = jar_entry(dir.path(), "g:dep:1", &[("dep/Helper", simple_class("dep/Helper"))]);

        vec![app, lib, dep]
    }

    #[test]
    fn test_reachable_only() {
        let dir = TempDir::new().unwrap();
        let classpath = reachability_classpath(&dir);

        let all = LinkageChecker::create(classpath.clone(), &classpath[..1], CheckerOptions::default()).unwrap();
        let reachable = LinkageChecker::create(
            classpath.clone(),
            &classpath[..1],
            CheckerOptions { reachable_only: true, ..CheckerOptions::default() }
        ).unwrap();

        let all_problems = all.find_linkage_problems();
        let reachable_problems = reachable.find_linkage_problems();

        assert_eq!(all_problems.len(), 3);
        assert_eq!(reachable_problems.len(), 2);

        for p in reachable_problems.iter() {
            assert!(all_problems.contains(p));
            assert!(p.sources.iter().all(|s| reachable.is_reachable(&s.class_name)));
        };

        assert!(!reachable.is_reachable("lib/Unused"));
        assert_eq!(
            reachable.reference_path("dep/Helper").unwrap().iter().map(|c| &**c).collect::<Vec<_>>(),
            vec!["app/Main", "lib/Used", "dep/Helper"]
        );
        assert_eq!(reachable.entry_point_classes().len(), 1);
    }

    #[test]
    fn test_reachable_only_nested_source() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[
            ("app/Main", calling_static("app/Main", "lib/Outer$Inner", "go", "()V"))
        ]);
        let inner = {
            let mut b = ClassBuilder::new("lib/Outer$Inner", Some("java/lang/Object"));
            let m = b.method_ref("dep/Gone", "run", "()V");
            b.inner_class("lib/Outer$Inner", Some("lib/Outer"), Some("Inner"), InnerClassFlags::PUBLIC | InnerClassFlags::STATIC);
            b.method(MethodFlags::PUBLIC | MethodFlags::STATIC, "go", "()V", Some(Code::new().op_u16(INVOKESTATIC, m).op(0xb1)));
            b.build()
        };
        let lib = jar_entry(dir.path(), "g:lib:1", &[
            ("lib/Outer", simple_class("lib/Outer")),
            ("lib/Outer$Inner", inner)
        ]);
        let classpath = vec![app, lib];
        let reachable_only = |entry_points: usize| LinkageChecker::create(
            classpath.clone(),
            &classpath[..entry_points],
            CheckerOptions { reachable_only: true, ..CheckerOptions::default() }
        ).unwrap();

        // Only the nested class is referenced, while the problem is reported against its outer class
        let checker = reachable_only(1);
        assert!(checker.is_reachable("lib/Outer$Inner"));
        assert!(!checker.is_reachable("lib/Outer"));
        assert!(checker.find_linkage_problems().is_empty());

        let checker = reachable_only(2);
        let problems = checker.find_linkage_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(source_names(&problems[0]), vec!["lib.Outer"]);
        assert!(problems[0].sources.iter().all(|s| checker.is_reachable(&s.class_name)));
    }

    #[test]
    fn test_results_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let classpath = reachability_classpath(&dir);

        let options = |threads| CheckerOptions { threads: Some(threads), ..CheckerOptions::default() };
        let first = LinkageChecker::create(classpath.clone(), &classpath[..1], options(1)).unwrap();
        let second = LinkageChecker::create(classpath.clone(), &classpath[..1], options(4)).unwrap();

        assert_eq!(first.find_linkage_problems(), second.find_linkage_problems());
        assert_eq!(
            format_problems_of(&first),
            format_problems_of(&second)
        );
    }

    fn format_problems_of(checker: &LinkageChecker) -> String {
        crate::problem::format_problems(&checker.find_linkage_problems(), Some(checker.classpath_result()))
    }

    #[test]
    fn test_exclusion_file_only_removes_problems() {
        let dir = TempDir::new().unwrap();
        let classpath = reachability_classpath(&dir);
        let exclusions = dir.path().join("exclusions.xml");

        fs::write(&exclusions, r#"<LinkageCheckerFilter>
              <LinkageError><Source><Class name="lib.Unused"/></Source></LinkageError>
              <LinkageError><Target><Package name="dep"/></Target><Source><Package name="app"/></Source></LinkageError>
            </LinkageCheckerFilter>"#).unwrap();

        let plain = LinkageChecker::create(classpath.clone(), &classpath[..1], CheckerOptions::default()).unwrap();
        let filtered = LinkageChecker::create(
            classpath.clone(),
            &classpath[..1],
            CheckerOptions { exclusion_file: Some(exclusions), ..CheckerOptions::default() }
        ).unwrap();

        let before = plain.find_linkage_problems();
        let after = filtered.find_linkage_problems();

        assert_eq!(after.len(), before.len() - 1);
        assert!(after.iter().all(|p| before.contains(p)));
        assert!(after.iter().all(|p| p.sources.iter().all(|s| &*s.class_name != "lib/Unused")));
    }

    #[test]
    fn test_builtin_suppressions() {
        let dir = TempDir::new().unwrap();
        let traces = jar_entry(dir.path(), "g:reactor:1", &[(
            "reactor/core/publisher/Traces",
            calling_static("reactor/core/publisher/Traces", "sun/misc/Gone", "x", "()V")
        ), (
            "org/graalvm/Feature",
            calling_static("org/graalvm/Feature", "jdk/vm/ci/Services", "x", "()V")
        )]);

        let options = |builtin_suppressions| CheckerOptions {
            builtin_suppressions,
            system_classes: SystemClasses::none(),
            ..CheckerOptions::default()
        };

        let suppressed = LinkageChecker::create(vec![traces.clone()], &[traces.clone()], options(true)).unwrap();
        assert_eq!(suppressed.find_linkage_problems(), vec![]);

        let unsuppressed = LinkageChecker::create(vec![traces.clone()], &[traces], options(false)).unwrap();

        assert_eq!(unsuppressed.find_linkage_problems().len(), 2);
    }

    #[test]
    fn test_empty_classpath() {
        let checker = LinkageChecker::create(Vec::<Arc<ClassPathEntry>>::new(), &[], CheckerOptions::default()).unwrap();
        let report = checker.report();

        assert!(!report.has_problems());
        assert_eq!(report.warnings, vec![CheckerWarning::EmptyClassPath, CheckerWarning::NoEntryPoints]);
        assert!(checker.class_reference_graph().is_empty());
    }

    #[test]
    fn test_configuration_errors() {
        let dir = TempDir::new().unwrap();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", simple_class("a/X"))]);
        let stranger = Arc::new(ClassPathEntry::new(PathBuf::from("elsewhere.jar"), None));

        match LinkageChecker::create(vec![app.clone()], &[stranger], CheckerOptions::default()) {
            Result::Err(CheckerError::UnknownEntryPoint(name)) => assert_eq!(name, "elsewhere.jar"),
            other => panic!("unexpected result {:?}", other.map(|_| ()))
        };

        let exclusions = dir.path().join("broken.xml");
        fs::write(&exclusions, "<LinkageCheckerFilter><LinkageError>").unwrap();

        let options = CheckerOptions { exclusion_file: Some(exclusions), ..CheckerOptions::default() };
        match LinkageChecker::create(vec![app.clone()], &[app], options) {
            Result::Err(CheckerError::Exclusion(_)) => {},
            other => panic!("unexpected result {:?}", other.map(|_| ()))
        };
    }

    #[test]
    fn test_graph_records_failed_references() {
        let dir = TempDir::new().unwrap();

        let orphan = ClassBuilder::new("a/X", Some("b/Base")).build();
        let app = jar_entry(dir.path(), "g:app:1", &[("a/X", orphan)]);

        let checker = check(&[app], 1);
        let graph = checker.class_reference_graph();

        assert!(graph.successors("a/X").any(|c| &**c == "b/Base"));
        assert!(checker.is_reachable("b/Base"));
        assert_eq!(checker.find_linkage_problems().len(), 1);
    }
}
