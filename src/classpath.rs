use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use itertools::Itertools;
use rayon::prelude::*;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::problem::UnresolvableArtifactProblem;
use crate::symbols::{java_name, top_level_name};

/// A `group:name:version` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Artifact {
    pub group: String,
    pub name: String,
    pub version: String
}

impl Artifact {
    pub fn new(group: &str, name: &str, version: &str) -> Artifact {
        Artifact { group: group.to_owned(), name: name.to_owned(), version: version.to_owned() }
    }

    pub fn parse(coordinates: &str) -> Option<Artifact> {
        let parts: Vec<_> = coordinates.split(':').collect();

        match parts[..] {
            [group, name, version] if !group.is_empty() && !name.is_empty() && !version.is_empty() => {
                Some(Artifact::new(group, name, version))
            },
            _ => None
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// A JAR file or a directory of classes, optionally tied to the artifact it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassPathEntry {
    pub path: PathBuf,
    pub artifact: Option<Artifact>
}

impl ClassPathEntry {
    pub fn new(path: PathBuf, artifact: Option<Artifact>) -> ClassPathEntry {
        ClassPathEntry { path, artifact }
    }

    /// Parses `path` or `group:name:version=path`.
    pub fn parse(element: &str) -> Option<ClassPathEntry> {
        match element.find('=') {
            Some(i) => {
                let artifact = Artifact::parse(&element[..i])?;
                let path = &element[(i + 1)..];

                if path.is_empty() {
                    None
                } else {
                    Some(ClassPathEntry::new(PathBuf::from(path), Some(artifact)))
                }
            },
            None if !element.is_empty() => Some(ClassPathEntry::new(PathBuf::from(element), None)),
            None => None
        }
    }
}

impl fmt::Display for ClassPathEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.artifact {
            Some(ref artifact) => write!(f, "{}", artifact),
            None => write!(f, "{}", self.path.display())
        }
    }
}

/// A class name together with the entry it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassFile {
    pub class_name: Arc<str>,
    pub entry: Arc<ClassPathEntry>
}

impl ClassFile {
    pub fn new(entry: Arc<ClassPathEntry>, class_name: Arc<str>) -> ClassFile {
        ClassFile { class_name, entry }
    }

    pub fn java_name(&self) -> String {
        java_name(&self.class_name)
    }

    /// The class file of the top-level class this one is nested in, or itself.
    pub fn top_level(&self) -> ClassFile {
        let top = top_level_name(&self.class_name);

        if top.len() == self.class_name.len() {
            self.clone()
        } else {
            ClassFile::new(self.entry.clone(), Arc::from(top))
        }
    }
}

impl fmt::Display for ClassFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", java_name(&self.class_name), self.entry)
    }
}

/// The chain of artifacts from a root artifact down to the one that brought an entry onto the classpath.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyPath(pub Vec<Artifact>);

impl DependencyPath {
    pub fn leaf(&self) -> Option<&Artifact> {
        self.0.last()
    }
}

impl fmt::Display for DependencyPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(" / "))
    }
}

/// An ordered classpath together with the dependency paths that introduced each of its entries.
#[derive(Debug, Clone, Default)]
pub struct ClassPathResult {
    classpath: Vec<Arc<ClassPathEntry>>,
    paths: HashMap<Arc<ClassPathEntry>, Vec<DependencyPath>>
}

impl ClassPathResult {
    pub fn new(classpath: Vec<Arc<ClassPathEntry>>) -> ClassPathResult {
        ClassPathResult { classpath, paths: HashMap::new() }
    }

    pub fn add_path(&mut self, entry: &Arc<ClassPathEntry>, path: DependencyPath) {
        self.paths.entry(entry.clone()).or_insert_with(Vec::new).push(path);
    }

    pub fn classpath(&self) -> &[Arc<ClassPathEntry>] {
        &self.classpath
    }

    pub fn paths_to(&self, entry: &ClassPathEntry) -> &[DependencyPath] {
        self.paths.get(entry).map_or(&[], |paths| &paths[..])
    }
}

/// Parses a `:`-separated classpath. Elements are paths or `group:name:version=path`, so three tokens whose last
/// one carries the `=` form a single element.
pub fn parse_classpath(classpath: &str) -> Option<Vec<ClassPathEntry>> {
    let tokens: Vec<&str> = classpath.split(':').collect();
    let mut entries = vec![];
    let mut i = 0;

    while i < tokens.len() {
        let is_coordinate = i + 2 < tokens.len()
            && !tokens[i].contains('=')
            && !tokens[i + 1].contains('=')
            && tokens[i + 2].contains('=');
        let len = if is_coordinate { 3 } else { 1 };
        let element = tokens[i..(i + len)].join(":");

        i += len;

        if element.is_empty() {
            continue;
        };

        entries.push(ClassPathEntry::parse(&element)?);
    };

    Some(entries)
}

impl From<Vec<Arc<ClassPathEntry>>> for ClassPathResult {
    fn from(classpath: Vec<Arc<ClassPathEntry>>) -> ClassPathResult {
        ClassPathResult::new(classpath)
    }
}

#[derive(Debug, Error)]
pub enum ClassPathError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("error reading {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("error reading archive {}: {source}", .path.display())]
    Zip { path: PathBuf, source: ZipError }
}

/// Something that can enumerate the class files it contains.
pub trait ClassSource: fmt::Debug {
    fn read_classes(&mut self) -> Result<Vec<(Arc<str>, Box<[u8]>)>, ClassPathError>;
}

/// Maps a path inside an entry to the binary class name it defines. Module and package descriptors and
/// multi-release overlays do not define loadable classes on a plain classpath.
fn class_name_for_path(path: &str) -> Option<Arc<str>> {
    let name = path.strip_suffix(".class")?;

    if name.is_empty() || name.starts_with("META-INF/") || name.ends_with("module-info") || name.ends_with("package-info") {
        return None;
    };

    Some(Arc::from(name))
}

#[derive(Debug)]
pub struct JarSource<R: Read + Seek + fmt::Debug> {
    path: PathBuf,
    archive: ZipArchive<R>
}

impl JarSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<JarSource<BufReader<File>>, ClassPathError> {
        let file = File::open(path).map_err(|source| ClassPathError::Io { path: path.to_owned(), source })?;
        JarSource::new(path, BufReader::new(file))
    }
}

impl <R: Read + Seek + fmt::Debug> JarSource<R> {
    pub fn new(path: &Path, read: R) -> Result<JarSource<R>, ClassPathError> {
        let archive = ZipArchive::new(read).map_err(|source| ClassPathError::Zip { path: path.to_owned(), source })?;
        Result::Ok(JarSource { path: path.to_owned(), archive })
    }
}

impl <R: Read + Seek + fmt::Debug> ClassSource for JarSource<R> {
    fn read_classes(&mut self) -> Result<Vec<(Arc<str>, Box<[u8]>)>, ClassPathError> {
        let path = self.path.clone();
        let mut classes = vec![];

        for i in 0..self.archive.len() {
            let mut file = match self.archive.by_index(i) {
                Result::Ok(file) => file,
                Result::Err(ZipError::Io(source)) => {
                    return Result::Err(ClassPathError::Io { path, source });
                },
                Result::Err(source) => {
                    return Result::Err(ClassPathError::Zip { path, source });
                }
            };

            if !file.is_file() {
                continue;
            };

            let name = match class_name_for_path(file.name()) {
                Some(name) => name,
                None => continue
            };

            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).map_err(|source| ClassPathError::Io { path: path.clone(), source })?;
            classes.push((name, data.into_boxed_slice()));
        };

        Result::Ok(classes)
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf
}

impl DirectorySource {
    pub fn new(path: PathBuf) -> DirectorySource {
        DirectorySource { path }
    }

    fn walk(&self, dir: &Path, prefix: &str, classes: &mut Vec<(Arc<str>, Box<[u8]>)>) -> Result<(), ClassPathError> {
        let io_err = |source| ClassPathError::Io { path: dir.to_owned(), source };

        // Sorted so that the result does not depend on the order the filesystem lists entries in
        let mut children: Vec<_> = fs::read_dir(dir).map_err(io_err)?
            .collect::<Result<Vec<_>, _>>().map_err(io_err)?;
        children.sort_by_key(|c| c.file_name());

        for child in children {
            let file_name = child.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                file_name
            } else {
                format!("{}/{}", prefix, file_name)
            };
            let path = child.path();

            if path.is_dir() {
                self.walk(&path, &rel, classes)?;
            } else if let Some(name) = class_name_for_path(&rel) {
                let data = fs::read(&path).map_err(|source| ClassPathError::Io { path: path.clone(), source })?;
                classes.push((name, data.into_boxed_slice()));
            };
        };

        Result::Ok(())
    }
}

impl ClassSource for DirectorySource {
    fn read_classes(&mut self) -> Result<Vec<(Arc<str>, Box<[u8]>)>, ClassPathError> {
        let mut classes = vec![];
        self.walk(&self.path.clone(), "", &mut classes)?;
        Result::Ok(classes)
    }
}

pub fn open_source(entry: &ClassPathEntry) -> Result<Box<dyn ClassSource>, ClassPathError> {
    if entry.path.is_dir() {
        Result::Ok(Box::new(DirectorySource::new(entry.path.clone())))
    } else if entry.path.is_file() {
        Result::Ok(Box::new(JarSource::open(&entry.path)?))
    } else {
        Result::Err(ClassPathError::NotFound(entry.path.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct IndexedClass {
    pub file: ClassFile,
    pub bytes: Box<[u8]>
}

/// Every class file on a classpath, read once, with classloader shadowing resolved.
#[derive(Debug, Default)]
pub struct ClassPathIndex {
    entries: Vec<Arc<ClassPathEntry>>,
    classes: Vec<IndexedClass>,
    defining: HashMap<Arc<str>, SmallVec<[Arc<ClassPathEntry>; 1]>>,
    by_entry: HashMap<Arc<ClassPathEntry>, Vec<Arc<str>>>,
    unresolvable: Vec<UnresolvableArtifactProblem>
}

impl ClassPathIndex {
    pub fn index(classpath: &[Arc<ClassPathEntry>]) -> ClassPathIndex {
        let start = Instant::now();

        let mut seen = HashSet::new();
        let entries: Vec<_> = classpath.iter()
            .filter(|e| seen.insert(Arc::clone(e)))
            .cloned()
            .collect();

        let contents: Vec<_> = entries.par_iter()
            .map(|entry| open_source(entry).and_then(|mut source| source.read_classes()))
            .collect();

        let mut index = ClassPathIndex::default();

        for (entry, content) in entries.iter().zip(contents) {
            let classes = match content {
                Result::Ok(classes) => classes,
                Result::Err(err) => {
                    warn!("skipping unreadable classpath entry {}: {}", entry, err);
                    index.unresolvable.push(UnresolvableArtifactProblem {
                        entry: entry.clone(),
                        reason: err.to_string()
                    });
                    continue;
                }
            };

            let names = index.by_entry.entry(entry.clone()).or_insert_with(Vec::new);

            for (name, bytes) in classes {
                let defining = index.defining.entry(name.clone()).or_insert_with(SmallVec::new);

                // A class listed twice inside one archive is still only one definition
                if defining.last() == Some(entry) {
                    continue;
                };

                defining.push(entry.clone());
                names.push(name.clone());
                index.classes.push(IndexedClass { file: ClassFile::new(entry.clone(), name), bytes });
            };
        };

        index.entries = entries;

        debug!(
            "indexed {} classes from {} entries ({} unreadable) in {:.3}s",
            index.defining.len(),
            index.entries.len(),
            index.unresolvable.len(),
            start.elapsed().as_secs_f32()
        );

        index
    }

    pub fn entries(&self) -> &[Arc<ClassPathEntry>] {
        &self.entries
    }

    /// The entry that supplies `class_name` at runtime: the first one in classpath order.
    pub fn canonical(&self, class_name: &str) -> Option<&Arc<ClassPathEntry>> {
        self.defining.get(class_name).and_then(|d| d.first())
    }

    pub fn entries_defining(&self, class_name: &str) -> &[Arc<ClassPathEntry>] {
        self.defining.get(class_name).map_or(&[], |d| &d[..])
    }

    pub fn duplicate_classes(&self) -> Vec<(Arc<str>, Vec<Arc<ClassPathEntry>>)> {
        self.defining.iter()
            .filter(|(_, d)| d.len() > 1)
            .map(|(name, d)| (name.clone(), d.to_vec()))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect()
    }

    pub fn defines(&self, entry: &ClassPathEntry, class_name: &str) -> bool {
        self.entries_defining(class_name).iter().any(|e| **e == *entry)
    }

    pub fn classes_in(&self, entry: &ClassPathEntry) -> &[Arc<str>] {
        self.by_entry.get(entry).map_or(&[], |names| &names[..])
    }

    pub fn class_files(&self) -> &[IndexedClass] {
        &self.classes
    }

    pub fn unresolvable(&self) -> &[UnresolvableArtifactProblem] {
        &self.unresolvable
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.defining.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.defining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defining.is_empty()
    }
}
