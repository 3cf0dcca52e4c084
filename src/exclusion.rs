use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::debug;

use crate::classpath::ClassFile;
use crate::problem::SymbolProblem;
use crate::symbols::{java_name, Symbol};

#[derive(Debug, Error)]
pub enum ExclusionFileError {
    #[error("error reading {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed XML at position {position}: {source}")]
    Xml { position: usize, source: quick_xml::Error },
    #[error("{message} at position {position}")]
    Invalid { position: usize, message: String }
}

fn in_package(class_name: &str, package: &str) -> bool {
    class_name.len() > package.len()
        && class_name.starts_with(package)
        && class_name.as_bytes()[package.len()] == b'.'
}

/// Selects the class files a problem is reported from. Names are in dotted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMatcher {
    Package(String),
    Class(String)
}

impl SourceMatcher {
    pub fn matches(&self, source: &ClassFile) -> bool {
        let name = source.java_name();

        match *self {
            SourceMatcher::Package(ref package) => in_package(&name, package),
            SourceMatcher::Class(ref class_name) => name == *class_name
        }
    }
}

/// Selects the symbols a problem is about. Names are in dotted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMatcher {
    Package(String),
    Class(String),
    Method { class_name: String, name: String },
    Field { class_name: String, name: String }
}

impl TargetMatcher {
    pub fn matches(&self, symbol: &Symbol) -> bool {
        let class_name = java_name(symbol.class_name());

        match (self, symbol) {
            (&TargetMatcher::Package(ref package), _) => in_package(&class_name, package),
            (&TargetMatcher::Class(ref expected), _) => class_name == *expected,
            (&TargetMatcher::Method { class_name: ref expected, ref name }, &Symbol::Method(ref m)) => {
                class_name == *expected && &*m.name == name
            },
            (&TargetMatcher::Field { class_name: ref expected, ref name }, &Symbol::Field(ref f)) => {
                class_name == *expected && &*f.name == name
            },
            _ => false
        }
    }
}

/// One `LinkageError` element: suppresses a problem when every part it specifies matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRule {
    pub source: Option<SourceMatcher>,
    pub target: Vec<TargetMatcher>
}

impl ExclusionRule {
    pub fn new() -> ExclusionRule {
        ExclusionRule::default()
    }

    pub fn source_package(mut self, package: &str) -> ExclusionRule {
        self.source = Some(SourceMatcher::Package(package.to_owned()));
        self
    }

    pub fn source_class(mut self, class_name: &str) -> ExclusionRule {
        self.source = Some(SourceMatcher::Class(class_name.to_owned()));
        self
    }

    pub fn target_package(mut self, package: &str) -> ExclusionRule {
        self.target.push(TargetMatcher::Package(package.to_owned()));
        self
    }

    pub fn target_class(mut self, class_name: &str) -> ExclusionRule {
        self.target.push(TargetMatcher::Class(class_name.to_owned()));
        self
    }

    pub fn target_method(mut self, class_name: &str, name: &str) -> ExclusionRule {
        self.target.push(TargetMatcher::Method { class_name: class_name.to_owned(), name: name.to_owned() });
        self
    }

    pub fn target_field(mut self, class_name: &str, name: &str) -> ExclusionRule {
        self.target.push(TargetMatcher::Field { class_name: class_name.to_owned(), name: name.to_owned() });
        self
    }

    /// A rule with neither a source nor a target matches nothing.
    pub fn matches(&self, symbol: &Symbol, source: &ClassFile) -> bool {
        if self.source.is_none() && self.target.is_empty() {
            return false;
        };

        let source_ok = self.source.as_ref().map_or(true, |m| m.matches(source));
        let target_ok = self.target.is_empty() || self.target.iter().any(|m| m.matches(symbol));

        source_ok && target_ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionFilter {
    rules: Vec<ExclusionRule>
}

impl ExclusionFilter {
    pub fn new(rules: Vec<ExclusionRule>) -> ExclusionFilter {
        ExclusionFilter { rules }
    }

    /// Problems that are expected in any classpath containing these libraries.
    pub fn builtin() -> ExclusionFilter {
        ExclusionFilter::new(vec![
            // Loaded reflectively only when its dependencies are present
            ExclusionRule::new().source_class("reactor.core.publisher.Traces"),
            // JVMCI only exists in GraalVM's own JDK builds
            ExclusionRule::new().source_package("com.oracle.svm").target_package("jdk.vm.ci"),
            ExclusionRule::new().source_package("com.oracle.graal").target_package("jdk.vm.ci"),
            ExclusionRule::new().source_package("org.graalvm").target_package("jdk.vm.ci"),
            // Injected into the boot class loader at runtime as MockMethodDispatcher.raw
            ExclusionRule::new()
                .source_package("org.mockito.internal.creation.bytebuddy")
                .target_class("org.mockito.internal.creation.bytebuddy.MockMethodDispatcher")
        ])
    }

    pub fn load(path: &Path) -> Result<ExclusionFilter, ExclusionFileError> {
        let xml = fs::read_to_string(path).map_err(|source| ExclusionFileError::Io { path: path.to_owned(), source })?;
        let filter = ExclusionFilter::parse(&xml)?;

        debug!("loaded {} exclusion rules from {}", filter.rules.len(), path.display());
        Result::Ok(filter)
    }

    pub fn parse(xml: &str) -> Result<ExclusionFilter, ExclusionFileError> {
        let mut reader = Reader::from_str(xml);
        let mut parser = RuleParser::default();

        reader.trim_text(true);

        loop {
            let event = reader.read_event();
            let position = reader.buffer_position();

            match event {
                Result::Ok(Event::Start(ref e)) => {
                    parser.start(e, position)?;
                },
                Result::Ok(Event::Empty(ref e)) => {
                    parser.start(e, position)?;
                    parser.end(position)?;
                },
                Result::Ok(Event::End(_)) => {
                    parser.end(position)?;
                },
                Result::Ok(Event::Text(ref t)) if !t.iter().all(|b| b.is_ascii_whitespace()) => {
                    return Result::Err(ExclusionFileError::Invalid { position, message: "unexpected text".to_owned() });
                },
                Result::Ok(Event::CData(_)) => {
                    return Result::Err(ExclusionFileError::Invalid { position, message: "unexpected CDATA".to_owned() });
                },
                Result::Ok(Event::Eof) => break,
                Result::Ok(_) => {},
                Result::Err(source) => {
                    return Result::Err(ExclusionFileError::Xml { position, source });
                }
            };
        };

        parser.finish(reader.buffer_position())
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn extend(&mut self, other: ExclusionFilter) {
        self.rules.extend(other.rules);
    }

    /// Whether the problem, as reported from `source`, is suppressed by any rule.
    pub fn matches(&self, problem: &SymbolProblem, source: &ClassFile) -> bool {
        self.matches_symbol(&problem.symbol, source)
    }

    pub fn matches_symbol(&self, symbol: &Symbol, source: &ClassFile) -> bool {
        self.rules.iter().any(|r| r.matches(symbol, source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Filter,
    LinkageError,
    Source,
    Target,
    Matcher
}

#[derive(Debug, Default)]
struct RuleParser {
    stack: Vec<Element>,
    seen_filter: bool,
    current: ExclusionRule,
    section_len: usize,
    rules: Vec<ExclusionRule>
}

fn invalid<T>(position: usize, message: String) -> Result<T, ExclusionFileError> {
    Result::Err(ExclusionFileError::Invalid { position, message })
}

fn attribute(e: &BytesStart, key: &str, position: usize) -> Result<String, ExclusionFileError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ExclusionFileError::Xml { position, source: err.into() })?;

        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|source| ExclusionFileError::Xml { position, source })?;
            return Result::Ok(value.into_owned());
        };
    };

    invalid(position, format!("element {} is missing attribute {}", String::from_utf8_lossy(e.name().as_ref()), key))
}

impl RuleParser {
    fn start(&mut self, e: &BytesStart, position: usize) -> Result<(), ExclusionFileError> {
        let name = e.name();

        if name.prefix().is_some() {
            return invalid(position, "XML namespaces are not supported".to_owned());
        };

        for attr in e.attributes().flatten() {
            let key = attr.key.as_ref();

            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                return invalid(position, "XML namespaces are not supported".to_owned());
            };
        };

        let top = self.stack.last().copied();
        let tag = String::from_utf8_lossy(name.as_ref()).into_owned();

        let element = match (tag.as_str(), top) {
            ("LinkageCheckerFilter", None) if !self.seen_filter => {
                self.seen_filter = true;
                Element::Filter
            },
            ("LinkageError", Some(Element::Filter)) => {
                self.current = ExclusionRule::new();
                Element::LinkageError
            },
            ("Source", Some(Element::LinkageError)) if self.current.source.is_none() => {
                self.section_len = 0;
                Element::Source
            },
            ("Target", Some(Element::LinkageError)) if self.current.target.is_empty() => {
                self.section_len = 0;
                Element::Target
            },
            ("Package", Some(Element::Source)) | ("Class", Some(Element::Source)) => {
                if self.section_len > 0 {
                    return invalid(position, "Source accepts a single Package or Class element".to_owned());
                };

                let value = attribute(e, "name", position)?;
                self.current.source = Some(if tag == "Package" {
                    SourceMatcher::Package(value)
                } else {
                    SourceMatcher::Class(value)
                });
                self.section_len += 1;
                Element::Matcher
            },
            ("Package", Some(Element::Target)) | ("Class", Some(Element::Target)) => {
                let value = attribute(e, "name", position)?;
                self.current.target.push(if tag == "Package" {
                    TargetMatcher::Package(value)
                } else {
                    TargetMatcher::Class(value)
                });
                self.section_len += 1;
                Element::Matcher
            },
            ("Method", Some(Element::Target)) | ("Field", Some(Element::Target)) => {
                let class_name = attribute(e, "className", position)?;
                let name = attribute(e, "name", position)?;
                self.current.target.push(if tag == "Method" {
                    TargetMatcher::Method { class_name, name }
                } else {
                    TargetMatcher::Field { class_name, name }
                });
                self.section_len += 1;
                Element::Matcher
            },
            ("LinkageCheckerFilter", _)
                | ("LinkageError", _)
                | ("Source", _)
                | ("Target", _)
                | ("Package", _)
                | ("Class", _)
                | ("Method", _)
                | ("Field", _) => {
                return invalid(position, format!("unexpected element {}", tag));
            },
            _ => {
                return invalid(position, format!("unknown element {}", tag));
            }
        };

        self.stack.push(element);
        Result::Ok(())
    }

    fn end(&mut self, position: usize) -> Result<(), ExclusionFileError> {
        match self.stack.pop() {
            Some(Element::Source) | Some(Element::Target) if self.section_len == 0 => {
                invalid(position, "Source and Target need at least one matcher element".to_owned())
            },
            Some(Element::LinkageError) => {
                let rule = std::mem::take(&mut self.current);

                if rule.source.is_none() && rule.target.is_empty() {
                    return invalid(position, "LinkageError needs a Source or a Target".to_owned());
                };

                self.rules.push(rule);
                Result::Ok(())
            },
            Some(_) => Result::Ok(()),
            None => invalid(position, "unbalanced closing element".to_owned())
        }
    }

    fn finish(self, position: usize) -> Result<ExclusionFilter, ExclusionFileError> {
        if !self.stack.is_empty() {
            return invalid(position, format!("{} unclosed elements at end of file", self.stack.len()));
        };

        if !self.seen_filter {
            return invalid(position, "missing LinkageCheckerFilter element".to_owned());
        };

        Result::Ok(ExclusionFilter::new(self.rules))
    }
}
