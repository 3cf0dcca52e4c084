use std::collections::{HashMap, HashSet, VecDeque};
use std::iter::FromIterator;
use std::path::PathBuf;
use std::sync::Arc;

use lazy_static::lazy_static;
use smallvec::SmallVec;

use crate::classfile::{ClassFlags, FieldFlags, InnerClassFlags, MethodDescriptor, MethodFlags};
use crate::classpath::{ClassFile, ClassPathEntry};
use crate::problem::{AccessElement, IncompatibleChange, ProblemKind, Visibility};
use crate::symbols::*;

pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

const SIGNATURE_POLYMORPHIC_CLASSES: [&str; 2] = ["java/lang/invoke/MethodHandle", "java/lang/invoke/VarHandle"];

lazy_static! {
    static ref DEFAULT_SYSTEM_PACKAGES: Vec<&'static str> = vec![
        "java/",
        "javax/accessibility/",
        "javax/annotation/processing/",
        "javax/crypto/",
        "javax/imageio/",
        "javax/lang/model/",
        "javax/management/",
        "javax/naming/",
        "javax/net/",
        "javax/print/",
        "javax/rmi/",
        "javax/script/",
        "javax/security/",
        "javax/sound/",
        "javax/sql/",
        "javax/swing/",
        "javax/tools/",
        "javax/transaction/xa/",
        "javax/xml/",
        "jdk/",
        "sun/",
        "com/sun/",
        "org/ietf/jgss/",
        "org/w3c/dom/",
        "org/xml/sax/"
    ];

    static ref RUNTIME_ENTRY: Arc<ClassPathEntry> = Arc::new(ClassPathEntry::new(PathBuf::from("<runtime>"), None));

    static ref BUILTIN_OBJECT: LoadedClass = builtin_object();
}

/// Package prefixes of the classes the Java runtime provides. These are never on the classpath, so references to
/// them are assumed to link unless the classpath itself supplies the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemClasses {
    prefixes: Vec<String>
}

impl SystemClasses {
    /// Accepts prefixes in either dotted (`javax.crypto`) or internal (`javax/crypto/`) form.
    pub fn new<I: IntoIterator<Item=S>, S: AsRef<str>>(prefixes: I) -> SystemClasses {
        let mut system = SystemClasses::none();

        for p in prefixes {
            system.add(p.as_ref());
        };
        system
    }

    pub fn none() -> SystemClasses {
        SystemClasses { prefixes: vec![] }
    }

    pub fn add(&mut self, prefix: &str) {
        let mut prefix = prefix.replace('.', "/");

        if !prefix.ends_with('/') {
            prefix.push('/');
        };

        if !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        };
    }

    pub fn is_system(&self, class_name: &str) -> bool {
        self.prefixes.iter().any(|p| class_name.starts_with(p.as_str()))
    }
}

impl Default for SystemClasses {
    fn default() -> SystemClasses {
        SystemClasses::new(DEFAULT_SYSTEM_PACKAGES.iter())
    }
}

/// A parsed class together with the class file it came from.
#[derive(Debug, Clone)]
pub struct LoadedClass {
    pub file: ClassFile,
    pub symbols: ClassSymbols
}

impl LoadedClass {
    pub fn new(file: ClassFile, symbols: ClassSymbols) -> LoadedClass {
        LoadedClass { file, symbols }
    }
}

fn builtin_object() -> LoadedClass {
    let methods = [
        (MethodFlags::PUBLIC, "<init>", "()V"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL | MethodFlags::NATIVE, "getClass", "()Ljava/lang/Class;"),
        (MethodFlags::PUBLIC | MethodFlags::NATIVE, "hashCode", "()I"),
        (MethodFlags::PUBLIC, "equals", "(Ljava/lang/Object;)Z"),
        (MethodFlags::PROTECTED | MethodFlags::NATIVE, "clone", "()Ljava/lang/Object;"),
        (MethodFlags::PUBLIC, "toString", "()Ljava/lang/String;"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL | MethodFlags::NATIVE, "notify", "()V"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL | MethodFlags::NATIVE, "notifyAll", "()V"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL, "wait", "()V"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL | MethodFlags::NATIVE, "wait", "(J)V"),
        (MethodFlags::PUBLIC | MethodFlags::FINAL, "wait", "(JI)V"),
        (MethodFlags::PROTECTED, "finalize", "()V")
    ];

    let name: Arc<str> = Arc::from(JAVA_LANG_OBJECT);

    LoadedClass {
        file: ClassFile::new(RUNTIME_ENTRY.clone(), name.clone()),
        symbols: ClassSymbols {
            name,
            version: (52, 0),
            flags: ClassFlags::PUBLIC | ClassFlags::SUPER,
            super_class: None,
            interfaces: vec![],
            nest: None,
            methods: methods.iter().filter_map(|&(flags, name, descriptor)| {
                Some(MethodSignature { name: Arc::from(name), descriptor: MethodDescriptor::parse(descriptor)?, flags })
            }).collect(),
            fields: vec![],
            references: vec![],
            catches_linkage_error: false
        }
    }
}

/// The classes a reference can resolve against: for every class name, the definition from the first classpath
/// entry that defines it.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: HashMap<Arc<str>, Arc<LoadedClass>>
}

impl ClassTable {
    pub fn new() -> ClassTable {
        ClassTable::default()
    }

    /// Adds a class unless a class of the same name is already present.
    pub fn insert(&mut self, class: Arc<LoadedClass>) {
        self.classes.entry(class.symbols.name.clone()).or_insert(class);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<LoadedClass>> {
        self.classes.get(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<Arc<LoadedClass>> for ClassTable {
    fn from_iter<I: IntoIterator<Item=Arc<LoadedClass>>>(iter: I) -> ClassTable {
        let mut table = ClassTable::new();

        for class in iter {
            table.insert(class);
        };
        table
    }
}

#[derive(Debug, Clone, Copy)]
enum Lookup<'a> {
    Found(&'a LoadedClass),
    Opaque,
    Missing
}

#[derive(Debug, Clone, Copy)]
pub enum Resolution<'a> {
    /// The symbol links against a declaration in this class.
    Declared(&'a LoadedClass),
    /// The symbol lives in, or may be inherited from, a runtime class or an array type and is not checked.
    Unchecked
}

/// A reference that would fail to link. The symbol is the one the failure is reported against, which is not always
/// the referenced symbol: a member of a class whose superclass is missing reports the superclass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub symbol: Symbol,
    pub kind: ProblemKind
}

enum MethodSearch<'a> {
    Found(&'a LoadedClass, &'a MethodSignature),
    Unchecked,
    NotFound { return_type_mismatch: bool }
}

enum FieldSearch<'a> {
    Found(&'a LoadedClass, &'a FieldSignature),
    Unchecked,
    NotFound
}

fn member_visibility(public: bool, private: bool, protected: bool) -> Option<Visibility> {
    if public {
        None
    } else if private {
        Some(Visibility::Private)
    } else if protected {
        Some(Visibility::Protected)
    } else {
        Some(Visibility::Package)
    }
}

fn site_mismatch(kind: ReferenceKind, is_static: bool) -> Option<IncompatibleChange> {
    match kind {
        ReferenceKind::Static if !is_static => Some(IncompatibleChange::ExpectedStatic),
        ReferenceKind::Instance if is_static => Some(IncompatibleChange::ExpectedInstance),
        _ => None
    }
}

fn is_signature_polymorphic(class: &LoadedClass, method: &MethodSignature) -> bool {
    SIGNATURE_POLYMORPHIC_CLASSES.contains(&&*class.symbols.name)
        && method.flags.contains(MethodFlags::VARARGS | MethodFlags::NATIVE)
}

fn same_package(a: &LoadedClass, b: &LoadedClass) -> bool {
    a.symbols.package() == b.symbols.package()
}

/// Resolves symbol references the way the JVM links them, against a fixed set of classes.
#[derive(Debug, Clone, Copy)]
pub struct SymbolResolver<'a> {
    classes: &'a ClassTable,
    system: &'a SystemClasses
}

impl <'a> SymbolResolver<'a> {
    pub fn new(classes: &'a ClassTable, system: &'a SystemClasses) -> SymbolResolver<'a> {
        SymbolResolver { classes, system }
    }

    fn lookup(&self, name: &str) -> Lookup<'a> {
        if let Some(class) = self.classes.get(name) {
            Lookup::Found(&**class)
        } else if name == JAVA_LANG_OBJECT {
            Lookup::Found(&*BUILTIN_OBJECT)
        } else if self.system.is_system(name) {
            Lookup::Opaque
        } else {
            Lookup::Missing
        }
    }

    pub fn resolve(&self, source: &LoadedClass, reference: &SymbolReference) -> Result<Resolution<'a>, Unresolved> {
        match reference.symbol {
            Symbol::Class(ref s) => self.resolve_class_reference(source, &s.class_name, reference.kind),
            Symbol::Method(ref s) => self.resolve_method(source, s, reference.kind),
            Symbol::Field(ref s) => self.resolve_field(source, s, reference.kind)
        }
    }

    fn resolve_class(&self, source: &LoadedClass, class_name: &Arc<str>) -> Result<Option<&'a LoadedClass>, Unresolved> {
        let name = match element_class_name(class_name) {
            Some(name) => name,
            None => {
                return Result::Ok(None);
            }
        };

        match self.lookup(&name) {
            Lookup::Found(class) => {
                if let Some(visibility) = self.class_access_denied(source, class) {
                    return Result::Err(Unresolved {
                        symbol: Symbol::Class(ClassSymbol { class_name: name }),
                        kind: ProblemKind::AccessDenied {
                            target: class.file.clone(),
                            element: AccessElement::Class,
                            visibility
                        }
                    });
                };

                Result::Ok(Some(class))
            },
            Lookup::Opaque => Result::Ok(None),
            Lookup::Missing => Result::Err(Unresolved {
                symbol: Symbol::Class(ClassSymbol { class_name: name }),
                kind: ProblemKind::ClassNotFound
            })
        }
    }

    fn resolve_class_reference(&self, source: &LoadedClass, class_name: &Arc<str>, kind: ReferenceKind) -> Result<Resolution<'a>, Unresolved> {
        let class = match self.resolve_class(source, class_name)? {
            Some(class) => class,
            None => {
                return Result::Ok(Resolution::Unchecked);
            }
        };

        let change = match kind {
            ReferenceKind::Superclass if class.symbols.is_interface() => Some(IncompatibleChange::ExpectedClass),
            ReferenceKind::Superclass if class.symbols.flags.contains(ClassFlags::FINAL) => {
                Some(IncompatibleChange::FinalSuperclass)
            },
            ReferenceKind::Interface if !class.symbols.is_interface() => Some(IncompatibleChange::ExpectedInterface),
            _ => None
        };

        if let Some(change) = change {
            return Result::Err(Unresolved {
                symbol: Symbol::Class(ClassSymbol { class_name: class_name.clone() }),
                kind: ProblemKind::IncompatibleClassChange { target: class.file.clone(), change }
            });
        };

        Result::Ok(Resolution::Declared(class))
    }

    /// Every superclass and superinterface of `class` has to load before any of its members can link.
    fn check_hierarchy(&self, class: &'a LoadedClass) -> Result<(), Unresolved> {
        let mut visited = HashSet::new();
        let mut worklist = VecDeque::new();

        visited.insert(class.symbols.name.clone());
        worklist.push_back(class);

        while let Some(c) = worklist.pop_front() {
            for parent in c.symbols.super_class.iter().chain(c.symbols.interfaces.iter()) {
                if !visited.insert(parent.clone()) {
                    continue;
                };

                match self.lookup(parent) {
                    Lookup::Found(p) => worklist.push_back(p),
                    Lookup::Opaque => {},
                    Lookup::Missing => {
                        return Result::Err(Unresolved {
                            symbol: Symbol::Class(ClassSymbol { class_name: parent.clone() }),
                            kind: ProblemKind::ClassNotFound
                        });
                    }
                };
            };
        };

        Result::Ok(())
    }

    fn match_method(
        &self,
        class: &'a LoadedClass,
        symbol: &MethodSymbol,
        inherited_from_interface: bool,
        return_type_mismatch: &mut bool
    ) -> Option<&'a MethodSignature> {
        for m in class.symbols.methods.iter() {
            if m.name != symbol.name {
                continue;
            };

            if inherited_from_interface && m.flags.intersects(MethodFlags::STATIC | MethodFlags::PRIVATE) {
                continue;
            };

            if m.descriptor == symbol.descriptor || is_signature_polymorphic(class, m) {
                return Some(m);
            };

            if m.descriptor.same_params(&symbol.descriptor) {
                *return_type_mismatch = true;
            };
        };

        None
    }

    fn find_in_superinterfaces(
        &self,
        mut worklist: VecDeque<Arc<str>>,
        symbol: &MethodSymbol,
        mut return_type_mismatch: bool
    ) -> MethodSearch<'a> {
        let mut visited = HashSet::new();
        let mut opaque = false;

        while let Some(name) = worklist.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            };

            match self.lookup(&name) {
                Lookup::Found(i) => {
                    if let Some(m) = self.match_method(i, symbol, true, &mut return_type_mismatch) {
                        return MethodSearch::Found(i, m);
                    };

                    worklist.extend(i.symbols.interfaces.iter().cloned());
                },
                Lookup::Opaque => {
                    opaque = true;
                },
                Lookup::Missing => {}
            };
        };

        if opaque {
            MethodSearch::Unchecked
        } else {
            MethodSearch::NotFound { return_type_mismatch }
        }
    }

    /// The superclass chain is exhausted before any superinterface is considered.
    fn find_class_method(&self, class: &'a LoadedClass, symbol: &MethodSymbol) -> MethodSearch<'a> {
        let mut return_type_mismatch = false;
        let mut chain: SmallVec<[&'a LoadedClass; 4]> = SmallVec::new();
        let mut visited = HashSet::new();
        let mut next = Some(class);

        while let Some(c) = next {
            if !visited.insert(c.symbols.name.clone()) {
                break;
            };

            if let Some(m) = self.match_method(c, symbol, false, &mut return_type_mismatch) {
                return MethodSearch::Found(c, m);
            };

            chain.push(c);
            next = match c.symbols.super_class {
                Some(ref super_name) => match self.lookup(super_name) {
                    Lookup::Found(s) => Some(s),
                    Lookup::Opaque => {
                        return MethodSearch::Unchecked;
                    },
                    Lookup::Missing => None
                },
                None => None
            };
        };

        let worklist = chain.iter().flat_map(|c| c.symbols.interfaces.iter().cloned()).collect();
        self.find_in_superinterfaces(worklist, symbol, return_type_mismatch)
    }

    fn find_interface_method(&self, interface: &'a LoadedClass, symbol: &MethodSymbol) -> MethodSearch<'a> {
        let mut return_type_mismatch = false;

        if let Some(m) = self.match_method(interface, symbol, false, &mut return_type_mismatch) {
            return MethodSearch::Found(interface, m);
        };

        if let Lookup::Found(object) = self.lookup(JAVA_LANG_OBJECT) {
            if let Some(m) = self.match_method(object, symbol, false, &mut return_type_mismatch) {
                if m.flags.contains(MethodFlags::PUBLIC) && !m.flags.contains(MethodFlags::STATIC) {
                    return MethodSearch::Found(object, m);
                };
            };
        };

        let worklist = interface.symbols.interfaces.iter().cloned().collect();
        self.find_in_superinterfaces(worklist, symbol, return_type_mismatch)
    }

    fn resolve_method(&self, source: &LoadedClass, symbol: &MethodSymbol, kind: ReferenceKind) -> Result<Resolution<'a>, Unresolved> {
        if symbol.class_name.starts_with('[') {
            return Result::Ok(Resolution::Unchecked);
        };

        let class = match self.resolve_class(source, &symbol.class_name)? {
            Some(class) => class,
            None => {
                return Result::Ok(Resolution::Unchecked);
            }
        };

        let failure = |kind| Unresolved { symbol: Symbol::Method(symbol.clone()), kind };

        if symbol.interface != class.symbols.is_interface() {
            let change = if symbol.interface {
                IncompatibleChange::ExpectedInterface
            } else {
                IncompatibleChange::ExpectedClass
            };

            return Result::Err(failure(ProblemKind::IncompatibleClassChange { target: class.file.clone(), change }));
        };

        self.check_hierarchy(class)?;

        let search = if class.symbols.is_interface() {
            self.find_interface_method(class, symbol)
        } else {
            self.find_class_method(class, symbol)
        };

        let (declaring, method) = match search {
            MethodSearch::Found(declaring, method) => (declaring, method),
            MethodSearch::Unchecked => {
                return Result::Ok(Resolution::Unchecked);
            },
            MethodSearch::NotFound { return_type_mismatch } => {
                return Result::Err(failure(ProblemKind::MethodNotFound { target: class.file.clone(), return_type_mismatch }));
            }
        };

        if let Some(change) = site_mismatch(kind, method.flags.contains(MethodFlags::STATIC)) {
            return Result::Err(failure(ProblemKind::IncompatibleClassChange { target: class.file.clone(), change }));
        };

        let visibility = member_visibility(
            method.flags.contains(MethodFlags::PUBLIC),
            method.flags.contains(MethodFlags::PRIVATE),
            method.flags.contains(MethodFlags::PROTECTED)
        );

        if let Some(visibility) = self.member_access_denied(source, declaring, visibility) {
            return Result::Err(failure(ProblemKind::AccessDenied {
                target: class.file.clone(),
                element: AccessElement::Member,
                visibility
            }));
        };

        Result::Ok(Resolution::Declared(declaring))
    }

    /// Field lookup visits the class, then its superinterfaces depth first, then its superclass. Only static fields
    /// are inherited from interfaces.
    fn find_field(&self, class: &'a LoadedClass, symbol: &FieldSymbol) -> FieldSearch<'a> {
        let mut visited = HashSet::new();
        let mut stack = vec![class];
        let mut opaque = false;

        while let Some(c) = stack.pop() {
            if !visited.insert(c.symbols.name.clone()) {
                continue;
            };

            if let Some(f) = c.symbols.find_field(&symbol.name, &symbol.descriptor) {
                if !c.symbols.is_interface() || f.flags.contains(FieldFlags::STATIC) {
                    return FieldSearch::Found(c, f);
                };
            };

            for parent in c.symbols.super_class.iter().chain(c.symbols.interfaces.iter().rev()) {
                match self.lookup(parent) {
                    Lookup::Found(p) => stack.push(p),
                    Lookup::Opaque => {
                        opaque = true;
                    },
                    Lookup::Missing => {}
                };
            };
        };

        if opaque {
            FieldSearch::Unchecked
        } else {
            FieldSearch::NotFound
        }
    }

    fn resolve_field(&self, source: &LoadedClass, symbol: &FieldSymbol, kind: ReferenceKind) -> Result<Resolution<'a>, Unresolved> {
        if symbol.class_name.starts_with('[') {
            return Result::Ok(Resolution::Unchecked);
        };

        let class = match self.resolve_class(source, &symbol.class_name)? {
            Some(class) => class,
            None => {
                return Result::Ok(Resolution::Unchecked);
            }
        };

        let failure = |kind| Unresolved { symbol: Symbol::Field(symbol.clone()), kind };

        self.check_hierarchy(class)?;

        let (declaring, field) = match self.find_field(class, symbol) {
            FieldSearch::Found(declaring, field) => (declaring, field),
            FieldSearch::Unchecked => {
                return Result::Ok(Resolution::Unchecked);
            },
            FieldSearch::NotFound => {
                return Result::Err(failure(ProblemKind::FieldNotFound { target: class.file.clone() }));
            }
        };

        if let Some(change) = site_mismatch(kind, field.flags.contains(FieldFlags::STATIC)) {
            return Result::Err(failure(ProblemKind::IncompatibleClassChange { target: class.file.clone(), change }));
        };

        let visibility = member_visibility(
            field.flags.contains(FieldFlags::PUBLIC),
            field.flags.contains(FieldFlags::PRIVATE),
            field.flags.contains(FieldFlags::PROTECTED)
        );

        if let Some(visibility) = self.member_access_denied(source, declaring, visibility) {
            return Result::Err(failure(ProblemKind::AccessDenied {
                target: class.file.clone(),
                element: AccessElement::Member,
                visibility
            }));
        };

        Result::Ok(Resolution::Declared(declaring))
    }

    /// The top-level class enclosing `class`, following `InnerClasses` outward and falling back to the binary name
    /// for local and anonymous classes.
    fn outermost(&self, class: &LoadedClass) -> Arc<str> {
        let mut name = class.symbols.name.clone();
        let mut outer = class.symbols.nest.as_ref().and_then(|n| n.outer_class.clone());
        let mut visited = HashSet::new();

        while let Some(o) = outer {
            if !visited.insert(o.clone()) {
                break;
            };

            outer = match self.lookup(&o) {
                Lookup::Found(c) => c.symbols.nest.as_ref().and_then(|n| n.outer_class.clone()),
                _ => None
            };
            name = o;
        };

        let top = top_level_name(&name);

        if top.len() == name.len() {
            name
        } else {
            Arc::from(top)
        }
    }

    fn is_subclass_of(&self, class: &LoadedClass, ancestor: &str) -> bool {
        let mut visited = HashSet::new();
        let mut next = class.symbols.super_class.clone();

        while let Some(name) = next {
            if &*name == ancestor {
                return true;
            };

            if !visited.insert(name.clone()) {
                break;
            };

            next = match self.lookup(&name) {
                Lookup::Found(c) => c.symbols.super_class.clone(),
                _ => None
            };
        };

        false
    }

    fn class_access_denied(&self, source: &LoadedClass, target: &'a LoadedClass) -> Option<Visibility> {
        if self.outermost(source) == self.outermost(target) {
            return None;
        };

        let mut target = target;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(target.symbols.name.clone()) {
                return None;
            };

            let nest = match target.symbols.nest {
                Some(ref nest) => nest,
                None => {
                    return if target.symbols.flags.contains(ClassFlags::PUBLIC) || same_package(source, target) {
                        None
                    } else {
                        Some(Visibility::Package)
                    };
                }
            };

            if nest.flags.contains(InnerClassFlags::PRIVATE) {
                return Some(Visibility::Private);
            };

            if !nest.flags.contains(InnerClassFlags::PUBLIC) && !same_package(source, target) {
                return Some(Visibility::Package);
            };

            target = match nest.outer_class.as_ref().map(|o| self.lookup(o)) {
                Some(Lookup::Found(outer)) => outer,
                _ => {
                    return None;
                }
            };
        }
    }

    fn member_access_denied(&self, source: &LoadedClass, declaring: &LoadedClass, visibility: Option<Visibility>) -> Option<Visibility> {
        let allowed = match visibility {
            None => true,
            Some(Visibility::Private) => self.outermost(source) == self.outermost(declaring),
            Some(Visibility::Protected) => {
                same_package(source, declaring) || self.is_subclass_of(source, &declaring.symbols.name)
            },
            Some(Visibility::Package) => same_package(source, declaring)
        };

        if allowed {
            None
        } else {
            visibility
        }
    }
}
