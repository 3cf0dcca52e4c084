use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::bytecode::{BytecodeInstruction, BytecodeIterator, ConstantRefOp};
use crate::classfile::*;

/// Converts an internal binary name (`com/example/Foo$Bar`) to the dotted form used in reports.
pub fn java_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Package part of an internal binary name, empty for the default package.
pub fn package_of(name: &str) -> &str {
    match name.rfind('/') {
        Some(i) => &name[..i],
        None => ""
    }
}

/// Strips the nested part of a binary name (`a/Outer$Inner` gives `a/Outer`). Only a `$` inside the simple name
/// that is not its first character separates a nested class, so names like `a/$Proxy1` are top-level.
pub fn top_level_name(name: &str) -> &str {
    let simple_start = name.rfind('/').map_or(0, |i| i + 1);

    match name[simple_start..].find('$') {
        Some(i) if i > 0 => &name[..(simple_start + i)],
        _ => name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassSymbol {
    pub class_name: Arc<str>
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodSymbol {
    pub class_name: Arc<str>,
    pub name: Arc<str>,
    pub descriptor: MethodDescriptor,
    pub interface: bool
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSymbol {
    pub class_name: Arc<str>,
    pub name: Arc<str>,
    pub descriptor: TypeDescriptor
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    Class(ClassSymbol),
    Method(MethodSymbol),
    Field(FieldSymbol)
}

impl Symbol {
    pub fn class(class_name: &str) -> Symbol {
        Symbol::Class(ClassSymbol { class_name: Arc::from(class_name) })
    }

    pub fn method(class_name: &str, name: &str, descriptor: &str, interface: bool) -> Option<Symbol> {
        Some(Symbol::Method(MethodSymbol {
            class_name: Arc::from(class_name),
            name: Arc::from(name),
            descriptor: MethodDescriptor::parse(descriptor)?,
            interface
        }))
    }

    pub fn field(class_name: &str, name: &str, descriptor: &str) -> Option<Symbol> {
        Some(Symbol::Field(FieldSymbol {
            class_name: Arc::from(class_name),
            name: Arc::from(name),
            descriptor: TypeDescriptor::parse(descriptor)?
        }))
    }

    /// The class the symbol is declared in, or expected to be declared in.
    pub fn class_name(&self) -> &Arc<str> {
        match *self {
            Symbol::Class(ref s) => &s.class_name,
            Symbol::Method(ref s) => &s.class_name,
            Symbol::Field(ref s) => &s.class_name
        }
    }

    pub fn member_name(&self) -> Option<&Arc<str>> {
        match *self {
            Symbol::Class(_) => None,
            Symbol::Method(ref s) => Some(&s.name),
            Symbol::Field(ref s) => Some(&s.name)
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Symbol::Class(ref s) => write!(f, "Class {}", java_name(&s.class_name)),
            Symbol::Method(ref s) if &*s.name == "<init>" => {
                write!(f, "{}'s constructor {}", java_name(&s.class_name), s.descriptor.java_params())
            },
            Symbol::Method(ref s) => {
                write!(
                    f,
                    "{}'s method {} {}{}",
                    java_name(&s.class_name),
                    s.descriptor.java_return_type(),
                    s.name,
                    s.descriptor.java_params()
                )
            },
            Symbol::Field(ref s) => write!(f, "{}'s field {}", java_name(&s.class_name), s.name)
        }
    }
}

/// How the referencing site uses the symbol. Class references carry where the class appeared, member references
/// carry whether they were reached through a static or an instance access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceKind {
    Constant,
    Superclass,
    Interface,
    Static,
    Instance,
    Unspecified
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolReference {
    pub symbol: Symbol,
    pub kind: ReferenceKind
}

#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: Arc<str>,
    pub descriptor: MethodDescriptor,
    pub flags: MethodFlags
}

#[derive(Debug, Clone)]
pub struct FieldSignature {
    pub name: Arc<str>,
    pub descriptor: TypeDescriptor,
    pub flags: FieldFlags
}

/// What the `InnerClasses` attribute says about the class itself when it is a nested class.
#[derive(Debug, Clone)]
pub struct NestInfo {
    pub flags: InnerClassFlags,
    pub outer_class: Option<Arc<str>>
}

/// The symbol table of one class file.
#[derive(Debug, Clone)]
pub struct ClassSymbols {
    pub name: Arc<str>,
    pub version: (u16, u16),
    pub flags: ClassFlags,
    pub super_class: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub nest: Option<NestInfo>,
    pub methods: Vec<MethodSignature>,
    pub fields: Vec<FieldSignature>,
    pub references: Vec<SymbolReference>,
    pub catches_linkage_error: bool
}

const LINKAGE_ERROR_CLASSES: [&str; 2] = ["java/lang/NoClassDefFoundError", "java/lang/LinkageError"];

pub fn parse(bytes: &[u8]) -> Result<ClassSymbols, ClassFileReadError> {
    ClassSymbols::extract(&parse_class_file(bytes)?)
}

/// Reduces an array class name to its element class. `None` for arrays of primitives.
pub fn element_class_name(name: &Arc<str>) -> Option<Arc<str>> {
    if name.starts_with('[') {
        match TypeDescriptor::parse(name) {
            Some(TypeDescriptor { flat: FlatTypeDescriptor::Reference(elem), .. }) => Some(elem),
            _ => None
        }
    } else {
        Some(name.clone())
    }
}

struct Extractor<'a> {
    pool: &'a ConstantPool,
    class_uses: BTreeSet<u16>,
    member_kinds: HashMap<u16, SmallVec<[ReferenceKind; 2]>>,
    catches_linkage_error: bool
}

impl <'a> Extractor<'a> {
    fn use_class(&mut self, i: u16) -> Result<(), ClassFileReadError> {
        self.pool.class_name(i)?;
        self.class_uses.insert(i);
        Result::Ok(())
    }

    fn use_member(&mut self, i: u16, kind: ReferenceKind) -> Result<(), ClassFileReadError> {
        let class = self.pool.member_ref(i)?.class;

        let kinds = self.member_kinds.entry(i).or_insert_with(SmallVec::new);
        if !kinds.contains(&kind) {
            kinds.push(kind);
        };

        self.use_class(class)
    }

    fn scan_code(&mut self, method_index: u16, code: &AttributeCode) -> Result<(), ClassFileReadError> {
        for (off, instr) in BytecodeIterator::for_code(code) {
            let (op, i) = match instr {
                Result::Ok(BytecodeInstruction::ConstantRef(op, i)) => (op, i),
                Result::Ok(BytecodeInstruction::Other(_)) => continue,
                Result::Err(err_off) => {
                    return Result::Err(ClassFileReadError::InvalidCode(method_index, err_off.max(off)));
                }
            };

            match op {
                ConstantRefOp::New
                    | ConstantRefOp::CheckCast
                    | ConstantRefOp::InstanceOf
                    | ConstantRefOp::ANewArray
                    | ConstantRefOp::MultiANewArray => {
                    self.use_class(i)?;
                },
                // Only class literals among the loadable constants name a class
                ConstantRefOp::Ldc => {
                    if self.pool.is_class(i) {
                        self.class_uses.insert(i);
                    };
                },
                ConstantRefOp::InvokeDynamic => {},
                op if op.is_static_access() => {
                    self.use_member(i, ReferenceKind::Static)?;
                },
                _ => {
                    self.use_member(i, ReferenceKind::Instance)?;
                }
            };
        };

        for handler in code.exception_table.iter().filter(|h| h.catch_type != 0) {
            self.use_class(handler.catch_type)?;

            if LINKAGE_ERROR_CLASSES.contains(&&**self.pool.class_name(handler.catch_type)?) {
                self.catches_linkage_error = true;
            };
        };

        Result::Ok(())
    }

    fn scan_method_handles(&mut self) -> Result<(), ClassFileReadError> {
        let pool = self.pool;

        for (_, entry) in pool.iter() {
            if let Constant::MethodHandle { kind, reference } = *entry {
                let kind = if kind.is_static() {
                    ReferenceKind::Static
                } else {
                    ReferenceKind::Instance
                };

                self.use_member(reference, kind)?;
            };
        };

        Result::Ok(())
    }
}

fn member_symbol(pool: &ConstantPool, i: u16) -> Result<Symbol, ClassFileReadError> {
    let r = pool.member_ref(i)?;

    let symbol = match r.kind {
        MemberKind::Field => Symbol::field(r.class_name, r.name, r.descriptor),
        MemberKind::Method => Symbol::method(r.class_name, r.name, r.descriptor, false),
        MemberKind::InterfaceMethod => Symbol::method(r.class_name, r.name, r.descriptor, true)
    };

    symbol.ok_or(ClassFileReadError::InvalidConstantPoolEntry(i))
}

impl ClassSymbols {
    pub fn extract(class: &Class) -> Result<ClassSymbols, ClassFileReadError> {
        let pool = &class.constant_pool;
        let name = class.name.clone();
        let super_class = class.super_name.clone();
        let interfaces = class.interfaces.clone();

        let mut extractor = Extractor {
            pool,
            class_uses: BTreeSet::new(),
            member_kinds: HashMap::new(),
            catches_linkage_error: false
        };

        for (i, m) in class.methods.iter().enumerate() {
            if let Some(code) = m.code() {
                extractor.scan_code(i as u16, code)?;
            };
        };
        extractor.scan_method_handles()?;

        let mut references = vec![];

        if let Some(ref super_class) = super_class {
            references.push(SymbolReference {
                symbol: Symbol::Class(ClassSymbol { class_name: super_class.clone() }),
                kind: ReferenceKind::Superclass
            });
        };

        for i in interfaces.iter() {
            references.push(SymbolReference {
                symbol: Symbol::Class(ClassSymbol { class_name: i.clone() }),
                kind: ReferenceKind::Interface
            });
        };

        for &i in extractor.class_uses.iter() {
            let class_name = match element_class_name(pool.class_name(i)?) {
                Some(class_name) => class_name,
                None => continue
            };

            if class_name == name || Some(&class_name) == super_class.as_ref() || interfaces.contains(&class_name) {
                continue;
            };

            references.push(SymbolReference {
                symbol: Symbol::Class(ClassSymbol { class_name }),
                kind: ReferenceKind::Constant
            });
        };

        // Member references that no instruction or handle uses are still linked if anything resolves them
        // reflectively, so they are kept without a usage site
        for (i, entry) in pool.iter() {
            if let Constant::MemberRef { .. } = *entry {
                let symbol = member_symbol(pool, i)?;

                match extractor.member_kinds.get(&i) {
                    Some(kinds) => {
                        for &kind in kinds.iter() {
                            references.push(SymbolReference { symbol: symbol.clone(), kind });
                        };
                    },
                    None => {
                        references.push(SymbolReference { symbol, kind: ReferenceKind::Unspecified });
                    }
                };
            };
        };

        references.sort();
        references.dedup();

        let nest = class.inner_classes().iter()
            .find(|e| e.inner_class == name)
            .map(|e| NestInfo { flags: e.flags, outer_class: e.outer_class.clone() });

        Result::Ok(ClassSymbols {
            name,
            version: class.version,
            flags: class.flags,
            super_class,
            interfaces,
            nest,
            methods: class.methods.iter().map(|m| MethodSignature {
                name: m.name.clone(),
                descriptor: m.descriptor.clone(),
                flags: m.flags
            }).collect(),
            fields: class.fields.iter().map(|f| FieldSignature {
                name: f.name.clone(),
                descriptor: f.descriptor.clone(),
                flags: f.flags
            }).collect(),
            references,
            catches_linkage_error: extractor.catches_linkage_error
        })
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    pub fn package(&self) -> &str {
        package_of(&self.name)
    }

    pub fn find_method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<&MethodSignature> {
        self.methods.iter().find(|m| &*m.name == name && m.descriptor == *descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &TypeDescriptor) -> Option<&FieldSignature> {
        self.fields.iter().find(|f| &*f.name == name && f.descriptor == *descriptor)
    }

    pub fn referenced_classes(&self) -> impl Iterator<Item=&Arc<str>> {
        self.references.iter().filter_map(|r| match r.symbol {
            Symbol::Class(ref s) => Some(&s.class_name),
            _ => None
        })
    }
}
