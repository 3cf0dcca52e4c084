use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

bitflags! {
    pub struct ClassFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    pub struct FieldFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    pub struct MethodFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Flags of an `InnerClasses` entry. These carry the source-level access of a nested class, which the class
    /// file's own flags cannot express.
    pub struct InnerClassFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimitiveType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean
}

static PRIMITIVES: [(u8, PrimitiveType, &str); 8] = [
    (b'B', PrimitiveType::Byte, "byte"),
    (b'C', PrimitiveType::Char, "char"),
    (b'D', PrimitiveType::Double, "double"),
    (b'F', PrimitiveType::Float, "float"),
    (b'I', PrimitiveType::Int, "int"),
    (b'J', PrimitiveType::Long, "long"),
    (b'S', PrimitiveType::Short, "short"),
    (b'Z', PrimitiveType::Boolean, "boolean")
];

impl PrimitiveType {
    pub fn from_char(c: u8) -> Option<PrimitiveType> {
        PRIMITIVES.iter().find(|p| p.0 == c).map(|p| p.1)
    }

    fn entry(&self) -> &'static (u8, PrimitiveType, &'static str) {
        // Every variant has exactly one row
        &PRIMITIVES[*self as usize]
    }

    pub fn as_char(&self) -> u8 {
        self.entry().0
    }

    pub fn java_name(&self) -> &'static str {
        self.entry().2
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", char::from(self.as_char()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlatTypeDescriptor {
    Primitive(PrimitiveType),
    Reference(Arc<str>)
}

impl FlatTypeDescriptor {
    pub fn java_name(&self) -> String {
        match *self {
            FlatTypeDescriptor::Primitive(t) => t.java_name().to_owned(),
            FlatTypeDescriptor::Reference(ref name) => name.replace('/', ".")
        }
    }
}

impl fmt::Display for FlatTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FlatTypeDescriptor::Primitive(t) => write!(f, "{}", t),
            FlatTypeDescriptor::Reference(ref name) => write!(f, "L{};", name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeDescriptor {
    pub flat: FlatTypeDescriptor,
    pub array_dims: u8
}

impl TypeDescriptor {
    pub fn parse(s: &str) -> Option<TypeDescriptor> {
        let mut reader = DescriptorReader { s, pos: 0 };
        let t = reader.read_type()?;

        reader.finish(t)
    }

    pub fn java_name(&self) -> String {
        let mut name = self.flat.java_name();

        for _ in 0..self.array_dims {
            name.push_str("[]");
        };

        name
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", "[".repeat(self.array_dims as usize), self.flat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodDescriptor {
    pub return_type: Option<TypeDescriptor>,
    pub param_types: Vec<TypeDescriptor>
}

impl MethodDescriptor {
    pub fn parse(s: &str) -> Option<MethodDescriptor> {
        let mut reader = DescriptorReader { s, pos: 0 };

        reader.expect(b'(')?;

        let mut param_types = vec![];
        while !reader.eat(b')') {
            param_types.push(reader.read_type()?);
        };

        let return_type = if reader.eat(b'V') {
            None
        } else {
            Some(reader.read_type()?)
        };

        reader.finish(MethodDescriptor { return_type, param_types })
    }

    pub fn same_params(&self, other: &MethodDescriptor) -> bool {
        self.param_types == other.param_types
    }

    /// Renders the parameter list the way Java source would spell it, e.g. `(int, java.lang.String[])`.
    pub fn java_params(&self) -> String {
        let params: Vec<_> = self.param_types.iter().map(|p| p.java_name()).collect();
        format!("({})", params.join(", "))
    }

    pub fn java_return_type(&self) -> String {
        self.return_type.as_ref().map_or_else(|| "void".to_owned(), |t| t.java_name())
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;

        for p in self.param_types.iter() {
            write!(f, "{}", p)?;
        };

        match self.return_type {
            Some(ref t) => write!(f, "){}", t),
            None => write!(f, ")V")
        }
    }
}

struct DescriptorReader<'a> {
    s: &'a str,
    pos: usize
}

impl <'a> DescriptorReader<'a> {
    fn peek(&self) -> Option<u8> {
        self.s.as_bytes().get(self.pos).cloned()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Option<()> {
        if self.eat(c) { Some(()) } else { None }
    }

    fn read_type(&mut self) -> Option<TypeDescriptor> {
        let mut array_dims = 0_u8;

        while self.eat(b'[') {
            array_dims = array_dims.checked_add(1)?;
        };

        let flat = if self.eat(b'L') {
            let len = self.s[self.pos..].find(';')?;

            if len == 0 {
                return None;
            };

            let name = Arc::from(&self.s[self.pos..(self.pos + len)]);
            self.pos += len + 1;
            FlatTypeDescriptor::Reference(name)
        } else {
            let t = PrimitiveType::from_char(self.peek()?)?;
            self.pos += 1;
            FlatTypeDescriptor::Primitive(t)
        };

        Some(TypeDescriptor { flat, array_dims })
    }

    fn finish<T>(self, value: T) -> Option<T> {
        if self.pos == self.s.len() { Some(value) } else { None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodHandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface
}

impl MethodHandleKind {
    pub fn from_u8(kind: u8) -> Option<MethodHandleKind> {
        const KINDS: [MethodHandleKind; 9] = [
            MethodHandleKind::GetField,
            MethodHandleKind::GetStatic,
            MethodHandleKind::PutField,
            MethodHandleKind::PutStatic,
            MethodHandleKind::InvokeVirtual,
            MethodHandleKind::InvokeStatic,
            MethodHandleKind::InvokeSpecial,
            MethodHandleKind::NewInvokeSpecial,
            MethodHandleKind::InvokeInterface
        ];

        (kind as usize).checked_sub(1).and_then(|i| KINDS.get(i).cloned())
    }

    pub fn is_static(&self) -> bool {
        matches!(*self, MethodHandleKind::GetStatic | MethodHandleKind::PutStatic | MethodHandleKind::InvokeStatic)
    }

    /// Whether a handle of this kind may point at a member reference of the given kind.
    fn accepts(&self, member: MemberKind) -> bool {
        match member {
            MemberKind::Field => matches!(*self,
                MethodHandleKind::GetField | MethodHandleKind::GetStatic | MethodHandleKind::PutField | MethodHandleKind::PutStatic
            ),
            MemberKind::Method => matches!(*self,
                MethodHandleKind::InvokeVirtual | MethodHandleKind::InvokeStatic | MethodHandleKind::InvokeSpecial | MethodHandleKind::NewInvokeSpecial
            ),
            MemberKind::InterfaceMethod => matches!(*self,
                MethodHandleKind::InvokeInterface | MethodHandleKind::InvokeStatic | MethodHandleKind::InvokeSpecial
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod
}

/// A constant pool slot as stored in the class file. Cross-references stay as indices; `ConstantPool` resolves them
/// on access.
#[derive(Debug, Clone)]
pub enum Constant {
    Utf8(Arc<str>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name: u16 },
    String { value: u16 },
    MemberRef { kind: MemberKind, class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: MethodHandleKind, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
    /// Slot 0 and the slot following a long or double.
    Unusable
}

fn index<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<BigEndian>()
}

impl Constant {
    fn read<R: Read>(r: &mut R, i: u16) -> Result<Constant, ClassFileReadError> {
        let tag = r.read_u8()?;

        Result::Ok(match tag {
            1 => {
                let len = index(r)? as usize;
                let mut data = vec![0; len];

                r.read_exact(&mut data)?;
                let val = cesu8::from_java_cesu8(&data).map_err(|_| ClassFileReadError::InvalidConstantPoolEntry(i))?;

                Constant::Utf8(Arc::from(&*val))
            },
            3 => Constant::Integer(r.read_i32::<BigEndian>()?),
            4 => Constant::Float(r.read_u32::<BigEndian>()?),
            5 => Constant::Long(r.read_i64::<BigEndian>()?),
            6 => Constant::Double(r.read_u64::<BigEndian>()?),
            7 => Constant::Class { name: index(r)? },
            8 => Constant::String { value: index(r)? },
            9 | 10 | 11 => Constant::MemberRef {
                kind: match tag {
                    9 => MemberKind::Field,
                    10 => MemberKind::Method,
                    _ => MemberKind::InterfaceMethod
                },
                class: index(r)?,
                name_and_type: index(r)?
            },
            12 => Constant::NameAndType { name: index(r)?, descriptor: index(r)? },
            15 => {
                let kind = MethodHandleKind::from_u8(r.read_u8()?).ok_or(ClassFileReadError::InvalidConstantPoolEntry(i))?;
                Constant::MethodHandle { kind, reference: r.read_u16::<BigEndian>()? }
            },
            16 => Constant::MethodType { descriptor: index(r)? },
            17 => Constant::Dynamic { bootstrap: index(r)?, name_and_type: index(r)? },
            18 => Constant::InvokeDynamic { bootstrap: index(r)?, name_and_type: index(r)? },
            19 => Constant::Module { name: index(r)? },
            20 => Constant::Package { name: index(r)? },
            _ => {
                return Result::Err(ClassFileReadError::InvalidConstantPoolEntry(i));
            }
        })
    }

    fn is_wide(&self) -> bool {
        matches!(*self, Constant::Long(_) | Constant::Double(_))
    }
}

/// A field or method reference with its names looked up.
#[derive(Debug, Clone, Copy)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class: u16,
    pub class_name: &'a Arc<str>,
    pub name: &'a Arc<str>,
    pub descriptor: &'a Arc<str>
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>
}

impl ConstantPool {
    fn read<R: Read>(r: &mut R) -> Result<ConstantPool, ClassFileReadError> {
        let n = r.read_u16::<BigEndian>()?;
        let mut entries = Vec::with_capacity(n as usize);

        entries.push(Constant::Unusable);

        while entries.len() < n as usize {
            let entry = Constant::read(r, entries.len() as u16)?;
            let wide = entry.is_wide();

            entries.push(entry);
            if wide {
                entries.push(Constant::Unusable);
            };
        };

        // A wide constant in the last slot overflows the declared count
        if entries.len() > n.max(1) as usize {
            return Result::Err(ClassFileReadError::InvalidConstantPoolEntry(n - 1));
        };

        let pool = ConstantPool { entries };
        pool.validate()?;

        Result::Ok(pool)
    }

    /// Checks every cross-reference once so that lookups on a parsed pool only fail for indices taken from outside
    /// the pool.
    fn validate(&self) -> Result<(), ClassFileReadError> {
        for (i, entry) in self.iter() {
            let bad = || ClassFileReadError::InvalidConstantPoolEntry(i);

            match *entry {
                Constant::Class { name } | Constant::Module { name } | Constant::Package { name } => {
                    self.utf8(name).map_err(|_| bad())?;
                },
                Constant::String { value } => {
                    self.utf8(value).map_err(|_| bad())?;
                },
                Constant::NameAndType { name, descriptor } => {
                    self.utf8(name).map_err(|_| bad())?;
                    self.utf8(descriptor).map_err(|_| bad())?;
                },
                Constant::MemberRef { kind, class, name_and_type } => {
                    self.class_name(class).map_err(|_| bad())?;

                    let (_, descriptor) = self.name_and_type(name_and_type).map_err(|_| bad())?;
                    let valid = match kind {
                        MemberKind::Field => TypeDescriptor::parse(descriptor).is_some(),
                        MemberKind::Method | MemberKind::InterfaceMethod => MethodDescriptor::parse(descriptor).is_some()
                    };

                    if !valid {
                        return Result::Err(bad());
                    };
                },
                Constant::MethodHandle { kind, reference } => match self.get(reference) {
                    Some(&Constant::MemberRef { kind: member, .. }) if kind.accepts(member) => {},
                    _ => {
                        return Result::Err(bad());
                    }
                },
                Constant::MethodType { descriptor } => {
                    if MethodDescriptor::parse(self.utf8(descriptor).map_err(|_| bad())?).is_none() {
                        return Result::Err(bad());
                    };
                },
                Constant::Dynamic { name_and_type, .. } => {
                    let (_, descriptor) = self.name_and_type(name_and_type).map_err(|_| bad())?;

                    if TypeDescriptor::parse(descriptor).is_none() {
                        return Result::Err(bad());
                    };
                },
                Constant::InvokeDynamic { name_and_type, .. } => {
                    let (_, descriptor) = self.name_and_type(name_and_type).map_err(|_| bad())?;

                    if MethodDescriptor::parse(descriptor).is_none() {
                        return Result::Err(bad());
                    };
                },
                _ => {}
            };
        };

        Result::Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, i: u16) -> Option<&Constant> {
        self.entries.get(i as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item=(u16, &Constant)> {
        self.entries.iter().enumerate().map(|(i, c)| (i as u16, c))
    }

    pub fn utf8(&self, i: u16) -> Result<&Arc<str>, ClassFileReadError> {
        match self.get(i) {
            Some(&Constant::Utf8(ref val)) => Result::Ok(val),
            _ => Result::Err(ClassFileReadError::InvalidConstantPoolEntry(i))
        }
    }

    pub fn is_class(&self, i: u16) -> bool {
        matches!(self.get(i), Some(&Constant::Class { .. }))
    }

    pub fn class_name(&self, i: u16) -> Result<&Arc<str>, ClassFileReadError> {
        match self.get(i) {
            Some(&Constant::Class { name }) => self.utf8(name),
            _ => Result::Err(ClassFileReadError::InvalidConstantPoolEntry(i))
        }
    }

    pub fn name_and_type(&self, i: u16) -> Result<(&Arc<str>, &Arc<str>), ClassFileReadError> {
        match self.get(i) {
            Some(&Constant::NameAndType { name, descriptor }) => Result::Ok((self.utf8(name)?, self.utf8(descriptor)?)),
            _ => Result::Err(ClassFileReadError::InvalidConstantPoolEntry(i))
        }
    }

    pub fn member_ref(&self, i: u16) -> Result<MemberRef<'_>, ClassFileReadError> {
        match self.get(i) {
            Some(&Constant::MemberRef { kind, class, name_and_type }) => {
                let (name, descriptor) = self.name_and_type(name_and_type)?;

                Result::Ok(MemberRef { kind, class, class_name: self.class_name(class)?, name, descriptor })
            },
            _ => Result::Err(ClassFileReadError::InvalidConstantPoolEntry(i))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Constant pool index of the caught class, 0 for a handler that catches everything.
    pub catch_type: u16
}

#[derive(Debug, Clone)]
pub struct AttributeCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Box<[u8]>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>
}

#[derive(Debug, Clone)]
pub struct InnerClassEntry {
    pub inner_class: Arc<str>,
    pub outer_class: Option<Arc<str>>,
    pub inner_name: Option<Arc<str>>,
    pub flags: InnerClassFlags
}

#[derive(Debug, Clone)]
pub enum AttributeData {
    Code(AttributeCode),
    InnerClasses(Vec<InnerClassEntry>),
    Other(Box<[u8]>)
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Arc<str>,
    pub data: AttributeData
}

/// A field or a method. Both share the same layout in the class file and differ only in their flags and descriptor.
#[derive(Debug, Clone)]
pub struct Member<F, D> {
    pub flags: F,
    pub name: Arc<str>,
    pub descriptor: D,
    pub attributes: Vec<Attribute>
}

pub type Field = Member<FieldFlags, TypeDescriptor>;
pub type Method = Member<MethodFlags, MethodDescriptor>;

impl <F, D> Member<F, D> {
    pub fn code(&self) -> Option<&AttributeCode> {
        self.attributes.iter().find_map(|a| match a.data {
            AttributeData::Code(ref code) => Some(code),
            _ => None
        })
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub version: (u16, u16),
    pub constant_pool: ConstantPool,
    pub flags: ClassFlags,
    pub name: Arc<str>,
    pub super_name: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>
}

impl Class {
    pub fn inner_classes(&self) -> &[InnerClassEntry] {
        self.attributes.iter().find_map(|a| match a.data {
            AttributeData::InnerClasses(ref entries) => Some(&entries[..]),
            _ => None
        }).unwrap_or(&[])
    }
}

#[derive(Debug, Error)]
pub enum ClassFileReadError {
    #[error("truncated or unreadable class file: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported class file version {0}.{1}")]
    UnsupportedVersion(u16, u16),
    #[error("bad magic number")]
    InvalidMagic,
    #[error("invalid constant pool entry #{0}")]
    InvalidConstantPoolEntry(u16),
    #[error("invalid this_class, super_class or interface index")]
    InvalidClassIndex,
    #[error("invalid field #{0}")]
    InvalidField(u16),
    #[error("invalid method #{0}")]
    InvalidMethod(u16),
    #[error("invalid attribute #{0}")]
    InvalidAttribute(u16),
    #[error("invalid bytecode in method #{0} at offset {1}")]
    InvalidCode(u16, usize),
    #[error("{0} bytes of trailing data")]
    TrailingData(usize)
}

/// Reads the members and attributes of a class file against its already parsed constant pool.
struct ClassReader<'a, 'b> {
    pool: &'a ConstantPool,
    r: &'b mut &'a [u8]
}

impl <'a, 'b> ClassReader<'a, 'b> {
    fn u16(&mut self) -> Result<u16, ClassFileReadError> {
        Result::Ok(self.r.read_u16::<BigEndian>()?)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileReadError> {
        if self.r.len() < len {
            return Result::Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        };

        let rest: &'a [u8] = *self.r;
        let (head, tail) = rest.split_at(len);
        *self.r = tail;
        Result::Ok(head)
    }

    fn class_name(&mut self) -> Result<Arc<str>, ClassFileReadError> {
        let i = self.u16()?;
        self.pool.class_name(i).cloned().map_err(|_| ClassFileReadError::InvalidClassIndex)
    }

    fn optional_class_name(&mut self) -> Result<Option<Arc<str>>, ClassFileReadError> {
        match self.u16()? {
            0 => Result::Ok(None),
            i => self.pool.class_name(i).map(|n| Some(n.clone()))
        }
    }

    fn optional_utf8(&mut self) -> Result<Option<Arc<str>>, ClassFileReadError> {
        match self.u16()? {
            0 => Result::Ok(None),
            i => self.pool.utf8(i).map(|n| Some(n.clone()))
        }
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>, ClassFileReadError> {
        let n = self.u16()?;
        (0..n).map(|i| self.attribute(i)).collect()
    }

    fn attribute(&mut self, i: u16) -> Result<Attribute, ClassFileReadError> {
        let invalid = || ClassFileReadError::InvalidAttribute(i);

        let name_index = self.u16()?;
        let name = self.pool.utf8(name_index).map_err(|_| invalid())?.clone();
        let len = self.r.read_u32::<BigEndian>()? as usize;
        let mut body = self.bytes(len)?;

        // Known attributes are decoded from their own slice, so a malformed body can never desynchronize the rest
        // of the class file
        let data = {
            let mut inner = ClassReader { pool: self.pool, r: &mut body };

            match &*name {
                "Code" => AttributeData::Code(inner.code().map_err(|err| match err {
                    ClassFileReadError::Io(_) => invalid(),
                    err => err
                })?),
                "InnerClasses" => AttributeData::InnerClasses(inner.inner_classes().map_err(|_| invalid())?),
                _ => {
                    let raw = Box::from(&inner.r[..]);
                    *inner.r = &[];
                    AttributeData::Other(raw)
                }
            }
        };

        if !body.is_empty() {
            return Result::Err(invalid());
        };

        Result::Ok(Attribute { name, data })
    }

    fn code(&mut self) -> Result<AttributeCode, ClassFileReadError> {
        let max_stack = self.u16()?;
        let max_locals = self.u16()?;
        let code_len = self.r.read_u32::<BigEndian>()? as usize;

        if code_len == 0 || code_len >= 65536 {
            return Result::Err(io::Error::from(io::ErrorKind::InvalidData).into());
        };

        let code = Box::from(self.bytes(code_len)?);

        let n = self.u16()?;
        let mut exception_table = Vec::with_capacity(n as usize);

        for _ in 0..n {
            exception_table.push(ExceptionTableEntry {
                start_pc: self.u16()?,
                end_pc: self.u16()?,
                handler_pc: self.u16()?,
                catch_type: self.u16()?
            });
        };

        Result::Ok(AttributeCode { max_stack, max_locals, code, exception_table, attributes: self.attributes()? })
    }

    fn inner_classes(&mut self) -> Result<Vec<InnerClassEntry>, ClassFileReadError> {
        let n = self.u16()?;
        let mut entries = Vec::with_capacity(n as usize);

        for _ in 0..n {
            entries.push(InnerClassEntry {
                inner_class: self.class_name()?,
                outer_class: self.optional_class_name()?,
                inner_name: self.optional_utf8()?,
                flags: InnerClassFlags::from_bits_truncate(self.u16()?)
            });
        };

        Result::Ok(entries)
    }

    fn members<F, D>(
        &mut self,
        read_flags: fn(u16) -> F,
        parse_descriptor: fn(&str) -> Option<D>,
        invalid: fn(u16) -> ClassFileReadError
    ) -> Result<Vec<Member<F, D>>, ClassFileReadError> {
        let n = self.u16()?;
        let mut members = Vec::with_capacity(n as usize);

        for i in 0..n {
            let flags = read_flags(self.u16()?);

            let name_index = self.u16()?;
            let name = self.pool.utf8(name_index).map_err(|_| invalid(i))?.clone();

            let descriptor_index = self.u16()?;
            let descriptor = self.pool.utf8(descriptor_index).ok()
                .and_then(|d| parse_descriptor(d))
                .ok_or_else(|| invalid(i))?;

            members.push(Member { flags, name, descriptor, attributes: self.attributes()? });
        };

        Result::Ok(members)
    }
}

/// The oldest major version ever produced by javac. Anything newer is read as-is, since the constant pool
/// layout has stayed compatible and new versions must not block symbol extraction.
pub const MIN_MAJOR_VERSION: u16 = 45;

pub fn parse_class_file(bytes: &[u8]) -> Result<Class, ClassFileReadError> {
    let mut r = bytes;

    if r.read_u32::<BigEndian>()? != 0xcafe_babe {
        return Result::Err(ClassFileReadError::InvalidMagic);
    };

    let minor = r.read_u16::<BigEndian>()?;
    let major = r.read_u16::<BigEndian>()?;

    if major < MIN_MAJOR_VERSION {
        return Result::Err(ClassFileReadError::UnsupportedVersion(major, minor));
    };

    let constant_pool = ConstantPool::read(&mut r)?;
    let mut reader = ClassReader { pool: &constant_pool, r: &mut r };

    let flags = ClassFlags::from_bits_truncate(reader.u16()?);
    let name = reader.class_name()?;
    let super_name = reader.optional_class_name().map_err(|_| ClassFileReadError::InvalidClassIndex)?;

    let num_interfaces = reader.u16()?;
    let interfaces = (0..num_interfaces).map(|_| reader.class_name()).collect::<Result<Vec<_>, _>>()?;

    let fields = reader.members(FieldFlags::from_bits_truncate, TypeDescriptor::parse, ClassFileReadError::InvalidField)?;
    let methods = reader.members(MethodFlags::from_bits_truncate, MethodDescriptor::parse, ClassFileReadError::InvalidMethod)?;
    let attributes = reader.attributes()?;

    if !r.is_empty() {
        return Result::Err(ClassFileReadError::TrailingData(r.len()));
    };

    Result::Ok(Class {
        version: (major, minor),
        constant_pool,
        flags,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        attributes
    })
}
