use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use zip::write::{FileOptions, ZipWriter};

use crate::classfile::{ClassFlags, FieldFlags, InnerClassFlags, MethodFlags};
use crate::classpath::{Artifact, ClassPathEntry};

pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const GETSTATIC: u8 = 0xb2;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const NEW: u8 = 0xbb;
pub const CHECKCAST: u8 = 0xc0;
pub const ANEWARRAY: u8 = 0xbd;

/// Method body assembled one instruction at a time.
#[derive(Debug, Clone, Default)]
pub struct Code {
    bytes: Vec<u8>,
    exception_table: Vec<(u16, u16, u16, u16)>
}

impl Code {
    pub fn new() -> Code {
        Code::default()
    }

    pub fn op(mut self, opcode: u8) -> Code {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u16(mut self, opcode: u8, index: u16) -> Code {
        self.bytes.push(opcode);
        self.bytes.write_u16::<BigEndian>(index).unwrap();
        self
    }

    pub fn invoke_interface(mut self, index: u16, count: u8) -> Code {
        self = self.op_u16(0xb9, index);
        self.bytes.push(count);
        self.bytes.push(0);
        self
    }

    pub fn ldc(mut self, index: u8) -> Code {
        self.bytes.push(0x12);
        self.bytes.push(index);
        self
    }

    pub fn catch(mut self, catch_type: u16) -> Code {
        let end = self.bytes.len().max(1) as u16;
        self.exception_table.push((0, end, 0, catch_type));
        self
    }
}

/// Assembles class files byte by byte so tests can describe exactly the constant pool they need.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    version: (u16, u16),
    flags: ClassFlags,
    constant_pool: Vec<Vec<u8>>,
    interned: HashMap<Vec<u8>, u16>,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    inner_classes: Vec<(u16, u16, u16, u16)>,
    inner_classes_name: u16
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> ClassBuilder {
        let mut b = ClassBuilder {
            version: (52, 0),
            flags: ClassFlags::PUBLIC | ClassFlags::SUPER,
            constant_pool: vec![],
            interned: HashMap::new(),
            this_class: 0,
            super_class: 0,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            inner_classes: vec![],
            inner_classes_name: 0
        };

        b.this_class = b.class_ref(name);
        b.super_class = super_name.map_or(0, |s| b.class_ref(s));
        b
    }

    pub fn interface_class(name: &str, super_interfaces: &[&str]) -> ClassBuilder {
        let mut b = ClassBuilder::new(name, Some("java/lang/Object"));
        b.flags(ClassFlags::PUBLIC | ClassFlags::INTERFACE | ClassFlags::ABSTRACT);

        for i in super_interfaces {
            b.interface(i);
        };
        b
    }

    fn intern(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(&i) = self.interned.get(&entry) {
            return i;
        };

        self.constant_pool.push(entry.clone());
        let i = self.constant_pool.len() as u16;
        self.interned.insert(entry, i);
        i
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let data = cesu8::to_java_cesu8(s);
        let mut entry = vec![1];

        entry.write_u16::<BigEndian>(data.len() as u16).unwrap();
        entry.extend_from_slice(&data);
        self.intern(entry)
    }

    fn ref_entry(&mut self, tag: u8, a: u16, b: u16) -> u16 {
        let mut entry = vec![tag];

        entry.write_u16::<BigEndian>(a).unwrap();
        entry.write_u16::<BigEndian>(b).unwrap();
        self.intern(entry)
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        let mut entry = vec![7];

        entry.write_u16::<BigEndian>(name).unwrap();
        self.intern(entry)
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let s = self.utf8(s);
        let mut entry = vec![8];

        entry.write_u16::<BigEndian>(s).unwrap();
        self.intern(entry)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.ref_entry(12, name, descriptor)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_ref(class);
        let nt = self.name_and_type(name, descriptor);
        self.ref_entry(9, class, nt)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_ref(class);
        let nt = self.name_and_type(name, descriptor);
        self.ref_entry(10, class, nt)
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_ref(class);
        let nt = self.name_and_type(name, descriptor);
        self.ref_entry(11, class, nt)
    }

    pub fn method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        let mut entry = vec![15, kind];

        entry.write_u16::<BigEndian>(reference).unwrap();
        self.intern(entry)
    }

    pub fn flags(&mut self, flags: ClassFlags) -> &mut ClassBuilder {
        self.flags = flags;
        self
    }

    pub fn version(&mut self, major: u16, minor: u16) -> &mut ClassBuilder {
        self.version = (major, minor);
        self
    }

    pub fn interface(&mut self, name: &str) -> &mut ClassBuilder {
        let i = self.class_ref(name);
        self.interfaces.push(i);
        self
    }

    pub fn field(&mut self, flags: FieldFlags, name: &str, descriptor: &str) -> &mut ClassBuilder {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut data = vec![];

        data.write_u16::<BigEndian>(flags.bits()).unwrap();
        data.write_u16::<BigEndian>(name).unwrap();
        data.write_u16::<BigEndian>(descriptor).unwrap();
        data.write_u16::<BigEndian>(0).unwrap();
        self.fields.push(data);
        self
    }

    pub fn method(&mut self, flags: MethodFlags, name: &str, descriptor: &str, code: Option<Code>) -> &mut ClassBuilder {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut data = vec![];

        data.write_u16::<BigEndian>(flags.bits()).unwrap();
        data.write_u16::<BigEndian>(name).unwrap();
        data.write_u16::<BigEndian>(descriptor).unwrap();

        if let Some(code) = code {
            let code_name = self.utf8("Code");
            let len = 2 + 2 + 4 + code.bytes.len() + 2 + 8 * code.exception_table.len() + 2;

            data.write_u16::<BigEndian>(1).unwrap();
            data.write_u16::<BigEndian>(code_name).unwrap();
            data.write_u32::<BigEndian>(len as u32).unwrap();
            data.write_u16::<BigEndian>(8).unwrap();
            data.write_u16::<BigEndian>(8).unwrap();
            data.write_u32::<BigEndian>(code.bytes.len() as u32).unwrap();
            data.extend_from_slice(&code.bytes);
            data.write_u16::<BigEndian>(code.exception_table.len() as u16).unwrap();

            for &(start, end, handler, catch_type) in code.exception_table.iter() {
                data.write_u16::<BigEndian>(start).unwrap();
                data.write_u16::<BigEndian>(end).unwrap();
                data.write_u16::<BigEndian>(handler).unwrap();
                data.write_u16::<BigEndian>(catch_type).unwrap();
            };

            data.write_u16::<BigEndian>(0).unwrap();
        } else {
            data.write_u16::<BigEndian>(0).unwrap();
        };

        self.methods.push(data);
        self
    }

    pub fn inner_class(&mut self, inner: &str, outer: Option<&str>, simple_name: Option<&str>, flags: InnerClassFlags) -> &mut ClassBuilder {
        self.inner_classes_name = self.utf8("InnerClasses");

        let inner = self.class_ref(inner);
        let outer = outer.map_or(0, |o| self.class_ref(o));
        let simple_name = simple_name.map_or(0, |n| self.utf8(n));

        self.inner_classes.push((inner, outer, simple_name, flags.bits()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![];

        out.write_u32::<BigEndian>(0xcafebabe).unwrap();
        out.write_u16::<BigEndian>(self.version.1).unwrap();
        out.write_u16::<BigEndian>(self.version.0).unwrap();
        out.write_u16::<BigEndian>(self.constant_pool.len() as u16 + 1).unwrap();

        for entry in self.constant_pool.iter() {
            out.extend_from_slice(entry);
        };

        out.write_u16::<BigEndian>(self.flags.bits()).unwrap();
        out.write_u16::<BigEndian>(self.this_class).unwrap();
        out.write_u16::<BigEndian>(self.super_class).unwrap();
        out.write_u16::<BigEndian>(self.interfaces.len() as u16).unwrap();

        for &i in self.interfaces.iter() {
            out.write_u16::<BigEndian>(i).unwrap();
        };

        out.write_u16::<BigEndian>(self.fields.len() as u16).unwrap();
        for f in self.fields.iter() {
            out.extend_from_slice(f);
        };

        out.write_u16::<BigEndian>(self.methods.len() as u16).unwrap();
        for m in self.methods.iter() {
            out.extend_from_slice(m);
        };

        if self.inner_classes.is_empty() {
            out.write_u16::<BigEndian>(0).unwrap();
        } else {
            out.write_u16::<BigEndian>(1).unwrap();
            out.write_u16::<BigEndian>(self.inner_classes_name).unwrap();
            out.write_u32::<BigEndian>(2 + 8 * self.inner_classes.len() as u32).unwrap();
            out.write_u16::<BigEndian>(self.inner_classes.len() as u16).unwrap();

            for &(inner, outer, simple_name, flags) in self.inner_classes.iter() {
                out.write_u16::<BigEndian>(inner).unwrap();
                out.write_u16::<BigEndian>(outer).unwrap();
                out.write_u16::<BigEndian>(simple_name).unwrap();
                out.write_u16::<BigEndian>(flags).unwrap();
            };
        };

        out
    }
}

/// A public class with a public no-argument constructor and nothing else.
pub fn simple_class(name: &str) -> Vec<u8> {
    let mut b = ClassBuilder::new(name, Some("java/lang/Object"));
    b.method(MethodFlags::PUBLIC, "<init>", "()V", None);
    b.build()
}

/// A public class with one public static method `run()V` that executes `code`. `setup` registers whatever
/// constant pool entries the code needs and returns the finished code.
pub fn class_calling(name: &str, setup: impl FnOnce(&mut ClassBuilder) -> Code) -> Vec<u8> {
    let mut b = ClassBuilder::new(name, Some("java/lang/Object"));
    let code = setup(&mut b).op(0xb1);

    b.method(MethodFlags::PUBLIC | MethodFlags::STATIC, "run", "()V", Some(code));
    b.build()
}

pub fn write_jar(dir: &Path, file_name: &str, classes: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join(file_name);
    let mut zip = ZipWriter::new(File::create(&path).unwrap());

    for (name, bytes) in classes.iter() {
        zip.start_file(format!("{}.class", name), FileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    };

    zip.finish().unwrap();
    path
}

pub fn write_class_dir(dir: &Path, dir_name: &str, classes: &[(&str, Vec<u8>)]) -> PathBuf {
    let root = dir.join(dir_name);

    for (name, bytes) in classes.iter() {
        let path = root.join(format!("{}.class", name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
    };

    root
}

pub fn jar_entry(dir: &Path, coordinates: &str, classes: &[(&str, Vec<u8>)]) -> Arc<ClassPathEntry> {
    let file_name = format!("{}.jar", coordinates.replace(':', "-"));
    let path = write_jar(dir, &file_name, classes);

    Arc::new(ClassPathEntry::new(path, Some(Artifact::parse(coordinates).unwrap())))
}
