use byteorder::{BigEndian, ByteOrder};

use crate::classfile::AttributeCode;

/// The instructions whose operand names a constant pool entry that the JVM links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantRefOp {
    ANewArray,
    CheckCast,
    GetField,
    GetStatic,
    InstanceOf,
    InvokeDynamic,
    InvokeInterface,
    InvokeSpecial,
    InvokeStatic,
    InvokeVirtual,
    Ldc,
    MultiANewArray,
    New,
    PutField,
    PutStatic
}

impl ConstantRefOp {
    pub fn is_static_access(&self) -> bool {
        match *self {
            ConstantRefOp::GetStatic | ConstantRefOp::PutStatic | ConstantRefOp::InvokeStatic => true,
            _ => false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeInstruction {
    ConstantRef(ConstantRefOp, u16),
    Other(u8)
}

fn read_u8(bytecode: &[u8], off: usize) -> Result<u8, usize> {
    if off < bytecode.len() {
        Result::Ok(bytecode[off])
    } else {
        Result::Err(bytecode.len())
    }
}

fn read_u16(bytecode: &[u8], off: usize) -> Result<u16, usize> {
    if off + 2 <= bytecode.len() {
        Result::Ok(BigEndian::read_u16(&bytecode[off..]))
    } else {
        Result::Err(bytecode.len())
    }
}

fn read_u32(bytecode: &[u8], off: usize) -> Result<u32, usize> {
    if off + 4 <= bytecode.len() {
        Result::Ok(BigEndian::read_u32(&bytecode[off..]))
    } else {
        Result::Err(bytecode.len())
    }
}

fn read_cp_op(bytecode: &[u8], off: usize, op: ConstantRefOp, len: usize) -> Result<(BytecodeInstruction, usize), usize> {
    Result::Ok((BytecodeInstruction::ConstantRef(op, read_u16(bytecode, off + 1)?), len))
}

fn read_switch(bytecode: &[u8], off: usize, table: bool) -> Result<usize, usize> {
    let pad = (4 - ((off + 1) & 0x3)) & 0x3;

    let len = if table {
        let lo = read_u32(bytecode, off + pad + 5)? as i32;
        let hi = read_u32(bytecode, off + pad + 9)? as i32;

        if hi < lo {
            return Result::Err(off);
        };

        pad + 13 + ((hi as i64 - lo as i64 + 1) as usize * 4)
    } else {
        let npairs = read_u32(bytecode, off + pad + 5)? as i32;

        if npairs < 0 {
            return Result::Err(off);
        };

        pad + 9 + (npairs as usize * 8)
    };

    if off + len > bytecode.len() {
        return Result::Err(bytecode.len());
    };

    Result::Ok(len)
}

fn read_op(bytecode: &[u8], off: usize) -> Result<(BytecodeInstruction, usize), usize> {
    let opcode = read_u8(bytecode, off)?;

    Result::Ok(match opcode {
        0xbd => read_cp_op(bytecode, off, ConstantRefOp::ANewArray, 3)?,
        0xc0 => read_cp_op(bytecode, off, ConstantRefOp::CheckCast, 3)?,
        0xb4 => read_cp_op(bytecode, off, ConstantRefOp::GetField, 3)?,
        0xb2 => read_cp_op(bytecode, off, ConstantRefOp::GetStatic, 3)?,
        0xc1 => read_cp_op(bytecode, off, ConstantRefOp::InstanceOf, 3)?,
        0xba => {
            read_u16(bytecode, off + 3)?;
            read_cp_op(bytecode, off, ConstantRefOp::InvokeDynamic, 5)?
        },
        0xb9 => {
            read_u16(bytecode, off + 3)?;
            read_cp_op(bytecode, off, ConstantRefOp::InvokeInterface, 5)?
        },
        0xb7 => read_cp_op(bytecode, off, ConstantRefOp::InvokeSpecial, 3)?,
        0xb8 => read_cp_op(bytecode, off, ConstantRefOp::InvokeStatic, 3)?,
        0xb6 => read_cp_op(bytecode, off, ConstantRefOp::InvokeVirtual, 3)?,
        0x12 => (BytecodeInstruction::ConstantRef(ConstantRefOp::Ldc, read_u8(bytecode, off + 1)? as u16), 2),
        0x13 | 0x14 => read_cp_op(bytecode, off, ConstantRefOp::Ldc, 3)?,
        0xc5 => {
            read_u8(bytecode, off + 3)?;
            read_cp_op(bytecode, off, ConstantRefOp::MultiANewArray, 4)?
        },
        0xbb => read_cp_op(bytecode, off, ConstantRefOp::New, 3)?,
        0xb5 => read_cp_op(bytecode, off, ConstantRefOp::PutField, 3)?,
        0xb3 => read_cp_op(bytecode, off, ConstantRefOp::PutStatic, 3)?,

        // bipush, the local variable loads and stores, ret and newarray
        0x10 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => {
            read_u8(bytecode, off + 1)?;
            (BytecodeInstruction::Other(opcode), 2)
        },
        // sipush, iinc and the 16-bit branches
        0x11 | 0x84 | 0x99..=0xa8 | 0xc6 | 0xc7 => {
            read_u16(bytecode, off + 1)?;
            (BytecodeInstruction::Other(opcode), 3)
        },
        // goto_w and jsr_w
        0xc8 | 0xc9 => {
            read_u32(bytecode, off + 1)?;
            (BytecodeInstruction::Other(opcode), 5)
        },
        0xaa => (BytecodeInstruction::Other(opcode), read_switch(bytecode, off, true)?),
        0xab => (BytecodeInstruction::Other(opcode), read_switch(bytecode, off, false)?),
        0xc4 => match read_u8(bytecode, off + 1)? {
            0x84 => {
                read_u32(bytecode, off + 2)?;
                (BytecodeInstruction::Other(opcode), 6)
            },
            0x15..=0x19 | 0x36..=0x3a | 0xa9 => {
                read_u16(bytecode, off + 2)?;
                (BytecodeInstruction::Other(opcode), 4)
            },
            _ => {
                return Result::Err(off + 1);
            }
        },
        0x00..=0xca | 0xfe | 0xff => (BytecodeInstruction::Other(opcode), 1),
        _ => {
            return Result::Err(off);
        }
    })
}

/// Walks the instructions of a method body. A malformed instruction yields the offset at which decoding failed and
/// ends the iteration.
#[derive(Debug, Clone, Copy)]
pub struct BytecodeIterator<'a> {
    code: &'a [u8],
    pos: usize
}

impl <'a> BytecodeIterator<'a> {
    pub fn new(code: &'a [u8]) -> BytecodeIterator<'a> {
        BytecodeIterator { code, pos: 0 }
    }

    pub fn for_code(code: &'a AttributeCode) -> BytecodeIterator<'a> {
        BytecodeIterator::new(&code.code)
    }
}

impl <'a> Iterator for BytecodeIterator<'a> {
    type Item = (usize, Result<BytecodeInstruction, usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.code.len() {
            return None;
        };

        let start = self.pos;
        let decoded = read_op(self.code, start);

        self.pos = match decoded {
            Result::Ok((_, len)) => start + len,
            Result::Err(_) => self.code.len()
        };

        Some((start, decoded.map(|(instr, _)| instr)))
    }
}
