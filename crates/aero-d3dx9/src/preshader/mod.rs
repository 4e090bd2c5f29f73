//! Preshader programs: the small float bytecode compiled into effects to fold constant math out of
//! shaders and state expressions.
//!
//! A program is decoded and validated once ([`Program::parse`]); evaluation cannot fail.

mod decode;
mod exec;

use crate::ctab::ConstantTable;

/// Version token high half of a preshader program (`FX`).
pub const PRESHADER_VERSION_TAG: u32 = 0x4658;

/// Register table selector of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `f64` literal pool (`CLIT`).
    Literal,
    /// Inputs gathered from effect parameters.
    Input,
    /// Results (shader constants or state value).
    Output,
    /// Scratch registers.
    Temp,
}

impl Table {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Literal,
            2 => Self::Input,
            4 => Self::Output,
            7 => Self::Temp,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Mov,
    Neg,
    Rcp,
    Frc,
    Exp,
    Log,
    Rsq,
    Sin,
    Cos,
    Asin,
    Acos,
    Atan,
    Min,
    Max,
    Lt,
    Ge,
    Add,
    Mul,
    Atan2,
    Div,
    Cmp,
    Movc,
    Dot,
    DotSwiz,
}

impl Opcode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x100 => Self::Mov,
            0x101 => Self::Neg,
            0x103 => Self::Rcp,
            0x104 => Self::Frc,
            0x105 => Self::Exp,
            0x106 => Self::Log,
            0x107 => Self::Rsq,
            0x108 => Self::Sin,
            0x109 => Self::Cos,
            0x10a => Self::Asin,
            0x10b => Self::Acos,
            0x10c => Self::Atan,
            0x200 => Self::Min,
            0x201 => Self::Max,
            0x202 => Self::Lt,
            0x203 => Self::Ge,
            0x204 => Self::Add,
            0x205 => Self::Mul,
            0x206 => Self::Atan2,
            0x208 => Self::Div,
            0x300 => Self::Cmp,
            0x301 => Self::Movc,
            0x500 => Self::Dot,
            0x70e => Self::DotSwiz,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Mov => 0x100,
            Self::Neg => 0x101,
            Self::Rcp => 0x103,
            Self::Frc => 0x104,
            Self::Exp => 0x105,
            Self::Log => 0x106,
            Self::Rsq => 0x107,
            Self::Sin => 0x108,
            Self::Cos => 0x109,
            Self::Asin => 0x10a,
            Self::Acos => 0x10b,
            Self::Atan => 0x10c,
            Self::Min => 0x200,
            Self::Max => 0x201,
            Self::Lt => 0x202,
            Self::Ge => 0x203,
            Self::Add => 0x204,
            Self::Mul => 0x205,
            Self::Atan2 => 0x206,
            Self::Div => 0x208,
            Self::Cmp => 0x300,
            Self::Movc => 0x301,
            Self::Dot => 0x500,
            Self::DotSwiz => 0x70e,
        }
    }

    /// Accepted input operand counts.
    fn arity(self) -> &'static [usize] {
        match self {
            Self::Mov
            | Self::Neg
            | Self::Rcp
            | Self::Frc
            | Self::Exp
            | Self::Log
            | Self::Rsq
            | Self::Sin
            | Self::Cos
            | Self::Asin
            | Self::Acos
            | Self::Atan => &[1],
            Self::Min
            | Self::Max
            | Self::Lt
            | Self::Ge
            | Self::Add
            | Self::Mul
            | Self::Atan2
            | Self::Div
            | Self::Dot => &[2],
            Self::Cmp | Self::Movc => &[3],
            Self::DotSwiz => &[6, 8],
        }
    }

    /// Whether the opcode reduces its lanes into a single output component.
    fn is_reduction(self) -> bool {
        matches!(self, Self::Dot | Self::DotSwiz)
    }
}

/// A register reference, optionally indexed by the value of another register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub table: Table,
    /// Component offset (`register * 4 + component`).
    pub offset: u32,
    /// Relative index source: `(table, component offset)`.
    pub index: Option<(Table, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Input 0 is read from lane 0 for every output component.
    pub scalar: bool,
    pub components: u32,
    pub inputs: Vec<Operand>,
    pub output: Operand,
}

impl Instruction {
    /// Lanes read from input `i`.
    fn input_lanes(&self, i: usize) -> u32 {
        match self.opcode {
            Opcode::DotSwiz => 1,
            Opcode::Dot => self.components,
            _ if self.scalar && i == 0 => 1,
            _ => self.components,
        }
    }

    /// Lanes written to the output.
    fn output_lanes(&self) -> u32 {
        if self.opcode.is_reduction() {
            1
        } else {
            self.components
        }
    }
}

/// A decoded and validated preshader program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    inputs: ConstantTable,
    literals: Vec<f64>,
    instructions: Vec<Instruction>,
    input_len: usize,
    output_len: usize,
    temp_len: usize,
}

impl Program {
    /// Parameters read by the program, with their input register placement.
    pub fn inputs(&self) -> &ConstantTable {
        &self.inputs
    }

    pub fn literals(&self) -> &[f64] {
        &self.literals
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Size of the input table, in float components.
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Size of the output table, in float components (a multiple of 4).
    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Output registers written by at least one instruction, ascending.
    pub fn written_output_registers(&self) -> Vec<u32> {
        let mut regs: Vec<u32> = self
            .instructions
            .iter()
            .filter(|ins| ins.output.table == Table::Output)
            .flat_map(|ins| {
                let first = ins.output.offset / 4;
                let last = (ins.output.offset + ins.output_lanes() - 1) / 4;
                first..=last
            })
            .collect();
        regs.sort_unstable();
        regs.dedup();
        regs
    }
}
