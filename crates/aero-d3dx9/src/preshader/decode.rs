use crate::ctab::{parse_constant_table, ConstantTable};
use crate::error::ParseError;
use crate::reader::{comment_blocks, fourcc, read_bytes, read_u32_le, Cursor};

use super::{Instruction, Opcode, Operand, Program, Table, PRESHADER_VERSION_TAG};

const END_TOKEN: u32 = 0x0000_FFFF;

const CTAB: u32 = fourcc(b"CTAB");
const CLIT: u32 = fourcc(b"CLIT");
const FXLC: u32 = fourcc(b"FXLC");
const PRSI: u32 = fourcc(b"PRSI");

const SCALAR_BIT: u32 = 1 << 31;
const OPCODE_SHIFT: u32 = 20;
const OPCODE_MASK: u32 = 0x7FF;
const COMPONENT_MASK: u32 = 0xFFFF;

/// Output and temp tables are capped at the device's 256 float4 constant registers.
const MAX_WRITABLE_COMPONENTS: usize = 256 * 4;

impl Program {
    /// Decodes a preshader token stream and validates every operand against the table sizes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let version = read_u32_le(bytes, 0, "preshader version")?;
        if version >> 16 != PRESHADER_VERSION_TAG {
            return Err(ParseError::invalid(format!(
                "bad preshader version token {version:#010x}"
            )));
        }

        let (blocks, end) = comment_blocks(bytes, 4)?;
        if end < bytes.len() {
            let token = read_u32_le(bytes, end, "preshader end token")?;
            if token != END_TOKEN {
                return Err(ParseError::invalid(format!(
                    "unexpected preshader token {token:#010x} at offset {end}"
                )));
            }
        }

        let mut inputs = ConstantTable::default();
        let mut literals = Vec::new();
        let mut code = None;
        for block in blocks {
            match block.fourcc {
                CTAB => inputs = parse_constant_table(block.body)?,
                CLIT => literals = parse_literals(block.body)?,
                FXLC => code = Some(block.body),
                PRSI => {}
                other => {
                    tracing::debug!(fourcc = other, "skipping unknown preshader comment block");
                }
            }
        }
        let code = code.ok_or_else(|| ParseError::invalid("preshader has no FXLC block"))?;

        let mut program = Program {
            input_len: inputs.float_components(),
            inputs,
            literals,
            instructions: Vec::new(),
            output_len: 0,
            temp_len: 0,
        };
        program.instructions = decode_instructions(code)?;
        program.validate()?;
        Ok(program)
    }

    fn validate(&mut self) -> Result<(), ParseError> {
        let mut output_len = 0usize;
        let mut temp_len = 0usize;

        for (n, ins) in self.instructions.iter().enumerate() {
            if !ins.opcode.arity().contains(&ins.inputs.len()) {
                return Err(ParseError::invalid(format!(
                    "instruction {n}: {:?} takes {:?} inputs, got {}",
                    ins.opcode,
                    ins.opcode.arity(),
                    ins.inputs.len()
                )));
            }
            let max_components = if ins.opcode == Opcode::DotSwiz { 1 } else { 4 };
            if ins.components == 0 || ins.components > max_components {
                return Err(ParseError::invalid(format!(
                    "instruction {n}: invalid component count {}",
                    ins.components
                )));
            }

            for (i, input) in ins.inputs.iter().enumerate() {
                let lanes = ins.input_lanes(i) as usize;
                self.check_read(n, input, lanes, &mut output_len, &mut temp_len)?;
            }

            let out = ins.output;
            if out.index.is_some() {
                return Err(ParseError::invalid(format!(
                    "instruction {n}: relative addressing on an output operand"
                )));
            }
            let end = out.offset as usize + ins.output_lanes() as usize;
            match out.table {
                Table::Output => output_len = output_len.max(end),
                Table::Temp => temp_len = temp_len.max(end),
                Table::Literal | Table::Input => {
                    return Err(ParseError::invalid(format!(
                        "instruction {n}: writes to read-only {:?} table",
                        out.table
                    )))
                }
            }
        }

        for (table, len) in [(Table::Output, output_len), (Table::Temp, temp_len)] {
            if len > MAX_WRITABLE_COMPONENTS {
                return Err(ParseError::invalid(format!(
                    "{table:?} table needs {len} components, limit is {MAX_WRITABLE_COMPONENTS}"
                )));
            }
        }

        self.output_len = output_len.div_ceil(4) * 4;
        self.temp_len = temp_len;
        Ok(())
    }

    fn check_read(
        &self,
        n: usize,
        operand: &Operand,
        lanes: usize,
        output_len: &mut usize,
        temp_len: &mut usize,
    ) -> Result<(), ParseError> {
        if let Some((table, offset)) = operand.index {
            self.check_static(n, table, offset as usize + 1, output_len, temp_len)?;
            // Relative reads are bounds-checked at evaluation time.
            return Ok(());
        }
        self.check_static(n, operand.table, operand.offset as usize + lanes, output_len, temp_len)
    }

    fn check_static(
        &self,
        n: usize,
        table: Table,
        end: usize,
        output_len: &mut usize,
        temp_len: &mut usize,
    ) -> Result<(), ParseError> {
        let limit = match table {
            Table::Literal => self.literals.len(),
            Table::Input => self.input_len,
            Table::Output => {
                *output_len = (*output_len).max(end);
                return Ok(());
            }
            Table::Temp => {
                *temp_len = (*temp_len).max(end);
                return Ok(());
            }
        };
        if end > limit {
            return Err(ParseError::invalid(format!(
                "instruction {n}: {table:?} read ends at component {end}, table has {limit}"
            )));
        }
        Ok(())
    }
}

fn parse_literals(body: &[u8]) -> Result<Vec<f64>, ParseError> {
    let count = read_u32_le(body, 0, "literal count")? as usize;
    let len = count
        .checked_mul(8)
        .ok_or_else(|| ParseError::invalid("literal count overflows"))?;
    let raw = read_bytes(body, 4, len, "literal pool")?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

fn decode_instructions(body: &[u8]) -> Result<Vec<Instruction>, ParseError> {
    let mut cur = Cursor::new(body, 0);
    let count = cur.read_u32("instruction count")? as usize;
    // Smallest instruction: token, input count, one input and the output (2 dwords each).
    if count.saturating_mul(24) > body.len() {
        return Err(ParseError::invalid(format!(
            "instruction count {count} cannot fit in {} bytes",
            body.len()
        )));
    }

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let token = cur.read_u32("instruction token")?;
        let raw_opcode = (token >> OPCODE_SHIFT) & OPCODE_MASK;
        let opcode = Opcode::from_raw(raw_opcode).ok_or_else(|| {
            ParseError::invalid(format!("unknown preshader opcode {raw_opcode:#x}"))
        })?;
        let input_count = cur.read_u32("instruction input count")? as usize;
        if input_count > 8 {
            return Err(ParseError::invalid(format!(
                "{opcode:?} has {input_count} inputs"
            )));
        }
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(decode_operand(&mut cur)?);
        }
        let output = decode_operand(&mut cur)?;
        out.push(Instruction {
            opcode,
            scalar: token & SCALAR_BIT != 0,
            components: token & COMPONENT_MASK,
            inputs,
            output,
        });
    }
    Ok(out)
}

fn decode_table(raw: u32) -> Result<Table, ParseError> {
    Table::from_raw(raw).ok_or_else(|| ParseError::invalid(format!("unknown register table {raw}")))
}

fn decode_operand(cur: &mut Cursor<'_>) -> Result<Operand, ParseError> {
    let index = match cur.read_u32("operand index flag")? {
        0 => None,
        1 => {
            let table = decode_table(cur.read_u32("operand index table")?)?;
            let offset = cur.read_u32("operand index offset")?;
            Some((table, offset))
        }
        other => {
            return Err(ParseError::invalid(format!(
                "bad operand index flag {other}"
            )))
        }
    };
    let table = decode_table(cur.read_u32("operand table")?)?;
    let offset = cur.read_u32("operand offset")?;
    if offset > u32::MAX / 2 {
        return Err(ParseError::invalid(format!("operand offset {offset} out of range")));
    }
    Ok(Operand {
        table,
        offset,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ProgramBuilder, Reg};

    #[test]
    fn decodes_literals_and_instructions() {
        let bytes = ProgramBuilder::new()
            .literals(&[2.0, 0.5])
            .input_float4("g", 0, 1)
            .op(Opcode::Mul, 4, &[Reg::lit(0).scalar(), Reg::input(0)], Reg::out(0))
            .build();
        let program = Program::parse(&bytes).unwrap();
        assert_eq!(program.literals(), &[2.0, 0.5]);
        assert_eq!(program.instructions().len(), 1);
        assert_eq!(program.input_len(), 4);
        assert_eq!(program.output_len(), 4);
        assert_eq!(program.written_output_registers(), vec![0]);
        assert_eq!(program.inputs().constants[0].name, "g");
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 1, &[Reg::lit(0)], Reg::out(0))
            .build();
        // Patch the instruction token (first dword after the FXLC count) to opcode 0x7ff.
        let fxlc = bytes
            .windows(4)
            .position(|w| w == b"FXLC")
            .unwrap();
        let token_at = fxlc + 8;
        bytes[token_at..token_at + 4].copy_from_slice(&((0x7FFu32 << 20) | 1).to_le_bytes());
        let err = Program::parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("opcode"), "{err}");
    }

    #[test]
    fn rejects_literal_read_past_pool() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0, 2.0])
            .op(Opcode::Mov, 4, &[Reg::lit(0)], Reg::out(0))
            .build();
        assert!(Program::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_input_read_without_ctab_entry() {
        let bytes = ProgramBuilder::new()
            .op(Opcode::Mov, 1, &[Reg::input(4)], Reg::out(0))
            .build();
        assert!(Program::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_write_to_literal_table() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 1, &[Reg::lit(0)], Reg::lit(0))
            .build();
        assert!(Program::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_arity_mismatch() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Add, 1, &[Reg::lit(0)], Reg::out(0))
            .build();
        assert!(Program::parse(&bytes).is_err());
    }

    #[test]
    fn relative_input_reads_skip_static_bounds() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .input_float4("arr", 0, 2)
            .op(
                Opcode::Mov,
                4,
                &[Reg::input(0).indexed(Table::Literal, 0)],
                Reg::temp(0),
            )
            .op(Opcode::Mov, 4, &[Reg::temp(0)], Reg::out(4))
            .build();
        let program = Program::parse(&bytes).unwrap();
        assert_eq!(program.output_len(), 8);
        assert_eq!(program.written_output_registers(), vec![1]);
    }

    #[test]
    fn rejects_writes_past_the_register_file() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 1, &[Reg::lit(0)], Reg::out(0x7FFF_FFF0))
            .build();
        let err = Program::parse(&bytes).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)), "{err}");

        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 1, &[Reg::lit(0)], Reg::temp(1024))
            .build();
        assert!(Program::parse(&bytes).is_err());

        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 4, &[Reg::lit(0).scalar()], Reg::out(1020))
            .build();
        assert_eq!(Program::parse(&bytes).unwrap().output_len(), 1024);
    }

    #[test]
    fn truncated_program_is_rejected() {
        let bytes = ProgramBuilder::new()
            .literals(&[1.0])
            .op(Opcode::Mov, 1, &[Reg::lit(0)], Reg::out(0))
            .build();
        for len in 0..bytes.len() - 4 {
            assert!(Program::parse(&bytes[..len]).is_err(), "len {len}");
        }
    }
}
