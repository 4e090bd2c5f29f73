use tracing::trace;

use super::{Instruction, Opcode, Operand, Program, Table};

/// Register files for one evaluation. Literals stay in `f64`; everything else is stored as `f32`.
struct Registers<'a> {
    literals: &'a [f64],
    inputs: &'a [f32],
    outputs: &'a mut [f32],
    temps: Vec<f32>,
}

impl Registers<'_> {
    fn load(&self, table: Table, offset: usize) -> Option<f64> {
        match table {
            Table::Literal => self.literals.get(offset).copied(),
            Table::Input => self.inputs.get(offset).map(|&v| f64::from(v)),
            Table::Output => self.outputs.get(offset).map(|&v| f64::from(v)),
            Table::Temp => self.temps.get(offset).map(|&v| f64::from(v)),
        }
    }

    fn read(&self, operand: &Operand, lane: u32) -> f64 {
        let base = match operand.index {
            None => operand.offset as usize,
            Some((table, offset)) => {
                let index = self.load(table, offset as usize).unwrap_or(0.0).round_ties_even();
                let reg_offset = index * 4.0 + f64::from(operand.offset);
                if !(0.0..(usize::MAX / 2) as f64).contains(&reg_offset) {
                    trace!(index, "relative preshader read out of range");
                    return 0.0;
                }
                reg_offset as usize
            }
        };
        match self.load(operand.table, base + lane as usize) {
            Some(v) => v,
            None => {
                trace!(table = ?operand.table, offset = base + lane as usize, "relative preshader read out of range");
                0.0
            }
        }
    }

    fn write(&mut self, operand: &Operand, lane: u32, value: f64) {
        let slot = operand.offset as usize + lane as usize;
        // Validation sized the output and temp tables to cover every static write.
        let target = match operand.table {
            Table::Output => self.outputs.get_mut(slot),
            Table::Temp => self.temps.get_mut(slot),
            Table::Literal | Table::Input => None,
        };
        if let Some(target) = target {
            *target = value as f32;
        }
    }
}

fn unary(op: Opcode, a: f64) -> f64 {
    match op {
        Opcode::Mov => a,
        Opcode::Neg => -a,
        Opcode::Rcp => 1.0 / a,
        Opcode::Frc => a - a.floor(),
        Opcode::Exp => a.exp2(),
        Opcode::Log => {
            let v = a.abs();
            if v == 0.0 {
                f64::NEG_INFINITY
            } else {
                v.log2()
            }
        }
        Opcode::Rsq => {
            let v = a.abs();
            if v == 0.0 {
                f64::INFINITY
            } else {
                1.0 / v.sqrt()
            }
        }
        Opcode::Sin => a.sin(),
        Opcode::Cos => a.cos(),
        Opcode::Asin => a.asin(),
        Opcode::Acos => a.acos(),
        Opcode::Atan => a.atan(),
        _ => f64::NAN,
    }
}

fn binary(op: Opcode, a: f64, b: f64) -> f64 {
    match op {
        Opcode::Min => {
            if b < a {
                b
            } else {
                a
            }
        }
        Opcode::Max => {
            if b > a {
                b
            } else {
                a
            }
        }
        Opcode::Lt => {
            if a < b {
                1.0
            } else {
                0.0
            }
        }
        Opcode::Ge => {
            if a >= b {
                1.0
            } else {
                0.0
            }
        }
        Opcode::Add => a + b,
        Opcode::Mul => a * b,
        Opcode::Atan2 => a.atan2(b),
        Opcode::Div => a / b,
        _ => f64::NAN,
    }
}

fn ternary(op: Opcode, a: f64, b: f64, c: f64) -> f64 {
    match op {
        Opcode::Cmp => {
            if a >= 0.0 {
                b
            } else {
                c
            }
        }
        Opcode::Movc => {
            if a != 0.0 {
                b
            } else {
                c
            }
        }
        _ => f64::NAN,
    }
}

fn execute(regs: &mut Registers<'_>, ins: &Instruction) {
    match ins.opcode {
        Opcode::Dot => {
            let sum = (0..ins.components)
                .map(|lane| regs.read(&ins.inputs[0], lane) * regs.read(&ins.inputs[1], lane))
                .sum();
            regs.write(&ins.output, 0, sum);
        }
        Opcode::DotSwiz => {
            let half = ins.inputs.len() / 2;
            let sum = (0..half)
                .map(|i| regs.read(&ins.inputs[i], 0) * regs.read(&ins.inputs[i + half], 0))
                .sum();
            regs.write(&ins.output, 0, sum);
        }
        op => {
            // Components are computed and stored one at a time; a later lane may observe an
            // earlier lane's result when input and output overlap.
            for lane in 0..ins.components {
                let arg = |i: usize| {
                    let l = if ins.scalar && i == 0 { 0 } else { lane };
                    regs.read(&ins.inputs[i], l)
                };
                let value = match ins.inputs.len() {
                    1 => unary(op, arg(0)),
                    2 => binary(op, arg(0), arg(1)),
                    _ => ternary(op, arg(0), arg(1), arg(2)),
                };
                regs.write(&ins.output, lane, value);
            }
        }
    }
}

impl Program {
    /// Runs the program over `inputs`, writing into `outputs`.
    ///
    /// `inputs` shorter than [`Program::input_len`] read as zero past the end; `outputs` must
    /// hold [`Program::output_len`] components to receive every result.
    pub fn evaluate(&self, inputs: &[f32], outputs: &mut [f32]) {
        let mut regs = Registers {
            literals: &self.literals,
            inputs,
            outputs,
            temps: vec![0.0; self.temp_len],
        };
        for ins in &self.instructions {
            execute(&mut regs, ins);
        }
    }

    /// Convenience wrapper returning a freshly allocated output table.
    pub fn run(&self, inputs: &[f32]) -> Vec<f32> {
        let mut outputs = vec![0.0; self.output_len];
        self.evaluate(inputs, &mut outputs);
        outputs
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_utils::{ProgramBuilder, Reg};

    fn program(builder: ProgramBuilder) -> Program {
        Program::parse(&builder.build()).unwrap()
    }

    #[test]
    fn rcp_follows_ieee_division() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("x", 0, 1)
                .op(Opcode::Rcp, 4, &[Reg::input(0)], Reg::out(0)),
        );
        let out = p.run(&[0.0, -0.0, f32::INFINITY, f32::NAN]);
        assert_eq!(out[0], f32::INFINITY);
        assert_eq!(out[1], f32::NEG_INFINITY);
        assert_eq!(out[2].to_bits(), 0.0f32.to_bits());
        assert!(out[3].is_nan());
    }

    #[test]
    fn rsq_and_log_of_zero() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("x", 0, 1)
                .op(Opcode::Rsq, 2, &[Reg::input(0)], Reg::out(0))
                .op(Opcode::Log, 2, &[Reg::input(0)], Reg::out(2)),
        );
        let out = p.run(&[0.0, 4.0, 0.0, 0.0]);
        assert_eq!(out[0], f32::INFINITY);
        assert_eq!(out[1], 0.5);
        assert_eq!(out[2], f32::NEG_INFINITY);
        assert_eq!(out[3], 2.0);
    }

    #[test]
    fn zero_times_infinity_is_nan_and_subnormals_survive() {
        let tiny = f32::from_bits(1);
        let p = program(
            ProgramBuilder::new()
                .input_float4("x", 0, 1)
                .literals(&[1.0])
                .op(Opcode::Mul, 1, &[Reg::input(0), Reg::input(1)], Reg::out(0))
                .op(Opcode::Mul, 1, &[Reg::input(2), Reg::lit(0)], Reg::out(1)),
        );
        let out = p.run(&[0.0, f32::INFINITY, tiny, 0.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[1].to_bits(), 1);
    }

    #[test]
    fn comparisons_and_selects() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("a", 0, 1)
                .input_float4("b", 1, 1)
                .op(Opcode::Lt, 4, &[Reg::input(0), Reg::input(4)], Reg::out(0))
                .op(Opcode::Ge, 4, &[Reg::input(0), Reg::input(4)], Reg::out(4))
                .op(
                    Opcode::Cmp,
                    4,
                    &[Reg::input(0), Reg::input(4), Reg::input(0)],
                    Reg::out(8),
                ),
        );
        let out = p.run(&[1.0, 2.0, -3.0, 0.0, 2.0, 2.0, 2.0, 2.0]);
        assert_eq!(&out[0..4], &[1.0, 0.0, 1.0, 1.0]);
        assert_eq!(&out[4..8], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(&out[8..12], &[2.0, 2.0, -3.0, 2.0]);
    }

    #[test]
    fn min_max_keep_first_operand_on_nan() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("a", 0, 1)
                .op(Opcode::Min, 1, &[Reg::input(0), Reg::input(1)], Reg::out(0))
                .op(Opcode::Max, 1, &[Reg::input(0), Reg::input(1)], Reg::out(1))
                .op(Opcode::Min, 1, &[Reg::input(1), Reg::input(0)], Reg::out(2))
                .op(Opcode::Max, 1, &[Reg::input(1), Reg::input(0)], Reg::out(3))
                .op(Opcode::Min, 1, &[Reg::input(1), Reg::input(2)], Reg::out(4))
                .op(Opcode::Max, 1, &[Reg::input(2), Reg::input(1)], Reg::out(5)),
        );
        let out = p.run(&[f32::NAN, 3.0, -1.0, 0.0]);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(out[2], 3.0);
        assert_eq!(out[3], 3.0);
        assert_eq!(out[4], -1.0);
        assert_eq!(out[5], 3.0);
    }

    #[test]
    fn scalar_flag_broadcasts_first_input() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("v", 0, 1)
                .literals(&[10.0])
                .op(Opcode::Mul, 4, &[Reg::lit(0).scalar(), Reg::input(0)], Reg::out(0)),
        );
        assert_eq!(p.run(&[1.0, 2.0, 3.0, 4.0]), vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn dot_and_swizzled_dot() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("a", 0, 1)
                .input_float4("b", 1, 1)
                .op(Opcode::Dot, 3, &[Reg::input(0), Reg::input(4)], Reg::out(0))
                .op(
                    Opcode::DotSwiz,
                    1,
                    // dot(a.zx, b.xy) padded to three lanes with a zero product.
                    &[
                        Reg::input(2),
                        Reg::input(0),
                        Reg::input(3),
                        Reg::input(4),
                        Reg::input(5),
                        Reg::input(3),
                    ],
                    Reg::out(1),
                ),
        );
        let out = p.run(&[1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(out[0], 1.0 * 4.0 + 2.0 * 5.0 + 3.0 * 6.0);
        assert_eq!(out[1], 3.0 * 4.0 + 1.0 * 5.0);
    }

    #[test]
    fn relative_addressing_rounds_half_even_and_zeroes_out_of_range() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("idx", 0, 1)
                .input_float4("arr", 1, 3)
                .op(
                    Opcode::Mov,
                    1,
                    &[Reg::input(4).indexed(Table::Input, 0)],
                    Reg::out(0),
                )
                .op(
                    Opcode::Mov,
                    1,
                    &[Reg::input(4).indexed(Table::Input, 1)],
                    Reg::out(1),
                )
                .op(
                    Opcode::Mov,
                    1,
                    &[Reg::input(4).indexed(Table::Input, 2)],
                    Reg::out(2),
                ),
        );
        let mut inputs = vec![0.0f32; 16];
        inputs[0] = 0.5; // rounds to 0
        inputs[1] = 1.5; // rounds to 2
        inputs[2] = 7.0; // past the table
        inputs[4] = 100.0;
        inputs[8] = 200.0;
        inputs[12] = 300.0;
        let out = p.run(&inputs);
        assert_eq!(&out[0..3], &[100.0, 300.0, 0.0]);
    }

    #[test]
    fn overlapping_lanes_see_earlier_results() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("v", 0, 1)
                .op(Opcode::Mov, 4, &[Reg::input(0)], Reg::temp(0))
                .op(Opcode::Mov, 3, &[Reg::temp(0)], Reg::temp(1))
                .op(Opcode::Mov, 4, &[Reg::temp(0)], Reg::out(0)),
        );
        assert_eq!(p.run(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let p = program(
            ProgramBuilder::new()
                .input_float4("v", 0, 1)
                .literals(&[0.1])
                .op(Opcode::Sin, 4, &[Reg::input(0)], Reg::temp(0))
                .op(Opcode::Exp, 4, &[Reg::temp(0)], Reg::temp(4))
                .op(Opcode::Mul, 4, &[Reg::lit(0).scalar(), Reg::temp(4)], Reg::out(0)),
        );
        let inputs = [0.3, -1.7, 1e-30, 42.0];
        let first: Vec<u32> = p.run(&inputs).iter().map(|v| v.to_bits()).collect();
        let second: Vec<u32> = p.run(&inputs).iter().map(|v| v.to_bits()).collect();
        assert_eq!(first, second);
    }
}
