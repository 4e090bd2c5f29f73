//! Lays parameter values out into shader constant registers.
//!
//! Used both for uploading a shader's constant table and for filling preshader input tables.
//! Scalars and vectors take one register per element; matrices take one register per row, or per
//! column when the constant table declares the constant column-major.

use crate::coerce::{self, Number};
use crate::ctab::{ConstantDesc, RegisterSet};
use crate::param::ParamTree;
use crate::types::{ParamHandle, ParameterClass};

/// Register contents before conversion to the register set's element type.
type Register = [Number; 4];

const ZERO: Register = [Number::Int(0); 4];

fn push_leaf(tree: &ParamTree, h: ParamHandle, column_major: bool, out: &mut Vec<Register>) {
    let Some(n) = tree.get(h) else { return };
    if !n.is_leaf() {
        for &m in &n.members {
            push_leaf(tree, m, column_major, out);
        }
        return;
    }
    if !n.class.is_numeric() {
        return;
    }
    let words = tree.words(h);
    let value = |r: u32, c: u32| {
        words
            .get((r * n.columns + c) as usize)
            .map_or(Number::Int(0), |w| coerce::read(n.ty, *w))
    };
    let is_matrix = matches!(n.class, ParameterClass::MatrixRows | ParameterClass::MatrixColumns);
    if is_matrix && column_major {
        for c in 0..n.columns {
            let mut reg = ZERO;
            for r in 0..n.rows.min(4) {
                reg[r as usize] = value(r, c);
            }
            out.push(reg);
        }
    } else {
        for r in 0..n.rows {
            let mut reg = ZERO;
            for c in 0..n.columns.min(4) {
                reg[c as usize] = value(r, c);
            }
            out.push(reg);
        }
    }
}

/// Registers for `h` as described by `desc`, padded or truncated to `desc.register_count`.
fn registers(tree: &ParamTree, h: ParamHandle, desc: &ConstantDesc) -> Vec<Register> {
    let column_major = desc.class == Some(ParameterClass::MatrixColumns);
    let mut regs = Vec::new();
    push_leaf(tree, h, column_major, &mut regs);
    regs.resize(desc.register_count as usize, ZERO);
    regs
}

pub(crate) fn float_registers(tree: &ParamTree, h: ParamHandle, desc: &ConstantDesc) -> Vec<f32> {
    registers(tree, h, desc)
        .iter()
        .flat_map(|reg| reg.map(Number::to_float))
        .collect()
}

pub(crate) fn int_registers(tree: &ParamTree, h: ParamHandle, desc: &ConstantDesc) -> Vec<i32> {
    registers(tree, h, desc)
        .iter()
        .flat_map(|reg| reg.map(Number::to_int))
        .collect()
}

fn push_components(tree: &ParamTree, h: ParamHandle, out: &mut Vec<bool>) {
    let Some(n) = tree.get(h) else { return };
    if !n.is_leaf() {
        for &m in &n.members {
            push_components(tree, m, out);
        }
        return;
    }
    if n.class.is_numeric() {
        out.extend(tree.words(h).iter().map(|w| coerce::read(n.ty, *w).to_bool()));
    }
}

/// Bool registers are scalar: every component of every leaf takes its own register.
pub(crate) fn bool_registers(tree: &ParamTree, h: ParamHandle, desc: &ConstantDesc) -> Vec<bool> {
    let mut regs = Vec::new();
    push_components(tree, h, &mut regs);
    regs.resize(desc.register_count as usize, false);
    regs
}

/// Fills a preshader input table from the parameters named by `inputs`.
pub(crate) fn gather_inputs(
    tree: &ParamTree,
    inputs: &[(ConstantDesc, Option<ParamHandle>)],
    len: usize,
) -> Vec<f32> {
    let mut table = vec![0.0f32; len];
    for (desc, h) in inputs {
        let Some(h) = h else { continue };
        if desc.register_set == RegisterSet::Sampler {
            continue;
        }
        let start = desc.register_index as usize * 4;
        for (i, v) in float_registers(tree, *h, desc).into_iter().enumerate() {
            if let Some(slot) = table.get_mut(start + i) {
                *slot = v;
            }
        }
    }
    table
}
