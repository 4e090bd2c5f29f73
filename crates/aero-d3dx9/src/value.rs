//! Typed Get/Set accessors over parameter storage.
//!
//! Every accessor checks the parameter's shape before touching storage; a failed check returns
//! [`EffectError::InvalidCall`] and leaves both the parameter and the caller's buffer untouched.

use std::rc::Rc;

use crate::coerce::{self, pack_color, unpack_color, Number};
use crate::effect::Effect;
use crate::error::{EffectError, Result};
use crate::object::{EffectObject, Shader, Texture};
use crate::types::{Matrix4, ParamHandle, ParameterClass, ParameterType, Vector4};

#[derive(Debug, Clone, Copy)]
struct Shape {
    class: ParameterClass,
    ty: ParameterType,
    rows: u32,
    columns: u32,
    elements: u32,
    bytes: u32,
}

impl Shape {
    fn is_scalar(self) -> bool {
        self.elements == 0 && self.rows == 1 && self.columns == 1
    }

    /// Float vectors and single-column matrices read and written as a packed `0xAARRGGBB` int.
    fn packs_color(self) -> bool {
        self.elements == 0
            && self.ty == ParameterType::Float
            && ((self.class == ParameterClass::Vector && self.columns != 2)
                || (self.class == ParameterClass::MatrixRows && self.rows != 2 && self.columns == 1))
    }

    fn is_vector(self) -> bool {
        self.elements == 0 && matches!(self.class, ParameterClass::Scalar | ParameterClass::Vector)
    }

    /// Int scalars and one-component int vectors exchange a `Vector4` as a packed color.
    fn packs_vector(self) -> bool {
        self.ty == ParameterType::Int && self.bytes == 4
    }

    fn is_matrix(self) -> bool {
        self.elements == 0 && self.class == ParameterClass::MatrixRows
    }

    fn is_raw_array(self) -> bool {
        matches!(
            self.class,
            ParameterClass::Scalar | ParameterClass::Vector | ParameterClass::MatrixRows
        )
    }
}

fn first(words: &[u32]) -> Result<u32> {
    words
        .first()
        .copied()
        .ok_or(EffectError::InvalidCall("parameter has no numeric storage"))
}

fn read_matrix(shape: Shape, words: &[u32], transpose: bool) -> Matrix4 {
    let mut m = [[0.0; 4]; 4];
    let (rows, columns) = (shape.rows as usize, shape.columns as usize);
    for i in 0..rows.min(4) {
        for j in 0..columns.min(4) {
            let v = coerce::read(shape.ty, words[i * columns + j]).to_float();
            if transpose {
                m[j][i] = v;
            } else {
                m[i][j] = v;
            }
        }
    }
    m
}

fn write_matrix(shape: Shape, words: &mut [u32], m: &Matrix4, transpose: bool) {
    let (rows, columns) = (shape.rows as usize, shape.columns as usize);
    for i in 0..rows.min(4) {
        for j in 0..columns.min(4) {
            let v = if transpose { m[j][i] } else { m[i][j] };
            words[i * columns + j] = coerce::store(shape.ty, Number::Float(v));
        }
    }
}

impl Effect {
    fn shape(&self, h: ParamHandle) -> Result<Shape> {
        let n = self.tree.node(h)?;
        Ok(Shape {
            class: n.class,
            ty: n.ty,
            rows: n.rows,
            columns: n.columns,
            elements: n.elements,
            bytes: n.bytes,
        })
    }

    /// First `count` elements of array parameter `h`, each checked with `accepts`.
    ///
    /// An empty request always succeeds.
    fn array_elements(
        &self,
        h: ParamHandle,
        count: usize,
        accepts: fn(ParameterClass) -> bool,
    ) -> Result<Vec<(ParamHandle, Shape)>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let shape = self.shape(h)?;
        if !accepts(shape.class) || (shape.elements as usize) < count {
            return Err(EffectError::InvalidCall("array shape does not match the request"));
        }
        let members = self.tree.node(h)?.members[..count].to_vec();
        members
            .into_iter()
            .map(|m| Ok((m, self.shape(m)?)))
            .collect()
    }

    fn write_number(&mut self, h: ParamHandle, ty: ParameterType, value: Number) -> Result<()> {
        self.tree.write_words(h, |w| {
            if let Some(slot) = w.first_mut() {
                *slot = coerce::store(ty, value);
            }
        })?;
        self.record_write(h);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Scalars
    // ---------------------------------------------------------------------------------------------

    pub fn get_bool(&self, h: ParamHandle) -> Result<bool> {
        let s = self.shape(h)?;
        if !s.is_scalar() {
            return Err(EffectError::InvalidCall("get_bool needs a non-array 1x1 parameter"));
        }
        let word = self.tree.read_words(h, first)??;
        Ok(coerce::read(s.ty, word).to_bool())
    }

    pub fn set_bool(&mut self, h: ParamHandle, value: bool) -> Result<()> {
        let s = self.shape(h)?;
        if !s.is_scalar() {
            return Err(EffectError::InvalidCall("set_bool needs a non-array 1x1 parameter"));
        }
        self.write_number(h, s.ty, Number::Bool(value))
    }

    /// Reads an int; float vectors of 1, 3 or 4 components read back as a packed color.
    pub fn get_int(&self, h: ParamHandle) -> Result<i32> {
        let s = self.shape(h)?;
        if s.is_scalar() {
            let word = self.tree.read_words(h, first)??;
            return Ok(coerce::read(s.ty, word).to_int());
        }
        if s.packs_color() {
            return self.tree.read_words(h, |w| {
                let channels: Vec<f32> = w.iter().take(4).map(|&x| f32::from_bits(x)).collect();
                pack_color(&channels) as i32
            });
        }
        Err(EffectError::InvalidCall("get_int needs a scalar or a float color parameter"))
    }

    pub fn set_int(&mut self, h: ParamHandle, value: i32) -> Result<()> {
        let s = self.shape(h)?;
        if s.is_scalar() {
            return self.write_number(h, s.ty, Number::Int(value));
        }
        if !s.packs_color() {
            return Err(EffectError::InvalidCall("set_int needs a scalar or a float color parameter"));
        }
        let channels = unpack_color(value as u32);
        self.tree.write_words(h, |w| {
            for (slot, c) in w.iter_mut().zip(channels) {
                *slot = c.to_bits();
            }
        })?;
        self.record_write(h);
        Ok(())
    }

    pub fn get_float(&self, h: ParamHandle) -> Result<f32> {
        let s = self.shape(h)?;
        if !s.is_scalar() {
            return Err(EffectError::InvalidCall("get_float needs a non-array 1x1 parameter"));
        }
        let word = self.tree.read_words(h, first)??;
        Ok(coerce::read(s.ty, word).to_float())
    }

    pub fn set_float(&mut self, h: ParamHandle, value: f32) -> Result<()> {
        let s = self.shape(h)?;
        if !s.is_scalar() {
            return Err(EffectError::InvalidCall("set_float needs a non-array 1x1 parameter"));
        }
        self.write_number(h, s.ty, Number::Float(value))
    }

    // ---------------------------------------------------------------------------------------------
    // Vectors
    // ---------------------------------------------------------------------------------------------

    /// Components past the parameter's column count read as zero.
    pub fn get_vector(&self, h: ParamHandle) -> Result<Vector4> {
        let s = self.shape(h)?;
        if !s.is_vector() {
            return Err(EffectError::InvalidCall("get_vector needs a non-array scalar or vector"));
        }
        if s.packs_vector() {
            return Ok(unpack_color(self.tree.read_words(h, first)??));
        }
        self.tree.read_words(h, |w| {
            let mut v = [0.0; 4];
            for (out, &word) in v.iter_mut().zip(w.iter().take(s.columns as usize)) {
                *out = coerce::read(s.ty, word).to_float();
            }
            v
        })
    }

    pub fn set_vector(&mut self, h: ParamHandle, value: &Vector4) -> Result<()> {
        let s = self.shape(h)?;
        if !s.is_vector() {
            return Err(EffectError::InvalidCall("set_vector needs a non-array scalar or vector"));
        }
        if s.packs_vector() {
            let packed = pack_color(value);
            self.tree.write_words(h, |w| w[0] = packed)?;
        } else {
            self.tree.write_words(h, |w| {
                for (slot, &v) in w.iter_mut().zip(value.iter()).take(s.columns as usize) {
                    *slot = coerce::store(s.ty, Number::Float(v));
                }
            })?;
        }
        self.record_write(h);
        Ok(())
    }

    /// Fills `out` from the first `out.len()` elements of a vector array.
    pub fn get_vector_array(&self, h: ParamHandle, out: &mut [Vector4]) -> Result<()> {
        let elements = self.array_elements(h, out.len(), |c| c == ParameterClass::Vector)?;
        let values = elements
            .iter()
            .map(|&(m, _)| self.get_vector(m))
            .collect::<Result<Vec<_>>>()?;
        out.copy_from_slice(&values);
        Ok(())
    }

    pub fn set_vector_array(&mut self, h: ParamHandle, values: &[Vector4]) -> Result<()> {
        let elements = self.array_elements(h, values.len(), |c| c == ParameterClass::Vector)?;
        for ((m, _), v) in elements.into_iter().zip(values) {
            self.set_vector(m, v)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Matrices
    // ---------------------------------------------------------------------------------------------

    fn matrix_of(&self, h: ParamHandle, shape: Shape, transpose: bool) -> Result<Matrix4> {
        self.tree.read_words(h, |w| read_matrix(shape, w, transpose))
    }

    fn store_matrix(&mut self, h: ParamHandle, shape: Shape, m: &Matrix4, transpose: bool) -> Result<()> {
        self.tree.write_words(h, |w| write_matrix(shape, w, m, transpose))?;
        self.record_write(h);
        Ok(())
    }

    fn single_matrix(&self, h: ParamHandle) -> Result<Shape> {
        let s = self.shape(h)?;
        if !s.is_matrix() {
            return Err(EffectError::InvalidCall("matrix accessors need a non-array row-major matrix"));
        }
        Ok(s)
    }

    fn matrix_elements(&self, h: ParamHandle, count: usize) -> Result<Vec<(ParamHandle, Shape)>> {
        self.array_elements(h, count, |c| c == ParameterClass::MatrixRows)
    }

    /// Reads a row-major matrix into a 4x4 with cells outside the parameter's shape zeroed.
    pub fn get_matrix(&self, h: ParamHandle) -> Result<Matrix4> {
        let s = self.single_matrix(h)?;
        self.matrix_of(h, s, false)
    }

    pub fn set_matrix(&mut self, h: ParamHandle, m: &Matrix4) -> Result<()> {
        let s = self.single_matrix(h)?;
        self.store_matrix(h, s, m, false)
    }

    pub fn get_matrix_transpose(&self, h: ParamHandle) -> Result<Matrix4> {
        let s = self.single_matrix(h)?;
        self.matrix_of(h, s, true)
    }

    pub fn set_matrix_transpose(&mut self, h: ParamHandle, m: &Matrix4) -> Result<()> {
        let s = self.single_matrix(h)?;
        self.store_matrix(h, s, m, true)
    }

    fn read_matrix_array(&self, h: ParamHandle, out: &mut [Matrix4], transpose: bool) -> Result<()> {
        let elements = self.matrix_elements(h, out.len())?;
        for (slot, (m, s)) in out.iter_mut().zip(elements) {
            *slot = self.matrix_of(m, s, transpose)?;
        }
        Ok(())
    }

    fn write_matrix_array(&mut self, h: ParamHandle, values: &[Matrix4], transpose: bool) -> Result<()> {
        let elements = self.matrix_elements(h, values.len())?;
        for ((m, s), value) in elements.into_iter().zip(values) {
            self.store_matrix(m, s, value, transpose)?;
        }
        Ok(())
    }

    pub fn get_matrix_array(&self, h: ParamHandle, out: &mut [Matrix4]) -> Result<()> {
        self.read_matrix_array(h, out, false)
    }

    pub fn set_matrix_array(&mut self, h: ParamHandle, values: &[Matrix4]) -> Result<()> {
        self.write_matrix_array(h, values, false)
    }

    pub fn get_matrix_transpose_array(&self, h: ParamHandle, out: &mut [Matrix4]) -> Result<()> {
        self.read_matrix_array(h, out, true)
    }

    pub fn set_matrix_transpose_array(&mut self, h: ParamHandle, values: &[Matrix4]) -> Result<()> {
        self.write_matrix_array(h, values, true)
    }

    pub fn get_matrix_pointer_array(&self, h: ParamHandle, out: &mut [&mut Matrix4]) -> Result<()> {
        let elements = self.matrix_elements(h, out.len())?;
        for (slot, (m, s)) in out.iter_mut().zip(elements) {
            **slot = self.matrix_of(m, s, false)?;
        }
        Ok(())
    }

    pub fn set_matrix_pointer_array(&mut self, h: ParamHandle, values: &[&Matrix4]) -> Result<()> {
        let elements = self.matrix_elements(h, values.len())?;
        for ((m, s), value) in elements.into_iter().zip(values) {
            self.store_matrix(m, s, value, false)?;
        }
        Ok(())
    }

    pub fn get_matrix_transpose_pointer_array(
        &self,
        h: ParamHandle,
        out: &mut [&mut Matrix4],
    ) -> Result<()> {
        let elements = self.matrix_elements(h, out.len())?;
        for (slot, (m, s)) in out.iter_mut().zip(elements) {
            **slot = self.matrix_of(m, s, true)?;
        }
        Ok(())
    }

    pub fn set_matrix_transpose_pointer_array(
        &mut self,
        h: ParamHandle,
        values: &[&Matrix4],
    ) -> Result<()> {
        let elements = self.matrix_elements(h, values.len())?;
        for ((m, s), value) in elements.into_iter().zip(values) {
            self.store_matrix(m, s, value, true)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Raw element arrays
    // ---------------------------------------------------------------------------------------------

    fn raw_array(&self, h: ParamHandle) -> Result<Shape> {
        let s = self.shape(h)?;
        if !s.is_raw_array() {
            return Err(EffectError::InvalidCall("element arrays need a scalar, vector or matrix"));
        }
        Ok(s)
    }

    fn read_raw<T>(&self, h: ParamHandle, out: &mut [T], convert: impl Fn(Number) -> T) -> Result<()> {
        let s = self.raw_array(h)?;
        self.tree.read_words(h, |w| {
            for (slot, &word) in out.iter_mut().zip(w) {
                *slot = convert(coerce::read(s.ty, word));
            }
        })
    }

    fn write_raw<T: Copy>(
        &mut self,
        h: ParamHandle,
        values: &[T],
        convert: impl Fn(T) -> Number,
    ) -> Result<()> {
        let s = self.raw_array(h)?;
        self.tree.write_words(h, |w| {
            for (slot, &v) in w.iter_mut().zip(values) {
                *slot = coerce::store(s.ty, convert(v));
            }
        })?;
        self.record_write(h);
        Ok(())
    }

    /// Reads `min(out.len(), bytes / 4)` elements in storage order.
    pub fn get_bool_array(&self, h: ParamHandle, out: &mut [bool]) -> Result<()> {
        self.read_raw(h, out, Number::to_bool)
    }

    pub fn set_bool_array(&mut self, h: ParamHandle, values: &[bool]) -> Result<()> {
        self.write_raw(h, values, Number::Bool)
    }

    pub fn get_int_array(&self, h: ParamHandle, out: &mut [i32]) -> Result<()> {
        self.read_raw(h, out, Number::to_int)
    }

    pub fn set_int_array(&mut self, h: ParamHandle, values: &[i32]) -> Result<()> {
        self.write_raw(h, values, Number::Int)
    }

    pub fn get_float_array(&self, h: ParamHandle, out: &mut [f32]) -> Result<()> {
        self.read_raw(h, out, Number::to_float)
    }

    pub fn set_float_array(&mut self, h: ParamHandle, values: &[f32]) -> Result<()> {
        self.write_raw(h, values, Number::Float)
    }

    // ---------------------------------------------------------------------------------------------
    // Raw bytes
    // ---------------------------------------------------------------------------------------------

    fn raw_bytes(&self, h: ParamHandle, len: usize) -> Result<usize> {
        let n = self.tree.node(h)?;
        // Objects and samplers report a size but have no word storage.
        if !n.objects.is_empty() || n.words.len() * 4 != n.bytes as usize {
            return Err(EffectError::InvalidCall("raw value access needs numeric storage"));
        }
        if len < n.bytes as usize {
            return Err(EffectError::InvalidCall("buffer is smaller than the parameter"));
        }
        Ok(n.words.len() * 4)
    }

    /// Copies the parameter's raw storage into `out`, which must hold at least `bytes` bytes.
    ///
    /// Object and sampler parameters have no byte storage and return `InvalidCall`; read their
    /// shared handles with [`Effect::get_objects`] instead.
    pub fn get_value(&self, h: ParamHandle, out: &mut [u8]) -> Result<()> {
        let len = self.raw_bytes(h, out.len())?;
        self.tree
            .read_words(h, |w| out[..len].copy_from_slice(bytemuck::cast_slice(w)))
    }

    /// Overwrites the parameter's raw storage from `data`. Object parameters go through
    /// [`Effect::set_objects`].
    pub fn set_value(&mut self, h: ParamHandle, data: &[u8]) -> Result<()> {
        let len = self.raw_bytes(h, data.len())?;
        self.tree
            .write_words(h, |w| bytemuck::cast_slice_mut::<u32, u8>(w).copy_from_slice(&data[..len]))?;
        self.record_write(h);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------------------------------------

    /// Every object slot under `h` (one per array element).
    pub fn get_objects(&self, h: ParamHandle) -> Result<Vec<Option<EffectObject>>> {
        let n = self.tree.node(h)?;
        if !n.ty.is_object_slot() {
            return Err(EffectError::InvalidCall("parameter does not hold objects"));
        }
        Ok(self.tree.objects(h))
    }

    pub fn set_objects(&mut self, h: ParamHandle, values: &[Option<EffectObject>]) -> Result<()> {
        let n = self.tree.node(h)?;
        if !n.ty.is_object_slot() {
            return Err(EffectError::InvalidCall("parameter does not hold objects"));
        }
        if values.len() != n.objects.len() {
            return Err(EffectError::InvalidCall("object count does not match the parameter"));
        }
        let ty = n.ty;
        if values.iter().flatten().any(|o| !o.fits(ty)) {
            return Err(EffectError::InvalidCall("object does not fit the parameter type"));
        }
        self.tree.write_objects(h, |slots| slots.clone_from_slice(values))?;
        self.record_write(h);
        Ok(())
    }

    fn single_object(&self, h: ParamHandle, accepts: fn(ParameterType) -> bool) -> Result<Option<EffectObject>> {
        let n = self.tree.node(h)?;
        if n.elements != 0 || !accepts(n.ty) {
            return Err(EffectError::InvalidCall("parameter type does not match the accessor"));
        }
        Ok(self.tree.object(h))
    }

    fn store_object(
        &mut self,
        h: ParamHandle,
        accepts: fn(ParameterType) -> bool,
        object: Option<EffectObject>,
    ) -> Result<()> {
        let n = self.tree.node(h)?;
        if n.elements != 0 || !accepts(n.ty) {
            return Err(EffectError::InvalidCall("parameter type does not match the accessor"));
        }
        if object.as_ref().is_some_and(|o| !o.fits(n.ty)) {
            return Err(EffectError::InvalidCall("object does not fit the parameter type"));
        }
        self.tree.write_objects(h, |slots| {
            if let Some(slot) = slots.first_mut() {
                *slot = object;
            }
        })?;
        self.record_write(h);
        Ok(())
    }

    pub fn get_string(&self, h: ParamHandle) -> Result<Option<Rc<str>>> {
        Ok(match self.single_object(h, |ty| ty == ParameterType::String)? {
            Some(EffectObject::String(s)) => Some(s),
            _ => None,
        })
    }

    pub fn set_string(&mut self, h: ParamHandle, value: &str) -> Result<()> {
        let object = EffectObject::String(Rc::from(value));
        self.store_object(h, |ty| ty == ParameterType::String, Some(object))
    }

    pub fn get_texture(&self, h: ParamHandle) -> Result<Option<Rc<Texture>>> {
        let object = self.single_object(h, ParameterType::is_texture)?;
        Ok(object.as_ref().and_then(EffectObject::as_texture).cloned())
    }

    /// Stores (or with `None` clears) a texture; the texture kind must fit the parameter type.
    pub fn set_texture(&mut self, h: ParamHandle, texture: Option<Rc<Texture>>) -> Result<()> {
        self.store_object(h, ParameterType::is_texture, texture.map(EffectObject::Texture))
    }

    pub fn get_vertex_shader(&self, h: ParamHandle) -> Result<Option<Rc<Shader>>> {
        let object = self.single_object(h, |ty| ty == ParameterType::VertexShader)?;
        Ok(object.as_ref().and_then(EffectObject::as_shader).cloned())
    }

    pub fn get_pixel_shader(&self, h: ParamHandle) -> Result<Option<Rc<Shader>>> {
        let object = self.single_object(h, |ty| ty == ParameterType::PixelShader)?;
        Ok(object.as_ref().and_then(EffectObject::as_shader).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TextureKind;
    use crate::test_utils::{ty, EffectBuilder, TypeSpec, ValueSpec};
    use pretty_assertions::assert_eq;

    const SENTINEL: f32 = -123.25;

    fn effect() -> Effect {
        let mut b = EffectBuilder::new();
        b.parameter(TypeSpec::scalar(ty::FLOAT, "f"), ValueSpec::floats(&[0.1]));
        b.parameter(TypeSpec::scalar(ty::INT, "i"), ValueSpec::ints(&[-3]));
        b.parameter(TypeSpec::scalar(ty::BOOL, "b"), ValueSpec::words(&[1]));
        b.parameter(TypeSpec::vector(ty::FLOAT, "v3", 3), ValueSpec::floats(&[1.0, 0.5, 0.0]));
        b.parameter(TypeSpec::vector(ty::FLOAT, "v2", 2), ValueSpec::floats(&[1.0, 2.0]));
        b.parameter(TypeSpec::vector(ty::INT, "iv2", 2), ValueSpec::ints(&[4, 5]));
        b.parameter(
            TypeSpec::matrix_rows(ty::FLOAT, "m23", 2, 3),
            ValueSpec::floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        );
        b.parameter(
            TypeSpec::matrix_columns(ty::FLOAT, "mc", 2, 2),
            ValueSpec::floats(&[1.0, 2.0, 3.0, 4.0]),
        );
        b.parameter(
            TypeSpec::vector(ty::FLOAT, "va", 4).array(2),
            ValueSpec::floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
        );
        b.parameter(
            TypeSpec::matrix_rows(ty::FLOAT, "ma", 2, 2).array(2),
            ValueSpec::floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
        );
        b.parameter(TypeSpec::scalar(ty::FLOAT, "fa").array(3), ValueSpec::floats(&[1.5, -2.5, 0.0]));
        let s = b.add_object();
        b.parameter(TypeSpec::object(ty::STRING, "name"), ValueSpec::object(s));
        b.string(s, "hello");
        let t = b.add_object();
        b.parameter(TypeSpec::object(ty::TEXTURE2D, "tex"), ValueSpec::object(t));
        b.parameter(
            TypeSpec::structure("st", vec![TypeSpec::scalar(ty::FLOAT, "x"), TypeSpec::scalar(ty::INT, "y")]),
            ValueSpec::floats(&[2.0]).then(ValueSpec::ints(&[7])),
        );
        Effect::new(&b.build()).unwrap()
    }

    fn param(e: &Effect, path: &str) -> ParamHandle {
        e.parameter_by_name(None, path).unwrap()
    }

    #[test]
    fn scalar_accessors_coerce_between_types() {
        let mut e = effect();
        let (f, i, b) = (param(&e, "f"), param(&e, "i"), param(&e, "b"));
        assert_eq!(e.get_int(i).unwrap(), -3);
        assert_eq!(e.get_float(i).unwrap(), -3.0);
        assert!(e.get_bool(i).unwrap());
        assert_eq!(e.get_float(b).unwrap(), 1.0);

        e.set_float(i, 2.9).unwrap();
        assert_eq!(e.get_int(i).unwrap(), 2);
        e.set_int(b, 0).unwrap();
        assert!(!e.get_bool(b).unwrap());
        e.set_float(b, -0.5).unwrap();
        assert_eq!(e.get_int(b).unwrap(), 1);
        assert!(e.get_bool(f).unwrap());
    }

    #[test]
    fn set_bool_then_reset_restores_blob_value() {
        let mut e = effect();
        let f = param(&e, "f");
        e.set_bool(f, true).unwrap();
        assert_eq!(e.get_float(f).unwrap(), 1.0);
        e.reset_value(f).unwrap();
        assert!((e.get_float(f).unwrap() - 0.1).abs() < 1e-7);
    }

    #[test]
    fn scalar_accessors_reject_other_shapes() {
        let mut e = effect();
        for path in ["v3", "m23", "fa", "name", "tex", "st"] {
            let h = param(&e, path);
            assert!(e.get_bool(h).is_err(), "{path}");
            assert!(e.get_float(h).is_err(), "{path}");
            assert!(e.set_bool(h, true).is_err(), "{path}");
            assert!(e.set_float(h, 1.0).is_err(), "{path}");
        }
        // Failed writes leave the stored value alone.
        let v3 = param(&e, "v3");
        assert_eq!(e.get_vector(v3).unwrap(), [1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn int_accessors_pack_float_colors() {
        let mut e = effect();
        let v3 = param(&e, "v3");
        assert_eq!(e.get_int(v3).unwrap(), 0x00FF_7F00);

        let va0 = param(&e, "va[0]");
        e.set_vector(va0, &[1.0, 0.0, 0.25, 0.5]).unwrap();
        assert_eq!(e.get_int(va0).unwrap() as u32, 0x7FFF_003F);

        e.set_int(v3, 0x8000_FF40u32 as i32).unwrap();
        let v = e.get_vector(v3).unwrap();
        assert_eq!(v[0], 0.0);
        assert_eq!(v[1], 1.0);
        assert!((v[2] - 64.0 / 255.0).abs() < 1e-6);
        // Three-component vectors have no alpha slot.
        assert_eq!(v[3], 0.0);

        for path in ["v2", "iv2", "m23", "mc"] {
            assert!(e.get_int(param(&e, path)).is_err(), "{path}");
            assert!(e.set_int(param(&e, path), 0).is_err(), "{path}");
        }
    }

    #[test]
    fn vector_accessors_zero_fill_and_truncate() {
        let mut e = effect();
        let v2 = param(&e, "v2");
        assert_eq!(e.get_vector(v2).unwrap(), [1.0, 2.0, 0.0, 0.0]);
        e.set_vector(v2, &[3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(e.get_vector(v2).unwrap(), [3.0, 4.0, 0.0, 0.0]);

        let f = param(&e, "f");
        e.set_vector(f, &[0.75, 9.0, 9.0, 9.0]).unwrap();
        assert_eq!(e.get_float(f).unwrap(), 0.75);

        let iv2 = param(&e, "iv2");
        e.set_vector(iv2, &[1.9, -2.9, 0.0, 0.0]).unwrap();
        assert_eq!(e.get_vector(iv2).unwrap(), [1.0, -2.0, 0.0, 0.0]);

        for path in ["m23", "va", "name", "st"] {
            assert!(e.get_vector(param(&e, path)).is_err(), "{path}");
        }
    }

    #[test]
    fn int_scalar_vectors_use_color_packing() {
        let mut e = effect();
        let i = param(&e, "i");
        e.set_vector(i, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(e.get_int(i).unwrap() as u32, 0xFFFF_0000);
        assert_eq!(e.get_vector(i).unwrap(), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn vector_arrays_check_element_count() {
        let mut e = effect();
        let va = param(&e, "va");
        let mut out = [[SENTINEL; 4]; 3];
        assert!(e.get_vector_array(va, &mut out).is_err());
        assert_eq!(out, [[SENTINEL; 4]; 3]);

        e.get_vector_array(va, &mut out[..2]).unwrap();
        assert_eq!(out[1], [5.0, 6.0, 7.0, 8.0]);
        assert_eq!(out[2], [SENTINEL; 4]);

        e.set_vector_array(va, &[[0.5; 4]]).unwrap();
        assert_eq!(e.get_vector(param(&e, "va[0]")).unwrap(), [0.5; 4]);
        assert_eq!(e.get_vector(param(&e, "va[1]")).unwrap(), [5.0, 6.0, 7.0, 8.0]);

        // Empty requests succeed whatever the parameter.
        let f = param(&e, "f");
        e.get_vector_array(f, &mut []).unwrap();
        assert!(e.get_vector_array(f, &mut out[..1]).is_err());
        assert!(e.get_vector_array(param(&e, "ma"), &mut out[..1]).is_err());
    }

    #[test]
    fn matrices_zero_cells_outside_shape() {
        let mut e = effect();
        let m = param(&e, "m23");
        let got = e.get_matrix(m).unwrap();
        assert_eq!(got[0], [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(got[1], [4.0, 5.0, 6.0, 0.0]);
        assert_eq!(got[2], [0.0; 4]);

        let t = e.get_matrix_transpose(m).unwrap();
        assert_eq!(t[0], [1.0, 4.0, 0.0, 0.0]);
        assert_eq!(t[2], [3.0, 6.0, 0.0, 0.0]);

        let mut input = [[0.0; 4]; 4];
        for (r, row) in input.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (r * 4 + c) as f32;
            }
        }
        e.set_matrix_transpose(m, &input).unwrap();
        let got = e.get_matrix(m).unwrap();
        assert_eq!(got[0], [0.0, 4.0, 8.0, 0.0]);
        assert_eq!(got[1], [1.0, 5.0, 9.0, 0.0]);

        for path in ["mc", "v3", "ma", "f"] {
            assert!(e.get_matrix(param(&e, path)).is_err(), "{path}");
            assert!(e.set_matrix(param(&e, path), &input).is_err(), "{path}");
        }
    }

    #[test]
    fn matrix_arrays_and_pointer_arrays() {
        let mut e = effect();
        let ma = param(&e, "ma");
        let mut out = [[[SENTINEL; 4]; 4]; 2];
        e.get_matrix_array(ma, &mut out).unwrap();
        assert_eq!(out[1][0], [5.0, 6.0, 0.0, 0.0]);
        assert_eq!(out[1][1], [7.0, 8.0, 0.0, 0.0]);

        let mut a = [[0.0; 4]; 4];
        let mut b = [[0.0; 4]; 4];
        e.get_matrix_transpose_pointer_array(ma, &mut [&mut a, &mut b]).unwrap();
        assert_eq!(b[0], [5.0, 7.0, 0.0, 0.0]);

        let ident = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0; 4], [0.0; 4]];
        e.set_matrix_pointer_array(ma, &[&ident]).unwrap();
        e.get_matrix_pointer_array(ma, &mut [&mut a]).unwrap();
        assert_eq!(a, ident);

        let mut three = [[[0.0; 4]; 4]; 3];
        assert!(e.get_matrix_array(ma, &mut three).is_err());
        assert!(e.set_matrix_transpose_array(param(&e, "m23"), &[ident]).is_err());
        e.set_matrix_array(param(&e, "f"), &[]).unwrap();
    }

    #[test]
    fn raw_arrays_clamp_to_storage() {
        let mut e = effect();
        let fa = param(&e, "fa");
        let mut ints = [99; 5];
        e.get_int_array(fa, &mut ints).unwrap();
        assert_eq!(ints, [1, -2, 0, 99, 99]);

        let mut bools = [false; 3];
        e.get_bool_array(fa, &mut bools).unwrap();
        assert_eq!(bools, [true, true, false]);

        e.set_bool_array(param(&e, "v2"), &[true, false, true]).unwrap();
        assert_eq!(e.get_vector(param(&e, "v2")).unwrap(), [1.0, 0.0, 0.0, 0.0]);

        let mut floats = [0.0; 6];
        e.get_float_array(param(&e, "m23"), &mut floats).unwrap();
        assert_eq!(floats, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        for path in ["mc", "name", "tex", "st"] {
            assert!(e.get_float_array(param(&e, path), &mut floats).is_err(), "{path}");
            assert!(e.set_int_array(param(&e, path), &[1]).is_err(), "{path}");
        }
    }

    #[test]
    fn raw_values_need_a_large_enough_buffer() {
        let mut e = effect();
        let v3 = param(&e, "v3");
        let mut buf = [0xABu8; 12];
        assert!(e.get_value(v3, &mut buf[..11]).is_err());
        assert_eq!(buf, [0xAB; 12]);
        e.get_value(v3, &mut buf).unwrap();
        assert_eq!(&buf[4..8], &0.5f32.to_le_bytes());

        let st = param(&e, "st");
        let mut data = Vec::new();
        data.extend_from_slice(&4.0f32.to_le_bytes());
        data.extend_from_slice(&9i32.to_le_bytes());
        e.set_value(st, &data).unwrap();
        assert_eq!(e.get_int(param(&e, "st.y")).unwrap(), 9);
        assert_eq!(e.get_float(param(&e, "st.x")).unwrap(), 4.0);

        assert!(e.get_value(param(&e, "name"), &mut buf).is_err());
        let tex = param(&e, "tex");
        assert!(matches!(e.set_value(tex, &data), Err(EffectError::InvalidCall(_))));

        let texture = Rc::new(Texture::new(TextureKind::Texture2D, "t"));
        e.set_objects(tex, &[Some(EffectObject::Texture(texture.clone()))]).unwrap();
        let slots = e.get_objects(tex).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(matches!(&slots[0], Some(EffectObject::Texture(t)) if Rc::ptr_eq(t, &texture)));
        assert_eq!(Rc::strong_count(&texture), 3);
    }

    #[test]
    fn object_accessors_check_types() {
        let mut e = effect();
        let name = param(&e, "name");
        assert_eq!(e.get_string(name).unwrap().as_deref(), Some("hello"));
        e.set_string(name, "world").unwrap();
        assert_eq!(e.get_string(name).unwrap().as_deref(), Some("world"));

        let tex = param(&e, "tex");
        assert_eq!(e.get_texture(tex).unwrap(), None);
        let t2d = Rc::new(Texture::new(TextureKind::Texture2D, "albedo"));
        e.set_texture(tex, Some(t2d.clone())).unwrap();
        assert!(Rc::ptr_eq(&e.get_texture(tex).unwrap().unwrap(), &t2d));
        assert_eq!(Rc::strong_count(&t2d), 2);

        let cube = Rc::new(Texture::new(TextureKind::Cube, "sky"));
        assert!(e.set_texture(tex, Some(cube)).is_err());
        assert!(e.set_texture(name, None).is_err());
        assert!(e.get_string(tex).is_err());
        assert!(e.get_vertex_shader(tex).is_err());

        e.set_objects(tex, &[None]).unwrap();
        assert_eq!(Rc::strong_count(&t2d), 1);
        assert!(e.set_objects(tex, &[None, None]).is_err());
        assert!(e.get_objects(param(&e, "f")).is_err());
    }
}
