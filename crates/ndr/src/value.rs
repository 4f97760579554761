//! Dynamic typed values
//!
//! A [`Value`] pairs a wire-type tag with a native value. It is the unit the
//! whole engine moves around: call parameters are lists of values, struct
//! members and union arms are values, pointer referents are values. Where a
//! field's concrete type cannot come from a fixed schema it is inferred from
//! the variant tag.
//!
//! Decoding is shape-directed: the same `Value` type doubles as a template
//! describing what to read. Primitives ignore the template payload;
//! aggregates carry their member shapes.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::array::NdrArray;
use crate::error::{NdrError, Result};
use crate::pointer::NdrPointer;
use crate::stream::NdrStream;
use crate::strings;
use crate::structure::NdrStruct;
use crate::union::NdrUnion;

/// Wire-type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Empty,
    Boolean,
    Character,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Uuid,
    Str,
    Array,
    Struct,
    Union,
    Pointer,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Empty => "empty",
            ValueKind::Boolean => "boolean",
            ValueKind::Character => "character",
            ValueKind::I16 => "i16",
            ValueKind::U16 => "u16",
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Uuid => "uuid",
            ValueKind::Str => "string",
            ValueKind::Array => "array",
            ValueKind::Struct => "struct",
            ValueKind::Union => "union",
            ValueKind::Pointer => "pointer",
        }
    }
}

/// Tagged wire value.
///
/// `Empty` is the designated empty-member sentinel: it has no wire shape and
/// encodes as zero bytes. Unions resolve unknown-but-defaulted discriminants
/// to it so that optionality stays explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Boolean(bool),
    Character(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Uuid(Uuid),
    Str(String),
    Array(NdrArray),
    Struct(NdrStruct),
    Union(NdrUnion),
    Pointer(Box<NdrPointer>),
}

/// Step in a path from an unmarshal root down to a pointer node.
///
/// Deferred pointer payloads are read after the inline pass; the path is how
/// the drain loop finds the pointer it must patch.
#[derive(Debug, Clone)]
pub(crate) enum PathStep {
    /// Index into the root value list or an array's items.
    Item(usize),
    /// Index into a struct's member list.
    Member(usize),
    /// The single resolved member of a decoded union.
    Arm,
    /// Descend into a pointer's referent.
    Referent,
}

/// A pointer payload whose bytes follow the enclosing inline section.
#[derive(Debug)]
pub(crate) struct DeferredRead {
    /// Path to the pointer node in the output tree.
    pub path: Vec<PathStep>,
    /// Shape of the referent to decode.
    pub shape: Value,
}

impl Value {
    /// Variant tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Empty => ValueKind::Empty,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Character(_) => ValueKind::Character,
            Value::I16(_) => ValueKind::I16,
            Value::U16(_) => ValueKind::U16,
            Value::I32(_) => ValueKind::I32,
            Value::U32(_) => ValueKind::U32,
            Value::I64(_) => ValueKind::I64,
            Value::U64(_) => ValueKind::U64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Str(_) => ValueKind::Str,
            Value::Array(_) => ValueKind::Array,
            Value::Struct(_) => ValueKind::Struct,
            Value::Union(_) => ValueKind::Union,
            Value::Pointer(_) => ValueKind::Pointer,
        }
    }

    /// Natural alignment of this value's wire shape.
    pub fn alignment(&self) -> usize {
        match self {
            Value::Empty => 1,
            Value::Boolean(_) | Value::Character(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::Uuid(_) => 4,
            Value::Str(_) => 4,
            Value::Array(a) => a.alignment(),
            Value::Struct(s) => s.alignment(),
            Value::Union(u) => u.alignment(),
            Value::Pointer(p) => p.alignment(),
        }
    }

    /// Encoded byte count including internal padding, excluding the leading
    /// alignment pad (the caller applies that).
    pub fn wire_len(&self) -> usize {
        match self {
            Value::Empty => 0,
            Value::Boolean(_) | Value::Character(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::Uuid(_) => 16,
            Value::Str(s) => strings::wire_len(s),
            Value::Array(a) => a.wire_len(),
            Value::Struct(s) => s.wire_len(),
            Value::Union(u) => u.wire_len(),
            Value::Pointer(p) => p.wire_len(),
        }
    }

    /// Encode this value at the stream cursor, aligning first.
    ///
    /// Deferred pointer payloads are pushed onto `deferred`; the caller that
    /// owns the queue drains it after its inline section (see [`marshal`]).
    pub(crate) fn encode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<Value>,
    ) -> Result<()> {
        stream.align_write(self.alignment());
        match self {
            Value::Empty => {}
            Value::Boolean(b) => stream.write_u8(u8::from(*b)),
            Value::Character(c) => stream.write_u8(*c),
            Value::I16(v) => stream.write_i16(*v),
            Value::U16(v) => stream.write_u16(*v),
            Value::I32(v) => stream.write_i32(*v),
            Value::U32(v) => stream.write_u32(*v),
            Value::I64(v) => stream.write_i64(*v),
            Value::U64(v) => stream.write_u64(*v),
            Value::F32(v) => stream.write_f32(*v),
            Value::F64(v) => stream.write_f64(*v),
            Value::Uuid(u) => stream.write_uuid(u),
            Value::Str(s) => strings::encode(stream, s),
            Value::Array(a) => a.encode(stream, deferred)?,
            Value::Struct(s) => s.encode(stream, deferred)?,
            Value::Union(u) => u.encode(stream, deferred)?,
            Value::Pointer(p) => p.encode(stream, deferred)?,
        }
        Ok(())
    }

    /// Decode a value at the stream cursor using `self` as the shape.
    ///
    /// `path` locates the decoded value in the output tree so that deferred
    /// pointer reads queued during this call can be patched in later.
    pub(crate) fn decode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<DeferredRead>,
        path: &[PathStep],
    ) -> Result<Value> {
        stream.align_read(self.alignment())?;
        Ok(match self {
            Value::Empty => Value::Empty,
            Value::Boolean(_) => Value::Boolean(stream.read_u8()? != 0),
            Value::Character(_) => Value::Character(stream.read_u8()?),
            Value::I16(_) => Value::I16(stream.read_i16()?),
            Value::U16(_) => Value::U16(stream.read_u16()?),
            Value::I32(_) => Value::I32(stream.read_i32()?),
            Value::U32(_) => Value::U32(stream.read_u32()?),
            Value::I64(_) => Value::I64(stream.read_i64()?),
            Value::U64(_) => Value::U64(stream.read_u64()?),
            Value::F32(_) => Value::F32(stream.read_f32()?),
            Value::F64(_) => Value::F64(stream.read_f64()?),
            Value::Uuid(_) => Value::Uuid(stream.read_uuid()?),
            Value::Str(_) => Value::Str(strings::decode(stream)?),
            Value::Array(a) => Value::Array(a.decode(stream, deferred, path)?),
            Value::Struct(s) => Value::Struct(s.decode(stream, deferred, path)?),
            Value::Union(u) => Value::Union(u.decode(stream, deferred, path)?),
            Value::Pointer(p) => Value::Pointer(Box::new(p.decode(stream, deferred, path)?)),
        })
    }
}

/// Encode a list of values, then emit deferred pointer payloads in FIFO
/// order. A payload may itself queue further deferrals; those are appended
/// and emitted in arrival order.
pub fn marshal(stream: &mut NdrStream, values: &[Value]) -> Result<()> {
    let mut deferred = VecDeque::new();
    for value in values {
        value.encode(stream, &mut deferred)?;
    }
    while let Some(referent) = deferred.pop_front() {
        referent.encode(stream, &mut deferred)?;
    }
    Ok(())
}

/// Decode a list of values against the given shapes, consuming deferred
/// pointer payloads in the same FIFO order [`marshal`] emitted them.
pub fn unmarshal(stream: &mut NdrStream, shapes: &[Value]) -> Result<Vec<Value>> {
    let mut deferred = VecDeque::new();
    let mut out = Vec::with_capacity(shapes.len());
    for (index, shape) in shapes.iter().enumerate() {
        let path = vec![PathStep::Item(index)];
        out.push(shape.decode(stream, &mut deferred, &path)?);
    }
    while let Some(entry) = deferred.pop_front() {
        let mut referent_path = entry.path.clone();
        referent_path.push(PathStep::Referent);
        let referent = entry.shape.decode(stream, &mut deferred, &referent_path)?;
        pointer_mut(&mut out, &entry.path)?.referent = Some(referent);
    }
    Ok(out)
}

/// Navigate to the pointer node a deferred-read path refers to.
fn pointer_mut<'a>(roots: &'a mut [Value], path: &[PathStep]) -> Result<&'a mut NdrPointer> {
    let broken = || NdrError::Unmarshal("deferred pointer path does not resolve".to_string());

    let mut steps = path.iter();
    let mut current: &mut Value = match steps.next() {
        Some(PathStep::Item(i)) => roots.get_mut(*i).ok_or_else(broken)?,
        _ => return Err(broken()),
    };
    for step in steps {
        current = match (step, current) {
            (PathStep::Member(i), Value::Struct(s)) => {
                s.member_value_mut(*i).ok_or_else(broken)?
            }
            (PathStep::Item(i), Value::Array(a)) => a.item_mut(*i).ok_or_else(broken)?,
            (PathStep::Arm, Value::Union(u)) => u.arm_value_mut().ok_or_else(broken)?,
            (PathStep::Referent, Value::Pointer(p)) => {
                p.referent.as_mut().ok_or_else(broken)?
            }
            _ => return Err(broken()),
        };
    }
    match current {
        Value::Pointer(p) => Ok(p.as_mut()),
        _ => Err(broken()),
    }
}
