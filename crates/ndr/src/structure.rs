//! NDR structs
//!
//! An ordered aggregate of named members. Member order is fixed at
//! construction and defines both wire order and alignment computation order.
//! Non-reference pointer members are forced into the deferred form: their
//! referent tokens sit inline, the payloads follow the last inline member in
//! FIFO order.

use std::collections::VecDeque;

use crate::error::Result;
use crate::pointer::NdrPointer;
use crate::stream::NdrStream;
use crate::value::{DeferredRead, PathStep, Value};

/// One struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: Option<String>,
    pub value: Value,
}

/// Ordered aggregate of members.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NdrStruct {
    members: Vec<StructMember>,
}

impl NdrStruct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unnamed member.
    pub fn add_member(&mut self, value: Value) {
        self.push(None, value);
    }

    /// Append a named member.
    pub fn add_named_member(&mut self, name: impl Into<String>, value: Value) {
        self.push(Some(name.into()), value);
    }

    fn push(&mut self, name: Option<String>, value: Value) {
        self.members.push(StructMember {
            name,
            value: force_deferred(value),
        });
    }

    pub fn members(&self) -> &[StructMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member value by declaration index.
    pub fn member_value(&self, index: usize) -> Option<&Value> {
        self.members.get(index).map(|m| &m.value)
    }

    pub(crate) fn member_value_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.members.get_mut(index).map(|m| &mut m.value)
    }

    /// Maximum alignment over all members.
    pub fn alignment(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.value.alignment())
            .max()
            .unwrap_or(1)
    }

    /// Encoded size including inter-member and trailing padding, assuming the
    /// struct starts on its own alignment boundary.
    pub fn wire_len(&self) -> usize {
        let mut len = 0usize;
        for member in &self.members {
            len += NdrStream::align_padding(len, member.value.alignment());
            len += member.value.wire_len();
        }
        len + NdrStream::align_padding(len, self.alignment())
    }

    pub(crate) fn encode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<Value>,
    ) -> Result<()> {
        for member in &self.members {
            member.value.encode(stream, deferred)?;
        }
        stream.align_write(self.alignment());
        Ok(())
    }

    pub(crate) fn decode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<DeferredRead>,
        path: &[PathStep],
    ) -> Result<NdrStruct> {
        let mut decoded = NdrStruct::new();
        for (index, member) in self.members.iter().enumerate() {
            let mut member_path = path.to_vec();
            member_path.push(PathStep::Member(index));
            let value = member.value.decode(stream, deferred, &member_path)?;
            decoded.members.push(StructMember {
                name: member.name.clone(),
                value,
            });
        }
        stream.align_read(self.alignment())?;
        Ok(decoded)
    }
}

/// Non-reference pointers inside an aggregate always carry deferred payloads.
pub(crate) fn force_deferred(value: Value) -> Value {
    match value {
        Value::Pointer(p) if !p.is_reference && !p.is_deferred => {
            Value::Pointer(Box::new(NdrPointer {
                is_deferred: true,
                ..*p
            }))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{marshal, unmarshal};

    fn roundtrip(value: &Value, shape: &Value) -> Value {
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(value)).unwrap();
        let mut r = NdrStream::from_slice(s.as_bytes());
        let mut decoded = unmarshal(&mut r, std::slice::from_ref(shape)).unwrap();
        decoded.remove(0)
    }

    #[test]
    fn test_plain_struct_roundtrip() {
        let mut st = NdrStruct::new();
        st.add_named_member("id", Value::U32(77));
        st.add_named_member("flag", Value::Boolean(true));
        st.add_named_member("label", Value::Str("device".to_string()));
        let value = Value::Struct(st);

        let mut shape_struct = NdrStruct::new();
        shape_struct.add_named_member("id", Value::U32(0));
        shape_struct.add_named_member("flag", Value::Boolean(false));
        shape_struct.add_named_member("label", Value::Str(String::new()));
        let shape = Value::Struct(shape_struct);

        assert_eq!(roundtrip(&value, &shape), value);
    }

    #[test]
    fn test_alignment_is_max_of_members() {
        let mut st = NdrStruct::new();
        st.add_member(Value::Character(b'a'));
        st.add_member(Value::U16(1));
        assert_eq!(st.alignment(), 2);
        st.add_member(Value::U64(1));
        assert_eq!(st.alignment(), 8);
    }

    #[test]
    fn test_cursor_aligned_after_encode() {
        let mut st = NdrStruct::new();
        st.add_member(Value::U32(1));
        st.add_member(Value::Character(b'q'));
        let alignment = st.alignment();

        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Struct(st)]).unwrap();
        assert_eq!(s.position() % alignment, 0);
    }

    #[test]
    fn test_deferred_payloads_fifo_after_inline_members() {
        // Two pointer members: both tokens inline, payloads after the last
        // non-pointer member, first pointer's payload first even though the
        // second referent is smaller.
        let mut st = NdrStruct::new();
        st.add_named_member(
            "p1",
            Value::Pointer(Box::new(NdrPointer::new(Value::Str("first".to_string())))),
        );
        st.add_named_member(
            "p2",
            Value::Pointer(Box::new(NdrPointer::new(Value::U16(2)))),
        );
        st.add_named_member("tail", Value::U32(0xAABB_CCDD));

        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Struct(st.clone())]).unwrap();
        let wire = s.as_bytes();

        // Inline: token, token, tail. Deferred: string payload, then u16.
        assert_eq!(&wire[0..4], &[1, 0, 0, 0]);
        assert_eq!(&wire[4..8], &[1, 0, 0, 0]);
        assert_eq!(&wire[8..12], &[0xDD, 0xCC, 0xBB, 0xAA]);
        // String payload: max_count of "first\0" = 6.
        assert_eq!(&wire[12..16], &[6, 0, 0, 0]);
        // Final deferred value is the u16.
        assert_eq!(&wire[wire.len() - 2..], &[2, 0]);

        let mut shape = NdrStruct::new();
        shape.add_named_member(
            "p1",
            Value::Pointer(Box::new(NdrPointer::new(Value::Str(String::new())))),
        );
        shape.add_named_member(
            "p2",
            Value::Pointer(Box::new(NdrPointer::new(Value::U16(0)))),
        );
        shape.add_named_member("tail", Value::U32(0));

        let mut r = NdrStream::from_slice(wire);
        let decoded = unmarshal(&mut r, &[Value::Struct(shape)]).unwrap();
        assert_eq!(decoded[0], Value::Struct(st));
    }

    #[test]
    fn test_nested_deferred_pointer() {
        // A deferred payload that itself contains a deferred pointer; the
        // inner payload lands after the outer one.
        let mut inner = NdrStruct::new();
        inner.add_member(Value::Pointer(Box::new(NdrPointer::new(Value::U32(42)))));

        let mut outer = NdrStruct::new();
        outer.add_member(Value::Pointer(Box::new(NdrPointer::new(Value::Struct(
            inner.clone(),
        )))));
        outer.add_member(Value::U16(1));

        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Struct(outer.clone())]).unwrap();

        let mut inner_shape = NdrStruct::new();
        inner_shape.add_member(Value::Pointer(Box::new(NdrPointer::new(Value::U32(0)))));
        let mut outer_shape = NdrStruct::new();
        outer_shape.add_member(Value::Pointer(Box::new(NdrPointer::new(Value::Struct(
            inner_shape,
        )))));
        outer_shape.add_member(Value::U16(0));

        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Struct(outer_shape)]).unwrap();
        assert_eq!(decoded[0], Value::Struct(outer));
    }
}
