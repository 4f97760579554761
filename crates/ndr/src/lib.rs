//! NDR (Network Data Representation) marshaling runtime
//!
//! This crate implements the encode/decode rules for structured DCE RPC wire
//! data over a dynamic value model: where MIDL-generated code would know
//! every shape statically, this engine carries the shape alongside the value
//! and dispatches on its tag.
//!
//! # NDR wire format
//!
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Structures align to their largest member and are padded to it
//! - Strings are conformant varying arrays with a NUL terminator
//! - Non-reference pointers inside aggregates write a referent token inline
//!   and defer their payload past the enclosing inline section, in FIFO order
//!
//! The top-level entry points are [`marshal`] and [`unmarshal`], which own
//! the deferred-pointer queue for one parameter list.

mod array;
mod error;
mod pointer;
mod stream;
mod strings;
mod structure;
mod union;
mod value;

pub use array::NdrArray;
pub use error::{NdrError, Result, MAX_DECODE_ALLOCATION};
pub use pointer::NdrPointer;
pub use stream::NdrStream;
pub use structure::{NdrStruct, StructMember};
pub use union::{Discriminant, DiscriminantKind, NdrUnion};
pub use value::{marshal, unmarshal, Value, ValueKind};

/// Re-export bytes for convenience
pub use bytes::{Buf, BufMut, Bytes, BytesMut};

#[cfg(test)]
mod tests {
    use super::*;

    // Shapes used across the engine-level tests.
    fn sample_struct() -> NdrStruct {
        let mut st = NdrStruct::new();
        st.add_named_member("count", Value::U16(3));
        st.add_named_member(
            "name",
            Value::Pointer(Box::new(NdrPointer::new(Value::Str("probe".into())))),
        );
        st.add_named_member("serial", Value::U64(0x1122_3344_5566_7788));
        st
    }

    fn sample_struct_shape() -> NdrStruct {
        let mut st = NdrStruct::new();
        st.add_named_member("count", Value::U16(0));
        st.add_named_member(
            "name",
            Value::Pointer(Box::new(NdrPointer::new(Value::Str(String::new())))),
        );
        st.add_named_member("serial", Value::U64(0));
        st
    }

    #[test]
    fn test_struct_roundtrip_preserves_deferral() {
        let value = Value::Struct(sample_struct());
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();

        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Struct(sample_struct_shape())]).unwrap();
        assert_eq!(decoded[0], value);

        match &decoded[0] {
            Value::Struct(st) => match st.member_value(1) {
                Some(Value::Pointer(p)) => assert!(p.is_deferred),
                other => panic!("expected pointer member, got {:?}", other),
            },
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_cursor_multiple_of_aggregate_alignment() {
        for value in [
            Value::Struct(sample_struct()),
            Value::Array(NdrArray::new(vec![Value::U32(1), Value::U32(2)]).unwrap()),
        ] {
            let alignment = value.alignment();
            let mut s = NdrStream::new();
            marshal(&mut s, &[value]).unwrap();
            assert_eq!(s.position() % alignment, 0);
        }
    }

    #[test]
    fn test_union_of_structs_roundtrip() {
        let mut u = NdrUnion::new(DiscriminantKind::Integer);
        u.add_member(Discriminant::Integer(7), Value::Struct(sample_struct()))
            .unwrap();
        let value = Value::Union(u);

        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();

        let mut catalog = NdrUnion::new(DiscriminantKind::Integer);
        catalog
            .add_member(Discriminant::Integer(7), Value::Struct(sample_struct_shape()))
            .unwrap();
        catalog
            .add_member(Discriminant::Integer(8), Value::U32(0))
            .unwrap();

        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Union(catalog)]).unwrap();
        assert_eq!(decoded[0], value);
    }

    #[test]
    fn test_mixed_parameter_list_roundtrip() {
        let values = vec![
            Value::U16(1),
            Value::Array(
                NdrArray::new(vec![
                    Value::Uuid(uuid::Uuid::parse_str("00020400-0000-0000-c000-000000000046").unwrap()),
                ])
                .unwrap(),
            ),
            Value::I32(5),
            Value::I32(0),
        ];
        let mut s = NdrStream::new();
        marshal(&mut s, &values).unwrap();

        let shapes = vec![
            Value::U16(0),
            Value::Array(NdrArray::with_template(Value::Uuid(uuid::Uuid::nil()), vec![])),
            Value::I32(0),
            Value::I32(0),
        ];
        let mut r = NdrStream::from_slice(s.as_bytes());
        assert_eq!(unmarshal(&mut r, &shapes).unwrap(), values);
    }
}
