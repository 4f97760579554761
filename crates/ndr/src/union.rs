//! NDR discriminated unions
//!
//! One map serves both directions. Encoding requires exactly one
//! (discriminant, member) entry; decoding treats the map as a catalog of
//! candidate shapes and resolves the member after reading the discriminant
//! off the wire. The union reserves space for its largest variant regardless
//! of which is active, so `wire_len` is the discriminant plus the maximum
//! member length.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;

use crate::error::{NdrError, Result};
use crate::stream::NdrStream;
use crate::structure::force_deferred;
use crate::value::{DeferredRead, PathStep, Value};

/// Wire type of a union discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminantKind {
    Integer,
    Short,
    Boolean,
    Character,
}

impl DiscriminantKind {
    pub fn alignment(self) -> usize {
        match self {
            DiscriminantKind::Integer => 4,
            DiscriminantKind::Short => 2,
            DiscriminantKind::Boolean | DiscriminantKind::Character => 1,
        }
    }

    pub fn wire_len(self) -> usize {
        match self {
            DiscriminantKind::Integer => 4,
            DiscriminantKind::Short => 2,
            DiscriminantKind::Boolean | DiscriminantKind::Character => 1,
        }
    }
}

/// A discriminant value of one of the four supported kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminant {
    Integer(i32),
    Short(i16),
    Boolean(bool),
    Character(u8),
}

impl Discriminant {
    pub fn kind(self) -> DiscriminantKind {
        match self {
            Discriminant::Integer(_) => DiscriminantKind::Integer,
            Discriminant::Short(_) => DiscriminantKind::Short,
            Discriminant::Boolean(_) => DiscriminantKind::Boolean,
            Discriminant::Character(_) => DiscriminantKind::Character,
        }
    }

    fn write(self, stream: &mut NdrStream) {
        match self {
            Discriminant::Integer(v) => stream.write_i32(v),
            Discriminant::Short(v) => stream.write_i16(v),
            Discriminant::Boolean(v) => stream.write_u8(u8::from(v)),
            Discriminant::Character(v) => stream.write_u8(v),
        }
    }

    fn read(kind: DiscriminantKind, stream: &mut NdrStream) -> Result<Self> {
        Ok(match kind {
            DiscriminantKind::Integer => Discriminant::Integer(stream.read_i32()?),
            DiscriminantKind::Short => Discriminant::Short(stream.read_i16()?),
            DiscriminantKind::Boolean => Discriminant::Boolean(stream.read_u8()? != 0),
            DiscriminantKind::Character => Discriminant::Character(stream.read_u8()?),
        })
    }
}

impl fmt::Display for Discriminant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discriminant::Integer(v) => write!(f, "{v}"),
            Discriminant::Short(v) => write!(f, "{v}"),
            Discriminant::Boolean(v) => write!(f, "{v}"),
            Discriminant::Character(v) => write!(f, "'{}'", *v as char),
        }
    }
}

/// Discriminated aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct NdrUnion {
    kind: DiscriminantKind,
    members: HashMap<Discriminant, Value>,
    default_member: Option<Box<Value>>,
}

impl NdrUnion {
    pub fn new(kind: DiscriminantKind) -> Self {
        Self {
            kind,
            members: HashMap::new(),
            default_member: None,
        }
    }

    pub fn discriminant_kind(&self) -> DiscriminantKind {
        self.kind
    }

    /// Register a (discriminant, member) pair.
    ///
    /// Fails if the discriminant's kind does not match the union's. A member
    /// of [`Value::Empty`] registers an "absent" variant that consumes no
    /// bytes beyond the discriminant.
    pub fn add_member(&mut self, discriminant: Discriminant, member: Value) -> Result<()> {
        if discriminant.kind() != self.kind {
            return Err(NdrError::Marshal(format!(
                "discriminant {} does not match union kind {:?}",
                discriminant, self.kind
            )));
        }
        self.members.insert(discriminant, force_deferred(member));
        Ok(())
    }

    /// Remove a registered pair.
    pub fn remove_member(&mut self, discriminant: Discriminant) {
        self.members.remove(&discriminant);
    }

    /// Member shape to fall back to when a decoded discriminant has no
    /// catalog entry.
    pub fn set_default_member(&mut self, member: Value) {
        self.default_member = Some(Box::new(force_deferred(member)));
    }

    pub fn members(&self) -> &HashMap<Discriminant, Value> {
        &self.members
    }

    /// The resolved (discriminant, member) pair of a decoded union, or the
    /// single active pair of a union built for encoding.
    pub fn active(&self) -> Option<(Discriminant, &Value)> {
        if self.members.len() == 1 {
            self.members.iter().next().map(|(d, v)| (*d, v))
        } else {
            None
        }
    }

    pub(crate) fn arm_value_mut(&mut self) -> Option<&mut Value> {
        if self.members.len() == 1 {
            self.members.values_mut().next()
        } else {
            None
        }
    }

    /// Union alignment is keyed off the discriminant kind alone. The encode
    /// side sees one active member and the decode side sees the whole
    /// catalog, so the discriminant is the only basis both agree on; members
    /// apply their own alignment when written.
    pub fn alignment(&self) -> usize {
        self.kind.alignment()
    }

    /// Discriminant length plus the largest member length.
    pub fn wire_len(&self) -> usize {
        let largest = self.members.values().map(Value::wire_len).max().unwrap_or(0);
        self.kind.wire_len() + largest
    }

    pub(crate) fn encode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<Value>,
    ) -> Result<()> {
        let (discriminant, member) = match self.members.iter().next() {
            Some((d, v)) if self.members.len() == 1 => (*d, v),
            _ => return Err(NdrError::DiscriminantSerialization(self.members.len())),
        };

        stream.align_write(self.kind.alignment());
        discriminant.write(stream);

        // Absent variants consume nothing beyond the discriminant.
        if !matches!(member, Value::Empty) {
            member.encode(stream, deferred)?;
        }
        stream.align_write(self.alignment());
        Ok(())
    }

    pub(crate) fn decode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<DeferredRead>,
        path: &[PathStep],
    ) -> Result<NdrUnion> {
        if self.members.is_empty() {
            return Err(NdrError::DiscriminantDeserialization(
                "empty candidate catalog".to_string(),
            ));
        }

        stream.align_read(self.kind.alignment())?;
        let discriminant = Discriminant::read(self.kind, stream)?;

        let shape = match self.members.get(&discriminant) {
            Some(shape) => shape,
            None => match &self.default_member {
                Some(default) => default.as_ref(),
                None => {
                    return Err(NdrError::DiscriminantDeserialization(
                        discriminant.to_string(),
                    ))
                }
            },
        };

        let mut resolved = NdrUnion::new(self.kind);
        let member = if matches!(shape, Value::Empty) {
            Value::Empty
        } else {
            let mut member_path = path.to_vec();
            member_path.push(PathStep::Arm);
            shape.decode(stream, deferred, &member_path)?
        };
        resolved.members.insert(discriminant, member);
        stream.align_read(self.alignment())?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{marshal, unmarshal};

    fn short_union(disc: i16, member: Value) -> NdrUnion {
        let mut u = NdrUnion::new(DiscriminantKind::Short);
        u.add_member(Discriminant::Short(disc), member).unwrap();
        u
    }

    #[test]
    fn test_encode_requires_exactly_one_member() {
        let empty = NdrUnion::new(DiscriminantKind::Integer);
        let mut s = NdrStream::new();
        assert!(matches!(
            marshal(&mut s, &[Value::Union(empty)]),
            Err(NdrError::DiscriminantSerialization(0))
        ));

        let mut two = NdrUnion::new(DiscriminantKind::Integer);
        two.add_member(Discriminant::Integer(1), Value::U32(1)).unwrap();
        two.add_member(Discriminant::Integer(2), Value::U32(2)).unwrap();
        let mut s = NdrStream::new();
        assert!(matches!(
            marshal(&mut s, &[Value::Union(two)]),
            Err(NdrError::DiscriminantSerialization(2))
        ));
    }

    #[test]
    fn test_discriminant_kind_mismatch_rejected() {
        let mut u = NdrUnion::new(DiscriminantKind::Short);
        assert!(u
            .add_member(Discriminant::Integer(1), Value::U32(1))
            .is_err());
    }

    #[test]
    fn test_short_string_union_wire_layout() {
        let u = short_union(2, Value::Str("hello".to_string()));
        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Union(u)]).unwrap();

        assert_eq!(
            s.as_bytes(),
            &[
                2, 0, // discriminant
                0, 0, // pad to string alignment
                6, 0, 0, 0, // max_count ("hello" + NUL)
                0, 0, 0, 0, // offset
                6, 0, 0, 0, // actual_count
                b'h', b'e', b'l', b'l', b'o', 0, // chars
                0, 0, // pad to 4
            ]
        );
    }

    #[test]
    fn test_union_roundtrip_through_catalog() {
        let value = Value::Union(short_union(2, Value::Str("hello".to_string())));
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();

        let mut catalog = NdrUnion::new(DiscriminantKind::Short);
        catalog
            .add_member(Discriminant::Short(1), Value::U32(0))
            .unwrap();
        catalog
            .add_member(Discriminant::Short(2), Value::Str(String::new()))
            .unwrap();

        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Union(catalog.clone())]).unwrap();
        assert_eq!(decoded[0], value);
        // The dispatch catalog itself is untouched.
        assert_eq!(catalog.members().len(), 2);
    }

    #[test]
    fn test_empty_member_writes_only_discriminant() {
        let u = short_union(9, Value::Empty);
        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Union(u.clone())]).unwrap();
        assert_eq!(s.as_bytes(), &[9, 0]);

        let mut catalog = NdrUnion::new(DiscriminantKind::Short);
        catalog.add_member(Discriminant::Short(9), Value::Empty).unwrap();
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Union(catalog)]).unwrap();
        assert_eq!(decoded[0], Value::Union(u));
    }

    #[test]
    fn test_unknown_discriminant_without_default_fails() {
        let u = short_union(3, Value::U16(1));
        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Union(u)]).unwrap();

        let mut catalog = NdrUnion::new(DiscriminantKind::Short);
        catalog.add_member(Discriminant::Short(1), Value::U16(0)).unwrap();
        let mut r = NdrStream::from_slice(s.as_bytes());
        assert!(matches!(
            unmarshal(&mut r, &[Value::Union(catalog)]),
            Err(NdrError::DiscriminantDeserialization(_))
        ));
    }

    #[test]
    fn test_unknown_discriminant_with_empty_default_resolves() {
        let u = short_union(3, Value::Empty);
        let mut s = NdrStream::new();
        marshal(&mut s, &[Value::Union(u.clone())]).unwrap();

        let mut catalog = NdrUnion::new(DiscriminantKind::Short);
        catalog.add_member(Discriminant::Short(1), Value::U16(0)).unwrap();
        catalog.set_default_member(Value::Empty);
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[Value::Union(catalog)]).unwrap();
        assert_eq!(decoded[0], Value::Union(u));
    }

    #[test]
    fn test_union_reserves_largest_member_length() {
        let mut u = NdrUnion::new(DiscriminantKind::Integer);
        u.add_member(Discriminant::Integer(1), Value::U16(0)).unwrap();
        u.add_member(Discriminant::Integer(2), Value::U64(0)).unwrap();
        assert_eq!(u.wire_len(), 4 + 8);
        assert_eq!(u.alignment(), 4);
    }
}
