//! Conformant arrays
//!
//! Wire format: an aligned `max_count: u32` prefix followed by the elements,
//! each aligned to the element shape. The array carries an element template
//! that doubles as the decode shape; building an array from a non-empty item
//! list infers the template from the first item's tag.

use std::collections::VecDeque;

use crate::error::{NdrError, Result, MAX_DECODE_ALLOCATION};
use crate::stream::NdrStream;
use crate::structure::force_deferred;
use crate::value::{DeferredRead, PathStep, Value};

/// Conformant array of homogeneous values.
#[derive(Debug, Clone, PartialEq)]
pub struct NdrArray {
    template: Box<Value>,
    items: Vec<Value>,
}

impl NdrArray {
    /// Build an array from its items, inferring the element shape from the
    /// first item.
    pub fn new(items: Vec<Value>) -> Result<Self> {
        let template = match items.first() {
            Some(Value::Empty) | None => {
                return Err(NdrError::TypeInference(
                    "array element shape cannot be inferred",
                ))
            }
            Some(first) => first.clone(),
        };
        Ok(Self::with_template(template, items))
    }

    /// Build an array with an explicit element template. An empty item list
    /// with a template is a valid decode shape.
    pub fn with_template(template: Value, items: Vec<Value>) -> Self {
        Self {
            template: Box::new(force_deferred(template)),
            items: items.into_iter().map(force_deferred).collect(),
        }
    }

    pub fn template(&self) -> &Value {
        &self.template
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn item_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.items.get_mut(index)
    }

    /// The conformance prefix aligns to 4; elements may demand more.
    pub fn alignment(&self) -> usize {
        self.template.alignment().max(4)
    }

    pub fn wire_len(&self) -> usize {
        let mut len = 4usize;
        for item in &self.items {
            len += NdrStream::align_padding(len, item.alignment());
            len += item.wire_len();
        }
        len
    }

    pub(crate) fn encode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<Value>,
    ) -> Result<()> {
        stream.write_u32(self.items.len() as u32);
        for item in &self.items {
            item.encode(stream, deferred)?;
        }
        Ok(())
    }

    pub(crate) fn decode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<DeferredRead>,
        path: &[PathStep],
    ) -> Result<NdrArray> {
        let max_count = stream.read_u32()? as usize;
        if max_count > MAX_DECODE_ALLOCATION {
            return Err(NdrError::AllocationLimitExceeded {
                requested: max_count,
                limit: MAX_DECODE_ALLOCATION,
            });
        }

        let mut items = Vec::with_capacity(max_count);
        for index in 0..max_count {
            let mut item_path = path.to_vec();
            item_path.push(PathStep::Item(index));
            items.push(self.template.decode(stream, deferred, &item_path)?);
        }
        Ok(NdrArray {
            template: self.template.clone(),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{marshal, unmarshal};
    use uuid::Uuid;

    #[test]
    fn test_u32_array_roundtrip() {
        let value = Value::Array(
            NdrArray::new(vec![Value::U32(1), Value::U32(2), Value::U32(3)]).unwrap(),
        );
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();
        assert_eq!(s.position(), 4 + 12);

        let shape = Value::Array(NdrArray::with_template(Value::U32(0), vec![]));
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[shape]).unwrap();
        match &decoded[0] {
            Value::Array(a) => {
                assert_eq!(a.items(), &[Value::U32(1), Value::U32(2), Value::U32(3)])
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_uuid_array_wire_layout() {
        let id = Uuid::parse_str("00000000-0000-0000-c000-000000000046").unwrap();
        let value = Value::Array(NdrArray::new(vec![Value::Uuid(id)]).unwrap());
        let mut s = NdrStream::new();
        marshal(&mut s, &[value]).unwrap();
        // max_count prefix + one 16-byte id
        assert_eq!(s.position(), 20);
        assert_eq!(&s.as_bytes()[..4], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(matches!(
            NdrArray::new(vec![]),
            Err(NdrError::TypeInference(_))
        ));
        assert!(matches!(
            NdrArray::new(vec![Value::Empty]),
            Err(NdrError::TypeInference(_))
        ));
    }

    #[test]
    fn test_oversized_conformance_rejected() {
        let mut s = NdrStream::new();
        s.write_u32(u32::MAX);
        let shape = Value::Array(NdrArray::with_template(Value::U32(0), vec![]));
        let mut r = NdrStream::from_slice(s.as_bytes());
        assert!(matches!(
            unmarshal(&mut r, &[shape]),
            Err(NdrError::AllocationLimitExceeded { .. })
        ));
    }
}
