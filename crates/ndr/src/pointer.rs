//! NDR pointers
//!
//! Two axes matter on the wire:
//!
//! - Reference pointers have no wire representation of their own; the
//!   referent follows inline and must not be null.
//! - Non-reference pointers write a 4-byte referent token (0 for null). The
//!   payload follows either immediately or, when the pointer is deferred,
//!   after all inline fields of the enclosing aggregate.
//!
//! Struct, union and array members force non-reference pointers into the
//! deferred form; breaking that discipline corrupts any aggregate with more
//! than one pointer.

use std::collections::VecDeque;

use crate::error::{NdrError, Result};
use crate::stream::NdrStream;
use crate::value::{DeferredRead, PathStep, Value};

/// Referent token written for every non-null pointer.
const REFERENT_ID: u32 = 1;

/// Reference wrapper around a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub struct NdrPointer {
    /// The wrapped value; `None` encodes as a null token.
    pub referent: Option<Value>,
    /// Payload written after the enclosing inline section.
    pub is_deferred: bool,
    /// Reference semantics: no token, referent inline, never null.
    pub is_reference: bool,
}

impl NdrPointer {
    /// Non-reference pointer with an inline payload.
    pub fn new(referent: Value) -> Self {
        Self {
            referent: Some(referent),
            is_deferred: false,
            is_reference: false,
        }
    }

    /// Null non-reference pointer.
    pub fn null() -> Self {
        Self {
            referent: None,
            is_deferred: false,
            is_reference: false,
        }
    }

    /// Reference pointer; the referent is encoded inline with no token.
    pub fn reference(referent: Value) -> Self {
        Self {
            referent: Some(referent),
            is_deferred: false,
            is_reference: true,
        }
    }

    /// Mark the payload as deferred.
    pub fn deferred(mut self) -> Self {
        self.is_deferred = true;
        self
    }

    pub fn is_null(&self) -> bool {
        self.referent.is_none()
    }

    pub fn referent(&self) -> Option<&Value> {
        self.referent.as_ref()
    }

    pub fn alignment(&self) -> usize {
        if self.is_reference {
            self.referent.as_ref().map_or(1, Value::alignment)
        } else {
            4
        }
    }

    pub fn wire_len(&self) -> usize {
        let referent_len = self.referent.as_ref().map_or(0, Value::wire_len);
        if self.is_reference {
            referent_len
        } else {
            4 + referent_len
        }
    }

    pub(crate) fn encode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<Value>,
    ) -> Result<()> {
        if self.is_reference {
            let referent = self.referent.as_ref().ok_or(NdrError::NullReference)?;
            return referent.encode(stream, deferred);
        }

        match &self.referent {
            None => stream.write_u32(0),
            Some(referent) => {
                stream.write_u32(REFERENT_ID);
                if self.is_deferred {
                    deferred.push_back(referent.clone());
                } else {
                    referent.encode(stream, deferred)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode(
        &self,
        stream: &mut NdrStream,
        deferred: &mut VecDeque<DeferredRead>,
        path: &[PathStep],
    ) -> Result<NdrPointer> {
        let shape = self.referent.as_ref();

        if self.is_reference {
            let shape = shape.ok_or(NdrError::NullReference)?;
            let mut referent_path = path.to_vec();
            referent_path.push(PathStep::Referent);
            let referent = shape.decode(stream, deferred, &referent_path)?;
            return Ok(NdrPointer::reference(referent));
        }

        let token = stream.read_u32()?;
        let mut decoded = NdrPointer {
            referent: None,
            is_deferred: self.is_deferred,
            is_reference: false,
        };
        if token != 0 {
            let shape = shape.ok_or_else(|| {
                NdrError::Unmarshal("non-null pointer but shape has no referent".to_string())
            })?;
            if self.is_deferred {
                deferred.push_back(DeferredRead {
                    path: path.to_vec(),
                    shape: shape.clone(),
                });
            } else {
                let mut referent_path = path.to_vec();
                referent_path.push(PathStep::Referent);
                decoded.referent = Some(shape.decode(stream, deferred, &referent_path)?);
            }
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{marshal, unmarshal};

    #[test]
    fn test_inline_pointer_roundtrip() {
        let value = Value::Pointer(Box::new(NdrPointer::new(Value::U32(0xDEAD_BEEF))));
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();
        // token + payload
        assert_eq!(s.position(), 8);

        let shape = Value::Pointer(Box::new(NdrPointer::new(Value::U32(0))));
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[shape]).unwrap();
        assert_eq!(decoded[0], value);
    }

    #[test]
    fn test_null_pointer_is_zero_token() {
        let value = Value::Pointer(Box::new(NdrPointer::null()));
        let mut s = NdrStream::new();
        marshal(&mut s, &[value]).unwrap();
        assert_eq!(s.as_bytes(), &[0, 0, 0, 0]);

        let shape = Value::Pointer(Box::new(NdrPointer::new(Value::U32(0))));
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &[shape]).unwrap();
        assert_eq!(decoded[0], Value::Pointer(Box::new(NdrPointer::null())));
    }

    #[test]
    fn test_reference_pointer_has_no_token() {
        let value = Value::Pointer(Box::new(NdrPointer::reference(Value::U16(5))));
        let mut s = NdrStream::new();
        marshal(&mut s, std::slice::from_ref(&value)).unwrap();
        assert_eq!(s.as_bytes(), &[5, 0]);

        let shape = Value::Pointer(Box::new(NdrPointer::reference(Value::U16(0))));
        let mut r = NdrStream::from_slice(s.as_bytes());
        assert_eq!(unmarshal(&mut r, &[shape]).unwrap()[0], value);
    }

    #[test]
    fn test_null_reference_rejected() {
        let broken = NdrPointer {
            referent: None,
            is_deferred: false,
            is_reference: true,
        };
        let mut s = NdrStream::new();
        let result = marshal(&mut s, &[Value::Pointer(Box::new(broken))]);
        assert!(matches!(result, Err(NdrError::NullReference)));
    }

    #[test]
    fn test_deferred_pointer_payload_follows_inline() {
        // Deferred top-level pointer then a plain u16: token, u16, payload.
        let values = vec![
            Value::Pointer(Box::new(NdrPointer::new(Value::U32(9)).deferred())),
            Value::U16(3),
        ];
        let mut s = NdrStream::new();
        marshal(&mut s, &values).unwrap();
        assert_eq!(
            s.as_bytes(),
            &[
                1, 0, 0, 0, // token
                3, 0, // u16
                0, 0, // pad before deferred u32
                9, 0, 0, 0, // payload
            ]
        );

        let shapes = vec![
            Value::Pointer(Box::new(NdrPointer::new(Value::U32(0)).deferred())),
            Value::U16(0),
        ];
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &shapes).unwrap();
        assert_eq!(decoded, values);
    }
}
