//! Remote reference-counting wire protocol
//!
//! Every remote-reference-counted interface reserves the same opnums:
//! 0 = QueryInterface, 1 = RemAddRef, 2 = RemRelease. A reference-change
//! request carries the object ids and a requested delta:
//!
//! ```text
//! count: u16                  # number of object ids
//! object_ids: uuid[count]     # conformant array
//! requested: i32              # references to grant or revoke
//! reserved: i32
//! ```
//!
//! The response carries two result codes; the second is the per-id grant
//! status.

use ndr::{NdrArray, Value};
use uuid::Uuid;

use crate::call::RemoteCall;
use crate::error::{DcomError, Result};

/// Reserved opnum: QueryInterface
pub const OPNUM_QUERY_INTERFACE: u16 = 0;
/// Reserved opnum: RemAddRef
pub const OPNUM_ADD_REF: u16 = 1;
/// Reserved opnum: RemRelease
pub const OPNUM_RELEASE: u16 = 2;

/// References requested per remote round trip. Remote reference counting is
/// latency-bound; one call buys a batch that local add_refs then consume.
pub const DEFAULT_REF_BATCH: u32 = 5;

/// Build a RemAddRef/RemRelease call for one object id.
pub(crate) fn ref_change_call(opnum: u16, ipid: Uuid, requested: u32) -> Result<RemoteCall> {
    let ids = NdrArray::new(vec![Value::Uuid(ipid)])?;
    Ok(RemoteCall::new(opnum)
        .in_param(Value::U16(1))
        .in_param(Value::Array(ids))
        .in_param(Value::I32(requested as i32))
        .in_param(Value::I32(0))
        .out_shape(Value::I32(0))
        .out_shape(Value::I32(0)))
}

/// Check the per-id grant status of a reference-change response.
pub(crate) fn check_ref_change_results(results: &[Value]) -> Result<()> {
    match results.get(1) {
        Some(Value::I32(0)) => Ok(()),
        Some(Value::I32(code)) => Err(DcomError::RemoteCallFailure(*code as u32)),
        _ => Err(DcomError::Ndr(ndr::NdrError::Unmarshal(
            "reference-change response missing result code".to_string(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndr::{marshal, unmarshal, NdrStream};

    #[test]
    fn test_ref_change_stub_layout() {
        let ipid = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let call = ref_change_call(OPNUM_ADD_REF, ipid, DEFAULT_REF_BATCH).unwrap();
        assert_eq!(call.opnum(), OPNUM_ADD_REF);

        let mut s = NdrStream::new();
        marshal(&mut s, call.in_params()).unwrap();

        // count u16, pad 2, max_count u32, uuid, requested i32, reserved i32
        let wire = s.as_bytes();
        assert_eq!(wire.len(), 2 + 2 + 4 + 16 + 4 + 4);
        assert_eq!(&wire[0..2], &[1, 0]);
        assert_eq!(&wire[4..8], &[1, 0, 0, 0]);
        assert_eq!(&wire[24..28], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_ref_change_stub_decodes_server_side() {
        let ipid = Uuid::new_v4();
        let call = ref_change_call(OPNUM_RELEASE, ipid, 3).unwrap();
        let mut s = NdrStream::new();
        marshal(&mut s, call.in_params()).unwrap();

        let shapes = [
            Value::U16(0),
            Value::Array(NdrArray::with_template(Value::Uuid(Uuid::nil()), vec![])),
            Value::I32(0),
            Value::I32(0),
        ];
        let mut r = NdrStream::from_slice(s.as_bytes());
        let decoded = unmarshal(&mut r, &shapes).unwrap();
        assert_eq!(decoded[0], Value::U16(1));
        assert_eq!(decoded[2], Value::I32(3));
        match &decoded[1] {
            Value::Array(ids) => assert_eq!(ids.items(), &[Value::Uuid(ipid)]),
            other => panic!("expected id array, got {:?}", other),
        }
    }

    #[test]
    fn test_result_code_checking() {
        assert!(check_ref_change_results(&[Value::I32(0), Value::I32(0)]).is_ok());
        assert!(matches!(
            check_ref_change_results(&[Value::I32(0), Value::I32(5)]),
            Err(DcomError::RemoteCallFailure(5))
        ));
        assert!(check_ref_change_results(&[Value::I32(0)]).is_err());
    }
}
