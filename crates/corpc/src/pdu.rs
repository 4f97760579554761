//! Connection-oriented RPC PDU types
//!
//! Wire format per DCE 1.1 C706 / MS-RPCE. Every fragment starts with the
//! 16-byte common header:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ptype  | pflags |
//! +--------+--------+--------+--------+
//! |        data representation        |
//! +--------+--------+--------+--------+
//! |   frag_len      |   auth_len      |
//! +--------+--------+--------+--------+
//! |             call_id               |
//! +--------+--------+--------+--------+
//! ```
//!
//! `frag_length` always equals header size plus encoded body size; a
//! mismatch is a hard parse failure. The body is keyed by the packet-type
//! discriminant and reads/writes itself against the shared [`NdrStream`]
//! primitives, so the framing layer stays body-agnostic.

use bytes::Bytes;
use ndr::NdrStream;
use uuid::Uuid;

use crate::context::{
    read_context_list, read_result_list, write_context_list, write_result_list, ContextResult,
    PresentationContext,
};
use crate::error::{Result, RpcError};

/// RPC protocol version
pub const RPC_VERSION: u8 = 5;
/// RPC protocol minor version
pub const RPC_VERSION_MINOR: u8 = 0;

/// Default fragment size offered during negotiation
pub const DEFAULT_FRAGMENT_SIZE: u16 = 4280;

/// Connection-oriented packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResponse = 15,
    Shutdown = 17,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Fault),
            11 => Ok(Self::Bind),
            12 => Ok(Self::BindAck),
            13 => Ok(Self::BindNak),
            14 => Ok(Self::AlterContext),
            15 => Ok(Self::AlterContextResponse),
            17 => Ok(Self::Shutdown),
            other => Err(RpcError::UnknownPacketType(other)),
        }
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// First fragment
    pub const FIRST_FRAG: u8 = 0x01;
    /// Last fragment
    pub const LAST_FRAG: u8 = 0x02;
    /// Cancel pending
    pub const PENDING_CANCEL: u8 = 0x04;
    /// Supports concurrent multiplexing
    pub const CONC_MPX: u8 = 0x10;
    /// Did not execute
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    /// Maybe semantics requested
    pub const MAYBE: u8 = 0x40;
    /// Object UUID present in the request body
    pub const OBJECT_UUID: u8 = 0x80;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags for a complete (non-fragmented) PDU
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn set_first_frag(&mut self) -> &mut Self {
        self.0 |= Self::FIRST_FRAG;
        self
    }

    pub fn set_last_frag(&mut self) -> &mut Self {
        self.0 |= Self::LAST_FRAG;
        self
    }

    pub fn set_object_uuid(&mut self) -> &mut Self {
        self.0 |= Self::OBJECT_UUID;
        self
    }

    pub fn is_first_frag(&self) -> bool {
        (self.0 & Self::FIRST_FRAG) != 0
    }

    pub fn is_last_frag(&self) -> bool {
        (self.0 & Self::LAST_FRAG) != 0
    }

    pub fn has_object_uuid(&self) -> bool {
        (self.0 & Self::OBJECT_UUID) != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Integer representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntRep {
    BigEndian = 0,
    LittleEndian = 1,
}

/// Character representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharRep {
    Ascii = 0,
    Ebcdic = 1,
}

/// Floating point representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRep {
    Ieee = 0,
    Vax = 1,
    Cray = 2,
    Ibm = 3,
}

/// Data representation format label
///
/// Byte 0 packs character (low nibble) and integer (high nibble)
/// representation; byte 1 is the float format; bytes 2-3 are reserved.
/// Every multi-byte field after the label honors the integer representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation {
    pub int_rep: IntRep,
    pub char_rep: CharRep,
    pub float_rep: FloatRep,
}

impl DataRepresentation {
    /// NDR default: little-endian, ASCII, IEEE
    pub fn ndr() -> Self {
        Self {
            int_rep: IntRep::LittleEndian,
            char_rep: CharRep::Ascii,
            float_rep: FloatRep::Ieee,
        }
    }

    /// Big-endian variant
    pub fn big_endian() -> Self {
        Self {
            int_rep: IntRep::BigEndian,
            char_rep: CharRep::Ascii,
            float_rep: FloatRep::Ieee,
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let byte0 = (self.char_rep as u8) | ((self.int_rep as u8) << 4);
        [byte0, self.float_rep as u8, 0, 0]
    }

    pub fn decode(data: [u8; 4]) -> Self {
        let int_rep = if (data[0] & 0xF0) == 0 {
            IntRep::BigEndian
        } else {
            IntRep::LittleEndian
        };
        let char_rep = if (data[0] & 0x0F) == 0 {
            CharRep::Ascii
        } else {
            CharRep::Ebcdic
        };
        let float_rep = match data[1] {
            0 => FloatRep::Ieee,
            1 => FloatRep::Vax,
            2 => FloatRep::Cray,
            _ => FloatRep::Ibm,
        };
        Self {
            int_rep,
            char_rep,
            float_rep,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        self.int_rep == IntRep::LittleEndian
    }
}

impl Default for DataRepresentation {
    fn default() -> Self {
        Self::ndr()
    }
}

/// Common PDU header (16 bytes)
#[derive(Debug, Clone)]
pub struct PduHeader {
    pub version: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRepresentation,
    /// Total fragment length: header plus encoded body
    pub frag_length: u16,
    pub auth_length: u16,
    /// Correlates a request with its response; echoed unchanged
    pub call_id: u32,
}

impl PduHeader {
    /// Header size in bytes
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: RPC_VERSION,
            version_minor: RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRepresentation::ndr(),
            frag_length: 0, // set at frame time
            auth_length: 0,
            call_id,
        }
    }

    /// Write the header; the stream's byte order must match `data_rep`.
    pub fn write(&self, stream: &mut NdrStream) {
        stream.write_u8(self.version);
        stream.write_u8(self.version_minor);
        stream.write_u8(self.packet_type as u8);
        stream.write_u8(self.packet_flags.as_u8());
        stream.write_bytes(&self.data_rep.encode());
        stream.write_u16(self.frag_length);
        stream.write_u16(self.auth_length);
        stream.write_u32(self.call_id);
    }

    /// Parse a header from the start of a fragment.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::MalformedPdu(format!(
                "header needs {} bytes, have {}",
                Self::SIZE,
                data.len()
            )));
        }

        let version = data[0];
        if version != RPC_VERSION {
            return Err(RpcError::VersionMismatch(version));
        }
        let version_minor = data[1];
        let packet_type = PacketType::from_u8(data[2])?;
        let packet_flags = PacketFlags::from_u8(data[3]);
        let data_rep = DataRepresentation::decode([data[4], data[5], data[6], data[7]]);

        let le = data_rep.is_little_endian();
        let read_u16 = |b: [u8; 2]| if le { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) };
        let frag_length = read_u16([data[8], data[9]]);
        let auth_length = read_u16([data[10], data[11]]);
        let call_id = if le {
            u32::from_le_bytes([data[12], data[13], data[14], data[15]])
        } else {
            u32::from_be_bytes([data[12], data[13], data[14], data[15]])
        };

        Ok(Self {
            version,
            version_minor,
            packet_type,
            packet_flags,
            data_rep,
            frag_length,
            auth_length,
            call_id,
        })
    }
}

/// Bind body: the opening context negotiation
#[derive(Debug, Clone)]
pub struct BindBody {
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<PresentationContext>,
}

impl BindBody {
    pub fn new(contexts: Vec<PresentationContext>) -> Self {
        Self {
            max_xmit_frag: DEFAULT_FRAGMENT_SIZE,
            max_recv_frag: DEFAULT_FRAGMENT_SIZE,
            assoc_group_id: 0,
            context_list: contexts,
        }
    }

    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u16(self.max_xmit_frag);
        stream.write_u16(self.max_recv_frag);
        stream.write_u32(self.assoc_group_id);
        write_context_list(stream, &self.context_list);
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        let max_xmit_frag = stream.read_u16()?;
        let max_recv_frag = stream.read_u16()?;
        let assoc_group_id = stream.read_u32()?;
        let context_list = read_context_list(stream)?;
        Ok(Self {
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Bind acknowledgment body
#[derive(Debug, Clone)]
pub struct BindAckBody {
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResult>,
}

impl BindAckBody {
    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u16(self.max_xmit_frag);
        stream.write_u16(self.max_recv_frag);
        stream.write_u32(self.assoc_group_id);

        let addr = self.secondary_addr.as_bytes();
        stream.write_u16(addr.len() as u16 + 1);
        stream.write_bytes(addr);
        stream.write_u8(0);

        write_result_list(stream, &self.results);
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        let max_xmit_frag = stream.read_u16()?;
        let max_recv_frag = stream.read_u16()?;
        let assoc_group_id = stream.read_u32()?;

        let addr_len = stream.read_u16()? as usize;
        let mut addr = stream.read_bytes(addr_len)?;
        if addr.last() == Some(&0) {
            addr.pop();
        }
        let secondary_addr = String::from_utf8_lossy(&addr).into_owned();

        let results = read_result_list(stream)?;
        Ok(Self {
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Bind rejection body
#[derive(Debug, Clone)]
pub struct BindNakBody {
    pub reject_reason: u16,
}

impl BindNakBody {
    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u16(self.reject_reason);
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        Ok(Self {
            reject_reason: stream.read_u16()?,
        })
    }
}

/// Alter-context body: adds presentation contexts on a live association
///
/// The fragment limits are carried as signed values so that −1 can act as
/// the "unset" sentinel: at encode time an unset limit defaults to the
/// encoding stream's buffer capacity, tying PDU sizing to the transport
/// buffer rather than a protocol constant.
#[derive(Debug, Clone)]
pub struct AlterContextBody {
    pub max_transmit_fragment: i32,
    pub max_receive_fragment: i32,
    pub assoc_group_id: u32,
    pub context_list: Vec<PresentationContext>,
}

impl AlterContextBody {
    pub fn new(contexts: Vec<PresentationContext>) -> Self {
        Self {
            max_transmit_fragment: -1,
            max_receive_fragment: -1,
            assoc_group_id: 0,
            context_list: contexts,
        }
    }

    fn fragment_field(value: i32, stream: &NdrStream) -> u16 {
        if value < 0 {
            stream.capacity().min(usize::from(u16::MAX)) as u16
        } else {
            value.min(i32::from(u16::MAX)) as u16
        }
    }

    pub fn write_body(&self, stream: &mut NdrStream) {
        let xmit = Self::fragment_field(self.max_transmit_fragment, stream);
        let recv = Self::fragment_field(self.max_receive_fragment, stream);
        stream.write_u16(xmit);
        stream.write_u16(recv);
        stream.write_u32(self.assoc_group_id);
        write_context_list(stream, &self.context_list);
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        let max_transmit_fragment = i32::from(stream.read_u16()?);
        let max_receive_fragment = i32::from(stream.read_u16()?);
        let assoc_group_id = stream.read_u32()?;
        let context_list = read_context_list(stream)?;
        Ok(Self {
            max_transmit_fragment,
            max_receive_fragment,
            assoc_group_id,
            context_list,
        })
    }
}

/// Alter-context response body
#[derive(Debug, Clone)]
pub struct AlterContextResponseBody {
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResult>,
}

impl AlterContextResponseBody {
    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u16(self.max_xmit_frag);
        stream.write_u16(self.max_recv_frag);
        stream.write_u32(self.assoc_group_id);

        let addr = self.secondary_addr.as_bytes();
        stream.write_u16(addr.len() as u16 + 1);
        stream.write_bytes(addr);
        stream.write_u8(0);

        write_result_list(stream, &self.results);
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        let max_xmit_frag = stream.read_u16()?;
        let max_recv_frag = stream.read_u16()?;
        let assoc_group_id = stream.read_u32()?;

        let addr_len = stream.read_u16()? as usize;
        let mut addr = stream.read_bytes(addr_len)?;
        if addr.last() == Some(&0) {
            addr.pop();
        }
        let secondary_addr = String::from_utf8_lossy(&addr).into_owned();

        let results = read_result_list(stream)?;
        Ok(Self {
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Request body
#[derive(Debug, Clone)]
pub struct RequestBody {
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    /// Target object; presence is flagged in the header
    pub object: Option<Uuid>,
    pub stub: Bytes,
}

impl RequestBody {
    pub fn new(opnum: u16, stub: Bytes) -> Self {
        Self {
            alloc_hint: stub.len() as u32,
            context_id: 0,
            opnum,
            object: None,
            stub,
        }
    }

    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u32(self.alloc_hint);
        stream.write_u16(self.context_id);
        stream.write_u16(self.opnum);
        if let Some(object) = &self.object {
            stream.write_uuid(object);
        }
        stream.write_bytes(&self.stub);
    }

    pub fn read_body(stream: &mut NdrStream, header: &PduHeader) -> Result<Self> {
        let alloc_hint = stream.read_u32()?;
        let context_id = stream.read_u16()?;
        let opnum = stream.read_u16()?;
        let object = if header.packet_flags.has_object_uuid() {
            Some(stream.read_uuid()?)
        } else {
            None
        };
        let stub = read_stub(stream, header)?;
        Ok(Self {
            alloc_hint,
            context_id,
            opnum,
            object,
            stub,
        })
    }
}

/// Response body
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub: Bytes,
}

impl ResponseBody {
    pub fn new(stub: Bytes) -> Self {
        Self {
            alloc_hint: stub.len() as u32,
            context_id: 0,
            cancel_count: 0,
            stub,
        }
    }

    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u32(self.alloc_hint);
        stream.write_u16(self.context_id);
        stream.write_u8(self.cancel_count);
        stream.write_u8(0); // reserved
        stream.write_bytes(&self.stub);
    }

    pub fn read_body(stream: &mut NdrStream, header: &PduHeader) -> Result<Self> {
        let alloc_hint = stream.read_u32()?;
        let context_id = stream.read_u16()?;
        let cancel_count = stream.read_u8()?;
        let _reserved = stream.read_u8()?;
        let stub = read_stub(stream, header)?;
        Ok(Self {
            alloc_hint,
            context_id,
            cancel_count,
            stub,
        })
    }
}

/// The stub runs to the end of the fragment minus any trailing auth data.
fn read_stub(stream: &mut NdrStream, header: &PduHeader) -> Result<Bytes> {
    let auth_len = header.auth_length as usize;
    let remaining = stream.remaining();
    if auth_len > remaining {
        return Err(RpcError::MalformedPdu(format!(
            "auth length {auth_len} exceeds remaining body {remaining}"
        )));
    }
    Ok(Bytes::from(stream.read_bytes(remaining - auth_len)?))
}

/// Fault body
#[derive(Debug, Clone)]
pub struct FaultBody {
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultBody {
    pub fn new(status: u32) -> Self {
        Self {
            alloc_hint: 0,
            context_id: 0,
            cancel_count: 0,
            status,
        }
    }

    pub fn write_body(&self, stream: &mut NdrStream) {
        stream.write_u32(self.alloc_hint);
        stream.write_u16(self.context_id);
        stream.write_u8(self.cancel_count);
        stream.write_u8(0); // reserved
        stream.write_u32(self.status);
        stream.write_u32(0); // reserved
    }

    pub fn read_body(stream: &mut NdrStream) -> Result<Self> {
        let alloc_hint = stream.read_u32()?;
        let context_id = stream.read_u16()?;
        let cancel_count = stream.read_u8()?;
        let _reserved = stream.read_u8()?;
        let status = stream.read_u32()?;
        Ok(Self {
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

/// Type-specific PDU body, keyed by the packet-type discriminant
#[derive(Debug, Clone)]
pub enum PduBody {
    Bind(BindBody),
    BindAck(BindAckBody),
    BindNak(BindNakBody),
    AlterContext(AlterContextBody),
    AlterContextResponse(AlterContextResponseBody),
    Request(RequestBody),
    Response(ResponseBody),
    Fault(FaultBody),
    /// Empty body; the packet type itself instructs the peer to tear the
    /// session down after acknowledgment.
    Shutdown,
}

impl PduBody {
    pub fn packet_type(&self) -> PacketType {
        match self {
            PduBody::Bind(_) => PacketType::Bind,
            PduBody::BindAck(_) => PacketType::BindAck,
            PduBody::BindNak(_) => PacketType::BindNak,
            PduBody::AlterContext(_) => PacketType::AlterContext,
            PduBody::AlterContextResponse(_) => PacketType::AlterContextResponse,
            PduBody::Request(_) => PacketType::Request,
            PduBody::Response(_) => PacketType::Response,
            PduBody::Fault(_) => PacketType::Fault,
            PduBody::Shutdown => PacketType::Shutdown,
        }
    }

    fn write_body(&self, stream: &mut NdrStream) {
        match self {
            PduBody::Bind(b) => b.write_body(stream),
            PduBody::BindAck(b) => b.write_body(stream),
            PduBody::BindNak(b) => b.write_body(stream),
            PduBody::AlterContext(b) => b.write_body(stream),
            PduBody::AlterContextResponse(b) => b.write_body(stream),
            PduBody::Request(b) => b.write_body(stream),
            PduBody::Response(b) => b.write_body(stream),
            PduBody::Fault(b) => b.write_body(stream),
            PduBody::Shutdown => {}
        }
    }
}

/// A complete protocol fragment: common header plus typed body
#[derive(Debug, Clone)]
pub struct Pdu {
    pub header: PduHeader,
    pub body: PduBody,
}

impl Pdu {
    /// Build a PDU with a fresh header for the body's packet type.
    pub fn new(body: PduBody, call_id: u32) -> Self {
        let mut header = PduHeader::new(body.packet_type(), call_id);
        if let PduBody::Request(request) = &body {
            if request.object.is_some() {
                header.packet_flags.set_object_uuid();
            }
        }
        Self { header, body }
    }

    /// Encode into a single on-wire fragment with `frag_length` computed.
    pub fn frame(&self) -> Bytes {
        self.frame_with_capacity(usize::from(DEFAULT_FRAGMENT_SIZE))
    }

    /// Encode with an explicit body-buffer capacity. The capacity is what an
    /// alter-context body falls back to for unset fragment limits.
    pub fn frame_with_capacity(&self, capacity: usize) -> Bytes {
        let le = self.header.data_rep.is_little_endian();

        let mut body = NdrStream::with_capacity_and_byte_order(capacity, le);
        self.body.write_body(&mut body);

        let mut header = self.header.clone();
        header.frag_length = (PduHeader::SIZE + body.position()) as u16;

        let mut out =
            NdrStream::with_capacity_and_byte_order(PduHeader::SIZE + body.position(), le);
        header.write(&mut out);
        out.write_bytes(body.as_bytes());
        out.into_bytes()
    }

    /// Parse one fragment. Fails with [`RpcError::MalformedPdu`] when the
    /// supplied bytes are shorter than the header's `frag_length` or the
    /// body is truncated.
    pub fn parse(data: &[u8]) -> Result<Pdu> {
        let header = PduHeader::parse(data)?;
        let frag_length = header.frag_length as usize;

        if frag_length < PduHeader::SIZE {
            return Err(RpcError::MalformedPdu(format!(
                "fragment length {frag_length} smaller than header"
            )));
        }
        if data.len() < frag_length {
            return Err(RpcError::MalformedPdu(format!(
                "fragment length {} but only {} bytes supplied",
                frag_length,
                data.len()
            )));
        }

        let body_bytes = &data[PduHeader::SIZE..frag_length];
        let mut stream = NdrStream::from_slice_with_byte_order(
            body_bytes,
            header.data_rep.is_little_endian(),
        );

        let body = match header.packet_type {
            PacketType::Bind => PduBody::Bind(BindBody::read_body(&mut stream)?),
            PacketType::BindAck => PduBody::BindAck(BindAckBody::read_body(&mut stream)?),
            PacketType::BindNak => PduBody::BindNak(BindNakBody::read_body(&mut stream)?),
            PacketType::AlterContext => {
                PduBody::AlterContext(AlterContextBody::read_body(&mut stream)?)
            }
            PacketType::AlterContextResponse => {
                PduBody::AlterContextResponse(AlterContextResponseBody::read_body(&mut stream)?)
            }
            PacketType::Request => {
                PduBody::Request(RequestBody::read_body(&mut stream, &header)?)
            }
            PacketType::Response => {
                PduBody::Response(ResponseBody::read_body(&mut stream, &header)?)
            }
            PacketType::Fault => PduBody::Fault(FaultBody::read_body(&mut stream)?),
            PacketType::Shutdown => PduBody::Shutdown,
        };

        Ok(Pdu { header, body })
    }
}
