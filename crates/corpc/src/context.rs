//! Presentation contexts
//!
//! A presentation context binds an abstract syntax (the interface being
//! called) to the transfer syntaxes the client is willing to speak. The
//! transfer-syntax list is ordered by client preference; the server answers
//! with one result per offered context.

use ndr::NdrStream;
use uuid::{uuid, Uuid};

use crate::error::{Result, RpcError};

/// NDR transfer syntax identifier
pub const NDR_TRANSFER_SYNTAX: Uuid = uuid!("8a885d04-1ceb-11c9-9fe8-08002b104860");
/// NDR transfer syntax version
pub const NDR_TRANSFER_SYNTAX_VERSION: u16 = 2;

/// Interface or transfer syntax identifier with packed version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxId {
    pub uuid: Uuid,
    /// Major in the low 16 bits, minor in the high 16 bits
    pub version: u32,
}

impl SyntaxId {
    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: u32::from(major) | (u32::from(minor) << 16),
        }
    }

    /// The NDR transfer syntax, v2.0
    pub fn ndr() -> Self {
        Self::new(NDR_TRANSFER_SYNTAX, NDR_TRANSFER_SYNTAX_VERSION, 0)
    }

    pub fn major_version(&self) -> u16 {
        self.version as u16
    }

    pub fn minor_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn write(&self, stream: &mut NdrStream) {
        stream.write_uuid(&self.uuid);
        stream.write_u32(self.version);
    }

    pub fn read(stream: &mut NdrStream) -> Result<Self> {
        let uuid = stream.read_uuid()?;
        let version = stream.read_u32()?;
        Ok(Self { uuid, version })
    }
}

/// One negotiated (interface, transfer syntax) binding offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    /// Client preference order
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl PresentationContext {
    /// Offer one interface under the NDR transfer syntax.
    pub fn new(context_id: u16, abstract_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![SyntaxId::ndr()],
        }
    }

    pub fn write(&self, stream: &mut NdrStream) {
        stream.align_write(4);
        stream.write_u16(self.context_id);
        stream.write_u8(self.transfer_syntaxes.len() as u8);
        stream.write_u8(0); // reserved
        self.abstract_syntax.write(stream);
        for syntax in &self.transfer_syntaxes {
            syntax.write(stream);
        }
    }

    pub fn read(stream: &mut NdrStream) -> Result<Self> {
        stream.align_read(4)?;
        let context_id = stream.read_u16()?;
        let count = stream.read_u8()?;
        let _reserved = stream.read_u8()?;
        let abstract_syntax = SyntaxId::read(stream)?;
        let mut transfer_syntaxes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transfer_syntaxes.push(SyntaxId::read(stream)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Write a context list: count, reserved bytes, then the elements.
pub(crate) fn write_context_list(stream: &mut NdrStream, contexts: &[PresentationContext]) {
    stream.write_u8(contexts.len() as u8);
    stream.write_u8(0); // reserved
    stream.write_u16(0); // reserved2
    for context in contexts {
        context.write(stream);
    }
}

pub(crate) fn read_context_list(stream: &mut NdrStream) -> Result<Vec<PresentationContext>> {
    let count = stream.read_u8()?;
    let _reserved = stream.read_u8()?;
    let _reserved2 = stream.read_u16()?;
    let mut contexts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        contexts.push(PresentationContext::read(stream)?);
    }
    Ok(contexts)
}

/// Server verdict on one offered context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NegotiationResult {
    Acceptance = 0,
    UserRejection = 1,
    ProviderRejection = 2,
}

impl NegotiationResult {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::Acceptance),
            1 => Ok(Self::UserRejection),
            2 => Ok(Self::ProviderRejection),
            other => Err(RpcError::MalformedPdu(format!(
                "unknown negotiation result {other}"
            ))),
        }
    }
}

/// Per-context negotiation outcome with the selected transfer syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResult {
    pub result: NegotiationResult,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl ContextResult {
    pub fn accepted(transfer_syntax: SyntaxId) -> Self {
        Self {
            result: NegotiationResult::Acceptance,
            reason: 0,
            transfer_syntax,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == NegotiationResult::Acceptance
    }

    pub fn write(&self, stream: &mut NdrStream) {
        stream.write_u16(self.result as u16);
        stream.write_u16(self.reason);
        self.transfer_syntax.write(stream);
    }

    pub fn read(stream: &mut NdrStream) -> Result<Self> {
        let result = NegotiationResult::from_u16(stream.read_u16()?)?;
        let reason = stream.read_u16()?;
        let transfer_syntax = SyntaxId::read(stream)?;
        Ok(Self {
            result,
            reason,
            transfer_syntax,
        })
    }
}

pub(crate) fn write_result_list(stream: &mut NdrStream, results: &[ContextResult]) {
    stream.align_write(4);
    stream.write_u8(results.len() as u8);
    stream.write_u8(0); // reserved
    stream.write_u16(0); // reserved2
    for result in results {
        result.write(stream);
    }
}

pub(crate) fn read_result_list(stream: &mut NdrStream) -> Result<Vec<ContextResult>> {
    stream.align_read(4)?;
    let count = stream.read_u8()?;
    let _reserved = stream.read_u8()?;
    let _reserved2 = stream.read_u16()?;
    let mut results = Vec::with_capacity(count as usize);
    for _ in 0..count {
        results.push(ContextResult::read(stream)?);
    }
    Ok(results)
}
