//! Core object-layer types

use std::fmt;

use uuid::{uuid, Uuid};

/// Well-known interface identifiers
pub mod iid {
    use uuid::{uuid, Uuid};

    /// IUnknown
    pub const IUNKNOWN: Uuid = uuid!("00000000-0000-0000-c000-000000000046");
    /// IDispatch, the standard dispatch interface probed by the
    /// dual-interface check
    pub const IDISPATCH: Uuid = uuid!("00020400-0000-0000-c000-000000000046");
}

/// Nil identifier, used as a decode placeholder
pub const NIL_UUID: Uuid = uuid!("00000000-0000-0000-0000-000000000000");

/// A remote interface instance: object identity plus interface identity.
///
/// Immutable once obtained. Two pointers with the same `ipid` refer to the
/// same remote object, possibly through different interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfacePointer {
    ipid: Uuid,
    iid: Uuid,
    length: u32,
}

impl InterfacePointer {
    /// Marshaled size of a standard interface pointer blob.
    pub const STANDARD_LENGTH: u32 = 36;

    pub fn new(ipid: Uuid, iid: Uuid) -> Self {
        Self {
            ipid,
            iid,
            length: Self::STANDARD_LENGTH,
        }
    }

    pub fn with_length(ipid: Uuid, iid: Uuid, length: u32) -> Self {
        Self { ipid, iid, length }
    }

    /// Object identity (interface pointer identifier)
    pub fn ipid(&self) -> Uuid {
        self.ipid
    }

    /// Interface identity
    pub fn iid(&self) -> Uuid {
        self.iid
    }

    /// Marshaled length of the pointer blob
    pub fn length(&self) -> u32 {
        self.length
    }
}

impl fmt::Display for InterfacePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ipid, self.iid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_identity() {
        let ipid = Uuid::new_v4();
        let a = InterfacePointer::new(ipid, iid::IUNKNOWN);
        let b = InterfacePointer::new(ipid, iid::IDISPATCH);
        assert_eq!(a.ipid(), b.ipid());
        assert_ne!(a.iid(), b.iid());
        assert_eq!(a.length(), InterfacePointer::STANDARD_LENGTH);
    }

    #[test]
    fn test_dispatch_iid_value() {
        assert_eq!(
            iid::IDISPATCH.to_string(),
            "00020400-0000-0000-c000-000000000046"
        );
    }
}
