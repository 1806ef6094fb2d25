//! Response status codes (spec.md §6) plus the synthetic client-local
//! status used for transport/node-generated failures.

use std::fmt;

/// A memcached response status, or the synthetic [`Status::InternalError`]
/// this client assigns to failures that never reached a server.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumeric,
    VBucketBelongsToAnotherServer,
    AuthRequired,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    Busy,
    TemporaryFailure,
    /// Client-generated: no server ever answered (`fail()`, send failure,
    /// submission refusal). Never appears on the wire.
    InternalError,
    /// A status byte this build does not recognize.
    Unknown(u16),
}

impl Status {
    pub const NO_ERROR: u16 = 0x00;
    pub const KEY_NOT_FOUND: u16 = 0x01;
    pub const KEY_EXISTS: u16 = 0x02;
    pub const VALUE_TOO_LARGE: u16 = 0x03;
    pub const INVALID_ARGUMENTS: u16 = 0x04;
    pub const ITEM_NOT_STORED: u16 = 0x05;
    pub const NON_NUMERIC: u16 = 0x06;
    pub const VBUCKET_BELONGS_TO_ANOTHER_SERVER: u16 = 0x07;
    pub const AUTH_REQUIRED: u16 = 0x20;
    pub const AUTH_CONTINUE: u16 = 0x21;
    pub const UNKNOWN_COMMAND: u16 = 0x81;
    pub const OUT_OF_MEMORY: u16 = 0x82;
    pub const BUSY: u16 = 0x85;
    pub const TEMPORARY_FAILURE: u16 = 0x86;

    /// Total ordering used by the `AnyOK` aggregation policy (spec.md
    /// §4.3) to pick a status when every attempt failed: lower rank wins.
    /// `NoError` can't appear here (it always short-circuits `AnyOK`
    /// immediately), but is included for a total, reusable order.
    pub fn rank(self) -> u32 {
        match self {
            Status::NoError => 0,
            Status::KeyNotFound => 1,
            Status::KeyExists => 2,
            Status::ItemNotStored => 3,
            Status::NonNumeric => 4,
            Status::ValueTooLarge => 5,
            Status::InvalidArguments => 6,
            Status::VBucketBelongsToAnotherServer => 7,
            Status::UnknownCommand => 8,
            Status::TemporaryFailure => 9,
            Status::Busy => 10,
            Status::OutOfMemory => 11,
            Status::Unknown(_) => 12,
            Status::InternalError => 13,
            Status::AuthContinue => 14,
            Status::AuthRequired => 15,
        }
    }
}

impl From<u16> for Status {
    fn from(val: u16) -> Self {
        match val {
            Self::NO_ERROR => Status::NoError,
            Self::KEY_NOT_FOUND => Status::KeyNotFound,
            Self::KEY_EXISTS => Status::KeyExists,
            Self::VALUE_TOO_LARGE => Status::ValueTooLarge,
            Self::INVALID_ARGUMENTS => Status::InvalidArguments,
            Self::ITEM_NOT_STORED => Status::ItemNotStored,
            Self::NON_NUMERIC => Status::NonNumeric,
            Self::VBUCKET_BELONGS_TO_ANOTHER_SERVER => Status::VBucketBelongsToAnotherServer,
            Self::AUTH_REQUIRED => Status::AuthRequired,
            Self::AUTH_CONTINUE => Status::AuthContinue,
            Self::UNKNOWN_COMMAND => Status::UnknownCommand,
            Self::OUT_OF_MEMORY => Status::OutOfMemory,
            Self::BUSY => Status::Busy,
            Self::TEMPORARY_FAILURE => Status::TemporaryFailure,
            other => Status::Unknown(other),
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        match status {
            Status::NoError => Status::NO_ERROR,
            Status::KeyNotFound => Status::KEY_NOT_FOUND,
            Status::KeyExists => Status::KEY_EXISTS,
            Status::ValueTooLarge => Status::VALUE_TOO_LARGE,
            Status::InvalidArguments => Status::INVALID_ARGUMENTS,
            Status::ItemNotStored => Status::ITEM_NOT_STORED,
            Status::NonNumeric => Status::NON_NUMERIC,
            Status::VBucketBelongsToAnotherServer => Status::VBUCKET_BELONGS_TO_ANOTHER_SERVER,
            Status::AuthRequired => Status::AUTH_REQUIRED,
            Status::AuthContinue => Status::AUTH_CONTINUE,
            Status::UnknownCommand => Status::UNKNOWN_COMMAND,
            Status::OutOfMemory => Status::OUT_OF_MEMORY,
            Status::Busy => Status::BUSY,
            Status::TemporaryFailure => Status::TEMPORARY_FAILURE,
            // InternalError never round-trips to the wire; callers that
            // try anyway get a value no real server would send.
            Status::InternalError => 0xffff,
            Status::Unknown(val) => val,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Status::NoError => "no error",
            Status::KeyNotFound => "key not found",
            Status::KeyExists => "key exists",
            Status::ValueTooLarge => "value too large",
            Status::InvalidArguments => "invalid arguments",
            Status::ItemNotStored => "item not stored",
            Status::NonNumeric => "incr/decr on non-numeric value",
            Status::VBucketBelongsToAnotherServer => "vbucket belongs to another server",
            Status::AuthRequired => "authentication required",
            Status::AuthContinue => "authentication continue",
            Status::UnknownCommand => "unknown command",
            Status::OutOfMemory => "out of memory",
            Status::Busy => "busy",
            Status::TemporaryFailure => "temporary failure",
            Status::InternalError => "internal client error",
            Status::Unknown(_) => "unknown status",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for Status {}

/// Errors caused by malformed or protocol-inconsistent wire data, as
/// opposed to a non-`NoError` status, which is a [`Status`] not a
/// [`ProtocolError`].
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid magic byte: {0:#x}")]
    InvalidMagic(u8),
    #[error("packet too small to contain a 24-byte header")]
    PacketTooSmall,
    #[error("body length in header does not match the bytes read")]
    BodySizeMismatch,
    /// A reply opaque didn't match the head of the pending FIFO (spec.md
    /// §4.4): fatal, triggers a transport reset.
    #[error("response opaque {got} did not match pending request opaque {expected}")]
    UnexpectedOpaque { expected: u32, got: u32 },
    /// A reply arrived for an opcode classified as quiet (spec.md §4.4):
    /// quiet opcodes never reply on success, so any reply is a protocol
    /// desync.
    #[error("received a reply for quiet opcode {0:#x}")]
    QuietOpcodeReply(u8),
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn auth_status_values_match_wire_spec() {
        assert_eq!(u16::from(Status::AuthRequired), 0x20);
        assert_eq!(u16::from(Status::AuthContinue), 0x21);
        assert_eq!(Status::from(0x20u16), Status::AuthRequired);
        assert_eq!(Status::from(0x21u16), Status::AuthContinue);
    }

    #[test]
    fn priority_rank_orders_key_not_found_above_internal_error() {
        assert!(Status::KeyNotFound.rank() < Status::InternalError.rank());
        assert!(Status::KeyNotFound.rank() < Status::Busy.rank());
        assert!(Status::NoError.rank() < Status::KeyNotFound.rank());
    }
}
