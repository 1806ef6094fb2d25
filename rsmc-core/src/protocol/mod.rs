//! Binary protocol constants and pure codec functions (spec.md §4.2, §6).

mod frame;
mod header;
mod opcode;
mod status;

pub use frame::encode_request;
pub use header::{ResponseHeader, HEADER_LEN, MAGIC_REQUEST, MAGIC_RESPONSE};
pub use opcode::Opcode;
pub use status::{ProtocolError, Status};
