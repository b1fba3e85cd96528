//! Wire format for the gatehouse RPC.
//!
//! A framed message on the wire is `<tag: varint> <len: varint> <len bytes>`,
//! where the tag selects a variant from the append-only registry in [`MsgTag`]
//! and the payload is the protobuf encoding of that variant. Varints are
//! base-128 little-endian with MSB continuation.
//!
//! This crate is transport-agnostic: it only deals in byte slices. The
//! session crate owns reading and writing frames over a connection.

pub mod message;
pub mod tag;
pub mod varint;

pub use message::{
    AuthRequest, EditUserInfoRequest, GetUserInfoRequest, GetUserInfoResponse, HealthCheck,
    LoginRequest, LoginResponse, Message, Response, ResponseCode, UserView, WireError,
};
pub use tag::{MsgTag, UnknownTag};
pub use varint::{decode_varint, encode_varint, VarintError, MAX_VARINT_LEN};
