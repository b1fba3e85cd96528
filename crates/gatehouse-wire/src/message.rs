use std::fmt;

use prost::Message as ProstMessage;

use crate::tag::MsgTag;
use crate::varint::VarintError;

// Payload shapes. Field numbers are part of the deployed wire contract:
// unset fields are omitted on the wire and unknown field numbers inside a
// known message are skipped on decode.

/// Liveness probe with no payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheck {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetUserInfoRequest {
    #[prost(string, tag = "1")]
    pub token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditUserInfoRequest {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(message, optional, tag = "2")]
    pub user: Option<UserView>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthRequest {
    #[prost(string, tag = "1")]
    pub token: String,
}

/// Response envelope. Code 0 is success; see [`ResponseCode`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(uint32, tag = "1")]
    pub code: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginResponse {
    #[prost(message, optional, tag = "1")]
    pub response: Option<Response>,
    #[prost(string, tag = "2")]
    pub token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetUserInfoResponse {
    #[prost(message, optional, tag = "1")]
    pub response: Option<Response>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<UserView>,
}

/// User fields as they travel on the wire.
///
/// In requests, an empty field means "leave unchanged"; a field can therefore
/// not be set to the empty string over this format. In responses the password
/// field is always left empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserView {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub password: String,
    #[prost(string, tag = "3")]
    pub nickname: String,
    #[prost(string, tag = "4")]
    pub pic_path: String,
}

/// Enumerated response codes carried in the envelope.
///
/// Any unrecognized non-zero code decodes as `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    /// Success.
    Ok,
    /// Bad credentials, or an invalid or expired token.
    Auth,
    /// Persistence failure.
    Db,
    /// Well-formed but semantically invalid, e.g. unknown user.
    Input,
    /// Any other code.
    Unknown(u32),
}

impl ResponseCode {
    pub fn from_u32(val: u32) -> Self {
        match val {
            0 => ResponseCode::Ok,
            1 => ResponseCode::Auth,
            2 => ResponseCode::Db,
            3 => ResponseCode::Input,
            other => ResponseCode::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::Auth => 1,
            ResponseCode::Db => 2,
            ResponseCode::Input => 3,
            ResponseCode::Unknown(val) => val,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Ok => write!(f, "ok"),
            ResponseCode::Auth => write!(f, "auth"),
            ResponseCode::Db => write!(f, "db"),
            ResponseCode::Input => write!(f, "input"),
            ResponseCode::Unknown(val) => write!(f, "unknown ({})", val),
        }
    }
}

/// One message from the registry, decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    HealthCheck(HealthCheck),
    LoginRequest(LoginRequest),
    GetUserInfoRequest(GetUserInfoRequest),
    EditUserInfoRequest(EditUserInfoRequest),
    AuthRequest(AuthRequest),
    Response(Response),
    LoginResponse(LoginResponse),
    GetUserInfoResponse(GetUserInfoResponse),
}

impl Message {
    /// The wire tag of this variant. Total over the registry.
    pub fn tag(&self) -> MsgTag {
        match self {
            Message::HealthCheck(_) => MsgTag::HealthCheck,
            Message::LoginRequest(_) => MsgTag::LoginRequest,
            Message::GetUserInfoRequest(_) => MsgTag::GetUserInfoRequest,
            Message::EditUserInfoRequest(_) => MsgTag::EditUserInfoRequest,
            Message::AuthRequest(_) => MsgTag::AuthRequest,
            Message::Response(_) => MsgTag::Response,
            Message::LoginResponse(_) => MsgTag::LoginResponse,
            Message::GetUserInfoResponse(_) => MsgTag::GetUserInfoResponse,
        }
    }

    /// Encode the payload (without the frame header).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::HealthCheck(msg) => msg.encode_to_vec(),
            Message::LoginRequest(msg) => msg.encode_to_vec(),
            Message::GetUserInfoRequest(msg) => msg.encode_to_vec(),
            Message::EditUserInfoRequest(msg) => msg.encode_to_vec(),
            Message::AuthRequest(msg) => msg.encode_to_vec(),
            Message::Response(msg) => msg.encode_to_vec(),
            Message::LoginResponse(msg) => msg.encode_to_vec(),
            Message::GetUserInfoResponse(msg) => msg.encode_to_vec(),
        }
    }

    /// Decode a payload for a registered tag.
    ///
    /// Fails on a truncated or malformed payload; unknown field numbers
    /// within the payload are skipped.
    pub fn decode(tag: MsgTag, buf: &[u8]) -> Result<Message, WireError> {
        Ok(match tag {
            MsgTag::HealthCheck => Message::HealthCheck(HealthCheck::decode(buf)?),
            MsgTag::LoginRequest => Message::LoginRequest(LoginRequest::decode(buf)?),
            MsgTag::GetUserInfoRequest => {
                Message::GetUserInfoRequest(GetUserInfoRequest::decode(buf)?)
            }
            MsgTag::EditUserInfoRequest => {
                Message::EditUserInfoRequest(EditUserInfoRequest::decode(buf)?)
            }
            MsgTag::AuthRequest => Message::AuthRequest(AuthRequest::decode(buf)?),
            MsgTag::Response => Message::Response(Response::decode(buf)?),
            MsgTag::LoginResponse => Message::LoginResponse(LoginResponse::decode(buf)?),
            MsgTag::GetUserInfoResponse => {
                Message::GetUserInfoResponse(GetUserInfoResponse::decode(buf)?)
            }
        })
    }

    /// A default-valued container for a registered tag.
    ///
    /// Unregistered tag values are rejected earlier, at [`MsgTag::from_u64`].
    pub fn container(tag: MsgTag) -> Message {
        match tag {
            MsgTag::HealthCheck => Message::HealthCheck(HealthCheck::default()),
            MsgTag::LoginRequest => Message::LoginRequest(LoginRequest::default()),
            MsgTag::GetUserInfoRequest => {
                Message::GetUserInfoRequest(GetUserInfoRequest::default())
            }
            MsgTag::EditUserInfoRequest => {
                Message::EditUserInfoRequest(EditUserInfoRequest::default())
            }
            MsgTag::AuthRequest => Message::AuthRequest(AuthRequest::default()),
            MsgTag::Response => Message::Response(Response::default()),
            MsgTag::LoginResponse => Message::LoginResponse(LoginResponse::default()),
            MsgTag::GetUserInfoResponse => {
                Message::GetUserInfoResponse(GetUserInfoResponse::default())
            }
        }
    }
}

/// Errors produced while encoding or decoding wire data.
#[derive(Debug)]
pub enum WireError {
    /// The frame carried a tag with no registered variant.
    UnknownTag(u64),
    /// A frame header varint was malformed.
    Varint(VarintError),
    /// The payload did not decode as the tagged variant.
    Decode(prost::DecodeError),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnknownTag(tag) => write!(f, "unknown message tag: {}", tag),
            WireError::Varint(err) => write!(f, "bad frame header: {}", err),
            WireError::Decode(err) => write!(f, "bad payload: {}", err),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::UnknownTag(_) => None,
            WireError::Varint(err) => Some(err),
            WireError::Decode(err) => Some(err),
        }
    }
}

impl From<VarintError> for WireError {
    fn from(err: VarintError) -> Self {
        WireError::Varint(err)
    }
}

impl From<prost::DecodeError> for WireError {
    fn from(err: prost::DecodeError) -> Self {
        WireError::Decode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::ALL_TAGS;

    fn sample_user() -> UserView {
        UserView {
            id: "alice".to_string(),
            password: String::new(),
            nickname: "A".to_string(),
            pic_path: "/a.png".to_string(),
        }
    }

    fn samples() -> Vec<Message> {
        vec![
            Message::HealthCheck(HealthCheck::default()),
            Message::LoginRequest(LoginRequest {
                id: "alice".to_string(),
                password: "secret".to_string(),
            }),
            Message::GetUserInfoRequest(GetUserInfoRequest {
                token: "t-1".to_string(),
            }),
            Message::EditUserInfoRequest(EditUserInfoRequest {
                token: "t-1".to_string(),
                user: Some(sample_user()),
            }),
            Message::AuthRequest(AuthRequest {
                token: "t-1".to_string(),
            }),
            Message::Response(Response { code: 2 }),
            Message::LoginResponse(LoginResponse {
                response: Some(Response { code: 0 }),
                token: "t-1".to_string(),
            }),
            Message::GetUserInfoResponse(GetUserInfoResponse {
                response: Some(Response { code: 0 }),
                user: Some(sample_user()),
            }),
        ]
    }

    #[test]
    fn roundtrip_every_variant() {
        for message in samples() {
            let bytes = message.encode();
            let decoded = Message::decode(message.tag(), &bytes).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn container_matches_tag() {
        for &tag in &ALL_TAGS {
            assert_eq!(Message::container(tag).tag(), tag);
        }
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut bytes = Message::LoginRequest(LoginRequest {
            id: "alice".to_string(),
            password: "secret".to_string(),
        })
        .encode();
        // Field 15, varint wire type, value 5: unknown to LoginRequest.
        bytes.extend_from_slice(&[0x78, 0x05]);
        // Field 14, length-delimited, three bytes.
        bytes.extend_from_slice(&[0x72, 0x03, b'x', b'y', b'z']);

        let decoded = Message::decode(MsgTag::LoginRequest, &bytes).unwrap();
        let Message::LoginRequest(req) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(req.id, "alice");
        assert_eq!(req.password, "secret");
    }

    #[test]
    fn truncated_payload_fails() {
        let bytes = Message::LoginResponse(LoginResponse {
            response: Some(Response { code: 0 }),
            token: "abcdef".to_string(),
        })
        .encode();
        let err = Message::decode(MsgTag::LoginResponse, &bytes[..bytes.len() - 2]);
        assert!(matches!(err, Err(WireError::Decode(_))));
    }

    #[test]
    fn unset_fields_are_omitted() {
        // An all-default message encodes to nothing at all.
        assert!(Message::LoginRequest(LoginRequest::default()).encode().is_empty());
        assert!(Message::HealthCheck(HealthCheck::default()).encode().is_empty());
    }

    #[test]
    fn response_codes_map() {
        assert_eq!(ResponseCode::from_u32(0), ResponseCode::Ok);
        assert_eq!(ResponseCode::from_u32(1), ResponseCode::Auth);
        assert_eq!(ResponseCode::from_u32(2), ResponseCode::Db);
        assert_eq!(ResponseCode::from_u32(3), ResponseCode::Input);
        assert_eq!(ResponseCode::from_u32(9), ResponseCode::Unknown(9));
        for code in 0..5 {
            assert_eq!(ResponseCode::from_u32(code).as_u32(), code);
        }
        assert!(ResponseCode::Ok.is_ok());
        assert!(!ResponseCode::Auth.is_ok());
    }
}
