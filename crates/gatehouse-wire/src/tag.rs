use std::fmt;

/// Wire tags for the message registry.
///
/// The registry is append-only: adding a variant assigns a new tag, existing
/// tags are never renumbered. Gaps are permitted. The same table is used by
/// both peers, so an unknown tag is a fatal per-connection error.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgTag {
    /// Liveness probe; echoed back verbatim.
    HealthCheck = 0,

    /// Credential check, issues a token on success.
    LoginRequest = 1,

    /// Fetch the user record behind a token.
    GetUserInfoRequest = 2,

    /// Field-selective update of the user record behind a token.
    EditUserInfoRequest = 3,

    /// Bare token validity check.
    AuthRequest = 4,

    /// Bare response envelope.
    Response = 5,

    /// Response to LoginRequest.
    LoginResponse = 6,

    /// Response to GetUserInfoRequest.
    GetUserInfoResponse = 7,
}

/// Every registered tag, in wire order.
pub const ALL_TAGS: [MsgTag; 8] = [
    MsgTag::HealthCheck,
    MsgTag::LoginRequest,
    MsgTag::GetUserInfoRequest,
    MsgTag::EditUserInfoRequest,
    MsgTag::AuthRequest,
    MsgTag::Response,
    MsgTag::LoginResponse,
    MsgTag::GetUserInfoResponse,
];

impl MsgTag {
    /// Convert from a u64 wire value.
    /// Returns None if the value is not a registered tag.
    pub fn from_u64(val: u64) -> Option<Self> {
        Some(match val {
            0 => MsgTag::HealthCheck,
            1 => MsgTag::LoginRequest,
            2 => MsgTag::GetUserInfoRequest,
            3 => MsgTag::EditUserInfoRequest,
            4 => MsgTag::AuthRequest,
            5 => MsgTag::Response,
            6 => MsgTag::LoginResponse,
            7 => MsgTag::GetUserInfoResponse,
            _ => return None,
        })
    }

    /// Convert to u64 for wire transmission.
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            MsgTag::HealthCheck => "HealthCheck",
            MsgTag::LoginRequest => "LoginRequest",
            MsgTag::GetUserInfoRequest => "GetUserInfoRequest",
            MsgTag::EditUserInfoRequest => "EditUserInfoRequest",
            MsgTag::AuthRequest => "AuthRequest",
            MsgTag::Response => "Response",
            MsgTag::LoginResponse => "LoginResponse",
            MsgTag::GetUserInfoResponse => "GetUserInfoResponse",
        }
    }
}

impl TryFrom<u64> for MsgTag {
    type Error = UnknownTag;

    fn try_from(val: u64) -> Result<Self, Self::Error> {
        MsgTag::from_u64(val).ok_or(UnknownTag(val))
    }
}

impl From<MsgTag> for u64 {
    fn from(tag: MsgTag) -> u64 {
        tag.as_u64()
    }
}

impl fmt::Display for MsgTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u64())
    }
}

/// Error when converting from an unregistered tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTag(pub u64);

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message tag: {}", self.0)
    }
}

impl std::error::Error for UnknownTag {}
