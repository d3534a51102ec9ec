//! Numeric result codes carried in reply payloads.

/// The `code` field of every reply payload.
///
/// `0` is success; everything else is a failure kind. The numbering is
/// shared with deployed replicas and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ResponseCode {
    /// Request succeeded.
    Success = 0,
    /// Unclassified failure (server-side).
    Error = 1,
    /// Content collided with what the server already holds.
    Collision = 2,
    /// The user is not registered.
    NoUser = 3,
    /// The filesystem is not registered.
    NoFileSystem = 4,
    /// The server is not ready to answer yet.
    Waiting = 5,
    /// The addressed object does not exist.
    NotFound = 6,
    /// The request is valid but not supported.
    NotImplemented = 7,
    /// The request could not be decoded.
    Malformed = 8,
    /// The caller is not allowed to touch the resource.
    AuthError = 9,
}

impl ResponseCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Converts from a numeric code.
    #[must_use]
    pub const fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Error),
            2 => Some(Self::Collision),
            3 => Some(Self::NoUser),
            4 => Some(Self::NoFileSystem),
            5 => Some(Self::Waiting),
            6 => Some(Self::NotFound),
            7 => Some(Self::NotImplemented),
            8 => Some(Self::Malformed),
            9 => Some(Self::AuthError),
            _ => None,
        }
    }

    /// Returns true for [`ResponseCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<ResponseCode> for u32 {
    fn from(code: ResponseCode) -> Self {
        code.as_u32()
    }
}

impl TryFrom<u32> for ResponseCode {
    type Error = String;

    fn try_from(code: u32) -> Result<Self, String> {
        Self::from_u32(code).ok_or_else(|| format!("unknown response code {code}"))
    }
}
