//! OPC UA status codes.
//!
//! A [`StatusCode`] is a 32-bit value whose top two bits encode severity
//! (`0b10` = bad). Only the codes the transport layer produces or inspects
//! are named here; application layers may carry any value through.

use core::fmt;

/// A 32-bit OPC UA status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct StatusCode(pub u32);

pub const GOOD: StatusCode = StatusCode(0x0000_0000);

pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
pub const BAD_RESOURCE_UNAVAILABLE: StatusCode = StatusCode(0x8004_0000);
pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
pub const BAD_CERTIFICATE_INVALID: StatusCode = StatusCode(0x8012_0000);
pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8013_0000);
pub const BAD_NONCE_INVALID: StatusCode = StatusCode(0x8024_0000);
pub const BAD_SECURE_CHANNEL_ID_INVALID: StatusCode = StatusCode(0x8022_0000);
pub const BAD_SECURITY_MODE_REJECTED: StatusCode = StatusCode(0x80E7_0000);
pub const BAD_SECURITY_POLICY_REJECTED: StatusCode = StatusCode(0x80E8_0000);

pub const BAD_TCP_SERVER_TOO_BUSY: StatusCode = StatusCode(0x807D_0000);
pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807E_0000);
pub const BAD_TCP_SECURE_CHANNEL_UNKNOWN: StatusCode = StatusCode(0x807F_0000);
pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x8080_0000);
pub const BAD_TCP_INTERNAL_ERROR: StatusCode = StatusCode(0x8082_0000);
pub const BAD_TCP_ENDPOINT_URL_INVALID: StatusCode = StatusCode(0x8083_0000);
pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);
pub const BAD_SECURE_CHANNEL_TOKEN_UNKNOWN: StatusCode = StatusCode(0x8087_0000);
pub const BAD_SEQUENCE_NUMBER_INVALID: StatusCode = StatusCode(0x8088_0000);
pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);
pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);
pub const BAD_PROTOCOL_VERSION_UNSUPPORTED: StatusCode = StatusCode(0x80BE_0000);
pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x80B8_0000);
pub const BAD_RESPONSE_TOO_LARGE: StatusCode = StatusCode(0x80B9_0000);
pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8038_0000);
pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);

impl StatusCode {
    /// Whether the severity bits mark this code as bad.
    #[must_use]
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Whether the severity bits mark this code as good.
    #[must_use]
    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Symbolic name for known codes.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            GOOD => "Good",
            BAD_UNEXPECTED_ERROR => "Bad_UnexpectedError",
            BAD_INTERNAL_ERROR => "Bad_InternalError",
            BAD_RESOURCE_UNAVAILABLE => "Bad_ResourceUnavailable",
            BAD_COMMUNICATION_ERROR => "Bad_CommunicationError",
            BAD_TIMEOUT => "Bad_Timeout",
            BAD_SERVICE_UNSUPPORTED => "Bad_ServiceUnsupported",
            BAD_NOTHING_TO_DO => "Bad_NothingToDo",
            BAD_CERTIFICATE_INVALID => "Bad_CertificateInvalid",
            BAD_SECURITY_CHECKS_FAILED => "Bad_SecurityChecksFailed",
            BAD_NONCE_INVALID => "Bad_NonceInvalid",
            BAD_SECURE_CHANNEL_ID_INVALID => "Bad_SecureChannelIdInvalid",
            BAD_SECURITY_MODE_REJECTED => "Bad_SecurityModeRejected",
            BAD_SECURITY_POLICY_REJECTED => "Bad_SecurityPolicyRejected",
            BAD_TCP_SERVER_TOO_BUSY => "Bad_TcpServerTooBusy",
            BAD_TCP_MESSAGE_TYPE_INVALID => "Bad_TcpMessageTypeInvalid",
            BAD_TCP_SECURE_CHANNEL_UNKNOWN => "Bad_TcpSecureChannelUnknown",
            BAD_TCP_MESSAGE_TOO_LARGE => "Bad_TcpMessageTooLarge",
            BAD_TCP_INTERNAL_ERROR => "Bad_TcpInternalError",
            BAD_TCP_ENDPOINT_URL_INVALID => "Bad_TcpEndpointUrlInvalid",
            BAD_SECURE_CHANNEL_CLOSED => "Bad_SecureChannelClosed",
            BAD_SECURE_CHANNEL_TOKEN_UNKNOWN => "Bad_SecureChannelTokenUnknown",
            BAD_SEQUENCE_NUMBER_INVALID => "Bad_SequenceNumberInvalid",
            BAD_CONNECTION_CLOSED => "Bad_ConnectionClosed",
            BAD_INVALID_STATE => "Bad_InvalidState",
            BAD_PROTOCOL_VERSION_UNSUPPORTED => "Bad_ProtocolVersionUnsupported",
            BAD_REQUEST_TOO_LARGE => "Bad_RequestTooLarge",
            BAD_RESPONSE_TOO_LARGE => "Bad_ResponseTooLarge",
            BAD_ENCODING_ERROR => "Bad_EncodingError",
            BAD_DECODING_ERROR => "Bad_DecodingError",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "StatusCode({name})"),
            None => write!(f, "StatusCode(0x{:08X})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bits() {
        assert!(GOOD.is_good());
        assert!(!GOOD.is_bad());
        assert!(BAD_TIMEOUT.is_bad());
        assert!(!BAD_TIMEOUT.is_good());
    }

    #[test]
    fn display_known_and_unknown() {
        assert_eq!(BAD_CONNECTION_CLOSED.to_string(), "Bad_ConnectionClosed");
        assert_eq!(StatusCode(0x8123_4567).to_string(), "0x81234567");
    }

    #[test]
    fn named_codes_are_distinct() {
        let codes = [
            BAD_TCP_MESSAGE_TYPE_INVALID,
            BAD_TCP_SECURE_CHANNEL_UNKNOWN,
            BAD_TCP_MESSAGE_TOO_LARGE,
            BAD_TCP_ENDPOINT_URL_INVALID,
            BAD_SECURE_CHANNEL_ID_INVALID,
            BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
            BAD_SEQUENCE_NUMBER_INVALID,
            BAD_CONNECTION_CLOSED,
            BAD_PROTOCOL_VERSION_UNSUPPORTED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
