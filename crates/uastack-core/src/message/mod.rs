//! The service message model and its binary codec.
//!
//! The transport treats message bodies as opaque bytes produced and consumed
//! here: a `u32` type id followed by the fields in declaration order. Only
//! the services the secure-channel layer itself needs are modelled: the
//! channel handshake (OPN/CLO), endpoint discovery, the test-stack echo
//! service, and the generic fault.

pub mod variant;

pub use variant::Variant;

use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::UaError;
use crate::security::MessageSecurityMode;
use crate::status::{self, StatusCode};

// Binary-encoding type ids.
const ID_SERVICE_FAULT: u32 = 397;
const ID_GET_ENDPOINTS_REQUEST: u32 = 428;
const ID_GET_ENDPOINTS_RESPONSE: u32 = 431;
const ID_OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
const ID_OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
const ID_CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
const ID_CLOSE_SECURE_CHANNEL_RESPONSE: u32 = 455;
const ID_TEST_STACK_REQUEST: u32 = 410;
const ID_TEST_STACK_RESPONSE: u32 = 413;

/// Common header on every service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Caller-chosen correlation handle, echoed back in the response.
    pub request_handle: u32,
    /// Hint for the upper-layer timeout, milliseconds.
    pub timeout_hint: u32,
}

impl RequestHeader {
    pub fn new(request_handle: u32) -> Self {
        Self {
            request_handle,
            timeout_hint: 60_000,
        }
    }

    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.request_handle);
        writer.write_u32(self.timeout_hint);
    }

    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self, UaError> {
        Ok(Self {
            request_handle: reader.read_u32()?,
            timeout_hint: reader.read_u32()?,
        })
    }
}

/// Common header on every service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub request_handle: u32,
    pub service_result: StatusCode,
}

impl ResponseHeader {
    pub fn good(request_handle: u32) -> Self {
        Self {
            request_handle,
            service_result: status::GOOD,
        }
    }

    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.request_handle);
        writer.write_u32(self.service_result.0);
    }

    fn decode(reader: &mut BinaryReader<'_>) -> Result<Self, UaError> {
        Ok(Self {
            request_handle: reader.read_u32()?,
            service_result: StatusCode(reader.read_u32()?),
        })
    }
}

/// Whether an OPN requests a first token or a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityTokenRequestType {
    Issue,
    Renew,
}

impl SecurityTokenRequestType {
    fn to_u32(self) -> u32 {
        match self {
            SecurityTokenRequestType::Issue => 0,
            SecurityTokenRequestType::Renew => 1,
        }
    }

    fn from_u32(v: u32) -> Result<Self, UaError> {
        match v {
            0 => Ok(SecurityTokenRequestType::Issue),
            1 => Ok(SecurityTokenRequestType::Renew),
            _ => Err(UaError::new(
                status::BAD_DECODING_ERROR,
                format!("unknown token request type: {v}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelRequest {
    pub request_header: RequestHeader,
    pub client_protocol_version: u32,
    pub request_type: SecurityTokenRequestType,
    pub security_mode: MessageSecurityMode,
    pub client_nonce: Option<Vec<u8>>,
    pub requested_lifetime_ms: u32,
}

/// The issued token's public attributes, carried in the OPN response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub revised_lifetime_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelResponse {
    pub response_header: ResponseHeader,
    pub server_protocol_version: u32,
    pub token: ChannelSecurityToken,
    pub server_nonce: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSecureChannelRequest {
    pub request_header: RequestHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSecureChannelResponse {
    pub response_header: ResponseHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEndpointsRequest {
    pub request_header: RequestHeader,
    pub endpoint_url: String,
}

/// One advertised endpoint: url plus its security configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub security_policy_uri: String,
    pub security_mode: MessageSecurityMode,
    pub server_certificate: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEndpointsResponse {
    pub response_header: ResponseHeader,
    pub endpoints: Vec<EndpointDescription>,
}

/// Echo service used to exercise the stack end to end.
#[derive(Debug, Clone, PartialEq)]
pub struct TestStackRequest {
    pub request_header: RequestHeader,
    pub test_id: u32,
    pub iteration: i32,
    pub input: Variant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestStackResponse {
    pub response_header: ResponseHeader,
    pub output: Variant,
}

/// Response carrying only a bad service result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

/// Discriminant for handler registration and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    OpenSecureChannel,
    CloseSecureChannel,
    GetEndpoints,
    TestStack,
}

/// Any decodable service request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMessage {
    OpenSecureChannel(OpenSecureChannelRequest),
    CloseSecureChannel(CloseSecureChannelRequest),
    GetEndpoints(GetEndpointsRequest),
    TestStack(TestStackRequest),
}

impl RequestMessage {
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestMessage::OpenSecureChannel(_) => RequestKind::OpenSecureChannel,
            RequestMessage::CloseSecureChannel(_) => RequestKind::CloseSecureChannel,
            RequestMessage::GetEndpoints(_) => RequestKind::GetEndpoints,
            RequestMessage::TestStack(_) => RequestKind::TestStack,
        }
    }

    #[must_use]
    pub fn request_handle(&self) -> u32 {
        self.request_header().request_handle
    }

    #[must_use]
    pub fn request_header(&self) -> &RequestHeader {
        match self {
            RequestMessage::OpenSecureChannel(r) => &r.request_header,
            RequestMessage::CloseSecureChannel(r) => &r.request_header,
            RequestMessage::GetEndpoints(r) => &r.request_header,
            RequestMessage::TestStack(r) => &r.request_header,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(64);
        match self {
            RequestMessage::OpenSecureChannel(r) => {
                writer.write_u32(ID_OPEN_SECURE_CHANNEL_REQUEST);
                r.request_header.encode(&mut writer);
                writer.write_u32(r.client_protocol_version);
                writer.write_u32(r.request_type.to_u32());
                writer.write_u32(r.security_mode.to_u32());
                writer.write_byte_string(r.client_nonce.as_deref());
                writer.write_u32(r.requested_lifetime_ms);
            }
            RequestMessage::CloseSecureChannel(r) => {
                writer.write_u32(ID_CLOSE_SECURE_CHANNEL_REQUEST);
                r.request_header.encode(&mut writer);
            }
            RequestMessage::GetEndpoints(r) => {
                writer.write_u32(ID_GET_ENDPOINTS_REQUEST);
                r.request_header.encode(&mut writer);
                writer.write_string(Some(&r.endpoint_url));
            }
            RequestMessage::TestStack(r) => {
                writer.write_u32(ID_TEST_STACK_REQUEST);
                r.request_header.encode(&mut writer);
                writer.write_u32(r.test_id);
                writer.write_i32(r.iteration);
                r.input.encode(&mut writer);
            }
        }
        writer.into_vec()
    }

    pub fn decode(body: &[u8]) -> Result<Self, UaError> {
        let mut reader = BinaryReader::new(body);
        let type_id = reader.read_u32()?;
        let message = match type_id {
            ID_OPEN_SECURE_CHANNEL_REQUEST => {
                RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
                    request_header: RequestHeader::decode(&mut reader)?,
                    client_protocol_version: reader.read_u32()?,
                    request_type: SecurityTokenRequestType::from_u32(reader.read_u32()?)?,
                    security_mode: MessageSecurityMode::from_u32(reader.read_u32()?)?,
                    client_nonce: reader.read_byte_string()?,
                    requested_lifetime_ms: reader.read_u32()?,
                })
            }
            ID_CLOSE_SECURE_CHANNEL_REQUEST => {
                RequestMessage::CloseSecureChannel(CloseSecureChannelRequest {
                    request_header: RequestHeader::decode(&mut reader)?,
                })
            }
            ID_GET_ENDPOINTS_REQUEST => RequestMessage::GetEndpoints(GetEndpointsRequest {
                request_header: RequestHeader::decode(&mut reader)?,
                endpoint_url: reader
                    .read_string()?
                    .ok_or_else(|| UaError::new(status::BAD_DECODING_ERROR, "null endpoint url"))?,
            }),
            ID_TEST_STACK_REQUEST => RequestMessage::TestStack(TestStackRequest {
                request_header: RequestHeader::decode(&mut reader)?,
                test_id: reader.read_u32()?,
                iteration: reader.read_i32()?,
                input: Variant::decode(&mut reader)?,
            }),
            _ => {
                return Err(UaError::new(
                    status::BAD_SERVICE_UNSUPPORTED,
                    format!("unknown request type id: {type_id}"),
                ));
            }
        };
        Ok(message)
    }
}

/// Any decodable service response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    OpenSecureChannel(OpenSecureChannelResponse),
    CloseSecureChannel(CloseSecureChannelResponse),
    GetEndpoints(GetEndpointsResponse),
    TestStack(TestStackResponse),
    ServiceFault(ServiceFault),
}

impl ResponseMessage {
    /// A fault response echoing the request's handle.
    pub fn fault(request_handle: u32, service_result: StatusCode) -> Self {
        ResponseMessage::ServiceFault(ServiceFault {
            response_header: ResponseHeader {
                request_handle,
                service_result,
            },
        })
    }

    #[must_use]
    pub fn response_header(&self) -> &ResponseHeader {
        match self {
            ResponseMessage::OpenSecureChannel(r) => &r.response_header,
            ResponseMessage::CloseSecureChannel(r) => &r.response_header,
            ResponseMessage::GetEndpoints(r) => &r.response_header,
            ResponseMessage::TestStack(r) => &r.response_header,
            ResponseMessage::ServiceFault(r) => &r.response_header,
        }
    }

    #[must_use]
    pub fn request_handle(&self) -> u32 {
        self.response_header().request_handle
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(64);
        match self {
            ResponseMessage::OpenSecureChannel(r) => {
                writer.write_u32(ID_OPEN_SECURE_CHANNEL_RESPONSE);
                r.response_header.encode(&mut writer);
                writer.write_u32(r.server_protocol_version);
                writer.write_u32(r.token.channel_id);
                writer.write_u32(r.token.token_id);
                writer.write_u32(r.token.revised_lifetime_ms);
                writer.write_byte_string(r.server_nonce.as_deref());
            }
            ResponseMessage::CloseSecureChannel(r) => {
                writer.write_u32(ID_CLOSE_SECURE_CHANNEL_RESPONSE);
                r.response_header.encode(&mut writer);
            }
            ResponseMessage::GetEndpoints(r) => {
                writer.write_u32(ID_GET_ENDPOINTS_RESPONSE);
                r.response_header.encode(&mut writer);
                writer.write_u32(r.endpoints.len() as u32);
                for endpoint in &r.endpoints {
                    writer.write_string(Some(&endpoint.endpoint_url));
                    writer.write_string(Some(&endpoint.security_policy_uri));
                    writer.write_u32(endpoint.security_mode.to_u32());
                    writer.write_byte_string(endpoint.server_certificate.as_deref());
                }
            }
            ResponseMessage::TestStack(r) => {
                writer.write_u32(ID_TEST_STACK_RESPONSE);
                r.response_header.encode(&mut writer);
                r.output.encode(&mut writer);
            }
            ResponseMessage::ServiceFault(r) => {
                writer.write_u32(ID_SERVICE_FAULT);
                r.response_header.encode(&mut writer);
            }
        }
        writer.into_vec()
    }

    pub fn decode(body: &[u8]) -> Result<Self, UaError> {
        let mut reader = BinaryReader::new(body);
        let type_id = reader.read_u32()?;
        let message = match type_id {
            ID_OPEN_SECURE_CHANNEL_RESPONSE => {
                ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
                    response_header: ResponseHeader::decode(&mut reader)?,
                    server_protocol_version: reader.read_u32()?,
                    token: ChannelSecurityToken {
                        channel_id: reader.read_u32()?,
                        token_id: reader.read_u32()?,
                        revised_lifetime_ms: reader.read_u32()?,
                    },
                    server_nonce: reader.read_byte_string()?,
                })
            }
            ID_CLOSE_SECURE_CHANNEL_RESPONSE => {
                ResponseMessage::CloseSecureChannel(CloseSecureChannelResponse {
                    response_header: ResponseHeader::decode(&mut reader)?,
                })
            }
            ID_GET_ENDPOINTS_RESPONSE => {
                let response_header = ResponseHeader::decode(&mut reader)?;
                let count = reader.read_u32()?;
                let mut endpoints = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    endpoints.push(EndpointDescription {
                        endpoint_url: reader.read_string()?.unwrap_or_default(),
                        security_policy_uri: reader.read_string()?.unwrap_or_default(),
                        security_mode: MessageSecurityMode::from_u32(reader.read_u32()?)?,
                        server_certificate: reader.read_byte_string()?,
                    });
                }
                ResponseMessage::GetEndpoints(GetEndpointsResponse {
                    response_header,
                    endpoints,
                })
            }
            ID_TEST_STACK_RESPONSE => ResponseMessage::TestStack(TestStackResponse {
                response_header: ResponseHeader::decode(&mut reader)?,
                output: Variant::decode(&mut reader)?,
            }),
            ID_SERVICE_FAULT => ResponseMessage::ServiceFault(ServiceFault {
                response_header: ResponseHeader::decode(&mut reader)?,
            }),
            _ => {
                return Err(UaError::new(
                    status::BAD_SERVICE_UNSUPPORTED,
                    format!("unknown response type id: {type_id}"),
                ));
            }
        };
        Ok(message)
    }
}
