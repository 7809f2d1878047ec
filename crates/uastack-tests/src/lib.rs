//! Shared fixtures for the integration suite: an in-process echo server and
//! request builders.

use std::sync::Arc;

use uastack_core::message::{
    RequestHeader, RequestKind, RequestMessage, ResponseHeader, ResponseMessage, TestStackRequest,
    TestStackResponse, Variant,
};
use uastack_core::security::{ApplicationKeyPair, Basic256Sha256, NonePolicy};
use uastack_core::MessageSecurityMode;
use uastack_server::{ServerConfig, UaTcpStackServer};

/// A started echo server and the endpoint url it listens on.
pub struct TestHarness {
    pub server: UaTcpStackServer,
    pub url: String,
    pub server_keypair: Arc<ApplicationKeyPair>,
}

/// Start a server on an ephemeral port with a `None` endpoint, a
/// `Basic256Sha256` SignAndEncrypt endpoint, and the TestStack echo handler.
pub async fn start_echo_server() -> TestHarness {
    uastack_server::logging::init_for_tests();

    let server_keypair = Arc::new(ApplicationKeyPair::generate());
    let server = UaTcpStackServer::new(
        ServerConfig::new("127.0.0.1:0")
            .with_keypair(Arc::clone(&server_keypair))
            .with_server_name("test"),
    );
    server.startup().await.expect("server startup");

    let port = server.local_addr().expect("bound address").port();
    let url = format!("opc.tcp://localhost:{port}/test");

    server.add_endpoint(&url, Arc::new(NonePolicy), MessageSecurityMode::None);
    server.add_endpoint(
        &url,
        Arc::new(Basic256Sha256),
        MessageSecurityMode::SignAndEncrypt,
    );

    server.add_request_handler(
        RequestKind::TestStack,
        Arc::new(|request| {
            let RequestMessage::TestStack(request) = request else {
                unreachable!("dispatched by kind");
            };
            ResponseMessage::TestStack(TestStackResponse {
                response_header: ResponseHeader::good(request.request_header.request_handle),
                output: request.input.clone(),
            })
        }),
    );

    TestHarness {
        server,
        url,
        server_keypair,
    }
}

/// A TestStack echo request with `handle` in the header and `input` as the
/// payload.
pub fn echo_request(handle: u32, input: Variant) -> RequestMessage {
    RequestMessage::TestStack(TestStackRequest {
        request_header: RequestHeader::new(handle),
        test_id: handle,
        iteration: handle as i32,
        input,
    })
}

/// Unwrap an echo response, asserting the handle and returning the output.
pub fn echo_output(response: ResponseMessage) -> (u32, Variant) {
    match response {
        ResponseMessage::TestStack(response) => (
            response.response_header.request_handle,
            response.output,
        ),
        other => panic!("expected TestStackResponse, got {other:?}"),
    }
}
