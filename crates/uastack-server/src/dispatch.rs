//! Request-handler registration and dispatch.
//!
//! Handlers run on the server's worker executor, never on a channel's
//! decode queue, so slow user code cannot stall chunk processing. A
//! panicking handler yields a ServiceFault; it does not close the channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::error;

use uastack_core::message::{RequestKind, RequestMessage, ResponseMessage};
use uastack_core::status;

/// A registered service handler.
pub type RequestHandler = Arc<dyn Fn(&RequestMessage) -> ResponseMessage + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<RequestKind, RequestHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: RequestKind, handler: RequestHandler) {
        self.handlers
            .write()
            .expect("lock poisoned")
            .insert(kind, handler);
    }

    /// Run the handler registered for the request's kind.
    ///
    /// An unregistered kind yields `Bad_ServiceUnsupported`; a handler
    /// panic yields `Bad_InternalError`. Both fault only this request.
    #[must_use]
    pub fn dispatch(&self, request: &RequestMessage) -> ResponseMessage {
        let handler = self
            .handlers
            .read()
            .expect("lock poisoned")
            .get(&request.kind())
            .cloned();

        let request_handle = request.request_handle();
        match handler {
            Some(handler) => match catch_unwind(AssertUnwindSafe(|| handler(request))) {
                Ok(response) => response,
                Err(_) => {
                    error!("request handler for {:?} panicked", request.kind());
                    ResponseMessage::fault(request_handle, status::BAD_INTERNAL_ERROR)
                }
            },
            None => ResponseMessage::fault(request_handle, status::BAD_SERVICE_UNSUPPORTED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uastack_core::message::{
        RequestHeader, ResponseHeader, TestStackRequest, TestStackResponse, Variant,
    };

    fn request() -> RequestMessage {
        RequestMessage::TestStack(TestStackRequest {
            request_header: RequestHeader::new(5),
            test_id: 1,
            iteration: 0,
            input: Variant::Int32(42),
        })
    }

    #[test]
    fn dispatches_to_registered_handler() {
        let dispatcher = Dispatcher::new();
        dispatcher.add(
            RequestKind::TestStack,
            Arc::new(|request| {
                let RequestMessage::TestStack(r) = request else {
                    unreachable!("dispatched by kind");
                };
                ResponseMessage::TestStack(TestStackResponse {
                    response_header: ResponseHeader::good(r.request_header.request_handle),
                    output: r.input.clone(),
                })
            }),
        );

        match dispatcher.dispatch(&request()) {
            ResponseMessage::TestStack(response) => {
                assert_eq!(response.output, Variant::Int32(42));
                assert_eq!(response.response_header.request_handle, 5);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn unregistered_kind_faults() {
        let dispatcher = Dispatcher::new();
        match dispatcher.dispatch(&request()) {
            ResponseMessage::ServiceFault(fault) => {
                assert_eq!(
                    fault.response_header.service_result,
                    status::BAD_SERVICE_UNSUPPORTED
                );
                assert_eq!(fault.response_header.request_handle, 5);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn panicking_handler_faults_without_unwinding() {
        let dispatcher = Dispatcher::new();
        dispatcher.add(
            RequestKind::TestStack,
            Arc::new(|_| panic!("handler exploded")),
        );
        match dispatcher.dispatch(&request()) {
            ResponseMessage::ServiceFault(fault) => {
                assert_eq!(fault.response_header.service_result, status::BAD_INTERNAL_ERROR);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
