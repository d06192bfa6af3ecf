//! One-shot callbacks for command responses
//!
//! Every outgoing command that expects an answer registers a `Responder`
//! under its transaction id. The server answers with `_result` or `_error`;
//! whichever arrives first consumes the responder, so exactly one of the
//! two callbacks ever fires, at most once.

use crate::amf::AmfValue;

type Callback = Box<dyn FnOnce(&[AmfValue]) + Send>;

pub struct Responder {
    result: Option<Callback>,
    status: Option<Callback>,
}

impl Responder {
    /// Responder with both a result and an error/status callback
    pub fn new(
        result: impl FnOnce(&[AmfValue]) + Send + 'static,
        status: impl FnOnce(&[AmfValue]) + Send + 'static,
    ) -> Self {
        Self {
            result: Some(Box::new(result)),
            status: Some(Box::new(status)),
        }
    }

    /// Responder that only cares about success
    pub fn on_result(result: impl FnOnce(&[AmfValue]) + Send + 'static) -> Self {
        Self {
            result: Some(Box::new(result)),
            status: None,
        }
    }

    /// Deliver a `_result`. Clears the status callback so a late error
    /// cannot fire after success.
    pub fn dispatch_result(&mut self, arguments: &[AmfValue]) {
        self.status = None;
        if let Some(callback) = self.result.take() {
            callback(arguments);
        }
    }

    /// Deliver an `_error`. Clears both callbacks.
    pub fn dispatch_status(&mut self, arguments: &[AmfValue]) {
        self.result = None;
        if let Some(callback) = self.status.take() {
            callback(arguments);
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("result", &self.result.is_some())
            .field("status", &self.status.is_some())
            .finish()
    }
}
