//! Failure handling strategy

use std::sync::Arc;

use tracing::{debug, warn};

use crate::notify::{GENERIC_ERROR_MESSAGE, Notifier};
use crate::transport::TransportError;

/// Secondary hook run after the default handler has notified the user
pub type ErrorHook = Arc<dyn Fn(&str, &TransportError) + Send + Sync>;

/// Decides what happens when a request settles with an error
pub trait FailureHandler: Send + Sync {
    fn handle(&self, identity: &str, error: &TransportError);
}

/// Default failure path
///
/// With a modal surface configured the error goes there; otherwise the user
/// gets the generic blocking message and the error is logged. The error hook
/// runs in both cases.
pub struct DefaultFailureHandler {
    notifier: Arc<dyn Notifier>,
    modal_error_id: Option<String>,
    on_error: Option<ErrorHook>,
}

impl DefaultFailureHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            modal_error_id: None,
            on_error: None,
        }
    }

    pub fn with_modal(mut self, modal_error_id: Option<String>) -> Self {
        self.modal_error_id = modal_error_id;
        self
    }

    pub fn with_error_hook(mut self, on_error: Option<ErrorHook>) -> Self {
        self.on_error = on_error;
        self
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn handle(&self, identity: &str, error: &TransportError) {
        debug!(%identity, modal = ?self.modal_error_id, "DefaultFailureHandler::handle: called");
        match &self.modal_error_id {
            Some(surface_id) => {
                self.notifier.show_in_modal(surface_id, &error.to_string());
            }
            None => {
                self.notifier.show_blocking_error(GENERIC_ERROR_MESSAGE);
                warn!(%identity, %error, "Request failed");
            }
        }

        if let Some(hook) = &self.on_error {
            hook(identity, error);
        }
    }
}
