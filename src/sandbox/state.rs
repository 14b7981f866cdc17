//! Per-instance state shared with engine callbacks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ConsoleOutput;
use crate::sandbox::fetch::{FetchError, FetchHandler};
use crate::sandbox::io::OutputCapture;

/// State reachable from `console.*` and `fetch` while a script runs.
///
/// Each callback installed in the context holds its own `Rc` to the state of
/// the sandbox that created it, so callbacks never consult ambient globals to
/// find their owner.
pub(crate) struct HostState {
    pub(crate) console: RefCell<OutputCapture>,
    pub(crate) handler: RefCell<Option<Rc<dyn FetchHandler>>>,
    /// At most one handler failure parked until the engine has unwound.
    pub(crate) deferred: RefCell<Option<FetchError>>,
}

impl HostState {
    pub(crate) fn new(console_max_bytes: usize) -> Self {
        Self {
            console: RefCell::new(OutputCapture::new(console_max_bytes)),
            handler: RefCell::new(None),
            deferred: RefCell::new(None),
        }
    }

    /// Reset everything scoped to a single evaluation.
    pub(crate) fn begin_run(&self) {
        self.console.borrow_mut().reset();
        self.deferred.borrow_mut().take();
    }

    /// Park a handler failure, replacing any earlier one.
    pub(crate) fn defer(&self, error: FetchError) {
        *self.deferred.borrow_mut() = Some(error);
    }

    pub(crate) fn has_deferred(&self) -> bool {
        self.deferred.borrow().is_some()
    }

    pub(crate) fn take_deferred(&self) -> Option<FetchError> {
        self.deferred.borrow_mut().take()
    }

    pub(crate) fn handler(&self) -> Option<Rc<dyn FetchHandler>> {
        self.handler.borrow().clone()
    }

    pub(crate) fn console_snapshot(&self) -> ConsoleOutput {
        self.console.borrow().snapshot()
    }

    /// Drop the handler and the console storage.
    pub(crate) fn release(&self) {
        self.handler.borrow_mut().take();
        self.deferred.borrow_mut().take();
        self.console.borrow_mut().release();
    }
}
