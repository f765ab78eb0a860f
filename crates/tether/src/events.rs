//! Callback slots and the notices that drive them.

use std::cell::RefCell;
use std::fmt;

use crate::socket::{CloseFrame, Payload};

type Callback = Box<dyn FnMut()>;
type ErrorCallback<E> = Box<dyn FnMut(&E)>;
type MessageCallback = Box<dyn FnMut(&Payload)>;
type CloseCallback = Box<dyn FnMut(&CloseFrame)>;
type DisconnectCallback = Box<dyn FnMut(&CloseFrame, u32)>;

/// One optional callback per lifecycle event. Setting a slot replaces
/// whatever was there.
pub(crate) struct Handlers<E> {
    pub(crate) open: Option<Callback>,
    pub(crate) reconnect: Option<Callback>,
    pub(crate) error: Option<ErrorCallback<E>>,
    pub(crate) message: Option<MessageCallback>,
    pub(crate) close: Option<CloseCallback>,
    pub(crate) disconnect: Option<DisconnectCallback>,
}

impl<E> Default for Handlers<E> {
    fn default() -> Self {
        Self {
            open: None,
            reconnect: None,
            error: None,
            message: None,
            close: None,
            disconnect: None,
        }
    }
}

impl<E> fmt::Debug for Handlers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("open", &self.open.is_some())
            .field("reconnect", &self.reconnect.is_some())
            .field("error", &self.error.is_some())
            .field("message", &self.message.is_some())
            .field("close", &self.close.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .finish()
    }
}

/// Take the handler out of its slot, call it with no borrow held, then put
/// it back unless the call installed a replacement.
macro_rules! fire {
    ($handlers:expr, $slot:ident $(, $arg:expr)*) => {{
        let taken = $handlers.borrow_mut().$slot.take();
        if let Some(mut handler) = taken {
            handler($($arg),*);
            let mut handlers = $handlers.borrow_mut();
            if handlers.$slot.is_none() {
                handlers.$slot = Some(handler);
            }
        }
    }};
}

/// A callback invocation owed to the user once the agent's state has
/// settled.
#[derive(Debug)]
pub(crate) enum Notice<E> {
    Opened,
    Reconnected,
    Message(Payload),
    Error(E),
    Disconnected(CloseFrame, u32),
    Closed(CloseFrame),
}

impl<E> Notice<E> {
    pub(crate) fn dispatch(self, handlers: &RefCell<Handlers<E>>) {
        match self {
            Self::Opened => fire!(handlers, open),
            Self::Reconnected => fire!(handlers, reconnect),
            Self::Message(payload) => fire!(handlers, message, &payload),
            Self::Error(error) => fire!(handlers, error, &error),
            Self::Disconnected(frame, attempts) => fire!(handlers, disconnect, &frame, attempts),
            Self::Closed(frame) => fire!(handlers, close, &frame),
        }
    }
}
