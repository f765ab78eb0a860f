//! In-memory connector for exercising the agent without a network.

use std::cell::RefCell;
use std::rc::Rc;

use crate::socket::{CloseFrame, Connector, EventSender, Payload, Socket};

/// What a single mock socket has been asked to do.
#[derive(Debug, Default)]
pub(crate) struct SocketLog {
    pub(crate) address: String,
    pub(crate) args: Option<String>,
    pub(crate) sent: Vec<Payload>,
    pub(crate) close_calls: usize,
}

#[derive(Debug)]
struct Attempt {
    events: EventSender<String>,
    log: Rc<RefCell<SocketLog>>,
}

/// Test-side view of every socket the connector has built.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockRemote {
    attempts: Rc<RefCell<Vec<Attempt>>>,
}

impl MockRemote {
    pub(crate) fn connector(&self) -> MockConnector {
        MockConnector {
            remote: self.clone(),
        }
    }

    /// Number of sockets constructed so far.
    pub(crate) fn connects(&self) -> usize {
        self.attempts.borrow().len()
    }

    fn events(&self, index: usize) -> EventSender<String> {
        self.attempts.borrow()[index].events.clone()
    }

    fn latest(&self) -> usize {
        self.connects() - 1
    }

    pub(crate) fn open(&self) {
        self.events(self.latest()).open();
    }

    pub(crate) fn message(&self, payload: &str) {
        self.events(self.latest()).message(payload);
    }

    pub(crate) fn error(&self, error: &str) {
        self.events(self.latest()).error(error.to_string());
    }

    pub(crate) fn drop_connection(&self) {
        self.events(self.latest())
            .close(CloseFrame::abnormal("connection reset"));
    }

    pub(crate) fn finish_close(&self) {
        self.events(self.latest()).close(CloseFrame::normal("bye"));
    }

    /// Events for an older socket, to simulate late signals.
    pub(crate) fn events_for(&self, index: usize) -> EventSender<String> {
        self.events(index)
    }

    pub(crate) fn sent(&self) -> Vec<Payload> {
        self.attempts.borrow()[self.latest()].log.borrow().sent.clone()
    }

    pub(crate) fn sent_on(&self, index: usize) -> Vec<Payload> {
        self.attempts.borrow()[index].log.borrow().sent.clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.attempts.borrow()[self.latest()].log.borrow().close_calls
    }

    pub(crate) fn address(&self, index: usize) -> String {
        self.attempts.borrow()[index].log.borrow().address.clone()
    }

    pub(crate) fn args(&self, index: usize) -> Option<String> {
        self.attempts.borrow()[index].log.borrow().args.clone()
    }
}

#[derive(Debug)]
pub(crate) struct MockConnector {
    remote: MockRemote,
}

impl Connector for MockConnector {
    type Socket = MockSocket;
    type Error = String;
    type Args = String;

    fn connect(
        &mut self,
        address: &str,
        args: Option<&String>,
        events: EventSender<String>,
    ) -> MockSocket {
        let log = Rc::new(RefCell::new(SocketLog {
            address: address.to_string(),
            args: args.cloned(),
            ..SocketLog::default()
        }));
        self.remote.attempts.borrow_mut().push(Attempt {
            events,
            log: Rc::clone(&log),
        });
        MockSocket { log }
    }
}

#[derive(Debug)]
pub(crate) struct MockSocket {
    log: Rc<RefCell<SocketLog>>,
}

impl Socket for MockSocket {
    fn send(&mut self, payload: Payload) {
        self.log.borrow_mut().sent.push(payload);
    }

    fn close(&mut self) {
        self.log.borrow_mut().close_calls += 1;
    }
}
