use std::sync::Mutex;

use crate::message::Message;
use crate::session::Connection;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Call {
    Send(Message),
    Disconnect,
    Quit,
    Debug(String),
}

/// Records what was asked of it instead of talking to a server.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Connection for Recorder {
    fn send(&self, message: Message) {
        self.push(Call::Send(message));
    }

    fn disconnect(&self) {
        self.push(Call::Disconnect);
    }

    fn quit(&self) {
        self.push(Call::Quit);
    }

    fn debugln(&self, line: &str) {
        self.push(Call::Debug(line.to_string()));
    }
}
