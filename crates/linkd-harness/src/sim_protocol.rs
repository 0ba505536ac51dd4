//! Scriptable protocol handler.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use linkd_core::{Protocol, ProtocolAction, Unit};

/// A call made on a [`SimProtocol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    /// `open`
    Open,
    /// `close` with its reason
    Close(String),
    /// `lower_up`
    LowerUp,
    /// `lower_down`
    LowerDown,
    /// `input` with the payload
    Input(Vec<u8>),
    /// `data_input` with the payload
    Data(Vec<u8>),
    /// `timeout` with its token
    Timeout(u32),
    /// `script_done` with token and status
    ScriptDone(u32, i32),
}

/// Shared record of calls, tagged with the protocol number.
pub type CallLog = Rc<RefCell<Vec<(u16, SimCall)>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Hook {
    Open,
    Close,
    LowerUp,
    LowerDown,
    Input,
    Timeout,
    ScriptDone,
}

/// Protocol handler that records every call and answers with canned
/// actions.
///
/// Canned actions are returned on every matching call.
#[derive(Debug)]
pub struct SimProtocol {
    number: u16,
    name: &'static str,
    data: bool,
    log: CallLog,
    replies: HashMap<Hook, Vec<ProtocolAction>>,
}

impl SimProtocol {
    /// A handler for `number` writing to `log`.
    pub fn new(number: u16, name: &'static str, log: &CallLog) -> Self {
        Self { number, name, data: false, log: Rc::clone(log), replies: HashMap::new() }
    }

    /// Also accept data frames.
    pub fn with_data(mut self) -> Self {
        self.data = true;
        self
    }

    /// Actions returned from `open`.
    pub fn on_open(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::Open, actions)
    }

    /// Actions returned from `close`.
    pub fn on_close(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::Close, actions)
    }

    /// Actions returned from `lower_up`.
    pub fn on_lower_up(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::LowerUp, actions)
    }

    /// Actions returned from `lower_down`.
    pub fn on_lower_down(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::LowerDown, actions)
    }

    /// Actions returned from `input`.
    pub fn on_input(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::Input, actions)
    }

    /// Actions returned from `timeout`.
    pub fn on_timeout(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::Timeout, actions)
    }

    /// Actions returned from `script_done`.
    pub fn on_script_done(self, actions: Vec<ProtocolAction>) -> Self {
        self.reply(Hook::ScriptDone, actions)
    }

    fn reply(mut self, hook: Hook, actions: Vec<ProtocolAction>) -> Self {
        self.replies.insert(hook, actions);
        self
    }

    fn record(&self, call: SimCall, hook: Hook) -> Vec<ProtocolAction> {
        self.log.borrow_mut().push((self.number, call));
        self.replies.get(&hook).cloned().unwrap_or_default()
    }
}

impl Protocol for SimProtocol {
    fn number(&self) -> u16 {
        self.number
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn open(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        self.record(SimCall::Open, Hook::Open)
    }

    fn close(&mut self, _unit: Unit, reason: &str) -> Vec<ProtocolAction> {
        self.record(SimCall::Close(reason.to_string()), Hook::Close)
    }

    fn lower_up(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        self.record(SimCall::LowerUp, Hook::LowerUp)
    }

    fn lower_down(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        self.record(SimCall::LowerDown, Hook::LowerDown)
    }

    fn input(&mut self, _unit: Unit, payload: &[u8]) -> Vec<ProtocolAction> {
        self.record(SimCall::Input(payload.to_vec()), Hook::Input)
    }

    fn accepts_data(&self) -> bool {
        self.data
    }

    fn data_input(&mut self, _unit: Unit, payload: &[u8]) -> Vec<ProtocolAction> {
        self.log.borrow_mut().push((self.number, SimCall::Data(payload.to_vec())));
        Vec::new()
    }

    fn timeout(&mut self, _unit: Unit, token: u32) -> Vec<ProtocolAction> {
        self.record(SimCall::Timeout(token), Hook::Timeout)
    }

    fn script_done(&mut self, _unit: Unit, token: u32, status: i32) -> Vec<ProtocolAction> {
        self.record(SimCall::ScriptDone(token, status), Hook::ScriptDone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_and_replays_actions() {
        let log = CallLog::default();
        let mut protocol = SimProtocol::new(0x8021, "IPCP", &log).on_lower_up(vec![ProtocolAction::NetworkUp]);

        assert!(protocol.open(0).is_empty());
        assert_eq!(protocol.lower_up(0), vec![ProtocolAction::NetworkUp]);
        assert_eq!(protocol.lower_up(0), vec![ProtocolAction::NetworkUp]);

        assert_eq!(*log.borrow(), vec![
            (0x8021, SimCall::Open),
            (0x8021, SimCall::LowerUp),
            (0x8021, SimCall::LowerUp),
        ]);
    }
}
