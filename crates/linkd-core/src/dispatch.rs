//! Protocol table and inbound frame routing.
//!
//! The table is assembled once at startup through [`ProtocolTableBuilder`]
//! and never changes afterwards. Entries are kept in role order (link
//! control, then authentication, then network control, then compression
//! control), and within a role in registration order. Routing scans that
//! order, so the first enabled handler for a number wins.
//!
//! # Gating
//!
//! Before a frame reaches any handler:
//!
//! 1. Anything other than link control is discarded until link control
//!    reports itself open.
//! 2. At or below [`Phase::Authenticate`], only link control, link-quality
//!    reports, and authentication protocols get through.
//!
//! A frame that passes both gates but matches no enabled handler, either
//! exactly or as the data protocol of a handler that accepts data, is
//! [`Dispatch::Unsupported`]. The caller answers it with a Protocol-Reject
//! via [`ProtocolTable::reject`].

use std::fmt;

use linkd_proto::{
    Frame,
    protocols::{CONTROL_BIT, allowed_before_network},
};

use crate::{
    error::CoreError,
    phase::Phase,
    protocol::{Protocol, ProtocolAction, Unit},
};

/// Category a handler is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolRole {
    /// Link control (exactly one)
    LinkControl,
    /// Authentication
    Authentication,
    /// Network control
    NetworkControl,
    /// Compression or encryption control
    CompressionControl,
}

/// Why a frame was dropped without reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Link control has not reached the opened state
    LinkNotOpen,
    /// Only link and authentication traffic is allowed in this phase
    NotYetNetwork,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkNotOpen => f.write_str("link control not open"),
            Self::NotYetNetwork => f.write_str("network phase not reached"),
        }
    }
}

/// Outcome of routing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler consumed the frame
    Delivered {
        /// Number of the handler that received it
        handler: u16,
        /// Actions the handler returned
        actions: Vec<ProtocolAction>,
    },
    /// Frame dropped by a gate
    Discarded {
        /// Protocol number of the frame
        protocol: u16,
        /// Which gate dropped it
        reason: DiscardReason,
    },
    /// No enabled handler matched
    Unsupported {
        /// Protocol number of the frame
        protocol: u16,
    },
}

struct Entry {
    role: ProtocolRole,
    handler: Box<dyn Protocol>,
}

/// Builder enforcing role order.
#[derive(Default)]
pub struct ProtocolTableBuilder {
    link_control: Option<Box<dyn Protocol>>,
    authentication: Vec<Box<dyn Protocol>>,
    network_control: Vec<Box<dyn Protocol>>,
    compression_control: Vec<Box<dyn Protocol>>,
}

impl ProtocolTableBuilder {
    /// Set the link-control handler.
    pub fn link_control(mut self, handler: impl Protocol + 'static) -> Self {
        self.link_control = Some(Box::new(handler));
        self
    }

    /// Add an authentication handler.
    pub fn authentication(mut self, handler: impl Protocol + 'static) -> Self {
        self.authentication.push(Box::new(handler));
        self
    }

    /// Add a network-control handler.
    pub fn network_control(mut self, handler: impl Protocol + 'static) -> Self {
        self.network_control.push(Box::new(handler));
        self
    }

    /// Add a compression-control handler.
    pub fn compression_control(mut self, handler: impl Protocol + 'static) -> Self {
        self.compression_control.push(Box::new(handler));
        self
    }

    /// Freeze the table.
    ///
    /// # Errors
    /// - `MissingLinkControl` if no link-control handler was set
    /// - `DuplicateProtocol` if two handlers claim the same number
    pub fn build(self) -> Result<ProtocolTable, CoreError> {
        let link_control = self.link_control.ok_or(CoreError::MissingLinkControl)?;

        let mut entries = vec![Entry { role: ProtocolRole::LinkControl, handler: link_control }];
        let rest = [
            (ProtocolRole::Authentication, self.authentication),
            (ProtocolRole::NetworkControl, self.network_control),
            (ProtocolRole::CompressionControl, self.compression_control),
        ];
        for (role, handlers) in rest {
            entries.extend(handlers.into_iter().map(|handler| Entry { role, handler }));
        }

        for (index, entry) in entries.iter().enumerate() {
            let number = entry.handler.number();
            if entries[..index].iter().any(|earlier| earlier.handler.number() == number) {
                return Err(CoreError::DuplicateProtocol { protocol: number });
            }
        }

        Ok(ProtocolTable { entries })
    }
}

/// Immutable, ordered set of protocol handlers.
pub struct ProtocolTable {
    // entries[0] is always the link-control handler
    entries: Vec<Entry>,
}

impl ProtocolTable {
    /// Start building a table.
    pub fn builder() -> ProtocolTableBuilder {
        ProtocolTableBuilder::default()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A built table always holds link control.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Handler numbers and roles, in dispatch order.
    pub fn layout(&self) -> Vec<(u16, ProtocolRole)> {
        self.entries.iter().map(|entry| (entry.handler.number(), entry.role)).collect()
    }

    /// The link-control handler.
    pub fn link_control(&self) -> &dyn Protocol {
        self.entries[0].handler.as_ref()
    }

    /// The link-control handler, mutably.
    pub fn link_control_mut(&mut self) -> &mut dyn Protocol {
        self.entries[0].handler.as_mut()
    }

    /// Number of the link-control handler.
    pub fn link_control_number(&self) -> u16 {
        self.link_control().number()
    }

    /// Handler registered for `number`.
    pub fn get_mut(&mut self, number: u16) -> Option<&mut dyn Protocol> {
        let entry = self.entries.iter_mut().find(|entry| entry.handler.number() == number)?;
        let handler: &mut dyn Protocol = entry.handler.as_mut();
        Some(handler)
    }

    /// First handler registered under `role`.
    pub fn first_of_mut(&mut self, role: ProtocolRole) -> Option<&mut dyn Protocol> {
        let entry = self.entries.iter_mut().find(|entry| entry.role == role)?;
        let handler: &mut dyn Protocol = entry.handler.as_mut();
        Some(handler)
    }

    /// Numbers of every handler except link control, in dispatch order.
    pub fn upper_layers(&self) -> Vec<u16> {
        self.entries[1..].iter().map(|entry| entry.handler.number()).collect()
    }

    /// Call [`Protocol::init`] on every handler.
    pub fn init_all(&mut self, unit: Unit) {
        for entry in &mut self.entries {
            entry.handler.init(unit);
        }
    }

    /// Call [`Protocol::check_options`] on every handler, stopping at the
    /// first failure.
    pub fn check_options(&mut self) -> Result<(), CoreError> {
        for entry in &mut self.entries {
            entry.handler.check_options()?;
        }
        Ok(())
    }

    /// Route `frame` to its handler.
    pub fn dispatch(&mut self, unit: Unit, phase: Phase, frame: &Frame) -> Dispatch {
        let protocol = frame.protocol();
        let link_control = self.link_control_number();

        if protocol != link_control && !self.link_control().is_open() {
            return Dispatch::Discarded { protocol, reason: DiscardReason::LinkNotOpen };
        }

        if phase <= Phase::Authenticate
            && !allowed_before_network(protocol)
            && protocol != link_control
            && !self.is_enabled_authentication(protocol)
        {
            return Dispatch::Discarded { protocol, reason: DiscardReason::NotYetNetwork };
        }

        let exact = self
            .entries
            .iter_mut()
            .find(|entry| entry.handler.number() == protocol && entry.handler.enabled());
        if let Some(entry) = exact {
            let actions = entry.handler.input(unit, &frame.payload);
            return Dispatch::Delivered { handler: entry.handler.number(), actions };
        }

        let data = self.entries.iter_mut().find(|entry| {
            entry.handler.enabled()
                && entry.handler.accepts_data()
                && entry.handler.number() & !CONTROL_BIT == protocol
        });
        if let Some(entry) = data {
            let actions = entry.handler.data_input(unit, &frame.payload);
            return Dispatch::Delivered { handler: entry.handler.number(), actions };
        }

        Dispatch::Unsupported { protocol }
    }

    /// Ask link control to send a Protocol-Reject for `frame`.
    pub fn reject(&mut self, unit: Unit, frame: &Frame) -> Vec<ProtocolAction> {
        self.link_control_mut().reject(unit, frame)
    }

    fn is_enabled_authentication(&self, protocol: u16) -> bool {
        self.entries.iter().any(|entry| {
            entry.role == ProtocolRole::Authentication
                && entry.handler.number() == protocol
                && entry.handler.enabled()
        })
    }
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|entry| entry.handler.name()).collect();
        f.debug_struct("ProtocolTable").field("entries", &names).finish()
    }
}

impl fmt::Debug for ProtocolTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolTableBuilder")
            .field("link_control", &self.link_control.as_ref().map(|p| p.name()))
            .field("authentication", &self.authentication.len())
            .field("network_control", &self.network_control.len())
            .field("compression_control", &self.compression_control.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use bytes::Bytes;
    use linkd_proto::protocols::{CCP, CHAP, IP, IPCP, IPV6CP, LCP, PAP};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Input(u16),
        Data(u16),
        Reject(u16),
    }

    struct Stub {
        number: u16,
        enabled: bool,
        data: bool,
        open: bool,
        log: Rc<RefCell<Vec<Call>>>,
    }

    impl Stub {
        fn new(number: u16, log: &Rc<RefCell<Vec<Call>>>) -> Self {
            Self { number, enabled: true, data: false, open: false, log: Rc::clone(log) }
        }
    }

    impl Protocol for Stub {
        fn number(&self) -> u16 {
            self.number
        }

        fn name(&self) -> &'static str {
            "stub"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn open(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
            Vec::new()
        }

        fn close(&mut self, _unit: Unit, _reason: &str) -> Vec<ProtocolAction> {
            Vec::new()
        }

        fn input(&mut self, _unit: Unit, _payload: &[u8]) -> Vec<ProtocolAction> {
            self.log.borrow_mut().push(Call::Input(self.number));
            Vec::new()
        }

        fn accepts_data(&self) -> bool {
            self.data
        }

        fn data_input(&mut self, _unit: Unit, _payload: &[u8]) -> Vec<ProtocolAction> {
            self.log.borrow_mut().push(Call::Data(self.number));
            Vec::new()
        }

        fn reject(&mut self, _unit: Unit, frame: &Frame) -> Vec<ProtocolAction> {
            self.log.borrow_mut().push(Call::Reject(frame.protocol()));
            Vec::new()
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn frame(protocol: u16) -> Frame {
        Frame::new(protocol, Bytes::from_static(&[1, 2, 3, 4]))
    }

    fn open_table(log: &Rc<RefCell<Vec<Call>>>) -> ProtocolTable {
        let mut lcp = Stub::new(LCP, log);
        lcp.open = true;
        let mut ipcp = Stub::new(IPCP, log);
        ipcp.data = true;

        ProtocolTable::builder()
            .link_control(lcp)
            .authentication(Stub::new(PAP, log))
            .network_control(ipcp)
            .compression_control(Stub::new(CCP, log))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_link_control() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let result = ProtocolTable::builder().network_control(Stub::new(IPCP, &log)).build();
        assert_eq!(result.unwrap_err(), CoreError::MissingLinkControl);
    }

    #[test]
    fn build_rejects_duplicate_numbers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let result = ProtocolTable::builder()
            .link_control(Stub::new(LCP, &log))
            .network_control(Stub::new(IPCP, &log))
            .network_control(Stub::new(IPCP, &log))
            .build();
        assert_eq!(result.unwrap_err(), CoreError::DuplicateProtocol { protocol: IPCP });
    }

    #[test]
    fn layout_follows_role_order_regardless_of_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let table = ProtocolTable::builder()
            .compression_control(Stub::new(CCP, &log))
            .network_control(Stub::new(IPCP, &log))
            .authentication(Stub::new(CHAP, &log))
            .link_control(Stub::new(LCP, &log))
            .network_control(Stub::new(IPV6CP, &log))
            .build()
            .unwrap();

        assert_eq!(table.layout(), vec![
            (LCP, ProtocolRole::LinkControl),
            (CHAP, ProtocolRole::Authentication),
            (IPCP, ProtocolRole::NetworkControl),
            (IPV6CP, ProtocolRole::NetworkControl),
            (CCP, ProtocolRole::CompressionControl),
        ]);
    }

    #[test]
    fn non_link_traffic_discarded_until_link_open() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = ProtocolTable::builder()
            .link_control(Stub::new(LCP, &log))
            .network_control(Stub::new(IPCP, &log))
            .build()
            .unwrap();

        let outcome = table.dispatch(0, Phase::Network, &frame(IPCP));
        assert_eq!(outcome, Dispatch::Discarded {
            protocol: IPCP,
            reason: DiscardReason::LinkNotOpen
        });

        let outcome = table.dispatch(0, Phase::Establish, &frame(LCP));
        assert!(matches!(outcome, Dispatch::Delivered { handler: LCP, .. }));
    }

    #[test]
    fn network_traffic_discarded_during_authentication() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = open_table(&log);

        let outcome = table.dispatch(0, Phase::Authenticate, &frame(IPCP));
        assert_eq!(outcome, Dispatch::Discarded {
            protocol: IPCP,
            reason: DiscardReason::NotYetNetwork
        });

        let outcome = table.dispatch(0, Phase::Authenticate, &frame(PAP));
        assert!(matches!(outcome, Dispatch::Delivered { handler: PAP, .. }));
        assert_eq!(*log.borrow(), vec![Call::Input(PAP)]);
    }

    #[test]
    fn network_traffic_delivered_in_network_phase() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = open_table(&log);

        let outcome = table.dispatch(0, Phase::Network, &frame(IPCP));
        assert!(matches!(outcome, Dispatch::Delivered { handler: IPCP, .. }));
    }

    #[test]
    fn data_protocol_routes_to_control_handler() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = open_table(&log);

        let outcome = table.dispatch(0, Phase::Running, &frame(IP));
        assert!(matches!(outcome, Dispatch::Delivered { handler: IPCP, .. }));
        assert_eq!(*log.borrow(), vec![Call::Data(IPCP)]);
    }

    #[test]
    fn data_without_data_handler_is_unsupported() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = open_table(&log);

        // CCP has no data handler, so compressed datagrams are unclaimed
        let outcome = table.dispatch(0, Phase::Running, &frame(CCP & !CONTROL_BIT));
        assert_eq!(outcome, Dispatch::Unsupported { protocol: CCP & !CONTROL_BIT });
    }

    #[test]
    fn disabled_handler_is_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut lcp = Stub::new(LCP, &log);
        lcp.open = true;
        let mut ipcp = Stub::new(IPCP, &log);
        ipcp.enabled = false;
        let mut table = ProtocolTable::builder().link_control(lcp).network_control(ipcp).build().unwrap();

        let outcome = table.dispatch(0, Phase::Network, &frame(IPCP));
        assert_eq!(outcome, Dispatch::Unsupported { protocol: IPCP });
    }

    #[test]
    fn unknown_protocol_is_unsupported_and_rejected_by_link_control() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut table = open_table(&log);
        let unknown = frame(0x1234);

        assert_eq!(table.dispatch(0, Phase::Network, &unknown), Dispatch::Unsupported {
            protocol: 0x1234
        });
        table.reject(0, &unknown);
        assert_eq!(*log.borrow(), vec![Call::Reject(0x1234)]);
    }
}
