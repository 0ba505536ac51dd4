//! Link control for links with fixed parameters.
//!
//! [`StaticLinkControl`] stands in for a negotiating link-control protocol
//! on links whose parameters are agreed out of band. The link is considered
//! open as soon as the channel reports the lower layer up. It still answers
//! the link-maintenance packets a peer may send: Echo-Request,
//! Terminate-Request and Discard-Request, and it generates Protocol-Rejects
//! for frames nobody claims.

use bytes::Bytes;
use linkd_core::{ExitCode, LinkConfig, Phase, Protocol, ProtocolAction, Unit};
use linkd_proto::{ControlCode, ControlPacket, Frame, protocols::LCP};

/// Link control with no negotiation.
#[derive(Debug, Clone)]
pub struct StaticLinkControl {
    config: LinkConfig,
    after_open: Phase,
    wanted: bool,
    open: bool,
    next_id: u8,
}

impl StaticLinkControl {
    /// Link control that moves to the network phase once open.
    pub fn new(config: LinkConfig) -> Self {
        Self { config, after_open: Phase::Network, wanted: false, open: false, next_id: 1 }
    }

    /// Require authentication before the network phase.
    pub fn with_authentication(mut self) -> Self {
        self.after_open = Phase::Authenticate;
        self
    }

    fn identifier(&mut self) -> u8 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn send(&self, packet: ControlPacket) -> ProtocolAction {
        ProtocolAction::Send(packet.into_frame(LCP))
    }
}

impl Default for StaticLinkControl {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl Protocol for StaticLinkControl {
    fn number(&self) -> u16 {
        LCP
    }

    fn name(&self) -> &'static str {
        "LCP"
    }

    fn open(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        self.wanted = true;
        Vec::new()
    }

    fn close(&mut self, _unit: Unit, reason: &str) -> Vec<ProtocolAction> {
        self.wanted = false;
        if !self.open {
            return vec![ProtocolAction::LinkTerminated];
        }

        self.open = false;
        let id = self.identifier();
        let request = ControlPacket::new(ControlCode::TerminateRequest, id, Bytes::copy_from_slice(reason.as_bytes()));
        vec![self.send(request), ProtocolAction::LinkDown, ProtocolAction::LinkTerminated]
    }

    fn lower_up(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        if !self.wanted {
            return Vec::new();
        }
        self.open = true;
        vec![
            ProtocolAction::ConfigureSend(self.config),
            ProtocolAction::ConfigureRecv(self.config),
            ProtocolAction::RequestPhase(self.after_open),
        ]
    }

    fn lower_down(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        if std::mem::replace(&mut self.open, false) { vec![ProtocolAction::LinkDown] } else { Vec::new() }
    }

    fn input(&mut self, _unit: Unit, payload: &[u8]) -> Vec<ProtocolAction> {
        let packet = match ControlPacket::decode(payload) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!("LCP: discarding malformed packet: {err}");
                return Vec::new();
            },
        };

        match packet.code() {
            Some(ControlCode::EchoRequest) if self.open => {
                vec![self.send(ControlPacket::new(ControlCode::EchoReply, packet.identifier, packet.data))]
            },
            Some(ControlCode::TerminateRequest) => {
                tracing::info!("LCP terminated by peer");
                let ack = self.send(ControlPacket::new(ControlCode::TerminateAck, packet.identifier, Bytes::new()));
                let was_open = std::mem::replace(&mut self.open, false);
                let mut actions = vec![ack];
                if was_open {
                    actions.push(ProtocolAction::SetStatus(ExitCode::PeerDead));
                    actions.push(ProtocolAction::LinkDown);
                }
                actions.push(ProtocolAction::LinkTerminated);
                actions
            },
            Some(ControlCode::ProtocolReject) => {
                if let Some(protocol) = packet.rejected_protocol() {
                    tracing::debug!("LCP: peer rejected protocol 0x{protocol:04x}");
                }
                Vec::new()
            },
            Some(ControlCode::EchoReply | ControlCode::DiscardRequest | ControlCode::TerminateAck) => Vec::new(),
            _ => {
                let id = self.identifier();
                let mut rejected = Vec::with_capacity(payload.len());
                rejected.extend_from_slice(payload);
                rejected.truncate(usize::from(self.config.mtu).saturating_sub(ControlPacket::HEADER_SIZE));
                vec![self.send(ControlPacket::new(ControlCode::CodeReject, id, rejected))]
            },
        }
    }

    fn reject(&mut self, _unit: Unit, frame: &Frame) -> Vec<ProtocolAction> {
        if !self.open {
            return Vec::new();
        }
        let id = self.identifier();
        let reject = ControlPacket::protocol_reject(id, frame, usize::from(self.config.mtu));
        vec![self.send(reject)]
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
