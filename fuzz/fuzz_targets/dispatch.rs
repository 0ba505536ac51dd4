//! Routing arbitrary frames through a populated table in every phase must
//! never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use linkd_core::{Phase, Protocol, ProtocolAction, ProtocolTable, Unit};
use linkd_proto::{
    Frame,
    protocols::{CCP, IPCP, LCP, PAP},
};

struct Sink {
    number: u16,
    open: bool,
}

impl Protocol for Sink {
    fn number(&self) -> u16 {
        self.number
    }

    fn name(&self) -> &'static str {
        "sink"
    }

    fn open(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        Vec::new()
    }

    fn close(&mut self, _unit: Unit, _reason: &str) -> Vec<ProtocolAction> {
        Vec::new()
    }

    fn input(&mut self, _unit: Unit, _payload: &[u8]) -> Vec<ProtocolAction> {
        Vec::new()
    }

    fn accepts_data(&self) -> bool {
        self.number == IPCP
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(frame) = Frame::decode(rest) else {
        return;
    };
    let Some(phase) = Phase::from_i32(i32::from(selector % 11)) else {
        return;
    };

    let Ok(mut table) = ProtocolTable::builder()
        .link_control(Sink { number: LCP, open: selector & 0x80 != 0 })
        .authentication(Sink { number: PAP, open: false })
        .network_control(Sink { number: IPCP, open: false })
        .compression_control(Sink { number: CCP, open: false })
        .build()
    else {
        return;
    };

    let _ = table.dispatch(0, phase, &frame);
});
