//! Per (local, remote) association state.
//!
//! An association owns the sequence counters and transport state of one
//! logical channel. It is accessed only by the worker that owns its
//! endpoint, so it needs no internal locking.

use crate::error::TransportError;
use crate::link::{
    Frame, LinkControl, LinkFunction, PrimaryFunction, SecondaryFunction, MAX_FRAME_DATA,
};
use crate::transport::{TransportRx, TransportTx};

/// What the link layer wants done with an inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// User data to feed the transport function.
    Segment(Vec<u8>),
    /// A control frame to send back.
    Reply(Frame),
    /// Nothing to do.
    None,
}

/// One association: `(local, remote)` with its counters.
#[derive(Debug)]
pub struct Association {
    local: u16,
    remote: u16,
    master_side: bool,
    transport_tx: TransportTx,
    transport_rx: TransportRx,
    solicited_seq: u8,
    unsolicited_seq: u8,
    fcb: bool,
    pending_confirm: Option<u8>,
}

impl Association {
    /// Endpoint map key: `(local << 16) | remote`.
    pub const fn key(local: u16, remote: u16) -> u32 {
        ((local as u32) << 16) | remote as u32
    }

    /// Fresh association.
    pub fn new(local: u16, remote: u16, master_side: bool, max_fragment: usize) -> Self {
        Self {
            local,
            remote,
            master_side,
            transport_tx: TransportTx::new(),
            transport_rx: TransportRx::new(max_fragment),
            solicited_seq: 0,
            unsolicited_seq: 0,
            fcb: false,
            pending_confirm: None,
        }
    }

    /// Local link address.
    pub const fn local(&self) -> u16 {
        self.local
    }

    /// Remote link address.
    pub const fn remote(&self) -> u16 {
        self.remote
    }

    /// Allocate the next solicited 4-bit sequence.
    pub fn next_solicited(&mut self) -> u8 {
        let seq = self.solicited_seq;
        self.solicited_seq = (self.solicited_seq + 1) & 0x0F;
        seq
    }

    /// Allocate the next unsolicited 4-bit sequence.
    pub fn next_unsolicited(&mut self) -> u8 {
        let seq = self.unsolicited_seq;
        self.unsolicited_seq = (self.unsolicited_seq + 1) & 0x0F;
        seq
    }

    /// Record an unsolicited response awaiting its confirm.
    pub fn expect_confirm(&mut self, sequence: u8) {
        self.pending_confirm = Some(sequence);
    }

    /// Handle an inbound confirm; returns `true` when it matches.
    pub fn take_confirm(&mut self, sequence: u8) -> bool {
        if self.pending_confirm == Some(sequence) {
            self.pending_confirm = None;
            return true;
        }
        false
    }

    /// Whether an unsolicited response is still unconfirmed.
    pub const fn confirm_pending(&self) -> bool {
        self.pending_confirm.is_some()
    }

    /// Split an application fragment into link frames.
    pub fn send_fragment(&mut self, fragment: &[u8]) -> Vec<Frame> {
        self.transport_tx
            .split(fragment)
            .into_iter()
            .map(|segment| {
                debug_assert!(segment.len() <= MAX_FRAME_DATA);
                Frame::user_data(self.master_side, self.remote, self.local, segment)
            })
            .collect()
    }

    /// React to an inbound frame at the link layer.
    pub fn handle_link(&mut self, frame: &Frame) -> LinkEvent {
        match frame.control.function {
            LinkFunction::Primary(PrimaryFunction::UnconfirmedUserData) => {
                LinkEvent::Segment(frame.data.clone())
            }
            LinkFunction::Primary(PrimaryFunction::ConfirmedUserData) => {
                // Data is passed up and acknowledged; FCB is recorded for
                // duplicate detection.
                self.fcb = frame.control.fcb;
                LinkEvent::Segment(frame.data.clone())
            }
            LinkFunction::Primary(PrimaryFunction::ResetLink) => {
                self.fcb = false;
                LinkEvent::Reply(self.secondary_reply(SecondaryFunction::Ack))
            }
            LinkFunction::Primary(PrimaryFunction::TestLink) => {
                LinkEvent::Reply(self.secondary_reply(SecondaryFunction::Ack))
            }
            LinkFunction::Primary(PrimaryFunction::RequestLinkStatus) => {
                LinkEvent::Reply(self.secondary_reply(SecondaryFunction::LinkStatus))
            }
            LinkFunction::Secondary(_) => LinkEvent::None,
        }
    }

    /// Feed one transport segment; returns a completed fragment on FIN.
    pub fn receive_segment(
        &mut self,
        segment: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.transport_rx.feed(segment)
    }

    /// A link-status request frame for keep-alive probing.
    pub fn link_status_request(&self) -> Frame {
        Frame::control_frame(
            LinkControl {
                dir: self.master_side,
                fcb: false,
                fcv: false,
                function: LinkFunction::Primary(PrimaryFunction::RequestLinkStatus),
            },
            self.remote,
            self.local,
        )
    }

    fn secondary_reply(&self, function: SecondaryFunction) -> Frame {
        Frame::control_frame(
            LinkControl {
                dir: self.master_side,
                fcb: false,
                fcv: false,
                function: LinkFunction::Secondary(function),
            },
            self.remote,
            self.local,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_packs_both_addresses() {
        assert_eq!(Association::key(0x1234, 0x5678), 0x1234_5678);
    }

    #[test]
    fn solicited_sequence_wraps_at_16() {
        let mut association = Association::new(1, 2, true, 2048);
        for expected in 0..16u8 {
            assert_eq!(association.next_solicited(), expected);
        }
        assert_eq!(association.next_solicited(), 0);
    }

    #[test]
    fn fragments_round_trip_through_two_associations() {
        let mut master = Association::new(1, 1024, true, 2048);
        let mut outstation = Association::new(1024, 1, false, 2048);
        let fragment: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();
        let frames = master.send_fragment(&fragment);
        assert_eq!(frames.len(), 3);
        let mut rebuilt = None;
        for frame in frames {
            match outstation.handle_link(&frame) {
                LinkEvent::Segment(segment) => {
                    if let Some(done) = outstation.receive_segment(&segment).unwrap() {
                        rebuilt = Some(done);
                    }
                }
                other => panic!("unexpected link event: {other:?}"),
            }
        }
        assert_eq!(rebuilt.unwrap(), fragment);
    }

    #[test]
    fn reset_link_is_acknowledged() {
        let mut association = Association::new(1024, 1, false, 2048);
        let reset = Frame::control_frame(
            LinkControl {
                dir: true,
                fcb: false,
                fcv: false,
                function: LinkFunction::Primary(PrimaryFunction::ResetLink),
            },
            1024,
            1,
        );
        match association.handle_link(&reset) {
            LinkEvent::Reply(frame) => {
                assert_eq!(
                    frame.control.function,
                    LinkFunction::Secondary(SecondaryFunction::Ack)
                );
                assert_eq!(frame.destination, 1);
                assert_eq!(frame.source, 1024);
            }
            other => panic!("unexpected link event: {other:?}"),
        }
    }

    #[test]
    fn confirm_matching() {
        let mut association = Association::new(1024, 1, false, 2048);
        let seq = association.next_unsolicited();
        association.expect_confirm(seq);
        assert!(association.confirm_pending());
        assert!(!association.take_confirm(seq + 1));
        assert!(association.take_confirm(seq));
        assert!(!association.confirm_pending());
    }
}
