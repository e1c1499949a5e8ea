//! TCP state tracker: handshake/FIN/RST/time-wait transitions plus a
//! Postel-style sliding-window check per direction (§4.5).
//!
//! SACK and PAWS are not implemented; the spec's Open Questions (§9) leave
//! those edge cases unmandated.

use std::time::Duration;

const TCP_FLAG_FIN: u8 = 0x01;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_RST: u8 = 0x04;
const TCP_FLAG_ACK: u8 = 0x10;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TcpState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub fn timeout(self) -> Duration {
        match self {
            TcpState::Closed => Duration::ZERO,
            TcpState::SynSent | TcpState::SynReceived => Duration::from_secs(30),
            TcpState::Established => Duration::from_secs(24 * 3600),
            TcpState::FinWait | TcpState::Closing | TcpState::LastAck => Duration::from_secs(240),
            TcpState::TimeWait => Duration::from_secs(120),
        }
    }
}

impl Default for TcpState {
    fn default() -> Self {
        TcpState::Closed
    }
}

/// Sliding-window bookkeeping for one direction of a TCP flow.
#[derive(Clone, Copy, Default, Debug)]
pub struct WindowState {
    /// Highest sequence number (end of data) seen so far, this direction.
    pub end: u32,
    /// Highest `end` the peer has acknowledged room for (our ceiling).
    pub maxend: u32,
    /// Largest window size advertised, scaled.
    pub maxwin: u32,
    pub wscale: u8,
}

/// Full per-connection TCP tracking state: FSM plus both directions' window.
#[derive(Clone, Copy, Default, Debug)]
pub struct TcpTracker {
    pub state: TcpState,
    pub forward: WindowState,
    pub backward: WindowState,
}

pub struct Segment {
    pub flags: u8,
    pub seq: u32,
    pub ack: u32,
    pub win: u16,
    pub data_len: u32,
}

impl TcpTracker {
    /// Advances the FSM and validates the segment against the sliding
    /// window for its direction. Returns `true` iff the segment is within
    /// window and the transition (if any) is valid; the window state is
    /// still advanced so an out-of-window segment doesn't desync tracking
    /// of the healthy direction.
    pub fn inspect(&mut self, seg: &Segment, forward: bool) -> bool {
        let within_window = self.check_window(seg, forward);
        self.transition(seg, forward);
        within_window
    }

    fn dir_mut(&mut self, forward: bool) -> &mut WindowState {
        if forward {
            &mut self.forward
        } else {
            &mut self.backward
        }
    }

    fn check_window(&mut self, seg: &Segment, forward: bool) -> bool {
        let win = self.dir_mut(forward);
        let seg_end = seg.seq.wrapping_add(seg.data_len.max(1));

        if win.maxend == 0 {
            // First segment in this direction: nothing to validate against.
            win.end = seg_end;
            win.maxend = seg_end.wrapping_add((seg.win as u32) << win.wscale.min(14));
            win.maxwin = (seg.win as u32) << win.wscale.min(14);
            return true;
        }

        let in_window = seq_leq(seg.seq, win.maxend) && seq_leq(win.end.wrapping_sub(win.maxwin), seg_end);

        if seq_leq(win.end, seg_end) {
            win.end = seg_end;
        }
        let new_ceiling = seg.ack.wrapping_add((seg.win as u32) << win.wscale.min(14));
        if seq_leq(win.maxend, new_ceiling) {
            win.maxend = new_ceiling;
        }
        win.maxwin = win.maxwin.max((seg.win as u32) << win.wscale.min(14));

        in_window
    }

    fn transition(&mut self, seg: &Segment, forward: bool) {
        use TcpState::*;
        let f = seg.flags;
        self.state = match (self.state, forward, f & TCP_FLAG_RST != 0) {
            (_, _, true) => Closed,
            (Closed, true, _) if f & TCP_FLAG_SYN != 0 => SynSent,
            (SynSent, false, _) if f & (TCP_FLAG_SYN | TCP_FLAG_ACK) == (TCP_FLAG_SYN | TCP_FLAG_ACK) => {
                SynReceived
            }
            (SynReceived, true, _) if f & TCP_FLAG_ACK != 0 => Established,
            (Established, _, _) if f & TCP_FLAG_FIN != 0 => FinWait,
            (FinWait, _, _) if f & TCP_FLAG_FIN != 0 => Closing,
            (FinWait, _, _) if f & TCP_FLAG_ACK != 0 => LastAck,
            (Closing, _, _) if f & TCP_FLAG_ACK != 0 => TimeWait,
            (LastAck, _, _) if f & TCP_FLAG_ACK != 0 => TimeWait,
            (other, _, _) => other,
        };
    }
}

/// Sequence-number comparison that accounts for 32-bit wraparound, as the
/// original's window checks do.
fn seq_leq(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) >= 0
}
