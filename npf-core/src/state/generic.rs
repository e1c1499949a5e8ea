//! Generic three-state tracker used for UDP, ICMP and plain GRE (§4.5).

use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GenericState {
    Closed,
    New,
    Established,
}

impl GenericState {
    /// Default per-state timeout. GRE gets the long-lived 24h timeout once
    /// established, matching the tunnel-tracking lifetime PPTP needs.
    pub fn timeout(self, is_gre: bool) -> Duration {
        match (self, is_gre) {
            (GenericState::Closed, _) => Duration::ZERO,
            (GenericState::New, _) => Duration::from_secs(30),
            (GenericState::Established, false) => Duration::from_secs(60),
            (GenericState::Established, true) => Duration::from_secs(24 * 3600),
        }
    }

    /// Advances the FSM on a packet seen in `forward` direction (i.e. along
    /// the connection's forward key) or the reverse. Invalid transitions
    /// leave the state unchanged and report rejection.
    pub fn advance(self, forward: bool) -> (GenericState, bool) {
        match (self, forward) {
            (GenericState::Closed, true) => (GenericState::New, true),
            (GenericState::Closed, false) => (GenericState::Closed, false),
            (GenericState::New, true) => (GenericState::New, true),
            (GenericState::New, false) => (GenericState::Established, true),
            (GenericState::Established, _) => (GenericState::Established, true),
        }
    }
}

impl Default for GenericState {
    fn default() -> Self {
        GenericState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_forward_packet_opens_new() {
        let (s, ok) = GenericState::Closed.advance(true);
        assert!(ok);
        assert_eq!(s, GenericState::New);
    }

    #[test]
    fn reply_establishes() {
        let (s, ok) = GenericState::New.advance(false);
        assert!(ok);
        assert_eq!(s, GenericState::Established);
    }

    #[test]
    fn backward_first_packet_is_invalid() {
        let (s, ok) = GenericState::Closed.advance(false);
        assert!(!ok);
        assert_eq!(s, GenericState::Closed);
    }

    #[test]
    fn established_absorbs_any_direction() {
        let (s, ok) = GenericState::Established.advance(true);
        assert!(ok);
        assert_eq!(s, GenericState::Established);
        let (s, ok) = GenericState::Established.advance(false);
        assert!(ok);
        assert_eq!(s, GenericState::Established);
    }

    #[test]
    fn gre_established_gets_long_timeout() {
        assert_eq!(
            GenericState::Established.timeout(true),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            GenericState::Established.timeout(false),
            Duration::from_secs(60)
        );
    }
}
