use std::fmt::{Display, Formatter};

/// Sequence number of a tunnel message. Sequence ids are wrap-around, so 0
///  follows after FFFFFFFF.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SequenceId(u32);

impl Display for SequenceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceId {
    pub const ZERO: SequenceId = SequenceId(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SequenceId {
        SequenceId(self.0.wrapping_add(1))
    }
}

/// Per-endpoint sequence bookkeeping for the stop-and-wait exchange.
///
/// `next_id` is the id this endpoint sends in its outgoing messages, and it
///  advances only when the peer acknowledges it - mismatching acks leave it
///  (and the pending fragment) untouched so the next send retransmits.
///  `last_ack_id` is the id of the last message accepted from the peer; it is
///  `None` until the first peer message arrives.
#[derive(Debug)]
pub(crate) struct SequenceState {
    next_id: SequenceId,
    last_ack_id: Option<SequenceId>,
}

impl SequenceState {
    pub fn new() -> SequenceState {
        SequenceState {
            next_id: SequenceId::ZERO,
            last_ack_id: None,
        }
    }

    pub fn next_id(&self) -> SequenceId {
        self.next_id
    }

    pub fn last_ack_id(&self) -> Option<SequenceId> {
        self.last_ack_id
    }

    /// A received id is valid if it is the first id ever received from the
    ///  peer, or the successor of the last accepted id.
    pub fn is_valid_peer_id(&self, id: SequenceId) -> bool {
        match self.last_ack_id {
            None => true,
            Some(last) => id == last.next(),
        }
    }

    pub fn accept_peer_id(&mut self, id: SequenceId) {
        self.last_ack_id = Some(id);
    }

    /// Advance `next_id` if the peer acknowledged it. Returns whether the
    ///  ack matched - a mismatch means the peer missed our last message and
    ///  the caller must keep the pending fragment for retransmission.
    #[must_use]
    pub fn try_ack(&mut self, ack_id: SequenceId) -> bool {
        if ack_id == self.next_id {
            self.next_id = self.next_id.next();
            true
        }
        else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 1)]
    #[case::small(7, 8)]
    #[case::wrap(u32::MAX, 0)]
    fn test_next(#[case] raw: u32, #[case] expected: u32) {
        assert_eq!(SequenceId::from_raw(raw).next(), SequenceId::from_raw(expected));
    }

    #[test]
    fn test_first_peer_id_always_valid() {
        let state = SequenceState::new();
        for raw in [0, 1, 17, u32::MAX] {
            assert!(state.is_valid_peer_id(SequenceId::from_raw(raw)));
        }
    }

    #[rstest]
    #[case::sequential(3, 4, true)]
    #[case::duplicate(3, 3, false)]
    #[case::gap(3, 5, false)]
    #[case::stale(3, 2, false)]
    #[case::wrap(u32::MAX, 0, true)]
    fn test_is_valid_peer_id(#[case] last: u32, #[case] received: u32, #[case] expected: bool) {
        let mut state = SequenceState::new();
        state.accept_peer_id(SequenceId::from_raw(last));
        assert_eq!(state.is_valid_peer_id(SequenceId::from_raw(received)), expected);
    }

    #[test]
    fn test_accepted_ids_are_monotonic() {
        let mut state = SequenceState::new();
        state.accept_peer_id(SequenceId::from_raw(u32::MAX - 1));

        for expected in [u32::MAX, 0, 1, 2] {
            let id = SequenceId::from_raw(expected);
            assert!(state.is_valid_peer_id(id));
            state.accept_peer_id(id);
            assert_eq!(state.last_ack_id(), Some(id));
        }
    }

    #[test]
    fn test_try_ack_advances_on_match() {
        let mut state = SequenceState::new();
        assert!(state.try_ack(SequenceId::ZERO));
        assert_eq!(state.next_id(), SequenceId::from_raw(1));
    }

    #[rstest]
    #[case::stale(0)]
    #[case::future(2)]
    fn test_try_ack_keeps_next_id_on_mismatch(#[case] ack: u32) {
        let mut state = SequenceState::new();
        assert!(state.try_ack(SequenceId::ZERO));

        assert!(!state.try_ack(SequenceId::from_raw(ack)));
        assert_eq!(state.next_id(), SequenceId::from_raw(1));
    }

    #[test]
    fn test_try_ack_wraps() {
        let mut state = SequenceState::new();
        state.next_id = SequenceId::from_raw(u32::MAX);

        assert!(state.try_ack(SequenceId::from_raw(u32::MAX)));
        assert_eq!(state.next_id(), SequenceId::ZERO);
    }
}
