use crate::consts::REPLAY_PROTECTION_BUFFER_SIZE;

const EMPTY: u64 = u64::MAX;

/// Sliding window over the most recently accepted sequence numbers.
///
/// A sequence is a replay when it falls behind the window or its slot already holds a sequence
/// at least as new. The window only moves through [`advance`](ReplayProtection::advance), which
/// callers invoke after the packet has been authenticated.
#[derive(Debug, Clone)]
pub struct ReplayProtection {
    most_recent_sequence: u64,
    received_packet: [u64; REPLAY_PROTECTION_BUFFER_SIZE],
}

impl Default for ReplayProtection {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayProtection {
    pub fn new() -> Self {
        Self {
            most_recent_sequence: 0,
            received_packet: [EMPTY; REPLAY_PROTECTION_BUFFER_SIZE],
        }
    }

    pub fn is_already_received(&self, sequence: u64) -> bool {
        if sequence == EMPTY {
            return true;
        }
        let window = REPLAY_PROTECTION_BUFFER_SIZE as u64;
        if sequence.saturating_add(window) <= self.most_recent_sequence {
            return true;
        }
        let index = sequence as usize % REPLAY_PROTECTION_BUFFER_SIZE;
        let seen = self.received_packet[index];
        seen != EMPTY && seen >= sequence
    }

    pub fn advance(&mut self, sequence: u64) {
        if sequence > self.most_recent_sequence {
            self.most_recent_sequence = sequence;
        }
        let index = sequence as usize % REPLAY_PROTECTION_BUFFER_SIZE;
        self.received_packet[index] = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u64 = REPLAY_PROTECTION_BUFFER_SIZE as u64;

    #[test]
    fn fresh_window_accepts_everything() {
        let replay = ReplayProtection::new();
        assert!(!replay.is_already_received(0));
        assert!(!replay.is_already_received(1_000));
        assert!(replay.is_already_received(u64::MAX));
    }

    #[test]
    fn duplicates_and_stale_sequences_are_rejected() {
        let mut replay = ReplayProtection::new();
        for sequence in 0..SIZE * 4 {
            assert!(!replay.is_already_received(sequence));
            replay.advance(sequence);
            assert!(replay.is_already_received(sequence));
        }
        let most_recent = SIZE * 4 - 1;
        assert!(replay.is_already_received(most_recent - SIZE));
        assert!(replay.is_already_received(0));
        assert!(!replay.is_already_received(most_recent + 1));
    }

    #[test]
    fn out_of_order_within_window_is_accepted_once() {
        let mut replay = ReplayProtection::new();
        replay.advance(10);
        assert!(!replay.is_already_received(5));
        replay.advance(5);
        assert!(replay.is_already_received(5));
        assert!(!replay.is_already_received(6));
    }
}
