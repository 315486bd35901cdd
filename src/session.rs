use crate::algo::SecurityContext;
use crate::error::{Error, Result};

/// An established RMCP+ session.
///
/// Created only by a completed RAKP exchange. The outbound session sequence
/// number is strictly increasing; exhausting the 32-bit range is an error
/// that forces re-establishment rather than wrapping into reuse.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) managed_system_session_id: u32,
    pub(crate) remote_console_session_id: u32,
    pub(crate) security: SecurityContext,
    next_out_seq: u32,
}

impl Session {
    pub(crate) fn new(
        managed_system_session_id: u32,
        remote_console_session_id: u32,
        security: SecurityContext,
    ) -> Self {
        Self {
            managed_system_session_id,
            remote_console_session_id,
            security,
            next_out_seq: 1,
        }
    }

    /// Allocate the next outbound session sequence number.
    pub(crate) fn allocate_out_seq(&mut self) -> Result<u32> {
        let current = self.next_out_seq;
        self.next_out_seq = current.checked_add(1).ok_or(Error::SequenceExhausted)?;
        Ok(current)
    }

    #[cfg(test)]
    pub(crate) fn new_test(managed_system_session_id: u32, remote_console_session_id: u32) -> Self {
        use crate::algo::{CipherSuite, SessionKeys};

        Self {
            managed_system_session_id,
            remote_console_session_id,
            security: SecurityContext {
                suite: CipherSuite::from_id(0).expect("suite 0"),
                keys: SessionKeys::plaintext(),
            },
            next_out_seq: 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_next_out_seq(&mut self, seq: u32) {
        self.next_out_seq = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let mut session = Session::new_test(1, 2);
        let a = session.allocate_out_seq().expect("seq");
        let b = session.allocate_out_seq().expect("seq");
        let c = session.allocate_out_seq().expect("seq");
        assert!(a < b && b < c);
    }

    #[test]
    fn sequence_exhaustion_is_an_error_not_a_wrap() {
        let mut session = Session::new_test(1, 2);
        session.set_next_out_seq(u32::MAX);
        let err = session.allocate_out_seq().unwrap_err();
        assert!(matches!(err, Error::SequenceExhausted));
        // The state stays exhausted; no sequence number is ever reissued.
        let err = session.allocate_out_seq().unwrap_err();
        assert!(matches!(err, Error::SequenceExhausted));
    }
}
