//! In-session frame handling shared by the send path and the receiver loop.

use rand::RngCore;

use crate::codec::{self, DecodedFrame, payload_type};
use crate::error::Result;
use crate::protocol::{encode_ipmi_lan_request, peek_lan_response_rq_seq};
use crate::session::Session;

/// Encode a command into a session-protected RMCP+ datagram.
///
/// Allocates the next outbound session sequence number; encryption and the
/// integrity trailer follow the session's negotiated algorithms.
pub(crate) fn encode_session_request(
    session: &mut Session,
    rq_seq: u8,
    netfn: u8,
    cmd: u8,
    data: &[u8],
    rng: &mut dyn RngCore,
) -> Result<Vec<u8>> {
    let lan = encode_ipmi_lan_request(netfn, cmd, rq_seq, data)?;
    let session_seq = session.allocate_out_seq()?;
    codec::encode_v2_frame(
        payload_type::IPMI,
        session.managed_system_session_id,
        session_seq,
        &lan,
        Some(&session.security),
        rng,
    )
}

/// Where a decoded in-session frame should be routed.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// An IPMI command response; `rq_seq` locates the pending request.
    Ipmi { rq_seq: u8, lan_message: Vec<u8> },
    /// A streaming (SOL) frame; the acknowledge fields locate and validate
    /// the pending entry.
    Stream {
        ack_seq: u8,
        accepted: usize,
    },
    /// Nothing we are waiting for; dropped silently.
    Orphan,
}

/// Classify a decoded frame against the active session.
///
/// Responses may echo either the managed-system or the console session id in
/// the header; anything else is orphaned prior-session or broadcast traffic.
pub(crate) fn classify_inbound(session: &Session, frame: DecodedFrame) -> Inbound {
    let session_id_matches = frame.session_id == session.managed_system_session_id
        || frame.session_id == session.remote_console_session_id;

    match frame.payload_type() {
        Some(payload_type::IPMI) if session_id_matches => {
            match peek_lan_response_rq_seq(&frame.payload) {
                Some(rq_seq) => Inbound::Ipmi {
                    rq_seq,
                    lan_message: frame.payload,
                },
                None => Inbound::Orphan,
            }
        }
        Some(payload_type::SOL) if session_id_matches => {
            // SOL header: packet seq, ack seq, accepted count, status.
            if frame.payload.len() < 4 {
                return Inbound::Orphan;
            }
            Inbound::Stream {
                ack_seq: frame.payload[1],
                accepted: usize::from(frame.payload[2]),
            }
        }
        _ => Inbound::Orphan,
    }
}
