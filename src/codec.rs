//! Frame codec for the three nested framing layers: RMCP transport header,
//! IPMI session header (v1.5 or v2.0/RMCP+), and the command payload.
//!
//! The codec applies the security transforms the active session directs:
//! confidentiality before framing, the integrity trailer after. Pre-session
//! discovery traffic travels in v1.5 frames with authentication type "none";
//! everything else is RMCP+.

use rand::RngCore;

use crate::algo::SecurityContext;
use crate::crypto::ct_eq;
use crate::error::{Error, Result};

/// RMCP header values.
const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_CLASS_IPMI: u8 = 0x07;

/// Session authentication type: v1.5 "none".
const AUTH_TYPE_NONE: u8 = 0x00;

/// Session authentication type/format: RMCP+.
const AUTH_TYPE_RMCPPLUS: u8 = 0x06;

/// RMCP+ session trailer next header value.
const RMCPPLUS_NEXT_HEADER: u8 = 0x07;

/// Payload type numbers (see IPMI v2.0 Table 13-16).
pub(crate) mod payload_type {
    /// Standard IPMI payload (lan message) wrapped in RMCP+.
    pub const IPMI: u8 = 0x00;
    /// Serial-over-LAN streaming payload.
    pub const SOL: u8 = 0x01;
    /// RMCP+ Open Session Request.
    pub const OPEN_SESSION_REQUEST: u8 = 0x10;
    /// RMCP+ Open Session Response.
    pub const OPEN_SESSION_RESPONSE: u8 = 0x11;
    /// RAKP Message 1.
    pub const RAKP_1: u8 = 0x12;
    /// RAKP Message 2.
    pub const RAKP_2: u8 = 0x13;
    /// RAKP Message 3.
    pub const RAKP_3: u8 = 0x14;
    /// RAKP Message 4.
    pub const RAKP_4: u8 = 0x15;
}

/// Which session header a decoded frame carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// IPMI v1.5 session header (pre-session discovery traffic).
    V1_5,
    /// RMCP+ (v2.0) session header.
    V2_0 {
        payload_type: u8,
        authenticated: bool,
        encrypted: bool,
    },
}

/// A frame with RMCP and session framing stripped and security transforms
/// undone.
#[derive(Debug, Clone)]
pub(crate) struct DecodedFrame {
    pub kind: FrameKind,
    pub session_id: u32,
    #[allow(dead_code)]
    pub session_seq: u32,
    pub payload: Vec<u8>,
}

impl DecodedFrame {
    /// RMCP+ payload type number, if this is a v2.0 frame.
    pub(crate) fn payload_type(&self) -> Option<u8> {
        match self.kind {
            FrameKind::V2_0 { payload_type, .. } => Some(payload_type),
            FrameKind::V1_5 => None,
        }
    }
}

fn rmcp_header(packet: &mut Vec<u8>) {
    packet.push(RMCP_VERSION);
    packet.push(RMCP_RESERVED);
    packet.push(RMCP_SEQ_NO_ACK);
    packet.push(RMCP_CLASS_IPMI);
}

/// Encode an IPMI v1.5 session frame with authentication type "none".
///
/// Used for the sessionless discovery commands that precede Open Session.
pub(crate) fn encode_v15_frame(session_id: u32, session_seq: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len: u8 = payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("v1.5 payload too large"))?;

    let mut packet = Vec::with_capacity(4 + 10 + payload.len());
    rmcp_header(&mut packet);

    packet.push(AUTH_TYPE_NONE);
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&session_id.to_le_bytes());
    packet.push(payload_len);
    packet.extend_from_slice(payload);

    Ok(packet)
}

/// Encode an RMCP+ session frame.
///
/// When `security` is present, the payload-type flags and the
/// encryption/integrity transforms follow the negotiated algorithms; a
/// `None` security context produces a sessionless plaintext frame (session
/// setup payloads).
pub(crate) fn encode_v2_frame(
    payload_type_num: u8,
    session_id: u32,
    session_seq: u32,
    payload: &[u8],
    security: Option<&SecurityContext>,
    rng: &mut dyn RngCore,
) -> Result<Vec<u8>> {
    let (authenticated, encrypted) = match security {
        Some(sec) => (sec.authenticated(), sec.encrypted()),
        None => (false, false),
    };

    let payload = match security {
        Some(sec) if encrypted => sec
            .suite
            .confidentiality()
            .encrypt(&sec.keys, payload, rng)?,
        _ => payload.to_vec(),
    };

    let payload_type_byte = make_payload_type_byte(payload_type_num, authenticated, encrypted);

    let payload_len: u16 = payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("payload too large"))?;

    let mut packet = Vec::with_capacity(4 + 12 + payload.len() + 64);
    rmcp_header(&mut packet);

    // RMCP+ session header.
    packet.push(AUTH_TYPE_RMCPPLUS);
    packet.push(payload_type_byte);
    packet.extend_from_slice(&session_id.to_le_bytes());
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&payload_len.to_le_bytes());

    packet.extend_from_slice(&payload);

    if authenticated {
        let sec = security.ok_or(Error::Protocol("missing security context"))?;

        // The integrity pad aligns the authenticated range (AuthType through
        // Next Header) to 4 bytes; pad bytes are FFh with an explicit length.
        let base_len = 12usize + payload.len() + 2;
        let pad_len = ((4 - (base_len % 4)) % 4) as u8;

        packet.extend(std::iter::repeat_n(0xFF, pad_len as usize));
        packet.push(pad_len);
        packet.push(RMCPPLUS_NEXT_HEADER);

        let auth_code = sec.suite.integrity().mac(sec.keys.k1(), &packet[4..])?;
        packet.extend_from_slice(&auth_code);
    }

    Ok(packet)
}

/// Decode a received datagram into a [`DecodedFrame`].
///
/// Dispatches on the authentication-type byte to the v1.5 or v2.0 session
/// decoder; verifies and strips the integrity trailer and decrypts the
/// payload when the frame's flags demand it.
pub(crate) fn decode_frame(
    bytes: &[u8],
    security: Option<&SecurityContext>,
) -> Result<DecodedFrame> {
    if bytes.len() < 4 + 1 {
        return Err(Error::Protocol("packet too short"));
    }

    // RMCP header.
    if bytes[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }
    if bytes[3] != RMCP_CLASS_IPMI {
        return Err(Error::Protocol("unexpected RMCP class"));
    }

    match bytes[4] {
        AUTH_TYPE_RMCPPLUS => decode_v2_frame(bytes, security),
        AUTH_TYPE_NONE => decode_v15_frame(bytes),
        _ => Err(Error::Unsupported("unsupported session authentication type")),
    }
}

fn decode_v15_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    // auth type (1) + session seq (4) + session id (4) + payload len (1)
    if bytes.len() < 4 + 10 {
        return Err(Error::Protocol("v1.5 packet too short"));
    }

    let session_seq = u32::from_le_bytes(
        bytes[5..9]
            .try_into()
            .map_err(|_| Error::Protocol("invalid session seq"))?,
    );
    let session_id = u32::from_le_bytes(
        bytes[9..13]
            .try_into()
            .map_err(|_| Error::Protocol("invalid session id"))?,
    );
    let payload_len = bytes[13] as usize;

    let payload_start = 14;
    let payload_end = payload_start + payload_len;
    if bytes.len() < payload_end {
        return Err(Error::Protocol("truncated v1.5 payload"));
    }

    // A zero-length payload is a valid (empty) frame.
    Ok(DecodedFrame {
        kind: FrameKind::V1_5,
        session_id,
        session_seq,
        payload: bytes[payload_start..payload_end].to_vec(),
    })
}

fn decode_v2_frame(bytes: &[u8], security: Option<&SecurityContext>) -> Result<DecodedFrame> {
    if bytes.len() < 4 + 12 {
        return Err(Error::Protocol("packet too short"));
    }

    let payload_type = bytes[5];
    let (is_authenticated, is_encrypted, payload_type_num) = split_payload_type(payload_type);
    if payload_type_num == 0x02 {
        // OEM explicit payload includes OEM fields we don't currently implement.
        return Err(Error::Unsupported("OEM explicit payload is not supported"));
    }

    let session_id = u32::from_le_bytes(
        bytes[6..10]
            .try_into()
            .map_err(|_| Error::Protocol("invalid session id"))?,
    );
    let session_seq = u32::from_le_bytes(
        bytes[10..14]
            .try_into()
            .map_err(|_| Error::Protocol("invalid session seq"))?,
    );
    let payload_len = u16::from_le_bytes(
        bytes[14..16]
            .try_into()
            .map_err(|_| Error::Protocol("invalid payload len"))?,
    ) as usize;

    let header_len = 4 + 12;
    let payload_start = header_len;
    let payload_end = payload_start + payload_len;

    if bytes.len() < payload_end {
        return Err(Error::Protocol("truncated payload"));
    }

    let payload = &bytes[payload_start..payload_end];

    if is_authenticated {
        let security = security.ok_or(Error::Protocol(
            "security context required for authenticated packets",
        ))?;
        verify_auth_code(bytes, payload_end, security)?;
    }

    let payload_data = if is_encrypted {
        let security = security.ok_or(Error::Protocol(
            "security context required for encrypted payload",
        ))?;
        security
            .suite
            .confidentiality()
            .decrypt(&security.keys, payload)?
    } else {
        payload.to_vec()
    };

    Ok(DecodedFrame {
        kind: FrameKind::V2_0 {
            payload_type: payload_type_num,
            authenticated: is_authenticated,
            encrypted: is_encrypted,
        },
        session_id,
        session_seq,
        payload: payload_data,
    })
}

fn verify_auth_code(bytes: &[u8], payload_end: usize, security: &SecurityContext) -> Result<()> {
    let auth_code_len = security.mac_len();
    if auth_code_len == 0 {
        return Err(Error::Protocol(
            "authenticated packet but integrity algorithm is none",
        ));
    }
    if bytes.len() < payload_end + 2 + auth_code_len {
        return Err(Error::Protocol("authenticated packet too short"));
    }

    let auth_code_start = bytes.len() - auth_code_len;
    let auth_code = &bytes[auth_code_start..];

    // The authenticated range is from AuthType (byte 4) through Next Header
    // (inclusive).
    let data_end = auth_code_start;
    let data = &bytes[4..data_end];

    let expected = security.suite.integrity().mac(security.keys.k1(), data)?;
    if !ct_eq(auth_code, &expected) {
        return Err(Error::AuthenticationFailed("invalid packet auth code"));
    }

    // Parse pad length and next header.
    let pad_len = bytes[data_end - 2];
    let next_header = bytes[data_end - 1];
    if next_header != RMCPPLUS_NEXT_HEADER {
        return Err(Error::Protocol("unexpected next header"));
    }

    // Trailer layout: [integrity pad bytes][pad_len][next_header]
    let trailer_start = payload_end;
    let trailer_end = data_end;
    if trailer_end < trailer_start + 2 {
        return Err(Error::Protocol("malformed trailer length"));
    }

    let pad_bytes = &bytes[trailer_start..trailer_end - 2];
    if pad_bytes.len() != pad_len as usize {
        return Err(Error::Protocol("pad length mismatch"));
    }
    if pad_bytes.iter().any(|&b| b != 0xFF) {
        // Spec says pad bytes are FFh.
        return Err(Error::Protocol("invalid integrity pad bytes"));
    }

    Ok(())
}

fn make_payload_type_byte(payload_type_num: u8, authenticated: bool, encrypted: bool) -> u8 {
    let mut b = payload_type_num & 0x3F;
    if authenticated {
        b |= 0x40;
    }
    if encrypted {
        b |= 0x80;
    }
    b
}

fn split_payload_type(payload_type_byte: u8) -> (bool, bool, u8) {
    let is_encrypted = (payload_type_byte & 0x80) != 0;
    let is_authenticated = (payload_type_byte & 0x40) != 0;
    let payload_type_num = payload_type_byte & 0x3F;
    (is_authenticated, is_encrypted, payload_type_num)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::algo::{CipherSuite, SecurityContext};
    use crate::crypto::SecretBytes;

    fn security(suite_id: u8) -> SecurityContext {
        let suite = CipherSuite::from_id(suite_id).expect("suite");
        let sik = SecretBytes::new((0u8..20).collect());
        let keys = suite.bind(&sik).expect("bind");
        SecurityContext { suite, keys }
    }

    #[test]
    fn sessionless_v2_frame_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        let payload = vec![0xAA, 0xBB, 0xCC];
        let packet = encode_v2_frame(
            payload_type::OPEN_SESSION_REQUEST,
            0,
            0,
            &payload,
            None,
            &mut rng,
        )
        .expect("encode");

        let frame = decode_frame(&packet, None).expect("decode");
        assert_eq!(
            frame.kind,
            FrameKind::V2_0 {
                payload_type: payload_type::OPEN_SESSION_REQUEST,
                authenticated: false,
                encrypted: false,
            }
        );
        assert_eq!(frame.session_id, 0);
        assert_eq!(frame.session_seq, 0);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn authenticated_encrypted_frame_round_trip() {
        let mut rng = StdRng::seed_from_u64(2);
        let sec = security(3);
        let payload: Vec<u8> = (0..23).collect();

        let packet = encode_v2_frame(
            payload_type::IPMI,
            0x11223344,
            7,
            &payload,
            Some(&sec),
            &mut rng,
        )
        .expect("encode");

        // The authenticated range must end on a 4-byte boundary.
        let mac_len = sec.mac_len();
        assert!((packet.len() - mac_len - 4).is_multiple_of(4));

        let frame = decode_frame(&packet, Some(&sec)).expect("decode");
        assert_eq!(
            frame.kind,
            FrameKind::V2_0 {
                payload_type: payload_type::IPMI,
                authenticated: true,
                encrypted: true,
            }
        );
        assert_eq!(frame.session_id, 0x11223344);
        assert_eq!(frame.session_seq, 7);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn authenticated_frame_round_trip_per_suite() {
        // Each implemented integrity algorithm produces its own MAC length.
        for suite_id in [2u8, 7, 16] {
            let mut rng = StdRng::seed_from_u64(u64::from(suite_id));
            let sec = security(suite_id);
            let payload = vec![0x20, 0x18, 0xC8];

            let packet =
                encode_v2_frame(payload_type::IPMI, 1, 1, &payload, Some(&sec), &mut rng)
                    .expect("encode");
            let frame = decode_frame(&packet, Some(&sec)).expect("decode");
            assert_eq!(frame.payload, payload, "suite {suite_id}");
        }
    }

    #[test]
    fn tampered_auth_code_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let sec = security(2);
        let payload = vec![1, 2, 3, 4];

        let mut packet =
            encode_v2_frame(payload_type::IPMI, 5, 5, &payload, Some(&sec), &mut rng)
                .expect("encode");
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;

        let err = decode_frame(&packet, Some(&sec)).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
    }

    #[test]
    fn pad_injection_only_when_needed() {
        let mut rng = StdRng::seed_from_u64(4);
        let sec = security(2);

        // base = 12 + payload + 2; payload of 2 makes it a 4-byte multiple,
        // so no pad bytes are injected and the pad-length byte is zero.
        let packet = encode_v2_frame(payload_type::IPMI, 1, 1, &[0x55, 0x66], Some(&sec), &mut rng)
            .expect("encode");
        let mac_len = sec.mac_len();
        let pad_len_byte = packet[packet.len() - mac_len - 2];
        assert_eq!(pad_len_byte, 0);

        // A 3-byte payload needs 3 bytes of 0xFF pad.
        let packet =
            encode_v2_frame(payload_type::IPMI, 1, 2, &[0x55, 0x66, 0x77], Some(&sec), &mut rng)
                .expect("encode");
        let pad_len_byte = packet[packet.len() - mac_len - 2];
        assert_eq!(pad_len_byte, 3);
        let pad_start = packet.len() - mac_len - 2 - 3;
        assert_eq!(&packet[pad_start..pad_start + 3], &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn v15_frame_round_trip() {
        let payload = vec![0x20, 0x18, 0xC8, 0x81, 0x04, 0x54];
        let packet = encode_v15_frame(0, 0, &payload).expect("encode");
        let frame = decode_frame(&packet, None).expect("decode");
        assert_eq!(frame.kind, FrameKind::V1_5);
        assert_eq!(frame.session_id, 0);
        assert_eq!(frame.session_seq, 0);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn v15_zero_length_payload_decodes_empty() {
        let packet = encode_v15_frame(0, 0, &[]).expect("encode");
        let frame = decode_frame(&packet, None).expect("decode");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let packet = encode_v2_frame(payload_type::IPMI, 0, 0, &[1, 2, 3], None, &mut rng)
            .expect("encode");
        let err = decode_frame(&packet[..packet.len() - 2], None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
