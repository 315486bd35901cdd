//! Wire payloads of the RMCP+ session setup exchange and the IPMI LAN
//! message format that command traffic travels in.
//!
//! Builders produce request payload bytes; parsers validate structure only.
//! The RAKP authentication-code computations are parameterized by the
//! negotiated [`AuthenticationAlgorithm`] so every suite family reuses the
//! same data assembly.

use crate::algo::AuthenticationAlgorithm;
use crate::error::{Error, Result};
use crate::types::{PrivilegeLevel, RawResponse};

/// Build the Open Session Request payload (Table 13-9).
pub(crate) fn build_open_session_request_payload(
    message_tag: u8,
    requested_privilege: PrivilegeLevel,
    remote_console_session_id: u32,
    auth_algorithm: u8,
    integrity_algorithm: u8,
    confidentiality_algorithm: u8,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);

    // 1: Message Tag
    p.push(message_tag);
    // 2: requested maximum privilege level (0 means "maximum allowed")
    let requested_priv = if matches!(requested_privilege, PrivilegeLevel::Administrator) {
        0x00
    } else {
        requested_privilege.as_u8() & 0x0F
    };
    p.push(requested_priv);
    // 3: reserved
    p.push(0x00);
    // 4: reserved
    p.push(0x00);
    // 5:8 remote console session id (LSB first)
    p.extend_from_slice(&remote_console_session_id.to_le_bytes());

    // 9:16 authentication payload
    p.extend_from_slice(&build_algorithm_proposal(0x00, auth_algorithm));
    // 17:24 integrity payload
    p.extend_from_slice(&build_algorithm_proposal(0x01, integrity_algorithm));
    // 25:32 confidentiality payload
    p.extend_from_slice(&build_algorithm_proposal(0x02, confidentiality_algorithm));

    debug_assert_eq!(p.len(), 32);
    p
}

fn build_algorithm_proposal(payload_type: u8, algorithm: u8) -> [u8; 8] {
    [
        payload_type,
        0x00,
        0x00,
        0x08,
        algorithm & 0x3F,
        0x00,
        0x00,
        0x00,
    ]
}

#[derive(Debug, Clone)]
pub(crate) struct OpenSessionResponse {
    pub message_tag: u8,
    pub status_code: u8,
    #[allow(dead_code)]
    pub max_privilege_level: u8,
    pub remote_console_session_id: u32,
    pub managed_system_session_id: u32,
    pub selected_auth_algorithm: u8,
    pub selected_integrity_algorithm: u8,
    pub selected_confidentiality_algorithm: u8,
}

pub(crate) fn parse_open_session_response_payload(payload: &[u8]) -> Result<OpenSessionResponse> {
    if payload.len() < 8 {
        return Err(Error::Protocol("open session response payload too short"));
    }

    let message_tag = payload[0];
    let status_code = payload[1];
    let max_privilege_level = payload[2];

    let remote_console_session_id = u32::from_le_bytes(
        payload[4..8]
            .try_into()
            .map_err(|_| Error::Protocol("invalid remote session id"))?,
    );

    if status_code != 0x00 {
        return Ok(OpenSessionResponse {
            message_tag,
            status_code,
            max_privilege_level,
            remote_console_session_id,
            managed_system_session_id: 0,
            selected_auth_algorithm: 0,
            selected_integrity_algorithm: 0,
            selected_confidentiality_algorithm: 0,
        });
    }

    if payload.len() < 36 {
        return Err(Error::Protocol("open session response payload too short"));
    }

    let managed_system_session_id = u32::from_le_bytes(
        payload[8..12]
            .try_into()
            .map_err(|_| Error::Protocol("invalid managed session id"))?,
    );

    // Selected algorithms are encoded in byte 5 of each 8-byte block.
    let selected_auth_algorithm = payload[12 + 4] & 0x3F;
    let selected_integrity_algorithm = payload[20 + 4] & 0x3F;
    let selected_confidentiality_algorithm = payload[28 + 4] & 0x3F;

    Ok(OpenSessionResponse {
        message_tag,
        status_code,
        max_privilege_level,
        remote_console_session_id,
        managed_system_session_id,
        selected_auth_algorithm,
        selected_integrity_algorithm,
        selected_confidentiality_algorithm,
    })
}

/// Build RAKP Message 1 payload (Table 13-11).
pub(crate) fn build_rakp_message_1_payload(
    message_tag: u8,
    managed_system_session_id: u32,
    console_random: &[u8; 16],
    requested_privilege: PrivilegeLevel,
    username: &[u8],
) -> Result<Vec<u8>> {
    if username.len() > 16 {
        return Err(Error::Protocol("username too long (max 16 bytes)"));
    }

    let mut p = Vec::with_capacity(28 + username.len());

    p.push(message_tag);
    p.extend_from_slice(&[0x00, 0x00, 0x00]);
    p.extend_from_slice(&managed_system_session_id.to_le_bytes());
    p.extend_from_slice(console_random);

    // Requested maximum privilege level (Role) with bit4=0 (do username/priv lookup).
    let role = requested_privilege.as_u8() & 0x0F;
    p.push(role);
    p.extend_from_slice(&[0x00, 0x00]);

    p.push(username.len() as u8);
    p.extend_from_slice(username);

    Ok(p)
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage2 {
    pub message_tag: u8,
    pub status_code: u8,
    pub remote_console_session_id: u32,
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    /// Length follows the negotiated authentication algorithm's digest;
    /// empty for RAKP-none.
    pub key_exchange_auth_code: Vec<u8>,
}

pub(crate) fn parse_rakp_message_2_payload(
    auth: AuthenticationAlgorithm,
    payload: &[u8],
) -> Result<RakpMessage2> {
    let code_len = auth.digest_len();
    if payload.len() < 40 + code_len {
        return Err(Error::Protocol("RAKP message 2 payload too short"));
    }

    let message_tag = payload[0];
    let status_code = payload[1];

    let remote_console_session_id = u32::from_le_bytes(
        payload[4..8]
            .try_into()
            .map_err(|_| Error::Protocol("invalid remote session id"))?,
    );

    let bmc_random: [u8; 16] = payload[8..24]
        .try_into()
        .map_err(|_| Error::Protocol("invalid bmc random"))?;

    let bmc_guid: [u8; 16] = payload[24..40]
        .try_into()
        .map_err(|_| Error::Protocol("invalid bmc guid"))?;

    let key_exchange_auth_code = payload[40..40 + code_len].to_vec();

    Ok(RakpMessage2 {
        message_tag,
        status_code,
        remote_console_session_id,
        bmc_random,
        bmc_guid,
        key_exchange_auth_code,
    })
}

/// Build RAKP Message 3 payload (Table 13-13).
pub(crate) fn build_rakp_message_3_payload(
    message_tag: u8,
    managed_system_session_id: u32,
    key_exchange_auth_code: &[u8],
) -> Vec<u8> {
    let mut p = Vec::with_capacity(8 + key_exchange_auth_code.len());
    p.push(message_tag);
    p.push(0x00); // status code (always 00h for request)
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&managed_system_session_id.to_le_bytes());
    p.extend_from_slice(key_exchange_auth_code);
    p
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage4 {
    pub message_tag: u8,
    pub status_code: u8,
    pub remote_console_session_id: u32,
    /// Truncated per the authentication algorithm; empty for RAKP-none.
    pub integrity_check_value: Vec<u8>,
}

pub(crate) fn parse_rakp_message_4_payload(
    auth: AuthenticationAlgorithm,
    payload: &[u8],
) -> Result<RakpMessage4> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 4 payload too short"));
    }

    let message_tag = payload[0];
    let status_code = payload[1];

    let remote_console_session_id = u32::from_le_bytes(
        payload[4..8]
            .try_into()
            .map_err(|_| Error::Protocol("invalid remote session id"))?,
    );

    if status_code != 0x00 {
        return Ok(RakpMessage4 {
            message_tag,
            status_code,
            remote_console_session_id,
            integrity_check_value: Vec::new(),
        });
    }

    let icv_len = auth.icv_len();
    if payload.len() < 8 + icv_len {
        return Err(Error::Protocol("RAKP message 4 payload too short"));
    }

    Ok(RakpMessage4 {
        message_tag,
        status_code,
        remote_console_session_id,
        integrity_check_value: payload[8..8 + icv_len].to_vec(),
    })
}

/// Compute the RAKP Message 2 key exchange authentication code.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rakp2_key_exchange_auth_code(
    auth: AuthenticationAlgorithm,
    user_key: &[u8],
    remote_console_session_id: u32,
    managed_system_session_id: u32,
    console_random: &[u8; 16],
    bmc_random: &[u8; 16],
    bmc_guid: &[u8; 16],
    requested_privilege: PrivilegeLevel,
    username: &[u8],
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(4 + 4 + 16 + 16 + 16 + 1 + 1 + username.len());
    data.extend_from_slice(&remote_console_session_id.to_le_bytes());
    data.extend_from_slice(&managed_system_session_id.to_le_bytes());
    data.extend_from_slice(console_random);
    data.extend_from_slice(bmc_random);
    data.extend_from_slice(bmc_guid);
    data.push(requested_privilege.as_u8() & 0x0F);
    data.push(username.len() as u8);
    data.extend_from_slice(username);

    auth.keyed_hash(user_key, &data)
}

/// Compute the Session Integrity Key (SIK): keyed hash, no truncation.
pub(crate) fn compute_sik(
    auth: AuthenticationAlgorithm,
    kg: &[u8],
    console_random: &[u8; 16],
    bmc_random: &[u8; 16],
    requested_privilege: PrivilegeLevel,
    username: &[u8],
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(16 + 16 + 1 + 1 + username.len());
    data.extend_from_slice(console_random);
    data.extend_from_slice(bmc_random);
    data.push(requested_privilege.as_u8() & 0x0F);
    data.push(username.len() as u8);
    data.extend_from_slice(username);

    auth.keyed_hash(kg, &data)
}

/// Compute the RAKP Message 3 key exchange authentication code.
pub(crate) fn rakp3_key_exchange_auth_code(
    auth: AuthenticationAlgorithm,
    user_key: &[u8],
    bmc_random: &[u8; 16],
    remote_console_session_id: u32,
    requested_privilege: PrivilegeLevel,
    username: &[u8],
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(16 + 4 + 1 + 1 + username.len());
    data.extend_from_slice(bmc_random);
    data.extend_from_slice(&remote_console_session_id.to_le_bytes());
    data.push(requested_privilege.as_u8() & 0x0F);
    data.push(username.len() as u8);
    data.extend_from_slice(username);

    auth.keyed_hash(user_key, &data)
}

/// Compute the RAKP Message 4 integrity check value (keyed by the SIK,
/// truncated per the authentication algorithm).
pub(crate) fn rakp4_integrity_check_value(
    auth: AuthenticationAlgorithm,
    sik: &[u8],
    console_random: &[u8; 16],
    managed_system_session_id: u32,
    bmc_guid: &[u8; 16],
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(16 + 4 + 16);
    data.extend_from_slice(console_random);
    data.extend_from_slice(&managed_system_session_id.to_le_bytes());
    data.extend_from_slice(bmc_guid);

    auth.keyed_hash_icv(sik, &data)
}

/// One record of a Get Channel Cipher Suites response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteRecord {
    /// Cipher suite id.
    pub id: u8,
    /// Authentication algorithm code.
    pub authentication: u8,
    /// Integrity algorithm code.
    pub integrity: u8,
    /// Confidentiality algorithm code.
    pub confidentiality: u8,
}

/// Parse the accumulated Get Channel Cipher Suites record bytes.
///
/// Standard records open with C0h and OEM records with C1h (their 3-byte
/// IANA prefix is skipped); each following byte tags its algorithm family in
/// bits 7:6 (00 authentication, 01 integrity, 10 confidentiality).
pub(crate) fn parse_cipher_suite_records(bytes: &[u8]) -> Result<Vec<CipherSuiteRecord>> {
    let mut records = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let start = bytes[i];
        let oem = match start {
            0xC0 => false,
            0xC1 => true,
            _ => return Err(Error::Protocol("malformed cipher suite record")),
        };

        i += 1;
        let id = *bytes.get(i).ok_or(Error::Protocol("truncated cipher suite record"))?;
        i += 1;
        if oem {
            if i + 3 > bytes.len() {
                return Err(Error::Protocol("truncated cipher suite record"));
            }
            i += 3;
        }

        let mut record = CipherSuiteRecord {
            id,
            authentication: 0,
            integrity: 0,
            confidentiality: 0,
        };

        while i < bytes.len() && bytes[i] != 0xC0 && bytes[i] != 0xC1 {
            let b = bytes[i];
            match b >> 6 {
                0x00 => record.authentication = b & 0x3F,
                0x01 => record.integrity = b & 0x3F,
                0x02 => record.confidentiality = b & 0x3F,
                _ => return Err(Error::Protocol("malformed cipher suite algorithm tag")),
            }
            i += 1;
        }

        records.push(record);
    }

    Ok(records)
}

/// Compute the standard 2's complement checksum used by IPMI LAN messages.
fn ipmi_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Encode an IPMI LAN message.
pub(crate) fn encode_ipmi_lan_request(
    netfn: u8,
    cmd: u8,
    rq_seq: u8,
    data: &[u8],
) -> Result<Vec<u8>> {
    if rq_seq > 0x3F {
        return Err(Error::Protocol("rq_seq must be 6-bit"));
    }

    // Constants per LAN interface.
    let responder_addr: u8 = 0x20;
    let requester_addr: u8 = 0x81;
    let lun: u8 = 0;

    let netfn_lun = (netfn << 2) | (lun & 0x03);
    let csum1 = ipmi_checksum(&[responder_addr, netfn_lun]);

    let rq_seq_lun = (rq_seq << 2) | (lun & 0x03);

    let mut msg = Vec::with_capacity(7 + data.len() + 1);
    msg.push(responder_addr);
    msg.push(netfn_lun);
    msg.push(csum1);

    msg.push(requester_addr);
    msg.push(rq_seq_lun);
    msg.push(cmd);
    msg.extend_from_slice(data);

    let csum2 = ipmi_checksum(&msg[3..]);
    msg.push(csum2);

    Ok(msg)
}

/// Extract the request sequence number from a LAN response without fully
/// validating it.
///
/// The receiver uses this to locate the pending request by tag before the
/// full decode runs against that request's expectations.
pub(crate) fn peek_lan_response_rq_seq(msg: &[u8]) -> Option<u8> {
    if msg.len() < 8 {
        return None;
    }
    Some(msg[4] >> 2)
}

/// Decode and validate an IPMI LAN response message.
pub(crate) fn decode_ipmi_lan_response(
    expected_netfn: u8,
    expected_cmd: u8,
    expected_rq_seq: u8,
    msg: &[u8],
) -> Result<RawResponse> {
    if msg.len() < 7 + 1 {
        return Err(Error::Protocol("IPMI response too short"));
    }

    let rs_addr = msg[0];
    let netfn_lun = msg[1];
    let csum1 = msg[2];

    // Validate checksum1 (sum of bytes including checksum must be zero).
    if rs_addr.wrapping_add(netfn_lun).wrapping_add(csum1) != 0 {
        return Err(Error::Protocol("invalid IPMI checksum1"));
    }

    let rq_addr = msg[3];
    let rq_seq_lun = msg[4];
    let cmd = msg[5];

    // Validate checksum2.
    let provided_csum2 = *msg.last().ok_or(Error::Protocol("missing checksum2"))?;
    let sum2 = msg[3..msg.len() - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_add(provided_csum2);
    if sum2 != 0 {
        return Err(Error::Protocol("invalid IPMI checksum2"));
    }

    let expected_netfn_lun = (expected_netfn + 1) << 2;
    if rs_addr != 0x81 || netfn_lun != expected_netfn_lun {
        return Err(Error::Protocol("unexpected responder or netfn"));
    }

    if rq_addr != 0x20 {
        return Err(Error::Protocol("unexpected requester address"));
    }

    let expected_rq_seq_lun = expected_rq_seq << 2;
    if rq_seq_lun != expected_rq_seq_lun {
        return Err(Error::Protocol("unexpected request sequence"));
    }

    if cmd != expected_cmd {
        return Err(Error::Protocol("unexpected command"));
    }

    let completion_code = msg[6];
    let data = if msg.len() > 8 {
        msg[7..msg.len() - 1].to_vec()
    } else {
        Vec::new()
    };

    Ok(RawResponse {
        completion_code,
        data,
    })
}
