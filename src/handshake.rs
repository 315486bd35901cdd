//! RMCP+ session establishment state machine.
//!
//! Exactly one state is current per connection; handshake data advances only
//! through [`step`], a transition function from `(state, event)` to
//! `(state, effects)`. Effects are explicit "transmit these bytes" /
//! "session is ready" actions; transitions perform no I/O themselves, which
//! keeps every exchange scriptable in tests.
//!
//! The handshake runs over connectionless UDP, so every waiting state
//! ignores inbound frames that do not match its expected payload type,
//! session id, or outstanding tag: retransmissions, orphaned prior-session
//! traffic, and unrelated replies arrive interleaved and must not derail the
//! exchange. Timeouts regress to the documented earlier state; RAKP
//! authentication failures are fatal and never retried.

use rand::RngCore;

use crate::algo::{AuthenticationAlgorithm, CipherSuite, SecurityContext};
use crate::codec::{self, DecodedFrame, FrameKind, payload_type};
use crate::commands::{Command, GetChannelAuthCapabilities, GetChannelCipherSuites};
use crate::crypto::{SecretBytes, ct_eq};
use crate::error::{Error, Result};
use crate::protocol::{
    build_open_session_request_payload, build_rakp_message_1_payload, build_rakp_message_3_payload,
    compute_sik, decode_ipmi_lan_response, encode_ipmi_lan_request, parse_cipher_suite_records,
    parse_open_session_response_payload, parse_rakp_message_2_payload, parse_rakp_message_4_payload,
    rakp2_key_exchange_auth_code, rakp3_key_exchange_auth_code, rakp4_integrity_check_value,
};
use crate::session::Session;
use crate::types::{ChannelAuthCapabilities, PrivilegeLevel};

/// Connection parameters the handshake needs on every transition.
#[derive(Debug)]
pub(crate) struct HandshakeConfig {
    /// Channel number for discovery commands; 0x0E addresses "this channel".
    pub channel: u8,
    pub username: Vec<u8>,
    pub password: SecretBytes,
    /// Optional two-key authentication secret (Kg). The password keys the
    /// SIK when absent.
    pub bmc_key: Option<SecretBytes>,
    pub privilege_level: PrivilegeLevel,
    pub cipher_suite: CipherSuite,
}

impl HandshakeConfig {
    fn kg(&self) -> &SecretBytes {
        self.bmc_key.as_ref().unwrap_or(&self.password)
    }
}

/// An external event fed into the state machine.
#[derive(Debug)]
pub(crate) enum Event {
    /// Caller request: discover supported cipher suites.
    GetChannelCipherSuites,
    /// Caller request: discover authentication capabilities.
    GetChannelAuthCapabilities,
    /// Caller request: open an RMCP+ session.
    OpenSession,
    /// Caller request: send RAKP message 1.
    Rakp1,
    /// Caller request: send RAKP message 3.
    Rakp3,
    /// Caller request: bind session keys and go valid.
    StartSession,
    /// Caller request: leave the valid session.
    CloseSession,
    /// A decoded frame arrived from the network.
    Frame(DecodedFrame),
    /// The outstanding exchange timed out.
    Timeout,
}

/// An action the caller must perform after a transition.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Transmit an encoded datagram.
    Send(Vec<u8>),
    /// The handshake completed; the session is ready for command traffic.
    Established(Session),
}

/// Discovery results carried from `Authcap` onward so a closed session can
/// reopen without re-running discovery.
#[derive(Debug, Clone)]
pub(crate) struct Discovery {
    /// Raw Get Channel Cipher Suites record bytes.
    pub suite_bytes: Vec<u8>,
    pub capabilities: ChannelAuthCapabilities,
}

/// Open Session material before the BMC assigned its session id.
#[derive(Debug)]
pub(crate) struct OpenContext {
    pub discovery: Discovery,
    pub console_session_id: u32,
}

/// Material after Open Session Response.
#[derive(Debug)]
pub(crate) struct OpenedContext {
    pub discovery: Discovery,
    pub console_session_id: u32,
    pub managed_session_id: u32,
}

/// Material while RAKP message 2 is outstanding.
#[derive(Debug)]
pub(crate) struct Rakp1Context {
    pub opened: OpenedContext,
    pub console_random: [u8; 16],
}

/// Complete RAKP material once the SIK is derived.
///
/// Owned by exactly one state at a time and moved between them; nothing
/// aliases the in-flight handshake material.
#[derive(Debug)]
pub(crate) struct RakpContext {
    pub discovery: Discovery,
    pub console_session_id: u32,
    pub managed_session_id: u32,
    pub console_random: [u8; 16],
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    pub sik: SecretBytes,
}

/// The handshake states. See the module docs for the transition graph.
#[derive(Debug)]
pub(crate) enum HandshakeState {
    Uninitialized,
    CiphersWaiting {
        rq_seq: u8,
        list_index: u8,
        collected: Vec<u8>,
    },
    Ciphers {
        suite_bytes: Vec<u8>,
    },
    AuthcapWaiting {
        rq_seq: u8,
        suite_bytes: Vec<u8>,
    },
    Authcap {
        discovery: Discovery,
        console_session_id: u32,
    },
    OpenSessionWaiting {
        tag: u8,
        ctx: OpenContext,
    },
    OpenSessionComplete {
        ctx: OpenedContext,
    },
    Rakp1Waiting {
        tag: u8,
        ctx: Rakp1Context,
    },
    Rakp1Complete {
        ctx: RakpContext,
    },
    Rakp3Waiting {
        tag: u8,
        ctx: RakpContext,
    },
    Rakp3Complete {
        ctx: RakpContext,
    },
    SessionValid {
        discovery: Discovery,
    },
}

/// State discriminant used by drivers to check progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    CiphersWaiting,
    Ciphers,
    AuthcapWaiting,
    Authcap,
    OpenSessionWaiting,
    OpenSessionComplete,
    Rakp1Waiting,
    Rakp1Complete,
    Rakp3Waiting,
    Rakp3Complete,
    SessionValid,
}

impl HandshakeState {
    pub(crate) fn phase(&self) -> Phase {
        match self {
            Self::Uninitialized => Phase::Uninitialized,
            Self::CiphersWaiting { .. } => Phase::CiphersWaiting,
            Self::Ciphers { .. } => Phase::Ciphers,
            Self::AuthcapWaiting { .. } => Phase::AuthcapWaiting,
            Self::Authcap { .. } => Phase::Authcap,
            Self::OpenSessionWaiting { .. } => Phase::OpenSessionWaiting,
            Self::OpenSessionComplete { .. } => Phase::OpenSessionComplete,
            Self::Rakp1Waiting { .. } => Phase::Rakp1Waiting,
            Self::Rakp1Complete { .. } => Phase::Rakp1Complete,
            Self::Rakp3Waiting { .. } => Phase::Rakp3Waiting,
            Self::Rakp3Complete { .. } => Phase::Rakp3Complete,
            Self::SessionValid { .. } => Phase::SessionValid,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self.phase() {
            Phase::Uninitialized => "Uninitialized",
            Phase::CiphersWaiting => "CiphersWaiting",
            Phase::Ciphers => "Ciphers",
            Phase::AuthcapWaiting => "AuthcapWaiting",
            Phase::Authcap => "Authcap",
            Phase::OpenSessionWaiting => "OpenSessionWaiting",
            Phase::OpenSessionComplete => "OpenSessionComplete",
            Phase::Rakp1Waiting => "Rakp1Waiting",
            Phase::Rakp1Complete => "Rakp1Complete",
            Phase::Rakp3Waiting => "Rakp3Waiting",
            Phase::Rakp3Complete => "Rakp3Complete",
            Phase::SessionValid => "SessionValid",
        }
    }
}

fn rand_tag(rng: &mut dyn RngCore) -> u8 {
    (rng.next_u32() & 0xFF) as u8
}

fn rand_rq_seq(rng: &mut dyn RngCore) -> u8 {
    (rng.next_u32() & 0x3F) as u8
}

fn fresh_authcap(discovery: Discovery, rng: &mut dyn RngCore) -> HandshakeState {
    // Entering Authcap always generates a fresh console session id.
    HandshakeState::Authcap {
        discovery,
        console_session_id: rng.next_u32(),
    }
}

/// Encode a sessionless v1.5 frame carrying a discovery command.
fn v15_request<C: Command>(cmd: &C, rq_seq: u8) -> Result<Vec<u8>> {
    let lan = encode_ipmi_lan_request(C::NETFN, C::CMD, rq_seq, &cmd.request_data())?;
    codec::encode_v15_frame(0, 0, &lan)
}

fn cipher_suites_request(
    config: &HandshakeConfig,
    rng: &mut dyn RngCore,
    list_index: u8,
) -> Result<(u8, Vec<u8>)> {
    let rq_seq = rand_rq_seq(rng);
    let cmd = GetChannelCipherSuites::new(config.channel, list_index);
    Ok((rq_seq, v15_request(&cmd, rq_seq)?))
}

/// Advance the handshake by one event.
///
/// Returns the successor state and either the effects to perform or the
/// error to surface. Illegal caller events leave the state untouched and
/// report [`Error::IllegalTransition`]; frames that do not belong to the
/// outstanding exchange are dropped without effect.
pub(crate) fn step(
    config: &HandshakeConfig,
    rng: &mut dyn RngCore,
    state: HandshakeState,
    event: Event,
) -> (HandshakeState, Result<Vec<Effect>>) {
    use HandshakeState as S;

    match (state, event) {
        // --- Cipher suite discovery -------------------------------------
        (S::Uninitialized, Event::GetChannelCipherSuites) => {
            match cipher_suites_request(config, rng, 0) {
                Ok((rq_seq, bytes)) => (
                    S::CiphersWaiting {
                        rq_seq,
                        list_index: 0,
                        collected: Vec::new(),
                    },
                    Ok(vec![Effect::Send(bytes)]),
                ),
                Err(e) => (S::Uninitialized, Err(e)),
            }
        }

        (S::CiphersWaiting { .. }, Event::Timeout) => (S::Uninitialized, Ok(vec![])),

        (
            S::CiphersWaiting {
                rq_seq,
                list_index,
                mut collected,
            },
            Event::Frame(frame),
        ) => {
            let keep = |collected: Vec<u8>| S::CiphersWaiting {
                rq_seq,
                list_index,
                collected,
            };

            if frame.kind != FrameKind::V1_5 {
                return (keep(collected), Ok(vec![]));
            }
            let cmd = GetChannelCipherSuites::new(config.channel, list_index);
            let raw = match decode_ipmi_lan_response(
                GetChannelCipherSuites::NETFN,
                GetChannelCipherSuites::CMD,
                rq_seq,
                &frame.payload,
            ) {
                Ok(raw) => raw,
                // Not the response to the outstanding request.
                Err(_) => return (keep(collected), Ok(vec![])),
            };

            let fragment = match cmd.parse_response(raw) {
                Ok(fragment) => fragment,
                Err(e) => return (S::Uninitialized, Err(e)),
            };

            collected.extend_from_slice(&fragment.record_bytes);

            if fragment.has_more() {
                // A full 16-byte fragment means more records follow.
                match cipher_suites_request(config, rng, list_index + 1) {
                    Ok((rq_seq, bytes)) => (
                        S::CiphersWaiting {
                            rq_seq,
                            list_index: list_index + 1,
                            collected,
                        },
                        Ok(vec![Effect::Send(bytes)]),
                    ),
                    Err(e) => (S::Uninitialized, Err(e)),
                }
            } else {
                (
                    S::Ciphers {
                        suite_bytes: collected,
                    },
                    Ok(vec![]),
                )
            }
        }

        // --- Authentication capability discovery ------------------------
        (S::Ciphers { suite_bytes }, Event::GetChannelAuthCapabilities) => {
            let rq_seq = rand_rq_seq(rng);
            let cmd = GetChannelAuthCapabilities::new(config.channel, config.privilege_level);
            match v15_request(&cmd, rq_seq) {
                Ok(bytes) => (
                    S::AuthcapWaiting { rq_seq, suite_bytes },
                    Ok(vec![Effect::Send(bytes)]),
                ),
                Err(e) => (S::Ciphers { suite_bytes }, Err(e)),
            }
        }

        (S::AuthcapWaiting { suite_bytes, .. }, Event::Timeout) => {
            (S::Ciphers { suite_bytes }, Ok(vec![]))
        }

        (S::AuthcapWaiting { rq_seq, suite_bytes }, Event::Frame(frame)) => {
            if frame.kind != FrameKind::V1_5 {
                return (S::AuthcapWaiting { rq_seq, suite_bytes }, Ok(vec![]));
            }
            let cmd = GetChannelAuthCapabilities::new(config.channel, config.privilege_level);
            let raw = match decode_ipmi_lan_response(
                GetChannelAuthCapabilities::NETFN,
                GetChannelAuthCapabilities::CMD,
                rq_seq,
                &frame.payload,
            ) {
                Ok(raw) => raw,
                Err(_) => return (S::AuthcapWaiting { rq_seq, suite_bytes }, Ok(vec![])),
            };

            match cmd.parse_response(raw) {
                Ok(capabilities) => (
                    fresh_authcap(
                        Discovery {
                            suite_bytes,
                            capabilities,
                        },
                        rng,
                    ),
                    Ok(vec![]),
                ),
                Err(e) => (S::Ciphers { suite_bytes }, Err(e)),
            }
        }

        // --- Open Session ------------------------------------------------
        (
            S::Authcap {
                discovery,
                console_session_id,
            },
            Event::OpenSession,
        ) => {
            if !discovery.capabilities.supports_ipmi_v2_0
                && !discovery.capabilities.v20_data_available
            {
                return (
                    S::Authcap {
                        discovery,
                        console_session_id,
                    },
                    Err(Error::Unsupported("managed system does not support IPMI v2.0")),
                );
            }

            // The configured suite must be among the advertised records. An
            // empty or unparseable record stream is inconclusive; let the
            // BMC judge the proposal itself.
            if let Ok(records) = parse_cipher_suite_records(&discovery.suite_bytes) {
                if !records.is_empty()
                    && !records.iter().any(|r| r.id == config.cipher_suite.id())
                {
                    return (
                        S::Authcap {
                            discovery,
                            console_session_id,
                        },
                        Err(Error::Unsupported(
                            "requested cipher suite is not advertised by the managed system",
                        )),
                    );
                }
            }

            let tag = rand_tag(rng);
            let suite = &config.cipher_suite;
            let payload = build_open_session_request_payload(
                tag,
                config.privilege_level,
                console_session_id,
                suite.authentication().code(),
                suite.integrity().code(),
                suite.confidentiality().code(),
            );
            match codec::encode_v2_frame(
                payload_type::OPEN_SESSION_REQUEST,
                0,
                0,
                &payload,
                None,
                rng,
            ) {
                Ok(bytes) => (
                    S::OpenSessionWaiting {
                        tag,
                        ctx: OpenContext {
                            discovery,
                            console_session_id,
                        },
                    },
                    Ok(vec![Effect::Send(bytes)]),
                ),
                Err(e) => (
                    S::Authcap {
                        discovery,
                        console_session_id,
                    },
                    Err(e),
                ),
            }
        }

        (S::OpenSessionWaiting { ctx, .. }, Event::Timeout) => {
            (fresh_authcap(ctx.discovery, rng), Ok(vec![]))
        }

        (S::OpenSessionWaiting { tag, ctx }, Event::Frame(frame)) => {
            if frame.payload_type() != Some(payload_type::OPEN_SESSION_RESPONSE) {
                return (S::OpenSessionWaiting { tag, ctx }, Ok(vec![]));
            }
            let resp = match parse_open_session_response_payload(&frame.payload) {
                Ok(resp) => resp,
                Err(_) => return (S::OpenSessionWaiting { tag, ctx }, Ok(vec![])),
            };
            if resp.message_tag != tag
                || (resp.status_code == 0x00
                    && resp.remote_console_session_id != ctx.console_session_id)
            {
                return (S::OpenSessionWaiting { tag, ctx }, Ok(vec![]));
            }

            if resp.status_code != 0x00 {
                return (
                    fresh_authcap(ctx.discovery, rng),
                    Err(Error::protocol_owned(format!(
                        "Open Session rejected by managed system (status {:#04x})",
                        resp.status_code
                    ))),
                );
            }

            let suite = &config.cipher_suite;
            if resp.selected_auth_algorithm != suite.authentication().code()
                || resp.selected_integrity_algorithm != suite.integrity().code()
                || resp.selected_confidentiality_algorithm != suite.confidentiality().code()
            {
                return (
                    fresh_authcap(ctx.discovery, rng),
                    Err(Error::Unsupported(
                        "managed system selected a different cipher suite",
                    )),
                );
            }

            (
                S::OpenSessionComplete {
                    ctx: OpenedContext {
                        discovery: ctx.discovery,
                        console_session_id: ctx.console_session_id,
                        managed_session_id: resp.managed_system_session_id,
                    },
                },
                Ok(vec![]),
            )
        }

        // --- RAKP 1/2 ----------------------------------------------------
        (S::OpenSessionComplete { ctx }, Event::Rakp1) => {
            let tag = rand_tag(rng);
            let mut console_random = [0u8; 16];
            rng.fill_bytes(&mut console_random);

            let payload = match build_rakp_message_1_payload(
                tag,
                ctx.managed_session_id,
                &console_random,
                config.privilege_level,
                &config.username,
            ) {
                Ok(p) => p,
                Err(e) => return (S::OpenSessionComplete { ctx }, Err(e)),
            };

            match codec::encode_v2_frame(payload_type::RAKP_1, 0, 0, &payload, None, rng) {
                Ok(bytes) => (
                    S::Rakp1Waiting {
                        tag,
                        ctx: Rakp1Context {
                            opened: ctx,
                            console_random,
                        },
                    },
                    Ok(vec![Effect::Send(bytes)]),
                ),
                Err(e) => (S::OpenSessionComplete { ctx }, Err(e)),
            }
        }

        (S::Rakp1Waiting { ctx, .. }, Event::Timeout) => {
            (fresh_authcap(ctx.opened.discovery, rng), Ok(vec![]))
        }

        (S::Rakp1Waiting { tag, ctx }, Event::Frame(frame)) => {
            if frame.payload_type() != Some(payload_type::RAKP_2) {
                return (S::Rakp1Waiting { tag, ctx }, Ok(vec![]));
            }
            let auth = config.cipher_suite.authentication();
            let rakp2 = match parse_rakp_message_2_payload(auth, &frame.payload) {
                Ok(m) => m,
                Err(_) => return (S::Rakp1Waiting { tag, ctx }, Ok(vec![])),
            };
            if rakp2.message_tag != tag
                || (rakp2.status_code == 0x00
                    && rakp2.remote_console_session_id != ctx.opened.console_session_id)
            {
                return (S::Rakp1Waiting { tag, ctx }, Ok(vec![]));
            }

            if rakp2.status_code != 0x00 {
                return (
                    fresh_authcap(ctx.opened.discovery, rng),
                    Err(Error::AuthenticationFailed("RAKP message 2 status != 0")),
                );
            }

            let expected = match rakp2_key_exchange_auth_code(
                auth,
                config.password.expose(),
                ctx.opened.console_session_id,
                ctx.opened.managed_session_id,
                &ctx.console_random,
                &rakp2.bmc_random,
                &rakp2.bmc_guid,
                config.privilege_level,
                &config.username,
            ) {
                Ok(code) => code,
                Err(e) => return (fresh_authcap(ctx.opened.discovery, rng), Err(e)),
            };

            if auth != AuthenticationAlgorithm::None
                && !ct_eq(&expected, &rakp2.key_exchange_auth_code)
            {
                return (
                    fresh_authcap(ctx.opened.discovery, rng),
                    Err(Error::AuthenticationFailed(
                        "RAKP message 2 authentication code mismatch",
                    )),
                );
            }

            // SIK: keyed by Kg (or the password for one-key logins) over
            // both randoms, the role, and the username.
            let sik = match compute_sik(
                auth,
                config.kg().expose(),
                &ctx.console_random,
                &rakp2.bmc_random,
                config.privilege_level,
                &config.username,
            ) {
                Ok(sik) => SecretBytes::new(sik),
                Err(e) => return (fresh_authcap(ctx.opened.discovery, rng), Err(e)),
            };

            (
                S::Rakp1Complete {
                    ctx: RakpContext {
                        discovery: ctx.opened.discovery,
                        console_session_id: ctx.opened.console_session_id,
                        managed_session_id: ctx.opened.managed_session_id,
                        console_random: ctx.console_random,
                        bmc_random: rakp2.bmc_random,
                        bmc_guid: rakp2.bmc_guid,
                        sik,
                    },
                },
                Ok(vec![]),
            )
        }

        // --- RAKP 3/4 ----------------------------------------------------
        (S::Rakp1Complete { ctx }, Event::Rakp3) => {
            let tag = rand_tag(rng);
            let auth = config.cipher_suite.authentication();

            let code = match rakp3_key_exchange_auth_code(
                auth,
                config.password.expose(),
                &ctx.bmc_random,
                ctx.console_session_id,
                config.privilege_level,
                &config.username,
            ) {
                Ok(code) => code,
                Err(e) => return (S::Rakp1Complete { ctx }, Err(e)),
            };

            let payload = build_rakp_message_3_payload(tag, ctx.managed_session_id, &code);
            match codec::encode_v2_frame(payload_type::RAKP_3, 0, 0, &payload, None, rng) {
                Ok(bytes) => (
                    S::Rakp3Waiting { tag, ctx },
                    Ok(vec![Effect::Send(bytes)]),
                ),
                Err(e) => (S::Rakp1Complete { ctx }, Err(e)),
            }
        }

        (S::Rakp3Waiting { ctx, .. }, Event::Timeout) => {
            (fresh_authcap(ctx.discovery, rng), Ok(vec![]))
        }

        (S::Rakp3Waiting { tag, ctx }, Event::Frame(frame)) => {
            if frame.payload_type() != Some(payload_type::RAKP_4) {
                return (S::Rakp3Waiting { tag, ctx }, Ok(vec![]));
            }
            let auth = config.cipher_suite.authentication();
            let rakp4 = match parse_rakp_message_4_payload(auth, &frame.payload) {
                Ok(m) => m,
                Err(_) => return (S::Rakp3Waiting { tag, ctx }, Ok(vec![])),
            };
            if rakp4.message_tag != tag
                || (rakp4.status_code == 0x00
                    && rakp4.remote_console_session_id != ctx.console_session_id)
            {
                return (S::Rakp3Waiting { tag, ctx }, Ok(vec![]));
            }

            if rakp4.status_code != 0x00 {
                return (
                    fresh_authcap(ctx.discovery, rng),
                    Err(Error::AuthenticationFailed("RAKP message 4 status != 0")),
                );
            }

            let expected = match rakp4_integrity_check_value(
                auth,
                ctx.sik.expose(),
                &ctx.console_random,
                ctx.managed_session_id,
                &ctx.bmc_guid,
            ) {
                Ok(icv) => icv,
                Err(e) => return (fresh_authcap(ctx.discovery, rng), Err(e)),
            };

            if auth != AuthenticationAlgorithm::None
                && !ct_eq(&expected, &rakp4.integrity_check_value)
            {
                return (
                    fresh_authcap(ctx.discovery, rng),
                    Err(Error::AuthenticationFailed(
                        "RAKP message 4 integrity check value mismatch",
                    )),
                );
            }

            (S::Rakp3Complete { ctx }, Ok(vec![]))
        }

        // --- Session start / close --------------------------------------
        (S::Rakp3Complete { ctx }, Event::StartSession) => {
            let keys = match config.cipher_suite.bind(&ctx.sik) {
                Ok(keys) => keys,
                Err(e) => return (S::Rakp3Complete { ctx }, Err(e)),
            };

            let session = Session::new(
                ctx.managed_session_id,
                ctx.console_session_id,
                SecurityContext {
                    suite: config.cipher_suite,
                    keys,
                },
            );

            (
                S::SessionValid {
                    discovery: ctx.discovery,
                },
                Ok(vec![Effect::Established(session)]),
            )
        }

        (S::SessionValid { discovery }, Event::CloseSession) => {
            // Discovery results survive: a new session can be opened without
            // re-running cipher-suite/auth-capability discovery.
            (fresh_authcap(discovery, rng), Ok(vec![]))
        }

        // --- Everything else ---------------------------------------------
        (state, event) => {
            let outcome = match event {
                // Stray frames and spurious timer fires are dropped.
                Event::Frame(_) | Event::Timeout => Ok(vec![]),
                _ => Err(Error::IllegalTransition {
                    state: state.name(),
                }),
            };
            (state, outcome)
        }
    }
}
