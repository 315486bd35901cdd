//! Blocking RMCP+ client.
//!
//! One logical thread of control serializes every external event: the
//! connection state (session, sequencing queues) lives behind a single
//! mutex, a background receiver thread feeds decoded datagrams in under that
//! lock, and callers wait on a condition variable with an explicit deadline.
//! "Decode + match tag + mutate state" is therefore atomic with respect to
//! concurrent sends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::algo::CipherSuite;
use crate::client::core::{self, Inbound};
use crate::codec;
use crate::commands::{
    ChassisControlCommand, CloseSession, Command, GetChannelAuthCapabilities, GetChassisStatus,
    GetDeviceId, GetSelfTestResults, GetSensorReading, GetSystemGuid,
};
use crate::crypto::SecretBytes;
use crate::dispatch::{Expect, PollOutcome, QueueSet, ResponseListener};
use crate::error::{Error, Result};
use crate::handshake::{self, Effect, Event, HandshakeConfig, HandshakeState, Phase};
use crate::protocol::decode_ipmi_lan_response;
use crate::retrieval::{self, CommandRunner, SdrRecord};
use crate::session::Session;
use crate::transport::Transport;
use crate::transport::blocking::UdpTransport;
use crate::types::{
    ChannelAuthCapabilities, ChassisControl, ChassisStatus, DeviceId, PrivilegeLevel, RawResponse,
    SelfTestResult, SensorReading, SystemGuid, completion,
};

/// How long the receiver blocks per read before checking for shutdown.
const RECEIVER_TICK: Duration = Duration::from_millis(250);

/// Channel number meaning "the channel this request arrived on".
const DEFAULT_CHANNEL: u8 = 0x0E;

/// A blocking IPMI v2.0 RMCP+ client.
///
/// `Client` establishes an RMCP+ session over UDP port 623 and issues IPMI
/// commands through it. Clones share one session and one connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    managed_session_id: u32,
    remote_session_id: u32,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    target: SocketAddr,
    channel: u8,
    username: Option<Vec<u8>>,
    password: Option<SecretBytes>,
    bmc_key: Option<SecretBytes>,
    privilege_level: PrivilegeLevel,
    cipher_suite_id: u8,
    skip_authentication: bool,
    timeout: Duration,
    retries: u32,
    keepalive_period: Duration,
    listeners: Vec<Arc<dyn ResponseListener>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field(
                "managed_session_id",
                &format_args!("{:#010x}", self.managed_session_id),
            )
            .field(
                "remote_session_id",
                &format_args!("{:#010x}", self.remote_session_id),
            )
            .finish()
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("target", &self.target)
            .field("channel", &self.channel)
            .field("privilege_level", &self.privilege_level)
            .field("cipher_suite_id", &self.cipher_suite_id)
            .field("skip_authentication", &self.skip_authentication)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("keepalive_period", &self.keepalive_period)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a new builder.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            channel: DEFAULT_CHANNEL,
            username: None,
            password: None,
            bmc_key: None,
            privilege_level: PrivilegeLevel::Administrator,
            cipher_suite_id: 3,
            skip_authentication: false,
            timeout: Duration::from_secs(1),
            retries: 3,
            keepalive_period: Duration::ZERO,
            listeners: Vec::new(),
        }
    }

    /// Set the username (bytes).
    ///
    /// IPMI usernames are ASCII in most deployments, but the protocol treats them as raw bytes.
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the username (UTF-8 string). This is a convenience wrapper around [`Self::username_bytes`].
    pub fn username(mut self, username: impl AsRef<str>) -> Self {
        self.username = Some(username.as_ref().as_bytes().to_vec());
        self
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(SecretBytes::new(password.into()));
        self
    }

    /// Set the password (UTF-8 string). This is a convenience wrapper around [`Self::password_bytes`].
    pub fn password(mut self, password: impl AsRef<str>) -> Self {
        self.password = Some(SecretBytes::new(password.as_ref().as_bytes().to_vec()));
        self
    }

    /// Set the optional BMC key (`Kg`) for "two-key" logins.
    ///
    /// If not set, the password key is used ("one-key" login), which is common in many BMC default configs.
    pub fn bmc_key_bytes(mut self, kg: impl Into<Vec<u8>>) -> Self {
        self.bmc_key = Some(SecretBytes::new(kg.into()));
        self
    }

    /// Set the optional BMC key (`Kg`) for "two-key" logins (UTF-8 string).
    pub fn bmc_key(mut self, kg: impl AsRef<str>) -> Self {
        self.bmc_key = Some(SecretBytes::new(kg.as_ref().as_bytes().to_vec()));
        self
    }

    /// Set requested session privilege level.
    pub fn privilege_level(mut self, level: PrivilegeLevel) -> Self {
        self.privilege_level = level;
        self
    }

    /// Select the cipher suite to negotiate (default: suite 3,
    /// RAKP-HMAC-SHA1 / HMAC-SHA1-96 / AES-CBC-128).
    pub fn cipher_suite_id(mut self, id: u8) -> Self {
        self.cipher_suite_id = id;
        self
    }

    /// Negotiate cipher suite 0 (no authentication, integrity, or
    /// confidentiality) for trusted/pre-shared environments. Credentials
    /// become optional.
    pub fn skip_authentication(mut self) -> Self {
        self.skip_authentication = true;
        self
    }

    /// Set the channel number used for discovery (default: this channel).
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set number of send attempts per request (including the first attempt).
    pub fn retries(mut self, attempts: u32) -> Self {
        self.retries = attempts;
        self
    }

    /// Send a session-upkeep request every `period`. Zero disables
    /// keep-alive (the default).
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.keepalive_period = period;
        self
    }

    /// Register a listener notified of every completed tag.
    pub fn response_listener(mut self, listener: Arc<dyn ResponseListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Establish the session and build the [`Client`].
    pub fn build(self) -> Result<Client> {
        let suite_id = if self.skip_authentication {
            0
        } else {
            self.cipher_suite_id
        };
        let cipher_suite = CipherSuite::from_id(suite_id)?;

        let (username, password) = if self.skip_authentication {
            (
                self.username.unwrap_or_default(),
                self.password.unwrap_or_else(SecretBytes::empty),
            )
        } else {
            (
                self.username.ok_or(Error::Protocol("username is required"))?,
                self.password.ok_or(Error::Protocol("password is required"))?,
            )
        };

        if username.len() > 16 {
            // Many BMCs limit username length to 16; the protocol allows larger, but interoperability suffers.
            return Err(Error::InvalidArgument(
                "username longer than 16 bytes is not widely supported",
            ));
        }

        let config = HandshakeConfig {
            channel: self.channel,
            username,
            password,
            bmc_key: self.bmc_key,
            privilege_level: self.privilege_level,
            cipher_suite,
        };

        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::connect(self.target)?);

        let session = establish(transport.as_ref(), &config, self.timeout, self.retries)?;
        let managed_session_id = session.managed_system_session_id;
        let remote_session_id = session.remote_console_session_id;

        // Keep-alive is an ordinary no-op command through the same queue.
        let upkeep = GetChannelAuthCapabilities::new(self.channel, self.privilege_level);

        let shared = Arc::new(Shared {
            transport,
            conn: Mutex::new(Connection {
                session,
                queues: QueueSet::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            listeners: self.listeners,
            timeout: self.timeout,
            attempts: self.retries.max(1),
            upkeep_netfn: GetChannelAuthCapabilities::NETFN,
            upkeep_cmd: GetChannelAuthCapabilities::CMD,
            upkeep_data: upkeep.request_data(),
        });

        let weak = Arc::downgrade(&shared);
        let _ = thread::Builder::new()
            .name("lanplus-recv".into())
            .spawn(move || receiver_loop(weak))?;

        if !self.keepalive_period.is_zero() {
            let weak = Arc::downgrade(&shared);
            let period = self.keepalive_period;
            let _ = thread::Builder::new()
                .name("lanplus-upkeep".into())
                .spawn(move || keepalive_loop(weak, period))?;
        }

        Ok(Client {
            shared,
            managed_session_id,
            remote_session_id,
        })
    }
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder(target: SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    /// Execute a typed command (single request/response).
    pub fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let request_data = command.request_data();
        let response = self.send_raw(C::NETFN, C::CMD, &request_data)?;
        command.parse_response(response)
    }

    /// Send a raw IPMI request and return the raw response.
    ///
    /// This method uses LUN=0 and addresses commonly used for LAN sessions
    /// (`rsAddr=0x20`, `rqAddr=0x81`).
    pub fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        let start = Instant::now();
        let result = self.shared.send_command(netfn, cmd, data);
        let elapsed = start.elapsed();
        match &result {
            Ok(resp) => {
                crate::observe::record_ok("blocking", netfn, cmd, elapsed, resp.completion_code)
            }
            Err(err) => crate::observe::record_err("blocking", netfn, cmd, elapsed, err),
        }
        result
    }

    /// Convenience wrapper for `Get Device ID` (App NetFn, cmd 0x01).
    pub fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId)
    }

    /// Convenience wrapper for `Get Self Test Results` (App NetFn, cmd 0x04).
    pub fn get_self_test_results(&self) -> Result<SelfTestResult> {
        self.execute(GetSelfTestResults)
    }

    /// Convenience wrapper for `Get System GUID` (App NetFn, cmd 0x37).
    pub fn get_system_guid(&self) -> Result<SystemGuid> {
        self.execute(GetSystemGuid)
    }

    /// Convenience wrapper for `Get Chassis Status` (Chassis NetFn, cmd 0x01).
    pub fn get_chassis_status(&self) -> Result<ChassisStatus> {
        self.execute(GetChassisStatus)
    }

    /// Run `Chassis Control` (Chassis NetFn, cmd 0x02).
    pub fn chassis_control(&self, control: ChassisControl) -> Result<()> {
        self.execute(ChassisControlCommand { control })
    }

    /// Convenience wrapper for `Get Sensor Reading` (S/E NetFn, cmd 0x2D).
    pub fn get_sensor_reading(&self, sensor_number: u8) -> Result<SensorReading> {
        self.execute(GetSensorReading { sensor_number })
    }

    /// Convenience wrapper for `Get Channel Authentication Capabilities`
    /// (App NetFn, cmd 0x38).
    pub fn get_channel_auth_capabilities(
        &self,
        channel: u8,
        privilege: PrivilegeLevel,
    ) -> Result<ChannelAuthCapabilities> {
        let cmd = GetChannelAuthCapabilities::new(channel, privilege);
        match self.execute(cmd) {
            Ok(caps) => Ok(caps),
            Err(Error::CompletionCode { .. }) => self.execute(cmd.without_v2_data()),
            Err(e) => Err(e),
        }
    }

    /// Enumerate every record in the SDR repository.
    pub fn scan_sdr_repository(&self) -> Result<Vec<SdrRecord>> {
        retrieval::scan_sdr_repository(self)
    }

    /// Read a FRU inventory area into one buffer.
    pub fn read_fru_inventory(&self, fru_device_id: u8) -> Result<Vec<u8>> {
        retrieval::read_fru_inventory(self, fru_device_id)
    }

    /// Return the managed system (BMC) session ID (SIDC).
    pub fn managed_session_id(&self) -> u32 {
        self.managed_session_id
    }

    /// Return the remote console session ID (SIDM).
    pub fn remote_session_id(&self) -> u32 {
        self.remote_session_id
    }

    /// Close the active RMCP+ session (App NetFn, cmd 0x3C).
    ///
    /// This is a best-effort operation. If the BMC does not respond (timeout) the client still
    /// transitions to a locally closed state and will reject further requests.
    pub fn close_session(&self) -> Result<()> {
        let session_id = {
            let conn = self.shared.lock_conn()?;
            if conn.closed {
                return Ok(());
            }
            conn.session.managed_system_session_id
        };

        let result = self.execute(CloseSession { session_id });
        self.shared.mark_closed();

        match result {
            Ok(()) => Ok(()),
            // Invalid session ID means the BMC already dropped the session.
            Err(Error::CompletionCode {
                completion_code: completion::INVALID_SESSION_ID,
            }) => Ok(()),
            Err(Error::Timeout) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// A service-style grouping for App netfn commands.
    pub fn app(&self) -> AppService {
        AppService {
            client: self.clone(),
        }
    }

    /// A service-style grouping for Chassis netfn commands.
    pub fn chassis(&self) -> ChassisService {
        ChassisService {
            client: self.clone(),
        }
    }

    /// A service-style grouping for SDR/FRU repository access.
    pub fn storage(&self) -> StorageService {
        StorageService {
            client: self.clone(),
        }
    }
}

impl CommandRunner for Client {
    fn run<C: Command>(&self, command: C) -> Result<C::Output> {
        self.execute(command)
    }
}

struct Connection {
    session: Session,
    queues: QueueSet,
    closed: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    conn: Mutex<Connection>,
    cond: Condvar,
    shutdown: AtomicBool,
    listeners: Vec<Arc<dyn ResponseListener>>,
    timeout: Duration,
    attempts: u32,
    upkeep_netfn: u8,
    upkeep_cmd: u8,
    upkeep_data: Vec<u8>,
}

impl Shared {
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Protocol("client lock poisoned"))
    }

    fn mark_closed(&self) {
        if let Ok(mut conn) = self.conn.lock() {
            conn.closed = true;
        }
        self.shutdown.store(true, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Send one command and wait for its response.
    ///
    /// Each attempt registers a pending tag, transmits, and parks on the
    /// condition variable until the receiver completes the tag or the
    /// deadline passes. A timed-out attempt retries under a fresh tag and a
    /// fresh session sequence number.
    fn send_command(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        let expect = Expect::Lan { netfn, cmd };
        let mut rng = rand::rng();
        let mut previous_tag: Option<u8> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let (tag, packet) = {
                let mut conn = self.lock_conn()?;
                if conn.closed {
                    return Err(Error::Protocol("session is closed"));
                }

                let now = Instant::now();
                let tag = match previous_tag {
                    None => conn.queues.ipmi_mut().submit(expect, now)?,
                    Some(old) => conn.queues.ipmi_mut().retry(old, expect, now)?,
                };

                match core::encode_session_request(
                    &mut conn.session,
                    tag,
                    netfn,
                    cmd,
                    data,
                    &mut rng,
                ) {
                    Ok(packet) => (tag, packet),
                    Err(e) => {
                        conn.queues.ipmi_mut().release(tag);
                        return Err(e);
                    }
                }
            };

            self.transport.send(&packet)?;

            let deadline = Instant::now() + self.timeout;
            let mut conn = self.lock_conn()?;
            loop {
                match conn.queues.ipmi_mut().poll(tag, Instant::now(), self.timeout) {
                    PollOutcome::Ready(outcome) => return outcome,
                    PollOutcome::TimedOut => break,
                    PollOutcome::Pending => {
                        let wait = deadline.saturating_duration_since(Instant::now());
                        if wait.is_zero() {
                            continue;
                        }
                        let (guard, _) = self
                            .cond
                            .wait_timeout(conn, wait)
                            .map_err(|_| Error::Protocol("client lock poisoned"))?;
                        conn = guard;
                    }
                }
            }

            if attempt >= self.attempts {
                conn.queues.ipmi_mut().release(tag);
                return Err(Error::Timeout);
            }
            drop(conn);
            previous_tag = Some(tag);
        }
    }

    /// Route one received datagram into the sequencing queues.
    fn handle_datagram(&self, bytes: &[u8]) {
        let Ok(mut conn) = self.conn.lock() else {
            return;
        };

        let frame = match codec::decode_frame(bytes, Some(&conn.session.security)) {
            Ok(frame) => frame,
            Err(_err) => {
                // Malformed frames must not kill the receiver loop.
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "dropping undecodable frame");
                return;
            }
        };

        match core::classify_inbound(&conn.session, frame) {
            Inbound::Ipmi { rq_seq, lan_message } => {
                crate::debug::dump_hex("ipmi response payload", &lan_message);

                let Some(Expect::Lan { netfn, cmd }) = conn.queues.ipmi_mut().expect(rq_seq)
                else {
                    // No pending request under this tag: orphan, dropped.
                    #[cfg(feature = "tracing")]
                    tracing::trace!(rq_seq, "dropping orphan response");
                    return;
                };

                let outcome = decode_ipmi_lan_response(netfn, cmd, rq_seq, &lan_message);
                for listener in &self.listeners {
                    listener.on_response(rq_seq, &outcome);
                }
                conn.queues.ipmi_mut().complete(rq_seq, outcome);
                self.cond.notify_all();
            }
            Inbound::Stream { ack_seq, accepted } => {
                // The streaming tag space numbers entries by packet sequence.
                let _ = conn
                    .queues
                    .sol_mut()
                    .acknowledge_stream(ack_seq, ack_seq, accepted);
                self.cond.notify_all();
            }
            Inbound::Orphan => {
                #[cfg(feature = "tracing")]
                tracing::trace!("dropping orphan frame");
            }
        }
    }

    /// Reclaim tags whose callers stopped polling long ago.
    fn reclaim_abandoned(&self) {
        let ttl = self
            .timeout
            .saturating_mul(self.attempts.saturating_mul(4).max(8));
        if let Ok(mut conn) = self.conn.lock() {
            let now = Instant::now();
            conn.queues.ipmi_mut().reclaim(now, ttl);
            conn.queues.sol_mut().reclaim(now, ttl);
        }
    }
}

fn receiver_loop(weak: Weak<Shared>) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        match shared.transport.recv(RECEIVER_TICK) {
            Ok(Some(bytes)) => shared.handle_datagram(&bytes),
            Ok(None) => shared.reclaim_abandoned(),
            Err(_) => {
                // Socket errors surface on the send path; don't spin.
                thread::sleep(RECEIVER_TICK);
            }
        }
    }
}

fn keepalive_loop(weak: Weak<Shared>, period: Duration) {
    let tick = RECEIVER_TICK.min(period).max(Duration::from_millis(10));
    let mut elapsed = Duration::ZERO;

    loop {
        thread::sleep(tick);

        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        elapsed += tick;
        if elapsed < period {
            continue;
        }
        elapsed = Duration::ZERO;

        // Session upkeep is best effort; failures surface via logs/metrics.
        let start = Instant::now();
        let result = shared.send_command(shared.upkeep_netfn, shared.upkeep_cmd, &shared.upkeep_data);
        let elapsed_req = start.elapsed();
        match &result {
            Ok(resp) => crate::observe::record_ok(
                "upkeep",
                shared.upkeep_netfn,
                shared.upkeep_cmd,
                elapsed_req,
                resp.completion_code,
            ),
            Err(err) => crate::observe::record_err(
                "upkeep",
                shared.upkeep_netfn,
                shared.upkeep_cmd,
                elapsed_req,
                err,
            ),
        }
    }
}

/// Drive the handshake state machine to `SessionValid`.
///
/// The driver issues the caller-side transition for the current phase,
/// performs the machine's effects, and pumps inbound frames while the
/// machine waits. Timeouts feed `Event::Timeout` (regressing the machine to
/// its documented earlier state) and spend one attempt from the retry
/// budget; protocol and authentication errors abort immediately.
fn establish(
    transport: &dyn Transport,
    config: &HandshakeConfig,
    timeout: Duration,
    retries: u32,
) -> Result<Session> {
    let mut rng = rand::rng();
    let mut state = HandshakeState::Uninitialized;
    let mut session = None;
    let mut timeouts_left = retries.max(1);

    loop {
        let event = match state.phase() {
            Phase::Uninitialized => Event::GetChannelCipherSuites,
            Phase::Ciphers => Event::GetChannelAuthCapabilities,
            Phase::Authcap => Event::OpenSession,
            Phase::OpenSessionComplete => Event::Rakp1,
            Phase::Rakp1Complete => Event::Rakp3,
            Phase::Rakp3Complete => Event::StartSession,
            Phase::SessionValid => {
                return session.ok_or(Error::Protocol("handshake finished without a session"));
            }
            _ => return Err(Error::Protocol("handshake driver out of sync")),
        };
        state = apply(transport, config, &mut rng, state, event, &mut session)?;

        let entered = state.phase();
        if !is_waiting(entered) {
            continue;
        }

        // Pump frames until the machine leaves the waiting state.
        let deadline = Instant::now() + timeout;
        while state.phase() == entered {
            let now = Instant::now();
            if now >= deadline {
                state = apply(transport, config, &mut rng, state, Event::Timeout, &mut session)?;
                timeouts_left = timeouts_left.saturating_sub(1);
                if timeouts_left == 0 {
                    return Err(Error::Timeout);
                }
                break;
            }

            match transport.recv(deadline - now)? {
                Some(bytes) => {
                    // Handshake frames are sessionless; anything undecodable
                    // is unrelated traffic.
                    let Ok(frame) = codec::decode_frame(&bytes, None) else {
                        continue;
                    };
                    crate::debug::dump_hex("handshake frame", &bytes);
                    state = apply(
                        transport,
                        config,
                        &mut rng,
                        state,
                        Event::Frame(frame),
                        &mut session,
                    )?;
                }
                None => {}
            }
        }
    }
}

fn is_waiting(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::CiphersWaiting
            | Phase::AuthcapWaiting
            | Phase::OpenSessionWaiting
            | Phase::Rakp1Waiting
            | Phase::Rakp3Waiting
    )
}

fn apply(
    transport: &dyn Transport,
    config: &HandshakeConfig,
    rng: &mut dyn rand::RngCore,
    state: HandshakeState,
    event: Event,
    session_out: &mut Option<Session>,
) -> Result<HandshakeState> {
    let (state, outcome) = handshake::step(config, rng, state, event);
    let effects = outcome?;
    for effect in effects {
        match effect {
            Effect::Send(bytes) => transport.send(&bytes)?,
            Effect::Established(session) => *session_out = Some(session),
        }
    }
    Ok(state)
}

/// App NetFn service.
#[derive(Clone)]
pub struct AppService {
    client: Client,
}

impl AppService {
    /// `Get Device ID` (App NetFn, cmd 0x01).
    pub fn get_device_id(&self) -> Result<DeviceId> {
        self.client.get_device_id()
    }

    /// `Get Self Test Results` (App NetFn, cmd 0x04).
    pub fn get_self_test_results(&self) -> Result<SelfTestResult> {
        self.client.get_self_test_results()
    }

    /// `Get System GUID` (App NetFn, cmd 0x37).
    pub fn get_system_guid(&self) -> Result<SystemGuid> {
        self.client.get_system_guid()
    }

    /// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
    pub fn get_channel_auth_capabilities(
        &self,
        channel: u8,
        privilege: PrivilegeLevel,
    ) -> Result<ChannelAuthCapabilities> {
        self.client
            .get_channel_auth_capabilities(channel, privilege)
    }
}

/// Chassis NetFn service.
#[derive(Clone)]
pub struct ChassisService {
    client: Client,
}

impl ChassisService {
    /// `Get Chassis Status` (Chassis NetFn, cmd 0x01).
    pub fn get_chassis_status(&self) -> Result<ChassisStatus> {
        self.client.get_chassis_status()
    }

    /// `Chassis Control` (Chassis NetFn, cmd 0x02).
    pub fn chassis_control(&self, control: ChassisControl) -> Result<()> {
        self.client.chassis_control(control)
    }
}

/// SDR/FRU repository service.
#[derive(Clone)]
pub struct StorageService {
    client: Client,
}

impl StorageService {
    /// Enumerate every record in the SDR repository.
    pub fn scan_sdr_repository(&self) -> Result<Vec<SdrRecord>> {
        self.client.scan_sdr_repository()
    }

    /// Read a FRU inventory area into one buffer.
    pub fn read_fru_inventory(&self, fru_device_id: u8) -> Result<Vec<u8>> {
        self.client.read_fru_inventory(fru_device_id)
    }

    /// `Get Sensor Reading` for one sensor number.
    pub fn get_sensor_reading(&self, sensor_number: u8) -> Result<SensorReading> {
        self.client.get_sensor_reading(sensor_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::net::UdpSocket;
    use std::sync::Mutex as StdMutex;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::codec::payload_type;

    fn checksum(bytes: &[u8]) -> u8 {
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        (!sum).wrapping_add(1)
    }

    /// Build a LAN response message with valid checksums.
    fn lan_response(netfn: u8, cmd: u8, rq_seq: u8, completion: u8, data: &[u8]) -> Vec<u8> {
        let mut msg = vec![0x81, (netfn + 1) << 2];
        msg.push(checksum(&msg));
        let tail_start = msg.len();
        msg.push(0x20);
        msg.push(rq_seq << 2);
        msg.push(cmd);
        msg.push(completion);
        msg.extend_from_slice(data);
        let csum2 = checksum(&msg[tail_start..]);
        msg.push(csum2);
        msg
    }

    fn test_shared(
        transport: Arc<dyn Transport>,
        timeout: Duration,
        attempts: u32,
        listeners: Vec<Arc<dyn ResponseListener>>,
    ) -> Arc<Shared> {
        Arc::new(Shared {
            transport,
            conn: Mutex::new(Connection {
                session: Session::new_test(0x11223344, 0x55667788),
                queues: QueueSet::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            listeners,
            timeout,
            attempts,
            upkeep_netfn: 0x06,
            upkeep_cmd: 0x38,
            upkeep_data: Vec::new(),
        })
    }

    fn test_client(shared: Arc<Shared>) -> Client {
        Client {
            shared,
            managed_session_id: 0x11223344,
            remote_session_id: 0x55667788,
        }
    }

    /// A transport that records sends and never delivers anything.
    struct SilentTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl SilentTransport {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Transport for SilentTransport {
        fn send(&self, datagram: &[u8]) -> Result<()> {
            self.sent.lock().expect("lock").push(datagram.to_vec());
            Ok(())
        }

        fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(None)
        }
    }

    /// A transport whose inbox answers each send with a canned LAN response,
    /// optionally swallowing the first `drop_first` requests.
    struct EchoTransport {
        inbox: StdMutex<VecDeque<Vec<u8>>>,
        sent: StdMutex<Vec<Vec<u8>>>,
        drop_first: StdMutex<u32>,
    }

    impl EchoTransport {
        fn new(drop_first: u32) -> Self {
            Self {
                inbox: StdMutex::new(VecDeque::new()),
                sent: StdMutex::new(Vec::new()),
                drop_first: StdMutex::new(drop_first),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().expect("lock").len()
        }
    }

    impl Transport for EchoTransport {
        fn send(&self, datagram: &[u8]) -> Result<()> {
            self.sent.lock().expect("lock").push(datagram.to_vec());

            {
                let mut drops = self.drop_first.lock().expect("lock");
                if *drops > 0 {
                    *drops -= 1;
                    return Ok(());
                }
            }

            // Plaintext v2.0 frame: 16-byte header, then the LAN request.
            let lan = &datagram[16..];
            let netfn = lan[1] >> 2;
            let rq_seq = lan[4] >> 2;
            let cmd = lan[5];

            let resp_lan = lan_response(netfn, cmd, rq_seq, 0x00, &[0xAB, rq_seq]);
            let mut rng = StdRng::seed_from_u64(9);
            let frame = codec::encode_v2_frame(
                payload_type::IPMI,
                0x11223344,
                1,
                &resp_lan,
                None,
                &mut rng,
            )
            .expect("encode");
            self.inbox.lock().expect("lock").push_back(frame);
            Ok(())
        }

        fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
            if let Some(frame) = self.inbox.lock().expect("lock").pop_front() {
                return Ok(Some(frame));
            }
            thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(None)
        }
    }

    struct RecordingListener {
        seen: StdMutex<Vec<(u8, bool)>>,
    }

    impl ResponseListener for RecordingListener {
        fn on_response(&self, tag: u8, result: &Result<RawResponse>) {
            self.seen.lock().expect("lock").push((tag, result.is_ok()));
        }
    }

    #[test]
    fn close_session_timeout_marks_client_closed() {
        let shared = test_shared(
            Arc::new(SilentTransport::new()),
            Duration::from_millis(20),
            1,
            Vec::new(),
        );
        let client = test_client(shared);

        client.close_session().expect("close_session");

        let err = client
            .get_device_id()
            .expect_err("expected session-closed error");
        assert!(matches!(err, Error::Protocol("session is closed")));
    }

    #[test]
    fn responses_wake_the_waiting_caller_and_notify_listeners() {
        let transport = Arc::new(EchoTransport::new(0));
        let listener = Arc::new(RecordingListener {
            seen: StdMutex::new(Vec::new()),
        });
        let shared = test_shared(
            transport.clone(),
            Duration::from_millis(500),
            1,
            vec![listener.clone()],
        );

        let receiver = {
            let weak = Arc::downgrade(&shared);
            thread::spawn(move || receiver_loop(weak))
        };

        let client = test_client(shared.clone());
        let resp = client.send_raw(0x06, 0x01, &[]).expect("response");
        assert_eq!(resp.completion_code, 0x00);
        assert_eq!(resp.data[0], 0xAB);

        let seen = listener.seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1);

        shared.shutdown.store(true, Ordering::Relaxed);
        drop(client);
        drop(shared);
        receiver.join().expect("receiver thread");
    }

    #[test]
    fn timed_out_requests_retry_under_a_fresh_tag() {
        // The first datagram is swallowed; the retry gets a response.
        let transport = Arc::new(EchoTransport::new(1));
        let shared = test_shared(transport.clone(), Duration::from_millis(50), 3, Vec::new());

        let receiver = {
            let weak = Arc::downgrade(&shared);
            thread::spawn(move || receiver_loop(weak))
        };

        let client = test_client(shared.clone());
        let resp = client.send_raw(0x06, 0x01, &[]).expect("response");
        assert_eq!(resp.completion_code, 0x00);
        assert_eq!(transport.sent_count(), 2);

        // The retry travelled under a different tag and a later session
        // sequence number.
        let sent = transport.sent.lock().expect("lock").clone();
        let rq_seq_of = |packet: &[u8]| packet[16 + 4] >> 2;
        let session_seq_of =
            |packet: &[u8]| u32::from_le_bytes(packet[10..14].try_into().expect("seq"));
        assert_ne!(rq_seq_of(&sent[0]), rq_seq_of(&sent[1]));
        assert!(session_seq_of(&sent[1]) > session_seq_of(&sent[0]));

        shared.shutdown.store(true, Ordering::Relaxed);
        drop(client);
        drop(shared);
        receiver.join().expect("receiver thread");
    }

    #[test]
    fn orphan_datagrams_leave_pending_requests_untouched() {
        let shared = test_shared(
            Arc::new(SilentTransport::new()),
            Duration::from_secs(1),
            1,
            Vec::new(),
        );

        // A response for a tag nobody is waiting on.
        let resp_lan = lan_response(0x06, 0x01, 9, 0x00, &[0x01]);
        let mut rng = StdRng::seed_from_u64(3);
        let frame =
            codec::encode_v2_frame(payload_type::IPMI, 0x11223344, 1, &resp_lan, None, &mut rng)
                .expect("encode");

        shared.handle_datagram(&frame);

        let mut conn = shared.lock_conn().expect("lock");
        assert!(matches!(
            conn.queues.ipmi_mut().poll(9, Instant::now(), Duration::from_secs(1)),
            PollOutcome::TimedOut
        ));
    }

    // --- End-to-end over localhost UDP -----------------------------------

    /// A minimal scripted BMC speaking just enough RMCP+ for cipher suite 0.
    fn mock_bmc(socket: UdpSocket) {
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");

        let mut buf = [0u8; 4096];
        let mut console_sid = 0u32;
        let managed_sid = 0xBEEF_0001u32;
        let mut rng = StdRng::seed_from_u64(42);

        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf) else {
                return;
            };
            let datagram = &buf[..n];
            if datagram.len() < 6 {
                continue;
            }

            let reply = match datagram[4] {
                // v1.5 sessionless discovery traffic.
                0x00 => {
                    let lan = &datagram[14..];
                    let rq_seq = lan[4] >> 2;
                    let cmd = lan[5];
                    let data: &[u8] = match cmd {
                        // One cipher-suite record: suite 0, all-none.
                        0x54 => &[0x0E, 0xC0, 0x00, 0x00, 0x40, 0x80],
                        // Channel auth capabilities.
                        0x38 => &[0x0E, 0x80, 0x04, 0x03, 0x00, 0x00, 0x00, 0x00],
                        _ => &[],
                    };
                    let resp = lan_response(0x06, cmd, rq_seq, 0x00, data);
                    codec::encode_v15_frame(0, 0, &resp).expect("encode")
                }
                // RMCP+ traffic.
                0x06 => {
                    let ptype = datagram[5] & 0x3F;
                    let payload_len =
                        u16::from_le_bytes(datagram[14..16].try_into().expect("len")) as usize;
                    let payload = &datagram[16..16 + payload_len];

                    match ptype {
                        payload_type::OPEN_SESSION_REQUEST => {
                            console_sid =
                                u32::from_le_bytes(payload[4..8].try_into().expect("sid"));
                            let mut resp = vec![payload[0], 0x00, 0x04, 0x00];
                            resp.extend_from_slice(&console_sid.to_le_bytes());
                            resp.extend_from_slice(&managed_sid.to_le_bytes());
                            for kind in [0x00u8, 0x01, 0x02] {
                                resp.extend_from_slice(&[
                                    kind, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00,
                                ]);
                            }
                            codec::encode_v2_frame(
                                payload_type::OPEN_SESSION_RESPONSE,
                                0,
                                0,
                                &resp,
                                None,
                                &mut rng,
                            )
                            .expect("encode")
                        }
                        payload_type::RAKP_1 => {
                            let mut resp = vec![payload[0], 0x00, 0x00, 0x00];
                            resp.extend_from_slice(&console_sid.to_le_bytes());
                            resp.extend_from_slice(&[0x5A; 16]); // BMC random
                            resp.extend_from_slice(&[0xA5; 16]); // BMC GUID
                            codec::encode_v2_frame(
                                payload_type::RAKP_2,
                                0,
                                0,
                                &resp,
                                None,
                                &mut rng,
                            )
                            .expect("encode")
                        }
                        payload_type::RAKP_3 => {
                            let mut resp = vec![payload[0], 0x00, 0x00, 0x00];
                            resp.extend_from_slice(&console_sid.to_le_bytes());
                            codec::encode_v2_frame(
                                payload_type::RAKP_4,
                                0,
                                0,
                                &resp,
                                None,
                                &mut rng,
                            )
                            .expect("encode")
                        }
                        payload_type::IPMI => {
                            let netfn = payload[1] >> 2;
                            let rq_seq = payload[4] >> 2;
                            let cmd = payload[5];
                            let data: &[u8] = match cmd {
                                0x01 => &[
                                    0x20, 0x01, 0x02, 0x43, 0x02, 0x00, 0xA2, 0x02, 0x00, 0x00,
                                    0x01, 0x00, 0x06, 0x2B, 0x2B,
                                ],
                                0x38 => &[0x0E, 0x80, 0x04, 0x03, 0x00, 0x00, 0x00, 0x00],
                                _ => &[],
                            };
                            let resp = lan_response(netfn, cmd, rq_seq, 0x00, data);
                            let frame = codec::encode_v2_frame(
                                payload_type::IPMI,
                                managed_sid,
                                1,
                                &resp,
                                None,
                                &mut rng,
                            )
                            .expect("encode");
                            if cmd == 0x3C {
                                let _ = socket.send_to(&frame, peer);
                                return;
                            }
                            frame
                        }
                        _ => continue,
                    }
                }
                _ => continue,
            };

            let _ = socket.send_to(&reply, peer);
        }
    }

    #[test]
    fn establishes_a_session_and_queries_over_udp() {
        let bmc_socket = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let target = bmc_socket.local_addr().expect("addr");
        let bmc = thread::spawn(move || mock_bmc(bmc_socket));

        let client = Client::builder(target)
            .skip_authentication()
            .timeout(Duration::from_millis(500))
            .retries(2)
            .build()
            .expect("session");

        assert_eq!(client.managed_session_id(), 0xBEEF_0001);

        let device = client.get_device_id().expect("device id");
        assert_eq!(device.device_id, 0x20);
        assert_eq!(device.manufacturer_id, 0x0000_02A2);

        client.close_session().expect("close");
        bmc.join().expect("bmc thread");
    }
}

