//! Typed IPMI commands.
//!
//! Every command implements [`Command`]: it encodes its own request body,
//! reports its NetFn/command code, and decodes its response body. The
//! session core treats commands as opaque coders; anything the BMC speaks
//! can be added here without touching the codec or dispatch layers.

use crate::error::{Error, Result};
use crate::types::{
    ChannelAuthCapabilities, ChassisControl, ChassisStatus, DeviceId, FruInventoryInfo,
    FrontPanelControls, LastPowerEvent, PowerRestorePolicy, PrivilegeLevel, RawResponse, SdrChunk,
    SelfTestDeviceError, SelfTestResult, SensorReading, SystemGuid, completion,
};

/// App NetFn.
pub(crate) const NETFN_APP: u8 = 0x06;
/// Chassis NetFn.
pub(crate) const NETFN_CHASSIS: u8 = 0x00;
/// Sensor/Event NetFn.
pub(crate) const NETFN_SENSOR: u8 = 0x04;
/// Storage NetFn.
pub(crate) const NETFN_STORAGE: u8 = 0x0A;

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: RawResponse) -> Result<Self::Output>;
}

fn ok_data(response: &RawResponse) -> Result<&[u8]> {
    if response.completion_code != completion::OK {
        return Err(Error::CompletionCode {
            completion_code: response.completion_code,
        });
    }
    Ok(&response.data)
}

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_device_id(ok_data(&response)?)
    }
}

/// `Get Self Test Results` (App NetFn, cmd 0x04).
#[derive(Debug, Clone, Copy)]
pub struct GetSelfTestResults;

impl Command for GetSelfTestResults {
    type Output = SelfTestResult;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x04;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_self_test_result(ok_data(&response)?)
    }
}

/// `Get System GUID` (App NetFn, cmd 0x37).
#[derive(Debug, Clone, Copy)]
pub struct GetSystemGuid;

impl Command for GetSystemGuid {
    type Output = SystemGuid;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x37;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_system_guid(ok_data(&response)?)
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetChannelAuthCapabilities {
    /// Channel number (low nibble).
    pub channel: u8,
    /// Privilege to query.
    pub privilege: PrivilegeLevel,
    /// Request that IPMI v2.0 data be included when available.
    pub request_v2_data: bool,
}

impl GetChannelAuthCapabilities {
    /// Create a query that requests IPMI v2.0 data (when supported).
    pub fn new(channel: u8, privilege: PrivilegeLevel) -> Self {
        Self {
            channel,
            privilege,
            request_v2_data: true,
        }
    }

    /// Return a variant that does not request IPMI v2.0 data.
    pub fn without_v2_data(self) -> Self {
        Self {
            request_v2_data: false,
            ..self
        }
    }
}

impl Command for GetChannelAuthCapabilities {
    type Output = ChannelAuthCapabilities;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        let channel = if self.request_v2_data {
            self.channel | 0x80
        } else {
            self.channel & 0x7F
        };
        vec![channel, self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_channel_auth_capabilities(ok_data(&response)?)
    }
}

/// One ≤16-byte fragment of the cipher suite record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuitesFragment {
    /// Channel number the records describe.
    pub channel_number: u8,
    /// Raw record bytes of this fragment; empty when the channel has none.
    pub record_bytes: Vec<u8>,
}

impl CipherSuitesFragment {
    /// A full 16-byte fragment signals that another one follows.
    pub fn has_more(&self) -> bool {
        self.record_bytes.len() == 16
    }
}

/// `Get Channel Cipher Suites` (App NetFn, cmd 0x54).
///
/// The record stream arrives in ≤16-byte fragments addressed by `list_index`.
#[derive(Debug, Clone, Copy)]
pub struct GetChannelCipherSuites {
    /// Channel number (low nibble); 0x0E addresses the current channel.
    pub channel: u8,
    /// Which 16-byte fragment of the record stream to fetch.
    pub list_index: u8,
}

impl GetChannelCipherSuites {
    /// Query one fragment of the cipher suite records for `channel`.
    pub fn new(channel: u8, list_index: u8) -> Self {
        Self {
            channel,
            list_index,
        }
    }
}

impl Command for GetChannelCipherSuites {
    type Output = CipherSuitesFragment;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x54;

    fn request_data(&self) -> Vec<u8> {
        // Byte 2 is the payload type (IPMI), byte 3 the list index with the
        // "list algorithms by cipher suite" bit set.
        vec![
            self.channel & 0x0F,
            0x00,
            0x80 | (self.list_index & 0x3F),
        ]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.is_empty() {
            return Err(Error::Protocol("cipher suites response too short"));
        }
        Ok(CipherSuitesFragment {
            channel_number: data[0] & 0x0F,
            record_bytes: data[1..].to_vec(),
        })
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Session id to close (SIDC).
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

/// `Get Chassis Status` (Chassis NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetChassisStatus;

impl Command for GetChassisStatus {
    type Output = ChassisStatus;
    const NETFN: u8 = NETFN_CHASSIS;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_chassis_status(ok_data(&response)?)
    }
}

/// `Chassis Control` (Chassis NetFn, cmd 0x02).
#[derive(Debug, Clone, Copy)]
pub struct ChassisControlCommand {
    /// Control operation.
    pub control: ChassisControl,
}

impl Command for ChassisControlCommand {
    type Output = ();
    const NETFN: u8 = NETFN_CHASSIS;
    const CMD: u8 = 0x02;

    fn request_data(&self) -> Vec<u8> {
        vec![self.control.as_u8()]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

/// `Get Sensor Reading` (Sensor/Event NetFn, cmd 0x2D).
#[derive(Debug, Clone, Copy)]
pub struct GetSensorReading {
    /// Sensor number from the sensor's SDR.
    pub sensor_number: u8,
}

impl Command for GetSensorReading {
    type Output = SensorReading;
    const NETFN: u8 = NETFN_SENSOR;
    const CMD: u8 = 0x2D;

    fn request_data(&self) -> Vec<u8> {
        vec![self.sensor_number]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_sensor_reading(ok_data(&response)?)
    }
}

/// `Reserve SDR Repository` (Storage NetFn, cmd 0x22).
#[derive(Debug, Clone, Copy)]
pub struct ReserveSdrRepository;

impl Command for ReserveSdrRepository {
    type Output = u16;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x22;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 2 {
            return Err(Error::Protocol("Reserve SDR Repository response too short"));
        }
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

/// `Get SDR` (Storage NetFn, cmd 0x23).
#[derive(Debug, Clone, Copy)]
pub struct GetSdr {
    /// Reservation id; required for partial (offset) reads.
    pub reservation_id: u16,
    /// Record id to read.
    pub record_id: u16,
    /// Byte offset into the record.
    pub offset: u8,
    /// Bytes to read; 0xFF requests the entire record.
    pub length: u8,
}

impl Command for GetSdr {
    type Output = SdrChunk;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x23;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&self.reservation_id.to_le_bytes());
        data.extend_from_slice(&self.record_id.to_le_bytes());
        data.push(self.offset);
        data.push(self.length);
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 2 {
            return Err(Error::Protocol("Get SDR response too short"));
        }
        Ok(SdrChunk {
            next_record_id: u16::from_le_bytes([data[0], data[1]]),
            data: data[2..].to_vec(),
        })
    }
}

/// `Get FRU Inventory Area Info` (Storage NetFn, cmd 0x10).
#[derive(Debug, Clone, Copy)]
pub struct GetFruInventoryAreaInfo {
    /// FRU device id (0 is the BMC's own FRU).
    pub fru_device_id: u8,
}

impl Command for GetFruInventoryAreaInfo {
    type Output = FruInventoryInfo;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x10;

    fn request_data(&self) -> Vec<u8> {
        vec![self.fru_device_id]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 3 {
            return Err(Error::Protocol(
                "Get FRU Inventory Area Info response too short",
            ));
        }
        Ok(FruInventoryInfo {
            area_size: u16::from_le_bytes([data[0], data[1]]),
            by_words: data[2] & 0x01 != 0,
        })
    }
}

/// `Read FRU Data` (Storage NetFn, cmd 0x11).
#[derive(Debug, Clone, Copy)]
pub struct ReadFruData {
    /// FRU device id.
    pub fru_device_id: u8,
    /// Byte offset into the inventory area.
    pub offset: u16,
    /// Bytes to read.
    pub count: u8,
}

impl Command for ReadFruData {
    type Output = Vec<u8>;
    const NETFN: u8 = NETFN_STORAGE;
    const CMD: u8 = 0x11;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4);
        data.push(self.fru_device_id);
        data.extend_from_slice(&self.offset.to_le_bytes());
        data.push(self.count);
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        let (&count, rest) = data
            .split_first()
            .ok_or(Error::Protocol("Read FRU Data response too short"))?;
        if rest.len() < count as usize {
            return Err(Error::Protocol("Read FRU Data count mismatch"));
        }
        Ok(rest[..count as usize].to_vec())
    }
}

pub(crate) fn parse_device_id(data: &[u8]) -> Result<DeviceId> {
    // IPMI "Get Device ID" response (after completion code) is commonly 15 bytes.
    if data.len() < 15 {
        return Err(Error::Protocol("Get Device ID response too short"));
    }

    let device_id = data[0];
    let device_revision = data[1] & 0x0F;
    let fw_rev1 = data[2];
    let fw_rev2 = data[3];
    let ipmi_version = data[4];

    let manufacturer_id =
        u32::from(data[6]) | (u32::from(data[7]) << 8) | (u32::from(data[8]) << 16);
    let product_id = u16::from(data[9]) | (u16::from(data[10]) << 8);

    let aux_fw = [data[11], data[12], data[13], data[14]];

    Ok(DeviceId {
        device_id,
        device_revision,
        firmware_major: fw_rev1,
        firmware_minor: fw_rev2,
        ipmi_version,
        manufacturer_id,
        product_id,
        aux_firmware_revision: aux_fw,
    })
}

pub(crate) fn parse_self_test_result(data: &[u8]) -> Result<SelfTestResult> {
    if data.len() < 2 {
        return Err(Error::Protocol("Get Self Test Results response too short"));
    }

    let code = data[0];
    let detail = data[1];

    let result = match code {
        0x55 => SelfTestResult::Passed,
        0x56 => SelfTestResult::NotImplemented,
        0x57 => SelfTestResult::DeviceError(SelfTestDeviceError::from_bits(detail)),
        0x58 => SelfTestResult::FatalError(detail),
        _ => SelfTestResult::DeviceSpecific { code, detail },
    };

    Ok(result)
}

pub(crate) fn parse_system_guid(data: &[u8]) -> Result<SystemGuid> {
    if data.len() < 16 {
        return Err(Error::Protocol("Get System GUID response too short"));
    }

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[..16]);
    Ok(SystemGuid { bytes })
}

pub(crate) fn parse_chassis_status(data: &[u8]) -> Result<ChassisStatus> {
    if data.len() < 3 {
        return Err(Error::Protocol("Get Chassis Status response too short"));
    }

    let b1 = data[0];
    let b2 = data[1];
    let b3 = data[2];

    let power_restore_policy = match (b1 >> 5) & 0x03 {
        0x00 => PowerRestorePolicy::AlwaysOff,
        0x01 => PowerRestorePolicy::Previous,
        0x02 => PowerRestorePolicy::AlwaysOn,
        other => PowerRestorePolicy::Unknown(other),
    };

    let last_power_event = LastPowerEvent {
        ac_failed: b2 & 0x01 != 0,
        power_overload: b2 & 0x02 != 0,
        power_interlock: b2 & 0x04 != 0,
        power_fault: b2 & 0x08 != 0,
        power_on_command: b2 & 0x10 != 0,
    };

    // Byte 4 is optional; absent or zero means no front panel data.
    let front_panel_controls = if data.len() > 3 {
        let b4 = data[3];
        if b4 == 0 {
            None
        } else {
            Some(FrontPanelControls {
                sleep_button_disable_allowed: b4 & 0x80 != 0,
                diag_button_disable_allowed: b4 & 0x40 != 0,
                reset_button_disable_allowed: b4 & 0x20 != 0,
                power_button_disable_allowed: b4 & 0x10 != 0,
                sleep_button_disabled: b4 & 0x08 != 0,
                diag_button_disabled: b4 & 0x04 != 0,
                reset_button_disabled: b4 & 0x02 != 0,
                power_button_disabled: b4 & 0x01 != 0,
            })
        }
    } else {
        None
    };

    Ok(ChassisStatus {
        system_power_on: b1 & 0x01 != 0,
        power_overload: b1 & 0x02 != 0,
        power_interlock: b1 & 0x04 != 0,
        main_power_fault: b1 & 0x08 != 0,
        power_control_fault: b1 & 0x10 != 0,
        power_restore_policy,
        last_power_event,
        chassis_intrusion: b3 & 0x01 != 0,
        front_panel_lockout: b3 & 0x02 != 0,
        drive_fault: b3 & 0x04 != 0,
        cooling_fan_fault: b3 & 0x08 != 0,
        front_panel_controls,
    })
}

pub(crate) fn parse_channel_auth_capabilities(data: &[u8]) -> Result<ChannelAuthCapabilities> {
    if data.len() < 4 {
        return Err(Error::Protocol(
            "Get Channel Authentication Capabilities response too short",
        ));
    }

    let channel_number = data[0] & 0x0F;
    let enabled_auth_types = data[1] & 0x3F;
    let v20_data_available = data[1] & 0x80 != 0;

    let per_message_auth_disabled = data[2] & 0x10 != 0;
    let user_level_auth_disabled = data[2] & 0x08 != 0;
    let non_null_usernames = data[2] & 0x04 != 0;
    let null_usernames = data[2] & 0x02 != 0;
    let anonymous_login_enabled = data[2] & 0x01 != 0;
    let kg_nonzero = data[2] & 0x20 != 0;

    let supports_ipmi_v1_5 = data[3] & 0x01 != 0;
    let supports_ipmi_v2_0 = data[3] & 0x02 != 0;

    Ok(ChannelAuthCapabilities {
        channel_number,
        v20_data_available,
        enabled_auth_types,
        per_message_auth_disabled,
        user_level_auth_disabled,
        non_null_usernames,
        null_usernames,
        anonymous_login_enabled,
        kg_nonzero,
        supports_ipmi_v1_5,
        supports_ipmi_v2_0,
    })
}

fn parse_sensor_reading(data: &[u8]) -> Result<SensorReading> {
    if data.len() < 2 {
        return Err(Error::Protocol("Get Sensor Reading response too short"));
    }

    let raw = data[0];
    let flags = data[1];

    // Bytes 3 and 4 carry the discrete/threshold state; byte 4 is optional.
    let state_low = data.get(2).copied().unwrap_or(0);
    let state_high = data.get(3).copied().unwrap_or(0);

    Ok(SensorReading {
        raw,
        reading_unavailable: flags & 0x20 != 0,
        scanning_disabled: flags & 0x40 == 0,
        event_messages_disabled: flags & 0x80 == 0,
        state: u16::from(state_low) | (u16::from(state_high) << 8),
    })
}
