use lanplus::commands::{
    ChassisControlCommand, CloseSession, Command, GetChannelAuthCapabilities,
    GetChannelCipherSuites, GetChassisStatus, GetDeviceId, GetFruInventoryAreaInfo,
    GetSdr, GetSelfTestResults, GetSensorReading, GetSystemGuid, ReadFruData,
    ReserveSdrRepository,
};
use lanplus::{
    AuthenticationAlgorithm, ChassisControl, CipherSuite, ConfidentialityAlgorithm, Error,
    IntegrityAlgorithm, PrivilegeLevel, RawResponse, SelfTestResult,
};

fn ok(data: &[u8]) -> RawResponse {
    RawResponse {
        completion_code: 0x00,
        data: data.to_vec(),
    }
}

#[test]
fn get_device_id_parses_response() {
    let response = ok(&[
        0x20, 0x01, 0x02, 0x43, 0x02, 0x00, 0xA2, 0x02, 0x00, 0x00, 0x01, 0x00, 0x06, 0x2B, 0x2B,
    ]);

    let parsed = GetDeviceId.parse_response(response).expect("parse");
    assert_eq!(parsed.device_id, 0x20);
    assert_eq!(parsed.device_revision, 0x01);
    assert_eq!(parsed.firmware_major, 0x02);
    assert_eq!(parsed.firmware_minor, 0x43);
    assert_eq!(parsed.ipmi_version, 0x02);
    assert_eq!(parsed.manufacturer_id, 0x0000_02A2);
    assert_eq!(parsed.product_id, 0x0100);
    assert_eq!(parsed.aux_firmware_revision, [0x00, 0x06, 0x2B, 0x2B]);
}

#[test]
fn completion_code_is_reported() {
    let response = RawResponse {
        completion_code: 0xC1,
        data: vec![0xAA, 0xBB],
    };

    let err = GetSelfTestResults
        .parse_response(response)
        .expect_err("expected error");
    assert!(matches!(
        err,
        Error::CompletionCode {
            completion_code: 0xC1
        }
    ));
}

#[test]
fn get_system_guid_parses_response() {
    let mut data = vec![0u8; 16];
    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }

    let guid = GetSystemGuid.parse_response(ok(&data)).expect("parse");
    assert_eq!(
        guid.bytes,
        [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
    );
}

#[test]
fn get_chassis_status_parses_response() {
    let status = GetChassisStatus
        .parse_response(ok(&[0x5F, 0x19, 0x0F, 0xFF]))
        .expect("parse");
    assert!(status.system_power_on);
    assert!(status.power_overload);
    assert!(status.last_power_event.ac_failed);
    assert!(status.front_panel_controls.is_some());
}

#[test]
fn chassis_control_encodes_request_data() {
    let cmd = ChassisControlCommand {
        control: ChassisControl::PowerUp,
    };
    assert_eq!(cmd.request_data(), vec![0x01]);
}

#[test]
fn get_channel_auth_capabilities_encodes_request_data() {
    let cmd = GetChannelAuthCapabilities::new(0x02, PrivilegeLevel::Administrator);
    assert_eq!(cmd.request_data(), vec![0x82, 0x04]);

    let cmd = cmd.without_v2_data();
    assert_eq!(cmd.request_data(), vec![0x02, 0x04]);
}

#[test]
fn get_self_test_results_parses_passed_variant() {
    let parsed = GetSelfTestResults
        .parse_response(ok(&[0x55, 0x00]))
        .expect("parse");
    assert!(matches!(parsed, SelfTestResult::Passed));
}

#[test]
fn get_channel_cipher_suites_encodes_list_index() {
    let cmd = GetChannelCipherSuites::new(0x0E, 0);
    assert_eq!(cmd.request_data(), vec![0x0E, 0x00, 0x80]);

    let cmd = GetChannelCipherSuites::new(0x0E, 3);
    assert_eq!(cmd.request_data(), vec![0x0E, 0x00, 0x83]);
}

#[test]
fn cipher_suite_fragments_report_continuation() {
    let cmd = GetChannelCipherSuites::new(0x0E, 0);

    let full = ok(&[
        0x01, 0xC0, 0x03, 0x01, 0x41, 0x81, 0xC0, 0x11, 0x03, 0x44, 0x81, 0xC0, 0x02, 0x01, 0x41,
        0x80, 0xC0,
    ]);
    let fragment = cmd.parse_response(full).expect("parse");
    assert_eq!(fragment.record_bytes.len(), 16);
    assert!(fragment.has_more());

    // Fewer than 16 record bytes means the stream is done; none at all is a
    // valid empty list.
    let last = cmd.parse_response(ok(&[0x01, 0xC0, 0x00])).expect("parse");
    assert!(!last.has_more());
    let empty = cmd.parse_response(ok(&[0x01])).expect("parse");
    assert!(empty.record_bytes.is_empty());
}

#[test]
fn close_session_encodes_session_id() {
    let cmd = CloseSession {
        session_id: 0xAABBCCDD,
    };
    assert_eq!(cmd.request_data(), vec![0xDD, 0xCC, 0xBB, 0xAA]);
}

#[test]
fn reserve_sdr_repository_parses_reservation_id() {
    let id = ReserveSdrRepository
        .parse_response(ok(&[0x34, 0x12]))
        .expect("parse");
    assert_eq!(id, 0x1234);
}

#[test]
fn get_sdr_round_trip_fields() {
    let cmd = GetSdr {
        reservation_id: 0x1234,
        record_id: 0x0005,
        offset: 16,
        length: 32,
    };
    assert_eq!(cmd.request_data(), vec![0x34, 0x12, 0x05, 0x00, 16, 32]);

    let chunk = cmd
        .parse_response(ok(&[0x0A, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]))
        .expect("parse");
    assert_eq!(chunk.next_record_id, 0x000A);
    assert_eq!(chunk.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn fru_commands_round_trip_fields() {
    let info = GetFruInventoryAreaInfo { fru_device_id: 2 }
        .parse_response(ok(&[0x28, 0x00, 0x00]))
        .expect("parse");
    assert_eq!(info.area_size, 40);
    assert!(!info.by_words);

    let cmd = ReadFruData {
        fru_device_id: 2,
        offset: 0x0120,
        count: 16,
    };
    assert_eq!(cmd.request_data(), vec![0x02, 0x20, 0x01, 16]);

    let data = cmd
        .parse_response(ok(&[0x03, 0x41, 0x42, 0x43]))
        .expect("parse");
    assert_eq!(data, b"ABC");
}

#[test]
fn read_fru_data_rejects_count_mismatch() {
    let cmd = ReadFruData {
        fru_device_id: 0,
        offset: 0,
        count: 8,
    };
    let err = cmd
        .parse_response(ok(&[0x05, 0x41, 0x42]))
        .expect_err("expected error");
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn get_sensor_reading_parses_flags() {
    let reading = GetSensorReading { sensor_number: 9 }
        .parse_response(ok(&[0x7F, 0xC0, 0x02, 0x00]))
        .expect("parse");
    assert_eq!(reading.raw, 0x7F);
    assert!(!reading.reading_unavailable);
    assert!(!reading.scanning_disabled);
    assert_eq!(reading.state, 0x0002);
}

#[test]
fn cipher_suite_components_resolve_by_id() {
    let suite = CipherSuite::from_id(17).expect("suite");
    assert_eq!(suite.authentication(), AuthenticationAlgorithm::HmacSha256);
    assert_eq!(suite.integrity(), IntegrityAlgorithm::HmacSha256_128);
    assert_eq!(suite.confidentiality(), ConfidentialityAlgorithm::AesCbc128);

    // xRC4 rows are not implemented and must fail as a configuration error.
    assert!(matches!(CipherSuite::from_id(4), Err(Error::Unsupported(_))));
}
