//! Reservation-based chunked retrieval of SDR and FRU repositories.
//!
//! Repository records can outgrow a single response, and the BMC may cancel
//! a read reservation mid-scan. This module layers the recovery rules over
//! the command channel: single-shot reads fall back to header-then-chunks
//! when the BMC cannot return the full record, and a canceled reservation is
//! re-acquired and the *same* record retried exactly once per record id. A
//! second consecutive cancellation on one id means the BMC is misbehaving
//! and the scan fails instead of looping.

use crate::commands::{
    Command, GetFruInventoryAreaInfo, GetSdr, ReadFruData, ReserveSdrRepository,
};
use crate::error::{Error, Result};
use crate::types::completion;

/// First record id of an SDR repository scan.
const SDR_FIRST_RECORD_ID: u16 = 0x0000;

/// Terminal "next record id" sentinel: all bits set.
const SDR_END_OF_RECORDS: u16 = 0xFFFF;

/// The SDR header is 5 bytes; its last byte holds the remaining length.
const SDR_HEADER_LEN: u8 = 5;

/// `Get SDR` length value requesting the entire record.
const READ_ENTIRE_RECORD: u8 = 0xFF;

/// Chunk size for partial record and FRU reads.
const CHUNK_SIZE: u8 = 16;

/// Executes typed commands over an established session.
pub(crate) trait CommandRunner {
    /// Send `command` and decode its response.
    fn run<C: Command>(&self, command: C) -> Result<C::Output>;
}

/// One record read out of the SDR repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdrRecord {
    /// The record's id as reported in its header.
    pub record_id: u16,
    /// Raw record bytes, header included.
    pub data: Vec<u8>,
}

/// State of one repository scan.
#[derive(Debug)]
struct ReservationContext {
    reservation_id: u16,
    next_record_id: u16,
    /// Record id whose read last failed with a canceled reservation. The
    /// retry-once rule is per record id: a cancellation on a different id
    /// resets this tracker.
    last_canceled_record_id: Option<u16>,
}

/// Enumerate every record in the SDR repository.
pub(crate) fn scan_sdr_repository<R: CommandRunner>(runner: &R) -> Result<Vec<SdrRecord>> {
    let mut ctx = ReservationContext {
        reservation_id: runner.run(ReserveSdrRepository)?,
        next_record_id: SDR_FIRST_RECORD_ID,
        last_canceled_record_id: None,
    };
    let mut records = Vec::new();

    while ctx.next_record_id != SDR_END_OF_RECORDS {
        let record_id = ctx.next_record_id;
        match read_record(runner, ctx.reservation_id, record_id) {
            Ok((following_id, data)) => {
                // Record 0x0000 aliases "first record"; the header carries
                // the real id.
                let reported_id = match data.get(..2) {
                    Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
                    _ => record_id,
                };
                records.push(SdrRecord {
                    record_id: reported_id,
                    data,
                });
                ctx.next_record_id = following_id;
            }
            Err(Error::CompletionCode {
                completion_code: completion::RESERVATION_CANCELED,
            }) => {
                if ctx.last_canceled_record_id == Some(record_id) {
                    return Err(Error::protocol_owned(format!(
                        "reservation canceled twice in a row reading SDR record {record_id:#06x}"
                    )));
                }
                ctx.last_canceled_record_id = Some(record_id);
                ctx.reservation_id = runner.run(ReserveSdrRepository)?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}

/// Read one record, falling back to header-then-chunks when the BMC cannot
/// return it whole.
fn read_record<R: CommandRunner>(
    runner: &R,
    reservation_id: u16,
    record_id: u16,
) -> Result<(u16, Vec<u8>)> {
    match runner.run(GetSdr {
        reservation_id,
        record_id,
        offset: 0,
        length: READ_ENTIRE_RECORD,
    }) {
        Ok(chunk) => Ok((chunk.next_record_id, chunk.data)),
        Err(Error::CompletionCode {
            completion_code: completion::CANNOT_RESPOND | completion::UNSPECIFIED,
        }) => read_record_chunked(runner, reservation_id, record_id),
        Err(e) => Err(e),
    }
}

fn read_record_chunked<R: CommandRunner>(
    runner: &R,
    reservation_id: u16,
    record_id: u16,
) -> Result<(u16, Vec<u8>)> {
    // The header's trailing byte is the record length past the header.
    let header = runner.run(GetSdr {
        reservation_id,
        record_id,
        offset: 0,
        length: SDR_HEADER_LEN,
    })?;
    if header.data.len() < usize::from(SDR_HEADER_LEN) {
        return Err(Error::Protocol("SDR record header too short"));
    }

    let next_record_id = header.next_record_id;
    let total_len = usize::from(SDR_HEADER_LEN) + usize::from(header.data[4]);

    let mut buf = header.data;
    buf.truncate(usize::from(SDR_HEADER_LEN));

    while buf.len() < total_len {
        let offset = u8::try_from(buf.len())
            .map_err(|_| Error::Protocol("SDR record too long for chunked read"))?;
        let remaining = total_len - buf.len();
        let length = remaining.min(usize::from(CHUNK_SIZE)) as u8;

        let chunk = runner.run(GetSdr {
            reservation_id,
            record_id,
            offset,
            length,
        })?;
        if chunk.data.is_empty() {
            return Err(Error::Protocol("empty SDR record chunk"));
        }
        buf.extend_from_slice(&chunk.data);
    }

    buf.truncate(total_len);
    Ok((next_record_id, buf))
}

/// Read a FRU inventory area into one buffer, in fixed-size chunks.
pub(crate) fn read_fru_inventory<R: CommandRunner>(
    runner: &R,
    fru_device_id: u8,
) -> Result<Vec<u8>> {
    let info = runner.run(GetFruInventoryAreaInfo { fru_device_id })?;
    if info.by_words {
        return Err(Error::Unsupported(
            "word-addressed FRU devices are not supported",
        ));
    }

    let size = usize::from(info.area_size);
    let mut buf = Vec::with_capacity(size);

    while buf.len() < size {
        let remaining = size - buf.len();
        let count = remaining.min(usize::from(CHUNK_SIZE)) as u8;

        let data = runner.run(ReadFruData {
            fru_device_id,
            offset: buf.len() as u16,
            count,
        })?;
        if data.is_empty() {
            return Err(Error::Protocol("empty FRU data chunk"));
        }
        buf.extend_from_slice(&data);
    }

    buf.truncate(size);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::VecDeque;

    use crate::types::RawResponse;

    struct Exchange {
        netfn: u8,
        cmd: u8,
        request_data: Vec<u8>,
        response: RawResponse,
    }

    /// A scripted BMC: asserts each command in order and serves the canned
    /// response.
    struct MockRunner {
        script: RefCell<VecDeque<Exchange>>,
    }

    impl MockRunner {
        fn new(script: Vec<Exchange>) -> Self {
            Self {
                script: RefCell::new(script.into()),
            }
        }

        fn assert_drained(&self) {
            assert!(
                self.script.borrow().is_empty(),
                "script has unconsumed exchanges"
            );
        }
    }

    impl CommandRunner for MockRunner {
        fn run<C: Command>(&self, command: C) -> Result<C::Output> {
            let exchange = self
                .script
                .borrow_mut()
                .pop_front()
                .expect("command beyond scripted exchanges");
            assert_eq!(
                (C::NETFN, C::CMD),
                (exchange.netfn, exchange.cmd),
                "unexpected command"
            );
            assert_eq!(
                command.request_data(),
                exchange.request_data,
                "unexpected request data"
            );
            command.parse_response(exchange.response)
        }
    }

    fn ok(data: &[u8]) -> RawResponse {
        RawResponse {
            completion_code: 0x00,
            data: data.to_vec(),
        }
    }

    fn failed(completion_code: u8) -> RawResponse {
        RawResponse {
            completion_code,
            data: Vec::new(),
        }
    }

    fn reserve(reservation_id: u16) -> Exchange {
        Exchange {
            netfn: 0x0A,
            cmd: 0x22,
            request_data: vec![],
            response: ok(&reservation_id.to_le_bytes()),
        }
    }

    fn get_sdr(
        reservation_id: u16,
        record_id: u16,
        offset: u8,
        length: u8,
        response: RawResponse,
    ) -> Exchange {
        let mut request_data = Vec::new();
        request_data.extend_from_slice(&reservation_id.to_le_bytes());
        request_data.extend_from_slice(&record_id.to_le_bytes());
        request_data.push(offset);
        request_data.push(length);
        Exchange {
            netfn: 0x0A,
            cmd: 0x23,
            request_data,
            response,
        }
    }

    /// `Get SDR` response bytes: next record id then record data.
    fn sdr_response(next_record_id: u16, record: &[u8]) -> RawResponse {
        let mut data = next_record_id.to_le_bytes().to_vec();
        data.extend_from_slice(record);
        ok(&data)
    }

    /// A minimal record whose header reports `id` and `extra` trailing bytes.
    fn record_bytes(id: u16, extra: usize) -> Vec<u8> {
        let mut rec = id.to_le_bytes().to_vec();
        rec.push(0x51); // SDR version
        rec.push(0x01); // record type
        rec.push(extra as u8);
        rec.extend((0..extra).map(|i| i as u8));
        rec
    }

    #[test]
    fn scan_walks_records_until_the_sentinel() {
        let rec1 = record_bytes(0x0001, 3);
        let rec2 = record_bytes(0x0005, 2);
        let runner = MockRunner::new(vec![
            reserve(0x1111),
            get_sdr(0x1111, 0x0000, 0, 0xFF, sdr_response(0x0005, &rec1)),
            get_sdr(0x1111, 0x0005, 0, 0xFF, sdr_response(0xFFFF, &rec2)),
        ]);

        let records = scan_sdr_repository(&runner).expect("scan");
        runner.assert_drained();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id, 0x0001);
        assert_eq!(records[0].data, rec1);
        assert_eq!(records[1].record_id, 0x0005);
        assert_eq!(records[1].data, rec2);
    }

    #[test]
    fn canceled_reservation_is_retried_once_for_the_same_record() {
        let rec1 = record_bytes(0x0001, 1);
        let rec2 = record_bytes(0x0005, 1);
        let runner = MockRunner::new(vec![
            reserve(0x1111),
            get_sdr(0x1111, 0x0000, 0, 0xFF, sdr_response(0x0005, &rec1)),
            // Reservation dies on record 5: re-reserve and retry the same id.
            get_sdr(0x1111, 0x0005, 0, 0xFF, failed(0xC5)),
            reserve(0x2222),
            get_sdr(0x2222, 0x0005, 0, 0xFF, sdr_response(0xFFFF, &rec2)),
        ]);

        let records = scan_sdr_repository(&runner).expect("scan");
        runner.assert_drained();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn second_cancellation_on_the_same_record_is_fatal() {
        let rec1 = record_bytes(0x0001, 1);
        let runner = MockRunner::new(vec![
            reserve(0x1111),
            get_sdr(0x1111, 0x0000, 0, 0xFF, sdr_response(0x0005, &rec1)),
            get_sdr(0x1111, 0x0005, 0, 0xFF, failed(0xC5)),
            reserve(0x2222),
            get_sdr(0x2222, 0x0005, 0, 0xFF, failed(0xC5)),
        ]);

        let err = scan_sdr_repository(&runner).unwrap_err();
        runner.assert_drained();
        assert!(matches!(err, Error::ProtocolOwned(_)));
    }

    #[test]
    fn cancellations_on_different_records_each_get_their_retry() {
        let rec1 = record_bytes(0x0001, 1);
        let rec2 = record_bytes(0x0005, 1);
        let runner = MockRunner::new(vec![
            reserve(0x1111),
            // Record 0 cancels once, then succeeds.
            get_sdr(0x1111, 0x0000, 0, 0xFF, failed(0xC5)),
            reserve(0x2222),
            get_sdr(0x2222, 0x0000, 0, 0xFF, sdr_response(0x0005, &rec1)),
            // Record 5 cancels once too: a different id resets the tracker.
            get_sdr(0x2222, 0x0005, 0, 0xFF, failed(0xC5)),
            reserve(0x3333),
            get_sdr(0x3333, 0x0005, 0, 0xFF, sdr_response(0xFFFF, &rec2)),
        ]);

        let records = scan_sdr_repository(&runner).expect("scan");
        runner.assert_drained();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rejected_full_read_falls_back_to_header_and_chunks() {
        // 5-byte header + 20 trailing bytes, read back in 16 + 4.
        let rec = record_bytes(0x0001, 20);
        let header = &rec[..5];
        let runner = MockRunner::new(vec![
            reserve(0x1111),
            get_sdr(0x1111, 0x0000, 0, 0xFF, failed(0xCA)),
            get_sdr(0x1111, 0x0000, 0, 5, sdr_response(0xFFFF, header)),
            get_sdr(0x1111, 0x0000, 5, 16, sdr_response(0xFFFF, &rec[5..21])),
            get_sdr(0x1111, 0x0000, 21, 4, sdr_response(0xFFFF, &rec[21..])),
        ]);

        let records = scan_sdr_repository(&runner).expect("scan");
        runner.assert_drained();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, rec);
    }

    fn fru_info(area_size: u16) -> Exchange {
        Exchange {
            netfn: 0x0A,
            cmd: 0x10,
            request_data: vec![0x00],
            response: ok(&[area_size.to_le_bytes()[0], area_size.to_le_bytes()[1], 0x00]),
        }
    }

    fn fru_read(offset: u16, count: u8, data: &[u8]) -> Exchange {
        let mut request_data = vec![0x00];
        request_data.extend_from_slice(&offset.to_le_bytes());
        request_data.push(count);

        let mut response_data = vec![data.len() as u8];
        response_data.extend_from_slice(data);
        Exchange {
            netfn: 0x0A,
            cmd: 0x11,
            request_data,
            response: ok(&response_data),
        }
    }

    #[test]
    fn fru_inventory_reassembles_from_fixed_size_chunks() {
        let area: Vec<u8> = (0u8..40).collect();
        let runner = MockRunner::new(vec![
            fru_info(40),
            fru_read(0, 16, &area[0..16]),
            fru_read(16, 16, &area[16..32]),
            fru_read(32, 8, &area[32..40]),
        ]);

        let buf = read_fru_inventory(&runner, 0x00).expect("read");
        runner.assert_drained();
        assert_eq!(buf, area);
    }

    #[test]
    fn word_addressed_fru_devices_are_rejected() {
        let runner = MockRunner::new(vec![Exchange {
            netfn: 0x0A,
            cmd: 0x10,
            request_data: vec![0x00],
            response: ok(&[0x28, 0x00, 0x01]),
        }]);

        let err = read_fru_inventory(&runner, 0x00).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
