//! Ogg page framing (RFC 3533) for a single logical stream.
//!
//! ## Page layout
//!
//! ```text
//! Offset  Size  Field
//! 0       4     "OggS"
//! 4       1     version (0)
//! 5       1     header type: 0x01 continued, 0x02 first page, 0x04 last page
//! 6       8     granule position (i64 LE, -1 when no packet ends here)
//! 14      4     stream serial number
//! 18      4     page sequence number
//! 22      4     CRC-32 (poly 0x04c11db7, computed with this field zeroed)
//! 26      1     segment count
//! 27      n     lacing values; a value < 255 ends a packet
//! 27+n    ...   body
//! ```

use std::collections::VecDeque;
use std::io::Write;

use crate::codec::{Packet, PacketParser};
use crate::models::error::MediaError;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_SIZE: usize = 27;
const MAX_SEGMENTS: usize = 255;
/// Body size after which the writer closes a page.
const TARGET_PAGE_BODY: usize = 4096;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_FIRST: u8 = 0x02;
const FLAG_LAST: u8 = 0x04;

const NO_GRANULE: i64 = -1;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 { (r << 1) ^ 0x04c1_1db7 } else { r << 1 };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

fn crc32(chunks: &[&[u8]]) -> u32 {
    let mut crc = 0u32;
    for chunk in chunks {
        for &byte in *chunk {
            crc = (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize];
        }
    }
    crc
}

/// Writes packets as Ogg pages.
///
/// One data packet is held back so the stream's final page can be flagged
/// as last when `finish` is called.
pub struct OggWriter<W: Write> {
    inner: W,
    serial: u32,
    sequence: u32,
    segments: Vec<u8>,
    body: Vec<u8>,
    page_granule: i64,
    continued: bool,
    first: bool,
    held: Option<Packet>,
    bytes_written: u64,
}

impl<W: Write> OggWriter<W> {
    pub fn new(inner: W, serial: u32) -> Self {
        Self {
            inner,
            serial,
            sequence: 0,
            segments: Vec::with_capacity(MAX_SEGMENTS),
            body: Vec::with_capacity(TARGET_PAGE_BODY * 2),
            page_granule: NO_GRANULE,
            continued: false,
            first: true,
            held: None,
            bytes_written: 0,
        }
    }

    /// Write a codec header packet on a page of its own.
    pub fn write_header(&mut self, packet: &Packet) -> Result<(), MediaError> {
        if self.held.is_some() {
            return Err(MediaError::InvalidState("header packets must precede data packets".into()));
        }
        self.append(&packet.data, 0)?;
        self.write_page(false)
    }

    /// Queue a data packet.
    pub fn write_packet(&mut self, packet: Packet) -> Result<(), MediaError> {
        if let Some(previous) = self.held.replace(packet) {
            let granule = granule_field(previous.granule);
            self.append(&previous.data, granule)?;
            if self.body.len() >= TARGET_PAGE_BODY {
                self.write_page(false)?;
            }
        }
        Ok(())
    }

    /// Write the held packet on the stream's last page and flush.
    ///
    /// Returns the wrapped writer and the number of bytes written.
    pub fn finish(mut self) -> Result<(W, u64), MediaError> {
        if let Some(last) = self.held.take() {
            let granule = granule_field(last.granule);
            self.append(&last.data, granule)?;
        }
        self.write_page(true)?;
        self.inner.flush()?;
        Ok((self.inner, self.bytes_written))
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn append(&mut self, data: &[u8], granule: i64) -> Result<(), MediaError> {
        let full = data.len() / 255;
        let mut offset = 0;
        for i in 0..=full {
            if self.segments.len() == MAX_SEGMENTS {
                self.write_page(false)?;
                self.continued = true;
            }
            let len = if i < full { 255 } else { data.len() % 255 };
            self.segments.push(len as u8);
            self.body.extend_from_slice(&data[offset..offset + len]);
            offset += len;
        }
        self.page_granule = granule;
        Ok(())
    }

    fn write_page(&mut self, last: bool) -> Result<(), MediaError> {
        let mut flags = 0;
        if self.continued {
            flags |= FLAG_CONTINUED;
        }
        if self.first {
            flags |= FLAG_FIRST;
        }
        if last {
            flags |= FLAG_LAST;
        }

        let mut header = [0u8; PAGE_HEADER_SIZE];
        header[0..4].copy_from_slice(CAPTURE_PATTERN);
        header[5] = flags;
        header[6..14].copy_from_slice(&self.page_granule.to_le_bytes());
        header[14..18].copy_from_slice(&self.serial.to_le_bytes());
        header[18..22].copy_from_slice(&self.sequence.to_le_bytes());
        header[26] = self.segments.len() as u8;
        let crc = crc32(&[&header[..], &self.segments[..], &self.body[..]]);
        header[22..26].copy_from_slice(&crc.to_le_bytes());

        self.inner.write_all(&header)?;
        self.inner.write_all(&self.segments)?;
        self.inner.write_all(&self.body)?;
        self.bytes_written += (header.len() + self.segments.len() + self.body.len()) as u64;

        self.sequence = self.sequence.wrapping_add(1);
        self.segments.clear();
        self.body.clear();
        self.page_granule = NO_GRANULE;
        self.continued = false;
        self.first = false;
        Ok(())
    }
}

fn granule_field(granule: Option<u64>) -> i64 {
    granule.map(|g| g.min(i64::MAX as u64) as i64).unwrap_or(NO_GRANULE)
}

/// Incremental Ogg demuxer.
///
/// Follows the first logical stream it sees and ignores pages of any
/// other serial. Page CRCs are not verified.
#[derive(Default)]
pub struct OggParser {
    buffer: Vec<u8>,
    partial: Vec<u8>,
    ready: VecDeque<Packet>,
    serial: Option<u32>,
    /// A continued page arrived with nothing to continue; skip to the next
    /// packet boundary.
    skipping: bool,
}

pub fn create_parser() -> Box<dyn PacketParser> {
    Box::new(OggParser::default())
}

impl OggParser {
    fn consume_pages(&mut self) -> Result<(), MediaError> {
        let mut start = 0;
        loop {
            let page = &self.buffer[start..];
            if page.len() < PAGE_HEADER_SIZE {
                break;
            }
            if &page[0..4] != CAPTURE_PATTERN {
                return Err(MediaError::MalformedContainer(format!(
                    "missing Ogg capture pattern at page offset {}",
                    start
                )));
            }
            if page[4] != 0 {
                return Err(MediaError::MalformedContainer(format!(
                    "unsupported Ogg version {}",
                    page[4]
                )));
            }
            let segment_count = page[26] as usize;
            if page.len() < PAGE_HEADER_SIZE + segment_count {
                break;
            }
            let lacing = &page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + segment_count];
            let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
            let page_len = PAGE_HEADER_SIZE + segment_count + body_len;
            if page.len() < page_len {
                break;
            }

            let flags = page[5];
            let mut granule_bytes = [0u8; 8];
            granule_bytes.copy_from_slice(&page[6..14]);
            let granule = i64::from_le_bytes(granule_bytes);
            let serial = u32::from_le_bytes([page[14], page[15], page[16], page[17]]);

            let owner = *self.serial.get_or_insert(serial);
            if owner == serial {
                let lacing = lacing.to_vec();
                let body = page[PAGE_HEADER_SIZE + segment_count..page_len].to_vec();
                self.read_page(flags, granule, &lacing, &body);
            } else {
                log::debug!("skipping Ogg page of foreign stream {:#x}", serial);
            }
            start += page_len;
        }
        self.buffer.drain(..start);
        Ok(())
    }

    fn read_page(&mut self, flags: u8, granule: i64, lacing: &[u8], body: &[u8]) {
        let continued = flags & FLAG_CONTINUED != 0;
        if !continued && !self.partial.is_empty() {
            log::warn!("dropping {} bytes of an unterminated Ogg packet", self.partial.len());
            self.partial.clear();
        }
        if continued && self.partial.is_empty() {
            self.skipping = true;
        }

        let first_new = self.ready.len();
        let mut offset = 0;
        for &len in lacing {
            let len = len as usize;
            if !self.skipping {
                self.partial.extend_from_slice(&body[offset..offset + len]);
            }
            offset += len;
            if len < 255 {
                if self.skipping {
                    self.skipping = false;
                } else {
                    self.ready.push_back(Packet::new(std::mem::take(&mut self.partial)));
                }
            }
        }

        // Only the last packet completed on a page carries its granule.
        if self.ready.len() > first_new {
            if let Some(last) = self.ready.back_mut() {
                if granule >= 0 {
                    last.granule = Some(granule as u64);
                }
                last.end_of_stream = flags & FLAG_LAST != 0;
            }
        }
    }
}

impl PacketParser for OggParser {
    fn parse(&mut self, data: &[u8]) -> Result<(usize, Option<Packet>), MediaError> {
        if let Some(packet) = self.ready.pop_front() {
            return Ok((0, Some(packet)));
        }

        self.buffer.extend_from_slice(data);
        self.consume_pages()?;

        if data.is_empty() && self.ready.is_empty() && !self.buffer.is_empty() {
            log::warn!("discarding {} bytes of a truncated Ogg page", self.buffer.len());
            self.buffer.clear();
        }
        Ok((data.len(), self.ready.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(data: Vec<u8>, granule: u64) -> Packet {
        Packet {
            data,
            granule: Some(granule),
            end_of_stream: false,
        }
    }

    fn parse_all(parser: &mut OggParser, bytes: &[u8], chunk: usize) -> Vec<Packet> {
        let mut packets = Vec::new();
        for piece in bytes.chunks(chunk) {
            let mut offset = 0;
            while offset < piece.len() {
                let (used, packet) = parser.parse(&piece[offset..]).unwrap();
                offset += used;
                packets.extend(packet);
            }
        }
        loop {
            match parser.parse(&[]).unwrap() {
                (_, Some(packet)) => packets.push(packet),
                (_, None) => break,
            }
        }
        packets
    }

    #[test]
    fn crc_matches_reference_vector() {
        // CRC-32/POSIX check value without its final xor.
        assert_eq!(crc32(&[&b"123456789"[..]]), 0x89a1_897f);
    }

    #[test]
    fn pages_round_trip_through_parser() {
        let mut writer = OggWriter::new(Vec::new(), 0x1234);
        writer.write_header(&Packet::new(b"head".to_vec())).unwrap();
        writer.write_header(&Packet::new(b"tags".to_vec())).unwrap();
        writer.write_packet(packet(vec![1; 10], 960)).unwrap();
        writer.write_packet(packet(vec![2; 600], 1920)).unwrap();
        writer.write_packet(packet(vec![3; 255], 2500)).unwrap();
        let (bytes, written) = writer.finish().unwrap();
        assert_eq!(written as usize, bytes.len());

        // First page is flagged as the stream start.
        assert_eq!(&bytes[0..4], b"OggS");
        assert_eq!(bytes[5], FLAG_FIRST);

        let packets = parse_all(&mut OggParser::default(), &bytes, 7);
        assert_eq!(packets.len(), 5);
        assert_eq!(packets[0].data, b"head");
        assert_eq!(packets[0].granule, Some(0));
        assert_eq!(packets[1].data, b"tags");
        assert_eq!(packets[2].data, vec![1; 10]);
        assert_eq!(packets[2].granule, None);
        assert_eq!(packets[3].data, vec![2; 600]);
        assert_eq!(packets[4].data, vec![3; 255]);
        assert_eq!(packets[4].granule, Some(2500));
        assert!(packets[4].end_of_stream);
        assert!(!packets[3].end_of_stream);
    }

    #[test]
    fn large_packet_spans_pages() {
        let big: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = OggWriter::new(Vec::new(), 7);
        writer.write_packet(packet(big.clone(), 48000)).unwrap();
        let (bytes, _) = writer.finish().unwrap();

        let packets = parse_all(&mut OggParser::default(), &bytes, 4096);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, big);
        assert_eq!(packets[0].granule, Some(48000));
        assert!(packets[0].end_of_stream);
    }

    #[test]
    fn queued_packets_are_returned_without_consuming() {
        let mut writer = OggWriter::new(Vec::new(), 1);
        writer.write_packet(packet(vec![1], 1)).unwrap();
        writer.write_packet(packet(vec![2], 2)).unwrap();
        let (bytes, _) = writer.finish().unwrap();

        let mut parser = OggParser::default();
        let (used, first) = parser.parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(first.unwrap().data, vec![1]);
        let (used, second) = parser.parse(&[9, 9]).unwrap();
        assert_eq!(used, 0);
        assert_eq!(second.unwrap().data, vec![2]);
    }

    #[test]
    fn garbage_is_malformed() {
        let mut parser = OggParser::default();
        let result = parser.parse(&[0u8; 64]);
        assert!(matches!(result, Err(MediaError::MalformedContainer(_))));
    }

    #[test]
    fn empty_stream_is_a_single_last_page() {
        let (bytes, _) = OggWriter::new(Vec::new(), 3).finish().unwrap();
        assert_eq!(bytes.len(), PAGE_HEADER_SIZE);
        assert_eq!(bytes[5], FLAG_FIRST | FLAG_LAST);
        assert!(parse_all(&mut OggParser::default(), &bytes, 16).is_empty());
    }
}
