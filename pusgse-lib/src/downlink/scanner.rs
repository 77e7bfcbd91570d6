use tracing::{debug, trace};

use crate::integrity::CrcEngine;
use crate::spacepacket::{Packet, PrimaryHeader};

/// Smallest packet the scanner accepts: primary header, 1 byte of data and the PEC.
const MIN_PACKET_LEN: usize = PrimaryHeader::LEN + 1 + 2;

/// Iterates over the CRC-valid space packets in a byte buffer.
///
/// At each position the scanner tries to read a length-prefixed packet and checks its
/// trailing CRC-16. If the packet does not fit the buffer or its CRC does not match, the
/// scanner advances a single byte and tries again until it finds a valid packet, so one
/// corrupted packet costs only that packet.
///
/// One CRC mismatch is counted each time sync is lost, not for each byte skipped while
/// looking for the next valid packet.
#[derive(Debug)]
pub struct PacketScanner<'a> {
    buf: &'a [u8],
    pos: usize,
    in_sync: bool,
    crc_mismatches: usize,
    skipped_bytes: usize,
}

impl<'a> PacketScanner<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            in_sync: true,
            crc_mismatches: 0,
            skipped_bytes: 0,
        }
    }

    #[must_use]
    pub fn crc_mismatches(&self) -> usize {
        self.crc_mismatches
    }

    /// Bytes not part of any valid packet.
    #[must_use]
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }

    fn try_packet(&self) -> Option<Packet> {
        let dat = &self.buf[self.pos..];
        let header = PrimaryHeader::decode(dat).ok()?;
        let total = header.packet_len();
        if header.version != 0 || total < MIN_PACKET_LEN || total > dat.len() {
            return None;
        }
        CrcEngine::Ccitt16.verify_trailing(&dat[..total]).ok()?;
        Packet::decode(dat).ok()
    }
}

impl Iterator for PacketScanner<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos + PrimaryHeader::LEN <= self.buf.len() {
            if let Some(packet) = self.try_packet() {
                if !self.in_sync {
                    debug!(offset = self.pos, "resynchronized");
                    self.in_sync = true;
                }
                let packet = packet.with_offset(self.pos);
                self.pos += packet.total_len();
                trace!(offset = packet.offset, "{packet}");
                return Some(packet);
            }
            if self.in_sync {
                debug!(offset = self.pos, "lost sync; seeking next valid packet");
                self.crc_mismatches += 1;
                self.in_sync = false;
            }
            self.skipped_bytes += 1;
            self.pos += 1;
        }
        if self.pos < self.buf.len() {
            self.skipped_bytes += self.buf.len() - self.pos;
            self.pos = self.buf.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(apid: u16, seq: u8, data: &[u8]) -> Vec<u8> {
        let len = data.len() + 2 - 1;
        let mut out = vec![
            (apid >> 8) as u8 & 0x7,
            apid as u8,
            0xc0,
            seq,
            (len >> 8) as u8,
            len as u8,
        ];
        out.extend_from_slice(data);
        CrcEngine::Ccitt16.append(&mut out);
        out
    }

    #[test]
    fn clean_stream() {
        let mut dat = packet(1, 0, &[1, 2, 3]);
        dat.extend(packet(2, 1, &[4, 5]));
        let mut scanner = PacketScanner::new(&dat);
        let packets: Vec<Packet> = scanner.by_ref().collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].offset, 11);
        assert_eq!(packets[1].header.apid, 2);
        assert_eq!(scanner.crc_mismatches(), 0);
        assert_eq!(scanner.skipped_bytes(), 0);
    }

    #[test]
    fn resyncs_after_garbage() {
        let mut dat = vec![0xff, 0xee, 0xdd];
        dat.extend(packet(1, 0, &[1, 2, 3]));
        let mut corrupt = packet(1, 1, &[9, 9, 9, 9]);
        corrupt[7] ^= 0x40;
        dat.extend(&corrupt);
        dat.extend(packet(1, 2, &[7]));
        dat.push(0x00);

        let mut scanner = PacketScanner::new(&dat);
        let seqs: Vec<u16> = scanner.by_ref().map(|p| p.header.sequence_id).collect();
        assert_eq!(seqs, vec![0, 2]);
        // leading garbage and the corrupt packet each lose sync once
        assert_eq!(scanner.crc_mismatches(), 2);
        assert_eq!(scanner.skipped_bytes(), 3 + corrupt.len() + 1);
    }

    #[test]
    fn length_past_end_is_skipped() {
        let mut dat = packet(1, 0, &[1, 2, 3]);
        dat.truncate(dat.len() - 1);
        let mut scanner = PacketScanner::new(&dat);
        assert!(scanner.next().is_none());
        assert_eq!(scanner.skipped_bytes(), dat.len());
        assert_eq!(scanner.crc_mismatches(), 1);
    }
}
