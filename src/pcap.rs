//! Per-host pcap capture (spec §6.5), gated on `<node logpcap>`. Writes
//! the classic pcap file format: one global header followed by a
//! per-packet record header and raw bytes, so captures open directly in
//! any standard pcap reader.

use std::io::{self, Write};

use bytes::Bytes;

const MAGIC_MICROSECOND: u32 = 0xA1B2C3D4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const LINKTYPE_RAW: u32 = 101;
const SNAPLEN: u32 = 65_535;

pub struct PcapWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(&MAGIC_MICROSECOND.to_le_bytes())?;
        out.write_all(&PCAP_VERSION_MAJOR.to_le_bytes())?;
        out.write_all(&PCAP_VERSION_MINOR.to_le_bytes())?;
        out.write_all(&0i32.to_le_bytes())?; // thiszone
        out.write_all(&0u32.to_le_bytes())?; // sigfigs
        out.write_all(&SNAPLEN.to_le_bytes())?;
        out.write_all(&LINKTYPE_RAW.to_le_bytes())?;
        Ok(Self { out })
    }

    /// Append one captured packet, timestamped in simulated seconds and
    /// microseconds since the start of the run.
    pub fn write_packet(&mut self, seconds: u32, micros: u32, payload: &Bytes) -> io::Result<()> {
        let caplen = payload.len().min(SNAPLEN as usize) as u32;
        self.out.write_all(&seconds.to_le_bytes())?;
        self.out.write_all(&micros.to_le_bytes())?;
        self.out.write_all(&caplen.to_le_bytes())?;
        self.out.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.out.write_all(&payload[..caplen as usize])?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
