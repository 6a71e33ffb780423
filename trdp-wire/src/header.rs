//! Fixed-layout PD/MD header codec (component C7, spec §4.7).
//!
//! Both header kinds share a 24-byte common prefix followed by a
//! kind-specific extension and a trailing 4-byte header CRC. The two kinds
//! end up with different total sizes once the extension is accounted for
//! field-by-field (PD: 40 bytes, MD: 116 bytes) — see DESIGN.md "OQ-2" for
//! how that reconciles with spec.md's "112-byte header" language.

use crate::crc::crc32;
use crate::error::{WireError, WireResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::net::Ipv4Addr;

pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Common 24-byte prefix shared by PD and MD headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonPrefix {
    pub sequence_counter: u32,
    pub protocol_version: u16,
    pub msg_type: [u8; 2],
    pub com_id: u32,
    pub etb_topo_count: u32,
    pub op_trn_topo_count: u32,
    pub dataset_length: u32,
}

impl CommonPrefix {
    const SIZE: usize = 24;

    fn write<W: Write>(&self, w: &mut W) -> WireResult<()> {
        w.write_u32::<BigEndian>(self.sequence_counter)?;
        w.write_u16::<BigEndian>(self.protocol_version)?;
        w.write_all(&self.msg_type)?;
        w.write_u32::<BigEndian>(self.com_id)?;
        w.write_u32::<BigEndian>(self.etb_topo_count)?;
        w.write_u32::<BigEndian>(self.op_trn_topo_count)?;
        w.write_u32::<BigEndian>(self.dataset_length)?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> WireResult<CommonPrefix> {
        let sequence_counter = r.read_u32::<BigEndian>()?;
        let protocol_version = r.read_u16::<BigEndian>()?;
        let mut msg_type = [0u8; 2];
        r.read_exact(&mut msg_type)?;
        let com_id = r.read_u32::<BigEndian>()?;
        let etb_topo_count = r.read_u32::<BigEndian>()?;
        let op_trn_topo_count = r.read_u32::<BigEndian>()?;
        let dataset_length = r.read_u32::<BigEndian>()?;

        if protocol_version >> 8 != PROTOCOL_VERSION >> 8 {
            return Err(WireError::VersionMismatch);
        }

        Ok(CommonPrefix {
            sequence_counter,
            protocol_version,
            msg_type,
            com_id,
            etb_topo_count,
            op_trn_topo_count,
            dataset_length,
        })
    }
}

/// PD-specific header extension (spec §4.7 "PD-specific").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdExtension {
    pub reserved: u32,
    pub reply_com_id: u32,
    pub reply_ip_addr: Ipv4Addr,
}

impl Default for PdExtension {
    fn default() -> Self {
        PdExtension {
            reserved: 0,
            reply_com_id: 0,
            reply_ip_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl PdExtension {
    const SIZE: usize = 12;

    fn write<W: Write>(&self, w: &mut W) -> WireResult<()> {
        w.write_u32::<BigEndian>(self.reserved)?;
        w.write_u32::<BigEndian>(self.reply_com_id)?;
        w.write_u32::<BigEndian>(u32::from(self.reply_ip_addr))?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> WireResult<PdExtension> {
        Ok(PdExtension {
            reserved: r.read_u32::<BigEndian>()?,
            reply_com_id: r.read_u32::<BigEndian>()?,
            reply_ip_addr: Ipv4Addr::from(r.read_u32::<BigEndian>()?),
        })
    }
}

/// MD-specific header extension (spec §4.7 "MD-specific fields").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdExtension {
    pub reply_status: u32,
    pub session_id: [u8; 16],
    pub reply_timeout: u32,
    pub source_uri: [u8; 32],
    pub dest_uri: [u8; 32],
}

impl MdExtension {
    const SIZE: usize = 4 + 16 + 4 + 32 + 32;

    fn write<W: Write>(&self, w: &mut W) -> WireResult<()> {
        w.write_u32::<BigEndian>(self.reply_status)?;
        w.write_all(&self.session_id)?;
        w.write_u32::<BigEndian>(self.reply_timeout)?;
        w.write_all(&self.source_uri)?;
        w.write_all(&self.dest_uri)?;
        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> WireResult<MdExtension> {
        let reply_status = r.read_u32::<BigEndian>()?;
        let mut session_id = [0u8; 16];
        r.read_exact(&mut session_id)?;
        let reply_timeout = r.read_u32::<BigEndian>()?;
        let mut source_uri = [0u8; 32];
        r.read_exact(&mut source_uri)?;
        let mut dest_uri = [0u8; 32];
        r.read_exact(&mut dest_uri)?;

        Ok(MdExtension {
            reply_status,
            session_id,
            reply_timeout,
            source_uri,
            dest_uri,
        })
    }
}

fn crc_and_finish(buf: &mut Vec<u8>) {
    let crc = crc32(&buf[..]);
    buf.write_u32::<BigEndian>(crc).expect("vec write is infallible");
}

fn verify_trailing_crc(bytes: &[u8]) -> WireResult<()> {
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected = crc32(body);
    let mut cursor = Cursor::new(crc_bytes);
    let actual = cursor.read_u32::<BigEndian>()?;
    if actual != expected {
        return Err(WireError::CrcMismatch);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdHeader {
    pub prefix: CommonPrefix,
    pub ext: PdExtension,
}

impl PdHeader {
    pub const SIZE: usize = CommonPrefix::SIZE + PdExtension::SIZE + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.prefix.write(&mut buf).expect("vec write is infallible");
        self.ext.write(&mut buf).expect("vec write is infallible");
        crc_and_finish(&mut buf);
        buf
    }

    pub fn decode(bytes: &[u8]) -> WireResult<PdHeader> {
        if bytes.len() < Self::SIZE {
            return Err(WireError::Truncated);
        }
        verify_trailing_crc(&bytes[..Self::SIZE])?;
        let mut cursor = Cursor::new(bytes);
        let prefix = CommonPrefix::read(&mut cursor)?;
        let ext = PdExtension::read(&mut cursor)?;
        Ok(PdHeader { prefix, ext })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdHeader {
    pub prefix: CommonPrefix,
    pub ext: MdExtension,
}

impl MdHeader {
    pub const SIZE: usize = CommonPrefix::SIZE + MdExtension::SIZE + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.prefix.write(&mut buf).expect("vec write is infallible");
        self.ext.write(&mut buf).expect("vec write is infallible");
        crc_and_finish(&mut buf);
        buf
    }

    pub fn decode(bytes: &[u8]) -> WireResult<MdHeader> {
        if bytes.len() < Self::SIZE {
            return Err(WireError::Truncated);
        }
        verify_trailing_crc(&bytes[..Self::SIZE])?;
        let mut cursor = Cursor::new(bytes);
        let prefix = CommonPrefix::read(&mut cursor)?;
        let ext = MdExtension::read(&mut cursor)?;
        Ok(MdHeader { prefix, ext })
    }
}

/// Appends the padded-to-4-bytes body CRC described in spec §4.7 "Payload
/// framing". Skipped entirely for a zero-length payload (scenario B1).
pub fn append_body_crc(payload: &mut Vec<u8>) {
    if payload.is_empty() {
        return;
    }
    while !payload.len().is_multiple_of(4) {
        payload.push(0);
    }
    let crc = crc32(payload);
    payload.write_u32::<BigEndian>(crc).expect("vec write is infallible");
}

/// Splits a received frame's trailing padded payload + body CRC off, Iand
/// validates the CRC. Returns the padded payload slice (without the CRC).
pub fn split_body_crc(bytes: &[u8]) -> WireResult<&[u8]> {
    if bytes.is_empty() {
        return Ok(bytes);
    }
    if bytes.len() < 4 {
        return Err(WireError::Truncated);
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected = crc32(payload);
    let actual = Cursor::new(crc_bytes).read_u32::<BigEndian>()?;
    if actual != expected {
        return Err(WireError::CrcMismatch);
    }
    Ok(payload)
}
