//! MySQL wire packets as seen by the merge engine.
//!
//! A packet is kept with its 4-byte header (3-byte little-endian payload
//! length plus sequence id) so it can be forwarded to the client unchanged
//! apart from the sequence id.

use std::fmt;

pub const NET_HEADER_SIZE: usize = 4;

pub const PACKET_OK: u8 = 0x00;
pub const PACKET_ERR: u8 = 0xff;
pub const PACKET_EOF: u8 = 0xfe;
pub const COLUMN_NULL: u8 = 0xfb;

/// `SERVER_STATUS_AUTOCOMMIT`
pub const STATUS_AUTOCOMMIT: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ok,
    Err,
    Eof,
    /// Result-set header, field definition or row data.
    Data,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Wraps a full packet, header included.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_payload(seq: u8, payload: &[u8]) -> Self {
        let len = payload.len();
        let mut bytes = Vec::with_capacity(NET_HEADER_SIZE + len);
        bytes.push((len & 0xff) as u8);
        bytes.push(((len >> 8) & 0xff) as u8);
        bytes.push(((len >> 16) & 0xff) as u8);
        bytes.push(seq);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        self.bytes.get(NET_HEADER_SIZE..).unwrap_or(&[])
    }

    pub fn payload_len(&self) -> usize {
        self.payload().len()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    pub fn seq(&self) -> u8 {
        self.bytes.get(3).copied().unwrap_or(0)
    }

    pub fn set_seq(&mut self, seq: u8) {
        if let Some(b) = self.bytes.get_mut(3) {
            *b = seq;
        }
    }

    pub fn kind(&self) -> PacketKind {
        let payload = self.payload();
        match payload.first() {
            Some(&PACKET_OK) => PacketKind::Ok,
            Some(&PACKET_ERR) => PacketKind::Err,
            // A row starting with an 8-byte length prefix also begins with 0xfe.
            Some(&PACKET_EOF) if payload.len() < 9 => PacketKind::Eof,
            _ => PacketKind::Data,
        }
    }

    pub fn is_err(&self) -> bool {
        self.kind() == PacketKind::Err
    }

    pub fn is_eof(&self) -> bool {
        self.kind() == PacketKind::Eof
    }

    /// End-of-rows marker with no warnings and autocommit status.
    pub fn eof(seq: u8) -> Self {
        Self::from_payload(seq, &[PACKET_EOF, 0x00, 0x00, 0x02, 0x00])
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("seq", &self.seq())
            .field("kind", &self.kind())
            .field("len", &self.payload_len())
            .finish()
    }
}

/// Cursor over a packet payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub fn uint_le(&mut self, n: usize) -> Option<u64> {
        let raw = self.bytes(n)?;
        Some(
            raw.iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        )
    }

    pub fn lenenc_int(&mut self) -> Option<u64> {
        match self.u8()? {
            n @ 0..=0xfa => Some(u64::from(n)),
            0xfc => self.uint_le(2),
            0xfd => self.uint_le(3),
            0xfe => self.uint_le(8),
            _ => None,
        }
    }

    pub fn lenenc_str(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.lenenc_int()?).ok()?;
        self.bytes(len)
    }

    /// A row column: `None` for SQL NULL.
    pub fn column(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek()? == COLUMN_NULL {
            self.pos += 1;
            return Some(None);
        }
        self.lenenc_str().map(Some)
    }

    pub fn skip_columns(&mut self, n: usize) -> Option<()> {
        for _ in 0..n {
            self.column()?;
        }
        Some(())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = self.buf.get(self.pos..).unwrap_or(&[]);
        self.pos = self.buf.len();
        out
    }
}

pub fn put_lenenc_int(out: &mut Vec<u8>, v: u64) {
    if v < 0xfb {
        out.push(v as u8);
    } else if v <= 0xffff {
        out.push(0xfc);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= 0xff_ffff {
        out.push(0xfd);
        out.extend_from_slice(&(v as u32).to_le_bytes()[..3]);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn put_lenenc_str(out: &mut Vec<u8>, s: &[u8]) {
    put_lenenc_int(out, s.len() as u64);
    out.extend_from_slice(s);
}

/// Reads column `index` of a text-protocol row.
pub fn row_column(packet: &Packet, index: usize) -> Option<Option<&[u8]>> {
    let mut r = Reader::new(packet.payload());
    r.skip_columns(index)?;
    r.column()
}

/// Builds a text-protocol row packet.
pub fn row_packet(seq: u8, columns: &[Option<&[u8]>]) -> Packet {
    let mut payload = Vec::new();
    for c in columns {
        match c {
            Some(v) => put_lenenc_str(&mut payload, v),
            None => payload.push(COLUMN_NULL),
        }
    }
    Packet::from_payload(seq, &payload)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

impl ErrPacket {
    pub fn parse(packet: &Packet) -> Option<Self> {
        let mut r = Reader::new(packet.payload());
        if r.u8()? != PACKET_ERR {
            return None;
        }
        let code = r.uint_le(2)? as u16;
        let sqlstate = if r.peek() == Some(b'#') {
            r.u8()?;
            String::from_utf8_lossy(r.bytes(5)?).into_owned()
        } else {
            String::new()
        };
        let message = String::from_utf8_lossy(r.rest()).into_owned();
        Some(Self {
            code,
            sqlstate,
            message,
        })
    }

    pub fn to_packet(&self, seq: u8) -> Packet {
        let mut payload = vec![PACKET_ERR];
        payload.extend_from_slice(&self.code.to_le_bytes());
        payload.push(b'#');
        let mut state = self.sqlstate.as_bytes().to_vec();
        state.resize(5, b'0');
        payload.extend_from_slice(&state);
        payload.extend_from_slice(self.message.as_bytes());
        Packet::from_payload(seq, &payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn parse(packet: &Packet) -> Option<Self> {
        let mut r = Reader::new(packet.payload());
        if r.u8()? != PACKET_OK {
            return None;
        }
        let affected_rows = r.lenenc_int()?;
        let last_insert_id = r.lenenc_int()?;
        let status = r.uint_le(2).unwrap_or(0) as u16;
        let warnings = r.uint_le(2).unwrap_or(0) as u16;
        Some(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
        })
    }

    pub fn to_packet(&self, seq: u8) -> Packet {
        let mut payload = vec![PACKET_OK];
        put_lenenc_int(&mut payload, self.affected_rows);
        put_lenenc_int(&mut payload, self.last_insert_id);
        payload.extend_from_slice(&self.status.to_le_bytes());
        payload.extend_from_slice(&self.warnings.to_le_bytes());
        Packet::from_payload(seq, &payload)
    }
}

/// Protocol-41 column definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDef {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl FieldDef {
    pub fn parse(packet: &Packet) -> Option<Self> {
        fn text(raw: &[u8]) -> String {
            String::from_utf8_lossy(raw).into_owned()
        }
        let mut r = Reader::new(packet.payload());
        let _catalog = r.lenenc_str()?;
        let schema = text(r.lenenc_str()?);
        let table = text(r.lenenc_str()?);
        let org_table = text(r.lenenc_str()?);
        let name = text(r.lenenc_str()?);
        let org_name = text(r.lenenc_str()?);
        let _fixed_len = r.lenenc_int()?;
        let charset = r.uint_le(2)? as u16;
        let length = r.uint_le(4)? as u32;
        let column_type = r.u8()?;
        let flags = r.uint_le(2)? as u16;
        let decimals = r.u8()?;
        Some(Self {
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            length,
            column_type,
            flags,
            decimals,
        })
    }

    pub fn to_packet(&self, seq: u8) -> Packet {
        let mut payload = Vec::new();
        put_lenenc_str(&mut payload, b"def");
        put_lenenc_str(&mut payload, self.schema.as_bytes());
        put_lenenc_str(&mut payload, self.table.as_bytes());
        put_lenenc_str(&mut payload, self.org_table.as_bytes());
        put_lenenc_str(&mut payload, self.name.as_bytes());
        put_lenenc_str(&mut payload, self.org_name.as_bytes());
        payload.push(0x0c);
        payload.extend_from_slice(&self.charset.to_le_bytes());
        payload.extend_from_slice(&self.length.to_le_bytes());
        payload.push(self.column_type);
        payload.extend_from_slice(&self.flags.to_le_bytes());
        payload.push(self.decimals);
        payload.extend_from_slice(&[0, 0]);
        Packet::from_payload(seq, &payload)
    }
}

/// Column count carried by a result-set header packet.
pub fn field_count(packet: &Packet) -> Option<u64> {
    Reader::new(packet.payload()).lenenc_int()
}
