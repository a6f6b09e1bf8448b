//! HPACK header compression (RFC 7541).
//!
//! Encoder and decoder share the table model: the fixed 61-entry static
//! table plus a connection-scoped dynamic table bounded by the negotiated
//! size. Any decode failure desynchronizes the dynamic table for every
//! later header block, so decode errors are fatal to the connection, never
//! to a single stream.

use std::collections::VecDeque;

use crate::error::Http2Error;
use crate::huffman;

/// Per-entry overhead for dynamic table size accounting (RFC 7541 §4.1).
const ENTRY_OVERHEAD: usize = 32;

/// A single header name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    /// Decoded from (and re-encoded as) a never-indexed literal. Such
    /// headers must not enter any compression table on the re-encode path.
    pub sensitive: bool,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn sensitive(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: true,
        }
    }

    /// Size for dynamic table accounting: name + value + 32.
    fn table_size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

// -- Prefix integer codec (RFC 7541 Section 5.1) --

pub(crate) fn encode_prefix_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, pattern: u8) {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        buf.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

pub(crate) fn decode_prefix_int(buf: &[u8], prefix_bits: u8) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let max = (1u64 << prefix_bits) - 1;
    let head = u64::from(first) & max;
    if head < max {
        return Some((head, 1));
    }
    let mut value = max;
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        value += u64::from(b & 0x7f) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Some((value, i + 2));
        }
        if shift > 56 {
            return None; // malformed: unbounded continuation
        }
    }
    None // truncated
}

// -- Static table (RFC 7541 Appendix A), 1-indexed --

const STATIC_TABLE: &[(&[u8], &[u8])] = &[
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

fn static_lookup(name: &[u8], value: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|&(n, v)| n == name && v == value)
        .map(|i| i + 1)
}

fn static_name_lookup(name: &[u8]) -> Option<usize> {
    STATIC_TABLE.iter().position(|&(n, _)| n == name).map(|i| i + 1)
}

// -- Dynamic table --

/// Bounded, eviction-ordered dynamic table (RFC 7541 Section 2.3.2).
/// Entries are newest-first; entry 0 is HPACK index 62.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Insert at the head, evicting from the tail until the entry fits.
    /// An entry larger than the whole bound empties the table instead
    /// (RFC 7541 Section 4.4).
    pub fn insert(&mut self, field: HeaderField) {
        let entry_size = field.table_size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + entry_size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.table_size();
            }
        }
        self.size += entry_size;
        self.entries.push_front(field);
    }

    /// Shrink or grow the bound, evicting as needed.
    pub fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.table_size();
            }
        }
    }

    fn find(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name == name && h.value == value)
            .map(|i| i + STATIC_TABLE.len() + 1)
    }

    fn find_name(&self, name: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name == name)
            .map(|i| i + STATIC_TABLE.len() + 1)
    }
}

// -- String literals --

fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        encode_prefix_int(buf, huffman_len as u64, 7, 0x80);
        huffman::encode(data, buf);
    } else {
        encode_prefix_int(buf, data.len() as u64, 7, 0x00);
        buf.extend_from_slice(data);
    }
}

fn decode_string(buf: &[u8]) -> Result<(Vec<u8>, usize), Http2Error> {
    let huffman_coded = buf.first().ok_or(Http2Error::Compression)? & 0x80 != 0;
    let (len, prefix_len) = decode_prefix_int(buf, 7).ok_or(Http2Error::Compression)?;
    let len = len as usize;
    let total = prefix_len + len;
    let data = buf.get(prefix_len..total).ok_or(Http2Error::Compression)?;
    let bytes = if huffman_coded {
        huffman::decode(data)?
    } else {
        data.to_vec()
    };
    Ok((bytes, total))
}

// -- Encoder --

/// HPACK encoder over the connection's dynamic table.
pub struct HpackEncoder {
    table: DynamicTable,
}

impl HpackEncoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
        }
    }

    /// Encode a header list, appending the block to `buf`.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        for header in headers {
            self.encode_field(header, buf);
        }
    }

    pub fn encode_to_vec(&mut self, headers: &[HeaderField]) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(headers, &mut buf);
        buf
    }

    fn encode_field(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        if header.sensitive {
            // Literal never indexed (Section 6.2.3): echoed with the same
            // representation so no intermediary caches it.
            let name_index = static_name_lookup(&header.name)
                .or_else(|| self.table.find_name(&header.name))
                .unwrap_or(0);
            encode_prefix_int(buf, name_index as u64, 4, 0x10);
            if name_index == 0 {
                encode_string(buf, &header.name);
            }
            encode_string(buf, &header.value);
            return;
        }

        if let Some(index) =
            static_lookup(&header.name, &header.value).or_else(|| self.table.find(&header.name, &header.value))
        {
            // Indexed field (Section 6.1).
            encode_prefix_int(buf, index as u64, 7, 0x80);
            return;
        }

        // Literal with incremental indexing (Section 6.2.1).
        let name_index = static_name_lookup(&header.name)
            .or_else(|| self.table.find_name(&header.name))
            .unwrap_or(0);
        encode_prefix_int(buf, name_index as u64, 6, 0x40);
        if name_index == 0 {
            encode_string(buf, &header.name);
        }
        encode_string(buf, &header.value);
        self.table.insert(header.clone());
    }

    /// Emit a dynamic table size update instruction and resize the table.
    pub fn resize_table(&mut self, new_size: usize, buf: &mut Vec<u8>) {
        self.table.resize(new_size);
        encode_prefix_int(buf, new_size as u64, 5, 0x20);
    }
}

// -- Decoder --

/// HPACK decoder over the connection's dynamic table.
pub struct HpackDecoder {
    table: DynamicTable,
    /// Ceiling negotiated via SETTINGS_HEADER_TABLE_SIZE; size-update
    /// instructions may not exceed it.
    max_table_size: usize,
}

impl HpackDecoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_table_size,
        }
    }

    /// Update the ceiling from SETTINGS. The table itself resizes when the
    /// peer emits a size-update instruction inside a header block.
    pub fn set_max_table_size(&mut self, max_size: usize) {
        self.max_table_size = max_size;
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode a complete header block into an ordered header list.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<HeaderField>, Http2Error> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let first = buf[pos];
            if first & 0x80 != 0 {
                // Indexed field (Section 6.1).
                let (index, n) = decode_prefix_int(&buf[pos..], 7).ok_or(Http2Error::Compression)?;
                pos += n;
                headers.push(self.lookup(index as usize)?);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing (Section 6.2.1).
                let (field, n) = self.decode_literal(&buf[pos..], 6, false)?;
                pos += n;
                self.table.insert(field.clone());
                headers.push(field);
            } else if first & 0x20 != 0 {
                // Dynamic table size update (Section 6.3). Takes effect
                // before any later instruction in the block.
                let (new_size, n) = decode_prefix_int(&buf[pos..], 5).ok_or(Http2Error::Compression)?;
                pos += n;
                if new_size as usize > self.max_table_size {
                    return Err(Http2Error::Compression);
                }
                self.table.resize(new_size as usize);
            } else {
                // Literal without indexing (0000) or never indexed (0001),
                // both with a 4-bit name index prefix (Sections 6.2.2/6.2.3).
                let sensitive = first & 0x10 != 0;
                let (field, n) = self.decode_literal(&buf[pos..], 4, sensitive)?;
                pos += n;
                headers.push(field);
            }
        }
        Ok(headers)
    }

    fn decode_literal(
        &self,
        buf: &[u8],
        prefix_bits: u8,
        sensitive: bool,
    ) -> Result<(HeaderField, usize), Http2Error> {
        let (name_index, mut pos) =
            decode_prefix_int(buf, prefix_bits).ok_or(Http2Error::Compression)?;
        let name = if name_index > 0 {
            self.lookup(name_index as usize)?.name
        } else {
            let (name, n) = decode_string(&buf[pos..])?;
            pos += n;
            name
        };
        let (value, n) = decode_string(&buf[pos..])?;
        pos += n;
        Ok((
            HeaderField {
                name,
                value,
                sensitive,
            },
            pos,
        ))
    }

    fn lookup(&self, index: usize) -> Result<HeaderField, Http2Error> {
        if index == 0 {
            return Err(Http2Error::Compression);
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok(HeaderField::new(name, value));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or(Http2Error::Compression)
    }
}
