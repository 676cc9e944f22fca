
use std::fmt;
use std::ops::Range;

use bytes::{Buf, BufMut};
use util::marshal::{Marshal, MarshalSize, Unmarshal};
use util::pool::Pool;

use crate::error::{Error, Result};

pub const VERSION: u8 = 2;
pub const HEADER_MIN_LENGTH: usize = 12;
pub const CSRC_LENGTH: usize = 4;
pub const MAX_CSRC_COUNT: usize = 15;
pub const MAX_PADDING_LENGTH: usize = 255;

pub const VERSION_SHIFT: u8 = 6;
pub const VERSION_MASK: u8 = 0x3;
pub const PADDING_FLAG: u8 = 0x20;
pub const EXTENSION_FLAG: u8 = 0x10;
pub const CC_MASK: u8 = 0xF;
pub const MARKER_FLAG: u8 = 0x80;
pub const PT_MASK: u8 = 0x7F;

/// Expansion is the expanded view of an RTP frame.
///
/// It is the input to [`Frame::encode`], referencing caller-owned memory,
/// and what [`Frame::expansion`] hands back for a decoded frame. CSRC ids
/// are host byte order on both paths; `padding` carries the padding content
/// without the trailing length octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expansion<'a> {
    pub version: u8,
    pub padding_bit: bool,
    pub marker_bit: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_ids: &'a [u32],
    /// Extension type plus payload; the payload length must be a multiple
    /// of 4 octets.
    pub extension: Option<(u16, &'a [u8])>,
    pub payload: &'a [u8],
    pub padding: &'a [u8],
}

impl Default for Expansion<'_> {
    fn default() -> Self {
        Self {
            version: VERSION,
            padding_bit: false,
            marker_bit: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc_ids: &[],
            extension: None,
            payload: &[],
            padding: &[],
        }
    }
}

impl Expansion<'_> {
    fn validate(&self) -> Result<()> {
        if self.csrc_ids.len() > MAX_CSRC_COUNT {
            return Err(Error::ErrTooManyCsrcs);
        }
        if let Some((_, data)) = self.extension {
            if data.len() % 4 != 0 {
                return Err(Error::ErrExtensionNotAligned);
            }
        }
        if self.padding.len() > MAX_PADDING_LENGTH {
            return Err(Error::ErrPaddingTooLarge);
        }
        if !self.padding.is_empty() && !self.padding_bit {
            return Err(Error::ErrPaddingWithoutBit);
        }
        Ok(())
    }

    fn write_into(&self, mut buf: &mut [u8]) -> Result<usize> {
        /*
         *  0                   1                   2                   3
         *  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |V=2|P|X|  CC   |M|     PT      |       sequence number         |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                           timestamp                           |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |           synchronization source (SSRC) identifier            |
         * +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
         * |            contributing source (CSRC) identifiers             |
         * |                             ....                              |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         */
        self.validate()?;

        let size = self.marshal_size();
        if buf.remaining_mut() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut b0 = (self.version << VERSION_SHIFT) | (self.csrc_ids.len() as u8 & CC_MASK);
        if self.padding_bit {
            b0 |= PADDING_FLAG;
        }
        if self.extension.is_some() {
            b0 |= EXTENSION_FLAG;
        }
        buf.put_u8(b0);

        let mut b1 = self.payload_type & PT_MASK;
        if self.marker_bit {
            b1 |= MARKER_FLAG;
        }
        buf.put_u8(b1);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in self.csrc_ids {
            buf.put_u32(*csrc);
        }

        if let Some((typ, data)) = self.extension {
            buf.put_u16(typ);
            // extension length travels in multiples of 4 octets
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(data);
        }

        buf.put_slice(self.payload);
        buf.put_slice(self.padding);

        if self.padding_bit {
            // trailing octet counts the padding including itself
            buf.put_u8(self.padding.len() as u8 + 1);
        }

        Ok(size)
    }
}

impl MarshalSize for Expansion<'_> {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_MIN_LENGTH + self.csrc_ids.len() * CSRC_LENGTH;
        if let Some((_, data)) = self.extension {
            size += 4 + data.len();
        }
        size += self.payload.len();
        size += self.padding.len();
        if self.padding_bit {
            size += 1;
        }
        size
    }
}

impl Marshal for Expansion<'_> {
    /// Serializes the expanded view into `buf` in network byte order.
    fn marshal_to(&self, buf: &mut [u8]) -> util::Result<usize> {
        self.write_into(buf).map_err(Into::into)
    }
}

/// Frame is a decoded RTP frame owning its serialised bytes.
///
/// Payload, padding and extension views are ranges into the owned buffer,
/// so a frame can be forwarded on the wire without re-encoding and
/// [`Frame::copy`] is a re-decode of the serialised form.
pub struct Frame {
    bytes: Vec<u8>,

    version: u8,
    padding_bit: bool,
    marker_bit: bool,
    payload_type: u8,
    sequence_number: u16,
    timestamp: u32,
    ssrc: u32,
    csrc_ids: Vec<u32>,
    extension: Option<(u16, Range<usize>)>,
    payload: Range<usize>,
    padding: Range<usize>,
}

impl Frame {
    /// Serializes an expanded view into a frame owning the result.
    pub fn encode(expansion: &Expansion<'_>) -> Result<Frame> {
        let mut bytes = vec![0u8; expansion.marshal_size()];
        expansion.write_into(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    /// Decodes a serialised frame, copying the input into the result.
    pub fn decode(input: &[u8]) -> Result<Frame> {
        Self::from_bytes(input.to_vec())
    }

    /// Like [`Frame::decode`], drawing the byte buffer from `cache`.
    pub fn decode_cached(cache: &FrameCache, input: &[u8]) -> Result<Frame> {
        let mut bytes = cache.buffer(input.len());
        bytes.extend_from_slice(input);
        Self::from_bytes(bytes)
    }

    /// Copies the frame by re-decoding its serialised bytes.
    pub fn copy(&self) -> Result<Frame> {
        Self::decode(&self.bytes)
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Frame> {
        let len = bytes.len();
        if len < HEADER_MIN_LENGTH {
            return Err(Error::ErrFrameTooShort);
        }

        let b0 = bytes[0];
        let version = b0 >> VERSION_SHIFT & VERSION_MASK;
        let padding_bit = b0 & PADDING_FLAG != 0;
        let extension_bit = b0 & EXTENSION_FLAG != 0;
        let cc = (b0 & CC_MASK) as usize;

        let mut expected = HEADER_MIN_LENGTH + cc * CSRC_LENGTH;
        if extension_bit {
            expected += 4;
        }
        if len < expected {
            return Err(Error::ErrFrameTooShort);
        }

        let b1 = bytes[1];
        let marker_bit = b1 & MARKER_FLAG != 0;
        let payload_type = b1 & PT_MASK;

        let sequence_number = u16::from_be_bytes([bytes[2], bytes[3]]);
        let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut offset = HEADER_MIN_LENGTH;

        // CSRC ids are exposed in host byte order via an auxiliary allocation
        let mut csrc_ids = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc_ids.push(u32::from_be_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]));
            offset += 4;
        }

        let extension = if extension_bit {
            let typ = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let words = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;

            let ext_len = words * 4;
            expected += ext_len;
            if len < expected {
                return Err(Error::ErrExtensionOverrun);
            }

            let range = offset..offset + ext_len;
            offset += ext_len;
            Some((typ, range))
        } else {
            None
        };

        let mut payload = offset..len;
        let mut padding = len..len;

        if padding_bit {
            let trailing = bytes[len - 1] as usize;
            if trailing == 0 || trailing > payload.len() {
                return Err(Error::ErrPaddingLengthInvalid);
            }
            padding = len - trailing..len - 1;
            payload = offset..len - trailing;
        }

        Ok(Frame {
            bytes,
            version,
            padding_bit,
            marker_bit,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc_ids,
            extension,
            payload,
            padding,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn padding_bit(&self) -> bool {
        self.padding_bit
    }

    pub fn extension_bit(&self) -> bool {
        self.extension.is_some()
    }

    pub fn marker_bit(&self) -> bool {
        self.marker_bit
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn csrc_ids(&self) -> &[u32] {
        &self.csrc_ids
    }

    pub fn extension(&self) -> Option<(u16, &[u8])> {
        self.extension
            .as_ref()
            .map(|(typ, range)| (*typ, &self.bytes[range.clone()]))
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.payload.clone()]
    }

    pub fn padding(&self) -> &[u8] {
        &self.bytes[self.padding.clone()]
    }

    /// The serialised frame as it travels on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame, handing out its byte buffer for recycling.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Borrowed expanded view of the decoded frame.
    pub fn expansion(&self) -> Expansion<'_> {
        Expansion {
            version: self.version,
            padding_bit: self.padding_bit,
            marker_bit: self.marker_bit,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            csrc_ids: &self.csrc_ids,
            extension: self.extension(),
            payload: self.payload(),
            padding: self.padding(),
        }
    }
}

impl MarshalSize for Frame {
    fn marshal_size(&self) -> usize {
        self.bytes.len()
    }
}

impl Marshal for Frame {
    fn marshal_to(&self, mut buf: &mut [u8]) -> util::Result<usize> {
        if buf.remaining_mut() < self.bytes.len() {
            return Err(Error::ErrBufferTooSmall.into());
        }
        buf.put_slice(&self.bytes);
        Ok(self.bytes.len())
    }
}

impl Unmarshal for Frame {
    fn unmarshal<B>(raw_frame: &mut B) -> util::Result<Self>
    where
        B: Buf,
    {
        let len = raw_frame.remaining();
        let mut bytes = vec![0u8; len];
        raw_frame.copy_to_slice(&mut bytes);
        Self::from_bytes(bytes).map_err(Into::into)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("version", &self.version)
            .field("padding_bit", &self.padding_bit)
            .field("marker_bit", &self.marker_bit)
            .field("payload_type", &self.payload_type)
            .field("sequence_number", &self.sequence_number)
            .field("timestamp", &self.timestamp)
            .field("ssrc", &self.ssrc)
            .field("csrc_ids", &self.csrc_ids)
            .field("extension", &self.extension())
            .field("payload_len", &self.payload.len())
            .field("padding_len", &self.padding.len())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "RTP FRAME:\n".to_string();

        out += format!("\tVersion: {}\n", self.version).as_str();
        out += format!("\tMarker: {}\n", self.marker_bit).as_str();
        out += format!("\tPayload Type: {}\n", self.payload_type).as_str();
        out += format!("\tSequence Number: {}\n", self.sequence_number).as_str();
        out += format!("\tTimestamp: {}\n", self.timestamp).as_str();
        out += format!("\tSSRC: {} ({:x})\n", self.ssrc, self.ssrc).as_str();
        out += format!("\tCSRC: {:?}\n", self.csrc_ids).as_str();
        if let Some((typ, data)) = self.extension() {
            out += format!("\tExtension: type {} length {}\n", typ, data.len()).as_str();
        }
        out += format!("\tPayload Length: {}\n", self.payload.len()).as_str();
        out += format!("\tPadding Length: {}\n", self.padding.len()).as_str();

        write!(f, "{out}")
    }
}

pub const DEFAULT_CACHE_CAPACITY: usize = 128;
pub const DEFAULT_CACHE_MAX_BYTES_RECACHE: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct FrameCacheConfig {
    pub capacity: usize,
    /// Retired byte buffers above this capacity are dropped instead of
    /// pooled.
    pub max_bytes_recache: usize,
}

impl Default for FrameCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            max_bytes_recache: DEFAULT_CACHE_MAX_BYTES_RECACHE,
        }
    }
}

/// Byte-buffer recycling for frame decode paths.
///
/// Thread-safe; owned by whoever runs the codec hot path, not global.
pub struct FrameCache {
    pool: Pool<Vec<u8>>,
    max_bytes_recache: usize,
}

impl FrameCache {
    pub fn new(config: FrameCacheConfig) -> Self {
        Self {
            pool: Pool::new(config.capacity),
            max_bytes_recache: config.max_bytes_recache,
        }
    }

    /// Retires a frame, recycling its byte buffer unless it grew too big.
    pub fn put(&self, frame: Frame) {
        let bytes = frame.into_bytes();
        if bytes.capacity() <= self.max_bytes_recache {
            self.pool.put(bytes);
        }
    }

    fn buffer(&self, min_capacity: usize) -> Vec<u8> {
        match self.pool.get() {
            Some(mut bytes) => {
                bytes.clear();
                bytes.reserve(min_capacity);
                bytes
            }
            None => Vec::with_capacity(min_capacity),
        }
    }
}
