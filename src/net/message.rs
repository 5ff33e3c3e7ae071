use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::archive::{Archivable, Archive};
use crate::error::Result;
use crate::net::socket::UnixSocket;

/// Bytes of an encoded header: two `u32` fields plus a `size_t` length.
pub const HEADER_SIZE: usize = 2 * mem::size_of::<u32>() + mem::size_of::<usize>();

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

#[inline]
fn next_sequence() -> u32 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageType {
    Invalid = 0,
    MethodCall = 1,
    Reply = 2,
    Error = 3,
    Signal = 4,
}

impl From<u32> for MessageType {
    #[inline]
    fn from(raw: u32) -> Self {
        match raw {
            1 => MessageType::MethodCall,
            2 => MessageType::Reply,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            _ => MessageType::Invalid,
        }
    }
}

impl From<MessageType> for u32 {
    #[inline]
    fn from(kind: MessageType) -> Self {
        kind as u32
    }
}

/// Fixed-width frame header, laid out host-endian on the wire. The id is
/// stamped from a process-wide counter at encode time and carries no
/// meaning on the receive path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Header {
    pub id: u32,
    pub kind: u32,
    pub length: usize,
}

/// One framed request or reply unit. The signature names the remote method
/// and travels as the first value packed into the archive, keeping the
/// header fixed-width.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub header: Header,
    pub signature: String,
    pub archive: Archive,
}

impl Message {
    pub fn new(kind: MessageType, signature: &str) -> Message {
        let mut message = Message {
            header: Header {
                id: 0,
                kind: kind.into(),
                length: 0,
            },
            signature: signature.to_string(),
            archive: Archive::new(),
        };

        message.archive.append(&message.signature);
        message.header.length = message.archive.size();

        message
    }

    #[inline]
    pub fn kind(&self) -> MessageType {
        self.header.kind.into()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.header.length
    }

    /// Packs the argument values behind the signature and refreshes the
    /// payload length.
    pub fn enclose<T: Archivable>(&mut self, args: &T) {
        self.archive.pack(args);
        self.header.length = self.archive.size();
    }

    /// Unpacks the next values off the payload.
    pub fn disclose<T: Archivable + Default>(&mut self) -> Result<T> {
        self.archive.unpack()
    }

    /// Writes the frame onto the transport: header bytes first, then exactly
    /// `header.length` payload bytes.
    pub fn encode(&mut self, socket: &UnixSocket) -> Result<()> {
        self.header.id = next_sequence();
        self.header.length = self.archive.size();

        let mut raw = [0u8; HEADER_SIZE];
        {
            let mut cursor = &mut raw[..];
            cursor.write_u32::<NativeEndian>(self.header.id)?;
            cursor.write_u32::<NativeEndian>(self.header.kind)?;
            cursor.write_uint::<NativeEndian>(self.header.length as u64, mem::size_of::<usize>())?;
        }

        socket.write(&raw)?;
        socket.write(self.archive.as_bytes())
    }

    /// Reads one frame off the transport and unpacks the leading signature,
    /// leaving the cursor at the first argument.
    pub fn decode(socket: &UnixSocket) -> Result<Message> {
        let mut raw = [0u8; HEADER_SIZE];
        socket.read(&mut raw)?;

        let mut cursor = &raw[..];
        let header = Header {
            id: cursor.read_u32::<NativeEndian>()?,
            kind: cursor.read_u32::<NativeEndian>()?,
            length: cursor.read_uint::<NativeEndian>(mem::size_of::<usize>())? as usize,
        };

        let mut payload = vec![0u8; header.length];
        socket.read(&mut payload)?;

        let mut message = Message {
            header,
            signature: String::new(),
            archive: Archive::from(payload),
        };
        message.signature = message.archive.unpack()?;

        Ok(message)
    }
}
