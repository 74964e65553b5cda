use byteordered::byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Result, Write};

/// Client wire protocol format (see the server crate for the canonical
/// definition):
/// code u16, flags u8, version i64, timestamp i64, hlc physical i64,
/// hlc logical i64, then u32 lengths and bytes for key, value, node id
/// and error.

const HEADER_SIZE: usize = 2 + 1 + 8 * 4 + 4 * 4;
const MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024; // 64 MB

const FLAG_FOUND: u8 = 1 << 0;
const FLAG_STALE: u8 = 1 << 1;
const FLAG_SUCCESS: u8 = 1 << 2;

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub code: u16,
    pub key: String,
    pub value: Vec<u8>,
    pub version: i64,
    pub timestamp: i64,
    pub hlc_physical: i64,
    pub hlc_logical: i64,
    pub node_id: String,
    pub found: bool,
    pub is_stale: bool,
    pub success: bool,
    pub error: String,
}

impl Message {
    pub fn request(code: u16, key: &str, value: Vec<u8>) -> Self {
        Message {
            code,
            key: key.to_string(),
            value,
            ..Message::default()
        }
    }

    /// Synchronous send for std::io::Write
    pub fn send<W: Write>(&self, stream: &mut W) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut header[..]);
            cursor.write_u16::<BigEndian>(self.code)?;
            let mut flags = 0u8;
            if self.found {
                flags |= FLAG_FOUND;
            }
            if self.is_stale {
                flags |= FLAG_STALE;
            }
            if self.success {
                flags |= FLAG_SUCCESS;
            }
            cursor.write_u8(flags)?;
            cursor.write_i64::<BigEndian>(self.version)?;
            cursor.write_i64::<BigEndian>(self.timestamp)?;
            cursor.write_i64::<BigEndian>(self.hlc_physical)?;
            cursor.write_i64::<BigEndian>(self.hlc_logical)?;
            cursor.write_u32::<BigEndian>(self.key.len() as u32)?;
            cursor.write_u32::<BigEndian>(self.value.len() as u32)?;
            cursor.write_u32::<BigEndian>(self.node_id.len() as u32)?;
            cursor.write_u32::<BigEndian>(self.error.len() as u32)?;
        }

        stream.write_all(&header)?;
        stream.write_all(self.key.as_bytes())?;
        stream.write_all(&self.value)?;
        stream.write_all(self.node_id.as_bytes())?;
        stream.write_all(self.error.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Synchronous receive for std::io::Read
    pub fn receive<R: Read>(stream: &mut R) -> Result<Message> {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header)?;

        let mut cursor = Cursor::new(&header[..]);
        let code = cursor.read_u16::<BigEndian>()?;
        let flags = cursor.read_u8()?;
        let version = cursor.read_i64::<BigEndian>()?;
        let timestamp = cursor.read_i64::<BigEndian>()?;
        let hlc_physical = cursor.read_i64::<BigEndian>()?;
        let hlc_logical = cursor.read_i64::<BigEndian>()?;
        let key_len = cursor.read_u32::<BigEndian>()? as usize;
        let value_len = cursor.read_u32::<BigEndian>()? as usize;
        let node_len = cursor.read_u32::<BigEndian>()? as usize;
        let error_len = cursor.read_u32::<BigEndian>()? as usize;

        let total = key_len as u64 + value_len as u64 + node_len as u64 + error_len as u64;
        if total > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message too large: {} bytes (max: {} bytes)", total, MAX_MESSAGE_SIZE),
            ));
        }

        let mut key = vec![0u8; key_len];
        stream.read_exact(&mut key)?;
        let mut value = vec![0u8; value_len];
        stream.read_exact(&mut value)?;
        let mut node_id = vec![0u8; node_len];
        stream.read_exact(&mut node_id)?;
        let mut error = vec![0u8; error_len];
        stream.read_exact(&mut error)?;

        Ok(Message {
            code,
            key: String::from_utf8_lossy(&key).to_string(),
            value,
            version,
            timestamp,
            hlc_physical,
            hlc_logical,
            node_id: String::from_utf8_lossy(&node_id).to_string(),
            found: flags & FLAG_FOUND != 0,
            is_stale: flags & FLAG_STALE != 0,
            success: flags & FLAG_SUCCESS != 0,
            error: String::from_utf8_lossy(&error).to_string(),
        })
    }
}
