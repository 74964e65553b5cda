use byteordered::byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Client wire protocol format (the server crate holds the canonical
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

    /// Async send for tokio::io::AsyncWrite
    pub async fn send_async<W: AsyncWrite + Unpin + Send>(&self, stream: &mut W) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut header[..]);
            WriteBytesExt::write_u16::<BigEndian>(&mut cursor, self.code)?;
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
            WriteBytesExt::write_u8(&mut cursor, flags)?;
            WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.version)?;
            WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.timestamp)?;
            WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.hlc_physical)?;
            WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.hlc_logical)?;
            WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.key.len() as u32)?;
            WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.value.len() as u32)?;
            WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.node_id.len() as u32)?;
            WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.error.len() as u32)?;
        }

        stream.write_all(&header).await?;
        stream.write_all(self.key.as_bytes()).await?;
        stream.write_all(&self.value).await?;
        stream.write_all(self.node_id.as_bytes()).await?;
        stream.write_all(self.error.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Async receive for tokio::io::AsyncRead
    pub async fn receive_async<R: AsyncRead + Unpin + Send>(stream: &mut R) -> Result<Message> {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await?;

        let mut cursor = Cursor::new(&header[..]);
        let code = ReadBytesExt::read_u16::<BigEndian>(&mut cursor)?;
        let flags = ReadBytesExt::read_u8(&mut cursor)?;
        let version = ReadBytesExt::read_i64::<BigEndian>(&mut cursor)?;
        let timestamp = ReadBytesExt::read_i64::<BigEndian>(&mut cursor)?;
        let hlc_physical = ReadBytesExt::read_i64::<BigEndian>(&mut cursor)?;
        let hlc_logical = ReadBytesExt::read_i64::<BigEndian>(&mut cursor)?;
        let key_len = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)? as usize;
        let value_len = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)? as usize;
        let node_len = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)? as usize;
        let error_len = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)? as usize;

        let total = key_len as u64 + value_len as u64 + node_len as u64 + error_len as u64;
        if total > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message too large: {} bytes (max: {} bytes)", total, MAX_MESSAGE_SIZE),
            ));
        }

        let mut key = vec![0u8; key_len];
        stream.read_exact(&mut key).await?;
        let mut value = vec![0u8; value_len];
        stream.read_exact(&mut value).await?;
        let mut node_id = vec![0u8; node_len];
        stream.read_exact(&mut node_id).await?;
        let mut error = vec![0u8; error_len];
        stream.read_exact(&mut error).await?;

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
