use byteordered::byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Result, Write};
use tokio::io::{
    AsyncRead, AsyncReadExt as TokioAsyncReadExt, AsyncWrite, AsyncWriteExt as TokioAsyncWriteExt,
};

use hlc::Hlc;

/// Client wire protocol format:
/// 1. code (u16)
/// 2. flags (u8: bit0 found, bit1 is_stale, bit2 success)
/// 3. version (i64)
/// 4. timestamp (i64)
/// 5. hlc physical (i64)
/// 6. hlc logical (i64)
/// 7. key_length (u32)
/// 8. value_length (u32)
/// 9. node_id_length (u32)
/// 10. error_length (u32)
/// 11. key, value, node_id, error (bytes)

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

    pub fn hlc(&self) -> Hlc {
        Hlc::new(self.hlc_physical, self.hlc_logical, self.node_id.clone())
    }

    pub fn set_hlc(&mut self, hlc: &Hlc) {
        self.hlc_physical = hlc.physical;
        self.hlc_logical = hlc.logical;
        self.node_id = hlc.node_id.clone();
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.found {
            flags |= FLAG_FOUND;
        }
        if self.is_stale {
            flags |= FLAG_STALE;
        }
        if self.success {
            flags |= FLAG_SUCCESS;
        }
        flags
    }

    fn encode_header(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut header = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut header[..]);
        WriteBytesExt::write_u16::<BigEndian>(&mut cursor, self.code)?;
        WriteBytesExt::write_u8(&mut cursor, self.flags())?;
        WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.version)?;
        WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.timestamp)?;
        WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.hlc_physical)?;
        WriteBytesExt::write_i64::<BigEndian>(&mut cursor, self.hlc_logical)?;
        WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.key.len() as u32)?;
        WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.value.len() as u32)?;
        WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.node_id.len() as u32)?;
        WriteBytesExt::write_u32::<BigEndian>(&mut cursor, self.error.len() as u32)?;
        Ok(header)
    }

    fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(Message, usize, usize, usize, usize)> {
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

        // Validate total message size to prevent OOM on a bad frame
        let total = key_len as u64 + value_len as u64 + node_len as u64 + error_len as u64;
        if total > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message too large: {} bytes (max: {} bytes)", total, MAX_MESSAGE_SIZE),
            ));
        }

        let message = Message {
            code,
            found: flags & FLAG_FOUND != 0,
            is_stale: flags & FLAG_STALE != 0,
            success: flags & FLAG_SUCCESS != 0,
            version,
            timestamp,
            hlc_physical,
            hlc_logical,
            ..Message::default()
        };
        Ok((message, key_len, value_len, node_len, error_len))
    }

    /// Synchronous send for std::io::Write
    pub fn send<W: Write>(&self, stream: &mut W) -> Result<()> {
        stream.write_all(&self.encode_header()?)?;
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
        let (mut message, key_len, value_len, node_len, error_len) =
            Self::decode_header(&header)?;

        let mut key = vec![0u8; key_len];
        stream.read_exact(&mut key)?;
        message.key = String::from_utf8_lossy(&key).to_string();

        let mut value = vec![0u8; value_len];
        stream.read_exact(&mut value)?;
        message.value = value;

        let mut node_id = vec![0u8; node_len];
        stream.read_exact(&mut node_id)?;
        message.node_id = String::from_utf8_lossy(&node_id).to_string();

        let mut error = vec![0u8; error_len];
        stream.read_exact(&mut error)?;
        message.error = String::from_utf8_lossy(&error).to_string();

        Ok(message)
    }

    /// Async send for tokio::io::AsyncWrite
    pub async fn send_async<W: AsyncWrite + Unpin + Send>(&self, stream: &mut W) -> Result<()> {
        let header = self.encode_header()?;
        TokioAsyncWriteExt::write_all(stream, &header).await?;
        TokioAsyncWriteExt::write_all(stream, self.key.as_bytes()).await?;
        TokioAsyncWriteExt::write_all(stream, &self.value).await?;
        TokioAsyncWriteExt::write_all(stream, self.node_id.as_bytes()).await?;
        TokioAsyncWriteExt::write_all(stream, self.error.as_bytes()).await?;
        TokioAsyncWriteExt::flush(stream).await?;
        Ok(())
    }

    /// Async receive for tokio::io::AsyncRead
    pub async fn receive_async<R: AsyncRead + Unpin + Send>(stream: &mut R) -> Result<Message> {
        let mut header = [0u8; HEADER_SIZE];
        TokioAsyncReadExt::read_exact(stream, &mut header).await?;
        let (mut message, key_len, value_len, node_len, error_len) =
            Self::decode_header(&header)?;

        let mut key = vec![0u8; key_len];
        TokioAsyncReadExt::read_exact(stream, &mut key).await?;
        message.key = String::from_utf8_lossy(&key).to_string();

        let mut value = vec![0u8; value_len];
        TokioAsyncReadExt::read_exact(stream, &mut value).await?;
        message.value = value;

        let mut node_id = vec![0u8; node_len];
        TokioAsyncReadExt::read_exact(stream, &mut node_id).await?;
        message.node_id = String::from_utf8_lossy(&node_id).to_string();

        let mut error = vec![0u8; error_len];
        TokioAsyncReadExt::read_exact(stream, &mut error).await?;
        message.error = String::from_utf8_lossy(&error).to_string();

        Ok(message)
    }
}
