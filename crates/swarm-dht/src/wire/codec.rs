//! Length-prefixed post-handshake peer-wire messages.
//!
//! Every message is a 4-byte big-endian length prefix followed by that many
//! bytes; a zero-length message is the `keep-alive` with no further payload.
//! All other messages carry a 1-byte id followed by type-specific fields.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::WireError;

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bits: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl PeerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => body.push(ID_CHOKE),
            PeerMessage::Unchoke => body.push(ID_UNCHOKE),
            PeerMessage::Interested => body.push(ID_INTERESTED),
            PeerMessage::NotInterested => body.push(ID_NOT_INTERESTED),
            PeerMessage::Have { piece_index } => {
                body.push(ID_HAVE);
                body.extend_from_slice(&piece_index.to_be_bytes());
            }
            PeerMessage::Bitfield { bits } => {
                body.push(ID_BITFIELD);
                body.extend_from_slice(bits);
            }
            PeerMessage::Request { index, begin, length } => {
                body.push(ID_REQUEST);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            PeerMessage::Piece { index, begin, block } => {
                body.push(ID_PIECE);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
            }
            PeerMessage::Cancel { index, begin, length } => {
                body.push(ID_CANCEL);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        if body.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }
        let id = body[0];
        let rest = &body[1..];
        let u32_at = |off: usize| -> Result<u32, WireError> {
            rest.get(off..off + 4)
                .map(|s| u32::from_be_bytes(s.try_into().unwrap()))
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated peer message").into())
        };
        Ok(match id {
            ID_CHOKE => PeerMessage::Choke,
            ID_UNCHOKE => PeerMessage::Unchoke,
            ID_INTERESTED => PeerMessage::Interested,
            ID_NOT_INTERESTED => PeerMessage::NotInterested,
            ID_HAVE => PeerMessage::Have { piece_index: u32_at(0)? },
            ID_BITFIELD => PeerMessage::Bitfield { bits: rest.to_vec() },
            ID_REQUEST => PeerMessage::Request {
                index: u32_at(0)?,
                begin: u32_at(4)?,
                length: u32_at(8)?,
            },
            ID_PIECE => {
                let index = u32_at(0)?;
                let begin = u32_at(4)?;
                let block = rest
                    .get(8..)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated piece message"))?
                    .to_vec();
                PeerMessage::Piece { index, begin, block }
            }
            ID_CANCEL => PeerMessage::Cancel {
                index: u32_at(0)?,
                begin: u32_at(4)?,
                length: u32_at(8)?,
            },
            other => return Err(WireError::UnknownMessageId(other)),
        })
    }

    /// Read one length-prefixed message off an async stream.
    pub async fn read_from<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Self, WireError> {
        let len = reader.read_u32().await?;
        if len == 0 {
            return Ok(PeerMessage::KeepAlive);
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        Self::decode(&body)
    }

    pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_has_zero_length_prefix() {
        let bytes = PeerMessage::KeepAlive.encode();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn request_round_trips() {
        let msg = PeerMessage::Request { index: 3, begin: 16384, length: 16384 };
        let bytes = msg.encode();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        let back = PeerMessage::decode(&bytes[4..4 + len]).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn piece_round_trips_with_block_payload() {
        let msg = PeerMessage::Piece {
            index: 1,
            begin: 0,
            block: vec![0xAB; 16384],
        };
        let bytes = msg.encode();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        let back = PeerMessage::decode(&bytes[4..4 + len]).unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn reads_back_what_was_written_over_an_in_memory_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let msg = PeerMessage::Have { piece_index: 9 };
        msg.write_to(&mut client).await.unwrap();
        let back = PeerMessage::read_from(&mut server).await.unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        let err = PeerMessage::decode(&[200]).unwrap_err();
        assert!(matches!(err, WireError::UnknownMessageId(200)));
    }
}
