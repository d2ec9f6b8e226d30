//! Wire framing: a 16-bit little-endian length prefix followed by either
//! a [`Message`] or a [`Reply`]. Mirrors the packed `pcie_net_msg_t` /
//! `pcie_net_reply_t` structures of the original C transport, minus the
//! `#[repr(packed)]` trick — we encode/decode field by field instead so
//! there is never an unaligned reference into a byte buffer.

/// Size in bytes of the frame length header.
pub const HEADER_SIZE: usize = 2;

/// Fixed portion of a [`Message`] on the wire, not counting `data`.
const MESSAGE_FIXED_SIZE: usize = 1 + 1 + 1 + 8 + 2;

/// Fixed size of a [`Reply`] on the wire (status + 8 data bytes).
const REPLY_SIZE: usize = 1 + 8;

/// Largest payload a [`Message`] may carry.
pub const MAX_PAYLOAD: usize = 4096;

/// Largest legal envelope, header included.
pub const MAX_ENVELOPE: usize = HEADER_SIZE + MESSAGE_FIXED_SIZE + MAX_PAYLOAD;

/// PCIe transaction opcodes exchanged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReadConfig = 0,
    WriteConfig = 1,
    ReadMem = 2,
    WriteMem = 3,
    ReadIo = 4,
    WriteIo = 5,
    Int = 6,
    Msi = 7,
    Msix = 8,
}

impl Op {
    /// Ops for which the peer expects exactly one reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, Op::ReadConfig | Op::ReadMem | Op::ReadIo)
    }
}

/// A request or notification read off, or about to be written to, the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub op: Op,
    pub bar: u8,
    pub width: u8,
    pub addr: u64,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(op: Op, bar: u8, width: u8, addr: u64, data: Vec<u8>) -> Self {
        Message {
            op,
            bar,
            width,
            addr,
            data,
        }
    }

    /// A zero-payload MSI notification.
    pub fn msi() -> Self {
        Message::new(Op::Msi, 0, 0, 0, vec![0u8; 8])
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = HEADER_SIZE + MESSAGE_FIXED_SIZE + self.data.len();
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&(size as u16).to_le_bytes());
        buf.push(self.op as u8);
        buf.push(self.bar);
        buf.push(self.width);
        buf.extend_from_slice(&self.addr.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode the payload that follows the 2-byte header (the header's
    /// `size` field is consumed by the transport before this is called).
    pub fn decode(body: &[u8]) -> Option<Message> {
        if body.len() < MESSAGE_FIXED_SIZE {
            return None;
        }
        let op_byte = body[0];
        let bar = body[1];
        let width = body[2];
        let addr = u64::from_le_bytes(body[3..11].try_into().ok()?);
        let size = u16::from_le_bytes(body[11..13].try_into().ok()?) as usize;
        if body.len() != MESSAGE_FIXED_SIZE + size {
            return None;
        }
        let op = decode_op(op_byte)?;
        Some(Message {
            op,
            bar,
            width,
            addr,
            data: body[MESSAGE_FIXED_SIZE..].to_vec(),
        })
    }
}

/// Decode a raw opcode byte. A free function rather than a `TryFrom`
/// impl so an unknown opcode is a plain `None`, not a panic.
fn decode_op(byte: u8) -> Option<Op> {
    Some(match byte {
        0 => Op::ReadConfig,
        1 => Op::WriteConfig,
        2 => Op::ReadMem,
        3 => Op::WriteMem,
        4 => Op::ReadIo,
        5 => Op::WriteIo,
        6 => Op::Int,
        7 => Op::Msi,
        8 => Op::Msix,
        _ => return None,
    })
}

/// A completion for a read-class [`Message`]. Always fixed-size on the
/// wire regardless of the request's `width` (the reply payload is
/// always 1 status byte + 8 data bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub data: [u8; 8],
}

impl Reply {
    pub fn ok(data: [u8; 8]) -> Self {
        Reply { status: 0, data }
    }

    /// All-ones reply, used for out-of-range config reads and reads of
    /// an inactive/unhandled BAR.
    pub fn all_ones() -> Self {
        Reply {
            status: 0,
            data: [0xff; 8],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = HEADER_SIZE + REPLY_SIZE;
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&(size as u16).to_le_bytes());
        buf.push(self.status);
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(body: &[u8]) -> Option<Reply> {
        if body.len() != REPLY_SIZE {
            return None;
        }
        let status = body[0];
        let mut data = [0u8; 8];
        data.copy_from_slice(&body[1..9]);
        Some(Reply { status, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trip() {
        let msg = Message::new(Op::WriteMem, 0, 4, 0x1000, vec![1, 2, 3, 4]);
        let encoded = msg.encode();
        let size = u16::from_le_bytes([encoded[0], encoded[1]]) as usize;
        assert_eq!(size, encoded.len());
        let decoded = Message::decode(&encoded[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reply_is_always_nine_bytes_of_body() {
        let r = Reply::ok([1, 2, 3, 4, 0, 0, 0, 0]);
        let encoded = r.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + REPLY_SIZE);
        let decoded = Reply::decode(&encoded[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn unknown_op_byte_decodes_to_none() {
        let mut body = vec![0xFEu8, 0, 0];
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        assert!(Message::decode(&body).is_none());
    }

    #[test]
    fn truncated_message_decodes_to_none() {
        assert!(Message::decode(&[0, 0]).is_none());
    }
}
