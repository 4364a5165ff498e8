//! Cell codec and message framing.
//!
//! A *cell* is one command or status unit: `opcode(1) | len(2, BE) |
//! payload[len]`. A *message* is one transaction byte followed by a run of
//! cells, exchanged as a single transport datagram. All multi-byte values
//! are big-endian.

use std::io;
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, BE};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::device::Device;
use crate::error::ErrCode;

/// Cell header: opcode byte plus 16-bit payload length.
pub const CELL_OVERHEAD: usize = 3;
/// Largest cell payload.
pub const CELL_PAYLOAD_MAX: usize = 1397;
/// Message header: the transaction byte.
pub const MSG_OVERHEAD: usize = 1;
/// Largest message payload; one maximal cell plus overhead fits exactly.
pub const MSG_PAYLOAD_MAX: usize = 1400;
/// Largest byte run in a file read/write: a read status cell spends 9
/// bytes on pid, offset, run length and status.
pub const FILE_CHUNK_MAX: usize = CELL_PAYLOAD_MAX - 9;

/// Backoff applied when a device read reports a transient (zero-length)
/// failure, so a misbehaving transport cannot spin a processing thread.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(50);

/// Framing and transport failures below the status-code layer.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("payload underflow")]
    Underflow,
    #[error("payload overflow")]
    Overflow,
    #[error("unterminated string")]
    BadString,
    #[error("unknown type code {0:#04x}")]
    BadType(u8),
    #[error("transient empty read")]
    Empty,
    #[error("device error: {0:?}")]
    Device(io::ErrorKind),
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Device(e.kind())
    }
}

impl WireError {
    /// True when the underlying device is gone and a reader loop should
    /// give up instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Device(
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }
}

/// Paired command/status opcodes, one pair per verb.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    CallCmd = 0x00,
    CallSts = 0x01,
    GetCmd = 0x02,
    GetSts = 0x03,
    SetCmd = 0x04,
    SetSts = 0x05,
    ICallCmd = 0x06,
    ICallSts = 0x07,
    IGetCmd = 0x08,
    IGetSts = 0x09,
    ISetCmd = 0x0A,
    ISetSts = 0x0B,
    AddCmd = 0x0C,
    AddSts = 0x0D,
    SubCmd = 0x0E,
    SubSts = 0x0F,
    ReadCmd = 0x10,
    ReadSts = 0x11,
    WriteCmd = 0x12,
    WriteSts = 0x13,
}

impl OpCode {
    /// The status opcode answering this command.
    pub fn status(self) -> OpCode {
        // STS opcodes are CMD | 1
        OpCode::try_from(u8::from(self) | 1).unwrap()
    }
}

/// One opcode-tagged payload, with a read cursor for deserialization.
#[derive(Debug, Clone)]
pub struct Cell {
    opcode: u8,
    payload: Vec<u8>,
    rd: usize,
}

impl Cell {
    pub fn new(opcode: OpCode) -> Cell {
        Cell {
            opcode: opcode.into(),
            payload: Vec::new(),
            rd: 0,
        }
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.rd
    }

    fn room(&self, n: usize) -> Result<(), WireError> {
        if self.payload.len() + n > CELL_PAYLOAD_MAX {
            return Err(WireError::Overflow);
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) -> Result<usize, WireError> {
        if self.remaining() < n {
            return Err(WireError::Underflow);
        }
        let at = self.rd;
        self.rd += n;
        Ok(at)
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.room(1)?;
        self.payload.push(v);
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        self.room(2)?;
        let mut b = [0u8; 2];
        BE::write_u16(&mut b, v);
        self.payload.extend_from_slice(&b);
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.room(4)?;
        let mut b = [0u8; 4];
        BE::write_u32(&mut b, v);
        self.payload.extend_from_slice(&b);
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), WireError> {
        self.room(8)?;
        let mut b = [0u8; 8];
        BE::write_u64(&mut b, v);
        self.payload.extend_from_slice(&b);
        Ok(())
    }

    pub fn put_i8(&mut self, v: i8) -> Result<(), WireError> {
        self.put_u8(v as u8)
    }

    pub fn put_i16(&mut self, v: i16) -> Result<(), WireError> {
        self.put_u16(v as u16)
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put_u32(v as u32)
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), WireError> {
        self.put_u64(v as u64)
    }

    pub fn put_f32(&mut self, v: f32) -> Result<(), WireError> {
        self.put_u32(v.to_bits())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), WireError> {
        self.put_u64(v.to_bits())
    }

    pub fn put_bool(&mut self, v: bool) -> Result<(), WireError> {
        self.put_u8(v as u8)
    }

    /// Raw bytes followed by the 0x00 terminator; no length prefix.
    pub fn put_str(&mut self, v: &str) -> Result<(), WireError> {
        self.room(v.len() + 1)?;
        self.payload.extend_from_slice(v.as_bytes());
        self.payload.push(0);
        Ok(())
    }

    /// `u16` count followed by that many raw bytes.
    pub fn put_bytes(&mut self, v: &[u8]) -> Result<(), WireError> {
        if v.len() > u16::MAX as usize {
            return Err(WireError::Overflow);
        }
        self.room(2 + v.len())?;
        self.put_u16(v.len() as u16)?;
        self.payload.extend_from_slice(v);
        Ok(())
    }

    pub fn put_err(&mut self, err: ErrCode) -> Result<(), WireError> {
        self.put_i8(err.into())
    }

    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        let at = self.advance(1)?;
        Ok(self.payload[at])
    }

    pub fn take_u16(&mut self) -> Result<u16, WireError> {
        let at = self.advance(2)?;
        Ok(BE::read_u16(&self.payload[at..]))
    }

    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        let at = self.advance(4)?;
        Ok(BE::read_u32(&self.payload[at..]))
    }

    pub fn take_u64(&mut self) -> Result<u64, WireError> {
        let at = self.advance(8)?;
        Ok(BE::read_u64(&self.payload[at..]))
    }

    pub fn take_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take_u8()? as i8)
    }

    pub fn take_i16(&mut self) -> Result<i16, WireError> {
        Ok(self.take_u16()? as i16)
    }

    pub fn take_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.take_u32()? as i32)
    }

    pub fn take_i64(&mut self) -> Result<i64, WireError> {
        Ok(self.take_u64()? as i64)
    }

    pub fn take_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.take_u32()?))
    }

    pub fn take_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.take_u64()?))
    }

    /// Nonzero bytes normalize to `true`.
    pub fn take_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.take_u8()? != 0)
    }

    /// Scan up to the terminator; fail if none arrives before payload end.
    pub fn take_str(&mut self) -> Result<String, WireError> {
        let rest = &self.payload[self.rd..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::BadString)?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.rd += nul + 1;
        Ok(s)
    }

    pub fn take_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.take_u16()? as usize;
        let at = self.advance(len)?;
        Ok(self.payload[at..at + len].to_vec())
    }

    pub fn take_err(&mut self) -> Result<ErrCode, WireError> {
        Ok(ErrCode::from_wire(self.take_i8()?))
    }

    fn encoded_len(&self) -> usize {
        CELL_OVERHEAD + self.payload.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        let mut len = [0u8; 2];
        BE::write_u16(&mut len, self.payload.len() as u16);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.payload);
    }

    fn decode(buf: &[u8]) -> Result<(Cell, usize), WireError> {
        if buf.len() < CELL_OVERHEAD {
            return Err(WireError::Underflow);
        }
        let opcode = buf[0];
        let len = BE::read_u16(&buf[1..]) as usize;
        if len > CELL_PAYLOAD_MAX {
            return Err(WireError::Overflow);
        }
        if buf.len() < CELL_OVERHEAD + len {
            return Err(WireError::Underflow);
        }
        let cell = Cell {
            opcode,
            payload: buf[CELL_OVERHEAD..CELL_OVERHEAD + len].to_vec(),
            rd: 0,
        };
        Ok((cell, CELL_OVERHEAD + len))
    }
}

/// One transaction-tagged run of cells.
#[derive(Debug, Default)]
pub struct Message {
    transaction: u8,
    payload: Vec<u8>,
    rd: usize,
}

impl Message {
    pub fn new(transaction: u8) -> Message {
        Message {
            transaction,
            payload: Vec::new(),
            rd: 0,
        }
    }

    pub fn reset(&mut self, transaction: u8) {
        self.transaction = transaction;
        self.payload.clear();
        self.rd = 0;
    }

    pub fn transaction(&self) -> u8 {
        self.transaction
    }

    /// Append a serialized cell, refusing to exceed the message payload cap.
    pub fn push(&mut self, cell: &Cell) -> Result<(), WireError> {
        if self.payload.len() + cell.encoded_len() > MSG_PAYLOAD_MAX {
            return Err(WireError::Overflow);
        }
        cell.encode_into(&mut self.payload);
        Ok(())
    }

    /// Deserialize the next cell, or `None` when the payload is exhausted.
    pub fn next(&mut self) -> Option<Result<Cell, WireError>> {
        if self.rd >= self.payload.len() {
            return None;
        }
        match Cell::decode(&self.payload[self.rd..]) {
            Ok((cell, used)) => {
                self.rd += used;
                Some(Ok(cell))
            }
            Err(e) => {
                // abandon the rest of the payload
                self.rd = self.payload.len();
                Some(Err(e))
            }
        }
    }

    /// Send as a single datagram; partial writes are a device error.
    pub fn send(&self, dev: &dyn Device) -> Result<(), WireError> {
        let mut buf = Vec::with_capacity(MSG_OVERHEAD + self.payload.len());
        buf.push(self.transaction);
        buf.extend_from_slice(&self.payload);
        let n = dev.write(&buf)?;
        if n != buf.len() {
            return Err(WireError::Device(io::ErrorKind::WriteZero));
        }
        Ok(())
    }

    /// Receive exactly one datagram. A zero-length read signals a transient
    /// transport failure; back off briefly so callers can simply retry.
    pub fn recv(&mut self, dev: &dyn Device) -> Result<(), WireError> {
        let mut buf = [0u8; MSG_OVERHEAD + MSG_PAYLOAD_MAX];
        let n = dev.read(&mut buf)?;
        if n == 0 {
            thread::sleep(EMPTY_READ_BACKOFF);
            return Err(WireError::Empty);
        }
        if n < MSG_OVERHEAD || n > MSG_OVERHEAD + MSG_PAYLOAD_MAX {
            return Err(WireError::Overflow);
        }
        self.transaction = buf[0];
        self.payload.clear();
        self.payload.extend_from_slice(&buf[MSG_OVERHEAD..n]);
        self.rd = 0;
        Ok(())
    }
}
