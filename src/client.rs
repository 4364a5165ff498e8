//! Client engine: issues commands with mutual exclusion and correlates
//! replies by transaction number and status opcode.
//!
//! One reader thread owns the device's receive side. Caller threads
//! serialize on the transaction mutex, latch the expected reply, send,
//! and block on the reply slot up to the configured timeout. Late replies
//! find no matching expectation and are dropped by the reader.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::device::Device;
use crate::error::ErrCode;
use crate::value::{TypeCode, WireValue};
use crate::wire::{Cell, Message, OpCode, WireError, FILE_CHUNK_MAX};

/// Monotonic counters, written by the reader thread and caller threads.
#[derive(Default)]
pub struct ClientCounters {
    send_err: AtomicU32,
    recv_err: AtomicU32,
    xact_err: AtomicU32,
    cell_err: AtomicU32,
    opcode_err: AtomicU32,
    timeout_err: AtomicU32,
    pid_err: AtomicU32,
    type_err: AtomicU32,
    eid_err: AtomicU32,
    offset_err: AtomicU32,
    good_xact: AtomicU32,
}

macro_rules! counter {
    ($get:ident, $bump:ident, $field:ident) => {
        pub fn $get(&self) -> u32 {
            self.$field.load(Ordering::Relaxed)
        }

        fn $bump(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ClientCounters {
    counter!(send_err, bump_send, send_err);
    counter!(recv_err, bump_recv, recv_err);
    counter!(xact_err, bump_xact, xact_err);
    counter!(cell_err, bump_cell, cell_err);
    counter!(opcode_err, bump_opcode, opcode_err);
    counter!(timeout_err, bump_timeout, timeout_err);
    counter!(pid_err, bump_pid, pid_err);
    counter!(type_err, bump_type, type_err);
    counter!(eid_err, bump_eid, eid_err);
    counter!(offset_err, bump_offset, offset_err);
    counter!(good_xact, bump_good, good_xact);
}

#[derive(Default)]
struct Slot {
    /// Latched (transaction, status opcode) of the in-flight request.
    expect: Option<(u8, u8)>,
    reply: Option<Cell>,
}

struct Shared {
    dev: Arc<dyn Device>,
    timeout: Duration,
    slot: Mutex<Slot>,
    cv: Condvar,
    counters: ClientCounters,
}

/// A connected protocol client. Cheap to share behind an `Arc`; calls from
/// any thread serialize on the internal transaction mutex.
pub struct Client {
    shared: Arc<Shared>,
    xact: Mutex<u8>,
}

impl Client {
    pub fn new(dev: Arc<dyn Device>, timeout: Duration) -> Client {
        let shared = Arc::new(Shared {
            dev,
            timeout,
            slot: Mutex::new(Slot::default()),
            cv: Condvar::new(),
            counters: ClientCounters::default(),
        });
        let reader_shared = shared.clone();
        thread::Builder::new()
            .name("parambus-reader".into())
            .spawn(move || reader(reader_shared))
            .expect("spawning reader thread");
        Client {
            shared,
            xact: Mutex::new(0),
        }
    }

    pub fn counters(&self) -> &ClientCounters {
        &self.shared.counters
    }

    fn clear_expect(&self) {
        self.shared.slot.lock().unwrap().expect = None;
    }

    /// Send one command cell and wait for the matching status cell.
    fn transact(
        &self,
        cmd: OpCode,
        build: &dyn Fn(&mut Cell) -> Result<(), WireError>,
    ) -> Result<Cell, ErrCode> {
        let mut next = self.xact.lock().unwrap();
        let transaction = *next;
        *next = next.wrapping_add(1);

        let mut cell = Cell::new(cmd);
        build(&mut cell).map_err(|_| ErrCode::Unspec)?;
        let mut msg = Message::new(transaction);
        msg.push(&cell).map_err(|_| ErrCode::Unspec)?;

        {
            let mut slot = self.shared.slot.lock().unwrap();
            slot.expect = Some((transaction, cmd.status().into()));
            slot.reply = None;
        }

        debug!(target: "parambus", "tx xact={transaction} op={cmd:?}");
        if msg.send(&*self.shared.dev).is_err() {
            self.shared.counters.bump_send();
            self.clear_expect();
            return Err(ErrCode::Send);
        }

        let slot = self.shared.slot.lock().unwrap();
        let (mut slot, _) = self
            .shared
            .cv
            .wait_timeout_while(slot, self.shared.timeout, |s| s.reply.is_none())
            .unwrap();
        slot.expect = None;
        match slot.reply.take() {
            Some(reply) => Ok(reply),
            None => {
                drop(slot);
                self.shared.counters.bump_timeout();
                Err(ErrCode::Timeout)
            }
        }
    }

    fn framing<T>(&self, res: Result<T, WireError>) -> Result<T, ErrCode> {
        res.map_err(|_| {
            self.shared.counters.bump_cell();
            ErrCode::Unspec
        })
    }

    fn expect_pid(&self, reply: &mut Cell, pid: u16) -> Result<(), ErrCode> {
        let got = self.framing(reply.take_u16())?;
        if got != pid {
            self.shared.counters.bump_pid();
            return Err(ErrCode::Unspec);
        }
        Ok(())
    }

    fn expect_eid(&self, reply: &mut Cell, eid: u32) -> Result<(), ErrCode> {
        let got = self.framing(reply.take_u32())?;
        if got != eid {
            self.shared.counters.bump_eid();
            return Err(ErrCode::Unspec);
        }
        Ok(())
    }

    fn expect_offset(&self, reply: &mut Cell, offset: u32) -> Result<(), ErrCode> {
        let got = self.framing(reply.take_u32())?;
        if got != offset {
            self.shared.counters.bump_offset();
            return Err(ErrCode::Unspec);
        }
        Ok(())
    }

    fn expect_type(&self, reply: &mut Cell, code: TypeCode) -> Result<(), ErrCode> {
        let got = self.framing(reply.take_u8())?;
        if got != u8::from(code) {
            self.shared.counters.bump_type();
            return Err(ErrCode::Type);
        }
        Ok(())
    }

    fn finish(&self, reply: &mut Cell) -> Result<(), ErrCode> {
        let err = self.framing(reply.take_err())?;
        self.shared.counters.bump_good();
        match err {
            ErrCode::Ok => Ok(()),
            e => Err(e),
        }
    }

    pub fn call(&self, pid: u16) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::CallCmd, &|c| c.put_u16(pid))?;
        self.expect_pid(&mut reply, pid)?;
        self.finish(&mut reply)
    }

    pub fn icall(&self, pid: u16, eid: u32) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::ICallCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u32(eid)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_eid(&mut reply, eid)?;
        self.finish(&mut reply)
    }

    pub fn get<T: WireValue>(&self, pid: u16) -> Result<T, ErrCode> {
        let mut reply = self.transact(OpCode::GetCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u8(T::CODE.into())
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_type(&mut reply, T::CODE)?;
        let val = self.framing(T::take(&mut reply))?;
        self.finish(&mut reply)?;
        Ok(val)
    }

    pub fn set<T: WireValue>(&self, pid: u16, val: T) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::SetCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u8(T::CODE.into())?;
            val.put(c)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.finish(&mut reply)
    }

    pub fn iget<T: WireValue>(&self, pid: u16, eid: u32) -> Result<T, ErrCode> {
        let mut reply = self.transact(OpCode::IGetCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u32(eid)?;
            c.put_u8(T::CODE.into())
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_eid(&mut reply, eid)?;
        self.expect_type(&mut reply, T::CODE)?;
        let val = self.framing(T::take(&mut reply))?;
        self.finish(&mut reply)?;
        Ok(val)
    }

    pub fn iset<T: WireValue>(&self, pid: u16, eid: u32, val: T) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::ISetCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u32(eid)?;
            c.put_u8(T::CODE.into())?;
            val.put(c)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_eid(&mut reply, eid)?;
        self.finish(&mut reply)
    }

    pub fn add<T: WireValue>(&self, pid: u16, val: T) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::AddCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u8(T::CODE.into())?;
            val.put(c)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.finish(&mut reply)
    }

    pub fn sub<T: WireValue>(&self, pid: u16, val: T) -> Result<(), ErrCode> {
        let mut reply = self.transact(OpCode::SubCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u8(T::CODE.into())?;
            val.put(c)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.finish(&mut reply)
    }

    /// Read up to `maxlen` bytes of a file parameter; a short return
    /// signals end of file.
    pub fn read(&self, pid: u16, offset: u32, maxlen: u16) -> Result<Vec<u8>, ErrCode> {
        let maxlen = maxlen.min(FILE_CHUNK_MAX as u16);
        let mut reply = self.transact(OpCode::ReadCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u32(offset)?;
            c.put_u16(maxlen)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_offset(&mut reply, offset)?;
        let bytes = self.framing(reply.take_bytes())?;
        self.finish(&mut reply)?;
        Ok(bytes)
    }

    pub fn write(&self, pid: u16, offset: u32, data: &[u8]) -> Result<(), ErrCode> {
        if data.len() > FILE_CHUNK_MAX {
            return Err(ErrCode::Overflow);
        }
        let mut reply = self.transact(OpCode::WriteCmd, &|c| {
            c.put_u16(pid)?;
            c.put_u32(offset)?;
            c.put_bytes(data)
        })?;
        self.expect_pid(&mut reply, pid)?;
        self.expect_offset(&mut reply, offset)?;
        self.finish(&mut reply)
    }

    /// Stream a file parameter to disk in maximal chunks, retrying each
    /// chunk up to two extra times on timeout.
    pub fn download(&self, pid: u16, path: &Path) -> Result<(), ErrCode> {
        let chunk = FILE_CHUNK_MAX as u16;
        let mut out = Vec::new();
        let mut offset = 0u32;
        loop {
            let mut tries = 0;
            let bytes = loop {
                match self.read(pid, offset, chunk) {
                    Ok(bytes) => break bytes,
                    Err(ErrCode::Timeout) if tries < 2 => tries += 1,
                    Err(e) => return Err(e),
                }
            };
            let done = bytes.len() < chunk as usize;
            offset += bytes.len() as u32;
            out.extend_from_slice(&bytes);
            if done {
                break;
            }
        }
        fs::write(path, &out).map_err(|e| {
            warn!(target: "parambus", "writing {path:?}: {e}");
            ErrCode::Unspec
        })?;
        Ok(())
    }
}

fn reader(shared: Arc<Shared>) {
    let mut msg = Message::default();
    loop {
        match msg.recv(&*shared.dev) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                debug!(target: "parambus", "client device closed: {e}");
                return;
            }
            Err(_) => {
                shared.counters.bump_recv();
                continue;
            }
        }

        let mut slot = shared.slot.lock().unwrap();
        let Some((transaction, opcode)) = slot.expect else {
            // nothing in flight; a late reply after a timeout lands here
            shared.counters.bump_xact();
            continue;
        };
        if msg.transaction() != transaction {
            shared.counters.bump_xact();
            continue;
        }
        let cell = match msg.next() {
            Some(Ok(cell)) => cell,
            _ => {
                shared.counters.bump_cell();
                continue;
            }
        };
        if cell.opcode() != opcode {
            shared.counters.bump_opcode();
            continue;
        }
        slot.reply = Some(cell);
        shared.cv.notify_one();
    }
}
