//! Server engine: owns the device, the PID table and one processing
//! thread that turns command cells into status cells.
//!
//! The server is built in two phases. `Server::new` creates the reserved
//! parameters and the `.server` housekeeping container; the integrator
//! then registers parameters (PID assignment) and shapes the container
//! tree. `start` writes the schema file, freezes the PID table (the
//! builder is consumed, so late registration cannot compile) and spawns
//! the processing thread.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, info, warn};

use crate::device::Device;
use crate::error::ErrCode;
use crate::param::{FileParam, Parameter, Scalar};
use crate::schema;
use crate::tree::Container;
use crate::value::{put_default, skip_value};
use crate::wire::{Cell, Message, OpCode};

/// CRC-32 of a file's bytes; 0 when the file cannot be read.
pub(crate) fn file_crc(path: &PathBuf) -> u32 {
    match fs::read(path) {
        Ok(bytes) => crc::crc32::checksum_ieee(&bytes),
        Err(_) => 0,
    }
}

/// Monotonic error counters, written only by the processing thread.
#[derive(Default)]
pub struct ServerCounters {
    send_err: AtomicU32,
    recv_err: AtomicU32,
    des_err: AtomicU32,
    cell_err: AtomicU32,
    opcode_err: AtomicU32,
    pid_err: AtomicU32,
    int_err: AtomicU32,
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

impl ServerCounters {
    counter!(send_err, bump_send, send_err);
    counter!(recv_err, bump_recv, recv_err);
    counter!(des_err, bump_des, des_err);
    counter!(cell_err, bump_cell, cell_err);
    counter!(opcode_err, bump_opcode, opcode_err);
    counter!(pid_err, bump_pid, pid_err);
    counter!(int_err, bump_int, int_err);
    counter!(good_xact, bump_good, good_xact);
}

/// A parameter server under construction.
pub struct Server {
    name: String,
    version: String,
    schema_path: Arc<Mutex<PathBuf>>,
    root: Container,
    pids: Vec<Arc<dyn Parameter>>,
    counters: Arc<ServerCounters>,
}

impl Server {
    pub const PID_NAME: u16 = 0;
    pub const PID_VERSION: u16 = 1;
    pub const PID_SCHEMA_CRC: u16 = 2;
    pub const PID_SCHEMA: u16 = 3;

    pub fn new(name: &str, version: &str) -> Server {
        let counters = Arc::new(ServerCounters::default());
        let schema_path = Arc::new(Mutex::new(PathBuf::from(format!(".server-{name}.xml"))));

        let mut srv = Server {
            name: name.to_string(),
            version: version.to_string(),
            schema_path: schema_path.clone(),
            root: Container::root(),
            pids: Vec::new(),
            counters: counters.clone(),
        };

        // reserved parameters, PIDs 0..3
        let n = srv.name.clone();
        let p_name =
            Scalar::<String>::new("name", Some(Box::new(move || Ok(n.clone()))), None).shared();
        let v = srv.version.clone();
        let p_version =
            Scalar::<String>::new("version", Some(Box::new(move || Ok(v.clone()))), None).shared();
        let crc_path = schema_path.clone();
        let p_crc = Scalar::<u32>::new(
            "infofilecrc",
            Some(Box::new(move || Ok(file_crc(&crc_path.lock().unwrap())))),
            None,
        )
        .shared();
        let read_path = schema_path;
        let p_info = FileParam::new(
            "infofile",
            Some(Box::new(move |offset, maxlen| {
                let bytes = fs::read(&*read_path.lock().unwrap()).map_err(|_| ErrCode::Access)?;
                let start = (offset as usize).min(bytes.len());
                let end = (start + maxlen as usize).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            })),
            None,
        )
        .shared();

        srv.add(&p_name);
        srv.add(&p_version);
        srv.add(&p_crc);
        srv.add(&p_info);

        let house = srv.root.child_mut(".server");
        house.add_param(p_name);
        house.add_param(p_version);
        house.add_param(p_crc);
        house.add_param(p_info);

        // counters, remotely readable like everything else
        macro_rules! counter_param {
            ($name:literal, $get:ident) => {{
                let c = counters.clone();
                Scalar::<u32>::new($name, Some(Box::new(move || Ok(c.$get()))), None).shared()
            }};
        }
        let counter_params = [
            counter_param!("senderrcnt", send_err),
            counter_param!("recverrcnt", recv_err),
            counter_param!("deserrcnt", des_err),
            counter_param!("cellerrcnt", cell_err),
            counter_param!("opcodeerrcnt", opcode_err),
            counter_param!("piderrcnt", pid_err),
            counter_param!("interrcnt", int_err),
            counter_param!("goodxactcnt", good_xact),
        ];
        for p in counter_params {
            srv.add(&p);
            srv.root.child_mut(".server").add_param(p);
        }

        srv
    }

    /// Override the schema file location (default `./.server-<name>.xml`).
    pub fn schema_path<P: Into<PathBuf>>(self, path: P) -> Server {
        *self.schema_path.lock().unwrap() = path.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The container tree, for shaping and for placing parameters.
    pub fn root_mut(&mut self) -> &mut Container {
        &mut self.root
    }

    /// Register a parameter, assigning the next PID.
    pub fn add(&mut self, param: &Arc<dyn Parameter>) -> u16 {
        assert!(self.pids.len() <= u16::MAX as usize, "PID table full");
        self.pids.push(param.clone());
        (self.pids.len() - 1) as u16
    }

    /// Write the schema file, freeze the PID table and start serving.
    pub fn start(self, dev: Arc<dyn Device>) -> io::Result<ServerHandle> {
        let pids = self.pids;
        let text = schema::render(&self.name, &self.version, &self.root, &|p| {
            pids.iter()
                .position(|q| Arc::ptr_eq(q, p))
                .map(|at| at as u16)
        });
        let path = self.schema_path.lock().unwrap().clone();
        fs::write(&path, &text)?;
        info!(target: "parambus", "server {} serving {} parameters", self.name, pids.len());

        let counters = self.counters.clone();
        let thread = thread::Builder::new()
            .name("parambus-server".into())
            .spawn(move || run(dev, pids, counters))?;

        Ok(ServerHandle {
            root: Arc::new(self.root),
            schema_path: path,
            counters: self.counters,
            _thread: thread,
        })
    }
}

/// A started server: the frozen tree, the schema location and the live
/// counters. Dropping the handle leaves the processing thread running
/// until its device goes away.
pub struct ServerHandle {
    root: Arc<Container>,
    schema_path: PathBuf,
    counters: Arc<ServerCounters>,
    _thread: thread::JoinHandle<()>,
}

impl ServerHandle {
    pub fn root(&self) -> &Container {
        &self.root
    }

    /// Shared tree, e.g. for serving the same parameters over a
    /// [`QueryServer`](crate::query::QueryServer).
    pub fn root_shared(&self) -> Arc<Container> {
        self.root.clone()
    }

    pub fn schema_path(&self) -> &PathBuf {
        &self.schema_path
    }

    pub fn counters(&self) -> &ServerCounters {
        &self.counters
    }
}

enum Fault {
    /// Malformed inbound cell.
    Des,
    /// Reply construction or dispatch failure.
    Int,
}

fn run(dev: Arc<dyn Device>, pids: Vec<Arc<dyn Parameter>>, counters: Arc<ServerCounters>) {
    let mut imsg = Message::default();
    let mut omsg = Message::default();
    loop {
        match imsg.recv(&*dev) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                info!(target: "parambus", "server device closed: {e}");
                return;
            }
            Err(_) => {
                counters.bump_recv();
                continue;
            }
        }
        debug!(target: "parambus", "rx xact={}", imsg.transaction());

        omsg.reset(imsg.transaction());
        while let Some(next) = imsg.next() {
            let mut icell = match next {
                Ok(c) => c,
                Err(_) => {
                    counters.bump_cell();
                    break;
                }
            };
            let op = match OpCode::try_from(icell.opcode()) {
                Ok(op) => op,
                Err(_) => {
                    counters.bump_opcode();
                    break;
                }
            };
            let handled = match op {
                OpCode::CallCmd => call_handler(&pids, &counters, &mut icell),
                OpCode::GetCmd => get_handler(&pids, &counters, &mut icell),
                OpCode::SetCmd => set_handler(&pids, &counters, &mut icell, OpCode::SetSts),
                OpCode::ICallCmd => icall_handler(&pids, &counters, &mut icell),
                OpCode::IGetCmd => iget_handler(&pids, &counters, &mut icell),
                OpCode::ISetCmd => iset_handler(&pids, &counters, &mut icell),
                OpCode::AddCmd => set_handler(&pids, &counters, &mut icell, OpCode::AddSts),
                OpCode::SubCmd => set_handler(&pids, &counters, &mut icell, OpCode::SubSts),
                OpCode::ReadCmd => read_handler(&pids, &counters, &mut icell),
                OpCode::WriteCmd => write_handler(&pids, &counters, &mut icell),
                _ => {
                    // a status opcode arriving at the server
                    counters.bump_opcode();
                    break;
                }
            };
            match handled {
                Ok(sts) => {
                    if omsg.push(&sts).is_err() {
                        counters.bump_int();
                    }
                }
                Err(Fault::Des) => counters.bump_des(),
                Err(Fault::Int) => counters.bump_int(),
            }
        }

        if let Err(e) = omsg.send(&*dev) {
            warn!(target: "parambus", "send failed: {e}");
            counters.bump_send();
            continue;
        }
        counters.bump_good();
    }
}

fn lookup<'a>(
    pids: &'a [Arc<dyn Parameter>],
    counters: &ServerCounters,
    pid: u16,
) -> Option<&'a Arc<dyn Parameter>> {
    let param = pids.get(pid as usize);
    if param.is_none() {
        counters.bump_pid();
    }
    param
}

fn call_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::CallSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p.call_cell(icell, &mut sts).map_err(|_| Fault::Int)?,
        None => sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?,
    }
    Ok(sts)
}

fn get_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::GetSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let reqtype = icell.take_u8().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p.get_cell(icell, &mut sts).map_err(|_| Fault::Int)?,
        None => {
            // echo the requested type with its default so the reply still
            // decodes on the client side
            sts.put_u8(reqtype).map_err(|_| Fault::Int)?;
            put_default(&mut sts, reqtype).map_err(|_| Fault::Des)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}

/// set, add and sub share one wire shape: `pid, type, value` in and
/// `pid, err` out.
fn set_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
    sts_op: OpCode,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(sts_op);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    match (lookup(pids, counters, pid), sts_op) {
        (Some(p), OpCode::SetSts) => p.set_cell(icell, &mut sts).map_err(|_| Fault::Int)?,
        (Some(p), OpCode::AddSts) => p.add_cell(icell, &mut sts).map_err(|_| Fault::Int)?,
        (Some(p), _) => p.sub_cell(icell, &mut sts).map_err(|_| Fault::Int)?,
        (None, _) => {
            let raw = icell.take_u8().map_err(|_| Fault::Des)?;
            skip_value(icell, raw).map_err(|_| Fault::Des)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}

fn icall_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::ICallSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let eid = icell.take_u32().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    sts.put_u32(eid).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p.icall_cell(eid, icell, &mut sts).map_err(|_| Fault::Int)?,
        None => sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?,
    }
    Ok(sts)
}

fn iget_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::IGetSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let eid = icell.take_u32().map_err(|_| Fault::Des)?;
    let reqtype = icell.take_u8().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    sts.put_u32(eid).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p.iget_cell(eid, icell, &mut sts).map_err(|_| Fault::Int)?,
        None => {
            sts.put_u8(reqtype).map_err(|_| Fault::Int)?;
            put_default(&mut sts, reqtype).map_err(|_| Fault::Des)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}

fn iset_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::ISetSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let eid = icell.take_u32().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    sts.put_u32(eid).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p.iset_cell(eid, icell, &mut sts).map_err(|_| Fault::Int)?,
        None => {
            let raw = icell.take_u8().map_err(|_| Fault::Des)?;
            skip_value(icell, raw).map_err(|_| Fault::Des)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}

fn read_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::ReadSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let offset = icell.take_u32().map_err(|_| Fault::Des)?;
    let maxlen = icell.take_u16().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    sts.put_u32(offset).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p
            .read_cell(offset, maxlen, icell, &mut sts)
            .map_err(|_| Fault::Int)?,
        None => {
            sts.put_bytes(&[]).map_err(|_| Fault::Int)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}

fn write_handler(
    pids: &[Arc<dyn Parameter>],
    counters: &ServerCounters,
    icell: &mut Cell,
) -> Result<Cell, Fault> {
    let mut sts = Cell::new(OpCode::WriteSts);
    let pid = icell.take_u16().map_err(|_| Fault::Des)?;
    let offset = icell.take_u32().map_err(|_| Fault::Des)?;
    sts.put_u16(pid).map_err(|_| Fault::Int)?;
    sts.put_u32(offset).map_err(|_| Fault::Int)?;
    match lookup(pids, counters, pid) {
        Some(p) => p
            .write_cell(offset, icell, &mut sts)
            .map_err(|_| Fault::Int)?,
        None => {
            icell.take_bytes().map_err(|_| Fault::Des)?;
            sts.put_err(ErrCode::Pid).map_err(|_| Fault::Int)?;
        }
    }
    Ok(sts)
}
