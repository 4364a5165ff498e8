//! Connection bootstrap: discover the server, sync the schema, and drive
//! typed stubs by path.
//!
//! Opening a connection reads the reserved parameters (server name,
//! version, schema CRC), compares the CRC against any cached schema file,
//! downloads the schema only when it changed, and rebuilds the mirror of
//! typed stubs the path-addressed operations dispatch through.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use thiserror::Error;

use crate::client::Client;
use crate::device::Device;
use crate::error::ErrCode;
use crate::schema::{self, SchemaError, Shape, Stub, StubNode};
use crate::server::{file_crc, Server};
use crate::value::WireValue;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("protocol: {0}")]
    Proto(#[from] ErrCode),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// A bootstrapped connection with a mirror of the server's tree.
pub struct Connection {
    client: Client,
    name: String,
    version: String,
    schema_file: PathBuf,
    root: StubNode,
}

impl Connection {
    /// Connect, sync the schema (cache default `./.client-<name>.xml`)
    /// and build the stub mirror.
    pub fn open(
        dev: Arc<dyn Device>,
        timeout: Duration,
        cache: Option<PathBuf>,
    ) -> Result<Connection, ConnectError> {
        let client = Client::new(dev, timeout);
        let name: String = client.get(Server::PID_NAME)?;
        let version: String = client.get(Server::PID_VERSION)?;
        let remote_crc: u32 = client.get(Server::PID_SCHEMA_CRC)?;
        info!(target: "parambus", "server {name} v{version}, schema crc {remote_crc:#010x}");

        let schema_file = cache.unwrap_or_else(|| PathBuf::from(format!(".client-{name}.xml")));
        if file_crc(&schema_file) != remote_crc {
            info!(target: "parambus", "schema changed, downloading to {schema_file:?}");
            client.download(Server::PID_SCHEMA, &schema_file)?;
        }

        let doc = schema::parse(&fs::read_to_string(&schema_file)?)?;
        Ok(Connection {
            client,
            name,
            version,
            schema_file,
            root: doc.root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema_file(&self) -> &PathBuf {
        &self.schema_file
    }

    /// The raw client, for PID-addressed access.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The stub mirror root.
    pub fn root(&self) -> &StubNode {
        &self.root
    }

    pub fn find(&self, path: &str) -> Option<&Stub> {
        self.root.find(path)
    }

    fn stub(&self, path: &str) -> Result<&Stub, ErrCode> {
        self.find(path).ok_or(ErrCode::Pid)
    }

    fn typed_stub<T: WireValue>(&self, path: &str, shapes: &[Shape]) -> Result<&Stub, ErrCode> {
        let stub = self.stub(path)?;
        if stub.code != T::CODE || !shapes.contains(&stub.shape) {
            return Err(ErrCode::Type);
        }
        Ok(stub)
    }

    pub fn get<T: WireValue>(&self, path: &str) -> Result<T, ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::Scalar])?;
        self.client.get(stub.pid)
    }

    pub fn set<T: WireValue>(&self, path: &str, val: T) -> Result<(), ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::Scalar])?;
        self.client.set(stub.pid, val)
    }

    pub fn iget<T: WireValue>(&self, path: &str, eid: u32) -> Result<T, ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::Table, Shape::List])?;
        self.client.iget(stub.pid, eid)
    }

    pub fn iset<T: WireValue>(&self, path: &str, eid: u32, val: T) -> Result<(), ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::Table])?;
        self.client.iset(stub.pid, eid, val)
    }

    pub fn add<T: WireValue>(&self, path: &str, val: T) -> Result<(), ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::List])?;
        self.client.add(stub.pid, val)
    }

    pub fn sub<T: WireValue>(&self, path: &str, val: T) -> Result<(), ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::List])?;
        self.client.sub(stub.pid, val)
    }

    /// Enumerate a list parameter; the first error EID ends the list.
    pub fn list_values<T: WireValue>(&self, path: &str) -> Result<Vec<T>, ErrCode> {
        let stub = self.typed_stub::<T>(path, &[Shape::List])?;
        let mut out = Vec::new();
        for eid in 0..stub.maxsize {
            match self.client.iget(stub.pid, eid) {
                Ok(val) => out.push(val),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    pub fn call(&self, path: &str) -> Result<(), ErrCode> {
        let stub = self.stub(path)?;
        if stub.shape != Shape::Call {
            return Err(ErrCode::Type);
        }
        self.client.call(stub.pid)
    }

    pub fn icall(&self, path: &str, eid: u32) -> Result<(), ErrCode> {
        let stub = self.stub(path)?;
        if stub.shape != Shape::CallTable {
            return Err(ErrCode::Type);
        }
        self.client.icall(stub.pid, eid)
    }

    pub fn read(&self, path: &str, offset: u32, maxlen: u16) -> Result<Vec<u8>, ErrCode> {
        let stub = self.stub(path)?;
        if stub.shape != Shape::File {
            return Err(ErrCode::Type);
        }
        self.client.read(stub.pid, offset, maxlen)
    }

    pub fn write(&self, path: &str, offset: u32, data: &[u8]) -> Result<(), ErrCode> {
        let stub = self.stub(path)?;
        if stub.shape != Shape::File {
            return Err(ErrCode::Type);
        }
        self.client.write(stub.pid, offset, data)
    }
}
