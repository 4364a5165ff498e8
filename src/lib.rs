//! Remotely addressable tree of typed parameters over a datagram
//! transport.
//!
//! A server exposes a hierarchically-named tree of typed parameters
//! (scalars, tables, lists, arrays, files, calls), each addressed on the
//! wire by a 16-bit PID. The matching client discovers the server,
//! downloads its schema once per change (gated by a CRC-32), and drives
//! typed stubs by path. See the module docs for the wire format
//! ([`wire`]), the parameter model ([`param`]) and the two engines
//! ([`server`], [`client`]).

pub mod client;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod param;
pub mod query;
pub mod schema;
pub mod server;
pub mod store;
pub mod tree;
pub mod value;
pub mod wire;

pub use client::Client;
pub use connection::Connection;
pub use device::{Device, MemDevice, UdpDevice};
pub use error::ErrCode;
pub use param::{Call, CallTable, EidEnum, FileParam, List, Parameter, Scalar, Table, ValEnum};
pub use query::QueryServer;
pub use server::{Server, ServerHandle};
pub use tree::Container;
pub use value::{TypeCode, WireValue};
