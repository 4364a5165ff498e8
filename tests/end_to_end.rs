//! Full-stack scenarios: a served tree driven by a connected client over
//! an in-memory datagram pair.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use serial_test::serial;
use tempfile::TempDir;

use parambus::param::{Call, Table, ValEnum};
use parambus::store::{FileStore, ListStore, ScalarCell, TableStore};
use parambus::{Client, Connection, ErrCode, MemDevice, Server, ServerHandle};

const TIMEOUT: Duration = Duration::from_millis(2000);

/// Start a server over one end of a loopback pair and hand back a client
/// on the other.
fn serve(server: Server) -> (ServerHandle, Client, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server = server.schema_path(dir.path().join("schema.xml"));
    let (sdev, cdev) = MemDevice::pair();
    let handle = server.start(Arc::new(sdev)).unwrap();
    let client = Client::new(Arc::new(cdev), TIMEOUT);
    (handle, client, dir)
}

#[test]
fn scalar_set_get_round_trip() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let cell = ScalarCell::new(0u32);
    let pid = server.add(&cell.param("word").shared());
    let (_handle, client, _dir) = serve(server);

    assert_eq!(client.get::<u32>(pid)?, 0);
    client.set(pid, 0xDEADBEEFu32)?;
    assert_eq!(client.get::<u32>(pid)?, 0xDEADBEEF);
    // the client observes what the binding holds
    assert_eq!(cell.get(), 0xDEADBEEF);
    Ok(())
}

#[test]
fn type_mismatch_leaves_value_untouched() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let flag = ScalarCell::new(false);
    let word = ScalarCell::new(5u32);
    let pid_flag = server.add(&flag.param("flag").shared());
    let pid_word = server.add(&word.param("word").shared());
    let (_handle, client, _dir) = serve(server);

    // u32 payload sent at a bool parameter
    assert_eq!(client.set(pid_flag, 1u32), Err(ErrCode::Type));
    assert_eq!(client.get::<bool>(pid_flag)?, false);

    // and the next transaction on another parameter still round-trips
    client.set(pid_word, 7u32)?;
    assert_eq!(client.get::<u32>(pid_word)?, 7);
    Ok(())
}

#[test]
fn table_bounds_skip_the_binding() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let hits = Arc::new(AtomicU32::new(0));
    let rows = TableStore::new(3, 0u8);
    let (h1, h2, rd, wr) = (hits.clone(), hits.clone(), rows.clone(), rows.clone());
    let table = Table::<u8>::new(
        "tbl",
        3,
        Some(Box::new(move |eid| {
            h1.fetch_add(1, Ordering::Relaxed);
            rd.get(eid)
        })),
        Some(Box::new(move |eid, v| {
            h2.fetch_add(1, Ordering::Relaxed);
            wr.set(eid, v)
        })),
    );
    let pid = server.add(&table.shared());
    let (_handle, client, _dir) = serve(server);

    assert_eq!(client.iset(pid, 3, 7u8), Err(ErrCode::Eid));
    assert_eq!(client.iget::<u8>(pid, 3), Err(ErrCode::Eid));
    assert_eq!(hits.load(Ordering::Relaxed), 0, "binding ran out of range");

    client.iset(pid, 2, 7u8)?;
    assert_eq!(client.iget::<u8>(pid, 2)?, 7);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
    Ok(())
}

#[test]
fn list_add_sub_semantics() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let list = ListStore::<i16>::new(2);
    let pid = server.add(&list.param("lst").shared());
    let (_handle, client, _dir) = serve(server);

    client.add(pid, 5i16)?;
    assert_eq!(client.add(pid, 5i16), Err(ErrCode::Unspec));
    client.add(pid, 6i16)?;
    assert_eq!(client.add(pid, 7i16), Err(ErrCode::Unspec));
    assert_eq!(client.sub(pid, 99i16), Err(ErrCode::NotFound));
    client.sub(pid, 5i16)?;

    // enumeration stops at the first error eid
    assert_eq!(client.iget::<i16>(pid, 0)?, 6);
    assert_eq!(client.iget::<i16>(pid, 1), Err(ErrCode::Eid));
    Ok(())
}

#[test]
fn unknown_pid_keeps_framing_aligned() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let cell = ScalarCell::new(3u32);
    let pid = server.add(&cell.param("word").shared());
    let (handle, client, _dir) = serve(server);

    assert_eq!(client.get::<u32>(999), Err(ErrCode::Pid));
    assert_eq!(client.set(999, 1u32), Err(ErrCode::Pid));
    assert_eq!(client.iget::<u64>(999, 4), Err(ErrCode::Pid));
    assert_eq!(client.call(999), Err(ErrCode::Pid));
    assert_eq!(client.read(999, 0, 16), Err(ErrCode::Pid));

    // the connection is still perfectly usable
    assert_eq!(client.get::<u32>(pid)?, 3);
    assert_eq!(handle.counters().pid_err(), 5);
    Ok(())
}

#[test]
fn wrong_shape_verbs_answer_type_errors() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let word = ScalarCell::new(0u32);
    let pid_word = server.add(&word.param("word").shared());
    let fired = Arc::new(AtomicU32::new(0));
    let f = fired.clone();
    let call = Call::new(
        "fire",
        Some(Box::new(move || {
            f.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })),
    );
    let pid_call = server.add(&call.shared());
    let (_handle, client, _dir) = serve(server);

    // wrong-shape verbs on a scalar
    assert_eq!(client.call(pid_word), Err(ErrCode::Type));
    assert_eq!(client.iget::<u32>(pid_word, 0), Err(ErrCode::Type));
    assert_eq!(client.add(pid_word, 1u32), Err(ErrCode::Type));
    assert_eq!(client.read(pid_word, 0, 8), Err(ErrCode::Type));

    // get on a call parameter reports the native type
    assert_eq!(client.get::<u32>(pid_call), Err(ErrCode::Type));

    client.call(pid_call)?;
    assert_eq!(fired.load(Ordering::Relaxed), 1);

    // the scalar still answers
    assert_eq!(client.get::<u32>(pid_word)?, 0);
    Ok(())
}

#[test]
fn file_read_write_and_chunked_download() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    // bigger than two chunks so download needs three reads
    let body: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let file = FileStore::new(&body);
    let pid = server.add(&file.param("blob").shared());
    let (_handle, client, dir) = serve(server);

    assert_eq!(client.read(pid, 0, 4)?, body[..4]);
    assert_eq!(client.read(pid, 2996, 100)?, body[2996..]);
    assert_eq!(client.read(pid, 5000, 4), Err(ErrCode::Range));

    client.write(pid, 0, b"WXYZ")?;
    assert_eq!(client.read(pid, 0, 4)?, b"WXYZ".to_vec());

    let out = dir.path().join("blob.bin");
    client.download(pid, &out)?;
    let mut expect = body.clone();
    expect[..4].copy_from_slice(b"WXYZ");
    assert_eq!(std::fs::read(&out)?, expect);
    Ok(())
}

#[test]
fn timeout_then_recovery() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut server =
        Server::new("rig", "1.0").schema_path(dir.path().join("schema.xml"));
    let cell = ScalarCell::new(11u32);
    let pid = server.add(&cell.param("word").shared());

    let (sdev, cdev) = MemDevice::pair();
    let sdev = Arc::new(sdev);
    let client = Client::new(Arc::new(cdev), Duration::from_millis(100));

    // no server yet: the request must time out after >= 100 ms
    let before = Instant::now();
    assert_eq!(client.get::<u32>(pid), Err(ErrCode::Timeout));
    assert!(before.elapsed() >= Duration::from_millis(100));
    assert_eq!(client.counters().timeout_err(), 1);

    // server comes back; the stale request is answered with a stale
    // transaction and dropped, the fresh request succeeds
    let _handle = server.start(sdev).unwrap();
    assert_eq!(client.get::<u32>(pid)?, 11);
    assert_eq!(client.counters().timeout_err(), 1);
    Ok(())
}

#[test]
fn reserved_pids_describe_the_server() -> Result<()> {
    let server = Server::new("boxname", "0.9.1");
    let (handle, client, _dir) = serve(server);

    assert_eq!(client.get::<String>(Server::PID_NAME)?, "boxname");
    assert_eq!(client.get::<String>(Server::PID_VERSION)?, "0.9.1");

    let schema_bytes = std::fs::read(handle.schema_path())?;
    let crc = client.get::<u32>(Server::PID_SCHEMA_CRC)?;
    assert_eq!(crc, crc::crc32::checksum_ieee(&schema_bytes));

    // remote file read matches the on-disk schema
    let first = client.read(Server::PID_SCHEMA, 0, 64)?;
    assert_eq!(&schema_bytes[..64], &first[..]);
    Ok(())
}

fn demo_server(name: &str) -> (Server, ScalarCell<String>, ListStore<i16>) {
    let mut server = Server::new(name, "2.0");
    let version = ScalarCell::new(String::from("fw-7"));
    let peers = ListStore::<i16>::new(4);
    let mode = ScalarCell::new(1u8);

    let p_version = version.param_ro("fwversion").shared();
    let p_peers = peers.param("peers").shared();
    let p_mode = mode
        .param("mode")
        .with_val_enums(vec![ValEnum::new(0, "Off"), ValEnum::new(1, "Auto")])
        .shared();

    server.add(&p_version);
    server.add(&p_peers);
    server.add(&p_mode);
    let sys = server.root_mut().child_mut("sys");
    sys.add_param(p_version);
    sys.add_param(p_mode);
    server.root_mut().child_mut("net").add_param(p_peers);
    (server, version, peers)
}

#[test]
fn connection_bootstraps_and_routes_by_path() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let (server, _version, peers) = demo_server("pathbox");
    let server = server.schema_path(dir.path().join("server.xml"));
    let (sdev, cdev) = MemDevice::pair();
    let _handle = server.start(Arc::new(sdev)).unwrap();

    let cache = dir.path().join("client.xml");
    let conn = Connection::open(Arc::new(cdev), TIMEOUT, Some(cache.clone()))?;
    assert_eq!(conn.name(), "pathbox");
    assert_eq!(conn.version(), "2.0");

    // reserved parameters appear in the mirror too
    assert!(conn.find("/.server/name").is_some());

    assert_eq!(conn.get::<String>("/sys/fwversion")?, "fw-7");
    // read-only stub is still type-checked
    assert_eq!(conn.get::<u32>("/sys/fwversion"), Err(ErrCode::Type));
    assert_eq!(conn.get::<String>("/sys/missing"), Err(ErrCode::Pid));

    conn.set("/sys/mode", 0u8)?;
    assert_eq!(conn.get::<u8>("/sys/mode")?, 0);

    conn.add("/net/peers", 4i16)?;
    conn.add("/net/peers", 9i16)?;
    assert_eq!(conn.list_values::<i16>("/net/peers")?, vec![4, 9]);
    peers.sub(4).unwrap();
    assert_eq!(conn.list_values::<i16>("/net/peers")?, vec![9]);
    Ok(())
}

#[test]
fn cached_schema_skips_the_download() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("client.xml");

    {
        let (server, ..) = demo_server("cachebox");
        let server = server.schema_path(dir.path().join("server.xml"));
        let (sdev, cdev) = MemDevice::pair();
        let _handle = server.start(Arc::new(sdev)).unwrap();
        Connection::open(Arc::new(cdev), TIMEOUT, Some(cache.clone()))?;
    }

    // same server again; the cached file's CRC matches so the bootstrap
    // needs exactly three transactions (name, version, crc)
    let (server, ..) = demo_server("cachebox");
    let server = server.schema_path(dir.path().join("server.xml"));
    let (sdev, cdev) = MemDevice::pair();
    let _handle = server.start(Arc::new(sdev)).unwrap();
    let conn = Connection::open(Arc::new(cdev), TIMEOUT, Some(cache))?;
    assert_eq!(conn.client().counters().good_xact(), 3);
    Ok(())
}

#[test]
// serialized: this one exercises the default dot-file paths in the
// working directory
#[serial]
fn default_schema_paths_follow_the_server_name() -> Result<()> {
    let server = Server::new("dotdemo", "0.0.1");
    let (sdev, cdev) = MemDevice::pair();
    let handle = server.start(Arc::new(sdev)).unwrap();
    assert_eq!(handle.schema_path(), Path::new(".server-dotdemo.xml"));

    let conn = Connection::open(Arc::new(cdev), TIMEOUT, None)?;
    assert_eq!(conn.name(), "dotdemo");
    assert_eq!(conn.schema_file(), Path::new(".client-dotdemo.xml"));
    assert!(Path::new(".client-dotdemo.xml").exists());

    std::fs::remove_file(".server-dotdemo.xml").ok();
    std::fs::remove_file(".client-dotdemo.xml").ok();
    Ok(())
}

#[test]
fn concurrent_callers_never_swap_replies() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let a = ScalarCell::new(0u32);
    let b = ScalarCell::new(0u32);
    let pid_a = server.add(&a.param("a").shared());
    let pid_b = server.add(&b.param("b").shared());
    let (_handle, client, _dir) = serve(server);
    let client = Arc::new(client);

    let spawn = |pid: u16, base: u32| {
        let client = client.clone();
        std::thread::spawn(move || -> Result<(), ErrCode> {
            for i in 0..200u32 {
                let val = base + i;
                client.set(pid, val)?;
                let got: u32 = client.get(pid)?;
                assert_eq!(got, val, "caller {base:#x} saw a foreign value");
            }
            Ok(())
        })
    };
    let ta = spawn(pid_a, 0x1000_0000);
    let tb = spawn(pid_b, 0x2000_0000);
    ta.join().unwrap().unwrap();
    tb.join().unwrap().unwrap();

    assert_eq!(client.counters().xact_err(), 0);
    assert_eq!(client.counters().good_xact(), 800);
    Ok(())
}

#[test]
fn counters_are_monotonic_and_remotely_readable() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let cell = ScalarCell::new(0u32);
    let pid = server.add(&cell.param("word").shared());
    let (handle, client, _dir) = serve(server);

    // counter parameters registered behind the reserved block
    let good_before = client.get::<u32>(11)?; // goodxactcnt
    client.get::<u32>(pid)?;
    let _ = client.get::<u32>(999);
    let good_after = client.get::<u32>(11)?;
    assert!(good_after > good_before);

    let pid_errs = client.get::<u32>(9)?; // piderrcnt
    assert_eq!(pid_errs, 1);
    assert_eq!(handle.counters().pid_err(), 1);
    assert!(handle.counters().good_xact() >= 4);
    Ok(())
}

#[test]
fn savable_config_reflects_remote_writes() -> Result<()> {
    let mut server = Server::new("rig", "1.0");
    let rate = ScalarCell::new(250u32);
    let p = rate.param("rate").savable().shared();
    let pid = server.add(&p);
    server.root_mut().child_mut("sys").add_param(p);
    let (handle, client, _dir) = serve(server);

    client.set(pid, 8000u32)?;
    let text = parambus::config::export(handle.root());
    assert!(text.contains("sys/rate = 8000"));

    parambus::config::import(handle.root(), "sys/rate = 115200\n");
    assert_eq!(client.get::<u32>(pid)?, 115200);
    Ok(())
}

#[test]
fn multi_cell_messages_reply_in_order() -> Result<()> {
    use parambus::value::TypeCode;
    use parambus::wire::{Cell, Message, OpCode};

    let mut server = Server::new("rig", "1.0");
    let a = ScalarCell::new(1u32);
    let b = ScalarCell::new(2u32);
    let pid_a = server.add(&a.param("a").shared());
    let pid_b = server.add(&b.param("b").shared());

    let dir = tempfile::tempdir().unwrap();
    let server = server.schema_path(dir.path().join("schema.xml"));
    let (sdev, cdev) = MemDevice::pair();
    let _handle = server.start(Arc::new(sdev)).unwrap();

    // hand-rolled message with two get commands in one transaction
    let mut msg = Message::new(9);
    for pid in [pid_a, pid_b] {
        let mut cell = Cell::new(OpCode::GetCmd);
        cell.put_u16(pid).unwrap();
        cell.put_u8(TypeCode::U32.into()).unwrap();
        msg.push(&cell).unwrap();
    }
    msg.send(&cdev).unwrap();

    let mut reply = Message::default();
    reply.recv(&cdev).unwrap();
    assert_eq!(reply.transaction(), 9);
    for (pid, expect) in [(pid_a, 1u32), (pid_b, 2u32)] {
        let mut cell = reply.next().unwrap().unwrap();
        assert_eq!(cell.opcode(), u8::from(OpCode::GetSts));
        assert_eq!(cell.take_u16().unwrap(), pid);
        assert_eq!(cell.take_u8().unwrap(), u8::from(TypeCode::U32));
        assert_eq!(cell.take_u32().unwrap(), expect);
        assert_eq!(cell.take_err().unwrap(), ErrCode::Ok);
    }
    assert!(reply.next().is_none());
    Ok(())
}
