use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;

use parambus::param::{Call, EidEnum, ValEnum};
use parambus::store::{ArrayStore, FileStore, ListStore, ScalarCell, TableStore};
use parambus::{QueryServer, Server, UdpDevice};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "0.0.0.0:14700")]
    bind: String,

    #[clap(long, default_value = "demo")]
    name: String,

    #[clap(long, help = "schema file path (default ./.server-<name>.xml)")]
    schema: Option<String>,

    #[clap(long, help = "also serve the text query protocol on this address")]
    query_bind: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();

    let mut server = Server::new(&args.name, env!("CARGO_PKG_VERSION"));
    if let Some(path) = args.schema {
        server = server.schema_path(path);
    }

    // one parameter of every shape, backed by shared stores
    let rate = ScalarCell::new(250u32);
    let label = ScalarCell::new(String::from("bench"));
    let enabled = ScalarCell::new(false);
    let gains = TableStore::new(3, 0u8);
    let peers = ListStore::<i16>::new(8);
    let samples = ArrayStore::<u8>::new(64);
    let notes = FileStore::new(b"scratch space\n");

    let p_rate = rate.param("rate").savable().shared();
    let p_label = label.param("label").savable().shared();
    let p_enabled = enabled
        .param("enabled")
        .savable()
        .with_val_enums(vec![ValEnum::new(false, "Off"), ValEnum::new(true, "On")])
        .shared();
    let p_gains = gains
        .param("gains")
        .savable()
        .with_eid_enums(vec![
            EidEnum::new(0, "Left"),
            EidEnum::new(1, "Right"),
            EidEnum::new(2, "Sub"),
        ])
        .shared();
    let p_peers = peers.param("peers").savable().shared();
    let p_samples = samples.param("samples").shared();
    let p_notes = notes.param("notes").shared();
    let blink = Call::new(
        "blink",
        Some(Box::new(|| {
            println!("blink!");
            Ok(())
        })),
    )
    .shared();

    for p in [
        &p_rate, &p_label, &p_enabled, &p_gains, &p_peers, &p_samples, &p_notes, &blink,
    ] {
        server.add(p);
    }

    let sys = server.root_mut().child_mut("sys");
    sys.add_param(p_rate);
    sys.add_param(p_label);
    sys.add_param(p_enabled);
    sys.add_param(blink);
    let audio = server.root_mut().child_mut("audio");
    audio.add_param(p_gains);
    audio.add_param(p_peers);
    audio.add_param(p_samples);
    server.root_mut().add_param(p_notes);

    let dev = Arc::new(UdpDevice::listen(&args.bind)?);
    println!("serving on {}", args.bind);
    let handle = server.start(dev)?;
    println!("schema written to {:?}", handle.schema_path());

    let _query = match &args.query_bind {
        Some(addr) => {
            let qdev = Arc::new(UdpDevice::listen(addr)?);
            println!("query protocol on {addr}");
            Some(QueryServer::start(handle.root_shared(), qdev)?)
        }
        None => None,
    };

    loop {
        std::thread::park();
    }
}
