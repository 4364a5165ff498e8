use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;

use parambus::schema::Shape;
use parambus::{Connection, UdpDevice};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(short, long, default_value = "127.0.0.1:14700")]
    server: String,

    #[clap(short, long, default_value_t = 1000, help = "reply timeout in ms")]
    timeout: u64,

    #[clap(long, help = "schema cache path (default ./.client-<name>.xml)")]
    cache: Option<String>,

    #[clap(help = "parameter path to get; omit to dump the tree")]
    path: Option<String>,

    #[clap(help = "value to set at the path, as text")]
    value: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();
    let dev = Arc::new(UdpDevice::connect(&args.server).wrap_err("connecting device")?);
    let conn = Connection::open(
        dev,
        Duration::from_millis(args.timeout),
        args.cache.map(Into::into),
    )
    .wrap_err("opening connection")?;
    println!("connected to {} v{}", conn.name(), conn.version());

    let Some(path) = args.path else {
        for (path, stub) in conn.root().walk() {
            println!(
                "{:5}  {:?} {:?}  {}",
                stub.pid, stub.code, stub.shape, path
            );
        }
        return Ok(());
    };

    let stub = match conn.find(&path) {
        Some(stub) => stub.clone(),
        None => bail!("no parameter at {path}"),
    };

    if let Some(value) = args.value {
        match stub.shape {
            Shape::Scalar => set_text(&conn, &path, &stub.code, &value)?,
            _ => bail!("set only supports scalars, {path} is {:?}", stub.shape),
        }
        println!("ok");
        return Ok(());
    }

    match stub.shape {
        Shape::Scalar => println!("{}", get_text(&conn, &path, &stub.code)?),
        Shape::Call => {
            conn.call(&path).map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            println!("called");
        }
        Shape::File => {
            let bytes = conn
                .read(&path, 0, 1024)
                .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        other => bail!("use the library API for {other:?} parameters"),
    }
    Ok(())
}

macro_rules! typed_dispatch {
    ($code:expr, $mac:ident) => {
        match $code {
            parambus::TypeCode::Bool => $mac!(bool),
            parambus::TypeCode::Str => $mac!(String),
            parambus::TypeCode::I8 => $mac!(i8),
            parambus::TypeCode::I16 => $mac!(i16),
            parambus::TypeCode::I32 => $mac!(i32),
            parambus::TypeCode::I64 => $mac!(i64),
            parambus::TypeCode::U8 => $mac!(u8),
            parambus::TypeCode::U16 => $mac!(u16),
            parambus::TypeCode::U32 => $mac!(u32),
            parambus::TypeCode::U64 => $mac!(u64),
            parambus::TypeCode::F32 => $mac!(f32),
            parambus::TypeCode::F64 => $mac!(f64),
            parambus::TypeCode::U8A => $mac!(Vec<u8>),
            other => bail!("unsupported scalar type {other:?} on the command line"),
        }
    };
}

fn get_text(conn: &Connection, path: &str, code: &parambus::TypeCode) -> Result<String> {
    use parambus::WireValue;
    macro_rules! get_as {
        ($t:ty) => {{
            let v: $t = conn
                .get(path)
                .map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
            Ok(v.to_text())
        }};
    }
    typed_dispatch!(*code, get_as)
}

fn set_text(conn: &Connection, path: &str, code: &parambus::TypeCode, text: &str) -> Result<()> {
    use parambus::WireValue;
    macro_rules! set_as {
        ($t:ty) => {{
            let v = <$t as WireValue>::parse_text(text)
                .ok_or_else(|| color_eyre::eyre::eyre!("cannot parse {text:?}"))?;
            conn.set(path, v).map_err(|e| color_eyre::eyre::eyre!("{e}"))
        }};
    }
    typed_dispatch!(*code, set_as)
}
