//! Text query server: a path-addressed command protocol over the same
//! device contract, for scripted or human access without a schema
//! download.
//!
//! One datagram carries one message: `[TT …cells… ]` where `TT` is a
//! two-character transaction tag echoed verbatim. Each cell is
//! `[op,args…]` with a two-letter opcode:
//!
//! ```text
//! [ca,sys/blink]            -> [ca,sys/blink,ok]
//! [ge,sys/rate]             -> [ge,sys/rate,250,ok]
//! [se,sys/rate,1000]        -> [se,sys/rate,ok]
//! [ic,audio/mute,2]         -> [ic,audio/mute,2,ok]
//! [ig,audio/gain,0]         -> [ig,audio/gain,0,3,ok]
//! [is,audio/gain,Left,5]    -> [is,audio/gain,Left,ok]
//! [ad,net/peers,10]         -> [ad,net/peers,ok]
//! [su,net/peers,10]         -> [su,net/peers,ok]
//! ```
//!
//! Values take the same textual forms as the configuration layer (quoted
//! enum names, bare numbers); element indices may be numeric or an
//! index-enum name. A message that does not parse, or that names an
//! unknown parameter, is dropped without a reply.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::device::Device;
use crate::error::ErrCode;
use crate::param::Parameter;
use crate::tree::Container;
use crate::wire::WireError;

const MSG_MAX: usize = 65536;

/// A running text query server. Dropping the handle leaves the thread
/// serving until its device goes away.
pub struct QueryServer {
    _thread: thread::JoinHandle<()>,
}

impl QueryServer {
    pub fn start(root: Arc<Container>, dev: Arc<dyn Device>) -> io::Result<QueryServer> {
        let thread = thread::Builder::new()
            .name("parambus-query".into())
            .spawn(move || run(root, dev))?;
        Ok(QueryServer { _thread: thread })
    }
}

fn run(root: Arc<Container>, dev: Arc<dyn Device>) {
    let mut buf = vec![0u8; MSG_MAX];
    loop {
        let n = match dev.read(&mut buf) {
            Ok(0) => {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            Ok(n) => n,
            Err(e) => {
                if WireError::from(e).is_fatal() {
                    info!(target: "parambus", "query device closed");
                    return;
                }
                continue;
            }
        };
        let Ok(text) = std::str::from_utf8(&buf[..n]) else {
            debug!(target: "parambus", "query message is not utf-8");
            continue;
        };
        match process_message(&root, text.trim_end_matches(|c| c == '\r' || c == '\n')) {
            Some(reply) => {
                let _ = dev.write(reply.as_bytes());
            }
            None => debug!(target: "parambus", "query message dropped: {text:?}"),
        }
    }
}

struct Scan<'a> {
    rest: &'a str,
}

impl<'a> Scan<'a> {
    fn expect(&mut self, ch: char) -> Option<()> {
        self.rest = self.rest.strip_prefix(ch)?;
        Some(())
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn take(&mut self, n: usize) -> Option<&'a str> {
        if !self.rest.is_char_boundary(n) || self.rest.len() < n {
            return None;
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Some(head)
    }

    /// Everything up to `term`, consuming the terminator.
    fn field(&mut self, term: char) -> Option<&'a str> {
        let at = self.rest.find(term)?;
        let head = &self.rest[..at];
        self.rest = &self.rest[at + term.len_utf8()..];
        Some(head)
    }
}

fn process_message(root: &Container, text: &str) -> Option<String> {
    let mut scan = Scan { rest: text };
    scan.expect('[')?;
    let transaction = scan.take(2)?;
    if !transaction.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let mut out = format!("[{transaction}");
    loop {
        match scan.peek()? {
            ']' => {
                out.push(']');
                return Some(out);
            }
            _ => process_cell(root, &mut scan, &mut out)?,
        }
    }
}

fn lookup<'a>(root: &'a Container, name: &str) -> Option<&'a Arc<dyn Parameter>> {
    root.find_param(name)
}

fn eid_of(param: &dyn Parameter, text: &str) -> Option<u32> {
    match text.parse() {
        Ok(eid) => Some(eid),
        Err(_) => param.eid_by_name(text),
    }
}

fn process_cell(root: &Container, scan: &mut Scan, out: &mut String) -> Option<()> {
    scan.expect('[')?;
    let op = scan.take(2)?;
    if !op.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    scan.expect(',')?;
    out.push('[');
    out.push_str(op);
    out.push(',');

    match op {
        "ca" => {
            let name = scan.field(']')?;
            let err = ErrCode::of(lookup(root, name)?.invoke());
            out.push_str(&format!("{name},{}]", err.label()));
        }
        "ge" => {
            let name = scan.field(']')?;
            let (val, err) = split_value(lookup(root, name)?.get_text());
            out.push_str(&format!("{name},{val},{}]", err.label()));
        }
        "se" => {
            let name = scan.field(',')?;
            let val = scan.field(']')?;
            let err = ErrCode::of(lookup(root, name)?.set_text(val));
            out.push_str(&format!("{name},{}]", err.label()));
        }
        "ic" => {
            let name = scan.field(',')?;
            let eidstr = scan.field(']')?;
            let param = lookup(root, name)?;
            let err = ErrCode::of(param.invoke_at(eid_of(&**param, eidstr)?));
            out.push_str(&format!("{name},{eidstr},{}]", err.label()));
        }
        "ig" => {
            let name = scan.field(',')?;
            let eidstr = scan.field(']')?;
            let param = lookup(root, name)?;
            let (val, err) = split_value(param.iget_text(eid_of(&**param, eidstr)?));
            out.push_str(&format!("{name},{eidstr},{val},{}]", err.label()));
        }
        "is" => {
            let name = scan.field(',')?;
            let eidstr = scan.field(',')?;
            let val = scan.field(']')?;
            let param = lookup(root, name)?;
            let err = ErrCode::of(param.iset_text(eid_of(&**param, eidstr)?, val));
            out.push_str(&format!("{name},{eidstr},{}]", err.label()));
        }
        "ad" => {
            let name = scan.field(',')?;
            let val = scan.field(']')?;
            let err = ErrCode::of(lookup(root, name)?.add_text(val));
            out.push_str(&format!("{name},{}]", err.label()));
        }
        "su" => {
            let name = scan.field(',')?;
            let val = scan.field(']')?;
            let err = ErrCode::of(lookup(root, name)?.sub_text(val));
            out.push_str(&format!("{name},{}]", err.label()));
        }
        _ => return None,
    }
    Some(())
}

fn split_value(res: Result<String, ErrCode>) -> (String, ErrCode) {
    match res {
        Ok(val) => (val, ErrCode::Ok),
        Err(e) => (String::new(), e),
    }
}
