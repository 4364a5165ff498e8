//! Textual configuration export and import for savable parameters.
//!
//! The export walks a container tree and prints one line per value:
//!
//! ```text
//! sys/rate = 250
//! sys/mode = "Auto"
//! net/gain[2] = 7
//! net/gain[Left] = 7
//! net/peers < 10
//! ```
//!
//! `=` assigns scalars (and table rows with an `[index]`, numeric or an
//! index-enum name), `<` adds a list element, quoted values are value-enum
//! names. The import reverses exactly these forms; persistence policy
//! (where the text lives) is the integrator's business.

use std::fmt::Write as _;

use log::warn;

use crate::param::Parameter;
use crate::tree::Container;

/// Render every savable parameter under `root` in configuration form.
pub fn export(root: &Container) -> String {
    let mut out = String::new();
    walk(root, "", &mut out);
    out
}

fn walk(cont: &Container, path: &str, out: &mut String) {
    for param in cont.params() {
        // a value only round-trips when it can be read back out and
        // written back in; for lists writable means the add/sub pair
        if !param.savable() || !param.readable() || !param.writable() {
            continue;
        }
        export_param(&**param, path, out);
    }
    for child in cont.children() {
        let child_path = format!("{path}{}/", child.name());
        walk(child, &child_path, out);
    }
}

fn export_param(param: &dyn Parameter, path: &str, out: &mut String) {
    let name = param.name();
    if param.is_list() {
        for eid in 0..param.num_eids() {
            match param.iget_text(eid) {
                Ok(text) => {
                    let _ = writeln!(out, "{path}{name} < {text}");
                }
                Err(_) => break,
            }
        }
    } else if param.is_table() {
        for eid in 0..param.num_eids() {
            let Ok(text) = param.iget_text(eid) else {
                continue;
            };
            match param.eid_name(eid) {
                Some(label) => {
                    let _ = writeln!(out, "{path}{name}[{label}] = {text}");
                }
                None => {
                    let _ = writeln!(out, "{path}{name}[{eid}] = {text}");
                }
            }
        }
    } else if let Ok(text) = param.get_text() {
        let _ = writeln!(out, "{path}{name} = {text}");
    }
}

/// Apply configuration text to the tree. Lines that do not resolve or do
/// not convert are logged and skipped; returns the number applied.
pub fn import(root: &Container, text: &str) -> usize {
    let mut applied = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if apply_line(root, line) {
            applied += 1;
        } else {
            warn!(target: "parambus", "config line not applied: {line}");
        }
    }
    applied
}

fn apply_line(root: &Container, line: &str) -> bool {
    if let Some((lhs, rhs)) = line.split_once('=') {
        let (lhs, rhs) = (lhs.trim(), rhs.trim());
        if let Some((base, idx)) = lhs
            .strip_suffix(']')
            .and_then(|l| l.split_once('['))
        {
            let Some(param) = root.find_param(base) else {
                return false;
            };
            let eid = match idx.parse() {
                Ok(eid) => eid,
                Err(_) => match param.eid_by_name(idx) {
                    Some(eid) => eid,
                    None => return false,
                },
            };
            return param.iset_text(eid, rhs).is_ok();
        }
        let Some(param) = root.find_param(lhs) else {
            return false;
        };
        return param.set_text(rhs).is_ok();
    }
    if let Some((lhs, rhs)) = line.split_once('<') {
        let Some(param) = root.find_param(lhs.trim()) else {
            return false;
        };
        return param.add_text(rhs.trim()).is_ok();
    }
    false
}
