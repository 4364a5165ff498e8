//! Schema emission and parsing.
//!
//! The server writes an XML description of every PID-registered parameter
//! at start; the client downloads it and rebuilds a mirror of typed stubs.
//! Emission is hand-formatted (the format is part of the wire contract);
//! parsing uses a quick-xml event reader.

use std::fmt::Write as _;
use std::sync::Arc;

use log::warn;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::param::Parameter;
use crate::tree::Container;
use crate::value::TypeCode;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed schema: {0}")]
    Malformed(String),
}

pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

//
// Emission
//

/// Render the schema for a tree. `pid_of` reports the PID a parameter was
/// registered under; unregistered parameters are left out.
pub fn render(
    name: &str,
    version: &str,
    root: &Container,
    pid_of: &dyn Fn(&Arc<dyn Parameter>) -> Option<u16>,
) -> String {
    let mut out = String::new();
    out.push_str("<server>\n");
    let _ = writeln!(out, "  <name>{}</name>", xml_escape(name));
    let _ = writeln!(out, "  <version>{}</version>", xml_escape(version));
    render_members(&mut out, 2, root, pid_of);
    out.push_str("</server>\n");
    out
}

fn render_members(
    out: &mut String,
    indent: usize,
    cont: &Container,
    pid_of: &dyn Fn(&Arc<dyn Parameter>) -> Option<u16>,
) {
    for p in cont.params() {
        if let Some(pid) = pid_of(p) {
            p.describe(out, indent, pid);
        }
    }
    for child in cont.children() {
        let ind = " ".repeat(indent);
        let _ = writeln!(out, "{ind}<cont>");
        let _ = writeln!(out, "{ind}  <name>{}</name>", xml_escape(child.name()));
        render_members(out, indent + 2, child, pid_of);
        let _ = writeln!(out, "{ind}</cont>");
    }
}

//
// Parsing
//

#[derive(Debug, Default)]
struct XmlNode {
    tag: String,
    text: String,
    kids: Vec<XmlNode>,
}

impl XmlNode {
    fn new(tag: &str) -> XmlNode {
        XmlNode {
            tag: tag.to_string(),
            ..XmlNode::default()
        }
    }

    fn kid(&self, tag: &str) -> Option<&XmlNode> {
        self.kids.iter().find(|k| k.tag == tag)
    }

    fn kid_text(&self, tag: &str) -> Option<&str> {
        self.kid(tag).map(|k| k.text.as_str())
    }
}

fn parse_tree(text: &str) -> Result<XmlNode, SchemaError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack = vec![XmlNode::new("")];
    loop {
        match reader.read_event(&mut buf)? {
            Event::Start(ref e) => {
                stack.push(XmlNode::new(&String::from_utf8_lossy(e.name())));
            }
            Event::Empty(ref e) => {
                let node = XmlNode::new(&String::from_utf8_lossy(e.name()));
                stack.last_mut().unwrap().kids.push(node);
            }
            Event::Text(ref e) => {
                let text = e.unescape_and_decode(&reader)?;
                stack.last_mut().unwrap().text.push_str(&text);
            }
            Event::End(_) => {
                let node = stack.pop().unwrap();
                if stack.is_empty() {
                    return Err(SchemaError::Malformed("unbalanced elements".into()));
                }
                stack.last_mut().unwrap().kids.push(node);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if stack.len() != 1 {
        return Err(SchemaError::Malformed("unterminated element".into()));
    }
    stack
        .pop()
        .unwrap()
        .kids
        .into_iter()
        .find(|n| n.tag == "server")
        .ok_or_else(|| SchemaError::Malformed("no server element".into()))
}

/// Parameter shape as reconstructed from its schema tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Table,
    List,
    File,
    Call,
    CallTable,
}

/// Client-side description of one remote parameter.
#[derive(Debug, Clone)]
pub struct Stub {
    pub name: String,
    pub pid: u16,
    pub code: TypeCode,
    pub shape: Shape,
    pub readable: bool,
    pub writable: bool,
    pub savable: bool,
    /// Table size (tables and call tables).
    pub size: u32,
    /// List capacity.
    pub maxsize: u32,
    pub scale: Vec<f64>,
    pub eid_enums: Vec<(u32, String)>,
    /// Value enumerations, numbers kept textual (the native width lives
    /// server-side).
    pub val_enums: Vec<(String, String)>,
}

/// Mirror of the server's container tree, holding stubs instead of live
/// parameters.
#[derive(Debug, Default)]
pub struct StubNode {
    pub name: String,
    pub children: Vec<StubNode>,
    pub stubs: Vec<Stub>,
}

impl StubNode {
    /// Resolve `/a/b/name` to a stub.
    pub fn find(&self, path: &str) -> Option<&Stub> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut node = self;
        let mut rest = path;
        while let Some((head, tail)) = rest.split_once('/') {
            node = node.children.iter().find(|c| c.name == head)?;
            rest = tail;
        }
        node.stubs.iter().find(|s| s.name == rest)
    }

    /// Every stub with its full path, in schema order.
    pub fn walk(&self) -> Vec<(String, &Stub)> {
        let mut out = Vec::new();
        self.walk_into("", &mut out);
        out
    }

    fn walk_into<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Stub)>) {
        for s in &self.stubs {
            out.push((format!("{prefix}/{}", s.name), s));
        }
        for c in &self.children {
            c.walk_into(&format!("{prefix}/{}", c.name), out);
        }
    }
}

/// A parsed schema document.
#[derive(Debug)]
pub struct SchemaDoc {
    pub name: String,
    pub version: String,
    pub root: StubNode,
}

pub fn parse(text: &str) -> Result<SchemaDoc, SchemaError> {
    let server = parse_tree(text)?;
    let name = server.kid_text("name").unwrap_or_default().to_string();
    let version = server.kid_text("version").unwrap_or_default().to_string();
    let root = build_node(&server, String::new());
    Ok(SchemaDoc {
        name,
        version,
        root,
    })
}

fn build_node(elt: &XmlNode, name: String) -> StubNode {
    let mut node = StubNode {
        name,
        ..StubNode::default()
    };
    for kid in &elt.kids {
        match kid.tag.as_str() {
            "name" | "version" => {}
            "cont" => {
                let cname = kid.kid_text("name").unwrap_or_default().to_string();
                if cname.is_empty() {
                    warn!(target: "parambus", "container without a name in schema");
                    continue;
                }
                node.children.push(build_node(kid, cname));
            }
            tag => match build_stub(kid, tag) {
                Some(stub) => node.stubs.push(stub),
                None => warn!(target: "parambus", "unrecognized schema element <{tag}>"),
            },
        }
    }
    node
}

fn scalar_code(tag: &str) -> Option<TypeCode> {
    Some(match tag {
        "bool" => TypeCode::Bool,
        "str" => TypeCode::Str,
        "s8" => TypeCode::I8,
        "s16" => TypeCode::I16,
        "s32" => TypeCode::I32,
        "s64" => TypeCode::I64,
        "u8" => TypeCode::U8,
        "u16" => TypeCode::U16,
        "u32" => TypeCode::U32,
        "u64" => TypeCode::U64,
        "f32" => TypeCode::F32,
        "f64" => TypeCode::F64,
        "s8a" => TypeCode::I8A,
        "s16a" => TypeCode::I16A,
        "s32a" => TypeCode::I32A,
        "s64a" => TypeCode::I64A,
        "u8a" => TypeCode::U8A,
        "u16a" => TypeCode::U16A,
        "u32a" => TypeCode::U32A,
        "u64a" => TypeCode::U64A,
        "v2f32" => TypeCode::V2F32,
        "v2f64" => TypeCode::V2F64,
        "v3f32" => TypeCode::V3F32,
        "v3f64" => TypeCode::V3F64,
        _ => return None,
    })
}

fn tag_kind(tag: &str) -> Option<(TypeCode, Shape)> {
    match tag {
        "call" => return Some((TypeCode::Call, Shape::Call)),
        "callt" => return Some((TypeCode::Call, Shape::CallTable)),
        "file" => return Some((TypeCode::File, Shape::File)),
        _ => {}
    }
    if let Some(code) = scalar_code(tag) {
        return Some((code, Shape::Scalar));
    }
    if let Some(base) = tag.strip_suffix('t') {
        if let Some(code) = scalar_code(base) {
            return Some((code, Shape::Table));
        }
    }
    if let Some(base) = tag.strip_suffix('l') {
        if let Some(code) = scalar_code(base) {
            return Some((code, Shape::List));
        }
    }
    None
}

fn parse_enum_pairs(elt: Option<&XmlNode>) -> Vec<(String, String)> {
    let Some(elt) = elt else {
        return Vec::new();
    };
    elt.kids
        .iter()
        .filter(|k| k.tag == "eq")
        .filter_map(|k| {
            let (num, name) = k.text.split_once(',')?;
            Some((num.to_string(), name.to_string()))
        })
        .collect()
}

fn build_stub(elt: &XmlNode, tag: &str) -> Option<Stub> {
    let (code, shape) = tag_kind(tag)?;
    let pid: u16 = elt.kid_text("pid")?.parse().ok()?;
    let name = elt.kid_text("name")?.to_string();
    let acc = elt.kid_text("acc").unwrap_or_default();
    let sav = elt.kid_text("sav").unwrap_or("No");

    let mut scale = Vec::new();
    if let Some(s) = elt.kid_text("scl").and_then(|s| s.parse().ok()) {
        scale.push(s);
    } else {
        for i in 0..3 {
            match elt.kid_text(&format!("scl{i}")).and_then(|s| s.parse().ok()) {
                Some(s) => scale.push(s),
                None => break,
            }
        }
    }

    let eid_enums = parse_enum_pairs(elt.kid("eidenums"))
        .into_iter()
        .filter_map(|(num, name)| Some((num.parse().ok()?, name)))
        .collect();

    Some(Stub {
        name,
        pid,
        code,
        shape,
        readable: acc.contains('R'),
        // calls carry no access element but answer their one verb
        writable: acc.contains('W') || shape == Shape::Call || shape == Shape::CallTable,
        savable: sav == "Yes",
        size: elt
            .kid_text("size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        maxsize: elt
            .kid_text("maxsize")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        scale,
        eid_enums,
        val_enums: parse_enum_pairs(elt.kid("valenums")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_cover_shapes() {
        assert_eq!(tag_kind("u32"), Some((TypeCode::U32, Shape::Scalar)));
        assert_eq!(tag_kind("u8t"), Some((TypeCode::U8, Shape::Table)));
        assert_eq!(tag_kind("s16l"), Some((TypeCode::I16, Shape::List)));
        assert_eq!(tag_kind("u8a"), Some((TypeCode::U8A, Shape::Scalar)));
        assert_eq!(tag_kind("v3f32"), Some((TypeCode::V3F32, Shape::Scalar)));
        assert_eq!(tag_kind("strt"), Some((TypeCode::Str, Shape::Table)));
        assert_eq!(tag_kind("callt"), Some((TypeCode::Call, Shape::CallTable)));
        assert_eq!(tag_kind("bogus"), None);
    }
}
