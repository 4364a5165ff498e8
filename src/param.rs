//! The parameter model: a closed set of shapes (scalar, table, list,
//! array, file, call) over the closed set of wire value types.
//!
//! Every parameter binds to user state through closures; an absent closure
//! means not-readable or not-writable and answers `Access`. The wire verbs
//! are dispatched by the server onto the `Parameter` trait; default trait
//! bodies answer wrong-shape verbs with a well-formed `Type` status cell,
//! draining any inbound value first so framing stays aligned.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::ErrCode;
use crate::schema::xml_escape;
use crate::tree::valid_name;
use crate::value::{put_default, skip_value, TypeCode, WireValue};
use crate::wire::{Cell, WireError, FILE_CHUNK_MAX};

pub type GetFn<T> = Box<dyn Fn() -> Result<T, ErrCode> + Send + Sync>;
pub type SetFn<T> = Box<dyn Fn(T) -> Result<(), ErrCode> + Send + Sync>;
pub type IdxGetFn<T> = Box<dyn Fn(u32) -> Result<T, ErrCode> + Send + Sync>;
pub type IdxSetFn<T> = Box<dyn Fn(u32, T) -> Result<(), ErrCode> + Send + Sync>;
pub type ElemFn<T> = Box<dyn Fn(T) -> Result<(), ErrCode> + Send + Sync>;
pub type CallFn = Box<dyn Fn() -> Result<(), ErrCode> + Send + Sync>;
pub type IdxCallFn = Box<dyn Fn(u32) -> Result<(), ErrCode> + Send + Sync>;
pub type FileReadFn = Box<dyn Fn(u32, u16) -> Result<Vec<u8>, ErrCode> + Send + Sync>;
pub type FileWriteFn = Box<dyn Fn(u32, &[u8]) -> Result<(), ErrCode> + Send + Sync>;

/// Value enumeration entry: number <-> display name.
#[derive(Debug, Clone)]
pub struct ValEnum<T> {
    pub num: T,
    pub name: String,
}

impl<T> ValEnum<T> {
    pub fn new(num: T, name: &str) -> ValEnum<T> {
        ValEnum {
            num,
            name: name.to_string(),
        }
    }
}

/// Index enumeration entry for tables: element id <-> display name.
#[derive(Debug, Clone)]
pub struct EidEnum {
    pub num: u32,
    pub name: String,
}

impl EidEnum {
    pub fn new(num: u32, name: &str) -> EidEnum {
        EidEnum {
            num,
            name: name.to_string(),
        }
    }
}

fn access_str(readable: bool, writable: bool) -> &'static str {
    match (readable, writable) {
        (false, false) => "",
        (true, false) => "R",
        (false, true) => "W",
        (true, true) => "RW",
    }
}

/// One verb-answering node in the tree, addressed on the wire by PID.
pub trait Parameter: Send + Sync {
    fn name(&self) -> &str;
    fn type_code(&self) -> TypeCode;
    fn readable(&self) -> bool;
    fn writable(&self) -> bool;

    fn savable(&self) -> bool {
        false
    }

    fn is_table(&self) -> bool {
        false
    }

    fn is_list(&self) -> bool {
        false
    }

    /// Table size / list capacity; 0 for unindexed shapes.
    fn num_eids(&self) -> u32 {
        0
    }

    fn call_cell(&self, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_err(ErrCode::Type)
    }

    fn icall_cell(&self, _eid: u32, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_err(ErrCode::Type)
    }

    fn get_cell(&self, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_u8(self.type_code().into())?;
        put_default(ocell, self.type_code().into())?;
        ocell.put_err(ErrCode::Type)
    }

    fn set_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        skip_value(icell, raw)?;
        ocell.put_err(ErrCode::Type)
    }

    fn iget_cell(&self, _eid: u32, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_u8(self.type_code().into())?;
        put_default(ocell, self.type_code().into())?;
        ocell.put_err(ErrCode::Type)
    }

    fn iset_cell(&self, _eid: u32, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        skip_value(icell, raw)?;
        ocell.put_err(ErrCode::Type)
    }

    fn add_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        skip_value(icell, raw)?;
        ocell.put_err(ErrCode::Type)
    }

    fn sub_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        skip_value(icell, raw)?;
        ocell.put_err(ErrCode::Type)
    }

    fn read_cell(
        &self,
        _offset: u32,
        _maxlen: u16,
        _icell: &mut Cell,
        ocell: &mut Cell,
    ) -> Result<(), WireError> {
        ocell.put_bytes(&[])?;
        ocell.put_err(ErrCode::Type)
    }

    fn write_cell(&self, _offset: u32, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        icell.take_bytes()?;
        ocell.put_err(ErrCode::Type)
    }

    /// Configuration-form value: bare number, or a quoted enum name when a
    /// value enumeration matches.
    fn get_text(&self) -> Result<String, ErrCode> {
        Err(ErrCode::Type)
    }

    /// Accepts the same forms `get_text` produces.
    fn set_text(&self, _val: &str) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    fn iget_text(&self, _eid: u32) -> Result<String, ErrCode> {
        Err(ErrCode::Type)
    }

    fn iset_text(&self, _eid: u32, _val: &str) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    fn add_text(&self, _val: &str) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    fn sub_text(&self, _val: &str) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    /// Local (non-wire) call, used by the text query protocol.
    fn invoke(&self) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    fn invoke_at(&self, _eid: u32) -> Result<(), ErrCode> {
        Err(ErrCode::Type)
    }

    fn eid_name(&self, _eid: u32) -> Option<String> {
        None
    }

    fn eid_by_name(&self, _name: &str) -> Option<u32> {
        None
    }

    /// Emit this parameter's schema element.
    fn describe(&self, out: &mut String, indent: usize, pid: u16);
}

fn describe_head(out: &mut String, indent: usize, tag: &str, pid: u16, name: &str) {
    let ind = " ".repeat(indent);
    let _ = writeln!(out, "{ind}<{tag}>");
    let _ = writeln!(out, "{ind}  <pid>{pid}</pid>");
    let _ = writeln!(out, "{ind}  <name>{}</name>", xml_escape(name));
}

fn describe_access(out: &mut String, indent: usize, readable: bool, writable: bool, savable: bool) {
    let ind = " ".repeat(indent);
    let _ = writeln!(out, "{ind}  <acc>{}</acc>", access_str(readable, writable));
    let _ = writeln!(out, "{ind}  <sav>{}</sav>", if savable { "Yes" } else { "No" });
}

fn describe_val_enums<T: WireValue>(out: &mut String, indent: usize, enums: &[ValEnum<T>]) {
    if enums.is_empty() {
        return;
    }
    let ind = " ".repeat(indent);
    let _ = writeln!(out, "{ind}  <valenums>");
    for e in enums {
        let _ = writeln!(
            out,
            "{ind}    <eq>{},{}</eq>",
            e.num.to_text(),
            xml_escape(&e.name)
        );
    }
    let _ = writeln!(out, "{ind}  </valenums>");
}

fn describe_eid_enums(out: &mut String, indent: usize, enums: &[EidEnum]) {
    if enums.is_empty() {
        return;
    }
    let ind = " ".repeat(indent);
    let _ = writeln!(out, "{ind}  <eidenums>");
    for e in enums {
        let _ = writeln!(out, "{ind}    <eq>{},{}</eq>", e.num, xml_escape(&e.name));
    }
    let _ = writeln!(out, "{ind}  </eidenums>");
}

fn describe_scale(out: &mut String, indent: usize, scale: &[f64]) {
    let ind = " ".repeat(indent);
    match scale {
        [] => {}
        [s] => {
            let _ = writeln!(out, "{ind}  <scl>{s}</scl>");
        }
        many => {
            for (i, s) in many.iter().enumerate() {
                let _ = writeln!(out, "{ind}  <scl{i}>{s}</scl{i}>");
            }
        }
    }
}

fn describe_tail(out: &mut String, indent: usize, tag: &str) {
    let _ = writeln!(out, "{}</{tag}>", " ".repeat(indent));
}

fn enum_name<T: WireValue>(enums: &[ValEnum<T>], val: &T) -> Option<String> {
    enums.iter().find(|e| e.num == *val).map(|e| e.name.clone())
}

fn enum_num<T: WireValue>(enums: &[ValEnum<T>], name: &str) -> Option<T> {
    enums.iter().find(|e| e.name == name).map(|e| e.num.clone())
}

/// Render a read value in configuration form, honoring value enums.
fn value_text<T: WireValue>(enums: &[ValEnum<T>], val: &T) -> Result<String, ErrCode> {
    if enums.is_empty() {
        return Ok(val.to_text());
    }
    match enum_name(enums, val) {
        Some(name) => Ok(format!("\"{name}\"")),
        None => Err(ErrCode::Range),
    }
}

/// Parse configuration text back to a value, honoring value enums: quoted
/// input is an enum literal; bare input is parsed and range-checked when
/// an enumeration exists.
fn value_from_text<T: WireValue>(enums: &[ValEnum<T>], text: &str) -> Result<T, ErrCode> {
    if let Some(lit) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        if !enums.is_empty() {
            return enum_num(enums, lit).ok_or(ErrCode::Range);
        }
        // strings take the quoted form without an enumeration
        return T::parse_text(text).ok_or(ErrCode::Unspec);
    }
    let val = T::parse_text(text).ok_or(ErrCode::Unspec)?;
    if !enums.is_empty() && enum_name(enums, &val).is_none() {
        return Err(ErrCode::Range);
    }
    Ok(val)
}

//
// Scalar (also covers arrays, which are scalars of Vec<T>)
//

pub struct Scalar<T: WireValue> {
    name: String,
    get: Option<GetFn<T>>,
    set: Option<SetFn<T>>,
    savable: bool,
    scale: Vec<f64>,
    val_enums: Vec<ValEnum<T>>,
}

impl<T: WireValue> Scalar<T> {
    pub fn new(name: &str, get: Option<GetFn<T>>, set: Option<SetFn<T>>) -> Scalar<T> {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        Scalar {
            name: name.to_string(),
            get,
            set,
            savable: false,
            scale: Vec::new(),
            val_enums: Vec::new(),
        }
    }

    pub fn savable(mut self) -> Self {
        self.savable = true;
        self
    }

    /// Display scaling advertised in the schema; one entry for plain
    /// floats, one per component for vectors.
    pub fn with_scale(mut self, scale: &[f64]) -> Self {
        self.scale = scale.to_vec();
        self
    }

    pub fn with_val_enums(mut self, enums: Vec<ValEnum<T>>) -> Self {
        self.val_enums = enums;
        self
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }

    fn fetch(&self) -> (T, ErrCode) {
        match &self.get {
            Some(f) => match f() {
                Ok(v) => (v, ErrCode::Ok),
                Err(e) => (T::default_value(), e),
            },
            None => (T::default_value(), ErrCode::Access),
        }
    }

    fn store(&self, val: T) -> ErrCode {
        match &self.set {
            Some(f) => ErrCode::of(f(val)),
            None => ErrCode::Access,
        }
    }
}

impl<T: WireValue> Parameter for Scalar<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        T::CODE
    }

    fn readable(&self) -> bool {
        self.get.is_some()
    }

    fn writable(&self) -> bool {
        self.set.is_some()
    }

    fn savable(&self) -> bool {
        self.savable
    }

    fn get_cell(&self, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let (val, err) = self.fetch();
        ocell.put_u8(T::CODE.into())?;
        val.put(ocell)?;
        ocell.put_err(err)
    }

    fn set_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        if raw != u8::from(T::CODE) {
            skip_value(icell, raw)?;
            return ocell.put_err(ErrCode::Type);
        }
        let val = T::take(icell)?;
        ocell.put_err(self.store(val))
    }

    fn get_text(&self) -> Result<String, ErrCode> {
        if self.get.is_none() {
            return Err(ErrCode::Access);
        }
        let (val, err) = self.fetch();
        if err != ErrCode::Ok {
            return Err(err);
        }
        value_text(&self.val_enums, &val)
    }

    fn set_text(&self, text: &str) -> Result<(), ErrCode> {
        if self.set.is_none() {
            return Err(ErrCode::Access);
        }
        let val = value_from_text(&self.val_enums, text)?;
        match self.store(val) {
            ErrCode::Ok => Ok(()),
            e => Err(e),
        }
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        describe_head(out, indent, T::TAG, pid, &self.name);
        describe_access(out, indent, self.readable(), self.writable(), self.savable);
        describe_scale(out, indent, &self.scale);
        describe_val_enums(out, indent, &self.val_enums);
        describe_tail(out, indent, T::TAG);
    }
}

//
// Table
//

pub struct Table<T: WireValue> {
    name: String,
    get: Option<IdxGetFn<T>>,
    set: Option<IdxSetFn<T>>,
    size: u32,
    savable: bool,
    eid_enums: Vec<EidEnum>,
    val_enums: Vec<ValEnum<T>>,
}

impl<T: WireValue> Table<T> {
    pub fn new(
        name: &str,
        size: u32,
        get: Option<IdxGetFn<T>>,
        set: Option<IdxSetFn<T>>,
    ) -> Table<T> {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        Table {
            name: name.to_string(),
            get,
            set,
            size,
            savable: false,
            eid_enums: Vec::new(),
            val_enums: Vec::new(),
        }
    }

    pub fn savable(mut self) -> Self {
        self.savable = true;
        self
    }

    pub fn with_eid_enums(mut self, enums: Vec<EidEnum>) -> Self {
        self.eid_enums = enums;
        self
    }

    pub fn with_val_enums(mut self, enums: Vec<ValEnum<T>>) -> Self {
        self.val_enums = enums;
        self
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }

    fn fetch(&self, eid: u32) -> (T, ErrCode) {
        if eid >= self.size {
            return (T::default_value(), ErrCode::Eid);
        }
        match &self.get {
            Some(f) => match f(eid) {
                Ok(v) => (v, ErrCode::Ok),
                Err(e) => (T::default_value(), e),
            },
            None => (T::default_value(), ErrCode::Access),
        }
    }

    fn store(&self, eid: u32, val: T) -> ErrCode {
        if eid >= self.size {
            return ErrCode::Eid;
        }
        match &self.set {
            Some(f) => ErrCode::of(f(eid, val)),
            None => ErrCode::Access,
        }
    }
}

impl<T: WireValue> Parameter for Table<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        T::CODE
    }

    fn readable(&self) -> bool {
        self.get.is_some()
    }

    fn writable(&self) -> bool {
        self.set.is_some()
    }

    fn savable(&self) -> bool {
        self.savable
    }

    fn is_table(&self) -> bool {
        true
    }

    fn num_eids(&self) -> u32 {
        self.size
    }

    fn iget_cell(&self, eid: u32, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let (val, err) = self.fetch(eid);
        ocell.put_u8(T::CODE.into())?;
        val.put(ocell)?;
        ocell.put_err(err)
    }

    fn iset_cell(&self, eid: u32, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let raw = icell.take_u8()?;
        if raw != u8::from(T::CODE) {
            skip_value(icell, raw)?;
            return ocell.put_err(ErrCode::Type);
        }
        let val = T::take(icell)?;
        ocell.put_err(self.store(eid, val))
    }

    fn iget_text(&self, eid: u32) -> Result<String, ErrCode> {
        if self.get.is_none() {
            return Err(ErrCode::Access);
        }
        let (val, err) = self.fetch(eid);
        if err != ErrCode::Ok {
            return Err(err);
        }
        value_text(&self.val_enums, &val)
    }

    fn iset_text(&self, eid: u32, text: &str) -> Result<(), ErrCode> {
        if self.set.is_none() {
            return Err(ErrCode::Access);
        }
        let val = value_from_text(&self.val_enums, text)?;
        match self.store(eid, val) {
            ErrCode::Ok => Ok(()),
            e => Err(e),
        }
    }

    fn eid_name(&self, eid: u32) -> Option<String> {
        self.eid_enums
            .iter()
            .find(|e| e.num == eid)
            .map(|e| e.name.clone())
    }

    fn eid_by_name(&self, name: &str) -> Option<u32> {
        self.eid_enums.iter().find(|e| e.name == name).map(|e| e.num)
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        let tag = format!("{}t", T::TAG);
        describe_head(out, indent, &tag, pid, &self.name);
        describe_access(out, indent, self.readable(), self.writable(), self.savable);
        let _ = writeln!(out, "{}  <size>{}</size>", " ".repeat(indent), self.size);
        describe_eid_enums(out, indent, &self.eid_enums);
        describe_val_enums(out, indent, &self.val_enums);
        describe_tail(out, indent, &tag);
    }
}

//
// List
//

pub struct List<T: WireValue> {
    name: String,
    get: Option<IdxGetFn<T>>,
    add: Option<ElemFn<T>>,
    sub: Option<ElemFn<T>>,
    maxsize: u32,
    savable: bool,
    val_enums: Vec<ValEnum<T>>,
}

impl<T: WireValue> List<T> {
    pub fn new(
        name: &str,
        maxsize: u32,
        get: Option<IdxGetFn<T>>,
        add: Option<ElemFn<T>>,
        sub: Option<ElemFn<T>>,
    ) -> List<T> {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        List {
            name: name.to_string(),
            get,
            add,
            sub,
            maxsize,
            savable: false,
            val_enums: Vec::new(),
        }
    }

    pub fn savable(mut self) -> Self {
        self.savable = true;
        self
    }

    pub fn with_val_enums(mut self, enums: Vec<ValEnum<T>>) -> Self {
        self.val_enums = enums;
        self
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }

    fn apply(&self, f: &Option<ElemFn<T>>, val: T) -> ErrCode {
        match f {
            Some(f) => ErrCode::of(f(val)),
            None => ErrCode::Access,
        }
    }

    fn take_elem(
        &self,
        icell: &mut Cell,
        ocell: &mut Cell,
    ) -> Result<Option<T>, WireError> {
        let raw = icell.take_u8()?;
        if raw != u8::from(T::CODE) {
            skip_value(icell, raw)?;
            ocell.put_err(ErrCode::Type)?;
            return Ok(None);
        }
        Ok(Some(T::take(icell)?))
    }
}

impl<T: WireValue> Parameter for List<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        T::CODE
    }

    fn readable(&self) -> bool {
        self.get.is_some()
    }

    fn writable(&self) -> bool {
        self.add.is_some() && self.sub.is_some()
    }

    fn savable(&self) -> bool {
        self.savable
    }

    fn is_list(&self) -> bool {
        true
    }

    fn num_eids(&self) -> u32 {
        self.maxsize
    }

    /// Enumeration step: the binding signals the end of the list with an
    /// error status, which the client treats as end-of-enumeration.
    fn iget_cell(&self, eid: u32, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let (val, err) = match &self.get {
            Some(f) => match f(eid) {
                Ok(v) => (v, ErrCode::Ok),
                Err(e) => (T::default_value(), e),
            },
            None => (T::default_value(), ErrCode::Access),
        };
        ocell.put_u8(T::CODE.into())?;
        val.put(ocell)?;
        ocell.put_err(err)
    }

    fn add_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        match self.take_elem(icell, ocell)? {
            Some(val) => ocell.put_err(self.apply(&self.add, val)),
            None => Ok(()),
        }
    }

    fn sub_cell(&self, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        match self.take_elem(icell, ocell)? {
            Some(val) => ocell.put_err(self.apply(&self.sub, val)),
            None => Ok(()),
        }
    }

    fn iget_text(&self, eid: u32) -> Result<String, ErrCode> {
        let f = self.get.as_ref().ok_or(ErrCode::Access)?;
        let val = f(eid)?;
        value_text(&self.val_enums, &val)
    }

    fn add_text(&self, text: &str) -> Result<(), ErrCode> {
        if self.add.is_none() {
            return Err(ErrCode::Access);
        }
        let val = value_from_text(&self.val_enums, text)?;
        match self.apply(&self.add, val) {
            ErrCode::Ok => Ok(()),
            e => Err(e),
        }
    }

    fn sub_text(&self, text: &str) -> Result<(), ErrCode> {
        if self.sub.is_none() {
            return Err(ErrCode::Access);
        }
        let val = value_from_text(&self.val_enums, text)?;
        match self.apply(&self.sub, val) {
            ErrCode::Ok => Ok(()),
            e => Err(e),
        }
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        let tag = format!("{}l", T::TAG);
        describe_head(out, indent, &tag, pid, &self.name);
        describe_access(out, indent, self.readable(), self.writable(), self.savable);
        let _ = writeln!(
            out,
            "{}  <maxsize>{}</maxsize>",
            " ".repeat(indent),
            self.maxsize
        );
        describe_val_enums(out, indent, &self.val_enums);
        describe_tail(out, indent, &tag);
    }
}

//
// Call / CallTable
//

pub struct Call {
    name: String,
    call: Option<CallFn>,
}

impl Call {
    pub fn new(name: &str, call: Option<CallFn>) -> Call {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        Call {
            name: name.to_string(),
            call,
        }
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }
}

impl Parameter for Call {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        TypeCode::Call
    }

    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        self.call.is_some()
    }

    fn call_cell(&self, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_err(ErrCode::of(self.invoke()))
    }

    fn invoke(&self) -> Result<(), ErrCode> {
        match &self.call {
            Some(f) => f(),
            None => Err(ErrCode::Access),
        }
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        describe_head(out, indent, "call", pid, &self.name);
        describe_tail(out, indent, "call");
    }
}

pub struct CallTable {
    name: String,
    call: Option<IdxCallFn>,
    size: u32,
    eid_enums: Vec<EidEnum>,
}

impl CallTable {
    pub fn new(name: &str, size: u32, call: Option<IdxCallFn>) -> CallTable {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        CallTable {
            name: name.to_string(),
            call,
            size,
            eid_enums: Vec::new(),
        }
    }

    pub fn with_eid_enums(mut self, enums: Vec<EidEnum>) -> Self {
        self.eid_enums = enums;
        self
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }
}

impl Parameter for CallTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        TypeCode::Call
    }

    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        self.call.is_some()
    }

    fn is_table(&self) -> bool {
        true
    }

    fn num_eids(&self) -> u32 {
        self.size
    }

    fn icall_cell(&self, eid: u32, _icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        ocell.put_err(ErrCode::of(self.invoke_at(eid)))
    }

    fn invoke_at(&self, eid: u32) -> Result<(), ErrCode> {
        if eid >= self.size {
            return Err(ErrCode::Eid);
        }
        match &self.call {
            Some(f) => f(eid),
            None => Err(ErrCode::Access),
        }
    }

    fn eid_name(&self, eid: u32) -> Option<String> {
        self.eid_enums
            .iter()
            .find(|e| e.num == eid)
            .map(|e| e.name.clone())
    }

    fn eid_by_name(&self, name: &str) -> Option<u32> {
        self.eid_enums.iter().find(|e| e.name == name).map(|e| e.num)
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        describe_head(out, indent, "callt", pid, &self.name);
        let _ = writeln!(out, "{}  <size>{}</size>", " ".repeat(indent), self.size);
        describe_eid_enums(out, indent, &self.eid_enums);
        describe_tail(out, indent, "callt");
    }
}

//
// File
//

pub struct FileParam {
    name: String,
    read: Option<FileReadFn>,
    write: Option<FileWriteFn>,
}

impl FileParam {
    pub fn new(name: &str, read: Option<FileReadFn>, write: Option<FileWriteFn>) -> FileParam {
        assert!(valid_name(name), "invalid parameter name {name:?}");
        FileParam {
            name: name.to_string(),
            read,
            write,
        }
    }

    pub fn shared(self) -> Arc<dyn Parameter> {
        Arc::new(self)
    }
}

impl Parameter for FileParam {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_code(&self) -> TypeCode {
        TypeCode::File
    }

    fn readable(&self) -> bool {
        self.read.is_some()
    }

    fn writable(&self) -> bool {
        self.write.is_some()
    }

    fn read_cell(
        &self,
        offset: u32,
        maxlen: u16,
        _icell: &mut Cell,
        ocell: &mut Cell,
    ) -> Result<(), WireError> {
        let maxlen = maxlen.min(FILE_CHUNK_MAX as u16);
        let (bytes, err) = match &self.read {
            Some(f) => match f(offset, maxlen) {
                Ok(b) => (b, ErrCode::Ok),
                Err(e) => (Vec::new(), e),
            },
            None => (Vec::new(), ErrCode::Access),
        };
        ocell.put_bytes(&bytes)?;
        ocell.put_err(err)
    }

    fn write_cell(&self, offset: u32, icell: &mut Cell, ocell: &mut Cell) -> Result<(), WireError> {
        let bytes = icell.take_bytes()?;
        let err = match &self.write {
            Some(f) => ErrCode::of(f(offset, &bytes)),
            None => ErrCode::Access,
        };
        ocell.put_err(err)
    }

    fn describe(&self, out: &mut String, indent: usize, pid: u16) {
        describe_head(out, indent, "file", pid, &self.name);
        describe_access(out, indent, self.readable(), self.writable(), false);
        describe_tail(out, indent, "file");
    }
}
