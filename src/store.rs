//! Ready-made binding targets: shared cells a server can expose without
//! writing closures by hand. Each store hands out a parameter bound to
//! its own state and stays usable for direct access next to it.

use std::sync::{Arc, Mutex};

use crate::error::ErrCode;
use crate::param::{FileParam, List, Scalar, Table};
use crate::value::WireValue;

/// A single shared value.
#[derive(Clone)]
pub struct ScalarCell<T> {
    val: Arc<Mutex<T>>,
}

impl<T: WireValue> ScalarCell<T> {
    pub fn new(init: T) -> ScalarCell<T> {
        ScalarCell {
            val: Arc::new(Mutex::new(init)),
        }
    }

    pub fn get(&self) -> T {
        self.val.lock().unwrap().clone()
    }

    pub fn set(&self, v: T) {
        *self.val.lock().unwrap() = v;
    }

    /// A read/write parameter bound to this cell.
    pub fn param(&self, name: &str) -> Scalar<T> {
        let rd = self.clone();
        let wr = self.clone();
        Scalar::new(
            name,
            Some(Box::new(move || Ok(rd.get()))),
            Some(Box::new(move |v| {
                wr.set(v);
                Ok(())
            })),
        )
    }

    /// A read-only parameter bound to this cell.
    pub fn param_ro(&self, name: &str) -> Scalar<T> {
        let rd = self.clone();
        Scalar::new(name, Some(Box::new(move || Ok(rd.get()))), None)
    }
}

/// A fixed-size row of shared values.
#[derive(Clone)]
pub struct TableStore<T> {
    rows: Arc<Mutex<Vec<T>>>,
}

impl<T: WireValue> TableStore<T> {
    pub fn new(size: u32, init: T) -> TableStore<T> {
        TableStore {
            rows: Arc::new(Mutex::new(vec![init; size as usize])),
        }
    }

    pub fn size(&self) -> u32 {
        self.rows.lock().unwrap().len() as u32
    }

    pub fn get(&self, eid: u32) -> Result<T, ErrCode> {
        self.rows
            .lock()
            .unwrap()
            .get(eid as usize)
            .cloned()
            .ok_or(ErrCode::Eid)
    }

    pub fn set(&self, eid: u32, v: T) -> Result<(), ErrCode> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows.get_mut(eid as usize).ok_or(ErrCode::Eid)?;
        *slot = v;
        Ok(())
    }

    pub fn param(&self, name: &str) -> Table<T> {
        let rd = self.clone();
        let wr = self.clone();
        Table::new(
            name,
            self.size(),
            Some(Box::new(move |eid| rd.get(eid))),
            Some(Box::new(move |eid, v| wr.set(eid, v))),
        )
    }
}

/// A bounded set without duplicates.
#[derive(Clone)]
pub struct ListStore<T> {
    max: u32,
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: WireValue> ListStore<T> {
    pub fn new(max: u32) -> ListStore<T> {
        ListStore {
            max,
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> u32 {
        self.items.lock().unwrap().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn get(&self, eid: u32) -> Result<T, ErrCode> {
        self.items
            .lock()
            .unwrap()
            .get(eid as usize)
            .cloned()
            .ok_or(ErrCode::Eid)
    }

    pub fn add(&self, v: T) -> Result<(), ErrCode> {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.max as usize {
            return Err(ErrCode::Unspec);
        }
        if items.contains(&v) {
            return Err(ErrCode::Unspec);
        }
        items.push(v);
        Ok(())
    }

    pub fn sub(&self, v: T) -> Result<(), ErrCode> {
        let mut items = self.items.lock().unwrap();
        if items.is_empty() {
            return Err(ErrCode::Unspec);
        }
        match items.iter().position(|x| *x == v) {
            Some(at) => {
                items.remove(at);
                Ok(())
            }
            None => Err(ErrCode::NotFound),
        }
    }

    pub fn param(&self, name: &str) -> List<T> {
        let rd = self.clone();
        let add = self.clone();
        let sub = self.clone();
        List::new(
            name,
            self.max,
            Some(Box::new(move |eid| rd.get(eid))),
            Some(Box::new(move |v| add.add(v))),
            Some(Box::new(move |v| sub.sub(v))),
        )
    }
}

/// A variable-length run with a capacity cap.
#[derive(Clone)]
pub struct ArrayStore<T> {
    max: usize,
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: WireValue> ArrayStore<T>
where
    Vec<T>: WireValue,
{
    pub fn new(max: usize) -> ArrayStore<T> {
        ArrayStore {
            max,
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn set(&self, v: Vec<T>) -> Result<(), ErrCode> {
        if v.len() > self.max {
            return Err(ErrCode::Overflow);
        }
        *self.items.lock().unwrap() = v;
        Ok(())
    }

    pub fn param(&self, name: &str) -> Scalar<Vec<T>> {
        let rd = self.clone();
        let wr = self.clone();
        Scalar::new(
            name,
            Some(Box::new(move || Ok(rd.get()))),
            Some(Box::new(move |v| wr.set(v))),
        )
    }
}

/// An in-memory byte region with file read/write semantics: reads short
/// at the end, seeks past the end fail with `Range`, writes may extend.
#[derive(Clone)]
pub struct FileStore {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl FileStore {
    pub fn new(initial: &[u8]) -> FileStore {
        FileStore {
            bytes: Arc::new(Mutex::new(initial.to_vec())),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn read(&self, offset: u32, maxlen: u16) -> Result<Vec<u8>, ErrCode> {
        let bytes = self.bytes.lock().unwrap();
        let offset = offset as usize;
        if offset > bytes.len() {
            return Err(ErrCode::Range);
        }
        let end = (offset + maxlen as usize).min(bytes.len());
        Ok(bytes[offset..end].to_vec())
    }

    pub fn write(&self, offset: u32, data: &[u8]) -> Result<(), ErrCode> {
        let mut bytes = self.bytes.lock().unwrap();
        let offset = offset as usize;
        if offset > bytes.len() {
            return Err(ErrCode::Range);
        }
        let end = offset + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn param(&self, name: &str) -> FileParam {
        let rd = self.clone();
        let wr = self.clone();
        FileParam::new(
            name,
            Some(Box::new(move |off, maxlen| rd.read(off, maxlen))),
            Some(Box::new(move |off, data| wr.write(off, data))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_semantics() {
        let list = ListStore::<i16>::new(2);
        assert_eq!(list.add(5), Ok(()));
        assert_eq!(list.add(5), Err(ErrCode::Unspec));
        assert_eq!(list.add(6), Ok(()));
        assert_eq!(list.add(7), Err(ErrCode::Unspec));
        assert_eq!(list.sub(99), Err(ErrCode::NotFound));
        assert_eq!(list.sub(5), Ok(()));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0), Ok(6));
        assert_eq!(list.get(1), Err(ErrCode::Eid));
    }

    #[test]
    fn file_ranges() {
        let file = FileStore::new(b"hello world");
        assert_eq!(file.read(0, 5).unwrap(), b"hello");
        assert_eq!(file.read(6, 100).unwrap(), b"world");
        assert_eq!(file.read(11, 4).unwrap(), b"");
        assert_eq!(file.read(12, 4), Err(ErrCode::Range));
        file.write(6, b"there").unwrap();
        assert_eq!(file.contents(), b"hello there");
        file.write(11, b"!").unwrap();
        assert_eq!(file.contents(), b"hello there!");
    }
}
