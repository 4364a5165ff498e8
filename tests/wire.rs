//! Codec round-trips and framing caps for cells and messages.

use parambus::device::{Device, MemDevice};
use parambus::value::{put_default, skip_value, TypeCode};
use parambus::wire::{Cell, Message, OpCode, CELL_PAYLOAD_MAX, FILE_CHUNK_MAX};
use parambus::WireValue;

fn round_trip<T: WireValue + std::fmt::Debug>(val: T) {
    let mut cell = Cell::new(OpCode::SetCmd);
    val.put(&mut cell).unwrap();
    let got = T::take(&mut cell).unwrap();
    assert_eq!(got, val);
    assert_eq!(cell.remaining(), 0, "no bytes left after {val:?}");
}

#[test]
fn primitive_round_trips() {
    round_trip(true);
    round_trip(false);
    round_trip(String::from("héllo"));
    round_trip(String::new());
    round_trip(i8::MIN);
    round_trip(i16::MIN);
    round_trip(i32::MIN);
    round_trip(i64::MIN);
    round_trip(u8::MAX);
    round_trip(u16::MAX);
    round_trip(u32::MAX);
    round_trip(u64::MAX);
    round_trip(std::f32::consts::PI);
    round_trip(1.0000000000000002f64);
    round_trip(vec![1i8, -1, 127]);
    round_trip(vec![0u64, u64::MAX]);
    round_trip(Vec::<u16>::new());
    round_trip([1.5f32, -2.5]);
    round_trip([1.5f64, -2.5, 1e300]);
}

#[test]
fn bool_normalizes_nonzero() {
    let mut cell = Cell::new(OpCode::SetCmd);
    cell.put_u8(7).unwrap();
    assert!(cell.take_bool().unwrap());
}

#[test]
fn integers_are_big_endian() {
    let mut cell = Cell::new(OpCode::SetCmd);
    cell.put_u32(0x01020304).unwrap();
    cell.put_i16(-2).unwrap();
    assert_eq!(cell.payload(), &[1, 2, 3, 4, 0xFF, 0xFE]);
}

#[test]
fn set_cmd_payload_byte_layout() {
    // set(pid=10, u32 0xDEADBEEF) -> 00 0A 12 DE AD BE EF
    let mut cell = Cell::new(OpCode::SetCmd);
    cell.put_u16(10).unwrap();
    cell.put_u8(TypeCode::U32.into()).unwrap();
    cell.put_u32(0xDEADBEEF).unwrap();
    assert_eq!(cell.payload(), &[0x00, 0x0A, 0x12, 0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn unterminated_string_fails() {
    let mut cell = Cell::new(OpCode::SetCmd);
    cell.put_u8(b'a').unwrap();
    cell.put_u8(b'b').unwrap();
    assert!(cell.take_str().is_err());
}

#[test]
fn cell_enforces_payload_cap() {
    let mut cell = Cell::new(OpCode::WriteCmd);
    let big = vec![0u8; CELL_PAYLOAD_MAX + 1];
    assert!(cell.put_bytes(&big).is_err());
    // and the cap itself is reachable minus the length prefix
    let fits = vec![0u8; CELL_PAYLOAD_MAX - 2];
    cell.put_bytes(&fits).unwrap();
}

#[test]
fn message_preserves_cell_order_and_transaction() {
    let mut msg = Message::new(42);
    for pid in [1u16, 2, 3] {
        let mut cell = Cell::new(OpCode::GetCmd);
        cell.put_u16(pid).unwrap();
        cell.put_u8(TypeCode::U32.into()).unwrap();
        msg.push(&cell).unwrap();
    }

    let (a, b) = MemDevice::pair();
    msg.send(&a).unwrap();

    let mut got = Message::default();
    got.recv(&b).unwrap();
    assert_eq!(got.transaction(), 42);
    for expect in [1u16, 2, 3] {
        let mut cell = got.next().unwrap().unwrap();
        assert_eq!(cell.opcode(), u8::from(OpCode::GetCmd));
        assert_eq!(cell.take_u16().unwrap(), expect);
    }
    assert!(got.next().is_none());
}

#[test]
fn one_maximal_cell_fits_one_message() {
    let mut cell = Cell::new(OpCode::ReadSts);
    cell.put_u16(3).unwrap();
    cell.put_u32(0).unwrap();
    cell.put_bytes(&vec![0xAB; FILE_CHUNK_MAX]).unwrap();
    cell.put_err(parambus::ErrCode::Ok).unwrap();
    assert_eq!(cell.payload().len(), CELL_PAYLOAD_MAX);

    let mut msg = Message::new(0);
    msg.push(&cell).unwrap();

    // a second cell cannot fit any more
    let mut tiny = Cell::new(OpCode::CallCmd);
    tiny.put_u16(0).unwrap();
    assert!(msg.push(&tiny).is_err());
}

#[test]
fn truncated_cell_is_an_error_not_a_panic() {
    let (a, b) = MemDevice::pair();
    // transaction byte + opcode + length claiming 4 bytes but only 1 present
    a.write(&[7, 0x02, 0x00, 0x04, 0xAA]).unwrap();
    let mut msg = Message::default();
    msg.recv(&b).unwrap();
    assert!(matches!(msg.next(), Some(Err(_))));
    assert!(msg.next().is_none());
}

#[test]
fn skip_and_default_stay_aligned_for_every_type() {
    let codes = [
        TypeCode::Call,
        TypeCode::Bool,
        TypeCode::Str,
        TypeCode::File,
        TypeCode::I8,
        TypeCode::I16,
        TypeCode::I32,
        TypeCode::I64,
        TypeCode::U8,
        TypeCode::U16,
        TypeCode::U32,
        TypeCode::U64,
        TypeCode::F32,
        TypeCode::F64,
        TypeCode::I8A,
        TypeCode::I16A,
        TypeCode::I32A,
        TypeCode::I64A,
        TypeCode::U8A,
        TypeCode::U16A,
        TypeCode::U32A,
        TypeCode::U64A,
        TypeCode::V2F32,
        TypeCode::V2F64,
        TypeCode::V3F32,
        TypeCode::V3F64,
    ];
    for code in codes {
        let mut cell = Cell::new(OpCode::SetCmd);
        put_default(&mut cell, code.into()).unwrap();
        cell.put_u8(0x5A).unwrap();
        skip_value(&mut cell, code.into()).unwrap();
        assert_eq!(cell.take_u8().unwrap(), 0x5A, "misaligned skip for {code:?}");
    }
}

#[test]
fn opcode_pairs() {
    assert_eq!(OpCode::CallCmd.status(), OpCode::CallSts);
    assert_eq!(OpCode::GetCmd.status(), OpCode::GetSts);
    assert_eq!(OpCode::WriteCmd.status(), OpCode::WriteSts);
    assert!(OpCode::try_from(0x14u8).is_err());
}
