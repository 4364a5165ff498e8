//! Schema emission format and parse-back.

use std::sync::Arc;

use parambus::param::{EidEnum, List, Scalar, Table, ValEnum};
use parambus::schema::{self, Shape};
use parambus::tree::Container;
use parambus::{Parameter, TypeCode};

fn flatten(xml: &str) -> String {
    xml.lines().map(str::trim).collect()
}

#[test]
fn minimal_tree_emits_expected_elements() {
    let mut root = Container::root();
    let version = Scalar::<String>::new(
        "version",
        Some(Box::new(|| Ok("3.1".to_string()))),
        None,
    )
    .shared();
    root.child_mut("sys").add_param(version.clone());

    let text = schema::render("unit", "1.0", &root, &|p| {
        Arc::ptr_eq(p, &version).then_some(50)
    });

    let flat = flatten(&text);
    assert!(flat.contains(
        "<cont><name>sys</name>\
         <str><pid>50</pid><name>version</name><acc>R</acc><sav>No</sav></str>\
         </cont>"
    ));
    assert!(flat.starts_with("<server><name>unit</name><version>1.0</version>"));
    assert!(flat.ends_with("</server>"));
}

#[test]
fn unregistered_parameters_are_left_out() {
    let mut root = Container::root();
    let listed = Scalar::<u32>::new("listed", None, None).shared();
    let hidden = Scalar::<u32>::new("hidden", None, None).shared();
    root.add_param(listed.clone());
    root.add_param(hidden);

    let text = schema::render("unit", "1.0", &root, &|p| {
        Arc::ptr_eq(p, &listed).then_some(12)
    });
    assert!(text.contains("listed"));
    assert!(!text.contains("hidden"));
}

fn rich_tree() -> (Container, Vec<Arc<dyn Parameter>>) {
    let mut root = Container::root();
    let mut params: Vec<Arc<dyn Parameter>> = Vec::new();

    let mode = Scalar::<u8>::new("mode", Some(Box::new(|| Ok(1))), Some(Box::new(|_| Ok(()))))
        .savable()
        .with_val_enums(vec![ValEnum::new(0, "Off"), ValEnum::new(1, "Auto")])
        .shared();
    let gain = Table::<f32>::new("gain", 2, Some(Box::new(|_| Ok(0.5))), None)
        .with_eid_enums(vec![EidEnum::new(0, "Left"), EidEnum::new(1, "Right")])
        .shared();
    let peers = List::<i16>::new(
        "peers",
        8,
        Some(Box::new(|_| Err(parambus::ErrCode::Eid))),
        Some(Box::new(|_| Ok(()))),
        Some(Box::new(|_| Ok(()))),
    )
    .shared();
    let trim = Scalar::<f64>::new("trim", Some(Box::new(|| Ok(0.0))), None)
        .with_scale(&[0.001])
        .shared();
    let wind = Scalar::<[f32; 3]>::new("wind", Some(Box::new(|| Ok([0.0; 3]))), None).shared();
    let blob = Scalar::<Vec<u8>>::new("blob", Some(Box::new(|| Ok(vec![]))), None).shared();

    let ctl = root.child_mut("ctl");
    ctl.add_param(mode.clone());
    ctl.add_param(gain.clone());
    let net = root.child_mut("net");
    net.add_param(peers.clone());
    net.add_param(trim.clone());
    root.add_param(wind.clone());
    root.add_param(blob.clone());

    params.extend([mode, gain, peers, trim, wind, blob]);
    (root, params)
}

#[test]
fn parse_reverses_render() {
    let (root, params) = rich_tree();
    let text = schema::render("rig", "2.4", &root, &|p| {
        params
            .iter()
            .position(|q| Arc::ptr_eq(q, p))
            .map(|at| at as u16 + 20)
    });

    let doc = schema::parse(&text).unwrap();
    assert_eq!(doc.name, "rig");
    assert_eq!(doc.version, "2.4");

    let mode = doc.root.find("/ctl/mode").unwrap();
    assert_eq!(mode.pid, 20);
    assert_eq!(mode.code, TypeCode::U8);
    assert_eq!(mode.shape, Shape::Scalar);
    assert!(mode.readable && mode.writable && mode.savable);
    assert_eq!(
        mode.val_enums,
        vec![("0".into(), "Off".into()), ("1".into(), "Auto".into())]
    );

    let gain = doc.root.find("/ctl/gain").unwrap();
    assert_eq!(gain.shape, Shape::Table);
    assert_eq!(gain.code, TypeCode::F32);
    assert_eq!(gain.size, 2);
    assert!(gain.readable && !gain.writable);
    assert_eq!(gain.eid_enums[1], (1, "Right".into()));

    let peers = doc.root.find("/net/peers").unwrap();
    assert_eq!(peers.shape, Shape::List);
    assert_eq!(peers.code, TypeCode::I16);
    assert_eq!(peers.maxsize, 8);
    assert!(peers.writable);

    let trim = doc.root.find("/net/trim").unwrap();
    assert_eq!(trim.scale, vec![0.001]);

    let wind = doc.root.find("/wind").unwrap();
    assert_eq!(wind.code, TypeCode::V3F32);
    assert_eq!(wind.shape, Shape::Scalar);

    let blob = doc.root.find("/blob").unwrap();
    assert_eq!(blob.code, TypeCode::U8A);
    assert_eq!(blob.shape, Shape::Scalar);

    assert_eq!(doc.root.walk().len(), 6);
}

#[test]
fn names_are_escaped() {
    let mut root = Container::root();
    let p = Scalar::<u32>::new("a&b", None, None).shared();
    root.add_param(p.clone());
    let text = schema::render("x<y", "1", &root, &|q| Arc::ptr_eq(q, &p).then_some(0));
    assert!(text.contains("<name>a&amp;b</name>"));
    assert!(text.contains("<name>x&lt;y</name>"));

    let doc = schema::parse(&text).unwrap();
    assert_eq!(doc.name, "x<y");
    assert!(doc.root.find("/a&b").is_some());
}

#[test]
fn malformed_schema_is_rejected() {
    assert!(schema::parse("<server><name>x</name>").is_err());
    assert!(schema::parse("no xml at all").is_err());
}
