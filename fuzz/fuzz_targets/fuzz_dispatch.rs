//! Fuzz target: `Dispatcher::dispatch`
//!
//! Arbitrary request bytes must always produce a well-formed
//! `{ok, result}` document and never panic.
//!
//! cargo fuzz run fuzz_dispatch

#![no_main]

use blerpc::rpc::dispatcher::Dispatcher;
use blerpc::rpc::value::{Kind, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut d = Dispatcher::new();
    d.add_method("add", &[Kind::I8, Kind::I8], Kind::I8, |_, args| {
        let a: i8 = args.get(0)?;
        let b: i8 = args.get(1)?;
        Ok(Value::from(a.wrapping_add(b)))
    });
    d.add_method("scale", &[Kind::F32, Kind::U64], Kind::F64, |_, args| {
        let f: f32 = args.get(0)?;
        let n: u64 = args.get(1)?;
        Ok(Value::from(f64::from(f) * n as f64))
    });
    d.add_method("echo", &[Kind::Str], Kind::Str, |_, args| {
        Ok(Value::from(args.str(0)?))
    });

    let response = d.dispatch(data);
    let doc: serde_json::Value =
        serde_json::from_slice(&response).expect("response is valid JSON");
    assert!(doc["ok"].is_boolean(), "response carries ok flag");
    assert!(doc.get("result").is_some(), "response carries result");
});
