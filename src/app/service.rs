//! Built-in RPC methods of the device.
//!
//! ```text
//!   ping()            -> "pong"
//!   sum(i32, i32)     -> i32       overflow is an error, never a wrap
//!   echo(str)         -> str
//!   devnull(str)      -> bool      always true, for throughput tests
//!   get_name()        -> str       advertised device name
//!   set_name(str)     -> bool      false if empty or over 32 bytes
//! ```
//!
//! The device name lives in an [`AsyncPreference`]; `set_name` only
//! updates the in-memory value and the persistence ticker writes it to
//! storage later. The new name is advertised after the next restart.

use std::sync::Arc;

use log::info;

use crate::app::ports::KvStore;
use crate::config::DEFAULT_DEVICE_NAME;
use crate::error::RpcError;
use crate::prefs::{AsyncPreference, PreferencePersister, TextBuf};
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::value::{Kind, Value};

pub const NAME_NAMESPACE: &str = "settings";
pub const NAME_KEY: &str = "ble_name";
pub const NAME_CAPACITY: usize = 32;

pub type DeviceName = TextBuf<NAME_CAPACITY>;

/// Device name preference, holding `default` until a stored name loads.
/// A default over [`NAME_CAPACITY`] bytes falls back to
/// [`DEFAULT_DEVICE_NAME`].
pub fn device_name_preference(
    store: Arc<dyn KvStore>,
    default: &str,
) -> (AsyncPreference<DeviceName>, PreferencePersister<DeviceName>) {
    let default = DeviceName::try_from(default)
        .or_else(|()| DeviceName::try_from(DEFAULT_DEVICE_NAME))
        .unwrap_or_default();
    AsyncPreference::new(store, NAME_NAMESPACE, NAME_KEY, default)
}

/// Register the built-in methods on `d`. `name` moves into the
/// `get_name`/`set_name` handlers.
pub fn register_builtin_methods(d: &mut Dispatcher, name: AsyncPreference<DeviceName>) {
    d.add_method("ping", &[], Kind::Str, |_, _| Ok(Value::from("pong")));

    d.add_method("sum", &[Kind::I32, Kind::I32], Kind::I32, |_, args| {
        let a: i32 = args.get(0)?;
        let b: i32 = args.get(1)?;
        a.checked_add(b)
            .map(Value::from)
            .ok_or_else(|| RpcError::handler("Integer overflow"))
    });

    d.add_method("echo", &[Kind::Str], Kind::Str, |_, args| {
        Ok(Value::from(args.str(0)?))
    });

    d.add_method("devnull", &[Kind::Str], Kind::Bool, |_, _| {
        Ok(Value::Bool(true))
    });

    let name = Arc::new(std::sync::Mutex::new(name));

    let reader = Arc::clone(&name);
    d.add_method("get_name", &[], Kind::Str, move |_, _| {
        let mut pref = reader.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Value::from(pref.get().as_str()))
    });

    d.add_method("set_name", &[Kind::Str], Kind::Bool, move |_, args| {
        let requested = args.str(0)?;
        let Ok(value) = DeviceName::try_from(requested) else {
            return Ok(Value::Bool(false));
        };
        if value.is_empty() {
            return Ok(Value::Bool(false));
        }
        name.lock().unwrap_or_else(|e| e.into_inner()).set(value);
        info!("service: device name set to '{}'", value);
        Ok(Value::Bool(true))
    });
}

// ── Tests ────────────────────────────────────────────────────
