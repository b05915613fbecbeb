//! JSON RPC dispatcher: named methods with typed signatures.
//!
//! Request and response documents:
//!
//! ```text
//! → {"method": "add", "args": [1, 2]}
//! ← {"ok": true,  "result": 3}
//! ← {"ok": false, "result": "Argument type mismatch"}
//! ```
//!
//! Each method is registered with the [`Kind`] of every parameter and of
//! its result. A call passes through four gates before the handler runs:
//! document parse, method lookup, argument count, argument kinds. Any
//! failure, including a handler error, becomes an `{ok:false}` document
//! whose `result` is the error's display string; nothing escapes to the
//! transport.
//!
//! Handlers receive a mutable context `C` supplied per call, which lets a
//! transport pass session state (e.g. the auth session of the calling
//! connection) without the dispatcher knowing about sessions.

extern crate alloc;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{debug, warn};
use serde::Serialize;

use super::value::{Args, Kind, Value};
use crate::error::RpcError;

/// Bound callable of one method.
pub type Handler<C> = Box<dyn FnMut(&mut C, &Args) -> Result<Value, RpcError> + Send>;

struct MethodEntry<C> {
    params: Vec<Kind>,
    returns: Kind,
    handler: Handler<C>,
}

#[derive(Serialize)]
struct Response {
    ok: bool,
    result: Value,
}

/// Sent if the response document itself cannot be encoded.
const ENCODE_FAILURE: &[u8] = br#"{"ok":false,"result":"Internal error"}"#;

pub struct Dispatcher<C = ()> {
    methods: BTreeMap<String, MethodEntry<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    /// Register `handler` under `name`. A later registration with the same
    /// name replaces the earlier one.
    pub fn add_method<F>(&mut self, name: &str, params: &[Kind], returns: Kind, handler: F)
    where
        F: FnMut(&mut C, &Args) -> Result<Value, RpcError> + Send + 'static,
    {
        let entry = MethodEntry {
            params: params.to_vec(),
            returns,
            handler: Box::new(handler),
        };
        if self.methods.insert(name.to_string(), entry).is_some() {
            debug!("dispatch: method '{}' re-registered", name);
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Declared parameter and result kinds of `name`.
    pub fn signature(&self, name: &str) -> Option<(&[Kind], Kind)> {
        self.methods
            .get(name)
            .map(|m| (m.params.as_slice(), m.returns))
    }

    /// Decode, validate and invoke one request.
    pub fn call(&mut self, ctx: &mut C, request: &[u8]) -> Result<Value, RpcError> {
        let doc: serde_json::Value = serde_json::from_slice(request)
            .map_err(|e| RpcError::ParseError(e.to_string()))?;

        let serde_json::Value::Object(obj) = doc else {
            return Err(RpcError::ParseError("request is not an object".to_string()));
        };

        let name = obj
            .get("method")
            .and_then(serde_json::Value::as_str)
            .ok_or(RpcError::MethodNotFound)?;

        let raw_args: &[serde_json::Value] = match obj.get("args") {
            None => &[],
            Some(serde_json::Value::Array(a)) => a,
            Some(_) => return Err(RpcError::ParseError("args is not an array".to_string())),
        };

        let method = self.methods.get_mut(name).ok_or_else(|| {
            warn!("dispatch: unknown method '{}'", name);
            RpcError::MethodNotFound
        })?;

        if raw_args.len() != method.params.len() {
            return Err(RpcError::ArgumentCount);
        }

        let args = method
            .params
            .iter()
            .zip(raw_args)
            .map(|(kind, raw)| kind.decode(raw).ok_or(RpcError::ArgumentType))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("dispatch: {}({} args)", name, args.len());
        let result = (method.handler)(ctx, &Args::new(args))?;

        if result.kind() != method.returns {
            warn!(
                "dispatch: '{}' returned {} but declares {}",
                name,
                result.kind(),
                method.returns
            );
            return Err(RpcError::ReturnType);
        }
        Ok(result)
    }

    /// Dispatch one request and encode the response document.
    pub fn dispatch_with(&mut self, ctx: &mut C, request: &[u8]) -> Vec<u8> {
        encode_response(self.call(ctx, request))
    }
}

/// Encode `{ok, result}`. Errors become their display string.
pub fn encode_response(outcome: Result<Value, RpcError>) -> Vec<u8> {
    let response = match outcome {
        Ok(result) => Response { ok: true, result },
        Err(e) => {
            debug!("dispatch: error response: {}", e);
            Response {
                ok: false,
                result: Value::Str(e.to_string()),
            }
        }
    };
    serde_json::to_vec(&response).unwrap_or_else(|_| ENCODE_FAILURE.to_vec())
}

impl Dispatcher<()> {
    /// Dispatch a context-free request.
    pub fn dispatch(&mut self, request: &[u8]) -> Vec<u8> {
        self.dispatch_with(&mut (), request)
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.add_method("add_8bits", &[Kind::I8, Kind::I8], Kind::I8, |_, args| {
            let a: i8 = args.get(0)?;
            let b: i8 = args.get(1)?;
            a.checked_add(b)
                .map(Value::from)
                .ok_or_else(|| RpcError::handler("overflow"))
        });
        d.add_method("fail", &[], Kind::Bool, |_, _| Err(RpcError::handler("boom")));
        d.add_method("lies", &[], Kind::I32, |_, _| Ok(Value::from("not an int")));
        d.add_method("half", &[Kind::F64], Kind::F64, |_, args| {
            Ok(Value::from(args.get::<f64>(0)? / 2.0))
        });
        d
    }

    fn run(d: &mut Dispatcher, req: &str) -> String {
        String::from_utf8(d.dispatch(req.as_bytes())).unwrap()
    }

    #[test]
    fn successful_call() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"add_8bits","args":[1,2]}"#),
            r#"{"ok":true,"result":3}"#
        );
    }

    #[test]
    fn out_of_range_argument_is_type_mismatch() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"add_8bits","args":[512,512]}"#),
            r#"{"ok":false,"result":"Argument type mismatch"}"#
        );
    }

    #[test]
    fn float_for_integer_is_type_mismatch() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"add_8bits","args":[1.5,2]}"#),
            r#"{"ok":false,"result":"Argument type mismatch"}"#
        );
    }

    #[test]
    fn unknown_method() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"unknown","args":[]}"#),
            r#"{"ok":false,"result":"Method not found"}"#
        );
    }

    #[test]
    fn missing_or_non_string_method_is_not_found() {
        let mut d = dispatcher();
        assert_eq!(d.call(&mut (), br#"{"args":[]}"#), Err(RpcError::MethodNotFound));
        assert_eq!(d.call(&mut (), br#"{"method":7}"#), Err(RpcError::MethodNotFound));
    }

    #[test]
    fn arity_mismatch() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"add_8bits","args":[1]}"#),
            r#"{"ok":false,"result":"Number of arguments mismatch"}"#
        );
        assert_eq!(
            d.call(&mut (), br#"{"method":"add_8bits"}"#),
            Err(RpcError::ArgumentCount)
        );
    }

    #[test]
    fn handler_error_message_is_forwarded() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"fail","args":[]}"#),
            r#"{"ok":false,"result":"boom"}"#
        );
        assert_eq!(
            run(&mut d, r#"{"method":"add_8bits","args":[100,100]}"#),
            r#"{"ok":false,"result":"overflow"}"#
        );
    }

    #[test]
    fn wrong_return_kind_is_reported() {
        let mut d = dispatcher();
        assert_eq!(d.call(&mut (), br#"{"method":"lies"}"#), Err(RpcError::ReturnType));
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        let mut d = dispatcher();
        assert!(matches!(d.call(&mut (), b"{not json"), Err(RpcError::ParseError(_))));
        assert!(matches!(d.call(&mut (), b"[1,2]"), Err(RpcError::ParseError(_))));
        assert!(matches!(
            d.call(&mut (), br#"{"method":"fail","args":5}"#),
            Err(RpcError::ParseError(_))
        ));
        let resp = run(&mut d, "{");
        assert!(resp.starts_with(r#"{"ok":false,"result":"Invalid request: "#));
    }

    #[test]
    fn integer_accepted_for_float_parameter() {
        let mut d = dispatcher();
        assert_eq!(
            run(&mut d, r#"{"method":"half","args":[3]}"#),
            r#"{"ok":true,"result":1.5}"#
        );
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let mut d = dispatcher();
        d.add_method("fail", &[], Kind::Bool, |_, _| Ok(Value::from(true)));
        assert_eq!(d.method_count(), 4);
        assert_eq!(
            run(&mut d, r#"{"method":"fail","args":[]}"#),
            r#"{"ok":true,"result":true}"#
        );
    }

    #[test]
    fn context_is_threaded_through() {
        let mut d: Dispatcher<u32> = Dispatcher::new();
        d.add_method("bump", &[], Kind::U32, |calls, _| {
            *calls += 1;
            Ok(Value::from(*calls))
        });
        let mut calls = 0;
        d.dispatch_with(&mut calls, br#"{"method":"bump","args":[]}"#);
        let resp = d.dispatch_with(&mut calls, br#"{"method":"bump","args":[]}"#);
        assert_eq!(resp, br#"{"ok":true,"result":2}"#);
        assert_eq!(calls, 2);
    }
}
