//! # Dispatch
//!
//! The server-side interpreter: one decoded request in, one reply value
//! out. Stateless between requests except for the shared object table.
//!
//! ## Invariants
//!
//! - Any fault raised while performing an action becomes the *reply*
//!   (`Value::Fault`), never a transport failure; the client re-raises
//!   the exact fault remotely.
//! - `shutdown` is answered before the accept loop stops; the reply is
//!   the last message that server sends.

use std::sync::Arc;

use telepack::RemoteFault;
use telepack::Value;
use telerpc::Action;
use telerpc::Request;

use crate::convert::encode_host;
use crate::convert::resolve_ref;
use crate::convert::resolve_value;
use crate::host::FaultResult;
use crate::host::Host;
use crate::host::HostObj;
use crate::host::HostValue;
use crate::host::kind;
use crate::table::ObjectTable;

/// The farewell sent in reply to `shutdown`.
pub const SHUTDOWN_MESSAGE: &str = "SERVER: Shutting down...";

/// When the `initiate` handshake consults the human behind the host.
///
/// Advisory, not cryptographic: the policy decides whether to *ask*, and
/// the host's answer decides accept or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Accept every connection silently.
    #[default]
    Never,
    /// Ask the host about every connection.
    Always,
    /// Ask only when the origin is not this machine.
    RemoteOnly,
}

/// What the accept loop should do after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

/// One handled request: the value to send back, and whether to keep
/// accepting.
#[derive(Debug)]
pub struct Outcome {
    pub reply: Value,
    pub control: Control,
}

impl Outcome {
    fn reply(value: Value) -> Self {
        Self { reply: value, control: Control::Continue }
    }
}

/// Interprets requests against the object table and the host.
pub struct Dispatcher {
    table: ObjectTable,
    host: Arc<dyn Host>,
    verify: VerifyPolicy,
}

impl Dispatcher {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_policy(host, VerifyPolicy::Never)
    }

    pub fn with_policy(host: Arc<dyn Host>, verify: VerifyPolicy) -> Self {
        Self { table: ObjectTable::new(), host, verify }
    }

    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    /// Handles one request. Faults become the reply; this never errors.
    pub fn handle(&self, request: Request) -> Outcome {
        match self.perform(request) {
            Ok(outcome) => outcome,
            Err(fault) => Outcome::reply(Value::Fault(fault)),
        }
    }

    fn perform(&self, request: Request) -> FaultResult<Outcome> {
        let Request { action, target, parameters } = request;
        match action {
            Action::Test => Ok(Outcome::reply(Value::Bool(true))),

            Action::Initiate => {
                let origin = match parameters.as_ref().and_then(Value::as_text) {
                    Some(origin) => origin,
                    None => "unknown",
                };
                let verdict = if self.verify_origin(origin) { "accept" } else { "deny" };
                Ok(Outcome::reply(Value::Text(verdict.into())))
            }

            Action::Shutdown => Ok(Outcome {
                reply: Value::Text(SHUTDOWN_MESSAGE.into()),
                control: Control::Shutdown,
            }),

            Action::Del => {
                self.table.release(target).map_err(|_| {
                    RemoteFault::new(kind::REFERENCE_ERROR, format!("{} is gone", target))
                })?;
                Ok(Outcome::reply(Value::Null))
            }

            Action::Import => {
                let name = expect_text(&parameters, "import")?;
                let module = self.host.import_module(name)?;
                Ok(Outcome::reply(encode_host(module, &self.table)))
            }

            Action::Getattr => {
                let object = self.target(target)?;
                let name = expect_text(&parameters, "getattr")?;
                let result = object.get_attr(name)?;
                Ok(Outcome::reply(encode_host(result, &self.table)))
            }

            Action::Setattr => {
                let object = self.target(target)?;
                let (name, value) = self.expect_pair(parameters, "setattr")?;
                let name = name
                    .as_text()
                    .ok_or_else(|| bad_parameters("setattr"))?
                    .to_string();
                object.set_attr(&name, value)?;
                Ok(Outcome::reply(Value::Null))
            }

            Action::Getitem => {
                let object = self.target(target)?;
                let key = parameters.ok_or_else(|| bad_parameters("getitem"))?;
                let resolved = self.resolve(key.clone())?;
                let result = object.get_item(&resolved);
                // Item access on the global namespace reports an absent
                // name as undefined, not as a missing key.
                if target.is_globals() {
                    if let Err(fault) = &result {
                        if fault.kind == kind::KEY_ERROR {
                            return Err(name_undefined(&key));
                        }
                    }
                }
                Ok(Outcome::reply(encode_host(result?, &self.table)))
            }

            Action::Setitem => {
                let object = self.target(target)?;
                let (key, value) = self.expect_pair(parameters, "setitem")?;
                object.set_item(key, value)?;
                Ok(Outcome::reply(Value::Null))
            }

            Action::Call => {
                let object = self.target(target)?;
                let (args, kwargs) = self.expect_call_parameters(parameters)?;
                let task = Box::new(move || object.call(args, kwargs));
                let result = self.host.execute(task)?;
                Ok(Outcome::reply(encode_host(result, &self.table)))
            }

            Action::Len => {
                let object = self.target(target)?;
                Ok(Outcome::reply(Value::Int(object.len()?)))
            }

            Action::Str => {
                let object = self.target(target)?;
                Ok(Outcome::reply(Value::Text(object.to_text()?)))
            }

            Action::Repr => {
                let object = self.target(target)?;
                Ok(Outcome::reply(Value::Text(object.to_repr()?)))
            }

            Action::Isinstance => {
                let object = self.target(target)?;
                let value = parameters.ok_or_else(|| bad_parameters("isinstance"))?;
                let resolved = self.resolve(value)?;
                Ok(Outcome::reply(Value::Bool(object.instance_check(&resolved)?)))
            }

            Action::Issubclass => {
                let object = self.target(target)?;
                let other = parameters.ok_or_else(|| bad_parameters("issubclass"))?;
                let resolved = self.resolve(other)?;
                Ok(Outcome::reply(Value::Bool(object.subclass_check(&resolved)?)))
            }
        }
    }

    fn target(&self, id: telepack::ObjectId) -> FaultResult<HostObj> {
        resolve_ref(id, &self.table, self.host.as_ref())
    }

    fn resolve(&self, value: Value) -> FaultResult<HostValue> {
        resolve_value(value, &self.table, self.host.as_ref())
    }

    /// `[first, second]` parameter lists, as used by `setattr`/`setitem`.
    fn expect_pair(
        &self,
        parameters: Option<Value>,
        action: &str,
    ) -> FaultResult<(HostValue, HostValue)> {
        let Some(Value::List(items)) = parameters else {
            return Err(bad_parameters(action));
        };
        let [first, second] = <[Value; 2]>::try_from(items).map_err(|_| bad_parameters(action))?;
        Ok((self.resolve(first)?, self.resolve(second)?))
    }

    /// `{args: [...], kwargs: {...}}` as used by `call`. Both entries are
    /// optional; kwargs keys must be text.
    fn expect_call_parameters(
        &self,
        parameters: Option<Value>,
    ) -> FaultResult<(Vec<HostValue>, Vec<(String, HostValue)>)> {
        let entries = match parameters {
            Some(Value::Map(entries)) => entries,
            None => Vec::new(),
            Some(_) => return Err(bad_parameters("call")),
        };

        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for (key, value) in entries {
            match key.as_text() {
                Some("args") => {
                    let Value::List(items) = value else {
                        return Err(bad_parameters("call"));
                    };
                    args = items
                        .into_iter()
                        .map(|v| self.resolve(v))
                        .collect::<FaultResult<_>>()?;
                }
                Some("kwargs") => {
                    let Value::Map(pairs) = value else {
                        return Err(bad_parameters("call"));
                    };
                    kwargs = pairs
                        .into_iter()
                        .map(|(name, v)| {
                            let name = name
                                .as_text()
                                .ok_or_else(|| bad_parameters("call"))?
                                .to_string();
                            Ok((name, self.resolve(v)?))
                        })
                        .collect::<FaultResult<_>>()?;
                }
                _ => return Err(bad_parameters("call")),
            }
        }
        Ok((args, kwargs))
    }

    fn verify_origin(&self, origin: &str) -> bool {
        match self.verify {
            VerifyPolicy::Never => true,
            VerifyPolicy::Always => self.host.confirm_peer(origin),
            VerifyPolicy::RemoteOnly => is_local(origin) || self.host.confirm_peer(origin),
        }
    }
}

fn is_local(origin: &str) -> bool {
    if matches!(origin, "localhost" | "127.0.0.1" | "::1") {
        return true;
    }
    std::env::var("HOSTNAME").is_ok_and(|name| name == origin)
}

fn expect_text<'a>(parameters: &'a Option<Value>, action: &str) -> FaultResult<&'a str> {
    parameters
        .as_ref()
        .and_then(Value::as_text)
        .ok_or_else(|| bad_parameters(action))
}

fn bad_parameters(action: &str) -> RemoteFault {
    RemoteFault::new(
        kind::TYPE_ERROR,
        format!("malformed parameters for '{}'", action),
    )
}

fn name_undefined(key: &Value) -> RemoteFault {
    let name = key.as_text().unwrap_or("<non-text key>");
    RemoteFault::new(kind::NAME_ERROR, format!("name '{}' is not defined", name))
}
