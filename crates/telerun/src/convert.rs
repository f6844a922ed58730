//! # Value Conversion
//!
//! The server-side recode layer between [`HostValue`] (wire shapes with
//! opaque objects attached) and [`Value`] (wire shapes with references).
//! Outbound, every `Object` leaf allocates a table identity and becomes a
//! `Ref`; inbound, every `Ref` resolves back through the table, with
//! `ObjectId::GLOBALS` mapping to the host's global namespace.

use telepack::ObjectId;
use telepack::RemoteFault;
use telepack::Value;

use crate::host::FaultResult;
use crate::host::Host;
use crate::host::HostValue;
use crate::host::kind;
use crate::table::ObjectTable;

/// Encodes a host value for transmission, tabling any opaque objects.
pub fn encode_host(value: HostValue, table: &ObjectTable) -> Value {
    match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Int(n) => Value::Int(n),
        HostValue::Float(x) => Value::Float(x),
        HostValue::Text(s) => Value::Text(s),
        HostValue::Bytes(b) => Value::Bytes(b),
        HostValue::List(items) => {
            Value::List(items.into_iter().map(|v| encode_host(v, table)).collect())
        }
        HostValue::Set(items) => {
            Value::Set(items.into_iter().map(|v| encode_host(v, table)).collect())
        }
        HostValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (encode_host(k, table), encode_host(v, table)))
                .collect(),
        ),
        HostValue::Object(object) => Value::Ref(table.allocate(object)),
        HostValue::Fault(fault) => Value::Fault(fault),
    }
}

/// Resolves a transmitted value back into host shapes.
///
/// A reference to an identity the table no longer holds is a
/// `ReferenceError` fault — a stale proxy must surface as such, never as
/// the wrong object.
pub fn resolve_value(
    value: Value,
    table: &ObjectTable,
    host: &dyn Host,
) -> FaultResult<HostValue> {
    match value {
        Value::Null => Ok(HostValue::Null),
        Value::Bool(b) => Ok(HostValue::Bool(b)),
        Value::Int(n) => Ok(HostValue::Int(n)),
        Value::Float(x) => Ok(HostValue::Float(x)),
        Value::Text(s) => Ok(HostValue::Text(s)),
        Value::Bytes(b) => Ok(HostValue::Bytes(b)),
        Value::List(items) => Ok(HostValue::List(
            items
                .into_iter()
                .map(|v| resolve_value(v, table, host))
                .collect::<FaultResult<_>>()?,
        )),
        Value::Set(items) => Ok(HostValue::Set(
            items
                .into_iter()
                .map(|v| resolve_value(v, table, host))
                .collect::<FaultResult<_>>()?,
        )),
        Value::Map(entries) => Ok(HostValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| {
                    Ok((
                        resolve_value(k, table, host)?,
                        resolve_value(v, table, host)?,
                    ))
                })
                .collect::<FaultResult<_>>()?,
        )),
        Value::Ref(id) => resolve_ref(id, table, host).map(HostValue::Object),
        Value::Fault(fault) => Ok(HostValue::Fault(fault)),
    }
}

/// Resolves one identity: the reserved globals identity maps to the
/// host's namespace, everything else goes through the table.
pub fn resolve_ref(
    id: ObjectId,
    table: &ObjectTable,
    host: &dyn Host,
) -> FaultResult<crate::host::HostObj> {
    if id.is_globals() {
        return Ok(host.globals());
    }
    table
        .resolve(id)
        .map_err(|_| RemoteFault::new(kind::REFERENCE_ERROR, format!("{} is gone", id)))
}
