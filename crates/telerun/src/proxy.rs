//! # Remote Proxy
//!
//! The client-side stand-in for an object living in the host's object
//! table. Every supported operation maps to exactly one request with the
//! proxy's identity as the target; results come back with any references
//! already wrapped in fresh proxies on the same connection.
//!
//! The proxy holds a weak claim: the server owns the object, and the
//! table entry lives until [`RemoteObject::delete`] releases it. A proxy
//! outliving its server instance surfaces `ReferenceError` faults rather
//! than touching the wrong object.

use telepack::ObjectId;
use telepack::Value;
use telerpc::Action;

use crate::client::Connection;
use crate::client::RemoteValue;
use crate::client::Result;

/// A remote identity plus the connection to operate through.
#[derive(Clone)]
pub struct RemoteObject {
    id: ObjectId,
    connection: Connection,
}

impl RemoteObject {
    pub(crate) fn new(id: ObjectId, connection: Connection) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The wire form of this proxy, for passing it back as a parameter.
    ///
    /// Only values and proxies can ever cross the wire; anything else
    /// simply cannot be expressed, which is the point.
    pub fn to_value(&self) -> Value {
        Value::Ref(self.id)
    }

    pub async fn get_attr(&self, name: &str) -> Result<RemoteValue> {
        let value = self
            .request(Action::Getattr, Some(Value::Text(name.into())))
            .await?;
        Ok(self.connection.decode_remote(value))
    }

    pub async fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.request(
            Action::Setattr,
            Some(Value::List(vec![Value::Text(name.into()), value])),
        )
        .await?;
        Ok(())
    }

    pub async fn get_item(&self, key: Value) -> Result<RemoteValue> {
        let value = self.request(Action::Getitem, Some(key)).await?;
        Ok(self.connection.decode_remote(value))
    }

    pub async fn set_item(&self, key: Value, value: Value) -> Result<()> {
        self.request(Action::Setitem, Some(Value::List(vec![key, value])))
            .await?;
        Ok(())
    }

    /// Invokes the remote object with positional and keyword arguments.
    pub async fn call(
        &self,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<RemoteValue> {
        let parameters = Value::Map(vec![
            (Value::Text("args".into()), Value::List(args)),
            (
                Value::Text("kwargs".into()),
                Value::Map(
                    kwargs
                        .into_iter()
                        .map(|(name, value)| (Value::Text(name), value))
                        .collect(),
                ),
            ),
        ]);
        let value = self.request(Action::Call, Some(parameters)).await?;
        Ok(self.connection.decode_remote(value))
    }

    pub async fn len(&self) -> Result<i64> {
        match self.request(Action::Len, None).await? {
            Value::Int(n) => Ok(n),
            other => Err(protocol_mismatch("len", &other)),
        }
    }

    /// The object's plain string form.
    pub async fn text(&self) -> Result<String> {
        match self.request(Action::Str, None).await? {
            Value::Text(s) => Ok(s),
            other => Err(protocol_mismatch("str", &other)),
        }
    }

    /// The object's display form.
    pub async fn repr(&self) -> Result<String> {
        match self.request(Action::Repr, None).await? {
            Value::Text(s) => Ok(s),
            other => Err(protocol_mismatch("repr", &other)),
        }
    }

    /// Whether `value` is an instance of this (class-like) object.
    pub async fn instance_check(&self, value: Value) -> Result<bool> {
        match self.request(Action::Isinstance, Some(value)).await? {
            Value::Bool(b) => Ok(b),
            other => Err(protocol_mismatch("isinstance", &other)),
        }
    }

    /// Whether `other` is a subclass of this (class-like) object.
    pub async fn subclass_check(&self, other: Value) -> Result<bool> {
        match self.request(Action::Issubclass, Some(other)).await? {
            Value::Bool(b) => Ok(b),
            value => Err(protocol_mismatch("issubclass", &value)),
        }
    }

    /// Releases the server's table entry for this identity. The proxy is
    /// consumed; clones pointing at the same identity will start seeing
    /// `ReferenceError` faults.
    pub async fn delete(self) -> Result<()> {
        self.request(Action::Del, None).await?;
        Ok(())
    }

    async fn request(&self, action: Action, parameters: Option<Value>) -> Result<Value> {
        self.connection.request(action, self.id, parameters).await
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteObject({})", self.id)
    }
}

fn protocol_mismatch(action: &str, got: &Value) -> crate::client::Error {
    crate::client::Error::Protocol(format!("'{}' answered with a {}", action, got.kind()))
}
