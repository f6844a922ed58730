//! # Action Vocabulary
//!
//! The exhaustive set of operations a client may request. The wire form
//! is the lowercase string tag; parsing anything else is a protocol error.

use crate::error::Error;
use crate::error::Result;

/// One remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Liveness probe; must answer `true`, never raise.
    Test,
    /// Connection verification handshake (advisory accept/deny).
    Initiate,
    Getattr,
    Setattr,
    Getitem,
    Setitem,
    /// Invoke the target, routed through the host's execution affinity.
    Call,
    Len,
    Str,
    Repr,
    /// Release the target's object-table entry.
    Del,
    Isinstance,
    Issubclass,
    /// Load a named module and return it as a fresh reference.
    Import,
    /// Terminate the server's accept loop after replying.
    Shutdown,
}

impl Action {
    /// The wire tag for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Test => "test",
            Action::Initiate => "initiate",
            Action::Getattr => "getattr",
            Action::Setattr => "setattr",
            Action::Getitem => "getitem",
            Action::Setitem => "setitem",
            Action::Call => "call",
            Action::Len => "len",
            Action::Str => "str",
            Action::Repr => "repr",
            Action::Del => "del",
            Action::Isinstance => "isinstance",
            Action::Issubclass => "issubclass",
            Action::Import => "import",
            Action::Shutdown => "shutdown",
        }
    }

    /// Parses a wire tag back into an action.
    pub fn parse(tag: &str) -> Result<Action> {
        match tag {
            "test" => Ok(Action::Test),
            "initiate" => Ok(Action::Initiate),
            "getattr" => Ok(Action::Getattr),
            "setattr" => Ok(Action::Setattr),
            "getitem" => Ok(Action::Getitem),
            "setitem" => Ok(Action::Setitem),
            "call" => Ok(Action::Call),
            "len" => Ok(Action::Len),
            "str" => Ok(Action::Str),
            "repr" => Ok(Action::Repr),
            "del" => Ok(Action::Del),
            "isinstance" => Ok(Action::Isinstance),
            "issubclass" => Ok(Action::Issubclass),
            "import" => Ok(Action::Import),
            "shutdown" => Ok(Action::Shutdown),
            _ => Err(Error::UnknownAction(tag.to_string())),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
