//! Remote interface declarations.
//!
//! Peers never negotiate operation ids. Each side derives the id of an
//! operation from its name and ordered parameter type names, so two nodes
//! sharing a declaration agree on every id independently.

use std::fmt;

use hashbrown::{HashMap, HashSet};
use rkyv::{Archive, Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use uuid::Builder;

use crate::net::Network;
use crate::value::ValueKind;

/// Deterministic identifier of a remote operation.
///
/// Rendered as a name-based SHA-1 UUID computed without a namespace over the
/// operation signature `name[T1, T2, ...]`.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, Hash, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct OperationId(String);

impl OperationId {
    pub fn for_signature(signature: &str) -> Self {
        let digest = Sha1::digest(signature.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        let uuid = Builder::from_sha1_bytes(bytes).into_uuid();
        Self(uuid.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The name of a parameter type as it appears in an operation signature.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ParamType(String);

impl ParamType {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn of(kind: ValueKind) -> Self {
        Self(kind.type_name().to_owned())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<ValueKind> for ParamType {
    fn from(kind: ValueKind) -> Self {
        Self::of(kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnType {
    /// One-way operation.
    Unit,
    /// Two-way operation answered with one of the response variants.
    Response,
    /// Anything else. Never valid on a remote interface.
    Other(String),
}

#[derive(Clone, Debug)]
pub struct OperationDecl {
    name: String,
    params: Vec<ParamType>,
    returns: ReturnType,
    remote: bool,
}

impl OperationDecl {
    pub fn one_way(name: impl Into<String>) -> Self {
        Self::new(name, ReturnType::Unit)
    }

    pub fn two_way(name: impl Into<String>) -> Self {
        Self::new(name, ReturnType::Response)
    }

    pub fn new(name: impl Into<String>, returns: ReturnType) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns,
            remote: true,
        }
    }

    pub fn param(mut self, ty: impl Into<ParamType>) -> Self {
        self.params.push(ty.into());
        self
    }

    /// Drops the remote-operation marker.
    pub fn unmarked(mut self) -> Self {
        self.remote = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    pub fn returns(&self) -> &ReturnType {
        &self.returns
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(ParamType::name).collect();
        format!("{}[{}]", self.name, params.join(", "))
    }

    pub fn id(&self) -> OperationId {
        OperationId::for_signature(&self.signature())
    }
}

/// A user-declared remote interface, before validation.
#[derive(Clone, Debug)]
pub struct InterfaceDecl {
    name: String,
    operations: Vec<OperationDecl>,
}

impl InterfaceDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, op: OperationDecl) -> Self {
        self.operations.push(op);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[OperationDecl] {
        &self.operations
    }

    pub fn find(&self, operation: &str) -> Option<&OperationDecl> {
        self.operations.iter().find(|op| op.name == operation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("operation {operation} of {interface} is not marked as a remote operation")]
    NotRemote { interface: String, operation: String },
    #[error("operation {operation} of {interface} returns {found}, expected unit or a response")]
    BadReturnType {
        interface: String,
        operation: String,
        found: String,
    },
    #[error("parameter type {param} of operation {operation} of {interface} is not transportable")]
    NotTransportable {
        interface: String,
        operation: String,
        param: String,
    },
    #[error("signature {signature} is declared twice in {interface}")]
    DuplicateOperation { interface: String, signature: String },
    #[error("operation {operation} is not declared by {interface}")]
    Undeclared { interface: String, operation: String },
    #[error(
        "handler for {operation} does not match its declaration \
         (expects response: {expects_response})"
    )]
    HandlerShape {
        operation: String,
        expects_response: bool,
    },
}

/// How an outbound call to one operation is tagged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationStub {
    pub id: OperationId,
    pub expects_response: bool,
}

/// A validated remote interface: the table a proxy consults for every call.
#[derive(Clone, Debug)]
pub struct RemoteInterface {
    name: String,
    operations: HashMap<String, OperationStub>,
}

impl RemoteInterface {
    /// Validates `decl` against what `network` can carry. Fails on the first
    /// operation that is unmarked, returns something other than unit or a
    /// response, takes a parameter the network cannot transport, or collides
    /// with another operation's signature.
    pub fn new(decl: &InterfaceDecl, network: &dyn Network) -> Result<Self, InterfaceError> {
        let mut operations = HashMap::with_capacity(decl.operations.len());
        let mut signatures = HashSet::with_capacity(decl.operations.len());
        for op in &decl.operations {
            if !op.remote {
                return Err(InterfaceError::NotRemote {
                    interface: decl.name.clone(),
                    operation: op.name.clone(),
                });
            }
            let expects_response = match &op.returns {
                ReturnType::Unit => false,
                ReturnType::Response => true,
                ReturnType::Other(found) => {
                    return Err(InterfaceError::BadReturnType {
                        interface: decl.name.clone(),
                        operation: op.name.clone(),
                        found: found.clone(),
                    })
                }
            };
            if let Some(param) = op.params.iter().find(|p| !network.can_transport(p)) {
                return Err(InterfaceError::NotTransportable {
                    interface: decl.name.clone(),
                    operation: op.name.clone(),
                    param: param.name().to_owned(),
                });
            }
            let signature = op.signature();
            if !signatures.insert(signature.clone()) {
                return Err(InterfaceError::DuplicateOperation {
                    interface: decl.name.clone(),
                    signature,
                });
            }
            operations.insert(
                op.name.clone(),
                OperationStub {
                    id: OperationId::for_signature(&signature),
                    expects_response,
                },
            );
        }
        Ok(Self {
            name: decl.name.clone(),
            operations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self, name: &str) -> Option<&OperationStub> {
        self.operations.get(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
