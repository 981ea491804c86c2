//! Remote calls: envelopes, interface declarations and the operation registry.

pub mod call;
pub mod interface;
pub mod registry;

pub use call::{CallKind, CallNumber, RemoteCallIdentifier, MAX_CALL_NUMBER};
pub use interface::{
    InterfaceDecl, InterfaceError, OperationDecl, OperationId, OperationStub, ParamType,
    RemoteInterface, ReturnType,
};
pub use registry::{MethodRegistry, RegistryBuilder};
