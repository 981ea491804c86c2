//! Inbound dispatch table.
//!
//! A node's remote operations are plain closures keyed by operation id. The
//! registry is built once per node type against the interface the node
//! exposes, so a handler for an undeclared operation, or one whose shape
//! disagrees with its declaration, fails at build time rather than on the
//! first message.

use hashbrown::HashMap;
use typed_builder::TypedBuilder;

use super::interface::{InterfaceDecl, InterfaceError, OperationId, ReturnType};
use crate::deferred::Response;
use crate::node::{HandlerError, NodeContext};
use crate::value::Payload;

pub type OneWayHandler<N> = Box<
    dyn Fn(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError> + Send + Sync,
>;

pub type TwoWayHandler<N> = Box<
    dyn Fn(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<Response, HandlerError>
        + Send
        + Sync,
>;

pub enum Handler<N> {
    OneWay(OneWayHandler<N>),
    TwoWay(TwoWayHandler<N>),
}

impl<N> Handler<N> {
    pub fn expects_response(&self) -> bool {
        matches!(self, Handler::TwoWay(_))
    }
}

/// Handlers of one node type, keyed by operation id.
pub struct MethodRegistry<N> {
    interface: String,
    handlers: HashMap<OperationId, Handler<N>>,
    default: Option<OneWayHandler<N>>,
}

impl<N> MethodRegistry<N> {
    pub fn builder(decl: &InterfaceDecl) -> RegistryBuilder<N> {
        RegistryBuilder {
            decl: decl.clone(),
            handlers: Vec::new(),
            default: None,
        }
    }

    /// A registry with no operations. Every one-way call goes to `default`,
    /// if given.
    pub fn empty(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            handlers: HashMap::new(),
            default: None,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn get(&self, id: &OperationId) -> Option<&Handler<N>> {
        self.handlers.get(id)
    }

    /// Catch-all for one-way calls with no registered handler.
    pub fn default_handler(&self) -> Option<&OneWayHandler<N>> {
        self.default.as_ref()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(TypedBuilder)]
struct Entry<N> {
    operation: String,
    handler: Handler<N>,
}

pub struct RegistryBuilder<N> {
    decl: InterfaceDecl,
    handlers: Vec<Entry<N>>,
    default: Option<OneWayHandler<N>>,
}

impl<N> RegistryBuilder<N> {
    pub fn one_way<F>(mut self, operation: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.push(
            Entry::builder()
                .operation(operation.into())
                .handler(Handler::OneWay(Box::new(handler)))
                .build(),
        );
        self
    }

    pub fn two_way<F>(mut self, operation: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.push(
            Entry::builder()
                .operation(operation.into())
                .handler(Handler::TwoWay(Box::new(handler)))
                .build(),
        );
        self
    }

    pub fn default_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.default = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<MethodRegistry<N>, InterfaceError> {
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for Entry { operation, handler } in self.handlers {
            let decl = self
                .decl
                .find(&operation)
                .ok_or_else(|| InterfaceError::Undeclared {
                    interface: self.decl.name().to_owned(),
                    operation: operation.clone(),
                })?;
            let expects_response = matches!(decl.returns(), ReturnType::Response);
            if handler.expects_response() != expects_response {
                return Err(InterfaceError::HandlerShape {
                    operation,
                    expects_response,
                });
            }
            handlers.insert(decl.id(), handler);
        }
        Ok(MethodRegistry {
            interface: self.decl.name().to_owned(),
            handlers,
            default: self.default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OperationDecl;
    use crate::value::ValueKind;

    struct Counter(u64);

    fn decl() -> InterfaceDecl {
        InterfaceDecl::new("Hub")
            .operation(OperationDecl::one_way("push").param(ValueKind::Int))
            .operation(OperationDecl::two_way("pull"))
    }

    #[test]
    fn handlers_are_keyed_by_operation_id() {
        let registry = MethodRegistry::<Counter>::builder(&decl())
            .one_way("push", |node, _, _| {
                node.0 += 1;
                Ok(())
            })
            .two_way("pull", |node, _, _| Ok(Response::single(node.0 as i64)))
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        let push = OperationDecl::one_way("push").param(ValueKind::Int).id();
        assert!(matches!(registry.get(&push), Some(Handler::OneWay(_))));
        let pull = OperationDecl::two_way("pull").id();
        assert!(registry.get(&pull).unwrap().expects_response());
        assert!(registry.default_handler().is_none());
    }

    #[test]
    fn undeclared_handlers_are_rejected() {
        let err = MethodRegistry::<Counter>::builder(&decl())
            .one_way("reset", |_, _, _| Ok(()))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            InterfaceError::Undeclared {
                interface: "Hub".into(),
                operation: "reset".into(),
            }
        );
    }

    #[test]
    fn handler_shape_must_match_the_declaration() {
        let err = MethodRegistry::<Counter>::builder(&decl())
            .one_way("pull", |_, _, _| Ok(()))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            InterfaceError::HandlerShape {
                operation: "pull".into(),
                expects_response: true,
            }
        );
    }
}
