use crate::error::Error;
use crate::message::{Message, Request};

use std::any::{Any, type_name};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// Marker trait for handler errors.
pub trait HandlerError: StdError + Send + Sync + 'static {}

impl HandlerError for Infallible {}

/// A published message, shared by every handler of one dispatch.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A reply produced by a type-erased handler.
pub type Reply = Box<dyn Any + Send>;

/// A handler error after type erasure.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The capability every registered handler is stored as.
///
/// Typed handlers are adapted to this by the mediator. Implement it directly
/// only to bridge handlers whose message type is not known statically.
#[async_trait]
pub trait DynHandler: Send + Sync + 'static {
    /// The name failures are attributed to.
    fn name(&self) -> &str;

    /// Handles the payload, optionally replying.
    async fn dispatch(&self, payload: Payload) -> Result<Option<Reply>, BoxError>;
}

/// A trait representing a handler of notifications of kind `M`.
#[async_trait]
pub trait MessageHandler<M>
where
    Self: Send + Sync + 'static,
    M: Message,
{
    /// The error type for the handler.
    type Error: HandlerError;

    /// Handles the given message.
    async fn handle(&self, message: M) -> Result<(), Self::Error>;

    /// The name failures are attributed to.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// A trait representing a handler of requests of kind `R`.
#[async_trait]
pub trait RequestHandler<R>
where
    Self: Send + Sync + 'static,
    R: Request,
{
    /// The error type for the handler.
    type Error: HandlerError;

    /// Handles the given request, returning `None` to decline.
    async fn handle(&self, request: R) -> Result<Option<R::Response>, Self::Error>;

    /// The name failures are attributed to.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// A handler backed by an async closure.
pub struct FnHandler<F, M> {
    f: F,
    name: &'static str,
    _marker: PhantomData<fn(M)>,
}

impl<F, M> FnHandler<F, M> {
    /// Wraps the closure, naming it after its type.
    pub fn new(f: F) -> Self {
        Self {
            f,
            name: type_name::<F>(),
            _marker: PhantomData,
        }
    }

    /// Wraps the closure under an explicit name.
    pub const fn named(name: &'static str, f: F) -> Self {
        Self {
            f,
            name,
            _marker: PhantomData,
        }
    }
}

impl<F, M> Debug for FnHandler<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<M, F, Fut, E> MessageHandler<M> for FnHandler<F, M>
where
    M: Message,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: HandlerError,
{
    type Error = E;

    async fn handle(&self, message: M) -> Result<(), E> {
        (self.f)(message).await
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait]
impl<R, F, Fut, E> RequestHandler<R> for FnHandler<F, R>
where
    R: Request,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<R::Response>, E>> + Send + 'static,
    E: HandlerError,
{
    type Error = E;

    async fn handle(&self, request: R) -> Result<Option<R::Response>, E> {
        (self.f)(request).await
    }

    fn name(&self) -> &str {
        self.name
    }
}

fn downcast<M: Message>(payload: &Payload) -> Result<M, Error> {
    payload
        .downcast_ref::<M>()
        .cloned()
        .ok_or(Error::KindMismatch {
            expected: type_name::<M>(),
        })
}

/// Adapts a [`MessageHandler`] to [`DynHandler`].
pub(crate) struct NotificationAdapter<M, H> {
    handler: H,
    _marker: PhantomData<fn(M)>,
}

impl<M, H> NotificationAdapter<M, H> {
    pub(crate) const fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> DynHandler for NotificationAdapter<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn dispatch(&self, payload: Payload) -> Result<Option<Reply>, BoxError> {
        let message = downcast::<M>(&payload)?;
        self.handler.handle(message).await?;

        Ok(None)
    }
}

/// Adapts a [`RequestHandler`] to [`DynHandler`].
pub(crate) struct RequestAdapter<R, H> {
    handler: H,
    _marker: PhantomData<fn(R)>,
}

impl<R, H> RequestAdapter<R, H> {
    pub(crate) const fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> DynHandler for RequestAdapter<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn dispatch(&self, payload: Payload) -> Result<Option<Reply>, BoxError> {
        let request = downcast::<R>(&payload)?;
        let response = self.handler.handle(request).await?;

        Ok(response.map(|response| Box::new(response) as Reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::RequestType;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Ping(u32);
    impl Message for Ping {}

    #[derive(Clone, Debug)]
    struct Double(u32);
    impl Message for Double {}
    impl Request for Double {
        type Response = u32;
        const REQUEST_TYPE: RequestType = RequestType::Single;
    }

    #[tokio::test]
    async fn test_notification_adapter_invokes_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let adapter = NotificationAdapter::<Ping, _>::new(FnHandler::new(move |ping: Ping| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(ping.0 as usize, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }
        }));

        let reply = adapter.dispatch(Arc::new(Ping(3))).await.unwrap();

        assert!(reply.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_request_adapter_boxes_reply() {
        let adapter = RequestAdapter::<Double, _>::new(FnHandler::named(
            "doubler",
            |request: Double| async move { Ok::<_, Infallible>(Some(request.0 * 2)) },
        ));

        let reply = adapter.dispatch(Arc::new(Double(21))).await.unwrap().unwrap();

        assert_eq!(adapter.name(), "doubler");
        assert_eq!(*reply.downcast::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_adapter_rejects_foreign_payload() {
        let adapter = NotificationAdapter::<Ping, _>::new(FnHandler::new(|_: Ping| async {
            Ok::<_, Infallible>(())
        }));

        let error = adapter.dispatch(Arc::new(Double(1))).await.unwrap_err();

        assert!(error.to_string().contains("is not a"));
    }
}
