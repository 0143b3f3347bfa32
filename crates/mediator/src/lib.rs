//! In-process mediator: typed publish, request and streaming dispatch between
//! decoupled components.
//!
//! Senders publish messages and issue requests by type; handlers subscribe to
//! the types they serve. Requests declare whether one handler answers them
//! ([`RequestType::Single`]) or every handler may reply
//! ([`RequestType::Multi`]).
//!
//! ```
//! use std::convert::Infallible;
//!
//! use proven_mediator::{Mediator, Message, Request, RequestType};
//!
//! #[derive(Clone, Debug)]
//! struct GetVolume;
//!
//! impl Message for GetVolume {}
//!
//! impl Request for GetVolume {
//!     type Response = f32;
//!     const REQUEST_TYPE: RequestType = RequestType::Single;
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mediator = Mediator::new();
//! mediator.respond_fn(|_: GetVolume| async { Ok::<_, Infallible>(Some(0.5)) });
//!
//! assert_eq!(mediator.request(GetVolume).await.unwrap(), 0.5);
//! # }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

/// Executes publish and request passes.
pub mod dispatcher;

/// Handler capability interfaces and closure adapters.
pub mod handler;

/// Message and request definitions.
pub mod message;

/// Mediator, publish and request options.
pub mod options;

/// Routing table keyed by channel and message kind.
pub mod registry;

/// Lazy multi-response sequences.
pub mod stream;

/// Registration handles and their lifetime.
pub mod subscription;

pub use dispatcher::Dispatcher;
pub use error::{Error, HandlerFailure, Result};
pub use handler::{DynHandler, FnHandler, HandlerError, MessageHandler, RequestHandler};
pub use message::{Message, MessageKind, Request, RequestType};
pub use options::{MediatorOptions, PublishOptions, RequestOptions};
pub use stream::ResponseStream;
pub use subscription::{SubscriptionGuard, SubscriptionId, SubscriptionManager};

use handler::{NotificationAdapter, Payload, RequestAdapter};
use options::Deadline;
use registry::RouteKey;

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// The entry point for publishing, requesting and subscribing.
///
/// Clones share the same registrations. [`Mediator::scope`] derives a view on
/// a named channel over the same registrations.
#[derive(Clone)]
pub struct Mediator {
    channel: Arc<str>,
    dispatcher: Arc<Dispatcher>,
    options: MediatorOptions,
    subscriptions: Arc<SubscriptionManager>,
    task_tracker: TaskTracker,
    waiting: Arc<Mutex<()>>,
}

impl Mediator {
    /// Creates a mediator with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MediatorOptions::default())
    }

    /// Creates a mediator with the given options.
    #[must_use]
    pub fn with_options(options: MediatorOptions) -> Self {
        let subscriptions = Arc::new(SubscriptionManager::new());

        Self {
            channel: Arc::from(""),
            dispatcher: Arc::new(Dispatcher::new(subscriptions.clone())),
            options,
            subscriptions,
            task_tracker: TaskTracker::new(),
            waiting: Arc::new(Mutex::new(())),
        }
    }

    /// The channel this mediator routes on. Empty for the root channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The options calls inherit.
    #[must_use]
    pub const fn options(&self) -> &MediatorOptions {
        &self.options
    }

    /// Returns a view routing on the named channel.
    ///
    /// Scopes nest: scoping `"a"` then `"b"` routes on `"a:b"`. Channel names
    /// are taken verbatim, so `scope("a:b")` is the same channel as
    /// `scope("a").scope("b")` and the two share subscribers.
    #[must_use]
    pub fn scope<K>(&self, channel: K) -> Self
    where
        K: Into<String>,
    {
        let channel = channel.into();
        let channel = if self.channel.is_empty() {
            channel
        } else {
            format!("{}:{}", self.channel, channel)
        };

        Self {
            channel: Arc::from(channel),
            ..self.clone()
        }
    }

    /// Subscribes a notification handler for `M`.
    pub fn subscribe<M, H>(&self, handler: H) -> SubscriptionId
    where
        M: Message,
        H: MessageHandler<M>,
    {
        self.subscribe_dyn(
            MessageKind::of::<M>(),
            Arc::new(NotificationAdapter::<M, H>::new(handler)),
        )
    }

    /// Subscribes an async closure as a notification handler for `M`.
    pub fn subscribe_fn<M, F, Fut, E>(&self, f: F) -> SubscriptionId
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: HandlerError,
    {
        self.subscribe::<M, _>(FnHandler::<F, M>::new(f))
    }

    /// Subscribes a request handler for `R`.
    pub fn respond<R, H>(&self, handler: H) -> SubscriptionId
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.subscribe_dyn(
            MessageKind::of::<R>(),
            Arc::new(RequestAdapter::<R, H>::new(handler)),
        )
    }

    /// Subscribes an async closure as a request handler for `R`.
    pub fn respond_fn<R, F, Fut, E>(&self, f: F) -> SubscriptionId
    where
        R: Request,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<R::Response>, E>> + Send + 'static,
        E: HandlerError,
    {
        self.respond::<R, _>(FnHandler::<F, R>::new(f))
    }

    /// Subscribes a type-erased handler for the kind.
    pub fn subscribe_dyn(&self, kind: MessageKind, handler: Arc<dyn DynHandler>) -> SubscriptionId {
        self.subscriptions.subscribe(self.route(kind), handler)
    }

    /// Wraps a registration so it is removed when the guard drops.
    pub fn guard(&self, id: SubscriptionId) -> SubscriptionGuard {
        SubscriptionGuard::new(id, &self.subscriptions)
    }

    /// Removes a registration. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Removes every registration on every channel, returning how many were
    /// removed.
    pub fn unsubscribe_all(&self) -> usize {
        self.subscriptions.unsubscribe_all()
    }

    /// Whether any handler is subscribed to `M` on this channel.
    #[must_use]
    pub fn has_subscribers<M: Message>(&self) -> bool {
        self.subscriptions
            .has_subscribers(&self.route(MessageKind::of::<M>()))
    }

    /// Number of registrations across all channels.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Publishes a notification with the mediator's default options.
    ///
    /// # Errors
    ///
    /// See [`Mediator::publish_with`].
    pub async fn publish<M: Message>(&self, message: M) -> Result<()> {
        self.publish_with(message, PublishOptions::default()).await
    }

    /// Publishes a notification to every handler of `M`, in registration order.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveSubscribers`] if strict and nothing is subscribed.
    /// - [`Error::MessagePublished`] if handlers failed. Every handler still ran.
    /// - [`Error::Timeout`] if the timeout elapsed.
    /// - [`Error::InvalidOptions`] if both detached and a timeout were given.
    ///
    /// Detached publishes only report the first and last; failures of the
    /// background pass are logged.
    ///
    /// # Panics
    ///
    /// A detached publish panics outside a tokio runtime.
    pub async fn publish_with<M: Message>(
        &self,
        message: M,
        options: PublishOptions,
    ) -> Result<()> {
        let key = self.route(MessageKind::of::<M>());
        let strict = options.strict.unwrap_or(self.options.strict_notifications);
        let payload: Payload = Arc::new(message);

        if !options.detached {
            let deadline = Deadline::after(options.timeout.or(self.options.default_timeout));
            return self.dispatcher.notify(&key, payload, strict, deadline).await;
        }

        if options.timeout.is_some() {
            return Err(Error::InvalidOptions(
                "a timeout requires waiting for the handlers",
            ));
        }
        if strict && !self.subscriptions.has_subscribers(&key) {
            return Err(Error::NoActiveSubscribers {
                kind: key.kind().name(),
            });
        }

        let dispatcher = self.dispatcher.clone();
        let deadline = Deadline::after(self.options.default_timeout);
        self.task_tracker.spawn(async move {
            if let Err(e) = dispatcher.notify(&key, payload, false, deadline).await {
                error!("detached publish of {} failed: {}", key.kind(), e);
            }
        });

        Ok(())
    }

    /// Waits until every detached publish made so far has finished.
    ///
    /// Concurrent callers, including those on clones and scopes, wait one
    /// after another.
    pub async fn wait_detached(&self) {
        let _waiting = self.waiting.lock().await;
        self.task_tracker.close();
        self.task_tracker.wait().await;
        self.task_tracker.reopen();
    }

    /// Issues a single-response request with the mediator's default options.
    ///
    /// # Errors
    ///
    /// See [`Mediator::request_with`].
    pub async fn request<R: Request>(&self, request: R) -> Result<R::Response> {
        self.request_with(request, RequestOptions::default()).await
    }

    /// Issues a single-response request and returns the first reply.
    ///
    /// # Errors
    ///
    /// - [`Error::UnqualifiedRequestType`] if `R` is a multi-response request.
    /// - [`Error::NoActiveSubscribers`] if no handler replied.
    /// - [`Error::Handler`] if a handler failed before any replied.
    /// - [`Error::BadResponse`] if the reply has the wrong type.
    /// - [`Error::Timeout`] if the timeout elapsed.
    pub async fn request_with<R: Request>(
        &self,
        request: R,
        options: RequestOptions,
    ) -> Result<R::Response> {
        let key = self.route(MessageKind::of::<R>());
        let deadline = Deadline::after(options.timeout.or(self.options.default_timeout));
        debug!("requesting {} on channel {:?}", key.kind(), key.channel());

        self.dispatcher
            .request::<R>(&key, Arc::new(request), deadline)
            .await
    }

    /// Issues a multi-response request with the mediator's default options.
    ///
    /// # Errors
    ///
    /// See [`Mediator::request_stream_with`].
    pub fn request_stream<R: Request>(&self, request: R) -> Result<ResponseStream<R::Response>> {
        self.request_stream_with(request, RequestOptions::default())
    }

    /// Issues a multi-response request, streaming every reply.
    ///
    /// The timeout bounds the whole pass and starts now, not at the first poll.
    ///
    /// # Errors
    ///
    /// [`Error::UnqualifiedRequestType`] if `R` is a single-response request.
    /// Other failures arrive through the stream.
    pub fn request_stream_with<R: Request>(
        &self,
        request: R,
        options: RequestOptions,
    ) -> Result<ResponseStream<R::Response>> {
        let key = self.route(MessageKind::of::<R>());
        let deadline = Deadline::after(options.timeout.or(self.options.default_timeout));

        self.dispatcher
            .request_stream::<R>(key, Arc::new(request), deadline)
    }

    fn route(&self, kind: MessageKind) -> RouteKey {
        RouteKey::new(self.channel.clone(), kind)
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("channel", &self.channel)
            .field("options", &self.options)
            .field("subscriptions", &self.subscriptions.subscription_count())
            .finish_non_exhaustive()
    }
}
