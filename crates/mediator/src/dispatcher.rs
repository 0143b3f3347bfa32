use crate::error::{Error, HandlerFailure, Result};
use crate::handler::{BoxError, Payload, Reply};
use crate::message::{Request, RequestType};
use crate::options::Deadline;
use crate::registry::{Route, RouteKey};
use crate::stream::ResponseStream;
use crate::subscription::SubscriptionManager;

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// Runs publish and request passes against the subscribed handlers.
#[derive(Debug)]
pub struct Dispatcher {
    subscriptions: Arc<SubscriptionManager>,
}

impl Dispatcher {
    /// Creates a dispatcher over the manager's registrations.
    #[must_use]
    pub const fn new(subscriptions: Arc<SubscriptionManager>) -> Self {
        Self { subscriptions }
    }

    /// Delivers a notification to every handler of the key.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveSubscribers`] if `strict` and nothing is subscribed.
    /// - [`Error::MessagePublished`] if any handler failed. Every handler still
    ///   ran.
    /// - [`Error::Timeout`] if the deadline passed. Later handlers do not run,
    ///   and failures of earlier handlers are carried in the error.
    pub async fn notify(
        &self,
        key: &RouteKey,
        payload: Payload,
        strict: bool,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        let kind = key.kind().name();
        let routes = self.subscriptions.resolve(key);

        if routes.is_empty() {
            if strict {
                return Err(Error::NoActiveSubscribers { kind });
            }
            debug!("no subscribers for {}, dropping notification", kind);
            return Ok(());
        }

        let mut failures = Vec::new();
        for route in routes {
            if !route.is_active() {
                continue;
            }
            let outcome = match within(deadline, invoke(&route, payload.clone())).await {
                Ok(outcome) => outcome,
                Err(after) => {
                    return Err(Error::Timeout {
                        kind,
                        after,
                        failures,
                    });
                }
            };
            if let Err(source) = outcome {
                failures.push(failure(kind, &route, source));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::MessagePublished { kind, failures })
        }
    }

    /// Asks the key's handlers, in order, until one replies.
    ///
    /// # Errors
    ///
    /// - [`Error::UnqualifiedRequestType`] if `R` is not a single-response
    ///   request. No handler runs.
    /// - [`Error::Handler`] if a handler failed before any replied.
    /// - [`Error::BadResponse`] if the first reply is not an `R::Response`.
    /// - [`Error::NoActiveSubscribers`] if every handler declined or none is
    ///   subscribed.
    /// - [`Error::Timeout`] if the deadline passed.
    pub async fn request<R>(
        &self,
        key: &RouteKey,
        payload: Payload,
        deadline: Option<Deadline>,
    ) -> Result<R::Response>
    where
        R: Request,
    {
        let kind = key.kind().name();
        ensure_request_type::<R>(kind, RequestType::Single)?;

        for route in self.subscriptions.resolve(key) {
            if !route.is_active() {
                continue;
            }

            let reply = within(deadline, invoke(&route, payload.clone()))
                .await
                .map_err(|after| Error::Timeout {
                    kind,
                    after,
                    failures: Vec::new(),
                })?
                .map_err(|source| Error::Handler {
                    kind,
                    failure: failure(kind, &route, source),
                })?;

            if let Some(reply) = reply {
                debug!("{} answered {}", route.handler().name(), kind);
                return downcast_reply::<R>(kind, &route, reply);
            }
        }

        Err(Error::NoActiveSubscribers { kind })
    }

    /// Streams the replies of every handler of the key.
    ///
    /// Nothing runs until the stream is polled. Failed handlers do not stop
    /// the pass; their failures arrive as one final
    /// [`Error::MessagePublished`]. A mistyped reply arrives in its place as
    /// [`Error::BadResponse`]. A passed deadline ends the stream with
    /// [`Error::Timeout`], which then carries the failures collected so far.
    ///
    /// # Errors
    ///
    /// [`Error::UnqualifiedRequestType`] if `R` is not a multi-response request.
    /// No handler runs.
    pub fn request_stream<R>(
        &self,
        key: RouteKey,
        payload: Payload,
        deadline: Option<Deadline>,
    ) -> Result<ResponseStream<R::Response>>
    where
        R: Request,
    {
        let kind = key.kind().name();
        ensure_request_type::<R>(kind, RequestType::Multi)?;

        let subscriptions = self.subscriptions.clone();
        let stream = async_stream::stream! {
            let mut failures = Vec::new();

            for route in subscriptions.resolve(&key) {
                if !route.is_active() {
                    continue;
                }

                let outcome = match within(deadline, invoke(&route, payload.clone())).await {
                    Ok(outcome) => outcome,
                    Err(after) => {
                        yield Err(Error::Timeout { kind, after, failures });
                        return;
                    }
                };

                match outcome {
                    Ok(Some(reply)) => {
                        yield downcast_reply::<R>(kind, &route, reply);
                    }
                    Ok(None) => {}
                    Err(source) => failures.push(failure(kind, &route, source)),
                }
            }

            if !failures.is_empty() {
                yield Err(Error::MessagePublished { kind, failures });
            }
        };

        Ok(ResponseStream::new(stream))
    }
}

fn ensure_request_type<R: Request>(kind: &'static str, issued: RequestType) -> Result<()> {
    if R::REQUEST_TYPE == issued {
        Ok(())
    } else {
        Err(Error::UnqualifiedRequestType {
            kind,
            declared: R::REQUEST_TYPE,
            issued,
        })
    }
}

async fn invoke(route: &Route, payload: Payload) -> Result<Option<Reply>, BoxError> {
    route.handler().dispatch(payload).await
}

/// Runs the future to completion or until the deadline, returning the budget
/// that elapsed on timeout.
async fn within<F>(deadline: Option<Deadline>, future: F) -> Result<F::Output, Duration>
where
    F: Future,
{
    match deadline {
        None => Ok(future.await),
        Some(deadline) => tokio::time::timeout_at(deadline.at, future)
            .await
            .map_err(|_| deadline.budget),
    }
}

fn failure(kind: &'static str, route: &Route, source: BoxError) -> HandlerFailure {
    let handler = route.handler().name().to_string();
    warn!("{} ({}) failed handling {}: {}", handler, route.id(), kind, source);

    HandlerFailure {
        subscription: route.id(),
        handler,
        source,
    }
}

fn downcast_reply<R: Request>(
    kind: &'static str,
    route: &Route,
    reply: Reply,
) -> Result<R::Response> {
    reply
        .downcast::<R::Response>()
        .map(|response| *response)
        .map_err(|_| Error::BadResponse {
            kind,
            subscription: route.id(),
            handler: route.handler().name().to_string(),
            expected: type_name::<R::Response>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::handler::DynHandler;
    use crate::message::{Message, MessageKind};

    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::StreamExt;
    use thiserror::Error as ThisError;

    #[derive(Clone, Debug)]
    struct Ping;
    impl Message for Ping {}

    #[derive(Clone, Debug)]
    struct Lookup;
    impl Message for Lookup {}
    impl Request for Lookup {
        type Response = u32;
        const REQUEST_TYPE: RequestType = RequestType::Single;
    }

    #[derive(Clone, Debug)]
    struct Survey;
    impl Message for Survey {}
    impl Request for Survey {
        type Response = u32;
        const REQUEST_TYPE: RequestType = RequestType::Multi;
    }

    #[derive(Debug, ThisError)]
    #[error("scripted failure")]
    struct ScriptedFailure;

    #[derive(Clone, Copy)]
    enum Behavior {
        Reply(u32),
        Decline,
        Fail,
        WrongType,
    }

    struct Scripted {
        name: &'static str,
        behavior: Behavior,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl DynHandler for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn dispatch(&self, _payload: Payload) -> Result<Option<Reply>, BoxError> {
            self.log.lock().unwrap().push(self.name);
            match self.behavior {
                Behavior::Reply(value) => Ok(Some(Box::new(value) as Reply)),
                Behavior::Decline => Ok(None),
                Behavior::Fail => Err(ScriptedFailure.into()),
                Behavior::WrongType => Ok(Some(Box::new("not a number") as Reply)),
            }
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        subscriptions: Arc<SubscriptionManager>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let subscriptions = Arc::new(SubscriptionManager::new());
            Self {
                dispatcher: Dispatcher::new(subscriptions.clone()),
                subscriptions,
                log: Arc::default(),
            }
        }

        fn add<M: Message>(&self, name: &'static str, behavior: Behavior) {
            self.subscriptions.subscribe(
                key::<M>(),
                Arc::new(Scripted {
                    name,
                    behavior,
                    log: self.log.clone(),
                }),
            );
        }

        fn invoked(&self) -> Vec<&'static str> {
            self.log.lock().unwrap().clone()
        }
    }

    fn key<M: Message>() -> RouteKey {
        RouteKey::new(Arc::from(""), MessageKind::of::<M>())
    }

    #[tokio::test]
    async fn test_notify_without_subscribers() {
        let fixture = Fixture::new();

        let lenient = fixture
            .dispatcher
            .notify(&key::<Ping>(), Arc::new(Ping), false, None)
            .await;
        assert!(lenient.is_ok());

        let strict = fixture
            .dispatcher
            .notify(&key::<Ping>(), Arc::new(Ping), true, None)
            .await;
        assert_matches!(strict, Err(Error::NoActiveSubscribers { .. }));
    }

    #[tokio::test]
    async fn test_notify_continues_past_failures() {
        let fixture = Fixture::new();
        fixture.add::<Ping>("first", Behavior::Fail);
        fixture.add::<Ping>("second", Behavior::Decline);
        fixture.add::<Ping>("third", Behavior::Fail);

        let result = fixture
            .dispatcher
            .notify(&key::<Ping>(), Arc::new(Ping), false, None)
            .await;

        assert_eq!(fixture.invoked(), vec!["first", "second", "third"]);
        assert_matches!(result, Err(Error::MessagePublished { failures, .. }) => {
            let handlers: Vec<_> = failures
                .iter()
                .map(|failure| failure.handler.as_str())
                .collect();
            assert_eq!(handlers, vec!["first", "third"]);
        });
    }

    #[tokio::test]
    async fn test_request_stops_at_first_reply() {
        let fixture = Fixture::new();
        fixture.add::<Lookup>("decliner", Behavior::Decline);
        fixture.add::<Lookup>("answerer", Behavior::Reply(7));
        fixture.add::<Lookup>("never", Behavior::Reply(8));

        let response = fixture
            .dispatcher
            .request::<Lookup>(&key::<Lookup>(), Arc::new(Lookup), None)
            .await
            .unwrap();

        assert_eq!(response, 7);
        assert_eq!(fixture.invoked(), vec!["decliner", "answerer"]);
    }

    #[tokio::test]
    async fn test_request_fails_fast_on_handler_error() {
        let fixture = Fixture::new();
        fixture.add::<Lookup>("broken", Behavior::Fail);
        fixture.add::<Lookup>("answerer", Behavior::Reply(7));

        let result = fixture
            .dispatcher
            .request::<Lookup>(&key::<Lookup>(), Arc::new(Lookup), None)
            .await;

        assert_matches!(result, Err(Error::Handler { failure, .. }) if failure.handler == "broken");
        assert_eq!(fixture.invoked(), vec!["broken"]);
    }

    #[tokio::test]
    async fn test_request_reports_bad_response() {
        let fixture = Fixture::new();
        fixture.add::<Lookup>("confused", Behavior::WrongType);

        let result = fixture
            .dispatcher
            .request::<Lookup>(&key::<Lookup>(), Arc::new(Lookup), None)
            .await;

        assert_matches!(result, Err(Error::BadResponse { handler, expected, .. }) => {
            assert_eq!(handler, "confused");
            assert_eq!(expected, "u32");
        });
    }

    #[tokio::test]
    async fn test_request_when_everyone_declines() {
        let fixture = Fixture::new();
        fixture.add::<Lookup>("decliner", Behavior::Decline);

        let result = fixture
            .dispatcher
            .request::<Lookup>(&key::<Lookup>(), Arc::new(Lookup), None)
            .await;

        assert_matches!(result, Err(Error::NoActiveSubscribers { .. }));
    }

    #[tokio::test]
    async fn test_request_types_are_enforced_before_dispatch() {
        let fixture = Fixture::new();
        fixture.add::<Lookup>("single", Behavior::Reply(1));
        fixture.add::<Survey>("multi", Behavior::Reply(2));

        let single_as_multi = fixture
            .dispatcher
            .request_stream::<Lookup>(key::<Lookup>(), Arc::new(Lookup), None);
        assert_matches!(
            single_as_multi,
            Err(Error::UnqualifiedRequestType {
                declared: RequestType::Single,
                issued: RequestType::Multi,
                ..
            })
        );

        let multi_as_single = fixture
            .dispatcher
            .request::<Survey>(&key::<Survey>(), Arc::new(Survey), None)
            .await;
        assert_matches!(
            multi_as_single,
            Err(Error::UnqualifiedRequestType {
                declared: RequestType::Multi,
                issued: RequestType::Single,
                ..
            })
        );

        assert!(fixture.invoked().is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_in_order_and_reports_failures_last() {
        let fixture = Fixture::new();
        fixture.add::<Survey>("one", Behavior::Reply(1));
        fixture.add::<Survey>("two", Behavior::Fail);
        fixture.add::<Survey>("three", Behavior::Decline);
        fixture.add::<Survey>("four", Behavior::WrongType);
        fixture.add::<Survey>("five", Behavior::Reply(5));

        let items: Vec<_> = fixture
            .dispatcher
            .request_stream::<Survey>(key::<Survey>(), Arc::new(Survey), None)
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 4);
        assert_matches!(&items[0], Ok(1));
        assert_matches!(&items[1], Err(Error::BadResponse { handler, .. }) if handler == "four");
        assert_matches!(&items[2], Ok(5));
        assert_matches!(
            &items[3],
            Err(Error::MessagePublished { failures, .. }) if failures.len() == 1
        );
        assert_eq!(fixture.invoked(), vec!["one", "two", "three", "four", "five"]);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let fixture = Fixture::new();
        fixture.add::<Survey>("one", Behavior::Reply(1));
        fixture.add::<Survey>("two", Behavior::Reply(2));

        let mut stream = fixture
            .dispatcher
            .request_stream::<Survey>(key::<Survey>(), Arc::new(Survey), None)
            .unwrap();
        assert!(fixture.invoked().is_empty());

        assert_matches!(stream.next().await, Some(Ok(1)));
        assert_eq!(fixture.invoked(), vec!["one"]);

        drop(stream);
        assert_eq!(fixture.invoked(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_stream_without_subscribers_is_empty() {
        let fixture = Fixture::new();

        let items: Vec<_> = fixture
            .dispatcher
            .request_stream::<Survey>(key::<Survey>(), Arc::new(Survey), None)
            .unwrap()
            .collect()
            .await;

        assert!(items.is_empty());
    }
}
