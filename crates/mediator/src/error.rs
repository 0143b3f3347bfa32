use std::time::Duration;

use thiserror::Error;

use crate::handler::BoxError;
use crate::message::RequestType;
use crate::subscription::SubscriptionId;

/// A handler failure, attributed to the registration that produced it.
#[derive(Debug, Error)]
#[error("handler `{handler}` ({subscription}) failed: {source}")]
pub struct HandlerFailure {
    /// The registration the handler was subscribed under.
    pub subscription: SubscriptionId,

    /// The handler's name.
    pub handler: String,

    /// The error the handler returned.
    pub source: BoxError,
}

/// Errors that can occur while dispatching through the mediator.
#[derive(Debug, Error)]
pub enum Error {
    /// A handler replied with a value of the wrong type.
    #[error(
        "handler `{handler}` ({subscription}) replied to `{kind}` with a value that is not `{expected}`"
    )]
    BadResponse {
        /// The request kind.
        kind: &'static str,

        /// The offending registration.
        subscription: SubscriptionId,

        /// The offending handler's name.
        handler: String,

        /// The response type the request declares.
        expected: &'static str,
    },

    /// A handler failed before any handler answered a single-response request.
    #[error("request `{kind}` failed")]
    Handler {
        /// The request kind.
        kind: &'static str,

        /// The failure.
        #[source]
        failure: HandlerFailure,
    },

    /// The options passed to a call contradict each other.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// A type-erased handler received a payload of another kind.
    #[error("payload is not a `{expected}`")]
    KindMismatch {
        /// The kind the handler expected.
        expected: &'static str,
    },

    /// One or more handlers failed during a notification or multi-response pass.
    ///
    /// The remaining handlers still ran before this was returned.
    #[error(
        "{} handler(s) failed while dispatching `{kind}`, first: {}",
        .failures.len(),
        first_failure(.failures)
    )]
    MessagePublished {
        /// The message kind.
        kind: &'static str,

        /// Every failure, in handler order.
        failures: Vec<HandlerFailure>,
    },

    /// No handler answered a single-response request or a strict notification.
    #[error("`{kind}` has no active subscribers")]
    NoActiveSubscribers {
        /// The message kind.
        kind: &'static str,
    },

    /// The call did not finish before its deadline.
    ///
    /// Handlers that had already failed in the same pass are carried along.
    #[error(
        "dispatching `{kind}` timed out after {after:?} ({} earlier handler failure(s))",
        .failures.len()
    )]
    Timeout {
        /// The message kind.
        kind: &'static str,

        /// The timeout that elapsed.
        after: Duration,

        /// Failures collected before the deadline passed, in handler order.
        failures: Vec<HandlerFailure>,
    },

    /// A request was issued through the entry point of the other request type.
    #[error("`{kind}` is a {declared} request but was issued as a {issued} request")]
    UnqualifiedRequestType {
        /// The request kind.
        kind: &'static str,

        /// The request type the kind declares.
        declared: RequestType,

        /// The request type of the entry point used.
        issued: RequestType,
    },
}

fn first_failure(failures: &[HandlerFailure]) -> String {
    failures
        .first()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Result type for mediator operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("volume knob stuck")]
    struct Stuck;

    #[test]
    fn test_message_published_display_names_first_failure() {
        let subscription = SubscriptionId::new();
        let error = Error::MessagePublished {
            kind: "SetVolume",
            failures: vec![HandlerFailure {
                subscription,
                handler: "mixer".to_string(),
                source: Box::new(Stuck),
            }],
        };

        let rendered = error.to_string();
        assert!(rendered.starts_with("1 handler(s) failed while dispatching `SetVolume`"));
        assert!(rendered.contains("handler `mixer`"));
        assert!(rendered.contains("volume knob stuck"));
    }

    #[test]
    fn test_handler_failure_exposes_source() {
        let failure = HandlerFailure {
            subscription: SubscriptionId::new(),
            handler: "mixer".to_string(),
            source: Box::new(Stuck),
        };

        let source = std::error::Error::source(&failure).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("volume knob stuck"));
    }
}
