use std::time::Duration;

use tokio::time::Instant;

/// Defaults applied to every call made through a mediator.
#[derive(Clone, Copy, Debug, Default)]
pub struct MediatorOptions {
    /// Fail notifications that have no subscribers instead of dropping them.
    pub strict_notifications: bool,

    /// Deadline applied to calls that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl MediatorOptions {
    /// Lenient notifications and no timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strict_notifications: false,
            default_timeout: None,
        }
    }

    /// Sets whether notifications without subscribers fail.
    #[must_use]
    pub const fn strict_notifications(mut self, strict: bool) -> Self {
        self.strict_notifications = strict;
        self
    }

    /// Sets the default timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

/// Options for a single publish.
///
/// Unset fields inherit the mediator's [`MediatorOptions`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PublishOptions {
    /// Overrides [`MediatorOptions::strict_notifications`].
    pub strict: Option<bool>,

    /// Overrides [`MediatorOptions::default_timeout`]. Not allowed with `detached`.
    pub timeout: Option<Duration>,

    /// Run the handlers in the background and return immediately.
    pub detached: bool,
}

impl PublishOptions {
    /// Inherit everything.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strict: None,
            timeout: None,
            detached: false,
        }
    }

    /// Sets strictness for this publish.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Sets the timeout for this publish.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs the publish in the background.
    #[must_use]
    pub const fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

/// Options for a single request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestOptions {
    /// Overrides [`MediatorOptions::default_timeout`].
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Inherit everything.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Sets the timeout for this request.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The point a call must finish by, and the budget it came from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    pub(crate) at: Instant,
    pub(crate) budget: Duration,
}

impl Deadline {
    pub(crate) fn after(budget: Option<Duration>) -> Option<Self> {
        budget.map(|budget| Self {
            at: Instant::now() + budget,
            budget,
        })
    }
}
