use std::any::{TypeId, type_name};
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};

/// A value routed to handlers by its concrete type.
///
/// Every handler receives its own clone of the published value.
pub trait Message: Clone + Debug + Send + Sync + 'static {}

/// How many responses a request kind may produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// The first handler that replies answers the request.
    Single,

    /// Every handler may reply; replies are streamed back in handler order.
    Multi,
}

impl Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// A message that expects responses from its handlers.
///
/// The request type is part of the type definition, so every instance of a
/// given request shares it:
///
/// ```
/// use proven_mediator::{Message, Request, RequestType};
///
/// #[derive(Clone, Debug)]
/// struct GetVolume;
///
/// impl Message for GetVolume {}
///
/// impl Request for GetVolume {
///     type Response = f32;
///     const REQUEST_TYPE: RequestType = RequestType::Single;
/// }
/// ```
pub trait Request: Message {
    /// The value handlers reply with.
    type Response: Debug + Send + 'static;

    /// Whether the request is answered once or streamed.
    const REQUEST_TYPE: RequestType;
}

/// The routing identity of a message type.
#[derive(Clone, Copy)]
pub struct MessageKind {
    type_id: TypeId,
    name: &'static str,
}

impl MessageKind {
    /// Returns the kind of `M`.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// The type name of the message, for diagnostics only.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The type id the kind routes on.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for MessageKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageKind {}

impl Hash for MessageKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageKind").field(&self.name).finish()
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
