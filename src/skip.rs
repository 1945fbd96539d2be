//! The skip sentinel: "input is not ready yet, do not fetch".
use std::any::Any;

/// Marker meaning "do not fetch". The only instance is [`SKIP`].
///
/// It has no public constructor, is not serializable and carries no data, so it can never be
/// confused with a message value, however empty that message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkipToken {
    _private: (),
}

pub const SKIP: SkipToken = SkipToken { _private: () };

/// True only for the skip sentinel itself.
pub fn is_skip(value: &dyn Any) -> bool {
    value.is::<SkipToken>()
}

/// Input slot of a query: either a message, or the skip sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput<I> {
    Skip(SkipToken),
    Ready(I),
}

impl<I> QueryInput<I> {
    pub fn is_skip(&self) -> bool {
        matches!(self, QueryInput::Skip(_))
    }

    pub fn as_ready(&self) -> Option<&I> {
        match self {
            QueryInput::Skip(_) => None,
            QueryInput::Ready(input) => Some(input),
        }
    }
}

impl<I> From<SkipToken> for QueryInput<I> {
    fn from(token: SkipToken) -> Self {
        QueryInput::Skip(token)
    }
}

/// `None` reads as "not ready yet".
impl<I> From<Option<I>> for QueryInput<I> {
    fn from(input: Option<I>) -> Self {
        match input {
            Some(input) => QueryInput::Ready(input),
            None => QueryInput::Skip(SKIP),
        }
    }
}
