use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

use rusty_ulid::Ulid;

/// Opaque identity of an event group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct EventId(String);

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventId(s.to_string()))
    }
}

impl Deref for EventId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(fr: &str) -> Self {
        EventId(fr.to_string())
    }
}

impl From<String> for EventId {
    fn from(fr: String) -> Self {
        EventId(fr)
    }
}

impl From<EventId> for String {
    fn from(fr: EventId) -> Self {
        fr.0
    }
}

impl EventId {
    #[inline]
    pub fn generate() -> EventId {
        EventId(Ulid::generate().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }
}
