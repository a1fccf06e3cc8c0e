use core::fmt;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

/// Name and driver of a transport endpoint
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportInfo {
    pub name: String,
    pub driver: String,
}

impl fmt::Display for TransportInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.driver, self.name)
    }
}
