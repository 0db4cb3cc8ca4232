//! Identity types for the membership engine
//!
//! All identifiers are 64-bit. Zero is reserved in every id space and is
//! rejected as a malformed identifier at the engine boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{RollcallError, RollcallResult};

/// Capacity-bounded event identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl EventId {
    pub const ZERO: EventId = EventId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EventId(id)
    }

    /// Reject the reserved zero id
    pub fn validate(self) -> RollcallResult<Self> {
        if self == Self::ZERO {
            return Err(RollcallError::InvalidRequest("event id 0 is reserved".into()));
        }
        Ok(self)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({:016x})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Participant identity, resolved upstream by the identity collaborator
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    pub const ZERO: UserId = UserId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        UserId(id)
    }

    pub fn validate(self) -> RollcallResult<Self> {
        if self == Self::ZERO {
            return Err(RollcallError::InvalidRequest("user id 0 is reserved".into()));
        }
        Ok(self)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User({:016x})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Observer identity - one per subscribed client connection
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ObserverId(pub u64);

impl ObserverId {
    pub const ZERO: ObserverId = ObserverId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        ObserverId(id)
    }

    pub fn validate(self) -> RollcallResult<Self> {
        if self == Self::ZERO {
            return Err(RollcallError::InvalidRequest("observer id 0 is reserved".into()));
        }
        Ok(self)
    }
}

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observer({:016x})", self.0)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
