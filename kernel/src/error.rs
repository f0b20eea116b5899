//! Kernel error values.
//!
//! Recoverable failures are reported to callers as negative errno-style
//! values wrapped in [`Error`]; `0` is success. Programmer errors
//! (ownership violations, type-tag mismatch, IRQ-state underflow) are not
//! `Error`s, they panic.

use core::fmt;

pub mod code {
    /// Operation would block.
    pub const EAGAIN: super::Error = super::Error(-11);
    /// Out of memory.
    pub const ENOMEM: super::Error = super::Error(-12);
    /// Resource busy.
    pub const EBUSY: super::Error = super::Error(-16);
    /// Invalid argument, bad state, or destroyed object.
    pub const EINVAL: super::Error = super::Error(-22);
    /// Timeout elapsed before the event occurred.
    pub const ETIMEDOUT: super::Error = super::Error(-110);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Error(i32);

impl Error {
    pub const fn from_errno(errno: i32) -> Error {
        Error(errno)
    }

    pub const fn to_errno(self) -> i32 {
        self.0
    }

    /// Map a raw sleep result to a `Result`: zero is a normal wakeup.
    pub fn check(raw: i32) -> Result<(), Error> {
        if raw == 0 {
            Ok(())
        } else {
            Err(Error(raw))
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            code::EAGAIN => "Try again",
            code::ENOMEM => "Cannot allocate memory",
            code::EBUSY => "Device or resource busy",
            code::EINVAL => "Invalid argument",
            code::ETIMEDOUT => "Timed out",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({}): {}", self.0, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_maps_zero_to_ok() {
        assert_eq!(Error::check(0), Ok(()));
        assert_eq!(Error::check(code::ETIMEDOUT.to_errno()), Err(code::ETIMEDOUT));
    }

    #[test]
    fn names() {
        assert_eq!(code::EAGAIN.name(), "Try again");
        assert_eq!(Error::from_errno(-9999).name(), "Unknown error");
    }
}
