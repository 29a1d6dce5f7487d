//! Fixed-point money. Integer cents, never a float (§9 design note: "Pick one
//! and declare it normative").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

/// A signed monetary amount in integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub fn from_major_minor(major: i64, minor_cents: i64) -> Self {
        Cents(major * 100 + minor_cents)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Cents {
    type Output = Cents;
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl AddAssign for Cents {
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl Sub for Cents {
    type Output = Cents;
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;
    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_dollars_and_cents() {
        assert_eq!(Cents(2160).to_string(), "21.60");
        assert_eq!(Cents(-500).to_string(), "-5.00");
        assert_eq!(Cents(5).to_string(), "0.05");
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = Cents::from_major_minor(10, 0);
        let b = Cents::from_major_minor(1, 60);
        assert_eq!((a + b).0, 1160);
    }
}
