use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A bitcoin amount in satoshis.
///
/// All balances, donations and invoice amounts in the system are
/// denominated in whole satoshis; there are no fractional amounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Satoshis(i64);

impl Satoshis {
    /// Creates an amount from a raw satoshi value.
    pub fn new(sats: i64) -> Self {
        Self(sats)
    }

    /// The zero amount.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw satoshi value.
    pub fn sats(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Satoshis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sats", self.0)
    }
}

impl From<i64> for Satoshis {
    fn from(sats: i64) -> Self {
        Self(sats)
    }
}

impl From<Satoshis> for i64 {
    fn from(amount: Satoshis) -> Self {
        amount.0
    }
}

impl Add for Satoshis {
    type Output = Satoshis;

    fn add(self, rhs: Satoshis) -> Satoshis {
        Satoshis(self.0 + rhs.0)
    }
}

impl AddAssign for Satoshis {
    fn add_assign(&mut self, rhs: Satoshis) {
        self.0 += rhs.0;
    }
}

impl Sub for Satoshis {
    type Output = Satoshis;

    fn sub(self, rhs: Satoshis) -> Satoshis {
        Satoshis(self.0 - rhs.0)
    }
}

impl SubAssign for Satoshis {
    fn sub_assign(&mut self, rhs: Satoshis) {
        self.0 -= rhs.0;
    }
}

impl Sum for Satoshis {
    fn sum<I: Iterator<Item = Satoshis>>(iter: I) -> Satoshis {
        iter.fold(Satoshis::zero(), Add::add)
    }
}
