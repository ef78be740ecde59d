//! Proof wrappers for validated values and range-checked integers.

use std::fmt;

/// Proof that a value passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated<T>(T);

impl<T> Validated<T> {
    /// Wrap a value that has just been validated.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value.
    pub const fn as_ref(&self) -> &T {
        &self.0
    }

    /// Consume and return the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Validated<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A value fell outside an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsError<T> {
    /// Raw value provided.
    pub value: T,
    /// Inclusive minimum.
    pub min: T,
    /// Inclusive maximum.
    pub max: T,
}

impl<T: fmt::Display> fmt::Display for BoundsError<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "value {} is outside [{}, {}]",
            self.value, self.min, self.max
        )
    }
}

impl<T: fmt::Debug + fmt::Display> std::error::Error for BoundsError<T> {}

macro_rules! bounded_int {
    ($(#[$doc:meta])* $name:ident, $int:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name<const MIN: $int, const MAX: $int>($int);

        impl<const MIN: $int, const MAX: $int> $name<MIN, MAX> {
            /// Create a bounded value or return a bounds error.
            pub const fn try_new(value: $int) -> Result<Self, BoundsError<$int>> {
                if value < MIN || value > MAX {
                    Err(BoundsError { value, min: MIN, max: MAX })
                } else {
                    Ok(Self(value))
                }
            }

            /// Return the wrapped value.
            pub const fn get(self) -> $int {
                self.0
            }
        }
    };
}

bounded_int!(
    /// `u32` constrained to `MIN..=MAX`.
    BoundedU32,
    u32
);
bounded_int!(
    /// `u64` constrained to `MIN..=MAX`.
    BoundedU64,
    u64
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_accepts_inclusive_edges() {
        assert_eq!(BoundedU32::<1, 64>::try_new(1).map(BoundedU32::get), Ok(1));
        assert_eq!(BoundedU32::<1, 64>::try_new(64).map(BoundedU32::get), Ok(64));
    }

    #[test]
    fn bounded_rejects_out_of_range() {
        let error = BoundedU64::<10, 20>::try_new(21).err();
        assert_eq!(
            error,
            Some(BoundsError {
                value: 21,
                min: 10,
                max: 20
            })
        );
        assert_eq!(
            error.map(|e| e.to_string()).as_deref(),
            Some("value 21 is outside [10, 20]")
        );
    }
}
