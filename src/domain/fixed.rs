//! Fixed-point price arithmetic for the strategy inner loop.
//!
//! `FixedPrice` is a signed 64-bit integer carrying nine fractional digits
//! (scale 10⁹). It exists so edge detection can compound rates without
//! allocating or rounding through `Decimal`. All public APIs stay decimal;
//! only the strategy evaluation path works in fixed point.
//!
//! Multiplication and division widen through `i128`, so they cannot panic on
//! intermediate overflow. Callers bound inputs well below 2⁶³ via price
//! sanity limits.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Number of nano-units per whole unit (nine decimal places).
pub const PRICE_SCALE: i64 = 1_000_000_000;

/// A price or rate in nano-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FixedPrice(i64);

impl FixedPrice {
    pub const ZERO: FixedPrice = FixedPrice(0);
    pub const ONE: FixedPrice = FixedPrice(PRICE_SCALE);

    /// Wrap a raw nano-unit value.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw nano-unit value.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Convert a basis-point count: `bps * S / 10_000`.
    pub const fn from_bps(bps: i64) -> Self {
        Self(bps * (PRICE_SCALE / 10_000))
    }

    /// Convert from decimal, truncating below 10⁻⁹.
    pub fn from_decimal(d: Decimal) -> Self {
        let scaled = d * Decimal::from(PRICE_SCALE);
        Self(scaled.trunc().to_i64().unwrap_or(0))
    }

    /// Convert back to decimal. Round-trip loss is at most 10⁻⁹.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 9)
    }

    pub const fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    pub const fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }

    /// `a * b / S`, widened through i128.
    pub fn mul(self, other: Self) -> Self {
        let wide = self.0 as i128 * other.0 as i128 / PRICE_SCALE as i128;
        Self(wide as i64)
    }

    /// `a * S / b`, widened through i128. Division by zero yields zero.
    pub fn div(self, other: Self) -> Self {
        if other.0 == 0 {
            return Self::ZERO;
        }
        let wide = self.0 as i128 * PRICE_SCALE as i128 / other.0 as i128;
        Self(wide as i64)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for FixedPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}
