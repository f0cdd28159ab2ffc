use std::{
    fmt,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use crate::{
    EngineError, ResultEngine,
    currency::{Currency, CurrencyPreference, SymbolPosition},
};

/// Signed money amount represented as integer **minor units**.
///
/// Use this type for monetary values shown to or read from the user to
/// avoid floating-point drift. Storage keeps the raw `i64`.
///
/// ```rust
/// use engine::{Currency, CurrencyPreference, MoneyCents, SymbolPosition};
///
/// let amount = MoneyCents::new(12_34);
/// let pref = CurrencyPreference { currency: Currency::Eur, position: SymbolPosition::Suffix };
/// assert_eq!(amount.format(pref), "12.34€");
/// ```
///
/// Parsing from user input (accepts `.` or `,` as decimal separator; rejects
/// more decimals than the currency allows):
///
/// ```rust
/// use engine::{Currency, MoneyCents};
///
/// assert_eq!("10,5".parse::<MoneyCents>().unwrap().cents(), 1050);
/// assert!(MoneyCents::parse_in("12.3", Currency::Jpy).is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MoneyCents(i64);

impl MoneyCents {
    pub const ZERO: MoneyCents = MoneyCents(0);

    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the raw value in minor units.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Formats the amount with the currency symbol on the preferred side.
    #[must_use]
    pub fn format(self, pref: CurrencyPreference) -> String {
        let number = format_units(self.0, pref.currency.minor_units());
        let symbol = pref.currency.symbol();
        match pref.position {
            SymbolPosition::Prefix => match number.strip_prefix('-') {
                Some(abs) => format!("-{symbol}{abs}"),
                None => format!("{symbol}{number}"),
            },
            SymbolPosition::Suffix => format!("{number}{symbol}"),
        }
    }

    /// Parses a decimal string into minor units of `currency`.
    ///
    /// Accepts `.` or `,` as decimal separator and an optional leading
    /// `+`/`-`.
    pub fn parse_in(s: &str, currency: Currency) -> ResultEngine<Self> {
        parse_units(s, currency.minor_units()).map(MoneyCents)
    }
}

fn format_units(value: i64, units: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    if units == 0 {
        return format!("{sign}{abs}");
    }
    let scale = 10u64.pow(u32::from(units));
    let major = abs / scale;
    let minor = abs % scale;
    format!("{sign}{major}.{minor:0width$}", width = usize::from(units))
}

fn parse_units(s: &str, units: u8) -> ResultEngine<i64> {
    let empty = || EngineError::InvalidAmount("empty amount".to_string());
    let invalid = || EngineError::InvalidAmount("invalid amount".to_string());
    let overflow = || EngineError::InvalidAmount("amount too large".to_string());

    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(empty());
    }

    let (negative, rest) = if let Some(stripped) = trimmed.strip_prefix('-') {
        (true, stripped)
    } else if let Some(stripped) = trimmed.strip_prefix('+') {
        (false, stripped)
    } else {
        (false, trimmed)
    };

    let rest = rest.trim().replace(',', ".");
    if rest.is_empty() {
        return Err(empty());
    }

    let mut parts = rest.split('.');
    let major_str = parts.next().ok_or_else(invalid)?;
    let minor_str = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return Err(invalid());
    }

    if major_str.is_empty() || !major_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if !minor_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if minor_str.len() > usize::from(units) {
        return Err(EngineError::InvalidAmount("too many decimals".to_string()));
    }

    let major: i64 = major_str.parse().map_err(|_| overflow())?;
    let mut minor: i64 = if minor_str.is_empty() {
        0
    } else {
        minor_str.parse().map_err(|_| invalid())?
    };
    for _ in minor_str.len()..usize::from(units) {
        minor *= 10;
    }

    let total = major
        .checked_mul(10i64.pow(u32::from(units)))
        .and_then(|v| v.checked_add(minor))
        .ok_or_else(overflow)?;

    if negative {
        total.checked_neg().ok_or_else(overflow)
    } else {
        Ok(total)
    }
}

impl fmt::Display for MoneyCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.0, 2))
    }
}

impl From<i64> for MoneyCents {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<MoneyCents> for i64 {
    fn from(value: MoneyCents) -> Self {
        value.0
    }
}

impl Add for MoneyCents {
    type Output = MoneyCents;

    fn add(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for MoneyCents {
    fn add_assign(&mut self, rhs: MoneyCents) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for MoneyCents {
    type Output = MoneyCents;

    fn sub(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for MoneyCents {
    fn sub_assign(&mut self, rhs: MoneyCents) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Neg for MoneyCents {
    type Output = MoneyCents;

    fn neg(self) -> Self::Output {
        MoneyCents(self.0.saturating_neg())
    }
}

impl FromStr for MoneyCents {
    type Err = EngineError;

    /// Parses a decimal string with at most two fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_units(s, 2).map(MoneyCents)
    }
}
