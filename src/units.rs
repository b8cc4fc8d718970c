//! Dimensioned quantities.
//!
//! A [`Quantity`] is a value tagged with a [`Unit`]; every unit carries its
//! scale to SI and a [`Dimensions`] exponent vector. Addition, subtraction
//! and conversion check dimensions on every call and fail with
//! [`HelioError::IncompatibleUnits`] instead of converting implicitly.
//!
//! ```rust
//! use helio_harness::units::{self, Quantity};
//!
//! let distance = units::au().sub(&units::r_sun()).unwrap();
//! let speed = Quantity::parse("500 km/s").unwrap();
//! let delay = units::travel_time(&distance, &speed).unwrap();
//! let days = delay.value_in("d").unwrap();
//! assert!((days - 3.447).abs() < 0.01);
//! ```

use chrono::TimeDelta;
use std::fmt;

use crate::error::{HelioError, Result};

/// Astronomical unit in metres (IAU 2012).
pub const AU_M: f64 = 1.495_978_707e11;
/// Nominal solar radius in metres (IAU 2015 B3).
pub const R_SUN_M: f64 = 6.957e8;

/// Exponents over the base dimensions this crate tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub length: i8,
    pub mass: i8,
    pub time: i8,
    pub current: i8,
    pub angle: i8,
}

impl Dimensions {
    pub const NONE: Dimensions = Dimensions::new(0, 0, 0, 0, 0);
    pub const LENGTH: Dimensions = Dimensions::new(1, 0, 0, 0, 0);
    pub const MASS: Dimensions = Dimensions::new(0, 1, 0, 0, 0);
    pub const TIME: Dimensions = Dimensions::new(0, 0, 1, 0, 0);
    pub const CURRENT: Dimensions = Dimensions::new(0, 0, 0, 1, 0);
    pub const ANGLE: Dimensions = Dimensions::new(0, 0, 0, 0, 1);

    pub const fn new(length: i8, mass: i8, time: i8, current: i8, angle: i8) -> Self {
        Self {
            length,
            mass,
            time,
            current,
            angle,
        }
    }

    /// Exponents of a product, or `None` if any exponent leaves `i8`.
    pub fn checked_mul(self, other: Dimensions) -> Option<Dimensions> {
        Some(Dimensions::new(
            self.length.checked_add(other.length)?,
            self.mass.checked_add(other.mass)?,
            self.time.checked_add(other.time)?,
            self.current.checked_add(other.current)?,
            self.angle.checked_add(other.angle)?,
        ))
    }

    pub fn checked_div(self, other: Dimensions) -> Option<Dimensions> {
        Some(Dimensions::new(
            self.length.checked_sub(other.length)?,
            self.mass.checked_sub(other.mass)?,
            self.time.checked_sub(other.time)?,
            self.current.checked_sub(other.current)?,
            self.angle.checked_sub(other.angle)?,
        ))
    }

    pub fn checked_powi(self, n: i8) -> Option<Dimensions> {
        Some(Dimensions::new(
            self.length.checked_mul(n)?,
            self.mass.checked_mul(n)?,
            self.time.checked_mul(n)?,
            self.current.checked_mul(n)?,
            self.angle.checked_mul(n)?,
        ))
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Dimensions::NONE
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let parts = [
            ("L", self.length),
            ("M", self.mass),
            ("T", self.time),
            ("I", self.current),
            ("A", self.angle),
        ];
        let rendered: Vec<String> = parts
            .iter()
            .filter(|(_, exp)| *exp != 0)
            .map(|(name, exp)| {
                if *exp == 1 {
                    name.to_string()
                } else {
                    format!("{}^{}", name, exp)
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// A unit: display symbol, multiplicative scale to SI, and dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    symbol: String,
    scale: f64,
    dims: Dimensions,
}

impl Unit {
    pub fn new(symbol: impl Into<String>, scale: f64, dims: Dimensions) -> Self {
        Self {
            symbol: symbol.into(),
            scale,
            dims,
        }
    }

    pub fn dimensionless() -> Self {
        Unit::new("", 1.0, Dimensions::NONE)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// Parse a unit expression such as `km/s`, `kg m / s2`, `cm-3`,
    /// `m s^-1` or `R_sun`.
    pub fn parse(expr: &str) -> Result<Unit> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Unit::dimensionless());
        }

        let normalized = trimmed.replace("**", "^");
        let mut scale = 1.0;
        let mut dims = Dimensions::NONE;
        let mut invert_next = false;
        let mut saw_factor = false;

        for token in tokenize(&normalized) {
            if token == "/" {
                if invert_next || !saw_factor {
                    return Err(HelioError::Parse(format!(
                        "malformed unit expression '{}'",
                        trimmed
                    )));
                }
                invert_next = true;
                continue;
            }

            let (name, exp) = split_exponent(&token).ok_or_else(|| {
                HelioError::Parse(format!("malformed unit factor '{}' in '{}'", token, trimmed))
            })?;
            let (factor_scale, factor_dims) = named_unit(name).ok_or_else(|| {
                HelioError::Parse(format!("unknown unit '{}' in '{}'", name, trimmed))
            })?;

            let exp = if invert_next { exp.checked_neg() } else { Some(exp) };
            let next = exp.and_then(|exp| {
                let product = dims.checked_mul(factor_dims.checked_powi(exp)?)?;
                Some((exp, product))
            });
            let Some((exp, next_dims)) = next else {
                return Err(HelioError::Parse(format!(
                    "exponent out of range in '{}'",
                    trimmed
                )));
            };
            scale *= factor_scale.powi(exp as i32);
            dims = next_dims;
            invert_next = false;
            saw_factor = true;
        }

        if invert_next {
            return Err(HelioError::Parse(format!(
                "unit expression '{}' ends with '/'",
                trimmed
            )));
        }

        Ok(Unit::new(trimmed, scale, dims))
    }

    pub fn mul(&self, other: &Unit) -> Result<Unit> {
        let dims = self
            .dims
            .checked_mul(other.dims)
            .ok_or_else(|| self.overflow("*", other))?;
        let symbol = match (self.symbol.is_empty(), other.symbol.is_empty()) {
            (true, _) => other.symbol.clone(),
            (_, true) => self.symbol.clone(),
            _ => format!("{} {}", self.symbol, other.symbol),
        };
        Ok(Unit::new(symbol, self.scale * other.scale, dims))
    }

    pub fn div(&self, other: &Unit) -> Result<Unit> {
        let dims = self
            .dims
            .checked_div(other.dims)
            .ok_or_else(|| self.overflow("/", other))?;
        let denominator = if other.symbol.contains([' ', '/']) {
            format!("({})", other.symbol)
        } else {
            other.symbol.clone()
        };
        let symbol = match (self.symbol.is_empty(), other.symbol.is_empty()) {
            (_, true) => self.symbol.clone(),
            (true, false) => format!("1 / {}", denominator),
            _ => format!("{} / {}", self.symbol, denominator),
        };
        Ok(Unit::new(symbol, self.scale / other.scale, dims))
    }

    fn overflow(&self, op: &str, other: &Unit) -> HelioError {
        HelioError::IncompatibleUnits(format!(
            "'{}' {} '{}' has a dimension exponent out of range",
            self.symbol, op, other.symbol
        ))
    }

    /// Factor that converts a value in `self` into a value in `to`.
    pub fn conversion_factor(&self, to: &Unit) -> Result<f64> {
        if !self.is_compatible(to) {
            return Err(HelioError::IncompatibleUnits(format!(
                "cannot convert '{}' [{}] to '{}' [{}]",
                self.symbol, self.dims, to.symbol, to.dims
            )));
        }
        Ok(self.scale / to.scale)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in expr.chars() {
        match ch {
            '/' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push("/".to_string());
            }
            c if c == '*' || c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Split `cm-3`, `s^2`, `m` into a unit name and an integer exponent.
fn split_exponent(token: &str) -> Option<(&str, i8)> {
    if let Some((name, exp)) = token.split_once('^') {
        let exp = exp.trim_start_matches('(').trim_end_matches(')');
        return Some((name, exp.parse().ok()?));
    }
    let digits_start = token
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_start {
        // A bare number such as "1" in "1/s" is a dimensionless factor.
        Some(0) => Some(("", 1)),
        Some(mut idx) => {
            if token[..idx].ends_with(['-', '+']) {
                idx -= 1;
            }
            let name = &token[..idx];
            if name.is_empty() {
                return None;
            }
            Some((name, token[idx..].parse().ok()?))
        }
        None => Some((token, 1)),
    }
}

fn named_unit(name: &str) -> Option<(f64, Dimensions)> {
    let l = Dimensions::LENGTH;
    let m = Dimensions::MASS;
    let t = Dimensions::TIME;
    let a = Dimensions::ANGLE;
    // Tesla: kg s^-2 A^-1
    let tesla = Dimensions::new(0, 1, -2, -1, 0);
    let energy = Dimensions::new(2, 1, -2, 0, 0);

    let entry = match name {
        "" => (1.0, Dimensions::NONE),
        "m" => (1.0, l),
        "km" => (1e3, l),
        "cm" => (1e-2, l),
        "mm" => (1e-3, l),
        "um" | "µm" | "micron" => (1e-6, l),
        "nm" => (1e-9, l),
        "Angstrom" | "angstrom" | "AA" | "Å" => (1e-10, l),
        "AU" | "au" => (AU_M, l),
        "R_sun" | "Rsun" | "solRad" => (R_SUN_M, l),
        "s" | "sec" => (1.0, t),
        "ms" => (1e-3, t),
        "min" => (60.0, t),
        "h" | "hr" | "hour" => (3600.0, t),
        "d" | "day" => (86_400.0, t),
        "yr" | "year" => (365.25 * 86_400.0, t),
        "Hz" => (1.0, Dimensions::new(0, 0, -1, 0, 0)),
        "kg" => (1.0, m),
        "g" => (1e-3, m),
        "A" => (1.0, Dimensions::CURRENT),
        "T" => (1.0, tesla),
        "G" => (1e-4, tesla),
        "nT" => (1e-9, tesla),
        "N" => (1.0, Dimensions::new(1, 1, -2, 0, 0)),
        "J" => (1.0, energy),
        "erg" => (1e-7, energy),
        "eV" => (1.602_176_634e-19, energy),
        "W" => (1.0, Dimensions::new(2, 1, -3, 0, 0)),
        "rad" => (1.0, a),
        "deg" => (std::f64::consts::PI / 180.0, a),
        "arcmin" => (std::f64::consts::PI / (180.0 * 60.0), a),
        "arcsec" => (std::f64::consts::PI / (180.0 * 3600.0), a),
        _ => return None,
    };
    Some(entry)
}

/// A numeric value with an explicit unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    value: f64,
    unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// `Quantity::with_unit(500.0, "km/s")`
    pub fn with_unit(value: f64, unit: &str) -> Result<Self> {
        Ok(Self::new(value, Unit::parse(unit)?))
    }

    /// Parse `"500 km/s"`, `"1 AU"`, `"193Angstrom"` or `"3.2e-9 T"`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let numeric_len = text
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);

        // Shrink until the prefix is a number, so "5erg" parses as 5 erg.
        for end in (1..=numeric_len).rev() {
            if let Ok(value) = text[..end].parse::<f64>() {
                return Quantity::with_unit(value, &text[end..]);
            }
        }
        Err(HelioError::Parse(format!(
            "'{}' does not start with a number",
            text
        )))
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn dims(&self) -> Dimensions {
        self.unit.dims
    }

    pub fn si_value(&self) -> f64 {
        self.value * self.unit.scale
    }

    pub fn to(&self, unit: &Unit) -> Result<Quantity> {
        let factor = self.unit.conversion_factor(unit)?;
        Ok(Quantity::new(self.value * factor, unit.clone()))
    }

    pub fn to_unit(&self, expr: &str) -> Result<Quantity> {
        self.to(&Unit::parse(expr)?)
    }

    pub fn value_in(&self, expr: &str) -> Result<f64> {
        Ok(self.to_unit(expr)?.value)
    }

    /// Sum expressed in the left operand's unit.
    pub fn add(&self, other: &Quantity) -> Result<Quantity> {
        let rhs = other.to(&self.unit).map_err(|_| self.mismatch("add", other))?;
        Ok(Quantity::new(self.value + rhs.value, self.unit.clone()))
    }

    /// Difference expressed in the left operand's unit.
    pub fn sub(&self, other: &Quantity) -> Result<Quantity> {
        let rhs = other
            .to(&self.unit)
            .map_err(|_| self.mismatch("subtract", other))?;
        Ok(Quantity::new(self.value - rhs.value, self.unit.clone()))
    }

    pub fn mul(&self, other: &Quantity) -> Result<Quantity> {
        Ok(Quantity::new(
            self.value * other.value,
            self.unit.mul(&other.unit)?,
        ))
    }

    pub fn div(&self, other: &Quantity) -> Result<Quantity> {
        Ok(Quantity::new(
            self.value / other.value,
            self.unit.div(&other.unit)?,
        ))
    }

    /// A time quantity as a [`TimeDelta`], rounded to the millisecond.
    pub fn to_duration(&self) -> Result<TimeDelta> {
        let ms = self.value_in("ms")?.round();
        if ms.is_finite() && ms.abs() < i64::MAX as f64 {
            if let Some(delta) = TimeDelta::try_milliseconds(ms as i64) {
                return Ok(delta);
            }
        }
        Err(HelioError::InvalidQuery(format!(
            "{} is too long to represent as a duration",
            self
        )))
    }

    pub fn scale(&self, factor: f64) -> Quantity {
        Quantity::new(self.value * factor, self.unit.clone())
    }

    fn mismatch(&self, op: &str, other: &Quantity) -> HelioError {
        HelioError::IncompatibleUnits(format!(
            "cannot {} '{}' [{}] and '{}' [{}]",
            op,
            self.unit.symbol,
            self.unit.dims,
            other.unit.symbol,
            other.unit.dims
        ))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.symbol.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit.symbol)
        }
    }
}

pub fn au() -> Quantity {
    Quantity::new(1.0, Unit::new("AU", AU_M, Dimensions::LENGTH))
}

pub fn r_sun() -> Quantity {
    Quantity::new(1.0, Unit::new("R_sun", R_SUN_M, Dimensions::LENGTH))
}

/// Time for something moving at `speed` to cover `distance`.
pub fn travel_time(distance: &Quantity, speed: &Quantity) -> Result<Quantity> {
    if distance.dims() != Dimensions::LENGTH {
        return Err(HelioError::IncompatibleUnits(format!(
            "distance must be a length, got '{}' [{}]",
            distance.unit, distance.unit.dims
        )));
    }
    let elapsed = distance.div(speed)?;
    if elapsed.dims() != Dimensions::TIME {
        return Err(HelioError::IncompatibleUnits(format!(
            "'{}' / '{}' is [{}], not a time",
            distance.unit, speed.unit, elapsed.unit.dims
        )));
    }
    if !elapsed.value.is_finite() || elapsed.value < 0.0 {
        return Err(HelioError::InvalidQuery(format!(
            "travel time is not a finite positive duration ({})",
            elapsed
        )));
    }
    Ok(elapsed)
}
