// src/utils/units.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Measurement units an inventory item or line item may be counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Unit {
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "kg")]
    Kilogram,
    #[serde(rename = "oz")]
    Ounce,
    #[serde(rename = "lb")]
    Pound,
    #[serde(rename = "mL")]
    Milliliter,
    #[serde(rename = "L")]
    Liter,
    #[serde(rename = "fl oz (US)")]
    FluidOunce,
    #[serde(rename = "gallon (US)")]
    Gallon,
    #[serde(rename = "case")]
    Case,
    #[serde(rename = "bag")]
    Bag,
    #[serde(rename = "bottle")]
    Bottle,
    #[serde(rename = "can")]
    Can,
    #[serde(rename = "piece")]
    Piece,
}

impl Unit {
    pub const ALL: [Unit; 13] = [
        Unit::Gram,
        Unit::Kilogram,
        Unit::Ounce,
        Unit::Pound,
        Unit::Milliliter,
        Unit::Liter,
        Unit::FluidOunce,
        Unit::Gallon,
        Unit::Case,
        Unit::Bag,
        Unit::Bottle,
        Unit::Can,
        Unit::Piece,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::Kilogram => "kg",
            Unit::Ounce => "oz",
            Unit::Pound => "lb",
            Unit::Milliliter => "mL",
            Unit::Liter => "L",
            Unit::FluidOunce => "fl oz (US)",
            Unit::Gallon => "gallon (US)",
            Unit::Case => "case",
            Unit::Bag => "bag",
            Unit::Bottle => "bottle",
            Unit::Can => "can",
            Unit::Piece => "piece",
        }
    }

    /// Counting and packaging units have no universal weight or volume
    /// equivalent, so they only ever convert to themselves.
    pub fn is_convertible(self) -> bool {
        !matches!(
            self,
            Unit::Case | Unit::Bag | Unit::Bottle | Unit::Can | Unit::Piece
        )
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown unit '{0}'")]
pub struct UnknownUnit(pub String);

impl FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s.trim())
            .ok_or_else(|| UnknownUnit(s.to_string()))
    }
}

/// Registered factor for `from -> to`. Both directions are listed explicitly;
/// reciprocals are never derived.
fn factor(from: Unit, to: Unit) -> Option<f64> {
    use Unit::*;

    let factor = match (from, to) {
        // weight
        (Kilogram, Gram) => 1000.0,
        (Gram, Kilogram) => 0.001,
        (Kilogram, Pound) => 2.20462,
        (Pound, Kilogram) => 0.453592,
        (Kilogram, Ounce) => 35.274,
        (Ounce, Kilogram) => 0.0283495,
        (Gram, Pound) => 0.00220462,
        (Pound, Gram) => 453.592,
        (Gram, Ounce) => 0.035274,
        (Ounce, Gram) => 28.3495,
        (Pound, Ounce) => 16.0,
        (Ounce, Pound) => 0.0625,
        // volume
        (Liter, Milliliter) => 1000.0,
        (Milliliter, Liter) => 0.001,
        (Liter, Gallon) => 0.264172,
        (Gallon, Liter) => 3.78541,
        (Liter, FluidOunce) => 33.814,
        (FluidOunce, Liter) => 0.0295735,
        (Milliliter, Gallon) => 0.000264172,
        (Gallon, Milliliter) => 3785.41,
        (Milliliter, FluidOunce) => 0.033814,
        (FluidOunce, Milliliter) => 29.5735,
        (Gallon, FluidOunce) => 128.0,
        (FluidOunce, Gallon) => 0.0078125,
        _ => return None,
    };
    Some(factor)
}

/// Converts `value` from one unit to another.
///
/// Identity conversion always succeeds, even for counting units. Any other
/// pair involving a non-convertible unit, or a pair with no registered
/// factor (weight to volume), yields `None`.
pub fn convert(value: f64, from: Unit, to: Unit) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    if !from.is_convertible() || !to.is_convertible() {
        return None;
    }
    factor(from, to).map(|f| value * f)
}
