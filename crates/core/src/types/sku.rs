//! Stock-keeping unit identifiers.
//!
//! A SKU addresses exactly one product-variant-size combination and is the
//! unit of inventory mutation. SKUs are derived deterministically from the
//! product base code, the variant color, and the size, so the same catalog
//! input always produces the same inventory keys.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Sku`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum SkuError {
    /// The input string is empty.
    #[error("sku cannot be empty")]
    Empty,
    /// The input contains whitespace.
    #[error("sku cannot contain whitespace")]
    Whitespace,
}

/// Garment sizes carried by the catalog.
///
/// The two-letter codes are the ones embedded in derived SKUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeCode {
    S,
    M,
    L,
    Xl,
    Xxl,
}

impl SizeCode {
    /// Two-letter SKU segment for this size.
    #[must_use]
    pub const fn sku_segment(self) -> &'static str {
        match self {
            Self::S => "SM",
            Self::M => "MD",
            Self::L => "LG",
            Self::Xl => "XL",
            Self::Xxl => "XX",
        }
    }

    /// Customer-facing label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::S => "s",
            Self::M => "m",
            Self::L => "l",
            Self::Xl => "xl",
            Self::Xxl => "xxl",
        }
    }
}

impl fmt::Display for SizeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for SizeCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(Self::S),
            "m" => Ok(Self::M),
            "l" => Ok(Self::L),
            "xl" => Ok(Self::Xl),
            "xxl" => Ok(Self::Xxl),
            _ => Err(format!("invalid size code: {s}")),
        }
    }
}

/// A stock-keeping unit identifier, e.g. `UT-BLK-MD`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    /// Parse a `Sku` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or contains whitespace.
    pub fn parse(s: &str) -> Result<Self, SkuError> {
        if s.is_empty() {
            return Err(SkuError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(SkuError::Whitespace);
        }
        Ok(Self(s.to_uppercase()))
    }

    /// Derive the SKU for a product base code, variant color, and size.
    ///
    /// The color segment is the first letter of the first word plus the
    /// first two letters of the second word for multi-word colors
    /// ("jet black" -> "JBL"), otherwise the first three letters
    /// ("black" -> "BLA"). The result is `{BASE}-{COLOR}-{SIZE}`,
    /// uppercased.
    #[must_use]
    pub fn derive(base_code: &str, color: &str, size: SizeCode) -> Self {
        let mut words = color.split_whitespace();
        let first = words.next().unwrap_or_default();
        let color_segment = words.next().map_or_else(
            || first.chars().take(3).collect::<String>(),
            |second| {
                let mut seg: String = first.chars().take(1).collect();
                seg.extend(second.chars().take(2));
                seg
            },
        );

        Self(format!("{base_code}-{color_segment}-{}", size.sku_segment()).to_uppercase())
    }

    /// Returns the SKU as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Sku` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Sku {
    type Err = SkuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Sku {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_single_word_color() {
        let sku = Sku::derive("UT", "black", SizeCode::M);
        assert_eq!(sku.as_str(), "UT-BLA-MD");
    }

    #[test]
    fn test_derive_multi_word_color() {
        let sku = Sku::derive("UT", "jet black", SizeCode::Xl);
        assert_eq!(sku.as_str(), "UT-JBL-XL");
    }

    #[test]
    fn test_derive_uppercases_base() {
        let sku = Sku::derive("ut", "navy", SizeCode::Xxl);
        assert_eq!(sku.as_str(), "UT-NAV-XX");
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(
            Sku::derive("SC", "olive green", SizeCode::S),
            Sku::derive("SC", "olive green", SizeCode::S)
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Sku::parse(""), Err(SkuError::Empty)));
    }

    #[test]
    fn test_parse_rejects_whitespace() {
        assert!(matches!(Sku::parse("A BLK M"), Err(SkuError::Whitespace)));
    }

    #[test]
    fn test_parse_uppercases() {
        let sku = Sku::parse("a-blk-m").unwrap();
        assert_eq!(sku.as_str(), "A-BLK-M");
    }

    #[test]
    fn test_size_segments() {
        assert_eq!(SizeCode::S.sku_segment(), "SM");
        assert_eq!(SizeCode::M.sku_segment(), "MD");
        assert_eq!(SizeCode::L.sku_segment(), "LG");
        assert_eq!(SizeCode::Xl.sku_segment(), "XL");
        assert_eq!(SizeCode::Xxl.sku_segment(), "XX");
    }

    #[test]
    fn test_serde_transparent() {
        let sku = Sku::parse("A-BLK-M").unwrap();
        let json = serde_json::to_string(&sku).unwrap();
        assert_eq!(json, "\"A-BLK-M\"");
    }
}
