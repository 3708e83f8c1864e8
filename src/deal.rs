//! Deal payload and message template.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Filename the provider attaches to image sends.
pub const IMAGE_FILENAME: &str = "deal.jpg";

/// An opaque deal field: substituted into the template as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValue(pub Value);

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::Null => Ok(()),
            Value::String(s) => f.write_str(s),
            Value::Number(n) => write_number(f, n),
            other => write!(f, "{}", other),
        }
    }
}

/// Integral floats print without a fractional part (`100.0` as `100`).
fn write_number(f: &mut fmt::Formatter<'_>, n: &Number) -> fmt::Result {
    match n.as_f64() {
        Some(x) if n.is_f64() && x.is_finite() && x.fract() == 0.0 && x.abs() < 1e21 => {
            if x == 0.0 {
                f.write_str("0")
            } else {
                write!(f, "{:.0}", x)
            }
        }
        _ => write!(f, "{}", n),
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue(Value::String(s.to_string()))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue(Value::from(n))
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue(Value::from(n))
    }
}

/// Product offer supplied by the caller. Values are not validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deal {
    pub title: FieldValue,
    pub original_price: FieldValue,
    pub price: FieldValue,
    pub discount: FieldValue,
    pub rating: FieldValue,
    pub link: FieldValue,
    /// URL, provider-side path or `data:` URI.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_image"
    )]
    pub image: Option<String>,
}

/// Anything but a string (`false`, `0`, `{}`) means no image.
fn deserialize_image<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

impl Deal {
    /// Image reference, if the deal carries a non-empty one.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().filter(|s| !s.is_empty())
    }
}

/// Render the broadcast text for a deal. No escaping is applied.
pub fn format_message(deal: &Deal) -> String {
    format!(
        "*OFERTA ENCONTRADA!* 🚀\n\n\
         *{}*\n\
         💰 De: ~R$ {}~\n\
         🔥 *Por: R$ {}*\n\
         📉 Desconto: {}%\n\
         ⭐ {}\n\n\
         🔗 *Link:* {}",
        deal.title, deal.original_price, deal.price, deal.discount, deal.rating, deal.link
    )
}
