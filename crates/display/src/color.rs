use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 8-bit RGBA color. Commands accept several spellings (hex strings, CSV
/// strings, component arrays); everything normalizes to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::opaque(255, 255, 255);
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses a color from a command parameter value.
    ///
    /// Accepted forms:
    /// - hex string `"#RRGGBB"` or `"#RRGGBBAA"` (leading `#` optional)
    /// - CSV string `"r,g,b"` or `"r,g,b,a"` with 0-255 components
    /// - array of 3 or 4 numbers, either 0-255 integers or all-float
    ///   0.0-1.0 components (scaled to 0-255)
    ///
    /// Missing alpha defaults to 255. Out-of-range components clamp.
    pub fn parse(value: &Value) -> Result<Rgba, String> {
        match value {
            Value::String(text) => parse_string(text),
            Value::Array(items) => parse_components(items),
            other => Err(format!(
                "invalid color value {other} (expected hex string, csv string, or component array)"
            )),
        }
    }
}

fn parse_string(text: &str) -> Result<Rgba, String> {
    let trimmed = text.trim();
    if trimmed.contains(',') {
        let components: Result<Vec<Value>, String> = trimmed
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| format!("invalid color component '{}'", part.trim()))
            })
            .collect();
        return parse_components(&components?);
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if hex.len() != 6 && hex.len() != 8 {
        return Err(format!(
            "invalid hex color '{text}' (expected RRGGBB or RRGGBBAA)"
        ));
    }
    let mut bytes = [0u8; 4];
    bytes[3] = 255;
    for (i, byte) in bytes.iter_mut().take(hex.len() / 2).enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| format!("invalid hex color '{text}' (bad digits '{pair}')"))?;
    }
    Ok(Rgba::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn parse_components(items: &[Value]) -> Result<Rgba, String> {
    if items.len() != 3 && items.len() != 4 {
        return Err(format!(
            "invalid color array of length {} (expected 3 or 4 components)",
            items.len()
        ));
    }
    let mut numbers = Vec::with_capacity(4);
    for item in items {
        let n = item
            .as_f64()
            .ok_or_else(|| format!("invalid color component {item} (expected a number)"))?;
        numbers.push(n);
    }

    // All fractional values within the unit range read as normalized floats.
    let unit_floats = numbers.iter().all(|&n| (0.0..=1.0).contains(&n))
        && numbers.iter().any(|&n| n != n.trunc());
    let scale = if unit_floats { 255.0 } else { 1.0 };

    let mut bytes = [255u8; 4];
    for (byte, &n) in bytes.iter_mut().zip(numbers.iter()) {
        *byte = (n * scale).round().clamp(0.0, 255.0) as u8;
    }
    Ok(Rgba::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_hex_without_alpha() {
        let color = Rgba::parse(&json!("#ff8000")).expect("parse");
        assert_eq!(color, Rgba::new(255, 128, 0, 255));
    }

    #[test]
    fn parses_hex_with_alpha_and_no_hash() {
        let color = Rgba::parse(&json!("00ff0080")).expect("parse");
        assert_eq!(color, Rgba::new(0, 255, 0, 128));
    }

    #[test]
    fn parses_csv_string() {
        let color = Rgba::parse(&json!("10, 20, 30, 40")).expect("parse");
        assert_eq!(color, Rgba::new(10, 20, 30, 40));
    }

    #[test]
    fn parses_integer_array_with_default_alpha() {
        let color = Rgba::parse(&json!([100, 100, 255])).expect("parse");
        assert_eq!(color, Rgba::new(100, 100, 255, 255));
    }

    #[test]
    fn parses_unit_float_array() {
        let color = Rgba::parse(&json!([0.0, 0.5, 1.0, 1.0])).expect("parse");
        assert_eq!(color, Rgba::new(0, 128, 255, 255));
    }

    #[test]
    fn all_integral_components_read_as_bytes() {
        // [1, 1, 1] means near-black bytes, not white floats.
        let color = Rgba::parse(&json!([1, 1, 1])).expect("parse");
        assert_eq!(color, Rgba::new(1, 1, 1, 255));
    }

    #[test]
    fn clamps_out_of_range_components() {
        let color = Rgba::parse(&json!([300, -5, 128])).expect("parse");
        assert_eq!(color, Rgba::new(255, 0, 128, 255));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Rgba::parse(&json!([1, 2])).is_err());
        assert!(Rgba::parse(&json!("#ff00")).is_err());
    }

    #[test]
    fn rejects_non_numeric_component() {
        assert!(Rgba::parse(&json!([1, "x", 3])).is_err());
    }
}
