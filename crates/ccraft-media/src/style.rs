//! Caption style to ASS `force_style` translation.
//!
//! The style document stays opaque everywhere else in the pipeline. Only the
//! keys below are understood; anything else is ignored.
//!
//! | key | ASS field |
//! |---|---|
//! | `fontFamily` | `FontName` |
//! | `fontSize` | `FontSize` |
//! | `fontColor` | `PrimaryColour` |
//! | `strokeColor` / `strokeWidth` | `OutlineColour` / `Outline` |
//! | `backgroundColor` / `backgroundOpacity` | `BackColour` + `BorderStyle=4` |
//! | `position` | `Alignment` (top 8, center 5, bottom 2) |
//! | `marginVertical` / `marginHorizontal` | `MarginV` / `MarginL` + `MarginR` |
//! | `shadowEnabled` / `shadowOffset.x` | `Shadow` |

use serde_json::{Map, Value};

use ccraft_models::CaptionStyle;

/// Build the `force_style` value for a caption style, if it sets anything.
pub fn force_style(style: &CaptionStyle) -> Option<String> {
    let fields = style.as_value().as_object()?;
    let mut parts: Vec<String> = Vec::new();

    if let Some(font) = str_field(fields, "fontFamily") {
        parts.push(format!("FontName={}", font));
    }
    if let Some(size) = num_field(fields, "fontSize") {
        parts.push(format!("FontSize={}", size.round() as i64));
    }
    if let Some(colour) = str_field(fields, "fontColor").and_then(|c| ass_colour(c, 1.0)) {
        parts.push(format!("PrimaryColour={}", colour));
    }
    if let Some(colour) = str_field(fields, "strokeColor").and_then(|c| ass_colour(c, 1.0)) {
        parts.push(format!("OutlineColour={}", colour));
    }
    if let Some(width) = num_field(fields, "strokeWidth") {
        parts.push(format!("Outline={}", width));
    }
    if let Some(background) = str_field(fields, "backgroundColor") {
        let opacity = num_field(fields, "backgroundOpacity").unwrap_or(1.0);
        if let Some(colour) = ass_colour(background, opacity) {
            parts.push(format!("BackColour={}", colour));
            parts.push("BorderStyle=4".to_string());
        }
    }
    if let Some(alignment) = str_field(fields, "position").and_then(alignment) {
        parts.push(format!("Alignment={}", alignment));
    }
    if let Some(margin) = num_field(fields, "marginVertical") {
        parts.push(format!("MarginV={}", margin.round() as i64));
    }
    if let Some(margin) = num_field(fields, "marginHorizontal") {
        let margin = margin.round() as i64;
        parts.push(format!("MarginL={}", margin));
        parts.push(format!("MarginR={}", margin));
    }
    match fields.get("shadowEnabled").and_then(Value::as_bool) {
        Some(true) => {
            let depth = fields
                .get("shadowOffset")
                .and_then(|o| o.get("x"))
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            parts.push(format!("Shadow={}", depth.abs()));
        }
        Some(false) => parts.push("Shadow=0".to_string()),
        None => {}
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

fn str_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn num_field(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields
        .get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
}

fn alignment(position: &str) -> Option<u8> {
    match position {
        "top" => Some(8),
        "center" | "middle" => Some(5),
        "bottom" => Some(2),
        _ => None,
    }
}

/// `&HAABBGGRR` from a CSS-ish colour; ASS alpha is inverted (00 opaque).
fn ass_colour(colour: &str, opacity: f64) -> Option<String> {
    let (r, g, b) = match colour.to_ascii_lowercase().as_str() {
        "white" => (255, 255, 255),
        "black" => (0, 0, 0),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "cyan" => (0, 255, 255),
        "magenta" => (255, 0, 255),
        hex => {
            let hex = hex.strip_prefix('#')?;
            if hex.len() != 6 || !hex.is_ascii() {
                return None;
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            (channel(0)?, channel(2)?, channel(4)?)
        }
    };

    let alpha = ((1.0 - opacity.clamp(0.0, 1.0)) * 255.0).round() as u8;
    Some(format!("&H{:02X}{:02X}{:02X}{:02X}", alpha, b, g, r))
}
