use log::warn;

use crate::dvi2svg::machine::Machine;
use crate::error::ExecuteError;

/// `color push <color>` and `color pop`, as written by the `color` package's dvips driver.
pub fn special_color(special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
    let Some(command) = special.strip_prefix("color ") else {
        return Ok(false);
    };
    let command = command.trim();
    if let Some(color) = command.strip_prefix("push ") {
        machine.push_color(&tex_color(color));
    } else if command == "pop" {
        machine.pop_color();
    } else {
        warn!("unsupported color special `{special}`");
    }
    Ok(true)
}

/// Convert a dvips color specification into a CSS color.
pub fn tex_color(spec: &str) -> String {
    let spec = spec.trim();
    let mut words = spec.split_whitespace();
    let model = words.next().unwrap_or_default();
    let Some(values) = words.map(|w| w.parse().ok()).collect::<Option<Vec<f64>>>() else {
        warn!("could not parse color `{spec}`");
        return "black".to_string();
    };

    match (model, values.as_slice()) {
        ("gray", [g]) if *g == 0.0 => "black".to_string(),
        ("gray", [g]) if *g == 1.0 => "white".to_string(),
        ("gray", [g]) => hex_color(*g, *g, *g),
        ("rgb", [r, g, b]) => hex_color(*r, *g, *b),
        ("cmyk", [c, m, y, k]) => {
            hex_color((1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k))
        }
        (name, []) if !name.is_empty() => name.to_lowercase(),
        _ => {
            warn!("could not parse color `{spec}`");
            "black".to_string()
        }
    }
}

fn hex_color(r: f64, g: f64, b: f64) -> String {
    let channel = |x: f64| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}
