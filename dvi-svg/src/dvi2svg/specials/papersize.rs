use log::warn;

use crate::dvi2svg::machine::Machine;
use crate::error::ExecuteError;

/// `papersize=<width>,<height>`, as written by `geometry` and `hyperref`.
pub fn special_papersize(special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
    let Some(size) = special.strip_prefix("papersize=") else {
        return Ok(false);
    };
    let parsed = size
        .split_once(',')
        .and_then(|(w, h)| Some((parse_length(w)?, parse_length(h)?)));
    match parsed {
        Some((width, height)) => machine.set_papersize(width, height),
        None => warn!("could not parse paper size `{size}`"),
    }
    Ok(true)
}

/// Parse a TeX length such as `614.295pt` or `8.5in` into TeX points.
pub fn parse_length(length: &str) -> Option<f64> {
    let length = length.trim();
    let split = length
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(length.len());
    let (number, unit) = length.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let points_per_unit = match unit {
        "pt" | "" => 1.0,
        "in" => 72.27,
        "bp" => 72.27 / 72.0,
        "cm" => 72.27 / 2.54,
        "mm" => 72.27 / 25.4,
        "pc" => 12.0,
        "sp" => 1.0 / 65536.0,
        _ => return None,
    };
    Some(value * points_per_unit)
}
