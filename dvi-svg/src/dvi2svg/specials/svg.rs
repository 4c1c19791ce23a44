use crate::dvi2svg::machine::Machine;
use crate::error::ExecuteError;

/// `dvisvgm:raw <fragment>`, as emitted by the TikZ/PGF dvisvgm driver.
pub fn special_svg(special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
    match special.strip_prefix("dvisvgm:raw ") {
        Some(svg) => machine.put_svg(svg).map(|_| true),
        None => Ok(false),
    }
}

/// `html:<markup>`, inserted into the output untouched.
pub fn special_html(special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
    match special.strip_prefix("html:") {
        Some(html) => machine.put_html(html).map(|_| true),
        None => Ok(false),
    }
}
