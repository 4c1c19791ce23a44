use dvi_svg::{FontDataHelper, dvi2svg};
#[cfg(target_arch = "wasm32")]
use wasm_minimal_protocol::*;

#[cfg(target_arch = "wasm32")]
wasm_minimal_protocol::initiate_protocol!();

/// Render a DVI file using the built-in metrics of the standard TeX fonts.
#[cfg_attr(target_arch = "wasm32", wasm_func)]
pub fn render_dvi(dvi: &[u8]) -> Result<Vec<u8>, String> {
    let fonts = FontDataHelper::builtin().map_err(|e| e.to_string())?;
    dvi2svg(dvi, &fonts)
        .map(String::into_bytes)
        .map_err(|e| format!("{e:#}"))
}

/// Render a DVI file using the `.tfm` files in a `.tar.gz` bundle, falling back to the
/// built-in metrics for fonts the bundle lacks.
#[cfg_attr(target_arch = "wasm32", wasm_func)]
pub fn render_dvi_with_fonts(dvi: &[u8], fonts: &[u8]) -> Result<Vec<u8>, String> {
    let fonts = FontDataHelper::from_tar_gz(fonts)
        .and_then(FontDataHelper::with_builtin)
        .map_err(|e| e.to_string())?;
    dvi2svg(dvi, &fonts)
        .map(String::into_bytes)
        .map_err(|e| format!("{e:#}"))
}
