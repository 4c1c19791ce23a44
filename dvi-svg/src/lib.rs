// This library file exposes modules for the binary, the Typst plugin and the tests

pub mod config;
pub mod dvi2svg;
pub mod error;
pub mod fonts;
pub mod tfm;

pub use config::RenderOptions;
pub use dvi2svg::machine::{Executor, Machine, MachineState, NullMachine};
pub use dvi2svg::parser::{Command, Decoder, merge_text, parse_dvi};
pub use dvi2svg::specials::Specials;
pub use dvi2svg::svgmachine::SVGMachine;
pub use dvi2svg::textmachine::TextMachine;
pub use dvi2svg::{dvi2html, dvi2svg, dvi2text, render};
pub use error::{ConvertError, DecodeError, ExecuteError, PostScriptError, TfmError};
pub use fonts::{FontDataHelper, FontProvider};
