use std::io::{Read, Write};

use anyhow::Result;
use machine::{Executor, Machine};
use parser::{Decoder, merge_text};
use specials::Specials;
use svgmachine::SVGMachine;
use textmachine::TextMachine;

use crate::config::RenderOptions;
use crate::error::ConvertError;
use crate::fonts::FontProvider;

pub mod machine;
pub mod matrix;
pub mod parser;
pub mod specials;
pub mod svgmachine;
pub mod textmachine;

/// Decode `input` and execute it on `machine`, with the default set of special handlers.
pub fn render<R: Read>(
    input: R,
    machine: &mut dyn Machine,
    fonts: &dyn FontProvider,
    options: &RenderOptions,
) -> Result<(), ConvertError> {
    let mut executor = Executor::new(fonts, Specials::default());
    let commands = Decoder::new(input);
    if options.merge_text {
        executor.run(merge_text(commands), machine)
    } else {
        executor.run(commands, machine)
    }
}

/// Convert a DVI stream to HTML (with inline SVG for pictures), writing into `output`.
/// On error the partially written output is not handed back.
pub fn dvi2html<R: Read, W: Write>(
    input: R,
    output: W,
    fonts: &dyn FontProvider,
    options: &RenderOptions,
) -> Result<W, ConvertError> {
    let mut machine = SVGMachine::with_options(output, options);
    render(input, &mut machine, fonts, options)?;
    Ok(machine.into_inner())
}

/// Extract the text of a DVI stream, one line per baseline and a form feed after each page.
pub fn dvi2text<R: Read, W: Write>(
    input: R,
    output: W,
    fonts: &dyn FontProvider,
    options: &RenderOptions,
) -> Result<W, ConvertError> {
    let mut machine = TextMachine::with_options(output, options);
    render(input, &mut machine, fonts, options)?;
    Ok(machine.into_inner())
}

pub fn dvi2svg(input: &[u8], fonts: &dyn FontProvider) -> Result<String> {
    let html = dvi2html(input, Vec::new(), fonts, &RenderOptions::default())?;
    Ok(String::from_utf8(html)?)
}
