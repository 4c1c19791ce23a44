//! Handlers for `\special{...}` payloads.
//!
//! Handlers are tried in order and the first one that recognizes a payload consumes it.
//! Payloads nobody recognizes are ignored.

use log::debug;

use super::machine::Machine;
use crate::error::ExecuteError;

mod color;
mod papersize;
pub mod ps;
mod svg;

pub use color::{special_color, tex_color};
pub use papersize::{parse_length, special_papersize};
pub use ps::PsInterpreter;
pub use svg::{special_html, special_svg};

/// Something that may act on a special. Returns `Ok(true)` if the payload was consumed.
pub trait SpecialHandler {
    fn handle(&mut self, special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError>;
}

impl<F> SpecialHandler for F
where
    F: FnMut(&str, &mut dyn Machine) -> Result<bool, ExecuteError>,
{
    fn handle(&mut self, special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
        self(special, machine)
    }
}

/// An ordered list of special handlers.
pub struct Specials {
    handlers: Vec<Box<dyn SpecialHandler>>,
}

impl Default for Specials {
    /// Color, raw SVG, raw HTML, paper size and PostScript, in that order.
    fn default() -> Self {
        Self::new(vec![
            Box::new(special_color),
            Box::new(special_svg),
            Box::new(special_html),
            Box::new(special_papersize),
            Box::new(PsInterpreter::new()),
        ])
    }
}

impl Specials {
    pub fn new(handlers: Vec<Box<dyn SpecialHandler>>) -> Self {
        Self { handlers }
    }

    /// No handlers at all; every special is ignored.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn push(&mut self, handler: Box<dyn SpecialHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&mut self, special: &str, machine: &mut dyn Machine) -> Result<(), ExecuteError> {
        for handler in self.handlers.iter_mut() {
            if handler.handle(special, machine)? {
                return Ok(());
            }
        }
        debug!("ignoring unsupported special `{special}`");
        Ok(())
    }
}
