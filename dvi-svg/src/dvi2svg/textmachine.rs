//! Plain-text extraction: characters are collected per page and written out in reading
//! order.

use std::io::Write;

use super::machine::{Machine, MachineState};
use crate::config::RenderOptions;
use crate::error::ExecuteError;

/// Horizontal gap, in points, above which two runs on a line are separated by a space.
const WORD_GAP: f64 = 1.5;

/// Codes 0 to 31 of TeX's OT1 text encoding: Greek capitals, ligatures, dotless letters,
/// accents and a few foreign letters.
const OT1_LOW: [&str; 32] = [
    "Γ", "Δ", "Θ", "Λ", "Ξ", "Π", "Σ", "Υ", "Φ", "Ψ", "Ω", "ff", "fi", "fl", "ffi", "ffl", "ı",
    "ȷ", "`", "´", "ˇ", "˘", "¯", "˚", "¸", "ß", "æ", "œ", "ø", "Æ", "Œ", "Ø",
];

/// Append the Unicode text for a font character code. Control characters never reach the
/// output.
fn push_char(text: &mut String, c: u32) {
    match c {
        0..=31 => text.push_str(OT1_LOW[c as usize]),
        127 => text.push('¨'),
        _ => match char::from_u32(c) {
            Some(ch) if !ch.is_control() => text.push(ch),
            _ => text.push(char::REPLACEMENT_CHARACTER),
        },
    }
}

#[derive(Debug, Clone)]
struct Snippet {
    h: i32,
    v: i32,
    width: i32,
    text: String,
}

pub struct TextMachine<W: Write> {
    state: MachineState,
    output: W,
    snippets: Vec<Snippet>,
    points_per_dvi_unit: f64,
}

impl<W: Write> TextMachine<W> {
    pub fn new(output: W) -> Self {
        Self::with_options(output, &RenderOptions::default())
    }

    pub fn with_options(output: W, options: &RenderOptions) -> Self {
        let state = MachineState {
            fallback_char: options.fallback_char,
            ..MachineState::default()
        };
        Self {
            state,
            output,
            snippets: Vec::new(),
            points_per_dvi_unit: 1.0 / 65536.0,
        }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Machine for TextMachine<W> {
    fn state(&self) -> &MachineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }

    fn preamble(&mut self, numerator: i32, denominator: i32, magnification: i32, _comment: &str) {
        let dvi_unit = magnification as f64 * numerator as f64 / 1000.0 / denominator as f64;
        self.points_per_dvi_unit = dvi_unit * 72.27 / 100000.0 / 2.54;
    }

    fn begin_page(&mut self, _counters: &[i32; 10]) -> Result<(), ExecuteError> {
        self.state.reset_page();
        self.snippets.clear();
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), ExecuteError> {
        let mut snippets = std::mem::take(&mut self.snippets);
        snippets.sort_by_key(|s| (s.v, s.h));
        let gap = (WORD_GAP / self.points_per_dvi_unit) as i64;

        let mut line: Option<i32> = None;
        let mut end = 0i64;
        for snippet in &snippets {
            match line {
                Some(v) if v == snippet.v => {
                    if snippet.h as i64 > end + gap {
                        self.output.write_all(b" ")?;
                    }
                }
                Some(_) => self.output.write_all(b"\n")?,
                None => {}
            }
            self.output.write_all(snippet.text.as_bytes())?;
            line = Some(snippet.v);
            end = snippet.h as i64 + snippet.width as i64;
        }
        if line.is_some() {
            self.output.write_all(b"\n")?;
        }
        // Form feed between pages, as pdftotext does.
        self.output.write_all(b"\x0c")?;
        Ok(())
    }

    fn post_post(&mut self) -> Result<(), ExecuteError> {
        self.output.flush()?;
        Ok(())
    }

    fn put_text(&mut self, text: &[u32]) -> Result<i32, ExecuteError> {
        let width = self.state.text_width(text);
        let position = self.state.position;
        let mut unicode = String::new();
        for &c in text {
            push_char(&mut unicode, c);
        }
        self.snippets.push(Snippet {
            h: position.h,
            v: position.v,
            width,
            text: unicode,
        });
        Ok(width)
    }
}
