//! The abstract DVI machine and the executor that drives it.
//!
//! A [`Machine`] owns a [`MachineState`] (cursor, fonts, save stack, transform) and exposes
//! output hooks. Every hook has a default that only touches the state, so a backend
//! overrides just the hooks that produce output. [`NullMachine`] overrides none and is used
//! for dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use super::matrix::Matrix;
use super::parser::{Command, FontDefinition, Rule};
use super::specials::Specials;
use crate::error::{ConvertError, DecodeError, ExecuteError};
use crate::fonts::FontProvider;
use crate::tfm::{FIX_WORD_UNIT, TfmChar, TfmMetrics};

/// The six DVI registers, in DVI units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub h: i32,
    pub v: i32,
    pub w: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// A font as defined by a `fnt_def` command, together with its metrics.
#[derive(Debug, Clone)]
pub struct DviFont {
    pub name: String,
    pub checksum: u32,
    pub scale_factor: i32,
    pub design_size: i32,
    pub metrics: Arc<TfmMetrics>,
}

/// Accumulated dimensions of a run of characters, in DVI units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextExtents {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

impl DviFont {
    /// Metrics of `c`, or of `fallback` (logged) when the font has no such character.
    pub fn char_metrics(&self, c: u32, fallback: u32) -> TfmChar {
        if let Some(metrics) = self.metrics.get_char(c) {
            return *metrics;
        }
        warn!("Could not find font metric for character {c} in {}", self.name);
        self.metrics.get_char(fallback).copied().unwrap_or_default()
    }

    /// Convert a TFM `fix_word` of this font to DVI units.
    pub fn fix_word_to_dvi(&self, word: f64) -> f64 {
        word / FIX_WORD_UNIT * self.scale_factor as f64
    }

    /// Extents of `text` set in this font. Each advance is rounded to whole DVI units before
    /// summing, as separate `set_char` commands would.
    pub fn measure(&self, text: &[u32], fallback: u32) -> TextExtents {
        let mut width = 0.0;
        let mut height = 0i32;
        let mut depth = 0i32;
        for &c in text {
            let metrics = self.char_metrics(c, fallback);
            width += self.fix_word_to_dvi(metrics.width as f64).round();
            height = height.max(metrics.height);
            depth = depth.max(metrics.depth);
        }
        TextExtents {
            width,
            height: self.fix_word_to_dvi(height as f64),
            depth: self.fix_word_to_dvi(depth as f64),
        }
    }

    /// The size the font is used at, in points.
    pub fn font_size(&self) -> f64 {
        let magnification = if self.design_size == 0 {
            1.0
        } else {
            self.scale_factor as f64 / self.design_size as f64
        };
        self.metrics.design_size_pt() * magnification
    }
}

/// Mutable state shared by every machine.
#[derive(Debug, Clone)]
pub struct MachineState {
    /// Every font defined so far, keyed by DVI font number.
    pub fonts: BTreeMap<u32, Arc<DviFont>>,
    pub font: Option<Arc<DviFont>>,
    pub stack: Vec<Position>,
    pub position: Position,
    pub matrix: Matrix,
    /// Character whose metrics stand in for characters missing from a font.
    pub fallback_char: u32,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            fonts: BTreeMap::new(),
            font: None,
            stack: Vec::new(),
            position: Position::default(),
            matrix: Matrix::identity(),
            fallback_char: 126,
        }
    }
}

impl MachineState {
    pub fn reset_page(&mut self) {
        self.stack.clear();
        self.position = Position::default();
        self.matrix = Matrix::identity();
    }

    /// Width of `text` in the current font, in DVI units. Zero without a font.
    pub fn text_width(&self, text: &[u32]) -> i32 {
        self.font
            .as_ref()
            .map_or(0, |font| font.measure(text, self.fallback_char).width.round() as i32)
    }
}

/// The operations every DVI opcode maps onto.
pub trait Machine {
    fn state(&self) -> &MachineState;
    fn state_mut(&mut self) -> &mut MachineState;

    fn preamble(&mut self, _numerator: i32, _denominator: i32, _magnification: i32, _comment: &str) {
    }

    fn begin_page(&mut self, _counters: &[i32; 10]) -> Result<(), ExecuteError> {
        self.state_mut().reset_page();
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), ExecuteError> {
        Ok(())
    }

    fn post(&mut self, _max_height: i32, _max_width: i32, _max_stack_depth: u16, _pages: u16) {}

    fn post_post(&mut self) -> Result<(), ExecuteError> {
        Ok(())
    }

    fn push(&mut self) {
        let state = self.state_mut();
        state.stack.push(state.position);
    }

    fn pop(&mut self) -> Result<(), ExecuteError> {
        let state = self.state_mut();
        state.position = state.stack.pop().ok_or(ExecuteError::UnbalancedStack)?;
        Ok(())
    }

    fn move_right(&mut self, distance: i32) {
        let position = &mut self.state_mut().position;
        position.h = position.h.saturating_add(distance);
    }

    fn move_down(&mut self, distance: i32) {
        let position = &mut self.state_mut().position;
        position.v = position.v.saturating_add(distance);
    }

    fn set_font(&mut self, font: Arc<DviFont>) {
        self.state_mut().font = Some(font);
    }

    /// Cursor position in output units.
    fn current_position(&self) -> (f64, f64) {
        let position = self.state().position;
        (position.h as f64, position.v as f64)
    }

    /// Move the cursor to a position given in output units.
    fn set_current_position(&mut self, x: f64, y: f64) {
        let position = &mut self.state_mut().position;
        position.h = x.round() as i32;
        position.v = y.round() as i32;
    }

    fn push_color(&mut self, _color: &str) {}

    fn pop_color(&mut self) {}

    fn set_papersize(&mut self, _width: f64, _height: f64) {}

    fn put_rule(&mut self, _rule: Rule) -> Result<(), ExecuteError> {
        Ok(())
    }

    /// Typeset `text` at the cursor without moving it; returns the advance width in DVI
    /// units.
    fn put_text(&mut self, text: &[u32]) -> Result<i32, ExecuteError> {
        Ok(self.state().text_width(text))
    }

    fn put_svg(&mut self, _svg: &str) -> Result<(), ExecuteError> {
        Ok(())
    }

    fn put_html(&mut self, _html: &str) -> Result<(), ExecuteError> {
        Ok(())
    }
}

/// A machine that tracks state and produces no output.
#[derive(Debug, Clone, Default)]
pub struct NullMachine {
    state: MachineState,
}

impl NullMachine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Machine for NullMachine {
    fn state(&self) -> &MachineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }
}

/// Everything besides the machine that executing commands needs: where font metrics come
/// from and how specials are handled.
pub struct Executor<'a> {
    fonts: &'a dyn FontProvider,
    specials: Specials,
}

impl<'a> Executor<'a> {
    pub fn new(fonts: &'a dyn FontProvider, specials: Specials) -> Self {
        Self { fonts, specials }
    }

    /// Execute decoded commands in order, stopping at the first error.
    pub fn run<I>(&mut self, commands: I, machine: &mut dyn Machine) -> Result<(), ConvertError>
    where
        I: IntoIterator<Item = Result<Command, DecodeError>>,
    {
        for command in commands {
            command?.execute(machine, self)?;
        }
        Ok(())
    }

    fn define_font(&self, definition: &FontDefinition, machine: &mut dyn Machine) {
        if machine.state().fonts.contains_key(&definition.k) {
            return;
        }
        let metrics = match self.fonts.load_font(&definition.name) {
            Ok(metrics) => {
                if definition.checksum != 0
                    && metrics.checksum != 0
                    && definition.checksum != metrics.checksum
                {
                    warn!(
                        "checksum mismatch for font {}: DVI has {:#x}, TFM has {:#x}",
                        definition.name, definition.checksum, metrics.checksum
                    );
                }
                metrics
            }
            Err(e) => {
                warn!("{e}; characters in {} will have no size", definition.name);
                Arc::new(TfmMetrics::new(definition.name.as_str(), 10.0))
            }
        };
        let font = DviFont {
            name: definition.name.clone(),
            checksum: definition.checksum,
            scale_factor: definition.scale_factor,
            design_size: definition.design_size,
            metrics,
        };
        machine
            .state_mut()
            .fonts
            .insert(definition.k, Arc::new(font));
    }
}

fn require_font(machine: &dyn Machine, c: u32) -> Result<(), ExecuteError> {
    match machine.state().font {
        Some(_) => Ok(()),
        None => Err(ExecuteError::NoFontSelected(c)),
    }
}

fn check_preamble(field: &'static str, value: i32) -> Result<(), ExecuteError> {
    if value <= 0 {
        return Err(ExecuteError::InvalidPreamble {
            field,
            value: value as i64,
        });
    }
    Ok(())
}

impl Command {
    /// Apply this command to `machine`. Commands must be executed in the order they were
    /// decoded.
    pub fn execute(
        &self,
        machine: &mut dyn Machine,
        executor: &mut Executor<'_>,
    ) -> Result<(), ExecuteError> {
        match self {
            Command::SetChar { c } => {
                require_font(machine, *c)?;
                let width = machine.put_text(&[*c])?;
                machine.move_right(width);
            }
            Command::SetText { text } => {
                if let Some(&c) = text.first() {
                    require_font(machine, c)?;
                }
                let width = machine.put_text(text)?;
                machine.move_right(width);
            }
            Command::PutChar { c } => {
                require_font(machine, *c)?;
                machine.put_text(&[*c])?;
            }
            Command::SetRule(rule) => {
                // Nothing is drawn for non-positive sizes, but the cursor still moves.
                if rule.a > 0 && rule.b > 0 {
                    machine.put_rule(*rule)?;
                }
                machine.move_right(rule.b);
            }
            Command::PutRule(rule) => {
                if rule.a > 0 && rule.b > 0 {
                    machine.put_rule(*rule)?;
                }
            }
            Command::Nop => {}
            Command::Bop { counters, .. } => machine.begin_page(counters)?,
            Command::Eop => {
                let depth = machine.state().stack.len();
                if depth != 0 {
                    return Err(ExecuteError::StackNotEmpty { depth });
                }
                machine.end_page()?;
            }
            Command::Push => machine.push(),
            Command::Pop => machine.pop()?,
            Command::MoveRight { b } => machine.move_right(*b),
            Command::MoveW { b } => {
                let position = &mut machine.state_mut().position;
                if let Some(b) = b {
                    position.w = *b;
                }
                let w = position.w;
                machine.move_right(w);
            }
            Command::MoveX { b } => {
                let position = &mut machine.state_mut().position;
                if let Some(b) = b {
                    position.x = *b;
                }
                let x = position.x;
                machine.move_right(x);
            }
            Command::MoveDown { a } => machine.move_down(*a),
            Command::MoveY { a } => {
                let position = &mut machine.state_mut().position;
                if let Some(a) = a {
                    position.y = *a;
                }
                let y = position.y;
                machine.move_down(y);
            }
            Command::MoveZ { a } => {
                let position = &mut machine.state_mut().position;
                if let Some(a) = a {
                    position.z = *a;
                }
                let z = position.z;
                machine.move_down(z);
            }
            Command::SetFont { k } => {
                let font = machine
                    .state()
                    .fonts
                    .get(k)
                    .cloned()
                    .ok_or(ExecuteError::UndefinedFont(*k))?;
                machine.set_font(font);
            }
            Command::Special { x } => executor.specials.dispatch(x, machine)?,
            Command::FontDefinition(definition) => executor.define_font(definition, machine),
            Command::Preamble {
                i,
                num,
                den,
                mag,
                comment,
            } => {
                check_preamble("numerator", *num)?;
                check_preamble("denominator", *den)?;
                check_preamble("magnification", *mag)?;
                if *i != 2 {
                    debug!("DVI format identifier is {i}, expected 2");
                }
                machine.preamble(*num, *den, *mag, comment);
            }
            Command::Post { l, u, s, t, .. } => machine.post(*l, *u, *s, *t),
            Command::PostPost { .. } => machine.post_post()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvi2svg::parser::merge_text;
    use crate::tfm::TfmChar;
    use std::collections::HashMap;

    fn fonts() -> HashMap<String, Arc<TfmMetrics>> {
        let mut cmr10 = TfmMetrics::new("cmr10", 10.0);
        cmr10
            .insert_char(TfmChar::new(65, 1 << 19, 1 << 19, 0))
            .insert_char(TfmChar::new(126, 1 << 18, 1 << 18, 1 << 17));
        HashMap::from([("cmr10".to_string(), Arc::new(cmr10))])
    }

    fn font_definition(k: u32) -> Command {
        Command::FontDefinition(FontDefinition {
            k,
            checksum: 0,
            scale_factor: 655360,
            design_size: 655360,
            area: String::new(),
            name: "cmr10".to_string(),
        })
    }

    fn run(commands: Vec<Command>, machine: &mut dyn Machine) -> Result<(), ConvertError> {
        let fonts = fonts();
        let mut executor = Executor::new(&fonts, Specials::default());
        executor.run(commands.into_iter().map(Ok), machine)
    }

    #[test]
    fn push_pop_restores_registers() {
        let mut machine = NullMachine::new();
        run(
            vec![
                Command::Bop { counters: [0; 10], p: -1 },
                Command::MoveRight { b: 10 },
                Command::Push,
                Command::MoveW { b: Some(5) },
                Command::MoveDown { a: 7 },
                Command::Pop,
                Command::MoveW { b: None },
            ],
            &mut machine,
        )
        .unwrap();
        // w was restored to 0 by pop
        assert_eq!(machine.state().position, Position { h: 10, ..Default::default() });
        assert!(machine.state().stack.is_empty());
    }

    #[test]
    fn register_moves_reuse_cached_values() {
        let mut machine = NullMachine::new();
        run(
            vec![
                Command::Bop { counters: [0; 10], p: -1 },
                Command::MoveX { b: Some(3) },
                Command::MoveX { b: None },
                Command::MoveY { a: Some(-4) },
                Command::MoveZ { a: Some(2) },
                Command::MoveY { a: None },
                Command::MoveZ { a: None },
            ],
            &mut machine,
        )
        .unwrap();
        let position = machine.state().position;
        assert_eq!((position.h, position.v), (6, -4));
        assert_eq!((position.x, position.y, position.z), (3, -4, 2));
    }

    #[test]
    fn pop_on_empty_stack_is_unbalanced() {
        let mut machine = NullMachine::new();
        let result = run(
            vec![Command::Bop { counters: [0; 10], p: -1 }, Command::Pop],
            &mut machine,
        );
        assert!(matches!(
            result,
            Err(ConvertError::Execute(ExecuteError::UnbalancedStack))
        ));
    }

    #[test]
    fn eop_requires_empty_stack() {
        let mut machine = NullMachine::new();
        let result = run(
            vec![
                Command::Bop { counters: [0; 10], p: -1 },
                Command::Push,
                Command::Eop,
            ],
            &mut machine,
        );
        assert!(matches!(
            result,
            Err(ConvertError::Execute(ExecuteError::StackNotEmpty { depth: 1 }))
        ));
    }

    #[test]
    fn set_char_advances_by_metric_width() {
        let mut machine = NullMachine::new();
        run(
            vec![
                font_definition(0),
                Command::Bop { counters: [0; 10], p: -1 },
                Command::SetFont { k: 0 },
                Command::SetChar { c: 65 },
                Command::PutChar { c: 65 },
                // missing character falls back to 126
                Command::SetChar { c: 66 },
            ],
            &mut machine,
        )
        .unwrap();
        assert_eq!(machine.state().position.h, 327680 + 163840);
    }

    #[test]
    fn merged_runs_advance_like_single_characters() {
        // 333333 / 2^20 * 786432 = 249999.75, so each advance rounds up
        let mut cmr12 = TfmMetrics::new("cmr12", 12.0);
        cmr12.insert_char(TfmChar::new(65, 333333, 0, 0));
        let fonts = HashMap::from([("cmr12".to_string(), Arc::new(cmr12))]);
        let mut commands = vec![
            Command::FontDefinition(FontDefinition {
                k: 0,
                checksum: 0,
                scale_factor: 786432,
                design_size: 786432,
                area: String::new(),
                name: "cmr12".to_string(),
            }),
            Command::Bop { counters: [0; 10], p: -1 },
            Command::SetFont { k: 0 },
        ];
        commands.extend(std::iter::repeat_n(Command::SetChar { c: 65 }, 10));

        let mut single = NullMachine::new();
        Executor::new(&fonts, Specials::none())
            .run(commands.clone().into_iter().map(Ok), &mut single)
            .unwrap();
        let mut merged = NullMachine::new();
        Executor::new(&fonts, Specials::none())
            .run(merge_text(commands.into_iter().map(Ok)), &mut merged)
            .unwrap();

        assert_eq!(single.state().position.h, 2500000);
        assert_eq!(merged.state().position.h, 2500000);
    }

    #[test]
    fn text_needs_a_font() {
        let mut machine = NullMachine::new();
        let result = run(
            vec![
                Command::Bop { counters: [0; 10], p: -1 },
                Command::SetChar { c: 65 },
            ],
            &mut machine,
        );
        assert!(matches!(
            result,
            Err(ConvertError::Execute(ExecuteError::NoFontSelected(65)))
        ));
    }

    #[test]
    fn undefined_font_is_an_error() {
        let mut machine = NullMachine::new();
        let result = run(vec![Command::SetFont { k: 4 }], &mut machine);
        assert!(matches!(
            result,
            Err(ConvertError::Execute(ExecuteError::UndefinedFont(4)))
        ));
    }

    #[test]
    fn unknown_fonts_still_define() {
        let mut machine = NullMachine::new();
        let mut definition = font_definition(1);
        if let Command::FontDefinition(def) = &mut definition {
            def.name = "nosuchfont".to_string();
        }
        run(vec![definition, Command::SetFont { k: 1 }], &mut machine).unwrap();
        assert_eq!(machine.state().font.as_ref().unwrap().name, "nosuchfont");
    }

    #[test]
    fn preamble_rejects_non_positive_values() {
        let mut machine = NullMachine::new();
        let result = run(
            vec![Command::Preamble {
                i: 2,
                num: 25400000,
                den: 0,
                mag: 1000,
                comment: String::new(),
            }],
            &mut machine,
        );
        assert!(matches!(
            result,
            Err(ConvertError::Execute(ExecuteError::InvalidPreamble {
                field: "denominator",
                ..
            }))
        ));
    }

    #[test]
    fn begin_page_resets_transform() {
        let mut machine = NullMachine::new();
        machine.state_mut().matrix.scale(2.0, 2.0);
        machine.state_mut().position.h = 40;
        run(vec![Command::Bop { counters: [0; 10], p: -1 }], &mut machine).unwrap();
        assert!(machine.state().matrix.is_identity());
        assert_eq!(machine.state().position, Position::default());
    }
}
