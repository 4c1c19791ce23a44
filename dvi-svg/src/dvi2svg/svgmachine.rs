//! Renders DVI pages as absolutely positioned HTML, switching to SVG inside TikZ pictures.

use std::fmt::Write as _;
use std::io::Write;

use log::warn;

use super::machine::{Machine, MachineState};
use super::parser::Rule;
use crate::config::RenderOptions;
use crate::error::ExecuteError;

/// Opening sentinel written by the dvisvgm driver at the start of a picture.
const BEGIN_PICTURE: &str = "<svg beginpicture>";
const END_PICTURE: &str = "</svg endpicture>";

/// Points per DVI unit for the usual preamble (num = 25400000, den = 473628672, mag = 1000).
const DEFAULT_POINTS_PER_DVI_UNIT: f64 = 1.0 / 65536.0;

pub struct SVGMachine<W: Write> {
    state: MachineState,
    output: W,
    color: String,
    color_stack: Vec<String>,
    /// Number of `<svg>` elements currently open in the output.
    svg_depth: usize,
    /// One entry per open picture: whether its begin sentinel opened a real `<svg>`.
    picture_stack: Vec<bool>,
    paper_width: f64,
    paper_height: f64,
    points_per_dvi_unit: f64,
}

impl<W: Write> SVGMachine<W> {
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
            color: options.color.clone(),
            color_stack: Vec::new(),
            svg_depth: 0,
            picture_stack: Vec::new(),
            paper_width: options.paper_width,
            paper_height: options.paper_height,
            points_per_dvi_unit: DEFAULT_POINTS_PER_DVI_UNIT,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn points_per_dvi_unit(&self) -> f64 {
        self.points_per_dvi_unit
    }

    fn to_points(&self, dvi_units: f64) -> f64 {
        dvi_units * self.points_per_dvi_unit
    }

    fn svg_header(&self) -> String {
        let (width, height) = (self.paper_width, self.paper_height);
        format!(
            "<svg version=\"1.1\" xmlns=\"http://www.w3.org/2000/svg\" \
             xmlns:xlink=\"http://www.w3.org/1999/xlink\" \
             width=\"{width}pt\" height=\"{height}pt\" viewBox=\"-72 -72 {width} {height}\">"
        )
    }
}

/// Escape `text` for HTML, mapping the control range of TeX's text fonts onto the code
/// points browsers draw for them.
pub fn html_text(text: &[u32]) -> String {
    let mut html = String::new();
    for &c in text {
        let entity = match c {
            0..=9 => Some(161 + c),
            10..=19 => Some(173 + c - 10),
            20 => Some(8729),
            21..=32 => Some(184 + c - 21),
            127 => Some(196),
            _ => None,
        };
        if let Some(code) = entity {
            let _ = write!(html, "&#{code};");
            continue;
        }
        match char::from_u32(c) {
            Some('<') => html.push_str("&lt;"),
            Some('>') => html.push_str("&gt;"),
            Some('&') => html.push_str("&amp;"),
            Some('"') => html.push_str("&quot;"),
            Some(ch) => html.push(ch),
            None => html.push(char::REPLACEMENT_CHARACTER),
        }
    }
    html
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

impl<W: Write> Machine for SVGMachine<W> {
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

    fn post_post(&mut self) -> Result<(), ExecuteError> {
        if !self.picture_stack.is_empty() {
            warn!("{} picture(s) left open at end of document", self.picture_stack.len());
        }
        self.output.flush()?;
        Ok(())
    }

    fn current_position(&self) -> (f64, f64) {
        let position = self.state.position;
        (
            self.to_points(position.h as f64),
            self.to_points(position.v as f64),
        )
    }

    fn set_current_position(&mut self, x: f64, y: f64) {
        let position = &mut self.state.position;
        position.h = (x / self.points_per_dvi_unit).round() as i32;
        position.v = (y / self.points_per_dvi_unit).round() as i32;
    }

    fn push_color(&mut self, color: &str) {
        let previous = std::mem::replace(&mut self.color, color.to_string());
        self.color_stack.push(previous);
    }

    fn pop_color(&mut self) {
        match self.color_stack.pop() {
            Some(color) => self.color = color,
            None => warn!("color pop with an empty color stack"),
        }
    }

    fn set_papersize(&mut self, width: f64, height: f64) {
        self.paper_width = width;
        self.paper_height = height;
    }

    fn put_rule(&mut self, rule: Rule) -> Result<(), ExecuteError> {
        let (left, bottom) = self.current_position();
        let height = self.to_points(rule.a as f64);
        let width = self.to_points(rule.b as f64);
        let top = bottom - height;
        write!(
            self.output,
            "<rect x=\"{left}\" y=\"{top}\" width=\"{width}\" height=\"{height}\" fill=\"{}\"{}></rect>",
            self.color,
            self.state.matrix.to_svg_transform()
        )?;
        Ok(())
    }

    fn put_text(&mut self, text: &[u32]) -> Result<i32, ExecuteError> {
        let Some(font) = self.state.font.clone() else {
            return Ok(0);
        };
        let extents = font.measure(text, self.state.fallback_char);
        let html = html_text(text);
        let font_size = font.font_size();
        let (left, top) = self.current_position();
        let height = self.to_points(extents.height);

        if self.svg_depth == 0 {
            write!(
                self.output,
                "<span style=\"line-height: 0; color: {color}; font-family: {family}; \
                 font-size: {font_size}pt; position: absolute; top: {}pt; left: {left}pt; \
                 overflow: visible;\"><span style=\"margin-top: -{font_size}pt; \
                 line-height: 0pt; height: {font_size}pt; display: inline-block; \
                 vertical-align: baseline; \">{html}</span><span style=\"display: inline-block; \
                 vertical-align: {height}pt; height: 0pt; line-height: 0;\"></span></span>",
                top - height,
                color = self.color,
                family = font.name,
            )?;
        } else {
            // Inside an <svg> the font size is unitless, since the picture may be scaled.
            write!(
                self.output,
                "<text alignment-baseline=\"baseline\" y=\"{top}\" x=\"{left}\" \
                 font-family=\"{family}\" font-size=\"{font_size}\" fill=\"{color}\"{transform}>\
                 {html}</text>",
                family = font.name,
                color = self.color,
                transform = self.state.matrix.to_svg_transform(),
            )?;
        }
        Ok(extents.width.round() as i32)
    }

    fn put_svg(&mut self, svg: &str) -> Result<(), ExecuteError> {
        let (left, top) = self.current_position();
        let mut svg = svg.to_string();

        if svg.contains(BEGIN_PICTURE) {
            let opens = self.svg_depth == 0;
            self.picture_stack.push(opens);
            let header = if opens { self.svg_header() } else { String::new() };
            svg = svg.replacen(BEGIN_PICTURE, &header, 1);
        }
        if svg.contains(END_PICTURE) {
            let closes = match self.picture_stack.pop() {
                Some(closes) => closes,
                None => {
                    warn!("end of picture without a matching begin");
                    false
                }
            };
            svg = svg.replacen(END_PICTURE, if closes { "</svg>" } else { "" }, 1);
        }
        let svg = svg
            .replace("{?x}", &left.to_string())
            .replace("{?y}", &top.to_string())
            .replace("{?nl}", "\n");

        self.svg_depth += count(&svg, "<svg");
        self.svg_depth = self.svg_depth.saturating_sub(count(&svg, "</svg"));
        self.output.write_all(svg.as_bytes())?;
        Ok(())
    }

    fn put_html(&mut self, html: &str) -> Result<(), ExecuteError> {
        self.output.write_all(html.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvi2svg::machine::DviFont;
    use crate::tfm::{TfmChar, TfmMetrics};
    use std::sync::Arc;

    fn machine() -> SVGMachine<Vec<u8>> {
        let mut metrics = TfmMetrics::new("cmr10", 10.0);
        metrics
            .insert_char(TfmChar::new(65, 1 << 19, 1 << 19, 0))
            .insert_char(TfmChar::new(20, 1 << 19, 1 << 19, 0));
        let mut machine = SVGMachine::new(Vec::new());
        machine.set_font(Arc::new(DviFont {
            name: "cmr10".to_string(),
            checksum: 0,
            scale_factor: 655360,
            design_size: 655360,
            metrics: Arc::new(metrics),
        }));
        machine
    }

    fn output(machine: SVGMachine<Vec<u8>>) -> String {
        String::from_utf8(machine.into_inner()).unwrap()
    }

    #[test]
    fn maps_control_characters_to_entities() {
        assert_eq!(html_text(&[0, 9, 10, 20, 21, 32, 127]), "&#161;&#170;&#173;&#8729;&#184;&#195;&#196;");
        assert_eq!(html_text(&[65, 60, 38]), "A&lt;&amp;");
    }

    #[test]
    fn text_outside_pictures_is_a_span() {
        let mut machine = machine();
        let width = machine.put_text(&[65]).unwrap();
        assert_eq!(width, 327680);
        let html = output(machine);
        assert!(html.starts_with("<span style=\"line-height: 0; color: black; font-family: cmr10; font-size: 10pt;"));
        assert!(html.contains(">A</span>"));
    }

    #[test]
    fn rules_use_current_color() {
        let mut machine = machine();
        machine.state_mut().position.v = 655360;
        machine.push_color("#ff0000");
        machine.put_rule(Rule { a: 65536, b: 655360 }).unwrap();
        machine.pop_color();
        assert_eq!(machine.color(), "black");
        assert_eq!(
            output(machine),
            "<rect x=\"0\" y=\"9\" width=\"10\" height=\"1\" fill=\"#ff0000\"></rect>"
        );
    }

    #[test]
    fn pop_color_on_empty_stack_keeps_color() {
        let mut machine = machine();
        machine.pop_color();
        assert_eq!(machine.color(), "black");
    }

    #[test]
    fn nested_pictures_open_one_svg() {
        let mut machine = machine();
        machine.set_papersize(100.0, 50.0);
        machine.put_svg("<svg beginpicture><g>").unwrap();
        machine.put_svg("<svg beginpicture>").unwrap();
        machine.put_text(&[65]).unwrap();
        machine.put_svg("</svg endpicture>").unwrap();
        machine.put_svg("</g></svg endpicture>").unwrap();
        machine.put_text(&[65]).unwrap();
        let html = output(machine);
        assert_eq!(html.matches("<svg").count(), 1);
        assert_eq!(html.matches("</svg>").count(), 1);
        assert!(html.contains("width=\"100pt\" height=\"50pt\" viewBox=\"-72 -72 100 50\""));
        assert!(html.contains("<text alignment-baseline=\"baseline\""));
        assert!(html.ends_with("</span></span>"));
    }

    #[test]
    fn substitutes_current_point() {
        let mut machine = machine();
        machine.state_mut().position.h = 2 * 65536;
        machine.state_mut().position.v = 3 * 65536;
        machine.put_svg("<g transform=\"translate({?x},{?y})\">").unwrap();
        assert_eq!(output(machine), "<g transform=\"translate(2,3)\">");
    }

    #[test]
    fn substitutes_newlines() {
        let mut machine = machine();
        machine.put_svg("<text>{?nl}a{?nl}</text>").unwrap();
        assert_eq!(output(machine), "<text>\na\n</text>");
    }

    #[test]
    fn preamble_sets_unit() {
        let mut machine = machine();
        machine.preamble(25400000, 473628672, 2000, "");
        assert!((machine.points_per_dvi_unit() - 2.0 / 65536.0).abs() < 1e-12);
    }
}
