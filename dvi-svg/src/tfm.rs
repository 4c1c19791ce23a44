//! TeX font metric tables.
//!
//! Only the parts of a TFM file that layout needs are read: the header, the per-character
//! dimensions, the lig/kern program and the font parameters. Extensible recipes are kept
//! as raw indices.
//!
//! All dimensions are TFM `fix_word`s: signed 12.20 fixed point numbers measured in units
//! of the font's design size.

use std::collections::BTreeMap;

use crate::error::TfmError;

/// Number of `fix_word` units in one design size.
pub const FIX_WORD_UNIT: f64 = (1 << 20) as f64;

/// Convert a `fix_word` to a plain floating point multiple of the design size.
pub fn fix_word_to_f64(word: i32) -> f64 {
    word as f64 / FIX_WORD_UNIT
}

/// Metrics of a single character.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TfmChar {
    pub char_code: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub italic_correction: i32,
    pub lig_kern_program_index: Option<usize>,
    pub next_larger_char: Option<u32>,
    pub extensible_recipe: Option<usize>,
}

impl TfmChar {
    pub fn new(char_code: u32, width: i32, height: i32, depth: i32) -> Self {
        Self {
            char_code,
            width,
            height,
            depth,
            ..Default::default()
        }
    }
}

/// One instruction of a lig/kern program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LigKern {
    Kern {
        stop: bool,
        next_char: u32,
        kern: i32,
    },
    Ligature {
        stop: bool,
        next_char: u32,
        ligature_char: u32,
        chars_to_pass_over: u8,
        current_char_is_deleted: bool,
        next_char_is_deleted: bool,
    },
}

/// A parsed font metric table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TfmMetrics {
    pub name: String,
    pub checksum: u32,
    /// Design size in points as a `fix_word`.
    pub design_size: i32,
    pub coding_scheme: Option<String>,
    pub family: Option<String>,
    pub characters: BTreeMap<u32, TfmChar>,
    pub lig_kerns: Vec<LigKern>,
    /// `param[1..=np]` of the TFM file, stored zero-based.
    pub parameters: Vec<i32>,
}

// Indices into `parameters` for the standard text font parameters.
const SLANT: usize = 0;
const SPACE: usize = 1;
const SPACE_STRETCH: usize = 2;
const SPACE_SHRINK: usize = 3;
const X_HEIGHT: usize = 4;
const QUAD: usize = 5;
const EXTRA_SPACE: usize = 6;
const AXIS_HEIGHT: usize = 21;
const DEFAULT_RULE_THICKNESS: usize = 7;

impl TfmMetrics {
    /// An empty table with the given design size in points.
    pub fn new(name: impl Into<String>, design_size_pt: f64) -> Self {
        Self {
            name: name.into(),
            design_size: (design_size_pt * FIX_WORD_UNIT).round() as i32,
            ..Default::default()
        }
    }

    pub fn insert_char(&mut self, ch: TfmChar) -> &mut Self {
        self.characters.insert(ch.char_code, ch);
        self
    }

    pub fn get_char(&self, code: u32) -> Option<&TfmChar> {
        self.characters.get(&code)
    }

    pub fn design_size_pt(&self) -> f64 {
        fix_word_to_f64(self.design_size)
    }

    pub fn parameter(&self, index: usize) -> i32 {
        self.parameters.get(index).copied().unwrap_or(0)
    }

    pub fn slant(&self) -> i32 {
        self.parameter(SLANT)
    }

    pub fn space(&self) -> i32 {
        self.parameter(SPACE)
    }

    pub fn space_stretch(&self) -> i32 {
        self.parameter(SPACE_STRETCH)
    }

    pub fn space_shrink(&self) -> i32 {
        self.parameter(SPACE_SHRINK)
    }

    pub fn x_height(&self) -> i32 {
        self.parameter(X_HEIGHT)
    }

    pub fn quad(&self) -> i32 {
        self.parameter(QUAD)
    }

    pub fn extra_space(&self) -> i32 {
        self.parameter(EXTRA_SPACE)
    }

    /// Only meaningful for math symbol fonts (`np >= 22`).
    pub fn axis_height(&self) -> i32 {
        self.parameter(AXIS_HEIGHT)
    }

    /// Only meaningful for math extension fonts (`np >= 13`).
    pub fn default_rule_thickness(&self) -> i32 {
        self.parameter(DEFAULT_RULE_THICKNESS)
    }

    /// The lig/kern program of `code`, from its first instruction to the one marked `stop`.
    pub fn lig_kern_program(&self, code: u32) -> &[LigKern] {
        let Some(start) = self.get_char(code).and_then(|c| c.lig_kern_program_index) else {
            return &[];
        };
        let program = self.lig_kerns.get(start..).unwrap_or(&[]);
        let end = program
            .iter()
            .position(|instruction| match instruction {
                LigKern::Kern { stop, .. } | LigKern::Ligature { stop, .. } => *stop,
            })
            .map_or(program.len(), |i| i + 1);
        &program[..end]
    }

    /// The kern inserted between `left` and `right`, if the font defines one.
    pub fn kern(&self, left: u32, right: u32) -> Option<i32> {
        self.lig_kern_program(left)
            .iter()
            .find_map(|instruction| match instruction {
                LigKern::Kern { next_char, kern, .. } if *next_char == right => Some(*kern),
                _ => None,
            })
    }

    /// Parse the bytes of a `.tfm` file.
    pub fn parse(name: &str, data: &[u8]) -> Result<Self, TfmError> {
        let reader = WordReader { name, data };
        let sizes: Vec<usize> = (0..12)
            .map(|i| reader.u16_at(2 * i).map(usize::from))
            .collect::<Result<_, _>>()?;
        let [lf, lh, bc, ec, nw, nh, nd, ni, nl, nk, ne, np] = sizes[..] else {
            return Err(reader.invalid("short header"));
        };

        let char_count = if ec + 1 >= bc { ec + 1 - bc } else { 0 };
        if bc > ec + 1 || ec > 255 {
            return Err(reader.invalid("character range"));
        }
        if lf != 6 + lh + char_count + nw + nh + nd + ni + nl + nk + ne + np {
            return Err(reader.invalid("length fields do not add up"));
        }
        if lh < 2 {
            return Err(reader.invalid("header shorter than two words"));
        }
        if data.len() < lf * 4 {
            return Err(TfmError::Truncated {
                name: name.to_string(),
            });
        }

        let header = 6;
        let char_info = header + lh;
        let width = char_info + char_count;
        let height = width + nw;
        let depth = height + nh;
        let italic = depth + nd;
        let lig_kern = italic + ni;
        let kern = lig_kern + nl;
        let exten = kern + nk;
        let param = exten + ne;

        let mut metrics = TfmMetrics {
            name: name.to_string(),
            checksum: reader.u32_word(header)?,
            design_size: reader.i32_word(header + 1)?,
            ..Default::default()
        };
        if lh >= 12 {
            metrics.coding_scheme = reader.bcpl_string(header + 2, 40);
        }
        if lh >= 17 {
            metrics.family = reader.bcpl_string(header + 12, 20);
        }

        let kerns: Vec<i32> = (0..nk)
            .map(|i| reader.i32_word(kern + i))
            .collect::<Result<_, _>>()?;
        for i in 0..nl {
            let [skip, next_char, op, remainder] = reader.bytes(lig_kern + i)?;
            let stop = skip >= 128;
            let instruction = if op >= 128 {
                let index = 256 * (op as usize - 128) + remainder as usize;
                LigKern::Kern {
                    stop,
                    next_char: next_char as u32,
                    kern: kerns.get(index).copied().unwrap_or(0),
                }
            } else {
                // op = 4a + 2b + c
                LigKern::Ligature {
                    stop,
                    next_char: next_char as u32,
                    ligature_char: remainder as u32,
                    chars_to_pass_over: op >> 2,
                    current_char_is_deleted: op & 2 == 0,
                    next_char_is_deleted: op & 1 == 0,
                }
            };
            metrics.lig_kerns.push(instruction);
        }

        for offset in 0..char_count {
            let code = (bc + offset) as u32;
            let [width_index, height_depth, italic_tag, remainder] =
                reader.bytes(char_info + offset)?;
            if width_index == 0 {
                continue;
            }
            let height_index = (height_depth >> 4) as usize;
            let depth_index = (height_depth & 0x0f) as usize;
            let italic_index = (italic_tag >> 2) as usize;
            let mut ch = TfmChar {
                char_code: code,
                width: reader.indexed(width, nw, width_index as usize)?,
                height: reader.indexed(height, nh, height_index)?,
                depth: reader.indexed(depth, nd, depth_index)?,
                italic_correction: reader.indexed(italic, ni, italic_index)?,
                ..Default::default()
            };
            match italic_tag & 0x03 {
                1 => {
                    let mut index = remainder as usize;
                    // A first instruction with skip_byte > 128 redirects to the real program.
                    if let Ok([skip, _, op, rem]) = reader.bytes(lig_kern + index) {
                        if skip > 128 {
                            index = 256 * op as usize + rem as usize;
                        }
                    }
                    ch.lig_kern_program_index = Some(index);
                }
                2 => ch.next_larger_char = Some(remainder as u32),
                3 => ch.extensible_recipe = Some(remainder as usize),
                _ => {}
            }
            metrics.characters.insert(code, ch);
        }

        metrics.parameters = (0..np)
            .map(|i| reader.i32_word(param + i))
            .collect::<Result<_, _>>()?;
        Ok(metrics)
    }
}

struct WordReader<'a> {
    name: &'a str,
    data: &'a [u8],
}

impl WordReader<'_> {
    fn truncated(&self) -> TfmError {
        TfmError::Truncated {
            name: self.name.to_string(),
        }
    }

    fn invalid(&self, reason: &'static str) -> TfmError {
        TfmError::InvalidHeader {
            name: self.name.to_string(),
            reason,
        }
    }

    fn u16_at(&self, byte: usize) -> Result<u16, TfmError> {
        match self.data.get(byte..byte + 2) {
            Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(self.truncated()),
        }
    }

    fn bytes(&self, word: usize) -> Result<[u8; 4], TfmError> {
        match self.data.get(word * 4..word * 4 + 4) {
            Some(&[a, b, c, d]) => Ok([a, b, c, d]),
            _ => Err(self.truncated()),
        }
    }

    fn u32_word(&self, word: usize) -> Result<u32, TfmError> {
        self.bytes(word).map(u32::from_be_bytes)
    }

    fn i32_word(&self, word: usize) -> Result<i32, TfmError> {
        self.bytes(word).map(i32::from_be_bytes)
    }

    fn indexed(&self, table: usize, len: usize, index: usize) -> Result<i32, TfmError> {
        if index >= len {
            return Err(self.invalid("character dimension index out of range"));
        }
        self.i32_word(table + index)
    }

    fn bcpl_string(&self, word: usize, max_len: usize) -> Option<String> {
        let bytes = self.data.get(word * 4..word * 4 + max_len)?;
        let (&len, rest) = bytes.split_first()?;
        let text = rest.get(..len as usize)?;
        Some(String::from_utf8_lossy(text).into_owned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a minimal TFM file with characters `bc..=ec` sharing one width/height/depth,
    /// plus a single kern between `bc` and `bc + 1`.
    pub(crate) fn synthetic_tfm(bc: u8, ec: u8, width: i32, height: i32, depth: i32) -> Vec<u8> {
        let lh = 2usize;
        let chars = (ec - bc + 1) as usize;
        let (nw, nh, nd, ni, nl, nk, ne, np) = (2, 2, 2, 1, 1, 1, 0, 7);
        let lf = 6 + lh + chars + nw + nh + nd + ni + nl + nk + ne + np;
        let mut out = Vec::new();
        for size in [lf, lh, bc as usize, ec as usize, nw, nh, nd, ni, nl, nk, ne, np] {
            out.extend_from_slice(&(size as u16).to_be_bytes());
        }
        out.extend_from_slice(&0xdead_beefu32.to_be_bytes());
        out.extend_from_slice(&(10i32 << 20).to_be_bytes());
        for code in bc..=ec {
            // width 1, height 1 / depth 1, no italic, tag 1 (lig/kern) for the first char
            let tag = if code == bc { 1 } else { 0 };
            out.extend_from_slice(&[1, 0x11, tag, 0]);
        }
        for table in [width, height, depth] {
            out.extend_from_slice(&0i32.to_be_bytes());
            out.extend_from_slice(&table.to_be_bytes());
        }
        out.extend_from_slice(&0i32.to_be_bytes());
        out.extend_from_slice(&[128, bc + 1, 128, 0]);
        out.extend_from_slice(&(-(1i32 << 16)).to_be_bytes());
        for p in 0..np as i32 {
            out.extend_from_slice(&(p << 16).to_be_bytes());
        }
        out
    }

    #[test]
    fn parses_synthetic_font() {
        let data = synthetic_tfm(65, 70, 1 << 19, 3 << 18, 1 << 16);
        let tfm = TfmMetrics::parse("test", &data).unwrap();
        assert_eq!(tfm.checksum, 0xdead_beef);
        assert_eq!(tfm.design_size_pt(), 10.0);
        assert_eq!(tfm.characters.len(), 6);
        let a = tfm.get_char(65).unwrap();
        assert_eq!(a.width, 1 << 19);
        assert_eq!(a.height, 3 << 18);
        assert_eq!(a.depth, 1 << 16);
        assert_eq!(a.lig_kern_program_index, Some(0));
        assert_eq!(tfm.kern(65, 66), Some(-(1 << 16)));
        assert_eq!(tfm.kern(66, 65), None);
        assert_eq!(tfm.quad(), 5 << 16);
        assert!(tfm.get_char(71).is_none());
    }

    #[test]
    fn rejects_inconsistent_lengths() {
        let mut data = synthetic_tfm(65, 66, 1, 1, 1);
        data[1] += 1;
        assert!(matches!(
            TfmMetrics::parse("bad", &data),
            Err(TfmError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn rejects_truncated_data() {
        let data = synthetic_tfm(65, 66, 1, 1, 1);
        assert!(matches!(
            TfmMetrics::parse("short", &data[..data.len() - 8]),
            Err(TfmError::Truncated { .. })
        ));
    }
}
