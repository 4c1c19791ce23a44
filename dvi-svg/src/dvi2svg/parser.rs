//! Decoding of DVI byte streams into [`Command`]s.
//!
//! [`Decoder`] pulls bytes from any [`Read`] and yields one command at a time, so a page can
//! be rendered before the rest of the file has arrived. Multi-byte integers are big-endian;
//! the signed variants are sign-extended from their encoded width.

use std::io::{self, Read};

use crate::error::DecodeError;

const SET_CHAR_127: u8 = 127;
const SET1: u8 = 128;
const SET4: u8 = 131;
const SET_RULE: u8 = 132;
const PUT1: u8 = 133;
const PUT4: u8 = 136;
const PUT_RULE: u8 = 137;
const NOP: u8 = 138;
const BOP: u8 = 139;
const EOP: u8 = 140;
const PUSH: u8 = 141;
const POP: u8 = 142;
const RIGHT1: u8 = 143;
const RIGHT4: u8 = 146;
const W0: u8 = 147;
const W4: u8 = 151;
const X0: u8 = 152;
const X4: u8 = 156;
const DOWN1: u8 = 157;
const DOWN4: u8 = 160;
const Y0: u8 = 161;
const Y4: u8 = 165;
const Z0: u8 = 166;
const Z4: u8 = 170;
const FNT_NUM_0: u8 = 171;
const FNT_NUM_63: u8 = 234;
const FNT1: u8 = 235;
const FNT4: u8 = 238;
const XXX1: u8 = 239;
const XXX4: u8 = 242;
const FNT_DEF1: u8 = 243;
const FNT_DEF4: u8 = 246;
const PRE: u8 = 247;
const POST: u8 = 248;
const POST_POST: u8 = 249;

/// A rule of height `a` and width `b`, in DVI units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub a: i32,
    pub b: i32,
}

/// The operands of a `fnt_def` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDefinition {
    pub k: u32,
    pub checksum: u32,
    /// Scale factor `s` in DVI units.
    pub scale_factor: i32,
    /// Design size `d` in DVI units.
    pub design_size: i32,
    /// Directory part of the font name; empty for the system default.
    pub area: String,
    pub name: String,
}

/// One decoded DVI command.
///
/// The `w`, `x`, `y` and `z` moves carry `None` for the short form that reuses the cached
/// register, and `Some(amount)` for the forms that also store a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChar { c: u32 },
    /// A run of `set_char` commands produced by [`merge_text`]; never decoded directly.
    SetText { text: Vec<u32> },
    PutChar { c: u32 },
    SetRule(Rule),
    PutRule(Rule),
    Nop,
    Bop { counters: [i32; 10], p: i32 },
    Eop,
    Push,
    Pop,
    MoveRight { b: i32 },
    MoveW { b: Option<i32> },
    MoveX { b: Option<i32> },
    MoveDown { a: i32 },
    MoveY { a: Option<i32> },
    MoveZ { a: Option<i32> },
    SetFont { k: u32 },
    Special { x: String },
    FontDefinition(FontDefinition),
    Preamble {
        i: u8,
        num: i32,
        den: i32,
        mag: i32,
        comment: String,
    },
    Post {
        p: i32,
        num: i32,
        den: i32,
        mag: i32,
        /// Height plus depth of the tallest page.
        l: i32,
        /// Width of the widest page.
        u: i32,
        /// Maximum stack depth.
        s: u16,
        /// Total number of pages.
        t: u16,
    },
    PostPost { q: i32, i: u8 },
}

/// Pull-based decoder over a DVI byte stream.
///
/// Decoding stops after `post_post` (the trailing padding is never read), and after the
/// first error.
pub struct Decoder<R> {
    reader: R,
    offset: u64,
    finished: bool,
}

impl<'a> Decoder<&'a [u8]> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            finished: false,
        }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_exact(&mut self, buf: &mut [u8], context: &'static str) -> Result<(), DecodeError> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Truncated {
                context,
                offset: self.offset,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn read_unsigned(&mut self, len: usize, context: &'static str) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf[4 - len..], context)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_signed(&mut self, len: usize, context: &'static str) -> Result<i32, DecodeError> {
        let raw = self.read_unsigned(len, context)?;
        let shift = 32 - 8 * len as u32;
        Ok(((raw << shift) as i32) >> shift)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf, context)?;
        Ok(buf[0])
    }

    /// A length operand: unsigned for 1 to 3 bytes, signed (and required non-negative) for 4.
    fn read_length(&mut self, len: usize, context: &'static str) -> Result<usize, DecodeError> {
        let offset = self.offset;
        if len == 4 {
            let value = self.read_signed(4, context)?;
            usize::try_from(value).map_err(|_| DecodeError::MalformedString { context, offset })
        } else {
            Ok(self.read_unsigned(len, context)? as usize)
        }
    }

    fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<Vec<u8>, DecodeError> {
        let mut data = Vec::new();
        let read = (&mut self.reader).take(len as u64).read_to_end(&mut data)?;
        self.offset += read as u64;
        if read < len {
            return Err(DecodeError::Truncated {
                context,
                offset: self.offset,
            });
        }
        Ok(data)
    }

    fn read_utf8(&mut self, len: usize, context: &'static str) -> Result<String, DecodeError> {
        let offset = self.offset;
        let bytes = self.read_bytes(len, context)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::MalformedString { context, offset })
    }

    /// Decode the next command, or `None` at the end of the stream.
    pub fn next_command(&mut self) -> Result<Option<Command>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let mut opcode = [0u8; 1];
        let opcode = loop {
            match self.reader.read(&mut opcode) {
                Ok(0) => return Ok(None),
                Ok(_) => break opcode[0],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        let start = self.offset;
        self.offset += 1;

        let command = match opcode {
            0..=SET_CHAR_127 => Command::SetChar { c: opcode as u32 },
            SET1..SET4 => Command::SetChar {
                c: self.read_unsigned((opcode - SET1 + 1) as usize, "set")?,
            },
            SET4 => Command::SetChar {
                c: self.read_signed(4, "set4")? as u32,
            },
            SET_RULE => Command::SetRule(self.read_rule("set_rule")?),
            PUT1..PUT4 => Command::PutChar {
                c: self.read_unsigned((opcode - PUT1 + 1) as usize, "put")?,
            },
            PUT4 => Command::PutChar {
                c: self.read_signed(4, "put4")? as u32,
            },
            PUT_RULE => Command::PutRule(self.read_rule("put_rule")?),
            NOP => Command::Nop,
            BOP => {
                let mut counters = [0i32; 10];
                for counter in counters.iter_mut() {
                    *counter = self.read_signed(4, "bop")?;
                }
                let p = self.read_signed(4, "bop")?;
                Command::Bop { counters, p }
            }
            EOP => Command::Eop,
            PUSH => Command::Push,
            POP => Command::Pop,
            RIGHT1..=RIGHT4 => Command::MoveRight {
                b: self.read_signed((opcode - RIGHT1 + 1) as usize, "right")?,
            },
            W0..=W4 => Command::MoveW {
                b: self.read_optional(opcode - W0, "w")?,
            },
            X0..=X4 => Command::MoveX {
                b: self.read_optional(opcode - X0, "x")?,
            },
            DOWN1..=DOWN4 => Command::MoveDown {
                a: self.read_signed((opcode - DOWN1 + 1) as usize, "down")?,
            },
            Y0..=Y4 => Command::MoveY {
                a: self.read_optional(opcode - Y0, "y")?,
            },
            Z0..=Z4 => Command::MoveZ {
                a: self.read_optional(opcode - Z0, "z")?,
            },
            FNT_NUM_0..=FNT_NUM_63 => Command::SetFont {
                k: (opcode - FNT_NUM_0) as u32,
            },
            FNT1..=FNT4 => {
                let len = (opcode - FNT1 + 1) as usize;
                let k = if len == 4 {
                    self.read_signed(4, "fnt4")? as u32
                } else {
                    self.read_unsigned(len, "fnt")?
                };
                Command::SetFont { k }
            }
            XXX1..=XXX4 => {
                let len = self.read_length((opcode - XXX1 + 1) as usize, "special length")?;
                let payload = self.read_bytes(len, "special")?;
                Command::Special {
                    x: String::from_utf8_lossy(&payload).into_owned(),
                }
            }
            FNT_DEF1..=FNT_DEF4 => {
                let len = (opcode - FNT_DEF1 + 1) as usize;
                let k = if len == 4 {
                    self.read_signed(4, "fnt_def4")? as u32
                } else {
                    self.read_unsigned(len, "fnt_def")?
                };
                let checksum = self.read_unsigned(4, "fnt_def")?;
                let scale_factor = self.read_signed(4, "fnt_def")?;
                let design_size = self.read_signed(4, "fnt_def")?;
                let area_len = self.read_u8("fnt_def")? as usize;
                let name_len = self.read_u8("fnt_def")? as usize;
                let area = self.read_utf8(area_len, "font area")?;
                let name = self.read_utf8(name_len, "font name")?;
                Command::FontDefinition(FontDefinition {
                    k,
                    checksum,
                    scale_factor,
                    design_size,
                    area,
                    name,
                })
            }
            PRE => {
                let i = self.read_u8("pre")?;
                let num = self.read_signed(4, "pre")?;
                let den = self.read_signed(4, "pre")?;
                let mag = self.read_signed(4, "pre")?;
                let len = self.read_u8("pre")? as usize;
                let comment = String::from_utf8_lossy(&self.read_bytes(len, "comment")?).into_owned();
                Command::Preamble {
                    i,
                    num,
                    den,
                    mag,
                    comment,
                }
            }
            POST => Command::Post {
                p: self.read_signed(4, "post")?,
                num: self.read_signed(4, "post")?,
                den: self.read_signed(4, "post")?,
                mag: self.read_signed(4, "post")?,
                l: self.read_signed(4, "post")?,
                u: self.read_signed(4, "post")?,
                s: self.read_unsigned(2, "post")? as u16,
                t: self.read_unsigned(2, "post")? as u16,
            },
            POST_POST => {
                let q = self.read_signed(4, "post_post")?;
                let i = self.read_u8("post_post")?;
                self.finished = true;
                Command::PostPost { q, i }
            }
            _ => {
                return Err(DecodeError::UnknownOpcode {
                    opcode,
                    offset: start,
                });
            }
        };
        Ok(Some(command))
    }

    fn read_rule(&mut self, context: &'static str) -> Result<Rule, DecodeError> {
        let a = self.read_signed(4, context)?;
        let b = self.read_signed(4, context)?;
        Ok(Rule { a, b })
    }

    /// Operand of the `w`/`x`/`y`/`z` families: `len == 0` is the short form.
    fn read_optional(&mut self, len: u8, context: &'static str) -> Result<Option<i32>, DecodeError> {
        if len == 0 {
            Ok(None)
        } else {
            self.read_signed(len as usize, context).map(Some)
        }
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = Result<Command, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_command() {
            Ok(command) => command.map(Ok),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a whole buffer.
pub fn parse_dvi(input: &[u8]) -> Result<Vec<Command>, DecodeError> {
    Decoder::from_bytes(input).collect()
}

/// Coalesce runs of consecutive `set_char` commands into single [`Command::SetText`] runs.
///
/// Any other command, `put_char` included, ends a run, so cursor state between two merged
/// characters is exactly what executing them one by one would produce. A run of one
/// character is passed through unchanged.
pub fn merge_text<I>(commands: I) -> MergeText<I::IntoIter>
where
    I: IntoIterator<Item = Result<Command, DecodeError>>,
{
    MergeText {
        inner: commands.into_iter(),
        pending: None,
    }
}

pub struct MergeText<I> {
    inner: I,
    pending: Option<Result<Command, DecodeError>>,
}

impl<I> Iterator for MergeText<I>
where
    I: Iterator<Item = Result<Command, DecodeError>>,
{
    type Item = Result<Command, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.pending.take().or_else(|| self.inner.next())?;
        let Ok(Command::SetChar { c }) = first else {
            return Some(first);
        };
        let mut text = vec![c];
        for next in self.inner.by_ref() {
            match next {
                Ok(Command::SetChar { c }) => text.push(c),
                other => {
                    self.pending = Some(other);
                    break;
                }
            }
        }
        if text.len() == 1 {
            Some(Ok(Command::SetChar { c }))
        } else {
            Some(Ok(Command::SetText { text }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extends_short_operands() {
        // right1 -1, right2 -2, right3 +0x010203
        let bytes = [RIGHT1, 0xff, RIGHT1 + 1, 0xff, 0xfe, RIGHT1 + 2, 1, 2, 3];
        let commands = parse_dvi(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::MoveRight { b: -1 },
                Command::MoveRight { b: -2 },
                Command::MoveRight { b: 0x010203 },
            ]
        );
    }

    #[test]
    fn set_and_put_variants_normalize() {
        let bytes = [65, SET1, 200, SET1 + 1, 1, 0, PUT1, 66, PUT1 + 1, 0, 67];
        let commands = parse_dvi(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::SetChar { c: 65 },
                Command::SetChar { c: 200 },
                Command::SetChar { c: 256 },
                Command::PutChar { c: 66 },
                Command::PutChar { c: 67 },
            ]
        );
    }

    #[test]
    fn register_moves_distinguish_short_form() {
        let bytes = [W0, W0 + 1, 5, X0, Y0 + 2, 0, 10, Z0];
        let commands = parse_dvi(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::MoveW { b: None },
                Command::MoveW { b: Some(5) },
                Command::MoveX { b: None },
                Command::MoveY { a: Some(10) },
                Command::MoveZ { a: None },
            ]
        );
    }

    #[test]
    fn font_numbers_from_opcode_and_operand() {
        let bytes = [FNT_NUM_0, FNT_NUM_63, FNT1, 200, FNT1 + 1, 1, 0];
        let ks: Vec<u32> = parse_dvi(&bytes)
            .unwrap()
            .into_iter()
            .map(|c| match c {
                Command::SetFont { k } => k,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ks, vec![0, 63, 200, 256]);
    }

    #[test]
    fn decodes_font_definition() {
        let mut bytes = vec![FNT_DEF1, 3];
        bytes.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        bytes.extend_from_slice(&655360i32.to_be_bytes());
        bytes.extend_from_slice(&655360i32.to_be_bytes());
        bytes.extend_from_slice(&[0, 5]);
        bytes.extend_from_slice(b"cmr10");
        let commands = parse_dvi(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![Command::FontDefinition(FontDefinition {
                k: 3,
                checksum: 0x1234_5678,
                scale_factor: 655360,
                design_size: 655360,
                area: String::new(),
                name: "cmr10".to_string(),
            })]
        );
    }

    #[test]
    fn special_payload_is_text() {
        let mut bytes = vec![XXX1, 12];
        bytes.extend_from_slice(b"color pop   ");
        assert_eq!(
            parse_dvi(&bytes).unwrap(),
            vec![Command::Special {
                x: "color pop   ".to_string()
            }]
        );
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let bytes = [NOP, 250, NOP];
        let mut decoder = Decoder::from_bytes(&bytes);
        assert_eq!(decoder.next().unwrap().unwrap(), Command::Nop);
        assert!(matches!(
            decoder.next(),
            Some(Err(DecodeError::UnknownOpcode {
                opcode: 250,
                offset: 1
            }))
        ));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let bytes = [SET_RULE, 0, 0, 0, 1, 0, 0];
        assert!(matches!(
            parse_dvi(&bytes),
            Err(DecodeError::Truncated {
                context: "set_rule",
                ..
            })
        ));
        let bytes = [XXX1, 10, b'a', b'b'];
        assert!(matches!(
            parse_dvi(&bytes),
            Err(DecodeError::Truncated {
                context: "special",
                ..
            })
        ));
    }

    #[test]
    fn negative_special_length_is_malformed() {
        let mut bytes = vec![XXX4];
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(
            parse_dvi(&bytes),
            Err(DecodeError::MalformedString { .. })
        ));
    }

    #[test]
    fn stops_after_post_post() {
        let mut bytes = vec![POST_POST];
        bytes.extend_from_slice(&100i32.to_be_bytes());
        bytes.extend_from_slice(&[2, 223, 223, 223, 223]);
        let commands = parse_dvi(&bytes).unwrap();
        assert_eq!(commands, vec![Command::PostPost { q: 100, i: 2 }]);
    }

    #[test]
    fn merge_text_coalesces_set_char_runs() {
        let bytes = [65, 66, 67, PUT1, 68, 69, PUSH, 70, 71];
        let merged: Vec<Command> = merge_text(Decoder::from_bytes(&bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            merged,
            vec![
                Command::SetText {
                    text: vec![65, 66, 67]
                },
                Command::PutChar { c: 68 },
                Command::SetChar { c: 69 },
                Command::Push,
                Command::SetText { text: vec![70, 71] },
            ]
        );
    }

    #[test]
    fn merge_text_flushes_before_errors() {
        let bytes = [65, 66, 251];
        let mut merged = merge_text(Decoder::from_bytes(&bytes));
        assert_eq!(
            merged.next().unwrap().unwrap(),
            Command::SetText { text: vec![65, 66] }
        );
        assert!(matches!(merged.next(), Some(Err(_))));
        assert!(merged.next().is_none());
    }
}
