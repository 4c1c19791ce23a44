//! Just enough PostScript to follow what `graphicx` emits for `\scalebox`, `\rotatebox`
//! and `\resizebox` under the dvips driver.
//!
//! The operand stack lives for a single special. The `gsave` stack outlives it, since a box
//! is opened by one special and closed by another.

use log::warn;

use super::SpecialHandler;
use crate::dvi2svg::machine::Machine;
use crate::dvi2svg::matrix::Matrix;
use crate::error::{ExecuteError, PostScriptError};

/// A value on the operand stack.
#[derive(Debug, Clone, PartialEq)]
pub enum PsObject {
    Number(f64),
    String(String),
    Array(Vec<PsObject>),
    Mark,
    Name(String),
    Procedure(String),
}

#[derive(Debug, Default)]
pub struct PsInterpreter {
    gsave_stack: Vec<Matrix>,
}

impl PsInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth of the `gsave` stack.
    pub fn depth(&self) -> usize {
        self.gsave_stack.len()
    }

    /// Run `program` against `machine`. On error the machine's transform and cursor, and
    /// the `gsave` stack, are left as they were before the call.
    pub fn interpret(&mut self, machine: &mut dyn Machine, program: &str) -> Result<(), PostScriptError> {
        let matrix = machine.state().matrix;
        let position = machine.state().position;
        let saved = self.gsave_stack.clone();

        let result = self.run(machine, program);
        if result.is_err() {
            let state = machine.state_mut();
            state.matrix = matrix;
            state.position = position;
            self.gsave_stack = saved;
        }
        result
    }

    fn run(&mut self, machine: &mut dyn Machine, program: &str) -> Result<(), PostScriptError> {
        let mut stack = Vec::new();
        for token in tokenize(program)? {
            if let Some(number) = parse_number(&token) {
                stack.push(PsObject::Number(number));
                continue;
            }
            match token.as_str() {
                "[" | "mark" => stack.push(PsObject::Mark),
                "]" => {
                    let start = stack
                        .iter()
                        .rposition(|o| *o == PsObject::Mark)
                        .ok_or(PostScriptError::StackUnderflow("]"))?;
                    let array = stack.split_off(start + 1);
                    stack.pop();
                    stack.push(PsObject::Array(array));
                }
                "pop" => {
                    pop(&mut stack, "pop")?;
                }
                "exch" => {
                    let a = pop(&mut stack, "exch")?;
                    let b = pop(&mut stack, "exch")?;
                    stack.push(a);
                    stack.push(b);
                }
                "dup" => {
                    let top = stack.last().cloned().ok_or(PostScriptError::StackUnderflow("dup"))?;
                    stack.push(top);
                }
                "neg" => {
                    let x = pop_number(&mut stack, "neg")?;
                    stack.push(PsObject::Number(-x));
                }
                "add" | "sub" | "mul" | "div" => {
                    let operator = arithmetic_name(&token);
                    let x = pop_number(&mut stack, operator)?;
                    let y = pop_number(&mut stack, operator)?;
                    let value = match operator {
                        "add" => y + x,
                        "sub" => y - x,
                        "mul" => y * x,
                        _ => y / x,
                    };
                    stack.push(PsObject::Number(value));
                }
                "gsave" => self.gsave_stack.push(machine.state().matrix),
                "grestore" => {
                    machine.state_mut().matrix = self
                        .gsave_stack
                        .pop()
                        .ok_or(PostScriptError::UnmatchedGrestore)?;
                }
                "currentpoint" => {
                    let (x, y) = machine.current_position();
                    stack.push(PsObject::Number(x));
                    stack.push(PsObject::Number(y));
                }
                "moveto" => {
                    let y = pop_number(&mut stack, "moveto")?;
                    let x = pop_number(&mut stack, "moveto")?;
                    machine.set_current_position(x, y);
                }
                "scale" => {
                    let y = pop_number(&mut stack, "scale")?;
                    let x = pop_number(&mut stack, "scale")?;
                    machine.state_mut().matrix.scale(x, y);
                }
                "translate" => {
                    let y = pop_number(&mut stack, "translate")?;
                    let x = pop_number(&mut stack, "translate")?;
                    machine.state_mut().matrix.translate(x, y);
                }
                "rotate" => {
                    let degrees = pop_number(&mut stack, "rotate")?;
                    machine.state_mut().matrix.rotate(degrees);
                }
                _ => match token.chars().next() {
                    Some('(') => {
                        let inner = strip_delimiters(&token, '(', ')');
                        stack.push(PsObject::String(inner.to_string()));
                    }
                    Some('/') => stack.push(PsObject::Name(token[1..].to_string())),
                    Some('{') => {
                        let inner = strip_delimiters(&token, '{', '}');
                        stack.push(PsObject::Procedure(inner.trim().to_string()));
                    }
                    _ => return Err(PostScriptError::Unimplemented(token.clone())),
                },
            }
        }
        Ok(())
    }
}

impl SpecialHandler for PsInterpreter {
    fn handle(&mut self, special: &str, machine: &mut dyn Machine) -> Result<bool, ExecuteError> {
        let Some(program) = special
            .strip_prefix("ps::")
            .or_else(|| special.strip_prefix("ps:"))
        else {
            return Ok(false);
        };
        if let Err(e) = self.interpret(machine, program) {
            warn!("skipping PostScript special `{program}`: {e}");
        }
        Ok(true)
    }
}

fn arithmetic_name(token: &str) -> &'static str {
    match token {
        "add" => "add",
        "sub" => "sub",
        "mul" => "mul",
        _ => "div",
    }
}

fn pop(stack: &mut Vec<PsObject>, operator: &'static str) -> Result<PsObject, PostScriptError> {
    stack.pop().ok_or(PostScriptError::StackUnderflow(operator))
}

fn pop_number(stack: &mut Vec<PsObject>, operator: &'static str) -> Result<f64, PostScriptError> {
    match pop(stack, operator)? {
        PsObject::Number(x) => Ok(x),
        _ => Err(PostScriptError::TypeCheck(operator)),
    }
}

fn strip_delimiters(token: &str, open: char, close: char) -> &str {
    let inner = token.strip_prefix(open).unwrap_or(token);
    inner.strip_suffix(close).unwrap_or(inner)
}

fn parse_number(token: &str) -> Option<f64> {
    let first = token.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '+' | '-' | '.')) {
        return None;
    }
    if !token.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Split a program into tokens, roughly the way ghostscript's scanner does. Strings and
/// procedures, including any nesting, come back as single tokens with their delimiters.
fn tokenize(input: &str) -> Result<Vec<String>, PostScriptError> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut string_level = 0usize;
    let mut procedure_level = 0usize;
    let mut chars = input.chars();

    fn flush(tokens: &mut Vec<String>, token: &mut String) {
        if !token.is_empty() {
            tokens.push(std::mem::take(token));
        }
    }

    while let Some(c) = chars.next() {
        let nested = string_level > 0 || procedure_level > 0;
        match c {
            '\\' if string_level > 0 => {
                token.push(c);
                token.push(chars.next().ok_or(PostScriptError::InvalidEscape)?);
            }
            '(' => {
                if string_level == 0 && procedure_level == 0 {
                    flush(&mut tokens, &mut token);
                }
                string_level += 1;
                token.push(c);
            }
            ')' if string_level > 0 => {
                string_level -= 1;
                token.push(c);
                if string_level == 0 && procedure_level == 0 {
                    flush(&mut tokens, &mut token);
                }
            }
            _ if string_level > 0 => token.push(c),
            '{' => {
                if procedure_level == 0 {
                    flush(&mut tokens, &mut token);
                }
                procedure_level += 1;
                token.push(c);
            }
            '}' if procedure_level > 0 => {
                procedure_level -= 1;
                token.push(c);
                if procedure_level == 0 {
                    flush(&mut tokens, &mut token);
                }
            }
            '%' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                if nested {
                    token.push('\n');
                }
            }
            _ if procedure_level > 0 => token.push(c),
            '[' | ']' => {
                flush(&mut tokens, &mut token);
                tokens.push(c.to_string());
            }
            '/' => {
                flush(&mut tokens, &mut token);
                token.push(c);
            }
            c if c.is_whitespace() => flush(&mut tokens, &mut token),
            _ => token.push(c),
        }
    }
    flush(&mut tokens, &mut token);
    Ok(tokens)
}
