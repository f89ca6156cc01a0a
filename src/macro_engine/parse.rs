//! Macro text parser (spec.md §4.7).
//!
//! Grounded on `original_source/inputremapper/injection/macros/parse.py`
//! (lexer/recursive-descent shape) and the one-letter aliases documented
//! in `macro.py`'s module docstring (`k`/`r`/`w`/`m` for
//! `key`/`repeat`/`wait`/`modify`).
//!
//! Grammar (informal):
//!   chain  := unit ('.' unit)*
//!   unit   := call | plus_expr
//!   call   := ident '(' (arg (',' arg)*)? ')'
//!   arg    := (ident '=')? value
//!   value  := number | string | '$' ident | call | plus_expr
//!   plus_expr := ident ('+' ident)+          -- sugar for hold_keys(...)

use std::collections::HashMap;

use crate::error::MacroError;

use super::argument::Argument;
use super::task::{Direction, HoldTarget, Task};
use super::{LedKind, Macro};

pub fn parse_macro(text: &str) -> Result<Macro, MacroError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let tasks = parser.parse_chain()?;
    parser.expect_eof()?;
    Ok(Macro::new(tasks))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Var(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Eq,
}

fn tokenize(text: &str) -> Result<Vec<Token>, MacroError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '"' {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(MacroError::UnterminatedString);
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                i += 1;
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(MacroError::UnexpectedToken("$".into()));
                }
                tokens.push(Token::Var(chars[start..i].iter().collect()));
            }
            _ if c.is_ascii_digit() || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let slice: String = chars[start..i].iter().collect();
                let n: f64 = slice
                    .parse()
                    .map_err(|_| MacroError::UnexpectedToken(slice.clone()))?;
                tokens.push(Token::Number(n));
            }
            _ if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(MacroError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// An argument before it is bound to a specific task field: either a
/// resolvable scalar, a nested macro, or the explicit `none` literal
/// used by optional `then`/`else`/`hold` slots.
#[derive(Debug, Clone)]
enum RawArg {
    Scalar(Argument),
    Macro(Macro),
    None,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_eof(&self) -> Result<(), MacroError> {
        if self.pos < self.tokens.len() {
            return Err(MacroError::UnexpectedToken(format!("{:?}", self.tokens[self.pos])));
        }
        Ok(())
    }

    fn expect(&mut self, token: Token) -> Result<(), MacroError> {
        match self.bump() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(MacroError::UnexpectedToken(format!("{t:?}"))),
            None => Err(MacroError::UnexpectedToken("<eof>".into())),
        }
    }

    fn parse_chain(&mut self) -> Result<Vec<Task>, MacroError> {
        let mut tasks = vec![self.parse_unit()?];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.bump();
            tasks.push(self.parse_unit()?);
        }
        Ok(tasks)
    }

    fn parse_chain_as_macro(&mut self) -> Result<Macro, MacroError> {
        Ok(Macro::new(self.parse_chain()?))
    }

    fn parse_unit(&mut self) -> Result<Task, MacroError> {
        if let Some(plus) = self.try_parse_plus_expr()? {
            return Ok(plus);
        }
        self.parse_call()
    }

    /// `a + b + c` sugar; only consumes input if a `+` genuinely follows
    /// the leading identifier so `key(a)` isn't mistaken for one.
    fn try_parse_plus_expr(&mut self) -> Result<Option<Task>, MacroError> {
        let start = self.pos;
        let first = match self.peek() {
            Some(Token::Ident(name)) if !matches!(self.tokens.get(self.pos + 1), Some(Token::LParen)) => name.clone(),
            _ => return Ok(None),
        };
        if !matches!(self.tokens.get(self.pos + 1), Some(Token::Plus)) {
            return Ok(None);
        }
        self.bump();
        let mut symbols = vec![Argument::Text(first)];
        while matches!(self.peek(), Some(Token::Plus)) {
            self.bump();
            match self.bump() {
                Some(Token::Ident(name)) => symbols.push(Argument::Text(name)),
                other => {
                    self.pos = start;
                    return Err(MacroError::UnexpectedToken(format!("{other:?}")));
                }
            }
        }
        Ok(Some(Task::HoldKeys { symbols }))
    }

    fn parse_call(&mut self) -> Result<Task, MacroError> {
        let name = match self.bump() {
            Some(Token::Ident(name)) => name,
            other => return Err(MacroError::UnexpectedToken(format!("{other:?}"))),
        };
        self.expect(Token::LParen)?;

        let mut positional = Vec::new();
        let mut keyword = HashMap::new();

        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                self.parse_one_arg(&mut positional, &mut keyword)?;
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;

        build_task(&canonical_name(&name), positional, keyword)
    }

    fn parse_one_arg(
        &mut self,
        positional: &mut Vec<RawArg>,
        keyword: &mut HashMap<String, RawArg>,
    ) -> Result<(), MacroError> {
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            if matches!(self.tokens.get(self.pos + 1), Some(Token::Eq)) {
                self.bump();
                self.bump();
                let value = self.parse_value()?;
                if keyword.insert(name.clone(), value).is_some() {
                    return Err(MacroError::DuplicateKeywordArgument(name));
                }
                return Ok(());
            }
        }
        if !keyword.is_empty() {
            return Err(MacroError::PositionalAfterKeyword);
        }
        positional.push(self.parse_value()?);
        Ok(())
    }

    fn parse_value(&mut self) -> Result<RawArg, MacroError> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.bump();
                Ok(RawArg::Scalar(Argument::Number(n)))
            }
            Some(Token::Str(s)) => {
                self.bump();
                Ok(RawArg::Scalar(Argument::Text(s)))
            }
            Some(Token::Var(name)) => {
                self.bump();
                Ok(RawArg::Scalar(Argument::Variable(name)))
            }
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case("none") => {
                self.bump();
                Ok(RawArg::None)
            }
            Some(Token::Ident(_)) => {
                if let Some(task) = self.try_parse_plus_expr()? {
                    return Ok(RawArg::Macro(Macro::new(vec![task])));
                }
                if matches!(self.tokens.get(self.pos + 1), Some(Token::LParen)) {
                    let task = self.parse_call()?;
                    return Ok(RawArg::Macro(Macro::new(vec![task])));
                }
                // A bare word used as a plain string (e.g. a direction
                // name or an unquoted key symbol).
                match self.bump() {
                    Some(Token::Ident(name)) => Ok(RawArg::Scalar(Argument::Text(name))),
                    other => Err(MacroError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            other => Err(MacroError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

/// `macro.py`'s one-letter shorthands.
fn canonical_name(name: &str) -> String {
    match name {
        "k" => "key",
        "r" => "repeat",
        "w" => "wait",
        "m" => "modify",
        "h" => "hold",
        other => other,
    }
    .to_string()
}

fn arg<'a>(positional: &'a [RawArg], keyword: &'a HashMap<String, RawArg>, position: usize, name: &str) -> Option<&'a RawArg> {
    keyword.get(name).or_else(|| positional.get(position))
}

fn require<'a>(
    positional: &'a [RawArg],
    keyword: &'a HashMap<String, RawArg>,
    position: usize,
    name: &str,
    function: &str,
) -> Result<&'a RawArg, MacroError> {
    arg(positional, keyword, position, name).ok_or_else(|| MacroError::BadArity {
        function: function.to_string(),
        expected: format!("at least {}", position + 1),
        got: positional.len(),
    })
}

fn as_scalar(raw: &RawArg, function: &str, position: usize) -> Result<Argument, MacroError> {
    match raw {
        RawArg::Scalar(a) => Ok(a.clone()),
        _ => Err(MacroError::WrongArgumentType {
            function: function.to_string(),
            position,
            name: "<macro>".into(),
        }),
    }
}

fn as_macro_required(raw: &RawArg, function: &str, position: usize) -> Result<Macro, MacroError> {
    match raw {
        RawArg::Macro(m) => Ok(m.clone()),
        _ => Err(MacroError::WrongArgumentType {
            function: function.to_string(),
            position,
            name: "<macro>".into(),
        }),
    }
}

fn as_macro_opt(raw: Option<&RawArg>) -> Option<Macro> {
    match raw {
        Some(RawArg::Macro(m)) => Some(m.clone()),
        _ => None,
    }
}

fn variable_name(raw: &RawArg, function: &str, position: usize) -> Result<String, MacroError> {
    match raw {
        RawArg::Scalar(Argument::Text(name)) => Ok(name.clone()),
        RawArg::Scalar(Argument::Number(n)) => Ok(format!("{n}")),
        _ => Err(MacroError::InvalidVariableName(format!("{function} arg {position}"))),
    }
}

fn direction(raw: &RawArg, function: &str, position: usize) -> Result<Direction, MacroError> {
    let text = match raw {
        RawArg::Scalar(Argument::Text(s)) => s.clone(),
        _ => {
            return Err(MacroError::WrongArgumentType {
                function: function.to_string(),
                position,
                name: "direction".into(),
            })
        }
    };
    Direction::parse(&text).ok_or_else(|| MacroError::WrongArgumentType {
        function: function.to_string(),
        position,
        name: text,
    })
}

fn build_task(name: &str, positional: Vec<RawArg>, keyword: HashMap<String, RawArg>) -> Result<Task, MacroError> {
    let p = &positional;
    let kw = &keyword;

    match name {
        "key" => {
            let symbol = as_scalar(require(p, kw, 0, "symbol", name)?, name, 0)?;
            Ok(Task::Key { symbol })
        }
        "hold" => {
            let target = match arg(p, kw, 0, "macro") {
                None => None,
                Some(RawArg::None) => None,
                Some(RawArg::Macro(m)) => Some(HoldTarget::Macro(m.clone())),
                Some(raw @ RawArg::Scalar(_)) => Some(HoldTarget::Symbol(as_scalar(raw, name, 0)?)),
            };
            Ok(Task::Hold { target })
        }
        "hold_keys" => {
            let symbols = p
                .iter()
                .enumerate()
                .map(|(i, raw)| as_scalar(raw, name, i))
                .collect::<Result<Vec<_>, _>>()?;
            if symbols.is_empty() {
                return Err(MacroError::BadArity {
                    function: name.to_string(),
                    expected: "at least 1".into(),
                    got: 0,
                });
            }
            Ok(Task::HoldKeys { symbols })
        }
        "repeat" => {
            let count = as_scalar(require(p, kw, 0, "count", name)?, name, 0)?;
            let body = as_macro_required(require(p, kw, 1, "macro", name)?, name, 1)?;
            Ok(Task::Repeat { count, body })
        }
        "modify" => {
            let symbol = as_scalar(require(p, kw, 0, "modifier", name)?, name, 0)?;
            let body = as_macro_required(require(p, kw, 1, "macro", name)?, name, 1)?;
            Ok(Task::Modify { symbol, body })
        }
        "if_eq" => {
            let value_1 = as_scalar(require(p, kw, 0, "value_1", name)?, name, 0)?;
            let value_2 = as_scalar(require(p, kw, 1, "value_2", name)?, name, 1)?;
            let then = as_macro_opt(arg(p, kw, 2, "then"));
            let else_ = as_macro_opt(arg(p, kw, 3, "else"));
            Ok(Task::IfEq { value_1, value_2, then, else_ })
        }
        "if_tap" => {
            let then = as_macro_opt(arg(p, kw, 0, "then"));
            let else_ = as_macro_opt(arg(p, kw, 1, "else"));
            let timeout_ms = match arg(p, kw, 2, "timeout") {
                Some(raw) => as_scalar(raw, name, 2)?,
                None => Argument::Number(300.0),
            };
            Ok(Task::IfTap { then, else_, timeout_ms })
        }
        "if_single" => {
            let then = as_macro_opt(arg(p, kw, 0, "then"));
            let else_ = as_macro_opt(arg(p, kw, 1, "else"));
            let timeout_ms = match arg(p, kw, 2, "timeout") {
                Some(RawArg::None) | None => None,
                Some(raw) => Some(as_scalar(raw, name, 2)?),
            };
            Ok(Task::IfSingle { then, else_, timeout_ms })
        }
        "mouse" => {
            let direction = direction(require(p, kw, 0, "direction", name)?, name, 0)?;
            let speed = as_scalar(require(p, kw, 1, "speed", name)?, name, 1)?;
            let acceleration = match arg(p, kw, 2, "acceleration") {
                Some(RawArg::None) | None => None,
                Some(raw) => Some(as_scalar(raw, name, 2)?),
            };
            Ok(Task::Mouse { direction, speed, acceleration })
        }
        "mouse_xy" => {
            let x = match arg(p, kw, 0, "x") {
                Some(raw) => as_scalar(raw, name, 0)?,
                None => Argument::Number(0.0),
            };
            let y = match arg(p, kw, 1, "y") {
                Some(raw) => as_scalar(raw, name, 1)?,
                None => Argument::Number(0.0),
            };
            let acceleration = match arg(p, kw, 2, "acceleration") {
                Some(raw) => as_scalar(raw, name, 2)?,
                None => Argument::Number(1.0),
            };
            Ok(Task::MouseXy { x, y, acceleration })
        }
        "wheel" => {
            let direction = direction(require(p, kw, 0, "direction", name)?, name, 0)?;
            let speed = as_scalar(require(p, kw, 1, "speed", name)?, name, 1)?;
            Ok(Task::Wheel { direction, speed })
        }
        "set" => {
            let variable = variable_name(require(p, kw, 0, "variable", name)?, name, 0)?;
            let value = match arg(p, kw, 1, "value") {
                Some(RawArg::None) | None => None,
                Some(raw) => Some(as_scalar(raw, name, 1)?),
            };
            Ok(Task::Set { variable, value })
        }
        "add" => {
            let variable = variable_name(require(p, kw, 0, "variable", name)?, name, 0)?;
            let value = as_scalar(require(p, kw, 1, "value", name)?, name, 1)?;
            Ok(Task::Add { variable, value })
        }
        "event" => {
            let type_ = as_scalar(require(p, kw, 0, "type", name)?, name, 0)?;
            let code = as_scalar(require(p, kw, 1, "code", name)?, name, 1)?;
            let value = as_scalar(require(p, kw, 2, "value", name)?, name, 2)?;
            Ok(Task::Event { type_, code, value })
        }
        "parallel" => {
            let children = p
                .iter()
                .enumerate()
                .map(|(i, raw)| as_macro_required(raw, name, i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Task::Parallel { children })
        }
        "wait" => {
            let min_ms = as_scalar(require(p, kw, 0, "min", name)?, name, 0)?;
            let max_ms = match arg(p, kw, 1, "max") {
                Some(RawArg::None) | None => None,
                Some(raw) => Some(as_scalar(raw, name, 1)?),
            };
            Ok(Task::Wait { min_ms, max_ms })
        }
        "if_capslock" => {
            let then = as_macro_opt(arg(p, kw, 0, "then"));
            let else_ = as_macro_opt(arg(p, kw, 1, "else"));
            Ok(Task::IfLed { led: LedKind::CapsLock, then, else_ })
        }
        "if_numlock" => {
            let then = as_macro_opt(arg(p, kw, 0, "then"));
            let else_ = as_macro_opt(arg(p, kw, 1, "else"));
            Ok(Task::IfLed { led: LedKind::NumLock, then, else_ })
        }
        "mod_tap" => {
            let default = as_scalar(require(p, kw, 0, "default", name)?, name, 0)?;
            let modifier = as_scalar(require(p, kw, 1, "modifier", name)?, name, 1)?;
            let tapping_term_ms = match arg(p, kw, 2, "tapping_term") {
                Some(raw) => as_scalar(raw, name, 2)?,
                None => Argument::Number(200.0),
            };
            Ok(Task::ModTap { default, modifier, tapping_term_ms })
        }
        other => Err(MacroError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_key_call() {
        let m = parse_macro("key(a)").unwrap();
        assert_eq!(m.tasks().len(), 1);
        assert!(matches!(m.tasks()[0], Task::Key { .. }));
    }

    #[test]
    fn parses_dot_chain() {
        let m = parse_macro("key(a).key(b)").unwrap();
        assert_eq!(m.tasks().len(), 2);
    }

    #[test]
    fn parses_nested_hold_with_macro_body() {
        let m = parse_macro("hold(key(a))").unwrap();
        match &m.tasks()[0] {
            Task::Hold { target: Some(HoldTarget::Macro(body)) } => {
                assert_eq!(body.tasks().len(), 1);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_plus_sugar_as_hold_keys() {
        let m = parse_macro("a+b+c").unwrap();
        match &m.tasks()[0] {
            Task::HoldKeys { symbols } => assert_eq!(symbols.len(), 3),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_repeat_with_variable_count() {
        let m = parse_macro("repeat($n, key(a))").unwrap();
        match &m.tasks()[0] {
            Task::Repeat { count: Argument::Variable(name), .. } => assert_eq!(name, "n"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_if_eq_with_optional_else() {
        let m = parse_macro(r#"if_eq(1, "a", key(x))"#).unwrap();
        match &m.tasks()[0] {
            Task::IfEq { then: Some(_), else_: None, .. } => {}
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(matches!(parse_macro("nope(a)"), Err(MacroError::UnknownFunction(_))));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(parse_macro(r#"key("a)"#), Err(MacroError::UnterminatedString)));
    }

    #[test]
    fn one_letter_aliases_resolve() {
        let m = parse_macro("r(2, k(a))").unwrap();
        assert!(matches!(m.tasks()[0], Task::Repeat { .. }));
    }

    #[test]
    fn comments_are_ignored() {
        let m = parse_macro("key(a) # press a\n.key(b)").unwrap();
        assert_eq!(m.tasks().len(), 2);
    }
}
