//! Tokenizer with Python-style indentation tracking

use super::ast::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

// Longest operators first so prefixes never shadow them
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-",
    "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

/// Deepest indentation accepted, counting levels above column zero
const MAX_INDENT: usize = 100;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

/// Split source into tokens
///
/// Returns `ParseError::Incomplete` when the text stops inside an open
/// bracket, a triple-quoted string, or after a line continuation.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn syntax(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn run(&mut self) -> Result<(), ParseError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\\' => match self.peek_at(1) {
                    Some('\n') => {
                        self.pos += 2;
                        self.line += 1;
                    }
                    None => return Err(ParseError::Incomplete),
                    Some(_) => {
                        return Err(
                            self.syntax("unexpected character after line continuation character")
                        )
                    }
                },
                '\'' | '"' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphanumeric() => {
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c == '_' || c.is_alphanumeric()) {
                        self.pos += 1;
                    }
                    let name: String = self.chars[start..self.pos].iter().collect();
                    self.push(Tok::Name(name));
                }
                _ => self.operator()?,
            }
        }

        if self.depth > 0 {
            return Err(ParseError::Incomplete);
        }
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure indentation at the start of a logical line
    ///
    /// Returns true when the line was blank or a comment and was skipped.
    fn indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            if self.indents.len() > MAX_INDENT {
                return Err(self.syntax("too many levels of indentation"));
            }
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.syntax("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn string(&mut self, quote: char) -> Result<(), ParseError> {
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                if triple {
                    return Err(ParseError::Incomplete);
                }
                return Err(ParseError::Syntax {
                    line: start_line,
                    message: "unterminated string literal".into(),
                });
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ParseError::Syntax {
                        line: start_line,
                        message: "unterminated string literal".into(),
                    });
                }
                self.line += 1;
            }
            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    return Err(ParseError::Incomplete);
                };
                self.pos += 2;
                match next {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
                continue;
            }
            value.push(c);
            self.pos += 1;
        }
        self.tokens.push(Token {
            tok: Tok::Str(value),
            line: start_line,
        });
        Ok(())
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.syntax("invalid hexadecimal literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float && self.peek_at(1) != Some('.') {
                // `1.real` is attribute access in Python; only digits continue a float
                if self.peek_at(1).is_some_and(|n| n.is_alphabetic() || n == '_') {
                    break;
                }
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.syntax("invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.syntax("invalid decimal literal"))?;
            self.push(Tok::Float(value));
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.syntax("integer literal too large"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn operator(&mut self) -> Result<(), ParseError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if !matches {
                continue;
            }
            match *op {
                "(" | "[" | "{" => self.depth += 1,
                ")" | "]" | "}" => {
                    if self.depth == 0 {
                        return Err(self.syntax(format!("unmatched '{}'", op)));
                    }
                    self.depth -= 1;
                }
                _ => {}
            }
            self.pos += len;
            self.push(Tok::Op(op));
            return Ok(());
        }
        let c = self.peek().unwrap_or('?');
        Err(self.syntax(format!("invalid character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("y = 456"),
            vec![
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(456),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let t = toks("if x:\n    y\nz\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        assert_eq!(t.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_indentation_depth_is_capped() {
        let src: String = (0..5000)
            .map(|level| format!("{}if 1:\n", " ".repeat(level)))
            .collect();
        match tokenize(&src) {
            Err(ParseError::Syntax { line, message }) => {
                assert_eq!(message, "too many levels of indentation");
                assert_eq!(line, 102);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_bracket_is_incomplete() {
        assert_eq!(tokenize("print(1,"), Err(ParseError::Incomplete));
        assert_eq!(tokenize("'''doc"), Err(ParseError::Incomplete));
        assert_eq!(tokenize("x = 1 + \\"), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let t = toks("[1,\n 2]");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_strings_and_numbers() {
        assert_eq!(
            toks("'a\\n' 1.5 0x10 1_000 2e3"),
            vec![
                Tok::Str("a\n".into()),
                Tok::Float(1.5),
                Tok::Int(16),
                Tok::Int(1000),
                Tok::Float(2000.0),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(tokenize("'abc"), Err(ParseError::Syntax { .. })));
        assert!(matches!(tokenize(")"), Err(ParseError::Syntax { .. })));
        assert!(matches!(tokenize("a $ b"), Err(ParseError::Syntax { .. })));
        assert!(matches!(
            tokenize("if x:\n    y\n  z\n"),
            Err(ParseError::Syntax { .. })
        ));
    }
}
