//! Hand-written lexer for the accepted JavaScript subset

use crate::ast::Pos;
use crate::error::CompileError;

/// Lexical token payload
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword (keywords are resolved by the parser)
    Ident(String),
    Number(f64),
    Str(String),
    /// Operator or delimiter, longest-match
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset just past the last character
    pub end: usize,
}

// Multi-character operators, checked before single characters.
const PUNCTS3: [&str; 2] = ["===", "!=="];
const PUNCTS2: [&str; 15] = [
    "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=", "-=", "*=", "/=", "%=",
];
const PUNCTS1: &str = "+-*/%<>=!?:;,.(){}[]";

/// Tokenize the whole source, appending a final `Eof` token
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut col = 0;

    macro_rules! bump {
        () => {{
            if bytes[i] == b'\n' {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < bytes.len() {
        let c = bytes[i] as char;

        // whitespace
        if c.is_ascii_whitespace() {
            bump!();
            continue;
        }

        // comments
        if c == '/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                while i < bytes.len() && bytes[i] != b'\n' {
                    bump!();
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                bump!();
                bump!();
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    bump!();
                }
                if i + 1 >= bytes.len() {
                    return Err(CompileError::new("Unterminated comment", line, col));
                }
                bump!();
                bump!();
                continue;
            }
        }

        let pos = Pos::new(line, col);
        let start = i;

        // identifiers and keywords
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            while i < bytes.len() {
                let c = bytes[i] as char;
                if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                    bump!();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Ident(source[start..i].to_string()),
                pos,
                start,
                end: i,
            });
            continue;
        }

        // numbers
        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                bump!();
            }
            if i + 1 < bytes.len() && bytes[i] == b'.' && (bytes[i + 1] as char).is_ascii_digit() {
                bump!();
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    bump!();
                }
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                    while i < j {
                        bump!();
                    }
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        bump!();
                    }
                }
            }
            let text = &source[start..i];
            let value: f64 = text
                .parse()
                .map_err(|_| CompileError::new(format!("Invalid number `{}`", text), pos.line, pos.column))?;
            tokens.push(Token {
                tok: Tok::Number(value),
                pos,
                start,
                end: i,
            });
            continue;
        }

        // strings
        if c == '\'' || c == '"' {
            let quote = bytes[i];
            bump!();
            let mut value = String::new();
            loop {
                if i >= bytes.len() || bytes[i] == b'\n' {
                    return Err(CompileError::new("Unterminated string", pos.line, pos.column));
                }
                if bytes[i] == quote {
                    bump!();
                    break;
                }
                if bytes[i] == b'\\' {
                    bump!();
                    if i >= bytes.len() {
                        return Err(CompileError::new("Unterminated string", pos.line, pos.column));
                    }
                    let escaped = bytes[i] as char;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                    bump!();
                    continue;
                }
                // byte-wise copy keeps multi-byte characters intact
                let ch_len = utf8_len(bytes[i]);
                value.push_str(&source[i..i + ch_len]);
                for _ in 0..ch_len {
                    bump!();
                }
            }
            tokens.push(Token {
                tok: Tok::Str(value),
                pos,
                start,
                end: i,
            });
            continue;
        }

        // operators and delimiters
        if i + 3 <= bytes.len() {
            if let Some(p) = PUNCTS3.iter().find(|p| source[i..].starts_with(**p)) {
                for _ in 0..3 {
                    bump!();
                }
                tokens.push(Token { tok: Tok::Punct(p), pos, start, end: i });
                continue;
            }
        }
        if i + 2 <= bytes.len() {
            if let Some(p) = PUNCTS2.iter().find(|p| source[i..].starts_with(**p)) {
                for _ in 0..2 {
                    bump!();
                }
                tokens.push(Token { tok: Tok::Punct(p), pos, start, end: i });
                continue;
            }
        }
        if let Some(idx) = PUNCTS1.find(c) {
            let p: &'static str = &PUNCTS1[idx..idx + 1];
            bump!();
            tokens.push(Token { tok: Tok::Punct(p), pos, start, end: i });
            continue;
        }

        return Err(CompileError::new(
            format!("Unexpected character `{}`", c),
            pos.line,
            pos.column,
        ));
    }

    tokens.push(Token {
        tok: Tok::Eof,
        pos: Pos::new(line, col),
        start: i,
        end: i,
    });
    Ok(tokens)
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn punctuation_longest_match() {
        assert_eq!(
            toks("a === b => c"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("==="),
                Tok::Ident("b".into()),
                Tok::Punct("=>"),
                Tok::Ident("c".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            toks("1.5 'a\\nb' \"x\""),
            vec![
                Tok::Number(1.5),
                Tok::Str("a\nb".into()),
                Tok::Str("x".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            toks("1 // line\n/* block\n */ 2"),
            vec![Tok::Number(1.0), Tok::Number(2.0), Tok::Eof]
        );
    }

    #[test]
    fn positions_track_lines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[1].pos, Pos::new(2, 2));
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("let a = `x`").unwrap_err();
        assert!(err.message.contains("Unexpected character"));
    }
}
