//! Tokenizer for the restricted expression dialect

use crate::data::errors::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    AndAnd,
    OrOr,
    Bang,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, SandboxError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' => tokens.push(lex_number(input, &mut chars)?),
            '\'' | '"' => tokens.push(lex_string(&mut chars, c)?),
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut end = pos;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        end = i + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[pos..end].to_string()));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(SandboxError::Eval(
                        "assignment is not allowed; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '&'))) {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(SandboxError::Eval("unexpected character '&'".to_string()));
                }
            }
            '|' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '|'))) {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(SandboxError::Eval("unexpected character '|'".to_string()));
                }
            }
            other => {
                return Err(SandboxError::Eval(format!(
                    "unexpected character '{}'",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

fn lex_number(
    input: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<Token, SandboxError> {
    let start = chars.peek().map(|&(i, _)| i).unwrap_or(0);
    let mut end = start;
    let mut is_float = false;

    while let Some(&(i, ch)) = chars.peek() {
        match ch {
            '0'..='9' => {
                end = i + 1;
                chars.next();
            }
            '.' => {
                // a digit must follow, otherwise this dot is attribute access
                let mut ahead = chars.clone();
                ahead.next();
                match ahead.peek() {
                    Some((_, d)) if d.is_ascii_digit() => {
                        is_float = true;
                        end = i + 1;
                        chars.next();
                    }
                    _ => break,
                }
            }
            'e' | 'E' => {
                is_float = true;
                end = i + 1;
                chars.next();
                if let Some(&(j, sign)) = chars.peek() {
                    if sign == '+' || sign == '-' {
                        end = j + 1;
                        chars.next();
                    }
                }
            }
            _ => break,
        }
    }

    let text = &input[start..end];
    if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| SandboxError::Eval(format!("invalid number literal '{}'", text)))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Ok(Token::Int(i)),
            Err(_) => text
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| SandboxError::Eval(format!("invalid number literal '{}'", text))),
        }
    }
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
) -> Result<Token, SandboxError> {
    chars.next(); // opening quote
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        if c == quote {
            return Ok(Token::Str(out));
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some((_, escaped)) = chars.next() else {
            break;
        };
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{0008}'),
            'f' => out.push('\u{000C}'),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let Some((_, h)) = chars.next() else {
                        return Err(SandboxError::Eval("truncated \\u escape".to_string()));
                    };
                    let digit = h
                        .to_digit(16)
                        .ok_or_else(|| SandboxError::Eval("invalid \\u escape".to_string()))?;
                    code = code * 16 + digit;
                }
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| SandboxError::Eval("invalid \\u escape".to_string()))?,
                );
            }
            other => {
                return Err(SandboxError::Eval(format!(
                    "unknown escape '\\{}'",
                    other
                )));
            }
        }
    }
    Err(SandboxError::Eval("unterminated string literal".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("42").unwrap(), vec![Token::Int(42)]);
        assert_eq!(tokenize("3.5").unwrap(), vec![Token::Float(3.5)]);
        assert_eq!(tokenize("1e3").unwrap(), vec![Token::Float(1000.0)]);
    }

    #[test]
    fn test_dot_after_number_is_attribute() {
        // "1.foo" lexes as Int, Dot, Ident - nonsense, but the parser rejects it
        let tokens = tokenize("1 .x").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Int(1), Token::Dot, Token::Ident("x".to_string())]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            tokenize(r#""a\"b""#).unwrap(),
            vec![Token::Str("a\"b".to_string())]
        );
        assert_eq!(
            tokenize(r"'tab\t'").unwrap(),
            vec![Token::Str("tab\t".to_string())]
        );
        assert_eq!(
            tokenize(r#""é""#).unwrap(),
            vec![Token::Str("é".to_string())]
        );
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokenize("a == b != c <= d").unwrap(),
            vec![
                Token::Ident("a".to_string()),
                Token::Eq,
                Token::Ident("b".to_string()),
                Token::Ne,
                Token::Ident("c".to_string()),
                Token::Le,
                Token::Ident("d".to_string()),
            ]
        );
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a & b").is_err());
    }
}
