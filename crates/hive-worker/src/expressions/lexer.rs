// Tokenizer for `#expr(...)expr#` bodies.
//
// The body arrives as fragments: source text, and values that `#name#`
// references already resolved to. Resolved values become `Token::Value`
// and are never re-parsed.

use super::Fragment;
use crate::error::ParamError;
use crate::params::ParamValue;

#[derive(Debug, Clone)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Value(ParamValue),
    Punct(&'static str),
}

impl Token {
    pub(crate) fn is_punct(&self, p: &str) -> bool {
        matches!(self, Token::Punct(q) if *q == p)
    }

    pub(crate) fn is_ident(&self, name: &str) -> bool {
        matches!(self, Token::Ident(n) if n == name)
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("{s:?}"),
            Token::Ident(name) => name.clone(),
            Token::Value(v) => format!("value {v}"),
            Token::Punct(p) => format!("'{p}'"),
        }
    }
}

const TWO_CHAR_PUNCT: [&str; 7] = ["==", "!=", "<=", ">=", "&&", "||", "//"];
const ONE_CHAR_PUNCT: [&str; 16] = [
    "(", ")", "[", "]", "{", "}", ",", ":", "+", "-", "*", "/", "%", "<", ">", "!",
];

pub(crate) fn tokenize(fragments: &[Fragment]) -> Result<Vec<Token>, ParamError> {
    let mut tokens = Vec::new();
    for fragment in fragments {
        match fragment {
            Fragment::Value(value) => tokens.push(Token::Value(value.clone())),
            Fragment::Source(text) => tokenize_source(text, &mut tokens)?,
        }
    }
    Ok(tokens)
}

fn tokenize_source(text: &str, tokens: &mut Vec<Token>) -> Result<(), ParamError> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            i = read_number(&chars, i, tokens)?;
        } else if c == '\'' || c == '"' {
            i = read_string(&chars, i, tokens)?;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let pair: String = chars[i..chars.len().min(i + 2)].iter().collect();
            if let Some(p) = TWO_CHAR_PUNCT.iter().find(|p| **p == pair) {
                tokens.push(Token::Punct(*p));
                i += 2;
            } else if let Some(p) = ONE_CHAR_PUNCT.iter().find(|p| p.starts_with(c)) {
                tokens.push(Token::Punct(*p));
                i += 1;
            } else {
                return Err(ParamError::syntax(format!(
                    "unexpected character '{c}' in expression"
                )));
            }
        }
    }
    Ok(())
}

fn read_number(chars: &[char], start: usize, tokens: &mut Vec<Token>) -> Result<usize, ParamError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    let literal: String = chars[start..i].iter().collect();
    let token = if is_float {
        literal.parse().map(Token::Float).ok()
    } else {
        literal.parse().map(Token::Int).ok()
    };
    let token =
        token.ok_or_else(|| ParamError::syntax(format!("invalid number literal {literal}")))?;
    tokens.push(token);
    Ok(i)
}

fn read_string(chars: &[char], start: usize, tokens: &mut Vec<Token>) -> Result<usize, ParamError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => {
                tokens.push(Token::Str(out));
                return Ok(i + 1);
            }
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ParamError::syntax("unterminated string literal in expression"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Token> {
        tokenize(&[Fragment::Source(text.to_string())]).unwrap()
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("12 3.5 1e3 7");
        assert!(matches!(tokens[0], Token::Int(12)));
        assert!(matches!(tokens[1], Token::Float(f) if f == 3.5));
        assert!(matches!(tokens[2], Token::Float(f) if f == 1000.0));
        assert!(matches!(tokens[3], Token::Int(7)));
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = lex(r#"'a\'b' "c\nd""#);
        assert!(matches!(&tokens[0], Token::Str(s) if s == "a'b"));
        assert!(matches!(&tokens[1], Token::Str(s) if s == "c\nd"));
        assert!(tokenize(&[Fragment::Source("'open".into())]).is_err());
    }

    #[test]
    fn test_punctuation_prefers_two_chars() {
        let tokens = lex("a//b<=c!=d");
        assert!(tokens[1].is_punct("//"));
        assert!(tokens[3].is_punct("<="));
        assert!(tokens[5].is_punct("!="));
    }

    #[test]
    fn test_values_are_kept_whole() {
        let tokens = tokenize(&[
            Fragment::Source("len(".into()),
            Fragment::Value(ParamValue::from("a + b")),
            Fragment::Source(")".into()),
        ])
        .unwrap();
        assert_eq!(tokens.len(), 4);
        assert!(matches!(&tokens[2], Token::Value(ParamValue::String(s)) if s == "a + b"));
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize(&[Fragment::Source("1 $ 2".into())]).unwrap_err();
        assert!(matches!(err, ParamError::Syntax(_)));
    }
}
