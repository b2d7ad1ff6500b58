use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+", "-", "*", "/", "%", "<",
    ">", "!", "?", ":", ".", "[", "]", "(", ")", ",",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let (num, next) = read_number(&chars, i)?;
            tokens.push(Token::Num(num));
            i = next;
            continue;
        }

        if c == '\'' || c == '"' {
            let (s, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(s));
            i = next;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_part(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let punct = PUNCTS.iter().find(|p| {
            let len = p.chars().count();
            i + len <= chars.len() && chars[i..i + len].iter().copied().eq(p.chars())
        });
        match punct {
            // `a?.5:1` is a ternary, not optional chaining
            Some(&"?.") if chars.get(i + 2).is_some_and(char::is_ascii_digit) => {
                tokens.push(Token::Punct("?"));
                i += 1;
            }
            Some(p) => {
                tokens.push(Token::Punct(p));
                i += p.len();
            }
            None => return Err(ExprError::Syntax(format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), ExprError> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
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
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    let text: String = chars[start..i].iter().collect();
    if i < chars.len() && is_ident_start(chars[i]) {
        return Err(ExprError::Syntax(format!("invalid number '{text}{}'", chars[i])));
    }
    text.parse()
        .map(|n| (n, i))
        .map_err(|_| ExprError::Syntax(format!("invalid number '{text}'")))
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            i += 1;
            let Some(&esc) = chars.get(i) else { break };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                '0' => out.push('\0'),
                'u' => {
                    let hex: String = chars.get(i + 1..i + 5).unwrap_or_default().iter().collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .ok_or_else(|| ExprError::Syntax("invalid unicode escape".into()))?;
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    i += 4;
                }
                other => out.push(other),
            }
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }

    Err(ExprError::Syntax("unterminated string literal".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizes_chain_reference() {
        let tokens = tokenize("$$Req_1.response.body['id']").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("$$Req_1".into()),
                Token::Punct("."),
                Token::Ident("response".into()),
                Token::Punct("."),
                Token::Ident("body".into()),
                Token::Punct("["),
                Token::Str("id".into()),
                Token::Punct("]"),
            ]
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        let tokens = tokenize("a !== b").unwrap();
        assert_eq!(tokens[1], Token::Punct("!=="));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("1.5e3").unwrap(), vec![Token::Num(1500.0)]);
        assert_eq!(tokenize(".25").unwrap(), vec![Token::Num(0.25)]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(tokenize(r#""a\"b\u0041""#).unwrap(), vec![Token::Str("a\"bA".into())]);
    }

    #[test]
    fn test_optional_chain_vs_ternary() {
        assert_eq!(tokenize("a?.b").unwrap()[1], Token::Punct("?."));
        assert_eq!(tokenize("a?.5:1").unwrap()[1], Token::Punct("?"));
    }

    #[test]
    fn test_rejects_unknown_characters() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("'open").is_err());
    }
}
