//! Line tokenizer for the script text format

/// A whitespace separated word on a statement line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Quoted tokens are always literals, even when they start with `$`
    pub quoted: bool,
}

impl Token {
    pub fn bare(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
        }
    }

    pub fn quoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: true,
        }
    }
}

/// The line ended inside a quoted token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnterminatedQuote;

/// Split a statement line into tokens
pub fn tokenize(line: &str) -> Result<Vec<Token>, UnterminatedQuote> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&first) = chars.peek() else {
            break;
        };

        if first == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.peek() {
                        Some('"') | Some('\\') => {
                            text.extend(chars.next());
                        }
                        _ => text.push('\\'),
                    },
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(UnterminatedQuote);
            }
            tokens.push(Token::quoted(text));
        } else {
            let mut text = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                text.push(c);
            }
            tokens.push(Token::bare(text));
        }
    }

    Ok(tokens)
}

/// Render literal text so that [`tokenize`] reads it back as one literal token
pub fn quote_if_needed(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text == "->"
        || text.starts_with(['"', '$', '#', ';'])
        || text.chars().any(char::is_whitespace);

    if !needs_quotes {
        return text.to_string();
    }

    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_whitespace() {
        let tokens = tokenize("  Repeat 3\t1   0 ").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::bare("Repeat"),
                Token::bare("3"),
                Token::bare("1"),
                Token::bare("0")
            ]
        );
    }

    #[test]
    fn test_quoted_with_escapes() {
        let tokens = tokenize(r#"Log "hello \"big\" world" $name"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::bare("Log"),
                Token::quoted(r#"hello "big" world"#),
                Token::bare("$name"),
            ]
        );
    }

    #[test]
    fn test_empty_quoted_token() {
        let tokens = tokenize(r#"Set """#).unwrap();
        assert_eq!(tokens[1], Token::quoted(""));
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(tokenize(r#"Log "oops"#), Err(UnterminatedQuote));
    }

    #[test]
    fn test_quote_if_needed_reads_back() {
        for text in ["plain", "two words", "", "$notvar", r#"say "hi""#, r"back\slash", "->"] {
            let source = quote_if_needed(text);
            let tokens = tokenize(&source).unwrap();
            assert_eq!(tokens.len(), 1, "{source}");
            assert_eq!(tokens[0].text, text);
        }
    }
}
