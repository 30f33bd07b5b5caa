use std::fmt;

/// A lexical token of the query grammar.
///
/// Keywords are not distinguished here: the grammar's word set is large
/// and context-dependent (an attribute may legally be called `value`), so
/// every word is an [`Token::Identifier`] and the parser matches keyword
/// spellings case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A word: keyword, alias, entity name or attribute name.
    Identifier(String),
    /// Integer literal, source spelling preserved.
    Integer(String),
    /// Decimal literal, source spelling preserved.
    Decimal(String),
    /// String literal content (quotes stripped, `''` unescaped).
    String(String),
    /// `:name`
    NamedParameter(String),
    /// `?n`
    PositionalParameter(String),
    /// A recognized `/* ... */` evaluation hint.
    Hint(String),

    LParen,
    RParen,
    Comma,
    Dot,
    Equals,
    /// `<>`
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Plus,
    Minus,
    Star,
    Slash,

    Eof,
}

/// A lexing failure with the byte position it occurred at.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for LexError {}

/// Hint names the lexer turns into [`Token::Hint`]; any other comment is
/// skipped as plain text.
const HINTS: [&str; 2] = ["skip_access_check", "skip_optimize"];

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            position: self.position,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self) -> Result<String, LexError> {
        let mut result = String::new();
        self.advance(); // consume opening quote

        while let Some(ch) = self.current_char() {
            if ch == '\'' {
                // SQL escape: '' inside a string is a literal quote
                if self.peek_char(1) == Some('\'') {
                    result.push('\'');
                    self.advance();
                    self.advance();
                } else {
                    self.advance();
                    return Ok(result);
                }
            } else {
                result.push(ch);
                self.advance();
            }
        }

        Err(self.error("unterminated string literal"))
    }

    fn read_number(&mut self) -> Token {
        let mut number = String::new();
        let mut is_decimal = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_decimal
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_decimal = true;
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_decimal {
            Token::Decimal(number)
        } else {
            Token::Integer(number)
        }
    }

    /// Consume a `/* ... */` comment; a recognized hint name becomes a
    /// token, anything else is skipped.
    fn read_comment(&mut self) -> Result<Option<Token>, LexError> {
        self.advance(); // consume '/'
        self.advance(); // consume '*'
        let mut content = String::new();
        while let Some(ch) = self.current_char() {
            if ch == '*' && self.peek_char(1) == Some('/') {
                self.advance();
                self.advance();
                let trimmed = content.trim();
                if HINTS.contains(&trimmed) {
                    return Ok(Some(Token::Hint(trimmed.to_string())));
                }
                return Ok(None);
            }
            content.push(ch);
            self.advance();
        }
        Err(self.error("unterminated comment"))
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            self.skip_whitespace();

            return match self.current_char() {
                None => Ok(Token::Eof),
                Some('(') => {
                    self.advance();
                    Ok(Token::LParen)
                }
                Some(')') => {
                    self.advance();
                    Ok(Token::RParen)
                }
                Some(',') => {
                    self.advance();
                    Ok(Token::Comma)
                }
                Some('.') => {
                    self.advance();
                    Ok(Token::Dot)
                }
                Some('=') => {
                    self.advance();
                    Ok(Token::Equals)
                }
                Some('<') => {
                    if self.peek_char(1) == Some('>') {
                        self.advance();
                        self.advance();
                        Ok(Token::NotEquals)
                    } else if self.peek_char(1) == Some('=') {
                        self.advance();
                        self.advance();
                        Ok(Token::LessEquals)
                    } else {
                        self.advance();
                        Ok(Token::Less)
                    }
                }
                Some('>') => {
                    if self.peek_char(1) == Some('=') {
                        self.advance();
                        self.advance();
                        Ok(Token::GreaterEquals)
                    } else {
                        self.advance();
                        Ok(Token::Greater)
                    }
                }
                Some('+') => {
                    self.advance();
                    Ok(Token::Plus)
                }
                Some('-') => {
                    self.advance();
                    Ok(Token::Minus)
                }
                Some('*') => {
                    self.advance();
                    Ok(Token::Star)
                }
                Some('/') => {
                    if self.peek_char(1) == Some('*') {
                        match self.read_comment()? {
                            Some(hint) => Ok(hint),
                            None => continue,
                        }
                    } else {
                        self.advance();
                        Ok(Token::Slash)
                    }
                }
                Some(':') => {
                    self.advance();
                    let name = self.read_identifier();
                    if name.is_empty() {
                        Err(self.error("expected a parameter name after ':'"))
                    } else {
                        Ok(Token::NamedParameter(name))
                    }
                }
                Some('?') => {
                    self.advance();
                    let mut digits = String::new();
                    while let Some(ch) = self.current_char() {
                        if ch.is_ascii_digit() {
                            digits.push(ch);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    if digits.is_empty() {
                        Err(self.error("expected a position after '?'"))
                    } else {
                        Ok(Token::PositionalParameter(digits))
                    }
                }
                Some('\'') => self.read_string().map(Token::String),
                Some(ch) if ch.is_alphabetic() || ch == '_' => {
                    Ok(Token::Identifier(self.read_identifier()))
                }
                Some(ch) if ch.is_ascii_digit() => Ok(self.read_number()),
                Some(ch) => Err(self.error(format!("unexpected character '{}'", ch))),
            };
        }
    }
}

#[test]
fn test_select_tokens() {
    let mut lexer = Lexer::new("SELECT e FROM Entity e WHERE e.id = 1");
    assert_eq!(
        lexer.next_token(),
        Ok(Token::Identifier("SELECT".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("e".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("FROM".to_string())));
    assert_eq!(
        lexer.next_token(),
        Ok(Token::Identifier("Entity".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("e".to_string())));
    assert_eq!(
        lexer.next_token(),
        Ok(Token::Identifier("WHERE".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("e".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Dot));
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("id".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Equals));
    assert_eq!(lexer.next_token(), Ok(Token::Integer("1".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Eof));
}

#[test]
fn test_parameters_and_operators() {
    let mut lexer = Lexer::new(":name <> ?2 <= >=");
    assert_eq!(
        lexer.next_token(),
        Ok(Token::NamedParameter("name".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::NotEquals));
    assert_eq!(
        lexer.next_token(),
        Ok(Token::PositionalParameter("2".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::LessEquals));
    assert_eq!(lexer.next_token(), Ok(Token::GreaterEquals));
}

#[test]
fn test_string_escapes() {
    let mut lexer = Lexer::new("'it''s'");
    assert_eq!(lexer.next_token(), Ok(Token::String("it's".to_string())));
}

#[test]
fn test_hint_comment() {
    let mut lexer = Lexer::new("/* skip_optimize */ e.name /* just a note */ = 'x'");
    assert_eq!(
        lexer.next_token(),
        Ok(Token::Hint("skip_optimize".to_string()))
    );
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("e".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Dot));
    assert_eq!(lexer.next_token(), Ok(Token::Identifier("name".to_string())));
    assert_eq!(lexer.next_token(), Ok(Token::Equals));
    assert_eq!(lexer.next_token(), Ok(Token::String("x".to_string())));
}
