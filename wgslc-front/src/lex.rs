//! The WGSL lexer.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

/// A byte range in the source text.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    /// The smallest span covering both operands.
    pub fn union(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Line number (1-based), column (1-based) and the line's text.
    pub fn locate<'a>(&self, source: &'a str) -> (usize, usize, &'a str) {
        let start = self.start as usize;
        let preceding = &source[..start.min(source.len())];
        let line_number = preceding.matches('\n').count() + 1;
        let line_start = preceding.rfind('\n').map_or(0, |p| p + 1);
        let line_end = source[line_start..]
            .find('\n')
            .map_or(source.len(), |p| line_start + p);
        (line_number, start - line_start + 1, &source[line_start..line_end])
    }
}

/// Reserved words recognized by the lexer.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Keyword {
    Alias,
    Break,
    Case,
    Const,
    Continue,
    Continuing,
    Default,
    Discard,
    Else,
    False,
    Fn,
    For,
    If,
    Let,
    Loop,
    Return,
    Struct,
    Switch,
    True,
    Var,
    While,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "alias" => Self::Alias,
            "break" => Self::Break,
            "case" => Self::Case,
            "const" => Self::Const,
            "continue" => Self::Continue,
            "continuing" => Self::Continuing,
            "default" => Self::Default,
            "discard" => Self::Discard,
            "else" => Self::Else,
            "false" => Self::False,
            "fn" => Self::Fn,
            "for" => Self::For,
            "if" => Self::If,
            "let" => Self::Let,
            "loop" => Self::Loop,
            "return" => Self::Return,
            "struct" => Self::Struct,
            "switch" => Self::Switch,
            "true" => Self::True,
            "var" => Self::Var,
            "while" => Self::While,
            _ => return None,
        })
    }

    pub fn word(self) -> &'static str {
        match self {
            Self::Alias => "alias",
            Self::Break => "break",
            Self::Case => "case",
            Self::Const => "const",
            Self::Continue => "continue",
            Self::Continuing => "continuing",
            Self::Default => "default",
            Self::Discard => "discard",
            Self::Else => "else",
            Self::False => "false",
            Self::Fn => "fn",
            Self::For => "for",
            Self::If => "if",
            Self::Let => "let",
            Self::Loop => "loop",
            Self::Return => "return",
            Self::Struct => "struct",
            Self::Switch => "switch",
            Self::True => "true",
            Self::Var => "var",
            Self::While => "while",
        }
    }
}

/// Punctuation and operators.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Symbol {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    Arrow,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    At,
    Comma,
    Semi,
    Colon,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
}

impl Symbol {
    pub fn text(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Eq => "=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::Bang => "!",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Arrow => "->",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PercentEq => "%=",
            Self::AmpEq => "&=",
            Self::PipeEq => "|=",
            Self::CaretEq => "^=",
            Self::ShlEq => "<<=",
            Self::ShrEq => ">>=",
            Self::At => "@",
            Self::Comma => ",",
            Self::Semi => ";",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
        }
    }
}

/// An integer literal's suffix.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum IntSuffix {
    None,
    /// `u`
    U,
    /// `i`
    I,
}

/// A float literal's suffix.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum FloatSuffix {
    None,
    /// `f`
    F,
    /// `h`
    H,
}

#[derive(PartialEq, Clone, Debug)]
pub enum Token {
    Keyword(Keyword),
    Ident(String),
    Int(i64, IntSuffix),
    Float(f64, FloatSuffix),
    Symbol(Symbol),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Token::Keyword(kw) => f.write_str(kw.word()),
            Token::Ident(ref name) => f.write_str(name),
            Token::Int(value, suffix) => {
                write!(f, "{}", value)?;
                match suffix {
                    IntSuffix::None => Ok(()),
                    IntSuffix::U => f.write_str("u"),
                    IntSuffix::I => f.write_str("i"),
                }
            }
            Token::Float(value, suffix) => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{:.1}", value)?;
                } else {
                    write!(f, "{}", value)?;
                }
                match suffix {
                    FloatSuffix::None => Ok(()),
                    FloatSuffix::F => f.write_str("f"),
                    FloatSuffix::H => f.write_str("h"),
                }
            }
            Token::Symbol(symbol) => f.write_str(symbol.text()),
            Token::Eof => Ok(()),
        }
    }
}

/// A token with its source span.
pub type TokenSpan = (Token, Span);

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LexError {
    #[error("unexpected character `{0}`")]
    UnexpectedCharacter(char),
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("invalid numeric literal")]
    BadNumber,
    #[error("integer literal does not fit its type")]
    IntegerOutOfRange,
}

pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    fn offset(&mut self) -> u32 {
        match self.chars.peek() {
            Some(&(i, _)) => i as u32,
            None => self.source.len() as u32,
        }
    }

    /// Skip whitespace and comments. Block comments nest.
    fn skip_trivia(&mut self) -> Result<(), (LexError, Span)> {
        loop {
            match self.chars.peek() {
                Some(&(_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some(&(start, '/')) => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some(&(_, '/')) => {
                            while let Some(&(_, c)) = self.chars.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.chars.next();
                            }
                        }
                        Some(&(_, '*')) => {
                            self.chars.next(); // '/'
                            self.chars.next(); // '*'
                            let mut depth = 1usize;
                            loop {
                                match self.chars.next() {
                                    Some((_, '*')) => {
                                        if let Some(&(_, '/')) = self.chars.peek() {
                                            self.chars.next();
                                            depth -= 1;
                                            if depth == 0 {
                                                break;
                                            }
                                        }
                                    }
                                    Some((_, '/')) => {
                                        if let Some(&(_, '*')) = self.chars.peek() {
                                            self.chars.next();
                                            depth += 1;
                                        }
                                    }
                                    Some(_) => {}
                                    None => {
                                        return Err((
                                            LexError::UnterminatedComment,
                                            Span::new(start as u32, self.source.len() as u32),
                                        ))
                                    }
                                }
                            }
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn lex_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match Keyword::from_word(&word) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(word),
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let mut buf = String::new();

        // Hexadecimal.
        if let Some(&(_, '0')) = self.chars.peek() {
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.peek(), Some(&(_, 'x')) | Some(&(_, 'X'))) {
                self.chars.next();
                self.chars.next();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_ascii_hexdigit() {
                        buf.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                if buf.is_empty() {
                    return Err(LexError::BadNumber);
                }
                let value = i64::from_str_radix(&buf, 16).map_err(|_| LexError::BadNumber)?;
                return Ok(Token::Int(value, self.int_suffix()));
            }
        }

        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if let Some(&(_, '.')) = self.chars.peek() {
            // Member access on a literal never happens, so `.` always starts
            // a fraction here.
            is_float = true;
            buf.push('.');
            self.chars.next();
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_ascii_digit() {
                    buf.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
        }
        if matches!(self.chars.peek(), Some(&(_, 'e')) | Some(&(_, 'E'))) {
            is_float = true;
            buf.push('e');
            self.chars.next();
            if let Some(&(_, sign @ ('+' | '-'))) = self.chars.peek() {
                buf.push(sign);
                self.chars.next();
            }
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_ascii_digit() {
                    buf.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
        }

        if is_float {
            let value: f64 = buf.parse().map_err(|_| LexError::BadNumber)?;
            return Ok(Token::Float(value, self.float_suffix()));
        }

        // An integer with an `f`/`h` suffix is a float literal.
        match self.chars.peek() {
            Some(&(_, 'f')) => {
                self.chars.next();
                let value: f64 = buf.parse().map_err(|_| LexError::BadNumber)?;
                Ok(Token::Float(value, FloatSuffix::F))
            }
            Some(&(_, 'h')) => {
                self.chars.next();
                let value: f64 = buf.parse().map_err(|_| LexError::BadNumber)?;
                Ok(Token::Float(value, FloatSuffix::H))
            }
            _ => {
                let value: i64 = buf.parse().map_err(|_| LexError::BadNumber)?;
                Ok(Token::Int(value, self.int_suffix()))
            }
        }
    }

    fn int_suffix(&mut self) -> IntSuffix {
        match self.chars.peek() {
            Some(&(_, 'u')) => {
                self.chars.next();
                IntSuffix::U
            }
            Some(&(_, 'i')) => {
                self.chars.next();
                IntSuffix::I
            }
            _ => IntSuffix::None,
        }
    }

    fn float_suffix(&mut self) -> FloatSuffix {
        match self.chars.peek() {
            Some(&(_, 'f')) => {
                self.chars.next();
                FloatSuffix::F
            }
            Some(&(_, 'h')) => {
                self.chars.next();
                FloatSuffix::H
            }
            _ => FloatSuffix::None,
        }
    }

    fn lex_symbol(&mut self, first: char) -> Result<Symbol, LexError> {
        use Symbol as S;
        // `first` has already been consumed.
        let second = self.chars.peek().map(|&(_, c)| c);
        let eat = |lexer: &mut Self, symbol| {
            lexer.chars.next();
            symbol
        };
        Ok(match (first, second) {
            ('+', Some('+')) => eat(self, S::PlusPlus),
            ('+', Some('=')) => eat(self, S::PlusEq),
            ('+', _) => S::Plus,
            ('-', Some('-')) => eat(self, S::MinusMinus),
            ('-', Some('=')) => eat(self, S::MinusEq),
            ('-', Some('>')) => eat(self, S::Arrow),
            ('-', _) => S::Minus,
            ('*', Some('=')) => eat(self, S::StarEq),
            ('*', _) => S::Star,
            ('/', Some('=')) => eat(self, S::SlashEq),
            ('/', _) => S::Slash,
            ('%', Some('=')) => eat(self, S::PercentEq),
            ('%', _) => S::Percent,
            ('=', Some('=')) => eat(self, S::EqEq),
            ('=', _) => S::Eq,
            ('!', Some('=')) => eat(self, S::NotEq),
            ('!', _) => S::Bang,
            ('<', Some('<')) => {
                self.chars.next();
                match self.chars.peek() {
                    Some(&(_, '=')) => eat(self, S::ShlEq),
                    _ => S::Shl,
                }
            }
            ('<', Some('=')) => eat(self, S::Le),
            ('<', _) => S::Lt,
            ('>', Some('>')) => {
                self.chars.next();
                match self.chars.peek() {
                    Some(&(_, '=')) => eat(self, S::ShrEq),
                    _ => S::Shr,
                }
            }
            ('>', Some('=')) => eat(self, S::Ge),
            ('>', _) => S::Gt,
            ('&', Some('&')) => eat(self, S::AndAnd),
            ('&', Some('=')) => eat(self, S::AmpEq),
            ('&', _) => S::Amp,
            ('|', Some('|')) => eat(self, S::OrOr),
            ('|', Some('=')) => eat(self, S::PipeEq),
            ('|', _) => S::Pipe,
            ('^', Some('=')) => eat(self, S::CaretEq),
            ('^', _) => S::Caret,
            ('~', _) => S::Tilde,
            ('@', _) => S::At,
            (',', _) => S::Comma,
            (';', _) => S::Semi,
            (':', _) => S::Colon,
            ('.', _) => S::Dot,
            ('(', _) => S::LParen,
            (')', _) => S::RParen,
            ('{', _) => S::LBrace,
            ('}', _) => S::RBrace,
            ('[', _) => S::LBracket,
            (']', _) => S::RBracket,
            (other, _) => return Err(LexError::UnexpectedCharacter(other)),
        })
    }

    /// The next token, or `Eof` once the input is exhausted.
    pub fn next_token(&mut self) -> Result<TokenSpan, (LexError, Span)> {
        self.skip_trivia()?;
        let start = self.offset();
        let token = match self.chars.peek() {
            None => Token::Eof,
            Some(&(_, c)) if c.is_ascii_alphabetic() || c == '_' => self.lex_word(),
            Some(&(_, c)) if c.is_ascii_digit() => self
                .lex_number()
                .map_err(|e| (e, Span::new(start, self.offset())))?,
            Some(&(_, c)) => {
                self.chars.next();
                let symbol = self
                    .lex_symbol(c)
                    .map_err(|e| (e, Span::new(start, self.offset())))?;
                Token::Symbol(symbol)
            }
        };
        let end = self.offset();
        Ok((token, Span::new(start, end)))
    }
}

/// Lex the whole source into a token sequence terminated by `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<TokenSpan>, (LexError, Span)> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let (token, span) = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push((token, span));
        if done {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn empty_input_is_just_eof() {
        assert_eq!(kinds(""), vec![Token::Eof]);
    }

    #[test]
    fn integers_and_suffixes() {
        assert_eq!(
            kinds("1 2u 3i 0x10"),
            vec![
                Token::Int(1, IntSuffix::None),
                Token::Int(2, IntSuffix::U),
                Token::Int(3, IntSuffix::I),
                Token::Int(16, IntSuffix::None),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn floats() {
        assert_eq!(
            kinds("1.0 2.5f 3f 1e3 1.5e-2"),
            vec![
                Token::Float(1.0, FloatSuffix::None),
                Token::Float(2.5, FloatSuffix::F),
                Token::Float(3.0, FloatSuffix::F),
                Token::Float(1000.0, FloatSuffix::None),
                Token::Float(0.015, FloatSuffix::None),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("-> << >>= <= && ++"),
            vec![
                Token::Symbol(Symbol::Arrow),
                Token::Symbol(Symbol::Shl),
                Token::Symbol(Symbol::ShrEq),
                Token::Symbol(Symbol::Le),
                Token::Symbol(Symbol::AndAnd),
                Token::Symbol(Symbol::PlusPlus),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let source = "a // line\n /* block /* nested */ still */ b";
        assert_eq!(
            kinds(source),
            vec![
                Token::Ident("a".to_string()),
                Token::Ident("b".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        let err = tokenize("/* nope").unwrap_err();
        assert_eq!(err.0, LexError::UnterminatedComment);
    }

    #[test]
    fn keywords_are_classified() {
        assert_eq!(
            kinds("fn foo"),
            vec![
                Token::Keyword(Keyword::Fn),
                Token::Ident("foo".to_string()),
                Token::Eof,
            ]
        );
    }

    // Printing the tokens back and re-lexing them must produce the same
    // stream, modulo whitespace.
    #[test]
    fn token_stream_round_trips() {
        let source = "@vertex fn main(a: vec4<f32>) -> f32 { return a.x * 2.0; }";
        let tokens = kinds(source);
        let printed = tokens
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(kinds(&printed), tokens);
    }
}
