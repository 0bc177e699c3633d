//! Recursive-descent parser for WGSL.
//!
//! The parser owns the full token sequence and walks it with a one-token
//! cursor. It stops at the first error, reporting the offending span and
//! what was expected there.

use thiserror::Error;

use crate::ast;
use crate::lex::{self, FloatSuffix, IntSuffix, Keyword, Span, Symbol, Token, TokenSpan};
use wgslc_core::{
    AddressSpace, BinaryOperator, BuiltIn, ImageDimension, Interpolation, Sampling, Scalar,
    ShaderStage, StorageAccess, StorageFormat, UnaryOperator, VectorSize,
};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("{error}")]
    Lex {
        #[source]
        error: lex::LexError,
        span: Span,
    },
    #[error("expected {expected}, found `{found}`")]
    Unexpected {
        expected: &'static str,
        found: String,
        span: Span,
    },
    #[error("unknown attribute `{name}`")]
    UnknownAttribute { name: String, span: Span },
    #[error("unknown address space `{name}`")]
    UnknownAddressSpace { name: String, span: Span },
    #[error("unknown access mode `{name}`")]
    UnknownAccessMode { name: String, span: Span },
    #[error("unknown storage texel format `{name}`")]
    UnknownStorageFormat { name: String, span: Span },
    #[error("unknown builtin `{name}`")]
    UnknownBuiltin { name: String, span: Span },
    #[error("unknown interpolation `{name}`")]
    UnknownInterpolation { name: String, span: Span },
    #[error("`break if` is only allowed at the end of a continuing block")]
    MisplacedBreakIf { span: Span },
}

impl ParseError {
    /// The source span the error points at.
    pub fn span(&self) -> Span {
        match *self {
            ParseError::Lex { span, .. }
            | ParseError::Unexpected { span, .. }
            | ParseError::UnknownAttribute { span, .. }
            | ParseError::UnknownAddressSpace { span, .. }
            | ParseError::UnknownAccessMode { span, .. }
            | ParseError::UnknownStorageFormat { span, .. }
            | ParseError::UnknownBuiltin { span, .. }
            | ParseError::UnknownInterpolation { span, .. }
            | ParseError::MisplacedBreakIf { span } => span,
        }
    }
}

type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Cursor over the lexed tokens.
struct TokenStream {
    tokens: Vec<TokenSpan>,
    index: usize,
}

impl TokenStream {
    fn peek(&self) -> &Token {
        &self.tokens[self.index].0
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.index].1
    }

    /// The token after the current one; `Eof` padding keeps this in bounds.
    fn peek2(&self) -> &Token {
        static EOF: Token = Token::Eof;
        match self.tokens.get(self.index + 1) {
            Some(&(ref token, _)) => token,
            None => &EOF,
        }
    }

    fn next(&mut self) -> TokenSpan {
        let ts = self.tokens[self.index].clone();
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        ts
    }

    fn unexpected<T>(&self, expected: &'static str) -> Result<T> {
        Err(ParseError::Unexpected {
            expected,
            found: match *self.peek() {
                Token::Eof => "end of input".to_string(),
                ref token => token.to_string(),
            },
            span: self.peek_span(),
        })
    }

    fn skip_symbol(&mut self, symbol: Symbol) -> bool {
        if *self.peek() == Token::Symbol(symbol) {
            self.next();
            true
        } else {
            false
        }
    }

    fn skip_keyword(&mut self, keyword: Keyword) -> bool {
        if *self.peek() == Token::Keyword(keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> Result<Span> {
        if *self.peek() == Token::Symbol(symbol) {
            Ok(self.next().1)
        } else {
            self.unexpected(symbol.text())
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Span> {
        if *self.peek() == Token::Keyword(keyword) {
            Ok(self.next().1)
        } else {
            self.unexpected(keyword.word())
        }
    }

    fn expect_ident(&mut self) -> Result<ast::Ident> {
        match *self.peek() {
            Token::Ident(_) => {
                let (token, span) = self.next();
                match token {
                    Token::Ident(name) => Ok(ast::Ident { name, span }),
                    _ => unreachable!(),
                }
            }
            _ => self.unexpected("an identifier"),
        }
    }

    /// Consume a closing `>` of a template list. `>>` and `>=` are split
    /// in place, since the lexer cannot know it sits inside a template.
    fn expect_generic_close(&mut self) -> Result<()> {
        let span = self.peek_span();
        match *self.peek() {
            Token::Symbol(Symbol::Gt) => {
                self.next();
                Ok(())
            }
            Token::Symbol(Symbol::Shr) => {
                self.tokens[self.index] =
                    (Token::Symbol(Symbol::Gt), Span::new(span.start + 1, span.end));
                Ok(())
            }
            Token::Symbol(Symbol::Ge) => {
                self.tokens[self.index] =
                    (Token::Symbol(Symbol::Eq), Span::new(span.start + 1, span.end));
                Ok(())
            }
            _ => self.unexpected(">"),
        }
    }
}

/// Attributes collected before a declaration, parameter or member.
#[derive(Default)]
struct Attributes {
    stage: Option<ShaderStage>,
    workgroup_size: Vec<ast::Expr>,
    group: Option<u32>,
    binding: Option<u32>,
    io: ast::IoAttributes,
    size: Option<u32>,
    align: Option<u32>,
}

pub struct Parser {
    stream: TokenStream,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self> {
        let tokens = lex::tokenize(source)
            .map_err(|(error, span)| ParseError::Lex { error, span })?;
        Ok(Parser {
            stream: TokenStream { tokens, index: 0 },
        })
    }

    /// Parse a whole translation unit.
    pub fn parse(&mut self) -> Result<ast::TranslationUnit> {
        let mut tu = ast::TranslationUnit::default();
        loop {
            if *self.stream.peek() == Token::Eof {
                break;
            }
            let decl = self.parse_global_decl()?;
            tu.decls.push(decl);
        }
        Ok(tu)
    }

    fn parse_global_decl(&mut self) -> Result<ast::GlobalDecl> {
        let attrs = self.parse_attributes()?;
        match *self.stream.peek() {
            Token::Keyword(Keyword::Struct) => self.parse_struct_decl().map(ast::GlobalDecl::Struct),
            Token::Keyword(Keyword::Alias) => self.parse_alias_decl().map(ast::GlobalDecl::Alias),
            Token::Keyword(Keyword::Const) => {
                let decl = self.parse_const_decl()?;
                self.stream.expect_symbol(Symbol::Semi)?;
                Ok(ast::GlobalDecl::Const(decl))
            }
            Token::Keyword(Keyword::Var) => self.parse_global_var_decl(attrs).map(ast::GlobalDecl::Var),
            Token::Keyword(Keyword::Fn) => self.parse_fn_decl(attrs).map(ast::GlobalDecl::Fn),
            _ => self.stream.unexpected("a declaration"),
        }
    }

    fn parse_attributes(&mut self) -> Result<Attributes> {
        let mut attrs = Attributes::default();
        while self.stream.skip_symbol(Symbol::At) {
            let ident = self.stream.expect_ident()?;
            match ident.name.as_str() {
                "vertex" => attrs.stage = Some(ShaderStage::Vertex),
                "fragment" => attrs.stage = Some(ShaderStage::Fragment),
                "compute" => attrs.stage = Some(ShaderStage::Compute),
                "workgroup_size" => {
                    self.stream.expect_symbol(Symbol::LParen)?;
                    loop {
                        attrs.workgroup_size.push(self.parse_expr()?);
                        if !self.stream.skip_symbol(Symbol::Comma) {
                            break;
                        }
                        // Tolerate a trailing comma.
                        if *self.stream.peek() == Token::Symbol(Symbol::RParen) {
                            break;
                        }
                    }
                    self.stream.expect_symbol(Symbol::RParen)?;
                }
                "group" => attrs.group = Some(self.parse_paren_u32()?),
                "binding" => attrs.binding = Some(self.parse_paren_u32()?),
                "location" => attrs.io.location = Some(self.parse_paren_u32()?),
                "builtin" => {
                    self.stream.expect_symbol(Symbol::LParen)?;
                    let name = self.stream.expect_ident()?;
                    attrs.io.builtin = Some(BuiltIn::from_str(&name.name).ok_or(
                        ParseError::UnknownBuiltin {
                            name: name.name.clone(),
                            span: name.span,
                        },
                    )?);
                    self.stream.expect_symbol(Symbol::RParen)?;
                }
                "interpolate" => {
                    self.stream.expect_symbol(Symbol::LParen)?;
                    let kind = self.stream.expect_ident()?;
                    attrs.io.interpolation = Some(match kind.name.as_str() {
                        "perspective" => Interpolation::Perspective,
                        "linear" => Interpolation::Linear,
                        "flat" => Interpolation::Flat,
                        _ => {
                            return Err(ParseError::UnknownInterpolation {
                                name: kind.name,
                                span: kind.span,
                            })
                        }
                    });
                    if self.stream.skip_symbol(Symbol::Comma) {
                        let sampling = self.stream.expect_ident()?;
                        attrs.io.sampling = Some(match sampling.name.as_str() {
                            "center" => Sampling::Center,
                            "centroid" => Sampling::Centroid,
                            "sample" => Sampling::Sample,
                            _ => {
                                return Err(ParseError::UnknownInterpolation {
                                    name: sampling.name,
                                    span: sampling.span,
                                })
                            }
                        });
                    }
                    self.stream.expect_symbol(Symbol::RParen)?;
                }
                "size" => attrs.size = Some(self.parse_paren_u32()?),
                "align" => attrs.align = Some(self.parse_paren_u32()?),
                "invariant" | "must_use" | "diagnostic" => {
                    // Accepted and ignored; they don't affect code generation
                    // here. `diagnostic` carries arguments.
                    if self.stream.skip_symbol(Symbol::LParen) {
                        let mut depth = 1;
                        while depth > 0 {
                            match self.stream.next().0 {
                                Token::Symbol(Symbol::LParen) => depth += 1,
                                Token::Symbol(Symbol::RParen) => depth -= 1,
                                Token::Eof => return self.stream.unexpected(")"),
                                _ => {}
                            }
                        }
                    }
                }
                _ => {
                    return Err(ParseError::UnknownAttribute {
                        name: ident.name,
                        span: ident.span,
                    })
                }
            }
        }
        Ok(attrs)
    }

    fn parse_paren_u32(&mut self) -> Result<u32> {
        self.stream.expect_symbol(Symbol::LParen)?;
        let value = match *self.stream.peek() {
            Token::Int(value, _) if value >= 0 => {
                self.stream.next();
                value as u32
            }
            _ => return self.stream.unexpected("a non-negative integer"),
        };
        self.stream.expect_symbol(Symbol::RParen)?;
        Ok(value)
    }

    fn parse_struct_decl(&mut self) -> Result<ast::StructDecl> {
        self.stream.expect_keyword(Keyword::Struct)?;
        let name = self.stream.expect_ident()?;
        self.stream.expect_symbol(Symbol::LBrace)?;
        let mut members = Vec::new();
        while !self.stream.skip_symbol(Symbol::RBrace) {
            let attrs = self.parse_attributes()?;
            let member_name = self.stream.expect_ident()?;
            self.stream.expect_symbol(Symbol::Colon)?;
            let ty = self.parse_type()?;
            members.push(ast::StructMember {
                name: member_name,
                ty,
                io: attrs.io,
                size: attrs.size,
                align: attrs.align,
            });
            if !self.stream.skip_symbol(Symbol::Comma) {
                self.stream.expect_symbol(Symbol::RBrace)?;
                break;
            }
        }
        Ok(ast::StructDecl { name, members })
    }

    fn parse_alias_decl(&mut self) -> Result<ast::AliasDecl> {
        self.stream.expect_keyword(Keyword::Alias)?;
        let name = self.stream.expect_ident()?;
        self.stream.expect_symbol(Symbol::Eq)?;
        let ty = self.parse_type()?;
        self.stream.expect_symbol(Symbol::Semi)?;
        Ok(ast::AliasDecl { name, ty })
    }

    fn parse_const_decl(&mut self) -> Result<ast::ConstDecl> {
        self.stream.expect_keyword(Keyword::Const)?;
        let name = self.stream.expect_ident()?;
        let ty = if self.stream.skip_symbol(Symbol::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.stream.expect_symbol(Symbol::Eq)?;
        let init = self.parse_expr()?;
        Ok(ast::ConstDecl { name, ty, init })
    }

    fn parse_global_var_decl(&mut self, attrs: Attributes) -> Result<ast::GlobalVarDecl> {
        self.stream.expect_keyword(Keyword::Var)?;
        let space = if self.stream.skip_symbol(Symbol::Lt) {
            let space = self.parse_address_space()?;
            self.stream.expect_generic_close()?;
            Some(space)
        } else {
            None
        };
        let name = self.stream.expect_ident()?;
        self.stream.expect_symbol(Symbol::Colon)?;
        let ty = self.parse_type()?;
        let init = if self.stream.skip_symbol(Symbol::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.stream.expect_symbol(Symbol::Semi)?;
        Ok(ast::GlobalVarDecl {
            name,
            space,
            ty,
            init,
            group: attrs.group,
            binding: attrs.binding,
        })
    }

    fn parse_address_space(&mut self) -> Result<AddressSpace> {
        let ident = self.stream.expect_ident()?;
        Ok(match ident.name.as_str() {
            "function" => AddressSpace::Function,
            "private" => AddressSpace::Private,
            "workgroup" => AddressSpace::WorkGroup,
            "uniform" => AddressSpace::Uniform,
            "push_constant" => AddressSpace::PushConstant,
            "storage" => {
                let access = if self.stream.skip_symbol(Symbol::Comma) {
                    self.parse_access_mode()?
                } else {
                    StorageAccess::LOAD
                };
                AddressSpace::Storage { access }
            }
            _ => {
                return Err(ParseError::UnknownAddressSpace {
                    name: ident.name,
                    span: ident.span,
                })
            }
        })
    }

    fn parse_access_mode(&mut self) -> Result<StorageAccess> {
        let ident = self.stream.expect_ident()?;
        Ok(match ident.name.as_str() {
            "read" => StorageAccess::LOAD,
            "write" => StorageAccess::STORE,
            "read_write" => StorageAccess::LOAD | StorageAccess::STORE,
            _ => {
                return Err(ParseError::UnknownAccessMode {
                    name: ident.name,
                    span: ident.span,
                })
            }
        })
    }

    fn parse_fn_decl(&mut self, attrs: Attributes) -> Result<ast::FunctionDecl> {
        self.stream.expect_keyword(Keyword::Fn)?;
        let name = self.stream.expect_ident()?;
        self.stream.expect_symbol(Symbol::LParen)?;
        let mut params = Vec::new();
        while !self.stream.skip_symbol(Symbol::RParen) {
            let param_attrs = self.parse_attributes()?;
            let param_name = self.stream.expect_ident()?;
            self.stream.expect_symbol(Symbol::Colon)?;
            let ty = self.parse_type()?;
            params.push(ast::Param {
                name: param_name,
                ty,
                io: param_attrs.io,
            });
            if !self.stream.skip_symbol(Symbol::Comma) {
                self.stream.expect_symbol(Symbol::RParen)?;
                break;
            }
        }
        let result = if self.stream.skip_symbol(Symbol::Arrow) {
            let result_attrs = self.parse_attributes()?;
            let ty = self.parse_type()?;
            Some((ty, result_attrs.io))
        } else {
            None
        };
        let body = self.parse_block()?;
        let stage = attrs.stage.map(|stage| ast::StageAttribute {
            stage,
            workgroup_size: attrs.workgroup_size,
        });
        Ok(ast::FunctionDecl {
            name,
            params,
            result,
            body,
            stage,
        })
    }

    // ------------------------------------------------------------------
    // Types

    fn parse_type(&mut self) -> Result<ast::Type> {
        let ident = self.stream.expect_ident()?;
        let span = ident.span;
        let kind = match ident.name.as_str() {
            "f32" => ast::TypeKind::Scalar(Scalar::F32),
            "f16" => ast::TypeKind::Scalar(Scalar::F16),
            "i32" => ast::TypeKind::Scalar(Scalar::I32),
            "u32" => ast::TypeKind::Scalar(Scalar::U32),
            "bool" => ast::TypeKind::Scalar(Scalar::BOOL),
            "vec2" | "vec3" | "vec4" => {
                let size = vector_size_from_name(&ident.name);
                self.stream.expect_symbol(Symbol::Lt)?;
                let inner = self.parse_type()?;
                self.stream.expect_generic_close()?;
                ast::TypeKind::Vector {
                    size,
                    inner: Box::new(inner),
                }
            }
            name if name.starts_with("mat") && name.len() == 6 => {
                let columns = match &name[3..4] {
                    "2" => VectorSize::Bi,
                    "3" => VectorSize::Tri,
                    "4" => VectorSize::Quad,
                    _ => return Err(unknown_type(ident)),
                };
                let rows = match &name[5..6] {
                    "2" => VectorSize::Bi,
                    "3" => VectorSize::Tri,
                    "4" => VectorSize::Quad,
                    _ => return Err(unknown_type(ident)),
                };
                self.stream.expect_symbol(Symbol::Lt)?;
                let inner = self.parse_type()?;
                self.stream.expect_generic_close()?;
                ast::TypeKind::Matrix {
                    columns,
                    rows,
                    inner: Box::new(inner),
                }
            }
            "atomic" => {
                self.stream.expect_symbol(Symbol::Lt)?;
                let inner = self.parse_type()?;
                self.stream.expect_generic_close()?;
                ast::TypeKind::Atomic {
                    inner: Box::new(inner),
                }
            }
            "ptr" => {
                self.stream.expect_symbol(Symbol::Lt)?;
                let space = self.parse_address_space()?;
                self.stream.expect_symbol(Symbol::Comma)?;
                let inner = self.parse_type()?;
                // An optional trailing access mode is part of the space.
                let space = if self.stream.skip_symbol(Symbol::Comma) {
                    let access = self.parse_access_mode()?;
                    match space {
                        AddressSpace::Storage { .. } => AddressSpace::Storage { access },
                        other => other,
                    }
                } else {
                    space
                };
                self.stream.expect_generic_close()?;
                ast::TypeKind::Pointer {
                    space,
                    inner: Box::new(inner),
                }
            }
            "array" => {
                self.stream.expect_symbol(Symbol::Lt)?;
                let inner = self.parse_type()?;
                let size = if self.stream.skip_symbol(Symbol::Comma) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                self.stream.expect_generic_close()?;
                ast::TypeKind::Array {
                    inner: Box::new(inner),
                    size,
                }
            }
            "sampler" => ast::TypeKind::Sampler { comparison: false },
            "sampler_comparison" => ast::TypeKind::Sampler { comparison: true },
            name if name.starts_with("texture_") => {
                self.parse_texture_type(name, span)?
            }
            _ => ast::TypeKind::Named(ident.name),
        };
        Ok(ast::Type { kind, span })
    }

    fn parse_texture_type(&mut self, name: &str, span: Span) -> Result<ast::TypeKind> {
        let sampled = |this: &mut Self, dim, arrayed, multi| -> Result<ast::TypeKind> {
            this.stream.expect_symbol(Symbol::Lt)?;
            let inner = this.parse_type()?;
            this.stream.expect_generic_close()?;
            Ok(ast::TypeKind::Sampled {
                dim,
                arrayed,
                multi,
                inner: Box::new(inner),
            })
        };
        let storage = |this: &mut Self, dim, arrayed| -> Result<ast::TypeKind> {
            this.stream.expect_symbol(Symbol::Lt)?;
            let format = this.stream.expect_ident()?;
            let format = storage_format_from_name(&format.name).ok_or(
                ParseError::UnknownStorageFormat {
                    name: format.name.clone(),
                    span: format.span,
                },
            )?;
            this.stream.expect_symbol(Symbol::Comma)?;
            let access = this.parse_access_mode()?;
            this.stream.expect_generic_close()?;
            Ok(ast::TypeKind::StorageTexture {
                dim,
                arrayed,
                format,
                access,
            })
        };
        use ImageDimension as Dim;
        Ok(match name {
            "texture_1d" => sampled(self, Dim::D1, false, false)?,
            "texture_2d" => sampled(self, Dim::D2, false, false)?,
            "texture_2d_array" => sampled(self, Dim::D2, true, false)?,
            "texture_3d" => sampled(self, Dim::D3, false, false)?,
            "texture_cube" => sampled(self, Dim::Cube, false, false)?,
            "texture_cube_array" => sampled(self, Dim::Cube, true, false)?,
            "texture_multisampled_2d" => sampled(self, Dim::D2, false, true)?,
            "texture_depth_2d" => ast::TypeKind::Depth {
                dim: Dim::D2,
                arrayed: false,
                multi: false,
            },
            "texture_depth_2d_array" => ast::TypeKind::Depth {
                dim: Dim::D2,
                arrayed: true,
                multi: false,
            },
            "texture_depth_cube" => ast::TypeKind::Depth {
                dim: Dim::Cube,
                arrayed: false,
                multi: false,
            },
            "texture_depth_cube_array" => ast::TypeKind::Depth {
                dim: Dim::Cube,
                arrayed: true,
                multi: false,
            },
            "texture_depth_multisampled_2d" => ast::TypeKind::Depth {
                dim: Dim::D2,
                arrayed: false,
                multi: true,
            },
            "texture_storage_1d" => storage(self, Dim::D1, false)?,
            "texture_storage_2d" => storage(self, Dim::D2, false)?,
            "texture_storage_2d_array" => storage(self, Dim::D2, true)?,
            "texture_storage_3d" => storage(self, Dim::D3, false)?,
            _ => {
                return Err(ParseError::Unexpected {
                    expected: "a texture type",
                    found: name.to_string(),
                    span,
                })
            }
        })
    }

    // ------------------------------------------------------------------
    // Expressions

    pub(crate) fn parse_expr(&mut self) -> Result<ast::Expr> {
        self.parse_binary(0)
    }

    /// Precedence-climbing over the binary operator tiers.
    fn parse_binary(&mut self, min_tier: u8) -> Result<ast::Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let (op, tier) = match *self.stream.peek() {
                Token::Symbol(symbol) => match binary_op(symbol) {
                    Some(pair) => pair,
                    None => break,
                },
                _ => break,
            };
            if tier < min_tier {
                break;
            }
            self.stream.next();
            let right = self.parse_binary(tier + 1)?;
            let span = left.span.union(right.span);
            left = ast::Expr {
                kind: ast::ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ast::Expr> {
        let span = self.stream.peek_span();
        let kind = match *self.stream.peek() {
            Token::Symbol(Symbol::Minus) => {
                self.stream.next();
                let expr = self.parse_unary()?;
                ast::ExprKind::Unary {
                    op: UnaryOperator::Negate,
                    expr: Box::new(expr),
                }
            }
            Token::Symbol(Symbol::Bang) => {
                self.stream.next();
                let expr = self.parse_unary()?;
                ast::ExprKind::Unary {
                    op: UnaryOperator::LogicalNot,
                    expr: Box::new(expr),
                }
            }
            Token::Symbol(Symbol::Tilde) => {
                self.stream.next();
                let expr = self.parse_unary()?;
                ast::ExprKind::Unary {
                    op: UnaryOperator::BitwiseNot,
                    expr: Box::new(expr),
                }
            }
            Token::Symbol(Symbol::Amp) => {
                self.stream.next();
                let expr = self.parse_unary()?;
                ast::ExprKind::AddrOf(Box::new(expr))
            }
            Token::Symbol(Symbol::Star) => {
                self.stream.next();
                let expr = self.parse_unary()?;
                ast::ExprKind::Deref(Box::new(expr))
            }
            _ => return self.parse_postfix(),
        };
        Ok(ast::Expr { kind, span })
    }

    fn parse_postfix(&mut self) -> Result<ast::Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match *self.stream.peek() {
                Token::Symbol(Symbol::LBracket) => {
                    self.stream.next();
                    let index = self.parse_expr()?;
                    let end = self.stream.expect_symbol(Symbol::RBracket)?;
                    let span = expr.span.union(end);
                    expr = ast::Expr {
                        kind: ast::ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                Token::Symbol(Symbol::Dot) => {
                    self.stream.next();
                    let field = self.stream.expect_ident()?;
                    let span = expr.span.union(field.span);
                    expr = ast::Expr {
                        kind: ast::ExprKind::Member {
                            base: Box::new(expr),
                            field,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ast::Expr> {
        let span = self.stream.peek_span();
        match self.stream.peek().clone() {
            Token::Int(value, suffix) => {
                self.stream.next();
                let literal = match suffix {
                    IntSuffix::None => ast::Literal::AbstractInt(value),
                    IntSuffix::I => ast::Literal::Int(value),
                    IntSuffix::U => ast::Literal::UInt(value as u64),
                };
                Ok(ast::Expr {
                    kind: ast::ExprKind::Literal(literal),
                    span,
                })
            }
            Token::Float(value, suffix) => {
                self.stream.next();
                let literal = match suffix {
                    FloatSuffix::None => ast::Literal::AbstractFloat(value),
                    FloatSuffix::F | FloatSuffix::H => ast::Literal::Float(value),
                };
                Ok(ast::Expr {
                    kind: ast::ExprKind::Literal(literal),
                    span,
                })
            }
            Token::Keyword(Keyword::True) => {
                self.stream.next();
                Ok(ast::Expr {
                    kind: ast::ExprKind::Literal(ast::Literal::Bool(true)),
                    span,
                })
            }
            Token::Keyword(Keyword::False) => {
                self.stream.next();
                Ok(ast::Expr {
                    kind: ast::ExprKind::Literal(ast::Literal::Bool(false)),
                    span,
                })
            }
            Token::Symbol(Symbol::LParen) => {
                self.stream.next();
                let expr = self.parse_expr()?;
                self.stream.expect_symbol(Symbol::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                if name == "bitcast" {
                    self.stream.next();
                    self.stream.expect_symbol(Symbol::Lt)?;
                    let ty = self.parse_type()?;
                    self.stream.expect_generic_close()?;
                    self.stream.expect_symbol(Symbol::LParen)?;
                    let expr = self.parse_expr()?;
                    let end = self.stream.expect_symbol(Symbol::RParen)?;
                    return Ok(ast::Expr {
                        kind: ast::ExprKind::Bitcast {
                            ty,
                            expr: Box::new(expr),
                        },
                        span: span.union(end),
                    });
                }
                // Generic type constructors: `vec3<f32>(...)` and friends.
                if is_type_constructor_name(&name)
                    && matches!(
                        *self.stream.peek2(),
                        Token::Symbol(Symbol::Lt) | Token::Symbol(Symbol::LParen)
                    )
                {
                    let ty = self.parse_type()?;
                    let args = self.parse_call_args()?;
                    let end = self.stream.peek_span();
                    return Ok(ast::Expr {
                        kind: ast::ExprKind::Construct { ty, args },
                        span: span.union(end),
                    });
                }
                self.stream.next();
                if *self.stream.peek() == Token::Symbol(Symbol::LParen) {
                    let args = self.parse_call_args()?;
                    let end = self.stream.peek_span();
                    return Ok(ast::Expr {
                        kind: ast::ExprKind::Call {
                            callee: ast::Ident { name, span },
                            args,
                        },
                        span: span.union(end),
                    });
                }
                Ok(ast::Expr {
                    kind: ast::ExprKind::Ident(name),
                    span,
                })
            }
            _ => self.stream.unexpected("an expression"),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<ast::Expr>> {
        self.stream.expect_symbol(Symbol::LParen)?;
        let mut args = Vec::new();
        while !self.stream.skip_symbol(Symbol::RParen) {
            args.push(self.parse_expr()?);
            if !self.stream.skip_symbol(Symbol::Comma) {
                self.stream.expect_symbol(Symbol::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Statements

    fn parse_block(&mut self) -> Result<ast::Block> {
        self.stream.expect_symbol(Symbol::LBrace)?;
        let mut block = Vec::new();
        while !self.stream.skip_symbol(Symbol::RBrace) {
            block.push(self.parse_statement()?);
        }
        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<ast::Stmt> {
        let span = self.stream.peek_span();
        let kind = match *self.stream.peek() {
            Token::Symbol(Symbol::LBrace) => ast::StmtKind::Block(self.parse_block()?),
            Token::Symbol(Symbol::Semi) => {
                // Empty statement.
                self.stream.next();
                ast::StmtKind::Block(Vec::new())
            }
            Token::Keyword(Keyword::Let) | Token::Keyword(Keyword::Const) => {
                let decl = if self.stream.skip_keyword(Keyword::Let) {
                    ast::VarDeclKind::Let
                } else {
                    self.stream.expect_keyword(Keyword::Const)?;
                    ast::VarDeclKind::Const
                };
                let name = self.stream.expect_ident()?;
                let ty = if self.stream.skip_symbol(Symbol::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                self.stream.expect_symbol(Symbol::Eq)?;
                let init = self.parse_expr()?;
                self.stream.expect_symbol(Symbol::Semi)?;
                ast::StmtKind::VarDecl {
                    decl,
                    name,
                    ty,
                    init: Some(init),
                }
            }
            Token::Keyword(Keyword::Var) => {
                self.stream.next();
                // A `<function>` template on a local is legal and redundant.
                if self.stream.skip_symbol(Symbol::Lt) {
                    self.parse_address_space()?;
                    self.stream.expect_generic_close()?;
                }
                let name = self.stream.expect_ident()?;
                let ty = if self.stream.skip_symbol(Symbol::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let init = if self.stream.skip_symbol(Symbol::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.stream.expect_symbol(Symbol::Semi)?;
                ast::StmtKind::VarDecl {
                    decl: ast::VarDeclKind::Var,
                    name,
                    ty,
                    init,
                }
            }
            Token::Keyword(Keyword::If) => return self.parse_if(),
            Token::Keyword(Keyword::Switch) => return self.parse_switch(),
            Token::Keyword(Keyword::Loop) => return self.parse_loop(),
            Token::Keyword(Keyword::While) => {
                self.stream.next();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                ast::StmtKind::While { condition, body }
            }
            Token::Keyword(Keyword::For) => return self.parse_for(),
            Token::Keyword(Keyword::Break) => {
                self.stream.next();
                if self.stream.skip_keyword(Keyword::If) {
                    // Only legal as the last statement of a continuing block;
                    // the lowerer enforces the placement.
                    let condition = self.parse_expr()?;
                    self.stream.expect_symbol(Symbol::Semi)?;
                    ast::StmtKind::BreakIf(condition)
                } else {
                    self.stream.expect_symbol(Symbol::Semi)?;
                    ast::StmtKind::Break
                }
            }
            Token::Keyword(Keyword::Continue) => {
                self.stream.next();
                self.stream.expect_symbol(Symbol::Semi)?;
                ast::StmtKind::Continue
            }
            Token::Keyword(Keyword::Return) => {
                self.stream.next();
                let value = if *self.stream.peek() == Token::Symbol(Symbol::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.stream.expect_symbol(Symbol::Semi)?;
                ast::StmtKind::Return(value)
            }
            Token::Keyword(Keyword::Discard) => {
                self.stream.next();
                self.stream.expect_symbol(Symbol::Semi)?;
                ast::StmtKind::Discard
            }
            _ => return self.parse_simple_statement(true),
        };
        Ok(ast::Stmt { kind, span })
    }

    /// Assignment, increment/decrement, or a call-for-effect. Used both as a
    /// standalone statement and as a `for` init/update clause.
    fn parse_simple_statement(&mut self, want_semi: bool) -> Result<ast::Stmt> {
        let span = self.stream.peek_span();
        let expr = self.parse_expr()?;
        let kind = match *self.stream.peek() {
            Token::Symbol(Symbol::PlusPlus) => {
                self.stream.next();
                ast::StmtKind::Increment(expr)
            }
            Token::Symbol(Symbol::MinusMinus) => {
                self.stream.next();
                ast::StmtKind::Decrement(expr)
            }
            Token::Symbol(Symbol::Eq) => {
                self.stream.next();
                let value = self.parse_expr()?;
                ast::StmtKind::Assign {
                    lhs: expr,
                    op: None,
                    value,
                }
            }
            Token::Symbol(symbol) => match compound_assign_op(symbol) {
                Some(op) => {
                    self.stream.next();
                    let value = self.parse_expr()?;
                    ast::StmtKind::Assign {
                        lhs: expr,
                        op: Some(op),
                        value,
                    }
                }
                None => match expr.kind {
                    ast::ExprKind::Call { .. } => ast::StmtKind::Call(expr),
                    _ => return self.stream.unexpected("a statement"),
                },
            },
            _ => match expr.kind {
                ast::ExprKind::Call { .. } => ast::StmtKind::Call(expr),
                _ => return self.stream.unexpected("a statement"),
            },
        };
        if want_semi {
            self.stream.expect_symbol(Symbol::Semi)?;
        }
        Ok(ast::Stmt { kind, span })
    }

    fn parse_if(&mut self) -> Result<ast::Stmt> {
        let span = self.stream.expect_keyword(Keyword::If)?;
        let condition = self.parse_expr()?;
        let accept = self.parse_block()?;
        let reject = if self.stream.skip_keyword(Keyword::Else) {
            if *self.stream.peek() == Token::Keyword(Keyword::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(ast::Stmt {
            kind: ast::StmtKind::If {
                condition,
                accept,
                reject,
            },
            span,
        })
    }

    fn parse_switch(&mut self) -> Result<ast::Stmt> {
        let span = self.stream.expect_keyword(Keyword::Switch)?;
        let selector = self.parse_expr()?;
        self.stream.expect_symbol(Symbol::LBrace)?;
        let mut cases = Vec::new();
        while !self.stream.skip_symbol(Symbol::RBrace) {
            let mut selectors = Vec::new();
            if self.stream.skip_keyword(Keyword::Default) {
                selectors.push(None);
            } else {
                self.stream.expect_keyword(Keyword::Case)?;
                loop {
                    if self.stream.skip_keyword(Keyword::Default) {
                        selectors.push(None);
                    } else {
                        selectors.push(Some(self.parse_expr()?));
                    }
                    if !self.stream.skip_symbol(Symbol::Comma) {
                        break;
                    }
                    // A trailing comma before the body is allowed.
                    if matches!(
                        *self.stream.peek(),
                        Token::Symbol(Symbol::Colon) | Token::Symbol(Symbol::LBrace)
                    ) {
                        break;
                    }
                }
            }
            self.stream.skip_symbol(Symbol::Colon);
            let body = self.parse_block()?;
            cases.push(ast::SwitchCase { selectors, body });
        }
        Ok(ast::Stmt {
            kind: ast::StmtKind::Switch { selector, cases },
            span,
        })
    }

    fn parse_loop(&mut self) -> Result<ast::Stmt> {
        let span = self.stream.expect_keyword(Keyword::Loop)?;
        self.stream.expect_symbol(Symbol::LBrace)?;
        let mut body = Vec::new();
        let mut continuing = Vec::new();
        let mut break_if = None;
        loop {
            if self.stream.skip_symbol(Symbol::RBrace) {
                break;
            }
            if self.stream.skip_keyword(Keyword::Continuing) {
                self.stream.expect_symbol(Symbol::LBrace)?;
                while !self.stream.skip_symbol(Symbol::RBrace) {
                    let stmt = self.parse_statement()?;
                    if let ast::StmtKind::BreakIf(condition) = stmt.kind {
                        if *self.stream.peek() != Token::Symbol(Symbol::RBrace) {
                            return Err(ParseError::MisplacedBreakIf { span: stmt.span });
                        }
                        break_if = Some(condition);
                    } else {
                        continuing.push(stmt);
                    }
                }
                self.stream.expect_symbol(Symbol::RBrace)?;
                break;
            }
            body.push(self.parse_statement()?);
        }
        Ok(ast::Stmt {
            kind: ast::StmtKind::Loop {
                body,
                continuing,
                break_if,
            },
            span,
        })
    }

    fn parse_for(&mut self) -> Result<ast::Stmt> {
        let span = self.stream.expect_keyword(Keyword::For)?;
        self.stream.expect_symbol(Symbol::LParen)?;
        let init = if *self.stream.peek() == Token::Symbol(Symbol::Semi) {
            self.stream.next();
            None
        } else {
            let stmt = match *self.stream.peek() {
                Token::Keyword(Keyword::Let)
                | Token::Keyword(Keyword::Var)
                | Token::Keyword(Keyword::Const) => self.parse_statement()?,
                _ => {
                    let stmt = self.parse_simple_statement(false)?;
                    self.stream.expect_symbol(Symbol::Semi)?;
                    stmt
                }
            };
            Some(Box::new(stmt))
        };
        let condition = if *self.stream.peek() == Token::Symbol(Symbol::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.stream.expect_symbol(Symbol::Semi)?;
        let update = if *self.stream.peek() == Token::Symbol(Symbol::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement(false)?))
        };
        self.stream.expect_symbol(Symbol::RParen)?;
        let body = self.parse_block()?;
        Ok(ast::Stmt {
            kind: ast::StmtKind::For {
                init,
                condition,
                update,
                body,
            },
            span,
        })
    }
}

/// Parse WGSL source text into an AST.
pub fn parse_str(source: &str) -> Result<ast::TranslationUnit> {
    Parser::new(source)?.parse()
}

fn vector_size_from_name(name: &str) -> VectorSize {
    match name {
        "vec2" => VectorSize::Bi,
        "vec3" => VectorSize::Tri,
        _ => VectorSize::Quad,
    }
}

fn unknown_type(ident: ast::Ident) -> ParseError {
    ParseError::Unexpected {
        expected: "a type",
        found: ident.name,
        span: ident.span,
    }
}

fn is_type_constructor_name(name: &str) -> bool {
    matches!(
        name,
        "vec2" | "vec3" | "vec4" | "array" | "f32" | "f16" | "i32" | "u32" | "bool"
    ) || (name.starts_with("mat") && name.len() == 6)
}

fn storage_format_from_name(name: &str) -> Option<StorageFormat> {
    use StorageFormat as Sf;
    Some(match name {
        "r32uint" => Sf::R32Uint,
        "r32sint" => Sf::R32Sint,
        "r32float" => Sf::R32Float,
        "rg32uint" => Sf::Rg32Uint,
        "rg32sint" => Sf::Rg32Sint,
        "rg32float" => Sf::Rg32Float,
        "rgba8unorm" => Sf::Rgba8Unorm,
        "rgba8snorm" => Sf::Rgba8Snorm,
        "rgba8uint" => Sf::Rgba8Uint,
        "rgba8sint" => Sf::Rgba8Sint,
        "rgba16uint" => Sf::Rgba16Uint,
        "rgba16sint" => Sf::Rgba16Sint,
        "rgba16float" => Sf::Rgba16Float,
        "rgba32uint" => Sf::Rgba32Uint,
        "rgba32sint" => Sf::Rgba32Sint,
        "rgba32float" => Sf::Rgba32Float,
        _ => return None,
    })
}

/// Binary operator for a symbol, with its precedence tier. Higher binds
/// tighter.
fn binary_op(symbol: Symbol) -> Option<(BinaryOperator, u8)> {
    use BinaryOperator as Bo;
    Some(match symbol {
        Symbol::OrOr => (Bo::LogicalOr, 1),
        Symbol::AndAnd => (Bo::LogicalAnd, 2),
        Symbol::Pipe => (Bo::InclusiveOr, 3),
        Symbol::Caret => (Bo::ExclusiveOr, 4),
        Symbol::Amp => (Bo::And, 5),
        Symbol::EqEq => (Bo::Equal, 6),
        Symbol::NotEq => (Bo::NotEqual, 6),
        Symbol::Lt => (Bo::Less, 7),
        Symbol::Le => (Bo::LessEqual, 7),
        Symbol::Gt => (Bo::Greater, 7),
        Symbol::Ge => (Bo::GreaterEqual, 7),
        Symbol::Shl => (Bo::ShiftLeft, 8),
        Symbol::Shr => (Bo::ShiftRight, 8),
        Symbol::Plus => (Bo::Add, 9),
        Symbol::Minus => (Bo::Subtract, 9),
        Symbol::Star => (Bo::Multiply, 10),
        Symbol::Slash => (Bo::Divide, 10),
        Symbol::Percent => (Bo::Modulo, 10),
        _ => return None,
    })
}

fn compound_assign_op(symbol: Symbol) -> Option<BinaryOperator> {
    use BinaryOperator as Bo;
    Some(match symbol {
        Symbol::PlusEq => Bo::Add,
        Symbol::MinusEq => Bo::Subtract,
        Symbol::StarEq => Bo::Multiply,
        Symbol::SlashEq => Bo::Divide,
        Symbol::PercentEq => Bo::Modulo,
        Symbol::AmpEq => Bo::And,
        Symbol::PipeEq => Bo::InclusiveOr,
        Symbol::CaretEq => Bo::ExclusiveOr,
        Symbol::ShlEq => Bo::ShiftLeft,
        Symbol::ShrEq => Bo::ShiftRight,
        _ => None?,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_entry_point() {
        let tu = parse_str(
            "@vertex fn main() -> @builtin(position) vec4<f32> {
                return vec4<f32>(0.0, 0.0, 0.0, 1.0);
            }",
        )
        .unwrap();
        assert_eq!(tu.decls.len(), 1);
        match tu.decls[0] {
            ast::GlobalDecl::Fn(ref f) => {
                assert_eq!(f.name.name, "main");
                assert_eq!(
                    f.stage,
                    Some(ast::StageAttribute {
                        stage: ShaderStage::Vertex,
                        workgroup_size: Vec::new(),
                    })
                );
                let (_, ref io) = *f.result.as_ref().unwrap();
                assert_eq!(io.builtin, Some(BuiltIn::Position));
            }
            ref other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn nested_template_closers_split() {
        let tu = parse_str("var<private> m: array<vec3<f32>, 2>;").unwrap();
        match tu.decls[0] {
            ast::GlobalDecl::Var(ref v) => match v.ty.kind {
                ast::TypeKind::Array { ref inner, ref size } => {
                    assert!(size.is_some());
                    assert!(matches!(inner.kind, ast::TypeKind::Vector { .. }));
                }
                ref other => panic!("unexpected type: {:?}", other),
            },
            ref other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn operator_precedence() {
        let tu = parse_str("const x = 1 + 2 * 3;").unwrap();
        let init = match tu.decls[0] {
            ast::GlobalDecl::Const(ref c) => &c.init,
            ref other => panic!("unexpected decl: {:?}", other),
        };
        match init.kind {
            ast::ExprKind::Binary {
                op: BinaryOperator::Add,
                ref right,
                ..
            } => {
                assert!(matches!(
                    right.kind,
                    ast::ExprKind::Binary {
                        op: BinaryOperator::Multiply,
                        ..
                    }
                ));
            }
            ref other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn switch_with_multiple_selectors() {
        let tu = parse_str(
            "fn f(x: i32) {
                switch x {
                    case 0: {}
                    case 1, 2: {}
                    default: {}
                }
            }",
        )
        .unwrap();
        match tu.decls[0] {
            ast::GlobalDecl::Fn(ref f) => match f.body[0].kind {
                ast::StmtKind::Switch { ref cases, .. } => {
                    assert_eq!(cases.len(), 3);
                    assert_eq!(cases[1].selectors.len(), 2);
                    assert_eq!(cases[2].selectors, vec![None]);
                }
                ref other => panic!("unexpected stmt: {:?}", other),
            },
            ref other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn first_error_is_reported_with_span() {
        let err = parse_str("fn f( {").unwrap_err();
        match err {
            ParseError::Unexpected { expected, .. } => assert_eq!(expected, "an identifier"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn loop_with_continuing_and_break_if() {
        let tu = parse_str(
            "fn f() {
                var i: i32 = 0;
                loop {
                    i = i + 1;
                    continuing {
                        break if i > 4;
                    }
                }
            }",
        )
        .unwrap();
        match tu.decls[0] {
            ast::GlobalDecl::Fn(ref f) => match f.body[1].kind {
                ast::StmtKind::Loop {
                    ref continuing,
                    ref break_if,
                    ..
                } => {
                    assert!(continuing.is_empty());
                    assert!(break_if.is_some());
                }
                ref other => panic!("unexpected stmt: {:?}", other),
            },
            ref other => panic!("unexpected decl: {:?}", other),
        }
    }
}
