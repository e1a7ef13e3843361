//! Parsing source text into a [`Module`].
//!
//! The language is line-oriented: `#` starts an end-of-line comment,
//! newlines terminate declarations, and inside `{…}` blocks each
//! statement ends with `;` followed by a newline. The parser is a
//! plain recursive descent over the token stream; every failure is
//! fatal and reported with its line and column.

use std::ops::Range;
use std::path::PathBuf;

use logos::Logos;

use crate::scan::{self, ParseError};

use super::{
    greater_or_equal, greater_than, less_or_equal, not_equals, BinaryOp, Call, Constant, Decl,
    DeclareArray, Expr, Function, If, Import, Literal, Module, Stmt, While,
};

#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    #[token("\n")]
    Newline,
    #[token("import")]
    Import,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("output")]
    Output,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("halt")]
    Halt,
    #[token("input")]
    Input,
    #[regex(r"[A-Za-z][A-Za-z0-9]*", |lex| lex.slice().to_string())]
    Name(String),
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r#""([^"\\\n]|\\[^\n])*""#, |lex| lex.slice().to_string())]
    Str(String),
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
}

/// Parse one source file into a module named after it.
pub fn parse(file: &str, source: &str) -> Result<Module, ParseError> {
    Parser::new(file, source)?.parse_module()
}

struct Parser<'a> {
    file: &'a str,
    source: &'a str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(file: &'a str, source: &'a str) -> Result<Self, ParseError> {
        let mut tokens = Vec::new();
        for (token, span) in Token::lexer(source).spanned() {
            match token {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    return Err(error_at(file, source, span.start, "Unrecognized character."))
                }
            }
        }
        Ok(Parser {
            file,
            source,
            tokens,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn bump(&mut self) -> Option<(Token, Range<usize>)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |(_, span)| span.start)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        error_at(self.file, self.source, self.offset(), message)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, name: &str) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {:?}.", name)))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Name(_)) => {
                let Some((Token::Name(name), _)) = self.bump() else {
                    unreachable!()
                };
                Ok(name)
            }
            _ => Err(self.error("Expected name.")),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if self.pos == self.tokens.len() || self.eat(&Token::Newline) {
            Ok(())
        } else {
            Err(self.error("Expected newline."))
        }
    }

    fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut module = Module {
            name: PathBuf::from(self.file),
            imports: Vec::new(),
            body: Vec::new(),
        };
        self.skip_newlines();
        while self.peek() == Some(&Token::Import) {
            module.imports.push(self.parse_import()?);
            self.expect_newline()?;
            self.skip_newlines();
        }
        loop {
            self.skip_newlines();
            match self.peek() {
                None => break,
                Some(Token::Const) => {
                    let constants = self.parse_const_items()?;
                    module.body.extend(constants.into_iter().map(Decl::Constant));
                }
                Some(Token::Var) => {
                    let items = self.parse_var_items()?;
                    for (name, size, initializer) in items {
                        if initializer.is_some() {
                            return Err(self.error("Initializers are not allowed here."));
                        }
                        module.body.push(match size {
                            Some(size) => Decl::DeclareArray(DeclareArray { name, size }),
                            None => Decl::DeclareScalar(name),
                        });
                    }
                }
                Some(Token::Function) => {
                    module.body.push(Decl::Function(self.parse_function()?));
                }
                Some(_) => return Err(self.error("Expected declaration.")),
            }
            self.expect_newline()?;
        }
        Ok(module)
    }

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        self.bump();
        let mut parts = vec![self.expect_name()?];
        while self.eat(&Token::Dot) {
            parts.push(self.expect_name()?);
        }
        self.expect(Token::Semicolon, ";")?;
        Ok(Import { parts })
    }

    fn parse_const_items(&mut self) -> Result<Vec<Constant>, ParseError> {
        self.bump();
        let mut output = Vec::new();
        loop {
            let name = self.expect_name()?;
            self.expect(Token::Assign, "=")?;
            let value = self.parse_expression()?;
            output.push(Constant { name, value });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::Semicolon, ";")?;
        Ok(output)
    }

    /// One `var` line: each item is a name, an optional array size,
    /// and an optional initializer expression.
    #[allow(clippy::type_complexity)]
    fn parse_var_items(&mut self) -> Result<Vec<(String, Option<Expr>, Option<Expr>)>, ParseError> {
        self.bump();
        let mut output = Vec::new();
        loop {
            let name = self.expect_name()?;
            let size = if self.eat(&Token::LBracket) {
                let size = self.parse_expression()?;
                self.expect(Token::RBracket, "]")?;
                Some(size)
            } else {
                None
            };
            let initializer = if self.eat(&Token::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            output.push((name, size, initializer));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::Semicolon, ";")?;
        Ok(output)
    }

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        self.bump();
        let name = self.expect_name()?;
        self.expect(Token::LParen, "(")?;
        let mut parameters = Vec::new();
        loop {
            if self.peek() == Some(&Token::RParen) {
                break;
            }
            parameters.push(self.expect_name()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, ")")?;
        self.expect(Token::LBrace, "{")?;
        self.expect_newline()?;
        let body = self.parse_statements()?;
        self.expect(Token::RBrace, "}")?;
        Ok(Function {
            name,
            parameters,
            body,
        })
    }

    fn parse_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut output = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None | Some(Token::RBrace) => break,
                _ => {}
            }
            self.parse_statement_into(&mut output)?;
            self.expect_newline()?;
        }
        Ok(output)
    }

    fn parse_statement_into(&mut self, output: &mut Vec<Stmt>) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token::Const) => {
                let constants = self.parse_const_items()?;
                output.extend(constants.into_iter().map(Stmt::Constant));
            }
            Some(Token::Var) => {
                for (name, size, initializer) in self.parse_var_items()? {
                    output.push(match size {
                        Some(size) => Stmt::DeclareArray(DeclareArray {
                            name: name.clone(),
                            size,
                        }),
                        None => Stmt::DeclareScalar(name.clone()),
                    });
                    if let Some(value) = initializer {
                        output.push(Stmt::Assign {
                            target: Expr::Name(name),
                            value,
                        });
                    }
                }
            }
            Some(Token::If) => output.push(self.parse_if_statement()?),
            Some(Token::While) => output.push(self.parse_while_statement()?),
            Some(Token::Output) => {
                self.bump();
                let value = self.parse_expression()?;
                self.expect(Token::Semicolon, ";")?;
                output.push(Stmt::Output(value));
            }
            Some(Token::Return) => {
                self.bump();
                let value = self.parse_expression()?;
                self.expect(Token::Semicolon, ";")?;
                output.push(Stmt::Return(value));
            }
            Some(Token::Break) => {
                self.bump();
                self.expect(Token::Semicolon, ";")?;
                output.push(Stmt::Break);
            }
            Some(Token::Continue) => {
                self.bump();
                self.expect(Token::Semicolon, ";")?;
                output.push(Stmt::Continue);
            }
            Some(Token::Halt) => {
                self.bump();
                self.expect(Token::Semicolon, ";")?;
                output.push(Stmt::Halt);
            }
            _ => {
                let at = self.offset();
                let expr = self.parse_expression()?;
                if self.peek() == Some(&Token::Assign) {
                    if !expr.is_lvalue() {
                        return Err(error_at(
                            self.file,
                            self.source,
                            at,
                            "Assignment target is not an lvalue.",
                        ));
                    }
                    self.bump();
                    let value = self.parse_expression()?;
                    self.expect(Token::Semicolon, ";")?;
                    output.push(Stmt::Assign {
                        target: expr,
                        value,
                    });
                } else if self.peek() == Some(&Token::PlusAssign) {
                    if !expr.is_lvalue() {
                        return Err(error_at(
                            self.file,
                            self.source,
                            at,
                            "Assignment target is not an lvalue.",
                        ));
                    }
                    self.bump();
                    let value = self.parse_expression()?;
                    self.expect(Token::Semicolon, ";")?;
                    output.push(Stmt::AddAssign {
                        target: expr,
                        value,
                    });
                } else if let Expr::Call(call) = expr {
                    self.expect(Token::Semicolon, ";")?;
                    output.push(Stmt::Call(call));
                } else {
                    return Err(self.error(
                        "Only call expressions can be performed as statements.",
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        let condition = self.parse_expression()?;
        self.expect(Token::LBrace, "{")?;
        self.expect_newline()?;
        let then_branch = self.parse_statements()?;
        self.expect(Token::RBrace, "}")?;
        let else_branch = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.parse_if_statement()?]
            } else {
                self.expect(Token::LBrace, "{")?;
                self.expect_newline()?;
                let branch = self.parse_statements()?;
                self.expect(Token::RBrace, "}")?;
                branch
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(If {
            condition,
            then_branch,
            else_branch,
        }))
    }

    fn parse_while_statement(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        let condition = self.parse_expression()?;
        self.expect(Token::LBrace, "{")?;
        self.expect_newline()?;
        let body = self.parse_statements()?;
        self.expect(Token::RBrace, "}")?;
        Ok(Stmt::While(While { condition, body }))
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_disjunction()
    }

    fn parse_disjunction(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_conjunction()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_conjunction()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_conjunction(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_sum()?;
        match self.peek() {
            Some(Token::Lt) => {
                self.bump();
                Ok(Expr::binary(BinaryOp::LessThan, left, self.parse_sum()?))
            }
            Some(Token::Eq) => {
                self.bump();
                Ok(Expr::binary(BinaryOp::Equals, left, self.parse_sum()?))
            }
            Some(Token::Gt) => {
                self.bump();
                Ok(greater_than(left, self.parse_sum()?))
            }
            Some(Token::Le) => {
                self.bump();
                Ok(less_or_equal(left, self.parse_sum()?))
            }
            Some(Token::Ge) => {
                self.bump();
                Ok(greater_or_equal(left, self.parse_sum()?))
            }
            Some(Token::Ne) => {
                self.bump();
                Ok(not_equals(left, self.parse_sum()?))
            }
            _ => Ok(left),
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_product()?;
        loop {
            if self.eat(&Token::Plus) {
                left = Expr::binary(BinaryOp::Add, left, self.parse_product()?);
            } else if self.eat(&Token::Minus) {
                left = Expr::binary(BinaryOp::Sub, left, self.parse_product()?);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix()?;
        while self.eat(&Token::Star) {
            left = Expr::binary(BinaryOp::Mul, left, self.parse_prefix()?);
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Star) {
            Ok(Expr::read(self.parse_prefix()?))
        } else if self.eat(&Token::Minus) {
            Ok(Expr::binary(BinaryOp::Sub, Expr::literal(0), self.parse_prefix()?))
        } else {
            self.parse_suffix()
        }
    }

    fn parse_suffix(&mut self) -> Result<Expr, ParseError> {
        let mut result = self.parse_term()?;
        loop {
            if self.eat(&Token::LBracket) {
                // `a[i]` is sugar for `*(a + i)`.
                let index = self.parse_expression()?;
                self.expect(Token::RBracket, "]")?;
                result = Expr::read(Expr::binary(BinaryOp::Add, result, index));
            } else if self.eat(&Token::LParen) {
                let mut arguments = Vec::new();
                if !self.eat(&Token::RParen) {
                    arguments.push(self.parse_expression()?);
                    while self.eat(&Token::Comma) {
                        arguments.push(self.parse_expression()?);
                    }
                    self.expect(Token::RParen, ")")?;
                }
                result = Expr::Call(Call {
                    function: Box::new(result),
                    arguments,
                });
            } else {
                return Ok(result);
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Int(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(Expr::literal(value))
            }
            Some(Token::Str(_)) => {
                let Some((Token::Str(quoted), span)) = self.bump() else {
                    unreachable!()
                };
                let body = &quoted[1..quoted.len() - 1];
                let value = scan::unescape(body).map_err(|(at, message)| {
                    error_at(self.file, self.source, span.start + 1 + at, message)
                })?;
                Ok(Expr::Literal(Literal::Str(value)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let result = self.parse_expression()?;
                self.expect(Token::RParen, ")")?;
                Ok(result)
            }
            Some(Token::Input) => {
                self.pos += 1;
                Ok(Expr::Input)
            }
            Some(Token::Name(_)) => Ok(Expr::Name(self.expect_name()?)),
            Some(_) => Err(self.error("Expected a term.")),
            None => Err(self.error("Unexpected end of input.")),
        }
    }
}

fn error_at(file: &str, source: &str, offset: usize, message: impl Into<String>) -> ParseError {
    let (line, column) = scan::line_col(source, offset);
    ParseError {
        file: file.to_string(),
        line,
        column,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse_expr(source: &str) -> Expr {
        let text = format!("function f() {{\n  output {};\n}}\n", source);
        let module = parse("test.is", &text).unwrap();
        let [Decl::Function(f)] = &module.body[..] else {
            panic!("expected one function");
        };
        let [Stmt::Output(e)] = &f.body[..] else {
            panic!("expected one output statement");
        };
        e.clone()
    }

    #[test]
    fn products_bind_tighter_than_sums() {
        assert_eq!(
            parse_expr("1 + 2 * 3"),
            Expr::binary(
                BinaryOp::Add,
                Expr::literal(1),
                Expr::binary(BinaryOp::Mul, Expr::literal(2), Expr::literal(3)),
            )
        );
    }

    #[test]
    fn relational_operators_desugar() {
        // a >= b is !(a < b), and !x is x == 0.
        assert_eq!(
            parse_expr("a >= b"),
            Expr::binary(
                BinaryOp::Equals,
                Expr::binary(BinaryOp::LessThan, Expr::name("a"), Expr::name("b")),
                Expr::literal(0),
            )
        );
        // a > b swaps the operands instead.
        assert_eq!(
            parse_expr("a > b"),
            Expr::binary(BinaryOp::LessThan, Expr::name("b"), Expr::name("a")),
        );
    }

    #[test]
    fn prefix_minus_subtracts_from_zero() {
        assert_eq!(
            parse_expr("-x"),
            Expr::binary(BinaryOp::Sub, Expr::literal(0), Expr::name("x")),
        );
    }

    #[test]
    fn indexing_desugars_to_read() {
        assert_eq!(
            parse_expr("a[i]"),
            Expr::read(Expr::binary(BinaryOp::Add, Expr::name("a"), Expr::name("i"))),
        );
    }

    #[test]
    fn string_literals_unescape() {
        assert_eq!(
            parse_expr("\"a\\n\\\"b\""),
            Expr::Literal(Literal::Str("a\n\"b".to_string())),
        );
    }

    #[test]
    fn calls_take_argument_lists() {
        assert_eq!(
            parse_expr("f(1, x)"),
            Expr::Call(Call {
                function: Box::new(Expr::name("f")),
                arguments: vec![Expr::literal(1), Expr::name("x")],
            })
        );
    }

    #[test]
    fn imports_resolve_relative_to_the_module() {
        let module = parse("dir/m.is", "import a.b;\n").unwrap();
        assert_eq!(module.imports.len(), 1);
        assert_eq!(
            module.imports[0].resolve(Path::new("dir")),
            Path::new("dir/a/b.is")
        );
    }

    #[test]
    fn var_initializers_expand_to_assignments() {
        let module = parse("t.is", "function f() {\n  var x = 3, y;\n}\n").unwrap();
        let [Decl::Function(f)] = &module.body[..] else {
            panic!()
        };
        assert_eq!(
            f.body,
            vec![
                Stmt::DeclareScalar("x".to_string()),
                Stmt::Assign {
                    target: Expr::name("x"),
                    value: Expr::literal(3),
                },
                Stmt::DeclareScalar("y".to_string()),
            ]
        );
    }

    #[test]
    fn non_lvalue_assignments_are_rejected() {
        let err = parse("t.is", "function f() {\n  1 = 2;\n}\n").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("lvalue"));
    }

    #[test]
    fn errors_carry_positions() {
        let err = parse("t.is", "function f() {\n  var 5;\n}\n").unwrap_err();
        assert_eq!(err.file, "t.is");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("name"));
    }

    #[test]
    fn else_if_chains_nest() {
        let source = "function f() {\n  if a {\n    output 1;\n  } else if b {\n    output 2;\n  } else {\n    output 3;\n  }\n}\n";
        let module = parse("t.is", source).unwrap();
        let [Decl::Function(f)] = &module.body[..] else {
            panic!()
        };
        let [Stmt::If(outer)] = &f.body[..] else {
            panic!()
        };
        let [Stmt::If(inner)] = &outer.else_branch[..] else {
            panic!("expected nested if in else branch");
        };
        assert_eq!(inner.else_branch.len(), 1);
    }
}
