//! Parsing the textual assembly syntax: one statement per line, `#`
//! comments, labels as `name:`, and operands written `imm`, `*imm`,
//! or `base[imm]`, optionally followed by `@ label` to bind a label to
//! the operand's cell.

use std::ops::Range;

use logos::Logos;

use crate::scan::{self, ParseError};

use super::{
    Calculation, Directive, Immediate, InputParam, InputValue, Instr, Jump, OutputParam,
    OutputValue, Statement,
};

#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    #[token("\n")]
    Newline,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("@")]
    At,
    #[token("*")]
    Star,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(".")]
    Dot,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r#""([^"\\\n]|\\[^\n])*""#, |lex| lex.slice().to_string())]
    Str(String),
}

/// Parse assembly text into a statement list.
pub fn parse(file: &str, source: &str) -> Result<Vec<Statement>, ParseError> {
    Parser::new(file, source)?.parse_program()
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

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(token, _)| token)
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

    fn parse_program(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut output = Vec::new();
        self.skip_newlines();
        while self.pos < self.tokens.len() {
            output.push(self.parse_statement()?);
            self.expect_newline()?;
            self.skip_newlines();
        }
        Ok(output)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek() {
            Some(Token::Dot) => Ok(self.parse_directive()?.into()),
            Some(Token::Name(_)) => {
                let name = self.expect_name()?;
                if self.eat(&Token::Colon) {
                    Ok(Statement::Label(name))
                } else {
                    Ok(self.parse_instruction(&name)?.into())
                }
            }
            _ => Err(self.error("Expected label or instruction.")),
        }
    }

    fn parse_instruction(&mut self, mnemonic: &str) -> Result<Instr, ParseError> {
        match mnemonic {
            "add" => Ok(Instr::Add(self.parse_calculation()?)),
            "mul" => Ok(Instr::Mul(self.parse_calculation()?)),
            "lt" => Ok(Instr::LessThan(self.parse_calculation()?)),
            "eq" => Ok(Instr::Equals(self.parse_calculation()?)),
            "in" => Ok(Instr::Input(self.parse_output_param()?)),
            "out" => Ok(Instr::Output(self.parse_input_param()?)),
            "jnz" => Ok(Instr::JumpIfTrue(self.parse_jump()?)),
            "jz" => Ok(Instr::JumpIfFalse(self.parse_jump()?)),
            "arb" => Ok(Instr::AdjustRelativeBase(self.parse_input_param()?)),
            "halt" => Ok(Instr::Halt),
            _ => Err(self.error(format!("Unknown op {:?}.", mnemonic))),
        }
    }

    fn parse_calculation(&mut self) -> Result<Calculation, ParseError> {
        let a = self.parse_input_param()?;
        self.expect(Token::Comma, ",")?;
        let b = self.parse_input_param()?;
        self.expect(Token::Comma, ",")?;
        let out = self.parse_output_param()?;
        Ok(Calculation { a, b, out })
    }

    fn parse_jump(&mut self) -> Result<Jump, ParseError> {
        let condition = self.parse_input_param()?;
        self.expect(Token::Comma, ",")?;
        let target = self.parse_input_param()?;
        Ok(Jump { condition, target })
    }

    fn parse_immediate(&mut self) -> Result<Immediate, ParseError> {
        match self.peek() {
            Some(Token::Name(_)) => Ok(Immediate::Name(self.expect_name()?)),
            Some(Token::Int(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(Immediate::Literal(value))
            }
            Some(_) => Err(self.error("Expected numeric literal.")),
            None => Err(self.error("Unexpected end of input.")),
        }
    }

    fn at_relative(&self) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == "base")
            && self.peek2() == Some(&Token::LBracket)
    }

    fn parse_relative(&mut self) -> Result<Immediate, ParseError> {
        self.bump();
        self.bump();
        let value = self.parse_immediate()?;
        self.expect(Token::RBracket, "]")?;
        Ok(value)
    }

    fn parse_binding_label(&mut self) -> Result<Option<String>, ParseError> {
        if self.eat(&Token::At) {
            Ok(Some(self.expect_name()?))
        } else {
            Ok(None)
        }
    }

    fn parse_input_param(&mut self) -> Result<InputParam, ParseError> {
        let value = if self.eat(&Token::Star) {
            InputValue::Address(self.parse_immediate()?)
        } else if self.at_relative() {
            InputValue::Relative(self.parse_relative()?)
        } else {
            InputValue::Immediate(self.parse_immediate()?)
        };
        let label = self.parse_binding_label()?;
        Ok(InputParam { label, value })
    }

    fn parse_output_param(&mut self) -> Result<OutputParam, ParseError> {
        let value = if self.eat(&Token::Star) {
            OutputValue::Address(self.parse_immediate()?)
        } else if self.at_relative() {
            OutputValue::Relative(self.parse_relative()?)
        } else {
            return Err(self.error("Expected \"*x\" or \"base[x]\"."));
        };
        let label = self.parse_binding_label()?;
        Ok(OutputParam { label, value })
    }

    fn parse_directive(&mut self) -> Result<Directive, ParseError> {
        self.bump();
        let id = self.expect_name()?;
        match id.as_str() {
            "define" => {
                let name = self.expect_name()?;
                let value = self.parse_immediate()?;
                Ok(Directive::Define(name, value))
            }
            "int" => Ok(Directive::Int(self.parse_immediate()?)),
            "ascii" => match self.peek() {
                Some(Token::Str(_)) => {
                    let Some((Token::Str(quoted), span)) = self.bump() else {
                        unreachable!()
                    };
                    let body = &quoted[1..quoted.len() - 1];
                    let value = scan::unescape(body).map_err(|(at, message)| {
                        error_at(self.file, self.source, span.start + 1 + at, message)
                    })?;
                    Ok(Directive::Ascii(value))
                }
                _ => Err(self.error("Expected string literal.")),
            },
            _ => Err(self.error("Invalid directive.")),
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

    #[test]
    fn parses_instructions_and_operands() {
        let source = "start:\n  add *x, 3, base[2] @ t  # trailing comment\n  halt\n";
        let statements = parse("test.asm", source).unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Label("start".to_string()),
                Statement::Instr(Instr::Add(Calculation {
                    a: InputParam::address("x"),
                    b: InputParam::literal(3),
                    out: OutputParam {
                        label: Some("t".to_string()),
                        value: OutputValue::Relative(Immediate::Literal(2)),
                    },
                })),
                Statement::Instr(Instr::Halt),
            ]
        );
    }

    #[test]
    fn parses_directives() {
        let source = ".define limit 10\nmsg:\n  .ascii \"hi\\n\"\n  .int limit\n";
        let statements = parse("test.asm", source).unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Directive(Directive::Define(
                    "limit".to_string(),
                    Immediate::Literal(10)
                )),
                Statement::Label("msg".to_string()),
                Statement::Directive(Directive::Ascii("hi\n".to_string())),
                Statement::Directive(Directive::Int(Immediate::Name("limit".to_string()))),
            ]
        );
    }

    #[test]
    fn reports_unknown_ops_with_position() {
        let err = parse("test.asm", "halt\nbogus 1, 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn rejects_immediate_outputs() {
        assert!(parse("test.asm", "in 5\n").is_err());
    }

    #[test]
    fn statements_round_trip_through_display() {
        let source = "  jz 0, *func_f_return\n  out 0 @ return0\n  .ascii \"a\\\"b\"\n";
        let statements = parse("test.asm", source).unwrap();
        let printed: String = statements
            .iter()
            .map(|s| format!("{}\n", s))
            .collect();
        assert_eq!(parse("test.asm", &printed).unwrap(), statements);
    }
}
