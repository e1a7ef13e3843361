//! Encoding assembly statements into the flat integer stream.
//!
//! Two passes over the statement list. The first lays out the program
//! without emitting anything: it assigns every label its cell offset
//! (binding labels included) and records `.define` bindings. The
//! second resolves every name and emits the encoded words.

use std::collections::HashMap;

use log::{error, trace};

use super::{Directive, Error, Immediate, Instr, InputParam, InputValue, OutputParam, OutputValue, Statement};

/// Name bindings gathered by the layout pass.
#[derive(Default)]
struct Env {
    labels: HashMap<String, i64>,
    defines: HashMap<String, Immediate>,
}

impl Env {
    fn build(statements: &[Statement]) -> Result<Self, Error> {
        let mut env = Env::default();
        let mut offset = 0i64;
        for statement in statements {
            match statement {
                Statement::Label(name) => env.bind_label(name, offset)?,
                Statement::Instr(instr) => {
                    for (index, param) in instr.params().iter().enumerate() {
                        if let Some(label) = param.label() {
                            // The operand's cell sits one past the
                            // opcode word, then one per parameter.
                            env.bind_label(label, offset + 1 + index as i64)?;
                        }
                    }
                    offset += instr.size();
                }
                Statement::Directive(Directive::Define(name, value)) => {
                    env.bind_define(name, value.clone())?;
                }
                Statement::Directive(Directive::Int(_)) => offset += 1,
                Statement::Directive(Directive::Ascii(value)) => {
                    offset += value.len() as i64 + 1;
                }
            }
        }
        Ok(env)
    }

    fn bind_label(&mut self, name: &str, offset: i64) -> Result<(), Error> {
        trace!("label {} -> {}", name, offset);
        if self.labels.insert(name.to_string(), offset).is_some() {
            error!("duplicate label {}", name);
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        Ok(())
    }

    fn bind_define(&mut self, name: &str, value: Immediate) -> Result<(), Error> {
        trace!("define {} -> {}", name, value);
        if self.defines.insert(name.to_string(), value).is_some() {
            error!("duplicate define {}", name);
            return Err(Error::DuplicateDefine(name.to_string()));
        }
        Ok(())
    }

    fn resolve(&self, immediate: &Immediate) -> Result<i64, Error> {
        let mut current = immediate;
        // Defines may chain through other defines; labels terminate.
        for _ in 0..=self.defines.len() {
            match current {
                Immediate::Literal(value) => return Ok(*value),
                Immediate::Name(name) => {
                    if let Some(offset) = self.labels.get(name) {
                        return Ok(*offset);
                    }
                    match self.defines.get(name) {
                        Some(value) => current = value,
                        None => {
                            error!("undefined name {}", name);
                            return Err(Error::UndefinedName(name.clone()));
                        }
                    }
                }
            }
        }
        let Immediate::Name(name) = current else {
            unreachable!("literal immediates resolve immediately")
        };
        error!("definition cycle through {}", name);
        Err(Error::UndefinedName(name.clone()))
    }
}

fn input_mode(param: &InputParam) -> i64 {
    match param.value {
        InputValue::Address(_) => 0,
        InputValue::Immediate(_) => 1,
        InputValue::Relative(_) => 2,
    }
}

fn output_mode(param: &OutputParam) -> i64 {
    match param.value {
        OutputValue::Address(_) => 0,
        OutputValue::Relative(_) => 2,
    }
}

fn modes(instr: &Instr) -> i64 {
    match instr {
        Instr::Literal(_) | Instr::Halt => 0,
        Instr::Add(c) | Instr::Mul(c) | Instr::LessThan(c) | Instr::Equals(c) => {
            input_mode(&c.a) + 10 * input_mode(&c.b) + 100 * output_mode(&c.out)
        }
        Instr::Input(out) => output_mode(out),
        Instr::Output(x) => input_mode(x),
        Instr::JumpIfTrue(j) | Instr::JumpIfFalse(j) => {
            input_mode(&j.condition) + 10 * input_mode(&j.target)
        }
        Instr::AdjustRelativeBase(amount) => input_mode(amount),
    }
}

fn opcode(instr: &Instr) -> i64 {
    let code = match instr {
        Instr::Literal(value) => return *value,
        Instr::Add(_) => 1,
        Instr::Mul(_) => 2,
        Instr::Input(_) => 3,
        Instr::Output(_) => 4,
        Instr::JumpIfTrue(_) => 5,
        Instr::JumpIfFalse(_) => 6,
        Instr::LessThan(_) => 7,
        Instr::Equals(_) => 8,
        Instr::AdjustRelativeBase(_) => 9,
        Instr::Halt => 99,
    };
    100 * modes(instr) + code
}

fn encode_instr(env: &Env, instr: &Instr, output: &mut Vec<i64>) -> Result<(), Error> {
    output.push(opcode(instr));
    for param in instr.params() {
        output.push(env.resolve(param.immediate_value())?);
    }
    Ok(())
}

/// Assemble a statement sequence into the flat integer encoding.
pub fn encode(statements: &[Statement]) -> Result<Vec<i64>, Error> {
    let env = Env::build(statements)?;
    let mut output = Vec::new();
    for statement in statements {
        match statement {
            Statement::Label(_) => {}
            Statement::Instr(instr) => encode_instr(&env, instr, &mut output)?,
            Statement::Directive(Directive::Define(..)) => {}
            Statement::Directive(Directive::Int(value)) => output.push(env.resolve(value)?),
            Statement::Directive(Directive::Ascii(value)) => {
                output.extend(value.bytes().map(i64::from));
                output.push(0);
            }
        }
    }
    Ok(output)
}
