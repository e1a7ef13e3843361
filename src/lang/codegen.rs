//! Code generation: lowering modules to assembly.
//!
//! The target machine has no call instruction, no return instruction,
//! no stack, and no register file, so every convention is synthesised
//! out of arithmetic on named cells:
//!
//! - Every local, parameter, callee return-address slot, and
//!   compiler temporary is a named, statically allocated cell.
//! - A call writes the arguments into the callee's parameter cells
//!   (through the relative base), stores the return address and the
//!   result destination in two dedicated cells next to them, and
//!   jumps; a return writes through the stored destination pointer
//!   and jumps through the stored return address.
//! - Expression temporaries are fabricated in place: each producing
//!   instruction writes into the cell of the operand that will
//!   consume the value, addressed by a freshly minted binding label.
//!
//! Generation walks modules in dependency order, sharing one
//! [`Context`] that owns the output streams and the per-stem label
//! counters.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use log::{debug, trace};

use crate::asm::{
    Calculation, Directive, Immediate, InputParam, Instr, Jump, OutputParam, OutputValue,
    Statement,
};

use super::{BinaryOp, Call, Decl, Expr, Function, Literal, Module, Stmt};

/// An error generated while lowering source to assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Two global definitions (imports included) share a name.
    DuplicateGlobal(String),
    /// Two definitions share a name within one function scope.
    DuplicateLocal { name: String, function: String },
    /// A name was referenced but is not in scope.
    NotFound { name: String, function: String },
    /// A constant was used where an assignable location is required.
    ConstantLvalue { name: String, function: String },
    /// An expression that must be compile-time constant is not.
    NotConstant,
    /// An array was declared with a non-constant size.
    NonConstantArraySize(String),
    /// An expression with no address was used as an assignment target.
    NotLvalue { function: String },
    /// `break` outside of a loop.
    IllegalBreak { function: String },
    /// `continue` outside of a loop.
    IllegalContinue { function: String },
    /// `+=` applied through a pointer dereference.
    AddAssignThroughPointer { function: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DuplicateGlobal(name) => {
                write!(f, "Multiple definitions for {:?} at global scope.", name)
            }
            Error::DuplicateLocal { name, function } => write!(
                f,
                "Multiple definitions for {:?} in function {:?}.",
                name, function
            ),
            Error::NotFound { name, function } => {
                write!(f, "{:?} not found in function {:?}.", name, function)
            }
            Error::ConstantLvalue { name, function } => write!(
                f,
                "Cannot use constant {:?} as an lvalue in function {:?}.",
                name, function
            ),
            Error::NotConstant => write!(f, "Expression is not a constant expression."),
            Error::NonConstantArraySize(name) => write!(
                f,
                "Size of array {:?} is not a compile-time constant.",
                name
            ),
            Error::NotLvalue { function } => write!(
                f,
                "Cannot use expression as lvalue in function {:?}.",
                function
            ),
            Error::IllegalBreak { function } => {
                write!(f, "Illegal break statement in function {:?}.", function)
            }
            Error::IllegalContinue { function } => {
                write!(f, "Illegal continue statement in function {:?}.", function)
            }
            Error::AddAssignThroughPointer { function } => write!(
                f,
                "Cannot apply \"+=\" through a pointer in function {:?}.",
                function
            ),
        }
    }
}

impl std::error::Error for Error {}

/// The names a module makes visible to its importers.
#[derive(Clone, Debug, Default)]
pub struct ModuleExports {
    pub variables: BTreeSet<String>,
    pub constants: BTreeMap<String, Immediate>,
}

/// Generate assembly for a loaded module set, walking modules in the
/// given dependency order.
pub fn generate(
    modules: &BTreeMap<PathBuf, Module>,
    order: &[PathBuf],
) -> Result<Vec<Statement>, Error> {
    let mut context = Context::new()?;
    for name in order {
        context.gen_module(&modules[name])?;
    }
    Ok(context.finish())
}

/// Global compilation state shared by every module: the output
/// streams, the per-stem label counters, and the accumulated module
/// exports.
struct Context {
    counters: HashMap<String, u32>,
    modules: BTreeMap<PathBuf, ModuleExports>,
    text: Vec<Statement>,
    rodata: Vec<Statement>,
    data: Vec<Statement>,
}

impl Context {
    /// A fresh context whose text stream begins with the synthesised
    /// entry point: a call to `main`, then `halt`.
    fn new() -> Result<Self, Error> {
        let mut context = Context {
            counters: HashMap::new(),
            modules: BTreeMap::new(),
            text: Vec::new(),
            rodata: Vec::new(),
            data: Vec::new(),
        };
        let scope = ModuleScope::default();
        let mut start = FunctionContext::new(&mut context, &scope, "_start");
        start.scope[0]
            .constants
            .insert("main".to_string(), Immediate::Name("func_main".to_string()));
        start.gen_stmt(&Stmt::Call(Call {
            function: Box::new(Expr::name("main")),
            arguments: Vec::new(),
        }))?;
        context.text.push(Instr::Halt.into());
        Ok(context)
    }

    /// Mint a unique label from a short stem.
    fn label(&mut self, stem: &str) -> String {
        let counter = self.counters.entry(stem.to_string()).or_insert(0);
        let label = format!("{}{}", stem, counter);
        *counter += 1;
        label
    }

    /// Place a string in the read-only data section and return a
    /// pointer to its first byte.
    fn make_string(&mut self, value: String) -> Immediate {
        let address = self.label("string");
        self.rodata.push(Statement::Label(address.clone()));
        self.rodata.push(Directive::Ascii(value).into());
        Immediate::Name(address)
    }

    /// Text, then read-only data, then writable data, then the
    /// `heapstart` sentinel.
    fn finish(mut self) -> Vec<Statement> {
        let mut output = self.text;
        output.append(&mut self.rodata);
        output.append(&mut self.data);
        output.push(Statement::Label("heapstart".to_string()));
        output
    }

    fn gen_module(&mut self, module: &Module) -> Result<(), Error> {
        debug!("generating module {}", module.name.display());
        let mut scope = ModuleScope::for_module(self, module);
        for decl in &module.body {
            self.gen_decl(&mut scope, decl)?;
        }
        self.modules.insert(
            module.name.clone(),
            ModuleExports {
                variables: scope.variables,
                constants: scope.constants,
            },
        );
        Ok(())
    }

    fn gen_decl(&mut self, scope: &mut ModuleScope, decl: &Decl) -> Result<(), Error> {
        match decl {
            Decl::Constant(c) => {
                if scope.has_global(&c.name) {
                    return Err(Error::DuplicateGlobal(c.name.clone()));
                }
                let value = self.eval_module_expr(scope, &c.value)?;
                scope.constants.insert(c.name.clone(), value);
            }
            Decl::DeclareScalar(name) => {
                if scope.has_global(name) {
                    return Err(Error::DuplicateGlobal(name.clone()));
                }
                self.data.push(Statement::Label(format!("gv_{}", name)));
                self.data.push(Directive::Int(Immediate::Literal(0)).into());
                scope.variables.insert(name.clone());
            }
            Decl::DeclareArray(d) => {
                if scope.has_global(&d.name) {
                    return Err(Error::DuplicateGlobal(d.name.clone()));
                }
                let Immediate::Literal(size) = self.eval_module_expr(scope, &d.size)? else {
                    return Err(Error::NonConstantArraySize(d.name.clone()));
                };
                self.data.push(Statement::Label(format!("gv_{}", d.name)));
                for _ in 0..size {
                    self.data.push(Directive::Int(Immediate::Literal(0)).into());
                }
                scope
                    .constants
                    .insert(d.name.clone(), Immediate::Name(format!("gv_{}", d.name)));
            }
            Decl::Function(function) => self.gen_function(scope, function)?,
        }
        Ok(())
    }

    fn gen_function(&mut self, scope: &mut ModuleScope, function: &Function) -> Result<(), Error> {
        if scope.has_global(&function.name) {
            return Err(Error::DuplicateGlobal(function.name.clone()));
        }
        debug!("generating function {}", function.name);
        // The parameter block, the result-destination cell, and the
        // return-address cell sit immediately before the entry point;
        // calls locate them by subtracting from the callee's address.
        let mut f = FunctionContext::new(self, scope, &function.name);
        for parameter in &function.parameters {
            f.arguments.insert(parameter.clone());
            f.ctx
                .text
                .push(Statement::Label(format!("arg_{}_{}", function.name, parameter)));
            f.ctx.text.push(Directive::Int(Immediate::Literal(0)).into());
        }
        for suffix in ["output", "return"] {
            f.ctx
                .text
                .push(Statement::Label(format!("func_{}_{}", function.name, suffix)));
            f.ctx.text.push(Directive::Int(Immediate::Literal(0)).into());
        }
        f.ctx
            .text
            .push(Statement::Label(format!("func_{}", function.name)));
        f.gen_stmts(&function.body)?;
        f.gen_stmt(&Stmt::Return(Expr::literal(0)))?;
        let max_size = f.max_size;
        scope.constants.insert(
            function.name.clone(),
            Immediate::Name(format!("func_{}", function.name)),
        );
        for slot in 0..max_size {
            self.data
                .push(Statement::Label(format!("lv_{}_{}", function.name, slot)));
            self.data.push(Directive::Int(Immediate::Literal(0)).into());
        }
        Ok(())
    }

    /// Fold a constant expression at module scope.
    fn eval_module_expr(&mut self, scope: &ModuleScope, e: &Expr) -> Result<Immediate, Error> {
        match e {
            Expr::Literal(Literal::Int(value)) => Ok(Immediate::Literal(*value)),
            Expr::Literal(Literal::Str(value)) => Ok(self.make_string(value.clone())),
            Expr::Name(name) => scope
                .constants
                .get(name)
                .or_else(|| scope.imported_constants.get(name))
                .cloned()
                .ok_or(Error::NotConstant),
            Expr::Binary(op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul), left, right) => {
                let left = self.eval_module_expr(scope, left)?;
                let right = self.eval_module_expr(scope, right)?;
                fold(*op, left, right)
            }
            _ => Err(Error::NotConstant),
        }
    }
}

fn fold(op: BinaryOp, left: Immediate, right: Immediate) -> Result<Immediate, Error> {
    let (Immediate::Literal(x), Immediate::Literal(y)) = (left, right) else {
        return Err(Error::NotConstant);
    };
    let value = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::LessThan | BinaryOp::Equals => return Err(Error::NotConstant),
    };
    Ok(Immediate::Literal(value))
}

/// Name visibility while generating one module: imports unioned from
/// the module's dependencies, plus its own accumulating declarations.
struct ModuleScope {
    imported_variables: BTreeSet<String>,
    imported_constants: BTreeMap<String, Immediate>,
    variables: BTreeSet<String>,
    constants: BTreeMap<String, Immediate>,
}

impl Default for ModuleScope {
    fn default() -> Self {
        // Every module can refer to the sentinel label placed after
        // all data.
        let heapstart = (
            "heapstart".to_string(),
            Immediate::Name("heapstart".to_string()),
        );
        ModuleScope {
            imported_variables: BTreeSet::new(),
            imported_constants: BTreeMap::from([heapstart]),
            variables: BTreeSet::new(),
            constants: BTreeMap::new(),
        }
    }
}

impl ModuleScope {
    fn for_module(context: &Context, module: &Module) -> Self {
        let mut scope = ModuleScope::default();
        for import in &module.imports {
            let path = import.resolve(module.dir());
            let exports = context
                .modules
                .get(&path)
                .expect("imports are generated before their importers");
            scope
                .imported_variables
                .extend(exports.variables.iter().cloned());
            scope.imported_constants.extend(
                exports
                    .constants
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }
        scope
    }

    fn has_global(&self, name: &str) -> bool {
        self.imported_variables.contains(name)
            || self.imported_constants.contains_key(name)
            || self.variables.contains(name)
            || self.constants.contains_key(name)
    }
}

/// What a name denotes inside a function, in lookup order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NameKind {
    LocalVariable,
    LocalConstant,
    Argument,
    GlobalVariable,
    GlobalConstant,
}

/// One lexical scope: its slot base is the cumulative local count of
/// the enclosing scopes, so sibling scopes reuse slots.
#[derive(Default)]
struct Environment {
    size: i64,
    variables: BTreeMap<String, i64>,
    constants: BTreeMap<String, Immediate>,
    break_label: Option<String>,
    continue_label: Option<String>,
}

struct FunctionContext<'a> {
    ctx: &'a mut Context,
    module: &'a ModuleScope,
    name: String,
    arguments: BTreeSet<String>,
    scope: Vec<Environment>,
    /// The largest total local-cell footprint reached on any path;
    /// this many zeroed cells back the function's locals.
    max_size: i64,
}

impl<'a> FunctionContext<'a> {
    fn new(ctx: &'a mut Context, module: &'a ModuleScope, name: &str) -> Self {
        FunctionContext {
            ctx,
            module,
            name: name.to_string(),
            arguments: BTreeSet::new(),
            scope: vec![Environment::default()],
            max_size: 0,
        }
    }

    fn emit(&mut self, instr: Instr) {
        self.ctx.text.push(instr.into());
    }

    fn emit_label(&mut self, label: String) {
        self.ctx.text.push(Statement::Label(label));
    }

    fn current(&mut self) -> &mut Environment {
        self.scope.last_mut().expect("the scope stack is never empty")
    }

    fn lookup(&self, name: &str) -> Option<NameKind> {
        for environment in self.scope.iter().rev() {
            if environment.variables.contains_key(name) {
                return Some(NameKind::LocalVariable);
            }
            if environment.constants.contains_key(name) {
                return Some(NameKind::LocalConstant);
            }
        }
        if self.arguments.contains(name) {
            return Some(NameKind::Argument);
        }
        if self.module.variables.contains(name) {
            return Some(NameKind::GlobalVariable);
        }
        if self.module.constants.contains_key(name) {
            return Some(NameKind::GlobalConstant);
        }
        if self.module.imported_variables.contains(name) {
            return Some(NameKind::GlobalVariable);
        }
        if self.module.imported_constants.contains_key(name) {
            return Some(NameKind::GlobalConstant);
        }
        None
    }

    fn has_local(&self, name: &str) -> bool {
        matches!(
            self.lookup(name),
            Some(NameKind::LocalVariable | NameKind::LocalConstant)
        )
    }

    /// The cell backing a local variable's slot.
    fn local_slot(&self, name: &str) -> OutputParam {
        for environment in self.scope.iter().rev() {
            if let Some(slot) = environment.variables.get(name) {
                return OutputParam::address_of(format!("lv_{}_{}", self.name, slot));
            }
        }
        unreachable!("lookup classified {:?} as a local variable", name)
    }

    /// The bound value of a constant visible from here.
    fn constant(&self, name: &str) -> Option<Immediate> {
        for environment in self.scope.iter().rev() {
            if let Some(value) = environment.constants.get(name) {
                return Some(value.clone());
            }
        }
        self.module
            .constants
            .get(name)
            .or_else(|| self.module.imported_constants.get(name))
            .cloned()
    }

    fn define_scalar(&mut self, name: &str) {
        let current = self.current();
        current.variables.insert(name.to_string(), current.size);
        current.size += 1;
        let size = current.size;
        self.max_size = self.max_size.max(size);
    }

    fn define_array(&mut self, name: &str, size: i64) {
        let label = format!(
            "lv_{}_{}",
            self.name,
            self.scope.last().expect("the scope stack is never empty").size
        );
        let current = self.current();
        current
            .constants
            .insert(name.to_string(), Immediate::Name(label));
        current.size += size;
        let size = current.size;
        self.max_size = self.max_size.max(size);
    }

    fn push_scope(&mut self) {
        let current = self.scope.last().expect("the scope stack is never empty");
        self.scope.push(Environment {
            size: current.size,
            variables: BTreeMap::new(),
            constants: BTreeMap::new(),
            break_label: current.break_label.clone(),
            continue_label: current.continue_label.clone(),
        });
    }

    fn pop_scope(&mut self) {
        self.scope.pop();
    }

    /// Fold a constant expression using the scopes visible here.
    fn eval_expr(&mut self, e: &Expr) -> Result<Immediate, Error> {
        match e {
            Expr::Literal(Literal::Int(value)) => Ok(Immediate::Literal(*value)),
            Expr::Literal(Literal::Str(value)) => Ok(self.ctx.make_string(value.clone())),
            Expr::Name(name) => self.constant(name).ok_or(Error::NotConstant),
            Expr::Binary(op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul), left, right) => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                fold(*op, left, right)
            }
            _ => Err(Error::NotConstant),
        }
    }

    /// Lower an expression, returning the operand that will carry its
    /// value into the consuming instruction.
    fn gen_expr(&mut self, e: &Expr) -> Result<InputParam, Error> {
        match e {
            Expr::Literal(Literal::Int(value)) => Ok(InputParam::literal(*value)),
            Expr::Literal(Literal::Str(value)) => {
                let address = self.ctx.make_string(value.clone());
                Ok(InputParam::immediate(address))
            }
            Expr::Name(name) => self.gen_name(name),
            Expr::Call(call) => self.gen_call(call),
            Expr::Binary(op, left, right) => self.gen_binary(*op, left, right),
            Expr::And(left, right) => self.gen_and(left, right),
            Expr::Or(left, right) => self.gen_or(left, right),
            Expr::Input => {
                let result = self.ctx.label("input");
                self.emit(Instr::Input(OutputParam::address_of(result.clone())));
                Ok(InputParam::bound(result))
            }
            Expr::Read(address) => Ok(self.gen_read(address)?.into()),
        }
    }

    fn gen_name(&mut self, name: &str) -> Result<InputParam, Error> {
        match self.lookup(name) {
            None => Err(Error::NotFound {
                name: name.to_string(),
                function: self.name.clone(),
            }),
            Some(NameKind::LocalConstant | NameKind::GlobalConstant) => {
                let value = self.constant(name).expect("lookup found a constant");
                Ok(InputParam::immediate(value))
            }
            Some(NameKind::GlobalVariable) => Ok(InputParam::address(
                Immediate::Name(format!("gv_{}", name)),
            )),
            Some(NameKind::Argument) => Ok(InputParam::address(Immediate::Name(format!(
                "arg_{}_{}",
                self.name, name
            )))),
            Some(NameKind::LocalVariable) => Ok(self.local_slot(name).into()),
        }
    }

    fn gen_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<InputParam, Error> {
        if op == BinaryOp::Sub {
            // a - b computes as a + b * -1.
            let a = self.gen_expr(left)?;
            let b = self.gen_expr(right)?;
            let negated = self.ctx.label("mul");
            self.emit(Instr::Mul(Calculation {
                a: b,
                b: InputParam::literal(-1),
                out: OutputParam::address_of(negated.clone()),
            }));
            let result = self.ctx.label("add");
            self.emit(Instr::Add(Calculation {
                a,
                b: InputParam::bound(negated),
                out: OutputParam::address_of(result.clone()),
            }));
            return Ok(InputParam::bound(result));
        }
        let a = self.gen_expr(left)?;
        let b = self.gen_expr(right)?;
        let (stem, build): (&str, fn(Calculation) -> Instr) = match op {
            BinaryOp::Add => ("add", Instr::Add),
            BinaryOp::Mul => ("mul", Instr::Mul),
            BinaryOp::LessThan => ("lt", Instr::LessThan),
            BinaryOp::Equals => ("eq", Instr::Equals),
            BinaryOp::Sub => unreachable!("handled above"),
        };
        let result = self.ctx.label(stem);
        self.emit(build(Calculation {
            a,
            b,
            out: OutputParam::address_of(result.clone()),
        }));
        Ok(InputParam::bound(result))
    }

    fn gen_and(&mut self, left: &Expr, right: &Expr) -> Result<InputParam, Error> {
        let result = self.ctx.label("and");
        let short_circuit = self.ctx.label("andfalse");
        let end = self.ctx.label("andend");
        // The result cell starts out true.
        self.emit(Instr::Add(Calculation {
            a: InputParam::literal(0),
            b: InputParam::literal(1),
            out: OutputParam::address_of(result.clone()),
        }));
        let l = self.gen_expr(left)?;
        self.emit(Instr::JumpIfFalse(Jump {
            condition: l,
            target: InputParam::name(short_circuit.clone()),
        }));
        let r = self.gen_expr(right)?;
        self.emit(Instr::JumpIfTrue(Jump {
            condition: r,
            target: InputParam::name(end.clone()),
        }));
        self.emit_label(short_circuit);
        self.emit(Instr::Add(Calculation {
            a: InputParam::literal(0),
            b: InputParam::literal(0),
            out: OutputParam::address_of(result.clone()),
        }));
        self.emit_label(end);
        Ok(InputParam::bound(result))
    }

    fn gen_or(&mut self, left: &Expr, right: &Expr) -> Result<InputParam, Error> {
        let result = self.ctx.label("or");
        let short_circuit = self.ctx.label("ortrue");
        let end = self.ctx.label("orend");
        // The result cell starts out false.
        self.emit(Instr::Add(Calculation {
            a: InputParam::literal(0),
            b: InputParam::literal(0),
            out: OutputParam::address_of(result.clone()),
        }));
        let l = self.gen_expr(left)?;
        self.emit(Instr::JumpIfTrue(Jump {
            condition: l,
            target: InputParam::name(short_circuit.clone()),
        }));
        let r = self.gen_expr(right)?;
        self.emit(Instr::JumpIfFalse(Jump {
            condition: r,
            target: InputParam::name(end.clone()),
        }));
        self.emit_label(short_circuit);
        self.emit(Instr::Add(Calculation {
            a: InputParam::literal(0),
            b: InputParam::literal(1),
            out: OutputParam::address_of(result.clone()),
        }));
        self.emit_label(end);
        Ok(InputParam::bound(result))
    }

    /// Lower a dereference into a self-modifying address operand: the
    /// pointer value is stored into the cell of the operand that will
    /// perform the access.
    fn gen_read(&mut self, address: &Expr) -> Result<OutputParam, Error> {
        let value = self.gen_expr(address)?;
        let label = self.ctx.label("read");
        self.emit(Instr::Add(Calculation {
            a: InputParam::literal(0),
            b: value,
            out: OutputParam::address_of(label.clone()),
        }));
        Ok(OutputParam {
            label: Some(label),
            value: OutputValue::Address(Immediate::Literal(0)),
        })
    }

    /// Lower an lvalue into the operand addressing its cell.
    fn gen_addr(&mut self, e: &Expr) -> Result<OutputParam, Error> {
        match e {
            Expr::Name(name) => match self.lookup(name) {
                None => Err(Error::NotFound {
                    name: name.to_string(),
                    function: self.name.clone(),
                }),
                Some(NameKind::LocalConstant | NameKind::GlobalConstant) => {
                    Err(Error::ConstantLvalue {
                        name: name.to_string(),
                        function: self.name.clone(),
                    })
                }
                Some(NameKind::GlobalVariable) => {
                    Ok(OutputParam::address_of(format!("gv_{}", name)))
                }
                Some(NameKind::Argument) => Ok(OutputParam::address_of(format!(
                    "arg_{}_{}",
                    self.name, name
                ))),
                Some(NameKind::LocalVariable) => Ok(self.local_slot(name)),
            },
            Expr::Read(address) => self.gen_read(address),
            _ => Err(Error::NotLvalue {
                function: self.name.clone(),
            }),
        }
    }

    /// Lower a call. The callee has no stack, so the arguments, the
    /// result destination, and the return address are written into
    /// the block of cells just before the callee's entry point,
    /// located through the relative base.
    fn gen_call(&mut self, call: &Call) -> Result<InputParam, Error> {
        let zero = InputParam::literal(0);
        let n = call.arguments.len() as i64;
        trace!("call with {} arguments in {}", n, self.name);
        // The callee's address must sit in an addressable cell.
        let mut callee = self.gen_expr(&call.function)?;
        if callee.label.is_none() {
            let out = self.ctx.label("callee");
            self.emit(Instr::Add(Calculation {
                a: zero.clone(),
                b: callee,
                out: OutputParam::address_of(out.clone()),
            }));
            callee = InputParam::bound(out);
        }
        let callee_label = callee.label.clone().expect("the callee operand is labelled");
        // Point the relative base at the callee's parameter block.
        let args = self.ctx.label("args");
        self.emit(Instr::Add(Calculation {
            a: InputParam::address(Immediate::Name(callee_label)),
            b: InputParam::literal(-(n + 2)),
            out: OutputParam::address_of(args.clone()),
        }));
        self.emit(Instr::AdjustRelativeBase(InputParam::bound(args.clone())));
        // Store the arguments.
        for (index, argument) in call.arguments.iter().enumerate() {
            let value = self.gen_expr(argument)?;
            self.emit(Instr::Add(Calculation {
                a: zero.clone(),
                b: value,
                out: OutputParam::relative(index as i64),
            }));
        }
        // Store the output address.
        let output_label = self.ctx.label("return");
        self.emit(Instr::Add(Calculation {
            a: zero.clone(),
            b: InputParam::name(output_label.clone()),
            out: OutputParam::relative(n),
        }));
        // Store the return address.
        let return_label = self.ctx.label("call");
        self.emit(Instr::Add(Calculation {
            a: zero.clone(),
            b: InputParam::name(return_label.clone()),
            out: OutputParam::relative(n + 1),
        }));
        // Revert the relative base.
        let revert = self.ctx.label("revertargs");
        self.emit(Instr::Mul(Calculation {
            a: InputParam::address(Immediate::Name(args)),
            b: InputParam::literal(-1),
            out: OutputParam::address_of(revert.clone()),
        }));
        self.emit(Instr::AdjustRelativeBase(InputParam::bound(revert)));
        // Jump into the callee.
        self.emit(Instr::JumpIfFalse(Jump {
            condition: zero,
            target: callee,
        }));
        self.emit_label(return_label);
        Ok(InputParam::bound(output_label))
    }

    fn gen_stmts(&mut self, statements: &[Stmt]) -> Result<(), Error> {
        self.push_scope();
        let result = statements.iter().try_for_each(|s| self.gen_stmt(s));
        self.pop_scope();
        result
    }

    fn gen_stmt(&mut self, statement: &Stmt) -> Result<(), Error> {
        match statement {
            Stmt::Constant(c) => {
                if self.has_local(&c.name) {
                    return Err(Error::DuplicateLocal {
                        name: c.name.clone(),
                        function: self.name.clone(),
                    });
                }
                let value = self.eval_expr(&c.value)?;
                self.current().constants.insert(c.name.clone(), value);
            }
            Stmt::Call(call) => {
                let value = self.gen_call(call)?;
                // Discard the result into the instruction's own
                // second-operand cell.
                let ignore = self.ctx.label("ignore");
                self.emit(Instr::Add(Calculation {
                    a: value,
                    b: InputParam::bound(ignore.clone()),
                    out: OutputParam::address_of(ignore),
                }));
            }
            Stmt::DeclareScalar(name) => {
                if self.has_local(name) {
                    return Err(Error::DuplicateLocal {
                        name: name.clone(),
                        function: self.name.clone(),
                    });
                }
                self.define_scalar(name);
            }
            Stmt::DeclareArray(d) => {
                if self.has_local(&d.name) {
                    return Err(Error::DuplicateLocal {
                        name: d.name.clone(),
                        function: self.name.clone(),
                    });
                }
                let Immediate::Literal(size) = self.eval_expr(&d.size)? else {
                    return Err(Error::NonConstantArraySize(d.name.clone()));
                };
                self.define_array(&d.name, size);
            }
            Stmt::Assign { target, value } => {
                let value = self.gen_expr(value)?;
                let address = self.gen_addr(target)?;
                self.emit(Instr::Add(Calculation {
                    a: InputParam::literal(0),
                    b: value,
                    out: address,
                }));
            }
            Stmt::AddAssign { target, value } => {
                let value = self.gen_expr(value)?;
                let address = self.gen_addr(target)?;
                if address.label.is_some() {
                    // A dereference target would need its pointer
                    // written into two operand cells; only named
                    // targets are accepted.
                    return Err(Error::AddAssignThroughPointer {
                        function: self.name.clone(),
                    });
                }
                let out = OutputParam {
                    label: None,
                    value: address.value.clone(),
                };
                self.emit(Instr::Add(Calculation {
                    a: address.into(),
                    b: value,
                    out,
                }));
            }
            Stmt::If(i) => {
                let condition = self.gen_expr(&i.condition)?;
                let end_if = self.ctx.label("endif");
                let else_branch = if i.else_branch.is_empty() {
                    end_if.clone()
                } else {
                    self.ctx.label("else")
                };
                self.emit(Instr::JumpIfFalse(Jump {
                    condition,
                    target: InputParam::name(else_branch.clone()),
                }));
                self.gen_stmts(&i.then_branch)?;
                if !i.else_branch.is_empty() {
                    self.emit(Instr::JumpIfFalse(Jump {
                        condition: InputParam::literal(0),
                        target: InputParam::name(end_if.clone()),
                    }));
                    self.emit_label(else_branch);
                    self.gen_stmts(&i.else_branch)?;
                }
                self.emit_label(end_if);
            }
            Stmt::While(w) => {
                self.push_scope();
                let while_start = self.ctx.label("whilestart");
                let while_cond = self.ctx.label("whilecond");
                let while_end = self.ctx.label("whileend");
                let current = self.current();
                current.break_label = Some(while_end.clone());
                current.continue_label = Some(while_cond.clone());
                self.emit(Instr::JumpIfFalse(Jump {
                    condition: InputParam::literal(0),
                    target: InputParam::name(while_cond.clone()),
                }));
                self.emit_label(while_start.clone());
                self.gen_stmts(&w.body)?;
                self.emit_label(while_cond);
                let condition = self.gen_expr(&w.condition)?;
                self.emit(Instr::JumpIfTrue(Jump {
                    condition,
                    target: InputParam::name(while_start),
                }));
                self.emit_label(while_end);
                self.pop_scope();
            }
            Stmt::Output(value) => {
                let value = self.gen_expr(value)?;
                self.emit(Instr::Output(value));
            }
            Stmt::Return(value) => {
                // Stash the caller's result address into the write
                // that follows the value computation.
                let output_label = self.ctx.label("output");
                self.emit(Instr::Add(Calculation {
                    a: InputParam::literal(0),
                    b: InputParam::address(Immediate::Name(format!("func_{}_output", self.name))),
                    out: OutputParam::address_of(output_label.clone()),
                }));
                let value = self.gen_expr(value)?;
                self.emit(Instr::Add(Calculation {
                    a: InputParam::literal(0),
                    b: value,
                    out: OutputParam {
                        label: Some(output_label),
                        value: OutputValue::Address(Immediate::Literal(0)),
                    },
                }));
                // Jump back through the stored return address.
                self.emit(Instr::JumpIfFalse(Jump {
                    condition: InputParam::literal(0),
                    target: InputParam::address(Immediate::Name(format!(
                        "func_{}_return",
                        self.name
                    ))),
                }));
            }
            Stmt::Break => {
                let Some(label) = self
                    .scope
                    .last()
                    .and_then(|environment| environment.break_label.clone())
                else {
                    return Err(Error::IllegalBreak {
                        function: self.name.clone(),
                    });
                };
                self.emit(Instr::JumpIfFalse(Jump {
                    condition: InputParam::literal(0),
                    target: InputParam::name(label),
                }));
            }
            Stmt::Continue => {
                let Some(label) = self
                    .scope
                    .last()
                    .and_then(|environment| environment.continue_label.clone())
                else {
                    return Err(Error::IllegalContinue {
                        function: self.name.clone(),
                    });
                };
                self.emit(Instr::JumpIfFalse(Jump {
                    condition: InputParam::literal(0),
                    target: InputParam::name(label),
                }));
            }
            Stmt::Halt => self.emit(Instr::Halt),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Constant, If};
    use super::*;

    fn single_module(body: Vec<Decl>) -> BTreeMap<PathBuf, Module> {
        let module = Module {
            name: PathBuf::from("main.is"),
            imports: Vec::new(),
            body,
        };
        BTreeMap::from([(PathBuf::from("main.is"), module)])
    }

    fn generate_single(body: Vec<Decl>) -> Result<Vec<Statement>, Error> {
        let modules = single_module(body);
        generate(&modules, &[PathBuf::from("main.is")])
    }

    fn main_function(body: Vec<Stmt>) -> Decl {
        Decl::Function(Function {
            name: "main".to_string(),
            parameters: Vec::new(),
            body,
        })
    }

    #[test]
    fn programs_end_with_the_heap_sentinel() {
        let statements = generate_single(vec![main_function(vec![])]).unwrap();
        assert_eq!(
            statements.last(),
            Some(&Statement::Label("heapstart".to_string()))
        );
    }

    #[test]
    fn unknown_names_are_reported_with_their_function() {
        let error = generate_single(vec![main_function(vec![Stmt::Output(Expr::name("x"))])])
            .unwrap_err();
        assert_eq!(
            error,
            Error::NotFound {
                name: "x".to_string(),
                function: "main".to_string(),
            }
        );
    }

    #[test]
    fn break_requires_a_loop() {
        let error = generate_single(vec![main_function(vec![Stmt::Break])]).unwrap_err();
        assert_eq!(
            error,
            Error::IllegalBreak {
                function: "main".to_string(),
            }
        );
    }

    #[test]
    fn constants_cannot_be_assigned() {
        let error = generate_single(vec![main_function(vec![
            Stmt::Constant(Constant {
                name: "k".to_string(),
                value: Expr::literal(3),
            }),
            Stmt::Assign {
                target: Expr::name("k"),
                value: Expr::literal(4),
            },
        ])])
        .unwrap_err();
        assert_eq!(
            error,
            Error::ConstantLvalue {
                name: "k".to_string(),
                function: "main".to_string(),
            }
        );
    }

    #[test]
    fn sibling_scopes_share_local_slots() {
        // Both branch-local variables land in the same slot, so one
        // backing cell suffices.
        let branch = |value: i64| {
            vec![
                Stmt::DeclareScalar("x".to_string()),
                Stmt::Assign {
                    target: Expr::name("x"),
                    value: Expr::literal(value),
                },
            ]
        };
        let statements = generate_single(vec![main_function(vec![Stmt::If(If {
            condition: Expr::literal(1),
            then_branch: branch(1),
            else_branch: branch(2),
        })])])
        .unwrap();
        let slots = statements
            .iter()
            .filter(|statement| {
                matches!(statement, Statement::Label(label) if label.starts_with("lv_main_"))
            })
            .count();
        assert_eq!(slots, 1);
    }
}
