//! The source-language abstract syntax tree, plus the rewrites that
//! express the derived operators in terms of the primitive ones.

use std::path::{Path, PathBuf};

/// A literal value: an integer word or a string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

/// The operators that lower to a single three-operand instruction
/// (subtraction lowers through a multiply by `-1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    LessThan,
    Equals,
}

/// An expression tree. Children are boxed to keep the variants
/// size-bounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Call(Call),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// One fresh word of program input.
    Input,
    /// Dereference: the value of the cell the operand addresses.
    Read(Box<Expr>),
}

/// A function call, usable as an expression or a statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub function: Box<Expr>,
    pub arguments: Vec<Expr>,
}

impl Expr {
    pub fn literal(value: i64) -> Expr {
        Expr::Literal(Literal::Int(value))
    }

    pub fn name(name: impl Into<String>) -> Expr {
        Expr::Name(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn read(address: Expr) -> Expr {
        Expr::Read(Box::new(address))
    }

    /// Only names and dereferences denote assignable locations.
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Name(_) | Expr::Read(_))
    }
}

/// `!x` is `x == 0`.
pub fn logical_not(x: Expr) -> Expr {
    Expr::binary(BinaryOp::Equals, x, Expr::literal(0))
}

/// `a > b` is `b < a`.
pub fn greater_than(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::LessThan, right, left)
}

/// `a <= b` is `!(b < a)`.
pub fn less_or_equal(left: Expr, right: Expr) -> Expr {
    logical_not(greater_than(left, right))
}

/// `a >= b` is `!(a < b)`.
pub fn greater_or_equal(left: Expr, right: Expr) -> Expr {
    logical_not(Expr::binary(BinaryOp::LessThan, left, right))
}

/// `a != b` is `!(a == b)`.
pub fn not_equals(left: Expr, right: Expr) -> Expr {
    logical_not(Expr::binary(BinaryOp::Equals, left, right))
}

/// A statement inside a function body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    Constant(Constant),
    Call(Call),
    DeclareScalar(String),
    DeclareArray(DeclareArray),
    Assign { target: Expr, value: Expr },
    AddAssign { target: Expr, value: Expr },
    If(If),
    While(While),
    Output(Expr),
    Return(Expr),
    Break,
    Continue,
    Halt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constant {
    pub name: String,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclareArray {
    pub name: String,
    pub size: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct If {
    pub condition: Expr,
    pub then_branch: Vec<Stmt>,
    pub else_branch: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct While {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

/// A module-level declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decl {
    Constant(Constant),
    DeclareScalar(String),
    DeclareArray(DeclareArray),
    Function(Function),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Vec<Stmt>,
}

/// An `import a.b;` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub parts: Vec<String>,
}

impl Import {
    /// `import a.b;` in `<dir>/m.is` references `<dir>/a/b.is`.
    pub fn resolve(&self, dir: &Path) -> PathBuf {
        let mut path = dir.to_path_buf();
        for part in &self.parts {
            path.push(part);
        }
        path.set_extension("is");
        path
    }
}

/// One source file: its imports and its declarations, named by the
/// path it was loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    pub name: PathBuf,
    pub imports: Vec<Import>,
    pub body: Vec<Decl>,
}

impl Module {
    /// The directory imports are resolved against.
    pub fn dir(&self) -> &Path {
        self.name.parent().unwrap_or_else(|| Path::new(""))
    }
}
