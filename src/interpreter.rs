pub mod callable;
pub mod environment;

use std::{
    cell::RefCell,
    fmt::Display,
    io::Write,
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ast::{Expr, ExprId, Literal, Stmt};
use crate::error::{ErrorKind, RuntimeError};
use crate::token::{Token, TokenKind};

use self::callable::{Callable, JmplFunction};
use self::environment::Environment;

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Callable(Rc<Callable>),
}

impl Value {
    /// Anything other than null, false, 0 or the empty string is truthful.
    fn is_truthful(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Callable(_) => true,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Callable(callable) => write!(f, "{}", callable),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unwinding signal threaded through evaluation. `Return` is ordinary
/// control flow caught at the nearest function call boundary; it is never
/// surfaced as an error.
#[derive(Debug)]
pub enum Interrupt {
    Return(Value),
    Error(ExecutionError),
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Error(ExecutionError::Runtime(error))
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(error: std::io::Error) -> Self {
        Interrupt::Error(ExecutionError::Io(error))
    }
}

/// Tree-walking evaluator. One instance lives for a whole file run or REPL
/// session; the globals environment and the resolution side-table persist
/// across `interpret` calls.
pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: FxHashMap<ExprId, usize>,
    stdout: Rc<RefCell<dyn Write>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn Write>>) -> Self {
        let globals = Environment::global();

        // clock() - seconds since the Unix epoch
        globals.borrow_mut().define_native(
            "clock",
            Value::Callable(Rc::new(Callable::Native(
                |_| {
                    Ok(Value::Number(
                        SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap()
                            .as_secs_f64(),
                    ))
                },
                0,
            ))),
        );

        Self {
            environment: globals.clone(),
            globals,
            locals: FxHashMap::default(),
            stdout,
        }
    }

    /// Takes on the distances the resolver computed. Entries accumulate:
    /// closures built on earlier REPL lines keep resolving.
    pub fn resolve(&mut self, locals: FxHashMap<ExprId, usize>) {
        self.locals.extend(locals);
    }

    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), ExecutionError> {
        for statement in statements {
            match self.execute(statement) {
                Ok(()) => {}
                // The resolver rejects top-level returns before execution
                Err(Interrupt::Return(_)) => return Ok(()),
                Err(Interrupt::Error(error)) => return Err(error),
            }
        }

        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<(), Interrupt> {
        match statement {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }
            Stmt::Output(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.stdout.borrow_mut(), "{}", value)?;
            }
            Stmt::Let { name, initialiser } => {
                let value = match initialiser {
                    Some(initialiser) => self.evaluate(initialiser)?,
                    None => Value::Null,
                };
                self.environment.borrow_mut().define(name, value)?;
            }
            Stmt::Block(statements) => {
                let environment = Environment::with_enclosing(self.environment.clone());
                self.execute_block(statements, environment)?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthful() {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthful() {
                    self.execute(body)?;
                }
            }
            Stmt::Function(decl) => {
                let function = JmplFunction {
                    declaration: decl.clone(),
                    closure: self.environment.clone(),
                };
                self.environment
                    .borrow_mut()
                    .define(&decl.name, Value::Callable(Rc::new(Callable::Function(function))))?;
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.evaluate(value)?,
                    None => Value::Null,
                };
                return Err(Interrupt::Return(value));
            }
        }

        Ok(())
    }

    /// Runs `statements` in `environment`, restoring the previous
    /// environment on every exit path. The last statement of a block
    /// implicitly yields a value: an expression statement yields its
    /// expression, a nested block yields recursively, anything else yields
    /// nothing.
    pub(crate) fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> Result<Option<Value>, Interrupt> {
        let previous = std::mem::replace(&mut self.environment, environment);
        let result = self.run_block(statements);
        self.environment = previous;
        result
    }

    fn run_block(&mut self, statements: &[Stmt]) -> Result<Option<Value>, Interrupt> {
        let Some((last, rest)) = statements.split_last() else {
            return Ok(None);
        };

        for statement in rest {
            self.execute(statement)?;
        }

        match last {
            Stmt::Expression(expr) => Ok(Some(self.evaluate(expr)?)),
            Stmt::Block(statements) => {
                let environment = Environment::with_enclosing(self.environment.clone());
                self.execute_block(statements, environment)
            }
            other => {
                self.execute(other)?;
                Ok(None)
            }
        }
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Value, Interrupt> {
        match expression {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Null => Value::Null,
            }),
            Expr::Grouping(expr) => self.evaluate(expr),
            Expr::Variable { id, name } => Ok(self.look_up_variable(name, *id)?),
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(&distance) => {
                        Environment::assign_at(&self.environment, distance, name, value.clone());
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }

                Ok(value)
            }
            Expr::Unary { operator, right } => {
                let right = self.evaluate(right)?;

                match operator.kind {
                    TokenKind::Minus => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(RuntimeError::new(
                            operator.clone(),
                            ErrorKind::Type,
                            "Operands must be numbers",
                        )
                        .into()),
                    },
                    TokenKind::Not => Ok(Value::Boolean(!right.is_truthful())),
                    _ => Ok(Value::Null),
                }
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;

                // The deciding operand is returned as-is, not coerced
                if operator.kind == TokenKind::Or {
                    if left.is_truthful() {
                        return Ok(left);
                    }
                } else if !left.is_truthful() {
                    return Ok(left);
                }

                self.evaluate(right)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(operator, left, right)
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut evaluated = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated.push(self.evaluate(argument)?);
                }

                let Value::Callable(callable) = callee else {
                    return Err(RuntimeError::new(
                        paren.clone(),
                        ErrorKind::Syntax,
                        "Only functions can be called",
                    )
                    .into());
                };

                if evaluated.len() != callable.arity() {
                    return Err(RuntimeError::new(
                        paren.clone(),
                        ErrorKind::Argument,
                        format!(
                            "Expected {} arguments but got {}",
                            callable.arity(),
                            evaluated.len()
                        ),
                    )
                    .into());
                }

                callable.call(self, evaluated)
            }
            Expr::SequenceOp {
                name,
                upper,
                lower,
                summand,
            } => self.summation(name, upper, lower, summand),
        }
    }

    fn binary(&mut self, operator: &Token, left: Value, right: Value) -> Result<Value, Interrupt> {
        match operator.kind {
            TokenKind::Greater => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a > b))
            }
            TokenKind::GreaterEqual => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a >= b))
            }
            TokenKind::Less => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a < b))
            }
            TokenKind::LessEqual => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a <= b))
            }
            TokenKind::Minus => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Number(a - b))
            }
            TokenKind::Plus => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                // Either side a string: stringify both and concatenate
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::String(format!("{}{}", left, right)))
                }
                _ => Err(RuntimeError::new(
                    operator.clone(),
                    ErrorKind::Type,
                    "Invalid operand type(s)",
                )
                .into()),
            },
            TokenKind::Asterisk => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Number(a * b))
            }
            TokenKind::Slash => {
                // The zero check comes before the operand type check
                if matches!(right, Value::Number(n) if n == 0.0) {
                    return Err(RuntimeError::new(
                        operator.clone(),
                        ErrorKind::ZeroDivision,
                        "Division by 0",
                    )
                    .into());
                }

                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Number(a / b))
            }
            TokenKind::Caret => {
                let (a, b) = check_number_operands(operator, &left, &right)?;
                Ok(Value::Number(a.powf(b)))
            }
            TokenKind::NotEqual => Ok(Value::Boolean(!is_equal(&left, &right))),
            TokenKind::EqualEqual => Ok(Value::Boolean(is_equal(&left, &right))),
            _ => Ok(Value::Null),
        }
    }

    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value, RuntimeError> {
        match self.locals.get(&id) {
            Some(&distance) => Environment::get_at(&self.environment, distance, name),
            None => self.globals.borrow().get(name),
        }
    }

    /// The summation operator: sums (or concatenates) the summand as the
    /// loop variable steps from the lower bound to the upper bound
    /// inclusive.
    fn summation(
        &mut self,
        name: &Token,
        upper: &Expr,
        lower: &Stmt,
        summand: &Expr,
    ) -> Result<Value, Interrupt> {
        let previous = self.environment.clone();
        let result = self.run_summation(name, upper, lower, summand);
        self.environment = previous;
        result
    }

    fn run_summation(
        &mut self,
        name: &Token,
        upper: &Expr,
        lower: &Stmt,
        summand: &Expr,
    ) -> Result<Value, Interrupt> {
        let upper = self.evaluate(upper)?;

        let (lower_var, lower) = match lower {
            // A declared lower bound gets a summation-local scope
            Stmt::Let {
                name: var,
                initialiser,
            } => {
                self.environment = Environment::with_enclosing(self.environment.clone());
                let value = match initialiser {
                    Some(initialiser) => self.evaluate(initialiser)?,
                    None => Value::Null,
                };
                self.environment.borrow_mut().define(var, value.clone())?;
                (var.clone(), value)
            }
            // An assignment targets an existing binding in the caller's
            // environment chain
            Stmt::Expression(expr) => match expr {
                Expr::Assign { name: var, .. } => {
                    let value = self.evaluate(expr)?;
                    (var.clone(), value)
                }
                _ => return Err(invalid_lower_bound(name)),
            },
            _ => return Err(invalid_lower_bound(name)),
        };

        let mut summand_value = self.evaluate(summand)?;

        let upper = integral_bound(name, &upper, "Upper bound must be an integer")?;
        let mut lower = integral_bound(name, &lower, "Lower bound must be an integer")?;

        if !matches!(summand_value, Value::Number(_) | Value::String(_)) {
            return Err(summand_type_error(name));
        }
        if lower > upper {
            return Err(RuntimeError::new(
                name.clone(),
                ErrorKind::Syntax,
                "Lower bound must be less than or equal to the upper bound",
            )
            .into());
        }

        match summand_value {
            Value::Number(_) => {
                let mut sum = 0.0;
                while lower <= upper {
                    let Value::Number(n) = summand_value else {
                        return Err(summand_type_error(name));
                    };
                    sum += n;

                    lower = self.step_loop_variable(name, &lower_var)?;
                    summand_value = self.evaluate(summand)?;
                }
                Ok(Value::Number(sum))
            }
            _ => {
                let mut sum = String::new();
                while lower <= upper {
                    sum.push_str(&summand_value.to_string());

                    lower = self.step_loop_variable(name, &lower_var)?;
                    summand_value = self.evaluate(summand)?;
                }
                Ok(Value::String(sum))
            }
        }
    }

    /// Increments the loop variable by 1 in whichever scope holds it and
    /// returns its new value.
    fn step_loop_variable(&mut self, name: &Token, lower_var: &Token) -> Result<f64, Interrupt> {
        let current = self.environment.borrow().get(lower_var)?;
        let Value::Number(current) = current else {
            return Err(RuntimeError::new(
                name.clone(),
                ErrorKind::Syntax,
                "Lower bound must be an integer",
            )
            .into());
        };

        let next = current + 1.0;
        self.environment
            .borrow_mut()
            .assign(lower_var, Value::Number(next))?;
        Ok(next)
    }
}

fn check_number_operands(
    operator: &Token,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeError::new(
            operator.clone(),
            ErrorKind::Type,
            "Operands must be numbers",
        )),
    }
}

fn is_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        // NaN compares equal to itself
        (Value::Number(a), Value::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn integral_bound(name: &Token, value: &Value, message: &str) -> Result<f64, RuntimeError> {
    match value {
        Value::Number(n) if n.floor() == *n => Ok(*n),
        _ => Err(RuntimeError::new(name.clone(), ErrorKind::Syntax, message)),
    }
}

fn invalid_lower_bound(name: &Token) -> Interrupt {
    RuntimeError::new(
        name.clone(),
        ErrorKind::Syntax,
        "Lower bound must be declaration or assignment",
    )
    .into()
}

fn summand_type_error(name: &Token) -> Interrupt {
    RuntimeError::new(
        name.clone(),
        ErrorKind::Syntax,
        "Summand must be a number or a string",
    )
    .into()
}
