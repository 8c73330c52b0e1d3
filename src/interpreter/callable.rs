use std::{cell::RefCell, fmt::Display, rc::Rc};

use crate::ast::FunctionDecl;
use crate::error::RuntimeError;

use super::{environment::Environment, Interpreter, Interrupt, Value};

/// A user-declared function together with the environment it captured at
/// its declaration site.
#[derive(Clone)]
pub struct JmplFunction {
    pub declaration: FunctionDecl,
    pub closure: Rc<RefCell<Environment>>,
}

impl std::fmt::Debug for JmplFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JmplFunction")
            .field("declaration", &self.declaration.name.lexeme)
            .field("closure", &Rc::as_ptr(&self.closure))
            .finish()
    }
}

impl JmplFunction {
    fn call(&self, interpreter: &mut Interpreter, arguments: Vec<Value>) -> Result<Value, Interrupt> {
        // Invocations run against the closure, not the caller's environment
        let environment = Environment::with_enclosing(self.closure.clone());

        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            environment.borrow_mut().define(param, argument)?;
        }

        let body = std::slice::from_ref(self.declaration.body.as_ref());
        match interpreter.execute_block(body, environment) {
            // No return statement ran: the body's implicit value, if any
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(interrupt) => Err(interrupt),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Function(JmplFunction),
    Native(fn(&[Value]) -> Result<Value, RuntimeError>, usize),
}

impl Callable {
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, Interrupt> {
        match self {
            Callable::Function(function) => function.call(interpreter, arguments),
            Callable::Native(function, _) => Ok(function(&arguments)?),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(function) => function.declaration.params.len(),
            Callable::Native(_, arity) => *arity,
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Function(function) => {
                write!(f, "<fn {}>", function.declaration.name.lexeme)
            }
            Callable::Native(..) => write!(f, "<native fn>"),
        }
    }
}
