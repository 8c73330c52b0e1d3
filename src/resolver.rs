use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::error::{ErrorKind, StaticError};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
}

/// Static pass that maps every local variable reference to the number of
/// scopes between it and its binding. References it leaves out resolve
/// against the globals environment at runtime.
pub struct Resolver {
    /// Innermost scope last; the flag marks a name as ready (its
    /// initialiser finished resolving).
    scopes: Vec<HashMap<String, bool>>,
    locals: FxHashMap<ExprId, usize>,
    errors: Vec<StaticError>,
    current_function: FunctionType,
}

/// Convenience entry point used by the driver and tests.
pub fn resolve(statements: &[Stmt]) -> (FxHashMap<ExprId, usize>, Vec<StaticError>) {
    Resolver::new().resolve(statements)
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            locals: FxHashMap::default(),
            errors: Vec::new(),
            current_function: FunctionType::None,
        }
    }

    pub fn resolve(mut self, statements: &[Stmt]) -> (FxHashMap<ExprId, usize>, Vec<StaticError>) {
        self.resolve_statements(statements);
        (self.locals, self.errors)
    }

    fn resolve_statements(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_statement(statement);
        }
    }

    fn resolve_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_statements(statements);
                self.end_scope();
            }
            Stmt::Expression(expr) => self.resolve_expression(expr),
            Stmt::Function(decl) => {
                self.declare(&decl.name);
                self.define(&decl.name);
                self.resolve_function(decl);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch);
                }
            }
            Stmt::Output(expr) => self.resolve_expression(expr),
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, ErrorKind::Return, "Can't return from top-level code");
                }

                if let Some(value) = value {
                    self.resolve_expression(value);
                }
            }
            Stmt::Let { name, initialiser } => {
                self.declare(name);
                if let Some(initialiser) = initialiser {
                    self.resolve_expression(initialiser);
                }
                self.define(name);
            }
            Stmt::While { condition, body } => {
                self.resolve_expression(condition);
                self.resolve_statement(body);
            }
        }
    }

    fn resolve_expression(&mut self, expression: &Expr) {
        match expression {
            Expr::Variable { id, name } => {
                // A variable is not allowed to appear in its own initialiser
                if self
                    .scopes
                    .last()
                    .is_some_and(|scope| scope.get(&name.lexeme) == Some(&false))
                {
                    self.error(
                        name,
                        ErrorKind::Variable,
                        "Can't read local variable in its own initialiser",
                    );
                }

                self.resolve_local(*id, name);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expression(value);
                self.resolve_local(*id, name);
            }
            Expr::Literal(_) => {}
            Expr::Grouping(expr) => self.resolve_expression(expr),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }
            Expr::Unary { right, .. } => self.resolve_expression(right),
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee);
                for argument in arguments {
                    self.resolve_expression(argument);
                }
            }
            Expr::SequenceOp {
                upper,
                lower,
                summand,
                ..
            } => {
                self.resolve_expression(upper);

                // A let lower bound gets its own scope, mirroring the
                // summation-local environment the interpreter creates; an
                // assignment lower bound targets an existing binding and
                // gets none.
                if matches!(lower.as_ref(), Stmt::Let { .. }) {
                    self.begin_scope();
                    self.resolve_statement(lower);
                    self.resolve_expression(summand);
                    self.end_scope();
                } else {
                    self.resolve_statement(lower);
                    self.resolve_expression(summand);
                }
            }
        }
    }

    fn resolve_function(&mut self, decl: &FunctionDecl) {
        let enclosing_function = self.current_function;
        self.current_function = FunctionType::Function;

        self.begin_scope();
        for param in &decl.params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_statement(&decl.body);
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        if scope.contains_key(&name.lexeme) {
            self.error(
                name,
                ErrorKind::Variable,
                "Already a variable with this name in this scope",
            );
            return;
        }

        // Not ready until the initialiser has resolved
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                self.locals.insert(id, distance);
                return;
            }
        }
        // Not found: the interpreter falls back to globals
    }

    fn error(&mut self, token: &Token, kind: ErrorKind, message: &str) {
        self.errors.push(StaticError::at_token(token, kind, message));
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
