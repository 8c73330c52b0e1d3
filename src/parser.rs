use crate::ast::{Expr, ExprId, FunctionDecl, Literal, Stmt};
use crate::error::{ErrorKind, StaticError};
use crate::token::{self, Token, TokenKind};

/// Internal signal for unwinding to the nearest synchronization point. The
/// user-facing report is already recorded by the time this is raised.
struct ParseError;

pub struct ParseOutcome {
    pub statements: Vec<Stmt>,
    pub errors: Vec<StaticError>,
    /// First expression id not handed out, to seed the next parse in a
    /// REPL session.
    pub next_id: ExprId,
}

/// Recursive-descent parser over the scanner's token stream. Reports as
/// many errors as it can find, resynchronizing at statement boundaries.
pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    errors: Vec<StaticError>,
    next_id: ExprId,
}

/// Convenience entry point used by the driver and tests.
pub fn parse(tokens: &[Token]) -> ParseOutcome {
    Parser::new(tokens).parse()
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self::with_ids(tokens, 0)
    }

    /// Start handing out expression ids at `first_id`. The REPL threads the
    /// previous line's `next_id` through here so the interpreter's
    /// side-table never sees a reused id.
    pub fn with_ids(tokens: &'a [Token], first_id: ExprId) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            next_id: first_id,
        }
    }

    pub fn parse(mut self) -> ParseOutcome {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }

        ParseOutcome {
            statements,
            errors: self.errors,
            next_id: self.next_id,
        }
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_kinds(&[TokenKind::Let]) {
            self.variable_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(statement) => Some(statement),
            Err(ParseError) => {
                self.synchronise();
                None
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.match_kinds(&[TokenKind::Function]) {
            return self.function();
        }
        if self.match_kinds(&[TokenKind::If]) {
            return self.if_statement();
        }
        if self.match_kinds(&[TokenKind::Out]) {
            return self.output_statement();
        }
        if self.match_kinds(&[TokenKind::Return]) {
            return self.return_statement();
        }
        if self.match_kinds(&[TokenKind::While]) {
            return self.while_statement();
        }
        if self.match_kinds(&[TokenKind::LeftParen]) {
            return Ok(Stmt::Block(self.block()?));
        }

        self.expression_statement()
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let condition = self.expression()?;

        self.consume(
            TokenKind::Then,
            ErrorKind::Syntax,
            "Expected 'then' after an if condition",
        )?;
        let then_branch = Box::new(self.statement()?);

        let else_branch = if self.match_kinds(&[TokenKind::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn output_statement(&mut self) -> Result<Stmt, ParseError> {
        let value = self.expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Output(value))
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.previous().clone();

        // Return null unless a value is given
        let value = if !self.check(TokenKind::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume_semicolon()?;
        Ok(Stmt::Return { keyword, value })
    }

    fn variable_declaration(&mut self) -> Result<Stmt, ParseError> {
        let name = self.consume(
            TokenKind::Identifier,
            ErrorKind::Syntax,
            "Expected variable name",
        )?;

        // Without an '=' the variable starts out null
        let initialiser = if self.match_kinds(&[TokenKind::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume_semicolon()?;
        Ok(Stmt::Let { name, initialiser })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let condition = self.expression()?;

        self.consume(
            TokenKind::Do,
            ErrorKind::Syntax,
            "Expected 'do' after condition",
        )?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        // The final expression of a block may omit its ';', yielding the
        // block's implicit value
        if !self.check(TokenKind::RightParen) {
            self.consume_semicolon()?;
        }
        Ok(Stmt::Expression(expr))
    }

    fn function(&mut self) -> Result<Stmt, ParseError> {
        let name = self.consume(
            TokenKind::Identifier,
            ErrorKind::Function,
            "Expected function name",
        )?;
        self.consume(
            TokenKind::LeftParen,
            ErrorKind::Syntax,
            "Expected '(' after function name",
        )?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    let token = self.peek().clone();
                    self.error(
                        &token,
                        ErrorKind::Argument,
                        "Can't have more than 255 parameters",
                    );
                }

                params.push(self.consume(
                    TokenKind::Identifier,
                    ErrorKind::Parameter,
                    "Expected parameter name",
                )?);

                if !self.match_kinds(&[TokenKind::Comma]) {
                    break;
                }
            }
        }

        self.consume(
            TokenKind::RightParen,
            ErrorKind::Syntax,
            "Expected ')' after parameters",
        )?;
        self.consume(
            TokenKind::Equal,
            ErrorKind::Syntax,
            "Expected '=' before function body",
        )?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::Function(FunctionDecl { name, params, body }))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();

        while !self.check(TokenKind::RightParen) && !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }

        self.consume(
            TokenKind::RightParen,
            ErrorKind::Syntax,
            "Expected ')' after block",
        )?;
        Ok(statements)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.summation()?;

        if self.match_kinds(&[TokenKind::Assign]) {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            if let Expr::Variable { name, .. } = expr {
                return Ok(Expr::Assign {
                    id: self.new_id(),
                    name,
                    value: Box::new(value),
                });
            }

            // Reported but not raised; parsing resumes with the left side
            self.error(&equals, ErrorKind::Syntax, "Invalid assignment target");
        }

        Ok(expr)
    }

    fn summation(&mut self) -> Result<Expr, ParseError> {
        if self.match_kinds(&[TokenKind::Summation]) {
            let name = self.previous().clone();

            self.consume(TokenKind::LeftParen, ErrorKind::Syntax, "Expected '('")?;

            // The upper bound recurses through this level so summations nest
            let upper = self.summation()?;

            self.consume(
                TokenKind::Comma,
                ErrorKind::Syntax,
                "Expected ',' after upper bound expression",
            )?;

            let lower = if self.match_kinds(&[TokenKind::Let]) {
                let name = self.consume(
                    TokenKind::Identifier,
                    ErrorKind::Variable,
                    "Expected variable name",
                )?;

                if !self.match_kinds(&[TokenKind::Equal]) {
                    let token = self.peek().clone();
                    return Err(self.error(
                        &token,
                        ErrorKind::Variable,
                        "Variable must be initialised",
                    ));
                }
                let initialiser = self.expression()?;

                Stmt::Let {
                    name,
                    initialiser: Some(initialiser),
                }
            } else {
                let lower_expr = self.assignment()?;
                if !matches!(lower_expr, Expr::Assign { .. }) {
                    let token = self.peek().clone();
                    return Err(self.error(
                        &token,
                        ErrorKind::Syntax,
                        "Lower bound must be declaration or assignment",
                    ));
                }
                Stmt::Expression(lower_expr)
            };

            self.consume(TokenKind::RightParen, ErrorKind::Syntax, "Expected ')'")?;

            let summand = self.expression()?;

            return Ok(Expr::SequenceOp {
                name,
                upper: Box::new(upper),
                lower: Box::new(lower),
                summand: Box::new(summand),
            });
        }

        self.or()
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.and()?;

        while self.match_kinds(&[TokenKind::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.equality()?;

        while self.match_kinds(&[TokenKind::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.comparison()?;

        while self.match_kinds(&[TokenKind::NotEqual, TokenKind::EqualEqual]) {
            let operator = self.previous().clone();
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.term()?;

        while self.match_kinds(&[
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
        ]) {
            let operator = self.previous().clone();
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.factor()?;

        while self.match_kinds(&[TokenKind::Minus, TokenKind::Plus]) {
            let operator = self.previous().clone();
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.exponent()?;

        while self.match_kinds(&[TokenKind::Slash, TokenKind::Asterisk]) {
            let operator = self.previous().clone();
            let right = self.exponent()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn exponent(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.unary()?;

        while self.match_kinds(&[TokenKind::Caret]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_kinds(&[TokenKind::Not, TokenKind::Minus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        while self.match_kinds(&[TokenKind::LeftParen]) {
            expr = self.finish_call(expr)?;
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let mut arguments = Vec::new();

        if !self.check(TokenKind::RightParen) {
            loop {
                if arguments.len() >= 255 {
                    let token = self.peek().clone();
                    self.error(
                        &token,
                        ErrorKind::Argument,
                        "Function can't have more than 255 arguments",
                    );
                }

                arguments.push(self.expression()?);

                if !self.match_kinds(&[TokenKind::Comma]) {
                    break;
                }
            }
        }

        let paren = self.consume(
            TokenKind::RightParen,
            ErrorKind::Syntax,
            "Expected ')' after arguments",
        )?;

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        if self.match_kinds(&[TokenKind::False]) {
            return Ok(Expr::Literal(Literal::Boolean(false)));
        }
        if self.match_kinds(&[TokenKind::True]) {
            return Ok(Expr::Literal(Literal::Boolean(true)));
        }
        if self.match_kinds(&[TokenKind::Null]) {
            return Ok(Expr::Literal(Literal::Null));
        }

        if self.match_kinds(&[TokenKind::Number, TokenKind::String]) {
            let literal = match self.previous().literal.clone() {
                Some(token::Literal::Number(n)) => Literal::Number(n),
                Some(token::Literal::String(s)) => Literal::String(s),
                None => Literal::Null,
            };
            return Ok(Expr::Literal(literal));
        }

        if self.match_kinds(&[TokenKind::Identifier]) {
            let name = self.previous().clone();
            return Ok(Expr::Variable {
                id: self.new_id(),
                name,
            });
        }

        if self.match_kinds(&[TokenKind::LeftParen]) {
            let expr = self.expression()?;
            self.consume(
                TokenKind::RightParen,
                ErrorKind::Syntax,
                "Expected ')' after expression",
            )?;
            return Ok(Expr::Grouping(Box::new(expr)));
        }

        let token = self.peek().clone();
        Err(self.error(&token, ErrorKind::Syntax, "Expression expected"))
    }

    fn new_id(&mut self) -> ExprId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn match_kinds(&mut self, kinds: &[TokenKind]) -> bool {
        for kind in kinds {
            if self.check(*kind) {
                self.advance();
                return true;
            }
        }

        false
    }

    fn consume(
        &mut self,
        kind: TokenKind,
        error_kind: ErrorKind,
        message: &str,
    ) -> Result<Token, ParseError> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }

        let token = self.peek().clone();
        Err(self.error(&token, error_kind, message))
    }

    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        self.consume(
            TokenKind::Semicolon,
            ErrorKind::Syntax,
            "Expected ';' after value",
        )?;
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.is_at_end() && self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn error(&mut self, token: &Token, kind: ErrorKind, message: &str) -> ParseError {
        self.errors.push(StaticError::at_token(token, kind, message));
        ParseError
    }

    /// Discard tokens until just past a ';' or at a token that can start a
    /// new statement.
    fn synchronise(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }

            match self.peek().kind {
                TokenKind::Function
                | TokenKind::Let
                | TokenKind::If
                | TokenKind::Return
                | TokenKind::While => return,
                _ => {}
            }

            self.advance();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scanner;

    fn parse_source(source: &str) -> ParseOutcome {
        let (tokens, errors) = scanner::scan_tokens(source);
        assert!(errors.is_empty(), "unexpected scan errors: {:?}", errors);
        parse(&tokens)
    }

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let outcome = parse_source(source);
        assert!(
            outcome.errors.is_empty(),
            "unexpected parse errors: {:?}",
            outcome.errors
        );
        outcome.statements
    }

    #[test]
    fn test_precedence() {
        let statements = parse_ok("out 1 + 2 * 3 ^ 4 < 5 == true;");
        assert_eq!(
            statements[0].to_string(),
            "out (== (< (+ 1 (* 2 (^ 3 4))) 5) true);"
        );
    }

    #[test]
    fn test_exponent_left_associative() {
        let statements = parse_ok("out 2 ^ 3 ^ 2;");
        assert_eq!(statements[0].to_string(), "out (^ (^ 2 3) 2);");
    }

    #[test]
    fn test_assignment_right_associative() {
        let statements = parse_ok("a := b := 1;");
        assert_eq!(statements[0].to_string(), "a := b := 1;");
    }

    #[test]
    fn test_logical_levels() {
        let statements = parse_ok("out a or b and c;");
        assert_eq!(statements[0].to_string(), "out (or a (and b c));");
    }

    #[test]
    fn test_block_statement() {
        let statements = parse_ok("( let a = 1; out a; )");
        assert!(matches!(&statements[0], Stmt::Block(inner) if inner.len() == 2));
    }

    #[test]
    fn test_function_declaration() {
        let statements = parse_ok("function add(a, b) = return a + b;");
        assert_eq!(
            statements[0].to_string(),
            "function add(a, b) = return (+ a b);"
        );
    }

    #[test]
    fn test_if_else_and_while() {
        let statements = parse_ok("if a < 1 then out a; else out 1; while a do a := a - 1;");
        assert_eq!(
            statements[0].to_string(),
            "if (< a 1) then out a; else out 1;"
        );
        assert_eq!(statements[1].to_string(), "while a do a := (- a 1);");
    }

    #[test]
    fn test_summation_with_let_lower_bound() {
        let statements = parse_ok("out ∑(5, let i = 1) i;");
        assert_eq!(statements[0].to_string(), "out ∑(5, let i = 1) i;");
    }

    #[test]
    fn test_summation_with_assignment_lower_bound() {
        let statements = parse_ok("out ∑(5, i := 1) i;");
        assert_eq!(statements[0].to_string(), "out ∑(5, i := 1) i;");
    }

    #[test]
    fn test_summation_lower_bound_must_be_initialised() {
        let outcome = parse_source("out ∑(5, let i) i;");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Variable);
        assert_eq!(outcome.errors[0].message, "Variable must be initialised");
    }

    #[test]
    fn test_summation_rejects_plain_expression_lower_bound() {
        let outcome = parse_source("out ∑(5, i + 1) i;");
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.message == "Lower bound must be declaration or assignment"));
    }

    #[test]
    fn test_invalid_assignment_target_reported_not_raised() {
        let outcome = parse_source("1 := 2;");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "Invalid assignment target");
        // The statement still parses as its left side
        assert_eq!(outcome.statements[0].to_string(), "1;");
    }

    #[test]
    fn test_block_final_expression_may_omit_semicolon() {
        let statements = parse_ok("( let a = 1; a )");
        let Stmt::Block(inner) = &statements[0] else {
            panic!("expected a block");
        };
        assert_eq!(inner[1].to_string(), "a;");
    }

    #[test]
    fn test_synchronisation_recovers_later_errors() {
        let outcome = parse_source("out ; let a = 1; out +;");
        assert_eq!(outcome.errors.len(), 2);
        // The declaration between the bad statements survives
        assert_eq!(outcome.statements.len(), 1);
        assert_eq!(outcome.statements[0].to_string(), "let a = 1;");
    }

    #[test]
    fn test_missing_semicolon() {
        let outcome = parse_source("out 1");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "Expected ';' after value");
        assert_eq!(
            outcome.errors[0].to_string(),
            "[line 1] SyntaxError at end: Expected ';' after value."
        );
    }

    #[test]
    fn test_variable_ids_are_distinct() {
        let outcome = parse_source("out a + a;");
        let Stmt::Output(Expr::Binary { left, right, .. }) = &outcome.statements[0] else {
            panic!("expected output of a binary expression");
        };
        let (Expr::Variable { id: left_id, .. }, Expr::Variable { id: right_id, .. }) =
            (left.as_ref(), right.as_ref())
        else {
            panic!("expected variable operands");
        };
        assert_ne!(left_id, right_id);
    }

    #[test]
    fn test_ids_continue_from_seed() {
        let (tokens, _) = scanner::scan_tokens("out a;");
        let outcome = Parser::with_ids(&tokens, 10).parse();
        let Stmt::Output(Expr::Variable { id, .. }) = &outcome.statements[0] else {
            panic!("expected output of a variable");
        };
        assert_eq!(*id, 10);
        assert_eq!(outcome.next_id, 11);
    }
}
