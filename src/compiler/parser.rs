//! Syntax Analysis
//!
//! Recursive-descent parser producing an abstract syntax tree (_AST_) from
//! the token sequence.

pub mod ast;
pub mod sema;

use crate::compiler::lexer::{Token, TokenKind};
use crate::compiler::parser::ast::{
    BinOp, Block, Expr, Function, LValue, Loc, Param, Program, Stmt, Type, UnOp,
};
use crate::error::{CompileError, Result};

/// Parses a whole translation unit (one or more functions).
///
/// # Errors
///
/// Returns a syntax error for the first token sequence outside the grammar.
pub fn parse_program(tokens: &[Token]) -> Result<Program> {
    let mut parser = Parser { tokens, pos: 0 };

    let mut functions = vec![parser.function()?];
    while !parser.check(&TokenKind::Eof) {
        functions.push(parser.function()?);
    }

    Ok(Program { functions })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn current(&self) -> &Token {
        // The token stream is always terminated by `Eof`, which is never
        // consumed.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().kind == *kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(&format!("expected {kind}, found {}", self.current().kind)))
        }
    }

    fn err(&self, message: &str) -> CompileError {
        let loc = self.current().loc;
        CompileError::Parse {
            message: message.to_string(),
            line: loc.line,
            col: loc.col,
        }
    }

    fn ident(&mut self) -> Result<(String, Loc)> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, token.loc))
            }
            kind => Err(self.err(&format!("expected identifier, found {kind}"))),
        }
    }

    /// `FUNCTION ::= "func" IDENT "(" [ARG ("," ARG)*] ")" "->" TYPE BLOCK`
    fn function(&mut self) -> Result<Function> {
        self.expect(&TokenKind::Func)?;
        let (name, loc) = self.ident()?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.param()?);
            while self.eat(&TokenKind::Comma) {
                params.push(self.param()?);
            }
        }
        self.expect(&TokenKind::RParen)?;

        self.expect(&TokenKind::Arrow)?;
        let ret = self.parse_type()?;
        let body = self.block()?;

        Ok(Function {
            name,
            params,
            ret,
            body,
            loc,
        })
    }

    /// `ARG ::= IDENT TYPE`
    fn param(&mut self) -> Result<Param> {
        let (name, loc) = self.ident()?;
        let ty = self.parse_type()?;
        Ok(Param { name, ty, loc })
    }

    /// `TYPE ::= ("[" INT "]")* "int" | "void"`
    fn parse_type(&mut self) -> Result<Type> {
        let mut dims = Vec::new();
        while self.eat(&TokenKind::LBracket) {
            let token = self.advance();
            let TokenKind::Number(dim) = token.kind else {
                return Err(self.err("expected integer array dimension"));
            };
            if dim <= 0 {
                return Err(self.err(&format!("array dimension must be positive, got {dim}")));
            }
            dims.push(dim);
            self.expect(&TokenKind::RBracket)?;
        }

        if self.eat(&TokenKind::Int) {
            if dims.is_empty() {
                Ok(Type::Int)
            } else {
                Ok(Type::Array(dims))
            }
        } else if self.check(&TokenKind::Void) {
            if !dims.is_empty() {
                return Err(self.err("array element type must be 'int'"));
            }
            self.advance();
            Ok(Type::Void)
        } else {
            Err(self.err(&format!(
                "expected 'int' or 'void', found {}",
                self.current().kind
            )))
        }
    }

    /// `BLOCK ::= "{" STATEMENT* "}"`
    fn block(&mut self) -> Result<Block> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.err("unterminated block"));
            }
            stmts.push(self.statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Block { stmts })
    }

    fn statement(&mut self) -> Result<Stmt> {
        match &self.current().kind {
            TokenKind::Let => {
                let stmt = self.let_stmt()?;
                self.expect(&TokenKind::Semi)?;
                Ok(stmt)
            }
            TokenKind::If => self.if_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Return => {
                let loc = self.advance().loc;
                let value = if self.check(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Return { value, loc })
            }
            TokenKind::Break => {
                let loc = self.advance().loc;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Break { loc })
            }
            TokenKind::Continue => {
                let loc = self.advance().loc;
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Continue { loc })
            }
            TokenKind::Ident(_) => {
                let stmt = if *self.peek_kind(1) == TokenKind::LParen {
                    self.call_stmt()?
                } else {
                    self.assign_stmt()?
                };
                self.expect(&TokenKind::Semi)?;
                Ok(stmt)
            }
            kind => Err(self.err(&format!("unexpected {kind}"))),
        }
    }

    /// `LET ::= "let" IDENT TYPE "=" (EXPR | "{" "}")`
    fn let_stmt(&mut self) -> Result<Stmt> {
        self.expect(&TokenKind::Let)?;
        let (name, loc) = self.ident()?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Assign)?;

        let value = if self.check(&TokenKind::LBrace) {
            let brace_loc = self.advance().loc;
            self.expect(&TokenKind::RBrace)?;
            Expr::ArrayInit { loc: brace_loc }
        } else {
            self.expr()?
        };

        Ok(Stmt::Let {
            name,
            ty,
            value,
            loc,
        })
    }

    /// `REASSIGNMENT ::= IDENT ("[" EXPR "]")* "=" EXPR`
    fn assign_stmt(&mut self) -> Result<Stmt> {
        let (base, loc) = self.ident()?;

        let mut indices = Vec::new();
        while self.eat(&TokenKind::LBracket) {
            indices.push(self.expr()?);
            self.expect(&TokenKind::RBracket)?;
        }

        let target = if indices.is_empty() {
            LValue::Name {
                name: base,
                loc,
            }
        } else {
            LValue::Index { base, indices, loc }
        };

        self.expect(&TokenKind::Assign)?;
        let value = self.expr()?;

        Ok(Stmt::Assign { target, value, loc })
    }

    fn call_stmt(&mut self) -> Result<Stmt> {
        let (name, loc) = self.ident()?;
        let args = self.call_args()?;
        Ok(Stmt::Call { name, args, loc })
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args.push(self.expr()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.expr()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    /// `CONDITION ::= "if" "(" EXPR ")" BLOCK ["else" BLOCK]`
    fn if_stmt(&mut self) -> Result<Stmt> {
        let loc = self.expect(&TokenKind::If)?.loc;
        self.expect(&TokenKind::LParen)?;
        let cond = self.expr()?;
        self.expect(&TokenKind::RParen)?;

        let then_body = self.block()?;
        let else_body = if self.eat(&TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            loc,
        })
    }

    /// `LOOP ::= "for" BLOCK
    ///         | "for" "(" LET ("," LET)* ";" EXPR ";" REASSIGNMENT
    ///           ("," REASSIGNMENT)* ")" BLOCK`
    fn for_stmt(&mut self) -> Result<Stmt> {
        let loc = self.expect(&TokenKind::For)?.loc;

        if self.check(&TokenKind::LBrace) {
            let body = self.block()?;
            return Ok(Stmt::Loop { body, loc });
        }

        self.expect(&TokenKind::LParen)?;

        let mut init = vec![self.let_stmt()?];
        while self.eat(&TokenKind::Comma) {
            init.push(self.let_stmt()?);
        }
        self.expect(&TokenKind::Semi)?;

        let cond = self.expr()?;
        self.expect(&TokenKind::Semi)?;

        let mut step = vec![self.assign_stmt()?];
        while self.eat(&TokenKind::Comma) {
            step.push(self.assign_stmt()?);
        }
        self.expect(&TokenKind::RParen)?;

        let body = self.block()?;

        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            loc,
        })
    }

    // Expression parsing by precedence, loosest first.

    /// `EXPR ::= EXPR_AND ("||" EXPR_AND)*`
    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.expr_and()?;
        while self.check(&TokenKind::PipePipe) {
            let loc = self.advance().loc;
            let rhs = self.expr_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
        Ok(lhs)
    }

    /// `EXPR_AND ::= EXPR_CMP ("&&" EXPR_CMP)*`
    fn expr_and(&mut self) -> Result<Expr> {
        let mut lhs = self.expr_cmp()?;
        while self.check(&TokenKind::AmpAmp) {
            let loc = self.advance().loc;
            let rhs = self.expr_cmp()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
        Ok(lhs)
    }

    /// `EXPR_CMP ::= EXPR_ADD (("==" | "!=" | "<" | "<=" | ">" | ">=") EXPR_ADD)*`
    fn expr_cmp(&mut self) -> Result<Expr> {
        let mut lhs = self.expr_add()?;
        loop {
            let op = match self.current().kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::BangEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(lhs),
            };
            let loc = self.advance().loc;
            let rhs = self.expr_add()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
    }

    /// `EXPR_ADD ::= EXPR_MUL (("+" | "-") EXPR_MUL)*`
    fn expr_add(&mut self) -> Result<Expr> {
        let mut lhs = self.expr_mul()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let loc = self.advance().loc;
            let rhs = self.expr_mul()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
    }

    /// `EXPR_MUL ::= EXPR_UNARY (("*" | "/" | "%") EXPR_UNARY)*`
    fn expr_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.expr_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            let loc = self.advance().loc;
            let rhs = self.expr_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
    }

    /// `EXPR_UNARY ::= EXPR_ATOM | "-" EXPR_UNARY | "!" EXPR_UNARY`
    fn expr_unary(&mut self) -> Result<Expr> {
        let op = match self.current().kind {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Bang => UnOp::Not,
            _ => return self.expr_atom(),
        };
        let loc = self.advance().loc;
        let operand = self.expr_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            loc,
        })
    }

    /// `EXPR_ATOM ::= INT | "(" EXPR ")" | IDENT ["(" ARGS ")" | ("[" EXPR "]")*]`
    fn expr_atom(&mut self) -> Result<Expr> {
        match self.current().kind.clone() {
            TokenKind::Number(value) => {
                let loc = self.advance().loc;
                Ok(Expr::Int { value, loc })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(_) => {
                let (name, loc) = self.ident()?;

                if self.check(&TokenKind::LParen) {
                    let args = self.call_args()?;
                    return Ok(Expr::Call { name, args, loc });
                }

                let mut indices = Vec::new();
                while self.eat(&TokenKind::LBracket) {
                    indices.push(self.expr()?);
                    self.expect(&TokenKind::RBracket)?;
                }

                if indices.is_empty() {
                    Ok(Expr::Name { name, loc })
                } else {
                    Ok(Expr::Index {
                        base: name,
                        indices,
                        loc,
                    })
                }
            }
            kind => Err(self.err(&format!("expected expression, found {kind}"))),
        }
    }
}
