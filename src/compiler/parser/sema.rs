//! Semantic Analysis
//!
//! Validates a parsed program: name resolution, scope rules, and type
//! checking. All errors are collected rather than stopping at the first.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::compiler::parser::ast::{Block, Expr, Function, LValue, Loc, Program, Stmt, Type};
use crate::error::CompileError;

/// The checked signature of a function.
#[derive(Debug, Clone)]
pub struct FnSig {
    /// Parameter names and types, in declaration order.
    pub params: Vec<(String, Type)>,
    /// Return type (`Int` or `Void`).
    pub ret: Type,
}

/// Program-wide facts produced by semantic analysis and consumed by the
/// CFG builder.
#[derive(Debug)]
pub struct ProgramInfo {
    /// Function signatures keyed by name, in declaration order.
    pub funcs: IndexMap<String, FnSig>,
}

/// Checks the whole program, returning its signature table on success or
/// every detected error on failure.
pub fn analyze(program: &Program) -> Result<ProgramInfo, Vec<CompileError>> {
    let mut checker = Checker {
        funcs: IndexMap::new(),
        scopes: Vec::new(),
        ret: Type::Void,
        loop_depth: 0,
        errors: Vec::new(),
    };

    // First pass: collect all signatures so calls can be checked regardless
    // of declaration order.
    for func in &program.functions {
        checker.collect_function(func);
    }

    // Second pass: check bodies.
    for func in &program.functions {
        checker.check_function(func);
    }

    if checker.errors.is_empty() {
        Ok(ProgramInfo {
            funcs: checker.funcs,
        })
    } else {
        Err(checker.errors)
    }
}

struct Checker {
    funcs: IndexMap<String, FnSig>,
    /// Innermost scope last. Declaring a name consults every scope, since
    /// shadowing an outer name is rejected.
    scopes: Vec<HashMap<String, Type>>,
    /// Return type of the function currently being checked.
    ret: Type,
    loop_depth: u32,
    errors: Vec<CompileError>,
}

impl Checker {
    fn error(&mut self, message: String, loc: Loc) {
        self.errors.push(CompileError::Semantic {
            message,
            line: loc.line,
            col: loc.col,
        });
    }

    fn collect_function(&mut self, func: &Function) {
        if func.ret.is_array() {
            self.error("functions cannot return arrays".to_string(), func.loc);
        }

        if self.funcs.contains_key(&func.name) {
            self.error(format!("function '{}' is already defined", func.name), func.loc);
            return;
        }

        let params = func
            .params
            .iter()
            .map(|p| (p.name.clone(), p.ty.clone()))
            .collect();

        self.funcs.insert(
            func.name.clone(),
            FnSig {
                params,
                ret: func.ret.clone(),
            },
        );
    }

    fn check_function(&mut self, func: &Function) {
        self.ret = func.ret.clone();
        self.loop_depth = 0;
        self.scopes.clear();
        self.scopes.push(HashMap::new());

        for param in &func.params {
            if param.ty == Type::Void {
                self.error(
                    format!("parameter '{}' cannot have type void", param.name),
                    param.loc,
                );
                continue;
            }
            self.declare(&param.name, param.ty.clone(), param.loc);
        }

        // The function body shares the parameter scope.
        for stmt in &func.body.stmts {
            self.check_stmt(stmt);
        }

        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, ty: Type, loc: Loc) {
        // Shadowing an outer-scope name is as much an error as redeclaring
        // in the same scope.
        if self.lookup(name).is_some() {
            self.error(format!("variable '{name}' is already declared"), loc);
            return;
        }
        self.scopes
            .last_mut()
            .expect("a scope is always open while checking a body")
            .insert(name.to_string(), ty);
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn check_block(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                name,
                ty,
                value,
                loc,
            } => self.check_let(name, ty, value, *loc),
            Stmt::Assign { target, value, loc } => {
                let target_ty = self.check_lvalue(target);
                let value_ty = self.check_expr(value);
                if let (Some(t), Some(v)) = (target_ty, value_ty) {
                    if t.is_array() {
                        self.error(
                            "cannot assign to a whole array; assign to an element".to_string(),
                            *loc,
                        );
                    } else if t != v {
                        self.error(format!("type mismatch: cannot assign {v} to {t}"), *loc);
                    }
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                loc,
            } => {
                self.check_cond(cond, *loc);
                self.check_block(then_body);
                if let Some(else_body) = else_body {
                    self.check_block(else_body);
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                loc,
            } => {
                // The loop variables live in their own scope enclosing the
                // body.
                self.scopes.push(HashMap::new());
                self.loop_depth += 1;

                for stmt in init {
                    self.check_stmt(stmt);
                }
                self.check_cond(cond, *loc);
                for stmt in step {
                    self.check_stmt(stmt);
                }
                self.check_block(body);

                self.loop_depth -= 1;
                self.scopes.pop();
            }
            Stmt::Loop { body, .. } => {
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::Call { name, args, loc } => {
                // Statement calls may discard any result, including void.
                self.check_call(name, args, *loc);
            }
            Stmt::Return { value, loc } => match (value, self.ret.clone()) {
                (None, Type::Void) => {}
                (None, ret) => {
                    self.error(format!("missing return value in function returning {ret}"), *loc);
                }
                (Some(value), ret) => {
                    let value_ty = self.check_expr(value);
                    if ret == Type::Void {
                        self.error("void function cannot return a value".to_string(), *loc);
                    } else if let Some(value_ty) = value_ty
                        && value_ty != ret
                    {
                        self.error(format!("cannot return {value_ty} from function returning {ret}"), *loc);
                    }
                }
            },
            Stmt::Break { loc } => {
                if self.loop_depth == 0 {
                    self.error("break outside of a loop".to_string(), *loc);
                }
            }
            Stmt::Continue { loc } => {
                if self.loop_depth == 0 {
                    self.error("continue outside of a loop".to_string(), *loc);
                }
            }
        }
    }

    fn check_let(&mut self, name: &str, ty: &Type, value: &Expr, loc: Loc) {
        if *ty == Type::Void {
            self.error(format!("variable '{name}' cannot have type void"), loc);
            return;
        }

        if let Expr::ArrayInit { loc: init_loc } = value {
            if !ty.is_array() {
                self.error(
                    format!("'{{}}' initializer requires an array type, but '{name}' is {ty}"),
                    *init_loc,
                );
            }
        } else if ty.is_array() {
            self.error(
                format!("array variable '{name}' must be initialized with '{{}}'"),
                loc,
            );
            // Check the initializer anyway for secondary errors.
            self.check_expr(value);
        } else if let Some(value_ty) = self.check_expr(value)
            && value_ty != *ty
        {
            self.error(
                format!("type mismatch: cannot initialize '{name}' ({ty}) with {value_ty}"),
                loc,
            );
        }

        self.declare(name, ty.clone(), loc);
    }

    fn check_cond(&mut self, cond: &Expr, loc: Loc) {
        if let Some(ty) = self.check_expr(cond)
            && ty != Type::Int
        {
            self.error(format!("condition must be int, got {ty}"), loc);
        }
    }

    fn check_lvalue(&mut self, lvalue: &LValue) -> Option<Type> {
        match lvalue {
            LValue::Name { name, loc } => match self.lookup(name) {
                Some(ty) => Some(ty.clone()),
                None => {
                    self.error(format!("variable '{name}' is not declared"), *loc);
                    None
                }
            },
            LValue::Index { base, indices, loc } => self.check_index(base, indices, *loc),
        }
    }

    /// Checks an array element access and returns the element type.
    fn check_index(&mut self, base: &str, indices: &[Expr], loc: Loc) -> Option<Type> {
        let Some(base_ty) = self.lookup(base).cloned() else {
            self.error(format!("variable '{base}' is not declared"), loc);
            return None;
        };

        let Type::Array(dims) = &base_ty else {
            self.error(format!("cannot index non-array variable '{base}'"), loc);
            return None;
        };

        if indices.len() != dims.len() {
            self.error(
                format!(
                    "array '{base}' has {} dimensions but {} indices were given",
                    dims.len(),
                    indices.len()
                ),
                loc,
            );
        }

        for index in indices {
            if let Some(ty) = self.check_expr(index)
                && ty != Type::Int
            {
                self.error(format!("array index must be int, got {ty}"), index.loc());
            }
        }

        Some(Type::Int)
    }

    /// Type-checks an expression. Returns `None` when a nested error was
    /// already reported, to avoid cascading diagnostics.
    fn check_expr(&mut self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::Int { .. } => Some(Type::Int),
            Expr::Name { name, loc } => match self.lookup(name) {
                Some(ty) => Some(ty.clone()),
                None => {
                    self.error(format!("variable '{name}' is not declared"), *loc);
                    None
                }
            },
            Expr::Binary { op, lhs, rhs, loc } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                for ty in [&lhs_ty, &rhs_ty] {
                    if let Some(ty) = ty
                        && *ty != Type::Int
                    {
                        self.error(
                            format!("operands of '{}' must be int, got {ty}", op.mnemonic()),
                            *loc,
                        );
                    }
                }
                Some(Type::Int)
            }
            Expr::Unary { op, operand, loc } => {
                if let Some(ty) = self.check_expr(operand)
                    && ty != Type::Int
                {
                    self.error(
                        format!("operand of '{}' must be int, got {ty}", op.mnemonic()),
                        *loc,
                    );
                }
                Some(Type::Int)
            }
            Expr::Call { name, args, loc } => {
                let ret = self.check_call(name, args, *loc)?;
                if ret == Type::Void {
                    self.error(format!("void function '{name}' used as a value"), *loc);
                    return None;
                }
                Some(ret)
            }
            Expr::Index { base, indices, loc } => self.check_index(base, indices, *loc),
            Expr::ArrayInit { loc } => {
                self.error("'{}' is only valid as a let initializer".to_string(), *loc);
                None
            }
        }
    }

    fn check_call(&mut self, name: &str, args: &[Expr], loc: Loc) -> Option<Type> {
        let Some(sig) = self.funcs.get(name).cloned() else {
            self.error(format!("function '{name}' is not declared"), loc);
            for arg in args {
                self.check_expr(arg);
            }
            return None;
        };

        if args.len() != sig.params.len() {
            self.error(
                format!(
                    "function '{name}' expects {} argument(s), got {}",
                    sig.params.len(),
                    args.len()
                ),
                loc,
            );
        }

        for (arg, (param_name, param_ty)) in args.iter().zip(&sig.params) {
            if let Some(arg_ty) = self.check_expr(arg)
                && arg_ty != *param_ty
            {
                self.error(
                    format!("argument '{param_name}' of '{name}' expects {param_ty}, got {arg_ty}"),
                    arg.loc(),
                );
            }
        }

        Some(sig.ret)
    }
}
