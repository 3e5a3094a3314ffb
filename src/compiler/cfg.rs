//! CFG Construction
//!
//! Lowers type-checked function ASTs into the block-structured IR. The
//! builder keeps a mutable "current block" cursor plus stacks of break and
//! continue targets; structured statements allocate their blocks and move
//! the cursor through them.

use std::collections::HashMap;

use crate::compiler::ir::{BlockId, Function, InstKind, Terminator, Value, VarId};
use crate::compiler::parser::ast::{self, BinOp, Expr, LValue, Loc, Stmt, Type};
use crate::compiler::parser::sema::ProgramInfo;
use crate::error::{CompileError, Result};

/// Lowers every function of the program into a CFG, in declaration order.
///
/// # Errors
///
/// Returns an internal error if the AST violates a guarantee the semantic
/// analyzer is supposed to establish (unresolved name, misplaced `{}`,
/// `break` without a loop).
pub fn build(program: &ast::Program, info: &ProgramInfo) -> Result<Vec<Function>> {
    program
        .functions
        .iter()
        .map(|func| build_function(func, info))
        .collect()
}

fn build_function(func: &ast::Function, info: &ProgramInfo) -> Result<Function> {
    let mut builder = Builder {
        info,
        func: Function::new(&func.name, func.ret.clone()),
        cur: BlockId(0),
        break_targets: Vec::new(),
        continue_targets: Vec::new(),
        scopes: vec![HashMap::new()],
    };

    for (index, param) in func.params.iter().enumerate() {
        let var = builder.declare(&param.name, param.ty.clone());
        builder.func.params.push(var);
        builder.func.append_inst(
            builder.cur,
            InstKind::Param { index },
            param.ty.clone(),
            Some(var),
            Some(param.loc),
        );
    }

    builder.lower_block(&func.body)?;

    // A function body may fall off its end. Void functions return
    // implicitly; for int functions, returning 0 keeps the IR well formed
    // whether or not the missing value is ever observed.
    if !builder.terminated() {
        let value = match builder.func.ret {
            Type::Void => None,
            _ => Some(Value::Const(0)),
        };
        builder.set_term(Terminator::Return(value));
    }

    Ok(builder.func)
}

struct Builder<'a> {
    info: &'a ProgramInfo,
    func: Function,
    /// The block currently receiving instructions.
    cur: BlockId,
    /// Innermost break target last.
    break_targets: Vec<BlockId>,
    /// Innermost continue target last.
    continue_targets: Vec<BlockId>,
    /// Lexical scopes mapping source names to locals, innermost last.
    scopes: Vec<HashMap<String, VarId>>,
}

impl Builder<'_> {
    fn internal(message: String) -> CompileError {
        CompileError::Internal(message)
    }

    fn declare(&mut self, name: &str, ty: Type) -> VarId {
        let var = self.func.add_local(name, ty);
        self.scopes
            .last_mut()
            .expect("a scope is always open while lowering")
            .insert(name.to_string(), var);
        var
    }

    fn lookup(&self, name: &str) -> Result<VarId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied()
            .ok_or_else(|| Self::internal(format!("unresolved variable '{name}' reached lowering")))
    }

    fn terminated(&self) -> bool {
        self.func.block(self.cur).term.is_some()
    }

    fn set_term(&mut self, term: Terminator) {
        self.func.set_terminator(self.cur, term);
    }

    fn emit(&mut self, kind: InstKind, ty: Type, var: Option<VarId>, loc: Loc) -> Value {
        Value::Def(self.func.append_inst(self.cur, kind, ty, var, Some(loc)))
    }

    /// Records `value` as the new definition of `var`: either by claiming
    /// the freshly emitted instruction that computed it, or by
    /// materializing a `const`/`copy`.
    fn bind_def(&mut self, var: VarId, value: Value, loc: Loc) {
        match value {
            Value::Def(id) if self.func.inst(id).var.is_none() => {
                self.func.inst_mut(id).var = Some(var);
            }
            Value::Const(k) => {
                self.emit(InstKind::Const(k), Type::Int, Some(var), loc);
            }
            value => {
                self.emit(InstKind::Copy(value), Type::Int, Some(var), loc);
            }
        }
    }

    fn lower_block(&mut self, block: &ast::Block) -> Result<()> {
        self.scopes.push(HashMap::new());
        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Let {
                name,
                ty,
                value,
                loc,
            } => {
                if let Expr::ArrayInit { .. } = value {
                    let Type::Array(dims) = ty else {
                        return Err(Self::internal(
                            "'{}' initializer on a non-array reached lowering".into(),
                        ));
                    };
                    let var = self.declare(name, ty.clone());
                    self.emit(
                        InstKind::Alloca { dims: dims.clone() },
                        ty.clone(),
                        Some(var),
                        *loc,
                    );
                } else {
                    let value = self.lower_expr(value)?;
                    let var = self.declare(name, ty.clone());
                    self.bind_def(var, value, *loc);
                }
                Ok(())
            }
            Stmt::Assign { target, value, loc } => match target {
                LValue::Name { name, .. } => {
                    let value = self.lower_expr(value)?;
                    let var = self.lookup(name)?;
                    self.bind_def(var, value, *loc);
                    Ok(())
                }
                LValue::Index { base, indices, .. } => {
                    let base = Value::Var(self.lookup(base)?);
                    let indices = indices
                        .iter()
                        .map(|index| self.lower_expr(index))
                        .collect::<Result<Vec<_>>>()?;
                    let value = self.lower_expr(value)?;
                    self.emit(
                        InstKind::Store {
                            base,
                            indices,
                            value,
                        },
                        Type::Void,
                        None,
                        *loc,
                    );
                    Ok(())
                }
            },
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => self.lower_if(cond, then_body, else_body.as_ref()),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => self.lower_for(init, cond, step, body),
            Stmt::Loop { body, .. } => self.lower_loop(body),
            Stmt::Call { name, args, loc } => {
                self.lower_call(name, args, *loc)?;
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let value = value
                    .as_ref()
                    .map(|value| self.lower_expr(value))
                    .transpose()?;
                self.set_term(Terminator::Return(value));
                // Anything lowered after this point lands in an orphan
                // block that cleanup will drop.
                self.cur = self.func.add_block(Some("after return"));
                Ok(())
            }
            Stmt::Break { .. } => {
                let target = *self
                    .break_targets
                    .last()
                    .ok_or_else(|| Self::internal("break outside a loop reached lowering".into()))?;
                self.set_term(Terminator::Jump(target));
                self.cur = self.func.add_block(Some("after break"));
                Ok(())
            }
            Stmt::Continue { .. } => {
                let target = *self.continue_targets.last().ok_or_else(|| {
                    Self::internal("continue outside a loop reached lowering".into())
                })?;
                self.set_term(Terminator::Jump(target));
                self.cur = self.func.add_block(Some("after continue"));
                Ok(())
            }
        }
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &ast::Block,
        else_body: Option<&ast::Block>,
    ) -> Result<()> {
        let cond = self.lower_expr(cond)?;

        let then_block = self.func.add_block(Some("then"));
        let else_block = else_body.map(|_| self.func.add_block(Some("else")));
        let join = self.func.add_block(Some("merge"));

        self.set_term(Terminator::Branch {
            cond,
            then_to: then_block,
            else_to: else_block.unwrap_or(join),
        });

        self.cur = then_block;
        self.lower_block(then_body)?;
        if !self.terminated() {
            self.set_term(Terminator::Jump(join));
        }

        if let (Some(else_block), Some(else_body)) = (else_block, else_body) {
            self.cur = else_block;
            self.lower_block(else_body)?;
            if !self.terminated() {
                self.set_term(Terminator::Jump(join));
            }
        }

        self.cur = join;
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: &[Stmt],
        cond: &Expr,
        step: &[Stmt],
        body: &ast::Block,
    ) -> Result<()> {
        // The loop variables live in a scope spanning init, condition,
        // step, and body.
        self.scopes.push(HashMap::new());

        for stmt in init {
            self.lower_stmt(stmt)?;
        }

        let header = self.func.add_block(Some("loop header"));
        let body_block = self.func.add_block(Some("loop body"));
        let step_block = self.func.add_block(Some("loop step"));
        let exit = self.func.add_block(Some("loop exit"));

        self.set_term(Terminator::Jump(header));

        self.cur = header;
        let cond = self.lower_expr(cond)?;
        self.set_term(Terminator::Branch {
            cond,
            then_to: body_block,
            else_to: exit,
        });

        self.break_targets.push(exit);
        self.continue_targets.push(step_block);

        self.cur = body_block;
        self.lower_block(body)?;
        if !self.terminated() {
            self.set_term(Terminator::Jump(step_block));
        }

        self.break_targets.pop();
        self.continue_targets.pop();

        self.cur = step_block;
        for stmt in step {
            self.lower_stmt(stmt)?;
        }
        self.set_term(Terminator::Jump(header));

        self.cur = exit;
        self.scopes.pop();
        Ok(())
    }

    fn lower_loop(&mut self, body: &ast::Block) -> Result<()> {
        let header = self.func.add_block(Some("loop header"));
        let exit = self.func.add_block(Some("loop exit"));

        self.set_term(Terminator::Jump(header));

        self.break_targets.push(exit);
        self.continue_targets.push(header);

        self.cur = header;
        self.lower_block(body)?;
        if !self.terminated() {
            self.set_term(Terminator::Jump(header));
        }

        self.break_targets.pop();
        self.continue_targets.pop();

        self.cur = exit;
        Ok(())
    }

    fn lower_call(&mut self, name: &str, args: &[Expr], loc: Loc) -> Result<Value> {
        let args = args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<Result<Vec<_>>>()?;

        let ret = self
            .info
            .funcs
            .get(name)
            .map(|sig| sig.ret.clone())
            .ok_or_else(|| Self::internal(format!("call to unknown function '{name}'")))?;

        Ok(self.emit(
            InstKind::Call {
                callee: name.to_string(),
                args,
            },
            ret,
            None,
            loc,
        ))
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Const(*value)),
            Expr::Name { name, .. } => Ok(Value::Var(self.lookup(name)?)),
            Expr::Unary { op, operand, loc } => {
                let operand = self.lower_expr(operand)?;
                Ok(self.emit(
                    InstKind::Unary { op: *op, operand },
                    Type::Int,
                    None,
                    *loc,
                ))
            }
            Expr::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                lhs,
                rhs,
                loc,
            } => self.lower_short_circuit(*op, lhs, rhs, *loc),
            Expr::Binary { op, lhs, rhs, loc } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(self.emit(
                    InstKind::Binary { op: *op, lhs, rhs },
                    Type::Int,
                    None,
                    *loc,
                ))
            }
            Expr::Call { name, args, loc } => self.lower_call(name, args, *loc),
            Expr::Index { base, indices, loc } => {
                let base = Value::Var(self.lookup(base)?);
                let indices = indices
                    .iter()
                    .map(|index| self.lower_expr(index))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.emit(InstKind::Load { base, indices }, Type::Int, None, *loc))
            }
            Expr::ArrayInit { .. } => Err(Self::internal(
                "'{}' initializer in expression position reached lowering".into(),
            )),
        }
    }

    /// Lowers `a && b` / `a || b` to a diamond producing 0 or 1 through a
    /// phi at the join, preserving short-circuit evaluation.
    fn lower_short_circuit(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        loc: Loc,
    ) -> Result<Value> {
        let lhs = self.lower_expr(lhs)?;
        let lhs_end = self.cur;

        let (rhs_block, join, skipped) = match op {
            BinOp::And => (
                self.func.add_block(Some("and rhs")),
                self.func.add_block(Some("and join")),
                Value::Const(0),
            ),
            BinOp::Or => (
                self.func.add_block(Some("or rhs")),
                self.func.add_block(Some("or join")),
                Value::Const(1),
            ),
            _ => unreachable!("only '&&' and '||' lower through a diamond"),
        };

        match op {
            BinOp::And => self.set_term(Terminator::Branch {
                cond: lhs,
                then_to: rhs_block,
                else_to: join,
            }),
            _ => self.set_term(Terminator::Branch {
                cond: lhs,
                then_to: join,
                else_to: rhs_block,
            }),
        }

        self.cur = rhs_block;
        let rhs = self.lower_expr(rhs)?;
        // Normalize the right operand so the result is always 0 or 1.
        let normalized = self.emit(
            InstKind::Binary {
                op: BinOp::Ne,
                lhs: rhs,
                rhs: Value::Const(0),
            },
            Type::Int,
            None,
            loc,
        );
        let rhs_end = self.cur;
        self.set_term(Terminator::Jump(join));

        self.cur = join;
        let phi = self.func.insert_phi(
            join,
            vec![(lhs_end, skipped), (rhs_end, normalized)],
            None,
        );
        Ok(Value::Def(phi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing;

    fn single(src: &str) -> Function {
        testing::lower(src).remove(0)
    }

    fn reachable_count(func: &Function) -> usize {
        func.reachable_blocks().len()
    }

    #[test]
    fn cfg_straight_line_is_one_block() {
        let f = single(&testing::main_fn("let x int = 2 + 3; return x;"));
        assert_eq!(reachable_count(&f), 1);
        assert!(matches!(
            f.block(f.entry).term,
            Some(Terminator::Return(Some(_)))
        ));
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_if_else_forms_diamond() {
        let f = single(&testing::main_fn(
            "let x int = 1;
             if (x) { x = 2; } else { x = 3; }
             return x;",
        ));
        // entry, then, else, merge.
        assert_eq!(reachable_count(&f), 4);

        let Some(Terminator::Branch {
            then_to, else_to, ..
        }) = f.block(f.entry).term
        else {
            panic!("entry should end in a branch");
        };
        let joins: Vec<_> = f.successors(then_to);
        assert_eq!(joins, f.successors(else_to));
        assert_eq!(f.block(joins[0]).preds.len(), 2);
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_if_without_else_branches_to_join() {
        let f = single(&testing::main_fn(
            "let x int = 1;
             if (x) { x = 2; }
             return x;",
        ));
        let Some(Terminator::Branch {
            then_to, else_to, ..
        }) = f.block(f.entry).term
        else {
            panic!("entry should end in a branch");
        };
        // The false edge goes straight to the join block.
        assert_eq!(f.successors(then_to), vec![else_to]);
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_return_in_branch_omits_join_edge() {
        let f = single(&testing::main_fn(
            "let x int = 1;
             if (x) { return 1; } else { return 2; }
             return x;",
        ));
        let Some(Terminator::Branch {
            then_to, else_to, ..
        }) = f.block(f.entry).term
        else {
            panic!("entry should end in a branch");
        };
        assert!(f.successors(then_to).is_empty());
        assert!(f.successors(else_to).is_empty());
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_counted_for_shape() {
        let f = single(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) { s = s + 1; }
             return s;",
        ));

        // entry -> header; header branches to body and exit; body -> step;
        // step -> header.
        let header = f.successors(f.entry)[0];
        let Some(Terminator::Branch {
            then_to: body,
            else_to: exit,
            ..
        }) = f.block(header).term
        else {
            panic!("loop header should branch");
        };
        let step = f.successors(body)[0];
        assert_eq!(f.successors(step), vec![header]);
        assert!(matches!(f.block(exit).term, Some(Terminator::Return(_))));
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_break_targets_loop_exit() {
        let f = single(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) {
                 if (i == 5) { break; }
                 s = s + 1;
             }
             return s;",
        ));

        let header = f.successors(f.entry)[0];
        let Some(Terminator::Branch { else_to: exit, .. }) = f.block(header).term else {
            panic!("loop header should branch");
        };

        // The exit block has two reachable predecessors: the header and the
        // break block.
        assert_eq!(f.block(exit).preds.len(), 2);
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_continue_targets_step_block() {
        let f = single(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) {
                 if (i == 5) { continue; }
                 s = s + 1;
             }
             return s;",
        ));

        let header = f.successors(f.entry)[0];
        let Some(Terminator::Branch { then_to: body, .. }) = f.block(header).term else {
            panic!("loop header should branch");
        };
        // The step block jumps back to the header and has more than one
        // predecessor (body tail and the continue block).
        let step = f
            .reachable_blocks()
            .into_iter()
            .find(|&b| f.successors(b) == vec![header] && b != f.entry)
            .expect("step block jumps to header");
        assert!(f.block(step).preds.len() >= 2);
        assert_ne!(step, body);
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_unconditional_loop_back_edge() {
        let f = single(&testing::main_fn(
            "let s int = 0;
             for { s = s + 1; if (s == 3) { break; } }
             return s;",
        ));
        let header = f.successors(f.entry)[0];
        // Some reachable block jumps back to the header.
        let has_back_edge = f
            .reachable_blocks()
            .into_iter()
            .any(|b| b != f.entry && f.successors(b).contains(&header));
        assert!(has_back_edge);
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_short_circuit_and_produces_phi() {
        let f = single(&testing::main_fn(
            "let a int = 1; let b int = 2; let c int = a && b; return c;",
        ));
        // The && join holds a phi merging 0 with the normalized right side.
        let join = f
            .reachable_blocks()
            .into_iter()
            .find(|&b| !f.block(b).phis.is_empty())
            .expect("&& should create a join phi");
        let phi = f.block(join).phis[0];
        let InstKind::Phi { incoming } = &f.inst(phi).kind else {
            panic!("phi expected");
        };
        assert_eq!(incoming.len(), 2);
        assert!(incoming.iter().any(|(_, v)| *v == Value::Const(0)));
        // The phi is claimed as the definition of `c`.
        assert!(f.inst(phi).var.is_some());
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_array_ops_lower_to_alloca_store_load() {
        let f = single(&testing::main_fn(
            "let arr [4]int = {}; arr[0] = 42; return arr[0];",
        ));
        let insts = &f.block(f.entry).insts;
        let kinds: Vec<_> = insts.iter().map(|&i| &f.inst(i).kind).collect();
        assert!(matches!(kinds[0], InstKind::Alloca { dims } if dims == &vec![4]));
        assert!(matches!(kinds[1], InstKind::Store { .. }));
        assert!(matches!(kinds[2], InstKind::Load { .. }));
        f.verify().expect("lowered IR should be well-formed");
    }

    #[test]
    fn cfg_void_function_gets_implicit_return() {
        let f = single("func main() -> void { let x int = 1; }");
        assert!(matches!(
            f.block(f.entry).term,
            Some(Terminator::Return(None))
        ));
    }

    #[test]
    fn cfg_params_lower_to_param_insts() {
        let funcs = testing::lower("func f(a int, b int) -> int { return a; }");
        let f = &funcs[0];
        let kinds: Vec<_> = f
            .block(f.entry)
            .insts
            .iter()
            .map(|&i| &f.inst(i).kind)
            .collect();
        assert!(matches!(kinds[0], InstKind::Param { index: 0 }));
        assert!(matches!(kinds[1], InstKind::Param { index: 1 }));
    }
}
