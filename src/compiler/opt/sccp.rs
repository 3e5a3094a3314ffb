//! Sparse Conditional Constant Propagation (SCCP)
//!
//! Joint lattice/reachability fixpoint: each SSA value carries an element
//! of {undefined, constant, not-a-constant}, each CFG edge a feasibility
//! flag. Values proven constant are folded into their users and deleted;
//! edges proven infeasible are removed, along with any block left without
//! a feasible way in.

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::compiler::ir::{BlockId, Function, InstKind, Terminator, Value, ValueId};
use crate::compiler::parser::ast::{BinOp, UnOp};

/// A value's position in the constant lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lattice {
    /// No evidence yet (bottom).
    Undef,
    /// Provably this constant on every feasible path.
    Const(i64),
    /// Not a constant (top).
    Nac,
}

fn meet(a: Lattice, b: Lattice) -> Lattice {
    match (a, b) {
        (Lattice::Undef, x) | (x, Lattice::Undef) => x,
        (Lattice::Nac, _) | (_, Lattice::Nac) => Lattice::Nac,
        (Lattice::Const(x), Lattice::Const(y)) => {
            if x == y {
                a
            } else {
                Lattice::Nac
            }
        }
    }
}

/// A place that consumes an SSA value.
#[derive(Debug, Clone, Copy)]
enum User {
    Inst(ValueId),
    Term(BlockId),
}

/// Runs SCCP over `func` (which must be in SSA form), rewriting it in
/// place. A second run on the result makes no further changes.
pub fn run(func: &mut Function) {
    let mut solver = Solver::new(func);
    solver.solve(func);
    solver.rewrite(func);
}

#[derive(Debug)]
struct Solver {
    values: Vec<Lattice>,
    executable: Vec<bool>,
    feasible: HashSet<(BlockId, BlockId)>,
    block_work: VecDeque<BlockId>,
    value_work: VecDeque<ValueId>,
    users: Vec<Vec<User>>,
}

impl Solver {
    fn new(func: &Function) -> Self {
        // Reverse use lists, rebuilt from scratch for this run.
        let mut users: Vec<Vec<User>> = vec![Vec::new(); func.insts.len()];
        for b in func.reachable_blocks() {
            let block = func.block(b);
            for &inst in block.phis.iter().chain(&block.insts) {
                func.inst(inst).kind.for_each_operand(|v| {
                    if let Value::Def(def) = v {
                        users[def.index()].push(User::Inst(inst));
                    }
                });
            }
            if let Some(term) = &block.term {
                term.for_each_operand(|v| {
                    if let Value::Def(def) = v {
                        users[def.index()].push(User::Term(b));
                    }
                });
            }
        }

        Self {
            values: vec![Lattice::Undef; func.insts.len()],
            executable: vec![false; func.blocks.len()],
            feasible: HashSet::new(),
            block_work: VecDeque::new(),
            value_work: VecDeque::new(),
            users,
        }
    }

    fn solve(&mut self, func: &Function) {
        self.executable[func.entry.index()] = true;
        self.block_work.push_back(func.entry);

        loop {
            if let Some(b) = self.block_work.pop_front() {
                self.visit_block(func, b);
                continue;
            }
            if let Some(value) = self.value_work.pop_front() {
                self.visit_users(func, value);
                continue;
            }
            break;
        }
    }

    /// Marks the edge `from -> to` feasible, scheduling the target block
    /// on first entry and re-evaluating its phis otherwise.
    fn mark_edge(&mut self, func: &Function, from: BlockId, to: BlockId) {
        if !self.feasible.insert((from, to)) {
            return;
        }
        if !self.executable[to.index()] {
            self.executable[to.index()] = true;
            self.block_work.push_back(to);
        } else {
            for &phi in &func.block(to).phis {
                self.eval_inst(func, phi);
            }
        }
    }

    fn visit_block(&mut self, func: &Function, b: BlockId) {
        let block = func.block(b);
        for &phi in &block.phis {
            self.eval_inst(func, phi);
        }
        for &inst in &block.insts {
            self.eval_inst(func, inst);
        }
        self.eval_term(func, b);
    }

    fn visit_users(&mut self, func: &Function, value: ValueId) {
        for user in self.users[value.index()].clone() {
            match user {
                User::Inst(inst) => {
                    if self.executable[func.inst(inst).block.index()] {
                        self.eval_inst(func, inst);
                    }
                }
                User::Term(b) => {
                    if self.executable[b.index()] {
                        self.eval_term(func, b);
                    }
                }
            }
        }
    }

    fn lattice_of(&self, value: &Value) -> Lattice {
        match value {
            Value::Const(k) => Lattice::Const(*k),
            Value::Def(def) => self.values[def.index()],
            // Named operands do not exist in SSA form; be conservative.
            Value::Var(_) => Lattice::Nac,
        }
    }

    fn set_lattice(&mut self, id: ValueId, new: Lattice) {
        let old = self.values[id.index()];
        let merged = meet(old, new);
        if merged != old {
            self.values[id.index()] = merged;
            self.value_work.push_back(id);
        }
    }

    fn eval_inst(&mut self, func: &Function, id: ValueId) {
        let inst = func.inst(id);
        let result = match &inst.kind {
            InstKind::Phi { incoming } => {
                // Meet over feasible incoming edges only.
                let mut acc = Lattice::Undef;
                for (pred, value) in incoming {
                    if self.feasible.contains(&(*pred, inst.block)) {
                        acc = meet(acc, self.lattice_of(value));
                    }
                }
                acc
            }
            InstKind::Const(k) => Lattice::Const(*k),
            InstKind::Copy(v) => self.lattice_of(v),
            InstKind::Binary { op, lhs, rhs } => {
                self.eval_binary(*op, self.lattice_of(lhs), self.lattice_of(rhs))
            }
            InstKind::Unary { op, operand } => self.eval_unary(*op, self.lattice_of(operand)),
            // Memory contents, call results, and arguments are unknown.
            InstKind::Param { .. }
            | InstKind::Alloca { .. }
            | InstKind::Load { .. }
            | InstKind::Call { .. } => Lattice::Nac,
            InstKind::Store { .. } => return,
        };
        self.set_lattice(id, result);
    }

    fn eval_binary(&self, op: BinOp, a: Lattice, b: Lattice) -> Lattice {
        if let (Lattice::Const(x), Lattice::Const(y)) = (a, b) {
            if matches!(op, BinOp::Div | BinOp::Rem) && y == 0 {
                // The instruction stays and becomes a runtime error; folding
                // it away would hide the trap.
                warn!("division or modulus by constant zero is not folded");
                return Lattice::Nac;
            }
            return Lattice::Const(fold_binary(op, x, y));
        }
        if a == Lattice::Nac || b == Lattice::Nac {
            return Lattice::Nac;
        }
        Lattice::Undef
    }

    fn eval_unary(&self, op: UnOp, v: Lattice) -> Lattice {
        match v {
            Lattice::Const(x) => Lattice::Const(fold_unary(op, x)),
            Lattice::Nac => Lattice::Nac,
            Lattice::Undef => Lattice::Undef,
        }
    }

    fn eval_term(&mut self, func: &Function, b: BlockId) {
        match &func.block(b).term {
            Some(Terminator::Jump(target)) => self.mark_edge(func, b, *target),
            Some(Terminator::Branch {
                cond,
                then_to,
                else_to,
            }) => match self.lattice_of(cond) {
                Lattice::Const(c) => {
                    let target = if c != 0 { *then_to } else { *else_to };
                    self.mark_edge(func, b, target);
                }
                Lattice::Nac => {
                    let (then_to, else_to) = (*then_to, *else_to);
                    self.mark_edge(func, b, then_to);
                    self.mark_edge(func, b, else_to);
                }
                Lattice::Undef => {}
            },
            Some(Terminator::Return(_)) | None => {}
        }
    }

    /// Applies the fixpoint to the IR: fold constants into users, fold
    /// branches whose untaken edge is infeasible, unlink blocks without a
    /// feasible way in, shrink phis, and delete pure constant definitions.
    fn rewrite(&mut self, func: &mut Function) {
        let live: Vec<BlockId> = func.reachable_blocks();

        // Fold proven constants into every operand of executable code.
        for &b in &live {
            if !self.executable[b.index()] {
                continue;
            }
            let ids: Vec<ValueId> = {
                let block = func.block(b);
                block.phis.iter().chain(&block.insts).copied().collect()
            };
            for id in ids {
                let values = &self.values;
                func.inst_mut(id).kind.for_each_operand_mut(|v| {
                    if let Value::Def(def) = v
                        && let Lattice::Const(k) = values[def.index()]
                    {
                        *v = Value::Const(k);
                    }
                });
            }
            if let Some(term) = &mut func.block_mut(b).term {
                let values = &self.values;
                term.for_each_operand_mut(|v| {
                    if let Value::Def(def) = v
                        && let Lattice::Const(k) = values[def.index()]
                    {
                        *v = Value::Const(k);
                    }
                });
            }
        }

        // Fold branches whose condition picked a single feasible edge.
        for &b in &live {
            if !self.executable[b.index()] {
                continue;
            }
            if let Some(Terminator::Branch {
                then_to, else_to, ..
            }) = func.block(b).term
            {
                if then_to == else_to {
                    continue;
                }
                let then_live = self.feasible.contains(&(b, then_to));
                let else_live = self.feasible.contains(&(b, else_to));
                match (then_live, else_live) {
                    (true, false) => {
                        func.remove_edge(b, else_to);
                        func.block_mut(b).term = Some(Terminator::Jump(then_to));
                        func.bump_shape_version();
                    }
                    (false, true) => {
                        func.remove_edge(b, then_to);
                        func.block_mut(b).term = Some(Terminator::Jump(else_to));
                        func.bump_shape_version();
                    }
                    _ => {}
                }
            }
        }

        // Blocks with no feasible incoming edge are dead.
        for &b in &live {
            if !self.executable[b.index()] && b != func.entry {
                func.unlink_block(b);
            }
        }

        // A phi left with a single incoming entry is that value.
        for &b in &live {
            if !self.executable[b.index()] {
                continue;
            }
            for phi in func.block(b).phis.clone() {
                if let InstKind::Phi { incoming } = &func.inst(phi).kind
                    && incoming.len() == 1
                {
                    let value = incoming[0].1;
                    func.replace_value_uses(phi, value);
                    func.detach_inst(phi);
                }
            }
        }

        // Delete pure definitions proven constant; their uses are literals
        // now.
        for &b in &live {
            if !self.executable[b.index()] {
                continue;
            }
            let ids: Vec<ValueId> = {
                let block = func.block(b);
                block.phis.iter().chain(&block.insts).copied().collect()
            };
            for id in ids {
                if matches!(self.values[id.index()], Lattice::Const(_)) {
                    let kind = &func.inst(id).kind;
                    if kind.is_pure() || matches!(kind, InstKind::Phi { .. }) {
                        func.detach_inst(id);
                    }
                }
            }
        }
    }
}

fn fold_binary(op: BinOp, x: i64, y: i64) -> i64 {
    match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div => x.wrapping_div(y),
        BinOp::Rem => x.wrapping_rem(y),
        BinOp::Eq => (x == y) as i64,
        BinOp::Ne => (x != y) as i64,
        BinOp::Lt => (x < y) as i64,
        BinOp::Le => (x <= y) as i64,
        BinOp::Gt => (x > y) as i64,
        BinOp::Ge => (x >= y) as i64,
        BinOp::And => (x != 0 && y != 0) as i64,
        BinOp::Or => (x != 0 || y != 0) as i64,
    }
}

fn fold_unary(op: UnOp, x: i64) -> i64 {
    match op {
        UnOp::Neg => x.wrapping_neg(),
        UnOp::Not => (x == 0) as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing;

    fn single_sccp(src: &str) -> Function {
        let mut f = testing::lower_ssa(src).remove(0);
        run(&mut f);
        f.verify().expect("sccp should preserve invariants");
        f
    }

    #[test]
    fn sccp_folds_constant_chain_to_return_literal() {
        let f = single_sccp(&testing::main_fn(
            "let x int = 2 + 3; let y int = x * 4; return y;",
        ));
        assert!(matches!(
            f.block(f.entry).term,
            Some(Terminator::Return(Some(Value::Const(20))))
        ));
        // The folded definitions are gone.
        assert!(f.block(f.entry).insts.is_empty());
    }

    #[test]
    fn sccp_dead_branch_is_pruned() {
        let f = single_sccp("func f(c int) -> int { if (0) { return 1; } else { return 2; } }");

        // The then-block is unreachable now and the entry falls through to
        // the else side with a jump.
        assert!(matches!(f.block(f.entry).term, Some(Terminator::Jump(_))));
        let Some(Terminator::Jump(taken)) = f.block(f.entry).term else {
            unreachable!()
        };
        assert!(matches!(
            f.block(taken).term,
            Some(Terminator::Return(Some(Value::Const(2))))
        ));
        // Only entry and the surviving arm remain reachable.
        assert_eq!(f.reachable_blocks().len(), 2);
    }

    #[test]
    fn sccp_phi_of_equal_constants_folds() {
        let f = single_sccp(&testing::main_fn(
            "let x int = 0;
             if (x) { x = 7; } else { x = 7; }
             return x;",
        ));
        // Wherever control ends up, the return collapsed to the constant.
        let last = *f.reachable_blocks().last().expect("a block returns");
        assert!(matches!(
            f.block(last).term,
            Some(Terminator::Return(Some(Value::Const(7))))
        ));
    }

    #[test]
    fn sccp_loop_counter_stays_varying() {
        let f = single_sccp(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) { s = s + i; }
             return s;",
        ));
        // The loop header still branches: the trip count is not folded.
        let header = f.successors(f.entry)[0];
        assert!(matches!(
            f.block(header).term,
            Some(Terminator::Branch { .. })
        ));
    }

    #[test]
    fn sccp_keeps_division_by_constant_zero() {
        let f = single_sccp(&testing::main_fn("let x int = 1 / 0; return x;"));
        // The division must survive to trap at runtime.
        let has_div = f.block(f.entry).insts.iter().any(|&i| {
            matches!(
                f.inst(i).kind,
                InstKind::Binary {
                    op: BinOp::Div,
                    ..
                }
            )
        });
        assert!(has_div);
    }

    #[test]
    fn sccp_param_blocks_folding() {
        let f = single_sccp("func f(a int) -> int { let k int = 7; return a * k; }");
        // `k` folds into the multiply, but the multiply itself survives.
        let mul = f
            .block(f.entry)
            .insts
            .iter()
            .find_map(|&i| match &f.inst(i).kind {
                InstKind::Binary {
                    op: BinOp::Mul,
                    rhs,
                    ..
                } => Some(*rhs),
                _ => None,
            })
            .expect("multiply should survive");
        assert_eq!(mul, Value::Const(7));
    }

    #[test]
    fn sccp_second_run_makes_no_changes() {
        let mut f = testing::lower_ssa(&testing::main_fn(
            "let s int = 0;
             if (s == 0) { s = 1; } else { s = 2; }
             for (let i int = 0; i < 3; i = i + 1) { s = s + 1; }
             return s;",
        ))
        .remove(0);
        run(&mut f);
        let first = f.to_string();
        run(&mut f);
        assert_eq!(first, f.to_string());
    }

    #[test]
    fn sccp_folded_branch_shrinks_phi() {
        let f = single_sccp(&testing::main_fn(
            "let x int = 0;
             let y int = 0;
             if (x) { y = 1; } else { y = 2; }
             return y + 1;",
        ));
        // After pruning the impossible arm, the join phi collapsed and the
        // addition folded.
        let last = *f.reachable_blocks().last().expect("a block returns");
        assert!(matches!(
            f.block(last).term,
            Some(Terminator::Return(Some(Value::Const(3))))
        ));
    }
}
