//! Dead Code Elimination (DCE)
//!
//! Backward mark-and-sweep over SSA values: stores, calls, and the
//! operands of terminators are the roots; everything they transitively
//! read stays, everything else goes. Phis survive only while their result
//! is used.

use std::collections::VecDeque;

use crate::compiler::ir::{Function, Value, ValueId};

/// Runs DCE over `func` (which must be in SSA form). Running it twice
/// yields the same IR.
pub fn run(func: &mut Function) {
    let mut live = vec![false; func.insts.len()];
    let mut work: VecDeque<ValueId> = VecDeque::new();

    let mut mark = |v: &Value, work: &mut VecDeque<ValueId>, live: &mut Vec<bool>| {
        if let Value::Def(def) = v
            && !live[def.index()]
        {
            live[def.index()] = true;
            work.push_back(*def);
        }
    };

    // Roots: side-effecting instructions keep themselves and their
    // operands; terminators keep their operands.
    for b in func.reachable_blocks() {
        let block = func.block(b);
        for &inst in &block.insts {
            let inst_ref = func.inst(inst);
            if inst_ref.kind.has_side_effects() {
                live[inst.index()] = true;
                inst_ref
                    .kind
                    .for_each_operand(|v| mark(v, &mut work, &mut live));
            }
        }
        if let Some(term) = &block.term {
            term.for_each_operand(|v| mark(v, &mut work, &mut live));
        }
    }

    // Everything a live definition reads is live too.
    while let Some(def) = work.pop_front() {
        func.inst(def)
            .kind
            .for_each_operand(|v| mark(v, &mut work, &mut live));
    }

    // Sweep. Side-effecting instructions stay regardless of their result.
    for b in func.reachable_blocks() {
        let keep: Vec<ValueId> = func
            .block(b)
            .insts
            .iter()
            .copied()
            .filter(|&i| live[i.index()] || func.inst(i).kind.has_side_effects())
            .collect();
        func.block_mut(b).insts = keep;

        let phis: Vec<ValueId> = func
            .block(b)
            .phis
            .iter()
            .copied()
            .filter(|&i| live[i.index()])
            .collect();
        func.block_mut(b).phis = phis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{InstKind, Terminator};
    use crate::compiler::testing;

    fn dce_single(src: &str) -> Function {
        let mut f = testing::lower_ssa(src).remove(0);
        run(&mut f);
        f.verify().expect("dce should preserve invariants");
        f
    }

    fn inst_count(f: &Function) -> usize {
        f.reachable_blocks()
            .into_iter()
            .map(|b| f.block(b).phis.len() + f.block(b).insts.len())
            .sum()
    }

    #[test]
    fn dce_removes_unused_arithmetic() {
        let f = dce_single(&testing::main_fn(
            "let unused int = 1 + 2; let x int = 3; return x;",
        ));
        // Only the returned definition survives.
        assert_eq!(inst_count(&f), 1);
        assert!(matches!(f.inst(f.block(f.entry).insts[0]).kind, InstKind::Const(3)));
    }

    #[test]
    fn dce_keeps_stores_and_their_inputs() {
        let f = dce_single(&testing::main_fn(
            "let arr [4]int = {}; arr[0] = 42; return 0;",
        ));
        // The store is essential, which keeps the alloca alive too.
        let kinds: Vec<_> = f
            .block(f.entry)
            .insts
            .iter()
            .map(|&i| &f.inst(i).kind)
            .collect();
        assert!(kinds.iter().any(|k| matches!(k, InstKind::Alloca { .. })));
        assert!(kinds.iter().any(|k| matches!(k, InstKind::Store { .. })));
    }

    #[test]
    fn dce_removes_dead_load() {
        let f = dce_single(&testing::main_fn(
            "let arr [4]int = {}; arr[0] = 1; let unused int = arr[0]; return 2;",
        ));
        let has_load = f
            .reachable_blocks()
            .into_iter()
            .any(|b| {
                f.block(b)
                    .insts
                    .iter()
                    .any(|&i| matches!(f.inst(i).kind, InstKind::Load { .. }))
            });
        assert!(!has_load);
    }

    #[test]
    fn dce_keeps_calls_for_their_effects() {
        let f = dce_single(
            "func main() -> int { let unused int = g(5); return 0; }
             func g(x int) -> int { return x; }",
        );
        // main still contains the call even though its result is unused.
        let has_call = f
            .block(f.entry)
            .insts
            .iter()
            .any(|&i| matches!(f.inst(i).kind, InstKind::Call { .. }));
        assert!(has_call);
    }

    #[test]
    fn dce_preserves_loop_carried_phis() {
        let f = dce_single(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) { s = s + 1; }
             return s;",
        ));
        let header = f.successors(f.entry)[0];
        // Both phis feed either the branch or the return; nothing may
        // vanish.
        assert_eq!(f.block(header).phis.len(), 2);
        assert!(matches!(
            f.block(header).term,
            Some(Terminator::Branch { .. })
        ));
    }

    #[test]
    fn dce_drops_orphaned_phi() {
        let f = dce_single(&testing::main_fn(
            "let x int = 0;
             if (x) { x = 1; } else { x = 2; }
             return 9;",
        ));
        // The join phi for x is unused once the return ignores it.
        for b in f.reachable_blocks() {
            assert!(f.block(b).phis.is_empty());
        }
    }

    #[test]
    fn dce_is_idempotent() {
        let mut f = testing::lower_ssa(&testing::main_fn(
            "let arr [2]int = {};
             arr[0] = 3;
             let s int = 0;
             for (let i int = 0; i < arr[0]; i = i + 1) { s = s + 2; let dead int = s * 7; }
             return s;",
        ))
        .remove(0);
        run(&mut f);
        let first = f.to_string();
        run(&mut f);
        assert_eq!(first, f.to_string());
    }
}
