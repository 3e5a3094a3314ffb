//! Block Cleanup
//!
//! Structural CFG simplification, iterated to a fixpoint: unreachable
//! blocks are dropped, phis with a single distinct incoming value
//! collapse into that value, and straight-line block pairs merge.

use crate::compiler::ir::{BlockId, Function, InstKind, Terminator, Value, ValueId};

/// Runs block cleanup over `func` until no rewrite applies.
pub fn run(func: &mut Function) {
    let mut changed = true;
    while changed {
        changed = false;
        changed |= drop_unreachable(func);
        changed |= collapse_trivial_phis(func);
        changed |= merge_straight_line(func);
    }
}

/// Unlinks every block that cannot be reached from the entry. Returns
/// whether anything was removed.
fn drop_unreachable(func: &mut Function) -> bool {
    let reachable = func.reachable();
    let mut changed = false;

    for idx in 0..func.blocks.len() {
        let b = BlockId(idx as u32);
        if reachable[b.index()] {
            continue;
        }
        let block = func.block(b);
        let already_husk = block.term.is_none()
            && block.phis.is_empty()
            && block.insts.is_empty()
            && block.preds.is_empty();
        if !already_husk {
            func.unlink_block(b);
            changed = true;
        }
    }

    changed
}

/// Replaces phis that carry a single distinct incoming value (ignoring
/// self-references) by that value. Returns whether any phi collapsed.
fn collapse_trivial_phis(func: &mut Function) -> bool {
    let mut changed = false;

    for b in func.reachable_blocks() {
        for phi in func.block(b).phis.clone() {
            let InstKind::Phi { incoming } = &func.inst(phi).kind else {
                continue;
            };

            let mut distinct: Option<Value> = None;
            let mut trivial = true;
            for (_, value) in incoming {
                if *value == Value::Def(phi) {
                    continue;
                }
                match distinct {
                    None => distinct = Some(*value),
                    Some(seen) if seen == *value => {}
                    Some(_) => {
                        trivial = false;
                        break;
                    }
                }
            }

            if trivial && let Some(value) = distinct {
                func.replace_value_uses(phi, value);
                func.detach_inst(phi);
                changed = true;
            }
        }
    }

    changed
}

/// Merges `B -> S` pairs where B ends in an unconditional jump to S, S has
/// no other predecessor and no phis. Returns whether any merge happened.
fn merge_straight_line(func: &mut Function) -> bool {
    let mut changed = false;

    // Re-scan from the top after each merge: a merged block may itself be
    // mergeable with its new successor.
    'outer: loop {
        for b in func.reachable_blocks() {
            let Some(Terminator::Jump(s)) = func.block(b).term else {
                continue;
            };
            if s == b || s == func.entry {
                continue;
            }
            if func.block(s).preds != vec![b] || !func.block(s).phis.is_empty() {
                continue;
            }

            absorb(func, b, s);
            changed = true;
            continue 'outer;
        }
        break;
    }

    changed
}

/// Moves the body and terminator of `s` into `b` and retargets every edge
/// and phi key that referred to `s`.
fn absorb(func: &mut Function, b: BlockId, s: BlockId) {
    let moved: Vec<ValueId> = func.block_mut(s).insts.drain(..).collect();
    for &inst in &moved {
        func.inst_mut(inst).block = b;
    }
    func.block_mut(b).insts.extend(moved);

    let term = func.block_mut(s).term.take();
    func.block_mut(s).preds.clear();
    func.block_mut(b).term = term;

    for succ in func.successors(b) {
        for pred in &mut func.block_mut(succ).preds {
            if *pred == s {
                *pred = b;
            }
        }
        for phi in func.block(succ).phis.clone() {
            if let InstKind::Phi { incoming } = &mut func.inst_mut(phi).kind {
                for (pred, _) in incoming {
                    if *pred == s {
                        *pred = b;
                    }
                }
            }
        }
    }

    func.bump_shape_version();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::opt::sccp;
    use crate::compiler::testing;

    fn cleanup_single(src: &str) -> Function {
        let mut f = testing::lower_ssa(src).remove(0);
        run(&mut f);
        f.verify().expect("cleanup should preserve invariants");
        f
    }

    #[test]
    fn cleanup_leaves_single_block_alone() {
        let f = cleanup_single(&testing::main_fn("let x int = 1; return x;"));
        assert_eq!(f.reachable_blocks(), vec![f.entry]);
        assert_eq!(f.block(f.entry).insts.len(), 1);
    }

    #[test]
    fn cleanup_drops_unreachable_blocks() {
        let f = cleanup_single(&testing::main_fn(
            "let x int = 1;
             return x;
             x = 2;",
        ));
        // The code after the return was lowered into an orphan block; it
        // must be gone.
        assert_eq!(f.reachable_blocks(), vec![f.entry]);
        for (idx, block) in f.blocks.iter().enumerate() {
            if idx != f.entry.index() {
                assert!(block.insts.is_empty());
                assert!(block.term.is_none());
            }
        }
    }

    #[test]
    fn cleanup_merges_diamond_after_sccp() {
        // SCCP folds the branch; cleanup then merges the straight line
        // into a single block.
        let mut f = testing::lower_ssa(
            "func f(c int) -> int { if (0) { return 1; } else { return 2; } }",
        )
        .remove(0);
        sccp::run(&mut f);
        run(&mut f);
        f.verify().expect("cleanup should preserve invariants");

        assert_eq!(f.reachable_blocks(), vec![f.entry]);
        assert!(matches!(
            f.block(f.entry).term,
            Some(Terminator::Return(Some(Value::Const(2))))
        ));
    }

    #[test]
    fn cleanup_keeps_loops_intact() {
        let f = cleanup_single(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 10; i = i + 1) { s = s + 1; }
             return s;",
        ));
        // header, body, step, and exit cannot merge away: the header has
        // two preds and the back edge must survive.
        let header = f.successors(f.entry)[0];
        assert!(matches!(
            f.block(header).term,
            Some(Terminator::Branch { .. })
        ));
        assert_eq!(f.block(header).preds.len(), 2);
        assert_eq!(f.block(header).phis.len(), 2);
    }

    #[test]
    fn cleanup_collapses_single_pred_phi() {
        let mut f = testing::lower_ssa(&testing::main_fn(
            "let x int = 0;
             if (1) { x = 5; }
             return x;",
        ))
        .remove(0);
        // SCCP removes the impossible edge, leaving the join phi with one
        // incoming value; cleanup folds it into the return.
        sccp::run(&mut f);
        run(&mut f);
        f.verify().expect("cleanup should preserve invariants");

        assert_eq!(f.reachable_blocks(), vec![f.entry]);
        assert!(matches!(
            f.block(f.entry).term,
            Some(Terminator::Return(Some(Value::Const(5))))
        ));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut f = testing::lower_ssa(&testing::main_fn(
            "let s int = 0;
             for (let i int = 0; i < 3; i = i + 1) {
                 if (i == 1) { s = s + 2; }
             }
             return s;",
        ))
        .remove(0);
        run(&mut f);
        let first = f.to_string();
        run(&mut f);
        assert_eq!(first, f.to_string());
    }

    #[test]
    fn cleanup_preserves_observable_return() {
        // Merging must not change which definitions the return sees.
        let f = cleanup_single(&testing::main_fn(
            "let arr [2]int = {};
             arr[1] = 8;
             let x int = arr[1];
             return x;",
        ));
        assert_eq!(f.reachable_blocks(), vec![f.entry]);
        let kinds: Vec<_> = f
            .block(f.entry)
            .insts
            .iter()
            .map(|&i| &f.inst(i).kind)
            .collect();
        assert!(kinds.iter().any(|k| matches!(k, InstKind::Store { .. })));
        assert!(kinds.iter().any(|k| matches!(k, InstKind::Load { .. })));
    }
}
