//! Dominator Analysis
//!
//! Iterative computation of dominator sets, the immediate-dominator tree,
//! and dominance frontiers over a function's CFG. Results are valid until
//! the next CFG shape mutation; passes recompute (or consult the cache in
//! [`crate::compiler::opt`]) on entry.

use std::collections::HashSet;

use crate::compiler::ir::{BlockId, Function};

/// The dominator tree of a function, plus the reachability snapshot it was
/// computed against.
#[derive(Debug, Clone)]
pub struct DomTree {
    /// Per-block reachability from entry at computation time.
    pub reachable: Vec<bool>,
    /// Immediate dominator per block. `None` for the entry block and for
    /// unreachable blocks.
    pub idom: Vec<Option<BlockId>>,
    /// Children in the dominator tree, in block-index order.
    pub children: Vec<Vec<BlockId>>,
}

impl DomTree {
    /// Computes the dominator tree. Predecessor edges coming from
    /// unreachable blocks are pruned first (along with their phi operands)
    /// so that dominance, phi arity, and predecessor lists agree.
    #[must_use]
    pub fn compute(func: &mut Function) -> DomTree {
        let reachable = func.reachable();

        // Orphan blocks (e.g. code lowered after a `break`) may still hold
        // edges into live blocks; those edges are meaningless for
        // dominance and must not survive into phi operands either.
        for id in func.reachable_blocks() {
            let stale: Vec<BlockId> = func
                .block(id)
                .preds
                .iter()
                .copied()
                .filter(|p| !reachable[p.index()])
                .collect();
            for pred in stale {
                func.remove_edge(pred, id);
            }
        }

        let n = func.blocks.len();
        let entry = func.entry;

        // Iterative data-flow: Dom(entry) = {entry}, Dom(b) = all blocks
        // otherwise; refine until fixpoint.
        let all: HashSet<u32> = (0..n as u32).filter(|b| reachable[*b as usize]).collect();
        let mut doms: Vec<HashSet<u32>> = (0..n)
            .map(|b| {
                if b == entry.index() {
                    HashSet::from([entry.0])
                } else {
                    all.clone()
                }
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for b in 0..n {
                if !reachable[b] || b == entry.index() {
                    continue;
                }

                let preds = &func.block(BlockId(b as u32)).preds;
                let mut new_dom = match preds.first() {
                    Some(first) => doms[first.index()].clone(),
                    None => HashSet::new(),
                };
                for pred in preds.iter().skip(1) {
                    new_dom.retain(|d| doms[pred.index()].contains(d));
                }
                new_dom.insert(b as u32);

                if new_dom != doms[b] {
                    doms[b] = new_dom;
                    changed = true;
                }
            }
        }

        // idom(b) is the strict dominator with the largest dominator set:
        // the deepest one.
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        for b in 0..n {
            if !reachable[b] || b == entry.index() {
                continue;
            }
            let best = doms[b]
                .iter()
                .filter(|&&d| d as usize != b)
                .max_by_key(|&&d| doms[d as usize].len());
            idom[b] = best.map(|&d| BlockId(d));
        }

        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for b in 0..n {
            if let Some(parent) = idom[b] {
                children[parent.index()].push(BlockId(b as u32));
            }
        }

        DomTree {
            reachable,
            idom,
            children,
        }
    }

    /// Returns `true` if `a` dominates `b` (reflexively).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur.index()] {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// Returns `true` if `a` strictly dominates `b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Dominator-tree preorder starting at `root`, using an explicit stack
    /// so the traversal order stays under our control.
    #[must_use]
    pub fn preorder(&self, root: BlockId) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(b) = stack.pop() {
            order.push(b);
            // Reversed so children are visited in block-index order.
            for &child in self.children[b.index()].iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

/// Computes the dominance frontier of every block:
/// `DF(b) = { y | exists p in preds(y): b dominates p and b does not
/// strictly dominate y }`.
#[must_use]
pub fn dominance_frontiers(func: &Function, dt: &DomTree) -> Vec<HashSet<BlockId>> {
    let mut df: Vec<HashSet<BlockId>> = vec![HashSet::new(); func.blocks.len()];

    let blocks = (0..func.blocks.len() as u32)
        .map(BlockId)
        .filter(|y| dt.reachable[y.index()]);
    for y in blocks {
        for &pred in &func.block(y).preds {
            // Walk up from the predecessor; every block below idom(y) on
            // that path has y in its frontier.
            let mut runner = pred;
            while Some(runner) != dt.idom[y.index()] {
                df[runner.index()].insert(y);
                match dt.idom[runner.index()] {
                    Some(parent) => runner = parent,
                    None => break,
                }
            }
        }
    }

    df
}
