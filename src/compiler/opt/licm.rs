//! Loop-Invariant Code Motion (LICM)
//!
//! Finds natural loops through back edges in the dominator tree, gives
//! each loop a dedicated preheader when it lacks one, and hoists pure
//! instructions whose operands are defined outside the loop. Inner loops
//! are processed first; hoisting repeats until nothing moves.

use std::collections::{HashMap, HashSet};

use crate::compiler::dominance::DomTree;
use crate::compiler::ir::{BlockId, Function, InstKind, Terminator, Value, ValueId};
use crate::compiler::opt::AnalysisCache;

/// A natural loop: the header plus every block that can reach a back edge
/// without leaving through the header.
#[derive(Debug)]
struct Loop {
    header: BlockId,
    blocks: HashSet<BlockId>,
    /// Back-edge sources.
    latches: Vec<BlockId>,
}

/// Runs LICM over `func` (which must be in SSA form).
pub fn run(func: &mut Function, cache: &mut AnalysisCache) {
    loop {
        let dt = cache.dom_tree(func).clone();
        let loops = find_loops(func, &dt);
        if loops.is_empty() {
            return;
        }

        // Creating preheaders changes the CFG shape; restart with fresh
        // dominators before hoisting through them.
        let mut restructured = false;
        for lp in &loops {
            if ensure_preheader(func, lp).is_none() {
                restructured = true;
            }
        }
        if restructured {
            continue;
        }

        let mut moved = false;
        for lp in &loops {
            let preheader =
                ensure_preheader(func, lp).expect("preheaders were created above");
            moved |= hoist_loop(func, &dt, lp, preheader);
        }
        if !moved {
            return;
        }
    }
}

/// Collects natural loops, innermost (smallest) first.
fn find_loops(func: &Function, dt: &DomTree) -> Vec<Loop> {
    let mut by_header: HashMap<BlockId, (HashSet<BlockId>, Vec<BlockId>)> = HashMap::new();

    for b in func.reachable_blocks() {
        for succ in func.successors(b) {
            if dt.dominates(succ, b) {
                // succ is a loop header and b -> succ a back edge; the loop
                // body is everything that reaches b backwards without
                // passing the header.
                let entry = by_header.entry(succ).or_default();
                entry.1.push(b);
                entry.0.insert(succ);
                let mut stack = vec![b];
                while let Some(n) = stack.pop() {
                    if !entry.0.insert(n) {
                        continue;
                    }
                    stack.extend(func.block(n).preds.iter().copied());
                }
            }
        }
    }

    let mut loops: Vec<Loop> = by_header
        .into_iter()
        .map(|(header, (blocks, latches))| Loop {
            header,
            blocks,
            latches,
        })
        .collect();
    loops.sort_by_key(|lp| (lp.blocks.len(), lp.header));
    loops
}

/// Returns the loop's preheader if it already has one: a unique
/// out-of-loop predecessor of the header whose only successor is the
/// header. Otherwise creates one, rerouting the outside edges and the
/// header phis through it, and returns `None` so the caller recomputes
/// dominators.
fn ensure_preheader(func: &mut Function, lp: &Loop) -> Option<BlockId> {
    let outside: Vec<BlockId> = func
        .block(lp.header)
        .preds
        .iter()
        .copied()
        .filter(|pred| !lp.blocks.contains(pred))
        .collect();

    if let [single] = outside[..]
        && func.successors(single) == vec![lp.header]
    {
        return Some(single);
    }

    let preheader = func.add_block(Some("preheader"));

    // Retarget each outside edge at the new block, keeping predecessor
    // lists in step by hand: `remove_edge` would drop the phi operands we
    // are about to move.
    for &pred in &outside {
        if let Some(term) = &mut func.block_mut(pred).term {
            match term {
                Terminator::Jump(target) => {
                    if *target == lp.header {
                        *target = preheader;
                    }
                }
                Terminator::Branch {
                    then_to, else_to, ..
                } => {
                    if *then_to == lp.header {
                        *then_to = preheader;
                    }
                    if *else_to == lp.header {
                        *else_to = preheader;
                    }
                }
                Terminator::Return(_) => {}
            }
        }
        func.block_mut(preheader).preds.push(pred);
    }

    // Each header phi routes its outside values through the preheader:
    // several outside entries become a phi in the preheader, a single one
    // moves as-is.
    for phi in func.block(lp.header).phis.clone() {
        let InstKind::Phi { incoming } = &func.inst(phi).kind else {
            continue;
        };
        let (outside_in, inside_in): (Vec<_>, Vec<_>) = incoming
            .clone()
            .into_iter()
            .partition(|(pred, _)| outside.contains(pred));

        let routed = if let [(_, value)] = outside_in[..] {
            value
        } else {
            let var = func.inst(phi).var;
            Value::Def(func.insert_phi(preheader, outside_in, var))
        };

        let mut new_incoming = inside_in;
        new_incoming.push((preheader, routed));
        if let InstKind::Phi { incoming } = &mut func.inst_mut(phi).kind {
            *incoming = new_incoming;
        }
    }

    // Header predecessors: the in-loop ones stay, the outside ones are
    // replaced by the preheader (mirroring the phi operand order above).
    let header_block = func.block_mut(lp.header);
    header_block.preds.retain(|pred| lp.blocks.contains(pred));
    header_block.preds.push(preheader);

    func.set_terminator(preheader, Terminator::Jump(lp.header));
    None
}

/// Hoists invariant instructions of one loop into its preheader,
/// iterating until a fixpoint. Returns whether anything moved.
fn hoist_loop(func: &mut Function, dt: &DomTree, lp: &Loop, preheader: BlockId) -> bool {
    // An instruction must execute on every complete iteration for the move
    // to preserve its count-independence: its block has to dominate every
    // back-edge source.
    let mut always_runs: HashMap<BlockId, bool> = HashMap::new();
    let mut dominates_latches = |b: BlockId| {
        *always_runs
            .entry(b)
            .or_insert_with(|| lp.latches.iter().all(|&latch| dt.dominates(b, latch)))
    };

    let mut moved_any = false;
    let mut changed = true;
    while changed {
        changed = false;

        for b in dt.preorder(lp.header) {
            if !lp.blocks.contains(&b) || !dominates_latches(b) {
                continue;
            }

            for inst in func.block(b).insts.clone() {
                if !func.inst(inst).kind.is_pure() {
                    continue;
                }

                let mut invariant = true;
                func.inst(inst).kind.for_each_operand(|v| {
                    if let Value::Def(def) = v
                        && lp.blocks.contains(&func.inst(*def).block)
                    {
                        invariant = false;
                    }
                });
                if !invariant {
                    continue;
                }

                hoist(func, inst, b, preheader);
                changed = true;
                moved_any = true;
            }
        }
    }

    moved_any
}

/// Moves `inst` from `from` to the end of the preheader's body, keeping
/// the original relative order of hoisted instructions.
fn hoist(func: &mut Function, inst: ValueId, from: BlockId, preheader: BlockId) {
    func.block_mut(from).insts.retain(|&i| i != inst);
    func.block_mut(preheader).insts.push(inst);
    func.inst_mut(inst).block = preheader;
}
