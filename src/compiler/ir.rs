//! Intermediate Representation
//!
//! The SSA-oriented IR: typed instructions held in dense per-function
//! arenas, grouped into basic blocks connected by terminator edges.
//! Instructions and blocks are addressed by integer ids; operands store
//! ids, and reverse use information is rebuilt on demand by the passes
//! that need it.

use std::collections::HashSet;
use std::fmt;

use crate::compiler::parser::ast::{BinOp, Loc, Type, UnOp};
use crate::error::{CompileError, Result};

/// Identifier of a basic block within its function. Printed as `bN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index of this block in the function's block arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifier of an instruction (and of the virtual register it defines).
/// Printed as `%N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    /// Index of this instruction in the function's instruction arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identifier of a named local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

impl VarId {
    /// Index of this local in the function's local table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand: a literal constant, a reference to an instruction's
/// definition, or (before SSA renaming only) a named local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// 64-bit signed integer constant.
    Const(i64),
    /// The value defined by an instruction.
    Def(ValueId),
    /// A named local, resolved to a `Def` by SSA renaming.
    Var(VarId),
}

/// A named local variable (or parameter).
#[derive(Debug)]
#[allow(missing_docs)]
pub struct Local {
    pub name: String,
    pub ty: Type,
}

/// Operation performed by an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// An integer literal definition.
    Const(i64),
    /// A plain value copy.
    Copy(Value),
    /// An arithmetic, comparison, or logical operation on two values.
    Binary {
        #[allow(missing_docs)]
        op: BinOp,
        #[allow(missing_docs)]
        lhs: Value,
        #[allow(missing_docs)]
        rhs: Value,
    },
    /// Negation or logical not.
    Unary {
        #[allow(missing_docs)]
        op: UnOp,
        #[allow(missing_docs)]
        operand: Value,
    },
    /// The `index`-th function parameter. Appears only in the entry block.
    Param {
        #[allow(missing_docs)]
        index: usize,
    },
    /// Local array storage with the given dimensions. The definition is the
    /// array handle; it is never renamed to a phi.
    Alloca {
        #[allow(missing_docs)]
        dims: Vec<i64>,
    },
    /// Multi-dimensional array element read.
    Load {
        #[allow(missing_docs)]
        base: Value,
        #[allow(missing_docs)]
        indices: Vec<Value>,
    },
    /// Multi-dimensional array element write. Side-effecting.
    Store {
        #[allow(missing_docs)]
        base: Value,
        #[allow(missing_docs)]
        indices: Vec<Value>,
        #[allow(missing_docs)]
        value: Value,
    },
    /// A function call. Treated as side-effecting.
    Call {
        #[allow(missing_docs)]
        callee: String,
        #[allow(missing_docs)]
        args: Vec<Value>,
    },
    /// SSA join: one incoming value per predecessor, keyed by predecessor
    /// and kept in the same order as the block's predecessor list.
    Phi {
        #[allow(missing_docs)]
        incoming: Vec<(BlockId, Value)>,
    },
}

impl InstKind {
    /// Returns `true` for deterministic, side-effect-free, non-memory
    /// operations (the hoistable and freely deletable kinds).
    #[must_use]
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            InstKind::Const(_) | InstKind::Copy(_) | InstKind::Binary { .. } | InstKind::Unary { .. }
        )
    }

    /// Returns `true` for operations with observable side effects.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(self, InstKind::Store { .. } | InstKind::Call { .. })
    }

    /// Calls `f` for every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Value)) {
        match self {
            InstKind::Const(_) | InstKind::Param { .. } | InstKind::Alloca { .. } => {}
            InstKind::Copy(v) => f(v),
            InstKind::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { operand, .. } => f(operand),
            InstKind::Load { base, indices } => {
                f(base);
                for index in indices {
                    f(index);
                }
            }
            InstKind::Store {
                base,
                indices,
                value,
            } => {
                f(base);
                for index in indices {
                    f(index);
                }
                f(value);
            }
            InstKind::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            InstKind::Phi { incoming } => {
                for (_, v) in incoming {
                    f(v);
                }
            }
        }
    }

    /// Calls `f` for every value operand, mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            InstKind::Const(_) | InstKind::Param { .. } | InstKind::Alloca { .. } => {}
            InstKind::Copy(v) => f(v),
            InstKind::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { operand, .. } => f(operand),
            InstKind::Load { base, indices } => {
                f(base);
                for index in indices {
                    f(index);
                }
            }
            InstKind::Store {
                base,
                indices,
                value,
            } => {
                f(base);
                for index in indices {
                    f(index);
                }
                f(value);
            }
            InstKind::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            InstKind::Phi { incoming } => {
                for (_, v) in incoming {
                    f(v);
                }
            }
        }
    }
}

/// An instruction in the arena.
#[derive(Debug)]
pub struct Inst {
    /// The operation.
    pub kind: InstKind,
    /// Type of the defined value (`Void` for stores and void calls).
    pub ty: Type,
    /// The block this instruction currently belongs to.
    pub block: BlockId,
    /// The named local this instruction defines, if it was produced by an
    /// assignment. Used for phi placement and kept afterwards as
    /// provenance.
    pub var: Option<VarId>,
    /// Source location, for diagnostics.
    pub loc: Option<Loc>,
}

/// The single control-flow-transferring operation ending a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional jump.
    Jump(BlockId),
    /// Two-way branch on an integer condition: nonzero takes `then_to`.
    Branch {
        #[allow(missing_docs)]
        cond: Value,
        #[allow(missing_docs)]
        then_to: BlockId,
        #[allow(missing_docs)]
        else_to: BlockId,
    },
    /// Function return, with a value for non-void functions.
    Return(Option<Value>),
}

impl Terminator {
    /// Successor blocks, deduplicated, in target order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_to, else_to, ..
            } => {
                if then_to == else_to {
                    vec![*then_to]
                } else {
                    vec![*then_to, *else_to]
                }
            }
            Terminator::Return(_) => vec![],
        }
    }

    /// Calls `f` for every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Value)) {
        match self {
            Terminator::Jump(_) | Terminator::Return(None) => {}
            Terminator::Branch { cond, .. } => f(cond),
            Terminator::Return(Some(v)) => f(v),
        }
    }

    /// Calls `f` for every value operand, mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Terminator::Jump(_) | Terminator::Return(None) => {}
            Terminator::Branch { cond, .. } => f(cond),
            Terminator::Return(Some(v)) => f(v),
        }
    }
}

/// A basic block: phis, then straight-line instructions, then exactly one
/// terminator.
#[derive(Debug, Default)]
pub struct Block {
    /// Phi instructions, kept at the block head.
    pub phis: Vec<ValueId>,
    /// Regular instructions in execution order.
    pub insts: Vec<ValueId>,
    /// The terminator. `None` only while the builder is still filling the
    /// block, or after the block has been unlinked.
    pub term: Option<Terminator>,
    /// Predecessor blocks, maintained alongside terminator edges.
    pub preds: Vec<BlockId>,
    /// Builder annotation shown in dumps (`entry`, `then`, `loop header`,
    /// ...).
    pub note: Option<&'static str>,
}

/// A function: parameters, a return type, and the arenas owning all blocks
/// and instructions reachable through them.
#[derive(Debug)]
pub struct Function {
    /// Function name.
    pub name: String,
    /// Locals bound to the function parameters, in order.
    pub params: Vec<VarId>,
    /// Return type (`Int` or `Void`).
    pub ret: Type,
    /// Block arena, indexed by [`BlockId`]. Unlinked blocks remain as empty
    /// husks; iteration goes through [`Function::reachable_blocks`].
    pub blocks: Vec<Block>,
    /// Instruction arena, indexed by [`ValueId`]. Detached instructions
    /// remain in the arena but are referenced by no block.
    pub insts: Vec<Inst>,
    /// Named locals, indexed by [`VarId`].
    pub locals: Vec<Local>,
    /// The entry block (always `b0`).
    pub entry: BlockId,
    /// Whether SSA renaming has run.
    pub ssa: bool,
    /// Bumped on every CFG shape mutation; lets analyses cache results.
    shape_version: u64,
}

impl Function {
    /// Returns a new function with an empty entry block.
    #[must_use]
    pub fn new(name: &str, ret: Type) -> Self {
        let mut func = Self {
            name: name.to_string(),
            params: Vec::new(),
            ret,
            blocks: Vec::new(),
            insts: Vec::new(),
            locals: Vec::new(),
            entry: BlockId(0),
            ssa: false,
            shape_version: 0,
        };
        func.add_block(Some("entry"));
        func
    }

    /// Current CFG shape version.
    #[inline]
    #[must_use]
    pub fn shape_version(&self) -> u64 {
        self.shape_version
    }

    /// Records a CFG shape mutation, invalidating cached analyses.
    #[inline]
    pub fn bump_shape_version(&mut self) {
        self.shape_version += 1;
    }

    /// Appends a fresh, empty block.
    pub fn add_block(&mut self, note: Option<&'static str>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            note,
            ..Block::default()
        });
        self.bump_shape_version();
        id
    }

    /// Adds a named local and returns its id.
    pub fn add_local(&mut self, name: &str, ty: Type) -> VarId {
        let id = VarId(self.locals.len() as u32);
        self.locals.push(Local {
            name: name.to_string(),
            ty,
        });
        id
    }

    /// Shared access to a block.
    #[inline]
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Mutable access to a block.
    #[inline]
    #[must_use]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Shared access to an instruction.
    #[inline]
    #[must_use]
    pub fn inst(&self, id: ValueId) -> &Inst {
        &self.insts[id.index()]
    }

    /// Mutable access to an instruction.
    #[inline]
    #[must_use]
    pub fn inst_mut(&mut self, id: ValueId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    /// Shared access to a local.
    #[inline]
    #[must_use]
    pub fn local(&self, id: VarId) -> &Local {
        &self.locals[id.index()]
    }

    /// Appends a new instruction to `block` and returns its definition id.
    pub fn append_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: Type,
        var: Option<VarId>,
        loc: Option<Loc>,
    ) -> ValueId {
        let id = ValueId(self.insts.len() as u32);
        self.insts.push(Inst {
            kind,
            ty,
            block,
            var,
            loc,
        });
        self.block_mut(block).insts.push(id);
        id
    }

    /// Inserts a new phi at the head of `block` and returns its definition
    /// id.
    pub fn insert_phi(
        &mut self,
        block: BlockId,
        incoming: Vec<(BlockId, Value)>,
        var: Option<VarId>,
    ) -> ValueId {
        let id = ValueId(self.insts.len() as u32);
        self.insts.push(Inst {
            kind: InstKind::Phi { incoming },
            ty: Type::Int,
            block,
            var,
            loc: None,
        });
        self.block_mut(block).phis.push(id);
        id
    }

    /// Sets the terminator of `block`, updating predecessor lists on both
    /// the old and new successor sets.
    ///
    /// Any phi operands keyed by a removed edge are dropped; callers that
    /// want to retarget an edge while keeping phi values must edit edges
    /// manually.
    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        if let Some(old) = self.block_mut(block).term.take() {
            for succ in old.successors() {
                self.remove_edge(block, succ);
            }
        }
        for succ in term.successors() {
            self.add_edge(block, succ);
        }
        self.block_mut(block).term = Some(term);
        self.bump_shape_version();
    }

    /// Records the edge `from -> to` in `to`'s predecessor list.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        let preds = &mut self.block_mut(to).preds;
        if !preds.contains(&from) {
            preds.push(from);
        }
        self.bump_shape_version();
    }

    /// Removes the edge `from -> to`: drops `from` from `to`'s predecessor
    /// list along with any phi operands keyed by it.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(to).preds.retain(|&p| p != from);
        for phi in self.block(to).phis.clone() {
            if let InstKind::Phi { incoming } = &mut self.inst_mut(phi).kind {
                incoming.retain(|(pred, _)| *pred != from);
            }
        }
        self.bump_shape_version();
    }

    /// Successor blocks of `block` (empty if it is unterminated).
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .term
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }

    /// Per-block reachability from the entry block.
    #[must_use]
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        seen[self.entry.index()] = true;
        while let Some(b) = stack.pop() {
            for succ in self.successors(b) {
                if !seen[succ.index()] {
                    seen[succ.index()] = true;
                    stack.push(succ);
                }
            }
        }
        seen
    }

    /// Reachable block ids, in insertion order. This is the canonical
    /// iteration order for deterministic output.
    #[must_use]
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let seen = self.reachable();
        (0..self.blocks.len() as u32)
            .map(BlockId)
            .filter(|b| seen[b.index()])
            .collect()
    }

    /// Removes `id` from its block's instruction (or phi) list. The arena
    /// slot is not reused; the instruction simply becomes unreferenced.
    pub fn detach_inst(&mut self, id: ValueId) {
        let block = self.inst(id).block;
        let block = self.block_mut(block);
        block.insts.retain(|&i| i != id);
        block.phis.retain(|&i| i != id);
    }

    /// Unlinks `block` from the CFG entirely: outgoing edges (with their
    /// phi operands in successors) are removed and all contents dropped,
    /// leaving an empty husk that no iteration will visit.
    pub fn unlink_block(&mut self, block: BlockId) {
        if let Some(term) = self.block_mut(block).term.take() {
            for succ in term.successors() {
                self.remove_edge(block, succ);
            }
        }
        let b = self.block_mut(block);
        b.preds.clear();
        b.phis.clear();
        b.insts.clear();
        self.bump_shape_version();
    }

    /// Replaces every use of `from`'s definition with `to`, across all
    /// instruction and terminator operands.
    pub fn replace_value_uses(&mut self, from: ValueId, to: Value) {
        for inst in &mut self.insts {
            inst.kind.for_each_operand_mut(|v| {
                if *v == Value::Def(from) {
                    *v = to;
                }
            });
        }
        for block in &mut self.blocks {
            if let Some(term) = &mut block.term {
                term.for_each_operand_mut(|v| {
                    if *v == Value::Def(from) {
                        *v = to;
                    }
                });
            }
        }
    }

    /// Type of a value operand.
    #[must_use]
    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Const(_) => Type::Int,
            Value::Def(id) => self.inst(*id).ty.clone(),
            Value::Var(v) => self.local(*v).ty.clone(),
        }
    }

    fn invariant_err(&self, block: BlockId, message: String) -> CompileError {
        CompileError::Invariant {
            func: self.name.clone(),
            block: block.0,
            message,
        }
    }

    /// Checks the structural IR invariants: every reachable block is
    /// terminated, instructions are listed exactly once and in the block
    /// they claim, phis match their block's predecessors pairwise in
    /// order, and no operand references a detached instruction. In SSA
    /// form, named-variable operands must no longer appear.
    ///
    /// Use-site domination is checked separately by
    /// [`crate::compiler::ssa::verify_ssa`], which needs dominator
    /// information.
    pub fn verify(&self) -> Result<()> {
        let reachable = self.reachable();
        let mut attached: HashSet<ValueId> = HashSet::new();

        for (idx, block) in self.blocks.iter().enumerate() {
            let id = BlockId(idx as u32);
            for &inst in block.phis.iter().chain(&block.insts) {
                if !attached.insert(inst) {
                    return Err(
                        self.invariant_err(id, format!("instruction {inst} is listed twice"))
                    );
                }
                if self.inst(inst).block != id {
                    return Err(self.invariant_err(
                        id,
                        format!("instruction {inst} is listed outside its parent block"),
                    ));
                }
            }
        }

        for &id in &self.reachable_blocks() {
            let block = self.block(id);

            if block.term.is_none() {
                return Err(self.invariant_err(id, "reachable block has no terminator".into()));
            }

            for &phi in &block.phis {
                let InstKind::Phi { incoming } = &self.inst(phi).kind else {
                    return Err(
                        self.invariant_err(id, format!("{phi} in the phi list is not a phi"))
                    );
                };
                if incoming.len() != block.preds.len() {
                    return Err(self.invariant_err(
                        id,
                        format!(
                            "phi {phi} has {} incoming values for {} predecessors",
                            incoming.len(),
                            block.preds.len()
                        ),
                    ));
                }
                for ((pred, _), expected) in incoming.iter().zip(&block.preds) {
                    if pred != expected {
                        return Err(self.invariant_err(
                            id,
                            format!("phi {phi} incoming order diverges from predecessor order"),
                        ));
                    }
                }
            }

            for &inst in &block.insts {
                if matches!(self.inst(inst).kind, InstKind::Phi { .. }) {
                    return Err(self.invariant_err(
                        id,
                        format!("phi {inst} appears outside the block head"),
                    ));
                }
            }

            for succ in self.successors(id) {
                if !self.block(succ).preds.contains(&id) {
                    return Err(self.invariant_err(
                        id,
                        format!("edge to {succ} is missing from its predecessor list"),
                    ));
                }
            }
            for &pred in &block.preds {
                // Orphan blocks (lowered after break/continue/return) may
                // hold edges into live blocks until dominance analysis
                // prunes them; in SSA form they must be gone.
                if self.ssa && !reachable[pred.index()] {
                    return Err(self.invariant_err(
                        id,
                        format!("predecessor {pred} is unreachable"),
                    ));
                }
                if !self.successors(pred).contains(&id) {
                    return Err(self.invariant_err(
                        id,
                        format!("predecessor {pred} has no edge here"),
                    ));
                }
            }

            let check_value = |v: &Value, holder: String| -> Result<()> {
                match v {
                    Value::Def(def) => {
                        if !attached.contains(def) {
                            return Err(self.invariant_err(
                                id,
                                format!("{holder} references deleted instruction {def}"),
                            ));
                        }
                    }
                    Value::Var(_) if self.ssa => {
                        return Err(self.invariant_err(
                            id,
                            format!("{holder} still references a named variable in SSA form"),
                        ));
                    }
                    _ => {}
                }
                Ok(())
            };

            for &inst in block.phis.iter().chain(&block.insts) {
                let mut result = Ok(());
                self.inst(inst).kind.for_each_operand(|v| {
                    if result.is_ok() {
                        result = check_value(v, format!("instruction {inst}"));
                    }
                });
                result?;
                self.check_types(id, inst)?;
            }
            if let Some(term) = &block.term {
                let mut result = Ok(());
                term.for_each_operand(|v| {
                    if result.is_ok() {
                        result = check_value(v, "terminator".to_string());
                    }
                });
                result?;

                if let Terminator::Branch { cond, .. } = term
                    && self.value_type(cond) != Type::Int
                {
                    return Err(self.invariant_err(id, "branch condition is not int".into()));
                }
                if let Terminator::Return(Some(v)) = term {
                    if self.value_type(v) != self.ret {
                        return Err(self.invariant_err(
                            id,
                            format!("return value type is not {}", self.ret),
                        ));
                    }
                } else if let Terminator::Return(None) = term
                    && self.ret != Type::Void
                {
                    return Err(self.invariant_err(id, "missing return value".into()));
                }
            }
        }

        Ok(())
    }

    /// Type consistency for one instruction: int operands for arithmetic,
    /// comparisons, copies, and phis; an array base with matching index
    /// arity for loads and stores.
    fn check_types(&self, block: BlockId, inst: ValueId) -> Result<()> {
        let int_operands = |values: Vec<&Value>| -> Result<()> {
            for v in values {
                if self.value_type(v) != Type::Int {
                    return Err(self.invariant_err(
                        block,
                        format!("instruction {inst} has a non-int operand"),
                    ));
                }
            }
            Ok(())
        };

        let check_indexing = |base: &Value, indices: &[Value]| -> Result<()> {
            let Type::Array(dims) = self.value_type(base) else {
                return Err(self.invariant_err(
                    block,
                    format!("instruction {inst} indexes a non-array value"),
                ));
            };
            if dims.len() != indices.len() {
                return Err(self.invariant_err(
                    block,
                    format!(
                        "instruction {inst} uses {} indices for a {}-dimensional array",
                        indices.len(),
                        dims.len()
                    ),
                ));
            }
            int_operands(indices.iter().collect())
        };

        match &self.inst(inst).kind {
            InstKind::Const(_) | InstKind::Param { .. } | InstKind::Alloca { .. } => Ok(()),
            InstKind::Copy(v) => int_operands(vec![v]),
            InstKind::Binary { lhs, rhs, .. } => int_operands(vec![lhs, rhs]),
            InstKind::Unary { operand, .. } => int_operands(vec![operand]),
            InstKind::Load { base, indices } => check_indexing(base, indices),
            InstKind::Store {
                base,
                indices,
                value,
            } => {
                check_indexing(base, indices)?;
                int_operands(vec![value])
            }
            // Call argument types are the callee's concern; only scalars
            // and array handles exist, both legal as arguments.
            InstKind::Call { .. } => Ok(()),
            InstKind::Phi { incoming } => int_operands(incoming.iter().map(|(_, v)| v).collect()),
        }
    }

    fn fmt_value(&self, value: &Value) -> String {
        match value {
            Value::Const(k) => k.to_string(),
            Value::Def(id) => id.to_string(),
            Value::Var(v) => self.local(*v).name.clone(),
        }
    }

    fn fmt_inst(&self, id: ValueId) -> String {
        let inst = self.inst(id);
        let rhs = match &inst.kind {
            InstKind::Const(k) => format!("const {k}"),
            InstKind::Copy(v) => format!("copy {}", self.fmt_value(v)),
            InstKind::Binary { op, lhs, rhs } => format!(
                "{} {}, {}",
                op.mnemonic(),
                self.fmt_value(lhs),
                self.fmt_value(rhs)
            ),
            InstKind::Unary { op, operand } => {
                format!("{} {}", op.mnemonic(), self.fmt_value(operand))
            }
            InstKind::Param { index } => format!("param {index}"),
            InstKind::Alloca { dims } => {
                let dims: String = dims.iter().map(|d| format!("[{d}]")).collect();
                format!("alloca {dims}int")
            }
            InstKind::Load { base, indices } => {
                let mut s = format!("load {}", self.fmt_value(base));
                for index in indices {
                    s.push_str(&format!(", {}", self.fmt_value(index)));
                }
                s
            }
            InstKind::Store {
                base,
                indices,
                value,
            } => {
                let mut s = format!("store {}", self.fmt_value(base));
                for index in indices {
                    s.push_str(&format!(", {}", self.fmt_value(index)));
                }
                s.push_str(&format!(", {}", self.fmt_value(value)));
                s
            }
            InstKind::Call { callee, args } => {
                let mut s = format!("call {callee}");
                for arg in args {
                    s.push_str(&format!(", {}", self.fmt_value(arg)));
                }
                s
            }
            InstKind::Phi { incoming } => {
                let entries: Vec<String> = incoming
                    .iter()
                    .map(|(pred, v)| format!("[{pred}: {}]", self.fmt_value(v)))
                    .collect();
                format!("phi {}", entries.join(", "))
            }
        };

        let mut line = if inst.ty == Type::Void {
            rhs
        } else {
            format!("{id} = {rhs}")
        };

        // Before renaming, show which named local a definition binds, so
        // the pre-SSA dump stays readable.
        if !self.ssa
            && let Some(var) = inst.var
        {
            line.push_str(&format!(" ; {}", self.local(var).name));
        }

        line
    }

    /// Lines of the textual IR for one block (label line included).
    #[must_use]
    pub fn block_lines(&self, id: BlockId) -> Vec<String> {
        let block = self.block(id);
        let mut lines = Vec::new();

        let mut label = format!("{id}:");
        if let Some(note) = block.note {
            label.push_str(&format!(" ; {note}"));
        }
        lines.push(label);

        for &phi in &block.phis {
            lines.push(format!("    {}", self.fmt_inst(phi)));
        }
        for &inst in &block.insts {
            lines.push(format!("    {}", self.fmt_inst(inst)));
        }

        let term = match &block.term {
            Some(Terminator::Jump(target)) => format!("jump {target}"),
            Some(Terminator::Branch {
                cond,
                then_to,
                else_to,
            }) => format!("branch {}, {then_to}, {else_to}", self.fmt_value(cond)),
            Some(Terminator::Return(None)) => "return".to_string(),
            Some(Terminator::Return(Some(v))) => format!("return {}", self.fmt_value(v)),
            None => "<unterminated>".to_string(),
        };
        lines.push(format!("    {term}"));

        lines
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|&v| {
                let local = self.local(v);
                format!("{} {}", local.name, local.ty)
            })
            .collect();
        writeln!(f, "func {}({}) -> {}", self.name, params.join(", "), self.ret)?;

        for id in self.reachable_blocks() {
            for line in self.block_lines(id) {
                writeln!(f, "{line}")?;
            }
        }

        Ok(())
    }
}
