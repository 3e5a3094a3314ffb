//! Machine-independent Optimization
//!
//! The SSA optimization pipeline: sparse conditional constant propagation,
//! loop-invariant code motion, dead code elimination, and block cleanup.
//! Passes communicate only through the IR; derived analyses are cached
//! against the function's CFG shape version and recomputed when stale.

pub mod cleanup;
pub mod dce;
pub mod licm;
pub mod sccp;

use tracing::debug;

use crate::compiler::dominance::DomTree;
use crate::compiler::ir::Function;
use crate::compiler::ssa;
use crate::error::Result;

/// Which passes the pipeline should run.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct PassConfig {
    pub sccp: bool,
    pub licm: bool,
    pub dce: bool,
    pub cleanup: bool,
}

impl PassConfig {
    /// Every pass enabled.
    #[must_use]
    pub fn all() -> Self {
        Self {
            sccp: true,
            licm: true,
            dce: true,
            cleanup: true,
        }
    }
}

/// Dominator information cached against a CFG shape version.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    cached: Option<(u64, DomTree)>,
}

impl AnalysisCache {
    /// Returns the dominator tree for `func`, recomputing it if the CFG
    /// shape changed since the cached copy was built.
    pub fn dom_tree(&mut self, func: &mut Function) -> &DomTree {
        let version = func.shape_version();
        let stale = match &self.cached {
            Some((cached_version, _)) => *cached_version != version,
            None => true,
        };
        if stale {
            let dt = DomTree::compute(func);
            // Pruning inside `compute` may itself bump the version.
            self.cached = Some((func.shape_version(), dt));
        }
        &self.cached.as_ref().expect("just populated").1
    }
}

/// Runs the enabled passes over `func`, which must be in SSA form.
/// The IR is re-verified after each pass.
///
/// # Errors
///
/// Returns an invariant error if any pass leaves the IR malformed.
pub fn optimize(func: &mut Function, config: &PassConfig) -> Result<()> {
    let mut cache = AnalysisCache::default();

    if config.sccp {
        debug!(func = %func.name, "running sccp");
        sccp::run(func);
        func.verify()?;
        ssa::verify_ssa(func)?;
    }
    if config.licm {
        debug!(func = %func.name, "running licm");
        licm::run(func, &mut cache);
        func.verify()?;
        ssa::verify_ssa(func)?;
    }
    if config.dce {
        debug!(func = %func.name, "running dce");
        dce::run(func);
        func.verify()?;
        ssa::verify_ssa(func)?;
    }
    if config.cleanup {
        debug!(func = %func.name, "running block cleanup");
        cleanup::run(func);
        func.verify()?;
        ssa::verify_ssa(func)?;
    }

    Ok(())
}
