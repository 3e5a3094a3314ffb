//! Graphviz Output
//!
//! Renders each function's CFG as a DOT digraph: one node per reachable
//! block labeled with its textual IR lines, `T`/`F` edge labels on
//! conditional branches, and optional dominator-tree (blue) and
//! dominance-frontier (red) overlay edges.

use std::fmt::Write;

use crate::compiler::dominance::{DomTree, dominance_frontiers};
use crate::compiler::ir::{Function, Terminator};

/// Overlay selection for [`render`].
#[derive(Debug, Clone, Copy)]
pub struct Overlays {
    /// Draw immediate-dominator edges in blue.
    pub idom_tree: bool,
    /// Draw dominance-frontier edges in red.
    pub frontiers: bool,
}

fn escape(line: &str) -> String {
    line.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders every function as its own digraph. Dominator information is
/// recomputed per function for the requested overlays.
#[must_use]
pub fn render(funcs: &mut [Function], overlays: Overlays) -> String {
    let mut out = String::new();
    for func in funcs {
        render_function(&mut out, func, overlays);
    }
    out
}

fn render_function(out: &mut String, func: &mut Function, overlays: Overlays) {
    let dom = if overlays.idom_tree || overlays.frontiers {
        Some(DomTree::compute(func))
    } else {
        None
    };

    writeln!(out, "digraph {} {{", func.name).expect("writing to a String cannot fail");
    out.push_str("    rankdir = TD;\n");
    out.push_str("    node [shape=box, fontname=\"monospace\"];\n");

    let blocks = func.reachable_blocks();

    for &b in &blocks {
        let label: String = func
            .block_lines(b)
            .iter()
            .map(|line| format!("{}\\l", escape(line)))
            .collect();
        writeln!(out, "    \"{b}\" [label=\"{label}\"];").expect("writing to a String cannot fail");
    }

    for &b in &blocks {
        match &func.block(b).term {
            Some(Terminator::Jump(target)) => {
                writeln!(out, "    \"{b}\" -> \"{target}\";")
                    .expect("writing to a String cannot fail");
            }
            Some(Terminator::Branch {
                then_to, else_to, ..
            }) => {
                writeln!(out, "    \"{b}\" -> \"{then_to}\" [label=\"T\"];")
                    .expect("writing to a String cannot fail");
                writeln!(out, "    \"{b}\" -> \"{else_to}\" [label=\"F\"];")
                    .expect("writing to a String cannot fail");
            }
            Some(Terminator::Return(_)) | None => {}
        }
    }

    if let Some(dom) = &dom {
        if overlays.idom_tree {
            for &b in &blocks {
                for &child in &dom.children[b.index()] {
                    writeln!(out, "    \"{b}\" -> \"{child}\" [color=blue, style=dashed];")
                        .expect("writing to a String cannot fail");
                }
            }
        }
        if overlays.frontiers {
            let df = dominance_frontiers(func, dom);
            for &b in &blocks {
                for target in &df[b.index()] {
                    writeln!(
                        out,
                        "    \"{b}\" -> \"{target}\" [color=red, style=dotted];"
                    )
                    .expect("writing to a String cannot fail");
                }
            }
        }
    }

    out.push_str("}\n");
}
