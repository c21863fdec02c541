//! DIMACS min-cost flow rendering.
//!
//! Full network:
//!
//! ```text
//! c <comment>
//! p min <max node id> <arc count>
//! n <id> <excess>                     (nodes with non-zero excess)
//! a <src> <dst> <low> <cap> <cost>
//! c EOI
//! ```
//!
//! Change batches use the incremental extension: `n <id> <excess> <type>`
//! adds a node, `r <id>` removes one, `m <id> <excess> <type>` changes one,
//! `a` adds an arc and `x` changes one. A removed arc is an `x` line with
//! zero capacity and cost.

use std::io::{self, Write};

use crate::change::GraphChange;
use crate::mirror::GraphMirror;

pub fn write_network<W: Write>(mirror: &GraphMirror, mut out: W) -> io::Result<()> {
    writeln!(out, "c warpgrid flow network")?;
    writeln!(out, "p min {} {}", mirror.max_node_id(), mirror.num_arcs())?;
    for (id, node) in mirror.nodes() {
        if node.excess != 0 {
            writeln!(out, "n {id} {}", node.excess)?;
        }
    }
    for ((src, dst), arc) in mirror.arcs() {
        writeln!(out, "a {src} {dst} {} {} {}", arc.lower, arc.upper, arc.cost)?;
    }
    writeln!(out, "c EOI")?;
    out.flush()
}

pub fn write_changes<W: Write>(changes: &[GraphChange], mut out: W) -> io::Result<()> {
    for change in changes {
        match change {
            GraphChange::AddNode { id, node_type, excess } => {
                writeln!(out, "n {id} {excess} {}", node_type.code())?
            }
            GraphChange::DeleteNode { id } => writeln!(out, "r {id}")?,
            GraphChange::ChangeNode { id, node_type, excess } => {
                writeln!(out, "m {id} {excess} {}", node_type.code())?
            }
            GraphChange::AddArc {
                src,
                dst,
                lower,
                upper,
                cost,
                ..
            } => writeln!(out, "a {src} {dst} {lower} {upper} {cost}")?,
            GraphChange::ChangeArc {
                src,
                dst,
                lower,
                upper,
                cost,
            } => writeln!(out, "x {src} {dst} {lower} {upper} {cost}")?,
            GraphChange::DeleteArc { src, dst } => writeln!(out, "x {src} {dst} 0 0 0")?,
        }
    }
    writeln!(out, "c EOI")?;
    out.flush()
}

/// [`write_changes`] into a string.
pub fn changes_to_string(changes: &[GraphChange]) -> String {
    let mut buf = Vec::new();
    write_changes(changes, &mut buf).expect("writing to a Vec cannot fail");
    String::from_utf8_lossy(&buf).into_owned()
}
