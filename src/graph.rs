//! Graph emission: render the event tree through a node/edge sink.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::analyzer::Analyzer;
use crate::error::{Error, Result};
use crate::node::NodeType;
use crate::tree::Tree;

/// Receives node and edge creation calls during graph emission.
///
/// `add_node` returns an id for later edges. `pruned` marks nodes that are
/// disabled in the supplied flag tree; their subtrees are not emitted.
pub trait GraphSink {
    fn add_node(&mut self, label: &str, pruned: bool) -> usize;
    fn add_edge(&mut self, from: usize, to: usize);
}

/// Emits the analyzer's tree into `sink`, one node per arena entry plus a
/// synthetic root. Nodes disabled in `tree` appear as pruned leaves.
pub fn write_graph(analyzer: &Analyzer, tree: Option<&Tree>, sink: &mut impl GraphSink) {
    if analyzer.nodes().is_empty() {
        return;
    }
    let root = sink.add_node("Log", false);
    for child in analyzer.root().children() {
        emit(analyzer, tree, sink, root, child);
    }
}

fn emit(
    analyzer: &Analyzer,
    tree: Option<&Tree>,
    sink: &mut impl GraphSink,
    parent_id: usize,
    index: usize,
) {
    let node = &analyzer.nodes()[index];
    let label = match node.node_type {
        NodeType::Log => "Log",
        NodeType::Stream => "Stream",
        NodeType::Region => analyzer
            .format(node)
            .map(|d| d.message.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("Region"),
        NodeType::Message => analyzer
            .format(node)
            .map(|d| d.message.as_str())
            .unwrap_or("?"),
    };

    let pruned = tree.is_some_and(|t| !t.flags()[index].is_enabled());
    let id = sink.add_node(label, pruned);
    sink.add_edge(parent_id, id);
    if pruned {
        return;
    }

    if matches!(node.node_type, NodeType::Stream | NodeType::Region) {
        for child in node.children() {
            emit(analyzer, tree, sink, id, child);
        }
    }
}

/// Minimal DOT renderer over any writer. Pruned nodes are drawn filled red
/// without a label, like the reference graphs.
pub struct DotWriter<W: Write> {
    out: W,
    next_id: usize,
    error: Option<io::Error>,
}

impl<W: Write> DotWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "digraph log {{")?;
        Ok(Self {
            out,
            next_id: 0,
            error: None,
        })
    }

    /// Closes the graph and returns the writer, or the first error that
    /// occurred during emission.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        writeln!(self.out, "}}")?;
        Ok(self.out)
    }

    fn record(&mut self, result: io::Result<()>) {
        if let (Err(e), None) = (result, &self.error) {
            self.error = Some(e);
        }
    }
}

impl<W: Write> GraphSink for DotWriter<W> {
    fn add_node(&mut self, label: &str, pruned: bool) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let result = if pruned {
            writeln!(self.out, "  n{id} [style=filled, fillcolor=red];")
        } else {
            let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
            writeln!(self.out, "  n{id} [label=\"{escaped}\"];")
        };
        self.record(result);
        id
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        let result = writeln!(self.out, "  n{from} -> n{to};");
        self.record(result);
    }
}

/// Renders the tree as a DOT file at `path`.
pub fn write_dot(analyzer: &Analyzer, tree: Option<&Tree>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| Error::IoOpen {
        path: path.to_owned(),
        source,
    })?;
    let mut writer = DotWriter::new(BufWriter::new(file)).map_err(|source| Error::IoWrite {
        path: path.to_owned(),
        source,
    })?;
    write_graph(analyzer, tree, &mut writer);
    writer
        .finish()
        .map(drop)
        .map_err(|source| Error::IoWrite {
            path: path.to_owned(),
            source,
        })
}
