//! Basic-block control-flow graph of a method body.

use crate::body::{HandlerKind, MethodBody};
use crate::instruction::Label;
use crate::opcode::Flow;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Maximal straight-line run of instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub range: Range<usize>,
}

/// How control reaches a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Fallthrough,
    Branch,
    /// Exceptional entry into the handler of the region with this index.
    Handler(usize),
}

impl Edge {
    /// Stack depth a handler is entered with, or `None` for ordinary edges.
    pub fn handler_entry_depth(self, body: &MethodBody) -> Option<u32> {
        match self {
            Edge::Handler(region) => Some(match body.regions[region].kind {
                HandlerKind::Catch(_) => 1,
                HandlerKind::Finally => 0,
            }),
            _ => None,
        }
    }
}

/// Control-flow graph over basic blocks.
#[derive(Clone, Debug)]
pub struct FlowGraph {
    pub graph: DiGraph<BasicBlock, Edge>,
    /// Block containing each instruction.
    pub block_of: Vec<NodeIndex>,
    pub entry: NodeIndex,
}

impl FlowGraph {
    /// Builds the graph. Branches to labels missing from `labels` get no edge; the verifier
    /// reports them separately.
    pub fn build(body: &MethodBody, labels: &HashMap<Label, usize>) -> Self {
        let len = body.len();
        let mut leaders = BTreeSet::new();
        leaders.insert(0);
        for (index, ins) in body.instructions.iter().enumerate() {
            if let Some(target) = ins.branch_target().and_then(|l| labels.get(&l)) {
                leaders.insert(*target);
            }
            if ins.opcode.flow() != Flow::Next {
                leaders.insert(index + 1);
            }
        }
        for region in &body.regions {
            leaders.extend([
                region.try_start,
                region.try_end,
                region.handler_start,
                region.handler_end,
            ]);
        }
        leaders.retain(|&l| l < len);

        let mut graph = DiGraph::new();
        let mut block_of = vec![NodeIndex::end(); len];
        let starts: Vec<usize> = leaders.into_iter().collect();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len);
            let node = graph.add_node(BasicBlock { range: start..end });
            for slot in &mut block_of[start..end] {
                *slot = node;
            }
        }

        for node in graph.node_indices().collect::<Vec<_>>() {
            let range = graph[node].range.clone();
            let last = range.end - 1;
            let ins = &body.instructions[last];
            let target = ins
                .branch_target()
                .and_then(|l| labels.get(&l))
                .map(|&t| block_of[t]);
            match ins.opcode.flow() {
                Flow::Next => {
                    if range.end < len {
                        graph.add_edge(node, block_of[range.end], Edge::Fallthrough);
                    }
                }
                Flow::CondBranch => {
                    if let Some(target) = target {
                        graph.add_edge(node, target, Edge::Branch);
                    }
                    if range.end < len {
                        graph.add_edge(node, block_of[range.end], Edge::Fallthrough);
                    }
                }
                Flow::Branch | Flow::Leave => {
                    if let Some(target) = target {
                        graph.add_edge(node, target, Edge::Branch);
                    }
                }
                Flow::Return | Flow::Throw | Flow::EndFinally => {}
            }
            for (index, region) in body.regions.iter().enumerate() {
                if region.protects(range.start) && region.handler_start < len {
                    graph.add_edge(node, block_of[region.handler_start], Edge::Handler(index));
                }
            }
        }

        let entry = if len == 0 {
            NodeIndex::end()
        } else {
            block_of[0]
        };
        Self {
            graph,
            block_of,
            entry,
        }
    }

    /// Instruction indices reachable from the entry block.
    pub fn reachable(&self) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        if self.graph.node_count() == 0 {
            return seen;
        }
        let mut dfs = Dfs::new(&self.graph, self.entry);
        while let Some(node) = dfs.next(&self.graph) {
            seen.extend(self.graph[node].range.clone());
        }
        seen
    }
}
