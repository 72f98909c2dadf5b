use crate::{
    graph::{EdgeKind, Node, NodeBody, NodeKind},
    types::{Epoch, NodeId},
};

/// Rendering hints for a node or edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Style {
    /// Color name.
    pub color: &'static str,
    /// Stroke or fill style.
    pub style: &'static str,
}

/// A node of the exported graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNode {
    /// Node id.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// For tasks, the number of epochs `0..=epoch` the task went through.
    pub epochs: Option<Epoch>,
    /// Kind-based rendering hints.
    pub style: Style,
}

/// Edge endpoint: a node, and for tasks the epoch the edge leaves or enters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Node id.
    pub node: NodeId,
    /// Task epoch, `None` for buffers and events.
    pub epoch: Option<Epoch>,
}

/// A typed edge of the exported graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExportEdge {
    /// Ordered-before endpoint.
    pub from: Endpoint,
    /// Ordered-after endpoint.
    pub to: Endpoint,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Kind-based rendering hints.
    pub style: Style,
}

/// Point-in-time copy of the computation graph, sorted by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphExport {
    /// All nodes.
    pub nodes: Vec<ExportNode>,
    /// All edges, grouped by the node they enter or leave.
    pub edges: Vec<ExportEdge>,
}

impl NodeKind {
    /// Rendering hints for nodes of this kind.
    #[must_use]
    pub fn style(self) -> Style {
        let color = match self {
            Self::Task => "green",
            Self::Buffer => "yellow",
            Self::Event => "blue",
        };
        Style {
            color,
            style: "filled",
        }
    }
}

impl EdgeKind {
    /// Rendering hints for edges of this kind.
    #[must_use]
    pub fn style(self) -> Style {
        let (color, style) = match self {
            Self::Spawn => ("red", "bold"),
            Self::Continuation => ("black", "bold"),
            Self::Dependency => ("cyan", "bold"),
            Self::Satisfaction => ("cyan", "dashed"),
        };
        Style { color, style }
    }
}

impl GraphExport {
    pub(super) fn from_nodes<'a>(nodes: impl Iterator<Item = &'a Node>) -> Self {
        let mut nodes: Vec<_> = nodes.collect();
        nodes.sort_unstable_by_key(|node| node.id);
        let final_epoch = |id: NodeId| {
            nodes
                .binary_search_by_key(&id, |node| node.id)
                .ok()
                .and_then(|idx| nodes[idx].as_task())
                .map(super::TaskNode::epoch)
        };
        let entry = |node: &Node| Endpoint {
            node: node.id,
            epoch: node.as_task().map(|_| 0),
        };

        let mut export = Self::default();
        for &node in &nodes {
            export.nodes.push(ExportNode {
                id: node.id,
                kind: node.kind(),
                epochs: node.as_task().map(|task| task.epoch().saturating_add(1)),
                style: node.kind().style(),
            });
            if let NodeBody::Task(task) = &node.body {
                for epoch in 0..task.epoch() {
                    export.push(
                        Endpoint {
                            node: node.id,
                            epoch: Some(epoch),
                        },
                        Endpoint {
                            node: node.id,
                            epoch: Some(epoch + 1),
                        },
                        EdgeKind::Continuation,
                    );
                }
                for (epoch, &child) in (0..).zip(&task.spawns) {
                    export.push(
                        Endpoint {
                            node: node.id,
                            epoch: Some(epoch),
                        },
                        Endpoint {
                            node: child,
                            epoch: Some(0),
                        },
                        EdgeKind::Spawn,
                    );
                }
            }
            for (src, kind) in node.incoming() {
                let from = Endpoint {
                    node: src,
                    epoch: final_epoch(src),
                };
                export.push(from, entry(node), kind);
            }
        }
        export
    }

    fn push(&mut self, from: Endpoint, to: Endpoint, kind: EdgeKind) {
        self.edges.push(ExportEdge {
            from,
            to,
            kind,
            style: kind.style(),
        });
    }
}
