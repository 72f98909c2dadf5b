mod export;

pub use crate::graph::export::{Endpoint, ExportEdge, ExportNode, GraphExport, Style};
use crate::{
    error::Violation,
    sync::{RwLock, RwLockReadGuard},
    types::{AccessMode, Epoch, HashMap, IndexMap, NodeId},
};
use derive_more::{Debug, Display};

/// Kind of a computation-graph node.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Unit of scheduled work.
    #[display("task")]
    Task,
    /// Runtime-managed memory region.
    #[display("buffer")]
    Buffer,
    /// One-shot synchronization point.
    #[display("event")]
    Event,
}

/// Kind of an ordering edge.
///
/// Only `Dependency` and `Satisfaction` are stored as incoming edges; spawn
/// edges live on [`TaskNode`] and continuation edges are implied by epochs.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Parent epoch to spawned child.
    #[display("spawn")]
    Spawn,
    /// Task epoch `i` to epoch `i + 1`.
    #[display("continuation")]
    Continuation,
    /// Declared producer to consumer.
    #[display("dependency")]
    Dependency,
    /// Task to the event it satisfied.
    #[display("satisfaction")]
    Satisfaction,
}

/// A node of the computation graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    /// Producers this node depends on, in insertion order.
    incoming: IndexMap<NodeId, EdgeKind>,
    body: NodeBody,
}

/// Kind-specific node state.
#[derive(Debug)]
pub enum NodeBody {
    /// Task state.
    Task(TaskNode),
    /// Buffer state.
    Buffer(BufferNode),
    /// Events carry no extra state.
    Event,
}

/// Spawn tree links and epoch of a task.
#[derive(Debug, Default)]
pub struct TaskNode {
    parent: Option<NodeId>,
    /// Number of children spawned so far.
    epoch: Epoch,
    /// Spawned children in spawn order; the index of a child is the parent
    /// epoch it was spawned at.
    spawns: Vec<NodeId>,
    #[debug(skip)]
    positions: HashMap<NodeId, Epoch>,
}

/// Buffer metadata.
#[derive(Debug)]
pub struct BufferNode {
    mode: AccessMode,
    creator: Option<NodeId>,
}

impl Node {
    /// Node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Task(_) => NodeKind::Task,
            NodeBody::Buffer(_) => NodeKind::Buffer,
            NodeBody::Event => NodeKind::Event,
        }
    }

    /// Kind-specific state.
    #[must_use]
    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    /// Producers this node depends on, with the kind of each edge.
    pub fn incoming(&self) -> impl ExactSizeIterator<Item = (NodeId, EdgeKind)> + '_ {
        self.incoming.iter().map(|(&id, &kind)| (id, kind))
    }

    /// Task state, if this is a task.
    #[must_use]
    pub fn as_task(&self) -> Option<&TaskNode> {
        match &self.body {
            NodeBody::Task(task) => Some(task),
            _ => None,
        }
    }

    /// Buffer state, if this is a buffer.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&BufferNode> {
        match &self.body {
            NodeBody::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl TaskNode {
    /// Task that spawned this one.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Number of children spawned so far.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Children in spawn order.
    #[must_use]
    pub fn spawns(&self) -> &[NodeId] {
        &self.spawns
    }

    /// Epoch this task was in when it spawned `child`.
    #[must_use]
    pub fn spawn_epoch(&self, child: NodeId) -> Option<Epoch> {
        self.positions.get(&child).copied()
    }
}

impl BufferNode {
    /// Mode the buffer was created with.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Task that created the buffer, if any.
    #[must_use]
    pub fn creator(&self) -> Option<NodeId> {
        self.creator
    }
}

/// Append-only computation graph shared by all workers.
///
/// Every mutation validates all referenced ids before touching the node table,
/// so a rejected mutation leaves the graph unchanged, and takes the single
/// writer lock, so node-then-edge sequences are atomic to readers.
#[derive(Debug, Default)]
pub struct Graph {
    inner: RwLock<GraphInner>,
}

#[derive(Debug, Default)]
pub(crate) struct GraphInner {
    nodes: HashMap<NodeId, Node>,
}

/// Shared read access to the graph, held for the duration of a query.
pub struct GraphView<'a> {
    inner: RwLockReadGuard<'a, GraphInner>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the graph for reading.
    pub fn read(&self) -> GraphView<'_> {
        GraphView {
            inner: self.inner.read(),
        }
    }

    /// Creates a task. When `parent` is given the task is also spawned by it,
    /// and the parent epoch it was spawned at is returned.
    ///
    /// # Errors
    /// If `id` exists or `parent` is not a known task.
    pub fn create_task(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
    ) -> Result<Option<Epoch>, Violation> {
        self.spawn_task(id, parent, &[], None)
    }

    /// Creates a task together with its dependency edges and output event in
    /// one atomic step.
    ///
    /// # Errors
    /// If `id` exists, or any referenced node is unknown or of the wrong kind.
    pub fn spawn_task(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
        dependencies: &[NodeId],
        output_event: Option<NodeId>,
    ) -> Result<Option<Epoch>, Violation> {
        let mut inner = self.inner.write();
        inner.ensure_absent(id)?;
        if let Some(parent) = parent {
            inner.ensure_spawnable(parent)?;
        }
        for &dep in dependencies {
            if dep == id {
                return Err(Violation::SelfEdge(id));
            }
            inner.node(dep)?;
        }
        if let Some(event) = output_event {
            inner.ensure_kind(event, NodeKind::Event)?;
        }

        inner.insert(id, NodeBody::Task(TaskNode::default()));
        let spawn_epoch = parent.map(|parent| inner.link_spawn(parent, id));
        for &dep in dependencies {
            inner.link(dep, id, EdgeKind::Dependency);
        }
        if let Some(event) = output_event {
            inner.link(id, event, EdgeKind::Satisfaction);
        }
        Ok(spawn_epoch)
    }

    /// Creates a buffer node.
    ///
    /// # Errors
    /// If `id` exists or `creator` is not a known task.
    pub fn create_buffer(
        &self,
        id: NodeId,
        mode: AccessMode,
        creator: Option<NodeId>,
    ) -> Result<(), Violation> {
        let mut inner = self.inner.write();
        inner.ensure_absent(id)?;
        if let Some(creator) = creator {
            inner.ensure_kind(creator, NodeKind::Task)?;
        }
        inner.insert(id, NodeBody::Buffer(BufferNode { mode, creator }));
        Ok(())
    }

    /// Creates an event node.
    ///
    /// # Errors
    /// If `id` exists.
    pub fn create_event(&self, id: NodeId) -> Result<(), Violation> {
        let mut inner = self.inner.write();
        inner.ensure_absent(id)?;
        inner.insert(id, NodeBody::Event);
        Ok(())
    }

    /// Records that `dst` depends on `src`.
    ///
    /// # Errors
    /// If either node is unknown or they are the same node.
    pub fn add_dependency_edge(&self, src: NodeId, dst: NodeId) -> Result<(), Violation> {
        if src == dst {
            return Err(Violation::SelfEdge(src));
        }
        let mut inner = self.inner.write();
        inner.node(src)?;
        inner.node(dst)?;
        inner.link(src, dst, EdgeKind::Dependency);
        Ok(())
    }

    /// Makes the root task `child` a spawned child of `parent`, advancing the
    /// parent's epoch. Returns the epoch the parent was in at the spawn.
    ///
    /// # Errors
    /// If either node is not a known task, or `child` already has a parent.
    pub fn add_spawn_edge(&self, parent: NodeId, child: NodeId) -> Result<Epoch, Violation> {
        if parent == child {
            return Err(Violation::SelfEdge(child));
        }
        let mut inner = self.inner.write();
        inner.ensure_spawnable(parent)?;
        if inner.task(child)?.parent.is_some() {
            return Err(Violation::AlreadySpawned(child));
        }
        Ok(inner.link_spawn(parent, child))
    }

    /// Records that `task` satisfied `event`, ordering the whole task before
    /// everything that depends on the event.
    ///
    /// # Errors
    /// If `task` is not a known task or `event` not a known event.
    pub fn satisfy_event(&self, task: NodeId, event: NodeId) -> Result<(), Violation> {
        let mut inner = self.inner.write();
        inner.ensure_kind(task, NodeKind::Task)?;
        inner.ensure_kind(event, NodeKind::Event)?;
        inner.link(task, event, EdgeKind::Satisfaction);
        Ok(())
    }

    /// Snapshot of nodes and typed edges for offline visualization.
    #[must_use]
    pub fn export(&self) -> GraphExport {
        GraphExport::from_nodes(self.read().inner.nodes.values())
    }
}

impl GraphInner {
    fn node(&self, id: NodeId) -> Result<&Node, Violation> {
        self.nodes.get(&id).ok_or(Violation::UnknownNode(id))
    }

    fn task(&self, id: NodeId) -> Result<&TaskNode, Violation> {
        let node = self.node(id)?;
        node.as_task().ok_or(Violation::KindMismatch {
            id,
            expected: NodeKind::Task,
            actual: node.kind(),
        })
    }

    fn buffer(&self, id: NodeId) -> Result<&BufferNode, Violation> {
        let node = self.node(id)?;
        node.as_buffer().ok_or(Violation::KindMismatch {
            id,
            expected: NodeKind::Buffer,
            actual: node.kind(),
        })
    }

    fn ensure_absent(&self, id: NodeId) -> Result<(), Violation> {
        if self.nodes.contains_key(&id) {
            return Err(Violation::DuplicateNode(id));
        }
        Ok(())
    }

    fn ensure_kind(&self, id: NodeId, expected: NodeKind) -> Result<(), Violation> {
        let actual = self.node(id)?.kind();
        if actual != expected {
            return Err(Violation::KindMismatch { id, expected, actual });
        }
        Ok(())
    }

    fn ensure_spawnable(&self, parent: NodeId) -> Result<(), Violation> {
        if self.task(parent)?.epoch() == Epoch::MAX {
            return Err(Violation::EpochOverflow(parent));
        }
        Ok(())
    }

    fn insert(&mut self, id: NodeId, body: NodeBody) {
        let node = Node {
            id,
            incoming: IndexMap::default(),
            body,
        };
        let prev = self.nodes.insert(id, node);
        assert!(prev.is_none(), "GraphInner::insert: [1]");
    }

    fn link(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) {
        let dst = self.nodes.get_mut(&dst).expect("GraphInner::link: [1]");
        // A satisfaction recorded over an earlier dependency keeps the first kind.
        dst.incoming.entry(src).or_insert(kind);
    }

    fn link_spawn(&mut self, parent: NodeId, child: NodeId) -> Epoch {
        let NodeBody::Task(parent_task) = &mut self
            .nodes
            .get_mut(&parent)
            .expect("GraphInner::link_spawn: [1]")
            .body
        else {
            unreachable!("GraphInner::link_spawn: [2]");
        };
        let epoch = parent_task.epoch;
        parent_task.epoch += 1;
        parent_task.spawns.push(child);
        let prev = parent_task.positions.insert(child, epoch);
        assert!(prev.is_none(), "GraphInner::link_spawn: [3]");

        let NodeBody::Task(child_task) = &mut self
            .nodes
            .get_mut(&child)
            .expect("GraphInner::link_spawn: [4]")
            .body
        else {
            unreachable!("GraphInner::link_spawn: [5]");
        };
        child_task.parent = Some(parent);
        epoch
    }
}

impl GraphView<'_> {
    /// Looks a node up.
    ///
    /// # Errors
    /// If the node was never created.
    pub fn node(&self, id: NodeId) -> Result<&Node, Violation> {
        self.inner.node(id)
    }

    /// Looks a task up.
    ///
    /// # Errors
    /// If the node was never created or is not a task.
    pub fn task(&self, id: NodeId) -> Result<&TaskNode, Violation> {
        self.inner.task(id)
    }

    /// Looks a buffer up.
    ///
    /// # Errors
    /// If the node was never created or is not a buffer.
    pub fn buffer(&self, id: NodeId) -> Result<&BufferNode, Violation> {
        self.inner.buffer(id)
    }

    /// Current epoch of a task.
    ///
    /// # Errors
    /// If the node was never created or is not a task.
    pub fn epoch(&self, task: NodeId) -> Result<Epoch, Violation> {
        Ok(self.task(task)?.epoch())
    }

    /// Whether `dst` has an incoming dependency edge from `src`.
    #[must_use]
    pub fn has_dependency(&self, src: NodeId, dst: NodeId) -> bool {
        self.inner
            .nodes
            .get(&dst)
            .and_then(|node| node.incoming.get(&src))
            .is_some_and(|&kind| kind == EdgeKind::Dependency)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }
}
