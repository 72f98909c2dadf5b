mod cache;

pub use crate::oracle::cache::ReachabilityCache;
use crate::{
    error::Violation,
    graph::{Graph, GraphView},
    sync::{AtomicU64, Ordering},
    types::{Epoch, HashMap, HashSet, NodeId, TaskEpoch},
};
use std::collections::VecDeque;
use tracing::trace;

/// Happens-before oracle over the computation graph.
///
/// A query asks which of a batch of `(task, epoch)` sources are *not* provably
/// ordered before a destination task. Sources are resolved, cheapest first, by
/// identity (a task is sequential), by the [`ReachabilityCache`], and finally by
/// one backward breadth-first search from the destination shared by the whole
/// batch.
///
/// The search follows two kinds of predecessor links:
/// - incoming dependency and satisfaction edges, which order the *whole*
///   producer before the consumer, so they reach it at bound `Epoch::MAX`;
/// - for tasks, the parent link, which reaches the parent only at the epoch it
///   spawned the task in. Parent epochs up to and including that one are
///   ordered before the child, later ones are not.
///
/// A task reached at bound `b` resolves every pending source of that task with
/// epoch `<= b`, and the bound is merged into the cache for later queries.
///
/// [`Oracle::reachable_by_edges`] answers the same question with parent links
/// left out. Its bounds are kept in a cache of their own.
#[derive(Debug, Default)]
pub struct Oracle {
    cache: ReachabilityCache,
    edge_cache: ReachabilityCache,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    trivially_ordered: AtomicU64,
    cache_hits: AtomicU64,
    traversals: AtomicU64,
    visited_nodes: AtomicU64,
}

/// Snapshot of oracle counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OracleStats {
    /// Number of `reachable` calls.
    pub queries: u64,
    /// Sources resolved because they belong to the destination itself.
    pub trivially_ordered: u64,
    /// Sources resolved from the cache.
    pub cache_hits: u64,
    /// Graph searches started.
    pub traversals: u64,
    /// Nodes expanded across all searches.
    pub visited_nodes: u64,
}

impl Oracle {
    /// Creates an oracle with a cold cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sources that are not provably ordered before
    /// `destination`, sorted and without duplicates. An empty result means
    /// every source happens before it.
    ///
    /// # Errors
    /// If a search is needed and `destination` or an unresolved source is not a
    /// known task.
    pub fn reachable(
        &self,
        graph: &Graph,
        sources: &[TaskEpoch],
        destination: NodeId,
    ) -> Result<Vec<TaskEpoch>, Violation> {
        self.query(graph, sources, destination, true)
    }

    /// Like [`Oracle::reachable`], but only dependency and satisfaction edges
    /// order tasks. Being spawned orders nothing.
    ///
    /// # Errors
    /// Same as [`Oracle::reachable`].
    pub fn reachable_by_edges(
        &self,
        graph: &Graph,
        sources: &[TaskEpoch],
        destination: NodeId,
    ) -> Result<Vec<TaskEpoch>, Violation> {
        self.query(graph, sources, destination, false)
    }

    /// Whether `source` happens before `destination`.
    ///
    /// # Errors
    /// Same as [`Oracle::reachable`].
    pub fn happens_before(
        &self,
        graph: &Graph,
        source: TaskEpoch,
        destination: NodeId,
    ) -> Result<bool, Violation> {
        Ok(self.reachable(graph, &[source], destination)?.is_empty())
    }

    /// The memoization cache.
    #[must_use]
    pub fn cache(&self) -> &ReachabilityCache {
        &self.cache
    }

    /// The memoization cache of edge-only queries.
    #[must_use]
    pub fn edge_cache(&self) -> &ReachabilityCache {
        &self.edge_cache
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> OracleStats {
        let Counters {
            queries,
            trivially_ordered,
            cache_hits,
            traversals,
            visited_nodes,
        } = &self.counters;
        OracleStats {
            queries: queries.load(Ordering::Relaxed),
            trivially_ordered: trivially_ordered.load(Ordering::Relaxed),
            cache_hits: cache_hits.load(Ordering::Relaxed),
            traversals: traversals.load(Ordering::Relaxed),
            visited_nodes: visited_nodes.load(Ordering::Relaxed),
        }
    }

    fn query(
        &self,
        graph: &Graph,
        sources: &[TaskEpoch],
        destination: NodeId,
        follow_spawn: bool,
    ) -> Result<Vec<TaskEpoch>, Violation> {
        let cache = if follow_spawn { &self.cache } else { &self.edge_cache };
        let counters = &self.counters;
        counters.queries.fetch_add(1, Ordering::Relaxed);

        let mut batch = Vec::with_capacity(sources.len());
        for &source in sources {
            if source.task == destination {
                counters.trivially_ordered.fetch_add(1, Ordering::Relaxed);
            } else if cache.covers(source.task, source.epoch, destination) {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(%source, %destination, follow_spawn, "reachability cache hit");
            } else {
                batch.push(source);
            }
        }
        if batch.is_empty() {
            return Ok(batch);
        }
        batch.sort_unstable();
        batch.dedup();

        let view = graph.read();
        view.task(destination)?;
        for source in &batch {
            view.task(source.task)?;
        }
        self.traverse(&view, cache, &mut batch, destination, follow_spawn);
        Ok(batch)
    }

    fn traverse(
        &self,
        view: &GraphView<'_>,
        cache: &ReachabilityCache,
        batch: &mut Vec<TaskEpoch>,
        destination: NodeId,
        follow_spawn: bool,
    ) {
        self.counters.traversals.fetch_add(1, Ordering::Relaxed);
        // Best bound each node has been reached at so far.
        let mut reached: HashMap<NodeId, Epoch> = HashMap::default();
        let mut expanded: HashSet<NodeId> = HashSet::default();
        let mut frontier = VecDeque::from([destination]);
        expanded.insert(destination);
        let mut visited = 0u64;

        'search: while let Some(id) = frontier.pop_front() {
            visited += 1;
            let node = view.node(id).expect("Oracle::traverse: [1]");
            // Predecessors of a task hold for all of its epochs, so a node is
            // expanded once whatever bound it was reached at.
            let spawner = node
                .as_task()
                .and_then(|task| task.parent())
                .filter(|_| follow_spawn)
                .map(|parent| {
                    let epoch = view
                        .task(parent)
                        .expect("Oracle::traverse: [2]")
                        .spawn_epoch(id)
                        .expect("Oracle::traverse: [3]");
                    (parent, epoch)
                });
            let producers = node.incoming().map(|(src, _)| (src, Epoch::MAX));
            for (pred, bound) in producers.chain(spawner) {
                if reached.get(&pred).is_some_and(|&best| best >= bound) {
                    continue;
                }
                reached.insert(pred, bound);
                let before = batch.len();
                batch.retain(|source| source.task != pred || source.epoch > bound);
                if batch.len() != before {
                    cache.merge(pred, destination, bound);
                }
                if batch.is_empty() {
                    break 'search;
                }
                if expanded.insert(pred) {
                    frontier.push_back(pred);
                }
            }
        }

        self.counters.visited_nodes.fetch_add(visited, Ordering::Relaxed);
        trace!(%destination, visited, unresolved = batch.len(), "reachability search finished");
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    fn id(x: u64) -> NodeId {
        NodeId(x)
    }

    fn at(task: u64, epoch: Epoch) -> TaskEpoch {
        TaskEpoch::new(task, epoch)
    }

    /// Root 1 spawns 2 at epoch 0 and 3 at epoch 1; 2 spawns 4 at epoch 0.
    fn spawn_tree() -> Graph {
        let graph = Graph::new();
        graph.create_task(id(1), None).unwrap();
        graph.create_task(id(2), Some(id(1))).unwrap();
        graph.create_task(id(3), Some(id(1))).unwrap();
        graph.create_task(id(4), Some(id(2))).unwrap();
        graph
    }

    #[test]
    fn parent_is_ordered_up_to_its_spawn_epoch() {
        let graph = spawn_tree();
        let oracle = Oracle::new();
        assert_eq!(oracle.happens_before(&graph, at(1, 0), id(2)), Ok(true));
        assert_eq!(oracle.happens_before(&graph, at(1, 1), id(2)), Ok(false));
        assert_eq!(oracle.happens_before(&graph, at(1, 1), id(3)), Ok(true));
        assert_eq!(oracle.happens_before(&graph, at(1, 2), id(3)), Ok(false));
        // Grandparent through the parent's spawn epoch.
        assert_eq!(oracle.happens_before(&graph, at(1, 0), id(4)), Ok(true));
        assert_eq!(oracle.happens_before(&graph, at(1, 1), id(4)), Ok(false));
        // Children are never ordered before their parent without an edge.
        assert_eq!(oracle.happens_before(&graph, at(2, 0), id(1)), Ok(false));
        // Siblings are concurrent.
        assert_eq!(oracle.happens_before(&graph, at(2, 0), id(3)), Ok(false));
        assert_eq!(oracle.happens_before(&graph, at(3, 0), id(2)), Ok(false));
    }

    #[test]
    fn same_task_is_trivially_ordered() {
        let graph = spawn_tree();
        let oracle = Oracle::new();
        assert_eq!(oracle.reachable(&graph, &[at(2, 7), at(2, 0)], id(2)), Ok(vec![]));
        let stats = oracle.stats();
        assert_eq!(stats.trivially_ordered, 2);
        assert_eq!(stats.traversals, 0);
    }

    #[test]
    fn event_satisfaction_orders_the_whole_task() {
        let graph = spawn_tree();
        graph.create_event(id(10)).unwrap();
        graph.satisfy_event(id(2), id(10)).unwrap();
        graph.add_dependency_edge(id(10), id(3)).unwrap();
        let oracle = Oracle::new();
        assert_eq!(oracle.happens_before(&graph, at(2, 5), id(3)), Ok(true));
        assert_eq!(oracle.cache().bound(id(2), id(3)), Some(Epoch::MAX));
        assert_eq!(oracle.happens_before(&graph, at(3, 0), id(2)), Ok(false));
    }

    #[test]
    fn batch_returns_only_unresolved_sources() {
        let graph = spawn_tree();
        let oracle = Oracle::new();
        let unresolved = oracle
            .reachable(&graph, &[at(3, 0), at(1, 0), at(1, 1), at(1, 0), at(4, 0)], id(4))
            .unwrap();
        assert_eq!(unresolved, vec![at(1, 1), at(3, 0)]);
        assert_eq!(oracle.stats().traversals, 1);
    }

    #[test]
    fn warm_queries_skip_the_search() {
        let graph = spawn_tree();
        let oracle = Oracle::new();
        assert_eq!(oracle.happens_before(&graph, at(1, 1), id(3)), Ok(true));
        assert_eq!(oracle.happens_before(&graph, at(1, 0), id(3)), Ok(true));
        assert_eq!(oracle.happens_before(&graph, at(1, 1), id(3)), Ok(true));
        let stats = oracle.stats();
        assert_eq!(stats.traversals, 1);
        assert_eq!(stats.cache_hits, 2);
    }

    #[test]
    fn edge_queries_ignore_spawn_links() {
        let graph = spawn_tree();
        graph.create_event(id(10)).unwrap();
        graph.satisfy_event(id(2), id(10)).unwrap();
        graph.add_dependency_edge(id(10), id(3)).unwrap();
        let oracle = Oracle::new();

        assert_eq!(
            oracle.reachable_by_edges(&graph, &[at(1, 0)], id(2)),
            Ok(vec![at(1, 0)])
        );
        assert_eq!(
            oracle.reachable_by_edges(&graph, &[at(2, 4), at(1, 0)], id(3)),
            Ok(vec![at(1, 0)])
        );
        assert_eq!(oracle.edge_cache().bound(id(2), id(3)), Some(Epoch::MAX));
        assert_eq!(oracle.edge_cache().bound(id(1), id(3)), None);

        // The spawn-aware answer is cached apart and unaffected.
        assert_eq!(oracle.reachable(&graph, &[at(1, 0)], id(3)), Ok(vec![]));
        assert_eq!(oracle.cache().bound(id(1), id(3)), Some(1));
        assert_eq!(
            oracle.reachable_by_edges(&graph, &[at(1, 0)], id(3)),
            Ok(vec![at(1, 0)])
        );
    }

    #[test]
    fn unknown_destination_is_a_violation() {
        let graph = spawn_tree();
        let oracle = Oracle::new();
        assert_eq!(
            oracle.reachable(&graph, &[at(1, 0)], id(42)),
            Err(Violation::UnknownNode(id(42)))
        );
    }
}
