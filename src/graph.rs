//! Condition/operation dependency graph for eligibility resolution
//!
//! The graph is bipartite by construction: every edge either leads from a
//! prerequisite condition into an operation, or from an operation out to one
//! of its postconditions. Eligibility of an operation on a given job is
//! decided purely from the conditions adjacent to it.

use petgraph::algo::all_simple_paths;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of the built-in always-true condition
///
/// Operations registered without a prerequisite hang off this sentinel, and
/// it doubles as the default start node for chain enumeration.
pub const ALWAYS_CONDITION_ID: &str = "__always__";

type Predicate<J> = Arc<dyn Fn(&J) -> bool>;
type Action<J> = Arc<dyn Fn(&J)>;

/// A named predicate over a job's state
///
/// Equality and hashing are keyed on the identifier alone, so registering a
/// condition twice collapses onto one graph node regardless of which closure
/// instance carried it.
pub struct FlowCondition<J> {
    id: String,
    predicate: Option<Predicate<J>>,
}

impl<J> FlowCondition<J> {
    pub fn new(id: impl Into<String>, predicate: impl Fn(&J) -> bool + 'static) -> Self {
        Self {
            id: id.into(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// The sentinel condition that holds for every job
    pub fn always() -> Self {
        Self {
            id: ALWAYS_CONDITION_ID.to_string(),
            predicate: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Evaluate the predicate; the sentinel evaluates true unconditionally
    pub fn evaluate(&self, job: &J) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(job),
            None => true,
        }
    }
}

impl<J> Clone for FlowCondition<J> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<J> PartialEq for FlowCondition<J> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<J> Eq for FlowCondition<J> {}

impl<J> std::hash::Hash for FlowCondition<J> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<J> fmt::Debug for FlowCondition<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCondition").field("id", &self.id).finish()
    }
}

/// A named unit of work applicable to a job
///
/// Like [`FlowCondition`], identity is the caller-supplied id, never the
/// wrapped closure.
pub struct FlowOperation<J> {
    id: String,
    action: Action<J>,
}

impl<J> FlowOperation<J> {
    pub fn new(id: impl Into<String>, action: impl Fn(&J) + 'static) -> Self {
        Self {
            id: id.into(),
            action: Arc::new(action),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the operation's action against the job
    pub fn run(&self, job: &J) {
        (self.action)(job)
    }
}

impl<J> Clone for FlowOperation<J> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            action: self.action.clone(),
        }
    }
}

impl<J> PartialEq for FlowOperation<J> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<J> Eq for FlowOperation<J> {}

impl<J> std::hash::Hash for FlowOperation<J> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<J> fmt::Debug for FlowOperation<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowOperation").field("id", &self.id).finish()
    }
}

enum FlowNode<J> {
    Condition(FlowCondition<J>),
    Operation(FlowOperation<J>),
}

/// Directed graph of conditions and operations
pub struct FlowGraph<J> {
    graph: DiGraph<FlowNode<J>, ()>,
    condition_indices: HashMap<String, NodeIndex>,
    operation_indices: HashMap<String, NodeIndex>,
}

impl<J> Default for FlowGraph<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> FlowGraph<J> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            condition_indices: HashMap::new(),
            operation_indices: HashMap::new(),
        }
    }

    /// Insert or merge an operation with its gating conditions
    ///
    /// Re-adding an operation with the same identifier and an overlapping set
    /// of conditions merges into the existing nodes rather than duplicating
    /// them.
    pub fn add_operation(
        &mut self,
        operation: FlowOperation<J>,
        prerequisite: Option<FlowCondition<J>>,
        postconditions: Vec<FlowCondition<J>>,
    ) {
        let prerequisite = prerequisite.unwrap_or_else(FlowCondition::always);
        let pre_index = self.condition_index(prerequisite);
        let op_index = self.operation_index(operation);
        self.graph.update_edge(pre_index, op_index, ());
        for postcondition in postconditions {
            let post_index = self.condition_index(postcondition);
            self.graph.update_edge(op_index, post_index, ());
        }
    }

    /// Every operation currently eligible to run on the job
    ///
    /// An operation is eligible when all of its prerequisite conditions hold
    /// and not all of its postconditions do, i.e. its goal is not yet fully
    /// satisfied. Operations without postconditions are never eligible.
    pub fn next_operations(&self, job: &J) -> Vec<&FlowOperation<J>> {
        self.graph
            .node_indices()
            .filter_map(|index| match &self.graph[index] {
                FlowNode::Operation(operation) if self.eligible(index, job) => Some(operation),
                _ => None,
            })
            .collect()
    }

    /// Outstanding operations along every simple path from start to finish
    ///
    /// An operation on a path is yielded while its goal is not yet fully
    /// satisfied, regardless of whether its prerequisites currently hold:
    /// operations earlier on the same path are the ones expected to establish
    /// them. Paths are enumerated independently and not deduplicated against each
    /// other: an operation reachable via several paths appears once per path.
    /// Downstream consumers may treat the multiplicity as a weighting signal.
    /// When either endpoint condition is not part of the graph the result is
    /// empty. Enumeration is exponential in the path count in the worst case,
    /// which is acceptable for operation graphs of tens of nodes.
    pub fn get_operation_chain(
        &self,
        job: &J,
        finish: &FlowCondition<J>,
        start: Option<&FlowCondition<J>>,
    ) -> Vec<&FlowOperation<J>> {
        let start_id = start.map_or(ALWAYS_CONDITION_ID, |condition| condition.id());
        let (Some(&src), Some(&dst)) = (
            self.condition_indices.get(start_id),
            self.condition_indices.get(finish.id()),
        ) else {
            return Vec::new();
        };

        let mut operations = Vec::new();
        for path in all_simple_paths::<Vec<NodeIndex>, _>(&self.graph, src, dst, 0, None) {
            for index in path {
                if let FlowNode::Operation(operation) = &self.graph[index] {
                    if self.goal_unsatisfied(index, job) {
                        operations.push(operation);
                    }
                }
            }
        }
        operations
    }

    /// Number of condition and operation nodes in the graph
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn eligible(&self, index: NodeIndex, job: &J) -> bool {
        let prerequisites_hold = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .all(|condition| self.evaluate_condition(condition, job));
        prerequisites_hold && self.goal_unsatisfied(index, job)
    }

    /// Whether at least one postcondition of the operation is still false
    ///
    /// An operation without postconditions has nothing left to produce and
    /// counts as satisfied.
    fn goal_unsatisfied(&self, index: NodeIndex, job: &J) -> bool {
        let mut postconditions = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .peekable();
        if postconditions.peek().is_none() {
            return false;
        }
        !postconditions.all(|condition| self.evaluate_condition(condition, job))
    }

    fn evaluate_condition(&self, index: NodeIndex, job: &J) -> bool {
        match &self.graph[index] {
            FlowNode::Condition(condition) => condition.evaluate(job),
            // Edges are only ever created condition->operation or
            // operation->condition, so neighbors of an operation are
            // always conditions.
            FlowNode::Operation(_) => unreachable!("operation adjacent to operation"),
        }
    }

    fn condition_index(&mut self, condition: FlowCondition<J>) -> NodeIndex {
        if let Some(&index) = self.condition_indices.get(condition.id()) {
            return index;
        }
        let id = condition.id().to_string();
        let index = self.graph.add_node(FlowNode::Condition(condition));
        self.condition_indices.insert(id, index);
        index
    }

    fn operation_index(&mut self, operation: FlowOperation<J>) -> NodeIndex {
        if let Some(&index) = self.operation_indices.get(operation.id()) {
            return index;
        }
        let id = operation.id().to_string();
        let index = self.graph.add_node(FlowNode::Operation(operation));
        self.operation_indices.insert(id, index);
        index
    }
}

impl<J> fmt::Debug for FlowGraph<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowGraph")
            .field("conditions", &self.condition_indices.len())
            .field("operations", &self.operation_indices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Test job: a bag of satisfied state flags
    type Job = HashSet<String>;

    fn flag(name: &'static str) -> FlowCondition<Job> {
        FlowCondition::new(name, move |job: &Job| job.contains(name))
    }

    fn noop(name: &'static str) -> FlowOperation<Job> {
        FlowOperation::new(name, |_job: &Job| {})
    }

    fn job_with(flags: &[&str]) -> Job {
        flags.iter().map(|flag| flag.to_string()).collect()
    }

    /// op1: (start) -> produces c; op2: c -> produces done
    fn linear_graph() -> FlowGraph<Job> {
        let mut graph = FlowGraph::new();
        graph.add_operation(noop("op1"), None, vec![flag("c")]);
        graph.add_operation(noop("op2"), Some(flag("c")), vec![flag("done")]);
        graph
    }

    #[test]
    fn test_condition_identity() {
        let a = flag("c");
        let b = FlowCondition::new("c", |_: &Job| false);
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_always_condition() {
        let always = FlowCondition::<Job>::always();
        assert!(always.evaluate(&Job::new()));
        assert_eq!(always.id(), ALWAYS_CONDITION_ID);
    }

    #[test]
    fn test_next_operations_linear() {
        let graph = linear_graph();

        // Nothing satisfied: only op1 runs (op2's prerequisite fails).
        let fresh = Job::new();
        let ids: Vec<_> = graph
            .next_operations(&fresh)
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op1"]);

        // c satisfied: op1's goal is met, op2 becomes eligible.
        let mid = job_with(&["c"]);
        let ids: Vec<_> = graph
            .next_operations(&mid)
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op2"]);

        // Everything satisfied: no work left.
        let done = job_with(&["c", "done"]);
        assert!(graph.next_operations(&done).is_empty());
    }

    #[test]
    fn test_operation_without_postconditions_never_eligible() {
        let mut graph = FlowGraph::new();
        graph.add_operation(noop("orphan"), None, vec![]);
        assert!(graph.next_operations(&Job::new()).is_empty());
    }

    #[test]
    fn test_readd_merges_nodes() {
        let mut graph = linear_graph();
        let before = graph.node_count();
        // Same identifier, overlapping conditions: must collapse.
        graph.add_operation(noop("op1"), None, vec![flag("c")]);
        assert_eq!(graph.node_count(), before);

        let ids: Vec<_> = graph
            .next_operations(&Job::new())
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op1"]);
    }

    #[test]
    fn test_operation_chain_linear() {
        let graph = linear_graph();
        let finish = flag("done");

        let fresh = Job::new();
        let ids: Vec<_> = graph
            .get_operation_chain(&fresh, &finish, None)
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op1", "op2"]);

        let mid = job_with(&["c"]);
        let ids: Vec<_> = graph
            .get_operation_chain(&mid, &finish, None)
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op2"]);
    }

    #[test]
    fn test_operation_chain_explicit_start() {
        let graph = linear_graph();
        let job = job_with(&["c"]);
        let ids: Vec<_> = graph
            .get_operation_chain(&job, &flag("done"), Some(&flag("c")))
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op2"]);
    }

    #[test]
    fn test_operation_chain_unknown_endpoint() {
        let graph = linear_graph();
        assert!(graph
            .get_operation_chain(&Job::new(), &flag("missing"), None)
            .is_empty());
    }

    #[test]
    fn test_operation_chain_preserves_multiplicity() {
        // Two routes into `mid` converge on op3:
        //   (start) -> opA -> a -> op3 -> done
        //   (start) -> opB -> a (same condition)
        let mut graph = FlowGraph::new();
        graph.add_operation(noop("opA"), None, vec![flag("a")]);
        graph.add_operation(noop("opB"), None, vec![flag("a")]);
        graph.add_operation(noop("op3"), Some(flag("a")), vec![flag("done")]);

        let job = job_with(&["a"]);
        let chain = graph.get_operation_chain(&job, &flag("done"), None);
        // One simple path per upstream producer, each containing op3.
        let count = chain.iter().filter(|op| op.id() == "op3").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_run_operation_action() {
        use std::cell::Cell;
        use std::rc::Rc;

        let hits = Rc::new(Cell::new(0));
        let hits_in_action = Rc::clone(&hits);
        let operation = FlowOperation::new("count", move |_: &Job| {
            hits_in_action.set(hits_in_action.get() + 1);
        });
        operation.run(&Job::new());
        operation.run(&Job::new());
        assert_eq!(hits.get(), 2);
    }
}
