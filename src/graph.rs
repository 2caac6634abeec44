//! Dependency graph of unsolved equations and variables, and its decomposition into blocks.
//!
//! The graph is bipartite: one node per unsolved equation and one per unsolved variable, with
//! an edge wherever an equation references a variable. Tarjan's algorithm orders the nodes, the
//! ordering lays out an incidence matrix, and the matrix is reduced into the smallest blocks that
//! can be solved one after the other.
//!
//! Both heuristics are pluggable: [`DecompositionStrategy`] chooses the start variables that are
//! tried and [`OrderingScore`] ranks the resulting orderings.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::session::EquationId;

/// A graph node with the signed numbering used in logs: variables are `1..=n`, equations are
/// `-1..=-m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphNode {
    Variable(usize),
    Equation(usize),
}

impl GraphNode {
    pub fn signed_id(self) -> i64 {
        match self {
            GraphNode::Variable(j) => j as i64 + 1,
            GraphNode::Equation(i) => -(i as i64 + 1),
        }
    }
}

/// Incidence structure of the unsolved part of a session.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    equations: Vec<EquationId>,
    variables: Vec<String>,
    /// Columns referenced by each row
    rows: Vec<Vec<usize>>,
    /// Rows referencing each column
    columns: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph from equations and the variables they reference.
    ///
    /// Only variables for which `is_unsolved` holds become nodes. Variable columns are numbered
    /// in first-occurrence order.
    pub fn build<'a, I, F>(equations: I, is_unsolved: F) -> Self
    where
        I: IntoIterator<Item = (EquationId, &'a [String])>,
        F: Fn(&str) -> bool,
    {
        let mut graph = Self::default();
        let mut index: HashMap<&'a str, usize> = HashMap::new();

        for (id, names) in equations {
            let row = graph.equations.len();
            graph.equations.push(id);
            let mut columns = Vec::new();
            for name in names.iter().filter(|n| is_unsolved(n)) {
                let column = *index.entry(name.as_str()).or_insert_with(|| {
                    graph.variables.push(name.clone());
                    graph.columns.push(Vec::new());
                    graph.variables.len() - 1
                });
                if !columns.contains(&column) {
                    columns.push(column);
                    graph.columns[column].push(row);
                }
            }
            graph.rows.push(columns);
        }
        graph
    }

    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable(&self, column: usize) -> Option<&str> {
        self.variables.get(column).map(String::as_str)
    }

    /// Number of equations referencing a variable column.
    pub fn reference_count(&self, column: usize) -> usize {
        self.columns.get(column).map_or(0, Vec::len)
    }

    /// Columns referenced by an equation row.
    pub fn row(&self, row: usize) -> &[usize] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    fn node(&self, index: usize) -> GraphNode {
        if index < self.variables.len() {
            GraphNode::Variable(index)
        } else {
            GraphNode::Equation(index - self.variables.len())
        }
    }

    fn node_index(&self, node: GraphNode) -> usize {
        match node {
            GraphNode::Variable(j) => j,
            GraphNode::Equation(i) => self.variables.len() + i,
        }
    }

    fn neighbours(&self, index: usize) -> &[usize] {
        match self.node(index) {
            GraphNode::Variable(j) => &self.columns[j],
            GraphNode::Equation(i) => &self.rows[i],
        }
    }

    /// Tarjan's strongly connected components, searching from `start` first and then from every
    /// other node in index order. Components come out in completion order; each lists its
    /// nodes in the order they leave the stack.
    pub fn strongly_connected_components(&self, start: Option<GraphNode>) -> Vec<Vec<GraphNode>> {
        let n = self.variables.len() + self.equations.len();
        let variables = self.variables.len();
        let mut index = vec![usize::MAX; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut next = 0;
        let mut components = Vec::new();

        let roots = start
            .map(|s| self.node_index(s))
            .filter(|&s| s < n)
            .into_iter()
            .chain(0..n);

        for root in roots {
            if index[root] != usize::MAX {
                continue;
            }
            index[root] = next;
            low[root] = next;
            next += 1;
            stack.push(root);
            on_stack[root] = true;
            let mut call: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                // Edges point to the other side of the bipartition
                let edges = self.neighbours(v);
                if frame.1 < edges.len() {
                    let target = edges[frame.1];
                    frame.1 += 1;
                    let w = if v < variables { variables + target } else { target };
                    if index[w] == usize::MAX {
                        index[w] = next;
                        low[w] = next;
                        next += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                } else {
                    call.pop();
                    if let Some(&(parent, _)) = call.last() {
                        low[parent] = low[parent].min(low[v]);
                    }
                    if low[v] == index[v] {
                        let mut component = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            component.push(self.node(w));
                            if w == v {
                                break;
                            }
                        }
                        components.push(component);
                    }
                }
            }
        }
        components
    }
}

/// Row and column layout of the incidence matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixOrdering {
    pub rows: Vec<usize>,
    pub columns: Vec<usize>,
}

impl MatrixOrdering {
    /// Lays rows and columns out in component order.
    pub fn from_components(components: &[Vec<GraphNode>]) -> Self {
        let mut rows = Vec::new();
        let mut columns = Vec::new();
        for node in components.iter().flatten() {
            match *node {
                GraphNode::Equation(i) => rows.push(i),
                GraphNode::Variable(j) => columns.push(j),
            }
        }
        Self { rows, columns }
    }
}

/// Chooses the variables a decomposition starts its search from.
pub trait DecompositionStrategy: Send + Sync {
    fn start_candidates(&self, graph: &DependencyGraph, limit: usize) -> Vec<GraphNode>;
}

/// Variables tied for the lowest reference count, in column order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestReferenceCount;

impl DecompositionStrategy for LowestReferenceCount {
    fn start_candidates(&self, graph: &DependencyGraph, limit: usize) -> Vec<GraphNode> {
        let Some(lowest) = (0..graph.num_variables())
            .map(|j| graph.reference_count(j))
            .min()
        else {
            return Vec::new();
        };
        (0..graph.num_variables())
            .filter(|&j| graph.reference_count(j) == lowest)
            .take(limit.max(1))
            .map(GraphNode::Variable)
            .collect()
    }
}

/// Ranks a matrix ordering. Lower is better.
pub trait OrderingScore: Send + Sync {
    fn score(&self, graph: &DependencyGraph, ordering: &MatrixOrdering) -> usize;
}

/// Counts incidence entries above the diagonal.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperTriangleScore;

impl OrderingScore for UpperTriangleScore {
    fn score(&self, graph: &DependencyGraph, ordering: &MatrixOrdering) -> usize {
        let mut column_position = vec![0; graph.num_variables()];
        for (position, &column) in ordering.columns.iter().enumerate() {
            column_position[column] = position;
        }
        ordering
            .rows
            .iter()
            .enumerate()
            .map(|(row_position, &row)| {
                graph
                    .row(row)
                    .iter()
                    .filter(|&&column| column_position[column] > row_position)
                    .count()
            })
            .sum()
    }
}

/// Equations and variables that must be solved together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub equations: Vec<EquationId>,
    /// Internal variable names in matrix column order
    pub variables: Vec<String>,
}

impl Block {
    pub fn is_square(&self) -> bool {
        self.equations.len() == self.variables.len()
    }
}

/// Blocks in solve order, plus the equations left without unknowns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    pub blocks: Vec<Block>,
    /// Equations whose variables are all determined by other blocks
    pub consistency: Vec<EquationId>,
}

pub struct Decomposer {
    strategy: Box<dyn DecompositionStrategy>,
    score: Box<dyn OrderingScore>,
    max_start_candidates: usize,
}

impl Decomposer {
    pub fn new(max_start_candidates: usize) -> Self {
        Self {
            strategy: Box::new(LowestReferenceCount),
            score: Box::new(UpperTriangleScore),
            max_start_candidates,
        }
    }

    pub fn with_strategy(mut self, strategy: impl DecompositionStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn with_score(mut self, score: impl OrderingScore + 'static) -> Self {
        self.score = Box::new(score);
        self
    }

    /// Best-scoring ordering over all start candidates.
    pub fn ordering(&self, graph: &DependencyGraph) -> MatrixOrdering {
        let candidates = self
            .strategy
            .start_candidates(graph, self.max_start_candidates);
        let starts: Vec<Option<GraphNode>> = if candidates.is_empty() {
            vec![None]
        } else {
            candidates.into_iter().map(Some).collect()
        };

        let mut best: Option<(usize, Option<GraphNode>, MatrixOrdering)> = None;
        for start in starts {
            let components = graph.strongly_connected_components(start);
            let ordering = MatrixOrdering::from_components(&components);
            let score = self.score.score(graph, &ordering);
            debug!(start = ?start.map(GraphNode::signed_id), score, "candidate ordering");
            if best.as_ref().map_or(true, |(s, _, _)| score < *s) {
                best = Some((score, start, ordering));
            }
        }

        match best {
            Some((score, start, ordering)) => {
                info!(
                    start = ?start.map(GraphNode::signed_id),
                    score,
                    "selected SCC ordering"
                );
                ordering
            }
            None => MatrixOrdering::from_components(&graph.strongly_connected_components(None)),
        }
    }

    /// Reduces the best ordering into blocks.
    pub fn decompose(&self, graph: &DependencyGraph) -> Decomposition {
        let ordering = self.ordering(graph);
        let mut column_position = vec![0; graph.num_variables()];
        for (position, &column) in ordering.columns.iter().enumerate() {
            column_position[column] = position;
        }

        let mut live = vec![true; graph.num_variables()];
        let live_columns = |row: usize, live: &[bool]| -> Vec<usize> {
            graph.row(row).iter().copied().filter(|&c| live[c]).collect()
        };

        let mut remaining = ordering.rows.clone();
        let mut decomposition = Decomposition::default();

        loop {
            remaining.retain(|&row| {
                let keep = !live_columns(row, &live).is_empty();
                if !keep {
                    decomposition.consistency.push(graph.equations[row]);
                }
                keep
            });
            if remaining.is_empty() {
                break;
            }

            let (taken, columns) = match remaining
                .iter()
                .position(|&row| live_columns(row, &live).len() == 1)
            {
                Some(position) => {
                    let row = remaining.remove(position);
                    (vec![row], live_columns(row, &live))
                }
                None => {
                    let mut union = BTreeSet::new();
                    let mut count = 0;
                    for &row in &remaining {
                        let columns = live_columns(row, &live);
                        union.extend(columns.into_iter().map(|c| (column_position[c], c)));
                        count += 1;
                        if union.len() == count {
                            break;
                        }
                    }
                    let taken: Vec<usize> = remaining.drain(..count).collect();
                    (taken, union.into_iter().map(|(_, c)| c).collect())
                }
            };

            for &column in &columns {
                live[column] = false;
            }
            let mut equations: Vec<EquationId> =
                taken.iter().map(|&row| graph.equations[row]).collect();
            equations.sort_unstable();
            let block = Block {
                equations,
                variables: columns.iter().map(|&c| graph.variables[c].clone()).collect(),
            };
            if block.is_square() {
                debug!(size = block.variables.len(), variables = ?block.variables, "block");
            } else {
                warn!(
                    equations = block.equations.len(),
                    variables = ?block.variables,
                    "block is not square"
                );
            }
            decomposition.blocks.push(block);
        }

        decomposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn graph(equations: &[&[&str]]) -> (DependencyGraph, Vec<Vec<String>>) {
        let owned: Vec<Vec<String>> = equations
            .iter()
            .map(|vars| vars.iter().map(|v| v.to_string()).collect())
            .collect();
        let graph = DependencyGraph::build(
            owned
                .iter()
                .enumerate()
                .map(|(i, vars)| (EquationId(i), vars.as_slice())),
            |_| true,
        );
        (graph, owned)
    }

    #[test]
    fn test_signed_ids() {
        assert_eq!(GraphNode::Variable(0).signed_id(), 1);
        assert_eq!(GraphNode::Equation(2).signed_id(), -3);
    }

    #[test]
    fn test_build_filters_solved_variables() {
        let owned = [vec!["x".to_string(), "y".to_string()]];
        let graph = DependencyGraph::build(
            owned
                .iter()
                .enumerate()
                .map(|(i, v)| (EquationId(i), v.as_slice())),
            |name| name != "x",
        );
        assert_eq!(graph.num_variables(), 1);
        assert_eq!(graph.variable(0), Some("y"));
    }

    #[test]
    fn test_chain_is_split_in_dependency_order() {
        let (graph, _) = graph(&[&["x"], &["x", "y"]]);
        let decomposition = Decomposer::new(5).decompose(&graph);
        let order: Vec<Vec<String>> = decomposition
            .blocks
            .iter()
            .map(|b| b.variables.clone())
            .collect();
        assert_eq!(order, vec![vec!["x".to_string()], vec!["y".to_string()]]);
        assert!(decomposition.consistency.is_empty());
    }

    #[test]
    fn test_coupled_pair_is_one_block() {
        let (graph, _) = graph(&[&["x", "y"], &["x", "y"]]);
        let decomposition = Decomposer::new(5).decompose(&graph);
        assert_eq!(decomposition.blocks.len(), 1);
        let block = &decomposition.blocks[0];
        assert!(block.is_square());
        assert_eq!(block.equations, vec![EquationId(0), EquationId(1)]);
    }

    #[test]
    fn test_coupled_pair_feeding_a_tail() {
        // z depends on the coupled pair {x, y}
        let (graph, _) = graph(&[&["z", "x"], &["x", "y"], &["x", "y"]]);
        let decomposition = Decomposer::new(5).decompose(&graph);
        let sizes: Vec<usize> = decomposition.blocks.iter().map(|b| b.variables.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 3);
        let last = decomposition.blocks.last().map(|b| b.variables.clone());
        assert_eq!(last, Some(vec!["z".to_string()]));
    }

    #[test]
    fn test_redundant_equation_becomes_consistency_check() {
        let (graph, _) = graph(&[&["x"], &["x"]]);
        let decomposition = Decomposer::new(5).decompose(&graph);
        assert_eq!(decomposition.blocks.len(), 1);
        assert_eq!(decomposition.consistency.len(), 1);
    }

    #[test]
    fn test_under_determined_union() {
        let (graph, _) = graph(&[&["x", "y", "z"]]);
        let decomposition = Decomposer::new(5).decompose(&graph);
        assert_eq!(decomposition.blocks.len(), 1);
        assert!(!decomposition.blocks[0].is_square());
        assert_eq!(decomposition.blocks[0].variables.len(), 3);
    }

    #[test]
    fn test_components_cover_all_nodes() {
        let (graph, _) = graph(&[&["a"], &["b", "c"], &["c"]]);
        let components = graph.strongly_connected_components(Some(GraphNode::Variable(1)));
        let total: usize = components.iter().map(Vec::len).sum();
        assert_eq!(total, graph.num_variables() + graph.num_equations());
    }

    #[test]
    fn test_upper_triangle_score() {
        let (graph, _) = graph(&[&["x"], &["x", "y"]]);
        let lower = MatrixOrdering {
            rows: vec![0, 1],
            columns: vec![0, 1],
        };
        let upper = MatrixOrdering {
            rows: vec![1, 0],
            columns: vec![0, 1],
        };
        assert_eq!(UpperTriangleScore.score(&graph, &lower), 0);
        assert_eq!(UpperTriangleScore.score(&graph, &upper), 1);
    }

    #[test]
    fn test_lowest_reference_count_candidates() {
        let (graph, _) = graph(&[&["x"], &["x", "y"], &["x", "z"]]);
        let candidates = LowestReferenceCount.start_candidates(&graph, 5);
        assert_eq!(candidates, vec![GraphNode::Variable(1), GraphNode::Variable(2)]);
        assert_eq!(LowestReferenceCount.start_candidates(&graph, 1).len(), 1);
    }

    /// Offers every variable as a start and records the limit it was given.
    struct EveryVariable(Arc<AtomicUsize>);

    impl DecompositionStrategy for EveryVariable {
        fn start_candidates(&self, graph: &DependencyGraph, limit: usize) -> Vec<GraphNode> {
            self.0.store(limit, Ordering::SeqCst);
            (0..graph.num_variables()).map(GraphNode::Variable).collect()
        }
    }

    /// Scores orderings by call number, ascending or descending.
    struct ByCallOrder {
        calls: Arc<AtomicUsize>,
        prefer_last: bool,
    }

    impl OrderingScore for ByCallOrder {
        fn score(&self, _graph: &DependencyGraph, _ordering: &MatrixOrdering) -> usize {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.prefer_last {
                100 - call
            } else {
                call
            }
        }
    }

    fn ordering_from(graph: &DependencyGraph, start: usize) -> MatrixOrdering {
        MatrixOrdering::from_components(
            &graph.strongly_connected_components(Some(GraphNode::Variable(start))),
        )
    }

    #[test]
    fn test_lowest_score_wins_across_candidates() {
        let (graph, _) = graph(&[&["a", "b"], &["b", "c"], &["c", "d"], &["d"]]);
        let best = LowestReferenceCount
            .start_candidates(&graph, 5)
            .into_iter()
            .map(|start| {
                let components = graph.strongly_connected_components(Some(start));
                UpperTriangleScore.score(&graph, &MatrixOrdering::from_components(&components))
            })
            .min();
        let chosen = Decomposer::new(5).ordering(&graph);
        assert_eq!(Some(UpperTriangleScore.score(&graph, &chosen)), best);
    }

    #[test]
    fn test_pluggable_strategy_and_score() {
        let (graph, _) = graph(&[&["a", "b"], &["b", "c"], &["c"]]);
        let limit = Arc::new(AtomicUsize::new(0));

        let calls = Arc::new(AtomicUsize::new(0));
        let ordering = Decomposer::new(3)
            .with_strategy(EveryVariable(Arc::clone(&limit)))
            .with_score(ByCallOrder {
                calls: Arc::clone(&calls),
                prefer_last: true,
            })
            .ordering(&graph);
        assert_eq!(limit.load(Ordering::SeqCst), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ordering, ordering_from(&graph, 2));

        let calls = Arc::new(AtomicUsize::new(0));
        let ordering = Decomposer::new(3)
            .with_strategy(EveryVariable(Arc::clone(&limit)))
            .with_score(ByCallOrder {
                calls,
                prefer_last: false,
            })
            .ordering(&graph);
        assert_eq!(ordering, ordering_from(&graph, 0));
    }
}
