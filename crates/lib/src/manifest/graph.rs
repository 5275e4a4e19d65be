//! Dependency graph over the tools of a manifest.
//!
//! Edges point from a dependency to its dependent, so a topological order
//! lists every tool after all of the tools it depends on.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use super::error::ValidationError;
use super::types::Manifest;

/// Dependency graph whose node weights are manifest declaration indexes.
pub struct DependencyGraph {
  graph: DiGraph<usize, ()>,
  nodes: Vec<NodeIndex>,
  names: Vec<String>,
}

impl DependencyGraph {
  /// Build the graph from a manifest.
  ///
  /// Fails with `MissingDependency` when a tool names a dependency that is
  /// not declared. Cycles are not rejected here; see
  /// [`DependencyGraph::topological_order`].
  pub fn build(manifest: &Manifest) -> Result<Self, ValidationError> {
    let mut graph = DiGraph::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut nodes = Vec::with_capacity(manifest.tools.len());
    let mut names = Vec::with_capacity(manifest.tools.len());

    for (idx, tool) in manifest.tools.iter().enumerate() {
      nodes.push(graph.add_node(idx));
      names.push(tool.name.clone());
      index_of.entry(tool.name.as_str()).or_insert(idx);
    }

    for (idx, tool) in manifest.tools.iter().enumerate() {
      for dep in &tool.depends_on {
        let Some(&dep_idx) = index_of.get(dep.as_str()) else {
          return Err(ValidationError::MissingDependency {
            tool: tool.name.clone(),
            missing: dep.clone(),
          });
        };
        graph.update_edge(nodes[dep_idx], nodes[idx], ());
      }
    }

    Ok(Self { graph, nodes, names })
  }

  /// Declaration indexes in dependency order.
  ///
  /// Kahn's algorithm where the ready set is ordered by declaration index,
  /// so independent tools keep manifest order. Fails with `Cycle` when some
  /// tools can never become ready.
  pub fn topological_order(&self) -> Result<Vec<usize>, ValidationError> {
    let mut in_degree: Vec<usize> = self
      .nodes
      .iter()
      .map(|&n| self.graph.neighbors_directed(n, Direction::Incoming).count())
      .collect();

    let mut ready: BTreeSet<usize> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, deg)| **deg == 0)
      .map(|(idx, _)| idx)
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(idx) = ready.pop_first() {
      order.push(idx);
      for dependent in self.graph.neighbors_directed(self.nodes[idx], Direction::Outgoing) {
        let dep_idx = self.graph[dependent];
        in_degree[dep_idx] = in_degree[dep_idx].saturating_sub(1);
        if in_degree[dep_idx] == 0 {
          ready.insert(dep_idx);
        }
      }
    }

    if order.len() < self.nodes.len() {
      return Err(ValidationError::Cycle {
        chain: self.find_cycle(),
      });
    }

    Ok(order)
  }

  /// Direct dependencies of a tool, sorted by declaration index.
  pub fn dependencies(&self, idx: usize) -> Vec<usize> {
    let mut deps: Vec<usize> = self
      .graph
      .neighbors_directed(self.nodes[idx], Direction::Incoming)
      .map(|n| self.graph[n])
      .collect();
    deps.sort_unstable();
    deps
  }

  /// Transitive dependencies of a tool followed by the tool itself, in
  /// dependency order.
  pub fn chain_to(&self, idx: usize) -> Vec<usize> {
    let ancestors = self.collect(idx, Direction::Incoming);
    match self.topological_order() {
      Ok(order) => order.into_iter().filter(|i| ancestors.contains(i) || *i == idx).collect(),
      Err(_) => {
        let mut chain: Vec<usize> = ancestors.into_iter().collect();
        chain.sort_unstable();
        chain.push(idx);
        chain
      }
    }
  }

  /// Transitive dependents of a tool, sorted by declaration index.
  pub fn dependents(&self, idx: usize) -> Vec<usize> {
    let mut out: Vec<usize> = self.collect(idx, Direction::Outgoing).into_iter().collect();
    out.sort_unstable();
    out
  }

  pub fn name(&self, idx: usize) -> &str {
    &self.names[idx]
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  fn collect(&self, idx: usize, direction: Direction) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack = vec![self.nodes[idx]];
    while let Some(node) = stack.pop() {
      for next in self.graph.neighbors_directed(node, direction) {
        let next_idx = self.graph[next];
        if next_idx != idx && seen.insert(next_idx) {
          stack.push(next);
        }
      }
    }
    seen
  }

  /// Names along one cycle, starting and ending at the lowest-declared tool
  /// involved, following depends-on edges.
  fn find_cycle(&self) -> Vec<String> {
    let cyclic: Vec<Vec<usize>> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
      .map(|scc| {
        let mut members: Vec<usize> = scc.into_iter().map(|n| self.graph[n]).collect();
        members.sort_unstable();
        members
      })
      .collect();

    let Some(members) = cyclic.into_iter().min_by_key(|m| m[0]) else {
      return Vec::new();
    };

    let start = members[0];
    let mut chain = vec![start];
    let mut visited: HashSet<usize> = HashSet::from([start]);
    let mut current = start;

    loop {
      let deps = self.dependencies(current);
      if current != start && deps.contains(&start) {
        break;
      }
      match deps.into_iter().find(|d| members.contains(d) && !visited.contains(d)) {
        Some(next) => {
          visited.insert(next);
          chain.push(next);
          current = next;
        }
        None => break,
      }
    }
    chain.push(start);

    chain.into_iter().map(|idx| self.names[idx].clone()).collect()
  }
}
