//! A small directed-graph abstraction for detecting composition cycles.
//!
//! Shared by the registry loader (validating a freshly-parsed bundle before
//! it is ever swapped in) and the structural resolver (guarding against a
//! cycle that would only be a bundle-consistency bug at resolve time).

use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Default)]
pub struct Graph<'a> {
    edges: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Graph<'a> {
    pub fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, name: &'a str) {
        self.edges.entry(name).or_default();
    }

    pub fn add_edge(&mut self, from: &'a str, to: &'a str) {
        self.edges.entry(from).or_default().push(to);
    }

    /// Returns the first cycle found, as a `" -> "`-joined path, or `None`
    /// if the graph is acyclic.
    pub fn find_cycle(&self) -> Option<String> {
        let mut color: HashMap<&str, Color> =
            self.edges.keys().map(|k| (*k, Color::White)).collect();
        let mut path: Vec<&str> = Vec::new();

        let nodes: Vec<&str> = self.edges.keys().copied().collect();
        for start in nodes {
            if color.get(start) == Some(&Color::White) {
                if let Some(cycle) = self.visit(start, &mut color, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: &'a str,
        color: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<String> {
        color.insert(node, Color::Gray);
        path.push(node);

        if let Some(targets) = self.edges.get(node) {
            for &target in targets {
                match color.get(target).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = self.visit(target, color, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = path.iter().position(|n| *n == target).unwrap_or(0);
                        let mut cycle: Vec<&str> = path[start..].to_vec();
                        cycle.push(target);
                        return Some(cycle.join(" -> "));
                    }
                    Color::Black => {}
                }
            }
        }

        path.pop();
        color.insert(node, Color::Black);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let mut g = Graph::new();
        g.add_node("a");
        g.add_node("b");
        g.add_edge("a", "b");
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn direct_cycle_is_detected() {
        let mut g = Graph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "a");
        let cycle = g.find_cycle().unwrap();
        assert!(cycle.contains("a -> b -> a") || cycle.contains("b -> a -> b"));
    }

    #[test]
    fn self_loop_is_detected() {
        let mut g = Graph::new();
        g.add_edge("a", "a");
        assert_eq!(g.find_cycle().unwrap(), "a -> a");
    }

    #[test]
    fn longer_cycle_through_shared_node_is_detected() {
        let mut g = Graph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g.add_edge("c", "a");
        g.add_edge("x", "b");
        assert!(g.find_cycle().is_some());
    }
}
