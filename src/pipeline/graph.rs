//! Task graph over pipeline steps.
//!
//! Edges are file dependencies: a step that lists a path among its inputs
//! depends on the single step that lists the same path among its outputs.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use log::debug;

use super::step::Step;
use super::PipelineError;

#[derive(Debug)]
pub struct TaskGraph {
    steps: Vec<Step>,
    /// `deps[i]` are the indices of the steps producing inputs of step `i`.
    deps: Vec<Vec<usize>>,
    order: Vec<usize>,
    levels: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Validates the steps and builds the dependency structure.
    ///
    /// Inputs that no step produces must exist on disk already.
    pub fn new(steps: Vec<Step>) -> Result<Self, PipelineError> {
        let mut names = HashSet::new();
        for step in &steps {
            if !names.insert(step.name.as_str()) {
                return Err(PipelineError::DuplicateStep(step.name.clone()));
            }
        }

        let mut producers: HashMap<&PathBuf, usize> = HashMap::new();
        for (idx, step) in steps.iter().enumerate() {
            for output in &step.outputs {
                if let Some(&other) = producers.get(output) {
                    return Err(PipelineError::DuplicateProducer {
                        path: output.clone(),
                        first: steps[other].name.clone(),
                        second: step.name.clone(),
                    });
                }
                producers.insert(output, idx);
            }
        }

        let mut deps = Vec::with_capacity(steps.len());
        for (idx, step) in steps.iter().enumerate() {
            let mut step_deps = Vec::new();
            for input in &step.inputs {
                match producers.get(input) {
                    Some(&producer) if producer == idx => {
                        return Err(PipelineError::Cycle(vec![step.name.clone()]));
                    }
                    Some(&producer) => {
                        if !step_deps.contains(&producer) {
                            step_deps.push(producer);
                        }
                    }
                    None if !input.exists() => {
                        return Err(PipelineError::MissingSource {
                            step: step.name.clone(),
                            path: input.clone(),
                        });
                    }
                    None => {}
                }
            }
            step_deps.sort_unstable();
            deps.push(step_deps);
        }

        let order = topological_order(&steps, &deps)?;
        let levels = dependency_levels(&order, &deps);
        debug!(
            "Task graph: {} steps in {} dependency levels",
            steps.len(),
            levels.len()
        );

        Ok(TaskGraph {
            steps,
            deps,
            order,
            levels,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, idx: usize) -> &Step {
        &self.steps[idx]
    }

    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    /// Step indices in execution order. Ties keep declaration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Groups of steps whose dependencies all lie in earlier groups.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Steps that transitively depend on `idx`.
    pub fn downstream(&self, idx: usize) -> Vec<usize> {
        let mut found = vec![false; self.steps.len()];
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            for (other, deps) in self.deps.iter().enumerate() {
                if !found[other] && deps.contains(&current) {
                    found[other] = true;
                    stack.push(other);
                }
            }
        }
        found
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect()
    }
}

/// Kahn's algorithm, always releasing the lowest declared index first.
fn topological_order(steps: &[Step], deps: &[Vec<usize>]) -> Result<Vec<usize>, PipelineError> {
    let n = steps.len();
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents = vec![Vec::new(); n];
    for (idx, step_deps) in deps.iter().enumerate() {
        for &dep in step_deps {
            dependents[dep].push(idx);
        }
    }

    let mut ready: std::collections::BTreeSet<usize> =
        (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &next in &dependents[idx] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < n {
        let stuck = (0..n)
            .filter(|&i| remaining[i] > 0)
            .map(|i| steps[i].name.clone())
            .collect();
        return Err(PipelineError::Cycle(stuck));
    }
    Ok(order)
}

fn dependency_levels(order: &[usize], deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut level_of = vec![0usize; deps.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();
    for &idx in order {
        let level = deps[idx]
            .iter()
            .map(|&d| level_of[d] + 1)
            .max()
            .unwrap_or(0);
        level_of[idx] = level;
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(idx);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn noop(name: &str) -> Step {
        Step::internal(name, "noop", || Ok(()))
    }

    fn names(graph: &TaskGraph, idx: &[usize]) -> Vec<String> {
        idx.iter().map(|&i| graph.step(i).name.clone()).collect()
    }

    #[test]
    fn test_order_follows_file_dependencies() {
        let steps = vec![
            noop("sort").input("a.sam").output("a.bam"),
            noop("align").output("a.sam"),
            noop("index").input("a.bam").output("a.bam.bai"),
        ];
        let graph = TaskGraph::new(steps).unwrap();
        assert_eq!(names(&graph, graph.order()), vec!["align", "sort", "index"]);
        assert_eq!(graph.levels().len(), 3);
    }

    #[test]
    fn test_independent_branches_share_a_level() {
        let steps = vec![
            noop("index").output("idx"),
            noop("align_s1").input("idx").output("s1.sam"),
            noop("align_s2").input("idx").output("s2.sam"),
            noop("merge").inputs(["s1.sam", "s2.sam"]).output("merged"),
        ];
        let graph = TaskGraph::new(steps).unwrap();
        let levels: Vec<Vec<String>> = graph.levels().iter().map(|l| names(&graph, l)).collect();
        assert_eq!(
            levels,
            vec![
                vec!["index".to_string()],
                vec!["align_s1".to_string(), "align_s2".to_string()],
                vec!["merge".to_string()],
            ]
        );
        assert_eq!(graph.downstream(0), vec![1, 2, 3]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let steps = vec![
            noop("a").input("y").output("x"),
            noop("b").input("x").output("y"),
        ];
        match TaskGraph::new(steps) {
            Err(PipelineError::Cycle(stuck)) => assert_eq!(stuck, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_duplicate_producer_is_rejected() {
        let steps = vec![noop("a").output("x"), noop("b").output("x")];
        assert!(matches!(
            TaskGraph::new(steps),
            Err(PipelineError::DuplicateProducer { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let steps = vec![noop("a").output("x"), noop("a").output("y")];
        assert!(matches!(
            TaskGraph::new(steps),
            Err(PipelineError::DuplicateStep(name)) if name == "a"
        ));
    }

    #[test]
    fn test_unproduced_input_must_exist() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("reads.fq");
        std::fs::write(&present, "@r\nA\n+\nI\n").unwrap();

        let ok = TaskGraph::new(vec![noop("a").input(&present).output(dir.path().join("o"))]);
        assert!(ok.is_ok());

        let missing = dir.path().join("missing.fq");
        match TaskGraph::new(vec![noop("a").input(&missing)]) {
            Err(PipelineError::MissingSource { step, path }) => {
                assert_eq!(step, "a");
                assert_eq!(path, missing);
            }
            other => panic!("expected missing source, got {:?}", other.map(|g| g.len())),
        }
    }
}
