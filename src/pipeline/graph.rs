//! The stage dependency graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::GraphError;

use super::context::RunContext;
use super::stage::{Stage, StageId, StageWork};

/// Directed acyclic graph of stages.
///
/// Edges are kept on both endpoints: adding `b` as a dependent of `a` also
/// records `a` as a prerequisite of `b`. Stages are stored by id, so
/// iteration follows creation order.
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    stages: BTreeMap<StageId, Stage>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stage for `work` with a fresh id from `ctx`.
    ///
    /// Ids already taken in this graph are skipped, so stages from another
    /// context are never overwritten.
    pub fn add(&mut self, ctx: &RunContext, work: StageWork) -> StageId {
        let mut id = ctx.next_stage_id();
        while self.stages.contains_key(&id) {
            id = ctx.next_stage_id();
        }
        self.stages.insert(id, Stage::new(id, work));
        id
    }

    /// Inserts a prebuilt stage. Fails if a stage with the same id exists.
    pub fn insert(&mut self, stage: Stage) -> Result<StageId, GraphError> {
        let id = stage.id();
        if let Some(existing) = self.stages.get(&id) {
            return Err(GraphError::DuplicateIdentifier(format!(
                "{} (id {})",
                existing.name(),
                id.get()
            )));
        }
        self.stages.insert(id, stage);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(&id)
    }

    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages.get_mut(&id)
    }

    /// Looks a stage up by name.
    pub fn find(&self, name: &str) -> Option<&Stage> {
        self.stages.values().find(|s| s.name() == name)
    }

    /// Stages in id order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    pub fn ids(&self) -> Vec<StageId> {
        self.stages.keys().copied().collect()
    }

    /// Records `dependent` as waiting on `stage`.
    pub fn add_dependent(&mut self, stage: StageId, dependent: StageId) -> Result<(), GraphError> {
        self.link(stage, dependent)
    }

    pub fn add_dependents(
        &mut self,
        stage: StageId,
        dependents: impl IntoIterator<Item = StageId>,
    ) -> Result<(), GraphError> {
        for dependent in dependents {
            self.link(stage, dependent)?;
        }
        Ok(())
    }

    /// Records `stage` as waiting on `prerequisite`.
    pub fn add_prerequisite(
        &mut self,
        stage: StageId,
        prerequisite: StageId,
    ) -> Result<(), GraphError> {
        self.link(prerequisite, stage)
    }

    pub fn add_prerequisites(
        &mut self,
        stage: StageId,
        prerequisites: impl IntoIterator<Item = StageId>,
    ) -> Result<(), GraphError> {
        for prerequisite in prerequisites {
            self.link(prerequisite, stage)?;
        }
        Ok(())
    }

    fn link(&mut self, before: StageId, after: StageId) -> Result<(), GraphError> {
        if !self.stages.contains_key(&before) {
            return Err(GraphError::UnknownStage(before.get()));
        }
        if !self.stages.contains_key(&after) {
            return Err(GraphError::UnknownStage(after.get()));
        }
        if before == after {
            let name = self
                .stages
                .get(&before)
                .map(|s| s.name().to_string())
                .unwrap_or_default();
            return Err(GraphError::SelfDependency(name));
        }
        if let Some(stage) = self.stages.get_mut(&before) {
            stage.dependents.insert(after);
        }
        if let Some(stage) = self.stages.get_mut(&after) {
            stage.prerequisites.insert(before);
        }
        Ok(())
    }

    /// Every stage reachable from `roots` through dependent edges,
    /// including the roots themselves.
    pub fn reachable_from(&self, roots: &[StageId]) -> BTreeSet<StageId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<StageId> = roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(stage) = self.stages.get(&id) {
                queue.extend(stage.dependents.iter().copied());
            }
        }
        seen
    }

    /// Checks that stage names are unique, every edge is recorded on both
    /// endpoints and the graph is acyclic.
    ///
    /// Returns the stages in a topological order; ties are broken by id.
    pub fn validate(&self) -> Result<Vec<StageId>, GraphError> {
        let mut names: HashMap<&str, StageId> = HashMap::new();
        for stage in self.stages.values() {
            if names.insert(stage.name(), stage.id()).is_some() {
                return Err(GraphError::DuplicateIdentifier(stage.name().to_string()));
            }
        }

        self.check_edges()?;

        if let Some(cycle) = self.find_cycle() {
            let names = cycle
                .iter()
                .filter_map(|id| self.stages.get(id))
                .map(|s| s.name().to_string())
                .collect();
            return Err(GraphError::Cycle(names));
        }

        self.topological_order()
    }

    /// Every edge must name known stages and appear on both of them.
    fn check_edges(&self) -> Result<(), GraphError> {
        let name_of = |id: StageId| {
            self.stages
                .get(&id)
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| id.get().to_string())
        };
        let asymmetric = |before: StageId, after: StageId| GraphError::AsymmetricEdge {
            before: name_of(before),
            after: name_of(after),
        };

        for stage in self.stages.values() {
            for &dep in &stage.dependents {
                let other = self
                    .stages
                    .get(&dep)
                    .ok_or(GraphError::UnknownStage(dep.get()))?;
                if !other.prerequisites.contains(&stage.id()) {
                    return Err(asymmetric(stage.id(), dep));
                }
            }
            for &pre in &stage.prerequisites {
                let other = self
                    .stages
                    .get(&pre)
                    .ok_or(GraphError::UnknownStage(pre.get()))?;
                if !other.dependents.contains(&stage.id()) {
                    return Err(asymmetric(pre, stage.id()));
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over the prerequisite counts.
    pub fn topological_order(&self) -> Result<Vec<StageId>, GraphError> {
        self.check_edges()?;
        let mut remaining: BTreeMap<StageId, usize> = self
            .stages
            .values()
            .map(|s| (s.id(), s.prerequisites.len()))
            .collect();
        let mut ready: BTreeSet<StageId> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            if let Some(stage) = self.stages.get(&id) {
                for dep in &stage.dependents {
                    if let Some(n) = remaining.get_mut(dep) {
                        *n = n.saturating_sub(1);
                        if *n == 0 {
                            ready.insert(*dep);
                        }
                    }
                }
            }
        }

        if order.len() != self.stages.len() {
            let stuck = self
                .stages
                .values()
                .filter(|s| !order.contains(&s.id()))
                .map(|s| s.name().to_string())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    fn find_cycle(&self) -> Option<Vec<StageId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<StageId, Mark> = HashMap::new();
        for &start in self.stages.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            // Iterative DFS; the path mirrors the frames on the stack.
            let mut path: Vec<StageId> = vec![start];
            let mut stack: Vec<Vec<StageId>> = vec![self.dependents_of(start)];
            marks.insert(start, Mark::Visiting);

            while let Some(frame) = stack.last_mut() {
                match frame.pop() {
                    Some(next) => match marks.get(&next).copied() {
                        Some(Mark::Visiting) => {
                            let from = path.iter().position(|id| *id == next).unwrap_or(0);
                            let mut cycle = path[from..].to_vec();
                            cycle.push(next);
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::Visiting);
                            path.push(next);
                            stack.push(self.dependents_of(next));
                        }
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            marks.insert(done, Mark::Done);
                        }
                    }
                }
            }
        }
        None
    }

    /// Prerequisite ids of `id`, empty if unknown.
    pub fn prerequisites_of(&self, id: StageId) -> Vec<StageId> {
        self.stages
            .get(&id)
            .map(|s| s.prerequisites.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Dependent ids of `id` in reverse id order, empty if unknown.
    pub fn dependents_of(&self, id: StageId) -> Vec<StageId> {
        self.stages
            .get(&id)
            .map(|s| s.dependents.iter().rev().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(name: &str) -> StageWork {
        StageWork::Root {
            name: name.to_string(),
        }
    }

    fn chain() -> (RunContext, PipelineGraph, Vec<StageId>) {
        let ctx = RunContext::new("/tmp/root", "graph");
        let mut graph = PipelineGraph::new();
        let a = graph.add(&ctx, root("a"));
        let b = graph.add(&ctx, root("b"));
        let c = graph.add(&ctx, root("c"));
        graph.add_dependent(a, b).expect("edge");
        graph.add_prerequisite(c, b).expect("edge");
        (ctx, graph, vec![a, b, c])
    }

    #[test]
    fn test_edges_are_bidirectional() {
        let (_ctx, graph, ids) = chain();
        let b = graph.stage(ids[1]).expect("b");
        assert!(b.prerequisites().contains(&ids[0]));
        assert!(b.dependents().contains(&ids[2]));
        assert!(graph.stage(ids[0]).expect("a").dependents().contains(&ids[1]));
    }

    #[test]
    fn test_validate_returns_topological_order() {
        let (_ctx, graph, ids) = chain();
        assert_eq!(graph.validate().expect("valid"), ids);
    }

    #[test]
    fn test_cycle_is_reported_with_names() {
        let (_ctx, mut graph, ids) = chain();
        graph.add_dependent(ids[2], ids[0]).expect("edge");
        match graph.validate() {
            Err(GraphError::Cycle(names)) => {
                assert_eq!(names.first(), names.last());
                assert!(names.contains(&"a".to_string()));
                assert!(names.contains(&"c".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let ctx = RunContext::new("/tmp/root", "graph");
        let mut graph = PipelineGraph::new();
        graph.add(&ctx, root("same"));
        graph.add(&ctx, root("same"));
        assert_eq!(
            graph.validate(),
            Err(GraphError::DuplicateIdentifier("same".to_string()))
        );
    }

    #[test]
    fn test_self_and_unknown_edges_rejected() {
        let (_ctx, mut graph, ids) = chain();
        assert_eq!(
            graph.add_dependent(ids[0], ids[0]),
            Err(GraphError::SelfDependency("a".to_string()))
        );
        assert_eq!(
            graph.add_dependent(ids[0], StageId::new(99)),
            Err(GraphError::UnknownStage(99))
        );
    }

    #[test]
    fn test_reachable_from() {
        let (ctx, mut graph, ids) = chain();
        let lone = graph.add(&ctx, root("lone"));
        let reach = graph.reachable_from(&[ids[1]]);
        assert!(reach.contains(&ids[1]));
        assert!(reach.contains(&ids[2]));
        assert!(!reach.contains(&ids[0]));
        assert!(!reach.contains(&lone));
    }

    #[test]
    fn test_diamond_orders_join_last() {
        let ctx = RunContext::new("/tmp/root", "graph");
        let mut graph = PipelineGraph::new();
        let top = graph.add(&ctx, root("top"));
        let left = graph.add(&ctx, root("left"));
        let right = graph.add(&ctx, root("right"));
        let join = graph.add(&ctx, root("join"));
        graph.add_dependents(top, [left, right]).expect("edges");
        graph.add_prerequisites(join, [left, right]).expect("edges");
        let order = graph.validate().expect("valid");
        assert_eq!(order.first(), Some(&top));
        assert_eq!(order.last(), Some(&join));
    }

    #[test]
    fn test_insert_rejects_taken_id() {
        let (_ctx, mut graph, ids) = chain();
        let err = graph
            .insert(Stage::new(ids[1], root("b2")))
            .expect_err("id 2 is taken");
        assert!(matches!(err, GraphError::DuplicateIdentifier(ref s) if s.contains('b')));
        // The original stage and its edges are untouched.
        assert_eq!(graph.stage(ids[1]).expect("b").name(), "b");
        assert_eq!(graph.validate().expect("valid"), ids);
    }

    #[test]
    fn test_add_skips_ids_taken_by_another_context() {
        let (_ctx, mut graph, ids) = chain();
        let fresh = RunContext::new("/tmp/root", "other");
        let d = graph.add(&fresh, root("d"));
        assert!(!ids.contains(&d));
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.stage(ids[0]).expect("a").name(), "a");
    }

    #[test]
    fn test_validate_rejects_one_sided_edges() {
        let (_ctx, mut graph, ids) = chain();
        graph
            .stage_mut(ids[1])
            .expect("b")
            .prerequisites
            .remove(&ids[0]);
        assert_eq!(
            graph.validate(),
            Err(GraphError::AsymmetricEdge {
                before: "a".to_string(),
                after: "b".to_string(),
            })
        );
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_edges() {
        let (_ctx, mut graph, ids) = chain();
        graph
            .stage_mut(ids[2])
            .expect("c")
            .dependents
            .insert(StageId::new(42));
        assert_eq!(graph.validate(), Err(GraphError::UnknownStage(42)));
    }
}
