//! Project reference graph and cycle detection, on top of petgraph::StableDiGraph

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};

use crate::model::ProjectId;

/// Severity attached to cycle diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// Problem raised for one project taking part in a reference cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleDiagnostic {
    pub project: ProjectId,
    pub severity: Severity,
    /// Every project of the cycle, sorted.
    pub cycle: Vec<ProjectId>,
}

impl CycleDiagnostic {
    pub fn message(&self) -> String {
        let members: Vec<&str> = self.cycle.iter().map(ProjectId::name).collect();
        format!(
            "A cycle was detected in the build path of project '{}'. The cycle consists of projects {{{}}}",
            self.project,
            members.join(", ")
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub participants: BTreeSet<ProjectId>,
    pub diagnostics: Vec<CycleDiagnostic>,
}

impl CycleReport {
    pub fn is_acyclic(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Directed graph of PROJECT references between workspace projects.
pub struct ProjectGraph {
    inner: StableDiGraph<ProjectId, ()>,
    index: HashMap<ProjectId, NodeIndex>,
}

impl std::fmt::Debug for ProjectGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectGraph")
            .field("project_count", &self.inner.node_count())
            .field("reference_count", &self.inner.edge_count())
            .finish()
    }
}

impl ProjectGraph {
    pub fn new() -> Self {
        ProjectGraph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build from `(project, referenced projects)` pairs.
    pub fn from_references<I>(references: I) -> Self
    where
        I: IntoIterator<Item = (ProjectId, Vec<ProjectId>)>,
    {
        let mut graph = ProjectGraph::new();
        for (project, targets) in references {
            graph.add_project(&project);
            for target in targets {
                graph.add_reference(&project, &target);
            }
        }
        graph
    }

    pub fn add_project(&mut self, project: &ProjectId) -> NodeIndex {
        if let Some(&idx) = self.index.get(project) {
            return idx;
        }
        let idx = self.inner.add_node(project.clone());
        self.index.insert(project.clone(), idx);
        idx
    }

    pub fn add_reference(&mut self, from: &ProjectId, to: &ProjectId) {
        let source = self.add_project(from);
        let target = self.add_project(to);
        if self.inner.find_edge(source, target).is_none() {
            self.inner.add_edge(source, target, ());
        }
    }

    pub fn project_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn reference_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Projects directly referenced by `project`.
    pub fn references(&self, project: &ProjectId) -> Vec<ProjectId> {
        self.neighbors(project, Direction::Outgoing)
    }

    /// Projects directly referencing `project`.
    pub fn dependents(&self, project: &ProjectId) -> Vec<ProjectId> {
        self.neighbors(project, Direction::Incoming)
    }

    fn neighbors(&self, project: &ProjectId, direction: Direction) -> Vec<ProjectId> {
        let Some(&idx) = self.index.get(project) else {
            return Vec::new();
        };
        let mut out: Vec<ProjectId> = self
            .inner
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.inner.node_weight(n).cloned())
            .collect();
        out.sort();
        out
    }

    /// Strongly connected components that form a cycle: more than one
    /// project, or a single project referencing itself.
    pub fn cycles(&self) -> Vec<Vec<ProjectId>> {
        let mut cycles: Vec<Vec<ProjectId>> = tarjan_scc(&self.inner)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                [single] => self.inner.find_edge(*single, *single).is_some(),
                _ => true,
            })
            .map(|scc| {
                let mut members: Vec<ProjectId> = scc
                    .into_iter()
                    .filter_map(|idx| self.inner.node_weight(idx).cloned())
                    .collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Projects participating in at least one cycle.
    pub fn detect_cycles(&self) -> BTreeSet<ProjectId> {
        self.cycles().into_iter().flatten().collect()
    }

    /// Participants plus one diagnostic per participant.
    pub fn cycle_report(&self, severity: Severity) -> CycleReport {
        let mut report = CycleReport::default();
        for cycle in self.cycles() {
            for project in &cycle {
                report.participants.insert(project.clone());
                report.diagnostics.push(CycleDiagnostic {
                    project: project.clone(),
                    severity,
                    cycle: cycle.clone(),
                });
            }
        }
        report.diagnostics.sort_by(|a, b| a.project.cmp(&b.project));
        report
    }
}

impl Default for ProjectGraph {
    fn default() -> Self {
        Self::new()
    }
}
