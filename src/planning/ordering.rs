//! Dependency ordering of change units
//!
//! Structural edges are added first (a file must exist before it is touched,
//! renamed paths are updated after the rename, deletions come last). The
//! resulting graph is checked for cycles with Tarjan's SCC algorithm; on a
//! cycle the shortest one is reported, rotated to start at its smallest id.
//!
//! Tiers come from severity, then are pulled forward: a unit takes the
//! smallest tier of anything that depends on it. Units are emitted with
//! Kahn's algorithm keyed by `(tier, kind, path, id)`, which keeps tiers
//! non-decreasing so each tier becomes one phase.

use super::{ChangeKind, ChangeUnit, Phase, Plan, PriorityPolicy};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// A dependency cycle among change units, listed in dependency order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between change units: {}", .cycle.join(" -> "))]
pub struct PlanCycleError {
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error(transparent)]
    Cycle(#[from] PlanCycleError),

    #[error("change unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("duplicate change unit id '{id}'")]
    DuplicateUnit { id: String },
}

/// Order units into phases. Structural dependencies are added to the
/// caller's explicit ones.
pub fn order_units(mut units: Vec<ChangeUnit>, policy: &PriorityPolicy) -> Result<Plan, PlanError> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        if index.insert(unit.id.clone(), i).is_some() {
            return Err(PlanError::DuplicateUnit {
                id: unit.id.clone(),
            });
        }
    }

    add_structural_dependencies(&mut units);

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(units.len());
    for unit in &units {
        let mut resolved = Vec::with_capacity(unit.depends_on.len());
        for dep in &unit.depends_on {
            match index.get(dep) {
                Some(&d) => resolved.push(d),
                None => {
                    return Err(PlanError::UnknownDependency {
                        unit: unit.id.clone(),
                        dependency: dep.clone(),
                    })
                }
            }
        }
        deps.push(resolved);
    }

    if let Some(cycle) = find_minimal_cycle(&units, &deps) {
        return Err(PlanCycleError { cycle }.into());
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for (u, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(u);
        }
    }

    // Pull-forward: walk dependents before their dependencies
    let identity: Vec<usize> = (0..units.len()).collect();
    let mut tier: Vec<u8> = units.iter().map(|u| policy.tier(u.severity)).collect();
    for &u in topological_order(&deps, &dependents, &identity).iter().rev() {
        if let Some(pulled) = dependents[u].iter().map(|&w| tier[w]).min() {
            tier[u] = tier[u].min(pulled);
        }
    }

    let mut keyed: Vec<usize> = identity;
    keyed.sort_by(|&a, &b| {
        (tier[a], units[a].kind.rank(), &units[a].target_path, &units[a].id).cmp(&(
            tier[b],
            units[b].kind.rank(),
            &units[b].target_path,
            &units[b].id,
        ))
    });
    let mut priority = vec![0usize; units.len()];
    for (pos, &i) in keyed.iter().enumerate() {
        priority[i] = pos;
    }
    let order = topological_order(&deps, &dependents, &priority);

    let mut slots: Vec<Option<ChangeUnit>> = units.into_iter().map(Some).collect();
    let mut phases: Vec<Phase> = Vec::new();
    for i in order {
        let Some(unit) = slots[i].take() else {
            continue;
        };
        match phases.last_mut() {
            Some(phase) if phase.priority_tier == tier[i] => phase.units.push(unit),
            _ => phases.push(Phase {
                label: policy.label(tier[i]),
                priority_tier: tier[i],
                units: vec![unit],
            }),
        }
    }

    Ok(Plan::new(phases))
}

/// Add file-existence edges between units
pub(crate) fn add_structural_dependencies(units: &mut [ChangeUnit]) {
    let mut edges: Vec<(usize, String)> = Vec::new();

    for (ai, a) in units.iter().enumerate() {
        for (bi, b) in units.iter().enumerate() {
            if ai == bi {
                continue;
            }
            match a.kind {
                ChangeKind::Create => {
                    // The created file must exist before anything refers to or edits it
                    if b.references.contains(&a.target_path)
                        || (b.target_path == a.target_path && b.kind != ChangeKind::Create)
                    {
                        edges.push((bi, a.id.clone()));
                    }
                }
                ChangeKind::Rename => {
                    let Some(to) = &a.rename_to else {
                        continue;
                    };
                    if b.references.contains(to)
                        || b.drops_references.contains(&a.target_path)
                        || (&b.target_path == to && b.kind != ChangeKind::Create)
                    {
                        edges.push((bi, a.id.clone()));
                    } else if b.target_path == a.target_path && b.kind == ChangeKind::Modify {
                        // Edit the file while it is still at its old path
                        edges.push((ai, b.id.clone()));
                    }
                }
                ChangeKind::Delete => {
                    if b.drops_references.contains(&a.target_path)
                        || (b.target_path == a.target_path && b.kind != ChangeKind::Delete)
                    {
                        edges.push((ai, b.id.clone()));
                    }
                }
                ChangeKind::Modify => {}
            }
        }
    }

    for (unit, dep) in edges {
        units[unit].depends_on.insert(dep);
    }
}

/// Kahn's algorithm; among ready units the smallest `priority` goes first
fn topological_order(
    deps: &[Vec<usize>],
    dependents: &[Vec<usize>],
    priority: &[usize],
) -> Vec<usize> {
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse((priority[i], i)))
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(Reverse((_, u))) = ready.pop() {
        order.push(u);
        for &w in &dependents[u] {
            remaining[w] -= 1;
            if remaining[w] == 0 {
                ready.push(Reverse((priority[w], w)));
            }
        }
    }
    order
}

/// Shortest dependency cycle, or `None` when the graph is acyclic
fn find_minimal_cycle(units: &[ChangeUnit], deps: &[Vec<usize>]) -> Option<Vec<String>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..units.len()).map(|i| graph.add_node(i)).collect();
    for (u, ds) in deps.iter().enumerate() {
        for &d in ds {
            graph.add_edge(nodes[u], nodes[d], ());
        }
    }

    let mut best: Option<Vec<String>> = None;
    for scc in tarjan_scc(&graph) {
        let members: HashSet<usize> = scc.iter().map(|&n| graph[n]).collect();
        let cyclic = members.len() > 1 || members.iter().any(|&u| deps[u].contains(&u));
        if !cyclic {
            continue;
        }

        for &start in &members {
            let Some(path) = shortest_cycle_through(start, deps, &members) else {
                continue;
            };
            let ids = normalize_cycle(path.iter().map(|&i| units[i].id.clone()).collect());
            let shorter = match &best {
                None => true,
                Some(current) => (ids.len(), &ids) < (current.len(), current),
            };
            if shorter {
                best = Some(ids);
            }
        }
    }
    best
}

/// BFS along `depends_on` edges from `start` back to itself
fn shortest_cycle_through(
    start: usize,
    deps: &[Vec<usize>],
    members: &HashSet<usize>,
) -> Option<Vec<usize>> {
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(u) = queue.pop_front() {
        for &d in &deps[u] {
            if !members.contains(&d) {
                continue;
            }
            if d == start {
                let mut path = vec![u];
                let mut cur = u;
                while cur != start {
                    match parent.get(&cur) {
                        Some(&p) => {
                            cur = p;
                            path.push(cur);
                        }
                        None => break,
                    }
                }
                path.reverse();
                return Some(path);
            }
            if !parent.contains_key(&d) {
                parent.insert(d, u);
                queue.push_back(d);
            }
        }
    }
    None
}

/// Rotate a cycle to start at its smallest id
fn normalize_cycle(cycle: Vec<String>) -> Vec<String> {
    let Some(min_idx) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| *id)
        .map(|(i, _)| i)
    else {
        return cycle;
    };
    let mut normalized = Vec::with_capacity(cycle.len());
    normalized.extend_from_slice(&cycle[min_idx..]);
    normalized.extend_from_slice(&cycle[..min_idx]);
    normalized
}
