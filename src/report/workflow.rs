//! Remediation plan synthesis: sequential phases by priority, and parallel
//! groups of issues that can be fixed without touching the same file.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::types::{Category, CategoryResult, Issue, ParallelGroup, WorkflowPhase, WorkflowPlan, REPOSITORY_SENTINEL};

/// Disjoint sets over `0..n` with path compression and union by size.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Key an issue's file is clustered under. Repository-wide findings never share
/// a key with a real path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey<'a> {
    Repository,
    Path(&'a str),
}

fn file_key(issue: &Issue) -> FileKey<'_> {
    if issue.file == REPOSITORY_SENTINEL {
        FileKey::Repository
    } else {
        FileKey::Path(issue.file.strip_prefix("./").unwrap_or(&issue.file))
    }
}

/// Build the workflow plan from the full category-result map.
pub fn plan(categories: &BTreeMap<Category, CategoryResult>) -> WorkflowPlan {
    let phases = build_phases(categories);
    let parallel_groups = build_parallel_groups(categories);
    let total_time = phases.iter().map(|p| p.estimated_time).sum();

    WorkflowPlan {
        phases,
        parallel_groups,
        total_time,
    }
}

fn build_phases(categories: &BTreeMap<Category, CategoryResult>) -> Vec<WorkflowPhase> {
    let mut by_priority: BTreeMap<u32, Vec<&CategoryResult>> = BTreeMap::new();
    for result in categories.values() {
        by_priority.entry(result.priority).or_default().push(result);
    }

    by_priority
        .into_iter()
        .enumerate()
        .map(|(i, (priority, mut members))| {
            members.sort_by_key(|r| r.category.as_str());
            WorkflowPhase {
                index: i + 1,
                priority,
                categories: members.iter().map(|r| r.category).collect(),
                issue_count: members.iter().map(|r| r.issue_count).sum(),
                estimated_time: members.iter().map(|r| r.estimated_time).sum(),
            }
        })
        .collect()
}

fn build_parallel_groups(categories: &BTreeMap<Category, CategoryResult>) -> Vec<ParallelGroup> {
    let issues: Vec<&Issue> = categories.values().flat_map(|r| r.issues.iter()).collect();
    let mut sets = DisjointSet::new(issues.len());

    // Every issue touching a file is joined with the first issue seen on that file.
    let mut first_on_file: HashMap<FileKey<'_>, usize> = HashMap::new();
    for (idx, issue) in issues.iter().enumerate() {
        match first_on_file.get(&file_key(issue)) {
            Some(&first) => sets.union(first, idx),
            None => {
                first_on_file.insert(file_key(issue), idx);
            }
        }
    }

    // Components are emitted in order of their first member.
    let mut component_slot: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<ParallelGroup> = Vec::new();
    for (idx, issue) in issues.iter().enumerate() {
        let root = sets.find(idx);
        let slot = *component_slot.entry(root).or_insert_with(|| {
            groups.push(ParallelGroup {
                name: format!("group-{}", groups.len() + 1),
                files: Vec::new(),
                categories: Vec::new(),
                issue_count: 0,
                estimated_time: Duration::ZERO,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        let file = match file_key(issue) {
            FileKey::Repository => REPOSITORY_SENTINEL,
            FileKey::Path(path) => path,
        };
        if !group.files.iter().any(|f| f == file) {
            group.files.push(file.to_string());
        }
        if !group.categories.contains(&issue.category) {
            group.categories.push(issue.category);
        }
        group.issue_count += 1;
        group.estimated_time += issue.estimated_time;
    }

    groups
}
