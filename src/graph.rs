use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

/// Edges recorded by one worker. Workers only ever append; the lists are merged once all of them are done.
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    edges: Vec<(Arc<str>, Arc<str>)>
}

impl EdgeList {
    pub fn new() -> EdgeList {
        EdgeList::default()
    }

    pub fn push(&mut self, from: Arc<str>, to: Arc<str>) {
        self.edges.push((from, to));
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Which classes refer to which. An edge means that loading the source class can make the JVM try to load the
/// target, whether or not the target actually exists.
#[derive(Debug, Clone, Default)]
pub struct ClassReferenceGraph {
    successors: HashMap<Arc<str>, BTreeSet<Arc<str>>>,
    nodes: HashSet<Arc<str>>,
    edge_count: usize
}

impl ClassReferenceGraph {
    pub fn new() -> ClassReferenceGraph {
        ClassReferenceGraph::default()
    }

    pub fn from_edges<I: IntoIterator<Item=EdgeList>>(batches: I) -> ClassReferenceGraph {
        let mut graph = ClassReferenceGraph::new();
        let mut lists = 0;

        for batch in batches {
            lists += 1;
            for (from, to) in batch.edges {
                graph.add_reference(from, to);
            };
        };

        debug!("merged {} edge lists into {} classes and {} edges", lists, graph.len(), graph.edge_count);
        graph
    }

    pub fn add_reference(&mut self, from: Arc<str>, to: Arc<str>) {
        if from == to {
            self.nodes.insert(from);
            return;
        };

        self.nodes.insert(from.clone());
        self.nodes.insert(to.clone());

        if self.successors.entry(from).or_insert_with(BTreeSet::new).insert(to) {
            self.edge_count += 1;
        };
    }

    pub fn successors(&self, class_name: &str) -> impl Iterator<Item=&Arc<str>> {
        self.successors.get(class_name).into_iter().flat_map(|s| s.iter())
    }

    /// Every class reachable from `roots`, the roots included.
    pub fn reachable_from<'a, I: IntoIterator<Item=&'a Arc<str>>>(&self, roots: I) -> HashSet<Arc<str>> {
        let mut reachable = HashSet::new();
        let mut worklist = VecDeque::new();

        for r in roots {
            if reachable.insert(r.clone()) {
                worklist.push_back(r.clone());
            };
        };

        while let Some(class_name) = worklist.pop_front() {
            for next in self.successors(&class_name) {
                if reachable.insert(next.clone()) {
                    worklist.push_back(next.clone());
                };
            };
        };

        reachable
    }

    pub fn is_reachable<'a, I: IntoIterator<Item=&'a Arc<str>>>(&self, class_name: &str, roots: I) -> bool {
        self.path_from(roots, class_name).is_some()
    }

    /// A shortest chain of references leading from one of `roots` to `class_name`, starting with the root.
    pub fn path_from<'a, I: IntoIterator<Item=&'a Arc<str>>>(&self, roots: I, class_name: &str) -> Option<Vec<Arc<str>>> {
        let mut parents: HashMap<Arc<str>, Option<Arc<str>>> = HashMap::new();
        let mut worklist = VecDeque::new();

        // Sorted so the chain reported does not depend on the iteration order of the caller's set
        let roots: BTreeSet<_> = roots.into_iter().cloned().collect();

        for r in roots {
            parents.insert(r.clone(), None);
            worklist.push_back(r);
        };

        while let Some(current) = worklist.pop_front() {
            if &*current == class_name {
                let mut path = vec![current.clone()];
                let mut next = parents.get(&current).cloned().flatten();

                while let Some(p) = next {
                    next = parents.get(&p).cloned().flatten();
                    path.push(p);
                };

                path.reverse();
                return Some(path);
            };

            for next in self.successors(&current) {
                if !parents.contains_key(next) {
                    parents.insert(next.clone(), Some(current.clone()));
                    worklist.push_back(next.clone());
                };
            };
        };

        None
    }

    /// Number of distinct classes seen, as sources or as targets.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
