//! The build graph: files, the edges that produce them, and the rules those
//! edges instantiate.
//!
//! Files and edges reference each other in both directions, so both live in
//! arenas owned by the Graph and point at each other with typed indices.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::canon::canon_path;
use crate::densemap::{self, DenseMap};
use crate::eval::{Env, Template};
use crate::fs::MTime;
use crate::smallmap::SmallMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileId(usize);
impl densemap::Index for FileId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for FileId {
    fn from(u: usize) -> FileId {
        FileId(u)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EdgeId(usize);
impl densemap::Index for EdgeId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for EdgeId {
    fn from(u: usize) -> EdgeId {
        EdgeId(u)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RuleId(usize);
impl densemap::Index for RuleId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for RuleId {
    fn from(u: usize) -> RuleId {
        RuleId(u)
    }
}

/// Information about a node in the dependency graph: the file, whether it's
/// dirty, mtime, etc.
#[derive(Debug)]
pub struct Node {
    /// Canonicalized path; the node table guarantees one node per path.
    pub name: String,
    /// Possible values:
    ///   None                 - file hasn't been examined
    ///   Some(MTime::Missing) - we looked, and the file doesn't exist
    ///   Some(MTime::Stamp)   - actual file's mtime
    pub mtime: Option<MTime>,
    /// True when the underlying file is known to be out-of-date.  Only
    /// meaningful after a scan.
    pub dirty: bool,
    /// The edge that produces this node, if any.
    pub in_edge: Option<EdgeId>,
    /// All edges that use this node as an input.
    pub out_edges: Vec<EdgeId>,
}

impl Node {
    pub fn status_known(&self) -> bool {
        self.mtime.is_some()
    }

    pub fn exists(&self) -> bool {
        matches!(self.mtime, Some(MTime::Stamp(_)))
    }
}

/// An invokable build command and associated metadata (description, depfile,
/// response file).  Immutable once registered with the graph.
#[derive(Debug, Default)]
pub struct Rule {
    pub name: String,
    pub command: Template,
    pub description: Template,
    pub depfile: Template,
    pub rspfile: Template,
    pub rspfile_content: Template,
    pub generator: bool,
    pub restat: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Rule {
        Rule {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The reserved rule name for edges that run no command and exist purely to
/// group dependencies or alias targets.
pub const PHONY: &str = "phony";

/// An edge in the dependency graph; links between Nodes using a Rule.
#[derive(Debug)]
pub struct Edge {
    pub rule: RuleId,
    /// All inputs, in three contiguous regions: explicit (listed on the
    /// command line via $in), implicit (dirty the outputs but stay off the
    /// command line), then order-only (must exist, never dirty).  The counts
    /// below partition the vector from the back; inputs discovered in a
    /// depfile form a suffix of the implicit region.
    pub ins: Vec<FileId>,
    pub outs: Vec<FileId>,
    pub bindings: SmallMap<String, String>,
    pub outputs_ready: bool,
    pub implicit_ins: usize,
    pub depfile_implicit_ins: usize,
    pub order_only_ins: usize,
}

impl Edge {
    /// The inputs that appear as $in.
    pub fn explicit_ins(&self) -> &[FileId] {
        &self.ins[..self.ins.len() - self.order_only_ins - self.implicit_ins]
    }

    /// The inputs whose mtimes dirty the outputs: explicit and implicit.
    pub fn dirtying_ins(&self) -> &[FileId] {
        &self.ins[..self.ins.len() - self.order_only_ins]
    }

    pub fn is_implicit(&self, index: usize) -> bool {
        index >= self.ins.len() - self.order_only_ins - self.implicit_ins
            && !self.is_order_only(index)
    }

    pub fn is_depfile_implicit(&self, index: usize) -> bool {
        index >= self.ins.len() - self.order_only_ins - self.depfile_implicit_ins
            && !self.is_order_only(index)
    }

    pub fn is_order_only(&self, index: usize) -> bool {
        index >= self.ins.len() - self.order_only_ins
    }
}

/// The build state for one invocation: the node table, the edge and rule
/// arenas, and file-scope variable bindings.  Nodes and edges are created by
/// the manifest parser and live until the graph is dropped.
pub struct Graph {
    files: DenseMap<FileId, Node>,
    file_ids: HashMap<String, FileId>,
    edges: DenseMap<EdgeId, Edge>,
    rules: DenseMap<RuleId, Rule>,
    rule_ids: HashMap<String, RuleId>,
    pub bindings: SmallMap<String, String>,
    phony: RuleId,
}

impl Graph {
    pub fn new() -> Graph {
        let mut graph = Graph {
            files: DenseMap::new(),
            file_ids: HashMap::new(),
            edges: DenseMap::new(),
            rules: DenseMap::new(),
            rule_ids: HashMap::new(),
            bindings: SmallMap::new(),
            phony: RuleId(0),
        };
        graph.phony = graph.add_rule(Rule::new(PHONY));
        graph
    }

    /// Look up a file by (possibly non-canonical) path, adding a node for it
    /// if none exists.  The same canonical path always yields the same id.
    pub fn file_id(&mut self, name: impl Into<String>) -> FileId {
        let name = canon_path(name);
        match self.file_ids.get(&name) {
            Some(&id) => id,
            None => {
                let id = self.files.push(Node {
                    name: name.clone(),
                    mtime: None,
                    dirty: false,
                    in_edge: None,
                    out_edges: Vec::new(),
                });
                self.file_ids.insert(name, id);
                id
            }
        }
    }

    /// Like file_id, but without creating missing nodes.
    pub fn lookup_file_id(&self, name: &str) -> Option<FileId> {
        self.file_ids.get(&canon_path(name)).copied()
    }

    pub fn file(&self, id: FileId) -> &Node {
        self.files.get(id)
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut Node {
        self.files.get_mut(id)
    }

    pub fn add_rule(&mut self, rule: Rule) -> RuleId {
        if self.rule_ids.contains_key(&rule.name) {
            panic!("duplicate rule {:?}", rule.name);
        }
        let name = rule.name.clone();
        let id = self.rules.push(rule);
        self.rule_ids.insert(name, id);
        id
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id)
    }

    pub fn lookup_rule(&self, name: &str) -> Option<RuleId> {
        self.rule_ids.get(name).copied()
    }

    pub fn phony_rule(&self) -> RuleId {
        self.phony
    }

    /// Add one build statement: inputs in manifest order (explicit, then
    /// implicit, then order-only) with the lengths of the two trailing
    /// regions, and at least one output.
    pub fn add_edge(
        &mut self,
        rule: RuleId,
        ins: Vec<FileId>,
        implicit_ins: usize,
        order_only_ins: usize,
        outs: Vec<FileId>,
        bindings: SmallMap<String, String>,
    ) -> EdgeId {
        assert!(implicit_ins + order_only_ins <= ins.len());
        assert!(!outs.is_empty());
        let id = self.edges.next_id();
        for &out in &outs {
            let node = self.files.get_mut(out);
            match node.in_edge {
                Some(other) => panic!("{:?} built by two edges {:?} {:?}", node.name, other, id),
                None => node.in_edge = Some(id),
            }
        }
        for &f in &ins {
            self.files.get_mut(f).out_edges.push(id);
        }
        self.edges.push(Edge {
            rule,
            ins,
            outs,
            bindings,
            outputs_ready: false,
            implicit_ins,
            depfile_implicit_ins: 0,
            order_only_ins,
        })
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges.get_mut(id)
    }

    pub fn is_phony(&self, id: EdgeId) -> bool {
        self.edges.get(id).rule == self.phony
    }

    /// Append a dep discovered in a depfile as an implicit input, just ahead
    /// of the order-only region.
    pub fn add_depfile_input(&mut self, edge_id: EdgeId, file: FileId) {
        let edge = self.edges.get_mut(edge_id);
        let pos = edge.ins.len() - edge.order_only_ins;
        edge.ins.insert(pos, file);
        edge.implicit_ins += 1;
        edge.depfile_implicit_ins += 1;
        self.files.get_mut(file).out_edges.push(edge_id);
    }

    /// True iff every input is either a source file or produced by an edge
    /// whose outputs are ready.
    pub fn all_inputs_ready(&self, id: EdgeId) -> bool {
        self.edges.get(id).ins.iter().all(|&f| {
            match self.files.get(f).in_edge {
                None => true,
                Some(e) => self.edges.get(e).outputs_ready,
            }
        })
    }

    /// Forget all stat and scan results, so a fresh scan observes the
    /// current filesystem.  Depfile-discovered inputs stay: once found they
    /// are part of the parsed graph.
    pub fn reset(&mut self) {
        for node in self.files.values_mut() {
            node.mtime = None;
            node.dirty = false;
        }
        for edge in self.edges.values_mut() {
            edge.outputs_ready = false;
        }
    }

    fn evaluate(&self, id: EdgeId, template: &Template) -> String {
        let edge = self.edges.get(id);
        let env = EdgeEnv { graph: self, edge };
        template.evaluate(&[&env, &edge.bindings, &self.bindings])
    }

    /// Expand all variables in the edge's command and return it as a string.
    /// If incl_rsp_file is enabled, the string will also contain the full
    /// contents of the response file (if the rule uses one), so that
    /// response file changes invalidate recorded commands.
    pub fn evaluate_command(&self, id: EdgeId, incl_rsp_file: bool) -> String {
        let rule = self.rules.get(self.edges.get(id).rule);
        let mut command = self.evaluate(id, &rule.command);
        if incl_rsp_file && self.has_rspfile(id) {
            command.push('\n');
            command.push_str(&self.rspfile_content(id));
        }
        command
    }

    /// The path of the edge's depfile; empty when the rule declares none.
    pub fn evaluate_depfile(&self, id: EdgeId) -> String {
        let rule = self.rules.get(self.edges.get(id).rule);
        self.evaluate(id, &rule.depfile)
    }

    pub fn description(&self, id: EdgeId) -> String {
        let rule = self.rules.get(self.edges.get(id).rule);
        self.evaluate(id, &rule.description)
    }

    /// Does the edge use a response file?
    pub fn has_rspfile(&self, id: EdgeId) -> bool {
        !self.rules.get(self.edges.get(id).rule).rspfile.is_empty()
    }

    pub fn rspfile(&self, id: EdgeId) -> String {
        let rule = self.rules.get(self.edges.get(id).rule);
        self.evaluate(id, &rule.rspfile)
    }

    pub fn rspfile_content(&self, id: EdgeId) -> String {
        let rule = self.rules.get(self.edges.get(id).rule);
        self.evaluate(id, &rule.rspfile_content)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

/// The implicit per-edge bindings: $in is the shell-quoted explicit inputs,
/// $out the shell-quoted outputs.
struct EdgeEnv<'a> {
    graph: &'a Graph,
    edge: &'a Edge,
}

impl EdgeEnv<'_> {
    fn path_list(&self, ids: &[FileId]) -> String {
        let mut out = String::new();
        for &id in ids {
            if !out.is_empty() {
                out.push(' ');
            }
            push_quoted(&mut out, &self.graph.file(id).name);
        }
        out
    }
}

impl Env for EdgeEnv<'_> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        match var {
            "in" => Some(Cow::Owned(self.path_list(self.edge.explicit_ins()))),
            "out" => Some(Cow::Owned(self.path_list(&self.edge.outs))),
            _ => None,
        }
    }
}

/// A path containing a space is wrapped in double quotes on command lines;
/// anything else is emitted verbatim.
fn push_quoted(out: &mut String, path: &str) {
    if path.contains(' ') {
        out.push('"');
        out.push_str(path);
        out.push('"');
    } else {
        out.push_str(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Chunk;

    fn cat_command() -> Template {
        Template::new(vec![
            Chunk::Literal("cat ".into()),
            Chunk::Var("in".into()),
            Chunk::Literal(" > ".into()),
            Chunk::Var("out".into()),
        ])
    }

    fn add_cat_edge(graph: &mut Graph, ins: &[&str], outs: &[&str]) -> EdgeId {
        let rule = match graph.lookup_rule("cat") {
            Some(id) => id,
            None => {
                let mut rule = Rule::new("cat");
                rule.command = cat_command();
                graph.add_rule(rule)
            }
        };
        let ins = ins.iter().map(|n| graph.file_id(*n)).collect();
        let outs = outs.iter().map(|n| graph.file_id(*n)).collect();
        graph.add_edge(rule, ins, 0, 0, outs, SmallMap::new())
    }

    #[test]
    fn file_identity_by_canonical_path() {
        let mut graph = Graph::new();
        let a = graph.file_id("./out/../foo.o");
        let b = graph.file_id("foo.o");
        assert_eq!(a, b);
        assert_eq!(graph.file(a).name, "foo.o");
        assert_eq!(graph.lookup_file_id("out/../foo.o"), Some(a));
    }

    #[test]
    fn input_partitioning() {
        let mut graph = Graph::new();
        let rule = graph.add_rule(Rule::new("cc"));
        let ins: Vec<FileId> = ["a", "b", "i1", "i2", "oo"]
            .iter()
            .map(|n| graph.file_id(*n))
            .collect();
        let out = graph.file_id("out");
        let id = graph.add_edge(rule, ins, 2, 1, vec![out], SmallMap::new());

        let edge = graph.edge(id);
        assert_eq!(edge.explicit_ins().len(), 2);
        assert_eq!(edge.dirtying_ins().len(), 4);
        assert!(!edge.is_implicit(1));
        assert!(edge.is_implicit(2));
        assert!(edge.is_implicit(3));
        assert!(!edge.is_order_only(3));
        assert!(edge.is_order_only(4));
        assert!(!edge.is_depfile_implicit(2));
    }

    #[test]
    fn depfile_inputs_extend_implicit_region() {
        let mut graph = Graph::new();
        let rule = graph.add_rule(Rule::new("cc"));
        let a = graph.file_id("a");
        let oo = graph.file_id("oo");
        let out = graph.file_id("out");
        let id = graph.add_edge(rule, vec![a, oo], 0, 1, vec![out], SmallMap::new());

        let dep = graph.file_id("gen.h");
        graph.add_depfile_input(id, dep);

        let edge = graph.edge(id);
        assert_eq!(edge.ins, vec![a, dep, oo]);
        assert_eq!(edge.implicit_ins, 1);
        assert_eq!(edge.depfile_implicit_ins, 1);
        assert!(edge.is_implicit(1));
        assert!(edge.is_depfile_implicit(1));
        assert!(edge.is_order_only(2));
        assert!(graph.file(dep).out_edges.contains(&id));
    }

    #[test]
    #[should_panic(expected = "built by two edges")]
    fn two_edges_one_output() {
        let mut graph = Graph::new();
        add_cat_edge(&mut graph, &["a"], &["out"]);
        add_cat_edge(&mut graph, &["b"], &["out"]);
    }

    #[test]
    fn quote_spaces_in_in_and_out() {
        let mut graph = Graph::new();
        let id = add_cat_edge(&mut graph, &["nospace", "with space", "nospace2"], &["a b"]);
        assert_eq!(
            graph.evaluate_command(id, false),
            "cat nospace \"with space\" nospace2 > \"a b\""
        );
    }

    #[test]
    fn edge_bindings_shadow_file_scope() {
        let mut graph = Graph::new();
        graph.bindings.insert("flags".into(), "-O0".into());
        let mut rule = Rule::new("cc");
        rule.command = Template::new(vec![
            Chunk::Literal("cc ".into()),
            Chunk::Var("flags".into()),
            Chunk::Literal(" ".into()),
            Chunk::Var("in".into()),
        ]);
        let rule = graph.add_rule(rule);
        let src = graph.file_id("foo.c");
        let out = graph.file_id("foo.o");
        let bindings = SmallMap::from([("flags".to_string(), "-O2".to_string())]);
        let id = graph.add_edge(rule, vec![src], 0, 0, vec![out], bindings);
        assert_eq!(graph.evaluate_command(id, false), "cc -O2 foo.c");

        let out2 = graph.file_id("bar.o");
        let plain = graph.add_edge(rule, vec![src], 0, 0, vec![out2], SmallMap::new());
        assert_eq!(graph.evaluate_command(plain, false), "cc -O0 foo.c");
    }

    #[test]
    fn command_with_rspfile_content() {
        let mut graph = Graph::new();
        let mut rule = Rule::new("link");
        rule.command = Template::new(vec![
            Chunk::Literal("link @".into()),
            Chunk::Var("out".into()),
            Chunk::Literal(".rsp".into()),
        ]);
        rule.rspfile = Template::new(vec![Chunk::Var("out".into()), Chunk::Literal(".rsp".into())]);
        rule.rspfile_content = Template::new(vec![Chunk::Var("in".into())]);
        let rule = graph.add_rule(rule);
        let a = graph.file_id("a.o");
        let b = graph.file_id("b.o");
        let out = graph.file_id("prog");
        let id = graph.add_edge(rule, vec![a, b], 0, 0, vec![out], SmallMap::new());

        assert!(graph.has_rspfile(id));
        assert_eq!(graph.rspfile(id), "prog.rsp");
        assert_eq!(graph.rspfile_content(id), "a.o b.o");
        assert_eq!(graph.evaluate_command(id, false), "link @prog.rsp");
        assert_eq!(graph.evaluate_command(id, true), "link @prog.rsp\na.o b.o");
    }

    #[test]
    fn description_empty_when_unset() {
        let mut graph = Graph::new();
        let id = add_cat_edge(&mut graph, &["in"], &["out"]);
        assert_eq!(graph.description(id), "");
        assert_eq!(graph.evaluate_depfile(id), "");
    }

    #[test]
    fn phony_is_reserved() {
        let mut graph = Graph::new();
        let gen = graph.file_id("gen.h");
        let stamp = graph.file_id("stamp");
        let id = graph.add_edge(
            graph.phony_rule(),
            vec![gen],
            0,
            0,
            vec![stamp],
            SmallMap::new(),
        );
        assert!(graph.is_phony(id));
        assert_eq!(graph.evaluate_command(id, true), "");

        let other = add_cat_edge(&mut graph, &["a"], &["b"]);
        assert!(!graph.is_phony(other));
    }

    #[test]
    fn reset_clears_scan_state_not_structure() {
        let mut graph = Graph::new();
        let id = add_cat_edge(&mut graph, &["in"], &["out"]);
        let dep = graph.file_id("dep.h");
        graph.add_depfile_input(id, dep);

        let f = graph.lookup_file_id("in").unwrap();
        graph.file_mut(f).mtime = Some(MTime::Stamp(1));
        graph.file_mut(f).dirty = true;
        graph.edge_mut(id).outputs_ready = true;

        graph.reset();
        assert_eq!(graph.file(f).mtime, None);
        assert!(!graph.file(f).dirty);
        assert!(!graph.edge(id).outputs_ready);
        assert_eq!(graph.edge(id).depfile_implicit_ins, 1);
    }
}
