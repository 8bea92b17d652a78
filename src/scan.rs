//! The dependency scan: walking an edge's transitive inputs to decide which
//! outputs are out of date and which edges have their prerequisites resolved.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, bail};

use crate::depfile;
use crate::fs::{FileSystem, MTime};
use crate::graph::{EdgeId, FileId, Graph};
use crate::hash::{hash_command, Hash};
use crate::scanner::Scanner;

/// The scan's view of the build log: the digest of the last command used to
/// produce each output, when one was recorded.
pub trait BuildLog {
    fn command_hash_for(&self, output: &str) -> Option<Hash>;
}

/// Scans the files in a graph and updates the dirty/outputs_ready state of
/// nodes and edges.
pub struct Scan<'a> {
    graph: &'a mut Graph,
    file_system: &'a dyn FileSystem,
    build_log: Option<&'a dyn BuildLog>,
}

impl<'a> Scan<'a> {
    pub fn new(
        graph: &'a mut Graph,
        file_system: &'a dyn FileSystem,
        build_log: Option<&'a dyn BuildLog>,
    ) -> Self {
        Scan {
            graph,
            file_system,
            build_log,
        }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Examine inputs, outputs, and command lines to judge whether an edge
    /// needs to be re-run, and update outputs_ready and each output's dirty
    /// state accordingly.  Missing files are data, not errors; only a disk
    /// failure or an unparsable depfile fails the scan, leaving partial
    /// state the caller must discard via reset.
    pub fn recompute_dirty(&mut self, id: EdgeId) -> anyhow::Result<()> {
        if self.graph.edge(id).outputs_ready {
            return Ok(());
        }

        // Ingest the depfile first so discovered inputs take part in the
        // rest of the scan.  A declared but absent depfile means we no
        // longer know what the last run read; the outputs must re-run.
        let mut dirty = false;
        let depfile = self.graph.evaluate_depfile(id);
        if !depfile.is_empty() {
            dirty = !self.load_depfile(id, &depfile)?;
        }

        // Visit inputs depth-first, so an input's producing edge is fully
        // processed before the input's mtime is read.
        for i in 0..self.graph.edge(id).ins.len() {
            let input = self.graph.edge(id).ins[i];
            if let Some(in_edge) = self.graph.file(input).in_edge {
                self.recompute_dirty(in_edge)?;
            }
            self.stat_if_necessary(input)?;
        }

        // Readiness only asks whether producing edges have resolved, not
        // whether anything is dirty.
        let outputs_ready = self.graph.all_inputs_ready(id);
        self.graph.edge_mut(id).outputs_ready = outputs_ready;

        // A dirty non-order-only input dirties us in turn, except when it
        // comes from a restat edge, whose consumers wait for the post-build
        // re-stat before deciding.
        if !dirty {
            for &input in self.graph.edge(id).dirtying_ins() {
                let node = self.graph.file(input);
                if !node.dirty {
                    continue;
                }
                let restat = match node.in_edge {
                    Some(e) => self.graph.rule(self.graph.edge(e).rule).restat,
                    None => false,
                };
                if !restat {
                    dirty = true;
                    break;
                }
            }
        }

        // The newest input, order-only region excluded; ties keep the first.
        let mut most_recent_input: Option<FileId> = None;
        for &input in self.graph.edge(id).dirtying_ins() {
            match most_recent_input {
                None => most_recent_input = Some(input),
                Some(newest) => {
                    if self.graph.file(input).mtime > self.graph.file(newest).mtime {
                        most_recent_input = Some(input);
                    }
                }
            }
        }

        // Edge-level dirtiness (lost depfile, dirty input) taints every
        // output; otherwise each output is judged on its own.
        let command = if dirty {
            None
        } else {
            Some(self.graph.evaluate_command(id, true))
        };
        for i in 0..self.graph.edge(id).outs.len() {
            let output = self.graph.edge(id).outs[i];
            self.stat_if_necessary(output)?;
            let output_dirty = match &command {
                None => true,
                Some(command) => {
                    self.recompute_output_dirty(id, most_recent_input, command, output)
                }
            };
            if output_dirty {
                self.graph.file_mut(output).dirty = true;
            }
        }

        Ok(())
    }

    /// Recompute whether a given single output should be considered dirty,
    /// given the newest non-order-only input and the expanded command.
    /// First match wins.
    pub fn recompute_output_dirty(
        &self,
        id: EdgeId,
        most_recent_input: Option<FileId>,
        command: &str,
        output: FileId,
    ) -> bool {
        let edge = self.graph.edge(id);
        let out = self.graph.file(output);

        if self.graph.is_phony(id) {
            // Phony edges write nothing; all they ask is that their
            // explicit inputs are present.
            return edge
                .explicit_ins()
                .iter()
                .any(|&input| !self.graph.file(input).exists());
        }

        if !out.exists() {
            return true;
        }

        if let Some(input) = most_recent_input {
            if self.graph.file(input).mtime > out.mtime {
                return true;
            }
        }

        if let Some(log) = self.build_log {
            match log.command_hash_for(&out.name) {
                Some(recorded) => {
                    if recorded != hash_command(command) {
                        return true;
                    }
                }
                None => {
                    // No record of how this output was produced, and the
                    // edge reads deps we can't verify: rebuild.
                    if !self.graph.rule(edge.rule).depfile.is_empty() {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Read the depfile at `path` and append every dep it names to the
    /// edge's implicit inputs.  Returns false when the depfile is absent or
    /// empty, which the caller treats as the edge being out of date.
    pub fn load_depfile(&mut self, id: EdgeId, path: &str) -> anyhow::Result<bool> {
        let mut bytes = match self.file_system.read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => bail!("loading '{}': {}", path, err),
        };
        if bytes.is_empty() {
            return Ok(false);
        }
        bytes.push(0);

        let mut scanner = Scanner::new(&bytes);
        let deps = depfile::parse(&mut scanner).map_err(|err| {
            anyhow!(
                "loading '{}': {}",
                path,
                scanner.format_parse_error(Path::new(path), err)
            )
        })?;

        for dep in deps {
            let file = self.graph.file_id(dep.as_ref());
            self.graph.add_depfile_input(id, file);
        }
        Ok(true)
    }

    fn stat_if_necessary(&mut self, id: FileId) -> anyhow::Result<()> {
        if self.graph.file(id).status_known() {
            return Ok(());
        }
        let mtime = {
            let name = &self.graph.file(id).name;
            self.file_system
                .stat(name)
                .map_err(|err| anyhow!("stat {}: {}", name, err))?
        };
        let node = self.graph.file_mut(id);
        node.mtime = Some(mtime);
        // A source file the disk says is gone can never be brought up to
        // date; everything reached from it rebuilds.
        if mtime == MTime::Missing && node.in_edge.is_none() {
            node.dirty = true;
        }
        Ok(())
    }
}

/// Whether `edge` depends on `file` through manifest-declared inputs alone,
/// ignoring anything discovered in depfiles.  Used to flag builds that reach
/// a generated file only through a depfile, which would race against the
/// generator.
pub fn has_non_depfile_dependency(graph: &Graph, edge: EdgeId, file: FileId) -> bool {
    let mut visited = HashSet::new();
    non_depfile_dependency_search(graph, edge, file, &mut visited)
}

fn non_depfile_dependency_search(
    graph: &Graph,
    id: EdgeId,
    file: FileId,
    visited: &mut HashSet<EdgeId>,
) -> bool {
    if !visited.insert(id) {
        return false;
    }
    // Reaching the edge that produces the file counts: a sibling output of
    // a declared input comes out of the same run as the input itself.
    if graph.file(file).in_edge == Some(id) {
        return true;
    }
    let edge = graph.edge(id);
    for (index, &input) in edge.ins.iter().enumerate() {
        if edge.is_depfile_implicit(index) {
            continue;
        }
        if input == file {
            return true;
        }
        if let Some(in_edge) = graph.file(input).in_edge {
            if non_depfile_dependency_search(graph, in_edge, file, visited) {
                return true;
            }
        }
    }
    false
}
