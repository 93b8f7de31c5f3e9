//! Bundle assembly from emitted records
//!
//! The traversal promises uniqueness and completeness but no ordering, so
//! the emitter sorts post hoc: records go into a petgraph `DiGraph` keyed
//! by canonical location and come out dependencies-first, falling back to
//! stream order when the graph is cyclic. Each record's own source is
//! annotated with its identity token so resolved identities survive
//! concatenation, and text-resource records are rendered as
//! string-returning defines.

use std::path::PathBuf;

use indexmap::IndexMap;
use log::{debug, warn};
use once_cell::sync::Lazy;
use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use regex::Regex;

use crate::walker::ModuleRecord;

/// `define(` immediately followed by a factory or dependency array, i.e.
/// a wrapper that does not carry an identity yet.
static ANONYMOUS_DEFINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"define\(\s*(?P<head>function|\[)").expect("valid regex"));

/// A wrapper that already names itself.
static NAMED_DEFINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"define\(\s*["']"#).expect("valid regex"));

/// The finished artifact.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub code: String,
}

/// Assemble a bundle from the complete record set, dependencies first.
pub fn bundle(records: &[ModuleRecord]) -> Bundle {
    bundle_with_trailer(records, &[])
}

/// Like [`bundle`], with extra records appended after the ordered set.
///
/// Trailer sources are concatenated verbatim, untouched by identity
/// annotation and outside the dependency ordering, so a bootstrap
/// record that kicks off the loaded bundle runs last.
pub fn bundle_with_trailer(records: &[ModuleRecord], trailer: &[ModuleRecord]) -> Bundle {
    let ordered = topo_order(records);
    let code = ordered
        .iter()
        .map(|&i| annotate(&records[i]))
        .chain(trailer.iter().map(|record| record.source.clone()))
        .collect::<Vec<_>>()
        .join("\n");
    Bundle { code }
}

/// Indices into `records`, dependencies before dependents. Falls back to
/// stream order when the graph has a cycle, which the traversal permits.
/// Placement among unrelated records is up to the sort.
pub fn topo_order(records: &[ModuleRecord]) -> Vec<usize> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut by_file: IndexMap<PathBuf, NodeIndex> = IndexMap::new();

    for (i, record) in records.iter().enumerate() {
        let node = graph.add_node(i);
        by_file.insert(record.file.clone(), node);
    }
    for record in records {
        let Some(&from) = by_file.get(&record.file) else {
            continue;
        };
        for target in record.deps.values() {
            // Skipped or external targets have no record of their own.
            if let Some(&to) = by_file.get(target) {
                // Edge dep -> dependent so toposort yields deps first.
                graph.add_edge(to, from, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(sorted) => sorted.into_iter().map(|n| graph[n]).collect(),
        Err(_) => {
            warn!("dependency graph is cyclic; keeping stream order");
            (0..records.len()).collect()
        }
    }
}

/// Annotate one record's source with its identity token.
///
/// Text resources become string-returning defines; anonymous AMD wrappers
/// gain the identity as their first argument; bare CommonJS sources are
/// wrapped whole.
pub fn annotate(record: &ModuleRecord) -> String {
    if let Some(bang) = record.id.find('!') {
        let id = &record.id[bang + 1..];
        debug!("rendering text resource {id}");
        return format!(
            "define(\"{id}\",[],function(){{return \"{}\";}});",
            escape_string(&record.source)
        );
    }

    // Only the module's own wrapper counts as named: a nested named
    // define later in the body must not shield an anonymous wrapper.
    let named_at = NAMED_DEFINE.find(&record.source).map(|m| m.start());
    if let Some(found) = ANONYMOUS_DEFINE.find(&record.source) {
        if named_at.is_none_or(|n| found.start() < n) {
            let head_start = ANONYMOUS_DEFINE
                .captures(&record.source)
                .and_then(|c| c.name("head"))
                .map_or(found.end(), |m| m.start());
            let mut out = String::with_capacity(record.source.len() + record.id.len() + 4);
            out.push_str(&record.source[..found.start()]);
            out.push_str("define(\"");
            out.push_str(&record.id);
            out.push_str("\", ");
            out.push_str(&record.source[head_start..]);
            return out;
        }
    }
    if named_at.is_some() {
        return record.source.clone();
    }

    // Plain CommonJS module: wrap it so the bundled artifact can address
    // it by identity.
    format!(
        "define(\"{}\", [], function(require, exports, module) {{\n{}\n}});",
        record.id, record.source
    )
}

fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
