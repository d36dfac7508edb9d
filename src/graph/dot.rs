use std::fmt::{Display, Formatter, Write};

use super::TaskGraph;

/// Graphviz rendering of a task graph, nodes in creation order.
pub struct Dot<'a>(pub(super) &'a TaskGraph);

/// Escapes text placed inside a double-quoted DOT string.
struct Quoted<'a>(&'a str);

impl Display for Quoted<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Like [`Quoted`], also escaping `|` which separates record fields.
struct RecordSafe<'a>(&'a str);

impl Display for RecordSafe<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.0.split('|').enumerate() {
            if i > 0 {
                f.write_str("\\|")?;
            }
            write!(f, "{}", Quoted(part))?;
        }
        Ok(())
    }
}

impl Display for Dot<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph G {{")?;

        for index in graph.indices() {
            let node = graph.node(index);
            if node.task.is_artifact() {
                continue;
            }

            let key = Quoted(node.key.as_str());
            let artifacts = node.task.artifacts();

            if artifacts.is_empty() {
                writeln!(f, "   \"{key}\" [shape=record];")?;
            } else {
                write!(
                    f,
                    "   \"{key}\" [shape=record, label=\"{}\\n\\n",
                    RecordSafe(node.key.as_str())
                )?;
                for artifact in &artifacts {
                    write!(f, "{}\\l", RecordSafe(artifact))?;
                }
                writeln!(f, "\"];")?;
            }

            for &child in &node.children {
                let child = Quoted(graph.node(child).key.as_str());
                writeln!(f, "   \"{key}\" -> \"{child}\";")?;
            }
        }

        write!(f, "}}")
    }
}
