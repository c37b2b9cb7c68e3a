//! GEXF 1.2 reading and writing for [`SocialGraph`].
//!
//! Nodes carry their handle as id and label plus an optional integer
//! `level` attribute. The reader accepts what the writer produces and
//! what common graph tools emit for the same shape of graph.

use anyhow::{anyhow, Context, Result};
use snowball_common::{Handle, Level};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::SocialGraph;

const GEXF_NAMESPACE: &str = "http://www.gexf.net/1.2draft";
const LEVEL_ATTRIBUTE: &str = "level";
const LEVEL_ATTRIBUTE_ID: &str = "0";

pub fn write_gexf(graph: &SocialGraph) -> String {
    let mut out = String::new();
    let today = chrono::Utc::now().format("%Y-%m-%d");

    // writing into a String cannot fail
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(out, r#"<gexf xmlns="{}" version="1.2">"#, GEXF_NAMESPACE);
    let _ = writeln!(out, r#"  <meta lastmodifieddate="{}">"#, today);
    let _ = writeln!(out, "    <creator>snowball</creator>");
    let _ = writeln!(out, "  </meta>");
    let _ = writeln!(out, r#"  <graph defaultedgetype="undirected" mode="static">"#);
    let _ = writeln!(out, r#"    <attributes class="node" mode="static">"#);
    let _ = writeln!(
        out,
        r#"      <attribute id="{}" title="{}" type="long" />"#,
        LEVEL_ATTRIBUTE_ID, LEVEL_ATTRIBUTE
    );
    let _ = writeln!(out, "    </attributes>");

    let _ = writeln!(out, "    <nodes>");
    for node in graph.nodes() {
        let id = escape(node.handle.as_str());
        match node.level {
            Some(level) => {
                let _ = writeln!(out, r#"      <node id="{}" label="{}">"#, id, id);
                let _ = writeln!(out, "        <attvalues>");
                let _ = writeln!(out, r#"          <attvalue for="{}" value="{}" />"#, LEVEL_ATTRIBUTE_ID, level);
                let _ = writeln!(out, "        </attvalues>");
                let _ = writeln!(out, "      </node>");
            }
            None => {
                let _ = writeln!(out, r#"      <node id="{}" label="{}" />"#, id, id);
            }
        }
    }
    let _ = writeln!(out, "    </nodes>");

    let _ = writeln!(out, "    <edges>");
    for (idx, (a, b)) in graph.edges().iter().enumerate() {
        let _ = writeln!(
            out,
            r#"      <edge source="{}" target="{}" id="{}" />"#,
            escape(a.as_str()),
            escape(b.as_str()),
            idx
        );
    }
    let _ = writeln!(out, "    </edges>");
    let _ = writeln!(out, "  </graph>");
    let _ = writeln!(out, "</gexf>");
    out
}

pub fn write_gexf_file(graph: &SocialGraph, path: &Path) -> Result<()> {
    fs::write(path, write_gexf(graph))
        .with_context(|| format!("Failed to write GEXF to {}", path.display()))
}

/// Parses a GEXF document back into a graph.
pub fn read_gexf(xml: &str) -> Result<SocialGraph> {
    let mut graph = SocialGraph::new();
    let mut level_id: Option<String> = None;
    let mut current: Option<Handle> = None;
    let mut saw_root = false;

    for tag in Tags::new(xml) {
        let tag = tag?;
        match tag.name.as_str() {
            "gexf" => saw_root = true,
            "attribute" => {
                if tag.attr("title") == Some(LEVEL_ATTRIBUTE) {
                    level_id = tag.attr("id").map(str::to_string);
                }
            }
            "node" => {
                let id = tag.attr("id").ok_or_else(|| anyhow!("GEXF node without id"))?;
                let handle = Handle::new(id);
                graph.add_node(&handle);
                current = if tag.self_closing { None } else { Some(handle) };
            }
            "/node" => current = None,
            "attvalue" => {
                let Some(handle) = &current else { continue };
                let is_level = match (&level_id, tag.attr("for")) {
                    (Some(expected), Some(found)) => expected == found,
                    _ => false,
                };
                if is_level {
                    if let Some(level) = tag.attr("value").and_then(parse_level) {
                        graph.set_level_if_unset(handle, level);
                    }
                }
            }
            "edge" => {
                let source = tag.attr("source").ok_or_else(|| anyhow!("GEXF edge without source"))?;
                let target = tag.attr("target").ok_or_else(|| anyhow!("GEXF edge without target"))?;
                graph.add_edge(&Handle::new(source), &Handle::new(target));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(anyhow!("Not a GEXF document"));
    }
    Ok(graph)
}

/// Node ids of a GEXF file, in handle order.
pub fn read_gexf_nodes(path: &Path) -> Result<Vec<Handle>> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("Failed to read GEXF from {}", path.display()))?;
    Ok(read_gexf(&xml)?.handles())
}

fn parse_level(raw: &str) -> Option<Level> {
    let raw = raw.trim();
    raw.parse::<Level>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as Level))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct Tag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
}

impl Tag {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Element tags of an XML document in order. Closing tags come back with a
/// leading `/`; declarations, comments and text are skipped.
struct Tags<'a> {
    rest: &'a str,
}

impl<'a> Tags<'a> {
    fn new(xml: &'a str) -> Self {
        Self { rest: xml }
    }
}

impl Iterator for Tags<'_> {
    type Item = Result<Tag>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.rest.find('<')?;
            let after = &self.rest[start + 1..];

            if after.starts_with("!--") {
                let end = match after.find("-->") {
                    Some(end) => end,
                    None => return Some(Err(anyhow!("Unterminated comment"))),
                };
                self.rest = &after[end + 3..];
                continue;
            }

            let end = match after.find('>') {
                Some(end) => end,
                None => return Some(Err(anyhow!("Unterminated tag"))),
            };
            let body = &after[..end];
            self.rest = &after[end + 1..];

            if body.starts_with('?') || body.starts_with('!') {
                continue;
            }
            return Some(parse_tag(body));
        }
    }
}

fn parse_tag(body: &str) -> Result<Tag> {
    let self_closing = body.ends_with('/');
    let body = body.trim_end_matches('/').trim();
    let name_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let name = body[..name_end].to_string();

    let mut attrs = Vec::new();
    let mut rest = body[name_end..].trim_start();
    while !rest.is_empty() {
        let eq = rest.find('=').ok_or_else(|| anyhow!("Malformed attribute in <{}>", name))?;
        let key = rest[..eq].trim().to_string();
        let value_part = rest[eq + 1..].trim_start();
        let quote = value_part
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| anyhow!("Unquoted attribute {} in <{}>", key, name))?;
        let close = value_part[1..]
            .find(quote)
            .ok_or_else(|| anyhow!("Unterminated attribute {} in <{}>", key, name))?;
        attrs.push((key, unescape(&value_part[1..1 + close])));
        rest = value_part[close + 2..].trim_start();
    }

    Ok(Tag { name, attrs, self_closing })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SocialGraph {
        let mut graph = SocialGraph::new();
        let (a, b, c) = (Handle::new("alice"), Handle::new("bob"), Handle::new("o'brien&co"));
        graph.add_edge(&a, &b);
        graph.add_edge(&b, &c);
        graph.add_edge(&c, &a);
        graph.set_level_if_unset(&a, 0);
        graph.set_level_if_unset(&b, 1);
        graph
    }

    #[test]
    fn test_written_document_shape() {
        let xml = write_gexf(&sample());

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"defaultedgetype="undirected""#));
        assert!(xml.contains(r#"<attribute id="0" title="level" type="long" />"#));
        assert!(xml.contains(r#"<node id="o&apos;brien&amp;co" label="o&apos;brien&amp;co" />"#));
        assert_eq!(xml.matches("<edge ").count(), 3);
    }

    #[test]
    fn test_read_back_preserves_graph() {
        let graph = sample();
        let parsed = read_gexf(&write_gexf(&graph)).unwrap();
        assert_eq!(parsed, graph);
        assert_eq!(parsed.level(&Handle::new("o'brien&co")), None);
    }

    #[test]
    fn test_reads_foreign_layout() {
        let xml = r#"<?xml version='1.0' encoding='utf-8'?>
<gexf xmlns="http://www.gexf.net/1.2draft" version="1.2">
  <!-- exported elsewhere -->
  <graph defaultedgetype="undirected" mode="static" name="">
    <attributes mode="static" class="node">
      <attribute id="3" title="level" type="long" />
    </attributes>
    <nodes>
      <node id="x.bsky.social" label="x.bsky.social">
        <attvalues><attvalue for="3" value="2" /></attvalues>
      </node>
      <node id="y.bsky.social" label="y.bsky.social" />
    </nodes>
    <edges>
      <edge source="x.bsky.social" target="y.bsky.social" id="0" />
    </edges>
  </graph>
</gexf>"#;

        let graph = read_gexf(xml).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.level(&Handle::new("x.bsky.social")), Some(2));
        assert!(graph.has_edge(&Handle::new("x.bsky.social"), &Handle::new("y.bsky.social")));
    }

    #[test]
    fn test_rejects_non_gexf() {
        assert!(read_gexf("<html><body/></html>").is_err());
        assert!(read_gexf("<gexf><node label=\"x\" /></gexf>").is_err());
    }

    #[test]
    fn test_read_nodes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("community_1_-_nodes_3.gexf");
        write_gexf_file(&sample(), &path).unwrap();

        let nodes = read_gexf_nodes(&path).unwrap();
        assert_eq!(nodes, vec![Handle::new("alice"), Handle::new("bob"), Handle::new("o'brien&co")]);
    }
}
