//! Parsed nginx site files.
//!
//! A site file is kept as an ordered list of segments: opaque text and
//! `upstream` blocks. Blocks are located by brace matching, so both the
//! single-line form and the multi-line form the templates emit are found.
//! A generated marker comment right after a block's closing brace belongs
//! to the block, which keeps repeated rewrites from piling up markers.

use regex::{NoExpand, RegexBuilder};

use crate::error::{ProxyError, ProxyResult};
use crate::naming::{cache_name, generate_upstream, upstream_name};

const KEYWORD: &str = "upstream";
const MARKER_PREFIX: &str = "# Generated by";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Upstream { name: String, raw: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SiteConfig {
    segments: Vec<Segment>,
}

impl SiteConfig {
    pub fn parse(content: &str) -> ProxyResult<Self> {
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut cursor = 0;

        while let Some(start) = find_keyword(content, cursor) {
            match parse_block(content, start)? {
                Some((name, end)) => {
                    if start > text_start {
                        segments.push(Segment::Text(content[text_start..start].to_string()));
                    }
                    segments.push(Segment::Upstream {
                        name,
                        raw: content[start..end].to_string(),
                    });
                    text_start = end;
                    cursor = end;
                }
                None => cursor = start + KEYWORD.len(),
            }
        }
        if text_start < content.len() {
            segments.push(Segment::Text(content[text_start..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn upstream_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Upstream { name, .. } => Some(name.as_str()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Replace every upstream block with a freshly generated one. Returns
    /// the number of blocks replaced.
    pub fn replace_upstreams(&mut self, name: &str, ports: &[u16]) -> usize {
        let mut replaced = 0;
        for segment in &mut self.segments {
            if let Segment::Upstream { .. } = segment {
                *segment = Segment::Upstream {
                    name: name.to_string(),
                    raw: generate_upstream(name, ports),
                };
                replaced += 1;
            }
        }
        replaced
    }

    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(text) => text.as_str(),
                Segment::Upstream { raw, .. } => raw.as_str(),
            })
            .collect()
    }
}

/// Case-insensitive global replacement of a literal identifier.
pub fn rename_identifier(content: &str, from: &str, to: &str) -> ProxyResult<String> {
    let pattern = RegexBuilder::new(&regex::escape(from))
        .case_insensitive(true)
        .build()
        .map_err(|e| ProxyError::Malformed(e.to_string()))?;
    Ok(pattern.replace_all(content, NoExpand(to)).into_owned())
}

/// Rewrite a production site for a (possibly renamed) project and a new
/// set of upstream ports.
///
/// Cache and upstream identifiers of `old_project` are renamed to those of
/// `new_project` everywhere in the file, then every upstream block is
/// regenerated over `ports`.
pub fn rewrite_production_site(
    content: &str,
    old_project: &str,
    new_project: &str,
    ports: &[u16],
) -> ProxyResult<String> {
    let renamed = rename_identifier(content, &cache_name(old_project), &cache_name(new_project))?;
    let renamed = rename_identifier(
        &renamed,
        &upstream_name(old_project),
        &upstream_name(new_project),
    )?;

    let mut site = SiteConfig::parse(&renamed)?;
    site.replace_upstreams(&upstream_name(new_project), ports);
    Ok(site.render())
}

/// Find the next `upstream` keyword standing as its own token.
fn find_keyword(content: &str, from: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut offset = from;
    while let Some(found) = content[offset..].find(KEYWORD) {
        let start = offset + found;
        let end = start + KEYWORD.len();
        let before_ok = start == 0 || matches!(bytes[start - 1], b';' | b'{' | b'}')
            || bytes[start - 1].is_ascii_whitespace();
        let after_ok = bytes.get(end).is_some_and(|b| b.is_ascii_whitespace());
        if before_ok && after_ok {
            return Some(start);
        }
        offset = end;
    }
    None
}

/// Parse `upstream <name> { ... }` at `start`. Returns the block name and
/// the end offset (past the closing brace and any generated marker), or
/// `None` if the keyword does not open a block.
fn parse_block(content: &str, start: usize) -> ProxyResult<Option<(String, usize)>> {
    let bytes = content.as_bytes();
    let mut i = start + KEYWORD.len();

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let name_start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'{' {
        i += 1;
    }
    if i == name_start {
        return Ok(None);
    }
    let name = content[name_start..i].to_string();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) != Some(&b'{') {
        return Ok(None);
    }

    let mut depth = 0usize;
    let mut close = None;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    let close = close
        .ok_or_else(|| ProxyError::Malformed(format!("unterminated upstream block `{name}`")))?;

    let mut end = close + 1;
    let mut j = end;
    while j < bytes.len() && matches!(bytes[j], b' ' | b'\t') {
        j += 1;
    }
    if content[j..].starts_with(MARKER_PREFIX) {
        end = content[j..].find('\n').map_or(content.len(), |n| j + n);
    }

    Ok(Some((name, end)))
}
