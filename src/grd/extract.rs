//! Pulls diagram text out of free-form model output.

use lazy_static::lazy_static;
use regex::Regex;

use super::syntax;
use crate::core::errors::ParseError;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[\w-]*[ \t]*\r?\n(.*?)```").expect("fence pattern is valid");
}

/// Whether the first significant line of `text` is a diagram header. Other
/// diagram kinds count only as a bare keyword, so prose such as "Pie charts
/// are..." is passed over.
fn opens_diagram(text: &str) -> bool {
    let Some(first) = syntax::significant_lines(text).into_iter().next() else {
        return false;
    };
    match syntax::parse_header(&first) {
        Ok(_) => true,
        Err(ParseError::UnsupportedDiagram { .. }) => first.text.split_whitespace().count() == 1,
        Err(_) => false,
    }
}

/// Diagram text inside `response`, if any.
///
/// Prefers the first fenced block whose body opens with a Mermaid header.
/// Otherwise takes everything from the first header line, up to a stray
/// closing fence.
pub fn extract_diagram(response: &str) -> Option<String> {
    for block in FENCED_BLOCK.captures_iter(response) {
        let body = block.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if opens_diagram(body) {
            return Some(body.to_string());
        }
    }

    let mut offset = 0;
    for line in response.split_inclusive('\n') {
        if opens_diagram(line) {
            let tail = &response[offset..];
            let tail = tail.find("```").map(|end| &tail[..end]).unwrap_or(tail);
            let diagram = tail.trim();
            return (!diagram.is_empty()).then(|| diagram.to_string());
        }
        offset += line.len();
    }

    None
}
