//! Lexical stage: significant lines, the header directive, and statement
//! scanning for node references and links.

use super::graph::{Direction, EdgeStyle, Shape};
use crate::core::errors::ParseError;

/// Mermaid diagram keywords other than flowcharts.
const OTHER_DIAGRAMS: &[&str] = &[
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
    "mindmap",
    "timeline",
    "quadrantChart",
];

/// Statements that style or group nodes without declaring any.
const DIRECTIVES: &[&str] = &[
    "classDef",
    "class",
    "style",
    "linkStyle",
    "click",
    "subgraph",
    "end",
    "direction",
];

/// A line that survived fence, comment and blank-line removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SourceLine<'a> {
    /// 1-based line number in the original text.
    pub number: usize,
    pub text: &'a str,
}

pub(crate) fn significant_lines(text: &str) -> Vec<SourceLine<'_>> {
    let mut lines = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        if raw.trim_start().starts_with("```") {
            continue;
        }
        for statement in statements(raw) {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                lines.push(SourceLine {
                    number: i + 1,
                    text: trimmed,
                });
            }
        }
    }
    lines
}

/// Splits a raw line at `;` and cuts it at `%%`. Both are literal inside
/// double-quoted labels.
fn statements(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;

    for (at, byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => quoted = !quoted,
            b';' if !quoted => {
                parts.push(&raw[start..at]);
                start = at + 1;
            }
            b'%' if !quoted && bytes.get(at + 1) == Some(&b'%') => {
                parts.push(&raw[start..at]);
                return parts;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

pub(crate) fn parse_header(line: &SourceLine<'_>) -> Result<Direction, ParseError> {
    let mut words = line.text.split_whitespace();
    let keyword = words.next().unwrap_or_default();

    if keyword.eq_ignore_ascii_case("flowchart") || keyword.eq_ignore_ascii_case("graph") {
        let direction = match words.next() {
            None => Direction::default(),
            Some(dir) => Direction::from_keyword(dir).ok_or_else(|| {
                ParseError::syntax(
                    line.number,
                    keyword.len() + 2,
                    format!("unknown direction `{}`", dir),
                )
            })?,
        };
        if let Some(extra) = words.next() {
            return Err(ParseError::syntax(
                line.number,
                line.text.find(extra).map_or(1, |at| at + 1),
                format!("unexpected `{}` after the diagram direction", extra),
            ));
        }
        return Ok(direction);
    }

    if OTHER_DIAGRAMS
        .iter()
        .any(|other| keyword.eq_ignore_ascii_case(other))
    {
        return Err(ParseError::UnsupportedDiagram {
            line: line.number,
            kind: keyword.to_string(),
        });
    }

    Err(ParseError::MissingHeader {
        line: line.number,
        found: line.text.to_string(),
    })
}

/// A node mention, with its shape and label if the mention declares them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeRef {
    pub id: String,
    pub shape: Option<(Shape, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    pub style: EdgeStyle,
    pub label: Option<String>,
}

/// One body statement: `A[x] --> B & C -->|y| D` is three groups joined by two links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    Directive,
    Chain {
        groups: Vec<Vec<NodeRef>>,
        links: Vec<Link>,
    },
}

pub(crate) fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn scan_statement(line: &SourceLine<'_>) -> Result<Statement, ParseError> {
    let first = line.text.split_whitespace().next().unwrap_or_default();
    if DIRECTIVES.contains(&first) {
        return Ok(Statement::Directive);
    }
    if !line.text.starts_with(is_id_char) {
        return Err(ParseError::UnrecognizedLine {
            line: line.number,
            text: line.text.to_string(),
        });
    }

    let mut cursor = Cursor::new(line);
    let mut groups = vec![cursor.group()?];
    let mut links = Vec::new();

    loop {
        cursor.skip_ws();
        if cursor.at_end() {
            break;
        }
        match cursor.link()? {
            Some(link) => {
                links.push(link);
                cursor.skip_ws();
                groups.push(cursor.group()?);
            }
            None => return Err(cursor.error("expected a link such as `-->`")),
        }
    }

    Ok(Statement::Chain { groups, links })
}

/// Shape openers, longest first so `((` wins over `(`.
const OPENERS: &[(&str, &[(&str, Shape)])] = &[
    ("(((", &[(")))", Shape::DoubleCircle)]),
    ("((", &[("))", Shape::Circle)]),
    ("([", &[("])", Shape::Stadium)]),
    ("(", &[(")", Shape::Rounded)]),
    ("[[", &[("]]", Shape::Subroutine)]),
    ("[(", &[(")]", Shape::Cylinder)]),
    ("[/", &[("/]", Shape::Parallelogram), ("\\]", Shape::Trapezoid)]),
    ("[\\", &[("\\]", Shape::ParallelogramAlt), ("/]", Shape::TrapezoidAlt)]),
    ("[", &[("]", Shape::Rectangle)]),
    ("{{", &[("}}", Shape::Hexagon)]),
    ("{", &[("}", Shape::Diamond)]),
    (">", &[("]", Shape::Asymmetric)]),
];

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &SourceLine<'a>) -> Self {
        Self {
            text: line.text,
            pos: 0,
            line: line.number,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn error(&self, message: &str) -> ParseError {
        let column = self.text[..self.pos].chars().count() + 1;
        ParseError::syntax(self.line, column, message)
    }

    /// `A & B & C`
    fn group(&mut self) -> Result<Vec<NodeRef>, ParseError> {
        let mut refs = vec![self.node_ref()?];
        loop {
            let checkpoint = self.pos;
            self.skip_ws();
            if self.eat("&") {
                self.skip_ws();
                refs.push(self.node_ref()?);
            } else {
                self.pos = checkpoint;
                return Ok(refs);
            }
        }
    }

    fn node_ref(&mut self) -> Result<NodeRef, ParseError> {
        let rest = self.rest();
        let len = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a node id"));
        }
        let id = rest[..len].to_string();
        self.pos += len;

        for (opener, closers) in OPENERS {
            if self.eat(opener) {
                let (shape, label) = self.label(closers)?;
                return Ok(NodeRef {
                    id,
                    shape: Some((shape, label)),
                });
            }
        }

        Ok(NodeRef { id, shape: None })
    }

    /// Reads a label up to whichever closer comes first.
    fn label(&mut self, closers: &[(&str, Shape)]) -> Result<(Shape, String), ParseError> {
        self.skip_ws();
        let quoted = if self.peek() == Some('"') {
            Some(self.quoted()?)
        } else {
            None
        };

        let rest = self.rest();
        let closing = closers
            .iter()
            .filter_map(|(closer, shape)| rest.find(closer).map(|at| (at, *closer, *shape)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, closer, shape)) = closing else {
            return Err(self.error("unterminated node label"));
        };

        let label = match quoted {
            Some(text) => {
                if !rest[..at].trim().is_empty() {
                    return Err(self.error("unexpected text after quoted label"));
                }
                text
            }
            None => rest[..at].trim().to_string(),
        };
        self.pos += at + closer.len();
        Ok((shape, label))
    }

    fn quoted(&mut self) -> Result<String, ParseError> {
        self.eat("\"");
        let rest = self.rest();
        let Some(end) = rest.find('"') else {
            return Err(self.error("unterminated quoted label"));
        };
        let text = rest[..end].replace("#quot;", "\"");
        self.pos += end + 1;
        Ok(text.trim().to_string())
    }

    /// Recognizes `-->`, `---`, `==>`, `===`, `-.->`, `-.-`, the
    /// `-- text -->` form, and an optional `|label|` after the arrow.
    fn link(&mut self) -> Result<Option<Link>, ParseError> {
        let rest = self.rest();
        if !rest.starts_with(|c| c == '-' || c == '=') {
            return Ok(None);
        }

        let run_len = rest
            .find(|c: char| !matches!(c, '-' | '=' | '.'))
            .unwrap_or(rest.len());
        let run = &rest[..run_len];
        let after = &rest[run_len..];

        let mut text_label = None;
        let (style_run, arrow) = if after.starts_with('>') {
            self.pos += run_len + 1;
            (run.to_string(), true)
        } else if matches!(run, "--" | "==" | "-.") && after.starts_with(char::is_whitespace) {
            let body = after;
            let close = ["-->", "==>", ".->", "---", "==="]
                .iter()
                .filter_map(|token| body.find(token))
                .min();
            let Some(close) = close else {
                return Err(self.error("unterminated link text"));
            };
            text_label = Some(body[..close].trim().to_string());

            let tail = &body[close..];
            let tail_len = tail
                .find(|c: char| !matches!(c, '-' | '=' | '.'))
                .unwrap_or(tail.len());
            let arrow = tail[tail_len..].starts_with('>');
            self.pos += run_len + close + tail_len + usize::from(arrow);
            (run.to_string(), arrow)
        } else {
            if run_len < 3 {
                return Err(self.error("malformed link"));
            }
            self.pos += run_len;
            (run.to_string(), false)
        };

        let style = match (style_run.contains('.'), style_run.starts_with('='), arrow) {
            (true, _, true) => EdgeStyle::Dotted,
            (true, _, false) => EdgeStyle::DottedOpen,
            (false, true, true) => EdgeStyle::Thick,
            (false, true, false) => EdgeStyle::ThickOpen,
            (false, false, true) => EdgeStyle::Arrow,
            (false, false, false) => EdgeStyle::Open,
        };

        self.skip_ws();
        let mut label = text_label;
        if self.eat("|") {
            self.skip_ws();
            let text = if self.peek() == Some('"') {
                self.quoted()?
            } else {
                let rest = self.rest();
                let end = rest.find('|').unwrap_or(rest.len());
                rest[..end].trim().to_string()
            };
            let rest = self.rest();
            let Some(end) = rest.find('|') else {
                return Err(self.error("unterminated link label"));
            };
            self.pos += end + 1;
            label = Some(text);
        }

        Ok(Some(Link {
            style,
            label: label.filter(|text| !text.is_empty()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(text: &str) -> SourceLine<'_> {
        SourceLine { number: 1, text }
    }

    fn chain(text: &str) -> (Vec<Vec<NodeRef>>, Vec<Link>) {
        match scan_statement(&line(text)).unwrap() {
            Statement::Chain { groups, links } => (groups, links),
            Statement::Directive => panic!("unexpected directive"),
        }
    }

    fn bare(id: &str) -> NodeRef {
        NodeRef {
            id: id.into(),
            shape: None,
        }
    }

    #[test]
    fn strips_fences_comments_and_blanks() {
        let text = "```mermaid\nflowchart TD\n\n  A --> B %% note\n  %% whole line\n  B;\n```";
        let lines = significant_lines(text);
        let texts: Vec<_> = lines.iter().map(|l| (l.number, l.text)).collect();
        assert_eq!(texts, vec![(2, "flowchart TD"), (4, "A --> B"), (6, "B")]);
    }

    #[test]
    fn headers() {
        assert_eq!(parse_header(&line("graph LR")), Ok(Direction::LeftRight));
        assert_eq!(parse_header(&line("Flowchart")), Ok(Direction::TopDown));
        assert!(matches!(
            parse_header(&line("sequenceDiagram")),
            Err(ParseError::UnsupportedDiagram { .. })
        ));
        assert!(matches!(
            parse_header(&line("This is not mermaid code")),
            Err(ParseError::MissingHeader { .. })
        ));
        assert_eq!(
            parse_header(&line("graph TD shows the plan")),
            Err(ParseError::syntax(1, 10, "unexpected `shows` after the diagram direction"))
        );
    }

    #[test]
    fn semicolons_separate_statements_on_one_line() {
        let lines = significant_lines("graph TD; A-->B; B-->C;\n  C --> D; %% tail; ignored");
        let texts: Vec<_> = lines.iter().map(|l| (l.number, l.text)).collect();
        assert_eq!(
            texts,
            vec![(1, "graph TD"), (1, "A-->B"), (1, "B-->C"), (2, "C --> D")]
        );
    }

    #[test]
    fn quoted_text_keeps_semicolons_and_percent_signs() {
        let lines = significant_lines(r#"A["50%% off; today"] --> B %% note"#);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, r#"A["50%% off; today"] --> B"#);
    }

    #[test]
    fn shapes_and_quoted_labels() {
        let (groups, _) = chain(r#"A((Circle)) --> B{{"Hex [x]"}} --> C[/In/] --> D[\Out/] --> E>Flag]"#);
        let shapes: Vec<_> = groups
            .iter()
            .map(|g| g[0].shape.clone().map(|(shape, _)| shape))
            .collect();
        assert_eq!(
            shapes,
            vec![
                Some(Shape::Circle),
                Some(Shape::Hexagon),
                Some(Shape::Parallelogram),
                Some(Shape::TrapezoidAlt),
                Some(Shape::Asymmetric),
            ]
        );
        assert_eq!(groups[1][0].shape.as_ref().map(|(_, l)| l.as_str()), Some("Hex [x]"));
    }

    #[test]
    fn link_forms() {
        let (_, links) = chain("A -->|yes| B -- maybe --> C ==> D -.-> E --- F -.- G === H");
        let styles: Vec<_> = links.iter().map(|l| l.style).collect();
        assert_eq!(
            styles,
            vec![
                EdgeStyle::Arrow,
                EdgeStyle::Arrow,
                EdgeStyle::Thick,
                EdgeStyle::Dotted,
                EdgeStyle::Open,
                EdgeStyle::DottedOpen,
                EdgeStyle::ThickOpen,
            ]
        );
        assert_eq!(links[0].label.as_deref(), Some("yes"));
        assert_eq!(links[1].label.as_deref(), Some("maybe"));
        assert_eq!(links[2].label, None);
    }

    #[test]
    fn fan_out_groups() {
        let (groups, links) = chain("A --> B & C");
        assert_eq!(groups, vec![vec![bare("A")], vec![bare("B"), bare("C")]]);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn directives_are_recognized() {
        assert_eq!(
            scan_statement(&line("classDef hot fill:#f96")),
            Ok(Statement::Directive)
        );
        assert_eq!(scan_statement(&line("end")), Ok(Statement::Directive));
    }

    #[test]
    fn errors_carry_position() {
        assert_eq!(
            scan_statement(&line("A[unterminated --> B")),
            Err(ParseError::syntax(1, 3, "unterminated node label"))
        );
        assert!(matches!(
            scan_statement(&line("*** nonsense")),
            Err(ParseError::UnrecognizedLine { .. })
        ));
        assert!(matches!(
            scan_statement(&line("A B")),
            Err(ParseError::Syntax { column: 3, .. })
        ));
    }
}
