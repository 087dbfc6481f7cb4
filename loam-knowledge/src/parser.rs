use std::collections::HashSet;

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::models::{IMPLICIT_RELATION_TYPE, Observation};

pub const DEFAULT_ENTITY_TYPE: &str = "note";

/// A relation as written in a file, before its target is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRelation {
    pub relation_type: String,
    pub target: String,
    pub context: Option<String>,
}

/// In-memory form of one markdown file.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMarkdown {
    /// Front matter keys in file order.
    pub front_matter: Mapping,
    pub title: String,
    pub entity_type: String,
    pub permalink: Option<String>,
    pub tags: Vec<String>,
    /// Body after the front matter, untouched.
    pub content: String,
    pub observations: Vec<Observation>,
    pub relations: Vec<ParsedRelation>,
}

impl EntityMarkdown {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            front_matter: Mapping::new(),
            title: title.into(),
            entity_type: DEFAULT_ENTITY_TYPE.to_string(),
            permalink: None,
            tags: Vec::new(),
            content: content.into(),
            observations: Vec::new(),
            relations: Vec::new(),
        }
    }
}

/// Parse a markdown file. Never fails: malformed front matter is logged and
/// replaced by defaults, `default_title` stands in for a missing title.
pub fn parse_entity_markdown(raw: &str, default_title: &str) -> EntityMarkdown {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let (front_matter, content) = match split_front_matter(raw) {
        Some((yaml, body)) => (parse_front_matter(yaml, default_title), body),
        None => (Mapping::new(), raw),
    };

    let title = string_field(&front_matter, "title").unwrap_or_else(|| default_title.to_string());
    let entity_type =
        string_field(&front_matter, "type").unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());
    let permalink = string_field(&front_matter, "permalink");
    let tags = front_matter
        .get("tags")
        .map(parse_tags_value)
        .unwrap_or_default();

    let (observations, relations) = parse_body(content);

    EntityMarkdown {
        front_matter,
        title,
        entity_type,
        permalink,
        tags,
        content: content.to_string(),
        observations,
        relations,
    }
}

/// Same as [`parse_entity_markdown`] for raw bytes; invalid UTF-8 is replaced.
pub fn parse_entity_bytes(raw: &[u8], default_title: &str) -> EntityMarkdown {
    let text = String::from_utf8_lossy(raw);
    parse_entity_markdown(&text, default_title)
}

/// Split `---` delimited front matter from the body. The body slice starts
/// right after the closing delimiter line.
fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    let mut lines = raw.split_inclusive('\n');

    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }
    offset += first.len();
    let yaml_start = offset;

    for line in lines {
        if line.trim_end() == "---" {
            let yaml = &raw[yaml_start..offset];
            let body = &raw[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

fn parse_front_matter(yaml: &str, source: &str) -> Mapping {
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => mapping,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            warn!(file = source, "front matter is not a mapping, using defaults");
            Mapping::new()
        }
        Err(err) => {
            warn!(file = source, error = %err, "malformed front matter, using defaults");
            Mapping::new()
        }
    }
}

fn string_field(mapping: &Mapping, key: &str) -> Option<String> {
    let value = match mapping.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if value.is_empty() { None } else { Some(value) }
}

/// Tags are either a YAML list or a comma separated string.
fn parse_tags_value(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|tag| tag.trim().trim_start_matches('#').to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

fn parse_body(content: &str) -> (Vec<Observation>, Vec<ParsedRelation>) {
    let mut observations = Vec::new();
    let mut relations = Vec::new();
    let mut seen = HashSet::new();
    let mut fence: Option<&str> = None;

    let mut push_relation = |relation: ParsedRelation, relations: &mut Vec<ParsedRelation>| {
        if seen.insert((relation.relation_type.clone(), relation.target.clone())) {
            relations.push(relation);
        }
    };

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            match fence {
                Some(open) if marker == open => fence = None,
                Some(_) => {}
                None => fence = Some(marker),
            }
            continue;
        }
        if fence.is_some() {
            continue;
        }

        if let Some(item) = list_item(trimmed) {
            if let Some(observation) = parse_observation(item) {
                for target in extract_link_targets(item) {
                    push_relation(implicit_relation(target), &mut relations);
                }
                observations.push(observation);
                continue;
            }
            if let Some(relation) = parse_explicit_relation(item) {
                push_relation(relation, &mut relations);
                continue;
            }
        }

        for target in extract_link_targets(line) {
            push_relation(implicit_relation(target), &mut relations);
        }
    }

    (observations, relations)
}

fn fence_marker(trimmed: &str) -> Option<&'static str> {
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

fn list_item(trimmed: &str) -> Option<&str> {
    let rest = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))?;
    let rest = rest.trim();
    if rest.is_empty() { None } else { Some(rest) }
}

fn implicit_relation(target: String) -> ParsedRelation {
    ParsedRelation {
        relation_type: IMPLICIT_RELATION_TYPE.to_string(),
        target,
        context: None,
    }
}

/// `[category] content #tag (context)`
pub fn parse_observation(item: &str) -> Option<Observation> {
    let rest = item.strip_prefix('[')?;
    if rest.starts_with('[') {
        return None;
    }
    let close = rest.find(']')?;
    let raw_category = &rest[..close];
    if matches!(raw_category, "x" | "X" | "-") || raw_category.contains('[') {
        return None;
    }
    let category = raw_category.trim();
    if category.is_empty() {
        return None;
    }

    let remainder = rest[close + 1..].trim();
    let (content, context) = split_trailing_context(remainder);
    if content.is_empty() {
        return None;
    }

    Some(Observation {
        category: category.to_string(),
        content: content.to_string(),
        tags: extract_hashtags(content),
        context,
    })
}

/// Split a trailing balanced `( ... )` group off `text`.
fn split_trailing_context(text: &str) -> (&str, Option<String>) {
    if !text.ends_with(')') {
        return (text, None);
    }
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' => {
                depth -= 1;
                if depth == 0 {
                    let before = text[..idx].trim_end();
                    // "foo(bar)" is content, not a context group.
                    if !before.is_empty() && !text[..idx].ends_with(char::is_whitespace) {
                        return (text, None);
                    }
                    let inner = text[idx + 1..text.len() - 1].trim();
                    let context = (!inner.is_empty()).then(|| inner.to_string());
                    return (before, context);
                }
            }
            _ => {}
        }
    }
    (text, None)
}

pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = content.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == '#' && prev.is_none_or(char::is_whitespace) {
            let start = idx + 1;
            let mut end = start;
            while let Some(&(next_idx, next)) = chars.peek() {
                if next.is_alphanumeric() || matches!(next, '_' | '-' | '/') {
                    end = next_idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let tag = &content[start..end];
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
            prev = content[..end].chars().next_back();
            continue;
        }
        prev = Some(ch);
    }
    tags
}

/// `relation_type [[target]] (context)`
fn parse_explicit_relation(item: &str) -> Option<ParsedRelation> {
    let open = item.find("[[")?;
    let relation_type = item[..open].trim();
    if relation_type.is_empty() || relation_type.contains(['[', ']']) {
        return None;
    }
    let (target, end) = read_link(item, open)?;
    let rest = item[end..].trim();
    let context = if rest.is_empty() {
        None
    } else if rest.starts_with('(') && rest.ends_with(')') {
        let inner = rest[1..rest.len() - 1].trim();
        (!inner.is_empty()).then(|| inner.to_string())
    } else {
        return None;
    };
    Some(ParsedRelation {
        relation_type: relation_type.to_string(),
        target,
        context,
    })
}

/// All `[[target]]` references in `text`, alias stripped.
pub fn extract_link_targets(text: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find("[[") {
        let open = cursor + found;
        match read_link(text, open) {
            Some((target, end)) => {
                targets.push(target);
                cursor = end;
            }
            None => break,
        }
    }
    targets
}

/// Read a wiki link starting at `open` (which points at `[[`). Nested links
/// stay part of the outer target. Returns the target and the byte offset past
/// the closing `]]`.
fn read_link(text: &str, open: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut idx = open + 2;
    while idx + 1 < bytes.len() {
        if bytes[idx] == b'[' && bytes[idx + 1] == b'[' {
            depth += 1;
            idx += 2;
        } else if bytes[idx] == b']' && bytes[idx + 1] == b']' {
            depth -= 1;
            if depth == 0 {
                let inner = strip_alias(&text[open + 2..idx]).trim();
                if inner.is_empty() {
                    return None;
                }
                return Some((inner.to_string(), idx + 2));
            }
            idx += 2;
        } else {
            idx += 1;
        }
    }
    None
}

fn strip_alias(inner: &str) -> &str {
    let mut depth = 0i32;
    for (idx, ch) in inner.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth -= 1,
            '|' if depth == 0 => return &inner[..idx],
            _ => {}
        }
    }
    inner
}

/// Strip `[[...]]` and a `|alias` suffix from a user supplied reference.
pub fn normalize_link_text(text: &str) -> String {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("[[")
        .and_then(|rest| rest.strip_suffix("]]"))
        .unwrap_or(trimmed);
    strip_alias(inner).trim().to_string()
}

/// Render an entity back to markdown. Observations and relations that the
/// body does not already contain are appended after one blank line.
pub fn format_entity_markdown(entity: &EntityMarkdown) -> String {
    let mut front = Mapping::new();
    front.insert("title".into(), entity.title.clone().into());
    front.insert("type".into(), entity.entity_type.clone().into());
    if let Some(permalink) = &entity.permalink {
        front.insert("permalink".into(), permalink.clone().into());
    }
    let tags_value = || {
        Value::Sequence(entity.tags.iter().map(|t| Value::from(t.clone())).collect())
    };
    let mut wrote_tags = false;
    for (key, value) in &entity.front_matter {
        match key.as_str() {
            Some("title" | "type" | "permalink") => continue,
            Some("tags") if !entity.tags.is_empty() => {
                front.insert(key.clone(), tags_value());
                wrote_tags = true;
            }
            _ => {
                front.insert(key.clone(), value.clone());
            }
        }
    }
    if !wrote_tags && !entity.tags.is_empty() {
        front.insert("tags".into(), tags_value());
    }

    let yaml = serde_yaml::to_string(&front).unwrap_or_default();
    let mut out = String::with_capacity(yaml.len() + entity.content.len() + 16);
    out.push_str("---\n");
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");

    let extra = missing_item_lines(entity);
    if extra.is_empty() {
        out.push_str(&entity.content);
        return out;
    }

    let body = entity.content.as_str();
    if !body.is_empty() {
        out.push_str(body);
        if !body.ends_with("\n\n") {
            out.push_str(if body.ends_with('\n') { "\n" } else { "\n\n" });
        }
    }
    out.push_str(&extra.join("\n"));
    out.push('\n');
    out
}

fn missing_item_lines(entity: &EntityMarkdown) -> Vec<String> {
    let body = &entity.content;
    let mut lines = Vec::new();

    for observation in &entity.observations {
        let head = format!("[{}] {}", observation.category, observation.content);
        if body.contains(&head) {
            continue;
        }
        let mut line = format!("- {head}");
        for tag in &observation.tags {
            if !extract_hashtags(&observation.content).contains(tag) {
                line.push_str(" #");
                line.push_str(tag);
            }
        }
        if let Some(context) = &observation.context {
            line.push_str(&format!(" ({context})"));
        }
        lines.push(line);
    }

    for relation in &entity.relations {
        let link = format!("[[{}", relation.target);
        let present = body.contains(&format!("{link}]]")) || body.contains(&format!("{link}|"));
        if present {
            continue;
        }
        let mut line = format!("- {} [[{}]]", relation.relation_type, relation.target);
        if let Some(context) = &relation.context {
            line.push_str(&format!(" ({context})"));
        }
        lines.push(line);
    }

    lines
}
