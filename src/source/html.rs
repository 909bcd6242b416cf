//! Minimal HTML text-node scanning.
//!
//! The scanner walks the markup once, keeps a stack of open elements, and
//! hands every text node (decoded) to the caller along with the elements
//! enclosing it. Contents of `<script>`, `<style>` and comments never surface
//! as text.

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose content is raw text, not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Find the marker that follows `label` in the document.
///
/// The first text node containing `label` wins. When `element` is given, only
/// text nodes inside an open element with that name (case-insensitive) are
/// considered. Returns the text after the label up to the end of the node,
/// trimmed, or `None` when the label is missing or nothing follows it.
pub fn extract_marker(html: &str, label: &str, element: Option<&str>) -> Option<String> {
    let element = element.map(|e| e.to_ascii_lowercase());
    let mut found = None;

    for_each_text_node(html, |text, open| {
        if let Some(element) = &element {
            if !open.iter().any(|name| name == element) {
                return true;
            }
        }
        match text.find(label) {
            Some(pos) => {
                found = Some(text[pos + label.len()..].trim().to_string());
                false
            }
            None => true,
        }
    });

    found.filter(|marker| !marker.is_empty())
}

/// Call `visit` for each non-blank text node. `visit` returns `false` to stop.
fn for_each_text_node<F>(html: &str, mut visit: F)
where
    F: FnMut(&str, &[String]) -> bool,
{
    let mut open: Vec<String> = Vec::new();
    let mut rest = html;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            emit(rest, &open, &mut visit);
            return;
        };

        if lt > 0 && !emit(&rest[..lt], &open, &mut visit) {
            return;
        }
        rest = &rest[lt..];

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = match after.find("-->") {
                Some(end) => &after[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = find_tag_end(rest) else {
            // Unterminated tag: treat the remainder as text.
            emit(rest, &open, &mut visit);
            return;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            close_element(&mut open, &tag_name(name));
            continue;
        }
        if tag.starts_with('!') || tag.starts_with('?') {
            continue;
        }

        let name = tag_name(tag);
        if name.is_empty() {
            // A stray `<` followed by something that isn't a tag name.
            if !emit(&format!("<{tag}>"), &open, &mut visit) {
                return;
            }
            continue;
        }

        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let closing = format!("</{name}");
            rest = match find_ascii_case_insensitive(rest, &closing) {
                Some(end) => match rest[end..].find('>') {
                    Some(gt) => &rest[end + gt + 1..],
                    None => "",
                },
                None => "",
            };
            continue;
        }

        if tag.ends_with('/') || VOID_ELEMENTS.contains(&name.as_str()) {
            continue;
        }
        open.push(name);
    }
}

/// Byte offset of the `>` that closes the tag at the start of `tag`.
/// A `>` inside a quoted attribute value does not count.
fn find_tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    let mut after_equals = false;

    for (i, c) in tag.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '>' => return Some(i),
                '"' | '\'' if after_equals => quote = Some(c),
                '=' => after_equals = true,
                c if c.is_whitespace() => {}
                _ => after_equals = false,
            },
        }
    }
    None
}

fn emit<F>(raw: &str, open: &[String], visit: &mut F) -> bool
where
    F: FnMut(&str, &[String]) -> bool,
{
    if raw.trim().is_empty() {
        return true;
    }
    visit(&decode_entities(raw), open)
}

/// Pop up to and including the innermost element named `name`.
/// A closing tag with no matching open element is ignored.
fn close_element(open: &mut Vec<String>, name: &str) {
    if let Some(pos) = open.iter().rposition(|n| n == name) {
        open.truncate(pos);
    }
}

fn tag_name(tag: &str) -> String {
    tag.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Decode the handful of entities that show up in plain page text.
/// Unknown entities are left as-is.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
