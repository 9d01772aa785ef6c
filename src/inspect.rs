//! Value inspections
//!
//! Reports what is known about a produced value: a header with its repr and
//! one `name :: detail` line per inspection that applies to it.

use crate::executor::Val;

/// File name used when an inspection is attached
pub const INSPECTION_FILE_NAME: &str = "inspection.prolog";
pub const INSPECTION_FENCE: &str = "```prolog";

/// Longest header kept before it is cut with `...`
pub const MAX_HEADER_LEN: usize = 485;

/// Entries listed before the rest is elided
const MAX_LISTED: usize = 5;
const MAX_CONTENT_TYPES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub name: &'static str,
    pub detail: String,
}

impl Inspection {
    fn new(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            detail: detail.into(),
        }
    }
}

/// Every inspection that applies to `value`, in a fixed order
pub fn inspections(value: &Val) -> Vec<Inspection> {
    let mut found = vec![Inspection::new("Type", value.type_name())];

    match value {
        Val::Str(s) => found.push(Inspection::new("Length", s.chars().count().to_string())),
        Val::List(items) => {
            found.push(Inspection::new("Length", items.len().to_string()));
            if !items.is_empty() {
                found.push(Inspection::new("Content Types", content_types(items)));
            }
        }
        Val::Obj(map) => {
            found.push(Inspection::new("Length", map.len().to_string()));
            if !map.is_empty() {
                let mut keys: Vec<&str> = map.keys().take(MAX_LISTED).map(String::as_str).collect();
                if map.len() > MAX_LISTED {
                    keys.push("...");
                }
                found.push(Inspection::new("Keys", keys.join(", ")));
            }
        }
        Val::Num(n) if n.is_finite() && n.fract() == 0.0 => {
            found.push(Inspection::new("Integral", "yes"));
        }
        Val::NativeFunc(func) => found.push(Inspection::new("Builtin", func.name())),
        Val::Promise(awaitable) => found.push(Inspection::new("Awaitable", awaitable.to_string())),
        Val::Error(info) => {
            found.push(Inspection::new("Error Code", info.code.clone()));
            found.push(Inspection::new("Message", info.message.clone()));
        }
        _ => {}
    }

    found.push(Inspection::new("Truthy", if value.is_truthy() { "yes" } else { "no" }));
    found
}

/// Share of each element type, most common first
fn content_types(items: &[Val]) -> String {
    let mut counts: Vec<(&'static str, usize)> = Vec::new();
    for item in items {
        let name = item.type_name();
        match counts.iter_mut().find(|(seen, _)| *seen == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    // Stable, so ties keep first-seen order
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total = items.len() as f64;
    let mut output = counts
        .iter()
        .take(MAX_CONTENT_TYPES)
        .map(|(name, count)| format!("{} ({:.1}\u{ff05})", name, *count as f64 * 100.0 / total))
        .collect::<Vec<_>>()
        .join(", ");
    if counts.len() > MAX_CONTENT_TYPES {
        output.push_str(", ...");
    }
    output
}

/// Header line text: the repr with code fences broken and long text cut
pub fn header(repr: &str) -> String {
    let escaped = repr.replace("``", "`\u{200b}`");
    if escaped.chars().count() > MAX_HEADER_LEN {
        let cut: String = escaped.chars().take(MAX_HEADER_LEN - 3).collect();
        format!("{}...", cut)
    } else {
        escaped
    }
}

/// Full inspection text for `value`, headed by `repr`
pub fn render(value: &Val, repr: &str) -> String {
    let mut lines = vec![format!("=== {} ===", header(repr)), String::new()];
    lines.extend(
        inspections(value)
            .into_iter()
            .map(|i| format!("{:16.16} :: {}", i.name, i.detail)),
    );
    lines.join("\n")
}
