//! Back-references and the small template languages used by parse/format.
//!
//! A back-reference `<field.attr>` names a value already assembled for the
//! current record. Parse templates (`Vol. {value:d}`) match a whole string
//! and capture named fields; format templates (`{title} ({value:04d})`)
//! render fields with optional width, precision and type.

use indexmap::IndexMap;
use regex::Regex;

use super::value::{AssemblyContext, Value};
use super::{OperationError, OperationResult};

const LEFT_REFERENCE: char = '<';
const RIGHT_REFERENCE: char = '>';
const REFERENCE_DELIMITER: char = '.';

/// Resolve a dotted reference against the assembly context.
///
/// Attributes are only followed while the value is truthy, so `<date.year>`
/// on a missing date yields null rather than an error.
pub fn get_by_reference(reference: &str, content: &AssemblyContext) -> OperationResult<Value> {
    let mut components = reference.split(REFERENCE_DELIMITER);
    let field = components.next().unwrap_or_default();
    let mut value = content
        .get(field)
        .cloned()
        .ok_or_else(|| OperationError::UnknownReference(field.to_string()))?;

    if value.is_truthy() {
        for component in components {
            value = value.attribute(component)?;
        }
    }
    Ok(value)
}

/// Resolve a tag such as `<title>`; the whole argument must be one tag
pub fn get_by_reference_tag(tag: &str, content: &AssemblyContext) -> OperationResult<Value> {
    let reference = tag
        .strip_prefix(LEFT_REFERENCE)
        .and_then(|rest| rest.strip_suffix(RIGHT_REFERENCE))
        .filter(|reference| !reference.is_empty())
        .ok_or_else(|| {
            OperationError::Configuration(format!("Expected a reference tag like '<field>'; received '{tag}'"))
        })?;
    get_by_reference(reference, content)
}

/// Substitute every `<reference>` in `template`, innermost first. Null
/// references render as the empty string.
pub fn render_references(template: &str, content: &AssemblyContext) -> OperationResult<String> {
    let mut rendered = template.to_string();

    while rendered.contains(LEFT_REFERENCE) && rendered.contains(RIGHT_REFERENCE) {
        let head = rendered.split(RIGHT_REFERENCE).next().unwrap_or_default();
        let reference = head.rsplit(LEFT_REFERENCE).next().unwrap_or_default();
        if reference.is_empty() {
            break;
        }

        let tag = format!("{LEFT_REFERENCE}{reference}{RIGHT_REFERENCE}");
        if !rendered.contains(&tag) {
            break;
        }
        let value = get_by_reference(reference, content)?;
        rendered = rendered.replace(&tag, &value.to_string());
    }

    Ok(rendered)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Text,
    Int,
    Float,
}

/// Compiled parse template: literal text around `{name[:type]}` fields
#[derive(Debug, Clone)]
pub struct ParseTemplate {
    template: String,
    regex: Regex,
    /// Field name (None for `{}`) and conversion, by capture group order
    fields: Vec<(Option<String>, Capture)>,
}

impl ParseTemplate {
    pub fn compile(template: &str) -> OperationResult<Self> {
        let invalid = |reason: &str| {
            OperationError::Configuration(format!("Invalid parse template '{template}': {reason}"))
        };

        let mut pattern = String::from("(?is)^");
        let mut fields = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut spec = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => spec.push(c),
                            None => return Err(invalid("unclosed field")),
                        }
                    }
                    pattern.push_str(&regex::escape(&literal));
                    literal.clear();

                    let (name, kind) = spec.split_once(':').unwrap_or((spec.as_str(), ""));
                    let (capture, group) = match kind {
                        "" => (Capture::Text, ".+?"),
                        "d" => (Capture::Int, r"[-+]?\d+"),
                        "f" => (Capture::Float, r"[-+]?\d*\.\d+"),
                        "w" => (Capture::Text, r"\w+"),
                        "W" => (Capture::Text, r"\W+"),
                        "s" => (Capture::Text, r"\s+"),
                        "D" => (Capture::Text, r"\D+"),
                        other => return Err(invalid(&format!("unsupported type '{other}'"))),
                    };
                    pattern.push('(');
                    pattern.push_str(group);
                    pattern.push(')');
                    let name = (!name.is_empty()).then(|| name.to_string());
                    fields.push((name, capture));
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            fields,
        })
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Named captures when `text` matches the whole template
    #[must_use]
    pub fn parse(&self, text: &str) -> Option<IndexMap<String, Value>> {
        let captures = self.regex.captures(text)?;
        let mut named = IndexMap::new();

        for (i, (name, capture)) in self.fields.iter().enumerate() {
            let Some(name) = name else { continue };
            let raw = captures.get(i + 1)?.as_str();
            let value = match capture {
                Capture::Text => Value::Text(raw.to_string()),
                Capture::Int => Value::Int(raw.parse().ok()?),
                Capture::Float => Value::Float(raw.parse().ok()?),
            };
            named.entry(name.clone()).or_insert(value);
        }
        Some(named)
    }
}

/// First successful parse among `templates`
pub fn multi_parse(templates: &[String], text: &str) -> OperationResult<Option<IndexMap<String, Value>>> {
    for template in templates {
        if let Some(named) = ParseTemplate::compile(template)?.parse(text) {
            return Ok(Some(named));
        }
    }
    Ok(None)
}

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> OperationResult<Self> {
        let invalid = || OperationError::Configuration(format!("Invalid format spec '{spec}'"));
        let mut parsed = FormatSpec::default();
        let chars: Vec<char> = spec.chars().collect();
        let mut i = 0;

        let is_align = |c: char| matches!(c, '<' | '>' | '^');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }
        let width_start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > width_start {
            parsed.width = chars[width_start..i].iter().collect::<String>().parse().map_err(|_| invalid())?;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let precision_start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            let digits: String = chars[precision_start..i].iter().collect();
            parsed.precision = Some(digits.parse().map_err(|_| invalid())?);
        }
        match chars.get(i) {
            None => {}
            Some(c @ ('d' | 'f' | 's')) if i + 1 == chars.len() => parsed.kind = Some(*c),
            Some(_) => return Err(invalid()),
        }
        Ok(parsed)
    }

    fn apply(&self, value: &Value) -> OperationResult<String> {
        let mismatch = |kind: char| {
            OperationError::Configuration(format!(
                "Format type '{kind}' cannot render {} value '{value}'",
                value.type_name()
            ))
        };

        let (body, numeric) = match (self.kind, value) {
            (Some('d'), Value::Int(i)) => (i.to_string(), true),
            (Some('d'), _) => return Err(mismatch('d')),
            (Some('f'), Value::Int(i)) => (format!("{:.*}", self.precision.unwrap_or(6), *i as f64), true),
            (Some('f'), Value::Float(x)) => (format!("{:.*}", self.precision.unwrap_or(6), x), true),
            (Some('f'), _) => return Err(mismatch('f')),
            (None, Value::Float(x)) if self.precision.is_some() => {
                (format!("{:.*}", self.precision.unwrap_or_default(), x), true)
            }
            (None, Value::Int(_) | Value::Float(_)) => (value.to_string(), true),
            (_, other) => {
                let text = other.to_string();
                let text = match self.precision {
                    Some(max) => text.chars().take(max).collect(),
                    None => text,
                };
                (text, false)
            }
        };

        let length = body.chars().count();
        if length >= self.width {
            return Ok(body);
        }
        let padding = self.width - length;

        if self.zero && numeric && self.align.is_none() {
            let (sign, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", body.as_str()),
            };
            return Ok(format!("{sign}{}{digits}", "0".repeat(padding)));
        }

        let fill = self.fill.unwrap_or(if self.zero { '0' } else { ' ' }).to_string();
        let align = self.align.unwrap_or(if numeric { '>' } else { '<' });
        Ok(match align {
            '>' => format!("{}{body}", fill.repeat(padding)),
            '^' => {
                let left = padding / 2;
                format!("{}{body}{}", fill.repeat(left), fill.repeat(padding - left))
            }
            _ => format!("{body}{}", fill.repeat(padding)),
        })
    }
}

/// Render `{field[.attr][:spec]}` placeholders with `lookup`
pub fn format_template<F>(template: &str, mut lookup: F) -> OperationResult<String>
where
    F: FnMut(&str) -> OperationResult<Value>,
{
    let invalid = |reason: &str| {
        OperationError::Configuration(format!("Invalid format template '{template}': {reason}"))
    };

    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                rendered.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                rendered.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(invalid("unclosed field")),
                    }
                }
                let (reference, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                if reference.is_empty() {
                    return Err(invalid("positional fields are not supported"));
                }
                let value = lookup(reference)?;
                rendered.push_str(&FormatSpec::parse(spec)?.apply(&value)?);
            }
            '}' => return Err(invalid("unmatched '}'")),
            c => rendered.push(c),
        }
    }

    Ok(rendered)
}
