//! A single configured operation and its phase execution.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};
use serde_yaml::{Mapping, Value as Yaml};

use super::methods::{
    ExtractMethod, FindMethod, FormatMethod, GetMethod, MethodCall, MethodFamily, ParseMethod,
    TransformMethod, WaitMethod, configure_method,
};
use super::references::{
    format_template, get_by_reference, get_by_reference_tag, multi_parse, render_references,
};
use super::value::{AssemblyContext, Value, one, one_min};
use super::{OperationContext, OperationError, OperationResult};
use crate::browser::{DriverError, ElementHandle, Locator, WaitOutcome};
use crate::utils::{EXPLICIT_WAIT_DEFAULT_SECS, GranularDateTime, WAIT_POLL_INTERVAL_MS};

const SCOPE_TAG: &str = "scope";
const IS_MULTIPLE_TAG: &str = "is_multiple";
const WAIT_TAG: &str = "wait";
const CLICK_TAG: &str = "click";
const INDEX_TAG: &str = "index";
/// Name under which format templates see the value being formatted
pub const VALUE_TAG: &str = "value";

/// Which value a step in a series acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// The whole page
    Page,
    /// The target the series started from
    Parent,
    /// The value before the previous step
    Prior,
    /// The previous step's output
    #[default]
    Latest,
}

impl Scope {
    pub fn from_name(name: &str) -> OperationResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "page" => Ok(Scope::Page),
            "parent" => Ok(Scope::Parent),
            "prior" => Ok(Scope::Prior),
            "latest" => Ok(Scope::Latest),
            other => Err(OperationError::Configuration(format!("Unknown scope '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOperation {
    field: String,
    scope: Scope,
    is_multiple: bool,
    find: Option<MethodCall<FindMethod>>,
    wait_method: Option<MethodCall<WaitMethod>>,
    /// Seconds; the explicit wait timeout when a wait method is set,
    /// otherwise a plain pause when nothing is found
    wait: f64,
    click: bool,
    extract: Option<MethodCall<ExtractMethod>>,
    get: Option<MethodCall<GetMethod>>,
    parse: Option<MethodCall<ParseMethod>>,
    format: Option<MethodCall<FormatMethod>>,
    transform: Option<MethodCall<TransformMethod>>,
}

impl ExtractionOperation {
    /// Build from one operation mapping of a field's configuration
    pub fn from_value(field: &str, config: &Yaml) -> OperationResult<Self> {
        match config {
            Yaml::Mapping(mapping) => Self::from_mapping(field, mapping),
            other => Err(OperationError::Configuration(format!(
                "Operation for '{field}' must be a mapping; received {other:?}"
            ))),
        }
    }

    pub fn from_mapping(field: &str, config: &Mapping) -> OperationResult<Self> {
        let scope = match config.get(SCOPE_TAG) {
            None | Some(Yaml::Null) => Scope::default(),
            Some(Yaml::String(name)) => Scope::from_name(name)?,
            Some(other) => {
                return Err(OperationError::Configuration(format!("Invalid scope {other:?}")));
            }
        };

        let operation = Self {
            field: field.to_string(),
            scope,
            is_multiple: flag(config, IS_MULTIPLE_TAG)?,
            find: configure_method(config)?,
            wait_method: configure_method(config)?,
            wait: seconds(config, WAIT_TAG)?,
            click: flag(config, CLICK_TAG)?,
            extract: configure_method(config)?,
            get: configure_method(config)?,
            parse: configure_method(config)?,
            format: configure_method(config)?,
            transform: configure_method(config)?,
        };
        operation.validate()?;
        Ok(operation)
    }

    fn validate(&self) -> OperationResult<()> {
        let arity = |family: &str, count: usize, exact: bool| {
            let valid = if exact { count == 1 } else { count >= 1 };
            if valid {
                Ok(())
            } else {
                let expected = if exact { "exactly one argument" } else { "at least one argument" };
                Err(OperationError::Configuration(format!(
                    "'{family}' for field '{}' takes {expected}; received {count}",
                    self.field
                )))
            }
        };

        if let Some(find) = &self.find {
            arity(find.method.key(), find.args.len(), true)?;
        }
        if let Some(wait) = &self.wait_method
            && self.find.is_none()
        {
            return Err(OperationError::Configuration(format!(
                "'{}' for field '{}' requires a find method",
                wait.method.key(),
                self.field
            )));
        }
        if let Some(extract) = &self.extract {
            arity(extract.method.key(), extract.args.len(), true)?;
        }
        if let Some(get) = &self.get {
            arity(get.method.key(), get.args.len(), false)?;
        }
        if let Some(parse) = &self.parse {
            arity(parse.method.key(), parse.args.len(), false)?;
        }
        if let Some(format) = &self.format {
            arity(format.method.key(), format.args.len(), true)?;
        }
        if let Some(transform) = &self.transform {
            let exact = transform.method != TransformMethod::Excise;
            arity(transform.method.key(), transform.args.len(), exact)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.is_multiple
    }

    /// Targets for this step given the series state
    #[must_use]
    pub fn select_targets(&self, latest: &Value, prior: &Value, parent: &Value) -> Vec<Value> {
        match self.scope {
            Scope::Latest => latest.clone().enlist(),
            Scope::Prior => prior.clone().enlist(),
            Scope::Parent => vec![parent.clone()],
            Scope::Page => vec![Value::Page],
        }
    }

    /// Run every configured phase on `target`. `index` is the 1-based item
    /// position substituted for `{index}` in find selectors.
    pub async fn execute(
        &self,
        target: Value,
        index: usize,
        ctx: &OperationContext<'_>,
    ) -> OperationResult<Value> {
        let mut values = match &self.find {
            Some(find) => self.find_elements(target, find, index, ctx).await?,
            None => {
                if self.wait > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(self.wait)).await;
                }
                target.enlist()
            }
        };

        if self.click {
            self.click_elements(&values, ctx).await?;
        }
        if let Some(extract) = &self.extract {
            values = self.extract_values(values, extract, ctx).await?;
        }
        if let Some(get) = &self.get {
            values = Self::get_values(get, ctx.content)?;
        }
        if let Some(parse) = &self.parse {
            values = self.parse_values(values, parse, ctx)?;
        }
        if let Some(format) = &self.format {
            values = Self::format_values(values, format, ctx.content)?;
        }
        if let Some(transform) = &self.transform {
            values = Self::transform_values(values, transform, ctx.content)?;
        }

        Ok(Value::delist(values))
    }

    async fn find_elements(
        &self,
        target: Value,
        find: &MethodCall<FindMethod>,
        index: usize,
        ctx: &OperationContext<'_>,
    ) -> OperationResult<Vec<Value>> {
        let root: Option<ElementHandle> = match Value::delist(target.enlist()) {
            Value::Page => None,
            Value::Element(element) => Some(element),
            Value::List(items) => {
                return Err(OperationError::TooManyValues {
                    expected: 1,
                    received: items.len(),
                    context: format!("find target of {self}"),
                });
            }
            other => {
                return Err(OperationError::InvalidTarget(format!(
                    "Expected page or element for {self}; received {} '{other}'",
                    other.type_name()
                )));
            }
        };

        let template = one(render_all(&find.args, ctx.content)?, find.method.key())?;
        let selector = format_template(&template, |name| {
            if name == INDEX_TAG {
                Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX)))
            } else {
                Err(OperationError::UnknownReference(name.to_string()))
            }
        })?;
        let locator = Locator::new(find.method, selector);
        debug!("{}: finding {locator}", ctx.label);

        if let Some(wait) = &self.wait_method {
            let timeout = if self.wait > 0.0 { self.wait } else { EXPLICIT_WAIT_DEFAULT_SECS };
            let outcome = ctx
                .session
                .wait_until(
                    wait.method,
                    &locator,
                    Duration::from_secs_f64(timeout),
                    Duration::from_millis(WAIT_POLL_INTERVAL_MS),
                )
                .await?;
            return Ok(match outcome {
                WaitOutcome::Elements(found) => found.into_iter().map(Value::Element).collect(),
                WaitOutcome::Satisfied => vec![Value::Bool(true)],
            });
        }

        if self.is_multiple {
            let found = ctx.session.find_elements(root.as_ref(), &locator).await?;
            return Ok(found.into_iter().map(Value::Element).collect());
        }

        match ctx.session.find_element(root.as_ref(), &locator).await {
            Ok(found) => Ok(vec![Value::Element(found)]),
            Err(DriverError::NoSuchElement(locator)) => Err(OperationError::TooFewValues {
                expected: 1,
                context: format!("element {locator}"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn click_elements(&self, values: &[Value], ctx: &OperationContext<'_>) -> OperationResult<()> {
        for value in values {
            let Value::Element(element) = value else {
                return Err(OperationError::InvalidTarget(format!(
                    "Only elements can be clicked; {self} received {}",
                    value.type_name()
                )));
            };
            ctx.session.click(element).await?;
        }
        Ok(())
    }

    async fn extract_values(
        &self,
        values: Vec<Value>,
        extract: &MethodCall<ExtractMethod>,
        ctx: &OperationContext<'_>,
    ) -> OperationResult<Vec<Value>> {
        let name = one(render_all(&extract.args, ctx.content)?, extract.method.key())?;
        let session = ctx.session;
        let mut extracted = Vec::with_capacity(values.len());

        for value in values {
            let result = match (extract.method, &value) {
                (ExtractMethod::Getattr, Value::Element(element)) => match name.as_str() {
                    "text" => Value::Text(session.text(element).await?),
                    "tag_name" => Value::Text(session.tag_name(element).await?),
                    _ => return Err(unknown_attribute(&name, &value)),
                },
                (ExtractMethod::Getattr, Value::Page) => match name.as_str() {
                    "current_url" => Value::from(session.current_url().await?),
                    _ => return Err(unknown_attribute(&name, &value)),
                },
                (ExtractMethod::Attribute, Value::Element(element)) => {
                    Value::from(session.attribute(element, &name).await?)
                }
                (ExtractMethod::Property, Value::Element(element)) => {
                    Value::from_json(session.property(element, &name).await?)
                }
                (method, other) => {
                    return Err(OperationError::InvalidTarget(format!(
                        "{} expects an element; {self} received {} '{other}'",
                        method.key(),
                        other.type_name()
                    )));
                }
            };
            extracted.push(result);
        }
        Ok(extracted)
    }

    /// Current values are ignored; each reference tag yields one value
    fn get_values(get: &MethodCall<GetMethod>, content: &AssemblyContext) -> OperationResult<Vec<Value>> {
        match get.method {
            GetMethod::Get => one_min(get.args.clone(), get.method.key())?
                .iter()
                .map(|tag| get_by_reference_tag(tag, content))
                .collect(),
        }
    }

    fn parse_values(
        &self,
        values: Vec<Value>,
        parse: &MethodCall<ParseMethod>,
        ctx: &OperationContext<'_>,
    ) -> OperationResult<Vec<Value>> {
        let templates = one_min(render_all(&parse.args, ctx.content)?, parse.method.key())?;
        let mut parsed = Vec::with_capacity(values.len());

        match parse.method {
            ParseMethod::Parse => {
                for value in values {
                    if !value.is_truthy() {
                        parsed.push(value);
                        continue;
                    }
                    let text = value.to_string();
                    match multi_parse(&templates, &text)? {
                        Some(mut named) if named.contains_key(VALUE_TAG) => {
                            parsed.push(named.swap_remove(VALUE_TAG).unwrap_or_default());
                        }
                        _ => {
                            let mismatch = OperationError::ParseMismatch {
                                value: text,
                                templates: templates.clone(),
                            };
                            warn!("Extractor parse failure in {}: {mismatch}", ctx.label);
                        }
                    }
                }
            }
            ParseMethod::Strptime => {
                for value in values {
                    let result = match value {
                        Value::Null => Value::Null,
                        Value::DateTime(dt) => Value::DateTime(dt),
                        other => {
                            let text = other.to_string();
                            GranularDateTime::strptime(&text, &templates)
                                .map(Value::DateTime)
                                .map_err(|e| OperationError::InvalidDate(e.to_string()))?
                        }
                    };
                    parsed.push(result);
                }
            }
        }
        Ok(parsed)
    }

    fn format_values(
        values: Vec<Value>,
        format: &MethodCall<FormatMethod>,
        content: &AssemblyContext,
    ) -> OperationResult<Vec<Value>> {
        let template = one(render_all(&format.args, content)?, format.method.key())?;

        match format.method {
            FormatMethod::Format => {
                if content.contains_key(VALUE_TAG) {
                    return Err(OperationError::ReservedField(VALUE_TAG.to_string()));
                }
                values
                    .iter()
                    .map(|value| {
                        format_template(&template, |reference| {
                            lookup_with_value(reference, value, content)
                        })
                        .map(Value::Text)
                    })
                    .collect()
            }
            FormatMethod::Strftime => values
                .iter()
                .map(|value| match value {
                    Value::DateTime(dt) => Ok(Value::Text(dt.strftime(&template))),
                    other => Err(OperationError::InvalidTarget(format!(
                        "strftime expects a datetime; received {} '{other}'",
                        other.type_name()
                    ))),
                })
                .collect(),
        }
    }

    fn transform_values(
        values: Vec<Value>,
        transform: &MethodCall<TransformMethod>,
        content: &AssemblyContext,
    ) -> OperationResult<Vec<Value>> {
        let args = render_all(&transform.args, content)?;

        match transform.method {
            TransformMethod::Excise => {
                let snippets = one_min(args, transform.method.key())?;
                Ok(values
                    .into_iter()
                    .map(|value| {
                        if value.is_null() {
                            return value;
                        }
                        let excised = snippets
                            .iter()
                            .fold(value.to_string(), |text, snippet| text.replace(snippet.as_str(), ""));
                        Value::Text(excised)
                    })
                    .collect())
            }
            TransformMethod::Join => {
                let delimiter = one(args, transform.method.key())?;
                let joined = values
                    .iter()
                    .filter(|value| !value.is_null())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(&delimiter);
                Ok(vec![Value::Text(joined)])
            }
            TransformMethod::Split => {
                let delimiter = one(args, transform.method.key())?;
                if delimiter.is_empty() {
                    return Err(OperationError::Configuration("split delimiter is empty".into()));
                }
                let mut split = Vec::new();
                for value in values {
                    if value.is_null() {
                        split.push(value);
                        continue;
                    }
                    split.extend(
                        value
                            .to_string()
                            .split(delimiter.as_str())
                            .map(|part| Value::Text(part.to_string())),
                    );
                }
                Ok(split)
            }
        }
    }
}

impl fmt::Display for ExtractionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ExtractionOperation | {}>", self.field)
    }
}

fn flag(config: &Mapping, key: &str) -> OperationResult<bool> {
    match config.get(key) {
        None | Some(Yaml::Null) => Ok(false),
        Some(Yaml::Bool(value)) => Ok(*value),
        Some(other) => Err(OperationError::Configuration(format!(
            "'{key}' must be a boolean; received {other:?}"
        ))),
    }
}

fn seconds(config: &Mapping, key: &str) -> OperationResult<f64> {
    match config.get(key) {
        None | Some(Yaml::Null) => Ok(0.0),
        Some(Yaml::Number(n)) => match n.as_f64() {
            Some(secs) if secs >= 0.0 && secs.is_finite() => Ok(secs),
            _ => Err(OperationError::Configuration(format!("'{key}' must be a non-negative number"))),
        },
        Some(other) => Err(OperationError::Configuration(format!(
            "'{key}' must be a number of seconds; received {other:?}"
        ))),
    }
}

fn render_all(args: &[String], content: &AssemblyContext) -> OperationResult<Vec<String>> {
    args.iter().map(|arg| render_references(arg, content)).collect()
}

fn unknown_attribute(name: &str, value: &Value) -> OperationError {
    OperationError::UnknownAttribute {
        attribute: name.to_string(),
        value: value.type_name().to_string(),
    }
}

/// Format lookup where `value` is the value being formatted and every other
/// name is a field of the record
fn lookup_with_value(reference: &str, value: &Value, content: &AssemblyContext) -> OperationResult<Value> {
    let mut components = reference.split('.');
    if components.next() != Some(VALUE_TAG) {
        return get_by_reference(reference, content);
    }
    let mut current = value.clone();
    if current.is_truthy() {
        for component in components {
            current = current.attribute(component)?;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Session, StaticSession};
    use std::collections::HashMap;

    const URL: &str = "https://journals.example.org/search";

    const PAGE: &str = r#"<html><body>
        <ul id="results">
          <li class="result"><a class="title" href="/a/1">  Housing   First </a><span class="vol">Vol. 12</span></li>
          <li class="result"><a class="title" href="/a/2">Rapid Rehousing</a><span class="vol">Vol. 3</span></li>
        </ul>
        <p class="date">March 2019</p>
    </body></html>"#;

    async fn session() -> StaticSession {
        let session = StaticSession::with_fixtures(HashMap::from([(URL.to_string(), PAGE.to_string())]));
        session.set_implicit_wait(Duration::ZERO);
        session.navigate(URL).await.unwrap();
        session
    }

    fn operation(yaml: &str) -> ExtractionOperation {
        ExtractionOperation::from_value("test", &serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn single_find_collapses_to_scalar() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let op = operation("css_selector: 'li:nth-child({index}) a.title'\ngetattr: text");
        let value = op.execute(Value::Page, 2, &ctx).await.unwrap();
        assert_eq!(value, Value::from("Rapid Rehousing"));
    }

    #[tokio::test]
    async fn multiple_find_fans_out() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let op = operation("class_name: vol\nis_multiple: true\ngetattr: text\nparse: 'Vol. {value:d}'");
        let value = op.execute(Value::Page, 1, &ctx).await.unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(12), Value::Int(3)]));
    }

    #[tokio::test]
    async fn missing_element_is_too_few_values() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let op = operation("css_selector: .absent\ngetattr: text");
        let err = op.execute(Value::Page, 1, &ctx).await.unwrap_err();
        assert!(matches!(err, OperationError::TooFewValues { .. }));
        assert!(err.is_missing_element());
    }

    #[tokio::test]
    async fn attributes_and_dates() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let href = operation("css_selector: a.title\nattribute: href");
        assert_eq!(href.execute(Value::Page, 1, &ctx).await.unwrap(), Value::from("/a/1"));

        let date = operation("class_name: date\ngetattr: text\nstrptime: ['%Y', '%B %Y']");
        let Value::DateTime(dt) = date.execute(Value::Page, 1, &ctx).await.unwrap() else {
            panic!("expected a date");
        };
        assert_eq!(dt.serialize(), "2019-03");
    }

    #[tokio::test]
    async fn references_get_and_format() {
        let session = session().await;
        let mut content = AssemblyContext::new();
        content.insert("title".into(), Value::from("Housing First"));
        content.insert("volume".into(), Value::Int(12));
        let ctx = OperationContext::new(&session, &content, "test");

        let get = operation("get: ['<title>', '<volume>']");
        assert_eq!(
            get.execute(Value::Null, 1, &ctx).await.unwrap(),
            Value::List(vec![Value::from("Housing First"), Value::Int(12)])
        );

        let format = operation("get: '<volume>'\nformat: '{title} v{value:03d}'");
        assert_eq!(
            format.execute(Value::Null, 1, &ctx).await.unwrap(),
            Value::from("Housing First v012")
        );
    }

    #[tokio::test]
    async fn value_is_a_reserved_field() {
        let session = session().await;
        let mut content = AssemblyContext::new();
        content.insert("value".into(), Value::Null);
        let ctx = OperationContext::new(&session, &content, "test");

        let op = operation("format: '{value}'");
        let err = op.execute(Value::from("x"), 1, &ctx).await.unwrap_err();
        assert_eq!(err, OperationError::ReservedField("value".into()));
    }

    #[tokio::test]
    async fn transforms() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let split = operation("split: '; '");
        assert_eq!(
            split.execute(Value::from("Ann Lee; Bo Kim"), 1, &ctx).await.unwrap(),
            Value::from(vec!["Ann Lee", "Bo Kim"])
        );

        let excise = operation("excise: ['DOI: ', ' ']");
        assert_eq!(
            excise.execute(Value::from("DOI: 10.1/ab c"), 1, &ctx).await.unwrap(),
            Value::from("10.1/abc")
        );

        let join = operation("join: ', '");
        assert_eq!(
            join.execute(Value::from(vec!["a", "b"]), 1, &ctx).await.unwrap(),
            Value::from("a, b")
        );
    }

    #[tokio::test]
    async fn failed_parses_are_dropped() {
        let session = session().await;
        let content = AssemblyContext::new();
        let ctx = OperationContext::new(&session, &content, "test");

        let op = operation("parse: 'No. {value:d}'");
        let value = op
            .execute(Value::from(vec!["No. 4", "Winter", ""]), 1, &ctx)
            .await
            .unwrap();
        assert_eq!(value, Value::List(vec![Value::Int(4), Value::from("")]));
    }

    #[test]
    fn configuration_is_validated() {
        let parse = |yaml: &str| {
            ExtractionOperation::from_value("f", &serde_yaml::from_str(yaml).unwrap())
        };
        assert!(parse("xpath: ['//a', '//b']").is_err());
        assert!(parse("presence_of_element_located:").is_err());
        assert!(parse("scope: sideways").is_err());
        assert!(parse("is_multiple: 'yes'").is_err());
        assert!(parse("join: [',', ';']").is_err());

        let op = parse("scope: PAGE\ncss_selector: a\nwait: 2").unwrap();
        assert_eq!(op.scope(), Scope::Page);
        assert!(!op.is_multiple());
    }

    #[test]
    fn scope_selects_targets() {
        let latest = Value::from(vec!["a", "b"]);
        let prior = Value::from("p");
        let parent = Value::Page;
        let select = |yaml: &str| {
            operation(yaml).select_targets(&latest, &prior, &parent)
        };
        assert_eq!(select("getattr: text"), vec![Value::from("a"), Value::from("b")]);
        assert_eq!(select("scope: prior"), vec![Value::from("p")]);
        assert_eq!(select("scope: parent"), vec![Value::Page]);
        assert_eq!(select("scope: page"), vec![Value::Page]);
    }
}
