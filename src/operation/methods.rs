//! Method families: the configuration keys that select each phase.
//!
//! An operation mapping may carry at most one key from each family, e.g.
//! `css_selector` for find or `attribute` for extract. Each family is a plain
//! enum; [`configure_method`] performs the validated lookup.

use serde_yaml::{Mapping, Value as Yaml};

use super::{OperationError, OperationResult};

pub trait MethodFamily: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Family name for error messages
    const FAMILY: &'static str;
    const ALL: &'static [Self];

    /// Configuration key, lowercase
    fn key(self) -> &'static str;

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|method| method.key() == key)
    }
}

macro_rules! method_family {
    ($(#[$meta:meta])* $name:ident, $family:literal { $($variant:ident => $key:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl MethodFamily for $name {
            const FAMILY: &'static str = $family;
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn key(self) -> &'static str {
                match self {
                    $(Self::$variant => $key),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.key())
            }
        }
    };
}

method_family!(
    /// Locator kinds
    FindMethod, "find" {
        ClassName => "class_name",
        CssSelector => "css_selector",
        Id => "id",
        LinkText => "link_text",
        Name => "name",
        PartialLinkText => "partial_link_text",
        TagName => "tag_name",
        XPath => "xpath",
    }
);

method_family!(
    /// Explicit wait conditions, all taking the find locator
    WaitMethod, "wait" {
        ElementLocatedToBeSelected => "element_located_to_be_selected",
        ElementToBeClickable => "element_to_be_clickable",
        FrameToBeAvailableAndSwitchToIt => "frame_to_be_available_and_switch_to_it",
        InvisibilityOfElementLocated => "invisibility_of_element_located",
        PresenceOfAllElementsLocated => "presence_of_all_elements_located",
        PresenceOfElementLocated => "presence_of_element_located",
        VisibilityOfAllElementsLocated => "visibility_of_all_elements_located",
        VisibilityOfAnyElementsLocated => "visibility_of_any_elements_located",
        VisibilityOfElementLocated => "visibility_of_element_located",
    }
);

method_family!(ExtractMethod, "extract" {
    Getattr => "getattr",
    Attribute => "attribute",
    Property => "property",
});

method_family!(GetMethod, "get" {
    Get => "get",
});

method_family!(ParseMethod, "parse" {
    Parse => "parse",
    Strptime => "strptime",
});

method_family!(FormatMethod, "format" {
    Format => "format",
    Strftime => "strftime",
});

method_family!(TransformMethod, "transform" {
    Excise => "excise",
    Join => "join",
    Split => "split",
});

/// A selected method and its raw (unrendered) arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall<M> {
    pub method: M,
    pub args: Vec<String>,
}

/// Find the single key of family `M` in `config`, if any.
///
/// Two or more keys of one family is a configuration error. Arguments are
/// listified: a sequence gives one argument per item, null gives none and any
/// other scalar gives one.
pub fn configure_method<M: MethodFamily>(config: &Mapping) -> OperationResult<Option<MethodCall<M>>> {
    let mut found: Option<(M, &Yaml)> = None;

    for (key, value) in config {
        let Some(method) = key.as_str().and_then(M::from_key) else {
            continue;
        };
        if let Some((first, _)) = found {
            return Err(OperationError::Configuration(format!(
                "Expected at most one {} method; received '{}' and '{}'",
                M::FAMILY,
                first.key(),
                method.key()
            )));
        }
        found = Some((method, value));
    }

    let Some((method, value)) = found else {
        return Ok(None);
    };
    let args = match value {
        Yaml::Null => Vec::new(),
        Yaml::Sequence(items) => items.iter().map(scalar_arg).collect::<OperationResult<_>>()?,
        other => vec![scalar_arg(other)?],
    };
    Ok(Some(MethodCall { method, args }))
}

fn scalar_arg(value: &Yaml) -> OperationResult<String> {
    match value {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        other => Err(OperationError::Configuration(format!(
            "Method arguments must be scalars; received {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn keys_round_trip() {
        for method in FindMethod::ALL {
            assert_eq!(FindMethod::from_key(method.key()), Some(*method));
        }
        assert_eq!(WaitMethod::ALL.len(), 9);
        assert_eq!(ExtractMethod::from_key("attribute"), Some(ExtractMethod::Attribute));
        assert_eq!(ParseMethod::from_key("PARSE"), None);
    }

    #[test]
    fn single_method_is_selected_with_args() {
        let config = mapping("css_selector: 'li:nth-child({index})'\nattribute: href\nscope: page");
        let find = configure_method::<FindMethod>(&config).unwrap().unwrap();
        assert_eq!(find.method, FindMethod::CssSelector);
        assert_eq!(find.args, vec!["li:nth-child({index})"]);

        let transform = configure_method::<TransformMethod>(&config).unwrap();
        assert!(transform.is_none());
    }

    #[test]
    fn sequences_and_nulls_listify() {
        let config = mapping("strptime: ['%B %Y', '%Y']\nget:");
        let parse = configure_method::<ParseMethod>(&config).unwrap().unwrap();
        assert_eq!(parse.args, vec!["%B %Y", "%Y"]);
        let get = configure_method::<GetMethod>(&config).unwrap().unwrap();
        assert!(get.args.is_empty());
    }

    #[test]
    fn two_keys_of_one_family_are_rejected() {
        let config = mapping("xpath: //a\ncss_selector: a");
        let err = configure_method::<FindMethod>(&config).unwrap_err();
        assert!(matches!(err, OperationError::Configuration(_)));
    }
}
