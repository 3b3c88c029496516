//! DirectiveParser: splits a `Directive` block's payload into
//! `(name, params)`.
//!
//! Grammar: `NAME (SP KEY '=' STRING)*`, double-quoted values with `\"` as
//! the only escape, case-insensitive keys.

use std::collections::BTreeMap;

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alphanumeric1, space0},
    combinator::{map, opt},
    multi::many0,
    sequence::tuple,
    IResult,
};

use crate::error::Error;

/// The parsed payload of a `<#@ ... #>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Lowercased directive name (`template`, `assembly`, `import`,
    /// `include`, `var`, ...).
    pub name: String,
    /// Parameter map, keyed by lowercased parameter name. Unknown keys are
    /// preserved, not rejected.
    pub parameters: BTreeMap<String, String>,
}

impl Directive {
    /// Look up a recognized parameter, case-insensitively (the map is
    /// already lowercased at parse time).
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Fetch a mandatory parameter or raise a `DirectiveError`-shaped
    /// message for the caller to attach block context to.
    pub fn require(&self, key: &str) -> Result<&str, String> {
        self.param(key)
            .ok_or_else(|| format!("directive '{}' is missing required parameter '{}'", self.name, key))
    }
}

fn directive_name(s: &str) -> IResult<&str, &str> {
    alphanumeric1(s)
}

fn quoted_string(s: &str) -> IResult<&str, String> {
    let (s, _) = tag("\"")(s)?;
    let (s, body) = opt(escaped_transform(
        is_not("\\\""),
        '\\',
        alt((tag_transform("\\", "\\"), tag_transform("\"", "\""))),
    ))(s)?;
    let (s, _) = tag("\"")(s)?;
    Ok((s, body.unwrap_or_default()))
}

fn tag_transform<'a>(s: &'a str, t: &'a str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |i: &'a str| {
        let (r, _) = tag(s)(i)?;
        Ok((r, t))
    }
}

fn directive_param(s: &str) -> IResult<&str, (String, String)> {
    map(
        tuple((space0, alphanumeric1, space0, tag("="), space0, quoted_string, space0)),
        |t| (t.1.to_ascii_lowercase(), t.5),
    )(s)
}

fn directive_payload(s: &str) -> IResult<&str, (String, Vec<(String, String)>)> {
    map(
        tuple((space0, directive_name, many0(directive_param))),
        |t| (t.1.to_ascii_lowercase(), t.2),
    )(s)
}

/// Parse a `Directive` block's raw payload text.
pub fn parse(name: &str, line: usize, payload: &str) -> Result<Directive, Error> {
    let trimmed = payload.trim_end();
    match directive_payload(trimmed) {
        Ok((rest, (dir_name, params))) if rest.trim().is_empty() => {
            let mut parameters = BTreeMap::new();
            for (k, v) in params {
                parameters.insert(k, v);
            }
            Ok(Directive { name: dir_name, parameters })
        }
        _ => Err(Error::Directive {
            name: name.to_string(),
            line,
            reason: format!("malformed directive payload: {payload:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_directive() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = parse("A", 1, r#"template name="A" inherits="Base""#).unwrap();
        assert_eq!(dir.name, "template");
        assert_eq!(dir.param("name"), Some("A"));
        assert_eq!(dir.param("inherits"), Some("Base"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = parse("A", 1, r#"var NAME="n" TYPE="i32""#).unwrap();
        assert_eq!(dir.param("name"), Some("n"));
        assert_eq!(dir.param("type"), Some("i32"));
    }

    #[test]
    fn escaped_quote_in_value() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = parse("A", 1, r#"import namespace="a \"quoted\" b""#).unwrap();
        assert_eq!(dir.param("namespace"), Some("a \"quoted\" b"));
    }

    #[test]
    fn unknown_keys_preserved() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = parse("A", 1, r#"include name="x" weird="y""#).unwrap();
        assert_eq!(dir.param("weird"), Some("y"));
    }

    #[test]
    fn missing_mandatory_param_detected_by_caller() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = parse("A", 1, r#"include weird="y""#).unwrap();
        assert!(dir.require("name").is_err());
    }

    #[test]
    fn malformed_payload_is_fatal() {
        let _ = env_logger::builder().is_test(true).try_init();
        let err = parse("A", 1, r#"template name=unquoted"#).unwrap_err();
        assert!(matches!(err, Error::Directive { .. }));
    }
}
