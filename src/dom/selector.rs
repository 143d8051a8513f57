use std::collections::BTreeMap;

use anyhow::{bail, Result};

/// Compound selector of the form `tag[attr]` / `tag[attr="value"]`.
///
/// Only what the feed needs: a tag (or `*`) plus any number of attribute
/// presence or equality tests. Combinators are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    attributes: Vec<AttributeTest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeTest {
    name: String,
    value: Option<String>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self> {
        let source = input.trim();
        if source.is_empty() {
            bail!("empty selector");
        }

        let (tag_part, mut rest) = match source.find('[') {
            Some(idx) => (&source[..idx], &source[idx..]),
            None => (source, ""),
        };

        if tag_part.chars().any(char::is_whitespace) {
            bail!("combinators are not supported in selector `{source}`");
        }
        let tag = match tag_part {
            "" | "*" => None,
            name => Some(name.to_ascii_lowercase()),
        };

        let mut attributes = Vec::new();
        while !rest.is_empty() {
            let Some(open) = rest.strip_prefix('[') else {
                bail!("unexpected `{rest}` in selector `{source}`");
            };
            let Some(end) = open.find(']') else {
                bail!("unterminated attribute test in selector `{source}`");
            };
            let body = &open[..end];
            rest = &open[end + 1..];

            let (name, value) = match body.split_once('=') {
                Some((name, value)) => (name.trim(), Some(unquote(value.trim()).to_string())),
                None => (body.trim(), None),
            };
            if name.is_empty() {
                bail!("attribute test without a name in selector `{source}`");
            }
            attributes.push(AttributeTest {
                name: name.to_string(),
                value,
            });
        }

        Ok(Self { tag, attributes })
    }

    pub fn matches(&self, tag: &str, attributes: &BTreeMap<String, String>) -> bool {
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        self.attributes.iter().all(|test| match attributes.get(&test.name) {
            None => false,
            Some(actual) => test.value.as_ref().map_or(true, |value| value == actual),
        })
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
