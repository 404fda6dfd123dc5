//! Prepared query templates.
//!
//! A template query answers every lookup name that starts with its own name.
//! Its string fields may reference the lookup through interpolations:
//!
//! | Expression       | Value                                             |
//! |------------------|---------------------------------------------------|
//! | `${name.full}`   | the full lookup name                              |
//! | `${name.prefix}` | the template's own name                           |
//! | `${name.suffix}` | the lookup name with the template name cut off    |
//! | `${match(N)}`    | capture group `N` of the template regexp, or `""` |
//!
//! Only a fixed list of fields is interpolated; see [`visit_strings`].

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{StateError, StateResult};
use crate::types::PreparedQuery;

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([^}]*?)\s*\}").expect("interpolation pattern is valid")
});

static MATCH_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^match\(\s*(\d+)\s*\)$").expect("match pattern is valid")
});

/// A parsed interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    Full,
    Prefix,
    Suffix,
    Match(usize),
}

impl Var {
    fn parse(expr: &str) -> StateResult<Self> {
        match expr {
            "name.full" => Ok(Var::Full),
            "name.prefix" => Ok(Var::Prefix),
            "name.suffix" => Ok(Var::Suffix),
            _ => MATCH_CALL
                .captures(expr)
                .and_then(|c| c[1].parse().ok())
                .map(Var::Match)
                .ok_or_else(|| StateError::InvalidTemplate(format!("unknown expression {expr:?}"))),
        }
    }
}

/// Calls `f` on every interpolated string field of `query`.
pub(crate) fn visit_strings(
    query: &mut PreparedQuery,
    f: &mut dyn FnMut(&mut String) -> StateResult<()>,
) -> StateResult<()> {
    let service = &mut query.service;
    f(&mut service.service)?;
    f(&mut service.near)?;
    for tag in &mut service.tags {
        f(tag)?;
    }
    for dc in &mut service.failover.datacenters {
        f(dc)?;
    }
    for value in service.node_meta.values_mut() {
        f(value)?;
    }
    Ok(())
}

/// A template validated and ready to render.
#[derive(Debug)]
pub(crate) struct CompiledTemplate {
    query: PreparedQuery,
    regexp: Option<Regex>,
}

impl CompiledTemplate {
    /// Check the regexp and every interpolation in `query`.
    pub fn compile(query: &PreparedQuery) -> StateResult<Self> {
        let regexp = match query.template.as_ref().map(|t| t.regexp.as_str()) {
            Some(re) if !re.is_empty() => Some(
                Regex::new(re).map_err(|e| StateError::InvalidTemplate(e.to_string()))?,
            ),
            _ => None,
        };

        let mut probe = query.clone();
        visit_strings(&mut probe, &mut |field| {
            for caps in INTERPOLATION.captures_iter(field) {
                Var::parse(&caps[1])?;
            }
            Ok(())
        })?;

        Ok(Self {
            query: query.clone(),
            regexp,
        })
    }

    /// Render the template for the lookup `name`.
    pub fn render(&self, name: &str) -> StateResult<PreparedQuery> {
        let prefix = self.query.name.as_str();
        let suffix = name.strip_prefix(prefix).unwrap_or_default();
        let captures: Vec<String> = match &self.regexp {
            Some(re) => re
                .captures(name)
                .map(|c| {
                    c.iter()
                        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let mut rendered = self.query.clone();
        visit_strings(&mut rendered, &mut |field| {
            let mut out = String::with_capacity(field.len());
            let mut last = 0;
            for caps in INTERPOLATION.captures_iter(field) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                out.push_str(&field[last..whole.start()]);
                let value = match Var::parse(&caps[1])? {
                    Var::Full => name,
                    Var::Prefix => prefix,
                    Var::Suffix => suffix,
                    Var::Match(n) => captures.get(n).map(String::as_str).unwrap_or_default(),
                };
                out.push_str(value);
                last = whole.end();
            }
            out.push_str(&field[last..]);
            *field = out;
            Ok(())
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueryTemplate, ServiceQuery};

    fn template(name: &str, regexp: &str, service: &str) -> PreparedQuery {
        PreparedQuery {
            id: "ee9a0aa4-a1b6-4d2e-a2cd-3cdca8b0ca4b".into(),
            name: name.into(),
            template: Some(QueryTemplate {
                regexp: regexp.into(),
                ..Default::default()
            }),
            service: ServiceQuery {
                service: service.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn renders_name_parts() {
        let mut query = template("geo-db-", "", "${name.suffix}");
        query.service.tags = vec!["${name.full}".into(), "from-${ name.prefix }".into()];
        let compiled = CompiledTemplate::compile(&query).unwrap();

        let rendered = compiled.render("geo-db-customer").unwrap();
        assert_eq!(rendered.service.service, "customer");
        assert_eq!(rendered.service.tags, vec!["geo-db-customer", "from-geo-db-"]);
    }

    #[test]
    fn renders_regexp_captures() {
        let mut query = template("geo-db-", r"^geo-db-(.*?)-([^\-]+?)$", "mysql-${match(1)}");
        query.service.failover.datacenters = vec!["dc-${match(2)}".into(), "${match(9)}".into()];
        let compiled = CompiledTemplate::compile(&query).unwrap();

        let rendered = compiled.render("geo-db-customer-primary").unwrap();
        assert_eq!(rendered.service.service, "mysql-customer");
        assert_eq!(rendered.service.failover.datacenters, vec!["dc-primary", ""]);
    }

    #[test]
    fn rejects_bad_templates() {
        let query = template("x", "(", "svc");
        assert!(matches!(
            CompiledTemplate::compile(&query),
            Err(StateError::InvalidTemplate(_))
        ));

        let query = template("x", "", "${agent.name}");
        let err = CompiledTemplate::compile(&query).unwrap_err();
        assert!(err.to_string().contains("unknown expression"));
    }

    #[test]
    fn literal_fields_pass_through() {
        let query = template("", "", "redis");
        let rendered = CompiledTemplate::compile(&query)
            .unwrap()
            .render("anything")
            .unwrap();
        assert_eq!(rendered.service.service, "redis");
    }
}
