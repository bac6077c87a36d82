//! Value templates with embedded `${{ ... }}` references

use crate::core::{
    condition::{Expr, Reference},
    context::InstanceContext,
    secrets::SecretString,
};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("placeholder regex is valid"))
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// A parsed template such as `cargo test ${{ matrix.features.value }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

/// A rendered parameter; secret-bearing values are kept wrapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Plain(String),
    Secret(SecretString),
}

impl ParamValue {
    /// The value handed to collaborators
    pub fn expose(&self) -> &str {
        match self {
            ParamValue::Plain(s) => s,
            ParamValue::Secret(secret) => secret.expose(),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, ParamValue::Secret(_))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Plain(s) => f.write_str(s),
            ParamValue::Secret(secret) => write!(f, "{}", secret),
        }
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in placeholder().captures_iter(source) {
            let whole = captures.get(0).expect("capture 0 always exists");
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            let expr = Expr::parse(&captures[1])?;
            segments.push(Segment::Expr(expr));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// A template with no placeholders
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            segments: vec![Segment::Text(text.clone())],
            source: text,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// References inside placeholders, paired with whether the reference is the whole placeholder
    pub fn references(&self) -> Vec<(&Reference, bool)> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Expr(expr) => Some(expr),
                Segment::Text(_) => None,
            })
            .flat_map(|expr| {
                let standalone = matches!(expr, Expr::Reference(_));
                expr.references().into_iter().map(move |r| (r, standalone))
            })
            .collect()
    }

    /// Render for a step parameter
    ///
    /// Undefined values render empty, except `env.*` references, which must
    /// resolve. `secrets.*` placeholders mark the whole value as secret.
    pub fn render(&self, ctx: &InstanceContext) -> Result<ParamValue, Reference> {
        let mut out = String::new();
        let mut secret = false;

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(Expr::Reference(Reference::Secret(name))) => {
                    if let Some(value) = ctx.secret(name) {
                        out.push_str(value.expose());
                    }
                    secret = true;
                }
                Segment::Expr(Expr::Reference(reference @ Reference::Env(_))) => {
                    let value = ctx.lookup(reference).ok_or_else(|| reference.clone())?;
                    out.push_str(&value.to_string());
                }
                Segment::Expr(expr) => {
                    if let Some(value) = expr.value(ctx) {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }

        if secret {
            Ok(ParamValue::Secret(SecretString::new(out)))
        } else {
            Ok(ParamValue::Plain(out))
        }
    }

    /// Render for display; nothing fails and secrets never appear
    pub fn render_lossy(&self, ctx: &InstanceContext) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.clone(),
                Segment::Expr(Expr::Reference(Reference::Secret(_))) => "***".to_string(),
                Segment::Expr(expr) => expr.value(ctx).map(|v| v.to_string()).unwrap_or_default(),
            })
            .collect()
    }
}
