//! Parameter names, tagged values and job specifications

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SweepError, SweepResult};
use crate::template;

/// Escape table for parameter names: `(original, code)`. An original character
/// is stored as `_` followed by its code, which keeps stored names inside
/// `[A-Za-z0-9_]` while remaining reversible.
const NAME_ESCAPES: &[(char, char)] = &[('_', '_'), ('.', 'd'), ('-', 'h'), ('/', 's'), (':', 'c')];

/// Map a parameter name to its stored form.
pub fn escape_name(name: &str) -> SweepResult<String> {
    if name.is_empty() {
        return Err(SweepError::Config("parameter name must not be empty".to_string()));
    }

    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            escaped.push(c);
            continue;
        }
        match NAME_ESCAPES.iter().find(|(original, _)| *original == c) {
            Some((_, code)) => {
                escaped.push('_');
                escaped.push(*code);
            }
            None => {
                return Err(SweepError::Config(format!(
                    "parameter name '{}' contains unsupported character '{}'",
                    name, c
                )))
            }
        }
    }
    Ok(escaped)
}

/// Map a stored name back to the original. Returns `None` for malformed input.
pub fn unescape_name(escaped: &str) -> Option<String> {
    let mut name = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '_' {
            name.push(c);
            continue;
        }
        let code = chars.next()?;
        let (original, _) = NAME_ESCAPES.iter().find(|(_, to)| *to == code)?;
        name.push(*original);
    }
    Some(name)
}

/// Parameter name in its escaped storage form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey(String);

impl ParamKey {
    /// Create a key from an original parameter name
    pub fn new(name: &str) -> SweepResult<Self> {
        escape_name(name).map(Self)
    }

    /// Stored (escaped) form
    pub fn escaped(&self) -> &str {
        &self.0
    }

    /// Original parameter name
    pub fn name(&self) -> String {
        // Keys are only built through `escape_name`, so decoding cannot fail.
        unescape_name(&self.0).unwrap_or_else(|| self.0.clone())
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Value bound to a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    /// Single value emitted as `--name value`
    Scalar(String),
    /// Several values emitted as `--name a b c`
    List(Vec<String>),
    /// Presence flag emitted as `--name` when true
    Flag(bool),
    /// Template waiting for its placeholders to be bound
    Deferred(String),
}

impl ParamValue {
    pub fn scalar(value: impl ToString) -> Self {
        ParamValue::Scalar(value.to_string())
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        ParamValue::List(items.into_iter().map(|i| i.to_string()).collect())
    }

    /// Text value; becomes `Deferred` when it contains placeholders
    pub fn text(value: &str) -> Self {
        if template::has_placeholders(value) {
            ParamValue::Deferred(value.to_string())
        } else {
            ParamValue::Scalar(value.to_string())
        }
    }

    /// Convert a TOML value from a sweep file
    pub fn from_toml(value: &toml::Value) -> SweepResult<Self> {
        match value {
            toml::Value::String(s) => Ok(ParamValue::text(s)),
            toml::Value::Boolean(b) => Ok(ParamValue::Flag(*b)),
            toml::Value::Array(items) => items
                .iter()
                .map(scalar_text)
                .collect::<SweepResult<Vec<_>>>()
                .map(ParamValue::List),
            toml::Value::Table(_) => Err(SweepError::Config(
                "tables are not valid parameter values".to_string(),
            )),
            other => scalar_text(other).map(ParamValue::Scalar),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ParamValue::Deferred(_))
    }

    /// Text form of a bound value, `None` while deferred
    pub fn render(&self) -> Option<String> {
        match self {
            ParamValue::Scalar(s) => Some(s.clone()),
            ParamValue::List(items) => Some(items.join(" ")),
            ParamValue::Flag(b) => Some(b.to_string()),
            ParamValue::Deferred(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Deferred(t) => write!(f, "{}", t),
            other => write!(f, "{}", other.render().unwrap_or_default()),
        }
    }
}

fn scalar_text(value: &toml::Value) -> SweepResult<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(SweepError::Config(format!(
            "nested value '{}' is not a valid list element",
            value
        ))),
    }
}

/// Ordered parameter bindings of a single sweep point
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSpec {
    params: Vec<(ParamKey, ParamValue)>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the shared base configuration from a TOML table
    pub fn from_toml(table: &toml::Table) -> SweepResult<Self> {
        let mut spec = Self::new();
        for (name, value) in table {
            spec.bind(name, ParamValue::from_toml(value)?)?;
        }
        Ok(spec)
    }

    /// Bind a value by original name, replacing any earlier binding in place
    pub fn bind(&mut self, name: &str, value: ParamValue) -> SweepResult<()> {
        let key = ParamKey::new(name)?;
        self.bind_key(key, value);
        Ok(())
    }

    pub fn bind_key(&mut self, key: ParamKey, value: ParamValue) {
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        let key = ParamKey::new(name).ok()?;
        self.params.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Rendered value of a bound, non-deferred parameter
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).and_then(ParamValue::render)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k, v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&ParamKey, &mut ParamValue)> {
        self.params.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Names of parameters that are still deferred
    pub fn deferred_names(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|(_, v)| v.is_deferred())
            .map(|(k, _)| k.name())
            .collect()
    }

    /// `name=value` lines for every bound parameter, in binding order
    pub fn arguments_record(&self) -> String {
        let mut record = String::new();
        for (key, value) in &self.params {
            if let Some(rendered) = value.render() {
                record.push_str(&key.name());
                record.push('=');
                record.push_str(&rendered);
                record.push('\n');
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        for name in ["lr", "lr.warmup", "batch_size", "a-b/c:d", "x__y.z"] {
            let escaped = escape_name(name).unwrap();
            assert!(escaped.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            assert_eq!(unescape_name(&escaped).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_escape_is_injective() {
        assert_ne!(escape_name("a_d").unwrap(), escape_name("a.").unwrap());
        assert_eq!(escape_name("lr.warmup").unwrap(), "lr_dwarmup");
    }

    #[test]
    fn test_escape_rejects_unsupported() {
        assert!(escape_name("lr warmup").is_err());
        assert!(escape_name("").is_err());
        assert_eq!(unescape_name("bad_"), None);
    }

    #[test]
    fn test_bind_replaces_in_place() {
        let mut spec = JobSpec::new();
        spec.bind("lr", ParamValue::scalar(0.1)).unwrap();
        spec.bind("seed", ParamValue::scalar(0)).unwrap();
        spec.bind("lr", ParamValue::scalar(0.01)).unwrap();

        let names: Vec<String> = spec.iter().map(|(k, _)| k.name()).collect();
        assert_eq!(names, vec!["lr", "seed"]);
        assert_eq!(spec.lookup("lr").as_deref(), Some("0.01"));
    }

    #[test]
    fn test_text_detects_templates() {
        assert_eq!(ParamValue::text("adam"), ParamValue::Scalar("adam".to_string()));
        assert!(ParamValue::text("{root}/logs").is_deferred());
    }

    #[test]
    fn test_from_toml() {
        let table: toml::Table = toml::from_str(
            r#"
lr = 0.001
epochs = 164
resume = true
lr_decay_at = [82, 123]
log_dir = "{root_folder}/logs"
"#,
        )
        .unwrap();
        let spec = JobSpec::from_toml(&table).unwrap();

        assert_eq!(spec.get("lr"), Some(&ParamValue::Scalar("0.001".to_string())));
        assert_eq!(spec.get("epochs"), Some(&ParamValue::Scalar("164".to_string())));
        assert_eq!(spec.get("resume"), Some(&ParamValue::Flag(true)));
        assert_eq!(spec.get("lr_decay_at"), Some(&ParamValue::list([82, 123])));
        assert!(spec.get("log_dir").unwrap().is_deferred());
        assert_eq!(spec.deferred_names(), vec!["log_dir"]);
    }

    #[test]
    fn test_arguments_record() {
        let mut spec = JobSpec::new();
        spec.bind("lr.warmup", ParamValue::scalar(100)).unwrap();
        spec.bind("milestones", ParamValue::list([1, 2])).unwrap();
        spec.bind("amp", ParamValue::Flag(false)).unwrap();
        spec.bind("out", ParamValue::text("{missing}")).unwrap();

        assert_eq!(
            spec.arguments_record(),
            "lr.warmup=100\nmilestones=1 2\namp=false\n"
        );
    }
}
