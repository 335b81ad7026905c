//! Placeholder templates over job bindings
//!
//! Templates use `{name}` placeholders. Resolution is all-or-nothing: when a
//! referenced name is not bound yet the template comes back unchanged, so it
//! can be retried once the binding arrives.

use tracing::debug;

use crate::param::{JobSpec, ParamValue};

/// A single `{name}` occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

fn scan(template: &str) -> Vec<Placeholder<'_>> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(open) = template[offset..].find('{') {
        let start = offset + open;
        let rest = &template[start + 1..];
        let close = rest.find(|c: char| c == '{' || c == '}');

        match close {
            Some(idx) if rest.as_bytes()[idx] == b'}' => {
                let name = &rest[..idx];
                if !name.is_empty() && !name.chars().any(char::is_whitespace) {
                    found.push(Placeholder {
                        start,
                        end: start + 1 + idx + 1,
                        name,
                    });
                }
                offset = start + 1 + idx + 1;
            }
            Some(idx) => offset = start + 1 + idx,
            None => break,
        }
    }

    found
}

/// Whether `template` references any placeholder
pub fn has_placeholders(template: &str) -> bool {
    !scan(template).is_empty()
}

/// Names referenced by `template`, in order of appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    scan(template).into_iter().map(|p| p.name).collect()
}

/// Substitute every placeholder from `bindings`, or return `template`
/// unchanged if any referenced name is unbound or still deferred.
pub fn resolve(template: &str, bindings: &JobSpec) -> String {
    let found = scan(template);
    if found.is_empty() {
        return template.to_string();
    }

    let mut values = Vec::with_capacity(found.len());
    for placeholder in &found {
        match bindings.lookup(placeholder.name) {
            Some(value) => values.push(value),
            None => {
                debug!(
                    template = template,
                    missing = placeholder.name,
                    "Deferring template resolution"
                );
                return template.to_string();
            }
        }
    }

    let mut resolved = String::with_capacity(template.len());
    let mut cursor = 0;
    for (placeholder, value) in found.iter().zip(values) {
        resolved.push_str(&template[cursor..placeholder.start]);
        resolved.push_str(&value);
        cursor = placeholder.end;
    }
    resolved.push_str(&template[cursor..]);
    resolved
}

/// Resolve deferred values in `spec` until no more progress is possible.
///
/// Returns the names that are still deferred afterwards.
pub fn resolve_deferred(spec: &mut JobSpec) -> Vec<String> {
    loop {
        let pending: Vec<(String, String)> = spec
            .iter()
            .filter_map(|(key, value)| match value {
                ParamValue::Deferred(t) => Some((key.name(), t.clone())),
                _ => None,
            })
            .collect();

        let mut progressed = false;
        for (name, template) in pending {
            let resolved = resolve(&template, spec);
            if resolved != template {
                if let Some((_, slot)) = spec.iter_mut().find(|(k, _)| k.name() == name) {
                    *slot = ParamValue::Scalar(resolved);
                    progressed = true;
                }
            }
        }

        if !progressed {
            return spec.deferred_names();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> JobSpec {
        let mut spec = JobSpec::new();
        for (name, value) in pairs {
            spec.bind(name, ParamValue::text(value)).unwrap();
        }
        spec
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders("optim={optim}-seed={seed}"), vec!["optim", "seed"]);
        assert_eq!(placeholders("{lr.warmup}"), vec!["lr.warmup"]);
        assert!(placeholders("no {braces here} {} {").is_empty());
        assert_eq!(placeholders("{{a}"), vec!["a"]);
    }

    #[test]
    fn test_resolve_all_bound() {
        let b = bindings(&[("optim", "kmfac"), ("seed", "3")]);
        assert_eq!(resolve("optim={optim}-seed={seed}", &b), "optim=kmfac-seed=3");
    }

    #[test]
    fn test_resolve_missing_returns_template() {
        let b = bindings(&[("optim", "kmfac")]);
        assert_eq!(resolve("{optim}-{seed}", &b), "{optim}-{seed}");
    }

    #[test]
    fn test_resolve_deferred_binding_is_not_bound() {
        let b = bindings(&[("root", "{base}/x")]);
        assert_eq!(resolve("{root}/logs", &b), "{root}/logs");
    }

    #[test]
    fn test_resolve_idempotent() {
        let b = bindings(&[("optim", "sgd"), ("lr", "0.1")]);
        for template in ["{optim}-{lr}", "{optim}-{seed}", "plain", "{lr}{lr}"] {
            let once = resolve(template, &b);
            assert_eq!(resolve(&once, &b), once);
        }
    }

    #[test]
    fn test_resolve_renders_lists_and_flags() {
        let mut b = JobSpec::new();
        b.bind("milestones", ParamValue::list([82, 123])).unwrap();
        b.bind("amp", ParamValue::Flag(true)).unwrap();
        assert_eq!(resolve("m={milestones} amp={amp}", &b), "m=82 123 amp=true");
    }

    #[test]
    fn test_resolve_deferred_chain() {
        let mut spec = JobSpec::new();
        spec.bind("logs", ParamValue::text("{out}/logs")).unwrap();
        spec.bind("out", ParamValue::text("{root}/out")).unwrap();
        spec.bind("ckpt", ParamValue::text("{nowhere}")).unwrap();
        spec.bind("root", ParamValue::text("/exp/a")).unwrap();

        let unresolved = resolve_deferred(&mut spec);

        assert_eq!(spec.lookup("out").as_deref(), Some("/exp/a/out"));
        assert_eq!(spec.lookup("logs").as_deref(), Some("/exp/a/out/logs"));
        assert_eq!(unresolved, vec!["ckpt"]);
    }
}
