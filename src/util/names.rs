//! Prometheus identifier helpers.
//!
//! CloudWatch namespaces, metric names and dimension names allow characters
//! that are not valid in Prometheus metric or label names.

/// Check whether `name` is a valid Prometheus metric name
/// (`[a-zA-Z_:][a-zA-Z0-9_:]*`).
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Rewrite `name` into a valid Prometheus label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
///
/// Invalid characters become `_`; a leading digit gets a `_` prefix.
pub fn sanitize_label_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    for (i, c) in name.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            out.push('_');
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Derive an exported metric name from a namespace and a CloudWatch metric name.
///
/// `AWS/EC2` + `CPUUtilization` becomes `aws_ec2_cpuutilization`.
pub fn derive_metric_name(namespace: &str, metric_name: &str) -> String {
    let joined = if namespace.is_empty() {
        metric_name.to_string()
    } else {
        format!("{}_{}", namespace, metric_name)
    };

    let mut out = String::with_capacity(joined.len());
    let mut last_underscore = false;
    for c in joined.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}
