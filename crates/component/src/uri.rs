//! `{param}` URI templates for resource templates.

use std::collections::HashMap;

/// Match `uri` against `template`, returning the extracted parameters.
///
/// A placeholder matches one or more characters up to the next literal
/// segment of the template; it never matches `/`.
pub fn match_uri_template(uri: &str, template: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut rest_uri = uri;
    let mut rest_tpl = template;

    while !rest_tpl.is_empty() {
        match rest_tpl.find('{') {
            Some(0) => {
                let close = rest_tpl.find('}')?;
                let name = &rest_tpl[1..close];
                rest_tpl = &rest_tpl[close + 1..];

                // The literal that follows bounds the value.
                let literal_end = rest_tpl.find('{').unwrap_or(rest_tpl.len());
                let literal = &rest_tpl[..literal_end];
                let value_end = if literal.is_empty() {
                    rest_uri.len()
                } else {
                    rest_uri.find(literal)?
                };
                let value = &rest_uri[..value_end];
                if value.is_empty() || value.contains('/') {
                    return None;
                }
                params.insert(name.to_string(), value.to_string());
                rest_uri = &rest_uri[value_end..];
            }
            Some(idx) => {
                let literal = &rest_tpl[..idx];
                rest_uri = rest_uri.strip_prefix(literal)?;
                rest_tpl = &rest_tpl[idx..];
            }
            None => {
                rest_uri = rest_uri.strip_prefix(rest_tpl)?;
                rest_tpl = "";
            }
        }
    }

    rest_uri.is_empty().then_some(params)
}

/// Substitute `{param}` placeholders; unknown placeholders are left as-is.
pub fn expand_uri_template(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close_rel) => {
                let close = open + close_rel;
                let name = &rest[open + 1..close];
                match params.get(name) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&rest[open..=close]),
                }
                rest = &rest[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
