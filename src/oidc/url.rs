//! Query-string merging for provider endpoint URLs

use url::{Url, form_urlencoded};

/// Append `params` to `url`, merging with any query string it already has.
///
/// Existing `key=value` pairs are decoded and kept in their original order;
/// pairs without a `=` are dropped. A new param replaces a same-named
/// existing one in place, otherwise it is appended. Scheme-relative URLs
/// (`//host/path`) default to `https`. URLs without a host are returned as
/// `url?params` untouched. The fragment, if any, is dropped.
pub fn build_url<K, V>(url: &str, params: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let normalized = if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    };

    let parsed = match Url::parse(&normalized) {
        Ok(parsed) if parsed.host_str().is_some() => parsed,
        _ => {
            let mut query = Vec::new();
            for (key, value) in params {
                upsert(&mut query, key.as_ref(), value.as_ref());
            }
            return format!("{}?{}", url.trim_matches('?'), encode(&query));
        }
    };

    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
    let base = format!(
        "{}://{}{port}{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default(),
        explicit_path(&normalized, &parsed)
    );

    let mut query = parsed.query().map(existing_pairs).unwrap_or_default();
    for (key, value) in params {
        upsert(&mut query, key.as_ref(), value.as_ref());
    }

    format!("{base}?{}", encode(&query))
}

/// `Url` always reports `/` for an empty path on http(s); keep it empty
/// when the input had no path at all.
fn explicit_path<'a>(raw: &str, parsed: &'a Url) -> &'a str {
    let after_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority_and_path = after_scheme.split(['?', '#']).next().unwrap_or_default();

    if parsed.path() == "/" && !authority_and_path.contains('/') {
        ""
    } else {
        parsed.path()
    }
}

fn existing_pairs(query: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for raw in query.split('&') {
        if !raw.contains('=') {
            continue;
        }
        if let Some((key, value)) = form_urlencoded::parse(raw.as_bytes()).next() {
            upsert(&mut pairs, &key, &value);
        }
    }
    pairs
}

fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(slot) = pairs.iter_mut().find(|(existing, _)| existing == key) {
        slot.1 = value.to_string();
    } else {
        pairs.push((key.to_string(), value.to_string()));
    }
}

fn encode(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
