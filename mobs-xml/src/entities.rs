//! XML entity decoding: the five predefined entities, numeric character
//! references, and a small internal-subset `<!ENTITY>` table parsed out of
//! an optional `DOCTYPE` (§4.3 "declared ENTITY tokens").

use std::collections::HashMap;

use crate::error::XmlError;

/// Decode `&amp;`-style references in `text` using the predefined entities
/// plus any caller-supplied declarations.
pub fn decode(text: &str, declared: &HashMap<String, String>) -> Result<String, XmlError> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'&' {
            let ch_len = text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
            continue;
        }
        let end = text[i..].find(';').map(|p| i + p).ok_or_else(|| {
            XmlError::Malformed("unterminated entity reference".to_string())
        })?;
        let body = &text[i + 1..end];
        let resolved = resolve_one(body, declared)?;
        out.push_str(&resolved);
        i = end + 1;
    }
    Ok(out)
}

fn resolve_one(body: &str, declared: &HashMap<String, String>) -> Result<String, XmlError> {
    match body {
        "lt" => return Ok("<".to_string()),
        "gt" => return Ok(">".to_string()),
        "amp" => return Ok("&".to_string()),
        "quot" => return Ok("\"".to_string()),
        "apos" => return Ok("'".to_string()),
        _ => {}
    }
    if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        let cp = u32::from_str_radix(hex, 16)
            .map_err(|_| XmlError::Malformed(format!("bad numeric char ref &#x{hex};")))?;
        return char::from_u32(cp)
            .map(|c| c.to_string())
            .ok_or_else(|| XmlError::Malformed(format!("invalid code point &#x{hex};")));
    }
    if let Some(dec) = body.strip_prefix('#') {
        let cp = dec
            .parse::<u32>()
            .map_err(|_| XmlError::Malformed(format!("bad numeric char ref &#{dec};")))?;
        return char::from_u32(cp)
            .map(|c| c.to_string())
            .ok_or_else(|| XmlError::Malformed(format!("invalid code point &#{dec};")));
    }
    declared
        .get(body)
        .cloned()
        .ok_or_else(|| XmlError::Malformed(format!("unknown entity &{body};")))
}

/// Escape `text` for use between tags or inside a quoted attribute value.
pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_predefined_entities() {
        let d = HashMap::new();
        assert_eq!(decode("a &lt;b&gt; &amp; c", &d).unwrap(), "a <b> & c");
    }

    #[test]
    fn decodes_numeric_refs() {
        let d = HashMap::new();
        assert_eq!(decode("&#65;&#x42;", &d).unwrap(), "AB");
    }

    #[test]
    fn decodes_declared_entity() {
        let mut d = HashMap::new();
        d.insert("co".to_string(), "Company Name".to_string());
        assert_eq!(decode("&co;", &d).unwrap(), "Company Name");
    }

    #[test]
    fn rejects_unknown_entity() {
        let d = HashMap::new();
        assert!(decode("&bogus;", &d).is_err());
    }

    #[test]
    fn encode_roundtrips_through_decode() {
        let d = HashMap::new();
        let raw = "<tag attr=\"a & b\">";
        assert_eq!(decode(&encode(raw), &d).unwrap(), raw);
    }
}
