use std::io::Read;

use serde::Deserialize;

use crate::error::{MigrateError, Result};

/// A session cookie forwarded on every download request.
#[derive(Debug, Clone, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Renders cookies as a single `Cookie` request-header value.
pub fn header_value(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(Cookie::pair)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Loads cookies from a JSON array of `{"name": .., "value": ..}` objects,
/// e.g. as exported by browser devtools.
pub fn load_from_json<R: Read>(reader: R) -> Result<Vec<Cookie>> {
    let cookies: Vec<Cookie> = serde_json::from_reader(reader)?;
    Ok(cookies)
}

/// Loads cookies from `name=value; name2=value2` text, the raw header form.
pub fn load_from_text<R: Read>(mut reader: R) -> Result<Vec<Cookie>> {
    let mut data = String::new();
    reader.read_to_string(&mut data)?;

    let mut cookies = Vec::new();
    for part in data.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| MigrateError::InvalidCookie(part.to_string()))?;
        cookies.push(Cookie {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(cookies)
}
