//! Process-lifetime metadata storage and the SVG preview fallback.
//!
//! The store is a development stand-in for a real upload endpoint: records
//! live as long as the process and are never persisted.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use url::form_urlencoded;

pub trait MetadataStore: Send + Sync {
    /// Store `record` under a freshly generated id and return the id.
    fn put(&self, record: Value) -> String;
    fn get(&self, id: &str) -> Option<Value>;
}

/// [`MetadataStore`] backed by a `HashMap`. Ids are random v4 UUIDs, so
/// concurrent writers never need to coordinate.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<String, Value>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn put(&self, record: Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        // A poisoned lock only means another writer panicked mid-insert;
        // the map itself is still usable.
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(id.clone(), record);
        id
    }

    fn get(&self, id: &str) -> Option<Value> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }
}

fn escape_xml(text: &str) -> String {
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

/// Render the 900x900 CyberOracle preview card with `title` as subtitle.
pub fn render_preview_svg(title: &str) -> String {
    format!(
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="900" height="900" viewBox="0 0 900 900">
  <defs>
    <linearGradient id="g" x1="0" x2="1" y1="0" y2="1">
      <stop offset="0%" stop-color="#38f5b4"/>
      <stop offset="60%" stop-color="#6a7bff"/>
      <stop offset="100%" stop-color="#ff3bd4"/>
    </linearGradient>
  </defs>
  <rect width="900" height="900" fill="#0b0b10"/>
  <rect x="60" y="60" width="780" height="780" rx="32" fill="url(#g)" opacity="0.15"/>
  <rect x="90" y="90" width="720" height="720" rx="28" fill="#0f1225" stroke="rgba(255,255,255,0.2)"/>
  <text x="120" y="200" font-family="monospace" font-size="28" fill="#38f5b4">CYBERORACLE</text>
  <text x="120" y="260" font-family="monospace" font-size="20" fill="#b9c0e4">{}</text>
  <circle cx="690" cy="220" r="70" fill="#38f5b4" opacity="0.15"/>
  <circle cx="690" cy="220" r="40" fill="#ff3bd4" opacity="0.2"/>
</svg>"##,
        escape_xml(title)
    )
}

/// Percent-encode a query/URI component (RFC 3986 unreserved set kept).
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        // form encoding turns spaces into '+', which data URIs don't decode.
        .replace('+', "%20")
}

/// Synthesized metadata document for previews: no stored state involved.
pub fn preview_document(name: &str, description: &str) -> Value {
    let image = format!(
        "data:image/svg+xml;utf8,{}",
        encode_component(&render_preview_svg(name))
    );
    serde_json::json!({
        "name": name,
        "description": description,
        "image": image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_then_get_returns_equal_record() {
        let store = InMemoryMetadataStore::new();
        let record = json!({"name": "CyberOracle", "attributes": [{"trait_type": "Locale", "value": "en"}]});
        let id = store.put(record.clone());
        assert_eq!(store.get(&id), Some(record));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = InMemoryMetadataStore::new();
        store.put(json!({"a": 1}));
        assert_eq!(store.get("does-not-exist"), None);
    }

    #[test]
    fn ids_are_unique() {
        let store = InMemoryMetadataStore::new();
        let a = store.put(json!(1));
        let b = store.put(json!(1));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn svg_title_is_escaped() {
        let svg = render_preview_svg("<script>&");
        assert!(svg.contains("&lt;script&gt;&amp;"));
        assert!(!svg.contains("<script>"));
    }

    #[test]
    fn preview_image_is_inline_svg() {
        let doc = preview_document("Neon Fate", "desc");
        assert_eq!(doc["name"], "Neon Fate");
        assert_eq!(doc["description"], "desc");
        let image = doc["image"].as_str().unwrap();
        assert!(image.starts_with("data:image/svg+xml;utf8,%3C%3Fxml"));
        assert!(image.contains("Neon%20Fate"));
        assert!(!image.contains('+'));
    }
}
