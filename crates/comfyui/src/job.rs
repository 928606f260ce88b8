//! Job-level value types shared by the client and the poll loop.

use std::fmt;

use serde_json::Value;

/// Identifier ComfyUI assigns to a queued prompt (`prompt_id`).
///
/// Valid for one poll sequence; a new submission always yields a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self(prompt_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a job as seen in one history response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Known to the server but not finished (or finished without success).
    Pending,
    /// Finished; the first image of the output node is ready to fetch.
    Completed(ArtifactReference),
    /// The handle is not (yet) present in the history store.
    NotFound,
}

/// Descriptor of a rendered file, as returned in `outputs.<node>.images[]`.
///
/// Typically `filename`, `subfolder` and `type`. Order is preserved so the
/// `/view` query string matches what ComfyUI sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactReference {
    fields: Vec<(String, String)>,
}

impl ArtifactReference {
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build from one entry of an `images` array. Non-string scalars are
    /// stringified; returns `None` if the entry is not an object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            fields: obj
                .iter()
                .map(|(key, val)| {
                    let rendered = match val {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn filename(&self) -> Option<&str> {
        self.get("filename")
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Container format of a fetched artifact. ComfyUI's SaveImage emits PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Png,
}

impl SourceFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Png => "PNG",
        }
    }
}

/// Bytes downloaded from `/view`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
}

impl RawArtifact {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            format: SourceFormat::Png,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reference_from_json_keeps_field_order_and_stringifies() {
        let reference = ArtifactReference::from_json(&json!({
            "filename": "ComfyUI_00001_.png",
            "subfolder": "",
            "type": "output",
            "index": 0
        }))
        .unwrap();

        assert_eq!(reference.filename(), Some("ComfyUI_00001_.png"));
        assert_eq!(reference.get("index"), Some("0"));
        let keys: Vec<_> = reference.pairs().map(|(k, _)| k).collect();
        assert_eq!(keys, ["filename", "subfolder", "type", "index"]);
    }

    #[test]
    fn reference_from_non_object_is_none() {
        assert!(ArtifactReference::from_json(&json!("out.png")).is_none());
    }
}
