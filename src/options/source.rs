use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::{Error, ErrorKind, Result};

/// Key/value lookup the options are resolved from.
pub trait ConfigSource: Send + Sync {
    /// Returns the value of `key`. Empty values are reported as unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl FromIterator<(String, String)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|value| !value.is_empty()).cloned()
    }
}

/// TOML table using the same keys as the environment:
///
/// ```toml
/// KRB_SERVICE_ACCOUNT = "svc@example.com"
/// KRB_KDC = "dc01.example.com"
/// KRB_RUN_ONCE = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSource {
    values: MapSource,
}

impl FileSource {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;

        Self::parse(&data).map_err(|err| {
            Error::new(
                ErrorKind::InvalidParameter,
                format!("{}: {}", path.display(), err.description),
            )
        })
    }

    pub fn parse(data: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(data)
            .map_err(|err| Error::new(ErrorKind::InvalidParameter, format!("invalid TOML: {}", err)))?;

        let values = table
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(value) => value,
                    other => other.to_string(),
                };

                (key, value)
            })
            .collect();

        Ok(Self { values })
    }
}

impl ConfigSource for FileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key)
    }
}

/// Asks each source in order; the first one that has the key wins.
#[derive(Default)]
pub struct Layered {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl ConfigSource for Layered {
    fn get(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|source| source.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_reads_toml() {
        let source = FileSource::parse(
            r#"
KRB_SERVICE_ACCOUNT = "svc@example.com"
KRB_RUN_ONCE = true
KRB_KDC = ""
"#,
        )
        .unwrap();

        assert_eq!(source.get("KRB_SERVICE_ACCOUNT").as_deref(), Some("svc@example.com"));
        assert_eq!(source.get("KRB_RUN_ONCE").as_deref(), Some("true"));
        assert_eq!(source.get("KRB_KDC"), None);
        assert_eq!(source.get("KRB_PASSWORD"), None);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let err = FileSource::parse("KRB_KDC = ").unwrap_err();

        assert_eq!(err.error_type, ErrorKind::InvalidParameter);
    }

    #[test]
    fn first_layer_wins() {
        let mut env = MapSource::default();
        env.insert("KRB_KDC", "env-kdc");

        let mut file = MapSource::default();
        file.insert("KRB_KDC", "file-kdc");
        file.insert("KRB_PASSWORD", "file-password");

        let layered = Layered::new().with(env).with(file);

        assert_eq!(layered.get("KRB_KDC").as_deref(), Some("env-kdc"));
        assert_eq!(layered.get("KRB_PASSWORD").as_deref(), Some("file-password"));
        assert_eq!(layered.get("KRB_SERVICE_ACCOUNT"), None);
    }
}
