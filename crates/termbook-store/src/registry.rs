use std::collections::HashMap;

use termbook_core::config::StoreSettings;
use termbook_core::types::CollectionName;
use termbook_core::{Error, Result};

/// Typed handle to a registered collection. `position` is registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub position: usize,
    pub name: CollectionName,
}

/// The fixed set of collections known at startup.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    handles: Vec<CollectionHandle>,
    by_name: HashMap<String, usize>,
}

impl CollectionRegistry {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut handles = Vec::new();
        let mut by_name = HashMap::new();
        for name in names {
            let name = CollectionName::new(name)?;
            if by_name.contains_key(name.as_str()) {
                return Err(Error::InvalidConfig(format!("collection '{name}' registered twice")));
            }
            by_name.insert(name.as_str().to_string(), handles.len());
            handles.push(CollectionHandle { position: handles.len(), name });
        }
        if handles.is_empty() {
            return Err(Error::InvalidConfig("no collections registered".into()));
        }
        Ok(Self { handles, by_name })
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        Self::new(&settings.collections)
    }

    pub fn resolve(&self, name: &str) -> Result<&CollectionHandle> {
        self.by_name
            .get(name)
            .map(|&i| &self.handles[i])
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionHandle> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
