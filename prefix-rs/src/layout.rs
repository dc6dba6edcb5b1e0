//! Layout records, loaders, and the per-interpreter registry.
//!
//! A layout is fetched from a [`Loader`] on first use and cached for the
//! lifetime of the interpreter.  Layouts defined inside scripts with `=name:`
//! go straight into the cache.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// A named layout and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutRecord {
    pub name: String,
    pub content: String,
    /// Shown in diagnostics instead of `name` when set.
    pub display_name: Option<String>,
    /// Layout (or source) that defined this one.
    pub parent_name: Option<String>,
    /// Where in the parent it was defined (line number, file label, …).
    pub defining_id: Option<String>,
}

impl LayoutRecord {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        LayoutRecord {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// `display_name [#parent][/id]`, used as the diagnostic context marker.
    pub fn marker(&self) -> String {
        let mut s = self.display_name.clone().unwrap_or_else(|| self.name.clone());
        if let Some(p) = &self.parent_name {
            s.push_str(" #");
            s.push_str(p);
        }
        if let Some(id) = &self.defining_id {
            s.push('/');
            s.push_str(id);
        }
        s
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read layout {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("layout file {0} is not valid UTF-8")]
    Encoding(PathBuf),
}

// ── Loader ────────────────────────────────────────────────────────────────────

/// Source of layouts not defined inline.
///
/// `Ok(None)` means "no such layout"; it is not cached, so a later call may
/// find it.
pub trait Loader {
    fn load(&mut self, name: &str) -> Result<Option<LayoutRecord>, LoadError>;
}

impl<F> Loader for F
where
    F: FnMut(&str) -> Option<LayoutRecord>,
{
    fn load(&mut self, name: &str) -> Result<Option<LayoutRecord>, LoadError> {
        Ok(self(name))
    }
}

/// In-memory layouts.
#[derive(Debug, Default, Clone)]
pub struct MapLoader {
    layouts: HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.layouts.insert(name.into(), content.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapLoader {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapLoader {
            layouts: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Loader for MapLoader {
    fn load(&mut self, name: &str) -> Result<Option<LayoutRecord>, LoadError> {
        Ok(self
            .layouts
            .get(name)
            .map(|content| LayoutRecord::new(name, content.clone())))
    }
}

/// Layouts stored as `<dir>/<name><extension>` files.
#[derive(Debug, Clone)]
pub struct DirLoader {
    dir: PathBuf,
    extension: String,
    label: Option<String>,
}

impl DirLoader {
    pub const DEFAULT_EXTENSION: &'static str = ".layout";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirLoader {
            dir: dir.into(),
            extension: Self::DEFAULT_EXTENSION.to_owned(),
            label: None,
        }
    }

    /// File name suffix, including the dot.  May be empty.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    /// Recorded as the defining id of every loaded layout.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `name`, or `None` if the name would escape the directory.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        if name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.dir.join(format!("{name}{}", self.extension)))
    }
}

impl Loader for DirLoader {
    fn load(&mut self, name: &str) -> Result<Option<LayoutRecord>, LoadError> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LoadError::Io { path, source }),
        };
        let content = String::from_utf8(bytes).map_err(|_| LoadError::Encoding(path.clone()))?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_owned());
        Ok(Some(LayoutRecord {
            name: name.to_owned(),
            content,
            display_name: Some(file_name),
            parent_name: Some(self.dir.display().to_string()),
            defining_id: self.label.clone(),
        }))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Cache of layouts in front of a [`Loader`].
pub struct Registry {
    cache: HashMap<String, LayoutRecord>,
    loader: Box<dyn Loader>,
    /// Marker of the most recently loaded layout.
    context: String,
}

impl Registry {
    pub fn new(loader: Box<dyn Loader>) -> Self {
        Registry {
            cache: HashMap::new(),
            loader,
            context: String::new(),
        }
    }

    /// Content of `name`, loading and caching it on first use.
    pub fn get(&mut self, name: &str) -> Result<Option<String>, LoadError> {
        Ok(self.record(name)?.map(|r| r.content.clone()))
    }

    /// Full record of `name`, loading and caching it on first use.
    pub fn record(&mut self, name: &str) -> Result<Option<&LayoutRecord>, LoadError> {
        if !self.cache.contains_key(name) {
            let Some(record) = self.loader.load(name)? else {
                return Ok(None);
            };
            debug!(layout = name, bytes = record.content.len(), "loaded layout");
            self.context = record.marker();
            self.cache.insert(name.to_owned(), record);
        }
        Ok(self.cache.get(name))
    }

    /// Cached record, without consulting the loader.
    pub fn cached(&self, name: &str) -> Option<&LayoutRecord> {
        self.cache.get(name)
    }

    /// Register or overwrite a layout.
    pub fn define(&mut self, record: LayoutRecord) {
        debug!(layout = %record.name, "defined layout");
        self.cache.insert(record.name.clone(), record);
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn set_loader(&mut self, loader: Box<dyn Loader>) {
        self.loader = loader;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(Box::new(MapLoader::new()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
