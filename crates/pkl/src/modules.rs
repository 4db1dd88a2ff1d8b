//! Module URI resolution and loading.
//!
//! Readers are selected by URI scheme. The loader performs resolution
//! (relative references, triple-dot hierarchical search, glob expansion)
//! and byte fetching; caching of *evaluated* modules is the evaluator's
//! job, keyed by canonical URI.

use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;
use sha2::{Digest, Sha256};

use crate::{
    classes::ClassId,
    errors::{ErrorKind, EvalError, EvalResult},
    glob::{GlobPattern, has_wildcards, segment_has_wildcards},
    heap::ObjId,
    intern::StringId,
    prepare::PreparedImport,
    syntax::ResolvedTypeRef,
};

/// Index into the evaluator's module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    /// The synthetic REPL module registered at evaluator start-up.
    pub(crate) const REPL: Self = Self(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One loaded module: source, identity, and (once constructed) its object.
#[derive(Debug)]
pub(crate) struct ModuleRecord {
    pub uri: Rc<str>,
    pub name: String,
    pub source: Rc<str>,
    /// The module object; `None` while the module is being evaluated, which
    /// doubles as the import-cycle signal.
    pub obj: Option<ObjId>,
    /// The module's implicit class, once prepared.
    pub class: Option<ClassId>,
    /// Classes and typealiases declared by the module, for lazy type-name
    /// resolution.
    pub type_names: AHashMap<StringId, ResolvedTypeRef>,
    /// Resolved import table, in declaration order.
    pub imports: Vec<PreparedImport>,
}

// ---- URI helpers ----

/// The scheme of a URI, if it has one.
pub(crate) fn scheme_of(uri: &str) -> Option<&str> {
    let colon = uri.find(':')?;
    let scheme = &uri[..colon];
    if !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
    {
        Some(scheme)
    } else {
        None
    }
}

/// Splits a hierarchical URI into `(prefix, path)` where `path` starts at
/// the first `/` after the authority. `package:` URIs keep their fragment
/// path.
fn split_path(uri: &str) -> (String, String) {
    if let Some(hash) = uri.find("#/") {
        return (uri[..hash + 1].to_owned(), uri[hash + 1..].to_owned());
    }
    let after_scheme = scheme_of(uri).map_or(0, |s| s.len() + 1);
    let rest = &uri[after_scheme..];
    let (authority_len, path_rest) = if let Some(stripped) = rest.strip_prefix("//") {
        match stripped.find('/') {
            Some(i) => (2 + i, &stripped[i..]),
            None => (rest.len(), ""),
        }
    } else {
        (0, rest)
    };
    (
        uri[..after_scheme + authority_len].to_owned(),
        path_rest.to_owned(),
    )
}

/// Collapses `.` and `..` segments.
fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    out
}

/// Resolves a reference against a base URI.
///
/// Absolute references (with a scheme) pass through; `/`-rooted references
/// replace the base path; everything else resolves relative to the base's
/// directory.
pub(crate) fn resolve_uri(base: &str, reference: &str) -> String {
    if scheme_of(reference).is_some() {
        return reference.to_owned();
    }
    let (prefix, base_path) = split_path(base);
    if let Some(rooted) = reference.strip_prefix('/') {
        return format!("{prefix}/{}", normalize_path(rooted));
    }
    let dir = match base_path.rfind('/') {
        Some(i) => &base_path[..=i],
        None => "",
    };
    format!("{prefix}{}", normalize_path(&format!("{dir}{reference}")))
}

/// The directory URI containing this URI, without a trailing slash;
/// `None` at the hierarchy root.
pub(crate) fn parent_dir(uri: &str) -> Option<String> {
    let (prefix, path) = split_path(uri);
    let slash = path.rfind('/')?;
    if slash == 0 {
        if path.len() == 1 {
            return None;
        }
        return Some(format!("{prefix}/"));
    }
    Some(format!("{prefix}{}", &path[..slash]))
}

/// Converts a `file:` URI to a filesystem path.
pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file:")?;
    let path = if let Some(after) = rest.strip_prefix("//") {
        let slash = after.find('/')?;
        let authority = &after[..slash];
        if !(authority.is_empty() || authority == "localhost") {
            return None;
        }
        &after[slash..]
    } else {
        rest
    };
    Some(PathBuf::from(path))
}

/// Converts a filesystem path to a `file:` URI.
#[must_use]
pub fn path_to_file_uri(path: &Path) -> String {
    let mut out = String::from("file://");
    let text = path.to_string_lossy();
    if !text.starts_with('/') {
        out.push('/');
    }
    out.push_str(&text);
    out
}

// ---- readers ----

/// A directory listing entry used by glob resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A source of module text, selected by URI scheme.
pub trait ModuleReader: std::fmt::Debug {
    /// The scheme this reader serves, without the trailing colon.
    fn scheme(&self) -> &str;

    /// Fetches the module source for a canonical URI of this scheme.
    fn read(&self, uri: &str) -> Result<String, String>;

    /// Whether the URI names an existing module, without reading it.
    fn exists(&self, uri: &str) -> bool {
        self.read(uri).is_ok()
    }

    /// Lists the children of a directory URI, for glob expansion.
    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        let _ = dir_uri;
        Err(format!("scheme `{}` does not support globbing", self.scheme()))
    }

    fn supports_globbing(&self) -> bool {
        false
    }
}

/// `file:` reader over the local filesystem.
#[derive(Debug, Default)]
pub(crate) struct FileModuleReader;

pub(crate) fn file_read(uri: &str) -> Result<Vec<u8>, String> {
    let path = file_uri_to_path(uri).ok_or_else(|| format!("not a local file URI: `{uri}`"))?;
    fs::read(&path).map_err(|err| io_message(&path, &err))
}

pub(crate) fn file_list(dir_uri: &str) -> Result<Vec<ListEntry>, String> {
    let path = file_uri_to_path(dir_uri).ok_or_else(|| format!("not a local file URI: `{dir_uri}`"))?;
    let mut entries = Vec::new();
    let dir = fs::read_dir(&path).map_err(|err| io_message(&path, &err))?;
    for entry in dir {
        let entry = entry.map_err(|err| io_message(&path, &err))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push(ListEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }
    Ok(entries)
}

fn io_message(path: &Path, err: &io::Error) -> String {
    format!("{}: {err}", path.display())
}

impl ModuleReader for FileModuleReader {
    fn scheme(&self) -> &str {
        "file"
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        let bytes = file_read(uri)?;
        String::from_utf8(bytes).map_err(|_| format!("module `{uri}` is not valid UTF-8"))
    }

    fn exists(&self, uri: &str) -> bool {
        file_uri_to_path(uri).is_some_and(|p| p.is_file())
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        file_list(dir_uri)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

/// `http:`/`https:` reader.
#[derive(Debug, Default)]
pub(crate) struct HttpModuleReader {
    https: bool,
}

impl HttpModuleReader {
    pub(crate) fn new(https: bool) -> Self {
        Self { https }
    }
}

pub(crate) fn http_fetch(uri: &str) -> Result<Vec<u8>, String> {
    let response = ureq::get(uri).call().map_err(|err| format!("{uri}: {err}"))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|err| format!("{uri}: {err}"))?;
    Ok(bytes)
}

impl ModuleReader for HttpModuleReader {
    fn scheme(&self) -> &str {
        if self.https { "https" } else { "http" }
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        let bytes = http_fetch(uri)?;
        String::from_utf8(bytes).map_err(|_| format!("module `{uri}` is not valid UTF-8"))
    }
}

/// `pkl:` reader serving the embedded standard library.
#[derive(Debug, Default)]
pub(crate) struct StdlibReader;

/// The `pkl:base` module source. Core classes and methods are native; this
/// declares the surface that is genuinely written in Pkl.
const PKL_BASE: &str = include_str!("stdlib/base.pkl");

impl ModuleReader for StdlibReader {
    fn scheme(&self) -> &str {
        "pkl"
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        match uri {
            "pkl:base" => Ok(PKL_BASE.to_owned()),
            _ => Err(format!("unknown standard library module `{uri}`")),
        }
    }
}

/// `modulepath:` reader over an ordered list of root directories.
#[derive(Debug, Default)]
pub(crate) struct ModulePathReader {
    roots: Vec<PathBuf>,
}

impl ModulePathReader {
    pub(crate) fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn locate(&self, uri: &str) -> Option<PathBuf> {
        let rest = uri.strip_prefix("modulepath:")?;
        let rel = rest.trim_start_matches('/');
        self.roots.iter().map(|root| root.join(rel)).find(|p| p.is_file())
    }
}

impl ModuleReader for ModulePathReader {
    fn scheme(&self) -> &str {
        "modulepath"
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        let path = self
            .locate(uri)
            .ok_or_else(|| format!("`{uri}` not found on the module path"))?;
        fs::read_to_string(&path).map_err(|err| io_message(&path, &err))
    }

    fn exists(&self, uri: &str) -> bool {
        self.locate(uri).is_some()
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        let rest = dir_uri
            .strip_prefix("modulepath:")
            .ok_or_else(|| format!("not a modulepath URI: `{dir_uri}`"))?;
        let rel = rest.trim_start_matches('/');
        let mut entries: Vec<ListEntry> = Vec::new();
        for root in &self.roots {
            let dir = root.join(rel);
            let Ok(read) = fs::read_dir(&dir) else { continue };
            for entry in read.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entries.iter().any(|e| e.name == name) {
                    continue;
                }
                entries.push(ListEntry {
                    name,
                    is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
                });
            }
        }
        Ok(entries)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

/// `package:` reader over a local package store.
///
/// `package://<host>/<name>@<version>#/<path>` resolves to
/// `<store>/<host>/<name>@<version>/<path>`. When the package directory
/// carries a `package.sha256` sidecar (lines of `<hex>  <relative path>`),
/// file contents are verified against it; a mismatch is an error.
#[derive(Debug, Default)]
pub(crate) struct PackageReader {
    store: Option<PathBuf>,
}

impl PackageReader {
    pub(crate) fn new(store: Option<PathBuf>) -> Self {
        Self { store }
    }

    fn locate(&self, uri: &str) -> Result<(PathBuf, String), String> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| "no package store directory is configured".to_owned())?;
        let rest = uri
            .strip_prefix("package://")
            .ok_or_else(|| format!("malformed package URI `{uri}`"))?;
        let (coordinates, path) = rest
            .split_once("#/")
            .ok_or_else(|| format!("package URI `{uri}` is missing a `#/` path"))?;
        if !coordinates.contains('@') {
            return Err(format!("package URI `{uri}` is missing a version"));
        }
        Ok((store.join(coordinates), path.to_owned()))
    }

    fn verify_integrity(package_dir: &Path, rel_path: &str, bytes: &[u8]) -> Result<(), String> {
        let sidecar = package_dir.join("package.sha256");
        let Ok(metadata) = fs::read_to_string(&sidecar) else {
            return Ok(());
        };
        for line in metadata.lines() {
            let mut parts = line.split_whitespace();
            let (Some(expected), Some(path)) = (parts.next(), parts.next()) else {
                continue;
            };
            if path == rel_path {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                let mut actual = String::with_capacity(64);
                for byte in hasher.finalize() {
                    let _ = write!(actual, "{byte:02x}");
                }
                if actual == expected.to_ascii_lowercase() {
                    return Ok(());
                }
                return Err(format!("integrity check failed for `{rel_path}`"));
            }
        }
        Ok(())
    }
}

impl PackageReader {
    /// Reads raw bytes with integrity verification; shared with the
    /// resource-side package reader.
    pub(crate) fn read_bytes(&self, uri: &str) -> Result<Vec<u8>, String> {
        let (package_dir, rel_path) = self.locate(uri)?;
        let file = package_dir.join(&rel_path);
        let bytes = fs::read(&file).map_err(|err| io_message(&file, &err))?;
        Self::verify_integrity(&package_dir, &rel_path, &bytes)?;
        Ok(bytes)
    }
}

impl ModuleReader for PackageReader {
    fn scheme(&self) -> &str {
        "package"
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        let bytes = self.read_bytes(uri)?;
        String::from_utf8(bytes).map_err(|_| format!("module `{uri}` is not valid UTF-8"))
    }

    fn exists(&self, uri: &str) -> bool {
        self.locate(uri).is_ok_and(|(dir, rel)| dir.join(rel).is_file())
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        let (package_dir, rel_path) = self.locate(dir_uri)?;
        let dir = package_dir.join(rel_path.trim_end_matches('/'));
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|err| io_message(&dir, &err))?.flatten() {
            entries.push(ListEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            });
        }
        Ok(entries)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

/// `repl:` reader over in-memory synthetic modules.
#[derive(Debug, Default)]
pub(crate) struct ReplReader {
    modules: AHashMap<String, String>,
}

impl ReplReader {
    pub(crate) fn insert(&mut self, uri: String, source: String) {
        self.modules.insert(uri, source);
    }
}

impl ModuleReader for ReplReader {
    fn scheme(&self) -> &str {
        "repl"
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        self.modules
            .get(uri)
            .cloned()
            .ok_or_else(|| format!("unknown REPL module `{uri}`"))
    }
}

// ---- the loader ----

/// Scheme-dispatching module loader.
#[derive(Debug)]
pub(crate) struct ModuleLoader {
    readers: Vec<Box<dyn ModuleReader>>,
    repl: ReplReader,
}

impl ModuleLoader {
    /// A loader with the standard schemes registered.
    pub(crate) fn standard(module_path: Vec<PathBuf>, package_store: Option<PathBuf>) -> Self {
        Self {
            readers: vec![
                Box::new(FileModuleReader),
                Box::new(HttpModuleReader::new(false)),
                Box::new(HttpModuleReader::new(true)),
                Box::new(StdlibReader),
                Box::new(ModulePathReader::new(module_path)),
                Box::new(PackageReader::new(package_store)),
            ],
            repl: ReplReader::default(),
        }
    }

    pub(crate) fn register(&mut self, reader: Box<dyn ModuleReader>) {
        self.readers.push(reader);
    }

    pub(crate) fn repl_mut(&mut self) -> &mut ReplReader {
        &mut self.repl
    }

    pub(crate) fn reader_for(&self, uri: &str) -> EvalResult<&dyn ModuleReader> {
        let scheme =
            scheme_of(uri).ok_or_else(|| EvalError::keyed(ErrorKind::ResolveError, "cannotFindModule", &[&uri]))?;
        if scheme == "repl" {
            return Ok(&self.repl);
        }
        self.readers
            .iter()
            .map(AsRef::as_ref)
            .find(|r| r.scheme() == scheme)
            .ok_or_else(|| EvalError::keyed(ErrorKind::ResolveError, "noSuchScheme", &[&scheme]))
    }

    /// Resolves a module reference against the importing module's URI,
    /// including triple-dot hierarchical resolution.
    pub(crate) fn resolve(&self, base_uri: &str, reference: &str) -> EvalResult<String> {
        if let Some(rest) = reference.strip_prefix("...") {
            if rest.contains("..") {
                return Err(EvalError::keyed(ErrorKind::ResolveError, "cannotFindModule", &[&reference]));
            }
            return self.resolve_triple_dot(base_uri, rest);
        }
        Ok(resolve_uri(base_uri, reference))
    }

    /// `...rest` searches the enclosing directory hierarchy, nearest first,
    /// starting above the importing module's directory. Bare `...` searches
    /// for the importing module's own filename.
    fn resolve_triple_dot(&self, base_uri: &str, rest: &str) -> EvalResult<String> {
        let target = if rest.is_empty() {
            let (_, path) = split_path(base_uri);
            path.rsplit('/').next().unwrap_or("").to_owned()
        } else {
            rest.trim_start_matches('/').to_owned()
        };
        if target.is_empty() {
            return Err(EvalError::keyed(ErrorKind::ResolveError, "cannotFindModule", &[&rest]));
        }
        let reader = self.reader_for(base_uri)?;
        let mut dir = parent_dir(base_uri).and_then(|d| parent_dir(&d));
        while let Some(current) = dir {
            let candidate = if current.ends_with('/') {
                format!("{current}{target}")
            } else {
                format!("{current}/{target}")
            };
            if reader.exists(&candidate) {
                return Ok(candidate);
            }
            dir = parent_dir(&current);
        }
        Err(EvalError::keyed(
            ErrorKind::ResolveError,
            "cannotFindModule",
            &[&format!("...{rest}")],
        ))
    }

    /// Reads module source for a canonical URI.
    pub(crate) fn read(&self, uri: &str) -> EvalResult<String> {
        let reader = self.reader_for(uri)?;
        reader.read(uri).map_err(|detail| {
            EvalError::new(
                ErrorKind::ResolveError,
                format!("cannot find module `{uri}` ({detail})"),
            )
        })
    }

    /// Expands a glob reference relative to a base URI.
    ///
    /// Returns `(key, canonical uri)` pairs sorted lexicographically by key,
    /// where the key is the matched path relative to the pattern's first
    /// wildcard segment. A pattern without wildcards resolves to a single
    /// pair, or an error if the target does not exist.
    pub(crate) fn resolve_glob(&self, base_uri: &str, pattern: &str) -> EvalResult<Vec<(String, String)>> {
        expand_glob(
            pattern,
            base_uri,
            &|reference| self.resolve(base_uri, reference),
            &|uri| self.reader_for(uri).is_ok_and(|r| r.exists(uri)),
            &|uri| {
                let reader = self.reader_for(uri)?;
                if !reader.supports_globbing() {
                    return Err(EvalError::new(
                        ErrorKind::ResolveError,
                        format!("scheme of `{uri}` does not support glob expansion"),
                    ));
                }
                reader.list(uri).map_err(|detail| EvalError::new(ErrorKind::ResolveError, detail))
            },
        )
    }
}

/// Shared glob-expansion driver, used by both the module loader and the
/// resource manager. `resolve` turns a reference into a canonical URI,
/// `exists` probes one, and `list` enumerates a directory URI.
pub(crate) fn expand_glob(
    pattern: &str,
    base_uri: &str,
    resolve: &dyn Fn(&str) -> EvalResult<String>,
    exists: &dyn Fn(&str) -> bool,
    list: &dyn Fn(&str) -> EvalResult<Vec<ListEntry>>,
) -> EvalResult<Vec<(String, String)>> {
    if !has_wildcards(pattern) {
        let uri = resolve(pattern)?;
        if exists(&uri) {
            return Ok(vec![(pattern.to_owned(), uri)]);
        }
        return Err(EvalError::keyed(ErrorKind::ResolveError, "cannotFindModule", &[&uri]));
    }

    // split the pattern at the first wildcard segment; the prefix resolves
    // like an ordinary reference and becomes the walk's start directory
    let (literal_prefix, glob_rest) = split_at_first_wildcard(pattern);
    let start_dir = if literal_prefix.is_empty() {
        parent_dir(base_uri).unwrap_or_else(|| base_uri.to_owned())
    } else {
        resolve(literal_prefix.trim_end_matches('/'))?
    };

    let segments: Vec<&str> = glob_rest.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    walk_glob(list, &start_dir, "", &segments, &mut out)?;
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Splits a pattern into its literal directory prefix and the remaining
/// glob, e.g. `d/sub/*.pkl` → (`d/sub/`, `*.pkl`).
fn split_at_first_wildcard(pattern: &str) -> (&str, &str) {
    let mut prefix_end = 0;
    for (i, segment) in pattern.split('/').enumerate() {
        if segment_has_wildcards(segment) {
            break;
        }
        // include the trailing slash
        prefix_end = pattern
            .split('/')
            .take(i + 1)
            .map(|s| s.len() + 1)
            .sum::<usize>()
            .min(pattern.len());
    }
    let (prefix, rest) = pattern.split_at(prefix_end);
    (prefix, rest)
}

fn walk_glob(
    list: &dyn Fn(&str) -> EvalResult<Vec<ListEntry>>,
    dir_uri: &str,
    key_prefix: &str,
    segments: &[&str],
    out: &mut Vec<(String, String)>,
) -> EvalResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(());
    };
    let entries = list(dir_uri)?;

    if *segment == "**" {
        // zero directories
        walk_glob(list, dir_uri, key_prefix, rest, out)?;
        // one or more directories
        for entry in &entries {
            if entry.is_dir {
                let sub_uri = join_dir(dir_uri, &entry.name);
                let sub_key = format!("{key_prefix}{}/", entry.name);
                walk_glob(list, &sub_uri, &sub_key, segments, out)?;
            }
        }
        return Ok(());
    }

    let matcher = GlobPattern::compile(segment)?;
    for entry in &entries {
        if !matcher.matches(&entry.name) {
            continue;
        }
        if rest.is_empty() {
            if !entry.is_dir {
                out.push((format!("{key_prefix}{}", entry.name), join_dir(dir_uri, &entry.name)));
            }
        } else if entry.is_dir {
            let sub_uri = join_dir(dir_uri, &entry.name);
            let sub_key = format!("{key_prefix}{}/", entry.name);
            walk_glob(list, &sub_uri, &sub_key, rest, out)?;
        }
    }
    Ok(())
}

fn join_dir(dir_uri: &str, name: &str) -> String {
    if dir_uri.ends_with('/') {
        format!("{dir_uri}{name}")
    } else {
        format!("{dir_uri}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_resolution() {
        assert_eq!(
            resolve_uri("file:///a/b/mod.pkl", "other.pkl"),
            "file:///a/b/other.pkl"
        );
        assert_eq!(
            resolve_uri("file:///a/b/mod.pkl", "../up.pkl"),
            "file:///a/up.pkl"
        );
        assert_eq!(resolve_uri("file:///a/b/mod.pkl", "/root.pkl"), "file:///root.pkl");
        assert_eq!(
            resolve_uri("file:///a/mod.pkl", "https://x.com/y.pkl"),
            "https://x.com/y.pkl"
        );
        assert_eq!(
            resolve_uri("https://x.com/a/mod.pkl", "sub/y.pkl"),
            "https://x.com/a/sub/y.pkl"
        );
    }

    #[test]
    fn parent_dir_walk() {
        assert_eq!(parent_dir("file:///a/b/c.pkl").as_deref(), Some("file:///a/b"));
        assert_eq!(parent_dir("file:///a/b").as_deref(), Some("file:///a"));
        assert_eq!(parent_dir("file:///a").as_deref(), Some("file:///"));
        assert_eq!(parent_dir("file:///"), None);
    }

    #[test]
    fn file_uri_paths() {
        assert_eq!(
            file_uri_to_path("file:///tmp/x.pkl"),
            Some(PathBuf::from("/tmp/x.pkl"))
        );
        assert_eq!(
            file_uri_to_path("file://localhost/tmp/x.pkl"),
            Some(PathBuf::from("/tmp/x.pkl"))
        );
        assert_eq!(file_uri_to_path("file://evil.host/x"), None);
    }

    #[test]
    fn scheme_parsing() {
        assert_eq!(scheme_of("file:///x"), Some("file"));
        assert_eq!(scheme_of("pkl:base"), Some("pkl"));
        assert_eq!(scheme_of("no-scheme/path.pkl"), None);
        assert_eq!(scheme_of("a/b:c"), None);
    }

    #[test]
    fn wildcard_prefix_split() {
        assert_eq!(split_at_first_wildcard("d/*.pkl"), ("d/", "*.pkl"));
        assert_eq!(split_at_first_wildcard("**/*.pkl"), ("", "**/*.pkl"));
        assert_eq!(split_at_first_wildcard("a/b/c*.pkl"), ("a/b/", "c*.pkl"));
    }
}
