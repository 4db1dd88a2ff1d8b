//! Resource resolution for `read`, `read?`, and `read*`.
//!
//! Mirrors the module loader for opaque resources: readers are selected by
//! URI scheme and return raw bytes. `env:` and `prop:` read from maps the
//! embedding caller supplies at evaluator construction; the engine itself
//! consults no process environment other than `PKL_DEBUG`.

use std::path::PathBuf;

use ahash::AHashMap;

use crate::{
    errors::{ErrorKind, EvalError, EvalResult},
    modules::{self, ListEntry, expand_glob, file_uri_to_path, resolve_uri},
};

/// A successfully read resource.
#[derive(Debug, Clone)]
pub struct Resource {
    pub uri: String,
    pub bytes: Vec<u8>,
}

impl Resource {
    /// The resource decoded as UTF-8 text.
    pub(crate) fn text(&self) -> EvalResult<String> {
        String::from_utf8(self.bytes.clone()).map_err(|_| {
            EvalError::new(
                ErrorKind::ResolveError,
                format!("resource `{}` is not valid UTF-8 text", self.uri),
            )
        })
    }

    /// The resource encoded as base64.
    pub(crate) fn base64(&self) -> String {
        base64_encode(&self.bytes)
    }
}

/// Standard-alphabet base64 with padding.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(n >> 6) as usize & 63] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[n as usize & 63] as char } else { '=' });
    }
    out
}

/// A source of resource bytes, selected by URI scheme.
pub trait ResourceReader: std::fmt::Debug {
    fn scheme(&self) -> &str;

    fn read(&self, uri: &str) -> Result<Vec<u8>, String>;

    fn exists(&self, uri: &str) -> bool {
        self.read(uri).is_ok()
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        let _ = dir_uri;
        Err(format!("scheme `{}` does not support globbing", self.scheme()))
    }

    fn supports_globbing(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct FileResourceReader;

impl ResourceReader for FileResourceReader {
    fn scheme(&self) -> &str {
        "file"
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        modules::file_read(uri)
    }

    fn exists(&self, uri: &str) -> bool {
        file_uri_to_path(uri).is_some_and(|p| p.is_file())
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        modules::file_list(dir_uri)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct HttpResourceReader {
    https: bool,
}

impl ResourceReader for HttpResourceReader {
    fn scheme(&self) -> &str {
        if self.https { "https" } else { "http" }
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        modules::http_fetch(uri)
    }
}

/// `env:NAME` reads from the embedder-supplied environment map.
#[derive(Debug, Default)]
struct EnvReader {
    vars: AHashMap<String, String>,
}

impl ResourceReader for EnvReader {
    fn scheme(&self) -> &str {
        "env"
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        let name = uri.strip_prefix("env:").unwrap_or(uri);
        self.vars
            .get(name)
            .map(|v| v.clone().into_bytes())
            .ok_or_else(|| format!("environment variable `{name}` is not set"))
    }
}

/// `prop:name` reads from the embedder-supplied external properties.
#[derive(Debug, Default)]
struct PropReader {
    props: AHashMap<String, String>,
}

impl ResourceReader for PropReader {
    fn scheme(&self) -> &str {
        "prop"
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        let name = uri.strip_prefix("prop:").unwrap_or(uri);
        self.props
            .get(name)
            .map(|v| v.clone().into_bytes())
            .ok_or_else(|| format!("external property `{name}` is not set"))
    }
}

/// `package:` resources read through the same local store as modules.
#[derive(Debug)]
struct PackageResourceReader {
    store: Option<PathBuf>,
}

impl ResourceReader for PackageResourceReader {
    fn scheme(&self) -> &str {
        "package"
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        let inner = modules::PackageReader::new(self.store.clone());
        inner.read_bytes(uri)
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        let inner = modules::PackageReader::new(self.store.clone());
        modules::ModuleReader::list(&inner, dir_uri)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

/// Scheme-dispatching resource manager.
#[derive(Debug)]
pub(crate) struct ResourceManager {
    readers: Vec<Box<dyn ResourceReader>>,
}

impl ResourceManager {
    pub(crate) fn standard(
        env_vars: AHashMap<String, String>,
        properties: AHashMap<String, String>,
        package_store: Option<PathBuf>,
    ) -> Self {
        Self {
            readers: vec![
                Box::new(FileResourceReader),
                Box::new(HttpResourceReader { https: false }),
                Box::new(HttpResourceReader { https: true }),
                Box::new(EnvReader { vars: env_vars }),
                Box::new(PropReader { props: properties }),
                Box::new(PackageResourceReader { store: package_store }),
            ],
        }
    }

    pub(crate) fn register(&mut self, reader: Box<dyn ResourceReader>) {
        self.readers.push(reader);
    }

    fn reader_for(&self, uri: &str) -> EvalResult<&dyn ResourceReader> {
        let scheme = modules::scheme_of(uri)
            .ok_or_else(|| EvalError::keyed(ErrorKind::ResolveError, "cannotFindResource", &[&uri]))?;
        self.readers
            .iter()
            .map(AsRef::as_ref)
            .find(|r| r.scheme() == scheme)
            .ok_or_else(|| EvalError::keyed(ErrorKind::ResolveError, "noSuchScheme", &[&scheme]))
    }

    /// Resolves a resource reference against the reading module's URI.
    /// URIs with a scheme (including opaque `env:`/`prop:`) pass through.
    pub(crate) fn resolve(&self, base_uri: &str, reference: &str) -> String {
        if modules::scheme_of(reference).is_some() {
            reference.to_owned()
        } else {
            resolve_uri(base_uri, reference)
        }
    }

    pub(crate) fn read(&self, uri: &str) -> EvalResult<Resource> {
        let reader = self.reader_for(uri)?;
        let bytes = reader.read(uri).map_err(|detail| {
            EvalError::new(
                ErrorKind::ResolveError,
                format!("cannot find resource `{uri}` ({detail})"),
            )
        })?;
        Ok(Resource {
            uri: uri.to_owned(),
            bytes,
        })
    }

    pub(crate) fn exists(&self, uri: &str) -> bool {
        self.reader_for(uri).is_ok_and(|r| r.exists(uri))
    }

    /// Expands a glob for `read*`, returning `(key, uri)` pairs sorted by key.
    pub(crate) fn resolve_glob(&self, base_uri: &str, pattern: &str) -> EvalResult<Vec<(String, String)>> {
        expand_glob(
            pattern,
            base_uri,
            &|reference| Ok(self.resolve(base_uri, reference)),
            &|uri| self.exists(uri),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn env_reader_reads_supplied_map() {
        let mut vars = AHashMap::new();
        vars.insert("HOME".to_owned(), "/home/u".to_owned());
        let manager = ResourceManager::standard(vars, AHashMap::new(), None);
        let resource = manager.read("env:HOME").unwrap();
        assert_eq!(resource.text().unwrap(), "/home/u");
        assert!(manager.read("env:MISSING").is_err());
    }

    #[test]
    fn prop_reader() {
        let mut props = AHashMap::new();
        props.insert("version".to_owned(), "1.2.3".to_owned());
        let manager = ResourceManager::standard(AHashMap::new(), props, None);
        assert_eq!(manager.read("prop:version").unwrap().text().unwrap(), "1.2.3");
    }
}
