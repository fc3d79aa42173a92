use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{ProviderError, Result};

/// Title used when a site does not report one
pub const UNTITLED_SITE: &str = "Untitled Site";

/// System libraries that are never backed up
pub const SKIP_LIBRARIES: [&str; 5] = [
    "Forms",
    "_SiteTemplates",
    "Plantillas_de_formulario",
    "Activos_del_sitio",
    "Biblioteca_de_estilos",
];

pub fn is_skipped_library(title: &str) -> bool {
    SKIP_LIBRARIES.contains(&title)
}

/// Local directory of a site under the backup root.
///
/// The title is used verbatim except for path separators and the `.` and
/// `..` names, all of which become `_` so the site stays below the root.
pub fn site_dir(backup_root: &Path, title: &str) -> PathBuf {
    let name: String = title
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match name.as_str() {
        "." | ".." => backup_root.join("_"),
        _ => backup_root.join(name),
    }
}

/// Local directory of a remote subfolder: spaces become underscores
pub fn subfolder_dir(parent: &Path, folder_name: &str) -> PathBuf {
    parent.join(folder_name.replace(' ', "_"))
}

/// Quotes a value for use as an OData string literal
pub(crate) fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ProviderError::Parse(format!("invalid URL {url:?}: {e}")))
}

/// Normalized origin (`scheme://host[:port]`) of an absolute URL
pub(crate) fn origin_of(url: &Url) -> Result<String> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(ProviderError::Parse(format!("URL has no host: {url}")));
    }
    Ok(origin.ascii_serialization())
}

/// REST endpoint `path` below a site, dropping any query the site URL had
pub(crate) fn api_url(site_url: &str, path: &str) -> Result<Url> {
    let mut url = parse_url(site_url)?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| ProviderError::Parse(format!("not a hierarchical URL: {site_url}")))?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url)
}
