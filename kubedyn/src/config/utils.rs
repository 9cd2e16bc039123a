use std::path::{Path, PathBuf};

use base64::Engine as _;

use super::KubeconfigError;

/// Returns kubeconfig path from `$HOME/.kube/config`.
pub(crate) fn default_kube_path() -> Option<PathBuf> {
    home::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Resolve a kubeconfig `*-data`/`*` field pair into raw bytes.
///
/// Inline base64 data wins over a file path when both are present.
pub(crate) fn data_or_file<P: AsRef<Path>>(
    data: &Option<String>,
    file: &Option<P>,
) -> Result<Vec<u8>, KubeconfigError> {
    match (data, file) {
        (Some(d), _) => base64::engine::general_purpose::STANDARD
            .decode(d)
            .map_err(KubeconfigError::Base64Decode),
        (_, Some(f)) => read_file(f),
        _ => Err(KubeconfigError::NoFileOrData),
    }
}

pub(crate) fn read_file<P: AsRef<Path>>(file: P) -> Result<Vec<u8>, KubeconfigError> {
    std::fs::read(&file).map_err(|source| KubeconfigError::ReadFile {
        path: file.as_ref().into(),
        source,
    })
}

/// Split a PEM bundle into the DER contents of its CERTIFICATE blocks.
pub(crate) fn certs(data: &[u8]) -> Result<Vec<Vec<u8>>, pem::PemError> {
    Ok(pem::parse_many(data)?
        .into_iter()
        .filter_map(|p| {
            if p.tag() == "CERTIFICATE" {
                Some(p.contents().to_vec())
            } else {
                None
            }
        })
        .collect::<Vec<_>>())
}
