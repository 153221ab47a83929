//! Location fixups before a URL reaches the engine

use crate::error::{Error, Result};
use url::Url;

/// Engine-ready location plus what had to be split off it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedUrl {
    pub uri: String,
    /// Device for the source element (CD drives)
    pub source_device: Option<String>,
}

/// Rewrite `location` into a form the engine understands
///
/// - `file://host/share/a.flac` (a UNC path) becomes `file:////host/share/a.flac`
/// - `cdda:///dev/sr0/3` becomes `cdda://3`; `/dev/sr0` is returned as the
///   source device, since the engine does not read devices from CD URLs
/// - anything else is passed through in encoded form
pub fn fixup_url(location: &str) -> Result<FixedUrl> {
    let url = Url::parse(location).map_err(|e| Error::InvalidUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "file" => {
            let uri = match url.host_str().filter(|host| !host.is_empty()) {
                Some(host) => format!("file:////{}{}", host, url.path()),
                None => url.to_string(),
            };
            Ok(FixedUrl {
                uri,
                source_device: None,
            })
        }
        "cdda" if !url.path().is_empty() => {
            let path = url.path();
            let (device, track) = match path.rfind('/') {
                Some(split) => (&path[..split], &path[split + 1..]),
                None => ("", path),
            };
            Ok(FixedUrl {
                uri: format!("cdda://{}", track),
                source_device: (!device.is_empty()).then(|| device.to_string()),
            })
        }
        _ => Ok(FixedUrl {
            uri: url.to_string(),
            source_device: None,
        }),
    }
}
