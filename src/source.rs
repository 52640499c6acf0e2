//! Retrieval of raw dataset bytes from a local path, stdin or an HTTP(S) URL.

use std::{
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use encoding_rs::Encoding;
use log::{debug, info, warn};
use reqwest::blocking::Client;

use crate::{
    error::{IngestError, Result},
    workbook::Workbook,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = concat!("housing-ingest/", env!("CARGO_PKG_VERSION"));

/// Leading bytes of ZIP-based (xlsx, ods) and OLE (xls) containers.
const SPREADSHEET_MAGIC: &[&[u8]] = &[b"PK\x03\x04", b"\xD0\xCF\x11\xE0"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
    Stdin,
}

impl SourceLocation {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceLocation::Url(trimmed.to_string())
        } else if trimmed == "-" {
            SourceLocation::Stdin
        } else {
            SourceLocation::Path(PathBuf::from(trimmed))
        }
    }

    /// Last path segment, used to name single-sheet workbooks.
    pub fn file_name(&self) -> String {
        match self {
            SourceLocation::Url(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
                .unwrap_or(url.as_str())
                .to_string(),
            SourceLocation::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SourceLocation::Stdin => "stdin".to_string(),
        }
    }

    fn has_text_extension(&self) -> bool {
        let name = self.file_name();
        Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt"))
    }

    fn transport_error(&self, reason: impl fmt::Display) -> IngestError {
        IngestError::Transport {
            source_name: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Url(url) => f.write_str(url),
            SourceLocation::Path(path) => write!(f, "{}", path.display()),
            SourceLocation::Stdin => f.write_str("-"),
        }
    }
}

pub fn fetch_bytes(location: &SourceLocation) -> Result<Vec<u8>> {
    let bytes = match location {
        SourceLocation::Url(url) => fetch_url(url).map_err(|err| location.transport_error(err))?,
        SourceLocation::Path(path) => fs::read(path).map_err(|err| location.transport_error(err))?,
        SourceLocation::Stdin => {
            let mut buffer = Vec::new();
            io::stdin()
                .lock()
                .read_to_end(&mut buffer)
                .map_err(|err| location.transport_error(err))?;
            buffer
        }
    };
    debug!("Fetched {} byte(s) from {location}", bytes.len());
    Ok(bytes)
}

fn fetch_url(url: &str) -> reqwest::Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?;
    info!("Downloading {url}");
    let response = client.get(url).send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// Decodes `bytes`, dropping a byte order mark that matches `encoding`.
/// Malformed sequences become U+FFFD and are logged.
pub fn decode_text(location: &SourceLocation, bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            "{location} is not valid {}; malformed bytes were replaced",
            used.name()
        );
    }
    text.into_owned()
}

pub fn fetch_text(location: &SourceLocation, encoding: &'static Encoding) -> Result<String> {
    let bytes = fetch_bytes(location)?;
    Ok(decode_text(location, &bytes, encoding))
}

/// Loads a workbook, reading CSV text as a single sheet named after the file.
pub fn fetch_workbook(location: &SourceLocation, encoding: &'static Encoding) -> Result<Workbook> {
    let bytes = fetch_bytes(location)?;
    if bytes.is_empty() {
        return Err(IngestError::EmptySource {
            source_name: location.to_string(),
        });
    }
    let is_spreadsheet = SPREADSHEET_MAGIC.iter().any(|magic| bytes.starts_with(magic));
    if location.has_text_extension() || !is_spreadsheet {
        let text = decode_text(location, &bytes, encoding);
        return Ok(Workbook::from_csv_text(&location.file_name(), &text));
    }
    Workbook::from_bytes(bytes)
}
