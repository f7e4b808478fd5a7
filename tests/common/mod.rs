#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build an archive from `(name, content)` pairs; names ending in `/` are directories.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .unwrap();
        } else {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Write an archive to a temporary file that lives as long as the handle.
pub fn zip_file(entries: &[(&str, &[u8])]) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
    file.write_all(&zip_bytes(entries)).unwrap();
    file.flush().unwrap();
    file
}

pub fn location(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A demo site with its marker below `site/`.
pub fn demo_site() -> NamedTempFile {
    zip_file(&[
        ("README.md", b"not part of the site"),
        ("site/", b""),
        ("site/.prefix", b"demo\n"),
        ("site/index.html", b"<h1>demo</h1>"),
        ("site/css/app.css", b"body { margin: 0 }"),
    ])
}
