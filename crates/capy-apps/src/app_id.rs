//! Application-id escaping.
//!
//! Ids travel in two directions: desktop-entry file names are unescaped into
//! application ids when the catalog scans, and ids are re-escaped when the
//! launcher derives systemd unit names. Any byte outside `[A-Za-z0-9_]` is
//! written as `\xNN`; a path separator in a file name relative to its search
//! directory becomes `-`.

use std::path::Path;

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Escape an application id for embedding in a unit name.
pub fn escape_app_id(app_id: &str) -> String {
    let mut out = String::with_capacity(app_id.len());
    for byte in app_id.bytes() {
        if is_plain(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out
}

/// Invert [`escape_app_id`]. Malformed `\x` sequences are kept verbatim so a
/// foreign unit name never panics the decoder.
pub fn unescape_app_id(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = &escaped[i + 2..i + 4];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Derive the application id for a desktop file found under `base_dir`.
/// Subdirectory components join with `-` and the file name is unescaped.
pub fn app_id_from_path(base_dir: &Path, desktop_path: &Path) -> Option<String> {
    let relative = desktop_path.strip_prefix(base_dir).ok()?;
    let stem = relative.to_str()?.strip_suffix(".desktop")?;
    Some(unescape_app_id(&stem.replace('/', "-")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn escapes_bytes_outside_plain_set() {
        assert_eq!(escape_app_id("org.example.Edit"), "org\\x2eexample\\x2eEdit");
        assert_eq!(escape_app_id("plain_id9"), "plain_id9");
    }

    #[test]
    fn unescape_inverts_escape() {
        for id in ["org.example.Edit", "a-b@c", "snake_case", "空白 app"] {
            assert_eq!(unescape_app_id(&escape_app_id(id)), id);
        }
    }

    #[test]
    fn malformed_escapes_pass_through() {
        assert_eq!(unescape_app_id("broken\\xzz"), "broken\\xzz");
        assert_eq!(unescape_app_id("tail\\x"), "tail\\x");
    }

    #[test]
    fn app_id_from_subdirectory_joins_with_dash() {
        let base = PathBuf::from("/usr/share/applications");
        let path = base.join("kde4/okular.desktop");
        assert_eq!(app_id_from_path(&base, &path).as_deref(), Some("kde4-okular"));
    }

    #[test]
    fn non_desktop_files_are_rejected() {
        let base = PathBuf::from("/usr/share/applications");
        assert_eq!(app_id_from_path(&base, &base.join("notes.txt")), None);
    }
}
