//! Exec field-code expansion.
//!
//! Operates on the word-split token list of an `Exec` value, per the
//! Desktop Entry Specification's "Exec variables" section. With an empty
//! file list every file-bearing code (`%f %F %u %U`) is removed so the
//! command runs with no file arguments.

use log::{debug, warn};

/// Entry-side inputs a command expansion may refer to.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpandContext<'a> {
    /// `Icon` key value, feeds `%i`.
    pub icon: Option<&'a str>,
    /// Localized `Name`, feeds `%c`.
    pub name: Option<&'a str>,
    /// Source desktop-file path, feeds `%k`.
    pub source_path: Option<&'a str>,
}

/// Expand field codes in `tokens` against `files`.
pub fn expand(tokens: Vec<String>, files: &[String], ctx: &ExpandContext<'_>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len() + files.len());

    for token in tokens {
        if token == "%%" {
            out.push("%".to_string());
            continue;
        }

        if token.len() == 2 && token.starts_with('%') {
            match token.as_bytes()[1] {
                b'f' | b'u' => {
                    if let Some(first) = files.first() {
                        out.push(first.clone());
                    }
                }
                b'F' => out.extend(files.iter().map(|f| to_local_path(f))),
                b'U' => {
                    if !files.is_empty() {
                        out.push(files.join(" "));
                    }
                }
                b'i' => {
                    if let Some(icon) = ctx.icon {
                        out.push("--icon".to_string());
                        out.push(icon.to_string());
                    }
                }
                b'c' => {
                    if let Some(name) = ctx.name {
                        out.push(name.to_string());
                    }
                }
                b'k' => {
                    if let Some(path) = ctx.source_path {
                        out.push(path.to_string());
                    }
                }
                other => {
                    debug!("dropping unrecognized field code %{}", other as char);
                }
            }
            continue;
        }

        if token.contains('%') {
            // The Desktop Entry Specification leaves embedded codes
            // undefined; substitute textually and tell the log.
            warn!("substituting field codes embedded in token {token:?}");
            out.push(substitute_embedded(&token, files, ctx));
            continue;
        }

        out.push(token);
    }

    out
}

fn substitute_embedded(token: &str, files: &[String], ctx: &ExpandContext<'_>) -> String {
    let first = files.first().map(String::as_str).unwrap_or("");
    let joined = files.join(" ");
    token
        .replace("%%", "\u{0}")
        .replace("%f", first)
        .replace("%u", first)
        .replace("%F", &joined)
        .replace("%U", &joined)
        .replace("%i", ctx.icon.unwrap_or(""))
        .replace("%c", ctx.name.unwrap_or(""))
        .replace("%k", ctx.source_path.unwrap_or(""))
        .replace('\u{0}', "%")
}

/// `file://` URIs become plain paths; anything else passes through.
fn to_local_path(file: &str) -> String {
    file.strip_prefix("file://").unwrap_or(file).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_files_strip_all_file_codes() {
        let out = expand(
            tokens(&["edit", "%f", "%F", "%u", "%U"]),
            &[],
            &ExpandContext::default(),
        );
        assert_eq!(out, vec!["edit"]);
    }

    #[test]
    fn single_file_codes_take_the_first_file() {
        let files = vec!["/tmp/a.txt".to_string(), "/tmp/b.txt".to_string()];
        assert_eq!(
            expand(tokens(&["edit", "%f"]), &files, &ExpandContext::default()),
            vec!["edit", "/tmp/a.txt"]
        );
        assert_eq!(
            expand(tokens(&["open", "%u"]), &files, &ExpandContext::default()),
            vec!["open", "/tmp/a.txt"]
        );
    }

    #[test]
    fn file_list_codes() {
        let files = vec![
            "file:///tmp/a.txt".to_string(),
            "/tmp/b.txt".to_string(),
        ];
        assert_eq!(
            expand(tokens(&["edit", "%F"]), &files, &ExpandContext::default()),
            vec!["edit", "/tmp/a.txt", "/tmp/b.txt"]
        );
        assert_eq!(
            expand(tokens(&["edit", "%U"]), &files, &ExpandContext::default()),
            vec!["edit", "file:///tmp/a.txt /tmp/b.txt"]
        );
    }

    #[test]
    fn icon_expands_to_two_arguments_or_nothing() {
        let ctx = ExpandContext {
            icon: Some("editor"),
            ..Default::default()
        };
        assert_eq!(
            expand(tokens(&["edit", "%i"]), &[], &ctx),
            vec!["edit", "--icon", "editor"]
        );
        assert_eq!(
            expand(tokens(&["edit", "%i"]), &[], &ExpandContext::default()),
            vec!["edit"]
        );
    }

    #[test]
    fn caption_and_source_path() {
        let ctx = ExpandContext {
            name: Some("Editor"),
            source_path: Some("/usr/share/applications/editor.desktop"),
            ..Default::default()
        };
        assert_eq!(
            expand(tokens(&["edit", "%c", "%k"]), &[], &ctx),
            vec!["edit", "Editor", "/usr/share/applications/editor.desktop"]
        );
    }

    #[test]
    fn unrecognized_codes_are_dropped() {
        assert_eq!(
            expand(tokens(&["run", "%d", "%v"]), &[], &ExpandContext::default()),
            vec!["run"]
        );
    }

    #[test]
    fn embedded_codes_substitute_textually() {
        let files = vec!["/tmp/a.txt".to_string()];
        assert_eq!(
            expand(tokens(&["prefix-%f-suffix"]), &files, &ExpandContext::default()),
            vec!["prefix-/tmp/a.txt-suffix"]
        );
        assert_eq!(
            expand(tokens(&["100%%"]), &[], &ExpandContext::default()),
            vec!["100%"]
        );
    }

    #[test]
    fn percent_escape_token() {
        assert_eq!(
            expand(tokens(&["%%"]), &[], &ExpandContext::default()),
            vec!["%"]
        );
    }
}
