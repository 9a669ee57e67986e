use serde::Deserialize;
use std::path::Path;

pub const ENV_BSP_PROGRAM: &str = "BSYNC_BSP_PROGRAM";
pub const ENV_BSP_ARGS: &str = "BSYNC_BSP_ARGS";

/// How to launch a BSP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BspConnection {
    pub name: Option<String>,
    pub program: String,
    pub args: Vec<String>,
}

/// The fields of a `.bsp/<name>.json` connection file bsync uses.
#[derive(Debug, Deserialize)]
struct ConnectionFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    argv: Vec<String>,
}

impl BspConnection {
    /// Discover a connection for `workspace_root`.
    ///
    /// Sources, in order:
    /// 1. `.bsp/*.json` connection files (first by file name with a non-empty `argv`)
    /// 2. `BSYNC_BSP_PROGRAM` / `BSYNC_BSP_ARGS` environment variables (override)
    pub fn discover(workspace_root: &Path) -> Option<Self> {
        let discovered = Self::from_dot_bsp(workspace_root);
        let program_env = std::env::var(ENV_BSP_PROGRAM).ok();
        let args_env = std::env::var(ENV_BSP_ARGS).ok();
        apply_env_overrides(discovered, program_env.as_deref(), args_env.as_deref())
    }

    /// Read the first usable `.bsp/*.json` file. Unreadable or malformed files are skipped.
    pub fn from_dot_bsp(workspace_root: &Path) -> Option<Self> {
        let dir = workspace_root.join(".bsp");
        let mut files: Vec<_> = std::fs::read_dir(&dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        files.into_iter().find_map(|path| {
            let text = std::fs::read_to_string(&path).ok()?;
            let file: ConnectionFile = match serde_json::from_str(&text) {
                Ok(file) => file,
                Err(err) => {
                    tracing::debug!(
                        target = "bsync.bsp",
                        path = %path.display(),
                        error = %err,
                        "skipping malformed BSP connection file"
                    );
                    return None;
                }
            };
            let mut argv = file.argv.into_iter();
            let program = argv.next().filter(|p| !p.trim().is_empty())?;
            Some(Self {
                name: file.name,
                program,
                args: argv.collect(),
            })
        })
    }
}

/// Layer environment overrides on top of a discovered connection.
pub fn apply_env_overrides(
    discovered: Option<BspConnection>,
    program_env: Option<&str>,
    args_env: Option<&str>,
) -> Option<BspConnection> {
    let mut connection = discovered.unwrap_or(BspConnection {
        name: None,
        program: String::new(),
        args: Vec::new(),
    });
    if let Some(program) = program_env.map(str::trim).filter(|p| !p.is_empty()) {
        connection.program = program.to_string();
    }
    if let Some(args) = args_env.map(str::trim).filter(|a| !a.is_empty()) {
        connection.args = parse_args(args);
    }
    (!connection.program.trim().is_empty()).then_some(connection)
}

/// Parse an argument list given either as a JSON array or as whitespace-separated words with
/// single/double quotes.
pub fn parse_args(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        if let Ok(args) = serde_json::from_str::<Vec<String>>(raw) {
            return args;
        }
    }
    split_quoted(raw)
}

fn split_quoted(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for ch in raw.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_first_connection_file() {
        let root = TempDir::new().unwrap();
        let bsp = root.path().join(".bsp");
        std::fs::create_dir_all(&bsp).unwrap();
        std::fs::write(bsp.join("a-broken.json"), "{not json").unwrap();
        std::fs::write(
            bsp.join("bazelbsp.json"),
            r#"{"name":"bazelbsp","argv":["java","-jar","server.jar"],"languages":["java"]}"#,
        )
        .unwrap();

        let connection = BspConnection::from_dot_bsp(root.path()).unwrap();
        assert_eq!(connection.name.as_deref(), Some("bazelbsp"));
        assert_eq!(connection.program, "java");
        assert_eq!(connection.args, vec!["-jar", "server.jar"]);
    }

    #[test]
    fn env_overrides_win() {
        let discovered = Some(BspConnection {
            name: None,
            program: "bazel-bsp".into(),
            args: vec!["--old".into()],
        });
        let connection =
            apply_env_overrides(discovered, Some(" my-bsp "), Some(r#"--flag "two words""#))
                .unwrap();
        assert_eq!(connection.program, "my-bsp");
        assert_eq!(connection.args, vec!["--flag", "two words"]);
    }

    #[test]
    fn no_program_means_no_connection() {
        assert_eq!(apply_env_overrides(None, Some("  "), None), None);
    }

    #[test]
    fn args_accept_json_arrays_and_empty_quotes() {
        assert_eq!(parse_args(r#"["a b", "c"]"#), vec!["a b", "c"]);
        assert_eq!(parse_args(r#"x '' y"#), vec!["x", "", "y"]);
    }
}
