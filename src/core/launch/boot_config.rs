use std::path::Path;

use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

use super::LaunchTarget;

pub const BOOT_CONFIG_FILE: &str = "boot.cfg";
pub const BOOT_BACKUP_FILE: &str = "boot_backup.cfg";

pub const SERVER_NAME_KEY: &str = "SERVERNAME";
pub const AUTH_SERVER_KEY: &str = "AUTHSERVERIP";

/// Launch-time values for the recognized keys.
pub fn launch_values(target: &LaunchTarget) -> [(&'static str, &str); 2] {
    [
        (SERVER_NAME_KEY, target.name.as_str()),
        (AUTH_SERVER_KEY, target.address.as_str()),
    ]
}

/// Replaces the value of every recognized key, keeping all other lines,
/// their order, line endings and the presence or absence of a final
/// newline untouched.
pub fn rewrite(contents: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(contents.len());
    for segment in contents.split_inclusive('\n') {
        let (line, ending) = split_line_ending(segment);
        let replacement = line.split_once('=').and_then(|(key, _)| {
            values
                .iter()
                .find(|(known, _)| *known == key.trim())
                .map(|(known, value)| format!("{known}=0:{value},"))
        });
        match replacement {
            Some(replaced) => {
                out.push_str(&replaced);
                out.push_str(ending);
            }
            None => out.push_str(segment),
        }
    }
    out
}

fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(line) = segment.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = segment.strip_suffix('\n') {
        (line, "\n")
    } else {
        (segment, "")
    }
}

/// Well-formed means UTF-8 where every non-blank line is `KEY=VALUE`.
fn parse(bytes: &[u8]) -> Result<&str, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
    match text
        .lines()
        .enumerate()
        .find(|(_, line)| !line.trim().is_empty() && !line.contains('='))
    {
        Some((number, line)) => Err(format!("line {} has no '=': {:?}", number + 1, line)),
        None => Ok(text),
    }
}

/// Rewrites `boot.cfg` inside `client_dir` for `target`. A malformed or
/// missing primary file is rebuilt from `boot_backup.cfg`; only a bad
/// backup is an error.
pub fn apply(client_dir: &Path, target: &LaunchTarget) -> LauncherResult<()> {
    let primary = client_dir.join(BOOT_CONFIG_FILE);
    let values = launch_values(target);

    let primary_problem = match std::fs::read(&primary) {
        Ok(bytes) => match parse(&bytes) {
            Ok(text) => {
                return write(&primary, &rewrite(text, &values));
            }
            Err(reason) => reason,
        },
        Err(e) => e.to_string(),
    };

    let backup = client_dir.join(BOOT_BACKUP_FILE);
    warn!(
        "{:?} unusable ({}), falling back to {:?}",
        primary, primary_problem, backup
    );
    let bytes = std::fs::read(&backup).map_err(|e| LauncherError::LaunchConfig {
        path: backup.clone(),
        message: e.to_string(),
    })?;
    let text = parse(&bytes).map_err(|message| LauncherError::LaunchConfig {
        path: backup.clone(),
        message,
    })?;
    write(&primary, &rewrite(text, &values))
}

fn write(path: &Path, contents: &str) -> LauncherResult<()> {
    std::fs::write(path, contents).map_err(|e| LauncherError::io(path, e))?;
    debug!("Wrote {:?}", path);
    Ok(())
}
