//! System clipboard bridge.
//!
//! Write-only: the CLI copies public key text out, never reads the
//! clipboard and never touches private key material.  Implemented by
//! shelling out to the platform clipboard helper with the text piped over
//! stdin, so no extra dependency is carried for a single write call.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

const NO_ARGS: &[&str] = &[];

/// Candidate helpers in preference order for the current environment.
fn helpers() -> Vec<(&'static str, &'static [&'static str])> {
    if cfg!(target_os = "macos") {
        return vec![("pbcopy", NO_ARGS)];
    }
    let mut list: Vec<(&'static str, &'static [&'static str])> = Vec::new();
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        list.push(("wl-copy", NO_ARGS));
    }
    list.push(("xclip", &["-selection", "clipboard"]));
    list.push(("xsel", &["--clipboard", "--input"]));
    list
}

/// Write `text` to the system clipboard.
///
/// Tries each available helper in turn; a helper that is missing or exits
/// non-zero falls through to the next.
pub fn copy(text: &str) -> Result<()> {
    let candidates = helpers();
    for (program, args) in &candidates {
        let spawned = Command::new(program)
            .args(*args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).context(format!("failed to launch {program}"));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .with_context(|| format!("failed to write to {program}"))?;
            // stdin dropped here — EOF tells the helper the text is complete.
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait on {program}"))?;
        if status.success() {
            return Ok(());
        }
    }

    let tried: Vec<&str> = candidates.iter().map(|(p, _)| *p).collect();
    bail!("no clipboard helper available (tried: {})", tried.join(", "));
}
