//! Key generation via `ssh-keygen`.
//!
//! The invocation is modeled as an explicit [`KeygenCommand`] value —
//! argument list plus ordered stdin lines — executed through the
//! [`KeygenRunner`] seam, so generation logic is testable with a fake
//! runner while production uses [`SystemRunner`].
//!
//! The passphrase is fed over the child's stdin (entry + confirmation,
//! matching the tool's interactive protocol) and never appears in the
//! argument list, so it cannot leak through process listings.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{storage_dir, Error, KeySpec, KeyType};

/// The external key-generation tool.
pub const KEYGEN_PROGRAM: &str = "ssh-keygen";

/// A fully-staged key-generation invocation: program, argument list, and
/// the ordered lines to feed the child over stdin.
///
/// `Debug` redacts the stdin lines — they carry the passphrase.
#[derive(Clone)]
pub struct KeygenCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Ordered stdin lines; each is written followed by a newline.
    pub stdin_lines: Vec<Zeroizing<String>>,
}

impl std::fmt::Debug for KeygenCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeygenCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin_lines", &"[redacted]")
            .finish()
    }
}

/// Outcome of running a [`KeygenCommand`].
#[derive(Debug, Clone)]
pub struct KeygenOutput {
    /// True iff the child exited with status 0.
    pub success: bool,
    /// Combined stdout + stderr, kept for error diagnostics.
    pub combined: String,
}

/// Executes a [`KeygenCommand`].  The seam between generation logic and
/// actual process execution; tests substitute a recording fake.
pub trait KeygenRunner {
    /// Run to completion (blocking, no timeout).  `Err` means the process
    /// could not be spawned or waited on, not that it exited non-zero.
    fn run(&self, cmd: &KeygenCommand) -> io::Result<KeygenOutput>;
}

/// Production runner: spawns the real subprocess with piped stdio.
pub struct SystemRunner;

impl KeygenRunner for SystemRunner {
    fn run(&self, cmd: &KeygenCommand) -> io::Result<KeygenOutput> {
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            for line in &cmd.stdin_lines {
                // The tool may close stdin early (e.g. on argument errors);
                // the exit status below carries the real failure.
                let _ = stdin.write_all(line.as_bytes());
                let _ = stdin.write_all(b"\n");
            }
            // stdin dropped here — EOF sent to child.
        }

        let output = child.wait_with_output()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(KeygenOutput {
            success: output.status.success(),
            combined,
        })
    }
}

/// Generates new SSH key pairs in the key-storage directory.
pub struct Generator {
    dir: PathBuf,
    runner: Box<dyn KeygenRunner>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Generator over the conventional per-user directory (`~/.ssh`),
    /// creating it with mode 0700 if missing.
    pub fn new() -> Result<Self, Error> {
        Self::with_runner(storage_dir()?, Box::new(SystemRunner))
    }

    /// Generator over an explicit directory, using the real subprocess
    /// runner.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::with_runner(dir.into(), Box::new(SystemRunner))
    }

    /// Generator with a custom [`KeygenRunner`].  Ensures the directory
    /// exists with owner-only permissions.
    pub fn with_runner(dir: PathBuf, runner: Box<dyn KeygenRunner>) -> Result<Self, Error> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(|source| Error::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir, runner })
    }

    /// True if a private key file with this name already exists.
    ///
    /// Callers use this to pre-empt a generation attempt with a friendlier
    /// message than the overwrite guard's error.
    pub fn key_exists(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }

    /// Generate a new key pair from `spec`.
    ///
    /// Validation runs before any filesystem mutation; the overwrite guard
    /// runs before the external tool is invoked.  On success the private
    /// key's permissions are forced to 0600 — a chmod failure is reported
    /// as an error even though key material was already written.
    pub fn generate(&self, spec: &KeySpec) -> Result<(), Error> {
        let bits = validate(spec)?;

        let key_path = self.dir.join(&spec.name);
        if key_path.exists() {
            return Err(Error::KeyExists { path: key_path });
        }

        let cmd = build_command(&key_path, spec, bits);
        info!(name = %spec.name, key_type = %spec.key_type, "generating key");

        let out = self.runner.run(&cmd).map_err(|source| Error::Spawn {
            program: cmd.program.clone(),
            source,
        })?;
        if !out.success {
            return Err(Error::KeygenFailed {
                output: out.combined,
            });
        }

        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            Error::Permissions {
                path: key_path.clone(),
                source,
            }
        })?;
        debug!(path = %key_path.display(), "private key permissions hardened");
        Ok(())
    }
}

/// Validate `spec` and resolve the effective bit length.
///
/// Returns `None` for types that take no `-b` argument (Ed25519, whose
/// key size is fixed; a supplied `bits` value is ignored for it).
fn validate(spec: &KeySpec) -> Result<Option<u32>, Error> {
    if spec.name.is_empty() {
        return Err(Error::EmptyName);
    }
    if spec.name.len() > 255 {
        return Err(Error::NameTooLong(spec.name.len()));
    }
    // No separators or spaces: prevents path traversal and multi-argument
    // injection into the tool's argument list.
    if spec.name.contains(&[' ', '/', '\\'][..]) {
        return Err(Error::InvalidNameChars);
    }

    match spec.key_type {
        KeyType::Rsa => {
            let bits = spec.bits.unwrap_or(4096);
            if bits < 2048 {
                return Err(Error::RsaBitsTooSmall(bits));
            }
            Ok(Some(bits))
        }
        KeyType::Ecdsa => {
            let bits = spec.bits.unwrap_or(521);
            if !matches!(bits, 256 | 384 | 521) {
                return Err(Error::InvalidEcdsaBits(bits));
            }
            Ok(Some(bits))
        }
        KeyType::Ed25519 => Ok(None),
        other => Err(Error::UnsupportedKeyType(other)),
    }
}

/// Assemble the full invocation for a validated spec.
///
/// `-N ""` satisfies the tool's passphrase flag; the human passphrase goes
/// over stdin instead (twice, entry + confirmation).  No passphrase means
/// two blank lines.
fn build_command(key_path: &Path, spec: &KeySpec, bits: Option<u32>) -> KeygenCommand {
    let mut args = vec![
        "-f".to_string(),
        key_path.display().to_string(),
        "-N".to_string(),
        String::new(),
        "-t".to_string(),
        spec.key_type.keygen_name().to_string(),
    ];
    if let Some(bits) = bits {
        args.push("-b".to_string());
        args.push(bits.to_string());
    }
    if !spec.comment.is_empty() {
        args.push("-C".to_string());
        args.push(spec.comment.clone());
    }

    let stdin_lines = if spec.passphrase.is_empty() {
        vec![
            Zeroizing::new(String::new()),
            Zeroizing::new(String::new()),
        ]
    } else {
        vec![spec.passphrase.clone(), spec.passphrase.clone()]
    };

    KeygenCommand {
        program: KEYGEN_PROGRAM.to_string(),
        args,
        stdin_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use tempfile::TempDir;

    /// Records every command it receives; optionally creates the private
    /// key file so the post-generation chmod has something to act on.
    struct FakeRunner {
        calls: Rc<RefCell<Vec<KeygenCommand>>>,
        success: bool,
        output: String,
        create_private: bool,
    }

    impl KeygenRunner for FakeRunner {
        fn run(&self, cmd: &KeygenCommand) -> io::Result<KeygenOutput> {
            self.calls.borrow_mut().push(cmd.clone());
            if self.create_private {
                // args[1] is the `-f` path.
                fs::write(&cmd.args[1], "private\n")?;
            }
            Ok(KeygenOutput {
                success: self.success,
                combined: self.output.clone(),
            })
        }
    }

    fn generator(dir: &TempDir, success: bool, create: bool) -> (Generator, Rc<RefCell<Vec<KeygenCommand>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let runner = FakeRunner {
            calls: Rc::clone(&calls),
            success,
            output: if success { String::new() } else { "keygen blew up".to_string() },
            create_private: create,
        };
        let gen = Generator::with_runner(dir.path().to_path_buf(), Box::new(runner)).unwrap();
        (gen, calls)
    }

    fn spec(name: &str, key_type: KeyType, bits: Option<u32>) -> KeySpec {
        KeySpec {
            name: name.to_string(),
            key_type,
            bits,
            comment: String::new(),
            passphrase: Zeroizing::new(String::new()),
        }
    }

    #[test]
    fn validation_rejects_bad_names() {
        assert!(matches!(
            validate(&spec("", KeyType::Ed25519, None)),
            Err(Error::EmptyName)
        ));
        assert!(matches!(
            validate(&spec("my key", KeyType::Ed25519, None)),
            Err(Error::InvalidNameChars)
        ));
        assert!(matches!(
            validate(&spec("../escape", KeyType::Ed25519, None)),
            Err(Error::InvalidNameChars)
        ));
        assert!(matches!(
            validate(&spec("back\\slash", KeyType::Ed25519, None)),
            Err(Error::InvalidNameChars)
        ));
        let long = "x".repeat(256);
        assert!(matches!(
            validate(&spec(&long, KeyType::Ed25519, None)),
            Err(Error::NameTooLong(256))
        ));
    }

    #[test]
    fn validation_enforces_per_type_bits() {
        assert!(matches!(
            validate(&spec("k", KeyType::Rsa, Some(1024))),
            Err(Error::RsaBitsTooSmall(1024))
        ));
        assert_eq!(validate(&spec("k", KeyType::Rsa, Some(4096))).unwrap(), Some(4096));
        // RSA defaults to 4096 when unset.
        assert_eq!(validate(&spec("k", KeyType::Rsa, None)).unwrap(), Some(4096));

        assert!(matches!(
            validate(&spec("k", KeyType::Ecdsa, Some(512))),
            Err(Error::InvalidEcdsaBits(512))
        ));
        assert_eq!(validate(&spec("k", KeyType::Ecdsa, Some(256))).unwrap(), Some(256));
        // ECDSA defaults to 521 when unset.
        assert_eq!(validate(&spec("k", KeyType::Ecdsa, None)).unwrap(), Some(521));

        assert_eq!(validate(&spec("k", KeyType::Ed25519, None)).unwrap(), None);

        assert!(matches!(
            validate(&spec("k", KeyType::Dsa, None)),
            Err(Error::UnsupportedKeyType(KeyType::Dsa))
        ));
        assert!(matches!(
            validate(&spec("k", KeyType::Unknown, None)),
            Err(Error::UnsupportedKeyType(KeyType::Unknown))
        ));
    }

    #[test]
    fn existing_key_fails_before_the_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("id_rsa"), "existing\n").unwrap();

        let (gen, calls) = generator(&dir, true, true);
        let err = gen.generate(&spec("id_rsa", KeyType::Rsa, None)).unwrap_err();
        assert!(matches!(err, Error::KeyExists { .. }));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn builds_expected_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, calls) = generator(&dir, true, true);

        let mut s = spec("id_test", KeyType::Rsa, None);
        s.comment = "work laptop".to_string();
        gen.generate(&s).unwrap();

        let calls = calls.borrow();
        let cmd = &calls[0];
        assert_eq!(cmd.program, "ssh-keygen");
        let key_path = dir.path().join("id_test").display().to_string();
        assert_eq!(
            cmd.args,
            vec![
                "-f".to_string(),
                key_path,
                "-N".to_string(),
                String::new(),
                "-t".to_string(),
                "rsa".to_string(),
                "-b".to_string(),
                "4096".to_string(),
                "-C".to_string(),
                "work laptop".to_string(),
            ]
        );
    }

    #[test]
    fn ed25519_takes_no_bits_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, calls) = generator(&dir, true, true);

        gen.generate(&spec("id_test", KeyType::Ed25519, None)).unwrap();

        let calls = calls.borrow();
        assert!(!calls[0].args.contains(&"-b".to_string()));
        assert!(calls[0].args.contains(&"ed25519".to_string()));
    }

    #[test]
    fn empty_passphrase_feeds_two_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, calls) = generator(&dir, true, true);

        gen.generate(&spec("id_test", KeyType::Ed25519, None)).unwrap();

        let calls = calls.borrow();
        let lines: Vec<&str> = calls[0].stdin_lines.iter().map(|l| l.as_str()).collect();
        assert_eq!(lines, vec!["", ""]);
    }

    #[test]
    fn passphrase_is_fed_twice_for_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, calls) = generator(&dir, true, true);

        let mut s = spec("id_test", KeyType::Ed25519, None);
        s.passphrase = Zeroizing::new("s3cret".to_string());
        gen.generate(&s).unwrap();

        let calls = calls.borrow();
        let lines: Vec<&str> = calls[0].stdin_lines.iter().map(|l| l.as_str()).collect();
        assert_eq!(lines, vec!["s3cret", "s3cret"]);
    }

    #[test]
    fn tool_failure_surfaces_captured_output() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, _calls) = generator(&dir, false, false);

        let err = gen.generate(&spec("id_test", KeyType::Ed25519, None)).unwrap_err();
        match err {
            Error::KeygenFailed { output } => assert!(output.contains("keygen blew up")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_distinct_from_tool_failure() {
        struct NoSpawn;
        impl KeygenRunner for NoSpawn {
            fn run(&self, _cmd: &KeygenCommand) -> io::Result<KeygenOutput> {
                Err(io::Error::new(io::ErrorKind::NotFound, "no ssh-keygen"))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let gen = Generator::with_runner(dir.path().to_path_buf(), Box::new(NoSpawn)).unwrap();

        let err = gen.generate(&spec("id_test", KeyType::Ed25519, None)).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn successful_generation_hardens_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, _calls) = generator(&dir, true, true);

        gen.generate(&spec("id_test", KeyType::Ed25519, None)).unwrap();

        let mode = fs::metadata(dir.path().join("id_test"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn key_exists_checks_the_private_path() {
        let dir = tempfile::tempdir().unwrap();
        let (gen, _calls) = generator(&dir, true, true);

        assert!(!gen.key_exists("id_test"));
        fs::write(dir.path().join("id_test"), "x").unwrap();
        assert!(gen.key_exists("id_test"));
    }

    #[test]
    fn keygen_command_debug_redacts_stdin() {
        let cmd = build_command(
            Path::new("/tmp/id_test"),
            &{
                let mut s = spec("id_test", KeyType::Ed25519, None);
                s.passphrase = Zeroizing::new("topsecret".to_string());
                s
            },
            None,
        );
        let debug = format!("{cmd:?}");
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains("topsecret"));
    }
}
