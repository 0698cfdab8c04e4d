//! `keysmith` — list, inspect, generate, and copy SSH keys from `~/.ssh`.

mod clipboard;

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use keysmith_core::{Generator, Key, KeySpec, KeyType, Scanner};

fn main() -> Result<()> {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str).unwrap_or("list");

    match cmd {
        "list" | "ls" => cmd_list(&args[1..]),
        "show" => cmd_show(&args[1..]),
        "generate" | "new" => cmd_generate(&args[1..]),
        "copy" => cmd_copy(&args[1..]),
        "--version" | "-v" => {
            println!("keysmith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        "\
keysmith - SSH key manager for the terminal

USAGE:
    keysmith [command] [args...]

COMMANDS:
    list [--format=<fmt>]               List keys in ~/.ssh (default command; alias: ls)
    show <name>                         Show full details for one key
    generate <name> [options]           Generate a new key pair (alias: new)
    copy <name>                         Copy a key's public half to the clipboard
    help                                Show this help

OUTPUT FORMATS (--format):
    table                               Aligned columns: NAME | TYPE | BITS | FINGERPRINT | COMMENT  [default]
    json                                JSON array of key records

OPTIONS for 'generate':
    --type=<rsa|ed25519|ecdsa>          Key type (default: ed25519)
    --bits=<n>                          Bit length; RSA >= 2048 (default 4096),
                                        ECDSA 256/384/521 (default 521)
    --comment=<text>                    Comment embedded in the public key
    --passphrase                        Prompt for a passphrase (hidden input,
                                        asked twice for confirmation)

NOTES:
    Only keys with a public half (`X.pub`) appear in the inventory — a
    private key file alone cannot be identified without decrypting it.

    'copy' writes the public key text only; private key material never
    leaves ~/.ssh.

EXAMPLES:
    keysmith
    keysmith list --format=json
    keysmith show id_ed25519
    keysmith generate id_work --comment=work@laptop
    keysmith generate id_legacy --type=rsa --bits=4096 --passphrase
    keysmith copy id_ed25519"
    );
}

fn scan_sorted() -> Result<Vec<Key>> {
    let scanner = Scanner::new()?;
    let mut keys = scanner.scan()?;
    // Ordering is a presentation concern; the scanner itself is unordered.
    keys.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(keys)
}

fn find_key(name: &str) -> Result<Key> {
    let keys = scan_sorted()?;
    keys.into_iter()
        .find(|k| k.name == name)
        .with_context(|| format!("no key named '{name}' (try 'keysmith list')"))
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

fn cmd_list(args: &[String]) -> Result<()> {
    let mut format = "table";
    for arg in args {
        if let Some(f) = arg.strip_prefix("--format=") {
            format = f;
        } else {
            bail!("unknown argument: {arg}");
        }
    }

    let keys = scan_sorted()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&keys)?),
        "table" => {
            if keys.is_empty() {
                println!("no keys found (generate one with 'keysmith generate <name>')");
            } else {
                print_key_table(&keys);
            }
        }
        other => bail!("unknown format: {other} (expected table or json)"),
    }
    Ok(())
}

/// Truncate to `max` chars with an ellipsis, respecting char boundaries.
fn trunc(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max.saturating_sub(1);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Print the inventory as an aligned table.
///
/// Columns: NAME | TYPE | BITS | FINGERPRINT | COMMENT
fn print_key_table(keys: &[Key]) {
    const H_NAME: &str = "NAME";
    const H_TYPE: &str = "TYPE";
    const H_BITS: &str = "BITS";
    const H_FP: &str = "FINGERPRINT";
    const H_COMMENT: &str = "COMMENT";

    const MAX_NAME: usize = 30;
    const MAX_COMMENT: usize = 40;

    let w_name = keys
        .iter()
        .map(|k| k.name.len().min(MAX_NAME))
        .max()
        .unwrap_or(0)
        .max(H_NAME.len());
    let w_type = keys
        .iter()
        .map(|k| k.key_type.to_string().len())
        .max()
        .unwrap_or(0)
        .max(H_TYPE.len());
    let w_bits = H_BITS.len().max(5);
    // SHA256 fingerprints are a fixed 50 chars ("SHA256:" + 43 of base64).
    let w_fp = keys
        .iter()
        .map(|k| k.fingerprint_sha256.len())
        .max()
        .unwrap_or(0)
        .max(H_FP.len());

    println!(
        "{H_NAME:<w_name$}  {H_TYPE:<w_type$}  {H_BITS:<w_bits$}  {H_FP:<w_fp$}  {H_COMMENT}"
    );
    let sep_w = w_name + 2 + w_type + 2 + w_bits + 2 + w_fp + 2 + H_COMMENT.len();
    println!("{}", "-".repeat(sep_w));

    for key in keys {
        let bits = key
            .bit_length
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        let flags = match (key.has_private, key.is_encrypted) {
            (true, true) => " [encrypted]",
            (true, false) => "",
            (false, _) => " [no private key]",
        };
        println!(
            "{:<w_name$}  {:<w_type$}  {:<w_bits$}  {:<w_fp$}  {}{}",
            trunc(&key.name, MAX_NAME),
            key.key_type,
            bits,
            key.fingerprint_sha256,
            trunc(&key.comment, MAX_COMMENT),
            flags,
        );
    }
}

fn cmd_show(args: &[String]) -> Result<()> {
    let name = args.first().context("usage: keysmith show <name>")?;
    let key = find_key(name)?;

    println!("Name:         {}", key.name);
    println!("Type:         {}", key.key_type);
    if let Some(bits) = key.bit_length {
        println!("Bits:         {bits}");
    }
    println!("SHA256:       {}", key.fingerprint_sha256);
    println!("MD5:          {}", key.fingerprint_md5);
    if !key.comment.is_empty() {
        println!("Comment:      {}", key.comment);
    }
    if let Some(path) = &key.public_path {
        println!("Public key:   {}", path.display());
    }
    match &key.private_path {
        Some(path) => {
            let enc = if key.is_encrypted {
                " (passphrase-protected)"
            } else {
                ""
            };
            println!("Private key:  {}{enc}", path.display());
        }
        None => println!("Private key:  (none)"),
    }
    if let Some(modified) = key.modified {
        println!("Modified:     {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();
    print!("{}", key.public_key);
    if !key.public_key.ends_with('\n') {
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

fn parse_key_type(s: &str) -> Result<KeyType> {
    match s {
        "rsa" => Ok(KeyType::Rsa),
        "ed25519" => Ok(KeyType::Ed25519),
        "ecdsa" => Ok(KeyType::Ecdsa),
        other => bail!("unsupported key type: {other} (expected rsa, ed25519, or ecdsa)"),
    }
}

fn cmd_generate(args: &[String]) -> Result<()> {
    let mut name: Option<&str> = None;
    let mut key_type = KeyType::Ed25519;
    let mut bits: Option<u32> = None;
    let mut comment = String::new();
    let mut want_passphrase = false;

    for arg in args {
        if let Some(v) = arg.strip_prefix("--type=") {
            key_type = parse_key_type(v)?;
        } else if let Some(v) = arg.strip_prefix("--bits=") {
            bits = Some(v.parse().with_context(|| format!("invalid bit count: {v}"))?);
        } else if let Some(v) = arg.strip_prefix("--comment=") {
            comment = v.to_string();
        } else if arg == "--passphrase" {
            want_passphrase = true;
        } else if arg.starts_with('-') {
            bail!("unknown option: {arg}");
        } else if name.is_none() {
            name = Some(arg);
        } else {
            bail!("unexpected argument: {arg}");
        }
    }
    let name = name.context(
        "usage: keysmith generate <name> [--type=...] [--bits=...] [--comment=...] [--passphrase]",
    )?;

    let generator = Generator::new()?;
    if generator.key_exists(name) {
        bail!("a key named '{name}' already exists — pick another name or remove it first");
    }

    let passphrase = if want_passphrase {
        let first = prompt_hidden("Passphrase")?;
        let second = prompt_hidden("Confirm passphrase")?;
        if first.as_str() != second.as_str() {
            bail!("passphrases do not match");
        }
        first
    } else {
        Zeroizing::new(String::new())
    };

    let spec = KeySpec {
        name: name.to_string(),
        key_type,
        bits,
        comment,
        passphrase,
    };
    generator.generate(&spec)?;

    println!("generated '{name}' ({key_type})");
    println!("run 'keysmith show {name}' to see its fingerprints");
    Ok(())
}

// ---------------------------------------------------------------------------
// copy
// ---------------------------------------------------------------------------

fn cmd_copy(args: &[String]) -> Result<()> {
    let name = args.first().context("usage: keysmith copy <name>")?;
    let key = find_key(name)?;
    clipboard::copy(&key.public_key)?;
    println!("public key '{name}' copied to clipboard");
    Ok(())
}

// ---------------------------------------------------------------------------
// Hidden terminal input
// ---------------------------------------------------------------------------

/// Read one line from `fd` with terminal echo disabled.
///
/// Saves the current `termios`, clears `ECHO`/`ECHONL`, reads a line, then
/// restores the original settings (also on the error path).  The trailing
/// newline is stripped.
#[cfg(unix)]
fn read_hidden(fd: std::os::unix::io::RawFd) -> io::Result<String> {
    use std::io::BufRead as _;
    use std::os::unix::io::FromRawFd as _;

    // SAFETY: fd is valid (the caller just opened it) and term is properly
    // initialised by tcgetattr before use.
    let orig = unsafe {
        let mut term = std::mem::MaybeUninit::<libc::termios>::uninit();
        if libc::tcgetattr(fd, term.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        term.assume_init()
    };

    let mut noecho = orig;
    noecho.c_lflag &= !(libc::ECHO as libc::tcflag_t);
    noecho.c_lflag &= !(libc::ECHONL as libc::tcflag_t);

    // TCSAFLUSH also discards unread input (stale keypresses between prompts).
    unsafe {
        if libc::tcsetattr(fd, libc::TCSAFLUSH, &noecho) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    let mut line = String::new();
    let result = {
        // SAFETY: ManuallyDrop prevents a double-close — the caller's File
        // still owns the fd.
        let file = unsafe { std::fs::File::from_raw_fd(fd) };
        let file = std::mem::ManuallyDrop::new(file);
        let mut reader = io::BufReader::new(&*file);
        reader.read_line(&mut line)
    };

    // Always restore echo before propagating errors.
    unsafe { libc::tcsetattr(fd, libc::TCSANOW, &orig) };

    // The user's Enter was not echoed; print the newline ourselves.
    let _ = unsafe { libc::write(fd, b"\n".as_ptr().cast(), 1) };

    result?;
    Ok(line
        .trim_end_matches('\n')
        .trim_end_matches('\r')
        .to_string())
}

/// Prompt on `/dev/tty` and read a hidden line from the same fd, so prompt
/// write and input read share one terminal file description.
#[cfg(unix)]
fn prompt_hidden(label: &str) -> Result<Zeroizing<String>> {
    use std::os::unix::io::AsRawFd as _;

    let tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .context("cannot open /dev/tty for passphrase input")?;

    let mut writer = &tty;
    write!(writer, "{label}: ")?;
    writer.flush()?;

    let value = read_hidden(tty.as_raw_fd())?;
    Ok(Zeroizing::new(value))
}
