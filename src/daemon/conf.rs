//! Line-preserving model of bitcoind-style `key=value` config files.
//!
//! The daemons read the global section and then the section named after the
//! active network (`[main]`, `[liquidv1]`, ...), the latter winning. A
//! `net.key=value` line in the global section counts as part of that
//! network's section. Lookups follow the same precedence; writes land in the
//! global section and drop any copy the active network section would
//! override them with. Comments, blank lines and other networks pass through
//! untouched.

use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

use super::protocol::DaemonKind;

const MARKER_PREFIX: &str = "# nodeplane:";

/// Directives the manager reads and rewrites
pub mod keys {
    pub const MAINCHAIN_RPC_HOST: &str = "mainchainrpchost";
    pub const MAINCHAIN_RPC_PORT: &str = "mainchainrpcport";
    pub const MAINCHAIN_RPC_USER: &str = "mainchainrpcuser";
    pub const MAINCHAIN_RPC_PASSWORD: &str = "mainchainrpcpassword";
    pub const PRUNE: &str = "prune";
    /// Marker name, not a daemon directive
    pub const MAINCHAIN_SOURCE: &str = "mainchain_source";
}

/// Network a daemon runs when its config selects none
pub fn default_network(kind: DaemonKind) -> &'static str {
    match kind {
        DaemonKind::SideChain => "liquidv1",
        DaemonKind::BaseChain | DaemonKind::Lightning => "main",
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfFile {
    lines: Vec<String>,
    /// Section whose values override the global ones
    network: Option<String>,
}

struct Directive<'a> {
    line: usize,
    section: Option<&'a str>,
    key: &'a str,
    value: &'a str,
}

impl ConfFile {
    /// Parse without a network; only the global section is consulted
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            network: None,
        }
    }

    pub async fn load(path: &Path) -> io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text))
    }

    /// Load a daemon's config with its active network resolved
    pub async fn load_for(path: &Path, kind: DaemonKind) -> io::Result<Self> {
        Ok(Self::load(path).await?.for_network(default_network(kind)))
    }

    /// Resolve the active network from `chain=` or the legacy network flags,
    /// falling back to `default`
    pub fn for_network(mut self, default: &str) -> Self {
        self.network = None;
        let flagged = [("regtest", "regtest"), ("testnet", "test"), ("signet", "signet")]
            .into_iter()
            .find(|(flag, _)| self.get(flag) == Some("1"))
            .map(|(_, section)| section);
        let network = self
            .get("chain")
            .filter(|c| !c.is_empty())
            .or(flagged)
            .unwrap_or(default)
            .to_string();
        self.network = Some(network);
        self
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Number of lines in the global section
    fn global_len(&self) -> usize {
        self.lines
            .iter()
            .position(|l| section_header(l).is_some())
            .unwrap_or(self.lines.len())
    }

    fn directives(&self) -> Vec<Directive<'_>> {
        let mut section = None;
        let mut out = Vec::new();
        for (line, text) in self.lines.iter().enumerate() {
            if let Some(name) = section_header(text) {
                section = Some(name);
                continue;
            }
            let Some((key, value)) = split_directive(text) else {
                continue;
            };
            let (section, key) = match (section, key.split_once('.')) {
                (None, Some((net, key))) => (Some(net), key),
                _ => (section, key),
            };
            out.push(Directive {
                line,
                section,
                key,
                value,
            });
        }
        out
    }

    /// Lines holding `key` in the global section and in the active network's
    fn positions(&self, key: &str) -> (Vec<usize>, Vec<usize>) {
        let mut global = Vec::new();
        let mut scoped = Vec::new();
        for d in self.directives().into_iter().filter(|d| d.key == key) {
            match d.section {
                None => global.push(d.line),
                Some(s) if Some(s) == self.network.as_deref() => scoped.push(d.line),
                Some(_) => {}
            }
        }
        (global, scoped)
    }

    /// Effective value of `key`: the last occurrence in the active network's
    /// section, else the last in the global section
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut global = None;
        let mut scoped = None;
        for d in self.directives().into_iter().filter(|d| d.key == key) {
            match d.section {
                None => global = Some(d.value),
                Some(s) if Some(s) == self.network.as_deref() => scoped = Some(d.value),
                Some(_) => {}
            }
        }
        scoped.or(global)
    }

    /// Make `key=value` effective: replace the first global occurrence (or
    /// append one) and drop every other copy that would shadow it.
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format!("{key}={value}");
        let (global, scoped) = self.positions(key);

        match global.split_first() {
            Some((first, rest)) => {
                self.lines[*first] = line;
                self.remove_lines(rest.iter().chain(&scoped).copied().collect());
            }
            None => {
                self.remove_lines(scoped);
                let at = self.insert_at();
                self.lines.insert(at, line);
            }
        }
    }

    /// Remove every effective occurrence of `key`; returns whether anything
    /// changed
    pub fn remove(&mut self, key: &str) -> bool {
        let (mut lines, scoped) = self.positions(key);
        lines.extend(scoped);
        let changed = !lines.is_empty();
        self.remove_lines(lines);
        changed
    }

    fn remove_lines(&mut self, mut lines: Vec<usize>) {
        lines.sort_unstable();
        lines.dedup();
        for i in lines.into_iter().rev() {
            self.lines.remove(i);
        }
    }

    /// Read a `# nodeplane: name=value` annotation
    pub fn marker(&self, name: &str) -> Option<&str> {
        self.lines[..self.global_len()].iter().find_map(|line| {
            let rest = line.trim().strip_prefix(MARKER_PREFIX)?;
            let (k, v) = rest.trim().split_once('=')?;
            (k.trim() == name).then(|| v.trim())
        })
    }

    pub fn set_marker(&mut self, name: &str, value: &str) {
        let line = format!("{MARKER_PREFIX} {name}={value}");
        let existing = self.lines[..self.global_len()].iter().position(|l| {
            l.trim()
                .strip_prefix(MARKER_PREFIX)
                .and_then(|rest| rest.trim().split_once('='))
                .is_some_and(|(k, _)| k.trim() == name)
        });
        match existing {
            Some(i) => self.lines[i] = line,
            None => {
                let at = self.insert_at();
                self.lines.insert(at, line);
            }
        }
    }

    /// After the last non-blank line of the global section
    fn insert_at(&self) -> usize {
        let global = &self.lines[..self.global_len()];
        global
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn section_header(line: &str) -> Option<&str> {
    let name = line.trim().strip_prefix('[')?.strip_suffix(']')?;
    Some(name.trim())
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Replace `path` with `contents` via a fresh temp file in the same
/// directory and a rename, so a crash never leaves a truncated file behind.
/// The temp file gets a random name, is created exclusively with mode 0600,
/// and takes over mode and owner of the existing file before the rename.
pub async fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let path = path.to_path_buf();
    let contents = contents.to_owned();
    tokio::task::spawn_blocking(move || write_then_persist(&path, &contents))
        .await
        .map_err(io::Error::other)?
}

fn write_then_persist(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let existing = std::fs::metadata(path).ok();

    // removed on drop if anything below fails
    let mut tmp = tempfile::Builder::new()
        .prefix(".nodeplane-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;

    if let Some(meta) = existing {
        tmp.as_file().set_permissions(meta.permissions())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if let Err(e) = std::os::unix::fs::fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid())) {
                debug!("Could not carry owner over to {}: {}", path.display(), e);
            }
        }
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
