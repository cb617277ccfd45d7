//! Startup discovery of the external renderer and e-book converter.
//!
//! Candidates are probed in priority order with `--version` under a bounded timeout; the
//! first one that answers successfully becomes the immutable [`Capability`] used for the
//! lifetime of the process. Finding nothing is not fatal: the service starts degraded.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RendererSettings;

const RENDERER_PROGRAM: &str = "asciidoctor";
const BUNDLER_PROGRAM: &str = "bundle";
const WELL_KNOWN_DIRS: [&str; 3] = ["/usr/local/bin", "/usr/bin", "/opt/homebrew/bin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// `bundle exec <program>`, optionally pinned to a Gemfile.
    Bundler,
    /// An executable found in a configured or well-known directory.
    DirectPath,
    /// A bare program name resolved through the process search path.
    SystemPath,
}

/// Resolved invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
    pub strategy: DiscoveryStrategy,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<(String, PathBuf)>,
}

impl Capability {
    /// Start a command for this tool with the prefix arguments and environment applied.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.prefix_args);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        command
    }

    /// Human-readable invocation, e.g. `bundle exec asciidoctor`.
    pub fn display_invocation(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.prefix_args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A not-yet-verified way of invoking a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
    pub strategy: DiscoveryStrategy,
    pub envs: Vec<(String, PathBuf)>,
}

impl Candidate {
    fn direct(program: PathBuf, strategy: DiscoveryStrategy) -> Self {
        Self {
            program,
            prefix_args: Vec::new(),
            strategy,
            envs: Vec::new(),
        }
    }
}

/// Renderer candidates in probe order.
pub fn renderer_candidates(settings: &RendererSettings) -> Vec<Candidate> {
    let mut candidates = vec![Candidate {
        program: PathBuf::from(BUNDLER_PROGRAM),
        prefix_args: vec!["exec".to_string(), RENDERER_PROGRAM.to_string()],
        strategy: DiscoveryStrategy::Bundler,
        envs: settings
            .gemfile
            .iter()
            .map(|gemfile| ("BUNDLE_GEMFILE".to_string(), gemfile.clone()))
            .collect(),
    }];

    candidates.extend(directory_candidates(
        settings.search_paths.iter().map(PathBuf::as_path),
        Path::new(RENDERER_PROGRAM),
    ));
    candidates.push(Candidate::direct(
        PathBuf::from(RENDERER_PROGRAM),
        DiscoveryStrategy::SystemPath,
    ));
    candidates
}

/// E-book converter candidates in probe order.
///
/// A configured path containing a directory component is used as-is; a bare name is
/// looked up in the search paths, the well-known directories and finally the process
/// search path.
pub fn ebook_converter_candidates(settings: &RendererSettings) -> Vec<Candidate> {
    let configured = settings.ebook_converter.as_path();
    if configured.components().count() > 1 {
        return vec![Candidate::direct(
            configured.to_path_buf(),
            DiscoveryStrategy::DirectPath,
        )];
    }

    let mut candidates: Vec<Candidate> =
        directory_candidates(settings.search_paths.iter().map(PathBuf::as_path), configured)
            .collect();
    candidates.push(Candidate::direct(
        configured.to_path_buf(),
        DiscoveryStrategy::SystemPath,
    ));
    candidates
}

fn directory_candidates<'a>(
    search_paths: impl Iterator<Item = &'a Path> + 'a,
    program: &'a Path,
) -> impl Iterator<Item = Candidate> + 'a {
    search_paths
        .chain(WELL_KNOWN_DIRS.iter().map(Path::new))
        .map(move |dir| Candidate::direct(dir.join(program), DiscoveryStrategy::DirectPath))
}

pub async fn discover_renderer(settings: &RendererSettings) -> Option<Capability> {
    discover("renderer", renderer_candidates(settings), settings.probe_timeout).await
}

pub async fn discover_ebook_converter(settings: &RendererSettings) -> Option<Capability> {
    discover(
        "ebook_converter",
        ebook_converter_candidates(settings),
        settings.probe_timeout,
    )
    .await
}

async fn discover(
    tool: &'static str,
    candidates: Vec<Candidate>,
    probe_timeout: Duration,
) -> Option<Capability> {
    let started_at = Instant::now();

    for candidate in candidates {
        if candidate.strategy == DiscoveryStrategy::DirectPath
            && tokio::fs::metadata(&candidate.program).await.is_err()
        {
            continue;
        }

        match probe(&candidate, probe_timeout).await {
            Ok(capability) => {
                info!(
                    target = "presswork::application::convert::discovery",
                    op = "discovery::probe",
                    tool,
                    strategy = ?capability.strategy,
                    invocation = %capability.display_invocation(),
                    version = %capability.version,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "External tool discovered"
                );
                return Some(capability);
            }
            Err(reason) => {
                debug!(
                    target = "presswork::application::convert::discovery",
                    op = "discovery::probe",
                    tool,
                    program = %candidate.program.display(),
                    strategy = ?candidate.strategy,
                    reason = %reason,
                    "Candidate rejected"
                );
            }
        }
    }

    warn!(
        target = "presswork::application::convert::discovery",
        op = "discovery::probe",
        tool,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "No working candidate found"
    );
    None
}

async fn probe(candidate: &Candidate, probe_timeout: Duration) -> Result<Capability, String> {
    let mut command = Command::new(&candidate.program);
    command
        .args(&candidate.prefix_args)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &candidate.envs {
        command.env(key, value);
    }

    let output = tokio::time::timeout(probe_timeout, command.output())
        .await
        .map_err(|_| format!("no answer within {}s", probe_timeout.as_secs()))?
        .map_err(|err| format!("failed to spawn: {err}"))?;

    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }

    Ok(Capability {
        program: candidate.program.clone(),
        prefix_args: candidate.prefix_args.clone(),
        strategy: candidate.strategy,
        version: first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| "unknown".to_string()),
        envs: candidate.envs.clone(),
    })
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
