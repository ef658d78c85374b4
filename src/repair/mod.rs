//! The repair attempt.
//!
//! One invocation runs one attempt through a fixed sequence of stages.
//! Core logic is split into submodules:
//! - `guard`: stop condition derived from commit history
//! - `context`: transcript scanning and file excerpts
//! - `prompt`: repair request text
//! - `safety`: patch shape, size and forbidden-path policy
//! - `git`: version-control gateway
//! - `verify`: test suite re-run
//! - `format`: terminal output
//!
//! ```text
//! Start -> GuardCheck -> Stopped
//!                     -> Collecting -> Building -> Generating -> Validating -> Rejected
//!                                                                           -> Applying -> Verifying -> Committed
//!                                                                                                    -> RolledBack
//! ```

pub(crate) mod context;
mod format;
pub(crate) mod git;
pub(crate) mod guard;
pub(crate) mod prompt;
pub(crate) mod safety;
pub(crate) mod verify;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::RepairError;
use crate::generator::{self, OpenAiGenerator, PatchGenerator};

use context::{ContextCollector, FailureTranscript};
use format::{format_banner, format_error, format_outcome, BannerInfo};
use git::{GitGateway, Vcs};
use guard::AttemptGuard;
use safety::{PatchSummary, PatchValidator};
use verify::{CommandTestSuite, TestSuite};

/// Committed, or stopped by the attempt guard.
pub(crate) const EXIT_OK: u8 = 0;
/// Patch applied but the tests still fail; the tree was rolled back.
pub(crate) const EXIT_ROLLED_BACK: u8 = 1;
/// Bad arguments, unreadable transcript or config file.
pub(crate) const EXIT_USAGE: u8 = 2;
/// Any other failure (configuration, service, safety rejection, git).
pub(crate) const EXIT_FAILURE: u8 = 3;

/// Terminal state of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// The attempt guard tripped; nothing was done.
    Skipped { attempts: usize, max_attempts: usize },
    /// The generated patch violated the safety policy and was never applied.
    PatchRejected { reason: String },
    /// The patch applied cleanly but the tests still fail; changes reverted.
    TestsStillFailing { touched: Vec<String> },
    /// The tests pass and the fix was committed.
    Committed {
        message: String,
        touched: Vec<String>,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Skipped { .. } | Self::Committed { .. } => EXIT_OK,
            Self::TestsStillFailing { .. } => EXIT_ROLLED_BACK,
            Self::PatchRejected { .. } => EXIT_FAILURE,
        }
    }

    /// Maps a safety rejection raised by the attempt to its outcome.
    pub fn from_error(err: &anyhow::Error) -> Option<Self> {
        err.downcast_ref::<RepairError>()
            .filter(|e| e.is_safety_violation())
            .map(|e| Self::PatchRejected {
                reason: e.to_string(),
            })
    }
}

/// Collaborators of a repair attempt, injectable for testing.
pub(crate) struct RepairDependencies {
    pub vcs: Box<dyn Vcs>,
    pub generator: Box<dyn PatchGenerator>,
    pub tests: Box<dyn TestSuite>,
    pub config: Config,
    pub project_dir: PathBuf,
}

/// Runs one repair attempt.
///
/// Safety violations and infrastructure failures are returned as errors.
/// Once a patch is applied, every exit path either commits or rolls back.
pub(crate) async fn run_attempt(
    deps: &RepairDependencies,
    transcript: &FailureTranscript,
) -> Result<RunOutcome> {
    let RepairDependencies {
        vcs,
        generator,
        tests,
        config,
        project_dir,
    } = deps;

    // GuardCheck
    let guard = AttemptGuard::new(config.guard.clone());
    let decision = guard.check(vcs.as_ref()).await?;
    if decision.should_stop() {
        info!(
            "Reached max attempts ({}/{}), stopping",
            decision.attempts, decision.max_attempts
        );
        return Ok(RunOutcome::Skipped {
            attempts: decision.attempts,
            max_attempts: decision.max_attempts,
        });
    }

    if config.git.require_clean_tree && vcs.has_tracked_changes().await? {
        return Err(RepairError::DirtyWorkingTree.into());
    }

    // Collecting
    let collector = ContextCollector::new(project_dir, config.context.clone())?;
    let files = collector.collect(transcript)?;
    info!("Collected {} context file(s)", files.len());
    for file in files.iter().filter(|f| f.truncated) {
        debug!("Truncated {} to {} chars", file.path, config.context.max_chars);
    }

    // Building
    let request = prompt::build(transcript, &files, &config.patch.forbidden_prefixes);
    debug!(
        "Built repair request with {} file(s), {} bytes",
        request.file_count(),
        request.as_str().len()
    );

    // Generating
    let raw = generator.generate(&request).await?;

    // Validating
    let patch = safety::extract_diff(&raw);
    let validator = PatchValidator::new(&config.patch);
    let summary = validator.validate(&patch)?;
    // Paths as git itself resolves them must pass the same policy
    let resolved = vcs.patch_paths(&patch).await?;
    validator.check_paths(&resolved)?;
    info!(
        "Patch accepted: {} line(s), {} path(s)",
        summary.line_count,
        summary.touched.len()
    );

    // Applying
    vcs.apply_patch(&patch).await?;
    let touched: Vec<String> = summary.touched.iter().cloned().collect();

    // Verifying
    let passed = match tests.run_tests().await {
        Ok(passed) => passed,
        Err(e) => {
            rollback_after_error(vcs.as_ref(), &summary).await;
            return Err(e.context("Failed to verify patch"));
        }
    };

    if !passed {
        warn!("Patch applied but tests still failing, rolling back");
        rollback(vcs.as_ref(), &summary).await?;
        return Ok(RunOutcome::TestsStillFailing { touched });
    }

    let message = config.commit_message();
    if let Err(e) = commit(vcs.as_ref(), &message).await {
        rollback_after_error(vcs.as_ref(), &summary).await;
        return Err(e);
    }

    let message = vcs.last_commit_message().await.ok().flatten().unwrap_or(message);
    info!("Committed: {}", message);
    if matches!(guard.should_stop(vcs.as_ref()).await, Ok(true)) {
        info!("Attempt limit now reached; later runs will stop at the guard");
    }
    Ok(RunOutcome::Committed { message, touched })
}

async fn commit(vcs: &dyn Vcs, message: &str) -> Result<()> {
    vcs.stage_all().await?;
    vcs.commit(message).await
}

/// Restores the tree to its pre-apply state.
async fn rollback(vcs: &dyn Vcs, summary: &PatchSummary) -> Result<()> {
    vcs.hard_reset().await?;
    let created: Vec<String> = summary.created.iter().cloned().collect();
    vcs.remove_untracked(&created).await
}

async fn rollback_after_error(vcs: &dyn Vcs, summary: &PatchSummary) {
    if let Err(e) = rollback(vcs, summary).await {
        error!("Rollback failed, working tree may contain the patch: {:#}", e);
    }
}

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Command-line inputs for a run.
#[derive(Debug, Clone)]
pub(crate) struct RunArgs {
    pub transcript: PathBuf,
    pub repo: PathBuf,
    pub config: Option<PathBuf>,
    pub model: Option<String>,
    pub test_command: Option<String>,
    pub max_attempts: Option<usize>,
}

/// Runs the tool end to end and returns the process exit code.
pub(crate) async fn run(args: RunArgs) -> u8 {
    let started_at = Utc::now();

    let (config, transcript, project_dir) = match load_inputs(&args) {
        Ok(inputs) => inputs,
        Err(e) => {
            eprint!("{}", format_error(&e));
            return EXIT_USAGE;
        }
    };

    let deps = match build_dependencies(config, project_dir, args.model.as_deref()) {
        Ok(deps) => deps,
        Err(e) => {
            eprint!("{}", format_error(&e));
            return EXIT_FAILURE;
        }
    };

    let banner = BannerInfo::new(&args.transcript, &deps);
    print!("{}", format_banner(&banner));

    let result = run_attempt(&deps, &transcript).await;
    let elapsed = Utc::now().signed_duration_since(started_at);

    match result {
        Ok(outcome) => {
            print!("{}", format_outcome(&outcome, &elapsed));
            outcome.exit_code()
        }
        Err(e) => match RunOutcome::from_error(&e) {
            Some(outcome) => {
                print!("{}", format_outcome(&outcome, &elapsed));
                outcome.exit_code()
            }
            None => {
                eprint!("{}", format_error(&e));
                EXIT_FAILURE
            }
        },
    }
}

/// Config, transcript and repository root; failures here are usage errors.
fn load_inputs(args: &RunArgs) -> Result<(Config, FailureTranscript, PathBuf)> {
    let project_dir = resolve_repo(&args.repo)?;
    let mut config =
        Config::load(&project_dir, args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(command) = &args.test_command {
        config.verify.command.clone_from(command);
    }
    if let Some(max) = args.max_attempts {
        config.guard.max_attempts = max;
    }

    let transcript = FailureTranscript::load(&args.transcript)?;
    Ok((config, transcript, project_dir))
}

fn build_dependencies(
    config: Config,
    project_dir: PathBuf,
    model_override: Option<&str>,
) -> Result<RepairDependencies> {
    let model = generator::resolve_model(&config.generator, model_override);
    let generator = OpenAiGenerator::new(&config.generator, model, generator::resolve_api_key())?;

    Ok(RepairDependencies {
        vcs: Box::new(GitGateway::new(&project_dir)),
        generator: Box::new(generator),
        tests: Box::new(CommandTestSuite::new(&project_dir, &config.verify)),
        config,
        project_dir,
    })
}

fn resolve_repo(repo: &Path) -> Result<PathBuf> {
    repo.canonicalize()
        .with_context(|| format!("Repository directory not found: {}", repo.display()))
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
