//! Running the external GTFS-RT validator over downloaded feeds.
//!
//! The validation rules live outside this crate. A [`FeedValidator`] only has
//! to leave `*.results.json` files inside the feed directory; the analyzers
//! pick them up from there.

use crate::analyzers::types::{FailureStage, FeedFailure};
use crate::error::ValidationError;
use crate::layout::OnDiskFeed;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

#[async_trait]
pub trait FeedValidator: Send + Sync {
    async fn validate(&self, feed: &OnDiskFeed) -> Result<(), ValidationError>;
}

/// A validator invocation: program plus argument template.
///
/// Arguments may contain `{gtfs}` (static zip), `{realtime}` (snapshot
/// directory) and `{feed}` (feed directory); each is replaced per feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ValidatorCommand {
    /// Splits a command line on whitespace. `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn args_for(&self, feed: &OnDiskFeed) -> Vec<String> {
        let gtfs = feed.gtfs_file();
        let realtime = feed.realtime_dir();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{gtfs}", &path_arg(&gtfs))
                    .replace("{realtime}", &path_arg(&realtime))
                    .replace("{feed}", &path_arg(&feed.directory))
            })
            .collect()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Spawns [`ValidatorCommand`] once per feed, inside the feed directory.
pub struct CommandValidator {
    command: ValidatorCommand,
}

impl CommandValidator {
    pub fn new(command: ValidatorCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl FeedValidator for CommandValidator {
    async fn validate(&self, feed: &OnDiskFeed) -> Result<(), ValidationError> {
        let region_id = &feed.descriptor.region_id;
        let has_snapshots = feed.snapshots().map(|s| !s.is_empty()).unwrap_or(false);
        if !has_snapshots {
            return Err(ValidationError::Unavailable(region_id.clone()));
        }

        let args = self.command.args_for(feed);
        debug!(program = %self.command.program, ?args, "Starting validator");

        let status = Command::new(&self.command.program)
            .args(&args)
            .current_dir(&feed.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ValidationError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ValidationError::Failed {
                region_id: region_id.clone(),
                status: status.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub validated: usize,
    /// Feeds the validator had nothing to run against.
    pub unavailable: usize,
    pub failures: Vec<FeedFailure>,
}

/// Validates every feed on a pool of `concurrency` tasks.
///
/// Unavailable feeds are only counted; they show up as not validated once
/// the results are analyzed. Every other failure is reported per feed.
#[tracing::instrument(skip_all, fields(feeds = feeds.len(), concurrency = concurrency))]
pub async fn validate_all(
    validator: Arc<dyn FeedValidator>,
    feeds: Vec<OnDiskFeed>,
    concurrency: usize,
) -> ValidationReport {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(feeds.len());

    for feed in feeds {
        let sem = semaphore.clone();
        let validator = Arc::clone(&validator);
        let span = tracing::info_span!("validate_feed", region_id = %feed.descriptor.region_id);
        let task_feed = feed.clone();

        let task = tokio::spawn(
            async move {
                match sem.acquire().await {
                    Ok(_permit) => validator.validate(&task_feed).await,
                    Err(e) => Err(ValidationError::Failed {
                        region_id: task_feed.descriptor.region_id.clone(),
                        status: e.to_string(),
                    }),
                }
            }
            .instrument(span),
        );
        tasks.push((feed, task));
    }

    let mut report = ValidationReport::default();
    for (feed, task) in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ValidationError::Failed {
                region_id: feed.descriptor.region_id.clone(),
                status: e.to_string(),
            }),
        };

        match outcome {
            Ok(()) => report.validated += 1,
            Err(ValidationError::Unavailable(region_id)) => {
                warn!(%region_id, "Nothing to validate");
                report.unavailable += 1;
            }
            Err(e) => {
                error!(region_id = %feed.descriptor.region_id, error = %e, "Validation failed");
                report.failures.push(FeedFailure {
                    region_id: feed.descriptor.region_id.clone(),
                    title: feed.descriptor.title.clone(),
                    stage: FailureStage::Validation,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        validated = report.validated,
        unavailable = report.unavailable,
        failed = report.failures.len(),
        "Validation complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::FeedDescriptor;
    use std::fs;

    fn feed_with_snapshot(root: &Path, region_id: &str, snapshot: bool) -> OnDiskFeed {
        let feed = OnDiskFeed::locate(
            root,
            &FeedDescriptor {
                region_id: region_id.into(),
                title: String::new(),
                gtfs_url: "http://x/gtfs.zip".into(),
                gtfs_rt_url: None,
            },
        );
        fs::create_dir_all(feed.realtime_dir()).unwrap();
        if snapshot {
            fs::write(feed.realtime_dir().join("1000.pb"), b"x").unwrap();
        }
        feed
    }

    #[test]
    fn test_parse_command_line() {
        let cmd = ValidatorCommand::parse("java -jar validator.jar -gtfs {gtfs}").unwrap();
        assert_eq!(cmd.program, "java");
        assert_eq!(cmd.args, vec!["-jar", "validator.jar", "-gtfs", "{gtfs}"]);
        assert_eq!(ValidatorCommand::parse("   "), None);
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let feed = feed_with_snapshot(dir.path(), "R1", false);
        let cmd = ValidatorCommand::parse("v -gtfs {gtfs} -gtfsRealtimePath {realtime}").unwrap();

        let args = cmd.args_for(&feed);

        assert_eq!(args[1], path_arg(&feed.gtfs_file()));
        assert_eq!(args[3], path_arg(&feed.realtime_dir()));
    }

    #[tokio::test]
    async fn test_feed_without_snapshots_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let feed = feed_with_snapshot(dir.path(), "R1", false);
        let validator = CommandValidator::new(ValidatorCommand::parse("true").unwrap());

        let result = validator.validate(&feed).await;

        assert!(matches!(result, Err(ValidationError::Unavailable(id)) if id == "R1"));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let feed = feed_with_snapshot(dir.path(), "R1", true);
        let validator =
            CommandValidator::new(ValidatorCommand::parse("no-such-validator-binary").unwrap());

        let result = validator.validate(&feed).await;

        assert!(matches!(result, Err(ValidationError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validate_all_collects_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let feeds = vec![
            feed_with_snapshot(dir.path(), "EMPTY", false),
            feed_with_snapshot(dir.path(), "R1", true),
            feed_with_snapshot(dir.path(), "R2", true),
        ];

        let ok: Arc<dyn FeedValidator> =
            Arc::new(CommandValidator::new(ValidatorCommand::parse("true").unwrap()));
        let report = validate_all(ok, feeds.clone(), 2).await;
        assert_eq!(report.validated, 2);
        assert_eq!(report.unavailable, 1);
        assert!(report.failures.is_empty());

        let failing: Arc<dyn FeedValidator> =
            Arc::new(CommandValidator::new(ValidatorCommand::parse("false").unwrap()));
        let report = validate_all(failing, feeds, 2).await;
        assert_eq!(report.validated, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].region_id, "R1");
        assert_eq!(report.failures[0].stage, FailureStage::Validation);
    }
}
