use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use repo_mechanic::config::{load_from_path, load_policy, PolicyConfig};
use repo_mechanic::{
    affected_paths, latest_run, run_batch, AuditSink, CheckRunner, CommandCheckRunner, Event,
    GitCheckpointer, NoChecks, PatchApplier, PatchStatus, ReceiptRun, RevertDecision, RunOptions,
    RunReport, StepOutcome,
};
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "repo-mechanic")]
#[command(about = "Guarded application of machine-generated unified diffs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a batch of diffs to a working tree
    Apply {
        /// Root of the working tree
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Diff file to apply (repeatable, applied in the order given)
        #[arg(short, long = "diff")]
        diffs: Vec<PathBuf>,

        /// Apply every *.diff and *.patch file in this directory, sorted by name
        #[arg(long)]
        diffs_dir: Option<PathBuf>,

        /// Modify files (default is a dry run)
        #[arg(short, long)]
        write: bool,

        /// Apply at most this many diffs
        #[arg(long, default_value_t = 10)]
        max_steps: usize,

        /// Check command run before and after the batch, e.g. "pytest -q"
        #[arg(long)]
        check_cmd: Option<String>,

        /// Policy file (defaults to repo-mechanic.toml in the root)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory receiving per-run receipts
        #[arg(long, default_value = "receipts")]
        receipts: PathBuf,

        /// Show unified diff of changed files
        #[arg(long)]
        show_diff: bool,
    },

    /// Run the policy guard on a diff without touching the tree
    Check {
        /// Diff file to check
        #[arg(short, long)]
        diff: PathBuf,

        /// Root whose policy file applies
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Policy file (defaults to repo-mechanic.toml in the root)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the summary of the most recent run
    Receipts {
        /// Directory holding per-run receipts
        #[arg(long, default_value = "receipts")]
        receipts: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            path,
            diffs,
            diffs_dir,
            write,
            max_steps,
            check_cmd,
            config,
            receipts,
            show_diff,
        } => cmd_apply(ApplyArgs {
            path,
            diffs,
            diffs_dir,
            write,
            max_steps,
            check_cmd,
            config,
            receipts,
            show_diff,
        }),

        Commands::Check { diff, root, config } => cmd_check(&diff, &root, config.as_deref()),

        Commands::Receipts { receipts } => cmd_receipts(&receipts),
    }
}

struct ApplyArgs {
    path: PathBuf,
    diffs: Vec<PathBuf>,
    diffs_dir: Option<PathBuf>,
    write: bool,
    max_steps: usize,
    check_cmd: Option<String>,
    config: Option<PathBuf>,
    receipts: PathBuf,
    show_diff: bool,
}

/// Explicit `--config` wins over the root's policy file.
fn resolve_policy(root: &Path, config: Option<&Path>) -> Result<PolicyConfig> {
    let policy = match config {
        Some(path) => load_from_path(path)?,
        None => load_policy(root)?,
    };
    log::debug!(
        "policy: allowlist [{}], max {} lines",
        policy.allowlist_prefixes.join(", "),
        policy.max_patch_lines
    );
    Ok(policy)
}

/// Collect diff files: explicit ones first, then the directory's, sorted.
fn collect_diff_files(diffs: &[PathBuf], diffs_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut files = diffs.to_vec();

    if let Some(dir) = diffs_dir {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).max_depth(1) {
            let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
            let is_diff = matches!(
                entry.path().extension().and_then(|s| s.to_str()),
                Some("diff" | "patch")
            );
            if entry.file_type().is_file() && is_diff {
                found.push(entry.into_path());
            }
        }
        found.sort();
        files.extend(found);
    }

    if files.is_empty() {
        anyhow::bail!("No diffs given: pass --diff <FILE> or --diffs-dir <DIR>");
    }
    Ok(files)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {file} (original)").dimmed());
    println!("{}", format!("+++ {file} (patched)").dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Read every file the diffs name, for `--show-diff`.
fn capture_contents(root: &Path, diffs: &[String]) -> BTreeMap<String, String> {
    diffs
        .iter()
        .flat_map(|diff| affected_paths(diff))
        .filter_map(|file| {
            let content = fs::read_to_string(root.join(&file)).ok()?;
            Some((file, content))
        })
        .collect()
}

fn cmd_apply(args: ApplyArgs) -> Result<()> {
    // 1. Resolve root
    if !args.path.exists() {
        eprintln!(
            "{}",
            format!("Path does not exist: {}", args.path.display()).red()
        );
        std::process::exit(2);
    }
    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", args.path.display()))?;

    // 2. Policy and diffs
    let policy = resolve_policy(&root, args.config.as_deref())?;
    let diff_files = collect_diff_files(&args.diffs, args.diffs_dir.as_deref())?;
    let mut diffs = Vec::with_capacity(diff_files.len());
    for file in &diff_files {
        let text = fs::read_to_string(file)
            .with_context(|| format!("failed to read diff {}", file.display()))?;
        diffs.push(text);
    }

    let dry_run = !args.write;
    let options = RunOptions {
        dry_run,
        max_steps: args.max_steps,
    };

    println!("Root: {}", root.display());
    if dry_run {
        println!("{}", "[DRY RUN - pass --write to modify files]".cyan());
    }
    println!();

    // 3. Receipts
    let mut run = ReceiptRun::start(&args.receipts)
        .with_context(|| format!("failed to create receipts under {}", args.receipts.display()))?;
    run.record(Event::Meta {
        command: std::env::args().collect::<Vec<_>>().join(" "),
        timestamp: chrono::Utc::now().to_rfc3339(),
        path: root.display().to_string(),
        dry_run,
        max_steps: args.max_steps,
    });

    let before_contents = if args.show_diff && !dry_run {
        capture_contents(&root, &diffs)
    } else {
        BTreeMap::new()
    };

    // 4. Run the batch
    let applier = PatchApplier::new(&policy);
    let checkpointer = match receipts_inside(&root, &args.receipts) {
        Some(dir) => GitCheckpointer::new().excluding(dir),
        None => GitCheckpointer::new(),
    };
    let report = match &args.check_cmd {
        Some(cmd) => {
            let checks = CommandCheckRunner::from_command_line(cmd)?;
            execute(&root, &diffs, &options, &applier, &checks, &checkpointer, &mut run)?
        }
        None => execute(&root, &diffs, &options, &applier, &NoChecks, &checkpointer, &mut run)?,
    };

    // 5. Report results
    for (file, step) in diff_files.iter().zip(&report.steps) {
        let name = file.display();
        match step {
            StepOutcome::Applied(result) => match result.status() {
                PatchStatus::Clean => println!("{} {}: {}", "✓".green(), name, result),
                PatchStatus::WithCaveats => {
                    println!("{} {}: {}", "⚠".yellow(), name, result)
                }
                PatchStatus::Rejected => eprintln!("{} {}: {}", "✗".red(), name, result),
            },
            StepOutcome::Errored(message) => {
                eprintln!("{} {}: Error - {}", "✗".red(), name, message)
            }
        }
    }
    if diffs.len() > args.max_steps {
        println!(
            "{}",
            format!(
                "{} diffs not attempted (--max-steps {})",
                diffs.len() - args.max_steps,
                args.max_steps
            )
            .dimmed()
        );
    }

    if args.show_diff {
        for (file, before) in &before_contents {
            if let Ok(after) = fs::read_to_string(root.join(file)) {
                if before != &after {
                    display_diff(file, before, &after);
                }
            }
        }
    }

    // 6. Summary
    let summary = summary_lines(&report, dry_run);
    println!();
    println!("{}", "Summary:".bold());
    for line in &summary {
        println!("  {line}");
    }
    run.write_summary("Repo Mechanic Run", &summary);
    println!("\nReceipts: {}", run.run_dir().display());
    if let Some(err) = run.last_error() {
        eprintln!(
            "{}",
            format!("Warning: some receipts were not written: {err}").yellow()
        );
    }

    let revert_failed = matches!(report.revert, Some(RevertDecision::Reverted { ok: false, .. }));
    if report.rejected() > 0 || report.errored() > 0 || revert_failed {
        std::process::exit(1);
    }

    Ok(())
}

/// The receipts directory relative to `root`, when it lives inside it.
///
/// A rollback must not rewind the run's own receipts.
fn receipts_inside(root: &Path, receipts: &Path) -> Option<PathBuf> {
    let receipts = receipts.canonicalize().ok()?;
    let relative = receipts.strip_prefix(root).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative.to_path_buf())
}

fn execute<C: CheckRunner>(
    root: &Path,
    diffs: &[String],
    options: &RunOptions,
    applier: &PatchApplier<'_>,
    checks: &C,
    checkpointer: &GitCheckpointer,
    run: &mut ReceiptRun,
) -> Result<RunReport> {
    Ok(run_batch(root, diffs, options, applier, checks, checkpointer, run)?)
}

fn summary_lines(report: &RunReport, dry_run: bool) -> Vec<String> {
    let applied = report.steps.len() - report.rejected() - report.errored();
    let mut lines = vec![
        format!("mode: {}", if dry_run { "dry-run" } else { "write" }),
        format!("diffs attempted: {}", report.steps.len()),
        format!("applied: {applied}"),
        format!("rejected: {}", report.rejected()),
        format!("errors: {}", report.errored()),
        format!(
            "failures: {} before, {} after",
            report.before.failure_count(),
            report.after.failure_count()
        ),
    ];
    if !report.applied_files.is_empty() {
        lines.push(format!("files: {}", report.applied_files.join(", ")));
    }
    lines.push(match &report.revert {
        None => "snapshot: none (dry run)".to_string(),
        Some(RevertDecision::Unprotected) => "snapshot: unavailable, changes kept".to_string(),
        Some(RevertDecision::Kept { snapshot }) => format!("snapshot {snapshot}: changes kept"),
        Some(RevertDecision::Reverted {
            snapshot,
            ok: true,
            ..
        }) => format!("snapshot {snapshot}: reverted after regression"),
        Some(RevertDecision::Reverted {
            snapshot, error, ..
        }) => format!(
            "snapshot {snapshot}: revert FAILED ({})",
            error.as_deref().unwrap_or("unknown error")
        ),
    });
    lines
}

fn cmd_check(diff: &Path, root: &Path, config: Option<&Path>) -> Result<()> {
    let text =
        fs::read_to_string(diff).with_context(|| format!("failed to read diff {}", diff.display()))?;
    let policy = resolve_policy(root, config)?;
    let verdict = repo_mechanic::validate(&text, &policy);

    println!("Files: {}", verdict.files.join(", "));
    println!(
        "Changed lines: {} (max {})",
        verdict.changed_lines, policy.max_patch_lines
    );

    if verdict.ok {
        println!("{} {}", "✓".green(), "Accepted".green().bold());
        return Ok(());
    }

    eprintln!("{} {}", "✗".red(), "Rejected".red().bold());
    for reason in &verdict.reasons {
        eprintln!("  - {reason}");
    }
    std::process::exit(1);
}

fn cmd_receipts(receipts: &Path) -> Result<()> {
    let Some(run_dir) = latest_run(receipts) else {
        anyhow::bail!("No runs found under {}", receipts.display());
    };
    let summary_path = run_dir.join(repo_mechanic::receipts::SUMMARY_FILE);
    let summary = fs::read_to_string(&summary_path)
        .with_context(|| format!("failed to read {}", summary_path.display()))?;

    println!("{}", run_dir.display().to_string().dimmed());
    print!("{summary}");
    Ok(())
}
