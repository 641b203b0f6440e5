//! Command flow and batch orchestration.
//!
//! A batch drives [`Context::build_character`] over an ordered list of tokens.
//! Tokens run strictly one after the other on the same scene:
//!
//! 1. wait the settle delay (from the second token on)
//! 2. check the cancel flag, which is never looked at mid-token
//! 3. reset the scene, then resolve, assemble, composite and rig
//! 4. optionally export the rigged character
//! 5. shift the token's objects by `index * offset_x` along X
//!
//! A token that fails is logged in its own entry and the batch continues.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context as _;
use cgmath::Vector3;
use clap::Subcommand;
use log::{error, info, warn};
use serde_json::Value;

use crate::{
    catalog::TokenId,
    config::AssemblerConfig,
    context::{BuildReport, Context},
    data_structures::scene_graph::ObjectKind,
    error::{BatchFileError, CatalogError, TokenError},
    resources::load_string,
};

/// One entry of a batch file: the raw value and the token it parsed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchToken {
    pub raw: String,
    pub token: Result<TokenId, TokenError>,
}

impl BatchToken {
    pub fn from_value(value: &Value, max: u32) -> Self {
        let (raw, token) = match value {
            Value::String(s) => (s.clone(), TokenId::parse(s, max)),
            Value::Number(n) => {
                let raw = n.to_string();
                let token = match n.as_i64() {
                    Some(v) => TokenId::checked(v, max),
                    None => Err(TokenError::NotANumber(raw.clone())),
                };
                (raw, token)
            }
            other => (other.to_string(), Err(TokenError::NotANumber(other.to_string()))),
        };
        Self { raw, token }
    }
}

/// Reads a `.json` file holding an array of token ids (numbers or strings).
pub async fn load_batch_file(path: &Path, max: u32) -> Result<Vec<BatchToken>, BatchFileError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(BatchFileError::NotJson(path.to_path_buf()));
    }
    let text = load_string(path)
        .await
        .map_err(|e| CatalogError::from_io(path, e))?;
    parse_batch(&text, path, max)
}

pub fn parse_batch(text: &str, path: &Path, max: u32) -> Result<Vec<BatchToken>, BatchFileError> {
    let value: Value = serde_json::from_str(text).map_err(|source| CatalogError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(items) = value else {
        return Err(BatchFileError::NotAnArray(path.to_path_buf()));
    };
    Ok(items.iter().map(|item| BatchToken::from_value(item, max)).collect())
}

/// What happened to a built token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    pub token: TokenId,
    /// Name of the rigged armature, if rigging succeeded.
    pub character: Option<String>,
    pub parts: usize,
    pub failures: Vec<String>,
    pub exported: Option<PathBuf>,
    pub elapsed: Duration,
}

impl BuildSummary {
    fn from_report(report: &BuildReport) -> Self {
        Self {
            token: report.token,
            character: report.rig.as_ref().ok().map(|rigged| rigged.name.clone()),
            parts: report.assembly.parts.len(),
            failures: report.failures(),
            exported: None,
            elapsed: report.elapsed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenOutcome {
    /// The entry is not a usable token id; nothing was built.
    Invalid(TokenError),
    Built(BuildSummary),
}

impl TokenOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            TokenOutcome::Invalid(_) => false,
            TokenOutcome::Built(summary) => summary.failures.is_empty(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    pub index: usize,
    pub raw: String,
    pub outcome: TokenOutcome,
}

/// Ordered per-token log of a batch run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchLog {
    pub entries: Vec<BatchEntry>,
    /// The batch stopped early because the cancel flag was raised.
    pub cancelled: bool,
}

impl BatchLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

/// Runs every token in order on `ctx`'s scene. Returns the partial log when cancelled.
pub async fn run_batch(ctx: &mut Context, tokens: &[BatchToken], cancel: &AtomicBool) -> BatchLog {
    let mut log = BatchLog::default();
    let batch = ctx.config.batch.clone();
    for (index, entry) in tokens.iter().enumerate() {
        if index > 0 && !batch.settle().is_zero() {
            tokio::time::sleep(batch.settle()).await;
        }
        if cancel.load(Ordering::SeqCst) {
            warn!("Batch cancelled after {index} of {} tokens", tokens.len());
            log.cancelled = true;
            break;
        }

        let outcome = match &entry.token {
            Err(e) => {
                error!("Batch entry {index} ({}): {e}", entry.raw);
                TokenOutcome::Invalid(e.clone())
            }
            Ok(token) => {
                let report = ctx.build_character(*token).await;
                let mut summary = BuildSummary::from_report(&report);
                if batch.export && report.is_rigged() {
                    match ctx.export_character(*token).await {
                        Ok(path) => summary.exported = Some(path),
                        Err(e) => summary.failures.push(e.to_string()),
                    }
                }
                offset_objects(ctx, index as f32 * batch.offset_x);
                if !summary.failures.is_empty() {
                    error!(
                        "Token {token} finished with {} failures",
                        summary.failures.len()
                    );
                }
                TokenOutcome::Built(summary)
            }
        };
        log.entries.push(BatchEntry {
            index,
            raw: entry.raw.clone(),
            outcome,
        });
    }
    info!(
        "Batch done: {} succeeded, {} failed",
        log.succeeded(),
        log.failed()
    );
    log
}

/// Shifts the current character's root objects along X; children follow their parent.
fn offset_objects(ctx: &mut Context, offset: f32) {
    if offset == 0.0 {
        return;
    }
    let roots: Vec<_> = ctx
        .scene
        .objects()
        .filter(|(_, o)| o.parent.is_none() && !matches!(o.kind, ObjectKind::Camera | ObjectKind::Light))
        .map(|(id, _)| id)
        .collect();
    for id in roots {
        ctx.scene.translate(id, Vector3::new(offset, 0.0, 0.0));
    }
}

/// Commands understood by the assembler.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the resolved attributes of a token
    Attributes { token: String },
    /// Build (and optionally export) one character
    Build {
        token: String,
        /// Export the rigged character afterwards
        #[arg(long)]
        export: bool,
    },
    /// Build one character and export it
    Export { token: String },
    /// Build every token listed in a .json array, in order
    Batch {
        file: PathBuf,
        /// Export each rigged character
        #[arg(long)]
        export: bool,
        /// Pause between tokens in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,
    },
}

/// Runs one command on a single-threaded runtime; the scene has exactly one writer.
pub fn run(config: AssemblerConfig, command: Command) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Could not start the async runtime")?;
    runtime.block_on(execute(config, command))
}

async fn execute(mut config: AssemblerConfig, command: Command) -> anyhow::Result<()> {
    if let Command::Batch {
        export, settle_ms, ..
    } = &command
    {
        config.batch.export |= *export;
        if let Some(ms) = settle_ms {
            config.batch.settle_ms = *ms;
        }
    }
    let max = config.max_token;
    let mut ctx = Context::new(config).await?;

    match command {
        Command::Attributes { token } => {
            let token = TokenId::parse(&token, max)?;
            for line in ctx.resolve_attributes(token).display_list() {
                println!("{line}");
            }
        }
        Command::Build { token, export } => {
            let token = TokenId::parse(&token, max)?;
            let report = ctx.build_character(token).await;
            for failure in report.failures() {
                println!("{failure}");
            }
            if export {
                let path = ctx.export_character(token).await?;
                println!("{}", path.display());
            }
        }
        Command::Export { token } => {
            let token = TokenId::parse(&token, max)?;
            ctx.build_character(token).await;
            let path = ctx.export_character(token).await?;
            println!("{}", path.display());
        }
        Command::Batch { file, .. } => {
            let tokens = load_batch_file(&file, max).await?;
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current token");
                    flag.store(true, Ordering::SeqCst);
                }
            });
            let log = run_batch(&mut ctx, &tokens, &cancel).await;
            for entry in &log.entries {
                match &entry.outcome {
                    TokenOutcome::Invalid(e) => println!("{}\tinvalid\t{e}", entry.raw),
                    TokenOutcome::Built(summary) if summary.failures.is_empty() => {
                        println!("{}\tok\t{:?}", entry.raw, summary.elapsed)
                    }
                    TokenOutcome::Built(summary) => {
                        println!("{}\tfailed\t{}", entry.raw, summary.failures.join("; "))
                    }
                }
            }
            if log.cancelled {
                println!("cancelled after {} tokens", log.len());
            }
        }
    }
    Ok(())
}
