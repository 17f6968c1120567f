//! Scheduled logical backup and restore tool for MySQL servers
//!
//! Provides the CLI front end over the dump, restore and scheduling engines

// dumptool/src/main.rs
mod backup;
mod cli;
mod config;
mod crypto;
mod errors;
mod restore;
mod schedule;
mod store;
mod utils;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use backup::Dumper;
use cli::{BackupsCommand, Cli, Command, JobCommand, TargetCommand};
use config::AppConfig;
use crypto::{AesGcmCipher, CredentialCipher};
use restore::Restorer;
use schedule::Scheduler;
use schedule::recurrence::{ScheduleConfig, next_run_after};
use store::models::{
    Backup, BackupOptions, BackupStatus, DatabaseSelection, JobUpdate, ScheduleJob, Target, TargetUpdate,
};
use store::{Repository, SqliteRepository};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run_app(Cli::parse()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Long-lived pieces shared by the commands.
struct App {
    config: AppConfig,
    repo: Arc<dyn Repository>,
    cipher: Arc<dyn CredentialCipher>,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = AppConfig::load(&cli.config)
            .with_context(|| format!("Failed to load application configuration from {}", cli.config.display()))?;
        let cipher = AesGcmCipher::from_base64_key(config.require_encryption_key()?)
            .context("Failed to initialise credential encryption")?;
        let repo = SqliteRepository::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open application database {}", config.database_path.display()))?;
        Ok(App {
            config,
            repo: Arc::new(repo),
            cipher: Arc::new(cipher),
        })
    }

    fn dumper(&self) -> Dumper {
        Dumper::new(self.repo.clone(), self.cipher.clone(), self.config.dump.clone())
    }

    fn scheduler(&self) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(self.repo.clone(), self.dumper(), self.config.scheduler.clone()))
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    if let Command::Keygen = cli.command {
        println!("{}", AesGcmCipher::generate_key());
        return Ok(());
    }

    let app = App::open(&cli).await?;
    match cli.command {
        Command::Keygen => {}
        Command::Serve => serve(&app).await?,
        Command::Backup { target_id, no_compress, databases } => {
            let target = app.repo.get_target(target_id).await?;
            println!("🚀 Starting backup of target {} ({})...", target.name, target_id);

            let backups = if databases.is_empty() && !no_compress {
                let started = app.dumper().create_backup(target_id).await.context("Backup process failed")?;
                for b in &started {
                    print_backup(b);
                }
                wait_for_backups(&app, &started).await?
            } else {
                let mut options = BackupOptions::for_target(&target);
                options.compress = options.compress && !no_compress;
                options.databases = databases;
                app.dumper()
                    .run_backup(target_id, &options, None)
                    .await
                    .context("Backup process failed")?
            };
            let mut failures = 0;
            for b in &backups {
                print_backup(b);
                if b.status != BackupStatus::Success {
                    failures += 1;
                }
            }
            if failures > 0 {
                anyhow::bail!("{} of {} database backup(s) failed", failures, backups.len());
            }
            println!("✅ Backup completed: {} database(s)", backups.len());
        }
        Command::Restore { backup_id, create_database } => {
            println!("🔄 Restoring backup {}...", backup_id);
            let stats = Restorer::new(app.repo.clone(), app.cipher.clone())
                .restore(backup_id, create_database)
                .await
                .context("Restore process failed")?;
            println!(
                "✅ Restore completed: {} statement(s) executed, {} skipped",
                stats.executed, stats.skipped
            );
        }
        Command::Target(cmd) => target_command(&app, cmd, cli.json).await?,
        Command::Job(cmd) => job_command(&app, cmd, cli.json).await?,
        Command::Backups(BackupsCommand::List { target_id }) => {
            let backups = app.repo.list_backups_by_target(target_id).await?;
            if cli.json {
                print_json(&backups)?;
            } else {
                for b in &backups {
                    print_backup(b);
                }
            }
        }
        Command::Backups(BackupsCommand::Delete { id }) => {
            backup::retention::delete_backup(app.repo.as_ref(), id)
                .await
                .with_context(|| format!("Failed to delete backup {}", id))?;
            println!("🗑️ Backup {} deleted", id);
        }
        Command::MigrateLegacy => {
            let report = schedule::legacy::migrate_legacy_schedules(app.repo.as_ref()).await?;
            println!(
                "✅ Migrated {} legacy schedule(s); {} invalid value(s) left in place",
                report.migrated, report.invalid
            );
        }
    }
    Ok(())
}

async fn serve(app: &App) -> Result<()> {
    let report = schedule::legacy::migrate_legacy_schedules(app.repo.as_ref())
        .await
        .context("Legacy schedule migration failed")?;
    if report.migrated > 0 {
        info!("Migrated {} legacy schedule(s) into jobs", report.migrated);
    }

    let handle = app.scheduler().start();
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");
    handle.stop().await;
    Ok(())
}

/// Polls the repository until none of `started` is still running.
async fn wait_for_backups(app: &App, started: &[Backup]) -> Result<Vec<Backup>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let mut current = Vec::with_capacity(started.len());
        for b in started {
            current.push(app.repo.get_backup(b.id).await?);
        }
        if current.iter().all(|b| b.status != BackupStatus::Running) {
            return Ok(current);
        }
    }
}

async fn target_command(app: &App, cmd: TargetCommand, json: bool) -> Result<()> {
    match cmd {
        TargetCommand::Add { name, url, databases, retention_days, no_compress, comment } => {
            let parsed = utils::parse_target_url(&url)?;
            let password_enc = app.cipher.encrypt(&parsed.password)?;
            let mut target = Target::new(&name, &parsed.host, parsed.port, &parsed.user, &password_enc);
            target.comment = comment;
            target.retention_days = i64::from(retention_days);
            target.auto_compress = !no_compress;
            if !databases.is_empty() {
                target.database_selection = DatabaseSelection::Selected(databases);
            }
            app.repo.create_target(&mut target).await?;
            println!("✅ Target {} created with id {}", target.name, target.id);
        }
        TargetCommand::List => {
            let targets = app.repo.list_targets().await?;
            if json {
                return print_json(&targets);
            }
            for t in targets {
                let databases = match &t.database_selection {
                    DatabaseSelection::All => "all".to_string(),
                    DatabaseSelection::Selected(dbs) => dbs.join(","),
                };
                println!(
                    "{:>4}  {:<20} {} databases={} retention={}d compress={}",
                    t.id,
                    t.name,
                    utils::target_label(&t),
                    databases,
                    t.retention_days,
                    t.auto_compress
                );
            }
        }
        TargetCommand::Update {
            id,
            name,
            url,
            databases,
            all_databases,
            retention_days,
            compress,
            comment,
        } => {
            let mut update = TargetUpdate {
                name,
                comment,
                auto_compress: compress,
                retention_days: retention_days.map(i64::from),
                ..Default::default()
            };
            if let Some(url) = url {
                let parsed = utils::parse_target_url(&url)?;
                update.host = Some(parsed.host);
                update.port = Some(parsed.port);
                update.user = Some(parsed.user);
                update.password = Some(parsed.password);
            }
            if all_databases {
                update.database_selection = Some(DatabaseSelection::All);
            } else if !databases.is_empty() {
                update.database_selection = Some(DatabaseSelection::Selected(databases));
            }

            let mut target = app.repo.get_target(id).await?;
            target.apply(update, app.cipher.as_ref())?;
            app.repo.update_target(&target).await?;
            println!("✅ Target {} updated", id);
        }
        TargetCommand::Discover { target_id, url } => {
            let databases = match (target_id, url) {
                (Some(id), _) => app.dumper().discover_target_databases(id).await?,
                (None, Some(url)) => {
                    let parsed = utils::parse_target_url(&url)?;
                    let scratch = Target::new("discover", &parsed.host, parsed.port, &parsed.user, "");
                    let options = utils::connect_options(&scratch, &parsed.password, None);
                    backup::discover_databases(&options, &utils::target_label(&scratch)).await?
                }
                (None, None) => anyhow::bail!("either --target-id or --url is required"),
            };
            if json {
                return print_json(&databases);
            }
            for db in databases {
                println!("{}", db);
            }
        }
        TargetCommand::Delete { id } => {
            app.repo.delete_target(id).await?;
            println!("🗑️ Target {} deleted", id);
        }
    }
    Ok(())
}

async fn job_command(app: &App, cmd: JobCommand, json: bool) -> Result<()> {
    match cmd {
        JobCommand::Add { target_id, name, schedule, options, description } => {
            let schedule: ScheduleConfig =
                serde_json::from_str(&schedule).context("Failed to parse schedule JSON")?;
            let options: BackupOptions =
                serde_json::from_str(&options).context("Failed to parse backup options JSON")?;
            app.repo.get_target(target_id).await?;

            let mut job = ScheduleJob::new(target_id, &name, schedule, options);
            job.description = description;
            job.next_run_at = next_run_after(&job.schedule, Utc::now());
            app.repo.create_job(&mut job).await?;
            match job.next_run_at {
                Some(next) => println!("✅ Job {} created, first run at {}", job.id, next.to_rfc3339()),
                None => println!("✅ Job {} created", job.id),
            }
        }
        JobCommand::List => {
            let jobs = app.repo.list_jobs().await?;
            if json {
                return print_json(&jobs);
            }
            for j in jobs {
                println!(
                    "{:>4}  {:<20} target={} active={} status={} next={} {}",
                    j.id,
                    j.name,
                    j.target_id,
                    j.is_active,
                    j.last_run_status.as_str(),
                    j.next_run_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
                    j.last_run_notes
                );
            }
        }
        JobCommand::Update { id, name, schedule, options, description } => {
            let schedule = schedule
                .map(|s| serde_json::from_str::<ScheduleConfig>(&s))
                .transpose()
                .context("Failed to parse schedule JSON")?;
            let backup_options = options
                .map(|s| serde_json::from_str::<BackupOptions>(&s))
                .transpose()
                .context("Failed to parse backup options JSON")?;

            let mut job = app.repo.get_job(id).await?;
            job.apply(
                JobUpdate { name, description, schedule, backup_options, is_active: None },
                Utc::now(),
            );
            app.repo.update_job(&job).await?;
            match job.next_run_at {
                Some(next) => println!("✅ Job {} updated, next run at {}", id, next.to_rfc3339()),
                None => println!("✅ Job {} updated", id),
            }
        }
        JobCommand::Run { id } => {
            let status = app.scheduler().run_job_now(id).await?.await.context("Job task panicked")?;
            let job = app.repo.get_job(id).await?;
            println!("Job {} finished: {} ({})", id, status.as_str(), job.last_run_notes);
            if status != store::models::JobStatus::Success {
                anyhow::bail!("Job {} failed", id);
            }
        }
        JobCommand::SetActive { id, active } => {
            let mut job = app.repo.get_job(id).await?;
            job.is_active = active;
            if active && job.next_run_at.is_none() {
                job.next_run_at = next_run_after(&job.schedule, Utc::now());
            }
            job.updated_at = Utc::now();
            app.repo.update_job(&job).await?;
            println!("✅ Job {} active={}", id, active);
        }
        JobCommand::Delete { id } => {
            app.repo.delete_job(id).await?;
            println!("🗑️ Job {} deleted", id);
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to render JSON")?);
    Ok(())
}

fn print_backup(b: &Backup) {
    println!(
        "{:>5}  {:<20} {:<8} {:>12}  {}  {}",
        b.id,
        b.database_name,
        b.status.as_str(),
        b.size_bytes,
        b.started_at.to_rfc3339(),
        if b.file_path.is_empty() { &b.notes } else { &b.file_path }
    );
}
