//! picosense CLI - operator tool for a device directory
//!
//! Checks for and installs firmware updates, inspects backups and edits the
//! device configuration.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use picosense_lib::engine::{
    cli::{
        formatter::{format_size, CliFormatter},
        BackupAction, Cli, Commands, ConfigAction, OutputFormat, UpdateAction,
    },
    config::Config,
    updater::{
        backup::BackupStore,
        manifest::ManifestResolver,
        recovery::FirmwareRecovery,
        release::CheckSource,
        restart::NoRestart,
        source::ReleaseSource,
        Channel, DeviceLayout, ReleaseChecker, ReqwestClient, RetryingTransport, UpdateScheduler,
        UpdateState,
    },
};
use std::path::Path;

fn main() {
    let cli = Cli::parse();
    picosense_lib::init_tracing(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let root = cli.get_root();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Update { action } => match action {
            UpdateAction::Check => cmd_update_check(&root, json_output)?,
            UpdateAction::Run => cmd_update_run(&root, json_output)?,
            UpdateAction::Status => cmd_update_status(&root, json_output)?,
        },
        Commands::Manifest => cmd_manifest(&root, json_output)?,
        Commands::Recover => cmd_recover(&root, json_output)?,
        Commands::Backup { action } => cmd_backup(action, &root, json_output)?,
        Commands::Config { action } => cmd_config(action, &root, json_output)?,
    }

    Ok(())
}

fn open_device(root: &Path) -> Result<(Config, DeviceLayout)> {
    let config = Config::load(root)?;
    let layout = DeviceLayout::new(root.to_path_buf(), &config.storage);
    Ok((config, layout))
}

fn transport(config: &Config) -> Result<RetryingTransport<ReqwestClient>> {
    let client = ReqwestClient::new(config.ota.request_timeout())?;
    Ok(RetryingTransport::new(client, config.ota.retry_policy()))
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_update_check(root: &Path, json: bool) -> Result<()> {
    let (config, layout) = open_device(root)?;
    let current = layout.current_version();
    let checker = ReleaseChecker::new(
        transport(&config)?,
        ReleaseSource::from_config(&config.ota),
        config.ota.prerelease_tag_prefix.clone(),
    );

    let check = checker.check_for_update(&current, config.ota.channel).await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "current_version": current,
                "channel": config.ota.channel,
                "check": check,
            })
        );
        return Ok(());
    }

    CliFormatter::header("Update Check");
    CliFormatter::kv("Installed", &current);
    CliFormatter::kv("Channel", &config.ota.channel.to_string());
    match (&check.source, &check.new_version) {
        (CheckSource::Unavailable { reason }, _) => {
            CliFormatter::warning(&format!("Update check failed: {}", reason))
        }
        (_, Some(version)) if check.has_update => {
            CliFormatter::success(&format!("Update available: {}", version));
            if check.source == CheckSource::VersionMarker {
                CliFormatter::info("Release API unavailable, compared against the branch version marker");
            }
        }
        _ => CliFormatter::info("No updates available"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_update_run(root: &Path, json: bool) -> Result<()> {
    let (mut config, layout) = open_device(root)?;
    layout.init()?;
    // Operator asked for it now
    config.ota.update_delay_secs = 0;

    let client = ReqwestClient::new(config.ota.request_timeout())?;
    let mut scheduler = UpdateScheduler::new(&config, layout, client, Box::new(NoRestart));

    let now = Utc::now();
    let requested = scheduler.request_update_at(now).await;
    if requested.state == UpdateState::Scheduled {
        if !json {
            CliFormatter::info(&requested.message);
        }
        scheduler.poll_scheduled_at(now).await;
    }
    let status = scheduler.get_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        CliFormatter::header("Firmware Update");
        CliFormatter::kv("Installed", &status.current_version);
        CliFormatter::state(status.state);
        CliFormatter::progress(status.progress_percent, &status.message);
        if status.state == UpdateState::Restarting {
            CliFormatter::success("Update installed, restart the device to run it");
        }
    }

    if status.state == UpdateState::Failed {
        bail!("{}", status.message);
    }
    Ok(())
}

fn cmd_update_status(root: &Path, json: bool) -> Result<()> {
    let (config, layout) = open_device(root)?;
    let staged = layout.list_staged()?;
    let backups = BackupStore::new(&layout, config.ota.backup_enabled).list();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "current_version": layout.current_version(),
                "channel": config.ota.channel,
                "ota_enabled": config.ota.enabled,
                "staged_files": staged,
                "backups": backups,
            })
        );
        return Ok(());
    }

    CliFormatter::header("Device Status");
    CliFormatter::kv("Root", &root.display().to_string());
    CliFormatter::kv("Installed", &layout.current_version());
    CliFormatter::kv("Channel", &config.ota.channel.to_string());
    CliFormatter::kv("OTA", if config.ota.enabled { "enabled" } else { "disabled" });
    CliFormatter::kv("Staged files", &staged.len().to_string());
    CliFormatter::kv("Backups", &backups.len().to_string());
    if !staged.is_empty() {
        CliFormatter::warning("Staging is not empty, a previous update did not complete");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_manifest(root: &Path, json: bool) -> Result<()> {
    let (config, _) = open_device(root)?;
    let resolver = ManifestResolver::new(transport(&config)?, ReleaseSource::from_config(&config.ota));
    let manifest = resolver.resolve().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    CliFormatter::header("Firmware Manifest");
    if !manifest.discovered {
        CliFormatter::warning("File discovery failed, showing the fallback list");
    }
    for entry in manifest.entries() {
        let optional = if entry.is_optional() { " (optional)" } else { "" };
        CliFormatter::item(&format!("{} <- {}{}", entry.filename, entry.remote_path, optional));
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_recover(root: &Path, json: bool) -> Result<()> {
    let (config, layout) = open_device(root)?;
    layout.init()?;

    let client = ReqwestClient::new(config.ota.request_timeout())?;
    let recovery = FirmwareRecovery::new(&config, layout, client);
    if !json {
        CliFormatter::info("Downloading firmware from the repository branch...");
    }
    let report = recovery.recover().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    CliFormatter::header("Firmware Recovery");
    CliFormatter::kv("Version", &report.version);
    CliFormatter::kv("Files installed", &report.installed.to_string());
    CliFormatter::kv("Files backed up", &report.backed_up.to_string());
    if !report.discovered {
        CliFormatter::warning("File discovery failed, the fallback list was installed");
    }
    CliFormatter::success("Recovery complete, restart the device to run it");
    Ok(())
}

fn cmd_backup(action: BackupAction, root: &Path, json: bool) -> Result<()> {
    let (config, layout) = open_device(root)?;
    let store = BackupStore::new(&layout, config.ota.backup_enabled);

    match action {
        BackupAction::List => {
            let entries = store.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                CliFormatter::header("Backups");
                if entries.is_empty() {
                    CliFormatter::info("No backups");
                }
                for entry in &entries {
                    CliFormatter::item(&format!("{} ({})", entry.filename, format_size(entry.size)));
                }
            }
        }
        BackupAction::Restore => {
            let restored = store.restore();
            if json {
                println!("{}", serde_json::json!({ "restored": restored }));
            } else if restored == 0 {
                CliFormatter::warning("Nothing to restore");
            } else {
                CliFormatter::success(&format!("Restored {} file(s)", restored));
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, root: &Path, json: bool) -> Result<()> {
    let mut config = Config::load(root)?;

    match action {
        ConfigAction::Show => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                let repo = &config.ota.github_repo;
                CliFormatter::header("Configuration");
                CliFormatter::kv("Server", &format!("{}:{}", config.server.host, config.server.port));
                CliFormatter::kv("OTA", if config.ota.enabled { "enabled" } else { "disabled" });
                CliFormatter::kv("Channel", &config.ota.channel.to_string());
                CliFormatter::kv(
                    "Repository",
                    &format!("{}/{}@{}", repo.owner, repo.name, repo.branch),
                );
                CliFormatter::kv("Update delay", &format!("{}s", config.ota.update_delay_secs));
                CliFormatter::kv("Backups", if config.ota.backup_enabled { "enabled" } else { "disabled" });
            }
        }
        ConfigAction::Channel { channel } => {
            config.ota.channel = channel;
            std::fs::create_dir_all(root)?;
            config.save(root)?;
            if json {
                println!("{}", serde_json::json!({ "channel": channel }));
            } else {
                CliFormatter::success(&format!("Channel set to {}", channel));
                if channel == Channel::Prerelease {
                    CliFormatter::warning(&format!(
                        "Prerelease builds are tagged '{}*' and may be unstable",
                        config.ota.prerelease_tag_prefix
                    ));
                }
            }
        }
    }
    Ok(())
}
