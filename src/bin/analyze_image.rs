use anyhow::{anyhow, Context, Result};
use forense_ai_lib::services::config_store::{AppConfig, ConfigStore};
use forense_ai_lib::services::forensics::ForensicsPipeline;
use forense_ai_lib::services::providers::JudgeClient;
use std::path::PathBuf;

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

const VALUE_FLAGS: [&str; 4] = ["--description", "--config", "--policy", "--out"];

/// First argument that is neither a flag nor the value of one.
fn positional_arg(args: &[String]) -> Option<String> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
        } else if !arg.starts_with("--") {
            return Some(arg.clone());
        }
    }
    None
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    if let Some(p) = path {
        let content = std::fs::read_to_string(p).with_context(|| format!("read config {}", p))?;
        let mut config: AppConfig =
            serde_json::from_str(&content).with_context(|| format!("parse config {}", p))?;
        config.apply_env_overrides();
        config.validate().map_err(|e| anyhow!(e))?;
        return Ok(config);
    }

    match ConfigStore::default_config_dir() {
        Some(dir) => ConfigStore::new(dir).load_effective().map_err(|e| anyhow!(e)),
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage:\n  analyze_image <image> [--description <text>] [--config <path>] [--no-judge] \
             [--policy tiered|binary] [--out <json_path>]\n  analyze_image --check-judge [--config <path>]\n  \
             analyze_image --info [--config <path>]\n  analyze_image --init-config\n\nNotes:\n  - Without --description the semantic judge is skipped.\n  \
             - FORENSE_* environment variables override config file values."
        );
        return Ok(());
    }

    forense_ai_lib::init_logging();

    if has_flag(&args, "--init-config") {
        let dir = ConfigStore::default_config_dir()
            .ok_or_else(|| anyhow!("no config directory on this platform"))?;
        let store = ConfigStore::new(dir);
        let mut config = store.load().map_err(|e| anyhow!(e))?;
        config.version = env!("CARGO_PKG_VERSION").to_string();
        store.save(&config).map_err(|e| anyhow!(e))?;
        println!("Wrote config: {}", store.config_file().display());
        return Ok(());
    }

    let mut config = load_config(parse_arg_value(&args, "--config").as_deref())?;
    if has_flag(&args, "--no-judge") {
        config.judge.enabled = false;
    }
    if let Some(policy) = parse_arg_value(&args, "--policy") {
        config.fusion.policy = policy;
    }

    if has_flag(&args, "--check-judge") {
        let client = JudgeClient::new(&config.judge);
        let healthy = client.check_health().await;
        println!(
            "Judge {} ({}): {}",
            client.model(),
            client.url(),
            if healthy { "reachable" } else { "unreachable" }
        );
        return Ok(());
    }

    let pipeline = ForensicsPipeline::from_config(&config)?;

    if has_flag(&args, "--info") {
        println!("{}", serde_json::to_string_pretty(&pipeline.model_info())?);
        return Ok(());
    }

    let image_path = PathBuf::from(
        positional_arg(&args).ok_or_else(|| anyhow!("missing image path"))?,
    );
    let description = parse_arg_value(&args, "--description");
    let out_path = parse_arg_value(&args, "--out");

    let verdict = pipeline
        .analyze_path(&image_path, description.as_deref())
        .await;
    let payload = pipeline.payload(&verdict);
    let json = serde_json::to_string_pretty(&payload)?;

    match out_path {
        Some(out_path) => {
            std::fs::write(&out_path, &json).with_context(|| format!("write {}", out_path))?;
            eprintln!("Wrote JSON: {}", out_path);
        }
        None => println!("{}", json),
    }

    Ok(())
}
