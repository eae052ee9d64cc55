//! Config command implementation.

use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::config::{ConfigFile, MatchSettings, config_path};
use crate::error::Result;

#[derive(Serialize)]
struct ShowOutput {
    path: String,
    file: ConfigFile,
    resolved: ResolvedOutput,
}

/// Resolved settings with the credential masked.
#[derive(Serialize)]
struct ResolvedOutput {
    concurrency: usize,
    batch_size: usize,
    #[serde(rename = "async")]
    use_async: bool,
    timeout_secs: u64,
    max_failures: u32,
    mode: String,
    api_key: Option<String>,
    priority: bool,
    endpoint: String,
    model: String,
    local_model: String,
}

impl From<&MatchSettings> for ResolvedOutput {
    fn from(s: &MatchSettings) -> Self {
        Self {
            concurrency: s.concurrency,
            batch_size: s.batch_size,
            use_async: s.use_async,
            timeout_secs: s.timeout_secs,
            max_failures: s.max_failures,
            mode: s.mode.to_string(),
            api_key: s.api_key.as_deref().map(mask),
            priority: s.priority,
            endpoint: s.endpoint.clone(),
            model: s.model.clone(),
            local_model: s.local_model.clone(),
        }
    }
}

/// Keep the last four characters of a secret.
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

/// Execute config commands.
pub fn execute(command: &ConfigCommands, json: bool) -> Result<()> {
    let path = config_path()?;

    match command {
        ConfigCommands::Show => {
            let mut file = ConfigFile::load_from(&path)?;
            let settings = MatchSettings::resolve()?;
            file.api_key = file.api_key.as_deref().map(mask);
            let resolved = ResolvedOutput::from(&settings);

            if json {
                let output = ShowOutput {
                    path: path.display().to_string(),
                    file,
                    resolved,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Config file: {}", path.display());
                println!();
                println!("Resolved settings:");
                println!("  concurrency:   {}", resolved.concurrency);
                println!("  batch_size:    {}", resolved.batch_size);
                println!("  async:         {}", resolved.use_async);
                println!("  timeout_secs:  {}", resolved.timeout_secs);
                println!("  max_failures:  {}", resolved.max_failures);
                println!("  mode:          {}", resolved.mode);
                println!(
                    "  api_key:       {}",
                    resolved.api_key.as_deref().unwrap_or("(not set)")
                );
                println!("  priority:      {}", resolved.priority);
                println!("  endpoint:      {}", resolved.endpoint);
                println!("  model:         {}", resolved.model);
                println!("  local_model:   {}", resolved.local_model);
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut file = ConfigFile::load_from(&path)?;
            file.set(key, value)?;
            file.save_to(&path)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "success": true, "key": key, "path": path.display().to_string() })
                );
            } else {
                println!("Set {key} in {}", path.display());
            }
        }
        ConfigCommands::Reset { key } => {
            let mut file = ConfigFile::load_from(&path)?;
            match key {
                Some(key) => file.unset(key)?,
                None => file = ConfigFile::default(),
            }
            file.save_to(&path)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "success": true, "key": key, "path": path.display().to_string() })
                );
            } else if let Some(key) = key {
                println!("Removed {key} from {}", path.display());
            } else {
                println!("Reset {}", path.display());
            }
        }
        ConfigCommands::Path => {
            if json {
                println!("{}", serde_json::json!({ "path": path.display().to_string() }));
            } else {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
