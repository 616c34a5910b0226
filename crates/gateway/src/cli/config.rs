use hd_domain::config::{read_secret, Config, ConfigSeverity};

/// Validate the config and report which secrets the environment holds.
///
/// Returns `false` when any error-severity issue is found.  Missing
/// secrets are reported but only degrade the server, so they never fail
/// validation on their own.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\nSecrets:");
    for (purpose, var) in secret_vars(config) {
        let state = if read_secret(&var).is_some() { "set" } else { "missing" };
        println!("  {purpose:<22} {var:<28} {state}");
    }

    if issues.is_empty() {
        println!("\nConfig OK ({config_path})");
    } else {
        println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");
    }

    error_count == 0
}

/// Print the resolved config (defaults filled in) as TOML.  Inline
/// provider keys are masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut config = config.clone();
    for provider in &mut config.llm.providers {
        if let Some(key) = provider.auth.key.as_mut() {
            *key = mask(key);
        }
    }
    let output = toml::to_string_pretty(&config)?;
    print!("{output}");
    Ok(())
}

/// Environment variables the server reads secrets from, with what each
/// one is for.
fn secret_vars(config: &Config) -> Vec<(String, String)> {
    let mut vars = vec![
        ("channel bot token".to_owned(), config.channel.bot_token_env.clone()),
        ("channel signing secret".to_owned(), config.channel.signing_secret_env.clone()),
        ("transcript store key".to_owned(), config.transcript.api_key_env.clone()),
    ];
    for provider in &config.llm.providers {
        if let Some(env) = &provider.auth.env {
            vars.push((format!("llm provider {}", provider.id), env.clone()));
        }
    }
    vars
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".into()
    } else {
        format!("{visible}****")
    }
}
