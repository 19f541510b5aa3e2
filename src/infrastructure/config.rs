use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub archiver: ArchiverSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiverSettings {
    pub url: String,
}

pub fn load_gateway_config() -> anyhow::Result<GatewayConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/archiver"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace `${name}` template variables in a query string.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let mut result = text.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
