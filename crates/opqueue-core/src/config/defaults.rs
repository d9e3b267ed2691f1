//! Default configuration values

use super::types::Config;

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "opqueue.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "opqueue.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".opqueue.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".opqueue.toml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE_TOML.to_string())
}

/// Default configuration template
///
/// Ten independent tasks on a two-slot queue.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# opqueue scenario

queue:
  name: com.example.operation_queue
  max_concurrency: 2
  failure_policy: run_dependents

tasks:
  - name: op-0
  - name: op-1
  - name: op-2
  - name: op-3
  - name: op-4
  - name: op-5
  - name: op-6
  - name: op-7
  - name: op-8
  - name: op-9
"#;

/// Default configuration template (TOML flavour)
pub const DEFAULT_CONFIG_TEMPLATE_TOML: &str = r#"# opqueue scenario

[queue]
name = "com.example.operation_queue"
max_concurrency = 2
failure_policy = "run_dependents"

[[tasks]]
name = "fetch"

[[tasks]]
name = "parse"
depends_on = ["fetch"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        let yaml: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(yaml.tasks.len(), 10);
        assert_eq!(yaml.queue.max_concurrency, 2);

        let toml_config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE_TOML).unwrap();
        assert_eq!(toml_config.tasks.len(), 2);
    }

    #[test]
    fn test_default_config_toml_roundtrips() {
        let rendered = default_config_toml();
        let config: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(config.queue.name, "com.opqueue.default");
    }
}
