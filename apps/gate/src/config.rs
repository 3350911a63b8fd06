use std::{fs, time::Duration};

use anyhow::Context;
use client_core::VerifierConfig;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct Settings {
    pub executor_url: String,
    pub feed_url: String,
    pub contract_address: String,
    pub abi_path: Option<String>,
    pub function_name: String,
    pub event_name: String,
    pub quiet_period_secs: u64,
    pub value: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executor_url: "http://127.0.0.1:8545".into(),
            feed_url: "http://127.0.0.1:8546".into(),
            contract_address: "0x9aEB5A6128465b989969F95eC4Bfc55d07604393".into(),
            abi_path: None,
            function_name: "openGates".into(),
            event_name: "CorrectPassword".into(),
            quiet_period_secs: 3,
            value: 0,
            gas_limit: 0,
            gas_price: 1,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    executor_url: Option<String>,
    feed_url: Option<String>,
    contract_address: Option<String>,
    abi_path: Option<String>,
    function_name: Option<String>,
    event_name: Option<String>,
    quiet_period_secs: Option<u64>,
    value: Option<u64>,
    gas_limit: Option<u64>,
    gas_price: Option<u64>,
}

pub fn load_settings(config_path: &str) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.executor_url {
                settings.executor_url = v;
            }
            if let Some(v) = file_cfg.feed_url {
                settings.feed_url = v;
            }
            if let Some(v) = file_cfg.contract_address {
                settings.contract_address = v;
            }
            if let Some(v) = file_cfg.abi_path {
                settings.abi_path = Some(v);
            }
            if let Some(v) = file_cfg.function_name {
                settings.function_name = v;
            }
            if let Some(v) = file_cfg.event_name {
                settings.event_name = v;
            }
            if let Some(v) = file_cfg.quiet_period_secs {
                settings.quiet_period_secs = v;
            }
            if let Some(v) = file_cfg.value {
                settings.value = v;
            }
            if let Some(v) = file_cfg.gas_limit {
                settings.gas_limit = v;
            }
            if let Some(v) = file_cfg.gas_price {
                settings.gas_price = v;
            }
        }
    }

    if let Ok(v) = std::env::var("GATE_EXECUTOR_URL") {
        settings.executor_url = v;
    }
    if let Ok(v) = std::env::var("GATE_FEED_URL") {
        settings.feed_url = v;
    }
    if let Ok(v) = std::env::var("GATE_CONTRACT_ADDRESS") {
        settings.contract_address = v;
    }
    if let Ok(v) = std::env::var("GATE_ABI_PATH") {
        settings.abi_path = Some(v);
    }
    if let Ok(v) = std::env::var("GATE_QUIET_PERIOD_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.quiet_period_secs = parsed;
        }
    }

    settings
}

/// ABI of the stock gate-verifier program; used when no `abi_path` is given.
fn default_abi() -> Value {
    json!([
        {
            "inputs": [{"internalType": "bytes32", "name": "magicPassword", "type": "bytes32"}],
            "stateMutability": "nonpayable",
            "type": "constructor"
        },
        {
            "anonymous": false,
            "inputs": [{"indexed": false, "internalType": "bool", "name": "result", "type": "bool"}],
            "name": "CorrectPassword",
            "type": "event"
        },
        {
            "inputs": [{"internalType": "string", "name": "password", "type": "string"}],
            "name": "openGates",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        }
    ])
}

pub fn verifier_config(settings: &Settings) -> anyhow::Result<VerifierConfig> {
    let abi = match &settings.abi_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read ABI file '{path}'"))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid ABI JSON in '{path}'"))?
        }
        None => default_abi(),
    };

    Ok(VerifierConfig {
        contract_address: settings.contract_address.clone(),
        abi,
        function_name: settings.function_name.clone(),
        event_name: settings.event_name.clone(),
        quiet_period: Duration::from_secs(settings.quiet_period_secs),
        value: settings.value,
        gas_limit: settings.gas_limit,
        gas_price: settings.gas_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_stock_verifier() {
        let settings = Settings::default();
        let config = verifier_config(&settings).unwrap();
        assert_eq!(config.function_name, "openGates");
        assert_eq!(config.event_name, "CorrectPassword");
        assert_eq!(config.quiet_period, Duration::from_secs(3));
    }

    #[test]
    fn file_settings_override_defaults() {
        let raw = r#"
            executor_url = "http://10.0.0.1:9000"
            quiet_period_secs = 7
        "#;
        let file_cfg: FileSettings = toml::from_str(raw).unwrap();
        let mut settings = Settings::default();
        if let Some(v) = file_cfg.executor_url {
            settings.executor_url = v;
        }
        if let Some(v) = file_cfg.quiet_period_secs {
            settings.quiet_period_secs = v;
        }
        assert_eq!(settings.executor_url, "http://10.0.0.1:9000");
        assert_eq!(settings.quiet_period_secs, 7);
    }

    #[test]
    fn missing_abi_file_is_an_error() {
        let settings = Settings {
            abi_path: Some("/definitely/not/here.json".into()),
            ..Settings::default()
        };
        assert!(verifier_config(&settings).is_err());
    }
}
