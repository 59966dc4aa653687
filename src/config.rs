use crate::types::Credentials;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub credentials: CredentialSources,
    #[serde(default)]
    pub upload: Upload,
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default)]
    pub translation: Translation,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Reads the two credential strings once: inline values win over env vars.
    pub fn resolve_credentials(&self) -> Result<Credentials> {
        let c = &self.credentials;
        let api_key = self.resolve_api_key()?;
        let mineru_api_key = pick(&c.mineru_api_key, &c.mineru_api_key_env);
        if mineru_api_key.is_empty() {
            bail!(
                "no MinerU API key: set credentials.mineru_api_key or ${}",
                c.mineru_api_key_env
            );
        }
        Ok(Credentials::new(api_key, mineru_api_key))
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        let c = &self.credentials;
        let api_key = pick(&c.api_key, &c.api_key_env);
        if api_key.is_empty() {
            bail!("no API key: set credentials.api_key or ${}", c.api_key_env);
        }
        Ok(api_key)
    }
}

fn pick(inline: &str, env_name: &str) -> String {
    if !inline.trim().is_empty() {
        return inline.trim().to_string();
    }
    if env_name.is_empty() {
        return String::new();
    }
    std::env::var(env_name)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub base_url: String,
    pub analyzer_prefix: String,
    pub translate_path: String,
    pub connect_timeout_seconds: u64,
    /// Upper bound for the best-effort remote cancel call.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            analyzer_prefix: "/api/pdf-analyzer".into(),
            translate_path: "/api/translate".into(),
            connect_timeout_seconds: 10,
            cancel_timeout_ms: default_cancel_timeout_ms(),
        }
    }
}

fn default_cancel_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSources {
    pub api_key_env: String,
    pub mineru_api_key_env: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub mineru_api_key: String,
}
impl Default for CredentialSources {
    fn default() -> Self {
        Self {
            api_key_env: "PAPER_INGEST_API_KEY".into(),
            mineru_api_key_env: "PAPER_INGEST_MINERU_API_KEY".into(),
            api_key: "".into(),
            mineru_api_key: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub max_file_bytes: u64,
    pub require_pdf_extension: bool,
}
impl Default for Upload {
    fn default() -> Self {
        Self {
            max_file_bytes: 100 * 1024 * 1024,
            require_pdf_extension: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub translate: bool,
    pub extract_charts: bool,
    pub enable_paper_analysis: bool,
}
impl Default for Analysis {
    fn default() -> Self {
        Self {
            translate: false,
            extract_charts: true,
            enable_paper_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub max_chunk_size: usize,
    pub source_lang: String,
    pub target_lang: String,
}
impl Default for Translation {
    fn default() -> Self {
        Self {
            max_chunk_size: 3000,
            source_lang: "en".into(),
            target_lang: "zh".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Images {
    pub auto_analyze: bool,
    pub walk_start_delay_ms: u64,
    /// Empty means the server default.
    pub vision_model: String,
    pub chart_prompt: String,
}
impl Default for Images {
    fn default() -> Self {
        Self {
            auto_analyze: true,
            walk_start_delay_ms: 500,
            vision_model: "".into(),
            chart_prompt: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub out_dir: String,
    pub original_filename: String,
    pub translated_filename: String,
    pub images_filename: String,
    pub report_filename: String,
    pub write_index_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            original_filename: "original.md".into(),
            translated_filename: "translated.md".into(),
            images_filename: "images.json".into(),
            report_filename: "report.json".into(),
            write_index_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
