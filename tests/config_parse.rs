use paper_ingest::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../paper-ingest.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.translation.max_chunk_size >= 1);
    assert!(!cfg.output.out_dir.is_empty());
    assert!(cfg.server.base_url.starts_with("http"));
}

#[test]
fn missing_sections_use_defaults() {
    let raw = "[translation]\nmax_chunk_size = 500\nsource_lang = \"en\"\ntarget_lang = \"de\"\n";
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.translation.max_chunk_size, 500);
    assert_eq!(cfg.translation.target_lang, "de");
    assert_eq!(cfg.server.analyzer_prefix, "/api/pdf-analyzer");
    assert!(cfg.images.auto_analyze);
}

#[test]
fn inline_credentials_win() {
    let mut cfg = Config::default();
    cfg.credentials.api_key = " sk-inline ".into();
    cfg.credentials.mineru_api_key = "mineru".into();
    cfg.credentials.api_key_env = String::new();
    cfg.credentials.mineru_api_key_env = String::new();

    let creds = cfg.resolve_credentials().expect("credentials");
    assert_eq!(creds.api_key, "sk-inline");
    assert_eq!(creds.mineru_api_key, "mineru");
}
