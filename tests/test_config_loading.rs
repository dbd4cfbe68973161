use pmtiles_edge::config::{BucketBackend, ServerConfig};
use pmtiles_edge::error::TileError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_shipped_config() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/pmtiles_edge.yaml");
    let config = ServerConfig::from_file(path);
    assert!(config.is_ok(), "Failed to load shipped config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_address, "0.0.0.0:8080");
    assert_eq!(config.bucket.backend, BucketBackend::Fs);
    assert_eq!(config.bucket.root.as_deref(), Some("./tiles"));
    assert_eq!(config.resolved_cache_capacity, 25);
    assert!(config.edge_cache.enabled);
    assert_eq!(config.edge_cache.max_memory_bytes, 64 * 1024 * 1024);
    assert_eq!(config.cors.allowed_origins.len(), 2);
    // Patterns were not listed, so defaults apply
    assert!(!config.cors.origin_patterns.is_empty());
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
bucket:
  backend: memory
"#,
    );

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.bucket.backend, BucketBackend::Memory);
    // Check defaults are applied
    assert_eq!(config.listen_address, "0.0.0.0:8080");
    assert_eq!(config.archive_prefix, "");
    assert_eq!(config.edge_cache.version, "v1");
    assert_eq!(config.edge_cache.ttl_secs, 86400);
    assert!(config.edge_cache.disk_dir.is_none());
    assert!(config.public_url.is_none());
    assert!(config.enable_metrics);
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        "bucket:\n  backend: ftp\n",
        "bucket:\n  backend: http\n",
        "bucket:\n  backend: memory\nresolved_cache_capacity: 0\n",
        "bucket:\n  backend: memory\nlisten_address: \"nowhere\"\n",
        "bucket:\n  backend: memory\nedge_cache:\n  version: \"\"\n",
        "bucket:\n  backend: memory\ncors:\n  origin_patterns: [\"[\"]\n",
        "not: [valid",
    ];

    for yaml in cases {
        let file = write_config(yaml);
        let result = ServerConfig::from_file(file.path());
        assert!(
            matches!(result, Err(TileError::ConfigError(_))),
            "expected rejection for {:?}, got {:?}",
            yaml,
            result
        );
    }
}

#[test]
fn test_bucket_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_config(&format!(
        "bucket:\n  backend: fs\n  root: \"{}\"\n",
        dir.path().display()
    ));

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert!(config.bucket.build().is_ok());
}
