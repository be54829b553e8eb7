use maestro_config::{ConfigError, Credential, CredentialStore, FileCredentialStore};
use tempfile::TempDir;

#[test]
fn contexts_are_isolated_from_each_other() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = FileCredentialStore::new(dir.path());

    store.save("prod", &Credential::new("https://prod.example.com", "p-token"))?;
    store.save("dev", &Credential::new("https://dev.example.com", "d-token"))?;
    store.save("dev", &Credential::new("https://dev.example.com", "d-token-2"))?;

    let prod = store.load("prod")?;
    assert_eq!(prod.server_url, "https://prod.example.com");
    assert_eq!(prod.token, "p-token");
    assert_eq!(store.load("dev")?.token, "d-token-2");
    Ok(())
}

#[test]
fn invalid_context_never_touches_disk() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = FileCredentialStore::new(dir.path().join("creds"));

    let err = store
        .save("../escape", &Credential::new("https://x", "y"))
        .expect_err("traversal must be rejected");
    assert!(matches!(err, ConfigError::InvalidContext { .. }));
    assert!(!dir.path().join("creds").exists());
    Ok(())
}
