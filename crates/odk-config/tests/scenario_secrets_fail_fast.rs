//! Scenario: secret resolution fails fast at startup
//!
//! # Test design
//! Failure tests point `/secrets_env` at globally-unique sentinel env var
//! names that are never set, so no test mutates the process environment.
//!
//! # Coverage
//! 1. Missing session signing key → SECRETS_MISSING naming the var.
//! 2. Default env var names apply when `/secrets_env` is absent.
//! 3. `Debug` output of `ResolvedSecrets` is redacted.

use odk_config::load_layered_yaml_from_strings;
use odk_config::secrets::{resolve_secrets, ResolvedSecrets};

fn load(yaml: &str) -> serde_json::Value {
    load_layered_yaml_from_strings(&[yaml])
        .expect("test yaml must parse cleanly")
        .config_json
}

#[test]
fn missing_session_signing_key_fails_with_var_name() {
    let cfg = load(
        r#"
secrets_env:
  session_signing_key: "ODK_SENTINEL_SIGNING_KEY_MISSING_A1"
  webhook_secret: "ODK_SENTINEL_WEBHOOK_MISSING_A1"
  provider_api_key: "ODK_SENTINEL_PROVIDER_MISSING_A1"
"#,
    );

    let err = resolve_secrets(&cfg).expect_err("must fail without a signing key");
    let msg = err.to_string();
    assert!(msg.contains("SECRETS_MISSING"), "got: {msg}");
    assert!(
        msg.contains("ODK_SENTINEL_SIGNING_KEY_MISSING_A1"),
        "error must name the missing var, got: {msg}"
    );
}

#[test]
fn default_var_names_are_reported_when_config_is_silent() {
    if std::env::var("ODK_SESSION_SIGNING_KEY").is_ok() {
        eprintln!("SKIP: ODK_SESSION_SIGNING_KEY is set in this environment");
        return;
    }
    let err = resolve_secrets(&load("server:\n  bind_addr: \"127.0.0.1:9000\"\n"))
        .expect_err("must fail without a signing key");
    assert!(err.to_string().contains("ODK_SESSION_SIGNING_KEY"));
}

#[test]
fn debug_output_is_redacted() {
    let secrets = ResolvedSecrets {
        session_signing_key: "k".repeat(40),
        webhook_secret: "shared-webhook-secret".to_string(),
        provider_api_key: "provider-key-value".to_string(),
    };

    let dbg = format!("{secrets:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("shared-webhook-secret"));
    assert!(!dbg.contains("provider-key-value"));
    assert!(!dbg.contains(&"k".repeat(40)));
}
