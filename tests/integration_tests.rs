//! Integration tests exercising cross-module flows without network access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use withny_dl::config::Config;
use withny_dl::credentials::{CredentialsReader, CredentialsService, CredentialsStore};
use withny_dl::monitor::params::Params;
use withny_dl::platform::models::{Credentials, Metadata, SavedCredentials};
use withny_dl::platform::ApiClient;

fn test_client(store: Arc<CredentialsStore>) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(reqwest::Client::new(), store))
}

mod credentials_flow {
    use super::*;

    async fn write_saved(path: &std::path::Path, refresh_token: &str) -> SavedCredentials {
        let saved = SavedCredentials {
            token: "user-token".to_string(),
            refresh_token: refresh_token.to_string(),
            ..Default::default()
        };
        tokio::fs::write(
            path,
            format!(
                "token: {}\nrefreshToken: {}\n",
                saved.token, saved.refresh_token
            ),
        )
        .await
        .unwrap();
        saved
    }

    #[tokio::test]
    async fn test_cache_kept_while_user_credentials_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let creds_path = dir.path().join("credentials.yaml");
        let saved = write_saved(&creds_path, "refresh-1").await;

        let store = Arc::new(CredentialsStore::new(dir.path().join("cache.bin"), None));
        store
            .init(
                &Credentials {
                    token: "cached-token".to_string(),
                    refresh_token: "cached-refresh".to_string(),
                    token_type: "Bearer".to_string(),
                },
                &saved.hash(),
            )
            .await
            .unwrap();

        let service = CredentialsService::new(
            test_client(store.clone()),
            CredentialsReader::new(&creds_path),
        );

        let cached = service.validate_cache().await.unwrap();
        assert_eq!(cached.unwrap().credentials.token, "cached-token");
        assert!(store.read().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_changed_user_credentials_purge_cache() {
        // S7: cache written under hash H1; the operator edits the
        // credentials file (hash H2); a startup read purges the cache.
        let dir = tempfile::tempdir().unwrap();
        let creds_path = dir.path().join("credentials.yaml");
        let saved = write_saved(&creds_path, "refresh-1").await;

        let store = Arc::new(CredentialsStore::new(dir.path().join("cache.bin"), None));
        store
            .init(
                &Credentials {
                    token: "cached-token".to_string(),
                    refresh_token: "cached-refresh".to_string(),
                    token_type: "Bearer".to_string(),
                },
                &saved.hash(),
            )
            .await
            .unwrap();

        // Operator rotates the refresh token.
        write_saved(&creds_path, "refresh-2").await;

        let service = CredentialsService::new(
            test_client(store.clone()),
            CredentialsReader::new(&creds_path),
        );

        let cached = service.validate_cache().await.unwrap();
        assert!(cached.is_none(), "stale cache must not be returned");
        assert!(
            store.read().await.unwrap().is_none(),
            "cache file must be purged"
        );
    }

    #[tokio::test]
    async fn test_corrupted_cache_falls_through_to_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        let creds_path = dir.path().join("credentials.yaml");
        write_saved(&creds_path, "refresh-1").await;

        let cache_path = dir.path().join("cache.bin");
        tokio::fs::write(&cache_path, b"not an encrypted cache")
            .await
            .unwrap();

        let store = Arc::new(CredentialsStore::new(&cache_path, None));
        let service =
            CredentialsService::new(test_client(store), CredentialsReader::new(&creds_path));

        assert!(service.validate_cache().await.unwrap().is_none());
    }
}

mod config_flow {
    use super::*;

    #[test]
    fn test_channel_params_derive_from_defaults() {
        let yaml = "\
credentialsFile: credentials.yaml
defaultParams:
  remux: false
  packetLossMax: 40
  labels:
    tier: default
channels:
  chan-a:
    packetLossMax: 5
    labels:
      tier: vip
      region: jp
  chan-b: {}
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        let mut defaults = Params::default();
        config.default_params.override_onto(&mut defaults);
        assert!(!defaults.remux);
        assert_eq!(defaults.packet_loss_max, 40);

        // Per-channel override on top of the defaults.
        let mut chan_a = defaults.clone();
        config.channels["chan-a"].override_onto(&mut chan_a);
        assert_eq!(chan_a.packet_loss_max, 5);
        assert!(!chan_a.remux);
        assert_eq!(chan_a.labels["tier"], "vip");
        assert_eq!(chan_a.labels["region"], "jp");

        // A channel without overrides inherits everything.
        let mut chan_b = defaults.clone();
        config.channels["chan-b"].override_onto(&mut chan_b);
        assert_eq!(chan_b, defaults);

        // The defaults themselves are untouched by channel overrides.
        assert_eq!(defaults.labels["tier"], "default");
        assert!(!defaults.labels.contains_key("region"));
    }

    #[test]
    fn test_wait_poll_interval_parses_human_durations() {
        let yaml = "\
defaultParams:
  waitPollInterval: 1m30s
  eligibleForCleaningAge: 24h
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let mut params = Params::default();
        config.default_params.override_onto(&mut params);
        assert_eq!(params.wait_poll_interval, Duration::from_secs(90));
        assert_eq!(
            params.eligible_for_cleaning_age,
            Duration::from_secs(24 * 3600)
        );
    }
}

mod output_naming {
    use super::*;
    use withny_dl::monitor::preparer::prepare_file_auto_rename;

    fn meta() -> Metadata {
        let mut meta = Metadata::default();
        meta.user.username = "chan".to_string();
        meta.user.name = "Chan".to_string();
        meta.stream.title = "test".to_string();
        meta
    }

    #[test]
    fn test_every_extension_gets_its_own_auto_renamed_slot() {
        // A second recording of the same title must not clobber the first
        // one's outputs, for any of the produced files.
        let dir = tempfile::tempdir().unwrap();
        let template = format!("{}/{{{{ .Title }}}}.{{{{ .Ext }}}}", dir.path().display());
        let labels = HashMap::new();

        for ext in ["ts", "mp4", "chat.json", "info.json"] {
            let first = prepare_file_auto_rename(&template, &meta(), &labels, ext).unwrap();
            std::fs::write(&first, b"first").unwrap();
            let second = prepare_file_auto_rename(&template, &meta(), &labels, ext).unwrap();
            assert_ne!(first, second);
            assert_eq!(second, dir.path().join(format!("test.1.{ext}")));
        }
    }
}
