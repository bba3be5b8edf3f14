//! Per-channel recording parameters.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::platform::playlist::PlaylistConstraint;
use crate::utils::duration;

/// Effective parameters for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Params {
    pub quality: PlaylistConstraint,
    pub packet_loss_max: u32,
    pub fragment_retries: u32,
    pub playlist_retries: u32,
    pub out_format: String,
    pub write_chat: bool,
    pub write_meta_data_json: bool,
    pub write_thumbnail: bool,
    #[serde(with = "duration")]
    pub wait_poll_interval: Duration,
    pub remux: bool,
    pub remux_format: String,
    pub concat: bool,
    pub keep_intermediates: bool,
    pub scan_directory: String,
    #[serde(with = "duration")]
    pub eligible_for_cleaning_age: Duration,
    pub delete_corrupted: bool,
    pub extract_audio: bool,
    pub pass_code: String,
    pub labels: HashMap<String, String>,
    pub ignore: Vec<String>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            quality: PlaylistConstraint::default(),
            packet_loss_max: 20,
            fragment_retries: 10,
            playlist_retries: 10,
            out_format: "{{ .Date }} {{ .Title }} ({{ .ChannelName }}).{{ .Ext }}".to_string(),
            write_chat: false,
            write_meta_data_json: false,
            write_thumbnail: false,
            wait_poll_interval: Duration::from_secs(10),
            remux: true,
            remux_format: "mp4".to_string(),
            concat: true,
            keep_intermediates: false,
            scan_directory: String::new(),
            eligible_for_cleaning_age: Duration::from_secs(48 * 3600),
            delete_corrupted: true,
            extract_audio: false,
            pass_code: String::new(),
            labels: HashMap::new(),
            ignore: Vec::new(),
        }
    }
}

/// A partial parameter record; absent fields leave the base intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionalParams {
    pub quality: Option<PlaylistConstraint>,
    pub packet_loss_max: Option<u32>,
    pub fragment_retries: Option<u32>,
    pub playlist_retries: Option<u32>,
    pub out_format: Option<String>,
    pub write_chat: Option<bool>,
    pub write_meta_data_json: Option<bool>,
    pub write_thumbnail: Option<bool>,
    #[serde(with = "duration::option")]
    pub wait_poll_interval: Option<Duration>,
    pub remux: Option<bool>,
    pub remux_format: Option<String>,
    pub concat: Option<bool>,
    pub keep_intermediates: Option<bool>,
    pub scan_directory: Option<String>,
    #[serde(with = "duration::option")]
    pub eligible_for_cleaning_age: Option<Duration>,
    pub delete_corrupted: Option<bool>,
    pub extract_audio: Option<bool>,
    pub pass_code: Option<String>,
    pub labels: Option<HashMap<String, String>>,
    pub ignore: Option<Vec<String>>,
}

impl OptionalParams {
    /// Apply the set fields onto `params`. Map-typed fields merge
    /// copy-then-overwrite; list-typed fields replace.
    pub fn override_onto(&self, params: &mut Params) {
        if let Some(v) = &self.quality {
            params.quality = v.clone();
        }
        if let Some(v) = self.packet_loss_max {
            params.packet_loss_max = v;
        }
        if let Some(v) = self.fragment_retries {
            params.fragment_retries = v;
        }
        if let Some(v) = self.playlist_retries {
            params.playlist_retries = v;
        }
        if let Some(v) = &self.out_format {
            params.out_format = v.clone();
        }
        if let Some(v) = self.write_chat {
            params.write_chat = v;
        }
        if let Some(v) = self.write_meta_data_json {
            params.write_meta_data_json = v;
        }
        if let Some(v) = self.write_thumbnail {
            params.write_thumbnail = v;
        }
        if let Some(v) = self.wait_poll_interval {
            params.wait_poll_interval = v;
        }
        if let Some(v) = self.remux {
            params.remux = v;
        }
        if let Some(v) = &self.remux_format {
            params.remux_format = v.clone();
        }
        if let Some(v) = self.concat {
            params.concat = v;
        }
        if let Some(v) = self.keep_intermediates {
            params.keep_intermediates = v;
        }
        if let Some(v) = &self.scan_directory {
            params.scan_directory = v.clone();
        }
        if let Some(v) = self.eligible_for_cleaning_age {
            params.eligible_for_cleaning_age = v;
        }
        if let Some(v) = self.delete_corrupted {
            params.delete_corrupted = v;
        }
        if let Some(v) = self.extract_audio {
            params.extract_audio = v;
        }
        if let Some(v) = &self.pass_code {
            params.pass_code = v.clone();
        }
        if let Some(v) = &self.labels {
            params.labels.extend(v.iter().map(|(k, val)| (k.clone(), val.clone())));
        }
        if let Some(v) = &self.ignore {
            params.ignore = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = Params::default();
        assert_eq!(params.packet_loss_max, 20);
        assert_eq!(params.fragment_retries, 10);
        assert_eq!(params.playlist_retries, 10);
        assert_eq!(params.wait_poll_interval, Duration::from_secs(10));
        assert!(params.remux);
        assert_eq!(params.remux_format, "mp4");
        assert_eq!(
            params.eligible_for_cleaning_age,
            Duration::from_secs(48 * 3600)
        );
        assert!(params.delete_corrupted);
    }

    #[test]
    fn test_override_absent_fields_leave_defaults() {
        let mut params = Params::default();
        OptionalParams::default().override_onto(&mut params);
        assert_eq!(params, Params::default());
    }

    #[test]
    fn test_override_set_fields() {
        let mut params = Params::default();
        let overrides = OptionalParams {
            packet_loss_max: Some(5),
            remux: Some(false),
            pass_code: Some("1234".to_string()),
            ..Default::default()
        };
        overrides.override_onto(&mut params);
        assert_eq!(params.packet_loss_max, 5);
        assert!(!params.remux);
        assert_eq!(params.pass_code, "1234");
        // Untouched fields stay at their defaults.
        assert_eq!(params.fragment_retries, 10);
    }

    #[test]
    fn test_labels_merge_copy_then_overwrite() {
        let mut params = Params::default();
        params.labels =
            HashMap::from([("a".into(), "1".into()), ("b".into(), "2".into())]);

        let overrides = OptionalParams {
            labels: Some(HashMap::from([
                ("b".into(), "override".into()),
                ("c".into(), "3".into()),
            ])),
            ..Default::default()
        };
        overrides.override_onto(&mut params);

        assert_eq!(params.labels["a"], "1");
        assert_eq!(params.labels["b"], "override");
        assert_eq!(params.labels["c"], "3");
    }

    #[test]
    fn test_ignore_list_replaces() {
        let mut params = Params::default();
        params.ignore = vec!["old".to_string()];
        let overrides = OptionalParams {
            ignore: Some(vec!["new".to_string()]),
            ..Default::default()
        };
        overrides.override_onto(&mut params);
        assert_eq!(params.ignore, ["new"]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "\
quality:
  maxHeight: 720
packetLossMax: 30
writeMetaDataJson: true
waitPollInterval: 30s
remuxFormat: mkv
";
        let overrides: OptionalParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(overrides.quality.as_ref().unwrap().max_height, 720);
        assert_eq!(overrides.packet_loss_max, Some(30));
        assert_eq!(overrides.write_meta_data_json, Some(true));
        assert_eq!(overrides.wait_poll_interval, Some(Duration::from_secs(30)));
        assert_eq!(overrides.remux_format.as_deref(), Some("mkv"));
        assert!(overrides.concat.is_none());
    }
}
