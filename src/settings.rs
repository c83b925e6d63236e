use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Arg, Command};
use config::Config;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
    alert_webhook_receiver::{AlertReceiverSettings, RecipientSettings},
    dispatcher::GatewaySettings,
    log::LogSettings,
    telemetry_endpoint::TelemetryEndpointSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// prefix of environment variables overriding config file values, e.g.
/// `ALERT_RELAY_GATEWAY__URL` overrides `gateway.url`
const ENV_PREFIX: &str = "ALERT_RELAY";

fn default_pause_marker() -> PathBuf {
    PathBuf::from("/tmp/pause")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub alert_webhook_receiver: AlertReceiverSettings,
    pub gateway: GatewaySettings,
    #[serde(default = "default_pause_marker")]
    pub pause_marker: PathBuf,
    #[serde(default)]
    pub recipient: RecipientSettings,
    pub log: LogSettings,
    pub telemetry_endpoint: TelemetryEndpointSettings,
}

impl Settings {
    pub fn global() -> &'static Self {
        SETTINGS.get_or_init(|| {
            match Self::load().context("failed to load config and command line arguments") {
                Ok(settings) => settings,
                Err(err) => {
                    // tracing wasn't setup yet
                    panic!("{:#?}", err);
                }
            }
        })
    }

    fn load() -> Result<Self> {
        let opts = Command::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .author(clap::crate_authors!())
            .args(&[
                Arg::new("config")
                    .help("path of config file")
                    .takes_value(true)
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
                Arg::new("level")
                    .help("log level")
                    .possible_values(["Error", "Warn", "Info", "Debug", "Trace"])
                    .ignore_case(true)
                    .takes_value(true)
                    .long("log"),
            ])
            .get_matches();

        let config_path = opts
            .value_of("config")
            .context("config path has a default value")?;

        let mut settings = Self::from_file(config_path)?;

        if let Some(level) = opts.value_of("level") {
            settings.log.level = level.to_string();
        }

        Ok(settings)
    }

    /// reads the config file at `path`, values can be overridden by environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let conf = Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("can't load config {}", path.display()))?;

        let settings: Self = conf.try_deserialize().context("can't load config")?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.gateway.timeout.is_zero(),
            "gateway.timeout must be greater than zero"
        );
        ensure!(
            !self.alert_webhook_receiver.request_timeout.is_zero(),
            "alert_webhook_receiver.request_timeout must be greater than zero"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_full_config() {
        let file = write_config(
            r#"
alert_webhook_receiver:
  bind_address: 0.0.0.0
  port: 8080
  content_sniffing: true
  request_timeout: 30
gateway:
  url: http://192.168.1.12:3005/message
  timeout: 12.5
pause_marker: /run/alert-relay/pause
recipient:
  env_var: RELAY_RECIPIENT
  handle: "+15550001111"
log:
  level: debug
telemetry_endpoint:
  bind_address: 127.0.0.1
  port: 9090
"#,
        );

        let settings = Settings::from_file(file.path()).unwrap();

        assert_eq!(settings.alert_webhook_receiver.to_socket_addr().port(), 8080);
        assert!(settings.alert_webhook_receiver.content_sniffing);
        assert_eq!(
            settings.alert_webhook_receiver.request_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(settings.gateway.url.as_str(), "http://192.168.1.12:3005/message");
        assert_eq!(settings.gateway.timeout, Duration::from_millis(12_500));
        assert_eq!(settings.pause_marker, PathBuf::from("/run/alert-relay/pause"));
        assert_eq!(settings.recipient.env_var, "RELAY_RECIPIENT");
        assert_eq!(settings.recipient.handle.as_deref(), Some("+15550001111"));
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn optional_values_have_defaults() {
        let file = write_config(
            r#"
alert_webhook_receiver:
  bind_address: 0.0.0.0
  port: 8080
  request_timeout: 30
gateway:
  url: http://localhost:3005/message
  timeout: 30
log:
  level: info
telemetry_endpoint:
  bind_address: 127.0.0.1
  port: 9090
"#,
        );

        let settings = Settings::from_file(file.path()).unwrap();

        assert!(!settings.alert_webhook_receiver.content_sniffing);
        assert_eq!(settings.pause_marker, PathBuf::from("/tmp/pause"));
        assert_eq!(settings.recipient.env_var, "IMESSAGE_RECIPIENT");
        assert_eq!(settings.recipient.handle, None);
    }

    fn config_with_timeouts(request_timeout: &str, gateway_timeout: &str) -> String {
        format!(
            r#"
alert_webhook_receiver:
  bind_address: 0.0.0.0
  port: 8080
  request_timeout: {request_timeout}
gateway:
  url: http://localhost:3005/message
  timeout: {gateway_timeout}
log:
  level: info
telemetry_endpoint:
  bind_address: 127.0.0.1
  port: 9090
"#
        )
    }

    #[test]
    fn sub_second_timeouts_keep_their_fraction() {
        let file = write_config(&config_with_timeouts("1.5", "0.4"));

        let settings = Settings::from_file(file.path()).unwrap();

        assert_eq!(settings.gateway.timeout, Duration::from_millis(400));
        assert_eq!(
            settings.alert_webhook_receiver.request_timeout,
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let file = write_config(&config_with_timeouts("30", "0"));
        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("gateway.timeout"), "{err:#}");

        let file = write_config(&config_with_timeouts("0", "30"));
        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("request_timeout"), "{err:#}");
    }

    #[test]
    fn invalid_gateway_url_is_rejected() {
        let file = write_config(
            r#"
alert_webhook_receiver:
  bind_address: 0.0.0.0
  port: 8080
  request_timeout: 30
gateway:
  url: not a url
  timeout: 30
log:
  level: info
telemetry_endpoint:
  bind_address: 127.0.0.1
  port: 9090
"#,
        );

        assert!(Settings::from_file(file.path()).is_err());
    }
}
