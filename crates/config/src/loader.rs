use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{MailConfig, PortcullisConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "portcullis.toml",
    "portcullis.yaml",
    "portcullis.yml",
    "portcullis.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<PortcullisConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations, then apply
/// `PORTCULLIS_SMTP_*` environment overrides.
///
/// Search order:
/// 1. `./portcullis.{toml,yaml,yml,json}`
/// 2. `~/.config/portcullis/portcullis.{toml,yaml,yml,json}`
///
/// Falls back to defaults when nothing is found or the file is unreadable.
pub fn discover_and_load() -> PortcullisConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                PortcullisConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            PortcullisConfig::default()
        },
    };
    if let Err(e) = apply_env_overrides(&mut config) {
        warn!(error = %e, "ignoring invalid environment override");
    }
    config
}

/// Returns the user-global config directory (`~/.config/portcullis/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "portcullis").map(|d| d.config_dir().to_path_buf())
}

/// Path of the config file that [`discover_and_load`] would use.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Overlay SMTP settings from `PORTCULLIS_SMTP_*` environment variables.
pub fn apply_env_overrides(config: &mut PortcullisConfig) -> Result<()> {
    apply_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_overrides_with(
    config: &mut PortcullisConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let host = lookup("PORTCULLIS_SMTP_HOST");
    if config.mail.is_none() {
        // A mail section is only synthesized when both ends of the transport
        // are known.
        let (Some(host), Some(from)) = (host.clone(), lookup("PORTCULLIS_SMTP_FROM")) else {
            return Ok(());
        };
        config.mail = Some(MailConfig {
            host,
            port: 587,
            secure: false,
            user: None,
            pass: None,
            from,
            timeout_secs: 10,
        });
    }
    let Some(mail) = config.mail.as_mut() else {
        return Ok(());
    };

    if let Some(host) = host {
        mail.host = host;
    }
    if let Some(from) = lookup("PORTCULLIS_SMTP_FROM") {
        mail.from = from;
    }
    if let Some(port) = lookup("PORTCULLIS_SMTP_PORT") {
        mail.port = port.trim().parse().map_err(|_| Error::InvalidEnv {
            var: "PORTCULLIS_SMTP_PORT",
            value: port.clone(),
        })?;
    }
    if let Some(secure) = lookup("PORTCULLIS_SMTP_SECURE") {
        mail.secure = match secure.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(Error::InvalidEnv {
                    var: "PORTCULLIS_SMTP_SECURE",
                    value: secure,
                });
            },
        };
    }
    if let Some(user) = lookup("PORTCULLIS_SMTP_USER") {
        mail.user = Some(user);
    }
    if let Some(pass) = lookup("PORTCULLIS_SMTP_PASS") {
        mail.pass = Some(Secret::new(pass));
    }
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> Result<PortcullisConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::collections::HashMap};

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portcullis.toml");
        std::fs::write(
            &path,
            "[access]\nmax_active_tokens = 3\ntoken_ttl_secs = 60\n[server]\nport = 9000\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.access.max_active_tokens, 3);
        assert_eq!(cfg.access.token_ttl_secs, 60);
        assert_eq!(cfg.access.max_failed_attempts, 10);
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("portcullis.yaml");
        std::fs::write(&yaml, "otp:\n  max_attempts: 3\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().otp.max_attempts, 3);

        let json = dir.path().join("portcullis.json");
        std::fs::write(&json, r#"{"otp":{"expiry_secs":120}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().otp.expiry_secs, 120);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portcullis.ini");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load_config(Path::new("/nonexistent/portcullis.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn env_overrides_patch_existing_mail_section() {
        let mut cfg: PortcullisConfig = toml::from_str(
            "[mail]\nhost = \"smtp.example.com\"\nfrom = \"bot@example.com\"\n",
        )
        .unwrap();
        apply_overrides_with(
            &mut cfg,
            env(&[
                ("PORTCULLIS_SMTP_PORT", "465"),
                ("PORTCULLIS_SMTP_SECURE", "true"),
                ("PORTCULLIS_SMTP_PASS", "p4ss"),
            ]),
        )
        .unwrap();
        let mail = cfg.mail.unwrap();
        assert_eq!(mail.host, "smtp.example.com");
        assert_eq!(mail.port, 465);
        assert!(mail.secure);
        assert_eq!(mail.pass.unwrap().expose_secret(), "p4ss");
    }

    #[test]
    fn env_overrides_create_mail_section_when_complete() {
        let mut cfg = PortcullisConfig::default();
        apply_overrides_with(&mut cfg, env(&[("PORTCULLIS_SMTP_HOST", "smtp.example.com")]))
            .unwrap();
        assert!(cfg.mail.is_none());

        apply_overrides_with(
            &mut cfg,
            env(&[
                ("PORTCULLIS_SMTP_HOST", "smtp.example.com"),
                ("PORTCULLIS_SMTP_FROM", "bot@example.com"),
                ("PORTCULLIS_SMTP_USER", "bot"),
            ]),
        )
        .unwrap();
        let mail = cfg.mail.unwrap();
        assert_eq!(mail.from, "bot@example.com");
        assert_eq!(mail.user.as_deref(), Some("bot"));
    }

    #[test]
    fn invalid_port_override_is_reported() {
        let mut cfg = PortcullisConfig::default();
        let err = apply_overrides_with(
            &mut cfg,
            env(&[
                ("PORTCULLIS_SMTP_HOST", "smtp.example.com"),
                ("PORTCULLIS_SMTP_FROM", "bot@example.com"),
                ("PORTCULLIS_SMTP_PORT", "smtp"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { var: "PORTCULLIS_SMTP_PORT", .. }));
    }
}
