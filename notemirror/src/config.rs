use std::path::{Path, PathBuf};

use anyhow::Context;

const DEFAULT_OUTPUT_DIR_NAME: &str = "Supernote";
const DEFAULT_SUFFIX: &str = ".note";
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_CONCURRENCY: u64 = 1;
const DEFAULT_MAX_ATTEMPTS: u64 = 5;
// The Drive API caps pageSize at 1000.
const MAX_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub token: String,
    pub output_root: PathBuf,
    pub mirror_root: PathBuf,
    pub quarantine_root: PathBuf,
    pub derived_roots: Vec<PathBuf>,
    pub suffix: String,
    pub page_size: u32,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub api_base: Option<String>,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_vars(&home, |name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(home: &Path, var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = var("NOTEMIRROR_TOKEN")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("NOTEMIRROR_TOKEN is not set")?;
        let path_var = |name: &str| {
            var(name)
                .filter(|value| !value.trim().is_empty())
                .map(|value| expand_with_home(value.trim(), home))
        };

        let output_root =
            path_var("NOTEMIRROR_OUTPUT_DIR").unwrap_or_else(|| home.join(DEFAULT_OUTPUT_DIR_NAME));
        let mirror_root =
            path_var("NOTEMIRROR_MIRROR_DIR").unwrap_or_else(|| output_root.join("sources"));
        let quarantine_root =
            path_var("NOTEMIRROR_QUARANTINE_DIR").unwrap_or_else(|| output_root.join("quarantine"));
        let derived_roots = match var("NOTEMIRROR_DERIVED_DIRS") {
            Some(value) => value
                .split(':')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| expand_with_home(part, home))
                .collect(),
            None => vec![output_root.join("images"), output_root.join("notes")],
        };
        let suffix = var("NOTEMIRROR_SUFFIX")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_string());
        let page_size = read_u64(&var, "NOTEMIRROR_PAGE_SIZE", DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let concurrency = read_u64(&var, "NOTEMIRROR_CONCURRENCY", DEFAULT_CONCURRENCY);
        let max_attempts = read_u64(&var, "NOTEMIRROR_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS);
        let api_base = var("NOTEMIRROR_API_BASE").filter(|value| !value.trim().is_empty());

        Ok(Self {
            token,
            output_root,
            mirror_root,
            quarantine_root,
            derived_roots,
            suffix,
            page_size: page_size as u32,
            concurrency: concurrency.min(usize::MAX as u64) as usize,
            max_attempts: max_attempts.min(u32::MAX as u64) as u32,
            api_base,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64<F>(var: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<MirrorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MirrorConfig::from_vars(Path::new("/home/u"), |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_hang_off_output_root() {
        let cfg = config(&[("NOTEMIRROR_TOKEN", "tok")]).unwrap();
        assert_eq!(cfg.token, "tok");
        assert_eq!(cfg.output_root, PathBuf::from("/home/u/Supernote"));
        assert_eq!(cfg.mirror_root, PathBuf::from("/home/u/Supernote/sources"));
        assert_eq!(cfg.quarantine_root, PathBuf::from("/home/u/Supernote/quarantine"));
        assert_eq!(
            cfg.derived_roots,
            vec![
                PathBuf::from("/home/u/Supernote/images"),
                PathBuf::from("/home/u/Supernote/notes")
            ]
        );
        assert_eq!(cfg.suffix, ".note");
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.api_base, None);
    }

    #[test]
    fn token_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("NOTEMIRROR_TOKEN"));
        assert!(config(&[("NOTEMIRROR_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn overrides_expand_home() {
        let cfg = config(&[
            ("NOTEMIRROR_TOKEN", "tok"),
            ("NOTEMIRROR_OUTPUT_DIR", "~/out"),
            ("NOTEMIRROR_MIRROR_DIR", "/srv/mirror"),
            ("NOTEMIRROR_DERIVED_DIRS", "~/png: /tmp/md ::"),
            ("NOTEMIRROR_SUFFIX", ".spd"),
        ])
        .unwrap();
        assert_eq!(cfg.output_root, PathBuf::from("/home/u/out"));
        assert_eq!(cfg.mirror_root, PathBuf::from("/srv/mirror"));
        assert_eq!(cfg.quarantine_root, PathBuf::from("/home/u/out/quarantine"));
        assert_eq!(
            cfg.derived_roots,
            vec![PathBuf::from("/home/u/png"), PathBuf::from("/tmp/md")]
        );
        assert_eq!(cfg.suffix, ".spd");
    }

    #[test]
    fn numeric_values_fall_back_when_invalid() {
        let cfg = config(&[
            ("NOTEMIRROR_TOKEN", "tok"),
            ("NOTEMIRROR_PAGE_SIZE", "5000"),
            ("NOTEMIRROR_CONCURRENCY", "0"),
            ("NOTEMIRROR_MAX_ATTEMPTS", "many"),
        ])
        .unwrap();
        assert_eq!(cfg.page_size, 1000);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.max_attempts, 5);
    }

    #[test]
    fn expand_with_home_handles_tilde_forms() {
        let home = Path::new("/home/u");
        assert_eq!(expand_with_home("~", home), PathBuf::from("/home/u"));
        assert_eq!(expand_with_home("~/a/b", home), PathBuf::from("/home/u/a/b"));
        assert_eq!(expand_with_home("/abs", home), PathBuf::from("/abs"));
    }
}
