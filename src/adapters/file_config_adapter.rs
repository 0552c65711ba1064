//! INI file configuration adapter.

use crate::domain::error::VintageError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VintageError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| VintageError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, VintageError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| VintageError::ConfigParse {
                file: "<inline>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_sections() {
        let content = r#"
[universe]
id = SP500

[strategy]
holding_months = 6
selection_fraction = 0.1

[data]
csv_dir = /data/prices
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(adapter.get_string("universe", "id"), Some("SP500".to_string()));
        assert_eq!(adapter.get_int("strategy", "holding_months", 0), 6);
        assert_eq!(adapter.get_double("strategy", "selection_fraction", 0.0), 0.1);
        assert_eq!(
            adapter.get_string("data", "csv_dir"),
            Some("/data/prices".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[universe]\nid = SP500\n").unwrap();
        assert_eq!(adapter.get_string("universe", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "id"), None);
    }

    #[test]
    fn numeric_getters_default_when_missing_or_garbage() {
        let adapter =
            FileConfigAdapter::from_string("[strategy]\nholding_months = abc\nlong_exposure = x\n")
                .unwrap();
        assert_eq!(adapter.get_int("strategy", "holding_months", 6), 6);
        assert_eq!(adapter.get_int("strategy", "missing", 42), 42);
        assert_eq!(adapter.get_double("strategy", "long_exposure", 1.0), 1.0);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[backtest]\na = true\nb = Yes\nc = 1\nd = false\ne = no\nf = 0\n",
        )
        .unwrap();
        assert!(adapter.get_bool("backtest", "a", false));
        assert!(adapter.get_bool("backtest", "b", false));
        assert!(adapter.get_bool("backtest", "c", false));
        assert!(!adapter.get_bool("backtest", "d", true));
        assert!(!adapter.get_bool("backtest", "e", true));
        assert!(!adapter.get_bool("backtest", "f", true));
        assert!(adapter.get_bool("backtest", "missing", true));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[backtest]\nerror_policy = skip-and-log\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "error_policy"),
            Some("skip-and-log".to_string())
        );
    }

    #[test]
    fn adapter_is_debug_printable() {
        let adapter = FileConfigAdapter::from_string("[universe]\nid = SP500\n").unwrap();
        assert!(format!("{adapter:?}").contains("FileConfigAdapter"));
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let err = FileConfigAdapter::from_file("/nonexistent/path/config.ini").unwrap_err();
        assert!(
            matches!(err, VintageError::ConfigParse { file, .. } if file.contains("config.ini"))
        );
    }
}
