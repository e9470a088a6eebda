pub mod error;
pub mod settings;

pub use error::*;
pub use settings::*;

use std::path::PathBuf;

/// Environment variable naming a settings file directly
pub const CONFIG_PATH_ENV: &str = "CLOUDPLANE_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "cloudplane.local.yaml",
    ".cloudplane.local.yaml",
    "cloudplane.yaml",
    ".cloudplane.yaml",
];

/// Cloudplane's global configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudplane"))
}

/// Find the settings file
///
/// Search order:
/// 1. `CLOUDPLANE_CONFIG_PATH` (direct path)
/// 2. current directory: cloudplane.local.yaml, .cloudplane.local.yaml, cloudplane.yaml, .cloudplane.yaml
/// 3. the same names under `./.cloudplane/`
/// 4. ~/.config/cloudplane/cloudplane.yaml (global settings)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".cloudplane");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("cloudplane.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Find and load the settings file
pub fn load_settings() -> Result<(PathBuf, Settings)> {
    let path = find_config_file()?;
    let settings = Settings::load(&path)?;
    Ok((path, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("cloudplane"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("cloudplane.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("cloudplane.yaml"));
    }

    #[test]
    #[serial]
    fn test_local_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("cloudplane.yaml"), "{}").unwrap();
        fs::write(temp_dir.path().join(".cloudplane.local.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".cloudplane.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(".cloudplane");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("cloudplane.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".cloudplane/cloudplane.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "reconciler: {auto_retry_limit: 1}").unwrap();

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        }

        let result = load_settings();

        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }

        let (path, settings) = result.unwrap();
        assert_eq!(path, config_path);
        assert_eq!(settings.reconciler.auto_retry_limit, 1);
    }

    #[test]
    #[serial]
    fn test_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();

        // A global settings file on the test machine would also satisfy the search
        let global_exists = get_config_dir()
            .map(|dir| dir.join("cloudplane.yaml").exists())
            .unwrap_or(false);
        if !global_exists {
            assert!(matches!(result, Err(ConfigError::ConfigFileNotFound)));
        }
    }
}
