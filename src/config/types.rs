use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub lessons: LessonsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection string used by every lesson, e.g. `sqlite:///blog.db`.
    /// When unset each lesson uses its own file under `lessons.data_dir`.
    #[serde(default)]
    pub url: Option<String>,

    /// Log every SQL statement at INFO
    #[serde(default)]
    pub echo: bool,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    tablekit_db::pool::DEFAULT_POOL_SIZE
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            echo: false,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LessonsConfig {
    /// Directory holding the `example-0N.db` files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for LessonsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Connection string for a lesson whose default database file is `file_name`.
    pub fn database_url(&self, file_name: &str) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite:///{}",
                self.lessons.data_dir.join(file_name).display()
            ),
        }
    }
}
