use std::fs;
use std::path::{Path, PathBuf};

use crate::common::Result;

pub struct DBFiles {
    data_directory: PathBuf,
    log_directory: PathBuf,
}

impl DBFiles {
    pub fn new(db_path: &Path) -> Result<Self> {
        let data_directory = db_path.join("data");
        let log_directory = db_path.join("log");

        fs::create_dir_all(&data_directory)?;
        fs::create_dir_all(&log_directory)?;

        Ok(Self {
            data_directory,
            log_directory,
        })
    }

    pub fn get_data_file_path(&self) -> PathBuf {
        self.data_directory.join("pages.db")
    }

    /// Directory holding the numbered WAL segment files.
    pub fn get_log_directory(&self) -> &Path {
        &self.log_directory
    }
}
